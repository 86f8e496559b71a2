//! Lifecycle of the signalling channel between the two earbuds.
//!
//! ```text
//! None -> Initialising -> Disconnected -> SdpSearch -> ConnectingLocal --+
//!                              ^    \---------------> ConnectingRemote -+-> Connected
//!                              |                                             |
//!                              +--------------- Disconnecting <--------------+
//! ```
//!
//! The connection service answers asynchronously. Its confirmations and
//! indications come back through [`HandoverProfile::handle_event`].

use std::fmt;

use handover_frame::BdAddr;
use handover_transport::{LinkSink, LinkSource};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{HandoverStatus, ProtocolFault, Result};
use crate::event::{ListenerRef, ProfileEvent};
use crate::profile::HandoverProfile;
use crate::protocol::MarshalState;

/// Connection state of the handover profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    None,
    Initialising,
    Disconnected,
    ConnectingSdpSearch,
    ConnectingLocal,
    ConnectingRemote,
    Connected,
    Disconnecting,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::None => "none",
            ConnectionState::Initialising => "initialising",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::ConnectingSdpSearch => "connecting_sdp_search",
            ConnectionState::ConnectingLocal => "connecting_local",
            ConnectionState::ConnectingRemote => "connecting_remote",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
        }
    }

    fn is_connecting(self) -> bool {
        matches!(
            self,
            ConnectionState::ConnectingSdpSearch
                | ConnectionState::ConnectingLocal
                | ConnectionState::ConnectingRemote
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier the connection service gives a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct LinkId(pub u16);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link#{}", self.0)
    }
}

/// The connected signalling channel.
pub struct Channel {
    pub id: LinkId,
    pub sink: Box<dyn LinkSink>,
    pub source: Box<dyn LinkSource>,
}

impl Channel {
    pub fn new(id: LinkId, sink: Box<dyn LinkSink>, source: Box<dyn LinkSource>) -> Self {
        Self { id, sink, source }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("mtu", &self.sink.mtu())
            .finish_non_exhaustive()
    }
}

/// Outcome of a service search on the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchResult {
    /// The handover service was found at `remote_psm`.
    Found { remote_psm: u16 },
    /// The record exists but could not be parsed.
    MalformedRecord,
    /// The peer has no handover service.
    NoResponseData,
    /// The search itself failed and may be retried.
    Failed,
}

/// Result carried by a connect confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStatus {
    /// Still in progress, a final confirmation follows.
    Pending,
    Success,
    Failed,
}

/// Asynchronous answers from the connection service.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// Local endpoint registration finished. `None` means it failed.
    PsmRegistered { psm: Option<u16> },
    ServiceRecordRegistered { success: bool },
    SearchComplete(SearchResult),
    /// The peer wants to open a channel.
    ConnectInd {
        peer: BdAddr,
        psm: u16,
        connection_id: u16,
        identifier: u8,
    },
    /// Answer to an outbound connect or to an accepted inbound one.
    ConnectCfm {
        status: ConnectStatus,
        channel: Option<Channel>,
    },
    DisconnectInd {
        link: LinkId,
        link_loss: bool,
        identifier: u8,
    },
    DisconnectCfm { link: LinkId },
    /// The channel has readable data.
    MoreData,
}

impl ConnectionEvent {
    fn survives_disconnecting(&self) -> bool {
        matches!(
            self,
            ConnectionEvent::ConnectCfm { .. }
                | ConnectionEvent::DisconnectInd { .. }
                | ConnectionEvent::DisconnectCfm { .. }
        )
    }
}

/// Connection-oriented channel service the profile runs on.
///
/// Requests are fire-and-forget. Their results arrive as
/// [`ConnectionEvent`]s.
pub trait ConnectionService: Send {
    fn register_psm(&mut self);

    fn register_service_record(&mut self, psm: u16);

    fn search(&mut self, peer: &BdAddr);

    fn terminate_search(&mut self);

    fn connect_request(&mut self, peer: &BdAddr, remote_psm: u16);

    fn connect_response(&mut self, accept: bool, connection_id: u16, identifier: u8);

    fn disconnect_request(&mut self, link: LinkId);

    fn disconnect_response(&mut self, link: LinkId, identifier: u8);

    /// True if the radio link to `peer` is up.
    fn is_acl_connected(&self, peer: &BdAddr) -> bool;

    /// True if `addr` is the paired peer earbud.
    fn is_paired_peer(&self, addr: &BdAddr) -> bool;
}

impl HandoverProfile {
    /// Open the signalling channel to `peer`.
    ///
    /// `requester` receives exactly one `ConnectCfm`. A request made while
    /// another connect is still being set up is held and replayed once that
    /// attempt settles.
    pub fn connect(&mut self, requester: ListenerRef, peer: BdAddr) -> Result<()> {
        if peer.is_zero() {
            return Err(ProtocolFault::usage("connect requires a peer address"));
        }
        if matches!(
            self.state,
            ConnectionState::None | ConnectionState::Initialising
        ) {
            return Err(ProtocolFault::usage(format!(
                "connect called in state {}",
                self.state
            )));
        }

        self.is_primary = true;

        if self.sdp_search_attempts != 0
            || matches!(
                self.state,
                ConnectionState::ConnectingLocal
                    | ConnectionState::ConnectingRemote
                    | ConnectionState::Disconnecting
            )
        {
            debug!(%peer, state = %self.state, "connect queued");
            self.queued_connect = Some((peer, requester));
            return Ok(());
        }

        self.connect_requester = Some(requester);
        self.start_connect(peer)
    }

    /// Tear the signalling channel down. `requester` receives a
    /// `DisconnectCfm`.
    pub fn disconnect(&mut self, requester: ListenerRef) -> Result<()> {
        self.disconnect_requester = Some(requester);
        self.queued_connect = None;

        match self.state {
            ConnectionState::ConnectingLocal => {
                self.send_connect_cfm(HandoverStatus::PeerConnectCancelled);
                self.set_state(ConnectionState::Disconnecting);
            }
            ConnectionState::Connected | ConnectionState::ConnectingRemote => {
                self.set_state(ConnectionState::Disconnecting);
            }
            ConnectionState::ConnectingSdpSearch => {
                self.service.terminate_search();
                self.set_state(ConnectionState::Disconnected);
                self.send_disconnect_cfm(HandoverStatus::Success);
            }
            ConnectionState::Disconnected => {
                self.send_disconnect_cfm(HandoverStatus::Success);
            }
            state => {
                self.disconnect_requester = None;
                return Err(ProtocolFault::usage(format!(
                    "disconnect called in state {state}"
                )));
            }
        }
        Ok(())
    }

    /// Feed an answer from the connection service into the state machine.
    pub fn handle_event(&mut self, event: ConnectionEvent) -> Result<()> {
        if self.state == ConnectionState::Disconnecting && !event.survives_disconnecting() {
            debug!(?event, "dropped while disconnecting");
            return Ok(());
        }

        match event {
            ConnectionEvent::PsmRegistered { psm } => self.on_psm_registered(psm),
            ConnectionEvent::ServiceRecordRegistered { success } => {
                self.on_service_record_registered(success)
            }
            ConnectionEvent::SearchComplete(result) => self.on_search_complete(result),
            ConnectionEvent::ConnectInd {
                peer,
                psm,
                connection_id,
                identifier,
            } => self.on_connect_ind(peer, psm, connection_id, identifier),
            ConnectionEvent::ConnectCfm { status, channel } => {
                self.on_connect_cfm(status, channel)
            }
            ConnectionEvent::DisconnectInd {
                link,
                link_loss,
                identifier,
            } => self.on_disconnect_ind(link, link_loss, identifier),
            ConnectionEvent::DisconnectCfm { link } => self.on_disconnect_cfm(link),
            ConnectionEvent::MoreData => {
                if self.state == ConnectionState::Connected {
                    self.process_handover_message()
                } else {
                    debug!(state = %self.state, "data outside connected state ignored");
                    Ok(())
                }
            }
        }
    }

    pub(crate) fn set_state(&mut self, next: ConnectionState) {
        let old = self.state;
        debug!(from = %old, to = %next, "connection state");

        match old {
            ConnectionState::Initialising => self.notify(ProfileEvent::InitCfm),
            ConnectionState::ConnectingSdpSearch => self.sdp_search_attempts = 0,
            _ => {}
        }

        self.state = next;

        match next {
            ConnectionState::Initialising => self.service.register_psm(),
            ConnectionState::ConnectingSdpSearch => self.start_search(),
            ConnectionState::ConnectingLocal => self.sdp_search_attempts = 0,
            ConnectionState::Connected => self.enter_connected(),
            ConnectionState::Disconnecting => {
                if let Some(channel) = &self.channel {
                    self.service.disconnect_request(channel.id);
                }
            }
            ConnectionState::Disconnected => self.enter_disconnected(old),
            ConnectionState::None | ConnectionState::ConnectingRemote => {}
        }
    }

    fn enter_connected(&mut self) {
        if let Some((peer, requester)) = self.queued_connect.take() {
            debug!(%peer, "queued connect satisfied");
            requester.on_event(&ProfileEvent::ConnectCfm {
                status: HandoverStatus::Success,
            });
        }
        self.link_loss = false;
        info!(peer = ?self.peer_addr, is_primary = self.is_primary, "handover channel connected");
        self.send_connect_cfm(HandoverStatus::Success);
        self.notify(ProfileEvent::ConnectionInd);
    }

    fn enter_disconnected(&mut self, old: ConnectionState) {
        if old.is_connecting() {
            self.send_connect_cfm(HandoverStatus::PeerConnectFailed);
        } else if old >= ConnectionState::Connected {
            info!(link_loss = self.link_loss, "handover channel disconnected");
            self.send_disconnect_cfm(HandoverStatus::Success);
            self.notify(ProfileEvent::DisconnectionInd {
                link_loss: self.link_loss,
            });
        }

        self.sdp_search_attempts = 0;
        self.is_primary = false;
        self.peer_addr = None;
        self.remote_psm = None;
        self.channel = None;
        self.marshal_sink = None;

        if let Some((peer, requester)) = self.queued_connect.take() {
            debug!(%peer, "replaying queued connect");
            self.is_primary = true;
            self.connect_requester = Some(requester);
            self.start_connect_disconnected(peer);
        }
    }

    fn start_connect(&mut self, peer: BdAddr) -> Result<()> {
        match self.state {
            ConnectionState::Disconnected => {
                self.start_connect_disconnected(peer);
                Ok(())
            }
            ConnectionState::Connected => {
                self.send_connect_cfm(HandoverStatus::Success);
                Ok(())
            }
            state => Err(ProtocolFault::usage(format!(
                "connect cannot start in state {state}"
            ))),
        }
    }

    fn start_connect_disconnected(&mut self, peer: BdAddr) {
        if self.service.is_acl_connected(&peer) {
            self.peer_addr = Some(peer);
            self.set_state(ConnectionState::ConnectingSdpSearch);
        } else {
            warn!(%peer, "no radio link to peer");
            self.send_connect_cfm(HandoverStatus::PeerConnectFailed);
        }
    }

    fn start_search(&mut self) {
        let Some(peer) = self.peer_addr else {
            return;
        };
        self.sdp_search_attempts = self.sdp_search_attempts.saturating_add(1);
        debug!(%peer, attempt = self.sdp_search_attempts, "service search");
        self.service.search(&peer);
    }

    fn on_psm_registered(&mut self, psm: Option<u16>) -> Result<()> {
        if self.state != ConnectionState::Initialising {
            return Err(ProtocolFault::usage(format!(
                "endpoint registration completed in state {}",
                self.state
            )));
        }
        let psm = psm.ok_or_else(|| ProtocolFault::Registration("endpoint".to_string()))?;
        debug!(psm, "endpoint registered");
        self.local_psm = Some(psm);
        self.service.register_service_record(psm);
        Ok(())
    }

    fn on_service_record_registered(&mut self, success: bool) -> Result<()> {
        if self.state != ConnectionState::Initialising {
            return Err(ProtocolFault::usage(format!(
                "service record registration completed in state {}",
                self.state
            )));
        }
        if !success {
            return Err(ProtocolFault::Registration("service record".to_string()));
        }
        self.set_state(ConnectionState::Disconnected);
        Ok(())
    }

    fn on_search_complete(&mut self, result: SearchResult) -> Result<()> {
        match self.state {
            ConnectionState::ConnectingSdpSearch => {}
            ConnectionState::Disconnected => {
                debug!(?result, "late search result ignored");
                return Ok(());
            }
            state => {
                return Err(ProtocolFault::usage(format!(
                    "search result in state {state}"
                )))
            }
        }

        match result {
            SearchResult::Found { remote_psm } => {
                self.remote_psm = Some(remote_psm);
                if let Some(peer) = self.peer_addr {
                    self.service.connect_request(&peer, remote_psm);
                }
                self.set_state(ConnectionState::ConnectingLocal);
            }
            SearchResult::MalformedRecord | SearchResult::NoResponseData => {
                warn!(?result, "peer has no usable handover service");
                self.set_state(ConnectionState::Disconnected);
            }
            SearchResult::Failed => {
                let acl_up = self
                    .peer_addr
                    .is_some_and(|peer| self.service.is_acl_connected(&peer));
                if acl_up && self.sdp_search_attempts < self.config.sdp_search_try_limit {
                    self.start_search();
                } else {
                    warn!(attempts = self.sdp_search_attempts, "service search gave up");
                    self.set_state(ConnectionState::Disconnected);
                }
            }
        }
        Ok(())
    }

    fn on_connect_ind(
        &mut self,
        peer: BdAddr,
        psm: u16,
        connection_id: u16,
        identifier: u8,
    ) -> Result<()> {
        if Some(psm) != self.local_psm {
            return Err(ProtocolFault::usage(format!(
                "inbound connect on unknown psm 0x{psm:04x}"
            )));
        }

        let accept =
            self.state == ConnectionState::Disconnected && self.service.is_paired_peer(&peer);
        if accept {
            self.set_state(ConnectionState::ConnectingRemote);
        } else {
            info!(%peer, state = %self.state, "inbound connect rejected");
        }
        self.service.connect_response(accept, connection_id, identifier);
        Ok(())
    }

    fn on_connect_cfm(&mut self, status: ConnectStatus, channel: Option<Channel>) -> Result<()> {
        if status == ConnectStatus::Pending {
            return Ok(());
        }

        match self.state {
            ConnectionState::ConnectingLocal | ConnectionState::ConnectingRemote => {
                if status == ConnectStatus::Success {
                    let channel = channel
                        .ok_or_else(|| ProtocolFault::usage("connect confirmed without a channel"))?;
                    debug!(link = %channel.id, "channel opened");
                    self.channel = Some(channel);
                    self.set_state(ConnectionState::Connected);
                } else {
                    self.set_state(ConnectionState::Disconnected);
                }
            }
            ConnectionState::Disconnecting => {
                if status == ConnectStatus::Success {
                    // The channel opened after shutdown was requested: close it.
                    self.channel = channel;
                    self.set_state(ConnectionState::Disconnecting);
                } else {
                    self.set_state(ConnectionState::Disconnected);
                }
            }
            state => {
                if status == ConnectStatus::Success {
                    return Err(ProtocolFault::usage(format!(
                        "connect confirmed in state {state}"
                    )));
                }
            }
        }
        Ok(())
    }

    fn on_disconnect_ind(&mut self, link: LinkId, link_loss: bool, identifier: u8) -> Result<()> {
        self.service.disconnect_response(link, identifier);

        if self.state != ConnectionState::Disconnected {
            self.is_primary = false;
            let known = self.channel.as_ref().map(|channel| channel.id);
            if known != Some(link) {
                return Err(ProtocolFault::usage(format!(
                    "disconnect indication for unknown {link}"
                )));
            }
            self.link_loss = link_loss && self.peer_addr.is_some();
            self.set_state(ConnectionState::Disconnected);
        }

        if self.marshal_state == MarshalState::P1Marshalling {
            self.clients.abort_all();
            self.set_marshal_state(MarshalState::Idle);
        }
        Ok(())
    }

    fn on_disconnect_cfm(&mut self, link: LinkId) -> Result<()> {
        match self.state {
            ConnectionState::Disconnecting => {
                debug!(%link, "disconnect confirmed");
                self.set_state(ConnectionState::Disconnected);
                Ok(())
            }
            ConnectionState::Disconnected => Ok(()),
            state => Err(ProtocolFault::usage(format!(
                "disconnect confirmed in state {state}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use handover_transport::{loopback_pair, LoopbackConfig};

    use super::*;
    use crate::config::HandoverConfig;
    use crate::event::EventLog;
    use crate::sim::{initialised, SimHandle, SECONDARY_ADDR, SIM_PSM};

    fn profile() -> (HandoverProfile, SimHandle, EventLog) {
        let sim = SimHandle::default();
        let events = EventLog::new();
        let profile = initialised(HandoverConfig::default(), &sim, Vec::new(), &events).unwrap();
        (profile, sim, events)
    }

    fn channel(id: u16) -> Channel {
        let (a, _b) = loopback_pair(LoopbackConfig::default());
        let (sink, source) = a.into_parts();
        Channel::new(LinkId(id), Box::new(sink), Box::new(source))
    }

    fn connected() -> (HandoverProfile, SimHandle, EventLog) {
        let (mut profile, sim, events) = profile();
        profile
            .connect(Arc::new(events.clone()), SECONDARY_ADDR)
            .unwrap();
        profile
            .handle_event(ConnectionEvent::SearchComplete(SearchResult::Found {
                remote_psm: SIM_PSM,
            }))
            .unwrap();
        profile
            .handle_event(ConnectionEvent::ConnectCfm {
                status: ConnectStatus::Success,
                channel: Some(channel(7)),
            })
            .unwrap();
        (profile, sim, events)
    }

    #[test]
    fn init_registers_endpoint_then_service_record() {
        let (profile, sim, events) = profile();

        assert_eq!(profile.state(), ConnectionState::Disconnected);
        assert_eq!(
            sim.journal().entries(),
            vec!["register_psm", "register_service_record:0x1001"]
        );
        assert_eq!(events.events(), vec![ProfileEvent::InitCfm]);
    }

    #[test]
    fn init_twice_is_a_usage_fault() {
        let (mut profile, _sim, _events) = profile();
        assert!(matches!(profile.init(), Err(ProtocolFault::UsageFault(_))));
    }

    #[test]
    fn failed_endpoint_registration_is_reported() {
        let sim = SimHandle::default();
        let mut profile = HandoverProfile::new(
            crate::config::HandoverConfig::default(),
            sim.service(),
            sim.platform(),
        );
        profile.init().unwrap();

        let err = profile
            .handle_event(ConnectionEvent::PsmRegistered { psm: None })
            .unwrap_err();
        assert!(matches!(err, ProtocolFault::Registration(_)));
    }

    #[test]
    fn connect_walks_search_and_local_connect() {
        let (profile, sim, events) = connected();

        assert_eq!(profile.state(), ConnectionState::Connected);
        assert!(profile.is_primary());
        assert_eq!(profile.peer_addr(), Some(SECONDARY_ADDR));
        assert!(sim
            .journal()
            .contains(&format!("connect_request:{SECONDARY_ADDR}:0x1001")));
        assert!(events.events().ends_with(&[
            ProfileEvent::ConnectCfm {
                status: HandoverStatus::Success
            },
            ProfileEvent::ConnectionInd,
        ]));
    }

    #[test]
    fn connect_without_radio_link_fails_immediately() {
        let (mut profile, sim, events) = profile();
        sim.update(|state| state.acl_connected = false);

        profile
            .connect(Arc::new(events.clone()), SECONDARY_ADDR)
            .unwrap();

        assert_eq!(profile.state(), ConnectionState::Disconnected);
        assert_eq!(
            events.last(),
            Some(ProfileEvent::ConnectCfm {
                status: HandoverStatus::PeerConnectFailed
            })
        );
    }

    #[test]
    fn failed_search_retries_up_to_the_limit() {
        let (mut profile, sim, events) = profile();
        profile
            .connect(Arc::new(events.clone()), SECONDARY_ADDR)
            .unwrap();

        for _ in 0..3 {
            assert_eq!(profile.state(), ConnectionState::ConnectingSdpSearch);
            profile
                .handle_event(ConnectionEvent::SearchComplete(SearchResult::Failed))
                .unwrap();
        }

        let searches = sim
            .journal()
            .entries()
            .iter()
            .filter(|entry| entry.starts_with("search:"))
            .count();
        assert_eq!(searches, 3);
        assert_eq!(profile.state(), ConnectionState::Disconnected);
        assert!(!profile.is_primary());
        assert_eq!(
            events.last(),
            Some(ProfileEvent::ConnectCfm {
                status: HandoverStatus::PeerConnectFailed
            })
        );
    }

    #[test]
    fn missing_service_is_not_retried() {
        let (mut profile, sim, events) = profile();
        profile
            .connect(Arc::new(events.clone()), SECONDARY_ADDR)
            .unwrap();
        profile
            .handle_event(ConnectionEvent::SearchComplete(SearchResult::NoResponseData))
            .unwrap();

        assert_eq!(profile.state(), ConnectionState::Disconnected);
        let searches = sim
            .journal()
            .entries()
            .iter()
            .filter(|entry| entry.starts_with("search:"))
            .count();
        assert_eq!(searches, 1);
    }

    #[test]
    fn connect_during_search_is_replayed_after_failure() {
        let (mut profile, sim, events) = profile();
        let second = EventLog::new();
        profile
            .connect(Arc::new(events.clone()), SECONDARY_ADDR)
            .unwrap();
        profile
            .connect(Arc::new(second.clone()), SECONDARY_ADDR)
            .unwrap();
        profile
            .handle_event(ConnectionEvent::SearchComplete(SearchResult::MalformedRecord))
            .unwrap();

        assert_eq!(
            events.last(),
            Some(ProfileEvent::ConnectCfm {
                status: HandoverStatus::PeerConnectFailed
            })
        );
        assert_eq!(profile.state(), ConnectionState::ConnectingSdpSearch);
        assert_eq!(
            sim.journal()
                .entries()
                .iter()
                .filter(|entry| entry.starts_with("search:"))
                .count(),
            2
        );
        assert!(second.events().is_empty());
    }

    #[test]
    fn disconnect_during_search_terminates_it() {
        let (mut profile, sim, events) = profile();
        profile
            .connect(Arc::new(events.clone()), SECONDARY_ADDR)
            .unwrap();
        let requester = EventLog::new();

        profile.disconnect(Arc::new(requester.clone())).unwrap();

        assert!(sim.journal().contains("terminate_search"));
        assert_eq!(profile.state(), ConnectionState::Disconnected);
        assert_eq!(
            requester.events(),
            vec![ProfileEvent::DisconnectCfm {
                status: HandoverStatus::Success
            }]
        );
    }

    #[test]
    fn disconnect_mid_connect_cancels_and_closes_late_channel() {
        let (mut profile, sim, events) = profile();
        profile
            .connect(Arc::new(events.clone()), SECONDARY_ADDR)
            .unwrap();
        profile
            .handle_event(ConnectionEvent::SearchComplete(SearchResult::Found {
                remote_psm: SIM_PSM,
            }))
            .unwrap();
        let requester = EventLog::new();

        profile.disconnect(Arc::new(requester.clone())).unwrap();
        assert_eq!(
            events.last(),
            Some(ProfileEvent::ConnectCfm {
                status: HandoverStatus::PeerConnectCancelled
            })
        );
        assert_eq!(profile.state(), ConnectionState::Disconnecting);

        profile
            .handle_event(ConnectionEvent::ConnectCfm {
                status: ConnectStatus::Success,
                channel: Some(channel(9)),
            })
            .unwrap();
        assert!(sim.journal().contains("disconnect_request:9"));

        profile
            .handle_event(ConnectionEvent::DisconnectCfm { link: LinkId(9) })
            .unwrap();
        assert_eq!(profile.state(), ConnectionState::Disconnected);
        assert_eq!(
            requester.events(),
            vec![ProfileEvent::DisconnectCfm {
                status: HandoverStatus::Success
            }]
        );
    }

    #[test]
    fn events_other_than_teardown_are_dropped_while_disconnecting() {
        let (mut profile, _sim, events) = connected();
        profile.disconnect(Arc::new(events.clone())).unwrap();

        profile
            .handle_event(ConnectionEvent::SearchComplete(SearchResult::Failed))
            .unwrap();
        profile.handle_event(ConnectionEvent::MoreData).unwrap();

        assert_eq!(profile.state(), ConnectionState::Disconnecting);
    }

    #[test]
    fn inbound_connect_from_unknown_device_is_rejected() {
        let (mut profile, sim, _events) = profile();
        sim.update(|state| state.paired = false);

        profile
            .handle_event(ConnectionEvent::ConnectInd {
                peer: SECONDARY_ADDR,
                psm: SIM_PSM,
                connection_id: 3,
                identifier: 4,
            })
            .unwrap();

        assert_eq!(profile.state(), ConnectionState::Disconnected);
        assert!(sim.journal().contains("connect_response:false"));
    }

    #[test]
    fn inbound_connect_on_wrong_psm_is_a_usage_fault() {
        let (mut profile, _sim, _events) = profile();
        let err = profile
            .handle_event(ConnectionEvent::ConnectInd {
                peer: SECONDARY_ADDR,
                psm: 0x0003,
                connection_id: 3,
                identifier: 4,
            })
            .unwrap_err();
        assert!(matches!(err, ProtocolFault::UsageFault(_)));
    }

    #[test]
    fn link_loss_is_reported_and_role_cleared() {
        let (mut profile, sim, events) = connected();

        profile
            .handle_event(ConnectionEvent::DisconnectInd {
                link: LinkId(7),
                link_loss: true,
                identifier: 2,
            })
            .unwrap();

        assert!(sim.journal().contains("disconnect_response:7"));
        assert_eq!(profile.state(), ConnectionState::Disconnected);
        assert!(!profile.is_primary());
        assert!(profile.link_loss());
        assert_eq!(profile.peer_addr(), None);
        assert_eq!(
            events.last(),
            Some(ProfileEvent::DisconnectionInd { link_loss: true })
        );
    }

    #[test]
    fn disconnect_indication_for_unknown_link_is_a_usage_fault() {
        let (mut profile, _sim, _events) = connected();
        let err = profile
            .handle_event(ConnectionEvent::DisconnectInd {
                link: LinkId(99),
                link_loss: false,
                identifier: 2,
            })
            .unwrap_err();
        assert!(matches!(err, ProtocolFault::UsageFault(_)));
    }

    #[test]
    fn disconnect_confirm_while_connected_is_a_usage_fault() {
        let (mut profile, _sim, _events) = connected();
        let err = profile
            .handle_event(ConnectionEvent::DisconnectCfm { link: LinkId(7) })
            .unwrap_err();
        assert!(matches!(err, ProtocolFault::UsageFault(_)));
    }

    #[test]
    fn connect_while_connected_confirms_again() {
        let (mut profile, _sim, _events) = connected();
        let again = EventLog::new();
        profile
            .connect(Arc::new(again.clone()), SECONDARY_ADDR)
            .unwrap();
        assert_eq!(
            again.events(),
            vec![ProfileEvent::ConnectCfm {
                status: HandoverStatus::Success
            }]
        );
    }
}
