use std::fmt;

use handover_frame::BdAddr;
use handover_transport::LinkSink;
use tracing::{debug, info};

use crate::client::{ClientRegistry, HandoverClient};
use crate::config::HandoverConfig;
use crate::connection::{Channel, ConnectionService, ConnectionState};
use crate::error::{HandoverStatus, ProtocolFault, Result};
use crate::event::{ListenerId, ListenerRef, Listeners, ProfileEvent};
use crate::platform::{AclHandle, Platform};
use crate::protocol::MarshalState;

/// The handover session of one earbud.
///
/// Owns the connection to the peer, the marshal sub-state and the client
/// table. Every operation takes `&mut self`, so at most one handover can be
/// in flight.
pub struct HandoverProfile {
    pub(crate) config: HandoverConfig,
    pub(crate) state: ConnectionState,
    pub(crate) marshal_state: MarshalState,
    pub(crate) is_primary: bool,
    pub(crate) session_id: u8,
    pub(crate) peer_addr: Option<BdAddr>,
    pub(crate) handset_addr: Option<BdAddr>,
    pub(crate) local_psm: Option<u16>,
    pub(crate) remote_psm: Option<u16>,
    pub(crate) channel: Option<Channel>,
    pub(crate) marshal_sink: Option<Box<dyn LinkSink>>,
    pub(crate) acl_handle: Option<AclHandle>,
    pub(crate) clients: ClientRegistry,
    pub(crate) clients_registered: bool,
    pub(crate) listeners: Listeners,
    pub(crate) connect_requester: Option<ListenerRef>,
    pub(crate) disconnect_requester: Option<ListenerRef>,
    pub(crate) queued_connect: Option<(BdAddr, ListenerRef)>,
    pub(crate) sdp_search_attempts: u8,
    pub(crate) link_loss: bool,
    pub(crate) p1_complete: bool,
    pub(crate) performance_held: bool,
    pub(crate) service: Box<dyn ConnectionService>,
    pub(crate) platform: Platform,
}

impl HandoverProfile {
    /// Create the session. Nothing is registered until [`init`](Self::init).
    pub fn new(
        config: HandoverConfig,
        service: Box<dyn ConnectionService>,
        platform: Platform,
    ) -> Self {
        Self {
            config,
            state: ConnectionState::None,
            marshal_state: MarshalState::Idle,
            is_primary: false,
            session_id: 0,
            peer_addr: None,
            handset_addr: None,
            local_psm: None,
            remote_psm: None,
            channel: None,
            marshal_sink: None,
            acl_handle: None,
            clients: ClientRegistry::default(),
            clients_registered: false,
            listeners: Listeners::default(),
            connect_requester: None,
            disconnect_requester: None,
            queued_connect: None,
            sdp_search_attempts: 0,
            link_loss: false,
            p1_complete: false,
            performance_held: false,
            service,
            platform,
        }
    }

    /// Start service registration. `InitCfm` is sent to listeners once the
    /// service record is registered.
    pub fn init(&mut self) -> Result<()> {
        if self.state != ConnectionState::None {
            return Err(ProtocolFault::usage(format!(
                "init called in state {}",
                self.state
            )));
        }
        self.config
            .validate()
            .map_err(|err| ProtocolFault::usage(err.to_string()))?;
        self.set_state(ConnectionState::Initialising);
        Ok(())
    }

    /// Subscribe to connection and handover notifications.
    pub fn client_register(&mut self, listener: ListenerRef) -> ListenerId {
        self.listeners.register(listener)
    }

    pub fn client_unregister(&mut self, id: ListenerId) -> bool {
        self.listeners.unregister(id)
    }

    /// Install the handover clients.
    ///
    /// Allowed once, after [`init`](Self::init) and before any connect. The
    /// order of `clients` fixes their wire ids.
    pub fn register_handover_clients(
        &mut self,
        clients: Vec<Box<dyn HandoverClient>>,
    ) -> Result<()> {
        if self.clients_registered {
            return Err(ProtocolFault::usage("handover clients already registered"));
        }
        if !matches!(
            self.state,
            ConnectionState::Initialising | ConnectionState::Disconnected
        ) {
            return Err(ProtocolFault::usage(format!(
                "handover clients registered in state {}",
                self.state
            )));
        }
        self.clients = ClientRegistry::new(clients)?;
        self.clients_registered = true;
        info!(count = self.clients.len(), "handover clients installed");
        Ok(())
    }

    pub fn config(&self) -> &HandoverConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn marshal_state(&self) -> MarshalState {
        self.marshal_state
    }

    pub fn is_primary(&self) -> bool {
        self.is_primary
    }

    pub fn session_id(&self) -> u8 {
        self.session_id
    }

    pub fn peer_addr(&self) -> Option<BdAddr> {
        self.peer_addr
    }

    /// Handset named by the last handover this device took part in.
    pub fn handset_addr(&self) -> Option<BdAddr> {
        self.handset_addr
    }

    /// True if the last disconnection was caused by link loss.
    pub fn link_loss(&self) -> bool {
        self.link_loss
    }

    pub(crate) fn notify(&self, event: ProfileEvent) {
        debug!(?event, "profile event");
        self.listeners.notify(&event);
    }

    pub(crate) fn send_connect_cfm(&mut self, status: HandoverStatus) {
        match self.connect_requester.take() {
            Some(requester) => requester.on_event(&ProfileEvent::ConnectCfm { status }),
            None => debug!(%status, "connect confirmation without a requester"),
        }
    }

    pub(crate) fn send_disconnect_cfm(&mut self, status: HandoverStatus) {
        match self.disconnect_requester.take() {
            Some(requester) => requester.on_event(&ProfileEvent::DisconnectCfm { status }),
            None => debug!(%status, "disconnect confirmation without a requester"),
        }
    }
}

impl fmt::Debug for HandoverProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandoverProfile")
            .field("state", &self.state)
            .field("marshal_state", &self.marshal_state)
            .field("is_primary", &self.is_primary)
            .field("session_id", &self.session_id)
            .field("peer_addr", &self.peer_addr)
            .field("clients", &self.clients)
            .finish_non_exhaustive()
    }
}
