//! Primary side: hands the role over to the peer in one blocking call.

use std::time::Instant;

use handover_frame::{
    decode_message, hex_dump, opcode_name, poll_until, BdAddr, FrameError, MarshalWriter,
    ProtocolMessage, StartRequest, StartStatus,
};
use tracing::{debug, error, info, warn};

use crate::connection::ConnectionState;
use crate::error::{HandoverStatus, ProtocolFault, Result};
use crate::event::ProfileEvent;
use crate::platform::{LinkMode, PrepareState};
use crate::profile::HandoverProfile;
use crate::protocol::{Interrupt, MarshalState, Step};

/// How a marshal write failure is reported.
fn marshal_interrupt(err: FrameError) -> Interrupt {
    match err {
        FrameError::ClaimTimeout { .. } => Interrupt::Status(HandoverStatus::Timeout),
        FrameError::EntryOverrun { .. } => Interrupt::Fault(err.into()),
        err => {
            warn!(%err, "marshal write failed");
            Interrupt::Status(HandoverStatus::Failure)
        }
    }
}

impl HandoverProfile {
    /// Hand the primary role for `handset` over to the peer.
    ///
    /// Blocks until the peer has taken over or the attempt was unwound. On
    /// `Ok(Success)` this device is secondary. Any other `Ok` status leaves
    /// both devices in their pre-handover roles. `Err` is unrecoverable.
    pub fn handover(&mut self, handset: &BdAddr) -> Result<HandoverStatus> {
        if handset.is_zero() {
            return Err(ProtocolFault::usage("handover requires a handset address"));
        }
        if self.state != ConnectionState::Connected {
            warn!(state = %self.state, "handover without a peer connection");
            return Ok(HandoverStatus::PeerDisconnected);
        }
        if !self.is_primary {
            return Err(ProtocolFault::usage("handover requested on the secondary"));
        }
        if self.marshal_state != MarshalState::Idle {
            return Err(ProtocolFault::usage(format!(
                "handover requested in marshal state {}",
                self.marshal_state
            )));
        }

        self.handset_addr = Some(*handset);
        let started = Instant::now();
        match self.run_primary(handset) {
            Ok(()) => {
                info!(
                    session_id = self.session_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "handover complete, now secondary"
                );
                Ok(HandoverStatus::Success)
            }
            Err(Interrupt::Status(status)) => {
                warn!(session_id = self.session_id, %status, "handover abandoned");
                Ok(status)
            }
            Err(Interrupt::Fault(fault)) => {
                error!(session_id = self.session_id, %fault, "handover fault");
                Err(fault)
            }
        }
    }

    fn run_primary(&mut self, handset: &BdAddr) -> Step {
        self.drop_stale_data()?;

        if self.clients.veto() {
            return Err(HandoverStatus::Vetoed.into());
        }

        self.session_id = self.session_id.wrapping_add(1);
        self.send_start_req(handset)?;
        self.await_start_cfm()?;

        self.set_marshal_state(MarshalState::P1Marshalling);
        if let Err(err) = self
            .marshal_p1(handset)
            .and_then(|()| self.await_p1_cfm())
        {
            return Err(self.unwind_p1(err));
        }
        if self.clients.veto() {
            return Err(self.unwind_p1(HandoverStatus::Vetoed.into()));
        }

        self.request_performance();
        if let Err(err) = self.prepare_for_marshal(handset) {
            return Err(self.unwind_prepared(handset, err, false));
        }
        if self.clients.veto() {
            return Err(self.unwind_prepared(handset, HandoverStatus::Vetoed.into(), true));
        }

        self.set_marshal_state(MarshalState::P0Marshalling);
        if let Err(err) = self.marshal_p0(handset) {
            return Err(self.unwind_prepared(handset, err, true));
        }

        self.wait_peer_transmit();
        self.commit_primary()
    }

    fn send_start_req(&mut self, handset: &BdAddr) -> Step {
        let mirror = &self.platform.mirror;
        let req = StartRequest {
            session_id: self.session_id,
            last_tx_seq: mirror.last_tx_seq(),
            last_rx_seq: mirror.last_rx_seq(),
            mirror_state: mirror.mirror_state(),
            num_handsets: self.config.num_handsets,
            handset_addr: *handset,
        };
        debug!(session_id = req.session_id, %handset, "START_REQ");
        let timeout = self.config.protocol_message_timeout;
        self.send_control(&ProtocolMessage::StartReq(req), timeout)
    }

    fn await_start_cfm(&mut self) -> Step {
        let deadline = Instant::now() + self.config.protocol_message_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let Some(packet) = self.take_packet(remaining)? else {
                warn!(session_id = self.session_id, "no START_CFM from peer");
                return Err(HandoverStatus::Timeout.into());
            };

            match decode_message(&packet) {
                Ok(ProtocolMessage::StartCfm { session_id, .. }) if session_id != self.session_id => {
                    debug!(session_id, expected = self.session_id, "stale START_CFM dropped");
                }
                Ok(ProtocolMessage::StartCfm {
                    status: StartStatus::Success,
                    ..
                }) => return Ok(()),
                Ok(ProtocolMessage::StartCfm {
                    status: StartStatus::Vetoed,
                    ..
                }) => {
                    info!(session_id = self.session_id, "peer vetoed the handover");
                    return Err(HandoverStatus::Vetoed.into());
                }
                Ok(other) => {
                    warn!(opcode = opcode_name(other.opcode()), "expected START_CFM");
                    return Err(HandoverStatus::Failure.into());
                }
                Err(err) => {
                    warn!(%err, packet = %hex_dump(&packet), "undecodable reply to START_REQ");
                    return Err(HandoverStatus::Failure.into());
                }
            }
        }
    }

    fn await_p1_cfm(&mut self) -> Step {
        let timeout = self.config.protocol_message_timeout;
        let Some(packet) = self.take_packet(timeout)? else {
            warn!(session_id = self.session_id, "no UNMARSHAL_P1_CFM from peer");
            return Err(HandoverStatus::Timeout.into());
        };
        match decode_message(&packet) {
            Ok(ProtocolMessage::UnmarshalP1Cfm) => Ok(()),
            Ok(other) => {
                warn!(opcode = opcode_name(other.opcode()), "expected UNMARSHAL_P1_CFM");
                Err(HandoverStatus::Failure.into())
            }
            Err(err) => {
                warn!(%err, packet = %hex_dump(&packet), "undecodable reply to P1 data");
                Err(HandoverStatus::Failure.into())
            }
        }
    }

    /// Stream every client's state to the peer.
    fn marshal_p1(&mut self, handset: &BdAddr) -> Step {
        let mtu = self.config.mtu;
        let timeout = self.config.p1_marshal_timeout;
        let channel = self
            .channel
            .as_mut()
            .ok_or_else(|| ProtocolFault::usage("no handover channel"))?;
        let clients = &mut self.clients;
        let mut writer = MarshalWriter::new(&mut channel.sink, mtu, timeout);

        let mut id = 0;
        while let Some(client) = clients.get_mut(id) {
            if !writer.in_packet() {
                writer.begin_packet().map_err(marshal_interrupt)?;
            }
            let fresh = writer.is_fresh();
            let progress = writer
                .write_client(id as u8, |buf| client.marshal(handset, buf))
                .map_err(marshal_interrupt)?;

            if progress.complete {
                id += 1;
            } else if fresh && progress.written == 0 {
                warn!(client = id, name = client.name(), "client wrote nothing into an empty packet");
                return Err(HandoverStatus::Failure.into());
            } else {
                writer.flush_packet().map_err(marshal_interrupt)?;
            }
        }

        let stats = writer.finish().map_err(marshal_interrupt)?;
        debug!(packets = stats.packets, len = stats.bytes, "P1 state sent");
        Ok(())
    }

    /// Stop traffic on the handset link and prepare the link-layer handover.
    fn prepare_for_marshal(&mut self, handset: &BdAddr) -> Step {
        let config = self.config.clone();
        let acl = &mut self.platform.acl;
        let power = &mut self.platform.power;
        self.acl_handle = None;

        if !acl.receive_enable(handset, false, config.acl_receive_enable_timeout) {
            warn!("inbound data could not be stopped");
            return Err(HandoverStatus::Timeout.into());
        }
        if !acl.received_data_processed(handset, config.acl_received_data_processed_timeout) {
            warn!("received data still being processed");
            return Err(HandoverStatus::Timeout.into());
        }
        let drained = poll_until(config.acl_transmit_pending_timeout, || {
            (!acl.transmit_pending(handset)).then_some(())
        });
        if drained.is_none() {
            warn!("handset link still has data to transmit");
            return Err(HandoverStatus::Timeout.into());
        }

        if self.clients.veto() {
            return Err(HandoverStatus::Vetoed.into());
        }

        if self.platform.mirror.is_a2dp_active() {
            power.request_peer_link_mode(LinkMode::Active);
        } else if !power.request_peer_link_mode_blocking(LinkMode::Active, config.exit_sniff_timeout)
        {
            warn!("peer link did not leave sniff");
            return Err(HandoverStatus::Timeout.into());
        }

        let window = match power.power_mode(handset) {
            Some(LinkMode::Sniff) => {
                power.sniff_interval(handset) * config.sniff_interval_multiplier
            }
            Some(LinkMode::Active) => config.acl_handover_prepare_timeout,
            None => {
                warn!("handset link has no power mode");
                return Err(HandoverStatus::Timeout.into());
            }
        };

        let peer = self
            .peer_addr
            .or_else(|| self.platform.mirror.peer_addr())
            .unwrap_or(BdAddr::ZERO);
        let acl = &mut self.platform.acl;
        let deadline = Instant::now() + window;
        let mut prepared = false;
        loop {
            self.acl_handle = acl.handover_prepare(handset, &peer);
            if let Some(handle) = self.acl_handle {
                let remaining = deadline.saturating_duration_since(Instant::now());
                let state = poll_until(remaining, || match acl.handover_prepared(handle) {
                    PrepareState::InProgress => None,
                    state => Some(state),
                });
                if state == Some(PrepareState::Complete) {
                    prepared = true;
                    break;
                }
            }
            if Instant::now() >= deadline {
                break;
            }
        }

        let Some(handle) = self.acl_handle else {
            info!("link layer refused to prepare the handover");
            return Err(HandoverStatus::Vetoed.into());
        };
        if !prepared {
            warn!(acl_handle = handle, window_ms = window.as_millis() as u64, "handover prepare timed out");
            return Err(HandoverStatus::Timeout.into());
        }

        let power = &mut self.platform.power;
        if !power.wait_for_peer_link_mode(LinkMode::Active, config.exit_sniff_timeout) {
            warn!("peer link not active after prepare");
            return Err(HandoverStatus::Timeout.into());
        }
        debug!(acl_handle = handle, "handover prepared");
        Ok(())
    }

    /// Stream the controller's baseband state to the peer.
    fn marshal_p0(&mut self, handset: &BdAddr) -> Step {
        let Some(mut source) = self.platform.acl.marshal_source(handset) else {
            warn!("no baseband marshal source");
            return Err(HandoverStatus::Failure.into());
        };
        let mtu = self.config.mtu;
        let timeout = self.config.p0_marshal_timeout;
        let channel = self
            .channel
            .as_mut()
            .ok_or_else(|| ProtocolFault::usage("no handover channel"))?;
        let mut writer = MarshalWriter::new(&mut channel.sink, mtu, timeout);

        let mut total = 0;
        while let Some(chunk) = source.map() {
            if chunk.is_empty() {
                break;
            }
            if !writer.in_packet() {
                writer.begin_packet().map_err(marshal_interrupt)?;
            }
            let fresh = writer.is_fresh();
            let taken = writer.write_p0(&chunk);
            if fresh && taken == 0 {
                warn!(mtu = writer.mtu(), "baseband data does not fit an empty packet");
                return Err(HandoverStatus::Failure.into());
            }
            if taken > 0 {
                source.drop_bytes(taken).map_err(ProtocolFault::from)?;
                total += taken;
            }
            if taken == 0 || writer.remaining() == 0 {
                writer.flush_packet().map_err(marshal_interrupt)?;
            }
        }

        let stats = writer.finish().map_err(marshal_interrupt)?;
        debug!(len = total, packets = stats.packets, "P0 state sent");
        Ok(())
    }

    /// Give the peer link time to deliver everything already queued.
    fn wait_peer_transmit(&mut self) {
        let Some(peer) = self.peer_addr.or_else(|| self.platform.mirror.peer_addr()) else {
            return;
        };
        let acl = &self.platform.acl;
        let timeout = self.config.p0_transmit_pending_timeout;
        if poll_until(timeout, || (!acl.transmit_pending(&peer)).then_some(())).is_none() {
            warn!(%peer, "peer link still transmitting at the supervision timeout");
        }
    }

    fn commit_primary(&mut self) -> Step {
        let Some(handle) = self.acl_handle else {
            return Err(ProtocolFault::usage("commit without a prepared link").into());
        };

        self.clients.commit_all(false);
        if !self.platform.acl.handover_commit(handle) {
            error!(acl_handle = handle, "link-layer commit failed");
            self.send_cancel_ind();
            return Err(ProtocolFault::CommitFailed { acl_handle: handle }.into());
        }

        if !self
            .platform
            .power
            .wait_for_peer_link_mode(LinkMode::Sniff, self.config.reenter_sniff_timeout)
        {
            debug!("peer link not back in sniff yet");
        }

        self.clients.complete_all(false);
        self.set_marshal_state(MarshalState::Idle);
        self.is_primary = false;
        self.relinquish_performance();
        self.refresh_peer_addr();
        self.notify(ProfileEvent::HandoverCompleteInd { is_primary: false });
        Ok(())
    }

    /// Unwind after a failure before the link layer was touched.
    fn unwind_p1(&mut self, err: Interrupt) -> Interrupt {
        if let Interrupt::Fault(_) = err {
            return err;
        }
        self.send_cancel_ind();
        self.clients.abort_all();
        self.set_marshal_state(MarshalState::Idle);
        err
    }

    /// Unwind after the handset link was stopped. `cancel_acl` also cancels
    /// the prepared link-layer handover.
    fn unwind_prepared(&mut self, handset: &BdAddr, err: Interrupt, cancel_acl: bool) -> Interrupt {
        if let Interrupt::Fault(_) = err {
            return err;
        }
        self.send_cancel_ind();
        if cancel_acl {
            if let Some(handle) = self.acl_handle {
                if !self.platform.acl.handover_cancel(handle) {
                    warn!(acl_handle = handle, "link-layer cancel failed");
                }
            }
        }
        self.platform.power.request_peer_link_mode(LinkMode::Sniff);
        if !self.platform.acl.receive_enable(
            handset,
            true,
            self.config.acl_receive_enable_timeout,
        ) {
            warn!("inbound data could not be resumed");
        }
        self.clients.abort_all();
        self.set_marshal_state(MarshalState::Idle);
        self.relinquish_performance();
        err
    }
}
