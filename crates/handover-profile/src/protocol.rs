//! Marshal sub-state and the control-message plumbing shared by both roles.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use handover_frame::{opcode_name, send_message, wait_for_packet, FrameError, ProtocolMessage};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{HandoverStatus, ProtocolFault, Result};
use crate::profile::HandoverProfile;

/// Where the session is in moving client and baseband state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarshalState {
    #[default]
    Idle,
    P1Marshalling,
    P0Marshalling,
}

impl fmt::Display for MarshalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MarshalState::Idle => "idle",
            MarshalState::P1Marshalling => "p1_marshalling",
            MarshalState::P0Marshalling => "p0_marshalling",
        })
    }
}

/// Why a handover step stopped early.
#[derive(Debug)]
pub(crate) enum Interrupt {
    /// Recoverable, reported to the caller as a status.
    Status(HandoverStatus),
    /// Unrecoverable.
    Fault(ProtocolFault),
}

impl From<HandoverStatus> for Interrupt {
    fn from(status: HandoverStatus) -> Self {
        Interrupt::Status(status)
    }
}

impl From<ProtocolFault> for Interrupt {
    fn from(fault: ProtocolFault) -> Self {
        Interrupt::Fault(fault)
    }
}

pub(crate) type Step<T = ()> = std::result::Result<T, Interrupt>;

/// Status reported when a write to the channel fails.
pub(crate) fn send_status(err: &FrameError) -> HandoverStatus {
    match err {
        FrameError::ClaimTimeout { .. } => HandoverStatus::Timeout,
        _ => HandoverStatus::Failure,
    }
}

impl HandoverProfile {
    pub(crate) fn set_marshal_state(&mut self, next: MarshalState) {
        if self.marshal_state != next {
            debug!(from = %self.marshal_state, to = %next, "marshal state");
            self.marshal_state = next;
        }
    }

    /// Send one control message over the signalling channel.
    pub(crate) fn send_control(&mut self, msg: &ProtocolMessage, timeout: Duration) -> Step {
        let channel = self
            .channel
            .as_mut()
            .ok_or_else(|| ProtocolFault::usage("no handover channel"))?;
        send_message(&mut channel.sink, msg, timeout).map_err(|err| {
            warn!(opcode = opcode_name(msg.opcode()), %err, "send failed");
            Interrupt::Status(send_status(&err))
        })
    }

    /// Tell the peer to unwind. Best effort.
    pub(crate) fn send_cancel_ind(&mut self) {
        let timeout = self.config.protocol_message_timeout;
        if self
            .send_control(&ProtocolMessage::CancelInd, timeout)
            .is_err()
        {
            warn!("CANCEL_IND not delivered");
        }
    }

    /// Wait for the next packet and consume it.
    pub(crate) fn take_packet(&mut self, timeout: Duration) -> Result<Option<Bytes>> {
        let channel = self
            .channel
            .as_mut()
            .ok_or_else(|| ProtocolFault::usage("no handover channel"))?;
        let Some(packet) = wait_for_packet(&channel.source, timeout) else {
            return Ok(None);
        };
        channel.source.drop_bytes(packet.len())?;
        Ok(Some(packet))
    }

    /// Discard whatever the peer sent before this exchange started.
    pub(crate) fn drop_stale_data(&mut self) -> Result<usize> {
        let channel = self
            .channel
            .as_mut()
            .ok_or_else(|| ProtocolFault::usage("no handover channel"))?;
        let dropped = channel.source.drain()?;
        if dropped > 0 {
            debug!(len = dropped, "stale channel data dropped");
        }
        Ok(dropped)
    }

    pub(crate) fn request_performance(&mut self) {
        if !self.performance_held {
            self.platform.performance.request();
            self.performance_held = true;
        }
    }

    pub(crate) fn relinquish_performance(&mut self) {
        if self.performance_held {
            self.platform.performance.relinquish();
            self.performance_held = false;
        }
    }

    /// React to `CANCEL_IND` from the primary.
    pub(crate) fn handle_cancel_ind(&mut self) -> Result<()> {
        if self.is_primary {
            debug!("CANCEL_IND ignored on the primary");
            return Ok(());
        }
        match self.marshal_state {
            MarshalState::Idle => debug!("CANCEL_IND while idle"),
            MarshalState::P1Marshalling => {
                warn!("handover cancelled by the primary");
                self.clients.abort_all();
                self.p1_complete = false;
                self.set_marshal_state(MarshalState::Idle);
            }
            MarshalState::P0Marshalling => return Err(ProtocolFault::CancelAfterP0),
        }
        Ok(())
    }

    /// Re-read the peer address after the roles swapped.
    pub(crate) fn refresh_peer_addr(&mut self) {
        if let Some(peer) = self.platform.mirror.peer_addr() {
            self.peer_addr = Some(peer);
        }
    }
}
