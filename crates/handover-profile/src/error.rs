use std::fmt;

use handover_frame::FrameError;
use handover_transport::TransportError;
use serde::Serialize;

use crate::platform::AclHandle;

/// Recoverable outcome of a profile operation.
///
/// Anything that leaves both devices in a consistent pre-handover state is
/// reported as a status. Unrecoverable conditions are [`ProtocolFault`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoverStatus {
    Success,
    PeerConnectFailed,
    PeerConnectCancelled,
    PeerDisconnected,
    PeerLinkLoss,
    Vetoed,
    Timeout,
    Failure,
}

impl HandoverStatus {
    pub fn is_success(self) -> bool {
        self == HandoverStatus::Success
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HandoverStatus::Success => "success",
            HandoverStatus::PeerConnectFailed => "peer_connect_failed",
            HandoverStatus::PeerConnectCancelled => "peer_connect_cancelled",
            HandoverStatus::PeerDisconnected => "peer_disconnected",
            HandoverStatus::PeerLinkLoss => "peer_link_loss",
            HandoverStatus::Vetoed => "vetoed",
            HandoverStatus::Timeout => "timeout",
            HandoverStatus::Failure => "failure",
        }
    }
}

impl fmt::Display for HandoverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecoverable protocol conditions.
///
/// A fault means the two devices can no longer be trusted to agree on their
/// roles. The embedding application is expected to escalate it (typically by
/// restarting), never to retry.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolFault {
    /// Marshal data that does not follow the wire format.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A client consumed a different number of bytes than its entry declared.
    #[error("client {client} consumed {consumed} of {declared} declared bytes")]
    ClientConsumedMismatch {
        client: u8,
        declared: usize,
        consumed: usize,
    },

    /// Marshal data addressed to a client id that is not registered.
    #[error("no handover client registered with id {0}")]
    UnknownClient(u8),

    /// The primary cancelled after baseband state was already applied.
    #[error("cancel received after baseband state was applied")]
    CancelAfterP0,

    /// The baseband transfer stalled part way through.
    #[error("timed out waiting for the rest of the baseband state")]
    P0TransferTimeout,

    /// Clients took longer than the P1 unmarshal bound to absorb one packet.
    #[error("client {client} still unmarshalling after the P1 deadline")]
    P1UnmarshalTimeout { client: u8 },

    /// The baseband marshal sink could not be obtained or filled.
    #[error("baseband marshal sink unavailable")]
    MarshalSinkUnavailable,

    /// The link layer refused to commit the handover.
    #[error("link-layer handover commit failed (acl handle 0x{acl_handle:04x})")]
    CommitFailed { acl_handle: AclHandle },

    /// An API was used in the wrong state or with invalid arguments.
    #[error("usage fault: {0}")]
    UsageFault(String),

    /// An opcode that has no meaning on this side of the protocol.
    #[error("unexpected opcode 0x{0:02x}")]
    UnexpectedOpcode(u8),

    /// Service registration with the connection manager failed.
    #[error("registration failed: {0}")]
    Registration(String),

    /// Wire-level error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Link-level error.
    #[error("link error: {0}")]
    Link(#[from] TransportError),
}

impl ProtocolFault {
    pub(crate) fn usage(message: impl Into<String>) -> Self {
        ProtocolFault::UsageFault(message.into())
    }
}

pub type Result<T> = std::result::Result<T, ProtocolFault>;
