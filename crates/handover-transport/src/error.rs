/// Errors that can occur on a handover link endpoint.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The link has been torn down.
    #[error("link closed")]
    Closed,

    /// A packet larger than the link MTU was flushed.
    #[error("packet too large ({size} bytes, mtu {mtu})")]
    PacketTooLarge { size: usize, mtu: usize },

    /// A flush asked for more space than the link currently offers.
    #[error("insufficient space ({requested} bytes requested, {available} available)")]
    InsufficientSpace { requested: usize, available: usize },

    /// A drop asked for more bytes than are buffered.
    #[error("nothing to drop ({requested} bytes requested, {available} buffered)")]
    NothingToDrop { requested: usize, available: usize },
}

pub type Result<T> = std::result::Result<T, TransportError>;
