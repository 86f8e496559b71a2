use std::time::Duration;

use handover_transport::TransportError;

/// Errors that can occur while encoding, decoding or moving handover packets.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The packet ended before a complete field could be read.
    #[error("truncated packet ({available} bytes available, {needed} needed)")]
    Truncated { needed: usize, available: usize },

    /// The first byte of a packet is not a known opcode.
    #[error("unknown opcode 0x{0:02x}")]
    UnknownOpcode(u8),

    /// A valid message arrived where a different one was required.
    #[error("unexpected opcode 0x{actual:02x} (expected 0x{expected:02x})")]
    UnexpectedOpcode { expected: u8, actual: u8 },

    /// A fixed-size message had the wrong length.
    #[error("invalid {what} length ({actual} bytes, expected {expected})")]
    InvalidLength {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A marshal entry declared more bytes than the packet holds.
    #[error("entry 0x{tag:02x} declares {declared} bytes, {available} available")]
    EntryOverrun {
        tag: u8,
        declared: usize,
        available: usize,
    },

    /// A marshal entry tag is neither a client id, the P0 tag nor the end tag.
    #[error("unknown marshal tag 0x{0:02x}")]
    UnknownTag(u8),

    /// Space on the link did not become available in time.
    #[error("timed out after {timeout:?} claiming {size} bytes")]
    ClaimTimeout { size: usize, timeout: Duration },

    /// The underlying link failed.
    #[error("link error: {0}")]
    Link(#[from] TransportError),
}

pub type Result<T> = std::result::Result<T, FrameError>;
