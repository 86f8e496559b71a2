//! Flow-controlled, packet-preserving link abstraction.
//!
//! The handover signalling channel between two earbuds is modelled as a pair
//! of independent endpoints:
//! - a [`LinkSink`] where callers claim space and then flush whole packets
//! - a [`LinkSource`] where callers wait for a packet boundary and then drop
//!   the bytes they consumed
//!
//! This is the lowest layer of the handover stack. The wire engine and the
//! profile only ever talk to these traits. The [`loopback`] module provides
//! an in-memory implementation, and [`buffer`] provides plain byte-stream
//! endpoints for the baseband state blob.

pub mod buffer;
pub mod error;
pub mod loopback;
pub mod traits;

pub use buffer::{BufferSink, BufferSource};
pub use error::{Result, TransportError};
pub use loopback::{
    loopback_pair, LoopbackConfig, LoopbackHandle, LoopbackLink, LoopbackSink, LoopbackSource,
    DEFAULT_MTU,
};
pub use traits::{LinkSink, LinkSource};
