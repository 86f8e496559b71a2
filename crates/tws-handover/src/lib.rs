//! Primary/secondary role handover for true-wireless earbuds.
//!
//! Two earbuds share one handset. The one holding the handset links is the
//! primary; this crate moves that role to the other earbud over a dedicated
//! signalling channel without dropping the links.
//!
//! # Crate Structure
//!
//! - [`transport`]: packet-preserving, flow-controlled link endpoints and an
//!   in-memory loopback pair
//! - [`frame`]: the wire codec and the MTU packetizer for marshal data
//! - [`profile`]: connection lifecycle, client registry and the primary and
//!   secondary handover state machines

/// Re-export transport types.
pub mod transport {
    pub use handover_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use handover_frame::*;
}

/// Re-export profile types.
pub mod profile {
    pub use handover_profile::*;
}
