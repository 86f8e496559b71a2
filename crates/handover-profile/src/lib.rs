//! Primary/secondary role handover for true-wireless earbuds.
//!
//! A [`HandoverProfile`] runs on each earbud. It keeps the signalling channel
//! to the other earbud up, and moves the primary role across it:
//!
//! - the primary calls [`HandoverProfile::handover`], which blocks while the
//!   registered [`HandoverClient`]s are vetoed, marshalled and committed
//! - the secondary feeds channel-readable events to
//!   [`HandoverProfile::handle_event`] and takes the role over once all
//!   client and baseband state has arrived
//!
//! Recoverable outcomes are [`HandoverStatus`] values. A [`ProtocolFault`]
//! means the two earbuds can no longer agree on their roles and must be
//! escalated by the caller.
//!
//! Radio, power and mirroring primitives are injected through the traits in
//! [`platform`]; [`sim`] provides an in-memory implementation of all of them.

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod platform;
mod primary;
pub mod profile;
pub mod protocol;
mod secondary;
pub mod sim;

pub use client::{ClientRegistry, HandoverClient, UnmarshalProgress, MAX_CLIENTS};
pub use config::{ConfigError, HandoverConfig};
pub use connection::{
    Channel, ConnectStatus, ConnectionEvent, ConnectionService, ConnectionState, LinkId,
    SearchResult,
};
pub use error::{HandoverStatus, ProtocolFault, Result};
pub use event::{EventListener, EventLog, ListenerId, ListenerRef, ProfileEvent};
pub use platform::{
    AclControl, AclHandle, LinkMode, LinkPower, MirrorState, Performance, Platform, PrepareState,
};
pub use profile::HandoverProfile;
pub use protocol::MarshalState;
