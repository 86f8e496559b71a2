//! Collaborators the profile drives but does not own.
//!
//! Radio control, link power management, the system performance governor
//! and the mirroring subsystem are all platform services. They are injected
//! as trait objects so the orchestrators run unchanged against real hardware
//! bindings or test doubles.

use std::fmt;
use std::time::Duration;

use handover_frame::BdAddr;
use handover_transport::{LinkSink, LinkSource};

/// Link-layer handle of the ACL being handed over.
pub type AclHandle = u16;

/// Progress of a link-layer handover prepare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareState {
    InProgress,
    Complete,
    Failed,
}

/// Radio power mode of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    Active,
    Sniff,
}

/// Link-layer primitives for the handset ACL.
pub trait AclControl: Send {
    /// Stop or resume accepting inbound data at a packet boundary.
    fn receive_enable(&mut self, handset: &BdAddr, enable: bool, timeout: Duration) -> bool;

    /// Wait until data already received from the handset has been processed.
    fn received_data_processed(&mut self, handset: &BdAddr, timeout: Duration) -> bool;

    /// True while outbound data for `addr` is still queued.
    fn transmit_pending(&self, addr: &BdAddr) -> bool;

    /// Ask the controller to prepare the handover. `None` means the
    /// controller is not in a state where handover can start.
    fn handover_prepare(&mut self, handset: &BdAddr, peer: &BdAddr) -> Option<AclHandle>;

    fn handover_prepared(&mut self, handle: AclHandle) -> PrepareState;

    fn handover_commit(&mut self, handle: AclHandle) -> bool;

    fn handover_cancel(&mut self, handle: AclHandle) -> bool;

    /// Byte stream holding the controller's marshalled baseband state.
    fn marshal_source(&mut self, handset: &BdAddr) -> Option<Box<dyn LinkSource>>;

    /// Byte stream accepting the peer's baseband state.
    fn marshal_sink(&mut self, handset: &BdAddr) -> Option<Box<dyn LinkSink>>;
}

/// Power mode control for the handset link and the earbud-to-earbud link.
pub trait LinkPower: Send {
    /// Current mode of the handset link, `None` when it does not exist.
    fn power_mode(&self, handset: &BdAddr) -> Option<LinkMode>;

    fn sniff_interval(&self, handset: &BdAddr) -> Duration;

    /// Request a peer link mode without waiting for it.
    fn request_peer_link_mode(&mut self, mode: LinkMode);

    /// Request a peer link mode and wait for the controller to accept it.
    fn request_peer_link_mode_blocking(&mut self, mode: LinkMode, timeout: Duration) -> bool;

    /// Wait for the peer link to reach `mode`.
    fn wait_for_peer_link_mode(&mut self, mode: LinkMode, timeout: Duration) -> bool;
}

/// System performance governor.
pub trait Performance: Send {
    fn request(&mut self);

    fn relinquish(&mut self);
}

/// State shared with the mirroring subsystem.
pub trait MirrorState: Send {
    fn last_tx_seq(&self) -> u8;

    fn last_rx_seq(&self) -> u8;

    fn mirror_state(&self) -> u16;

    fn is_a2dp_active(&self) -> bool;

    /// The mirroring or audio subsystem refuses a handover right now.
    fn veto(&self) -> bool;

    /// A profile instance for `handset` already exists locally.
    fn has_handset_instance(&self, handset: &BdAddr) -> bool;

    /// Handle of the mirrored ACL on the secondary.
    fn mirror_acl_handle(&self) -> Option<AclHandle>;

    /// Address of the other earbud as currently known to the mirror.
    fn peer_addr(&self) -> Option<BdAddr>;

    /// Tell the mirror that the role changed.
    fn commit_role(&mut self, handset: &BdAddr, is_primary: bool);
}

/// Every platform collaborator the orchestrators need.
pub struct Platform {
    pub acl: Box<dyn AclControl>,
    pub power: Box<dyn LinkPower>,
    pub performance: Box<dyn Performance>,
    pub mirror: Box<dyn MirrorState>,
}

impl fmt::Debug for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Platform").finish_non_exhaustive()
    }
}
