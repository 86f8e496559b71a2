//! Simulated radio platform.
//!
//! Lets a pair of [`HandoverProfile`]s run a complete handover over a
//! [`loopback_pair`] with no controller underneath. Every platform call is
//! recorded in a [`Journal`] and every platform answer can be changed through
//! [`SimHandle::update`], which makes this the harness for both the
//! integration tests and the `simulate` command.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use handover_frame::{BdAddr, MarshalProgress};
use handover_transport::{
    loopback_pair, BufferSink, BufferSource, LinkSink, LinkSource, LoopbackConfig, LoopbackHandle,
};

use crate::client::{HandoverClient, UnmarshalProgress};
use crate::config::HandoverConfig;
use crate::connection::{
    Channel, ConnectStatus, ConnectionEvent, ConnectionService, LinkId, SearchResult,
};
use crate::error::Result;
use crate::event::EventLog;
use crate::platform::{
    AclControl, AclHandle, LinkMode, LinkPower, MirrorState, Performance, Platform, PrepareState,
};
use crate::profile::HandoverProfile;

/// Address of the earbud that starts out primary.
pub const PRIMARY_ADDR: BdAddr = BdAddr::new([0x00, 0x02, 0x5b, 0x00, 0x00, 0x01]);
/// Address of the earbud that starts out secondary.
pub const SECONDARY_ADDR: BdAddr = BdAddr::new([0x00, 0x02, 0x5b, 0x00, 0x00, 0x02]);
/// Address of the handset whose link is handed over.
pub const HANDSET_ADDR: BdAddr = BdAddr::new([0x40, 0x4e, 0x36, 0x12, 0x34, 0x56]);

/// Protocol service multiplexer both simulated earbuds register.
pub const SIM_PSM: u16 = 0x1001;

/// Append-only list of calls, shareable across threads.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|seen| seen == entry)
    }

    /// Index of the first occurrence of `entry`.
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .position(|seen| seen == entry)
    }

    pub fn clear(&self) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

/// Answers the simulated platform gives.
#[derive(Debug, Clone)]
pub struct SimState {
    pub acl_connected: bool,
    pub paired: bool,
    pub a2dp_active: bool,
    pub mirror_veto: bool,
    pub handset_instance: bool,
    pub last_tx_seq: u8,
    pub last_rx_seq: u8,
    pub mirror_state: u16,
    pub peer_addr: Option<BdAddr>,
    pub mirror_acl_handle: Option<AclHandle>,
    pub power_mode: Option<LinkMode>,
    pub sniff_interval: Duration,
    pub prepare_handle: Option<AclHandle>,
    pub prepare_result: PrepareState,
    pub commit_ok: bool,
    pub receive_enable_ok: bool,
    pub transmit_pending: bool,
    pub receive_enabled: bool,
    pub peer_link_mode: LinkMode,
    pub performance_requests: i32,
    /// Baseband state handed out by the marshal source.
    pub p0_payload: Bytes,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            acl_connected: true,
            paired: true,
            a2dp_active: false,
            mirror_veto: false,
            handset_instance: false,
            last_tx_seq: 0,
            last_rx_seq: 0,
            mirror_state: 0,
            peer_addr: None,
            mirror_acl_handle: None,
            power_mode: Some(LinkMode::Sniff),
            sniff_interval: Duration::from_millis(10),
            prepare_handle: Some(0x0001),
            prepare_result: PrepareState::Complete,
            commit_ok: true,
            receive_enable_ok: true,
            transmit_pending: false,
            receive_enabled: true,
            peer_link_mode: LinkMode::Sniff,
            performance_requests: 0,
            p0_payload: Bytes::new(),
        }
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<SimState>,
    journal: Journal,
    baseband: BufferSink,
}

/// Control handle of one simulated earbud platform.
#[derive(Debug, Clone)]
pub struct SimHandle {
    shared: Arc<Shared>,
}

impl Default for SimHandle {
    fn default() -> Self {
        Self::new(SimState::default())
    }
}

impl SimHandle {
    pub fn new(state: SimState) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                journal: Journal::new(),
                baseband: BufferSink::unbounded(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Change the platform's answers.
    pub fn update(&self, change: impl FnOnce(&mut SimState)) {
        change(&mut self.lock());
    }

    pub fn state(&self) -> SimState {
        self.lock().clone()
    }

    /// Platform calls seen so far, e.g. `receive_enable:false`.
    pub fn journal(&self) -> Journal {
        self.shared.journal.clone()
    }

    /// Baseband bytes written to this device's marshal sink.
    pub fn baseband_received(&self) -> Bytes {
        self.shared.baseband.contents()
    }

    fn record(&self, entry: impl Into<String>) {
        self.shared.journal.push(entry);
    }

    /// Platform collaborators backed by this handle.
    pub fn platform(&self) -> Platform {
        Platform {
            acl: Box::new(self.clone()),
            power: Box::new(self.clone()),
            performance: Box::new(self.clone()),
            mirror: Box::new(self.clone()),
        }
    }

    /// Connection service backed by this handle.
    pub fn service(&self) -> Box<dyn ConnectionService> {
        Box::new(SimService { sim: self.clone() })
    }
}

fn mode_name(mode: LinkMode) -> &'static str {
    match mode {
        LinkMode::Active => "active",
        LinkMode::Sniff => "sniff",
    }
}

impl AclControl for SimHandle {
    fn receive_enable(&mut self, _handset: &BdAddr, enable: bool, _timeout: Duration) -> bool {
        self.record(format!("receive_enable:{enable}"));
        let mut state = self.lock();
        if state.receive_enable_ok {
            state.receive_enabled = enable;
        }
        state.receive_enable_ok
    }

    fn received_data_processed(&mut self, _handset: &BdAddr, _timeout: Duration) -> bool {
        true
    }

    fn transmit_pending(&self, _addr: &BdAddr) -> bool {
        self.lock().transmit_pending
    }

    fn handover_prepare(&mut self, _handset: &BdAddr, _peer: &BdAddr) -> Option<AclHandle> {
        self.record("handover_prepare");
        self.lock().prepare_handle
    }

    fn handover_prepared(&mut self, _handle: AclHandle) -> PrepareState {
        self.lock().prepare_result
    }

    fn handover_commit(&mut self, handle: AclHandle) -> bool {
        self.record(format!("handover_commit:{handle:#06x}"));
        self.lock().commit_ok
    }

    fn handover_cancel(&mut self, handle: AclHandle) -> bool {
        self.record(format!("handover_cancel:{handle:#06x}"));
        true
    }

    fn marshal_source(&mut self, _handset: &BdAddr) -> Option<Box<dyn LinkSource>> {
        Some(Box::new(BufferSource::new(self.lock().p0_payload.clone())))
    }

    fn marshal_sink(&mut self, _handset: &BdAddr) -> Option<Box<dyn LinkSink>> {
        Some(Box::new(self.shared.baseband.clone()))
    }
}

impl LinkPower for SimHandle {
    fn power_mode(&self, _handset: &BdAddr) -> Option<LinkMode> {
        self.lock().power_mode
    }

    fn sniff_interval(&self, _handset: &BdAddr) -> Duration {
        self.lock().sniff_interval
    }

    fn request_peer_link_mode(&mut self, mode: LinkMode) {
        self.record(format!("peer_link_mode:{}", mode_name(mode)));
        self.lock().peer_link_mode = mode;
    }

    fn request_peer_link_mode_blocking(&mut self, mode: LinkMode, _timeout: Duration) -> bool {
        self.request_peer_link_mode(mode);
        true
    }

    fn wait_for_peer_link_mode(&mut self, mode: LinkMode, _timeout: Duration) -> bool {
        self.lock().peer_link_mode == mode
    }
}

impl Performance for SimHandle {
    fn request(&mut self) {
        self.record("performance_request");
        self.lock().performance_requests += 1;
    }

    fn relinquish(&mut self) {
        self.record("performance_relinquish");
        self.lock().performance_requests -= 1;
    }
}

impl MirrorState for SimHandle {
    fn last_tx_seq(&self) -> u8 {
        self.lock().last_tx_seq
    }

    fn last_rx_seq(&self) -> u8 {
        self.lock().last_rx_seq
    }

    fn mirror_state(&self) -> u16 {
        self.lock().mirror_state
    }

    fn is_a2dp_active(&self) -> bool {
        self.lock().a2dp_active
    }

    fn veto(&self) -> bool {
        self.lock().mirror_veto
    }

    fn has_handset_instance(&self, _handset: &BdAddr) -> bool {
        self.lock().handset_instance
    }

    fn mirror_acl_handle(&self) -> Option<AclHandle> {
        self.lock().mirror_acl_handle
    }

    fn peer_addr(&self) -> Option<BdAddr> {
        self.lock().peer_addr
    }

    fn commit_role(&mut self, _handset: &BdAddr, is_primary: bool) {
        self.record(format!("commit_role:{is_primary}"));
    }
}

/// Connection service that records requests and never answers on its own.
#[derive(Debug)]
struct SimService {
    sim: SimHandle,
}

impl ConnectionService for SimService {
    fn register_psm(&mut self) {
        self.sim.record("register_psm");
    }

    fn register_service_record(&mut self, psm: u16) {
        self.sim.record(format!("register_service_record:{psm:#06x}"));
    }

    fn search(&mut self, peer: &BdAddr) {
        self.sim.record(format!("search:{peer}"));
    }

    fn terminate_search(&mut self) {
        self.sim.record("terminate_search");
    }

    fn connect_request(&mut self, peer: &BdAddr, remote_psm: u16) {
        self.sim
            .record(format!("connect_request:{peer}:{remote_psm:#06x}"));
    }

    fn connect_response(&mut self, accept: bool, _connection_id: u16, _identifier: u8) {
        self.sim.record(format!("connect_response:{accept}"));
    }

    fn disconnect_request(&mut self, link: LinkId) {
        self.sim.record(format!("disconnect_request:{}", link.0));
    }

    fn disconnect_response(&mut self, link: LinkId, _identifier: u8) {
        self.sim.record(format!("disconnect_response:{}", link.0));
    }

    fn is_acl_connected(&self, _peer: &BdAddr) -> bool {
        self.sim.lock().acl_connected
    }

    fn is_paired_peer(&self, _addr: &BdAddr) -> bool {
        self.sim.lock().paired
    }
}

/// Client that marshals a fixed payload and records every callback.
///
/// Journal entries look like `name:veto`, `name:marshal:12`,
/// `name:unmarshal:12`, `name:commit:true`, `name:complete:false` and
/// `name:abort`.
#[derive(Debug)]
pub struct ScriptedClient {
    name: String,
    payload: Vec<u8>,
    chunk: usize,
    offset: usize,
    veto_at: Option<usize>,
    vetoes_asked: usize,
    consume_short: bool,
    expects: Option<usize>,
    unmarshal_delay: Duration,
    received: Arc<Mutex<Vec<u8>>>,
    journal: Journal,
}

impl ScriptedClient {
    pub fn new(name: impl Into<String>, payload: impl Into<Vec<u8>>, journal: &Journal) -> Self {
        Self {
            name: name.into(),
            payload: payload.into(),
            chunk: usize::MAX,
            offset: 0,
            veto_at: None,
            vetoes_asked: 0,
            consume_short: false,
            expects: None,
            unmarshal_delay: Duration::ZERO,
            received: Arc::default(),
            journal: journal.clone(),
        }
    }

    /// Write at most `chunk` bytes per marshal call.
    pub fn chunked(mut self, chunk: usize) -> Self {
        self.chunk = chunk.max(1);
        self
    }

    /// Veto on the `nth` time it is asked (1-based).
    pub fn veto_at(mut self, nth: usize) -> Self {
        self.veto_at = Some(nth);
        self
    }

    /// Report one byte less than offered when unmarshalling.
    pub fn consume_short(mut self) -> Self {
        self.consume_short = true;
        self
    }

    /// Consume at most `len` bytes per unmarshal, like a fixed-size record.
    pub fn expects(mut self, len: usize) -> Self {
        self.expects = Some(len);
        self
    }

    /// Take `delay` over every unmarshal call.
    pub fn slow_unmarshal(mut self, delay: Duration) -> Self {
        self.unmarshal_delay = delay;
        self
    }

    /// Bytes this client has unmarshalled.
    pub fn received(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.received)
    }

    pub fn boxed(self) -> Box<dyn HandoverClient> {
        Box::new(self)
    }

    fn log(&self, what: impl std::fmt::Display) {
        self.journal.push(format!("{}:{what}", self.name));
    }
}

impl HandoverClient for ScriptedClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn veto(&mut self) -> bool {
        self.vetoes_asked += 1;
        self.log("veto");
        self.veto_at == Some(self.vetoes_asked)
    }

    fn marshal(&mut self, _handset: &BdAddr, buf: &mut [u8]) -> MarshalProgress {
        let left = &self.payload[self.offset..];
        let n = left.len().min(buf.len()).min(self.chunk);
        buf[..n].copy_from_slice(&left[..n]);
        self.offset += n;
        self.log(format_args!("marshal:{n}"));
        MarshalProgress::new(n, self.offset == self.payload.len())
    }

    fn unmarshal(&mut self, _handset: &BdAddr, data: &[u8]) -> UnmarshalProgress {
        if !self.unmarshal_delay.is_zero() {
            thread::sleep(self.unmarshal_delay);
        }
        let mut consumed = data.len().min(self.expects.unwrap_or(usize::MAX));
        if self.consume_short {
            consumed = consumed.saturating_sub(1);
        }
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(&data[..consumed]);
        self.log(format_args!("unmarshal:{}", data.len()));
        UnmarshalProgress::new(consumed, true)
    }

    fn commit(&mut self, is_primary: bool) {
        self.log(format_args!("commit:{is_primary}"));
    }

    fn complete(&mut self, is_primary: bool) {
        self.offset = 0;
        self.log(format_args!("complete:{is_primary}"));
    }

    fn abort(&mut self) {
        self.offset = 0;
        self.log("abort");
    }
}

/// Feed readable data to `profile` until `done` holds or `timeout` passes.
///
/// Returns whether `done` was reached.
pub fn pump(
    profile: &mut HandoverProfile,
    timeout: Duration,
    mut done: impl FnMut(&HandoverProfile) -> bool,
) -> Result<bool> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        profile.handle_event(ConnectionEvent::MoreData)?;
        if done(profile) {
            return Ok(true);
        }
        thread::sleep(Duration::from_millis(1));
    }
    Ok(false)
}

/// One simulated earbud.
#[derive(Debug)]
pub struct SimDevice {
    pub profile: HandoverProfile,
    pub sim: SimHandle,
    pub events: EventLog,
    pub link: LoopbackHandle,
}

/// Initialise a profile up to `Disconnected`.
pub fn initialised(
    config: HandoverConfig,
    sim: &SimHandle,
    clients: Vec<Box<dyn HandoverClient>>,
    events: &EventLog,
) -> Result<HandoverProfile> {
    let mut profile = HandoverProfile::new(config, sim.service(), sim.platform());
    profile.client_register(Arc::new(events.clone()));
    profile.init()?;
    profile.handle_event(ConnectionEvent::PsmRegistered {
        psm: Some(SIM_PSM),
    })?;
    profile.handle_event(ConnectionEvent::ServiceRecordRegistered { success: true })?;
    profile.register_handover_clients(clients)?;
    Ok(profile)
}

/// Two earbuds with the handover channel up. The first one is primary.
pub fn connected_pair(
    config: HandoverConfig,
    primary_clients: Vec<Box<dyn HandoverClient>>,
    secondary_clients: Vec<Box<dyn HandoverClient>>,
) -> Result<(SimDevice, SimDevice)> {
    let primary_sim = SimHandle::new(SimState {
        peer_addr: Some(SECONDARY_ADDR),
        mirror_acl_handle: Some(0x0001),
        ..SimState::default()
    });
    let secondary_sim = SimHandle::new(SimState {
        peer_addr: Some(PRIMARY_ADDR),
        mirror_acl_handle: Some(0x0002),
        ..SimState::default()
    });
    let primary_events = EventLog::new();
    let secondary_events = EventLog::new();

    let mut primary = initialised(config.clone(), &primary_sim, primary_clients, &primary_events)?;
    let mut secondary = initialised(
        config.clone(),
        &secondary_sim,
        secondary_clients,
        &secondary_events,
    )?;

    let (a, b) = loopback_pair(LoopbackConfig {
        mtu: config.mtu,
        capacity: 4 * config.mtu,
        record: true,
    });
    let (primary_link, secondary_link) = (a.handle(), b.handle());
    let (a_sink, a_source) = a.into_parts();
    let (b_sink, b_source) = b.into_parts();

    primary.connect(Arc::new(primary_events.clone()), SECONDARY_ADDR)?;
    primary.handle_event(ConnectionEvent::SearchComplete(SearchResult::Found {
        remote_psm: SIM_PSM,
    }))?;

    secondary.handle_event(ConnectionEvent::ConnectInd {
        peer: PRIMARY_ADDR,
        psm: SIM_PSM,
        connection_id: 1,
        identifier: 1,
    })?;
    secondary.handle_event(ConnectionEvent::ConnectCfm {
        status: ConnectStatus::Success,
        channel: Some(Channel::new(LinkId(0x40), Box::new(b_sink), Box::new(b_source))),
    })?;
    primary.handle_event(ConnectionEvent::ConnectCfm {
        status: ConnectStatus::Success,
        channel: Some(Channel::new(LinkId(0x41), Box::new(a_sink), Box::new(a_source))),
    })?;

    Ok((
        SimDevice {
            profile: primary,
            sim: primary_sim,
            events: primary_events,
            link: primary_link,
        },
        SimDevice {
            profile: secondary,
            sim: secondary_sim,
            events: secondary_events,
            link: secondary_link,
        },
    ))
}
