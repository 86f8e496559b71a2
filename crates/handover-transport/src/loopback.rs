//! In-memory link pair.
//!
//! Each direction is a bounded queue of packets shared between the sink of
//! one device and the source of the other. Space is a byte credit: bytes
//! sitting unread in the peer's source count against the sender's capacity,
//! which gives the same back-pressure a real flow-controlled channel has.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tracing::trace;

use crate::error::{Result, TransportError};
use crate::traits::{LinkSink, LinkSource};

/// Default MTU of the handover channel in bytes.
pub const DEFAULT_MTU: usize = 895;

/// Configuration for a loopback link pair.
#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    /// Largest packet either side may flush. Default: 895 bytes.
    pub mtu: usize,
    /// Outbound credit per direction in bytes. Default: 4 packets.
    pub capacity: usize,
    /// Keep a copy of every flushed packet for later inspection.
    pub record: bool,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            mtu: DEFAULT_MTU,
            capacity: 4 * DEFAULT_MTU,
            record: false,
        }
    }
}

#[derive(Debug, Default)]
struct Pipe {
    packets: VecDeque<Bytes>,
    buffered: usize,
    capacity: usize,
    open: bool,
    history: Vec<Bytes>,
    record: bool,
}

type SharedPipe = Arc<Mutex<Pipe>>;

fn lock(pipe: &SharedPipe) -> MutexGuard<'_, Pipe> {
    pipe.lock().unwrap_or_else(PoisonError::into_inner)
}

fn new_pipe(config: &LoopbackConfig) -> SharedPipe {
    Arc::new(Mutex::new(Pipe {
        capacity: config.capacity,
        open: true,
        record: config.record,
        ..Pipe::default()
    }))
}

/// Write endpoint of one loopback direction.
#[derive(Debug)]
pub struct LoopbackSink {
    pipe: SharedPipe,
    mtu: usize,
}

/// Read endpoint of one loopback direction.
#[derive(Debug)]
pub struct LoopbackSource {
    pipe: SharedPipe,
}

/// Handle that can observe and tear down both directions of a link.
#[derive(Debug, Clone)]
pub struct LoopbackHandle {
    outbound: SharedPipe,
    inbound: SharedPipe,
}

/// One device's end of a loopback link.
#[derive(Debug)]
pub struct LoopbackLink {
    pub sink: LoopbackSink,
    pub source: LoopbackSource,
    handle: LoopbackHandle,
}

/// Create two connected link ends. Packets flushed on one end's sink
/// appear on the other end's source.
pub fn loopback_pair(config: LoopbackConfig) -> (LoopbackLink, LoopbackLink) {
    let a_to_b = new_pipe(&config);
    let b_to_a = new_pipe(&config);

    let a = LoopbackLink {
        sink: LoopbackSink {
            pipe: Arc::clone(&a_to_b),
            mtu: config.mtu,
        },
        source: LoopbackSource {
            pipe: Arc::clone(&b_to_a),
        },
        handle: LoopbackHandle {
            outbound: Arc::clone(&a_to_b),
            inbound: Arc::clone(&b_to_a),
        },
    };
    let b = LoopbackLink {
        sink: LoopbackSink {
            pipe: Arc::clone(&b_to_a),
            mtu: config.mtu,
        },
        source: LoopbackSource {
            pipe: Arc::clone(&a_to_b),
        },
        handle: LoopbackHandle {
            outbound: b_to_a,
            inbound: a_to_b,
        },
    };
    (a, b)
}

impl LoopbackLink {
    /// A handle that outlives the endpoints once they are moved elsewhere.
    pub fn handle(&self) -> LoopbackHandle {
        self.handle.clone()
    }

    /// Split into sink and source.
    pub fn into_parts(self) -> (LoopbackSink, LoopbackSource) {
        (self.sink, self.source)
    }
}

impl LoopbackHandle {
    /// Tear down both directions. Pending bytes stay readable.
    pub fn close(&self) {
        lock(&self.outbound).open = false;
        lock(&self.inbound).open = false;
    }

    /// Change the outbound credit, e.g. to simulate a stalled peer.
    pub fn set_capacity(&self, capacity: usize) {
        lock(&self.outbound).capacity = capacity;
    }

    /// Packets flushed by this end so far (only when recording).
    pub fn sent_packets(&self) -> Vec<Bytes> {
        lock(&self.outbound).history.clone()
    }

    /// Packets flushed by the other end so far (only when recording).
    pub fn received_packets(&self) -> Vec<Bytes> {
        lock(&self.inbound).history.clone()
    }

    /// Bytes this end has flushed that the peer has not yet consumed.
    pub fn in_flight(&self) -> usize {
        lock(&self.outbound).buffered
    }
}

impl LinkSink for LoopbackSink {
    fn mtu(&self) -> usize {
        self.mtu
    }

    fn space(&self) -> usize {
        let pipe = lock(&self.pipe);
        if !pipe.open {
            return 0;
        }
        pipe.capacity.saturating_sub(pipe.buffered).min(self.mtu)
    }

    fn flush(&mut self, packet: &[u8]) -> Result<()> {
        if packet.len() > self.mtu {
            return Err(TransportError::PacketTooLarge {
                size: packet.len(),
                mtu: self.mtu,
            });
        }

        let mut pipe = lock(&self.pipe);
        if !pipe.open {
            return Err(TransportError::Closed);
        }
        let available = pipe.capacity.saturating_sub(pipe.buffered);
        if packet.len() > available {
            return Err(TransportError::InsufficientSpace {
                requested: packet.len(),
                available,
            });
        }

        let packet = Bytes::copy_from_slice(packet);
        trace!(len = packet.len(), "loopback flush");
        pipe.buffered += packet.len();
        if pipe.record {
            pipe.history.push(packet.clone());
        }
        pipe.packets.push_back(packet);
        Ok(())
    }

    fn is_open(&self) -> bool {
        lock(&self.pipe).open
    }
}

impl LinkSource for LoopbackSource {
    fn boundary(&self) -> usize {
        lock(&self.pipe).packets.front().map_or(0, Bytes::len)
    }

    fn size(&self) -> usize {
        lock(&self.pipe).buffered
    }

    fn map(&self) -> Option<Bytes> {
        lock(&self.pipe).packets.front().cloned()
    }

    fn drop_bytes(&mut self, len: usize) -> Result<()> {
        let mut pipe = lock(&self.pipe);
        if len > pipe.buffered {
            return Err(TransportError::NothingToDrop {
                requested: len,
                available: pipe.buffered,
            });
        }

        let mut remaining = len;
        while remaining > 0 {
            let Some(front) = pipe.packets.front_mut() else {
                break;
            };
            if front.len() <= remaining {
                remaining -= front.len();
                pipe.packets.pop_front();
            } else {
                let _ = front.split_to(remaining);
                remaining = 0;
            }
        }
        pipe.buffered -= len;
        Ok(())
    }
}
