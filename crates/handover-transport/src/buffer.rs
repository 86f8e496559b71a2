//! Plain byte-stream endpoints.
//!
//! The baseband state blob is read from and written to byte streams that
//! carry no packet boundaries. [`BufferSource`] exposes a fixed run of bytes
//! as a single boundary. [`BufferSink`] accumulates everything flushed into
//! it. Clones of a sink share the same storage, so a caller can keep one
//! clone to inspect what another component wrote.

use std::sync::{Arc, Mutex, PoisonError};

use bytes::{Bytes, BytesMut};

use crate::error::{Result, TransportError};
use crate::traits::{LinkSink, LinkSource};

/// Byte-stream source over a fixed buffer.
#[derive(Debug, Clone, Default)]
pub struct BufferSource {
    data: Bytes,
}

impl BufferSource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

impl LinkSource for BufferSource {
    fn boundary(&self) -> usize {
        self.data.len()
    }

    fn size(&self) -> usize {
        self.data.len()
    }

    fn map(&self) -> Option<Bytes> {
        if self.data.is_empty() {
            None
        } else {
            Some(self.data.clone())
        }
    }

    fn drop_bytes(&mut self, len: usize) -> Result<()> {
        if len > self.data.len() {
            return Err(TransportError::NothingToDrop {
                requested: len,
                available: self.data.len(),
            });
        }
        let _ = self.data.split_to(len);
        Ok(())
    }
}

#[derive(Debug)]
struct Stored {
    bytes: BytesMut,
    capacity: usize,
    open: bool,
}

/// Byte-stream sink that collects flushed bytes.
#[derive(Debug, Clone)]
pub struct BufferSink {
    stored: Arc<Mutex<Stored>>,
    mtu: usize,
}

impl BufferSink {
    /// A sink accepting up to `capacity` bytes in total, at most `mtu` per flush.
    pub fn new(mtu: usize, capacity: usize) -> Self {
        Self {
            stored: Arc::new(Mutex::new(Stored {
                bytes: BytesMut::new(),
                capacity,
                open: true,
            })),
            mtu,
        }
    }

    /// An effectively unbounded sink.
    pub fn unbounded() -> Self {
        Self::new(usize::MAX, usize::MAX)
    }

    /// Everything flushed so far.
    pub fn contents(&self) -> Bytes {
        let stored = self.stored.lock().unwrap_or_else(PoisonError::into_inner);
        Bytes::copy_from_slice(&stored.bytes)
    }

    /// Stop accepting data.
    pub fn close(&self) {
        self.stored
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .open = false;
    }
}

impl LinkSink for BufferSink {
    fn mtu(&self) -> usize {
        self.mtu
    }

    fn space(&self) -> usize {
        let stored = self.stored.lock().unwrap_or_else(PoisonError::into_inner);
        if !stored.open {
            return 0;
        }
        stored.capacity.saturating_sub(stored.bytes.len()).min(self.mtu)
    }

    fn flush(&mut self, packet: &[u8]) -> Result<()> {
        if packet.len() > self.mtu {
            return Err(TransportError::PacketTooLarge {
                size: packet.len(),
                mtu: self.mtu,
            });
        }
        let mut stored = self.stored.lock().unwrap_or_else(PoisonError::into_inner);
        if !stored.open {
            return Err(TransportError::Closed);
        }
        let available = stored.capacity.saturating_sub(stored.bytes.len());
        if packet.len() > available {
            return Err(TransportError::InsufficientSpace {
                requested: packet.len(),
                available,
            });
        }
        stored.bytes.extend_from_slice(packet);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.stored
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .open
    }
}
