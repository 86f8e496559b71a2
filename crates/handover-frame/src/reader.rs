use std::time::Duration;

use bytes::Bytes;
use handover_transport::LinkSource;

use crate::codec::ENTRY_HEADER_LEN;
use crate::deadline::poll_until;
use crate::error::{FrameError, Result};
use crate::opcode::{END_TAG, P0_TAG};

/// Block until `source` has a complete packet, or give up after `timeout`.
///
/// The packet is not consumed; callers drop it once handled.
pub fn wait_for_packet<S: LinkSource + ?Sized>(source: &S, timeout: Duration) -> Option<Bytes> {
    poll_until(timeout, || {
        if source.boundary() > 0 {
            source.map()
        } else {
            None
        }
    })
}

/// One entry of a `MARSHAL_DATA` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarshalEntry {
    /// Opaque baseband bytes.
    P0(Bytes),
    /// State for the client registered at index `id`.
    Client { id: u8, data: Bytes },
    /// End of the marshal sequence.
    End,
}

/// Walks the entries of a `MARSHAL_DATA` payload (the bytes after the opcode).
#[derive(Debug, Clone)]
pub struct MarshalCursor {
    payload: Bytes,
    pos: usize,
    num_clients: usize,
}

impl MarshalCursor {
    /// Tags below `num_clients` are client ids.
    pub fn new(payload: Bytes, num_clients: usize) -> Self {
        Self {
            payload,
            pos: 0,
            num_clients,
        }
    }

    /// Bytes of the payload walked so far.
    pub fn consumed(&self) -> usize {
        self.pos
    }

    /// Bytes of the payload not yet walked.
    pub fn remaining(&self) -> usize {
        self.payload.len() - self.pos
    }

    /// Tag of the next entry without consuming it.
    pub fn peek_tag(&self) -> Option<u8> {
        self.payload.get(self.pos).copied()
    }

    /// Decode the next entry.
    ///
    /// Returns `Ok(None)` once the payload is exhausted.
    pub fn next_entry(&mut self) -> Result<Option<MarshalEntry>> {
        let Some(tag) = self.peek_tag() else {
            return Ok(None);
        };

        if tag == END_TAG {
            self.pos += 1;
            return Ok(Some(MarshalEntry::End));
        }

        if tag != P0_TAG && usize::from(tag) >= self.num_clients {
            return Err(FrameError::UnknownTag(tag));
        }

        if self.remaining() < ENTRY_HEADER_LEN {
            return Err(FrameError::Truncated {
                needed: ENTRY_HEADER_LEN,
                available: self.remaining(),
            });
        }

        let len_at = self.pos + 1;
        let declared =
            usize::from(u16::from_be_bytes([self.payload[len_at], self.payload[len_at + 1]]));
        let start = self.pos + ENTRY_HEADER_LEN;
        let available = self.payload.len() - start;
        if declared > available {
            return Err(FrameError::EntryOverrun {
                tag,
                declared,
                available,
            });
        }

        let data = self.payload.slice(start..start + declared);
        self.pos = start + declared;

        if tag == P0_TAG {
            Ok(Some(MarshalEntry::P0(data)))
        } else {
            Ok(Some(MarshalEntry::Client { id: tag, data }))
        }
    }
}
