use std::time::Duration;

use bytes::{BufMut, BytesMut};
use handover_transport::{LinkSink, TransportError};
use tracing::{debug, trace};

use crate::codec::{encode_message, ProtocolMessage, END_PACKET, ENTRY_HEADER_LEN};
use crate::deadline::poll_until;
use crate::error::{FrameError, Result};
use crate::opcode::{opcode_name, END_TAG, MARSHAL_DATA, P0_TAG};

/// What a client reported after marshalling into the space it was offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MarshalProgress {
    /// Bytes of the offered buffer the client filled.
    pub written: usize,
    /// True once the client has nothing more to marshal.
    pub complete: bool,
}

impl MarshalProgress {
    pub fn new(written: usize, complete: bool) -> Self {
        Self { written, complete }
    }
}

/// Totals for one marshal sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriterStats {
    pub packets: usize,
    pub bytes: usize,
}

/// Block until `sink` can take `size` bytes, or fail after `timeout`.
pub fn claim_space<S: LinkSink + ?Sized>(sink: &S, size: usize, timeout: Duration) -> Result<()> {
    if size > sink.mtu() {
        return Err(TransportError::PacketTooLarge {
            size,
            mtu: sink.mtu(),
        }
        .into());
    }

    let claimed = poll_until(timeout, || {
        if sink.space() >= size {
            Some(Ok(()))
        } else if !sink.is_open() {
            Some(Err(FrameError::Link(TransportError::Closed)))
        } else {
            None
        }
    });

    claimed.unwrap_or(Err(FrameError::ClaimTimeout { size, timeout }))
}

/// Encode a control message, claim room for it and flush it as one packet.
pub fn send_message<S: LinkSink + ?Sized>(
    sink: &mut S,
    msg: &ProtocolMessage,
    timeout: Duration,
) -> Result<()> {
    let mut buf = BytesMut::with_capacity(msg.wire_size());
    encode_message(msg, &mut buf);
    claim_space(sink, buf.len(), timeout)?;
    sink.flush(&buf)?;
    debug!(opcode = opcode_name(msg.opcode()), len = buf.len(), "sent");
    Ok(())
}

/// Packs marshal entries into MTU-sized `MARSHAL_DATA` packets.
///
/// Each packet is claimed in full before anything is written into it and
/// flushed once it cannot take another entry. [`finish`](Self::finish)
/// appends the end tag, spilling into a separate two-byte packet when the
/// last packet is exactly full.
pub struct MarshalWriter<'a, S: LinkSink + ?Sized> {
    sink: &'a mut S,
    buf: BytesMut,
    mtu: usize,
    claim_timeout: Duration,
    open: bool,
    p0_len_at: Option<usize>,
    stats: WriterStats,
}

impl<'a, S: LinkSink + ?Sized> MarshalWriter<'a, S> {
    /// `mtu` is capped at the sink's own MTU.
    pub fn new(sink: &'a mut S, mtu: usize, claim_timeout: Duration) -> Self {
        let mtu = mtu.min(sink.mtu());
        Self {
            sink,
            buf: BytesMut::with_capacity(mtu),
            mtu,
            claim_timeout,
            open: false,
            p0_len_at: None,
            stats: WriterStats::default(),
        }
    }

    /// Packet size in use, after capping at the sink's MTU.
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// True while a claimed packet is being filled.
    pub fn in_packet(&self) -> bool {
        self.open
    }

    /// Free bytes left in the current packet.
    pub fn remaining(&self) -> usize {
        if self.open {
            self.mtu - self.buf.len()
        } else {
            0
        }
    }

    /// True if the current packet holds only its opcode.
    pub fn is_fresh(&self) -> bool {
        self.open && self.buf.len() == 1
    }

    /// Claim a full MTU on the sink and start a new packet.
    pub fn begin_packet(&mut self) -> Result<()> {
        if self.open {
            self.flush_packet()?;
        }
        claim_space(&*self.sink, self.mtu, self.claim_timeout)?;
        self.buf.clear();
        self.buf.put_u8(MARSHAL_DATA);
        self.open = true;
        Ok(())
    }

    /// Offer the rest of the current packet to one client.
    ///
    /// `fill` receives a zeroed buffer sized to what is left after the entry
    /// header. The header is only written when the client produced bytes.
    /// When the packet has no room for a header plus one byte, `fill` is not
    /// called and an incomplete, empty progress is returned.
    pub fn write_client<F>(&mut self, id: u8, fill: F) -> Result<MarshalProgress>
    where
        F: FnOnce(&mut [u8]) -> MarshalProgress,
    {
        if self.remaining() <= ENTRY_HEADER_LEN {
            return Ok(MarshalProgress::default());
        }

        let start = self.buf.len();
        let budget = self.mtu - start - ENTRY_HEADER_LEN;
        self.buf.resize(start + ENTRY_HEADER_LEN + budget, 0);
        let progress = fill(&mut self.buf[start + ENTRY_HEADER_LEN..]);

        if progress.written > budget {
            self.buf.truncate(start);
            return Err(FrameError::EntryOverrun {
                tag: id,
                declared: progress.written,
                available: budget,
            });
        }

        if progress.written == 0 {
            self.buf.truncate(start);
        } else {
            self.buf[start] = id;
            self.buf[start + 1..start + ENTRY_HEADER_LEN]
                .copy_from_slice(&(progress.written as u16).to_be_bytes());
            self.buf.truncate(start + ENTRY_HEADER_LEN + progress.written);
            trace!(client = id, len = progress.written, complete = progress.complete, "entry");
        }
        Ok(progress)
    }

    /// Append baseband bytes to the current packet's P0 entry.
    ///
    /// Opens the P0 entry on first use in a packet. Returns how many bytes of
    /// `data` fit.
    pub fn write_p0(&mut self, data: &[u8]) -> usize {
        let at = match self.p0_len_at {
            Some(at) => at,
            None => {
                if self.remaining() <= ENTRY_HEADER_LEN {
                    return 0;
                }
                self.buf.put_u8(P0_TAG);
                let at = self.buf.len();
                self.buf.put_u16(0);
                self.p0_len_at = Some(at);
                at
            }
        };

        let take = data.len().min(self.remaining());
        self.buf.put_slice(&data[..take]);
        let entry_len = self.buf.len() - at - 2;
        self.buf[at..at + 2].copy_from_slice(&(entry_len as u16).to_be_bytes());
        take
    }

    /// Send the current packet, if any.
    pub fn flush_packet(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.sink.flush(&self.buf)?;
        trace!(len = self.buf.len(), "marshal packet flushed");
        self.stats.packets += 1;
        self.stats.bytes += self.buf.len();
        self.buf.clear();
        self.open = false;
        self.p0_len_at = None;
        Ok(())
    }

    /// Terminate the marshal sequence with the end tag and flush.
    pub fn finish(mut self) -> Result<WriterStats> {
        if self.open && self.remaining() >= 1 {
            self.buf.put_u8(END_TAG);
            self.flush_packet()?;
        } else {
            self.flush_packet()?;
            claim_space(&*self.sink, END_PACKET.len(), self.claim_timeout)?;
            self.sink.flush(&END_PACKET)?;
            self.stats.packets += 1;
            self.stats.bytes += END_PACKET.len();
        }
        Ok(self.stats)
    }
}
