use bytes::Bytes;

use crate::error::Result;

/// Write side of a flow-controlled link.
///
/// Writers poll [`space`](LinkSink::space) until enough room is available
/// (bounded by their own deadline), then hand over one complete packet with
/// [`flush`](LinkSink::flush). A flush never blocks.
pub trait LinkSink: Send {
    /// Largest packet the link carries in a single flush.
    fn mtu(&self) -> usize;

    /// Bytes that can be flushed right now.
    fn space(&self) -> usize;

    /// Send one packet.
    ///
    /// Fails if the packet exceeds the MTU, the currently available space,
    /// or the link has been closed.
    fn flush(&mut self, packet: &[u8]) -> Result<()>;

    /// False once the link has been torn down.
    fn is_open(&self) -> bool {
        true
    }
}

/// Read side of a link.
///
/// Packet-oriented links report one packet at a time through
/// [`boundary`](LinkSource::boundary). Byte-stream sources report everything
/// they hold as a single run.
pub trait LinkSource: Send {
    /// Length of the next contiguous run of bytes, or zero when empty.
    fn boundary(&self) -> usize;

    /// Total buffered bytes.
    fn size(&self) -> usize;

    /// The next contiguous run of bytes without consuming it.
    fn map(&self) -> Option<Bytes>;

    /// Discard `len` bytes from the front of the buffered data.
    fn drop_bytes(&mut self, len: usize) -> Result<()>;

    /// Discard everything currently buffered.
    fn drain(&mut self) -> Result<usize> {
        let size = self.size();
        if size > 0 {
            self.drop_bytes(size)?;
        }
        Ok(size)
    }
}

impl<T: LinkSink + ?Sized> LinkSink for Box<T> {
    fn mtu(&self) -> usize {
        (**self).mtu()
    }

    fn space(&self) -> usize {
        (**self).space()
    }

    fn flush(&mut self, packet: &[u8]) -> Result<()> {
        (**self).flush(packet)
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}

impl<T: LinkSource + ?Sized> LinkSource for Box<T> {
    fn boundary(&self) -> usize {
        (**self).boundary()
    }

    fn size(&self) -> usize {
        (**self).size()
    }

    fn map(&self) -> Option<Bytes> {
        (**self).map()
    }

    fn drop_bytes(&mut self, len: usize) -> Result<()> {
        (**self).drop_bytes(len)
    }
}
