//! Stream bridge between a positional byte source and a cursor-driven decoder.
//!
//! Decoders expect a classic stream: `read` advances a cursor, `seek`
//! moves it, `tell` reports it. [`StreamBridge`] layers that cursor over any
//! [`ReadAt`] source. It is read-only: every mutating stream operation
//! reports [`io::ErrorKind::Unsupported`].

use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use tracing::trace;

use super::ReadAt;

/// Metadata reported by [`StreamBridge::stat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamStat {
    /// Total length of the underlying source in bytes.
    pub size: u64,
}

/// Read-only stream handle over a shared byte source.
///
/// One bridge is owned by exactly one archive session; it is never shared
/// between decoders.
pub struct StreamBridge {
    source: Arc<dyn ReadAt>,
    pos: u64,
}

impl StreamBridge {
    pub fn new(source: Arc<dyn ReadAt>) -> Self {
        Self { source, pos: 0 }
    }

    /// Current cursor position.
    pub fn tell(&self) -> u64 {
        self.pos
    }

    /// Total length of the underlying source.
    pub fn len(&self) -> u64 {
        self.source.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stat(&self) -> StreamStat {
        StreamStat { size: self.len() }
    }

    /// Read exactly `buf.len()` bytes at `offset` without moving the cursor.
    ///
    /// Returns `Ok(false)` when the source ends first.
    pub fn peek_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<bool> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self
                .source
                .read_at(offset + filled as u64, &mut buf[filled..])?;
            if n == 0 {
                return Ok(false);
            }
            filled += n;
        }
        Ok(true)
    }

    pub fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(unsupported("write"))
    }

    pub fn set_size(&mut self, _size: u64) -> io::Result<()> {
        Err(unsupported("set_size"))
    }

    pub fn commit(&mut self) -> io::Result<()> {
        Err(unsupported("commit"))
    }

    pub fn revert(&mut self) -> io::Result<()> {
        Err(unsupported("revert"))
    }

    pub fn lock_region(&mut self, _offset: u64, _len: u64) -> io::Result<()> {
        Err(unsupported("lock_region"))
    }

    pub fn unlock_region(&mut self, _offset: u64, _len: u64) -> io::Result<()> {
        Err(unsupported("unlock_region"))
    }

    /// Bridges are exclusively owned, so they cannot be duplicated.
    pub fn try_clone(&self) -> io::Result<StreamBridge> {
        Err(unsupported("clone"))
    }
}

fn unsupported(op: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        format!("{op} is not supported on a read-only archive stream"),
    )
}

impl Read for StreamBridge {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.pos >= self.len() {
            return Ok(0);
        }
        let n = self.source.read_at(self.pos, buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for StreamBridge {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => i128::from(offset),
            SeekFrom::Current(delta) => i128::from(self.pos) + i128::from(delta),
            SeekFrom::End(delta) => i128::from(self.len()) + i128::from(delta),
        };
        if target < 0 || target > i128::from(self.len()) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("seek to {target} outside stream of {} bytes", self.len()),
            ));
        }
        self.pos = target as u64;
        Ok(self.pos)
    }

    fn stream_position(&mut self) -> io::Result<u64> {
        Ok(self.pos)
    }
}

impl fmt::Debug for StreamBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamBridge")
            .field("pos", &self.pos)
            .field("len", &self.len())
            .finish()
    }
}

impl Drop for StreamBridge {
    fn drop(&mut self) {
        trace!(pos = self.pos, "stream handle released");
    }
}
