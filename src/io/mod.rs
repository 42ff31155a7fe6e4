//! Byte sources and the stream bridge handed to archive decoders.

mod bridge;
mod http;
mod local;
mod memory;

pub use bridge::{StreamBridge, StreamStat};
pub use http::HttpRangeReader;
pub use local::LocalFileReader;
pub use memory::MemoryReader;

use std::io;

/// Trait for random access reading from a data source
pub trait ReadAt: Send + Sync {
    /// Read data at the specified offset into the buffer.
    ///
    /// Returns the number of bytes read, which is `0` at or past the end of
    /// the source.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Get the total size of the data source
    fn size(&self) -> u64;
}
