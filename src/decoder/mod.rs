//! Forward-only archive decoders.
//!
//! A decoder only knows how to move forward: parse the next entry, describe
//! the current entry, and uncompress the current entry. The archive layer in
//! [`crate::archive`] turns that into a random-access container.
//!
//! The call set deliberately keeps the shape of a C decoder library
//! (`bool` results, a separate end-of-archive query, raw `i64` offsets) so
//! that bindings to an external library can implement [`ArchiveDecoder`]
//! directly. [`NativeDecoders`] is the built-in implementation.
//!
//! ## Offset contract
//!
//! - [`ArchiveDecoder::entry_offset`] returns the position of the entry
//!   *after* the current one.
//! - [`ArchiveDecoder::parse_entry_at`] with such an offset makes that entry
//!   current; offset `0` always restarts at the first entry.
//! - Between a parse call and the matching uncompress calls the decoder owns
//!   the stream cursor; nobody else may seek it.

mod rar;
mod sevenz;
mod tar;
mod zip;

pub use self::rar::RarDecoder;
pub use self::sevenz::SevenZipDecoder;
pub use self::tar::TarDecoder;
pub use self::zip::ZipDecoder;

use std::io;

use crate::io::StreamBridge;

/// `base + len` for offsets and lengths read out of archive headers, which
/// are untrusted and may not fit.
pub(crate) fn offset_after(base: u64, len: u64) -> io::Result<u64> {
    base.checked_add(len).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("length {len} at offset {base} runs past the end of any stream"),
        )
    })
}

/// Parser state over one stream: the "archive handle".
///
/// The stream is passed to every call instead of being owned, so the
/// session can keep the stream alive strictly longer than the decoder.
pub trait ArchiveDecoder: Send {
    /// Parse the next entry.
    ///
    /// Returns `false` both at the end of the archive and on error; use
    /// [`at_eof`](Self::at_eof) to tell them apart.
    fn parse_entry(&mut self, stream: &mut StreamBridge) -> bool;

    /// Parse the entry at an offset previously returned by
    /// [`entry_offset`](Self::entry_offset), or the first entry for `0`.
    fn parse_entry_at(&mut self, stream: &mut StreamBridge, offset: i64) -> bool;

    /// Whether the last parse call stopped at the archive's regular end.
    fn at_eof(&self) -> bool;

    /// Name of the current entry, `None` if it has no usable name.
    fn entry_name(&self) -> Option<&str>;

    /// Uncompressed size of the current entry.
    fn entry_size(&self) -> u64;

    /// Offset of the entry following the current one.
    fn entry_offset(&self) -> i64;

    /// Uncompress the next `buf.len()` bytes of the current entry.
    fn entry_uncompress(&mut self, stream: &mut StreamBridge, buf: &mut [u8]) -> bool;
}

/// A decoder library: one "open as X" call per container kind.
///
/// Each call returns `None` when the stream is not an instance of that
/// container kind.
pub trait DecoderLibrary: Send + Sync {
    fn open_7z_archive(&self, stream: &mut StreamBridge) -> Option<Box<dyn ArchiveDecoder>>;

    fn open_rar_archive(&self, stream: &mut StreamBridge) -> Option<Box<dyn ArchiveDecoder>>;

    fn open_tar_archive(&self, stream: &mut StreamBridge) -> Option<Box<dyn ArchiveDecoder>>;

    fn open_zip_archive(&self, stream: &mut StreamBridge) -> Option<Box<dyn ArchiveDecoder>>;
}

/// Built-in decoders for 7z, RAR, TAR and ZIP.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeDecoders;

impl DecoderLibrary for NativeDecoders {
    fn open_7z_archive(&self, stream: &mut StreamBridge) -> Option<Box<dyn ArchiveDecoder>> {
        SevenZipDecoder::open(stream).map(|d| Box::new(d) as Box<dyn ArchiveDecoder>)
    }

    fn open_rar_archive(&self, stream: &mut StreamBridge) -> Option<Box<dyn ArchiveDecoder>> {
        RarDecoder::open(stream).map(|d| Box::new(d) as Box<dyn ArchiveDecoder>)
    }

    fn open_tar_archive(&self, stream: &mut StreamBridge) -> Option<Box<dyn ArchiveDecoder>> {
        TarDecoder::open(stream).map(|d| Box::new(d) as Box<dyn ArchiveDecoder>)
    }

    fn open_zip_archive(&self, stream: &mut StreamBridge) -> Option<Box<dyn ArchiveDecoder>> {
        ZipDecoder::open(stream).map(|d| Box::new(d) as Box<dyn ArchiveDecoder>)
    }
}

/// CRC-32 accumulator shared by the decoders that verify stored checksums.
pub(crate) struct Checksum {
    crc: flate2::Crc,
    expected: Option<u32>,
}

impl Checksum {
    pub(crate) fn new(expected: Option<u32>) -> Self {
        Self {
            crc: flate2::Crc::new(),
            expected,
        }
    }

    pub(crate) fn update(&mut self, data: &[u8]) {
        if self.expected.is_some() {
            self.crc.update(data);
        }
    }

    /// `true` when no checksum is recorded or the data matched it.
    pub(crate) fn matches(&self) -> bool {
        self.expected.is_none_or(|crc| crc == self.crc.sum())
    }
}
