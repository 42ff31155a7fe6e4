//! ZIP decoder.
//!
//! ## Parsing Strategy
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) at the file's end
//! 2. If ZIP64, read the ZIP64 EOCD for large file support
//! 3. Load the Central Directory and walk it one header at a time
//! 4. For extraction, read the entry's Local File Header and data
//!
//! Offsets handed out by [`ZipDecoder`] are absolute positions of Central
//! Directory headers, so re-parsing an entry never touches the local headers
//! of the entries before it.
//!
//! ## Supported Features
//!
//! - ZIP64 extensions for files > 4GB
//! - STORED and DEFLATE methods, with CRC-32 verification
//!
//! Encrypted entries and other methods are listed but fail to uncompress.

mod records;

use std::io::{Cursor, Read, Seek, SeekFrom};

use anyhow::{bail, Result};
use flate2::{Decompress, FlushDecompress, Status};
use tracing::{debug, warn};

use self::records::*;
use super::{ArchiveDecoder, Checksum};
use crate::io::StreamBridge;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// Compressed bytes fed to the inflater per read.
const INFLATE_CHUNK: usize = 64 * 1024;

/// Incremental raw-deflate state for the current entry.
struct Inflater {
    decompress: Decompress,
    input: Vec<u8>,
    start: usize,
    end: usize,
}

/// Extraction progress of the current entry.
struct ReadState {
    data_offset: u64,
    consumed: u64,
    produced: u64,
    inflater: Option<Inflater>,
    checksum: Checksum,
}

/// Forward-only ZIP decoder over the Central Directory.
pub struct ZipDecoder {
    cd_offset: u64,
    cd: Vec<u8>,
    cursor: usize,
    current: Option<CentralEntry>,
    at_eof: bool,
    state: Option<ReadState>,
}

impl ZipDecoder {
    pub fn open(stream: &mut StreamBridge) -> Option<Self> {
        match Self::load_central_directory(stream) {
            Ok((cd_offset, cd)) => Some(Self {
                cd_offset,
                cd,
                cursor: 0,
                current: None,
                at_eof: false,
                state: None,
            }),
            Err(e) => {
                debug!(error = %e, "zip: no usable central directory");
                None
            }
        }
    }

    /// Locate the End of Central Directory record.
    ///
    /// The record is usually the last 22 bytes. With an archive comment it
    /// sits further back, so the tail is scanned backwards for a signature
    /// whose comment length reaches exactly to the end of the file.
    fn find_eocd(stream: &mut StreamBridge) -> Result<(EndOfCentralDirectory, u64)> {
        let size = stream.len();
        if size < EndOfCentralDirectory::SIZE as u64 {
            bail!("Not a valid ZIP file");
        }

        let tail_len = (MAX_COMMENT_SIZE + EndOfCentralDirectory::SIZE as u64).min(size);
        let tail_start = size - tail_len;
        let mut tail = vec![0u8; tail_len as usize];
        read_exact_at(stream, tail_start, &mut tail)?;

        let last = tail.len() - EndOfCentralDirectory::SIZE;
        for i in (0..=last).rev() {
            if &tail[i..i + 4] != EndOfCentralDirectory::SIGNATURE {
                continue;
            }
            let eocd = EndOfCentralDirectory::from_bytes(&tail[i..])?;
            if eocd.comment_len as usize == last - i {
                return Ok((eocd, tail_start + i as u64));
            }
        }

        bail!("Not a valid ZIP file")
    }

    /// Read the ZIP64 End of Central Directory record, located through the
    /// locator that sits immediately before the regular EOCD.
    fn read_zip64_eocd(
        stream: &mut StreamBridge,
        eocd_offset: u64,
    ) -> Result<Zip64EndOfCentralDirectory> {
        let Some(locator_offset) = eocd_offset.checked_sub(Zip64Locator::SIZE as u64) else {
            bail!("Missing ZIP64 locator");
        };
        let mut locator_buf = vec![0u8; Zip64Locator::SIZE];
        read_exact_at(stream, locator_offset, &mut locator_buf)?;
        let locator = Zip64Locator::from_bytes(&locator_buf)?;

        let mut eocd64_buf = vec![0u8; Zip64EndOfCentralDirectory::MIN_SIZE];
        read_exact_at(stream, locator.eocd64_offset, &mut eocd64_buf)?;
        Zip64EndOfCentralDirectory::from_bytes(&eocd64_buf)
    }

    fn load_central_directory(stream: &mut StreamBridge) -> Result<(u64, Vec<u8>)> {
        let (eocd, eocd_offset) = Self::find_eocd(stream)?;

        let (cd_offset, cd_size, total_entries) = if eocd.is_zip64() {
            let eocd64 = Self::read_zip64_eocd(stream, eocd_offset)?;
            (eocd64.cd_offset, eocd64.cd_size, eocd64.total_entries)
        } else {
            (
                eocd.cd_offset as u64,
                eocd.cd_size as u64,
                eocd.total_entries as u64,
            )
        };

        if cd_offset.saturating_add(cd_size) > eocd_offset {
            bail!("Central Directory overlaps its end record");
        }
        debug!(cd_offset, cd_size, total_entries, "zip: central directory located");

        // read the whole Central Directory in one go
        let mut cd = vec![0u8; cd_size as usize];
        read_exact_at(stream, cd_offset, &mut cd)?;
        Ok((cd_offset, cd))
    }

    fn parse_from_cursor(&mut self) -> bool {
        self.current = None;
        self.state = None;
        self.at_eof = false;

        loop {
            if self.cursor >= self.cd.len() {
                self.at_eof = true;
                return false;
            }

            let mut cursor = Cursor::new(self.cd.as_slice());
            cursor.set_position(self.cursor as u64);
            let entry = match CentralEntry::parse(&mut cursor) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(offset = self.cd_offset + self.cursor as u64, error = %e, "zip: bad central directory entry");
                    return false;
                }
            };
            self.cursor = cursor.position() as usize;

            if entry.is_directory() {
                continue;
            }
            self.current = Some(entry);
            return true;
        }
    }

    fn uncompress(&mut self, stream: &mut StreamBridge, buf: &mut [u8]) -> Result<()> {
        let Some(entry) = &self.current else {
            bail!("no current entry");
        };
        if entry.is_encrypted() {
            bail!("entry is encrypted");
        }

        if self.state.is_none() {
            let mut lfh = [0u8; LFH_SIZE];
            read_exact_at(stream, entry.lfh_offset, &mut lfh)?;
            let inflater = match entry.method {
                CompressionMethod::Stored => {
                    if entry.compressed_size != entry.uncompressed_size {
                        bail!("stored entry with differing sizes");
                    }
                    None
                }
                CompressionMethod::Deflate => Some(Inflater {
                    decompress: Decompress::new(false),
                    input: vec![0u8; INFLATE_CHUNK],
                    start: 0,
                    end: 0,
                }),
                CompressionMethod::Unknown(m) => bail!("unsupported compression method {m}"),
            };
            self.state = Some(ReadState {
                data_offset: data_offset(entry, &lfh)?,
                consumed: 0,
                produced: 0,
                inflater,
                checksum: Checksum::new(Some(entry.crc32)),
            });
        }
        let Some(state) = self.state.as_mut() else {
            bail!("no read state");
        };

        if state.produced + buf.len() as u64 > entry.uncompressed_size {
            bail!(
                "read of {} bytes past end of entry ({} remaining)",
                buf.len(),
                entry.uncompressed_size - state.produced
            );
        }

        match state.inflater.as_mut() {
            None => {
                read_exact_at(stream, state.data_offset + state.produced, buf)?;
            }
            Some(inflater) => {
                let mut written = 0;
                while written < buf.len() {
                    if inflater.start == inflater.end && state.consumed < entry.compressed_size {
                        let n = (entry.compressed_size - state.consumed)
                            .min(inflater.input.len() as u64) as usize;
                        read_exact_at(
                            stream,
                            state.data_offset + state.consumed,
                            &mut inflater.input[..n],
                        )?;
                        state.consumed += n as u64;
                        inflater.start = 0;
                        inflater.end = n;
                    }

                    let before_in = inflater.decompress.total_in();
                    let before_out = inflater.decompress.total_out();
                    let status = inflater.decompress.decompress(
                        &inflater.input[inflater.start..inflater.end],
                        &mut buf[written..],
                        FlushDecompress::None,
                    )?;
                    let used = (inflater.decompress.total_in() - before_in) as usize;
                    let made = (inflater.decompress.total_out() - before_out) as usize;
                    inflater.start += used;
                    written += made;

                    match status {
                        Status::StreamEnd if written < buf.len() => {
                            bail!("deflate stream ended early")
                        }
                        Status::StreamEnd => break,
                        Status::Ok | Status::BufError => {
                            let starved = inflater.start == inflater.end
                                && state.consumed == entry.compressed_size;
                            if used == 0 && made == 0 && (starved || inflater.start < inflater.end)
                            {
                                bail!("deflate stream is truncated or corrupt");
                            }
                        }
                    }
                }
            }
        }

        state.produced += buf.len() as u64;
        state.checksum.update(buf);
        if state.produced == entry.uncompressed_size && !state.checksum.matches() {
            bail!("CRC-32 mismatch");
        }
        Ok(())
    }
}

fn read_exact_at(stream: &mut StreamBridge, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
    stream.seek(SeekFrom::Start(offset))?;
    stream.read_exact(buf)
}

impl ArchiveDecoder for ZipDecoder {
    fn parse_entry(&mut self, _stream: &mut StreamBridge) -> bool {
        self.parse_from_cursor()
    }

    fn parse_entry_at(&mut self, _stream: &mut StreamBridge, offset: i64) -> bool {
        let position = if offset == 0 {
            Some(0)
        } else {
            u64::try_from(offset)
                .ok()
                .and_then(|o| o.checked_sub(self.cd_offset))
                .filter(|&p| p <= self.cd.len() as u64)
        };
        let Some(position) = position else {
            return false;
        };
        self.cursor = position as usize;
        self.parse_from_cursor()
    }

    fn at_eof(&self) -> bool {
        self.at_eof
    }

    fn entry_name(&self) -> Option<&str> {
        self.current
            .as_ref()
            .map(|e| e.file_name.as_str())
            .filter(|n| !n.is_empty())
    }

    fn entry_size(&self) -> u64 {
        self.current.as_ref().map_or(0, |e| e.uncompressed_size)
    }

    fn entry_offset(&self) -> i64 {
        (self.cd_offset + self.cursor as u64) as i64
    }

    fn entry_uncompress(&mut self, stream: &mut StreamBridge, buf: &mut [u8]) -> bool {
        match self.uncompress(stream, buf) {
            Ok(()) => true,
            Err(e) => {
                let name = self.entry_name().unwrap_or_default().to_string();
                warn!(entry = %name, error = %e, "zip: uncompress failed");
                false
            }
        }
    }
}
