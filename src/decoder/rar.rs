//! RAR decoder.
//!
//! Walks the block chain of RAR 1.5–4.x and RAR 5 archives. Entry data is
//! only produced for STORE entries; compressed, encrypted and multi-volume
//! entries are listed but fail to uncompress. Archives with encrypted
//! headers are rejected at open time.
//!
//! Offsets are positions of block headers in the stream.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{self, Cursor, Read, Seek, SeekFrom};

use tracing::{debug, warn};

use super::{offset_after, ArchiveDecoder, Checksum};
use crate::io::StreamBridge;

const RAR4_SIGNATURE: &[u8] = b"Rar!\x1a\x07\x00";
const RAR5_SIGNATURE: &[u8] = b"Rar!\x1a\x07\x01\x00";

/// RAR 5 headers are capped at 2 MB by the format.
const MAX_HEADER_SIZE: u64 = 2 * 1024 * 1024;

mod rar4 {
    pub const MAIN: u8 = 0x73;
    pub const FILE: u8 = 0x74;
    pub const END: u8 = 0x7b;

    pub const LONG_BLOCK: u16 = 0x8000;
    pub const MAIN_ENCRYPTED_HEADERS: u16 = 0x0080;

    pub const FILE_SPLIT_BEFORE: u16 = 0x0001;
    pub const FILE_SPLIT_AFTER: u16 = 0x0002;
    pub const FILE_ENCRYPTED: u16 = 0x0004;
    pub const FILE_DIRECTORY: u16 = 0x00e0;
    pub const FILE_LARGE: u16 = 0x0100;

    pub const METHOD_STORE: u8 = 0x30;
}

mod rar5 {
    pub const FILE: u64 = 2;
    pub const ENCRYPTION: u64 = 4;
    pub const END: u64 = 5;

    pub const HAS_EXTRA: u64 = 0x01;
    pub const HAS_DATA: u64 = 0x02;
    pub const SPLIT_BEFORE: u64 = 0x08;
    pub const SPLIT_AFTER: u64 = 0x10;

    pub const FILE_DIRECTORY: u64 = 0x01;
    pub const FILE_HAS_MTIME: u64 = 0x02;
    pub const FILE_HAS_CRC: u64 = 0x04;

    pub const EXTRA_ENCRYPTION: u64 = 0x01;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RarFormat {
    Rar4,
    Rar5,
}

#[derive(Debug, Clone)]
struct RarEntry {
    name: Option<String>,
    size: u64,
    data_offset: u64,
    directory: bool,
    stored: bool,
    encrypted: bool,
    split: bool,
    crc: Option<u32>,
}

enum BlockKind {
    File(RarEntry),
    End,
    Other,
}

struct Block {
    kind: BlockKind,
    next: u64,
}

fn crc32(data: &[u8]) -> u32 {
    let mut crc = flate2::Crc::new();
    crc.update(data);
    crc.sum()
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

fn read_exact_at(stream: &mut StreamBridge, offset: u64, buf: &mut [u8]) -> io::Result<()> {
    stream.seek(SeekFrom::Start(offset))?;
    stream.read_exact(buf)
}

/// RAR 5 variable-length integer: 7 bits per byte, low bits first.
fn read_vint<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut value = 0u64;
    for shift in (0..70).step_by(7) {
        let byte = reader.read_u8()?;
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(invalid("vint longer than 10 bytes"))
}

fn entry_name(raw: &[u8]) -> Option<String> {
    let name = String::from_utf8_lossy(raw).replace('\\', "/");
    (!name.is_empty()).then_some(name)
}

fn read_block4(stream: &mut StreamBridge, pos: u64) -> io::Result<Block> {
    let mut base = [0u8; 7];
    read_exact_at(stream, pos, &mut base)?;
    let mut cursor = Cursor::new(&base[..]);
    let head_crc = cursor.read_u16::<LittleEndian>()?;
    let head_type = cursor.read_u8()?;
    let flags = cursor.read_u16::<LittleEndian>()?;
    let head_size = u64::from(cursor.read_u16::<LittleEndian>()?);
    if head_size < 7 {
        return Err(invalid(format!("rar block at {pos} is {head_size} bytes")));
    }

    let read_header = |stream: &mut StreamBridge| -> io::Result<Vec<u8>> {
        let mut header = vec![0u8; head_size as usize];
        read_exact_at(stream, pos, &mut header)?;
        if crc32(&header[2..]) as u16 != head_crc {
            return Err(invalid(format!("rar header checksum mismatch at {pos}")));
        }
        Ok(header)
    };

    match head_type {
        rar4::FILE => {
            let header = read_header(stream)?;
            let mut c = Cursor::new(&header[7..]);
            let mut packed = u64::from(c.read_u32::<LittleEndian>()?);
            let mut size = u64::from(c.read_u32::<LittleEndian>()?);
            let _host_os = c.read_u8()?;
            let crc = c.read_u32::<LittleEndian>()?;
            let _ftime = c.read_u32::<LittleEndian>()?;
            let _unpack_version = c.read_u8()?;
            let method = c.read_u8()?;
            let name_size = c.read_u16::<LittleEndian>()? as usize;
            let _attributes = c.read_u32::<LittleEndian>()?;
            if flags & rar4::FILE_LARGE != 0 {
                packed |= u64::from(c.read_u32::<LittleEndian>()?) << 32;
                size |= u64::from(c.read_u32::<LittleEndian>()?) << 32;
            }
            let mut raw_name = vec![0u8; name_size];
            c.read_exact(&mut raw_name)?;
            // Unicode names carry an OEM name, a NUL, then a packed wide form
            if let Some(nul) = raw_name.iter().position(|&b| b == 0) {
                raw_name.truncate(nul);
            }

            let data_offset = offset_after(pos, head_size)?;
            Ok(Block {
                kind: BlockKind::File(RarEntry {
                    name: entry_name(&raw_name),
                    size,
                    data_offset,
                    directory: flags & rar4::FILE_DIRECTORY == rar4::FILE_DIRECTORY,
                    stored: method == rar4::METHOD_STORE,
                    encrypted: flags & rar4::FILE_ENCRYPTED != 0,
                    split: flags & (rar4::FILE_SPLIT_BEFORE | rar4::FILE_SPLIT_AFTER) != 0,
                    crc: Some(crc),
                }),
                next: offset_after(data_offset, packed)?,
            })
        }
        rar4::END => Ok(Block {
            kind: BlockKind::End,
            next: offset_after(pos, head_size)?,
        }),
        rar4::MAIN => {
            read_header(stream)?;
            if flags & rar4::MAIN_ENCRYPTED_HEADERS != 0 {
                return Err(invalid("rar archive has encrypted headers"));
            }
            Ok(Block {
                kind: BlockKind::Other,
                next: offset_after(pos, head_size)?,
            })
        }
        _ => {
            let add_size = if flags & rar4::LONG_BLOCK != 0 {
                let mut raw = [0u8; 4];
                read_exact_at(stream, offset_after(pos, 7)?, &mut raw)?;
                u64::from(u32::from_le_bytes(raw))
            } else {
                0
            };
            Ok(Block {
                kind: BlockKind::Other,
                next: offset_after(offset_after(pos, head_size)?, add_size)?,
            })
        }
    }
}

fn read_block5(stream: &mut StreamBridge, pos: u64) -> io::Result<Block> {
    stream.seek(SeekFrom::Start(pos))?;
    let head_crc = stream.read_u32::<LittleEndian>()?;

    // header size vint, kept raw because the CRC covers it
    let mut size_bytes = Vec::with_capacity(3);
    loop {
        let byte = stream.read_u8()?;
        size_bytes.push(byte);
        if byte & 0x80 == 0 {
            break;
        }
        if size_bytes.len() >= 3 {
            return Err(invalid(format!("rar5 header size too long at {pos}")));
        }
    }
    let head_size = read_vint(&mut size_bytes.as_slice())?;
    if head_size == 0 || head_size > MAX_HEADER_SIZE {
        return Err(invalid(format!("rar5 header of {head_size} bytes at {pos}")));
    }

    let mut header = vec![0u8; head_size as usize];
    stream.read_exact(&mut header)?;
    let mut crc = flate2::Crc::new();
    crc.update(&size_bytes);
    crc.update(&header);
    if crc.sum() != head_crc {
        return Err(invalid(format!("rar5 header checksum mismatch at {pos}")));
    }

    let mut c = Cursor::new(header.as_slice());
    let head_type = read_vint(&mut c)?;
    let flags = read_vint(&mut c)?;
    let extra_size = if flags & rar5::HAS_EXTRA != 0 {
        read_vint(&mut c)?
    } else {
        0
    };
    let data_size = if flags & rar5::HAS_DATA != 0 {
        read_vint(&mut c)?
    } else {
        0
    };

    let data_offset = offset_after(pos, 4 + size_bytes.len() as u64 + head_size)?;
    let next = offset_after(data_offset, data_size)?;

    match head_type {
        rar5::FILE => {
            let file_flags = read_vint(&mut c)?;
            let size = read_vint(&mut c)?;
            let _attributes = read_vint(&mut c)?;
            if file_flags & rar5::FILE_HAS_MTIME != 0 {
                c.read_u32::<LittleEndian>()?;
            }
            let crc = if file_flags & rar5::FILE_HAS_CRC != 0 {
                Some(c.read_u32::<LittleEndian>()?)
            } else {
                None
            };
            let compression = read_vint(&mut c)?;
            let _host_os = read_vint(&mut c)?;
            let name_len = read_vint(&mut c)? as usize;
            let mut raw_name = vec![0u8; name_len];
            c.read_exact(&mut raw_name)?;

            let extra_start = head_size.saturating_sub(extra_size) as usize;
            let encrypted = has_encryption_record(&header[extra_start.min(header.len())..])?;

            Ok(Block {
                kind: BlockKind::File(RarEntry {
                    name: entry_name(&raw_name),
                    size,
                    data_offset,
                    directory: file_flags & rar5::FILE_DIRECTORY != 0,
                    stored: (compression >> 7) & 0x07 == 0,
                    encrypted,
                    split: flags & (rar5::SPLIT_BEFORE | rar5::SPLIT_AFTER) != 0,
                    crc,
                }),
                next,
            })
        }
        rar5::END => Ok(Block {
            kind: BlockKind::End,
            next,
        }),
        rar5::ENCRYPTION => Err(invalid("rar archive has encrypted headers")),
        _ => Ok(Block {
            kind: BlockKind::Other,
            next,
        }),
    }
}

/// Scan a RAR 5 extra area for a file encryption record.
fn has_encryption_record(extra: &[u8]) -> io::Result<bool> {
    let mut c = Cursor::new(extra);
    while (c.position() as usize) < extra.len() {
        let size = read_vint(&mut c)?;
        let record_start = c.position();
        let record_type = read_vint(&mut c)?;
        if record_type == rar5::EXTRA_ENCRYPTION {
            return Ok(true);
        }
        c.set_position(offset_after(record_start, size)?);
    }
    Ok(false)
}

/// Forward-only RAR decoder.
pub struct RarDecoder {
    format: RarFormat,
    first_header: u64,
    next_header: u64,
    current: Option<RarEntry>,
    at_eof: bool,
    progress: u64,
    checksum: Checksum,
}

impl RarDecoder {
    pub fn open(stream: &mut StreamBridge) -> Option<Self> {
        let mut sig = [0u8; 8];
        if !stream.peek_at(0, &mut sig).unwrap_or(false) {
            return None;
        }
        let (format, first_header) = if sig.starts_with(RAR5_SIGNATURE) {
            (RarFormat::Rar5, RAR5_SIGNATURE.len() as u64)
        } else if sig.starts_with(RAR4_SIGNATURE) {
            (RarFormat::Rar4, RAR4_SIGNATURE.len() as u64)
        } else {
            return None;
        };

        let decoder = Self {
            format,
            first_header,
            next_header: first_header,
            current: None,
            at_eof: false,
            progress: 0,
            checksum: Checksum::new(None),
        };
        // the main header must be readable
        if let Err(e) = decoder.read_block(stream, first_header) {
            debug!(?format, error = %e, "rar: unusable archive header");
            return None;
        }
        Some(decoder)
    }

    fn read_block(&self, stream: &mut StreamBridge, pos: u64) -> io::Result<Block> {
        match self.format {
            RarFormat::Rar4 => read_block4(stream, pos),
            RarFormat::Rar5 => read_block5(stream, pos),
        }
    }

    fn parse_from_next(&mut self, stream: &mut StreamBridge) -> bool {
        self.current = None;
        self.progress = 0;
        self.at_eof = false;

        loop {
            let pos = self.next_header;
            // archives written without an end block just stop
            if pos >= stream.len() {
                self.at_eof = true;
                return false;
            }

            let block = match self.read_block(stream, pos) {
                Ok(block) => block,
                Err(e) => {
                    warn!(offset = pos, error = %e, "rar: failed to parse block");
                    return false;
                }
            };
            if block.next <= pos {
                warn!(offset = pos, next = block.next, "rar: block chain does not advance");
                return false;
            }
            self.next_header = block.next;

            match block.kind {
                BlockKind::End => {
                    self.at_eof = true;
                    return false;
                }
                BlockKind::File(entry) if !entry.directory => {
                    self.checksum = Checksum::new(entry.crc);
                    self.current = Some(entry);
                    return true;
                }
                BlockKind::File(_) | BlockKind::Other => {}
            }
        }
    }
}

impl ArchiveDecoder for RarDecoder {
    fn parse_entry(&mut self, stream: &mut StreamBridge) -> bool {
        self.parse_from_next(stream)
    }

    fn parse_entry_at(&mut self, stream: &mut StreamBridge, offset: i64) -> bool {
        let Ok(offset) = u64::try_from(offset) else {
            return false;
        };
        self.next_header = if offset == 0 {
            self.first_header
        } else {
            offset
        };
        self.parse_from_next(stream)
    }

    fn at_eof(&self) -> bool {
        self.at_eof
    }

    fn entry_name(&self) -> Option<&str> {
        self.current.as_ref()?.name.as_deref()
    }

    fn entry_size(&self) -> u64 {
        self.current.as_ref().map_or(0, |e| e.size)
    }

    fn entry_offset(&self) -> i64 {
        self.next_header as i64
    }

    fn entry_uncompress(&mut self, stream: &mut StreamBridge, buf: &mut [u8]) -> bool {
        let Some(entry) = &self.current else {
            return false;
        };
        let reason = if entry.encrypted {
            Some("entry is encrypted")
        } else if entry.split {
            Some("entry spans multiple volumes")
        } else if !entry.stored {
            Some("only stored entries can be extracted")
        } else if self.progress.saturating_add(buf.len() as u64) > entry.size {
            Some("read past end of entry")
        } else {
            None
        };
        if let Some(reason) = reason {
            warn!(entry = ?entry.name, reason, "rar: uncompress failed");
            return false;
        }

        let read = offset_after(entry.data_offset, self.progress)
            .and_then(|at| read_exact_at(stream, at, buf));
        if let Err(e) = read {
            warn!(entry = ?entry.name, error = %e, "rar: entry data truncated");
            return false;
        }
        self.progress += buf.len() as u64;
        self.checksum.update(buf);
        if self.progress == entry.size && !self.checksum.matches() {
            warn!(entry = ?entry.name, "rar: CRC-32 mismatch");
            return false;
        }
        true
    }
}
