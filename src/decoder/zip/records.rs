//! ZIP directory records.
//!
//! Only the records needed to walk the Central Directory and locate entry
//! data are modelled: EOCD, ZIP64 locator and EOCD, Central Directory File
//! Header and the fixed part of the Local File Header.

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};

use anyhow::{bail, Result};

use crate::decoder::offset_after;

/// How an entry's payload is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl From<u16> for CompressionMethod {
    fn from(code: u16) -> Self {
        match code {
            0 => Self::Stored,
            8 => Self::Deflate,
            other => Self::Unknown(other),
        }
    }
}

/// End of Central Directory (EOCD) - 22 bytes minimum
pub struct EndOfCentralDirectory {
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            bail!("Invalid End of Central Directory");
        }

        // skip disk number and disk holding the CD
        let mut cursor = Cursor::new(&data[8..]);

        Ok(Self {
            disk_entries: cursor.read_u16::<LittleEndian>()?,
            total_entries: cursor.read_u16::<LittleEndian>()?,
            cd_size: cursor.read_u32::<LittleEndian>()?,
            cd_offset: cursor.read_u32::<LittleEndian>()?,
            comment_len: cursor.read_u16::<LittleEndian>()?,
        })
    }

    pub fn is_zip64(&self) -> bool {
        self.disk_entries == 0xFFFF
            || self.total_entries == 0xFFFF
            || self.cd_size == 0xFFFFFFFF
            || self.cd_offset == 0xFFFFFFFF
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes
pub struct Zip64Locator {
    pub eocd64_offset: u64,
}

impl Zip64Locator {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x07";
    pub const SIZE: usize = 20;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            bail!("Invalid ZIP64 locator");
        }

        let mut cursor = Cursor::new(&data[8..]);
        Ok(Self {
            eocd64_offset: cursor.read_u64::<LittleEndian>()?,
        })
    }
}

/// ZIP64 End of Central Directory - 56 bytes minimum
pub struct Zip64EndOfCentralDirectory {
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x06";
    pub const MIN_SIZE: usize = 56;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::MIN_SIZE || &data[0..4] != Self::SIGNATURE {
            bail!("Invalid ZIP64 End of Central Directory");
        }

        // record size, versions and disk numbers precede the counts
        let mut cursor = Cursor::new(&data[32..]);
        Ok(Self {
            total_entries: cursor.read_u64::<LittleEndian>()?,
            cd_size: cursor.read_u64::<LittleEndian>()?,
            cd_offset: cursor.read_u64::<LittleEndian>()?,
        })
    }
}

pub const CDFH_SIGNATURE: &[u8] = b"PK\x01\x02";
const CDFH_FIXED: usize = 46;

pub const LFH_SIGNATURE: &[u8] = b"PK\x03\x04";
pub const LFH_SIZE: usize = 30;

const FLAG_ENCRYPTED: u16 = 0x0001;
const ZIP64_EXTRA_ID: u16 = 0x0001;
const SATURATED: u32 = u32::MAX;

/// One Central Directory entry.
#[derive(Debug, Clone)]
pub struct CentralEntry {
    pub file_name: String,
    pub flags: u16,
    pub method: CompressionMethod,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub crc32: u32,
    pub lfh_offset: u64,
}

impl CentralEntry {
    /// Parse the header at the cursor and leave the cursor on the next one.
    pub fn parse(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let mut head = [0u8; CDFH_FIXED];
        cursor.read_exact(&mut head)?;
        if &head[..4] != CDFH_SIGNATURE {
            bail!("Invalid Central Directory File Header");
        }

        let name_len = LittleEndian::read_u16(&head[28..]) as usize;
        let extra_len = LittleEndian::read_u16(&head[30..]) as usize;
        let comment_len = LittleEndian::read_u16(&head[32..]) as u64;

        let mut name = vec![0u8; name_len];
        cursor.read_exact(&mut name)?;
        let mut extra = vec![0u8; extra_len];
        cursor.read_exact(&mut extra)?;

        let skip_to = cursor.position() + comment_len;
        if skip_to > cursor.get_ref().len() as u64 {
            bail!("Central Directory File Header overruns the directory");
        }
        cursor.set_position(skip_to);

        let mut entry = Self {
            file_name: String::from_utf8_lossy(&name).into_owned(),
            flags: LittleEndian::read_u16(&head[8..]),
            method: LittleEndian::read_u16(&head[10..]).into(),
            crc32: LittleEndian::read_u32(&head[16..]),
            compressed_size: LittleEndian::read_u32(&head[20..]).into(),
            uncompressed_size: LittleEndian::read_u32(&head[24..]).into(),
            lfh_offset: LittleEndian::read_u32(&head[42..]).into(),
        };
        entry.apply_zip64_extra(&extra);
        Ok(entry)
    }

    /// Replace saturated 32-bit fields with their 64-bit values. The extra
    /// block lists only the saturated ones, in a fixed order.
    fn apply_zip64_extra(&mut self, mut extra: &[u8]) {
        while extra.len() >= 4 {
            let id = LittleEndian::read_u16(extra);
            let len = (LittleEndian::read_u16(&extra[2..]) as usize).min(extra.len() - 4);
            let mut body = &extra[4..4 + len];
            extra = &extra[4 + len..];
            if id != ZIP64_EXTRA_ID {
                continue;
            }

            for field in [
                &mut self.uncompressed_size,
                &mut self.compressed_size,
                &mut self.lfh_offset,
            ] {
                if *field == u64::from(SATURATED) && body.len() >= 8 {
                    *field = LittleEndian::read_u64(body);
                    body = &body[8..];
                }
            }
        }
    }

    pub fn is_directory(&self) -> bool {
        self.file_name.ends_with('/')
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }
}

/// Where the entry's payload starts, from its raw Local File Header. The
/// local name and extra lengths may differ from the Central Directory's.
pub fn data_offset(entry: &CentralEntry, lfh: &[u8; LFH_SIZE]) -> Result<u64> {
    if &lfh[..4] != LFH_SIGNATURE {
        bail!("Invalid Local File Header");
    }
    let name_len = u64::from(LittleEndian::read_u16(&lfh[26..]));
    let extra_len = u64::from(LittleEndian::read_u16(&lfh[28..]));
    let header_len = LFH_SIZE as u64 + name_len + extra_len;
    let start = offset_after(entry.lfh_offset, header_len)?;
    // the payload itself must also be addressable
    offset_after(start, entry.compressed_size)?;
    Ok(start)
}
