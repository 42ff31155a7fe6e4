//! TAR decoder.
//!
//! Walks 512-byte headers front to back. Supports POSIX ustar, GNU long
//! names (`L`) and PAX extended headers (`x`, for `path` and `size`).
//! Directories, links and other special members are stepped over and never
//! become the current entry.

use std::collections::HashMap;
use std::io::{self, Read, Seek, SeekFrom};

use tracing::{debug, warn};

use super::{offset_after, ArchiveDecoder};
use crate::io::StreamBridge;

/// TAR block size.
const BLOCK_SIZE: u64 = 512;

/// GNU LongName typeflag.
const GNU_LONGNAME: u8 = b'L';

/// PAX typeflag for extended header (applies to next member only).
const PAX_HEADER: u8 = b'x';

/// Longest GNU long name / PAX block we are willing to buffer.
const MAX_META_SIZE: u64 = 1 << 20;

#[derive(Debug, Clone)]
struct Header {
    name: String,
    size: u64,
    typeflag: u8,
}

impl Header {
    /// Parse a non-zero header block, validating its checksum.
    fn parse(block: &[u8; BLOCK_SIZE as usize]) -> Option<Self> {
        let stored = parse_octal(&block[148..156])?;
        if !checksum_matches(block, stored) {
            return None;
        }

        let name = parse_string(&block[0..100]);
        // POSIX ustar only; GNU headers keep atime/ctime where the prefix would be
        let name = if &block[257..263] == b"ustar\0" {
            let prefix = parse_string(&block[345..500]);
            if prefix.is_empty() {
                name
            } else {
                format!("{prefix}/{name}")
            }
        } else {
            name
        };

        Some(Self {
            name,
            size: parse_numeric(&block[124..136])?,
            typeflag: block[156],
        })
    }

    fn is_regular(&self) -> bool {
        matches!(self.typeflag, b'0' | 0 | b'7')
    }
}

fn parse_string(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).into_owned()
}

fn parse_octal(data: &[u8]) -> Option<u64> {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    let text = std::str::from_utf8(&data[..end]).ok()?.trim();
    if text.is_empty() {
        return Some(0);
    }
    u64::from_str_radix(text, 8).ok()
}

/// Octal, or GNU base-256 when the high bit of the first byte is set.
fn parse_numeric(data: &[u8]) -> Option<u64> {
    if data[0] & 0x80 == 0 {
        return parse_octal(data);
    }
    let mut value: u64 = u64::from(data[0] & 0x7f);
    for &b in &data[1..] {
        value = value.checked_mul(256)?.checked_add(u64::from(b))?;
    }
    Some(value)
}

fn checksum_matches(block: &[u8; BLOCK_SIZE as usize], stored: u64) -> bool {
    let mut unsigned: u64 = 0;
    let mut signed: i64 = 0;
    for (i, &b) in block.iter().enumerate() {
        let b = if (148..156).contains(&i) { b' ' } else { b };
        unsigned += u64::from(b);
        signed += i64::from(b as i8);
    }
    unsigned == stored || signed == stored as i64
}

fn is_zero_block(block: &[u8]) -> bool {
    block.iter().all(|&b| b == 0)
}

/// Position of the header following a member whose data starts at
/// `data_offset`. Always strictly past the member's own header.
fn next_header_after(data_offset: u64, size: u64) -> io::Result<u64> {
    let padded = size
        .div_ceil(BLOCK_SIZE)
        .checked_mul(BLOCK_SIZE)
        .unwrap_or(u64::MAX);
    offset_after(data_offset, padded)
}

/// Parse PAX records: `"<len> <key>=<value>\n"` repeated.
fn parse_pax(data: &[u8]) -> HashMap<String, String> {
    let mut attrs = HashMap::new();
    let mut pos = 0;

    while pos < data.len() {
        let Some(space) = data[pos..].iter().position(|&b| b == b' ') else {
            break;
        };
        let space = pos + space;
        let Some(len) = std::str::from_utf8(&data[pos..space])
            .ok()
            .and_then(|s| s.trim().parse::<usize>().ok())
        else {
            break;
        };
        if len == 0 || pos + len > data.len() {
            break;
        }

        let end = pos + len;
        let value_end = if data[end - 1] == b'\n' { end - 1 } else { end };
        let record = &data[space + 1..value_end];
        if let Some(eq) = record.iter().position(|&b| b == b'=') {
            attrs.insert(
                String::from_utf8_lossy(&record[..eq]).into_owned(),
                String::from_utf8_lossy(&record[eq + 1..]).into_owned(),
            );
        }
        pos = end;
    }

    attrs
}

#[derive(Debug, Clone)]
struct TarEntry {
    name: Option<String>,
    size: u64,
    data_offset: u64,
}

/// Forward-only TAR decoder. Offsets are header positions in the stream.
#[derive(Debug)]
pub struct TarDecoder {
    next_header: u64,
    current: Option<TarEntry>,
    at_eof: bool,
    progress: u64,
}

impl TarDecoder {
    /// Accept the stream if its first block is a valid TAR header.
    pub fn open(stream: &mut StreamBridge) -> Option<Self> {
        let mut block = [0u8; BLOCK_SIZE as usize];
        match read_block(stream, 0, &mut block) {
            Ok(true) => {}
            Ok(false) => return None,
            Err(e) => {
                debug!(error = %e, "tar: failed to read first header");
                return None;
            }
        }
        if is_zero_block(&block) || Header::parse(&block).is_none() {
            debug!("tar: first block is not a valid header");
            return None;
        }

        Some(Self {
            next_header: 0,
            current: None,
            at_eof: false,
            progress: 0,
        })
    }

    fn parse_from_next(&mut self, stream: &mut StreamBridge) -> bool {
        self.current = None;
        self.progress = 0;
        self.at_eof = false;

        match self.walk(stream) {
            Ok(found) => found,
            Err(e) => {
                warn!(offset = self.next_header, error = %e, "tar: failed to parse entry");
                false
            }
        }
    }

    fn walk(&mut self, stream: &mut StreamBridge) -> io::Result<bool> {
        let mut long_name: Option<String> = None;
        let mut pax: HashMap<String, String> = HashMap::new();

        loop {
            let pos = self.next_header;
            let mut block = [0u8; BLOCK_SIZE as usize];

            // A missing trailer is common; running out of data between
            // members is a regular end.
            if !read_block(stream, pos, &mut block)? || is_zero_block(&block) {
                self.at_eof = true;
                return Ok(false);
            }

            let Some(mut header) = Header::parse(&block) else {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("invalid tar header at {pos}"),
                ));
            };
            if let Some(size) = pax.get("size").and_then(|s| s.parse().ok()) {
                header.size = size;
            }

            let data_offset = offset_after(pos, BLOCK_SIZE)?;
            self.next_header = next_header_after(data_offset, header.size)?;

            match header.typeflag {
                GNU_LONGNAME => {
                    let data = read_meta(stream, data_offset, header.size)?;
                    long_name = Some(parse_string(&data));
                }
                PAX_HEADER => {
                    let data = read_meta(stream, data_offset, header.size)?;
                    pax = parse_pax(&data);
                }
                _ if header.is_regular() => {
                    let name = pax
                        .remove("path")
                        .or_else(|| long_name.take())
                        .unwrap_or(header.name);
                    self.current = Some(TarEntry {
                        name: (!name.is_empty()).then_some(name),
                        size: header.size,
                        data_offset,
                    });
                    return Ok(true);
                }
                _ => {
                    // metadata belongs to the member it precedes
                    long_name = None;
                    pax.clear();
                }
            }
        }
    }
}

/// Read one block at `pos`. `Ok(false)` when the stream ends exactly there.
fn read_block(
    stream: &mut StreamBridge,
    pos: u64,
    block: &mut [u8; BLOCK_SIZE as usize],
) -> io::Result<bool> {
    if pos >= stream.len() {
        return Ok(false);
    }
    stream.seek(SeekFrom::Start(pos))?;
    stream.read_exact(block)?;
    Ok(true)
}

fn read_meta(stream: &mut StreamBridge, offset: u64, size: u64) -> io::Result<Vec<u8>> {
    if size > MAX_META_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("tar metadata member of {size} bytes"),
        ));
    }
    let mut data = vec![0u8; size as usize];
    stream.seek(SeekFrom::Start(offset))?;
    stream.read_exact(&mut data)?;
    Ok(data)
}

impl ArchiveDecoder for TarDecoder {
    fn parse_entry(&mut self, stream: &mut StreamBridge) -> bool {
        self.parse_from_next(stream)
    }

    fn parse_entry_at(&mut self, stream: &mut StreamBridge, offset: i64) -> bool {
        let Ok(offset) = u64::try_from(offset) else {
            return false;
        };
        self.next_header = offset;
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
        if self.progress + buf.len() as u64 > entry.size {
            warn!(
                requested = buf.len(),
                remaining = entry.size - self.progress,
                "tar: read past end of entry"
            );
            return false;
        }

        let result = stream
            .seek(SeekFrom::Start(entry.data_offset + self.progress))
            .and_then(|_| stream.read_exact(buf));
        match result {
            Ok(()) => {
                self.progress += buf.len() as u64;
                true
            }
            Err(e) => {
                warn!(error = %e, "tar: entry data truncated");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryReader;
    use std::sync::Arc;

    fn build(members: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = ::tar::Builder::new(Vec::new());
        for (name, data) in members {
            let mut header = ::tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn stream(data: Vec<u8>) -> StreamBridge {
        StreamBridge::new(Arc::new(MemoryReader::new(data)))
    }

    #[test]
    fn parse_numeric_octal_and_base256() {
        assert_eq!(parse_numeric(b"00000000012\0"), Some(10));
        assert_eq!(parse_numeric(b"           \0"), Some(0));
        let mut binary = [0u8; 12];
        binary[0] = 0x80;
        binary[10] = 0x01;
        binary[11] = 0x00;
        assert_eq!(parse_numeric(&binary), Some(256));
    }

    #[test]
    fn pax_records() {
        let attrs = parse_pax(b"27 path=some/long/name.txt\n11 size=42\n");
        assert_eq!(attrs.get("path").map(String::as_str), Some("some/long/name.txt"));
        assert_eq!(attrs.get("size").map(String::as_str), Some("42"));
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        let mut data = build(&[("a.txt", b"hello")]);
        data[0] ^= 0xff;
        assert!(TarDecoder::open(&mut stream(data)).is_none());
    }

    #[test]
    fn oversized_member_is_an_error_not_a_loop() {
        for size in [u64::MAX - 511, u64::MAX] {
            let mut header = ::tar::Header::new_gnu();
            header.set_path("huge.bin").unwrap();
            header.set_size(size);
            header.set_mode(0o644);
            header.set_cksum();
            let mut data = header.as_bytes().to_vec();
            data.extend_from_slice(&[0u8; 1024]);

            let mut s = stream(data);
            let mut decoder = TarDecoder::open(&mut s).unwrap();
            assert!(!decoder.parse_entry(&mut s));
            assert!(!decoder.at_eof());
        }
    }

    #[test]
    fn walks_entries_and_reports_eof() {
        let mut s = stream(build(&[("a.txt", b"hello"), ("b.txt", b"")]));
        let mut decoder = TarDecoder::open(&mut s).unwrap();

        assert!(decoder.parse_entry(&mut s));
        assert_eq!(decoder.entry_name(), Some("a.txt"));
        assert_eq!(decoder.entry_size(), 5);
        assert_eq!(decoder.entry_offset(), 1024);

        assert!(decoder.parse_entry(&mut s));
        assert_eq!(decoder.entry_name(), Some("b.txt"));
        assert_eq!(decoder.entry_size(), 0);

        assert!(!decoder.parse_entry(&mut s));
        assert!(decoder.at_eof());
    }

    #[test]
    fn long_names_and_directories() {
        let long = format!("{}/file.bin", "nested".repeat(30));
        let mut builder = ::tar::Builder::new(Vec::new());

        let mut dir = ::tar::Header::new_gnu();
        dir.set_entry_type(::tar::EntryType::Directory);
        dir.set_size(0);
        dir.set_mode(0o755);
        builder.append_data(&mut dir, "nested/", &b""[..]).unwrap();

        let mut file = ::tar::Header::new_gnu();
        file.set_size(3);
        file.set_mode(0o644);
        builder.append_data(&mut file, &long, &b"abc"[..]).unwrap();
        let data = builder.into_inner().unwrap();

        let mut s = stream(data);
        let mut decoder = TarDecoder::open(&mut s).unwrap();
        assert!(decoder.parse_entry(&mut s));
        assert_eq!(decoder.entry_name(), Some(long.as_str()));

        let mut buf = [0u8; 3];
        assert!(decoder.entry_uncompress(&mut s, &mut buf));
        assert_eq!(&buf, b"abc");
        assert!(!decoder.entry_uncompress(&mut s, &mut buf));
    }

    #[test]
    fn offset_of_entry_replays_the_next_one() {
        let mut s = stream(build(&[("a", b"1"), ("b", b"22"), ("c", b"333")]));
        let mut decoder = TarDecoder::open(&mut s).unwrap();

        assert!(decoder.parse_entry(&mut s));
        let after_a = decoder.entry_offset();
        assert!(decoder.parse_entry(&mut s));
        assert!(decoder.parse_entry(&mut s));

        assert!(decoder.parse_entry_at(&mut s, after_a));
        assert_eq!(decoder.entry_name(), Some("b"));
        assert!(decoder.parse_entry_at(&mut s, 0));
        assert_eq!(decoder.entry_name(), Some("a"));
    }

    #[test]
    fn uncompress_in_slices() {
        let mut s = stream(build(&[("a", b"abcdef")]));
        let mut decoder = TarDecoder::open(&mut s).unwrap();
        assert!(decoder.parse_entry(&mut s));

        let mut head = [0u8; 2];
        let mut tail = [0u8; 4];
        assert!(decoder.entry_uncompress(&mut s, &mut head));
        assert!(decoder.entry_uncompress(&mut s, &mut tail));
        assert_eq!(&head, b"ab");
        assert_eq!(&tail, b"cdef");
    }
}
