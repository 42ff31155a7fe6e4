//! Scripted decoder library for exercising the archive layer.
//!
//! Handles record their release in a shared event log: the decoder pushes
//! `"archive"` when dropped, the byte source pushes `"stream"`, and every
//! successful open pushes `"open"`.

#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use runarc::{ArchiveDecoder, ContainerKind, DecoderLibrary, MemoryReader, ReadAt, StreamBridge};

pub type EventLog = Arc<Mutex<Vec<&'static str>>>;

const TOKEN_BASE: i64 = 4096;
const TOKEN_STRIDE: i64 = 48;

pub fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn recorded(log: &EventLog) -> Vec<&'static str> {
    log.lock().unwrap().clone()
}

pub fn count(log: &EventLog, event: &str) -> usize {
    log.lock().unwrap().iter().filter(|e| **e == event).count()
}

#[derive(Debug, Clone)]
pub struct ScriptedEntry {
    pub name: Option<String>,
    pub data: Vec<u8>,
    pub fail_extract: bool,
}

impl ScriptedEntry {
    pub fn named(name: &str, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: Some(name.to_string()),
            data: data.into(),
            fail_extract: false,
        }
    }

    pub fn unnamed(data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: None,
            data: data.into(),
            fail_extract: false,
        }
    }

    pub fn failing(name: &str, data: impl Into<Vec<u8>>) -> Self {
        Self {
            fail_extract: true,
            ..Self::named(name, data)
        }
    }
}

/// The three-entry archive used across the session tests.
pub fn sample_entries() -> Vec<ScriptedEntry> {
    vec![
        ScriptedEntry::named("a.txt", &b"hello"[..]),
        ScriptedEntry::named("dir/b.bin", Vec::new()),
        ScriptedEntry::named("c.dat", (0..128u8).collect::<Vec<_>>()),
    ]
}

#[derive(Default)]
struct Faults {
    /// `parse_entry_at` fails for every token.
    desync: AtomicBool,
    /// `parse_entry_at` lands one entry too far.
    shift: AtomicBool,
}

/// Decoder library that serves a fixed list of entries for any stream.
pub struct ScriptedLibrary {
    entries: Arc<Vec<ScriptedEntry>>,
    accepts: Vec<ContainerKind>,
    parse_error_at: Option<usize>,
    events: EventLog,
    attempts: Mutex<Vec<ContainerKind>>,
    faults: Arc<Faults>,
}

impl ScriptedLibrary {
    pub fn new(entries: Vec<ScriptedEntry>, events: &EventLog) -> Self {
        Self {
            entries: Arc::new(entries),
            accepts: ContainerKind::ALL.to_vec(),
            parse_error_at: None,
            events: Arc::clone(events),
            attempts: Mutex::new(Vec::new()),
            faults: Arc::default(),
        }
    }

    /// Only open streams as one of `kinds`.
    pub fn accepting(mut self, kinds: &[ContainerKind]) -> Self {
        self.accepts = kinds.to_vec();
        self
    }

    /// Fail (without reaching end of archive) when parsing entry `index`.
    pub fn with_parse_error_at(mut self, index: usize) -> Self {
        self.parse_error_at = Some(index);
        self
    }

    /// Kinds the archive layer asked this library to open, in order.
    pub fn attempts(&self) -> Vec<ContainerKind> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn desync_tokens(&self) {
        self.faults.desync.store(true, Ordering::SeqCst);
    }

    pub fn shift_tokens(&self) {
        self.faults.shift.store(true, Ordering::SeqCst);
    }

    fn open(&self, kind: ContainerKind) -> Option<Box<dyn ArchiveDecoder>> {
        self.attempts.lock().unwrap().push(kind);
        if !self.accepts.contains(&kind) {
            return None;
        }
        self.events.lock().unwrap().push("open");
        Some(Box::new(ScriptedDecoder {
            entries: Arc::clone(&self.entries),
            parse_error_at: self.parse_error_at,
            events: Arc::clone(&self.events),
            faults: Arc::clone(&self.faults),
            next: 0,
            current: None,
            at_eof: false,
            progress: 0,
        }))
    }
}

impl DecoderLibrary for ScriptedLibrary {
    fn open_7z_archive(&self, _stream: &mut StreamBridge) -> Option<Box<dyn ArchiveDecoder>> {
        self.open(ContainerKind::SevenZip)
    }

    fn open_rar_archive(&self, _stream: &mut StreamBridge) -> Option<Box<dyn ArchiveDecoder>> {
        self.open(ContainerKind::Rar)
    }

    fn open_tar_archive(&self, _stream: &mut StreamBridge) -> Option<Box<dyn ArchiveDecoder>> {
        self.open(ContainerKind::Tar)
    }

    fn open_zip_archive(&self, _stream: &mut StreamBridge) -> Option<Box<dyn ArchiveDecoder>> {
        self.open(ContainerKind::Zip)
    }
}

struct ScriptedDecoder {
    entries: Arc<Vec<ScriptedEntry>>,
    parse_error_at: Option<usize>,
    events: EventLog,
    faults: Arc<Faults>,
    next: usize,
    current: Option<usize>,
    at_eof: bool,
    progress: usize,
}

impl ScriptedDecoder {
    fn advance(&mut self) -> bool {
        self.current = None;
        self.progress = 0;
        self.at_eof = false;

        if self.parse_error_at == Some(self.next) {
            return false;
        }
        if self.next >= self.entries.len() {
            self.at_eof = true;
            return false;
        }
        self.current = Some(self.next);
        self.next += 1;
        true
    }
}

impl ArchiveDecoder for ScriptedDecoder {
    fn parse_entry(&mut self, _stream: &mut StreamBridge) -> bool {
        self.advance()
    }

    fn parse_entry_at(&mut self, _stream: &mut StreamBridge, offset: i64) -> bool {
        if self.faults.desync.load(Ordering::SeqCst) {
            return false;
        }
        let index = if offset == 0 {
            0
        } else if offset >= TOKEN_BASE && (offset - TOKEN_BASE) % TOKEN_STRIDE == 0 {
            ((offset - TOKEN_BASE) / TOKEN_STRIDE) as usize
        } else {
            return false;
        };
        let shift = usize::from(self.faults.shift.load(Ordering::SeqCst));
        self.next = index + shift;
        self.advance()
    }

    fn at_eof(&self) -> bool {
        self.at_eof
    }

    fn entry_name(&self) -> Option<&str> {
        self.entries[self.current?].name.as_deref()
    }

    fn entry_size(&self) -> u64 {
        self.current
            .map_or(0, |i| self.entries[i].data.len() as u64)
    }

    fn entry_offset(&self) -> i64 {
        TOKEN_BASE + self.next as i64 * TOKEN_STRIDE
    }

    fn entry_uncompress(&mut self, _stream: &mut StreamBridge, buf: &mut [u8]) -> bool {
        let Some(entry) = self.current.map(|i| &self.entries[i]) else {
            return false;
        };
        let end = self.progress + buf.len();
        if entry.fail_extract || end > entry.data.len() {
            return false;
        }
        buf.copy_from_slice(&entry.data[self.progress..end]);
        self.progress = end;
        true
    }
}

impl Drop for ScriptedDecoder {
    fn drop(&mut self) {
        self.events.lock().unwrap().push("archive");
    }
}

/// Byte source that logs `"stream"` when the last handle to it goes away.
pub struct TrackedSource {
    inner: MemoryReader,
    events: EventLog,
}

impl ReadAt for TrackedSource {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read_at(offset, buf)
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }
}

impl Drop for TrackedSource {
    fn drop(&mut self) {
        self.events.lock().unwrap().push("stream");
    }
}

pub fn tracked_source(data: impl Into<Vec<u8>>, events: &EventLog) -> Arc<dyn ReadAt> {
    Arc::new(TrackedSource {
        inner: MemoryReader::new(data),
        events: Arc::clone(events),
    })
}

/// 1 KiB of zeros with the ustar marker where a TAR header keeps it.
pub fn ustar_marked() -> Vec<u8> {
    let mut data = vec![0u8; 1024];
    data[0x101..0x106].copy_from_slice(b"ustar");
    data
}
