//! 7z decoder backed by `sevenz-rust2`.
//!
//! The header database is read once at open time; entries are then walked
//! by index. Offsets are entry indices, so offset `0` is the first entry.
//! Uncompressing decodes the block that holds the current entry, which for
//! solid archives means decoding every entry in front of it in that block.

use std::io::{self, Read, Seek, SeekFrom};
use std::ptr;

use sevenz_rust2::{Archive, ArchiveEntry, BlockDecoder, Password};
use tracing::{debug, warn};

use super::ArchiveDecoder;
use crate::io::StreamBridge;

pub struct SevenZipDecoder {
    archive: Archive,
    password: Password,
    next: usize,
    current: Option<usize>,
    at_eof: bool,
    data: Option<Vec<u8>>,
    progress: usize,
}

impl SevenZipDecoder {
    pub fn open(stream: &mut StreamBridge) -> Option<Self> {
        if let Err(e) = stream.seek(SeekFrom::Start(0)) {
            debug!(error = %e, "7z: cannot rewind stream");
            return None;
        }

        let password = Password::empty();
        match Archive::read(stream, &password) {
            Ok(archive) => Some(Self {
                archive,
                password,
                next: 0,
                current: None,
                at_eof: false,
                data: None,
                progress: 0,
            }),
            Err(e) => {
                debug!(error = %e, "7z: not a 7z archive");
                None
            }
        }
    }

    fn parse_from_next(&mut self) -> bool {
        self.current = None;
        self.data = None;
        self.progress = 0;
        self.at_eof = false;

        while let Some(entry) = self.archive.files.get(self.next) {
            let index = self.next;
            self.next += 1;
            if entry.is_directory {
                continue;
            }
            self.current = Some(index);
            return true;
        }

        self.at_eof = true;
        false
    }

    /// Decode the current entry in full.
    fn decode_current(&self, stream: &mut StreamBridge) -> Result<Vec<u8>, sevenz_rust2::Error> {
        let Some(index) = self.current else {
            return Err(sevenz_rust2::Error::FileNotFound);
        };
        let target: *const ArchiveEntry = &self.archive.files[index];
        if !self.archive.files[index].has_stream {
            return Ok(Vec::new());
        }

        for block_index in 0..self.archive.blocks.len() {
            let decoder =
                BlockDecoder::new(1, block_index, &self.archive, &self.password, &mut *stream);
            if !decoder.entries().iter().any(|e| ptr::eq(e, target)) {
                continue;
            }

            let mut found = None;
            decoder.for_each_entries(&mut |entry: &ArchiveEntry, reader: &mut dyn Read| {
                if ptr::eq(entry, target) {
                    let mut data = Vec::with_capacity(entry.size as usize);
                    reader.read_to_end(&mut data)?;
                    found = Some(data);
                    Ok(false)
                } else {
                    io::copy(reader, &mut io::sink())?;
                    Ok(true)
                }
            })?;
            return found.ok_or(sevenz_rust2::Error::FileNotFound);
        }

        Err(sevenz_rust2::Error::FileNotFound)
    }
}

impl ArchiveDecoder for SevenZipDecoder {
    fn parse_entry(&mut self, _stream: &mut StreamBridge) -> bool {
        self.parse_from_next()
    }

    fn parse_entry_at(&mut self, _stream: &mut StreamBridge, offset: i64) -> bool {
        match usize::try_from(offset) {
            Ok(index) if index <= self.archive.files.len() => {
                self.next = index;
                self.parse_from_next()
            }
            _ => false,
        }
    }

    fn at_eof(&self) -> bool {
        self.at_eof
    }

    fn entry_name(&self) -> Option<&str> {
        let index = self.current?;
        let name = self.archive.files[index].name.as_str();
        (!name.is_empty()).then_some(name)
    }

    fn entry_size(&self) -> u64 {
        self.current.map_or(0, |i| self.archive.files[i].size)
    }

    fn entry_offset(&self) -> i64 {
        self.next as i64
    }

    fn entry_uncompress(&mut self, stream: &mut StreamBridge, buf: &mut [u8]) -> bool {
        if self.current.is_none() {
            return false;
        }
        if self.data.is_none() {
            match self.decode_current(stream) {
                Ok(data) => self.data = Some(data),
                Err(e) => {
                    warn!(entry = ?self.entry_name(), error = %e, "7z: uncompress failed");
                    return false;
                }
            }
        }

        let Some(data) = self.data.as_ref() else {
            return false;
        };
        let end = self.progress + buf.len();
        if end > data.len() {
            warn!(
                requested = buf.len(),
                remaining = data.len() - self.progress,
                "7z: read past end of entry"
            );
            return false;
        }
        buf.copy_from_slice(&data[self.progress..end]);
        self.progress = end;
        true
    }
}
