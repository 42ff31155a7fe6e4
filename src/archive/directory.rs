//! Directory indexing: one forward scan over a freshly opened session.

use std::path::Path;
use std::slice;

use tracing::debug;

use super::selector::ContainerKind;
use super::session::{ArchiveSession, ParseStatus};
use crate::error::{Error, Result};

/// Opaque decoder position, valid only as input to
/// [`ArchiveSession::parse_at`] on the session that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResumeToken(i64);

impl ResumeToken {
    /// Restart from the first entry.
    pub const START: ResumeToken = ResumeToken(0);

    pub(crate) fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    pub(crate) fn raw(self) -> i64 {
        self.0
    }
}

/// Coarse content classification guessed from the entry name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Image,
    Audio,
    Video,
    Script,
    Archive,
    Other,
}

impl EntryKind {
    pub fn from_name(name: &str) -> Self {
        let Some(ext) = Path::new(name).extension().and_then(|e| e.to_str()) else {
            return EntryKind::Other;
        };
        match ext.to_ascii_lowercase().as_str() {
            "png" | "jpg" | "jpeg" | "gif" | "bmp" | "webp" | "tga" | "tif" | "tiff" | "jxl"
            | "avif" | "ico" | "psd" => EntryKind::Image,
            "wav" | "ogg" | "mp3" | "flac" | "opus" | "m4a" | "aac" | "wma" => EntryKind::Audio,
            "mp4" | "mkv" | "avi" | "webm" | "mov" | "wmv" | "mpg" | "mpeg" => EntryKind::Video,
            "txt" | "ks" | "lua" | "js" | "json" | "xml" | "ini" | "csv" | "scr" => {
                EntryKind::Script
            }
            "zip" | "7z" | "rar" | "tar" | "cbz" | "cbr" | "cb7" | "cbt" => EntryKind::Archive,
            _ => EntryKind::Other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntryKind::Image => "image",
            EntryKind::Audio => "audio",
            EntryKind::Video => "video",
            EntryKind::Script => "script",
            EntryKind::Archive => "archive",
            EntryKind::Other => "other",
        }
    }
}

/// One named entry found by the scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRecord {
    name: String,
    size: u64,
    kind: EntryKind,
    pub(crate) token: ResumeToken,
    pub(crate) origin: u64,
}

impl EntryRecord {
    /// Entry path as stored in the archive; may contain `/` separators.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Uncompressed size reported while scanning.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Content category guessed from the file extension.
    pub fn kind(&self) -> EntryKind {
        self.kind
    }
}

/// Entries of one archive in scan order. Names may repeat.
#[derive(Debug, Clone, Default)]
pub struct Directory {
    entries: Vec<EntryRecord>,
    skipped: usize,
}

impl Directory {
    /// Number of listed entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry at `index` in scan order.
    pub fn get(&self, index: usize) -> Option<&EntryRecord> {
        self.entries.get(index)
    }

    /// Iterate entries in scan order.
    pub fn iter(&self) -> slice::Iter<'_, EntryRecord> {
        self.entries.iter()
    }

    /// First entry with exactly this name.
    pub fn find(&self, name: &str) -> Option<&EntryRecord> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Number of entries dropped because they had no usable name.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Sum of the declared sizes.
    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }
}

impl<'a> IntoIterator for &'a Directory {
    type Item = &'a EntryRecord;
    type IntoIter = slice::Iter<'a, EntryRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Walk `session` from its first entry to the end of the archive.
///
/// The decoder reports the position of the entry *after* the current one,
/// so each record is stamped with the position captured after its
/// predecessor (the first with [`ResumeToken::START`]). Skipped entries
/// still advance that position.
///
/// A parse error or an archive without named entries is a
/// [`Error::FormatMismatch`]: the input is not usable as `kind`.
pub(crate) fn scan(session: &mut ArchiveSession, origin: u64) -> Result<Directory> {
    let kind: ContainerKind = session.kind();
    let mut directory = Directory::default();
    let mut pending = ResumeToken::START;

    loop {
        match session.parse_next() {
            ParseStatus::Found => {
                let token = pending;
                pending = session.current_resume_offset();
                match session.current_name() {
                    Some(name) => directory.entries.push(EntryRecord {
                        name: name.to_owned(),
                        size: session.current_size(),
                        kind: EntryKind::from_name(name),
                        token,
                        origin,
                    }),
                    None => {
                        directory.skipped += 1;
                        debug!(
                            %kind,
                            index = directory.entries.len() + directory.skipped - 1,
                            size = session.current_size(),
                            "skipping entry without a name"
                        );
                    }
                }
            }
            ParseStatus::End => break,
            ParseStatus::Error => {
                debug!(%kind, parsed = directory.entries.len(), "scan aborted by parse error");
                return Err(Error::FormatMismatch(kind));
            }
        }
    }

    if directory.is_empty() {
        debug!(%kind, skipped = directory.skipped, "archive has no named entries");
        return Err(Error::FormatMismatch(kind));
    }
    Ok(directory)
}
