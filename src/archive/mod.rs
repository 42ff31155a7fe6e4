//! Random-access archives on top of forward-only decoders.
//!
//! [`ArchiveFile::open`] opens an [`ArchiveSession`], scans it once into a
//! [`Directory`] and keeps the session alive for extraction. Every
//! [`EntryRecord`] carries a [`ResumeToken`]; extracting it replays the
//! decoder to that token instead of rescanning the archive.

mod directory;
mod extract;
mod selector;
mod session;

pub use self::directory::{Directory, EntryKind, EntryRecord, ResumeToken};
pub use self::selector::ContainerKind;
pub use self::session::{ArchiveSession, ParseStatus};

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, info};

use crate::decoder::DecoderLibrary;
use crate::error::{Error, Result};
use crate::io::ReadAt;

static NEXT_ORIGIN: AtomicU64 = AtomicU64::new(1);

/// An opened archive: its directory plus the session to extract from.
#[derive(Debug)]
pub struct ArchiveFile {
    kind: ContainerKind,
    directory: Directory,
    session: Option<ArchiveSession>,
    origin: u64,
}

impl ArchiveFile {
    /// Open `source` as `kind` and index it.
    ///
    /// Returns [`Error::FormatMismatch`] when the decoder rejects the
    /// source, fails while scanning, or finds no named entries.
    pub fn open(
        source: Arc<dyn ReadAt>,
        kind: ContainerKind,
        library: &dyn DecoderLibrary,
    ) -> Result<Self> {
        let mut session = ArchiveSession::open(source, kind, library)?;
        let origin = NEXT_ORIGIN.fetch_add(1, Ordering::Relaxed);
        let directory = directory::scan(&mut session, origin)?;

        info!(
            %kind,
            entries = directory.len(),
            skipped = directory.skipped(),
            "archive opened"
        );
        Ok(Self {
            kind,
            directory,
            session: Some(session),
            origin,
        })
    }

    /// Try each kind in turn until one opens.
    pub fn open_any(
        source: Arc<dyn ReadAt>,
        kinds: &[ContainerKind],
        library: &dyn DecoderLibrary,
    ) -> Result<Self> {
        for &kind in kinds {
            match Self::open(Arc::clone(&source), kind, library) {
                Err(Error::FormatMismatch(_)) => debug!(%kind, "format mismatch, trying next kind"),
                result => return result,
            }
        }
        Err(Error::UnrecognizedFormat)
    }

    /// Container kind the archive was opened as.
    pub fn kind(&self) -> ContainerKind {
        self.kind
    }

    /// Entries found when the archive was opened
    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// Look up an entry by its full name
    pub fn find(&self, name: &str) -> Option<&EntryRecord> {
        self.directory.find(name)
    }

    /// Extract one entry listed by this archive.
    pub fn extract(&mut self, record: &EntryRecord) -> Result<Vec<u8>> {
        if record.origin != self.origin {
            return Err(Error::ForeignEntry {
                name: record.name().to_owned(),
            });
        }
        let session = self.session.as_mut().ok_or(Error::Closed)?;
        extract::extract(session, record)
    }

    /// Extract the entry at `index` in the directory.
    pub fn extract_at(&mut self, index: usize) -> Result<Vec<u8>> {
        let record = self
            .directory
            .get(index)
            .cloned()
            .ok_or_else(|| Error::EntryNotFound(format!("#{index}")))?;
        self.extract(&record)
    }

    /// Extract the first entry called `name`.
    pub fn extract_named(&mut self, name: &str) -> Result<Vec<u8>> {
        let record = self
            .find(name)
            .cloned()
            .ok_or_else(|| Error::EntryNotFound(name.to_owned()))?;
        self.extract(&record)
    }

    /// Release the session. The directory stays readable.
    pub fn close(&mut self) {
        if let Some(session) = self.session.take() {
            session.close();
            debug!(kind = %self.kind, "archive closed");
        }
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.session.is_none()
    }

    /// Whether an integrity fault has made the archive unusable.
    pub fn is_faulted(&self) -> bool {
        self.session.as_ref().is_some_and(ArchiveSession::is_faulted)
    }
}
