//! Archive session: one stream bridge and one decoder, bound together.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::directory::ResumeToken;
use super::selector::ContainerKind;
use crate::decoder::{ArchiveDecoder, DecoderLibrary};
use crate::error::{Error, Result};
use crate::io::{ReadAt, StreamBridge};

/// Outcome of advancing the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
    Found,
    End,
    Error,
}

impl ParseStatus {
    fn from_decoder(parsed: bool, at_eof: bool) -> Self {
        match (parsed, at_eof) {
            (true, _) => ParseStatus::Found,
            (false, true) => ParseStatus::End,
            (false, false) => ParseStatus::Error,
        }
    }
}

/// Live pairing of a stream and the decoder parsing it.
///
/// The decoder is always released before the stream. All operations take
/// `&mut self`: the decoder keeps one parse cursor for the whole session.
pub struct ArchiveSession {
    // field order is drop order
    decoder: Box<dyn ArchiveDecoder>,
    stream: StreamBridge,
    kind: ContainerKind,
    faulted: bool,
}

impl ArchiveSession {
    /// Open `source` as `kind`.
    ///
    /// Fails with [`Error::FormatMismatch`] when the decoder rejects the
    /// stream; the stream is released before returning.
    pub fn open(
        source: Arc<dyn ReadAt>,
        kind: ContainerKind,
        library: &dyn DecoderLibrary,
    ) -> Result<Self> {
        let mut stream = StreamBridge::new(source);
        match kind.open_decoder(library, &mut stream) {
            Some(decoder) => Ok(Self {
                decoder,
                stream,
                kind,
                faulted: false,
            }),
            None => {
                debug!(%kind, "decoder rejected stream");
                Err(Error::FormatMismatch(kind))
            }
        }
    }

    /// Container kind this session was opened as.
    pub fn kind(&self) -> ContainerKind {
        self.kind
    }

    /// Advance the decoder to the next entry.
    pub fn parse_next(&mut self) -> ParseStatus {
        let parsed = self.decoder.parse_entry(&mut self.stream);
        ParseStatus::from_decoder(parsed, self.decoder.at_eof())
    }

    /// Name of the current entry, `None` when absent or empty.
    pub fn current_name(&self) -> Option<&str> {
        self.decoder.entry_name().filter(|name| !name.is_empty())
    }

    /// Uncompressed size of the current entry as the decoder reports it now.
    pub fn current_size(&self) -> u64 {
        self.decoder.entry_size()
    }

    /// Token that re-enters the entry *after* the current one.
    pub fn current_resume_offset(&self) -> ResumeToken {
        ResumeToken::from_raw(self.decoder.entry_offset())
    }

    /// Re-synchronise the decoder so the entry at `token` is current.
    pub fn parse_at(&mut self, token: ResumeToken) -> bool {
        self.decoder.parse_entry_at(&mut self.stream, token.raw())
    }

    /// Uncompress all `current_size()` bytes of the current entry.
    pub fn extract_current(&mut self) -> Result<Vec<u8>> {
        let name = self.current_name().unwrap_or_default().to_owned();
        let size = self.current_size();

        let mut buf = Vec::new();
        let reserved = usize::try_from(size)
            .ok()
            .is_some_and(|len| buf.try_reserve_exact(len).is_ok());
        if !reserved {
            warn!(entry = %name, size, "entry too large to buffer");
            return Err(Error::Extract { name });
        }
        buf.resize(size as usize, 0);

        if !self.decoder.entry_uncompress(&mut self.stream, &mut buf) {
            warn!(entry = %name, size, "failed to extract entry");
            return Err(Error::Extract { name });
        }
        Ok(buf)
    }

    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    pub(crate) fn mark_faulted(&mut self) {
        self.faulted = true;
    }

    /// Release the decoder, then the stream.
    pub fn close(self) {
        let Self {
            decoder,
            stream,
            kind,
            ..
        } = self;
        drop(decoder);
        trace!(%kind, "decoder released");
        drop(stream);
    }
}

impl fmt::Debug for ArchiveSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveSession")
            .field("kind", &self.kind)
            .field("stream", &self.stream)
            .field("faulted", &self.faulted)
            .finish_non_exhaustive()
    }
}
