//! Error types for archive sessions and entry extraction.

use thiserror::Error;

use crate::archive::ContainerKind;

/// Errors reported by the archive layer.
///
/// `FormatMismatch` is the expected outcome of trying the wrong container
/// kind and is meant to be recovered by trying the next kind. `Extract` is
/// isolated to one entry. `Integrity` means the archive can no longer be
/// trusted; the archive refuses further extraction with `Faulted`.
#[derive(Debug, Error)]
pub enum Error {
    /// The input is not a valid instance of the requested container kind.
    #[error("not a valid {0} archive")]
    FormatMismatch(ContainerKind),

    /// None of the attempted container kinds accepted the input.
    #[error("no supported archive format recognised the input")]
    UnrecognizedFormat,

    /// Decompressing a single entry failed.
    #[error("failed to extract entry '{name}'")]
    Extract {
        /// Name of the entry.
        name: String,
    },

    /// A resume token produced by this archive no longer re-synchronises
    /// the decoder.
    #[error("decoder could not be re-synchronised to entry '{name}'")]
    Integrity {
        /// Name of the entry whose token failed.
        name: String,
    },

    /// The archive hit an integrity fault earlier and is unusable.
    #[error("archive session is unusable after an integrity fault")]
    Faulted,

    /// The archive has been closed.
    #[error("archive is closed")]
    Closed,

    /// The entry record was listed by a different archive.
    #[error("entry '{name}' does not belong to this archive")]
    ForeignEntry {
        /// Name of the entry.
        name: String,
    },

    /// No entry with the requested name or index.
    #[error("entry not found: {0}")]
    EntryNotFound(String),
}

/// Result alias for archive operations.
pub type Result<T> = std::result::Result<T, Error>;
