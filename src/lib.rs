//! # runarc
//!
//! Random-access extraction from 7z, RAR, TAR and ZIP archives, locally or
//! over HTTP Range requests.
//!
//! Archive decoders are forward-only: they parse the next entry and
//! uncompress the current one. This crate scans an archive once, records a
//! resume token per entry, and later replays the decoder to a token to
//! extract any entry in any order without rescanning.
//!
//! ## Features
//!
//! - 7z (via `sevenz-rust2`), RAR 4/5 (stored entries), TAR (ustar, GNU, PAX)
//!   and ZIP (stored and deflate, ZIP64)
//! - Format fallback: try several container kinds until one matches
//! - Any [`ReadAt`] source: local files, HTTP Range requests, memory
//! - Pluggable [`DecoderLibrary`] for external decoders
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use runarc::{ArchiveFile, ContainerKind, LocalFileReader, NativeDecoders};
//!
//! fn main() -> anyhow::Result<()> {
//!     let source = Arc::new(LocalFileReader::new(Path::new("data.7z"))?);
//!     let mut archive = ArchiveFile::open_any(source, &ContainerKind::ALL, &NativeDecoders)?;
//!
//!     for entry in archive.directory() {
//!         println!("{} ({} bytes)", entry.name(), entry.size());
//!     }
//!
//!     let data = archive.extract_at(0)?;
//!     println!("first entry: {} bytes", data.len());
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod cli;
pub mod decoder;
pub mod error;
pub mod io;

pub use archive::{
    ArchiveFile, ArchiveSession, ContainerKind, Directory, EntryKind, EntryRecord, ParseStatus,
    ResumeToken,
};
pub use cli::Cli;
pub use decoder::{ArchiveDecoder, DecoderLibrary, NativeDecoders};
pub use error::{Error, Result};
pub use io::{HttpRangeReader, LocalFileReader, MemoryReader, ReadAt, StreamBridge};
