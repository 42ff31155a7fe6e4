//! Container format selection.

use std::fmt;

use clap::ValueEnum;
use tracing::debug;

use crate::decoder::{ArchiveDecoder, DecoderLibrary};
use crate::io::StreamBridge;

/// Offset of the ustar magic inside the first TAR header block.
const TAR_MAGIC_OFFSET: u64 = 0x101;
const TAR_MAGIC: &[u8; 5] = b"ustar";

/// Container kinds the decoder library can open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum ContainerKind {
    #[value(name = "7z")]
    SevenZip,
    Rar,
    Tar,
    Zip,
}

impl ContainerKind {
    /// Every kind, in the order format dispatch tries them.
    pub const ALL: [ContainerKind; 4] = [
        ContainerKind::SevenZip,
        ContainerKind::Rar,
        ContainerKind::Zip,
        ContainerKind::Tar,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            ContainerKind::SevenZip => "7z",
            ContainerKind::Rar => "rar",
            ContainerKind::Tar => "tar",
            ContainerKind::Zip => "zip",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ContainerKind::SevenZip => "7-zip archive",
            ContainerKind::Rar => "RAR archive",
            ContainerKind::Tar => "tape archive",
            ContainerKind::Zip => "ZIP archive",
        }
    }

    /// Cheap check run before the decoder is asked to open the stream.
    ///
    /// Only TAR has one: the ustar marker at a fixed offset. Old v7 archives
    /// without the marker are rejected here.
    pub(crate) fn precheck(self, stream: &StreamBridge) -> bool {
        match self {
            ContainerKind::Tar => {
                let mut magic = [0u8; TAR_MAGIC.len()];
                stream.len() >= TAR_MAGIC_OFFSET + TAR_MAGIC.len() as u64
                    && matches!(stream.peek_at(TAR_MAGIC_OFFSET, &mut magic), Ok(true))
                    && &magic == TAR_MAGIC
            }
            _ => true,
        }
    }

    /// Ask `library` to open `stream` as this kind.
    pub(crate) fn open_decoder(
        self,
        library: &dyn DecoderLibrary,
        stream: &mut StreamBridge,
    ) -> Option<Box<dyn ArchiveDecoder>> {
        if !self.precheck(stream) {
            debug!(kind = %self, size = stream.len(), "pre-check rejected stream");
            return None;
        }
        match self {
            ContainerKind::SevenZip => library.open_7z_archive(stream),
            ContainerKind::Rar => library.open_rar_archive(stream),
            ContainerKind::Tar => library.open_tar_archive(stream),
            ContainerKind::Zip => library.open_zip_archive(stream),
        }
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}
