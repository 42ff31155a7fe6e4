use clap::Parser;

use crate::archive::ContainerKind;

#[derive(Parser, Debug)]
#[command(name = "runarc")]
#[command(version)]
#[command(about = "Extract 7z, RAR, TAR and ZIP archives, with HTTP URL support", long_about = None)]
#[command(after_help = "Examples:\n  \
  runarc data1.7z -x joe          extract all files except joe from data1.7z\n  \
  runarc -p foo.tar | more        send contents of foo.tar via pipe into more\n  \
  runarc -t rar -l game.dat       list a RAR archive with a foreign extension\n  \
  runarc -l https://example.com/archive.zip   list files from a remote archive")]
pub struct Cli {
    /// Archive path or HTTP URL
    #[arg(value_name = "FILE")]
    pub file: String,

    /// Files to extract (default: all)
    #[arg(value_name = "FILES")]
    pub files: Vec<String>,

    /// List files (short format)
    #[arg(short = 'l')]
    pub list: bool,

    /// List verbosely
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Extract files to pipe, no messages
    #[arg(short = 'p')]
    pub pipe: bool,

    /// Extract files into exdir
    #[arg(short = 'd', value_name = "DIR")]
    pub extract_dir: Option<String>,

    /// Exclude files that follow
    #[arg(short = 'x', value_name = "FILE", num_args = 1..)]
    pub exclude: Vec<String>,

    /// Never overwrite existing files
    #[arg(short = 'n')]
    pub never_overwrite: bool,

    /// Overwrite files WITHOUT prompting
    #[arg(short = 'o')]
    pub overwrite: bool,

    /// Junk paths (do not make directories)
    #[arg(short = 'j')]
    pub junk_paths: bool,

    /// Quiet mode (-qq => quieter)
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,

    /// Container kind to try (repeatable; default: 7z, rar, zip, tar)
    #[arg(short = 't', long = "type", value_name = "KIND")]
    pub kinds: Vec<ContainerKind>,
}

impl Cli {
    pub fn is_http_url(&self) -> bool {
        self.file.starts_with("http://") || self.file.starts_with("https://")
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet > 0 || self.pipe
    }

    pub fn is_very_quiet(&self) -> bool {
        self.quiet > 1
    }

    /// Container kinds to try, in order.
    pub fn container_kinds(&self) -> Vec<ContainerKind> {
        if self.kinds.is_empty() {
            ContainerKind::ALL.to_vec()
        } else {
            self.kinds.clone()
        }
    }

    /// Default log filter when `RUST_LOG` is unset.
    pub fn log_level(&self) -> &'static str {
        if self.is_very_quiet() || self.pipe {
            "off"
        } else if self.quiet > 0 {
            "error"
        } else if self.verbose {
            "info,runarc=debug"
        } else {
            "warn"
        }
    }
}
