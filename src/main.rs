//! Main entry point for the runarc CLI application.
//!
//! Opens an archive from the local filesystem or an HTTP URL, trying each
//! requested container kind in turn, then lists or extracts its entries.

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use runarc::{
    ArchiveFile, Cli, EntryRecord, Error, HttpRangeReader, LocalFileReader, NativeDecoders, ReadAt,
};

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level())),
        )
        .with_writer(std::io::stderr)
        .init();

    if cli.is_http_url() {
        // remote archive via HTTP Range requests
        let reader = Arc::new(HttpRangeReader::new(cli.file.clone())?);
        let transferred_before = reader.transferred_bytes();

        process_archive(reader.clone(), &cli)?;

        if !cli.is_quiet() {
            let transferred = reader.transferred_bytes() - transferred_before;
            eprintln!("\nTotal bytes transferred: {}", format_size(transferred));
        }
    } else {
        let reader = Arc::new(LocalFileReader::new(Path::new(&cli.file))?);
        process_archive(reader, &cli)?;
    }

    Ok(())
}

/// List or extract the archive according to the CLI options.
fn process_archive(reader: Arc<dyn ReadAt>, cli: &Cli) -> Result<()> {
    let kinds = cli.container_kinds();
    let mut archive = ArchiveFile::open_any(reader, &kinds, &NativeDecoders)
        .with_context(|| format!("cannot open {}", cli.file))?;

    if cli.list || cli.verbose {
        list_entries(&archive, cli.verbose);
        return Ok(());
    }

    let selected: Vec<usize> = archive
        .directory()
        .iter()
        .enumerate()
        .filter(|(_, e)| is_selected(e, cli))
        .map(|(index, _)| index)
        .collect();

    let show_filename = cli.pipe && selected.len() > 1;
    let mut failed = 0usize;
    for index in selected {
        match extract_entry(&mut archive, index, cli, show_filename) {
            Ok(()) => {}
            // one bad entry does not spoil the others
            Err(e @ Error::Extract { .. }) => {
                eprintln!("error: {e}");
                failed += 1;
            }
            Err(e) => return Err(e).context("extraction aborted"),
        }
    }
    archive.close();

    if failed > 0 {
        bail!("{failed} entries could not be extracted");
    }
    Ok(())
}

fn is_selected(entry: &EntryRecord, cli: &Cli) -> bool {
    let name = entry.name();

    // positional arguments restrict extraction to matching entries
    if !cli.files.is_empty() {
        let matches = cli.files.iter().any(|f| {
            if has_glob_chars(f) {
                glob_match(f, name)
            } else {
                name == f.as_str() || base_name(name) == f.as_str()
            }
        });
        if !matches {
            return false;
        }
    }

    !cli
        .exclude
        .iter()
        .any(|x| name.contains(x.as_str()) || glob_match(x, name))
}

fn list_entries(archive: &ArchiveFile, verbose: bool) {
    let directory = archive.directory();

    if verbose {
        println!("Archive: {} ({})", archive.kind(), archive.kind().description());
        println!("{:>10}  {:<8}  Name", "Length", "Kind");
        println!("{}", "-".repeat(50));
    }

    for entry in directory {
        if verbose {
            println!("{:>10}  {:<8}  {}", entry.size(), entry.kind().as_str(), entry.name());
        } else {
            println!("{}", entry.name());
        }
    }

    if verbose {
        println!("{}", "-".repeat(50));
        println!("{:>10}  {:<8}  {} files", directory.total_size(), "", directory.len());
        if directory.skipped() > 0 {
            println!("{:>10}  {:<8}  {} unnamed entries skipped", "", "", directory.skipped());
        }
    }
}

/// Extract one entry to a file or stdout.
///
/// Entry-level problems that leave the archive usable (existing files,
/// unsafe paths) are reported and skipped here.
fn extract_entry(
    archive: &mut ArchiveFile,
    index: usize,
    cli: &Cli,
    show_filename: bool,
) -> runarc::Result<()> {
    let Some(entry) = archive.directory().get(index).cloned() else {
        return Err(Error::EntryNotFound(format!("#{index}")));
    };
    let name = entry.name();

    if cli.pipe {
        let data = archive.extract(&entry)?;
        if let Err(e) = write_stdout(name, &data, show_filename) {
            eprintln!("error: cannot write {name} to stdout: {e}");
        }
        return Ok(());
    }

    let relative = safe_relative_path(if cli.junk_paths { base_name(name) } else { name });
    let Some(relative) = relative.filter(|p| !p.as_os_str().is_empty()) else {
        eprintln!("Skipping: {name} (unsafe path)");
        return Ok(());
    };
    let output_path = match cli.extract_dir {
        Some(ref dir) => PathBuf::from(dir).join(relative),
        None => relative,
    };

    if output_path.exists() {
        if cli.never_overwrite {
            if !cli.is_quiet() {
                eprintln!("Skipping: {name} (file exists)");
            }
            return Ok(());
        }
        if !cli.overwrite {
            if !cli.is_quiet() {
                eprintln!("Skipping: {name} (use -o to overwrite)");
            }
            return Ok(());
        }
    }

    if !cli.is_quiet() {
        println!("  extracting: {name}");
    }

    let data = archive.extract(&entry)?;
    if let Err(e) = write_file(&output_path, &data) {
        eprintln!("error: cannot write {}: {e:#}", output_path.display());
    }
    Ok(())
}

fn write_stdout(name: &str, data: &[u8], show_filename: bool) -> std::io::Result<()> {
    let mut stdout = std::io::stdout().lock();
    if show_filename {
        writeln!(stdout, "--- {name} ---")?;
    }
    stdout.write_all(data)?;
    stdout.flush()
}

fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("cannot create {}", parent.display()))?;
    }
    fs::write(path, data)?;
    Ok(())
}

/// Relative path for an entry name, or `None` if it would escape the
/// extraction directory.
fn safe_relative_path(name: &str) -> Option<PathBuf> {
    let mut path = PathBuf::new();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(path)
}

fn base_name(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

fn has_glob_chars(pattern: &str) -> bool {
    pattern.contains(['*', '?'])
}

/// `*` matches any run of characters (including `/`), `?` exactly one.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    // last star seen, and the text position it is currently absorbing up to
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                star = Some((p, t));
                p += 1;
            }
            Some(&c) if c == '?' || c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match star {
                Some((sp, st)) => {
                    star = Some((sp, st + 1));
                    p = sp + 1;
                    t = st + 1;
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}

fn format_size(size: u64) -> String {
    const UNITS: [&str; 3] = ["KB", "MB", "GB"];
    if size < 1024 {
        return format!("{size} bytes");
    }
    let mut value = size as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}
