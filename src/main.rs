//! Main entry point for the pickzip CLI application.
//!
//! Lists, tests and extracts entries of ZIP archives from the local filesystem
//! or from HTTP URLs.

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use pickzip::zip::Entry;
use pickzip::{
    ByteSource, Cli, EntryMetadata, HttpRangeSource, LocalFileSource, ZipArchive, ZipResult,
};

/// Application entry point.
///
/// Parses command-line arguments and dispatches to the appropriate handler
/// based on whether the input is a local file or HTTP URL.
fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.is_http_url() {
        // Handle remote ZIP file via HTTP Range requests
        let source = HttpRangeSource::new(cli.file.clone())
            .with_context(|| format!("cannot reach {}", cli.file))?
            .with_max_retries(cli.retries);
        let source = Arc::new(source);
        let transferred_before = source.transferred_bytes();

        process_zip(Arc::clone(&source), &cli)?;

        // Display network transfer statistics for HTTP sources
        if !cli.is_quiet() {
            let transferred = source.transferred_bytes() - transferred_before;
            eprintln!("\nTotal bytes transferred: {}", format_size(transferred));
        }
    } else {
        let source = LocalFileSource::new(Path::new(&cli.file))
            .with_context(|| format!("cannot open {}", cli.file))?;
        process_zip(source, &cli)?;
    }

    Ok(())
}

/// Process a ZIP archive based on CLI options.
///
/// - List mode (`-l` or `-v`): Display archive contents
/// - Test mode (`-t`): Extract and verify every selected entry, write nothing
/// - Extract mode: Extract files matching the specified filters
///
/// Entries are visited in a single pass over the central directory, so this
/// works the same with and without `--no-index`.
fn process_zip<S: ByteSource>(source: S, cli: &Cli) -> Result<()> {
    let archive = ZipArchive::open_with(source, cli.archive_options())
        .with_context(|| format!("cannot read archive {}", cli.file))?;

    if cli.list || cli.verbose {
        list_files(&archive, cli.verbose)?;
    } else if cli.test {
        test_files(&archive, cli)?;
    } else {
        let mut selected = 0usize;
        if cli.pipe {
            archive.for_each_entry(|entry| {
                if is_selected(entry.metadata(), cli) {
                    selected += 1;
                }
                Ok(())
            })?;
        }
        let multiple_files = cli.pipe && selected > 1;

        archive.for_each_entry(|entry| {
            if is_selected(entry.metadata(), cli) {
                extract_file(&entry, cli, multiple_files)?;
            }
            Ok(())
        })?;
    }

    archive.close();
    Ok(())
}

/// Apply the positional and `-x` filters to an entry.
///
/// Directories are never selected; they are created on demand for the
/// files inside them.
fn is_selected(entry: &EntryMetadata, cli: &Cli) -> bool {
    if entry.is_directory {
        return false;
    }

    // If specific files are requested, only include entries that match
    if !cli.files.is_empty() {
        let matches = cli.files.iter().any(|f| {
            if has_glob_chars(f) {
                glob_match(f, &entry.file_name)
            } else {
                // Exact match on full path or base name
                entry.file_name == *f || base_name(&entry.file_name) == *f
            }
        });
        if !matches {
            return false;
        }
    }

    !cli
        .exclude
        .iter()
        .any(|x| entry.file_name.contains(x) || glob_match(x, &entry.file_name))
}

/// List files in the ZIP archive.
///
/// Supports two output formats:
/// - Simple format (`-l`): Just file names, one per line
/// - Verbose format (`-v`): Detailed table with size, compression ratio, and timestamps
fn list_files<S: ByteSource>(archive: &ZipArchive<S>, verbose: bool) -> Result<()> {
    if verbose {
        println!(
            "{:>10}  {:>10}  {:>5}  {:>6}  {:>10}  {:>5}  {:>8}  Name",
            "Length", "Size", "Cmpr", "Method", "Date", "Time", "CRC-32"
        );
        println!("{}", "-".repeat(86));
    }

    // Track totals for summary line
    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;

    archive.for_each_entry(|entry| {
        let entry = entry.metadata();
        if !verbose {
            println!("{}", entry.file_name);
            return Ok(());
        }

        let (year, month, day) = entry.mod_date();
        let (hour, minute, _second) = entry.mod_time();
        let method = match entry.compression_method {
            pickzip::CompressionMethod::Stored => "Stored".to_string(),
            pickzip::CompressionMethod::Deflated => "Defl".to_string(),
            pickzip::CompressionMethod::Unsupported(code) => format!("#{code}"),
        };

        println!(
            "{:>10}  {:>10}  {}  {:>6}  {:04}-{:02}-{:02}  {:02}:{:02}  {:08x}  {}",
            entry.uncompressed_size,
            entry.compressed_size,
            ratio(entry.compressed_size, entry.uncompressed_size),
            method,
            year,
            month,
            day,
            hour,
            minute,
            entry.crc32,
            entry.file_name
        );

        if !entry.is_directory {
            total_uncompressed += entry.uncompressed_size;
            total_compressed += entry.compressed_size;
            file_count += 1;
        }
        Ok(())
    })?;

    if verbose {
        println!("{}", "-".repeat(86));
        println!(
            "{:>10}  {:>10}  {}  {:>46}  {} files",
            total_uncompressed,
            total_compressed,
            ratio(total_compressed, total_uncompressed),
            "",
            file_count
        );
        if !archive.comment().is_empty() {
            println!("{}", archive.comment());
        }
    }

    Ok(())
}

/// Extract every selected entry into a sink, verifying its checksum.
fn test_files<S: ByteSource>(archive: &ZipArchive<S>, cli: &Cli) -> Result<()> {
    let mut failures = 0usize;

    archive.for_each_entry(|entry| {
        let metadata = entry.metadata();
        if !is_selected(metadata, cli) {
            return Ok(());
        }
        match entry.copy_to(&mut io::sink()) {
            Ok(_) => {
                if !cli.is_quiet() {
                    println!("    testing: {:<40} OK", metadata.file_name);
                }
            }
            Err(e) => {
                failures += 1;
                eprintln!("    testing: {:<40} {}", metadata.file_name, e);
            }
        }
        Ok(())
    })?;

    if failures > 0 {
        bail!("{} of the tested entries failed in {}", failures, cli.file);
    }
    if !cli.is_very_quiet() {
        println!("No errors detected in compressed data of {}.", cli.file);
    }
    Ok(())
}

/// Extract a single file from the archive.
///
/// Handles various extraction options:
/// - Pipe mode (`-p`): Write to stdout instead of file
/// - Custom output directory (`-d`): Extract to specified directory
/// - Junk paths (`-j`): Ignore directory structure in archive
/// - Overwrite control (`-n`, `-o`): Handle existing files
///
/// Names that would escape the output directory are skipped. A file whose
/// extraction fails is removed again.
fn extract_file<S: ByteSource>(
    entry: &Entry<'_, S>,
    cli: &Cli,
    show_filename: bool,
) -> ZipResult<()> {
    let metadata = entry.metadata();

    if cli.pipe {
        let stdout = io::stdout();
        let mut stdout = stdout.lock();
        if show_filename {
            writeln!(stdout, "--- {} ---", metadata.file_name)?;
        }
        entry.copy_to(&mut stdout)?;
        stdout.flush()?;
        return Ok(());
    }

    let Some(relative) = output_name(metadata, cli.junk_paths) else {
        if !cli.is_very_quiet() {
            eprintln!("Skipping: {} (unsafe path)", metadata.file_name);
        }
        return Ok(());
    };
    let output_path = match cli.extract_dir {
        Some(ref dir) => PathBuf::from(dir).join(relative),
        None => relative,
    };

    // Handle existing files based on overwrite options
    if output_path.exists() {
        if cli.never_overwrite {
            if !cli.is_quiet() {
                eprintln!("Skipping: {} (file exists)", metadata.file_name);
            }
            return Ok(());
        }
        if !cli.overwrite {
            if !cli.is_quiet() {
                eprintln!("Skipping: {} (use -o to overwrite)", metadata.file_name);
            }
            return Ok(());
        }
    }

    if !cli.is_quiet() {
        println!("  extracting: {}", metadata.file_name);
    }

    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let result: ZipResult<()> = fs::File::create(&output_path)
        .map_err(Into::into)
        .and_then(|file| {
            let mut writer = BufWriter::new(file);
            entry.copy_to(&mut writer)?;
            writer.flush()?;
            Ok(())
        });
    if result.is_err() {
        // Partially written data is never valid
        let _ = fs::remove_file(&output_path);
    }
    result
}

/// Relative output path for an entry, or `None` when the name is unsafe.
fn output_name(entry: &EntryMetadata, junk_paths: bool) -> Option<PathBuf> {
    let enclosed = entry.enclosed_name()?;
    if junk_paths {
        enclosed.file_name().map(PathBuf::from)
    } else {
        Some(enclosed)
    }
}

fn base_name(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

/// Percentage saved by compression, formatted to five columns.
fn ratio(compressed: u64, uncompressed: u64) -> String {
    if uncompressed == 0 || compressed >= uncompressed {
        return "   0%".to_string();
    }
    format!("{:>4}%", 100 - (compressed * 100 / uncompressed))
}

/// Check if a pattern contains glob wildcard characters.
fn has_glob_chars(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

/// Glob matching supporting `*` (any run of characters) and `?` (one character).
///
/// Iterative with single-star backtracking, so adversarial patterns stay linear
/// in practice.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
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
                // Let the last star absorb one more character
                Some((star_p, star_t)) => {
                    p = star_p + 1;
                    t = star_t + 1;
                    star = Some((star_p, star_t + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

/// Format a byte size into a human-readable string.
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matching() {
        assert!(glob_match("*.txt", "readme.txt"));
        assert!(glob_match("file?.dat", "file1.dat"));
        assert!(glob_match("a*b*c", "axxbyyc"));
        assert!(glob_match("*", ""));
        assert!(!glob_match("*.txt", "readme.md"));
        assert!(!glob_match("file?.dat", "file.dat"));
        assert!(!glob_match(&"a*".repeat(20), &"a".repeat(19)));
    }

    #[test]
    fn sizes_and_ratios() {
        assert_eq!(format_size(500), "500 bytes");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(1048576), "1.00 MB");
        assert_eq!(ratio(25, 100), "  75%");
        assert_eq!(ratio(0, 0), "   0%");
        assert_eq!(base_name("dir/sub/file.txt"), "file.txt");
    }
}
