use clap::Parser;

use crate::zip::ArchiveOptions;

#[derive(Parser, Debug)]
#[command(name = "pickzip")]
#[command(version)]
#[command(about = "Extract single entries from local or remote ZIP archives", long_about = None)]
#[command(after_help = "Examples:\n  \
  pickzip data1.zip -x joe        extract all files except joe from data1.zip\n  \
  pickzip -p foo.zip | more       send contents of foo.zip via pipe into more\n  \
  pickzip -t foo.zip              test every entry's checksum\n  \
  pickzip -l https://example.com/archive.zip   list files from remote ZIP")]
pub struct Cli {
    /// ZIP file path or HTTP URL
    #[arg(value_name = "FILE")]
    pub file: String,

    /// Files to extract (default: all)
    #[arg(value_name = "FILES")]
    pub files: Vec<String>,

    /// List files (short format)
    #[arg(short = 'l')]
    pub list: bool,

    /// List verbosely/show version info
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Test archive files (extract and verify, write nothing)
    #[arg(short = 't')]
    pub test: bool,

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

    /// Refuse to produce more than this many bytes for any entry
    #[arg(long = "max-size", value_name = "BYTES")]
    pub max_size: Option<u64>,

    /// Do not keep the entry index; process entries in a single pass
    #[arg(long = "no-index")]
    pub no_index: bool,

    /// Retries for timed-out HTTP range requests
    #[arg(long = "retries", value_name = "N", default_value_t = 10)]
    pub retries: u32,
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

    /// Archive options selected on the command line.
    pub fn archive_options(&self) -> ArchiveOptions {
        ArchiveOptions::default()
            .store_entries(!self.no_index)
            .max_output_size(self.max_size)
    }
}
