use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use treecheck_core::{
    CompareOptions, DEFAULT_BUFFER_SIZE, HumanBytes, IndexOptions, LogReader, ReportWriter,
    ScanOptions, SqliteStore,
};

mod logging;

/// Treecheck - snapshot and compare directory trees
#[derive(Parser)]
#[command(name = "treecheck")]
#[command(about = "Snapshot directory trees and confirm they are identical", long_about = None)]
#[command(version)]
struct Cli {
    /// Log progress and debug details to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a directory tree and write its log
    Hash {
        /// Directory to scan
        root: PathBuf,

        /// Write the log to this file instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Read buffer size used when hashing files
        #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_BUFFER_SIZE)]
        buffer_size: usize,
    },

    /// Build an indexed store from a scan log
    Convert {
        /// Scan log to load
        source: PathBuf,

        /// Store file to create
        destination: PathBuf,

        /// Rows inserted per transaction
        #[arg(long, value_name = "ROWS", default_value_t = 100_000)]
        batch_size: u64,
    },

    /// Compare a scan log against an indexed store
    Compare {
        /// Scan log of the tree to check
        source_list: PathBuf,

        /// Store built from the reference tree
        destination_db: PathBuf,

        /// Write the report to this file instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Hash {
            root,
            output,
            buffer_size,
        } => cmd_hash(&root, output.as_deref(), buffer_size),
        Commands::Convert {
            source,
            destination,
            batch_size,
        } => cmd_convert(&source, &destination, batch_size),
        Commands::Compare {
            source_list,
            destination_db,
            output,
        } => cmd_compare(&source_list, &destination_db, output.as_deref()),
    }
}

fn cmd_hash(root: &Path, output: Option<&Path>, buffer_size: usize) -> Result<()> {
    let options = ScanOptions {
        buffer_size,
        ..ScanOptions::default()
    };

    with_output(output, |out| {
        let stats = treecheck_core::scan(root, out, &options)
            .with_context(|| format!("Failed to scan {}", root.display()))?;
        tracing::debug!(
            directories = stats.directories,
            files = stats.files,
            bytes = %HumanBytes(stats.bytes),
            "hash finished"
        );
        Ok(())
    })
}

fn cmd_convert(source: &Path, destination: &Path, batch_size: u64) -> Result<()> {
    let log = LogReader::open(source)
        .with_context(|| format!("Failed to open scan log {}", source.display()))?;

    let options = IndexOptions {
        batch_size,
        ..IndexOptions::default()
    };
    let (_, stats) = SqliteStore::build(log, destination, &options).with_context(|| {
        format!(
            "Failed to build store {} from {}",
            destination.display(),
            source.display()
        )
    })?;

    tracing::debug!(rows = stats.rows, store = %destination.display(), "convert finished");
    Ok(())
}

fn cmd_compare(source: &Path, destination: &Path, output: Option<&Path>) -> Result<()> {
    let store = SqliteStore::open(destination)
        .with_context(|| format!("Failed to open store {}", destination.display()))?;
    let log = LogReader::open(source)
        .with_context(|| format!("Failed to open scan log {}", source.display()))?;

    with_output(output, |out| {
        let mut report = ReportWriter::new(out);
        let stats = treecheck_core::compare(log, &store, &CompareOptions::default(), |o| {
            report.write(o)
        })
        .with_context(|| {
            format!(
                "Failed to compare {} against {}",
                source.display(),
                destination.display()
            )
        })?;
        report.finish()?;

        tracing::debug!(
            ok = stats.ok,
            missing = stats.missing,
            mismatched = stats.mismatched,
            suppressed = stats.suppressed,
            "compare finished"
        );
        Ok(())
    })
}

/// Run `write` against stdout, or against a file that only appears at
/// `path` once `write` has succeeded.
fn with_output<F>(path: Option<&Path>, write: F) -> Result<()>
where
    F: FnOnce(&mut dyn Write) -> Result<()>,
{
    match path {
        None => {
            let mut out = BufWriter::new(io::stdout().lock());
            write(&mut out)?;
            out.flush()?;
        }
        Some(path) => {
            let dir = match path.parent() {
                Some(p) if !p.as_os_str().is_empty() => p,
                _ => Path::new("."),
            };
            let mut temp = tempfile::NamedTempFile::new_in(dir)
                .with_context(|| format!("Failed to create output in {}", dir.display()))?;

            let mut out = BufWriter::new(temp.as_file_mut());
            write(&mut out)?;
            out.flush()?;
            drop(out);

            temp.persist(path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
    }
    Ok(())
}
