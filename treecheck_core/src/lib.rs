//! # Treecheck Core
//!
//! Snapshot a directory tree and later confirm that another tree, or the
//! same tree at a later time, still matches it.
//!
//! The pipeline has three stages, each consuming the previous stage's
//! persisted output:
//!
//! - **Scan**: walk a tree in a fixed order and write one line per entry,
//!   with a BLAKE3 digest of file contents or symlink targets.
//! - **Index**: load a scan log into a SQLite store keyed by the path
//!   relative to the scanned root.
//! - **Compare**: stream a second scan log and report, per entry, whether
//!   the store holds an identical record, none at all, or a differing one.
//!
//! ## Example
//!
//! ```no_run
//! use treecheck_core::{
//!     CompareOptions, IndexOptions, LogReader, ReportWriter, ScanOptions, SqliteStore,
//! };
//! use std::fs::File;
//! use std::io::BufWriter;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Capture the destination tree and index it
//! let log = BufWriter::new(File::create("dst.log")?);
//! treecheck_core::scan(Path::new("/mnt/backup"), log, &ScanOptions::default())?;
//! let (store, _) = SqliteStore::build(
//!     LogReader::open("dst.log")?,
//!     Path::new("dst.db"),
//!     &IndexOptions::default(),
//! )?;
//!
//! // Capture the source tree and check it against the index
//! let log = BufWriter::new(File::create("src.log")?);
//! treecheck_core::scan(Path::new("/data"), log, &ScanOptions::default())?;
//! let mut report = ReportWriter::new(std::io::stdout().lock());
//! let stats = treecheck_core::compare(
//!     LogReader::open("src.log")?,
//!     &store,
//!     &CompareOptions::default(),
//!     |outcome| report.write(outcome),
//! )?;
//! report.finish()?;
//! println!("{} missing, {} mismatched", stats.missing, stats.mismatched);
//! # Ok(())
//! # }
//! ```

mod compare;
mod error;
mod hash;
mod index;
mod log;
mod progress;
mod record;
mod scan;

pub use compare::{
    CompareOptions, CompareStats, Mismatch, Outcome, ReportTag, ReportWriter, classify, compare,
    read_report,
};
pub use error::{Error, Result};
pub use hash::{DEFAULT_BUFFER_SIZE, HASH_SIZE, Hash};
pub use index::{IndexOptions, IndexStats, MemoryStore, RecordStore, SqliteStore};
pub use log::{LogReader, LogTag, LogWriter, decode_record, encode_record, relativize};
pub use progress::{HumanBytes, Throttle};
pub use record::{EntryKind, Field, FileMode, FileRecord, file_modes};
pub use scan::{ScanOptions, ScanStats, Walk, scan};
