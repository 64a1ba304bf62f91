//! Deterministic filesystem walking and per-entry digests.

use crate::error::{Error, Result};
use crate::hash::{DEFAULT_BUFFER_SIZE, Hash};
use crate::log::LogWriter;
use crate::progress::{HumanBytes, Throttle};
use crate::record::{EntryKind, FileMode, FileRecord};
use std::collections::VecDeque;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Options controlling a scan.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Read buffer used when hashing file contents.
    pub buffer_size: usize,
    /// Log progress every time this many more bytes have been hashed.
    pub progress_interval: u64,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            progress_interval: 128 * 1024 * 1024,
        }
    }
}

/// Counters collected while scanning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub directories: u64,
    pub files: u64,
    /// Sum of the sizes of all non-directory entries.
    pub bytes: u64,
}

/// Lazily walks a tree, yielding one record per entry.
///
/// Within each directory, subdirectories (including links to directories)
/// come first and then everything else, each group sorted by raw name. All
/// children of a directory are yielded before descending into its real
/// subdirectories in the same order. Symlinks are recorded as themselves and
/// never followed. The first error ends the walk.
#[derive(Debug)]
pub struct Walk {
    root: PathBuf,
    pending: VecDeque<PathBuf>,
    stack: Vec<PathBuf>,
    buffer: Vec<u8>,
    failed: bool,
}

impl Walk {
    /// Prepare a walk of `root`, which must be a directory.
    pub fn new(root: &Path, buffer_size: usize) -> Result<Self> {
        let root = std::path::absolute(root).map_err(|e| Error::unreadable(root, e))?;
        let metadata = fs::metadata(&root).map_err(|e| Error::unreadable(&root, e))?;
        if !metadata.is_dir() {
            return Err(Error::NotADirectory { path: root });
        }

        Ok(Self {
            stack: vec![root.clone()],
            root,
            pending: VecDeque::new(),
            buffer: vec![0u8; buffer_size.max(1)],
            failed: false,
        })
    }

    /// The absolute root being walked.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// List the immediate children of `dir` and queue them.
    fn list(&mut self, dir: &Path) -> Result<()> {
        let mut dirs = Vec::new();
        let mut files = Vec::new();
        let mut descend = Vec::new();

        let walker = ignore::WalkBuilder::new(dir)
            .max_depth(Some(1)) // Only immediate children
            .standard_filters(false) // Include hidden and ignored files
            .follow_links(false)
            .sort_by_file_name(|a, b| a.cmp(b))
            .build();

        for entry in walker {
            let entry = entry.map_err(|e| listing_error(dir, e))?;
            if entry.depth() == 0 {
                continue;
            }

            // A link to a directory sorts with the directories but is
            // recorded as a link and never entered.
            let is_link = entry.path_is_symlink();
            let is_dir = if is_link {
                fs::metadata(entry.path()).is_ok_and(|m| m.is_dir())
            } else {
                entry.file_type().is_some_and(|t| t.is_dir())
            };

            let path = entry.into_path();
            if !is_dir {
                files.push(path);
            } else {
                if !is_link {
                    descend.push(path.clone());
                }
                dirs.push(path);
            }
        }

        tracing::trace!(
            dir = %dir.display(),
            dirs = dirs.len(),
            files = files.len(),
            "listed directory"
        );

        self.stack.extend(descend.into_iter().rev());
        self.pending.extend(dirs);
        self.pending.extend(files);
        Ok(())
    }

    /// Take an `lstat` of `path` and compute its digest.
    fn record(&mut self, path: PathBuf) -> Result<FileRecord> {
        let metadata = fs::symlink_metadata(&path).map_err(|e| Error::unreadable(&path, e))?;
        let (mode, uid, gid, mtime) = stat_fields(&metadata);
        let kind = EntryKind::from_mode(mode);

        let digest = match kind {
            EntryKind::RegularFile => Hash::hash_file(&path, &mut self.buffer)?,
            EntryKind::Symlink => {
                let target = fs::read_link(&path).map_err(|e| Error::unreadable(&path, e))?;
                Hash::hash_bytes(&link_target_bytes(&target))
            }
            EntryKind::Directory | EntryKind::Other => Hash::empty(),
        };

        let path = path.into_os_string().into_string().map_err(Error::non_utf8_path)?;

        Ok(FileRecord {
            path,
            kind,
            mode,
            uid,
            gid,
            mtime,
            size: metadata.len(),
            digest,
        })
    }
}

impl Iterator for Walk {
    type Item = Result<FileRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.failed {
                return None;
            }

            if let Some(path) = self.pending.pop_front() {
                let result = self.record(path);
                self.failed = result.is_err();
                return Some(result);
            }

            let dir = self.stack.pop()?;
            if let Err(e) = self.list(&dir) {
                self.failed = true;
                return Some(Err(e));
            }
        }
    }
}

/// Scan `root` and write its log to `writer`.
pub fn scan<W: Write>(root: &Path, writer: W, options: &ScanOptions) -> Result<ScanStats> {
    let walk = Walk::new(root, options.buffer_size)?;
    let root_str = walk
        .root()
        .to_str()
        .ok_or_else(|| Error::non_utf8_path(walk.root()))?
        .to_string();

    let mut log = LogWriter::new(writer, &root_str)?;
    let mut stats = ScanStats::default();
    let mut throttle = Throttle::new(options.progress_interval);

    for record in walk {
        let record = record?;
        log.write_record(&record)?;

        if record.is_dir() {
            stats.directories += 1;
        } else {
            stats.files += 1;
            stats.bytes += record.size;
        }

        if throttle.due(stats.bytes) {
            tracing::info!(
                directories = stats.directories,
                files = stats.files,
                bytes = %HumanBytes(stats.bytes),
                "scan progress"
            );
        }
    }

    log.finish()?;

    tracing::info!(
        root = %root_str,
        directories = stats.directories,
        files = stats.files,
        bytes = %HumanBytes(stats.bytes),
        "scan complete"
    );

    Ok(stats)
}

fn listing_error(dir: &Path, err: ignore::Error) -> Error {
    let source = match err.io_error() {
        Some(io_err) => std::io::Error::new(io_err.kind(), err.to_string()),
        None => std::io::Error::other(err.to_string()),
    };
    Error::unreadable(dir, source)
}

/// Mode, owner and modification time from `lstat` metadata.
#[cfg(unix)]
fn stat_fields(metadata: &fs::Metadata) -> (FileMode, u32, u32, f64) {
    use std::os::unix::fs::MetadataExt;

    let mtime = metadata.mtime() as f64 + metadata.mtime_nsec() as f64 / 1e9;
    (metadata.mode(), metadata.uid(), metadata.gid(), mtime)
}

/// Mode, owner and modification time from metadata (non-Unix fallback).
#[cfg(not(unix))]
fn stat_fields(metadata: &fs::Metadata) -> (FileMode, u32, u32, f64) {
    use crate::record::file_modes;

    let file_type = metadata.file_type();
    let mode = if file_type.is_dir() {
        file_modes::S_IFDIR | 0o755
    } else if file_type.is_symlink() {
        file_modes::S_IFLNK | 0o777
    } else if metadata.permissions().readonly() {
        file_modes::S_IFREG | 0o444
    } else {
        file_modes::S_IFREG | 0o644
    };

    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map_or(0.0, |d| d.as_secs_f64());

    (mode, 0, 0, mtime)
}

#[cfg(unix)]
fn link_target_bytes(target: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    target.as_os_str().as_bytes().to_vec()
}

#[cfg(not(unix))]
fn link_target_bytes(target: &Path) -> Vec<u8> {
    target.to_string_lossy().into_owned().into_bytes()
}
