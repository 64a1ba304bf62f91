//! Per-entry file records and field-level comparison.

use crate::hash::Hash;
use std::fmt;

/// Raw permission and type bits, as reported by `lstat`.
pub type FileMode = u32;

/// POSIX file type bits.
pub mod file_modes {
    use super::FileMode;

    /// Mask selecting the file type bits.
    pub const S_IFMT: FileMode = 0o170000;

    /// Directory.
    pub const S_IFDIR: FileMode = 0o040000;

    /// Regular file.
    pub const S_IFREG: FileMode = 0o100000;

    /// Symbolic link.
    pub const S_IFLNK: FileMode = 0o120000;
}

/// Kind of filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Directory,
    RegularFile,
    Symlink,
    Other,
}

impl EntryKind {
    /// Classify an entry by the type bits of its mode.
    pub fn from_mode(mode: FileMode) -> Self {
        match mode & file_modes::S_IFMT {
            file_modes::S_IFDIR => EntryKind::Directory,
            file_modes::S_IFREG => EntryKind::RegularFile,
            file_modes::S_IFLNK => EntryKind::Symlink,
            _ => EntryKind::Other,
        }
    }

    /// Returns the string representation (for the store).
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Directory => "directory",
            EntryKind::RegularFile => "file",
            EntryKind::Symlink => "symlink",
            EntryKind::Other => "other",
        }
    }

    /// Parse a kind from its string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "directory" => Some(EntryKind::Directory),
            "file" => Some(EntryKind::RegularFile),
            "symlink" => Some(EntryKind::Symlink),
            "other" => Some(EntryKind::Other),
            _ => None,
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A comparable field of a [`FileRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Kind,
    Mode,
    Uid,
    Gid,
    Mtime,
    Size,
    Digest,
}

impl Field {
    /// All comparable fields, in report order.
    pub const ALL: [Field; 7] = [
        Field::Kind,
        Field::Mode,
        Field::Uid,
        Field::Gid,
        Field::Mtime,
        Field::Size,
        Field::Digest,
    ];

    /// Field name as it appears in mismatch reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Kind => "kind",
            Field::Mode => "mode",
            Field::Uid => "uid",
            Field::Gid => "gid",
            Field::Mtime => "mtime",
            Field::Size => "size",
            Field::Digest => "digest",
        }
    }

    /// Parse a field from its report name.
    pub fn parse(s: &str) -> Option<Self> {
        Field::ALL.into_iter().find(|f| f.as_str() == s)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a captured tree.
///
/// `path` is absolute when produced by the scanner and relative to the
/// declared root once read back from a log.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub path: String,
    pub kind: EntryKind,
    pub mode: FileMode,
    pub uid: u32,
    pub gid: u32,
    /// Seconds since the epoch, with sub-second precision.
    pub mtime: f64,
    pub size: u64,
    pub digest: Hash,
}

impl FileRecord {
    /// Whether this record is tagged `DIR` in a log.
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Fields whose values differ between `self` and `other`, in report order.
    ///
    /// `path` is the lookup key and is never part of the result.
    pub fn diff(&self, other: &FileRecord) -> Vec<Field> {
        Field::ALL
            .into_iter()
            .filter(|field| match field {
                Field::Kind => self.kind != other.kind,
                Field::Mode => self.mode != other.mode,
                Field::Uid => self.uid != other.uid,
                Field::Gid => self.gid != other.gid,
                Field::Mtime => self.mtime != other.mtime,
                Field::Size => self.size != other.size,
                Field::Digest => self.digest != other.digest,
            })
            .collect()
    }
}
