//! Keyed record stores built from a scan log.
//!
//! [`SqliteStore`] is the durable store used between runs. [`MemoryStore`]
//! keeps the same contract in a `HashMap` for small captures.

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::progress::Throttle;
use crate::record::{EntryKind, FileRecord};
use rusqlite::{Connection, ErrorCode, OpenFlags, Row, params};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Lookup of stored records by root-relative path.
pub trait RecordStore {
    /// Return the record stored under `path`, if any.
    fn lookup(&self, path: &str) -> Result<Option<FileRecord>>;
}

/// Options controlling an index build.
#[derive(Debug, Clone)]
pub struct IndexOptions {
    /// Rows inserted per transaction.
    pub batch_size: u64,
    /// Log progress every time this many more rows have been inserted.
    pub progress_interval: u64,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            batch_size: 100_000,
            progress_interval: 100_000,
        }
    }
}

/// Counters collected while building a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub rows: u64,
}

const SCHEMA: &str = "
    CREATE TABLE entries (
        path   TEXT PRIMARY KEY NOT NULL,
        kind   TEXT NOT NULL,
        mode   INTEGER NOT NULL,
        uid    INTEGER NOT NULL,
        gid    INTEGER NOT NULL,
        mtime  REAL NOT NULL,
        size   INTEGER NOT NULL,
        digest TEXT NOT NULL
    );
";

const COLUMNS: [&str; 8] = [
    "path", "kind", "mode", "uid", "gid", "mtime", "size", "digest",
];

/// A store persisted as a single SQLite database file.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    path: PathBuf,
}

impl SqliteStore {
    /// Build a new store at `dest` from a stream of relativized records.
    ///
    /// The database is written to a temporary file next to `dest` and moved
    /// into place only once every record has been committed, so a failed
    /// build leaves nothing at `dest`. An existing `dest` is never replaced.
    pub fn build<I>(records: I, dest: &Path, options: &IndexOptions) -> Result<(Self, IndexStats)>
    where
        I: IntoIterator<Item = Result<FileRecord>>,
    {
        if dest.symlink_metadata().is_ok() {
            return Err(Error::StoreExists {
                path: dest.to_path_buf(),
            });
        }

        let parent = match dest.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let temp_path = tempfile::Builder::new()
            .prefix(".treecheck-")
            .suffix(".tmp")
            .tempfile_in(parent)?
            .into_temp_path();

        let conn = Connection::open(&temp_path)?;
        // The file is synced once, before the rename.
        conn.execute_batch(
            "
            PRAGMA journal_mode = MEMORY;
            PRAGMA synchronous = OFF;
            ",
        )?;
        conn.execute_batch(SCHEMA)?;

        let stats = insert_all(&conn, records, options)?;
        conn.close().map_err(|(_, e)| e)?;

        File::open(&temp_path)?.sync_all()?;
        temp_path.persist_noclobber(dest)?;
        sync_dir(parent)?;
        tracing::debug!(store = %dest.display(), rows = stats.rows, "store persisted");

        Ok((Self::open(dest)?, stats))
    }

    /// Open an existing store read-only and check its schema.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if !path.is_file() {
            return Err(Error::invalid_store(&path, "file does not exist"));
        }

        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        let store = Self { conn, path };
        store.verify_schema()?;
        Ok(store)
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of stored records.
    pub fn count(&self) -> Result<u64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
        Ok(count)
    }

    fn verify_schema(&self) -> Result<()> {
        let columns: Vec<String> = self
            .conn
            .prepare("SELECT name FROM pragma_table_info('entries')")
            .and_then(|mut stmt| {
                let names = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<String>>>();
                names
            })
            .map_err(|e| Error::invalid_store(&self.path, e.to_string()))?;

        if columns != COLUMNS {
            return Err(Error::invalid_store(
                &self.path,
                format!("expected columns {:?}, found {:?}", COLUMNS, columns),
            ));
        }
        Ok(())
    }

    fn row_to_record(&self, row: &Row<'_>) -> Result<FileRecord> {
        let kind: String = row.get(1)?;
        let kind = EntryKind::parse(&kind)
            .ok_or_else(|| Error::invalid_store(&self.path, format!("unknown kind {:?}", kind)))?;
        let digest: String = row.get(7)?;

        Ok(FileRecord {
            path: row.get(0)?,
            kind,
            mode: row.get(2)?,
            uid: row.get(3)?,
            gid: row.get(4)?,
            mtime: row.get(5)?,
            size: row.get(6)?,
            digest: Hash::from_hex(&digest)?,
        })
    }
}

impl RecordStore for SqliteStore {
    fn lookup(&self, path: &str) -> Result<Option<FileRecord>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT path, kind, mode, uid, gid, mtime, size, digest FROM entries WHERE path = ?1",
        )?;
        let mut rows = stmt.query([path])?;

        let record = match rows.next()? {
            Some(row) => self.row_to_record(row)?,
            None => return Ok(None),
        };

        // The primary key rules this out unless the file was tampered with.
        if rows.next()?.is_some() {
            return Err(Error::duplicate_path(path));
        }

        Ok(Some(record))
    }
}

/// Make a rename inside `dir` durable.
fn sync_dir(dir: &Path) -> Result<()> {
    #[cfg(unix)]
    File::open(dir)?.sync_all()?;
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}

fn insert_all<I>(conn: &Connection, records: I, options: &IndexOptions) -> Result<IndexStats>
where
    I: IntoIterator<Item = Result<FileRecord>>,
{
    let batch_size = options.batch_size.max(1);
    let mut stats = IndexStats::default();
    let mut throttle = Throttle::new(options.progress_interval);

    let mut tx = conn.unchecked_transaction()?;
    for record in records {
        let record = record?;
        insert_record(conn, &record)?;
        stats.rows += 1;

        if stats.rows % batch_size == 0 {
            tx.commit()?;
            tx = conn.unchecked_transaction()?;
        }

        if throttle.due(stats.rows) {
            tracing::info!(rows = stats.rows, "index progress");
        }
    }
    tx.commit()?;

    tracing::info!(rows = stats.rows, "index complete");
    Ok(stats)
}

fn insert_record(conn: &Connection, record: &FileRecord) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO entries (path, kind, mode, uid, gid, mtime, size, digest)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;

    let result = stmt.execute(params![
        record.path,
        record.kind.as_str(),
        record.mode,
        record.uid,
        record.gid,
        record.mtime,
        record.size,
        record.digest.to_hex(),
    ]);

    match result {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
            Err(Error::duplicate_path(&record.path))
        }
        Err(e) => Err(e.into()),
    }
}

/// A store held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: HashMap<String, FileRecord>,
}

impl MemoryStore {
    /// Build a store from a stream of relativized records.
    pub fn build<I>(records: I) -> Result<Self>
    where
        I: IntoIterator<Item = Result<FileRecord>>,
    {
        let mut store = Self::default();
        for record in records {
            let record = record?;
            match store.records.entry(record.path.clone()) {
                Entry::Occupied(_) => return Err(Error::duplicate_path(record.path)),
                Entry::Vacant(slot) => {
                    slot.insert(record);
                }
            }
        }
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl RecordStore for MemoryStore {
    fn lookup(&self, path: &str) -> Result<Option<FileRecord>> {
        Ok(self.records.get(path).cloned())
    }
}
