//! Comparison of a fresh capture against a built store.
//!
//! Every input record produces at most one report line, in input order:
//!
//! ```text
//! OK "a.txt"
//! MISSING "b.txt"
//! MISMATCH {"path":"c.txt","kind":"FILE","diff":["mtime","size","digest"]}
//! ```
//!
//! A directory whose only difference is its size produces no line at all;
//! such entries are counted in [`CompareStats::suppressed`].

use crate::error::{Error, Result};
use crate::index::RecordStore;
use crate::log::{LogTag, encode_line, read_line, split_line};
use crate::progress::Throttle;
use crate::record::{Field, FileRecord};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};

/// Tag at the start of every report line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportTag {
    Ok,
    Missing,
    Mismatch,
}

impl ReportTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportTag::Ok => "OK",
            ReportTag::Missing => "MISSING",
            ReportTag::Mismatch => "MISMATCH",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OK" => Some(ReportTag::Ok),
            "MISSING" => Some(ReportTag::Missing),
            "MISMATCH" => Some(ReportTag::Mismatch),
            _ => None,
        }
    }
}

/// A record whose stored copy differs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub path: String,
    /// Log tag of the compared record.
    pub kind: LogTag,
    /// Differing fields, in report order.
    pub diff: Vec<Field>,
}

/// Result of comparing one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Identical in every field.
    Ok(String),
    /// No record with this path in the store.
    Missing(String),
    Mismatch(Mismatch),
}

#[derive(Serialize)]
struct MismatchOut<'a> {
    path: &'a str,
    kind: &'static str,
    diff: Vec<&'static str>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct MismatchIn {
    path: String,
    kind: String,
    diff: Vec<String>,
}

impl Outcome {
    pub fn tag(&self) -> ReportTag {
        match self {
            Outcome::Ok(_) => ReportTag::Ok,
            Outcome::Missing(_) => ReportTag::Missing,
            Outcome::Mismatch(_) => ReportTag::Mismatch,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Outcome::Ok(path) | Outcome::Missing(path) => path,
            Outcome::Mismatch(m) => &m.path,
        }
    }

    /// Encode as a report line, including the trailing newline.
    pub fn to_line(&self) -> Result<String> {
        let tag = self.tag().as_str();
        match self {
            Outcome::Ok(path) | Outcome::Missing(path) => encode_line(tag, path.as_str()),
            Outcome::Mismatch(m) => encode_line(
                tag,
                &MismatchOut {
                    path: &m.path,
                    kind: m.kind.as_str(),
                    diff: m.diff.iter().map(Field::as_str).collect(),
                },
            ),
        }
    }

    /// Decode a report line (without its newline).
    pub fn from_line(line: &str, line_no: u64) -> Result<Self> {
        let (tag, data) = split_line(line, line_no)?;
        let bad = |e: serde_json::Error| Error::corrupt_line(line_no, format!("bad payload: {}", e));

        match ReportTag::parse(tag) {
            Some(ReportTag::Ok) => Ok(Outcome::Ok(serde_json::from_str(data).map_err(bad)?)),
            Some(ReportTag::Missing) => {
                Ok(Outcome::Missing(serde_json::from_str(data).map_err(bad)?))
            }
            Some(ReportTag::Mismatch) => {
                let payload: MismatchIn = serde_json::from_str(data).map_err(bad)?;
                let kind = match LogTag::parse(&payload.kind) {
                    Some(LogTag::Root) | None => {
                        return Err(Error::corrupt_line(
                            line_no,
                            format!("bad mismatch kind {:?}", payload.kind),
                        ));
                    }
                    Some(kind) => kind,
                };
                let diff = payload
                    .diff
                    .iter()
                    .map(|name| {
                        Field::parse(name).ok_or_else(|| {
                            Error::corrupt_line(line_no, format!("unknown field {:?}", name))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;

                Ok(Outcome::Mismatch(Mismatch {
                    path: payload.path,
                    kind,
                    diff,
                }))
            }
            None => Err(Error::corrupt_line(line_no, format!("unknown tag {:?}", tag))),
        }
    }
}

/// Classify `current` against its stored counterpart.
///
/// Returns `None` for a directory whose only difference is `size`. A
/// directory that differs in `size` and anything else is reported with
/// `size` included.
pub fn classify(current: &FileRecord, stored: Option<&FileRecord>) -> Option<Outcome> {
    let Some(stored) = stored else {
        return Some(Outcome::Missing(current.path.clone()));
    };

    let diff = current.diff(stored);
    if diff.is_empty() {
        return Some(Outcome::Ok(current.path.clone()));
    }
    if current.is_dir() && diff == [Field::Size] {
        return None;
    }

    Some(Outcome::Mismatch(Mismatch {
        path: current.path.clone(),
        kind: LogTag::for_kind(current.kind),
        diff,
    }))
}

/// Options controlling a comparison.
#[derive(Debug, Clone)]
pub struct CompareOptions {
    /// Log progress every time this many more rows have been compared.
    pub progress_interval: u64,
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self {
            progress_interval: 100_000,
        }
    }
}

/// Counters collected while comparing.
///
/// `rows == ok + missing + mismatched + suppressed` always holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompareStats {
    pub rows: u64,
    pub ok: u64,
    pub missing: u64,
    pub mismatched: u64,
    /// Directories whose only difference was their size.
    pub suppressed: u64,
}

impl CompareStats {
    /// Number of report lines emitted.
    pub fn reported(&self) -> u64 {
        self.ok + self.missing + self.mismatched
    }

    /// Whether every compared record matched (suppressed directories count as matching).
    pub fn is_clean(&self) -> bool {
        self.missing == 0 && self.mismatched == 0
    }
}

/// Compare each record against `store`, passing outcomes to `emit` in input order.
pub fn compare<I, S, F>(records: I, store: &S, options: &CompareOptions, mut emit: F) -> Result<CompareStats>
where
    I: IntoIterator<Item = Result<FileRecord>>,
    S: RecordStore + ?Sized,
    F: FnMut(&Outcome) -> Result<()>,
{
    let mut stats = CompareStats::default();
    let mut throttle = Throttle::new(options.progress_interval);

    for record in records {
        let record = record?;
        let stored = store.lookup(&record.path)?;

        match classify(&record, stored.as_ref()) {
            Some(outcome) => {
                match &outcome {
                    Outcome::Ok(_) => stats.ok += 1,
                    Outcome::Missing(_) => stats.missing += 1,
                    Outcome::Mismatch(_) => stats.mismatched += 1,
                }
                emit(&outcome)?;
            }
            None => {
                stats.suppressed += 1;
                tracing::debug!(path = %record.path, "ignoring directory size change");
            }
        }
        stats.rows += 1;

        if throttle.due(stats.rows) {
            tracing::info!(rows = stats.rows, "compare progress");
        }
    }

    tracing::info!(
        rows = stats.rows,
        ok = stats.ok,
        missing = stats.missing,
        mismatched = stats.mismatched,
        suppressed = stats.suppressed,
        "compare complete"
    );

    Ok(stats)
}

/// Writes report lines.
#[derive(Debug)]
pub struct ReportWriter<W: Write> {
    writer: W,
}

impl<W: Write> ReportWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn write(&mut self, outcome: &Outcome) -> Result<()> {
        self.writer.write_all(outcome.to_line()?.as_bytes())?;
        Ok(())
    }

    /// Flush and return the underlying writer.
    pub fn finish(mut self) -> Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// Read every outcome from a report.
pub fn read_report<R: BufRead>(mut reader: R) -> Result<Vec<Outcome>> {
    let mut outcomes = Vec::new();
    let mut buf = String::new();
    let mut line_no = 1;
    while read_line(&mut reader, &mut buf, line_no)? {
        outcomes.push(Outcome::from_line(&buf, line_no)?);
        line_no += 1;
    }
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Hash;
    use crate::index::{IndexOptions, MemoryStore, SqliteStore};
    use crate::log::{LogReader, LogWriter};
    use crate::record::{EntryKind, file_modes};
    use crate::scan::{ScanOptions, scan};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn dir_record(path: &str, size: u64, mtime: f64) -> FileRecord {
        FileRecord {
            path: path.to_string(),
            kind: EntryKind::Directory,
            mode: file_modes::S_IFDIR | 0o755,
            uid: 1000,
            gid: 1000,
            mtime,
            size,
            digest: Hash::empty(),
        }
    }

    fn file_record(path: &str, content: &[u8]) -> FileRecord {
        FileRecord {
            path: path.to_string(),
            kind: EntryKind::RegularFile,
            mode: file_modes::S_IFREG | 0o644,
            uid: 1000,
            gid: 1000,
            mtime: 1_700_000_000.5,
            size: content.len() as u64,
            digest: Hash::hash_bytes(content),
        }
    }

    fn log_bytes(root: &str, records: &[FileRecord]) -> Vec<u8> {
        let mut writer = LogWriter::new(Vec::new(), root).unwrap();
        for record in records {
            writer.write_record(record).unwrap();
        }
        writer.finish().unwrap()
    }

    fn scan_to_vec(root: &Path) -> Vec<u8> {
        let mut out = Vec::new();
        scan(root, &mut out, &ScanOptions::default()).unwrap();
        out
    }

    /// Build a store from `indexed`, compare `current` against it.
    fn run(indexed: &[u8], current: &[u8]) -> (Vec<Outcome>, CompareStats) {
        let temp_dir = TempDir::new().unwrap();
        let dest = temp_dir.path().join("index.db");
        let (store, _) =
            SqliteStore::build(LogReader::new(indexed).unwrap(), &dest, &IndexOptions::default())
                .unwrap();

        let mut report = ReportWriter::new(Vec::new());
        let stats = compare(
            LogReader::new(current).unwrap(),
            &store,
            &CompareOptions::default(),
            |o| report.write(o),
        )
        .unwrap();

        let bytes = report.finish().unwrap();
        (read_report(&bytes[..]).unwrap(), stats)
    }

    #[test]
    fn test_classify_missing_ok_mismatch() {
        let current = file_record("a.txt", b"hi");
        assert_eq!(
            classify(&current, None),
            Some(Outcome::Missing("a.txt".to_string()))
        );
        assert_eq!(
            classify(&current, Some(&current.clone())),
            Some(Outcome::Ok("a.txt".to_string()))
        );

        let stored = file_record("a.txt", b"bye");
        assert_eq!(
            classify(&current, Some(&stored)),
            Some(Outcome::Mismatch(Mismatch {
                path: "a.txt".to_string(),
                kind: LogTag::File,
                diff: vec![Field::Size, Field::Digest],
            }))
        );
    }

    #[test]
    fn test_classify_directory_size_only_is_suppressed() {
        let current = dir_record("d", 4096, 1.0);
        let stored = dir_record("d", 8192, 1.0);
        assert_eq!(classify(&current, Some(&stored)), None);
    }

    #[test]
    fn test_classify_directory_size_and_mtime_is_reported() {
        let current = dir_record("d", 4096, 1.0);
        let stored = dir_record("d", 8192, 2.0);
        assert_eq!(
            classify(&current, Some(&stored)),
            Some(Outcome::Mismatch(Mismatch {
                path: "d".to_string(),
                kind: LogTag::Dir,
                diff: vec![Field::Mtime, Field::Size],
            }))
        );
    }

    #[test]
    fn test_classify_file_size_only_is_reported() {
        let current = file_record("f", b"ab");
        let mut stored = current.clone();
        stored.size = 3;
        assert!(matches!(
            classify(&current, Some(&stored)),
            Some(Outcome::Mismatch(_))
        ));
    }

    #[test]
    fn test_report_line_format() {
        let ok = Outcome::Ok("a b.txt".to_string());
        assert_eq!(ok.to_line().unwrap(), "OK \"a b.txt\"\n");

        let missing = Outcome::Missing("x".to_string());
        assert_eq!(missing.to_line().unwrap(), "MISSING \"x\"\n");

        let mismatch = Outcome::Mismatch(Mismatch {
            path: "d".to_string(),
            kind: LogTag::Dir,
            diff: vec![Field::Mtime, Field::Size],
        });
        assert_eq!(
            mismatch.to_line().unwrap(),
            "MISMATCH {\"path\":\"d\",\"kind\":\"DIR\",\"diff\":[\"mtime\",\"size\"]}\n"
        );

        for outcome in [ok, missing, mismatch] {
            let line = outcome.to_line().unwrap();
            assert_eq!(Outcome::from_line(line.trim_end(), 1).unwrap(), outcome);
        }
    }

    #[test]
    fn test_report_rejects_garbage() {
        assert!(Outcome::from_line("NOPE \"x\"", 1).is_err());
        assert!(Outcome::from_line("OK", 1).is_err());
        assert!(Outcome::from_line("MISMATCH {\"path\":\"x\",\"kind\":\"ROOT\",\"diff\":[]}", 1).is_err());
        assert!(Outcome::from_line("MISMATCH {\"path\":\"x\",\"kind\":\"FILE\",\"diff\":[\"color\"]}", 1).is_err());
    }

    #[test]
    fn test_output_follows_input_order() {
        let stored = log_bytes("/old", &[file_record("/old/b", b"b"), file_record("/old/c", b"c")]);
        let current = log_bytes(
            "/new",
            &[
                file_record("/new/c", b"c"),
                file_record("/new/a", b"a"),
                file_record("/new/b", b"changed"),
            ],
        );

        let (outcomes, _) = run(&stored, &current);
        let paths: Vec<&str> = outcomes.iter().map(Outcome::path).collect();
        assert_eq!(paths, vec!["c", "a", "b"]);
        assert_eq!(outcomes[0].tag(), ReportTag::Ok);
        assert_eq!(outcomes[1].tag(), ReportTag::Missing);
        assert_eq!(outcomes[2].tag(), ReportTag::Mismatch);
    }

    #[test]
    fn test_counts_account_for_every_row() {
        let stored = log_bytes(
            "/old",
            &[
                dir_record("/old/d", 4096, 5.0),
                dir_record("/old/e", 4096, 5.0),
                file_record("/old/f", b"f"),
            ],
        );
        let current = log_bytes(
            "/new",
            &[
                dir_record("/new/d", 12288, 5.0),
                dir_record("/new/e", 4096, 5.0),
                file_record("/new/f", b"g"),
                file_record("/new/n", b"n"),
            ],
        );

        let (outcomes, stats) = run(&stored, &current);

        assert_eq!(
            stats,
            CompareStats {
                rows: 4,
                ok: 1,
                missing: 1,
                mismatched: 1,
                suppressed: 1,
            }
        );
        assert_eq!(stats.reported(), outcomes.len() as u64);
        assert_eq!(
            stats.rows,
            stats.ok + stats.missing + stats.mismatched + stats.suppressed
        );
        assert!(!stats.is_clean());
    }

    #[test]
    fn test_identical_logs_are_all_ok() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("x/y")).unwrap();
        fs::write(temp_dir.path().join("x/y/z"), b"zzz").unwrap();
        fs::write(temp_dir.path().join("top"), b"t").unwrap();
        let log = scan_to_vec(temp_dir.path());

        let (outcomes, stats) = run(&log, &log);

        assert_eq!(stats.rows, 4);
        assert_eq!(stats.ok, 4);
        assert!(stats.is_clean());
        assert!(outcomes.iter().all(|o| o.tag() == ReportTag::Ok));
    }

    #[test]
    fn test_memory_store_agrees_with_sqlite() {
        let stored = log_bytes("/old", &[file_record("/old/a", b"a"), dir_record("/old/d", 1, 1.0)]);
        let current = log_bytes(
            "/new",
            &[
                file_record("/new/a", b"A"),
                dir_record("/new/d", 2, 1.0),
                file_record("/new/z", b"z"),
            ],
        );

        let memory = MemoryStore::build(LogReader::new(&stored[..]).unwrap()).unwrap();
        let mut from_memory = Vec::new();
        let memory_stats = compare(
            LogReader::new(&current[..]).unwrap(),
            &memory,
            &CompareOptions::default(),
            |o| {
                from_memory.push(o.clone());
                Ok(())
            },
        )
        .unwrap();

        let (from_sqlite, sqlite_stats) = run(&stored, &current);
        assert_eq!(from_memory, from_sqlite);
        assert_eq!(memory_stats, sqlite_stats);
    }

    #[test]
    fn test_corrupt_current_log_aborts() {
        let stored = log_bytes("/old", &[file_record("/old/a", b"a")]);
        let mut current = log_bytes("/new", &[file_record("/new/a", b"a"), file_record("/new/b", b"b")]);
        current.truncate(current.len() - 3);

        let store = MemoryStore::build(LogReader::new(&stored[..]).unwrap()).unwrap();
        let mut emitted = Vec::new();
        let err = compare(
            LogReader::new(&current[..]).unwrap(),
            &store,
            &CompareOptions::default(),
            |o| {
                emitted.push(o.clone());
                Ok(())
            },
        )
        .unwrap_err();

        assert!(matches!(err, Error::TruncatedRecord { line: 3 }));
        assert_eq!(emitted, vec![Outcome::Ok("a".to_string())]);
    }

    // End-to-end scenarios: scan, index, scan again, compare.

    #[test]
    fn test_scenario_unchanged_file_is_ok() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.txt"), b"hi").unwrap();
        let log = scan_to_vec(temp_dir.path());

        let (outcomes, _) = run(&log, &log);
        assert_eq!(outcomes, vec![Outcome::Ok("a.txt".to_string())]);
    }

    #[test]
    fn test_scenario_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("tree");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("a.txt"), b"hi").unwrap();
        let with_file = scan_to_vec(&root);

        fs::remove_file(root.join("a.txt")).unwrap();
        let without_file = scan_to_vec(&root);

        // The capture that still has a.txt is checked against the store
        // built after it was deleted.
        let (outcomes, _) = run(&without_file, &with_file);
        assert_eq!(outcomes, vec![Outcome::Missing("a.txt".to_string())]);

        // Entries present only in the store produce no line.
        let (outcomes, stats) = run(&with_file, &without_file);
        assert!(outcomes.is_empty());
        assert_eq!(stats.rows, 0);
    }

    #[test]
    fn test_scenario_changed_content() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("tree");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("a.txt"), b"hi").unwrap();
        let before = scan_to_vec(&root);

        fs::write(root.join("a.txt"), b"bye").unwrap();
        let after = scan_to_vec(&root);

        let (outcomes, _) = run(&before, &after);
        assert_eq!(outcomes.len(), 1);
        match &outcomes[0] {
            Outcome::Mismatch(m) => {
                assert_eq!(m.path, "a.txt");
                assert_eq!(m.kind, LogTag::File);
                assert!(m.diff.contains(&Field::Size));
                assert!(m.diff.contains(&Field::Digest));
                assert!(!m.diff.contains(&Field::Kind));
            }
            other => panic!("expected mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_scenario_directory_size_change_is_silent() {
        // Directory sizes cannot be changed in isolation on a real
        // filesystem without also touching mtime, so the records are built by hand.
        let stored = log_bytes("/old", &[dir_record("/old/d", 4096, 10.0)]);
        let current = log_bytes("/new", &[dir_record("/new/d", 8192, 10.0)]);

        let (outcomes, stats) = run(&stored, &current);
        assert!(outcomes.is_empty());
        assert_eq!(stats.rows, 1);
        assert_eq!(stats.suppressed, 1);
        assert!(stats.is_clean());
    }

    #[test]
    #[cfg(unix)]
    fn test_scenario_unchanged_symlink_is_ok() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("tree");
        fs::create_dir(&root).unwrap();
        std::os::unix::fs::symlink("target", root.join("l")).unwrap();

        let first = scan_to_vec(&root);
        let second = scan_to_vec(&root);

        let (outcomes, _) = run(&first, &second);
        assert_eq!(outcomes, vec![Outcome::Ok("l".to_string())]);
    }

    #[test]
    fn test_scenario_duplicate_path_fails_indexing() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("tree");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("a.txt"), b"hi").unwrap();
        let mut log = scan_to_vec(&root);
        let text = String::from_utf8(log.clone()).unwrap();
        let last = text.lines().last().unwrap().to_string();
        log.extend_from_slice(last.as_bytes());
        log.push(b'\n');

        let dest = temp_dir.path().join("index.db");
        let err = SqliteStore::build(LogReader::new(&log[..]).unwrap(), &dest, &IndexOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::DuplicatePath { .. }));
        assert!(!dest.exists());
    }

    #[test]
    fn test_different_roots_share_keys() {
        let temp_dir = TempDir::new().unwrap();
        let mtime = std::time::UNIX_EPOCH + std::time::Duration::from_secs(1_600_000_000);
        for side in ["src", "dst"] {
            let root = temp_dir.path().join(side);
            fs::create_dir(&root).unwrap();
            let path = root.join("a.txt");
            fs::write(&path, b"same").unwrap();
            fs::File::options()
                .write(true)
                .open(&path)
                .unwrap()
                .set_modified(mtime)
                .unwrap();
        }

        let src = scan_to_vec(&temp_dir.path().join("src"));
        let dst = scan_to_vec(&temp_dir.path().join("dst"));

        let (outcomes, _) = run(&dst, &src);
        assert_eq!(outcomes, vec![Outcome::Ok("a.txt".to_string())]);
    }
}
