//! Scan log format: one `TAG <json>` line per entry, preceded by a root line.
//!
//! ```text
//! ROOT "/data/projects"
//! DIR {"path":"/data/projects/a","mode":16877,...}
//! FILE {"path":"/data/projects/a/b.txt","mode":33188,...}
//! ```
//!
//! Writers emit absolute paths. Readers strip the declared root so that
//! records from two captures of the same tree share keys.

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::record::{EntryKind, FileMode, FileRecord};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Tag at the start of every scan log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTag {
    Root,
    Dir,
    File,
}

impl LogTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogTag::Root => "ROOT",
            LogTag::Dir => "DIR",
            LogTag::File => "FILE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ROOT" => Some(LogTag::Root),
            "DIR" => Some(LogTag::Dir),
            "FILE" => Some(LogTag::File),
            _ => None,
        }
    }

    /// Tag used for a record of the given kind.
    pub fn for_kind(kind: EntryKind) -> Self {
        match kind {
            EntryKind::Directory => LogTag::Dir,
            _ => LogTag::File,
        }
    }
}

/// JSON payload of a DIR/FILE line. `kind` is implied by `mode`.
#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Payload<'a> {
    #[serde(borrow)]
    path: Cow<'a, str>,
    mode: FileMode,
    uid: u32,
    gid: u32,
    mtime: f64,
    size: u64,
    digest: Hash,
}

/// Encode a tagged line, including the trailing newline.
pub(crate) fn encode_line<T: Serialize + ?Sized>(tag: &str, payload: &T) -> Result<String> {
    Ok(format!("{} {}\n", tag, serde_json::to_string(payload)?))
}

/// Split a line (without its newline) into tag and JSON payload.
pub(crate) fn split_line(line: &str, line_no: u64) -> Result<(&str, &str)> {
    line.split_once(' ')
        .ok_or_else(|| Error::corrupt_line(line_no, "expected `TAG payload`"))
}

/// Read one newline-terminated line into `buf`.
///
/// Returns `false` at a clean end of input. A final line without a newline
/// is what an interrupted writer leaves behind, so it is rejected.
pub(crate) fn read_line<R: BufRead>(reader: &mut R, buf: &mut String, line_no: u64) -> Result<bool> {
    buf.clear();
    let n = reader.read_line(buf).map_err(|e| match e.kind() {
        ErrorKind::InvalidData => Error::corrupt_line(line_no, "not valid UTF-8"),
        _ => Error::from(e),
    })?;
    if n == 0 {
        return Ok(false);
    }
    if !buf.ends_with('\n') {
        return Err(Error::TruncatedRecord { line: line_no });
    }
    buf.pop();
    Ok(true)
}

/// Encode a record as a scan log line.
pub fn encode_record(record: &FileRecord) -> Result<String> {
    let payload = Payload {
        path: Cow::Borrowed(&record.path),
        mode: record.mode,
        uid: record.uid,
        gid: record.gid,
        mtime: record.mtime,
        size: record.size,
        digest: record.digest,
    };
    encode_line(LogTag::for_kind(record.kind).as_str(), &payload)
}

/// Decode a DIR/FILE line (without its newline). The path is left as written.
pub fn decode_record(line: &str, line_no: u64) -> Result<FileRecord> {
    let (tag, data) = split_line(line, line_no)?;
    let tag = match LogTag::parse(tag) {
        Some(LogTag::Root) => {
            return Err(Error::corrupt_line(line_no, "unexpected second ROOT line"));
        }
        Some(tag) => tag,
        None => return Err(Error::corrupt_line(line_no, format!("unknown tag {:?}", tag))),
    };

    let payload: Payload<'_> = serde_json::from_str(data)
        .map_err(|e| Error::corrupt_line(line_no, format!("bad payload: {}", e)))?;

    let kind = EntryKind::from_mode(payload.mode);
    if LogTag::for_kind(kind) != tag {
        return Err(Error::corrupt_line(
            line_no,
            format!("{} line carries a {} mode", tag.as_str(), kind),
        ));
    }

    Ok(FileRecord {
        path: payload.path.into_owned(),
        kind,
        mode: payload.mode,
        uid: payload.uid,
        gid: payload.gid,
        mtime: payload.mtime,
        size: payload.size,
        digest: payload.digest,
    })
}

/// Writes a scan log.
#[derive(Debug)]
pub struct LogWriter<W: Write> {
    writer: W,
}

impl<W: Write> LogWriter<W> {
    /// Start a log by writing the root declaration.
    pub fn new(mut writer: W, root: &str) -> Result<Self> {
        writer.write_all(encode_line(LogTag::Root.as_str(), root)?.as_bytes())?;
        Ok(Self { writer })
    }

    /// Append one record.
    pub fn write_record(&mut self, record: &FileRecord) -> Result<()> {
        self.writer.write_all(encode_record(record)?.as_bytes())?;
        Ok(())
    }

    /// Flush and return the underlying writer.
    pub fn finish(mut self) -> Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// Streams records out of a scan log, one line at a time.
///
/// Yielded paths are relative to the declared root. The first error ends
/// the iteration.
#[derive(Debug)]
pub struct LogReader<R> {
    reader: R,
    root: PathBuf,
    buf: String,
    line_no: u64,
    done: bool,
}

impl LogReader<BufReader<File>> {
    /// Open a scan log file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Self::new(BufReader::new(file))
    }
}

impl<R: BufRead> LogReader<R> {
    /// Read the root declaration and prepare to stream records.
    pub fn new(mut reader: R) -> Result<Self> {
        let mut buf = String::new();
        if !read_line(&mut reader, &mut buf, 1)? {
            return Err(Error::missing_root("log is empty"));
        }

        let (tag, data) = split_line(&buf, 1)?;
        if LogTag::parse(tag) != Some(LogTag::Root) {
            return Err(Error::missing_root(format!("first line is tagged {:?}", tag)));
        }
        let root: String = serde_json::from_str(data)
            .map_err(|e| Error::missing_root(format!("bad root payload: {}", e)))?;

        Ok(Self {
            reader,
            root: PathBuf::from(root),
            buf,
            line_no: 1,
            done: false,
        })
    }

    /// The declared root of the capture.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn next_record(&mut self) -> Result<Option<FileRecord>> {
        self.line_no += 1;
        if !read_line(&mut self.reader, &mut self.buf, self.line_no)? {
            return Ok(None);
        }

        let mut record = decode_record(&self.buf, self.line_no)?;
        record.path = relativize(&record.path, &self.root)?;
        Ok(Some(record))
    }
}

impl<R: BufRead> Iterator for LogReader<R> {
    type Item = Result<FileRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Express `path` relative to `root`.
pub fn relativize(path: &str, root: &Path) -> Result<String> {
    let relative = Path::new(path)
        .strip_prefix(root)
        .map_err(|_| Error::outside_root(path, root))?;
    relative
        .to_str()
        .map(str::to_string)
        .ok_or_else(|| Error::non_utf8_path(relative))
}
