//! Durable CSV prediction log and reference corpus loading.

use crate::error::{BufferIoError, MonitoringError};
use crate::text;
use crate::types::BufferRecord;
use std::collections::{HashSet, VecDeque};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

pub const NARRATIVE_COLUMN: &str = "narrative";
pub const PRODUCT_COLUMN: &str = "product";
const HEADER: &str = "narrative,product\n";
/// Records kept in memory for tail reads unless configured otherwise
pub const DEFAULT_TAIL_CAPACITY: usize = 500;

/// Most recent log records, loaded from disk on first use.
#[derive(Debug)]
struct TailCache {
    records: VecDeque<BufferRecord>,
    capacity: usize,
    loaded: bool,
}

impl TailCache {
    fn extend(&mut self, records: impl IntoIterator<Item = BufferRecord>) {
        self.records.extend(records);
        let excess = self.records.len().saturating_sub(self.capacity);
        self.records.drain(..excess);
    }
}

/// Append-only writer for the prediction log.
///
/// Appends and tail reads are serialized so a reader never observes a
/// partially written batch. The appender must be the only writer of its
/// file: tail reads are served from memory after the first one.
#[derive(Debug)]
pub struct LogAppender {
    path: PathBuf,
    tail: Mutex<TailCache>,
}

impl LogAppender {
    /// Create a new appender keeping the default number of tail records
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self::with_tail_capacity(path, DEFAULT_TAIL_CAPACITY)
    }

    /// Create a new appender keeping the last `capacity` records in memory
    pub fn with_tail_capacity<P: AsRef<Path>>(path: P, capacity: usize) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            tail: Mutex::new(TailCache {
                records: VecDeque::with_capacity(capacity),
                capacity,
                loaded: false,
            }),
        }
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, TailCache> {
        self.tail.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append records, writing the header only into an empty file.
    ///
    /// Either the whole batch lands or the file is cut back to its previous
    /// length, so a retry never duplicates rows.
    pub fn append(&self, records: &[BufferRecord]) -> Result<usize, BufferIoError> {
        let mut tail = self.lock();

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| BufferIoError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let open_err = |source| BufferIoError::Open {
            path: self.path.clone(),
            source,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(open_err)?;
        let start = file.metadata().map_err(open_err)?.len();

        let mut out = String::new();
        if start == 0 {
            out.push_str(HEADER);
        } else if !ends_with_newline(&mut file).map_err(open_err)? {
            // A previous writer stopped mid-row
            warn!(path = %self.path.display(), "Prediction log ends mid-row, starting a new line");
            out.push('\n');
        }
        for record in records {
            out.push_str(&csv_escape(&record.narrative));
            out.push(',');
            out.push_str(&csv_escape(&record.product));
            out.push('\n');
        }

        write_or_rollback(&mut file, start, out.as_bytes()).map_err(|source| {
            BufferIoError::Write {
                path: self.path.clone(),
                source,
            }
        })?;

        if tail.loaded {
            tail.extend(records.iter().cloned());
        }

        debug!(path = %self.path.display(), rows = records.len(), header = start == 0, "Appended to prediction log");
        Ok(records.len())
    }

    /// Last `n` records of the log, oldest first. A missing log reads as empty.
    ///
    /// Requests up to the tail capacity never touch the disk after the first
    /// read.
    pub fn read_tail(&self, n: usize) -> Result<Vec<BufferRecord>, MonitoringError> {
        let mut tail = self.lock();

        if n > tail.capacity {
            return self.read_tail_from_disk(n);
        }
        if !tail.loaded {
            let records = self.read_tail_from_disk(tail.capacity)?;
            tail.extend(records);
            tail.loaded = true;
            debug!(path = %self.path.display(), rows = tail.records.len(), "Loaded prediction log tail");
        }

        let skip = tail.records.len().saturating_sub(n);
        Ok(tail.records.iter().skip(skip).cloned().collect())
    }

    fn read_tail_from_disk(&self, n: usize) -> Result<Vec<BufferRecord>, MonitoringError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut records = read_records(&self.path)?;
        let skip = records.len().saturating_sub(n);
        Ok(records.split_off(skip))
    }
}

/// A log file that can be cut back to an earlier length.
trait Rollback: Write {
    fn sync(&mut self) -> io::Result<()>;
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl Rollback for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Write and sync `bytes`, or truncate back to `start` on any failure.
fn write_or_rollback<F: Rollback>(file: &mut F, start: u64, bytes: &[u8]) -> io::Result<()> {
    let result = file.write_all(bytes).and_then(|()| file.sync());
    if result.is_err() {
        if let Err(e) = file.truncate(start).and_then(|()| file.sync()) {
            warn!(error = %e, len = start, "Failed to roll back partial log write");
        }
    }
    result
}

fn ends_with_newline(file: &mut File) -> io::Result<bool> {
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

/// Quote a field when it contains a delimiter, quote or line break.
pub fn csv_escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Split CSV text into rows of fields. Quoted fields may span lines.
pub fn parse_csv(input: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }

        match c {
            '"' if field.is_empty() => in_quotes = true,
            ',' => row.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' | '\r' => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            _ => field.push(c),
        }
    }

    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }

    // Blank lines carry no record
    rows.retain(|r| !(r.len() == 1 && r[0].is_empty()));
    rows
}

fn read_csv(path: &Path) -> Result<Vec<Vec<String>>, MonitoringError> {
    let raw = fs::read_to_string(path).map_err(|e| MonitoringError::ReadLog {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(parse_csv(&raw))
}

/// Locate the narrative and product columns in a header row.
fn column_indices(header: &[String]) -> Option<(usize, usize)> {
    let find = |name: &str| {
        header
            .iter()
            .position(|h| h.trim().trim_start_matches('\u{feff}').eq_ignore_ascii_case(name))
    };
    Some((find(NARRATIVE_COLUMN)?, find(PRODUCT_COLUMN)?))
}

/// Read `narrative,product` records. Files without a recognizable header
/// are read positionally.
pub fn read_records(path: &Path) -> Result<Vec<BufferRecord>, MonitoringError> {
    let rows = read_csv(path)?;
    let (columns, body) = match rows.first().and_then(|h| column_indices(h)) {
        Some(columns) => (columns, &rows[1..]),
        None => ((0, 1), &rows[..]),
    };
    Ok(extract(body, columns))
}

fn extract(rows: &[Vec<String>], (narrative, product): (usize, usize)) -> Vec<BufferRecord> {
    rows.iter()
        .filter_map(|row| {
            Some(BufferRecord::new(
                row.get(narrative)?.clone(),
                row.get(product)?.clone(),
            ))
        })
        .collect()
}

/// Load the training corpus used as the drift reference.
///
/// Requires `narrative` and `product` header columns. Rows with an empty
/// field are dropped, duplicates are dropped and narratives are cleaned.
pub fn load_reference_corpus(path: &Path) -> Result<Vec<BufferRecord>, MonitoringError> {
    let rows = read_csv(path)?;
    let columns = rows
        .first()
        .and_then(|h| column_indices(h))
        .ok_or_else(|| MonitoringError::ReadLog {
            path: path.to_path_buf(),
            reason: format!("missing '{}' and '{}' columns", NARRATIVE_COLUMN, PRODUCT_COLUMN),
        })?;

    let total = rows.len() - 1;
    let mut seen = HashSet::new();
    let records: Vec<BufferRecord> = extract(&rows[1..], columns)
        .into_iter()
        .filter(|r| !r.narrative.trim().is_empty() && !r.product.trim().is_empty())
        .filter(|r| seen.insert((r.narrative.clone(), r.product.clone())))
        .map(|r| BufferRecord::new(text::clean(&r.narrative), r.product))
        .collect();

    info!(
        path = %path.display(),
        rows = total,
        kept = records.len(),
        "Reference corpus loaded"
    );
    Ok(records)
}
