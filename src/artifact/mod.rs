//! Newline-delimited JSON artifacts.
//!
//! Each stage reads its inputs fully into memory and writes new files.
//! Request and manifest files are rewritten per run; training records go
//! through [`RecordWriter`], which only ever appends so interrupted runs
//! can be resumed without losing earlier output.

use crate::models::{Result, VerisynthError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Read every non-empty line of `path` as `T`. Any bad line fails the read.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path)
        .map_err(|e| VerisynthError::io(format!("opening {}", path.display()), e))?;
    let reader = BufReader::new(file);
    let mut items = Vec::new();

    for (line_num, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| VerisynthError::io(format!("reading {}", path.display()), e))?;
        if line.trim().is_empty() {
            continue;
        }
        let item: T = serde_json::from_str(&line).map_err(|e| {
            VerisynthError::ParseError(format!("{} line {}: {}", path.display(), line_num + 1, e))
        })?;
        items.push(item);
    }

    info!(path = %path.display(), count = items.len(), "Loaded artifact");
    Ok(items)
}

/// Like [`read_jsonl`], but lines that fail to decode are skipped and counted.
pub fn read_jsonl_lenient<T: DeserializeOwned>(path: &Path) -> Result<(Vec<T>, usize)> {
    let file = File::open(path)
        .map_err(|e| VerisynthError::io(format!("opening {}", path.display()), e))?;
    let reader = BufReader::new(file);
    let mut items = Vec::new();
    let mut malformed = 0;

    for (line_num, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| VerisynthError::io(format!("reading {}", path.display()), e))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(item) => items.push(item),
            Err(e) => {
                debug!(path = %path.display(), line = line_num + 1, error = %e, "Skipping malformed line");
                malformed += 1;
            }
        }
    }

    if malformed > 0 {
        warn!(path = %path.display(), malformed, "Skipped malformed lines");
    }
    info!(path = %path.display(), count = items.len(), "Loaded artifact");
    Ok((items, malformed))
}

/// Write `items` to `path`, replacing any existing file.
pub fn write_jsonl<T: Serialize>(path: &Path, items: &[T]) -> Result<usize> {
    let file = File::create(path)
        .map_err(|e| VerisynthError::io(format!("creating {}", path.display()), e))?;
    let mut writer = BufWriter::new(file);

    for item in items {
        write_line(&mut writer, item, path)?;
    }
    writer
        .flush()
        .map_err(|e| VerisynthError::io(format!("flushing {}", path.display()), e))?;

    debug!(path = %path.display(), count = items.len(), "Wrote artifact");
    Ok(items.len())
}

fn write_line<W: Write, T: Serialize>(writer: &mut W, item: &T, path: &Path) -> Result<()> {
    let json = serde_json::to_string(item)
        .map_err(|e| VerisynthError::Internal(format!("Failed to serialize record: {e}")))?;
    writeln!(writer, "{json}")
        .map_err(|e| VerisynthError::io(format!("writing {}", path.display()), e))
}

/// Append-only JSONL writer for training records.
pub struct RecordWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    written: usize,
}

impl RecordWriter {
    /// Flush every this many records.
    const FLUSH_EVERY: usize = 100;

    /// Open `path` for appending, creating it if needed.
    pub fn append(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| VerisynthError::io(format!("opening {}", path.display()), e))?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            written: 0,
        })
    }

    pub fn write<T: Serialize>(&mut self, record: &T) -> Result<()> {
        write_line(&mut self.writer, record, &self.path)?;
        self.written += 1;
        if self.written % Self::FLUSH_EVERY == 0 {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| VerisynthError::io(format!("flushing {}", self.path.display()), e))
    }

    /// Flush and return the number of records written.
    pub fn finish(mut self) -> Result<usize> {
        self.flush()?;
        Ok(self.written)
    }
}
