//! Append-only message log files
//!
//! A [`LogStore`] owns one `<N>_log.<ext>` file in a log directory. `N` is
//! one greater than the highest number already used by files with the same
//! suffix, so each recording session gets a fresh file.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::config::DEFAULT_LOG_EXTENSION;
use crate::error::{ReplayError, Result, ResultExt};
use crate::types::LogEntry;

use super::codec::LogCodec;

/// Attempts at claiming a fresh file number when another writer races us
const MAX_CREATE_ATTEMPTS: u32 = 16;

/// Parse the log number out of a `<N>_log.<ext>` filename
pub fn parse_log_number(filename: &str, extension: &str) -> Option<u64> {
    let prefix = filename.strip_suffix(&format!("_log.{}", extension))?;
    if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    prefix.parse().ok()
}

/// Build the filename for a log number
pub fn log_file_name(number: u64, extension: &str) -> String {
    format!("{}_log.{}", number, extension)
}

/// Next free log number in `dir`
///
/// Files that do not match `<N>_log.<ext>` are skipped with a warning.
/// Directory read errors are logged and treated as an empty directory.
pub fn next_log_number(dir: &Path, extension: &str) -> u64 {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::error!("Failed to scan {:?} for existing logs: {}", dir, e);
            return 1;
        }
    };

    let mut highest = 0u64;
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::error!("Failed to read entry in {:?}: {}", dir, e);
                continue;
            }
        };

        let name = entry.file_name();
        let name = name.to_string_lossy();
        match parse_log_number(&name, extension) {
            Some(number) => highest = highest.max(number),
            None => tracing::warn!("{} should not be in {:?}", name, dir),
        }
    }

    highest.saturating_add(1)
}

/// An open (or closed) message log file
#[derive(Debug)]
pub struct LogStore {
    path: PathBuf,
    number: u64,
    writer: Option<BufWriter<File>>,
    codec: LogCodec,
    flush_each_record: bool,
    rows_written: u64,
}

impl LogStore {
    /// Create the next `<N>_log.csv` in `dir` and write its header
    pub fn create(dir: impl AsRef<Path>) -> Result<Self> {
        Self::create_with_extension(dir, DEFAULT_LOG_EXTENSION)
    }

    /// Create the next `<N>_log.<extension>` in `dir` and write its header
    ///
    /// The directory is created if it does not exist.
    pub fn create_with_extension(dir: impl AsRef<Path>, extension: &str) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log directory {:?}", dir))?;

        let mut number = next_log_number(dir, extension);
        let mut attempts = 0;
        let (path, file) = loop {
            let path = dir.join(log_file_name(number, extension));
            match OpenOptions::new().append(true).create_new(true).open(&path) {
                Ok(file) => break (path, file),
                Err(e) if e.kind() == ErrorKind::AlreadyExists && attempts < MAX_CREATE_ATTEMPTS => {
                    tracing::debug!("{:?} appeared while creating, trying the next number", path);
                    number += 1;
                    attempts += 1;
                }
                Err(e) => {
                    return Err(ReplayError::Io(e)
                        .with_context(format!("Failed to create log file {:?}", path)));
                }
            }
        };

        let codec = LogCodec::new();
        let mut writer = BufWriter::new(file);
        writer
            .write_all(codec.header().as_bytes())
            .and_then(|_| writer.flush())
            .with_context(|| format!("Failed to write header to {:?}", path))?;

        tracing::info!("Created log file {:?}", path);

        Ok(Self {
            path,
            number,
            writer: Some(writer),
            codec,
            flush_each_record: false,
            rows_written: 0,
        })
    }

    /// Flush after every record instead of only on close
    pub fn set_flush_each_record(&mut self, flush: bool) {
        self.flush_each_record = flush;
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number `N` in the filename
    pub fn number(&self) -> u64 {
        self.number
    }

    /// Whether the file is still open for appends
    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    /// Rows successfully written so far (header excluded)
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Append one entry
    ///
    /// Failures are logged here and returned so callers can count them;
    /// the store stays usable for later appends.
    pub fn append(&mut self, entry: &LogEntry) -> Result<()> {
        let result = self.try_append(entry);
        if let Err(ref e) = result {
            tracing::error!("Failed to record message on '{}': {}", entry.topic, e);
        }
        result
    }

    fn try_append(&mut self, entry: &LogEntry) -> Result<()> {
        let row = self.codec.encode(entry)?;

        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| ReplayError::Append(format!("{:?} is closed", self.path)))?;

        writer
            .write_all(row.as_bytes())
            .map_err(|e| ReplayError::Append(e.to_string()))?;
        if self.flush_each_record {
            writer
                .flush()
                .map_err(|e| ReplayError::Append(e.to_string()))?;
        }

        self.rows_written += 1;
        Ok(())
    }

    /// Flush and close the file
    ///
    /// Closing an already closed store does nothing.
    pub fn close(&mut self) -> Result<()> {
        let Some(mut writer) = self.writer.take() else {
            return Ok(());
        };

        writer
            .flush()
            .with_context(|| format!("Failed to flush {:?}", self.path))?;
        writer
            .get_ref()
            .sync_all()
            .with_context(|| format!("Failed to sync {:?}", self.path))?;

        tracing::info!("Data saved in {:?} ({} rows)", self.path, self.rows_written);
        Ok(())
    }

    /// Read a whole log file into memory, in file order
    ///
    /// An unreadable path is a usage error; malformed content is a parse error.
    pub fn load(path: impl AsRef<Path>) -> Result<Vec<LogEntry>> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            ReplayError::Usage(format!("Cannot read log file {:?}: {}", path, e))
        })?;

        let text = String::from_utf8(bytes).map_err(|e| {
            let valid = &e.as_bytes()[..e.utf8_error().valid_up_to()];
            let line = valid.iter().filter(|b| **b == b'\n').count() + 1;
            ReplayError::parse(line, "log file is not valid UTF-8")
        })?;

        let entries = LogCodec::new()
            .decode(&text)
            .map_err(|e| e.with_context(format!("Failed to load {:?}", path)))?;

        let out_of_order = entries
            .windows(2)
            .filter(|pair| pair[1].time_delta < pair[0].time_delta)
            .count();
        if out_of_order > 0 {
            tracing::warn!(
                "{:?} has {} entries recorded earlier than their predecessor",
                path,
                out_of_order
            );
        }

        tracing::debug!("Loaded {} entries from {:?}", entries.len(), path);
        Ok(entries)
    }
}

impl Drop for LogStore {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::error!("{}", e);
        }
    }
}
