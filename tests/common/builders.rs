//! Test data builders for creating log files

use mqtt_replay::{LogEntry, LogStore};
use std::path::{Path, PathBuf};

/// Builder for writing a log file with chosen entries
pub struct LogBuilder {
    entries: Vec<LogEntry>,
}

impl LogBuilder {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Add an entry with a text payload
    pub fn entry(mut self, time_delta: f64, topic: &str, message: &str) -> Self {
        self.entries.push(LogEntry::new(time_delta, topic, message));
        self
    }

    /// Add one entry per delta, on topics `t0`, `t1`, ...
    pub fn deltas(mut self, deltas: &[f64]) -> Self {
        for (i, delta) in deltas.iter().enumerate() {
            let topic = format!("t{}", i);
            self.entries.push(LogEntry::new(*delta, topic.clone(), topic));
        }
        self
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Write the entries to the next numbered log in `dir`
    pub fn write_to(self, dir: &Path) -> PathBuf {
        let mut store = LogStore::create(dir).unwrap();
        for entry in &self.entries {
            store.append(entry).unwrap();
        }
        store.close().unwrap();
        store.path().to_path_buf()
    }
}

