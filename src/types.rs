//! Core data types for mqtt-replay
//!
//! # Main Types
//!
//! - [`LogEntry`] - One recorded message: time offset, topic and payload
//! - [`SessionState`] - Lifecycle of a recorder or playback session

use std::fmt;
use std::time::Duration;

/// A single recorded message
///
/// `time_delta` is the number of seconds between the session start instant
/// and the moment the message was received. Entries are kept in receipt
/// order, which is normally but not necessarily sorted by `time_delta`.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    /// Seconds since the session start (finite, non-negative)
    pub time_delta: f64,
    /// Topic the message arrived on
    pub topic: String,
    /// Raw message payload
    pub message: Vec<u8>,
}

impl LogEntry {
    /// Create a new entry
    pub fn new(time_delta: f64, topic: impl Into<String>, message: impl Into<Vec<u8>>) -> Self {
        Self {
            time_delta,
            topic: topic.into(),
            message: message.into(),
        }
    }

    /// Create an entry from an elapsed duration
    pub fn at(elapsed: Duration, topic: impl Into<String>, message: impl Into<Vec<u8>>) -> Self {
        Self::new(elapsed.as_secs_f64(), topic, message)
    }

    /// Payload as text, replacing invalid UTF-8 sequences
    pub fn message_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.message)
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<10.5} | {:<50} | {}",
            self.time_delta,
            self.topic,
            self.message_lossy()
        )
    }
}

/// State of a recording or playback session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Created, not yet started
    #[default]
    Idle,
    /// Recording inbound messages
    Recording,
    /// Replaying a log
    Playing,
    /// The broker connection was lost for good; nothing more is recorded
    Disconnected,
    /// Finished; resources released
    Stopped,
}

impl SessionState {
    /// Check if currently recording
    pub fn is_recording(&self) -> bool {
        matches!(self, SessionState::Recording)
    }

    /// Check if the session has been shut down
    pub fn is_stopped(&self) -> bool {
        matches!(self, SessionState::Stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_from_duration() {
        let entry = LogEntry::at(Duration::from_millis(1500), "sensors/1", "42");
        assert_eq!(entry.time_delta, 1.5);
        assert_eq!(entry.topic, "sensors/1");
        assert_eq!(entry.message, b"42");
    }

    #[test]
    fn test_entry_display() {
        let entry = LogEntry::new(0.25, "a/b", "hello");
        let line = entry.to_string();
        assert!(line.starts_with("0.25000"));
        assert!(line.ends_with("| hello"));
    }

    #[test]
    fn test_session_state() {
        assert!(SessionState::Recording.is_recording());
        assert!(!SessionState::Idle.is_recording());
        assert!(SessionState::Stopped.is_stopped());
        assert!(!SessionState::Disconnected.is_recording());
        assert!(!SessionState::Disconnected.is_stopped());
        assert_eq!(SessionState::default(), SessionState::Idle);
    }
}
