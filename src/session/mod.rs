//! Message recording and playback
//!
//! This module captures broker traffic into numbered message logs and
//! replays those logs against a broker with their original timing.
//!
//! # Features
//!
//! - Record selected topics with timestamps relative to the session start
//! - Replay a log at original or scaled speed, optionally from an offset
//! - Per-message failures (append or publish) are logged and isolated
//! - Interrupt playback at any point; pending publishes are abandoned

pub mod playback;
pub mod recorder;
pub mod types;

pub use playback::Playback;
pub use recorder::Recorder;
pub use types::{PlayOptions, PlaybackReport, PublishFailure, RecorderStats};
