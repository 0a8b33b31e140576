//! Session data types

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::config::PlaybackConfig;
use crate::error::{ReplayError, Result};

/// Counters for a recording session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecorderStats {
    /// Messages delivered by the broker
    pub received: u64,
    /// Messages written to the log
    pub recorded: u64,
    /// Messages discarded because recording was off
    pub dropped: u64,
    /// Messages that could not be written
    pub append_failures: u64,
    /// Times the broker connection dropped and was retried
    pub reconnects: u64,
}

/// Live counters shared with the dispatcher thread
#[derive(Debug, Default)]
pub(crate) struct RecorderCounters {
    pub received: AtomicU64,
    pub recorded: AtomicU64,
    pub dropped: AtomicU64,
    pub append_failures: AtomicU64,
    pub reconnects: AtomicU64,
}

impl RecorderCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RecorderStats {
        RecorderStats {
            received: self.received.load(Ordering::Relaxed),
            recorded: self.recorded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            append_failures: self.append_failures.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

/// How to replay a log
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayOptions {
    /// Speed multiplier; must be finite and greater than zero
    pub speed: f64,
    /// Entries recorded before this offset (seconds) are skipped, and the
    /// rest are scheduled relative to it
    pub start_offset: f64,
}

impl Default for PlayOptions {
    fn default() -> Self {
        Self {
            speed: 1.0,
            start_offset: 0.0,
        }
    }
}

impl From<&PlaybackConfig> for PlayOptions {
    fn from(config: &PlaybackConfig) -> Self {
        Self {
            speed: config.speed,
            start_offset: config.start_offset_secs,
        }
    }
}

impl PlayOptions {
    /// Options at a given speed from the beginning of the log
    pub fn at_speed(speed: f64) -> Self {
        Self {
            speed,
            ..Default::default()
        }
    }

    /// Skip everything before `offset` seconds
    pub fn starting_at(mut self, offset: f64) -> Self {
        self.start_offset = offset;
        self
    }

    /// Reject speeds and offsets that cannot produce a schedule
    pub fn validate(&self) -> Result<()> {
        if !self.speed.is_finite() || self.speed <= 0.0 {
            return Err(ReplayError::Usage(format!(
                "playback speed must be a positive number, got {}",
                self.speed
            )));
        }
        if !self.start_offset.is_finite() || self.start_offset < 0.0 {
            return Err(ReplayError::Usage(format!(
                "start offset must be a non-negative number of seconds, got {}",
                self.start_offset
            )));
        }
        Ok(())
    }

    /// Wall-clock delay for an entry, or `None` if it falls before the offset
    pub fn delay_for(&self, time_delta: f64) -> Result<Option<Duration>> {
        if time_delta < self.start_offset {
            return Ok(None);
        }
        let scaled = (time_delta - self.start_offset) / self.speed;
        Duration::try_from_secs_f64(scaled).map(Some).map_err(|_| {
            ReplayError::Usage(format!(
                "entry at {}s cannot be scheduled at speed {}",
                time_delta, self.speed
            ))
        })
    }
}

/// A publish that failed during playback
#[derive(Debug, Clone, PartialEq)]
pub struct PublishFailure {
    /// Position of the entry in the log
    pub index: usize,
    /// Recorded offset of the entry
    pub time_delta: f64,
    /// Topic of the entry
    pub topic: String,
    /// Why it failed
    pub reason: String,
}

/// Outcome of one playback run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackReport {
    /// Entries scheduled for publishing
    pub scheduled: usize,
    /// Entries skipped because of the start offset
    pub skipped: usize,
    /// Entries published successfully
    pub published: usize,
    /// Entries whose publish failed
    pub failures: Vec<PublishFailure>,
    /// Entries abandoned by an interrupt
    pub abandoned: usize,
    /// Whether playback was interrupted
    pub interrupted: bool,
    /// Wall-clock duration of the run
    pub elapsed: Duration,
}

impl PlaybackReport {
    /// Whether every scheduled entry was published
    pub fn is_complete(&self) -> bool {
        !self.interrupted && self.failures.is_empty() && self.published == self.scheduled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speed_validation() {
        assert!(PlayOptions::at_speed(1.0).validate().is_ok());
        assert!(PlayOptions::at_speed(0.01).validate().is_ok());
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let err = PlayOptions::at_speed(bad).validate().unwrap_err();
            assert!(matches!(err, ReplayError::Usage(_)), "speed {bad}");
        }
        assert!(PlayOptions::default().starting_at(-2.0).validate().is_err());
    }

    #[test]
    fn test_delay_scaling() {
        let options = PlayOptions::at_speed(2.0);
        assert_eq!(options.delay_for(2.0).unwrap(), Some(Duration::from_secs(1)));
        assert_eq!(options.delay_for(0.0).unwrap(), Some(Duration::ZERO));
    }

    #[test]
    fn test_delay_with_offset() {
        let options = PlayOptions::at_speed(1.0).starting_at(10.0);
        assert_eq!(options.delay_for(9.99).unwrap(), None);
        assert_eq!(options.delay_for(12.5).unwrap(), Some(Duration::from_millis(2500)));
    }

    #[test]
    fn test_unschedulable_delay() {
        let options = PlayOptions::at_speed(f64::MIN_POSITIVE);
        assert!(options.delay_for(1.0e300).is_err());
    }

    #[test]
    fn test_counters_snapshot() {
        let counters = RecorderCounters::default();
        RecorderCounters::bump(&counters.received);
        RecorderCounters::bump(&counters.received);
        RecorderCounters::bump(&counters.recorded);

        let stats = counters.snapshot();
        assert_eq!(stats.received, 2);
        assert_eq!(stats.recorded, 1);
        assert_eq!(stats.dropped, 0);
    }
}
