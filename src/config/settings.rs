//! Settings sections of the application configuration
//!
//! - [`BrokerConfig`] - Where and how to reach the MQTT broker
//! - [`RecorderConfig`] - Log directory, topics and file options for recording
//! - [`PlaybackConfig`] - Default speed and start offset for replay

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::{
    DEFAULT_BROKER_HOST, DEFAULT_BROKER_PORT, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_KEEP_ALIVE_SECS,
    DEFAULT_LOG_EXTENSION, DEFAULT_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_DELAY_MS,
    DEFAULT_REQUEST_CAPACITY, WILDCARD_ALL,
};

/// MQTT quality of service level used for subscribe and publish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityOfService {
    /// Fire and forget
    #[default]
    AtMostOnce,
    /// Acknowledged delivery
    AtLeastOnce,
    /// Assured single delivery
    ExactlyOnce,
}

/// Broker connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Hostname or IP address of the broker
    pub host: String,

    /// TCP port of the broker
    pub port: u16,

    /// Prefix for the generated client identifier
    pub client_id_prefix: String,

    /// MQTT keep-alive interval in seconds
    pub keep_alive_secs: u64,

    /// How long to wait for the connection acknowledgement
    pub connect_timeout_ms: u64,

    /// QoS for subscriptions and publishes
    pub qos: QualityOfService,

    /// Capacity of the outgoing request queue
    pub request_capacity: usize,

    /// Reconnect attempts after an established connection drops (0 disables)
    pub reconnect_attempts: u32,

    /// Base delay between reconnect attempts, growing with each attempt
    pub reconnect_delay_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_BROKER_HOST.to_string(),
            port: DEFAULT_BROKER_PORT,
            client_id_prefix: "mqtt-replay".to_string(),
            keep_alive_secs: DEFAULT_KEEP_ALIVE_SECS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            qos: QualityOfService::default(),
            request_capacity: DEFAULT_REQUEST_CAPACITY,
            reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
        }
    }
}

impl BrokerConfig {
    /// Settings for a specific host, defaults elsewhere
    pub fn with_host(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    /// `host:port` for display
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Connect timeout as a duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Keep-alive as a duration
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    /// Base reconnect delay as a duration
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Recording settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Directory receiving the `<N>_log.<ext>` files
    pub log_dir: PathBuf,

    /// Topic filters to subscribe to
    pub topics: Vec<String>,

    /// Log file extension, without the dot
    pub extension: String,

    /// Flush the file after every record instead of only on stop
    pub flush_each_record: bool,

    /// Log every recorded message at INFO level
    pub verbose: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            topics: vec![WILDCARD_ALL.to_string()],
            extension: DEFAULT_LOG_EXTENSION.to_string(),
            flush_each_record: false,
            verbose: false,
        }
    }
}

impl RecorderConfig {
    /// Settings recording every topic into `log_dir`
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            ..Default::default()
        }
    }

    /// Replace the subscribed topics
    pub fn with_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics = topics.into_iter().map(Into::into).collect();
        self
    }

    /// Set verbose per-message logging
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

/// Playback settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Speed multiplier (1.0 = real time)
    pub speed: f64,

    /// Skip entries recorded before this many seconds
    pub start_offset_secs: f64,

    /// How long to wait for queued publishes to drain on close
    pub drain_timeout_ms: u64,

    /// Log every published message at INFO level
    pub verbose: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            speed: 1.0,
            start_offset_secs: 0.0,
            drain_timeout_ms: 2000,
            verbose: false,
        }
    }
}

impl PlaybackConfig {
    /// Drain timeout as a duration
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_defaults() {
        let broker = BrokerConfig::default();
        assert_eq!(broker.address(), "localhost:1883");
        assert_eq!(broker.qos, QualityOfService::AtMostOnce);
        assert_eq!(broker.connect_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_recorder_defaults_subscribe_to_everything() {
        let recorder = RecorderConfig::new("/tmp/logs");
        assert_eq!(recorder.topics, vec!["#".to_string()]);
        assert_eq!(recorder.extension, "csv");

        let narrowed = recorder.with_topics(["a/+", "b/#"]);
        assert_eq!(narrowed.topics.len(), 2);
    }

    #[test]
    fn test_qos_serde_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            qos: QualityOfService,
        }
        let parsed: Wrapper = toml::from_str("qos = \"at_least_once\"").unwrap();
        assert_eq!(parsed.qos, QualityOfService::AtLeastOnce);
    }
}
