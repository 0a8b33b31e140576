//! # mqtt-replay: MQTT traffic recorder and replayer
//!
//! Records messages from an MQTT broker into timestamped logs and plays
//! them back later, at the original pace or scaled by a speed multiplier.
//!
//! ## Architecture
//!
//! - **Broker**: A connection seam over `rumqttc`, plus an in-memory broker
//! - **Store**: Numbered log files in a quoted, delimited text format
//! - **Session**: The recorder (broker to log) and playback (log to broker)
//! - **Communication**: Crossbeam channels between the transport and the recorder,
//!   tokio tasks for scheduled publishing
//! - **Interrupt**: One Ctrl-C latch that every connect, record and replay wait races against
//!
//! ## Configuration
//!
//! Defaults can be set in `config.toml` under the platform config directory:
//!
//! - **Linux**: `~/.config/mqtt-replay/config.toml`
//! - **macOS**: `~/Library/Application Support/mqtt-replay/config.toml`
//! - **Windows**: `%APPDATA%\mqtt-replay\config.toml`
//!
//! ## Example
//!
//! ```no_run
//! use mqtt_replay::{
//!     broker::MqttConnector,
//!     config::{BrokerConfig, RecorderConfig},
//!     session::{Playback, Recorder},
//! };
//! use std::time::Duration;
//!
//! fn main() -> mqtt_replay::Result<()> {
//!     let broker = BrokerConfig::with_host("localhost");
//!     let connector = MqttConnector::new(broker.clone());
//!
//!     let mut recorder = Recorder::new(&RecorderConfig::new("logs"), &connector)?;
//!     recorder.wait_until_connected(broker.connect_timeout())?;
//!     recorder.start()?;
//!     std::thread::sleep(Duration::from_secs(10));
//!     recorder.stop()?;
//!
//!     let mut playback = Playback::open(recorder.log_path(), &connector, broker.connect_timeout(), false)?;
//!     playback.play(2.0)?;
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod config;
pub mod error;
pub mod interrupt;
pub mod logging;
pub mod session;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use broker::{BrokerClient, BrokerConnector, BrokerEvent, BrokerLink};
pub use config::AppConfig;
pub use error::{ReplayError, Result, ResultExt};
pub use interrupt::Interrupt;
pub use session::{PlayOptions, Playback, PlaybackReport, Recorder};
pub use store::LogStore;
pub use types::{LogEntry, SessionState};
