//! Recorder for capturing broker traffic into a message log
//!
//! # Threads
//!
//! A recorder runs two background threads from the moment it is built:
//!
//! - the transport's event thread, which owns the broker connection and
//!   forwards connection outcomes and inbound messages into a channel
//! - the `recorder-dispatch` thread, which subscribes once the connection is
//!   acknowledged and turns messages into log entries while the shared
//!   recording flag is set
//!
//! [`Recorder::stop`] clears the flag, wakes the dispatcher and joins it
//! before closing the log file, so no entry is written after `stop` returns.
//!
//! When the broker connection drops and comes back, the dispatcher renews
//! every subscription and recording resumes. If it is lost for good the
//! recorder stops writing, [`Recorder::state`] reports
//! [`SessionState::Disconnected`] and [`Recorder::stop`] returns the reason.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, Receiver, RecvTimeoutError, Sender};

use crate::broker::{validate_filter, BrokerClient, BrokerConnector, BrokerEvent};
use crate::config::RecorderConfig;
use crate::error::{ReplayError, Result};
use crate::logging::ActivityLog;
use crate::store::LogStore;
use crate::types::{LogEntry, SessionState};

use super::types::{RecorderCounters, RecorderStats};

/// State shared between the recorder handle and its dispatcher
struct Shared {
    recording: AtomicBool,
    lost: Mutex<Option<String>>,
    store: Mutex<LogStore>,
    session_start: Instant,
    counters: RecorderCounters,
    activity: ActivityLog,
}

impl Shared {
    fn store(&self) -> MutexGuard<'_, LogStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lost(&self) -> Option<String> {
        self.lost.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn mark_lost(&self, reason: String) {
        self.recording.store(false, Ordering::SeqCst);
        *self.lost.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason);
    }

    fn append(&self, entry: &LogEntry) -> Result<()> {
        let result = self.store().append(entry);
        match result {
            Ok(()) => {
                RecorderCounters::bump(&self.counters.recorded);
                self.activity.message(entry);
            }
            Err(_) => RecorderCounters::bump(&self.counters.append_failures),
        }
        result
    }
}

/// Records messages from a broker into a numbered log file
pub struct Recorder {
    shared: Arc<Shared>,
    client: Arc<dyn BrokerClient>,
    topics: Vec<String>,
    log_path: PathBuf,
    address: String,
    connection_rx: Receiver<Result<()>>,
    connected: bool,
    shutdown_tx: Option<Sender<()>>,
    dispatcher: Option<JoinHandle<()>>,
    stopped: bool,
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("log_path", &self.log_path)
            .field("address", &self.address)
            .field("topics", &self.topics)
            .field("state", &self.state())
            .finish()
    }
}

impl Recorder {
    /// Create the log file and start connecting to the broker
    ///
    /// Returns once the log exists and the connection attempt is under way.
    /// Messages that arrive before [`Recorder::start`] are discarded.
    pub fn new(config: &RecorderConfig, connector: &dyn BrokerConnector) -> Result<Self> {
        if config.topics.is_empty() {
            return Err(ReplayError::Usage(
                "at least one topic filter is required".to_string(),
            ));
        }
        for topic in &config.topics {
            validate_filter(topic)?;
        }

        let mut store = LogStore::create_with_extension(&config.log_dir, &config.extension)?;
        store.set_flush_each_record(config.flush_each_record);
        let log_path = store.path().to_path_buf();

        let address = connector.address();
        let span = tracing::info_span!("recorder", log = %log_path.display());
        let (client, events) = connector.open()?.into_parts();

        let shared = Arc::new(Shared {
            recording: AtomicBool::new(false),
            lost: Mutex::new(None),
            store: Mutex::new(store),
            session_start: Instant::now(),
            counters: RecorderCounters::default(),
            activity: ActivityLog::new(span, config.verbose),
        });

        let (connection_tx, connection_rx) = bounded(1);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);

        let dispatcher = Dispatcher {
            shared: Arc::clone(&shared),
            client: Arc::clone(&client),
            topics: config.topics.clone(),
            address: address.clone(),
            events,
            shutdown_rx,
            connection_tx,
            connected: false,
        };
        let handle = std::thread::Builder::new()
            .name("recorder-dispatch".to_string())
            .spawn(move || dispatcher.run())?;

        Ok(Self {
            shared,
            client,
            topics: config.topics.clone(),
            log_path,
            address,
            connection_rx,
            connected: false,
            shutdown_tx: Some(shutdown_tx),
            dispatcher: Some(handle),
            stopped: false,
        })
    }

    /// Block until the broker accepts the connection
    ///
    /// A refused connection is a [`ReplayError::Connection`]; no answer
    /// within `timeout` is a [`ReplayError::ConnectTimeout`].
    pub fn wait_until_connected(&mut self, timeout: Duration) -> Result<()> {
        if self.connected {
            return Ok(());
        }
        match self.connection_rx.recv_timeout(timeout) {
            Ok(Ok(())) => {
                self.connected = true;
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(RecvTimeoutError::Timeout) => Err(ReplayError::ConnectTimeout {
                address: self.address.clone(),
                timeout_ms: timeout.as_millis() as u64,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(ReplayError::Connection(format!(
                "recorder for {} stopped before the connection was established",
                self.address
            ))),
        }
    }

    /// Begin writing received messages to the log
    pub fn start(&self) -> Result<()> {
        if self.stopped {
            return Err(ReplayError::Usage(
                "cannot start a recorder that has been stopped".to_string(),
            ));
        }
        if let Some(reason) = self.shared.lost() {
            return Err(self.lost_error(&reason));
        }
        if !self.shared.recording.swap(true, Ordering::SeqCst) {
            let _guard = self.shared.activity.span().enter();
            tracing::info!("Logging started");
        }
        Ok(())
    }

    /// Stop recording, disconnect and close the log
    ///
    /// If the connection was lost for good while recording, the log is still
    /// closed and the loss is returned as a [`ReplayError::Connection`].
    /// Calling this again has no further effect.
    pub fn stop(&mut self) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        self.shared.recording.store(false, Ordering::SeqCst);

        // Dropping the sender wakes the dispatcher's select
        self.shutdown_tx.take();
        if let Some(handle) = self.dispatcher.take() {
            if handle.join().is_err() {
                tracing::error!("Recorder dispatcher thread panicked");
            }
        }

        if let Err(e) = self.client.disconnect() {
            tracing::warn!("Disconnect from {} failed: {}", self.address, e);
        }

        self.shared.store().close()?;

        match self.shared.lost() {
            Some(reason) => Err(self.lost_error(&reason)),
            None => Ok(()),
        }
    }

    fn lost_error(&self, reason: &str) -> ReplayError {
        ReplayError::Connection(format!("connection to {} was lost: {}", self.address, reason))
    }

    /// Append a message directly, bypassing the broker and the recording flag
    ///
    /// Fails once the recorder has been stopped.
    pub fn log_message(&self, topic: &str, payload: &[u8]) -> Result<()> {
        let entry = LogEntry::at(self.shared.session_start.elapsed(), topic, payload);
        self.shared.append(&entry)
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        if self.stopped {
            SessionState::Stopped
        } else if self.shared.lost().is_some() {
            SessionState::Disconnected
        } else if self.is_recording() {
            SessionState::Recording
        } else {
            SessionState::Idle
        }
    }

    /// Whether received messages are currently written
    pub fn is_recording(&self) -> bool {
        self.shared.recording.load(Ordering::SeqCst)
    }

    /// Path of the log file
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Subscribed topic filters
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Why the broker connection ended, once it has been lost for good
    pub fn connection_lost(&self) -> Option<String> {
        self.shared.lost()
    }

    /// Message counters so far
    pub fn stats(&self) -> RecorderStats {
        self.shared.counters.snapshot()
    }

    /// Time since the session start instant
    pub fn elapsed(&self) -> Duration {
        self.shared.session_start.elapsed()
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::error!("Failed to stop recorder: {}", e);
        }
    }
}

/// Background consumer of broker events
struct Dispatcher {
    shared: Arc<Shared>,
    client: Arc<dyn BrokerClient>,
    topics: Vec<String>,
    address: String,
    events: Receiver<BrokerEvent>,
    shutdown_rx: Receiver<()>,
    connection_tx: Sender<Result<()>>,
    /// Whether the broker has acknowledged us at least once
    connected: bool,
}

impl Dispatcher {
    fn run(mut self) {
        let _entered = self.shared.activity.span().clone().entered();
        tracing::debug!("Recorder dispatcher started");

        loop {
            select! {
                recv(self.events) -> event => match event {
                    Ok(event) => {
                        if !self.handle(event) {
                            break;
                        }
                    }
                    Err(_) => {
                        tracing::debug!("Broker event stream closed");
                        break;
                    }
                },
                recv(self.shutdown_rx) -> _ => break,
            }
        }

        tracing::debug!("Recorder dispatcher stopped");
    }

    /// Returns false when no further events can arrive
    fn handle(&mut self, event: BrokerEvent) -> bool {
        match event {
            BrokerEvent::Connected => {
                if self.connected {
                    tracing::info!("Reconnected to {}", self.address);
                } else {
                    tracing::info!("Connection to {} successful", self.address);
                }
                self.connected = true;
                self.subscribe_all();
                let _ = self.connection_tx.try_send(Ok(()));
                true
            }
            BrokerEvent::Reconnecting { reason } => {
                tracing::warn!(
                    "Connection to {} dropped ({}); messages are missed until it returns",
                    self.address,
                    reason
                );
                RecorderCounters::bump(&self.shared.counters.reconnects);
                true
            }
            BrokerEvent::ConnectFailed { reason } => {
                tracing::error!("Connection to {} was unsuccessful: {}", self.address, reason);
                if self.connected {
                    self.shared.mark_lost(reason);
                } else {
                    let _ = self.connection_tx.try_send(Err(ReplayError::Connection(format!(
                        "{} (check that the broker address {} is correct)",
                        reason, self.address
                    ))));
                }
                false
            }
            BrokerEvent::Message { topic, payload } => {
                self.on_message(topic, payload);
                true
            }
            BrokerEvent::Disconnected { reason } => {
                let reason = reason.unwrap_or_else(|| "closed by the broker".to_string());
                if self.connected {
                    tracing::error!("Lost connection to {}: {}", self.address, reason);
                    self.shared.mark_lost(reason);
                } else {
                    let _ = self.connection_tx.try_send(Err(ReplayError::Connection(format!(
                        "{} closed the connection: {}",
                        self.address, reason
                    ))));
                }
                false
            }
        }
    }

    fn subscribe_all(&self) {
        for topic in &self.topics {
            match self.client.subscribe(topic) {
                Ok(()) => tracing::info!("Subscribed to: {}", topic),
                Err(e) => tracing::error!("Failed to subscribe to '{}': {}", topic, e),
            }
        }
    }

    fn on_message(&self, topic: String, payload: Vec<u8>) {
        let counters = &self.shared.counters;
        RecorderCounters::bump(&counters.received);

        if !self.shared.recording.load(Ordering::SeqCst) {
            RecorderCounters::bump(&counters.dropped);
            return;
        }

        let entry = LogEntry::at(self.shared.session_start.elapsed(), topic, payload);
        // Failures are logged by the store and counted; recording continues
        let _ = self.shared.append(&entry);
    }
}
