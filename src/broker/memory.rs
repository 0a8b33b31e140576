//! In-process broker
//!
//! [`MemoryBroker`] routes publishes between links opened from its
//! connectors, using MQTT topic filter matching. It keeps a log of every
//! accepted publish with its arrival instant, and can be told to refuse or
//! ignore connections, fail publishes to chosen topics, restart (dropping
//! every subscription) or go away for good. Recorder and playback tests run
//! against it instead of a network broker.
//!
//! # Example
//!
//! ```
//! use mqtt_replay::broker::{BrokerConnector, MemoryBroker};
//! use std::time::Duration;
//!
//! let broker = MemoryBroker::new();
//! let link = broker.connector().open().unwrap();
//! link.wait_connected(Duration::from_millis(100)).unwrap();
//!
//! link.client().publish("sensors/1", b"42").unwrap();
//! assert_eq!(broker.published().len(), 1);
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crossbeam_channel::{unbounded, Sender};

use super::topic::{topic_matches, validate_filter};
use super::{BrokerClient, BrokerConnector, BrokerEvent, BrokerLink};
use crate::error::{ReplayError, Result};

/// A publish the broker accepted
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    /// Topic published to
    pub topic: String,
    /// Payload bytes
    pub payload: Vec<u8>,
    /// When the broker received it
    pub at: Instant,
}

#[derive(Debug)]
struct LinkState {
    filters: Vec<String>,
    events: Sender<BrokerEvent>,
}

#[derive(Debug, Default)]
struct BrokerState {
    links: HashMap<u64, LinkState>,
    next_link: u64,
    refusal: Option<String>,
    /// Connection attempts left unanswered while `silent`
    silent: bool,
    unanswered: Vec<Sender<BrokerEvent>>,
    failing_topics: HashSet<String>,
    published: Vec<PublishedMessage>,
}

impl BrokerState {
    fn route(&mut self, topic: &str, payload: &[u8]) {
        self.published.push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            at: Instant::now(),
        });

        for link in self.links.values() {
            if link.filters.iter().any(|f| topic_matches(f, topic)) {
                let _ = link.events.send(BrokerEvent::Message {
                    topic: topic.to_string(),
                    payload: payload.to_vec(),
                });
            }
        }
    }
}

/// In-process publish/subscribe broker
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

fn lock(state: &Mutex<BrokerState>) -> MutexGuard<'_, BrokerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector opening links to this broker
    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            state: Arc::clone(&self.state),
        }
    }

    /// Refuse every following connection attempt with `reason`
    pub fn refuse_connections(&self, reason: impl Into<String>) {
        lock(&self.state).refusal = Some(reason.into());
    }

    /// Leave every following connection attempt unanswered
    pub fn ignore_connections(&self) {
        lock(&self.state).silent = true;
    }

    /// Drop every connection and accept it again, as a restarting broker
    /// would; subscriptions are lost and must be renewed
    pub fn restart(&self, reason: &str) {
        let mut state = lock(&self.state);
        for link in state.links.values_mut() {
            link.filters.clear();
            let _ = link.events.send(BrokerEvent::Reconnecting {
                reason: reason.to_string(),
            });
            let _ = link.events.send(BrokerEvent::Connected);
        }
    }

    /// Close every connection from the broker side
    pub fn shut_down(&self, reason: &str) {
        let mut state = lock(&self.state);
        for (_, link) in state.links.drain() {
            let _ = link.events.send(BrokerEvent::Disconnected {
                reason: Some(reason.to_string()),
            });
        }
    }

    /// Make publishes to `topic` fail
    pub fn fail_publishes_to(&self, topic: impl Into<String>) {
        lock(&self.state).failing_topics.insert(topic.into());
    }

    /// Publish from outside any link, as another client would
    pub fn publish(&self, topic: &str, payload: impl AsRef<[u8]>) {
        lock(&self.state).route(topic, payload.as_ref());
    }

    /// Every accepted publish, in arrival order
    pub fn published(&self) -> Vec<PublishedMessage> {
        lock(&self.state).published.clone()
    }

    /// Number of currently open links
    pub fn link_count(&self) -> usize {
        lock(&self.state).links.len()
    }

    /// All filters subscribed by open links
    pub fn subscriptions(&self) -> Vec<String> {
        let state = lock(&self.state);
        let mut filters: Vec<String> = state
            .links
            .values()
            .flat_map(|l| l.filters.iter().cloned())
            .collect();
        filters.sort();
        filters
    }
}

/// Opens links to a [`MemoryBroker`]
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    state: Arc<Mutex<BrokerState>>,
}

impl BrokerConnector for MemoryConnector {
    fn address(&self) -> String {
        "memory".to_string()
    }

    fn open(&self) -> Result<BrokerLink> {
        let (tx, rx) = unbounded();
        let mut state = lock(&self.state);

        if let Some(reason) = state.refusal.clone() {
            let _ = tx.send(BrokerEvent::ConnectFailed { reason });
            let client = MemoryClient {
                id: None,
                state: Arc::clone(&self.state),
            };
            return Ok(BrokerLink::new(Arc::new(client), rx, self.address()));
        }

        if state.silent {
            state.unanswered.push(tx);
            let client = MemoryClient {
                id: None,
                state: Arc::clone(&self.state),
            };
            return Ok(BrokerLink::new(Arc::new(client), rx, self.address()));
        }

        let id = state.next_link;
        state.next_link += 1;
        let _ = tx.send(BrokerEvent::Connected);
        state.links.insert(
            id,
            LinkState {
                filters: Vec::new(),
                events: tx,
            },
        );

        let client = MemoryClient {
            id: Some(id),
            state: Arc::clone(&self.state),
        };
        Ok(BrokerLink::new(Arc::new(client), rx, self.address()))
    }
}

struct MemoryClient {
    /// `None` when the connection was refused
    id: Option<u64>,
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryClient {
    fn not_connected(&self) -> ReplayError {
        ReplayError::Connection("memory broker link is not connected".to_string())
    }
}

impl BrokerClient for MemoryClient {
    fn subscribe(&self, filter: &str) -> Result<()> {
        validate_filter(filter)?;
        let id = self.id.ok_or_else(|| self.not_connected())?;
        let mut state = lock(&self.state);
        let link = state.links.get_mut(&id).ok_or_else(|| self.not_connected())?;
        link.filters.push(filter.to_string());
        Ok(())
    }

    fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        let id = self
            .id
            .ok_or_else(|| ReplayError::publish(topic, "not connected"))?;
        let mut state = lock(&self.state);
        if !state.links.contains_key(&id) {
            return Err(ReplayError::publish(topic, "link closed"));
        }
        if state.failing_topics.contains(topic) {
            return Err(ReplayError::publish(topic, "injected transport failure"));
        }
        state.route(topic, payload);
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        let Some(id) = self.id else {
            return Ok(());
        };
        if let Some(link) = lock(&self.state).links.remove(&id) {
            let _ = link.events.send(BrokerEvent::Disconnected { reason: None });
        }
        Ok(())
    }
}
