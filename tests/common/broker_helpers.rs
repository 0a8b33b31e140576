//! Helpers for driving sessions against the in-memory broker

use super::{test_timeout, wait_until};
use mqtt_replay::broker::{MemoryBroker, PublishedMessage};
use mqtt_replay::config::RecorderConfig;
use mqtt_replay::session::Recorder;
use std::path::Path;
use std::time::Instant;

/// A recorder that is connected, subscribed and recording
pub fn recording(broker: &MemoryBroker, dir: &Path, topics: &[&str]) -> Recorder {
    let config = RecorderConfig::new(dir).with_topics(topics.iter().copied());
    let mut recorder = Recorder::new(&config, &broker.connector()).unwrap();
    recorder.wait_until_connected(test_timeout()).unwrap();
    wait_until(|| broker.subscriptions().len() >= topics.len());
    recorder.start().unwrap();
    recorder
}

/// Arrival offsets in seconds relative to `start`, sorted by topic
pub fn arrival_offsets(published: &[PublishedMessage], start: Instant) -> Vec<(String, f64)> {
    let mut offsets: Vec<(String, f64)> = published
        .iter()
        .map(|m| (m.topic.clone(), m.at.saturating_duration_since(start).as_secs_f64()))
        .collect();
    offsets.sort_by(|a, b| a.0.cmp(&b.0));
    offsets
}
