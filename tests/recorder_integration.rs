//! Integration tests for the recorder
//!
//! These tests validate the recording workflow against the in-memory broker:
//! - Received messages land in the log with relative timestamps
//! - Stop is idempotent and no entry is written after it returns
//! - Consecutive sessions get consecutive log numbers

mod common;

use common::broker_helpers::recording;
use common::{assert_float_eq, test_timeout, wait_until};
use mqtt_replay::broker::MemoryBroker;
use mqtt_replay::config::RecorderConfig;
use mqtt_replay::session::Recorder;
use mqtt_replay::{LogStore, ReplayError, SessionState};
use serial_test::serial;
use std::thread;
use std::time::Duration;

#[test]
#[serial]
fn test_recorded_deltas_follow_arrival_times() {
    let dir = tempfile::tempdir().unwrap();
    let broker = MemoryBroker::new();
    let mut recorder = recording(&broker, dir.path(), &["#"]);

    broker.publish("sensors/a", "1");
    thread::sleep(Duration::from_millis(100));
    broker.publish("sensors/b", "2");
    thread::sleep(Duration::from_millis(200));
    broker.publish("sensors/c", "3");

    wait_until(|| recorder.stats().recorded == 3);
    recorder.stop().unwrap();

    let entries = LogStore::load(recorder.log_path()).unwrap();
    let pairs: Vec<(&str, &[u8])> = entries
        .iter()
        .map(|e| (e.topic.as_str(), e.message.as_slice()))
        .collect();
    assert_eq!(
        pairs,
        vec![
            ("sensors/a", b"1".as_slice()),
            ("sensors/b", b"2".as_slice()),
            ("sensors/c", b"3".as_slice()),
        ]
    );

    assert_float_eq(entries[1].time_delta - entries[0].time_delta, 0.1, 0.05);
    assert_float_eq(entries[2].time_delta - entries[1].time_delta, 0.2, 0.05);
    assert!(entries.iter().all(|e| e.time_delta >= 0.0));
}

#[test]
fn test_payload_with_delimiter_and_newline_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let broker = MemoryBroker::new();
    let mut recorder = recording(&broker, dir.path(), &["#"]);

    let payload = "a,b\nc `quoted` \r\nend";
    broker.publish("odd,topic", payload);
    wait_until(|| recorder.stats().recorded == 1);
    recorder.stop().unwrap();

    let entries = LogStore::load(recorder.log_path()).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].topic, "odd,topic");
    assert_eq!(entries[0].message, payload.as_bytes());
}

#[test]
fn test_stop_twice_is_same_as_once() {
    let dir = tempfile::tempdir().unwrap();
    let broker = MemoryBroker::new();
    let mut recorder = recording(&broker, dir.path(), &["#"]);

    broker.publish("t", "x");
    wait_until(|| recorder.stats().recorded == 1);

    recorder.stop().unwrap();
    let after_first = std::fs::read(recorder.log_path()).unwrap();
    recorder.stop().unwrap();
    let after_second = std::fs::read(recorder.log_path()).unwrap();

    assert_eq!(after_first, after_second);
    assert_eq!(recorder.state(), SessionState::Stopped);
}

#[test]
fn test_nothing_written_after_stop() {
    let dir = tempfile::tempdir().unwrap();
    let broker = MemoryBroker::new();
    let mut recorder = recording(&broker, dir.path(), &["#"]);

    let publisher = {
        let broker = broker.clone();
        thread::spawn(move || {
            for i in 0..200 {
                broker.publish("burst", i.to_string());
                thread::sleep(Duration::from_micros(200));
            }
        })
    };

    thread::sleep(Duration::from_millis(10));
    recorder.stop().unwrap();
    let recorded = recorder.stats().recorded;
    publisher.join().unwrap();

    let entries = LogStore::load(recorder.log_path()).unwrap();
    assert_eq!(entries.len() as u64, recorded);
    assert_eq!(recorder.stats().recorded, recorded);
}

#[test]
fn test_topic_filters_limit_recording() {
    let dir = tempfile::tempdir().unwrap();
    let broker = MemoryBroker::new();
    let mut recorder = recording(&broker, dir.path(), &["sensors/+/temp", "alerts/#"]);

    broker.publish("sensors/1/temp", "21.5");
    broker.publish("sensors/1/humidity", "40");
    broker.publish("alerts/fire/kitchen", "!");
    broker.publish("status", "ok");

    wait_until(|| recorder.stats().recorded == 2);
    recorder.stop().unwrap();

    let topics: Vec<String> = LogStore::load(recorder.log_path())
        .unwrap()
        .into_iter()
        .map(|e| e.topic)
        .collect();
    assert_eq!(topics, vec!["sensors/1/temp", "alerts/fire/kitchen"]);
}

#[test]
fn test_sessions_get_consecutive_log_numbers() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("3_log.csv"), "").unwrap();
    std::fs::write(dir.path().join("notes.txt"), "").unwrap();
    let broker = MemoryBroker::new();

    let first = recording(&broker, dir.path(), &["#"]);
    let second = recording(&broker, dir.path(), &["#"]);

    assert_eq!(first.log_path().file_name().unwrap(), "4_log.csv");
    assert_eq!(second.log_path().file_name().unwrap(), "5_log.csv");
}

#[test]
fn test_recorder_creates_missing_directory() {
    let dir = tempfile::tempdir().unwrap();
    let nested = dir.path().join("a").join("b");
    let broker = MemoryBroker::new();

    let mut recorder = Recorder::new(&RecorderConfig::new(&nested), &broker.connector()).unwrap();
    recorder.wait_until_connected(test_timeout()).unwrap();
    recorder.stop().unwrap();

    assert_eq!(recorder.log_path(), nested.join("1_log.csv"));
    assert!(LogStore::load(recorder.log_path()).unwrap().is_empty());
}

#[test]
fn test_broker_drop_mid_session_ends_recording_with_error() {
    let dir = tempfile::tempdir().unwrap();
    let broker = MemoryBroker::new();
    let mut recorder = recording(&broker, dir.path(), &["sensors/#"]);

    broker.publish("sensors/a", "1");
    wait_until(|| recorder.stats().recorded == 1);

    broker.shut_down("connection reset by peer");
    wait_until(|| recorder.state() == SessionState::Disconnected);

    // Nothing reaches the log once the connection is gone
    recorder.log_message("manual", b"still writable").unwrap();
    broker.publish("sensors/b", "2");
    thread::sleep(Duration::from_millis(50));
    assert_eq!(recorder.stats().received, 1);

    match recorder.stop() {
        Err(ReplayError::Connection(reason)) => {
            assert!(reason.contains("connection reset by peer"), "{reason}")
        }
        other => panic!("expected a connection error, got {:?}", other),
    }

    let topics: Vec<String> = LogStore::load(recorder.log_path())
        .unwrap()
        .into_iter()
        .map(|e| e.topic)
        .collect();
    assert_eq!(topics, vec!["sensors/a", "manual"]);
}

#[test]
fn test_recording_survives_broker_restart() {
    let dir = tempfile::tempdir().unwrap();
    let broker = MemoryBroker::new();
    let mut recorder = recording(&broker, dir.path(), &["sensors/#"]);

    broker.publish("sensors/a", "1");
    wait_until(|| recorder.stats().recorded == 1);

    broker.restart("keep-alive timeout");
    wait_until(|| broker.subscriptions() == vec!["sensors/#".to_string()]);
    broker.publish("sensors/b", "2");
    wait_until(|| recorder.stats().recorded == 2);

    assert!(recorder.connection_lost().is_none());
    assert_eq!(recorder.stats().reconnects, 1);
    recorder.stop().unwrap();
    assert_eq!(LogStore::load(recorder.log_path()).unwrap().len(), 2);
}
