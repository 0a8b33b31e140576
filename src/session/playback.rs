//! Playback of recorded message logs
//!
//! Every entry becomes its own delay-then-publish task on a tokio
//! [`JoinSet`]. All delays are measured from one start instant, so a run
//! lasts as long as the latest entry (scaled by speed), not the sum of the
//! gaps. A failed publish is logged and reported; it never delays or
//! cancels the others.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::Instrument;

use crate::broker::{BrokerClient, BrokerConnector, BrokerLink};
use crate::error::{ReplayError, Result};
use crate::logging::ActivityLog;
use crate::store::LogStore;
use crate::types::{LogEntry, SessionState};

use super::types::{PlayOptions, PlaybackReport, PublishFailure};

/// Replays a loaded log against a broker
pub struct Playback {
    entries: Arc<Vec<LogEntry>>,
    client: Arc<dyn BrokerClient>,
    link: Option<BrokerLink>,
    source: Option<PathBuf>,
    activity: ActivityLog,
    state: SessionState,
}

impl std::fmt::Debug for Playback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Playback")
            .field("source", &self.source)
            .field("entries", &self.entries.len())
            .field("state", &self.state)
            .finish()
    }
}

impl Playback {
    /// Load a log and connect to the broker
    ///
    /// The whole file is parsed before any connection is attempted, so a
    /// malformed log fails without touching the broker.
    pub fn open(
        path: impl AsRef<Path>,
        connector: &dyn BrokerConnector,
        connect_timeout: Duration,
        verbose: bool,
    ) -> Result<Self> {
        let path = path.as_ref();
        let entries = LogStore::load(path)?;

        let link = connector.open()?;
        link.wait_connected(connect_timeout)?;

        let span = tracing::info_span!("playback", log = %path.display());
        let mut playback = Self::from_entries(entries, link.client(), verbose);
        playback.activity = ActivityLog::new(span, verbose);
        playback.source = Some(path.to_path_buf());
        playback.link = Some(link);
        Ok(playback)
    }

    /// Play entries already in memory through an existing client
    pub fn from_entries(entries: Vec<LogEntry>, client: Arc<dyn BrokerClient>, verbose: bool) -> Self {
        Self {
            entries: Arc::new(entries),
            client,
            link: None,
            source: None,
            activity: ActivityLog::new(tracing::info_span!("playback"), verbose),
            state: SessionState::Idle,
        }
    }

    /// Loaded entries in file order
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// File the entries were loaded from, if any
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Offset of the last entry, in recorded seconds
    pub fn duration(&self) -> f64 {
        self.entries
            .iter()
            .map(|e| e.time_delta)
            .fold(0.0, f64::max)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Replay every entry at `speed` and block until all have been attempted
    pub fn play(&mut self, speed: f64) -> Result<PlaybackReport> {
        self.play_with(PlayOptions::at_speed(speed))
    }

    /// Replay with explicit options on a dedicated runtime
    ///
    /// Must not be called from inside a tokio runtime; use
    /// [`Playback::play_until`] there.
    pub fn play_with(&mut self, options: PlayOptions) -> Result<PlaybackReport> {
        options.validate()?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_time()
            .thread_name("playback")
            .build()?;
        runtime.block_on(self.play_until(options, std::future::pending::<()>()))
    }

    /// Replay until done or until `shutdown` resolves
    ///
    /// On shutdown every publish still waiting is aborted and counted as
    /// abandoned. Publishes already handed to the client are not recalled.
    pub async fn play_until<F>(&mut self, options: PlayOptions, shutdown: F) -> Result<PlaybackReport>
    where
        F: Future<Output = ()>,
    {
        options.validate()?;
        if self.state.is_stopped() {
            return Err(ReplayError::Usage(
                "playback has been closed".to_string(),
            ));
        }

        // Compute the full schedule first so a bad entry fails before anything is sent
        let mut schedule = Vec::with_capacity(self.entries.len());
        let mut skipped = 0;
        for (index, entry) in self.entries.iter().enumerate() {
            match options.delay_for(entry.time_delta)? {
                Some(delay) => schedule.push((index, delay)),
                None => skipped += 1,
            }
        }

        let mut report = PlaybackReport {
            scheduled: schedule.len(),
            skipped,
            ..Default::default()
        };
        let span = self.activity.span().clone();
        {
            let _guard = span.enter();
            if skipped > 0 {
                tracing::info!("Skipping {} entries before {}s", skipped, options.start_offset);
            }
            tracing::info!(
                "Playing {} entries at speed {} (about {:.3}s)",
                report.scheduled,
                options.speed,
                (self.duration() - options.start_offset).max(0.0) / options.speed
            );
        }

        self.state = SessionState::Playing;
        let start = Instant::now();
        let mut tasks = JoinSet::new();
        for (index, delay) in schedule {
            let entries = Arc::clone(&self.entries);
            let client = Arc::clone(&self.client);
            let activity = self.activity.clone();
            tasks.spawn(
                async move {
                    tokio::time::sleep_until(start + delay).await;

                    // The client may block on a full request queue; keep that off the timer workers
                    let sent = {
                        let entries = Arc::clone(&entries);
                        tokio::task::spawn_blocking(move || {
                            let entry = &entries[index];
                            client.publish(&entry.topic, &entry.message)
                        })
                        .await
                    };

                    let entry = &entries[index];
                    let reason = match sent {
                        Ok(Ok(())) => {
                            activity.message(entry);
                            return Ok(());
                        }
                        Ok(Err(e)) => e.to_string(),
                        Err(e) => format!("publish task failed: {}", e),
                    };
                    Err(PublishFailure {
                        index,
                        time_delta: entry.time_delta,
                        topic: entry.topic.clone(),
                        reason,
                    })
                }
                .instrument(span.clone()),
            );
        }

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    None => break,
                    Some(Ok(Ok(()))) => report.published += 1,
                    Some(Ok(Err(failure))) => {
                        let _guard = span.enter();
                        tracing::error!(
                            "Publish of entry {} at {}s to '{}' failed: {}",
                            failure.index,
                            failure.time_delta,
                            failure.topic,
                            failure.reason
                        );
                        report.failures.push(failure);
                    }
                    Some(Err(e)) if e.is_cancelled() => report.abandoned += 1,
                    Some(Err(e)) => {
                        let _guard = span.enter();
                        tracing::error!("Publish task panicked: {}", e);
                    }
                },
                _ = &mut shutdown, if !report.interrupted => {
                    let _guard = span.enter();
                    tracing::warn!("Playback interrupted, abandoning {} pending publishes", tasks.len());
                    report.interrupted = true;
                    tasks.abort_all();
                }
            }
        }

        report.elapsed = start.elapsed();
        self.state = SessionState::Idle;

        let _guard = span.enter();
        tracing::info!(
            "Playback finished in {:.3}s: {} published, {} failed, {} abandoned",
            report.elapsed.as_secs_f64(),
            report.published,
            report.failures.len(),
            report.abandoned
        );
        Ok(report)
    }

    /// Disconnect, waiting up to `drain` for queued publishes to go out
    pub fn close(&mut self, drain: Duration) {
        self.state = SessionState::Stopped;
        if let Some(link) = self.link.take() {
            link.close(drain);
        }
    }
}

impl Drop for Playback {
    fn drop(&mut self) {
        if let Some(link) = self.link.take() {
            if let Err(e) = link.client().disconnect() {
                tracing::debug!("Disconnect on drop failed: {}", e);
            }
        }
    }
}
