//! Cooperative interrupt shared by every stage of a command
//!
//! An [`Interrupt`] is a latch backed by a tokio `watch` channel. Once
//! triggered (by Ctrl-C or by hand) it stays triggered, so a stage that
//! starts waiting after the signal still sees it.
//!
//! Blocking work such as connecting to a broker or draining a link runs
//! through [`Interrupt::guard_blocking`]: the work moves to the blocking
//! pool and the caller returns [`ReplayError::Interrupted`] as soon as the
//! latch fires, leaving the work to finish on its own.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

use crate::error::{ReplayError, Result};

/// Latch that resolves every pending wait once triggered
#[derive(Debug, Clone)]
pub struct Interrupt {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}

impl Interrupt {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Fire the latch; later calls have no further effect
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the latch has fired
    pub async fn triggered(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only ends by firing
        let _ = rx.wait_for(|fired| *fired).await;
    }

    /// Trigger on Ctrl-C from now on
    ///
    /// The signal handler is registered before this returns, so a Ctrl-C
    /// at any later point is caught. Must run inside a tokio runtime.
    pub async fn listen_for_ctrl_c(&self) {
        let mut signal = Box::pin(tokio::signal::ctrl_c());

        // The first poll registers the handler
        tokio::select! {
            biased;
            result = &mut signal => {
                self.on_signal(result);
                return;
            }
            _ = std::future::ready(()) => {}
        }

        let interrupt = self.clone();
        tokio::spawn(async move { interrupt.on_signal(signal.await) });
    }

    fn on_signal(&self, result: std::io::Result<()>) {
        match result {
            Ok(()) => {
                tracing::info!("Ctrl-C received, shutting down");
                self.trigger();
            }
            Err(e) => tracing::warn!("Cannot listen for Ctrl-C: {}", e),
        }
    }

    /// Run `work` unless the latch fires first
    pub async fn guard<F: Future>(&self, work: F) -> Result<F::Output> {
        tokio::select! {
            biased;
            _ = self.triggered() => Err(ReplayError::Interrupted),
            output = work => Ok(output),
        }
    }

    /// Run blocking `work` on the blocking pool unless the latch fires first
    ///
    /// On interrupt the work is not cancelled; it runs to completion in the
    /// background and its result is dropped.
    pub async fn guard_blocking<T, W>(&self, work: W) -> Result<T>
    where
        W: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let task = tokio::task::spawn_blocking(work);
        match self.guard(task).await? {
            Ok(result) => result,
            Err(e) => Err(ReplayError::Channel(format!("blocking task failed: {}", e))),
        }
    }
}
