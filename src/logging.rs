//! Logging setup and per-component message tracing
//!
//! Binaries call [`init`] once. Library components never install a
//! subscriber; each owns an [`ActivityLog`] carrying its span and whether
//! per-message lines should be emitted at INFO (verbose) or DEBUG.

use std::fmt::Display;

use tracing::Span;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter directive for a verbosity setting
pub fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "info,mqtt_replay=debug,rumqttc=warn"
    } else {
        "warn"
    }
}

/// Install the global subscriber
///
/// `RUST_LOG` takes precedence over the verbosity flag.
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

/// Span plus verbosity for one recorder or playback instance
#[derive(Debug, Clone)]
pub struct ActivityLog {
    span: Span,
    verbose: bool,
}

impl ActivityLog {
    pub fn new(span: Span, verbose: bool) -> Self {
        Self { span, verbose }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Emit a per-message line at INFO when verbose, DEBUG otherwise
    pub fn message(&self, line: impl Display) {
        let _guard = self.span.enter();
        if self.verbose {
            tracing::info!("{}", line);
        } else {
            tracing::debug!("{}", line);
        }
    }
}
