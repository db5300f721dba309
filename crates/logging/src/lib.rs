//! PeerLink logging
//!
//! Shared tracing setup for pool and agent processes. The default is a
//! null subscriber: nothing logs unless a binary (or test) opts in.

use tracing_subscriber::EnvFilter;

/// Log verbosity for a process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// The common CLI pattern: one flag flips info to debug.
    pub fn from_verbose(verbose: bool) -> Self {
        if verbose {
            Self::Debug
        } else {
            Self::Info
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

/// Initialize logging once at process start.
///
/// # Panics
///
/// Panics if a subscriber is already set; use [`try_init`] to tolerate that.
pub fn init(level: LogLevel) {
    try_init(level).expect("failed to initialize logging");
}

/// Initialize logging, returning an error if a subscriber is already set.
/// `RUST_LOG` overrides the given level.
pub fn try_init(level: LogLevel) -> Result<(), String> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| e.to_string())
}

/// Logging for tests: routed through the test writer so output stays
/// attached to the test that produced it. Safe to call repeatedly.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}
