//! Structured logging setup.
//!
//! `tracing` everywhere; `tracing-subscriber` decides how it is printed.
//! Text output for a terminal, JSON for anything that ships logs. The level
//! comes from `RUST_LOG` when set, otherwise from [`LogConfig::level`].

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LogConfig, LogFormat};

/// Installs the global subscriber.
///
/// Calling it twice is harmless: the second install fails and is ignored, so
/// tests that share a process can each call it.
pub fn init(cfg: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    let _ = match cfg.format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .try_init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init(),
    };
}
