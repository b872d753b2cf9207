//! Tracing initialization (fmt subscriber with env-based filtering).
//!
//! Log verbosity is controlled through `RUST_LOG`, e.g.
//! `RUST_LOG=tollgate=debug,sqlx=warn`. Defaults to `info` when unset.

use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initialize the global tracing subscriber.
///
/// Safe to call once per process; returns an error if a subscriber is
/// already installed.
pub fn init_telemetry() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    info!("Telemetry initialized");

    Ok(())
}
