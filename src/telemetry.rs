//! Tracing initialization for the simulation harness binary.
//!
//! `src/storage` never calls this, it only emits `tracing` events through
//! whatever subscriber the host process installed. This module is the
//! thin analogue of the teacher's `init_tracing`, kept synchronous since
//! the harness has no server loop and no graceful-shutdown signal to wait
//! on.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::TelemetryConfig;

pub fn init_tracing(cfg: &TelemetryConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| cfg.log_level.clone().into());

    let registry = tracing_subscriber::registry().with(filter);

    if cfg.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
