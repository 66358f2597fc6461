//! Thin simulation-harness binary: loads configuration, initializes
//! tracing, and drives a handful of
//! [`open_energy_controller::sim::SimulationClock`] engines through a toy
//! multi-day run, logging a `gather_state` snapshot after every tick.
//!
//! This is the crate's only outer surface. The storage-state engine
//! itself (`src/storage/`) has no CLI, no environment variables, and no
//! file I/O of its own (§6 of the engine specification).

use anyhow::Result;
use open_energy_controller::config::AppConfig;
use open_energy_controller::sim::SimulationClock;
use open_energy_controller::telemetry::init_tracing;
use tracing::info;

fn main() -> Result<()> {
    let cfg = AppConfig::load()?;
    init_tracing(&cfg.telemetry);

    info!(
        unit_capacity_kw = cfg.storage.unit_capacity_kw,
        max_horizon = cfg.storage.max_horizon,
        "starting storage-state simulation harness"
    );

    let mut clock = SimulationClock::new(42);
    clock.add_engine(
        "residential-tou",
        1000.0,
        cfg.storage.unit_capacity_kw,
        cfg.storage.max_horizon,
    );
    clock.add_engine(
        "fleet-depot",
        400.0,
        cfg.storage.unit_capacity_kw * 2.0,
        cfg.storage.max_horizon,
    );

    clock.run(0, 96);

    info!("simulation run complete");
    Ok(())
}
