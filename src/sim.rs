//! A toy multi-day simulation harness: wires a handful of
//! [`StorageState`] engines through the five-phase protocol and logs a
//! `gather_state` snapshot after every tick, the analogue of the
//! teacher's thin `main.rs` wiring `AppState`/controller tasks together.
//!
//! This is explicitly outside the engine's own scope: the real
//! tariff-evaluation policy, the stochastic demand generator, the
//! accounting/broker plumbing, and the regulation signal are all external
//! collaborators per §6 of the engine specification. The generator here
//! is deliberately crude, just enough to exercise the protocol end to
//! end for a demo run.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use crate::storage::{gather_state, DemandElement, FixedSubscription, StorageState};

pub struct NamedEngine {
    pub name: String,
    pub state: StorageState,
}

/// Drives one or more engines through hourly timeslots, synthesizing a
/// simple stochastic arrival/departure stream for each tick.
pub struct SimulationClock {
    pub engines: Vec<NamedEngine>,
    rng: StdRng,
}

impl SimulationClock {
    pub fn new(rng_seed: u64) -> Self {
        Self {
            engines: Vec::new(),
            rng: StdRng::seed_from_u64(rng_seed),
        }
    }

    pub fn add_engine(&mut self, name: impl Into<String>, population: f64, unit_capacity_kw: f64, max_horizon: usize) {
        let state = StorageState::new(
            Arc::new(FixedSubscription::new(population)),
            unit_capacity_kw,
            max_horizon,
        );
        self.engines.push(NamedEngine {
            name: name.into(),
            state,
        });
    }

    /// Runs `ticks` timeslots from `start_ts`, logging a `gather_state`
    /// snapshot of every engine at the end of each tick. Soft failures
    /// (an individual phase returning `Err`) are logged and that engine is
    /// skipped for the rest of the tick; they never abort the run.
    pub fn run(&mut self, start_ts: i64, ticks: i64) {
        let arrivals = Normal::new(3.0, 1.0).expect("fixed normal distribution parameters");
        let rng = &mut self.rng;

        for tick in 0..ticks {
            let t = start_ts + tick;
            for engine in &mut self.engines {
                if let Err(e) = run_one_tick(engine, t, &arrivals, rng) {
                    tracing::error!(engine = %engine.name, ts = t, error = %e, "tick aborted");
                }
            }
        }
    }
}

fn run_one_tick(
    engine: &mut NamedEngine,
    t: i64,
    arrivals: &Normal<f64>,
    rng: &mut StdRng,
) -> Result<(), crate::error::StorageFault> {
    let r = 0.0; // no external regulation source wired into the toy harness
    engine.state.distribute_regulation(t, r)?;
    engine.state.collapse_elements(t)?;
    engine.state.rebalance(t)?;

    let max_horizon_bound = engine.state.max_horizon().saturating_sub(1).max(1);
    let h = rng.gen_range(0..=max_horizon_bound);
    let n: f64 = arrivals.sample(rng).max(0.0);
    let demand = vec![DemandElement::new(h, n, 0.0, uniform_distribution(h + 1))];
    engine.state.distribute_demand(t, &demand, 1.0)?;

    let (min, max, _nominal) = engine.state.get_min_max(t)?;
    let usage = (min + max) / 2.0;
    engine.state.distribute_usage(t, usage)?;

    tracing::info!(
        engine = %engine.name,
        ts = t,
        snapshot = %gather_state(&engine.state, t),
        "tick complete"
    );
    Ok(())
}

fn uniform_distribution(len: usize) -> Vec<f64> {
    let share = 1.0 / len as f64;
    vec![share; len]
}
