//! The engine proper: owns one [`RingHorizon`], binds to one tariff
//! subscription, and implements the five-phase per-timeslot protocol plus
//! subscription migration and min/max/nominal queries.
//!
//! Single-threaded and not reentrant: there is no internal suspension
//! point and no interior mutability beyond `&mut self`. Ordering guarantees
//! are entirely on the caller: the five phases below must run in order
//! for a given timeslot, and [`StorageState::move_subscribers`] must
//! complete, on both engines, before any phase runs for the new timeslot.

use std::sync::Arc;

use super::demand::DemandElement;
use super::element::{StorageElement, EQ_TOL, ZERO_TOL};
use super::ring_horizon::{RingHorizon, DEFAULT_CAPACITY};
use super::subscription::SubscriptionHandle;
use crate::error::StorageFault;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Regulation,
    Collapse,
    Rebalance,
    Demand,
    Usage,
}

impl Phase {
    fn name(self) -> &'static str {
        match self {
            Phase::Regulation => "distribute_regulation",
            Phase::Collapse => "collapse_elements",
            Phase::Rebalance => "rebalance",
            Phase::Demand => "distribute_demand",
            Phase::Usage => "distribute_usage",
        }
    }
}

#[derive(Debug)]
pub struct StorageState {
    ring: RingHorizon,
    subscription: Arc<dyn SubscriptionHandle>,
    unit_capacity: f64,
    max_horizon: usize,
    expected_ts: Option<i64>,
    phase: Phase,
}

impl StorageState {
    /// Builds an engine over the default 96-slot ring (four days).
    pub fn new(subscription: Arc<dyn SubscriptionHandle>, unit_capacity: f64, max_horizon: usize) -> Self {
        Self::with_capacity(subscription, unit_capacity, max_horizon, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(
        subscription: Arc<dyn SubscriptionHandle>,
        unit_capacity: f64,
        max_horizon: usize,
        ring_capacity: usize,
    ) -> Self {
        assert!(unit_capacity > 0.0, "unit_capacity must be positive");
        assert!(
            max_horizon > 1 && max_horizon <= ring_capacity,
            "max_horizon must be in (1, ring_capacity]"
        );
        Self {
            ring: RingHorizon::new(ring_capacity),
            subscription,
            unit_capacity,
            max_horizon,
            expected_ts: None,
            phase: Phase::Regulation,
        }
    }

    pub fn population(&self) -> f64 {
        self.subscription.customers_committed()
    }

    pub fn unit_capacity(&self) -> f64 {
        self.unit_capacity
    }

    pub fn max_horizon(&self) -> usize {
        self.max_horizon
    }

    pub fn ring_capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Read-only access to the underlying horizon, for simulation
    /// harnesses and tests that need to inspect a specific cell rather
    /// than the aggregate `get_min_max`/`gather_state` views.
    pub fn ring(&self) -> &RingHorizon {
        &self.ring
    }

    pub(crate) fn clear_ring(&mut self) {
        self.ring.clear_all();
    }

    pub(crate) fn force_set(&mut self, ts: i64, cell: StorageElement) {
        self.ring.force_set(ts, cell);
    }

    /// Resets the phase state machine so the next expected call is
    /// `distribute_regulation(t, ..)`. Used by the codec after a restore
    /// and available to a simulation harness recovering from an aborted
    /// cycle.
    pub fn reset_cycle(&mut self, t: i64) {
        self.expected_ts = Some(t);
        self.phase = Phase::Regulation;
    }

    fn check_phase(&mut self, t: i64, expected: Phase) -> Result<(), StorageFault> {
        if self.phase != expected {
            return Err(StorageFault::OutOfOrderPhase {
                ts: t,
                expected: expected.name(),
                actual: self.phase.name(),
            });
        }
        match self.expected_ts {
            Some(et) if et != t => Err(StorageFault::OutOfOrderPhase {
                ts: t,
                expected: expected.name(),
                actual: self.phase.name(),
            }),
            Some(_) => Ok(()),
            None => {
                self.expected_ts = Some(t);
                Ok(())
            }
        }
    }

    fn advance(&mut self, t: i64, completed: Phase) {
        self.phase = match completed {
            Phase::Regulation => Phase::Collapse,
            Phase::Collapse => Phase::Rebalance,
            Phase::Rebalance => Phase::Demand,
            Phase::Demand => Phase::Usage,
            Phase::Usage => {
                self.expected_ts = Some(t + 1);
                Phase::Regulation
            }
        };
    }

    /// (a) Distributes a signed regulation quantity `r` across every
    /// non-must-run bucket from `t` forward. `r > 0` (up-regulation) adds
    /// energy back to future commitments; `r < 0` (down-regulation)
    /// removes it. Must run before `distribute_demand`.
    pub fn distribute_regulation(&mut self, t: i64, r: f64) -> Result<(), StorageFault> {
        self.check_phase(t, Phase::Regulation)?;
        let uc = self.unit_capacity;

        if r == 0.0 {
            self.advance(t, Phase::Regulation);
            return Ok(());
        }

        let total_regulable: f64 = self
            .ring
            .as_list(t)
            .map(|(_, cell)| {
                (1..cell.len())
                    .map(|i| (cell.population[i] * uc).min(cell.energy[i]))
                    .sum::<f64>()
            })
            .sum();

        if total_regulable.abs() < ZERO_TOL {
            tracing::error!(
                r,
                "regulation requested with no regulable flexibility, clipping to zero"
            );
            self.advance(t, Phase::Regulation);
            return Ok(());
        }

        let mut ratio = -r / total_regulable;
        if ratio.abs() > 1.0 {
            tracing::warn!(
                r,
                total_regulable,
                ratio,
                "regulation exceeds regulable flexibility, clipping to feasible bound"
            );
            ratio = ratio.clamp(-1.0, 1.0);
        }

        let offsets: Vec<i64> = self.ring.as_list(t).map(|(ts, _)| ts).collect();
        for ts in offsets {
            if let Some(cell) = self.ring.get_mut(ts) {
                for i in 1..cell.len() {
                    let regulable = (cell.population[i] * uc).min(cell.energy[i]);
                    cell.energy[i] -= regulable * ratio;
                }
                cell.repair_negatives();
            }
        }

        self.advance(t, Phase::Regulation);
        Ok(())
    }

    /// (b) Shrinks every active cell's arrays by one bucket, folding any
    /// positive trailing-bucket energy into bucket `k - 2`.
    pub fn collapse_elements(&mut self, t: i64) -> Result<(), StorageFault> {
        self.check_phase(t, Phase::Collapse)?;
        let offsets: Vec<i64> = self.ring.as_list(t).map(|(ts, _)| ts).collect();
        for ts in offsets {
            if let Some(cell) = self.ring.get_mut(ts) {
                cell.collapse();
            }
        }
        self.advance(t, Phase::Collapse);
        Ok(())
    }

    /// (c) Restores the cohort-width invariant for every cell strictly
    /// after `t`, cascading population up one bucket at a time when a
    /// bucket has been over-satisfied relative to its expected remaining
    /// need.
    pub fn rebalance(&mut self, t: i64) -> Result<(), StorageFault> {
        self.check_phase(t, Phase::Rebalance)?;
        let uc = self.unit_capacity;
        let offsets: Vec<i64> = self
            .ring
            .as_list(t)
            .map(|(ts, _)| ts)
            .filter(|&ts| ts > t)
            .collect();

        for ts in offsets {
            if let Some(cell) = self.ring.get_mut(ts) {
                let k = cell.len();
                for i in 1..k {
                    let pop_i = cell.population[i];
                    let chunk = pop_i * uc;
                    if chunk <= 0.0 {
                        continue;
                    }
                    let mut ratio = (cell.energy[i] - chunk * (k - i - 1) as f64) / chunk;
                    if ratio > 1.5 {
                        tracing::warn!(ts, bucket = i, ratio, "rebalance ratio beyond 1.5, clipping");
                        ratio = 1.5;
                    }
                    if ratio > 0.5 {
                        let move_frac = ratio - 0.5;
                        let moved_pop = pop_i * move_frac;
                        cell.population[i] -= moved_pop;
                        cell.population[i - 1] += moved_pop;
                        cell.energy[i] = cell.population[i] * uc * (k as f64 - i as f64 - 0.5);
                        cell.energy[i - 1] =
                            cell.population[i - 1] * uc * (k as f64 - (i - 1) as f64 - 0.5);
                    }
                }
                cell.repair_negatives();
            }
        }

        self.advance(t, Phase::Rebalance);
        Ok(())
    }

    /// (d) Admits `new_demand` (sorted by ascending horizon) into the
    /// horizon, crediting `activeChargers` for every hour a cohort remains
    /// plugged in and injecting population/energy into the cell at its
    /// departure timeslot. `ratio` is this tariff's share of the total
    /// customer population.
    pub fn distribute_demand(
        &mut self,
        t: i64,
        new_demand: &[DemandElement],
        ratio: f64,
    ) -> Result<(), StorageFault> {
        self.check_phase(t, Phase::Demand)?;
        let uc = self.unit_capacity;

        self.ring.clean(t);

        let mut activations: f64 = new_demand.iter().map(|de| de.n_vehicles * ratio).sum();
        let max_h = new_demand.iter().map(|de| de.horizon).max().unwrap_or(0);
        let max_ts = t + max_h as i64;

        let mut demand_idx = 0usize;
        for ts in t..=max_ts {
            let k = (ts - t + 1) as usize;
            if self.ring.get(ts).is_none() {
                self.ring.set(ts, StorageElement::empty(k))?;
            }
            if let Some(cell) = self.ring.get_mut(ts) {
                cell.add_chargers(activations);
            }

            while demand_idx < new_demand.len() && new_demand[demand_idx].horizon == (ts - t) as usize {
                let de = &new_demand[demand_idx];
                activations -= de.n_vehicles * ratio;

                if let Some(cell) = self.ring.get_mut(ts) {
                    let k = cell.len();
                    let m = k.min(de.distribution.len());
                    let mut pop_added = vec![0.0; m];
                    let mut energy_added = vec![0.0; m];
                    for ix in 0..m {
                        let pa = de.n_vehicles * de.distribution[ix] * ratio;
                        pop_added[ix] = pa;
                        energy_added[ix] = uc * pa * (k as f64 - ix as f64 - 0.5);
                    }
                    cell.add_commitments(&pop_added, &energy_added);
                }
                demand_idx += 1;
            }
        }

        self.advance(t, Phase::Demand);
        Ok(())
    }

    /// (e) Bounds on this hour's consumption: `(min, max, nominal)`.
    /// Callable any time after `distribute_demand` for the same timeslot
    /// and before `distribute_usage`; does not advance the phase.
    pub fn get_min_max(&self, t: i64) -> Result<(f64, f64, f64), StorageFault> {
        if self.phase != Phase::Usage || self.expected_ts != Some(t) {
            return Err(StorageFault::OutOfOrderPhase {
                ts: t,
                expected: "get_min_max",
                actual: self.phase.name(),
            });
        }
        let uc = self.unit_capacity;
        let mut min = 0.0;
        let mut max_extra = 0.0;

        for (ts, cell) in self.ring.as_list(t) {
            if cell.is_empty() {
                continue;
            }
            if ts == t {
                min += cell.energy[0];
            } else {
                min += cell.energy[0].min(cell.population[0] * uc);
                for i in 1..cell.len() {
                    max_extra += cell.energy[i].min(cell.population[i] * uc);
                }
            }
        }

        let max = min + max_extra;
        let nominal = (min + max) / 2.0;
        Ok((min, max, nominal))
    }

    /// (f) Applies `c` kWh of actual delivered energy: fully satisfies the
    /// current-timeslot cell, runs every future must-run bucket at full
    /// power, then spreads whatever remains across flexible buckets in
    /// proportion to their regulable headroom.
    pub fn distribute_usage(&mut self, t: i64, c: f64) -> Result<(), StorageFault> {
        self.check_phase(t, Phase::Usage)?;
        let uc = self.unit_capacity;
        let mut remaining = c;

        if let Some(cell) = self.ring.get_mut(t) {
            if cell.len() > 1 {
                tracing::error!(
                    ts = t,
                    buckets = cell.len(),
                    "current-timeslot cell has more than one bucket, draining by priority"
                );
                for i in 0..cell.len() {
                    let take = cell.energy[i].min(remaining.max(0.0));
                    cell.energy[i] -= take;
                    remaining -= take;
                }
            } else if let Some(e0) = cell.energy.get_mut(0) {
                remaining -= *e0;
                *e0 = 0.0;
            }
            cell.repair_negatives();
        }

        let future: Vec<i64> = self
            .ring
            .as_list(t)
            .map(|(ts, _)| ts)
            .filter(|&ts| ts > t)
            .collect();

        for &ts in &future {
            if let Some(cell) = self.ring.get_mut(ts) {
                if !cell.population.is_empty() {
                    let need = cell.population[0] * uc;
                    cell.energy[0] -= need;
                    remaining -= need;
                }
            }
        }

        let remaining_demand: f64 = future
            .iter()
            .filter_map(|ts| self.ring.get(*ts))
            .map(|cell| {
                (1..cell.len())
                    .map(|i| (cell.population[i] * uc).min(cell.energy[i]))
                    .sum::<f64>()
            })
            .sum();

        let capacity_ratio = if remaining_demand.abs() > ZERO_TOL {
            remaining / remaining_demand
        } else {
            0.0
        };

        for &ts in &future {
            if let Some(cell) = self.ring.get_mut(ts) {
                for i in 1..cell.len() {
                    let take = (cell.population[i] * uc).min(cell.energy[i]) * capacity_ratio;
                    cell.energy[i] -= take;
                }
                cell.repair_negatives();
            }
        }

        self.advance(t, Phase::Usage);
        Ok(())
    }

    /// Splits `count` customers off `old_state` (the source) into `self`
    /// (the destination). Must be called on the destination, between
    /// timeslots, before either engine's phases run for the new timeslot.
    pub fn move_subscribers(&mut self, t: i64, count: f64, old_state: &mut StorageState) -> Result<(), StorageFault> {
        let old_population = old_state.population();
        let fraction = if old_population.abs() > EQ_TOL {
            count / old_population
        } else {
            0.0
        };

        let dest_was_empty = self.ring.is_empty();
        let source: Vec<(i64, StorageElement)> = old_state
            .ring
            .as_list(t)
            .map(|(ts, cell)| (ts, cell.clone()))
            .collect();

        for (ts, src_cell) in &source {
            match self.ring.get_mut(*ts) {
                Some(dst_cell) => {
                    dst_cell
                        .add_scaled(src_cell, fraction)
                        .map_err(|e| StorageFault::MigrationLengthMismatch {
                            ts: *ts,
                            source_len: e.source_len,
                            dest_len: e.dest_len,
                        })?;
                }
                None => {
                    self.ring.set(*ts, src_cell.copy_scaled(fraction))?;
                }
            }
        }

        for (ts, _) in &source {
            if let Some(cell) = old_state.ring.get_mut(*ts) {
                cell.scale(1.0 - fraction);
            }
        }

        if dest_was_empty {
            self.expected_ts = old_state.expected_ts;
            self.phase = old_state.phase;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::subscription::FixedSubscription;
    use rstest::rstest;

    fn engine(population: f64, unit_capacity: f64, max_horizon: usize) -> StorageState {
        StorageState::new(Arc::new(FixedSubscription::new(population)), unit_capacity, max_horizon)
    }

    /// Table-driven check across several `(ratio, n_vehicles,
    /// unit_capacity)` combinations. A same-hour (horizon-0) cohort always
    /// lands in a single-bucket cell (`k = 1`), so the closed form from
    /// `distribute_demand` collapses to `energy[0] = population[0] *
    /// unit_capacity * 0.5`.
    #[rstest]
    #[case::original_ratio(0.8, 4.0, 6.0)]
    #[case::full_ratio(1.0, 10.0, 6.0)]
    #[case::small_ratio(0.1, 50.0, 3.0)]
    #[case::high_capacity(0.5, 8.0, 11.0)]
    fn same_hour_demand_matches_closed_form(#[case] ratio: f64, #[case] n_vehicles: f64, #[case] unit_capacity: f64) {
        let mut s = engine(1000.0, unit_capacity, 48);
        s.distribute_regulation(36, 0.0).unwrap();
        s.collapse_elements(36).unwrap();
        s.rebalance(36).unwrap();
        s.distribute_demand(36, &[DemandElement::new(0, n_vehicles, 0.0, vec![1.0])], ratio)
            .unwrap();

        let cell = s.ring.get(36).unwrap();
        let expected_pop = n_vehicles * ratio;
        assert!((cell.active_chargers - expected_pop).abs() < EQ_TOL);
        assert!((cell.population[0] - expected_pop).abs() < EQ_TOL);
        assert!((cell.energy[0] - expected_pop * unit_capacity * 0.5).abs() < EQ_TOL);
    }

    /// A single same-hour cohort lands its full share in one bucket.
    #[test]
    fn exact_half_demand_single_bucket() {
        let mut s = engine(1000.0, 6.0, 48);
        s.distribute_regulation(36, 0.0).unwrap();
        s.collapse_elements(36).unwrap();
        s.rebalance(36).unwrap();
        s.distribute_demand(36, &[DemandElement::new(0, 4.0, 0.0, vec![1.0])], 0.8)
            .unwrap();

        let cell = s.ring.get(36).unwrap();
        assert!((cell.active_chargers - 3.2).abs() < EQ_TOL);
        assert!((cell.population[0] - 3.2).abs() < EQ_TOL);
        assert!((cell.energy[0] - 9.6).abs() < EQ_TOL);
    }

    /// A cohort departing next hour splits across two buckets in the
    /// departure cell while a same-hour cohort fills a single bucket.
    #[test]
    fn two_hour_demand_splits_across_buckets() {
        let mut s = engine(1000.0, 6.0, 48);
        s.distribute_regulation(42, 0.0).unwrap();
        s.collapse_elements(42).unwrap();
        s.rebalance(42).unwrap();
        s.distribute_demand(
            42,
            &[
                DemandElement::new(0, 4.0, 0.0, vec![1.0]),
                DemandElement::new(1, 6.0, 0.0, vec![0.4, 0.6]),
            ],
            0.5,
        )
        .unwrap();

        let cell42 = s.ring.get(42).unwrap();
        assert!((cell42.active_chargers - 5.0).abs() < EQ_TOL);
        assert!((cell42.energy[0] - 6.0).abs() < EQ_TOL);

        let cell43 = s.ring.get(43).unwrap();
        assert!((cell43.active_chargers - 3.0).abs() < EQ_TOL);
        assert!((cell43.population[0] - 1.2).abs() < EQ_TOL);
        assert!((cell43.population[1] - 1.8).abs() < EQ_TOL);
        assert!((cell43.energy[0] - 10.8).abs() < EQ_TOL);
        assert!((cell43.energy[1] - 5.4).abs() < EQ_TOL);
    }

    /// Up-regulation is absorbed by future flexible buckets, never
    /// bucket 0.
    #[test]
    fn up_regulation_skips_must_run_bucket() {
        let mut s = engine(1000.0, 6.0, 48);
        s.distribute_regulation(43, 0.0).unwrap();
        s.collapse_elements(43).unwrap();
        s.rebalance(43).unwrap();
        s.distribute_demand(43, &[DemandElement::new(2, 10.0, 0.0, vec![0.3, 0.3, 0.4])], 1.0)
            .unwrap();
        s.get_min_max(43).unwrap();
        s.distribute_usage(43, 0.0).unwrap();

        let bucket0_before = s.ring.get(45).unwrap().energy[0];
        let bucket1_before = s.ring.get(45).unwrap().energy[1];

        s.distribute_regulation(44, 7.0).unwrap();

        let cell45 = s.ring.get(45).unwrap();
        assert!((cell45.energy[0] - bucket0_before).abs() < EQ_TOL);
        assert!(cell45.energy[1] > bucket1_before);
    }

    /// Splitting subscribers off to a new engine conserves population and
    /// energy across the source and destination, bucket by bucket.
    #[test]
    fn migration_conserves_population_and_energy() {
        let mut old = engine(1000.0, 6.0, 48);
        old.distribute_regulation(40, 0.0).unwrap();
        old.collapse_elements(40).unwrap();
        old.rebalance(40).unwrap();
        old.distribute_demand(
            40,
            &[
                DemandElement::new(0, 10.0, 0.0, vec![1.0]),
                DemandElement::new(3, 20.0, 0.0, vec![0.25, 0.25, 0.25, 0.25]),
            ],
            1.0,
        )
        .unwrap();

        let before: Vec<StorageElement> = old.ring.as_list(40).map(|(_, c)| c.clone()).collect();

        let mut new = engine(400.0, 6.0, 48);
        new.move_subscribers(40, 400.0, &mut old).unwrap();

        let after_new: Vec<StorageElement> = new.ring.as_list(40).map(|(_, c)| c.clone()).collect();
        let after_old: Vec<StorageElement> = old.ring.as_list(40).map(|(_, c)| c.clone()).collect();

        for ((b, an), ao) in before.iter().zip(after_new.iter()).zip(after_old.iter()) {
            assert!((an.active_chargers + ao.active_chargers - b.active_chargers).abs() < EQ_TOL);
            for i in 0..b.len() {
                assert!((an.population[i] + ao.population[i] - b.population[i]).abs() < EQ_TOL);
                assert!((an.energy[i] + ao.energy[i] - b.energy[i]).abs() < EQ_TOL);
            }
        }
    }

    #[test]
    fn out_of_order_phase_is_rejected() {
        let mut s = engine(100.0, 6.0, 24);
        let err = s.collapse_elements(10).unwrap_err();
        assert!(matches!(err, StorageFault::OutOfOrderPhase { .. }));
    }

    #[test]
    fn wrong_timeslot_is_rejected() {
        let mut s = engine(100.0, 6.0, 24);
        s.distribute_regulation(10, 0.0).unwrap();
        let err = s.collapse_elements(11).unwrap_err();
        assert!(matches!(err, StorageFault::OutOfOrderPhase { .. }));
    }

    #[test]
    fn min_le_nominal_le_max() {
        let mut s = engine(1000.0, 6.0, 48);
        s.distribute_regulation(50, 0.0).unwrap();
        s.collapse_elements(50).unwrap();
        s.rebalance(50).unwrap();
        s.distribute_demand(
            50,
            &[
                DemandElement::new(0, 4.0, 0.0, vec![1.0]),
                DemandElement::new(2, 8.0, 0.0, vec![0.2, 0.3, 0.5]),
            ],
            1.0,
        )
        .unwrap();
        let (min, max, nominal) = s.get_min_max(50).unwrap();
        assert!(min <= nominal + EQ_TOL);
        assert!(nominal <= max + EQ_TOL);
        assert!(min >= 0.0);
    }
}
