//! Per-timeslot storage cell: active-charger count plus population/energy
//! histograms bucketed by remaining charger-hours.
//!
//! Bucket 0 is the highest-need ("must-run") cohort; bucket `k - 1` is the
//! lowest. `population` and `energy` are always kept the same length.

use std::fmt;

/// Physical quantities within this distance of zero are treated as exactly
/// zero (§7 tolerance for energy/population).
pub const ZERO_TOL: f64 = 1e-3;
/// Tolerance used for floating-point equality comparisons.
pub const EQ_TOL: f64 = 1e-6;

/// Mutable per-timeslot cell.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageElement {
    pub active_chargers: f64,
    pub population: Vec<f64>,
    pub energy: Vec<f64>,
}

/// Raised by [`StorageElement::add_scaled`] when the two cells being
/// combined have diverged in bucket count. Carries no timeslot context;
/// the caller (migration) attaches that before surfacing a
/// [`crate::error::StorageFault`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthMismatch {
    pub source_len: usize,
    pub dest_len: usize,
}

impl StorageElement {
    /// A cell with `len` empty buckets and no active chargers.
    pub fn empty(len: usize) -> Self {
        Self {
            active_chargers: 0.0,
            population: vec![0.0; len],
            energy: vec![0.0; len],
        }
    }

    pub fn from_parts(active_chargers: f64, population: Vec<f64>, energy: Vec<f64>) -> Self {
        debug_assert_eq!(
            population.len(),
            energy.len(),
            "population/energy arrays must stay equal length"
        );
        Self {
            active_chargers,
            population,
            energy,
        }
    }

    pub fn len(&self) -> usize {
        self.population.len()
    }

    pub fn is_empty(&self) -> bool {
        self.population.is_empty()
    }

    pub fn add_chargers(&mut self, delta: f64) {
        self.active_chargers += delta;
    }

    /// Adds `pop`/`energy` element-wise. Entries beyond this cell's length
    /// are ignored (the caller is expected to have already clamped to
    /// `min(k, distribution.len())`); a shorter source leaves the remaining
    /// buckets of this cell untouched.
    pub fn add_commitments(&mut self, pop: &[f64], energy: &[f64]) {
        debug_assert_eq!(pop.len(), energy.len());
        for (slot, p) in self.population.iter_mut().zip(pop.iter()) {
            *slot += p;
        }
        for (slot, e) in self.energy.iter_mut().zip(energy.iter()) {
            *slot += e;
        }
    }

    /// Folds the trailing bucket into bucket `k - 2` and shrinks to `k - 1`
    /// buckets. A one-bucket cell is left unchanged.
    pub fn collapse(&mut self) {
        let k = self.len();
        if k <= 1 {
            return;
        }
        let trailing_energy = self.energy[k - 1];
        let trailing_pop = self.population[k - 1];
        if trailing_energy < -ZERO_TOL {
            tracing::error!(
                energy = trailing_energy,
                "negative trailing-bucket energy at collapse, dropping"
            );
        } else if trailing_energy > 0.0 {
            self.energy[k - 2] += trailing_energy;
            self.population[k - 2] += trailing_pop;
        }
        self.population.truncate(k - 1);
        self.energy.truncate(k - 1);
    }

    /// An independent copy with every number multiplied by `f`.
    pub fn copy_scaled(&self, f: f64) -> Self {
        Self {
            active_chargers: self.active_chargers * f,
            population: self.population.iter().map(|p| p * f).collect(),
            energy: self.energy.iter().map(|e| e * f).collect(),
        }
    }

    /// Adds `other` scaled by `f`, element-wise, in place. Both cells must
    /// have the same bucket count.
    pub fn add_scaled(&mut self, other: &Self, f: f64) -> Result<(), LengthMismatch> {
        if self.len() != other.len() {
            return Err(LengthMismatch {
                source_len: other.len(),
                dest_len: self.len(),
            });
        }
        self.active_chargers += other.active_chargers * f;
        for (slot, v) in self.population.iter_mut().zip(other.population.iter()) {
            *slot += v * f;
        }
        for (slot, v) in self.energy.iter_mut().zip(other.energy.iter()) {
            *slot += v * f;
        }
        Ok(())
    }

    /// In-place multiply of every number by `f`.
    pub fn scale(&mut self, f: f64) {
        self.active_chargers *= f;
        for p in &mut self.population {
            *p *= f;
        }
        for e in &mut self.energy {
            *e *= f;
        }
    }

    /// Clamps population/energy entries within tolerance of zero down to
    /// zero; logs anything further negative before clamping it too. This is
    /// the "log at error level and repair locally" half of §7's invariant
    /// taxonomy.
    pub fn repair_negatives(&mut self) {
        for p in &mut self.population {
            if *p < -ZERO_TOL {
                tracing::error!(value = *p, "negative population beyond tolerance, clamping to 0");
            }
            if *p < 0.0 {
                *p = 0.0;
            }
        }
        for e in &mut self.energy {
            if *e < -ZERO_TOL {
                tracing::error!(value = *e, "negative energy beyond tolerance, clamping to 0");
            }
            if *e < 0.0 {
                *e = 0.0;
            }
        }
    }
}

impl fmt::Display for StorageElement {
    /// Bit-stable: `ch{chargers:.3} [pops...] [energies...]`. The codec's
    /// six-decimal structured form is a separate representation, see
    /// `storage::codec`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch{:.3} [", self.active_chargers)?;
        for (i, p) in self.population.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{:.3}", p)?;
        }
        write!(f, "] [")?;
        for (i, e) in self.energy.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{:.3}", e)?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapse_folds_trailing_bucket() {
        let mut cell = StorageElement::from_parts(4.0, vec![1.0, 2.0, 3.0], vec![5.0, 6.0, 7.0]);
        cell.collapse();
        assert_eq!(cell.population, vec![1.0, 5.0]);
        assert_eq!(cell.energy, vec![5.0, 13.0]);
    }

    #[test]
    fn collapse_single_bucket_is_noop() {
        let mut cell = StorageElement::from_parts(1.0, vec![1.0], vec![2.0]);
        cell.collapse();
        assert_eq!(cell.population, vec![1.0]);
        assert_eq!(cell.energy, vec![2.0]);
    }

    #[test]
    fn add_scaled_rejects_length_mismatch() {
        let mut dst = StorageElement::from_parts(1.0, vec![1.0, 2.0], vec![1.0, 2.0]);
        let src = StorageElement::from_parts(1.0, vec![1.0], vec![1.0]);
        assert_eq!(
            dst.add_scaled(&src, 0.5),
            Err(LengthMismatch {
                source_len: 1,
                dest_len: 2
            })
        );
    }

    #[test]
    fn copy_scaled_then_add_scaled_conserves_totals() {
        let src = StorageElement::from_parts(10.0, vec![3.0, 4.0], vec![30.0, 40.0]);
        let moved = src.copy_scaled(0.4);
        let mut remainder = src.clone();
        remainder.scale(0.6);
        assert!((moved.active_chargers + remainder.active_chargers - src.active_chargers).abs() < EQ_TOL);
        for i in 0..2 {
            assert!((moved.population[i] + remainder.population[i] - src.population[i]).abs() < EQ_TOL);
            assert!((moved.energy[i] + remainder.energy[i] - src.energy[i]).abs() < EQ_TOL);
        }
    }

    #[test]
    fn repair_negatives_clamps_within_tolerance() {
        let mut cell = StorageElement::from_parts(1.0, vec![-0.0001], vec![-0.0002]);
        cell.repair_negatives();
        assert_eq!(cell.population, vec![0.0]);
        assert_eq!(cell.energy, vec![0.0]);
    }
}
