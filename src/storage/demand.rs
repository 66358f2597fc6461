//! Immutable carrier describing the energy requirement of a cohort
//! departing at a fixed future timeslot.

/// `n_vehicles` vehicles all depart `horizon` timeslots from the call
/// site's current timeslot. `distribution` is a histogram over sub-cohorts
/// with lengths `0..=horizon` remaining charger-hours; `distribution[0]` is
/// the fraction with the greatest remaining need, `distribution[horizon]`
/// the fraction already essentially satisfied.
///
/// The engine trusts, and does not re-check, that `distribution` sums to 1
/// and that `horizon` respects the ring's capacity; see
/// [`crate::storage::state::StorageState::distribute_demand`].
#[derive(Debug, Clone, PartialEq)]
pub struct DemandElement {
    pub horizon: usize,
    pub n_vehicles: f64,
    pub energy: f64,
    pub distribution: Vec<f64>,
}

impl DemandElement {
    pub fn new(horizon: usize, n_vehicles: f64, energy: f64, distribution: Vec<f64>) -> Self {
        Self {
            horizon,
            n_vehicles,
            energy,
            distribution,
        }
    }
}
