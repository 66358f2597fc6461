//! Forward-looking storage-state engine for a population of EV chargers
//! subscribed to a single energy tariff.
//!
//! Tracks, per subscription, a population histogram of heterogeneous
//! energy requirements, a per-hour activation count, a ring-buffered
//! horizon of future commitments, and the conservation law that every kWh
//! owed must still be owed after any redistribution. Driven synchronously,
//! one timeslot at a time, by a surrounding simulation harness. This
//! module contains no async code and no interior mutability beyond plain
//! `&mut self`.
//!
//! The five-phase per-timeslot protocol (`distribute_regulation` →
//! `collapse_elements` → `rebalance` → `distribute_demand` →
//! `distribute_usage`, with `get_min_max` sandwiched between the last two)
//! lives on [`state::StorageState`] and must be driven in that order; the
//! engine fails loudly (`StorageFault::OutOfOrderPhase`) rather than
//! silently tolerating a skipped or reordered phase.

pub mod codec;
pub mod demand;
pub mod element;
pub mod ring_horizon;
pub mod state;
pub mod subscription;

pub use codec::{gather_state, restore_state, CodecError};
pub use demand::DemandElement;
pub use element::StorageElement;
pub use ring_horizon::{RingHorizon, DEFAULT_CAPACITY};
pub use state::StorageState;
pub use subscription::{FixedSubscription, SubscriptionHandle};
