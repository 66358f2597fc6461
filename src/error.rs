#![allow(dead_code)]
use thiserror::Error;

/// Programming errors raised by the storage-state engine.
///
/// These are the only faults the engine propagates as `Err`: writing past
/// the ring horizon's capacity, calling the five-phase protocol out of
/// order, or a migration between engines whose cells have diverged in
/// length. All of them indicate a bug in the calling simulation driver, not
/// a recoverable data condition, and the engine does not attempt to repair
/// them. Invariant violations that *are* repairable (negative energy,
/// infeasible regulation, malformed codec input) are logged and fixed in
/// place instead; see the `storage` module docs.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StorageFault {
    #[error("timeslot {ts} is {over} slots past the ring horizon's capacity of {capacity}")]
    RingOverrun {
        ts: i64,
        capacity: usize,
        over: usize,
    },

    #[error("phases called out of order: expected {expected}, got {actual} for timeslot {ts}")]
    OutOfOrderPhase {
        ts: i64,
        expected: &'static str,
        actual: &'static str,
    },

    #[error(
        "migration length mismatch at timeslot {ts}: source cell has {source_len} buckets, \
         destination has {dest_len}"
    )]
    MigrationLengthMismatch {
        ts: i64,
        source_len: usize,
        dest_len: usize,
    },
}
