//! Fixed-capacity circular buffer of horizon cells, indexed by absolute
//! timeslot via `t mod capacity`.

use super::element::StorageElement;
use crate::error::StorageFault;

/// Four days of hourly cells, the hard limit on how far demand may look
/// ahead.
pub const DEFAULT_CAPACITY: usize = 96;

#[derive(Debug, Clone)]
pub struct RingHorizon {
    capacity: usize,
    cells: Vec<Option<StorageElement>>,
    last_clean_base: Option<i64>,
}

impl RingHorizon {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            cells: vec![None; capacity],
            last_clean_base: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn index(&self, t: i64) -> usize {
        t.rem_euclid(self.capacity as i64) as usize
    }

    pub fn get(&self, t: i64) -> Option<&StorageElement> {
        self.cells[self.index(t)].as_ref()
    }

    pub fn get_mut(&mut self, t: i64) -> Option<&mut StorageElement> {
        let i = self.index(t);
        self.cells[i].as_mut()
    }

    /// Writes `cell` at `t`, overwriting any existing cell. Writing more
    /// than `capacity` timeslots past the last `clean` base is a fatal
    /// programming error, not a recoverable data condition.
    pub fn set(&mut self, t: i64, cell: StorageElement) -> Result<(), StorageFault> {
        if let Some(base) = self.last_clean_base {
            let over = t - base - self.capacity as i64 + 1;
            if over > 0 {
                return Err(StorageFault::RingOverrun {
                    ts: t,
                    capacity: self.capacity,
                    over: over as usize,
                });
            }
        }
        let i = self.index(t);
        self.cells[i] = Some(cell);
        Ok(())
    }

    /// Writes `cell` at `t` unconditionally, bypassing the overrun check.
    /// Reserved for the codec, which trusts a boot record to have been
    /// produced by `gather_state` on a ring of matching capacity.
    pub fn force_set(&mut self, t: i64, cell: StorageElement) {
        let i = self.index(t);
        self.cells[i] = Some(cell);
    }

    pub fn clear(&mut self, t: i64) {
        let i = self.index(t);
        self.cells[i] = None;
    }

    pub fn clear_all(&mut self) {
        for c in &mut self.cells {
            *c = None;
        }
        self.last_clean_base = None;
    }

    /// Clears cells stale from a previous wrap: positions beyond the
    /// contiguous active run starting at `t_from` but still inside the
    /// ring. Must be called before any write that may extend the horizon.
    pub fn clean(&mut self, t_from: i64) {
        let h = self.active_length(t_from) as i64;
        for offset in h..self.capacity as i64 {
            self.clear(t_from + offset);
        }
        self.last_clean_base = Some(t_from);
    }

    /// The largest `h >= 0` such that cells for `t, t+1, ..., t+h-1` exist
    /// contiguously.
    pub fn active_length(&self, t: i64) -> usize {
        let mut h = 0;
        while h < self.capacity && self.get(t + h as i64).is_some() {
            h += 1;
        }
        h
    }

    /// Iterator over the contiguous active prefix starting at `t`.
    pub fn as_list(&self, t: i64) -> impl Iterator<Item = (i64, &StorageElement)> {
        let h = self.active_length(t);
        (0..h as i64).filter_map(move |offset| {
            let ts = t + offset;
            self.get(ts).map(|c| (ts, c))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.cells.iter().all(Option::is_none)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_set_roundtrip() {
        let mut ring = RingHorizon::new(4);
        ring.set(10, StorageElement::empty(1)).unwrap();
        assert!(ring.get(10).is_some());
        assert!(ring.get(11).is_none());
        // wraps: 10 mod 4 == 14 mod 4
        assert!(ring.get(14).is_some());
    }

    #[test]
    fn active_length_counts_contiguous_prefix() {
        let mut ring = RingHorizon::new(8);
        for ts in 5..8 {
            ring.set(ts, StorageElement::empty(1)).unwrap();
        }
        assert_eq!(ring.active_length(5), 3);
        assert_eq!(ring.active_length(4), 0);
    }

    #[test]
    fn clean_clears_stale_wrap_region() {
        let mut ring = RingHorizon::new(4);
        ring.set(0, StorageElement::empty(1)).unwrap();
        ring.set(1, StorageElement::empty(1)).unwrap();
        ring.clean(0);
        // positions 2, 3 (mod 4) should have been cleared as stale
        assert!(ring.get(2).is_none());
        assert!(ring.get(3).is_none());
        assert!(ring.get(0).is_some());
    }

    #[test]
    fn set_past_capacity_is_ring_overrun() {
        let mut ring = RingHorizon::new(4);
        ring.clean(0);
        let err = ring.set(4, StorageElement::empty(1)).unwrap_err();
        assert!(matches!(err, StorageFault::RingOverrun { .. }));
    }
}
