//! Canonicalizing store of complex edge weights.
//!
//! Values are bucketed onto a fixed number of shards (by rounding to the
//! tolerance grid and hashing the grid cell), each guarded by its own
//! [`parking_lot::Mutex`]. This trades the lock-free, per-bucket-CAS design
//! the original C table uses for ordinary safe Rust, while keeping the
//! external contract — `find_or_put`/`get` are still independently
//! parallelizable across shards.

use std::sync::atomic::{AtomicU32, Ordering};

use num_complex::Complex64;
use parking_lot::Mutex;
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};

use crate::error::{QmddError, QmddResult};

/// Number of shards the weight table is split across. A power of two so the
/// handle packing below can use a fixed bit split.
const SHARD_BITS: u32 = 6;
const NUM_SHARDS: usize = 1 << SHARD_BITS;
const LOCAL_BITS: u32 = 32 - SHARD_BITS;
const LOCAL_MASK: u32 = (1 << LOCAL_BITS) - 1;

/// Opaque handle into a [`WeightStore`].
///
/// Stable between GC cycles; invalidated (and potentially renumbered) by
/// [`WeightStore::rebuild`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WeightId(u32);

impl WeightId {
    fn pack(shard: usize, local: u32) -> Self {
        debug_assert!(shard < NUM_SHARDS);
        debug_assert!(local <= LOCAL_MASK);
        WeightId(((shard as u32) << LOCAL_BITS) | local)
    }

    fn shard(self) -> usize {
        (self.0 >> LOCAL_BITS) as usize
    }

    fn local(self) -> u32 {
        self.0 & LOCAL_MASK
    }

    /// Raw bit pattern, for logging and persisted diagnostics only.
    pub fn raw(self) -> u32 {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn from_raw(v: u32) -> Self {
        WeightId(v)
    }
}

impl std::fmt::Display for WeightId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "w{}", self.0)
    }
}

struct Shard {
    slots: Vec<Option<Complex64>>,
    /// Maps a tolerance-grid cell to the ids of values stored in that cell.
    /// A handful of entries per cell in practice; linear scan is fine.
    grid: rustc_hash::FxHashMap<(i64, i64), Vec<u32>>,
    free: Vec<u32>,
    next: u32,
    capacity: u32,
}

impl Shard {
    fn new(capacity: u32) -> Self {
        Self {
            slots: Vec::with_capacity(capacity as usize),
            grid: rustc_hash::FxHashMap::default(),
            free: Vec::new(),
            next: 0,
            capacity,
        }
    }

    fn alloc(&mut self, value: Complex64) -> QmddResult<u32> {
        if let Some(local) = self.free.pop() {
            self.slots[local as usize] = Some(value);
            return Ok(local);
        }
        if self.next >= self.capacity {
            return Err(QmddError::TableFull {
                table: "WeightStore",
                capacity: self.capacity as usize * NUM_SHARDS,
            });
        }
        let local = self.next;
        self.next += 1;
        self.slots.push(Some(value));
        Ok(local)
    }
}

fn grid_cell(c: Complex64, tolerance: f64) -> (i64, i64) {
    if tolerance <= 0.0 {
        // Exact equality: key on the raw bit pattern via a coarse integer
        // cast is unsound for signed zero/NaN distinctions, so hash instead.
        let mut h = FxHasher::default();
        c.re.to_bits().hash(&mut h);
        c.im.to_bits().hash(&mut h);
        let v = h.finish();
        return ((v >> 32) as i64, v as u32 as i64);
    }
    ((c.re / tolerance).floor() as i64, (c.im / tolerance).floor() as i64)
}

fn shard_for_cell(cell: (i64, i64)) -> usize {
    let mut h = FxHasher::default();
    cell.hash(&mut h);
    (h.finish() as usize) & (NUM_SHARDS - 1)
}

/// Canonicalizing bidirectional map from complex values to stable handles.
///
/// Two values within `tolerance` of each other (`|Δre| ≤ ε AND |Δim| ≤ ε`)
/// collapse to the same handle; the stored value is always the *first*
/// inserted one, so results are deterministic given insertion order but not
/// value-symmetric (tests must account for this when comparing canonicalized
/// results across different insertion orders).
pub struct WeightStore {
    shards: Vec<Mutex<Shard>>,
    tolerance: f64,
    count: AtomicU32,
    /// Sentinel handles installed before any client insertion.
    zero: WeightId,
    one: WeightId,
    minus_one: WeightId,
}

impl WeightStore {
    /// Create a new store with the given total capacity (spread evenly
    /// across shards) and tolerance. `tolerance = 0.0` means strict
    /// equality.
    pub fn new(capacity: usize, tolerance: f64) -> Self {
        let per_shard = ((capacity / NUM_SHARDS).max(4)) as u32;
        let mut shards = Vec::with_capacity(NUM_SHARDS);
        for _ in 0..NUM_SHARDS {
            shards.push(Mutex::new(Shard::new(per_shard)));
        }
        let mut store = Self {
            shards,
            tolerance,
            count: AtomicU32::new(0),
            zero: WeightId(0),
            one: WeightId(0),
            minus_one: WeightId(0),
        };
        store.zero = store
            .find_or_put(Complex64::new(0.0, 0.0))
            .expect("weight table too small to hold ZERO")
            .0;
        store.one = store
            .find_or_put(Complex64::new(1.0, 0.0))
            .expect("weight table too small to hold ONE")
            .0;
        store.minus_one = store
            .find_or_put(Complex64::new(-1.0, 0.0))
            .expect("weight table too small to hold MINUS_ONE")
            .0;
        store
    }

    /// Handle for `0 + 0i`.
    pub fn zero(&self) -> WeightId {
        self.zero
    }

    /// Handle for `1 + 0i`.
    pub fn one(&self) -> WeightId {
        self.one
    }

    /// Handle for `-1 + 0i`.
    pub fn minus_one(&self) -> WeightId {
        self.minus_one
    }

    /// Number of occupied slots across all shards.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed) as u64
    }

    /// Find an existing handle within tolerance of `c`, or insert a new one.
    pub fn find_or_put(&self, c: Complex64) -> QmddResult<(WeightId, bool)> {
        let cell = grid_cell(c, self.tolerance);
        let shard_idx = shard_for_cell(cell);
        let mut shard = self.shards[shard_idx].lock();

        for dr in -1..=1 {
            for di in -1..=1 {
                let probe_cell = (cell.0 + dr, cell.1 + di);
                if let Some(candidates) = shard.grid.get(&probe_cell) {
                    for &local in candidates {
                        let existing = shard.slots[local as usize]
                            .expect("grid entry must point at an occupied slot");
                        if (existing.re - c.re).abs() <= self.tolerance
                            && (existing.im - c.im).abs() <= self.tolerance
                        {
                            return Ok((WeightId::pack(shard_idx, local), false));
                        }
                    }
                }
            }
        }

        let local = shard.alloc(c)?;
        shard.grid.entry(cell).or_default().push(local);
        self.count.fetch_add(1, Ordering::Relaxed);
        Ok((WeightId::pack(shard_idx, local), true))
    }

    /// Return the stored value for `handle`.
    ///
    /// # Panics
    ///
    /// Panics (in debug builds) if `handle` is stale after a rebuild; see
    /// [`QmddError::InvalidHandle`] for the checked alternative used by
    /// [`WeightStore::try_get`].
    pub fn get(&self, handle: WeightId) -> Complex64 {
        self.try_get(handle)
            .expect("stale weight handle used after a rebuild")
    }

    /// Checked accessor; returns `Err` instead of panicking on a stale
    /// handle.
    pub fn try_get(&self, handle: WeightId) -> QmddResult<Complex64> {
        let shard = self.shards[handle.shard()].lock();
        shard
            .slots
            .get(handle.local() as usize)
            .copied()
            .flatten()
            .ok_or(QmddError::InvalidHandle { kind: "weight" })
    }

    // --- Arithmetic helpers, composed from find_or_put + num_complex ops ---

    /// `a + b`, with the `add(ZERO, x) = x` short-circuit.
    pub fn add(&self, a: WeightId, b: WeightId) -> QmddResult<WeightId> {
        if a == self.zero {
            return Ok(b);
        }
        if b == self.zero {
            return Ok(a);
        }
        let sum = self.get(a) + self.get(b);
        Ok(self.find_or_put(sum)?.0)
    }

    /// `a - b`.
    pub fn sub(&self, a: WeightId, b: WeightId) -> QmddResult<WeightId> {
        if b == self.zero {
            return Ok(a);
        }
        let diff = self.get(a) - self.get(b);
        Ok(self.find_or_put(diff)?.0)
    }

    /// `a * b`, with the `mul(ONE, x) = x` and `mul(ZERO, _) = ZERO`
    /// short-circuits.
    pub fn mul(&self, a: WeightId, b: WeightId) -> QmddResult<WeightId> {
        if a == self.zero || b == self.zero {
            return Ok(self.zero);
        }
        if a == self.one {
            return Ok(b);
        }
        if b == self.one {
            return Ok(a);
        }
        let prod = self.get(a) * self.get(b);
        Ok(self.find_or_put(prod)?.0)
    }

    /// `a / b`, with `div(x, x) = ONE` (for `x != ZERO`) and
    /// `div(ZERO, _) = ZERO`.
    pub fn div(&self, a: WeightId, b: WeightId) -> QmddResult<WeightId> {
        if a == self.zero {
            return Ok(self.zero);
        }
        if a == b {
            return Ok(self.one);
        }
        let quot = self.get(a) / self.get(b);
        Ok(self.find_or_put(quot)?.0)
    }

    /// `-a`.
    pub fn neg(&self, a: WeightId) -> QmddResult<WeightId> {
        if a == self.zero {
            return Ok(a);
        }
        Ok(self.find_or_put(-self.get(a))?.0)
    }

    /// Complex conjugate of `a`.
    pub fn conj(&self, a: WeightId) -> QmddResult<WeightId> {
        Ok(self.find_or_put(self.get(a).conj())?.0)
    }

    /// `|a|`, returned as a weight handle (imaginary part zero).
    pub fn abs(&self, a: WeightId) -> QmddResult<WeightId> {
        Ok(self.find_or_put(Complex64::new(self.get(a).norm(), 0.0))?.0)
    }

    /// `|a|^2`, returned as a weight handle (imaginary part zero).
    pub fn sqr(&self, a: WeightId) -> QmddResult<WeightId> {
        Ok(self
            .find_or_put(Complex64::new(self.get(a).norm_sqr(), 0.0))?
            .0)
    }

    /// Configured tolerance.
    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Translate `handle` (from this, the *old*, store) into a handle in
    /// `fresh`, inserting the value on first encounter and reusing the
    /// translation on subsequent lookups. This is the only operation that
    /// may renumber weight handles.
    ///
    /// Callers drive the walk (they know which edges are reachable); this
    /// just does the per-handle copy-and-cache step, keyed on the old
    /// handle so a weight shared by many edges is translated once.
    pub fn translate(
        &self,
        handle: WeightId,
        fresh: &WeightStore,
        cache: &mut rustc_hash::FxHashMap<WeightId, WeightId>,
    ) -> QmddResult<WeightId> {
        if let Some(&new_handle) = cache.get(&handle) {
            return Ok(new_handle);
        }
        let value = self.try_get(handle)?;
        let (new_handle, _) = fresh.find_or_put(value)?;
        cache.insert(handle, new_handle);
        Ok(new_handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_are_distinct() {
        let store = WeightStore::new(256, 1e-9);
        assert_ne!(store.zero(), store.one());
        assert_ne!(store.zero(), store.minus_one());
        assert_ne!(store.one(), store.minus_one());
    }

    #[test]
    fn find_or_put_deduplicates_within_tolerance() {
        let store = WeightStore::new(256, 1e-6);
        let (a, created_a) = store.find_or_put(Complex64::new(0.5, 0.5)).unwrap();
        assert!(created_a);
        let (b, created_b) = store
            .find_or_put(Complex64::new(0.5 + 1e-9, 0.5 - 1e-9))
            .unwrap();
        assert!(!created_b);
        assert_eq!(a, b);
    }

    #[test]
    fn find_or_put_keeps_first_inserted_value() {
        let store = WeightStore::new(256, 1e-3);
        let (a, _) = store.find_or_put(Complex64::new(1.0, 0.0)).unwrap();
        let (b, created) = store.find_or_put(Complex64::new(1.0005, 0.0)).unwrap();
        assert!(!created);
        assert_eq!(a, b);
        assert_eq!(store.get(a), Complex64::new(1.0, 0.0));
    }

    #[test]
    fn arithmetic_short_circuits() {
        let store = WeightStore::new(256, 1e-9);
        let half = store.find_or_put(Complex64::new(0.5, 0.0)).unwrap().0;
        assert_eq!(store.add(store.zero(), half).unwrap(), half);
        assert_eq!(store.mul(store.one(), half).unwrap(), half);
        assert_eq!(store.mul(store.zero(), half).unwrap(), store.zero());
        assert_eq!(store.div(half, half).unwrap(), store.one());
        assert_eq!(store.div(store.zero(), half).unwrap(), store.zero());
    }
}
