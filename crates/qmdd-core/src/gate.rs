//! Predefined and dynamically-allocated 2x2 unitary gates.

use std::f64::consts::{FRAC_1_SQRT_2, PI};
use std::sync::atomic::{AtomicU32, Ordering};

use num_complex::Complex64;
use parking_lot::Mutex;

use crate::error::{QmddError, QmddResult};
use crate::weight::{WeightId, WeightStore};

/// Identity.
pub const GATEID_I: u32 = 0;
/// Pauli-X.
pub const GATEID_X: u32 = 1;
/// Pauli-Y.
pub const GATEID_Y: u32 = 2;
/// Pauli-Z.
pub const GATEID_Z: u32 = 3;
/// Hadamard.
pub const GATEID_H: u32 = 4;
/// S (phase, sqrt(Z)).
pub const GATEID_S: u32 = 5;
/// S-dagger.
pub const GATEID_SDAG: u32 = 6;
/// T (fourth root of Z).
pub const GATEID_T: u32 = 7;
/// T-dagger.
pub const GATEID_TDAG: u32 = 8;
/// sqrt(X).
pub const GATEID_SQRT_X: u32 = 9;
/// sqrt(X)-dagger.
pub const GATEID_SQRT_XDAG: u32 = 10;
/// sqrt(Y).
pub const GATEID_SQRT_Y: u32 = 11;
/// sqrt(Y)-dagger.
pub const GATEID_SQRT_YDAG: u32 = 12;

/// Phase gates `Rk(k)` and `Rk_dag(k)` are defined for `k` in `[0, 255]`.
pub const MAX_RK: u8 = 255;
const NUM_FIXED_GATES: u32 = 13;
const NUM_RK_GATES: u32 = (MAX_RK as u32 + 1) * 2;
/// Total number of static (non-reused) gate ids.
const NUM_STATIC_GATES: u32 = NUM_FIXED_GATES + NUM_RK_GATES;
/// Size of the dynamic pool reserved for `Rx`/`Ry`/`Rz` with arbitrary angles.
pub const NUM_DYNAMIC_GATES: u32 = 1000;

/// Stable integer id for `Rk(k) = diag(1, exp(2πi / 2^k))`.
pub fn gateid_rk(k: u8) -> u32 {
    NUM_FIXED_GATES + k as u32
}

/// Stable integer id for `Rk_dag(k) = diag(1, exp(-2πi / 2^k))`.
pub fn gateid_rk_dag(k: u8) -> u32 {
    NUM_FIXED_GATES + (MAX_RK as u32 + 1) + k as u32
}

/// A 2x2 complex unitary: four weight handles giving the matrix entries,
/// addressed by `id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gate {
    /// Stable id this gate was looked up by.
    pub id: u32,
    /// Top-left entry.
    pub u00: WeightId,
    /// Top-right entry.
    pub u01: WeightId,
    /// Bottom-left entry.
    pub u10: WeightId,
    /// Bottom-right entry.
    pub u11: WeightId,
}

struct Entry {
    u00: WeightId,
    u01: WeightId,
    u10: WeightId,
    u11: WeightId,
}

/// Predefined and dynamically-allocated 2x2 unitary gate table.
///
/// Static gate ids (`[0, NUM_STATIC_GATES)`) are immutable once
/// initialized. Dynamic ids (`[NUM_STATIC_GATES, NUM_STATIC_GATES +
/// NUM_DYNAMIC_GATES)`) are recycled round-robin; when the pool wraps, the
/// `generation` counter increments so the `OpCache` (which folds generation
/// into its key) never serves a stale hit against a recycled id.
pub struct GateLibrary {
    static_entries: Vec<Entry>,
    dynamic_entries: Vec<Mutex<Option<Entry>>>,
    dynamic_next: AtomicU32,
    generation: AtomicU32,
}

impl GateLibrary {
    /// Build the library, interning every static gate's matrix entries into
    /// `store`.
    pub fn new(store: &WeightStore) -> QmddResult<Self> {
        let mut static_entries = Vec::with_capacity(NUM_STATIC_GATES as usize);
        let zero = store.zero();
        let one = store.one();
        let minus_one = store.minus_one();
        let w = |c: Complex64| -> QmddResult<WeightId> { Ok(store.find_or_put(c)?.0) };

        // I
        static_entries.push(Entry { u00: one, u01: zero, u10: zero, u11: one });
        // X
        static_entries.push(Entry { u00: zero, u01: one, u10: one, u11: zero });
        // Y
        let i_ = w(Complex64::new(0.0, 1.0))?;
        let neg_i = w(Complex64::new(0.0, -1.0))?;
        static_entries.push(Entry { u00: zero, u01: neg_i, u10: i_, u11: zero });
        // Z
        static_entries.push(Entry { u00: one, u01: zero, u10: zero, u11: minus_one });
        // H
        let h = w(Complex64::new(FRAC_1_SQRT_2, 0.0))?;
        let neg_h = w(Complex64::new(-FRAC_1_SQRT_2, 0.0))?;
        static_entries.push(Entry { u00: h, u01: h, u10: h, u11: neg_h });
        // S
        static_entries.push(Entry { u00: one, u01: zero, u10: zero, u11: i_ });
        // Sdag
        static_entries.push(Entry { u00: one, u01: zero, u10: zero, u11: neg_i });
        // T
        let t11 = w(Complex64::new(FRAC_1_SQRT_2, FRAC_1_SQRT_2))?;
        static_entries.push(Entry { u00: one, u01: zero, u10: zero, u11: t11 });
        // Tdag
        let tdag11 = w(Complex64::new(FRAC_1_SQRT_2, -FRAC_1_SQRT_2))?;
        static_entries.push(Entry { u00: one, u01: zero, u10: zero, u11: tdag11 });
        // sqrtX
        let a = w(Complex64::new(0.5, 0.5))?;
        let b = w(Complex64::new(0.5, -0.5))?;
        static_entries.push(Entry { u00: a, u01: b, u10: b, u11: a });
        // sqrtXdag
        static_entries.push(Entry { u00: b, u01: a, u10: a, u11: b });
        // sqrtY
        let neg_b = w(Complex64::new(-0.5, -0.5))?;
        static_entries.push(Entry { u00: a, u01: neg_b, u10: a, u11: a });
        // sqrtYdag
        let neg_a = w(Complex64::new(-0.5, 0.5))?;
        static_entries.push(Entry { u00: b, u01: b, u10: neg_a, u11: b });

        for k in 0..=MAX_RK {
            let angle = 2.0 * PI / f64::from(1u32 << k);
            let forward = w(Complex64::from_polar(1.0, angle))?;
            static_entries.push(Entry { u00: one, u01: zero, u10: zero, u11: forward });
            let backward = w(Complex64::from_polar(1.0, -angle))?;
            static_entries.push(Entry { u00: one, u01: zero, u10: zero, u11: backward });
        }

        debug_assert_eq!(static_entries.len() as u32, NUM_STATIC_GATES);

        let dynamic_entries = (0..NUM_DYNAMIC_GATES).map(|_| Mutex::new(None)).collect();

        Ok(Self {
            static_entries,
            dynamic_entries,
            dynamic_next: AtomicU32::new(0),
            generation: AtomicU32::new(0),
        })
    }

    /// Current generation number; bumped whenever the dynamic pool wraps.
    /// Callers fold this into `OpCache` keys for gate-dependent operations.
    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }

    /// Look up a gate by id.
    pub fn get(&self, id: u32) -> QmddResult<Gate> {
        if let Some(entry) = self.static_entries.get(id as usize) {
            return Ok(Gate {
                id,
                u00: entry.u00,
                u01: entry.u01,
                u10: entry.u10,
                u11: entry.u11,
            });
        }
        let dyn_idx = id.checked_sub(NUM_STATIC_GATES);
        if let Some(dyn_idx) = dyn_idx {
            if let Some(slot) = self.dynamic_entries.get(dyn_idx as usize) {
                if let Some(entry) = slot.lock().as_ref() {
                    return Ok(Gate {
                        id,
                        u00: entry.u00,
                        u01: entry.u01,
                        u10: entry.u10,
                        u11: entry.u11,
                    });
                }
            }
        }
        Err(QmddError::UnknownGate(id))
    }

    fn allocate_dynamic_slot(&self) -> u32 {
        let idx = self.dynamic_next.fetch_add(1, Ordering::AcqRel);
        if idx + 1 >= NUM_DYNAMIC_GATES {
            // The counter wrapped (or is about to): reset and bump the
            // generation so stale OpCache entries keyed on the old
            // generation are never served for the recycled id.
            self.dynamic_next.store(0, Ordering::Release);
            self.generation.fetch_add(1, Ordering::AcqRel);
        }
        idx % NUM_DYNAMIC_GATES
    }

    fn register(&self, store: &WeightStore, entries: [Complex64; 4]) -> QmddResult<(u32, u32)> {
        let dyn_idx = self.allocate_dynamic_slot();
        let entry = Entry {
            u00: store.find_or_put(entries[0])?.0,
            u01: store.find_or_put(entries[1])?.0,
            u10: store.find_or_put(entries[2])?.0,
            u11: store.find_or_put(entries[3])?.0,
        };
        *self.dynamic_entries[dyn_idx as usize].lock() = Some(entry);
        Ok((NUM_STATIC_GATES + dyn_idx, self.generation()))
    }

    /// Register `Rx(theta) = [[cos(theta/2), -i sin(theta/2)], [-i
    /// sin(theta/2), cos(theta/2)]]`, returning its (possibly reused) gate
    /// id and the pool generation at the time of registration.
    pub fn register_rx(&self, store: &WeightStore, theta: f64) -> QmddResult<(u32, u32)> {
        let half = theta / 2.0;
        let (c, s) = (half.cos(), half.sin());
        self.register(
            store,
            [
                Complex64::new(c, 0.0),
                Complex64::new(0.0, -s),
                Complex64::new(0.0, -s),
                Complex64::new(c, 0.0),
            ],
        )
    }

    /// Register `Ry(theta) = [[cos(theta/2), -sin(theta/2)], [sin(theta/2),
    /// cos(theta/2)]]`.
    pub fn register_ry(&self, store: &WeightStore, theta: f64) -> QmddResult<(u32, u32)> {
        let half = theta / 2.0;
        let (c, s) = (half.cos(), half.sin());
        self.register(
            store,
            [
                Complex64::new(c, 0.0),
                Complex64::new(-s, 0.0),
                Complex64::new(s, 0.0),
                Complex64::new(c, 0.0),
            ],
        )
    }

    /// Register `Rz(theta) = diag(exp(-i theta/2), exp(i theta/2))`.
    pub fn register_rz(&self, store: &WeightStore, theta: f64) -> QmddResult<(u32, u32)> {
        let half = theta / 2.0;
        self.register(
            store,
            [
                Complex64::from_polar(1.0, -half),
                Complex64::new(0.0, 0.0),
                Complex64::new(0.0, 0.0),
                Complex64::from_polar(1.0, half),
            ],
        )
    }
}
