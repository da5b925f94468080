//! Top-level engine handle: owns the weight store, node table, operation
//! cache and gate library, and exposes the external interface.

use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::SeedableRng;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::apply;
use crate::builder;
use crate::error::{QmddError, QmddResult};
use crate::gate::GateLibrary;
use crate::gc;
use crate::measure;
use crate::node::{Edge, NodeTable};
use crate::normalize::NormStrategy;
use crate::opcache::OpCache;
use crate::weight::WeightStore;

/// Tunables for a [`Context`]. Every field has a default suitable for
/// interactive use; production callers size the tables to the circuits they
/// expect to run.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Config {
    /// Number of qubits the context is built for. Fixed for the context's
    /// lifetime — operators and vectors from different contexts are never
    /// interchangeable anyway, since they'd use unrelated node tables.
    pub n_qubits: u32,
    /// Total node-table capacity, shared across shards.
    pub node_capacity: usize,
    /// Total weight-store capacity, shared across shards.
    pub weight_capacity: usize,
    /// Operation-cache capacity, in entries.
    pub op_cache_capacity: usize,
    /// `|re/im delta| <= tolerance` for two weights to be considered equal.
    /// `0.0` means exact equality.
    pub tolerance: f64,
    /// Canonicalization strategy. Fixed for the context's lifetime.
    pub norm_strategy: NormStrategy,
    /// Seed for the measurement RNG. `None` seeds from OS entropy.
    pub rng_seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            n_qubits: 1,
            node_capacity: 1 << 20,
            weight_capacity: 1 << 20,
            op_cache_capacity: 1 << 18,
            tolerance: 1e-9,
            norm_strategy: NormStrategy::Low,
            rng_seed: None,
        }
    }
}

impl Config {
    fn validate(&self) -> QmddResult<()> {
        if self.n_qubits == 0 {
            return Err(QmddError::InvalidConfig("n_qubits must be at least 1".into()));
        }
        if self.node_capacity == 0 || self.weight_capacity == 0 {
            return Err(QmddError::InvalidConfig("node_capacity and weight_capacity must be non-zero".into()));
        }
        if self.tolerance < 0.0 {
            return Err(QmddError::InvalidConfig("tolerance must be non-negative".into()));
        }
        Ok(())
    }
}

/// Slot-occupancy snapshot returned by [`Context::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Live node-table entries.
    pub nodes: usize,
    /// Live weight-store entries.
    pub weights: u64,
    /// Entries currently held in the operation cache.
    pub op_cache_entries: usize,
}

/// Owns every table the engine needs and exposes the client-facing
/// operations. `&mut self` on `collect`/`rebuild_weights` turns GC quiescence
/// into a compile-time guarantee: no other operation can be mid-flight while
/// a GC pass holds the only `&mut` reference.
pub struct Context {
    config: Config,
    store: WeightStore,
    table: NodeTable,
    cache: OpCache,
    gates: GateLibrary,
    rng: StdRng,
}

impl Context {
    /// Build a new engine instance from `config`.
    #[instrument(skip(config), fields(n_qubits = config.n_qubits))]
    pub fn init(config: Config) -> QmddResult<Self> {
        config.validate()?;
        let store = WeightStore::new(config.weight_capacity, config.tolerance);
        let table = NodeTable::new(config.node_capacity);
        let cache = OpCache::new(config.op_cache_capacity);
        let gates = GateLibrary::new(&store)?;
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        tracing::info!(n_qubits = config.n_qubits, "qmdd context initialized");
        Ok(Context { config, store, table, cache, gates, rng })
    }

    /// Release the tables. Dropping the context does the same thing; this
    /// exists for symmetry with `init` and to give a log line a place to
    /// fire.
    pub fn shutdown(self) {
        tracing::info!(
            nodes = self.table.count(),
            weights = self.store.count(),
            "qmdd context shut down"
        );
    }

    /// Number of qubits this context was configured for.
    pub fn n_qubits(&self) -> u32 {
        self.config.n_qubits
    }

    /// The canonicalization strategy in effect.
    pub fn norm_strategy(&self) -> NormStrategy {
        self.config.norm_strategy
    }

    /// Number of live nodes currently in the table.
    pub fn node_count(&self) -> usize {
        self.table.count()
    }

    /// Number of live weight-store entries.
    pub fn weight_count(&self) -> u64 {
        self.store.count()
    }

    /// The configuration this context was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Slot-occupancy snapshot, for tests and the criterion benches.
    pub fn stats(&self) -> Stats {
        Stats {
            nodes: self.table.count(),
            weights: self.store.count(),
            op_cache_entries: self.cache.len(),
        }
    }

    /// The `|0...0>` state vector.
    pub fn all_zero_state(&self) -> QmddResult<Edge> {
        builder::basis_state(&vec![0u8; self.config.n_qubits as usize], self.config.norm_strategy, &self.store, &self.table)
    }

    /// The computational basis state `|bits>`.
    pub fn basis_state(&self, bits: &[u8]) -> QmddResult<Edge> {
        if bits.len() != self.config.n_qubits as usize {
            return Err(QmddError::InvalidConfig(format!(
                "basis_state needs exactly {} bits, got {}",
                self.config.n_qubits,
                bits.len()
            )));
        }
        builder::basis_state(bits, self.config.norm_strategy, &self.store, &self.table)
    }

    /// The `2^n x 2^n` identity operator over all of this context's qubits.
    pub fn all_identity_matrix(&self) -> QmddResult<Edge> {
        builder::all_identity_matrix(self.config.n_qubits, self.config.norm_strategy, &self.store, &self.table, &self.gates)
    }

    /// The `2^n x 2^n` operator applying `gate_id` to `target` and identity
    /// to every other qubit, as a standalone matrix edge.
    pub fn single_qubit_gate_matrix(&self, target: u32, gate_id: u32) -> QmddResult<Edge> {
        if target >= self.config.n_qubits {
            return Err(QmddError::QubitOutOfRange { qubit: target, n_qubits: self.config.n_qubits });
        }
        builder::single_qubit_gate_matrix(self.config.n_qubits, target, gate_id, self.config.norm_strategy, &self.store, &self.table, &self.gates)
    }

    /// Apply a single-qubit gate to `target`.
    #[instrument(skip(self, q), fields(gate_id, target))]
    pub fn gate(&self, q: Edge, gate_id: u32, target: u32) -> QmddResult<Edge> {
        if target >= self.config.n_qubits {
            return Err(QmddError::QubitOutOfRange { qubit: target, n_qubits: self.config.n_qubits });
        }
        apply::gate(q, gate_id, target, self.config.norm_strategy, &self.store, &self.table, &self.gates, &self.cache)
    }

    /// Apply a gate to `target`, controlled on `control` being `1`.
    pub fn cgate(&self, q: Edge, gate_id: u32, control: u32, target: u32) -> QmddResult<Edge> {
        self.cgate_multi(q, gate_id, &[control], target)
    }

    /// Apply a gate to `target`, controlled on every qubit in `controls`.
    #[instrument(skip(self, q, controls), fields(gate_id, target, n_controls = controls.len()))]
    pub fn cgate_multi(&self, q: Edge, gate_id: u32, controls: &[u32], target: u32) -> QmddResult<Edge> {
        for &c in controls.iter().chain(std::iter::once(&target)) {
            if c >= self.config.n_qubits {
                return Err(QmddError::QubitOutOfRange { qubit: c, n_qubits: self.config.n_qubits });
            }
        }
        apply::c_gate(q, gate_id, controls, target, self.config.norm_strategy, &self.store, &self.table, &self.gates, &self.cache)
    }

    /// `a + b`.
    pub fn plus(&self, a: Edge, b: Edge) -> QmddResult<Edge> {
        apply::plus(a, b, self.config.norm_strategy, &self.store, &self.table, &self.cache)
    }

    /// `w * edge`.
    pub fn scalar_mul(&self, w: Complex64, edge: Edge) -> QmddResult<Edge> {
        let handle = self.store.find_or_put(w)?.0;
        apply::scalar_mul(handle, edge, &self.store)
    }

    /// `mat * vec`.
    pub fn mat_vec(&self, mat: Edge, vec: Edge) -> QmddResult<Edge> {
        apply::mat_vec(mat, vec, self.config.n_qubits, self.config.norm_strategy, &self.store, &self.table, &self.cache)
    }

    /// `a * b`, for two operators on the same qubit register.
    pub fn mat_mat(&self, a: Edge, b: Edge) -> QmddResult<Edge> {
        apply::mat_mat(a, b, self.config.n_qubits, self.config.norm_strategy, &self.store, &self.table, &self.cache)
    }

    /// Register a custom `Rx(theta)` gate and return its id.
    pub fn register_gate_rx(&self, theta: f64) -> QmddResult<u32> {
        Ok(self.gates.register_rx(&self.store, theta)?.0)
    }

    /// Register a custom `Ry(theta)` gate and return its id.
    pub fn register_gate_ry(&self, theta: f64) -> QmddResult<u32> {
        Ok(self.gates.register_ry(&self.store, theta)?.0)
    }

    /// Register a custom `Rz(theta)` gate and return its id.
    pub fn register_gate_rz(&self, theta: f64) -> QmddResult<u32> {
        Ok(self.gates.register_rz(&self.store, theta)?.0)
    }

    /// Collapse and resample qubit `k`, returning the post-measurement
    /// state, the outcome bit, and its probability.
    #[instrument(skip(self, edge), fields(qubit = k))]
    pub fn measure_qubit(&mut self, edge: Edge, k: u32) -> QmddResult<(Edge, u8, f64)> {
        if k >= self.config.n_qubits {
            return Err(QmddError::QubitOutOfRange { qubit: k, n_qubits: self.config.n_qubits });
        }
        measure::measure_qubit(
            edge,
            k,
            self.config.n_qubits,
            self.config.norm_strategy,
            &self.store,
            &self.table,
            &self.gates,
            &self.cache,
            self.config.tolerance,
            &mut self.rng,
        )
    }

    /// Collapse every qubit at once. Returns the post-measurement basis
    /// state, the outcome bits (index = qubit), and the joint probability.
    #[instrument(skip(self, edge))]
    pub fn measure_all(&mut self, edge: Edge) -> QmddResult<(Edge, Vec<u8>, f64)> {
        measure::measure_all(
            edge,
            self.config.n_qubits,
            self.config.norm_strategy,
            &self.store,
            &self.table,
            &self.cache,
            self.config.tolerance,
            &mut self.rng,
        )
    }

    /// `sum_{bits matching a prefix} |amplitude|^2`, starting from qubit 0.
    pub fn prob_sum(&self, edge: Edge) -> QmddResult<f64> {
        measure::prob_sum(edge, 0, self.config.n_qubits, &self.store, &self.table, &self.cache)
    }

    /// The amplitude of a single computational basis string.
    pub fn get_amplitude(&self, edge: Edge, bits: &[u8]) -> QmddResult<Complex64> {
        measure::get_amplitude(edge, bits, &self.store, &self.table)
    }

    /// Mark-sweep every node unreachable from `roots`. Requires `&mut self`:
    /// see the struct-level doc comment.
    #[instrument(skip(self, roots))]
    pub fn collect(&mut self, roots: &[Edge]) -> QmddResult<usize> {
        gc::collect(roots, &self.table, &self.cache)
    }

    /// Rebuild the weight store to reclaim slots freed by value churn,
    /// keeping only what's reachable from `roots`. Returns the translated
    /// roots, in the same order; callers must use these (not the originals)
    /// for every operation afterward.
    #[instrument(skip(self, roots))]
    pub fn rebuild_weights(&mut self, roots: &[Edge]) -> QmddResult<Vec<Edge>> {
        let (fresh, new_roots) = gc::rebuild_weights(roots, &self.store, &self.table, &self.cache, self.config.weight_capacity)?;
        self.store = fresh;
        Ok(new_roots)
    }

    /// Render `edge` as a Graphviz `dot` diagram.
    pub fn to_dot(&self, edge: Edge) -> QmddResult<String> {
        crate::dot::to_dot(edge, &self.store, &self.table)
    }
}
