//! Memoization cache for recursive `Apply` operations.

use dashmap::DashMap;

use crate::node::Edge;

/// Which binary/unary `Apply` kernel a cache entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    /// `plus(a, b)`.
    Plus,
    /// `scalar_mul(w, edge)`.
    ScalarMul,
    /// `mat_vec(M, v)` at a given recursion level.
    MatVec,
    /// `mat_mat(A, B)` at a given recursion level.
    MatMat,
    /// `gate(v, gate_id, qubit)`.
    Gate,
    /// `c_gate`/`c_gate_multi`.
    CGate,
    /// `prob_sum(edge)`.
    ProbSum,
}

/// Cache key: an opcode plus up to three edge operands and a small bag of
/// packed integer parameters (gate id, qubit indices, recursion level).
/// `gate_generation` folds the dynamic-gate-pool generation in so a
/// recycled gate id never serves a stale hit (see [`crate::gate::GateLibrary`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OpKey {
    /// Which kernel produced this entry.
    pub opcode: OpCode,
    /// First edge operand.
    pub a: Edge,
    /// Second edge operand, if any.
    pub b: Option<Edge>,
    /// Third edge operand, if any (e.g. an already-combined cofactor).
    pub c: Option<Edge>,
    /// Gate id / qubit index / level, packed per-opcode.
    pub params: u64,
    /// Gate-pool generation at the time this entry was created.
    pub gate_generation: u32,
    /// Sorted control-qubit list, for multi-controlled gates only.
    pub controls: Vec<u32>,
}

impl OpKey {
    /// Build a key with no control list and no gate-generation dependence.
    pub fn simple(opcode: OpCode, a: Edge, b: Option<Edge>, params: u64) -> Self {
        OpKey {
            opcode,
            a,
            b,
            c: None,
            params,
            gate_generation: 0,
            controls: Vec::new(),
        }
    }
}

/// Memoizes recent results of binary operations so recursive `Apply` is
/// polynomial in DAG size rather than exponential in path count.
///
/// Backed by [`dashmap::DashMap`], which shards its internal `RwLock`s:
/// a reader either observes a complete entry or none at all, never a torn
/// one, because the shard lock serializes the insert. A miss just costs a
/// recompute, never a wrong answer.
pub struct OpCache {
    map: DashMap<OpKey, Edge>,
    capacity: usize,
}

impl OpCache {
    /// Create a cache that evicts everything once it exceeds `capacity`
    /// entries. Simple and correct: a cache miss only costs a recompute.
    pub fn new(capacity: usize) -> Self {
        Self {
            map: DashMap::with_capacity(capacity.min(1 << 16)),
            capacity,
        }
    }

    /// Look up a cached result.
    pub fn get(&self, key: &OpKey) -> Option<Edge> {
        self.map.get(key).map(|r| *r)
    }

    /// Insert (or overwrite) a cached result, evicting everything first if
    /// the cache is at capacity.
    pub fn put(&self, key: OpKey, result: Edge) {
        if self.map.len() >= self.capacity {
            self.map.clear();
        }
        self.map.insert(key, result);
    }

    /// Invalidate every entry. Required after a weight-table rebuild (edge
    /// weight handles are renumbered) and is also the simplest correct
    /// response to a node GC sweep.
    pub fn invalidate(&self) {
        self.map.clear();
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
