//! Unique table of DAG nodes and the edge/target types that reference them.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};

use crate::error::{QmddError, QmddResult};
use crate::weight::WeightId;

const SHARD_BITS: u32 = 6;
const NUM_SHARDS: usize = 1 << SHARD_BITS;
const LOCAL_BITS: u32 = 32 - SHARD_BITS;
const LOCAL_MASK: u32 = (1 << LOCAL_BITS) - 1;

/// Opaque handle into a [`NodeTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    fn pack(shard: usize, local: u32) -> Self {
        debug_assert!(shard < NUM_SHARDS);
        debug_assert!(local <= LOCAL_MASK);
        NodeId(((shard as u32) << LOCAL_BITS) | local)
    }

    fn shard(self) -> usize {
        (self.0 >> LOCAL_BITS) as usize
    }

    fn local(self) -> u32 {
        self.0 & LOCAL_MASK
    }

    /// Raw bit pattern, for logging only.
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// The target of an [`Edge`]: either the unique terminal, or a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// The unique terminal sentinel; every complete path ends here.
    Terminal,
    /// A non-terminal DAG node.
    Node(NodeId),
}

/// A `(weight, target)` pair — the unit of reference exposed to clients.
/// Nodes are never referenced directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edge {
    /// Handle into the [`crate::weight::WeightStore`].
    pub weight: WeightId,
    /// Terminal sentinel, or a node handle.
    pub target: Target,
}

impl Edge {
    /// Construct an edge pointing at the terminal.
    pub fn terminal(weight: WeightId) -> Self {
        Edge {
            weight,
            target: Target::Terminal,
        }
    }

    /// Construct an edge pointing at a node.
    pub fn to_node(weight: WeightId, node: NodeId) -> Self {
        Edge {
            weight,
            target: Target::Node(node),
        }
    }

    /// True if `target == Terminal`.
    pub fn is_terminal(&self) -> bool {
        matches!(self.target, Target::Terminal)
    }
}

impl std::fmt::Display for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.target {
            Target::Terminal => write!(f, "({}) -> terminal", self.weight),
            Target::Node(n) => write!(f, "({}) -> {}", self.weight, n),
        }
    }
}

/// A `(var, low, high)` record storing one variable decomposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Node {
    /// Qubit index this node decides on. Every node reachable from
    /// `low`/`high` has a strictly greater `var`.
    pub var: u32,
    /// Edge taken when the decision variable is 0.
    pub low: Edge,
    /// Edge taken when the decision variable is 1.
    pub high: Edge,
}

struct Slot {
    node: Node,
    mark: AtomicBool,
}

struct Shard {
    slots: Vec<Option<Slot>>,
    index: rustc_hash::FxHashMap<Node, u32>,
    free: Vec<u32>,
    next: u32,
    capacity: u32,
}

impl Shard {
    fn new(capacity: u32) -> Self {
        Self {
            slots: Vec::with_capacity(capacity as usize),
            index: rustc_hash::FxHashMap::default(),
            free: Vec::new(),
            next: 0,
            capacity,
        }
    }

    fn lookup_or_insert(&mut self, node: Node) -> QmddResult<u32> {
        if let Some(&local) = self.index.get(&node) {
            return Ok(local);
        }
        let local = if let Some(local) = self.free.pop() {
            self.slots[local as usize] = Some(Slot {
                node,
                mark: AtomicBool::new(false),
            });
            local
        } else {
            if self.next >= self.capacity {
                return Err(QmddError::TableFull {
                    table: "NodeTable",
                    capacity: self.capacity as usize * NUM_SHARDS,
                });
            }
            let local = self.next;
            self.next += 1;
            self.slots.push(Some(Slot {
                node,
                mark: AtomicBool::new(false),
            }));
            local
        };
        self.index.insert(node, local);
        Ok(local)
    }
}

fn shard_for(node: &Node) -> usize {
    let mut h = FxHasher::default();
    node.hash(&mut h);
    (h.finish() as usize) & (NUM_SHARDS - 1)
}

/// Lock-free-*readable*, per-shard-mutex-guarded unique table of DAG nodes.
///
/// `lookup_or_insert` is safe under parallel callers: each call locks only
/// the shard its `(var, low, high)` triple hashes to, so independent
/// `Apply` recursions touching different subtrees proceed without
/// contending on the same lock (per-shard mutexes rather than per-bucket
/// CAS, to stay in safe Rust). `get`/`mark` are similarly
/// shard-local; marking uses an atomic so the GC's sweep phase never needs
/// to hold a shard lock across the whole walk.
pub struct NodeTable {
    shards: Vec<Mutex<Shard>>,
}

impl NodeTable {
    /// Create a table with the given total capacity, spread across shards.
    pub fn new(capacity: usize) -> Self {
        let per_shard = ((capacity / NUM_SHARDS).max(4)) as u32;
        let shards = (0..NUM_SHARDS).map(|_| Mutex::new(Shard::new(per_shard))).collect();
        Self { shards }
    }

    /// Return the handle of the unique node equal to `(var, low, high)`,
    /// creating one if none exists. Reports `TableFull` on exhaustion rather
    /// than retrying; the caller runs a GC pass and retries itself.
    pub fn lookup_or_insert(&self, var: u32, low: Edge, high: Edge) -> QmddResult<NodeId> {
        let node = Node { var, low, high };
        let shard_idx = shard_for(&node);
        let mut shard = self.shards[shard_idx].lock();
        let local = shard.lookup_or_insert(node)?;
        Ok(NodeId::pack(shard_idx, local))
    }

    /// Constant-time accessor for a node's fields.
    pub fn get(&self, handle: NodeId) -> QmddResult<Node> {
        let shard = self.shards[handle.shard()].lock();
        shard
            .slots
            .get(handle.local() as usize)
            .and_then(|s| s.as_ref())
            .map(|s| s.node)
            .ok_or(QmddError::InvalidHandle { kind: "node" })
    }

    /// Set the reachability bit for `handle`. Returns `true` iff it was
    /// previously unset, so callers can prune DAG traversal during mark.
    pub fn mark(&self, handle: NodeId) -> bool {
        let shard = self.shards[handle.shard()].lock();
        match shard.slots.get(handle.local() as usize).and_then(|s| s.as_ref()) {
            Some(slot) => !slot.mark.swap(true, Ordering::AcqRel),
            None => false,
        }
    }

    /// Clear every mark bit, ahead of a new mark phase.
    pub fn unmark_all(&self) {
        for shard in &self.shards {
            let shard = shard.lock();
            for slot in shard.slots.iter().flatten() {
                slot.mark.store(false, Ordering::Release);
            }
        }
    }

    /// Deallocate every unmarked node, returning the freed slots to the
    /// shard's free list for reuse by future `lookup_or_insert` calls.
    pub fn sweep(&self) -> usize {
        let mut freed = 0;
        for shard in &self.shards {
            let mut shard = shard.lock();
            let mut to_free = Vec::new();
            for (local, slot) in shard.slots.iter().enumerate() {
                if let Some(s) = slot {
                    if !s.mark.load(Ordering::Acquire) {
                        to_free.push((local as u32, s.node));
                    }
                }
            }
            for (local, node) in to_free {
                shard.slots[local as usize] = None;
                shard.index.remove(&node);
                shard.free.push(local);
                freed += 1;
            }
        }
        freed
    }

    /// Number of live (occupied) slots across all shards.
    pub fn count(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().slots.iter().filter(|s| s.is_some()).count())
            .sum()
    }
}
