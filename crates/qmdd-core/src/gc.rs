//! Mark-sweep node collection and weight-table rebuilds.
//!
//! Both operations take `&mut` table/store references purely for their
//! signature: the tables themselves are `Sync` and already safe to share.
//! Requiring exclusive access here is a compile-time strengthening of the
//! "GC only runs at quiescence" requirement — no `Apply` call can be mid-walk
//! while these run, because the borrow checker won't allow one.

use rustc_hash::FxHashMap;

use crate::error::QmddResult;
use crate::node::{Edge, NodeTable, Target};
use crate::opcache::OpCache;
use crate::weight::{WeightId, WeightStore};

/// Mark every node reachable from `roots`, sweep everything else, and clear
/// the `OpCache` (its entries may reference now-freed node handles). Returns
/// the number of nodes freed.
pub fn collect(roots: &[Edge], table: &NodeTable, cache: &OpCache) -> QmddResult<usize> {
    table.unmark_all();
    for root in roots {
        mark_reachable(*root, table)?;
    }
    let freed = table.sweep();
    cache.invalidate();
    Ok(freed)
}

fn mark_reachable(edge: Edge, table: &NodeTable) -> QmddResult<()> {
    if let Target::Node(id) = edge.target {
        if !table.mark(id) {
            // Already marked on a previous walk this cycle: its subtree has
            // already been visited, so don't re-descend.
            return Ok(());
        }
        let node = table.get(id)?;
        mark_reachable(node.low, table)?;
        mark_reachable(node.high, table)?;
    }
    Ok(())
}

/// Build a fresh [`WeightStore`] containing only the weights reachable from
/// `roots`, translate every root edge into the new store, and invalidate
/// `cache` (its keys embed old weight handles). Node handles are untouched —
/// only weight handles are renumbered.
pub fn rebuild_weights(
    roots: &[Edge],
    old: &WeightStore,
    table: &NodeTable,
    cache: &OpCache,
    fresh_capacity: usize,
) -> QmddResult<(WeightStore, Vec<Edge>)> {
    let fresh = WeightStore::new(fresh_capacity, old.tolerance());
    let mut translation: FxHashMap<WeightId, WeightId> = FxHashMap::default();

    // Walk every node reachable from the roots, translating its edge
    // weights. `visited` keeps the walk polynomial in DAG size on shared
    // subtrees, same as the weight-handle cache does for the weights
    // themselves.
    let mut visited = rustc_hash::FxHashSet::default();
    for edge in roots {
        translate_subtree(*edge, old, &fresh, table, &mut translation, &mut visited)?;
    }

    let mut new_roots = Vec::with_capacity(roots.len());
    for edge in roots {
        new_roots.push(Edge {
            weight: old.translate(edge.weight, &fresh, &mut translation)?,
            target: edge.target,
        });
    }

    cache.invalidate();
    Ok((fresh, new_roots))
}

fn translate_subtree(
    edge: Edge,
    old: &WeightStore,
    fresh: &WeightStore,
    table: &NodeTable,
    translation: &mut FxHashMap<WeightId, WeightId>,
    visited: &mut rustc_hash::FxHashSet<crate::node::NodeId>,
) -> QmddResult<()> {
    if let Target::Node(id) = edge.target {
        if !visited.insert(id) {
            return Ok(());
        }
        let node = table.get(id)?;
        old.translate(node.low.weight, fresh, translation)?;
        old.translate(node.high.weight, fresh, translation)?;
        translate_subtree(node.low, old, fresh, table, translation, visited)?;
        translate_subtree(node.high, old, fresh, table, translation, visited)?;
    }
    Ok(())
}
