//! Canonical edge construction — the sole producer of non-terminal edges.
//!
//! Every `Apply` kernel bottoms out here instead of calling
//! [`crate::node::NodeTable::lookup_or_insert`] directly, so the three
//! canonicalization invariants (zero-canonicalization, no-redundant-nodes,
//! normalization) are enforced in exactly one place.

use crate::error::QmddResult;
use crate::gate::GateLibrary;
use crate::node::{Edge, NodeTable, Target};
use crate::normalize::{normalize, NormStrategy};
use crate::weight::WeightStore;

/// Build the canonical edge for a `(var, low, high)` decomposition,
/// collapsing it to a terminal or redundant edge where the invariants
/// require, and otherwise inserting (or reusing) the unique node.
///
/// `weight` is folded into the returned edge multiplicatively: the result
/// represents `weight * (var ? high : low)`.
pub fn make_edge(
    strategy: NormStrategy,
    weight: crate::weight::WeightId,
    var: u32,
    low: Edge,
    high: Edge,
    store: &WeightStore,
    table: &NodeTable,
) -> QmddResult<Edge> {
    // Any child edge with a zero weight is canonicalized to point at the
    // terminal, so two zero edges never differ only by which dead subtree
    // they used to point at.
    let low = zero_canonicalize(low, store);
    let high = zero_canonicalize(high, store);

    // A node whose two children are identical edges contributes nothing —
    // skip it and reuse the child.
    if low == high {
        return Ok(scale(low, weight, store)?);
    }

    let (node_weight, low_n, high_n) = normalize(strategy, low, high, store)?;
    let node_id = table.lookup_or_insert(var, low_n, high_n)?;
    let combined = store.mul(weight, node_weight)?;
    Ok(Edge::to_node(combined, node_id))
}

fn zero_canonicalize(edge: Edge, store: &WeightStore) -> Edge {
    if edge.weight == store.zero() {
        Edge {
            weight: store.zero(),
            target: Target::Terminal,
        }
    } else {
        edge
    }
}

fn scale(edge: Edge, weight: crate::weight::WeightId, store: &WeightStore) -> QmddResult<Edge> {
    Ok(Edge {
        weight: store.mul(weight, edge.weight)?,
        target: edge.target,
    })
}

/// Build the computational basis state `|bits>`, one decision node per bit
/// (redundancy elision collapses none of them away, since each node's two
/// children always differ: one is the zero edge).
pub fn basis_state(
    bits: &[u8],
    strategy: NormStrategy,
    store: &WeightStore,
    table: &NodeTable,
) -> QmddResult<Edge> {
    let mut edge = Edge::terminal(store.one());
    for (qubit, &bit) in bits.iter().enumerate().rev() {
        let zero = Edge::terminal(store.zero());
        let (low, high) = if bit == 0 { (edge, zero) } else { (zero, edge) };
        edge = make_edge(strategy, store.one(), qubit as u32, low, high, store, table)?;
    }
    Ok(edge)
}

/// Kronecker-stack a single-qubit gate's matrix onto `below` at `qubit`,
/// propagating `below`'s root weight into the new root exactly once —
/// builds an operator edge column by column, outside-in, the same way
/// [`basis_state`] builds a vector edge bit by bit.
pub fn stack_matrix(
    below: Edge,
    qubit: u32,
    gate_id: u32,
    strategy: NormStrategy,
    store: &WeightStore,
    table: &NodeTable,
    gates: &GateLibrary,
) -> QmddResult<Edge> {
    let def = gates.get(gate_id)?;
    let row_var = 2 * qubit;
    let col_var = row_var + 1;

    let u00 = Edge { weight: def.u00, target: below.target };
    let u10 = Edge { weight: def.u10, target: below.target };
    let u01 = Edge { weight: def.u01, target: below.target };
    let u11 = Edge { weight: def.u11, target: below.target };

    let low = make_edge(strategy, store.one(), col_var, u00, u10, store, table)?;
    let high = make_edge(strategy, store.one(), col_var, u01, u11, store, table)?;
    let res = make_edge(strategy, store.one(), row_var, low, high, store, table)?;
    Ok(Edge { weight: store.mul(below.weight, res.weight)?, target: res.target })
}

/// The `2^n x 2^n` identity operator.
pub fn all_identity_matrix(
    n_qubits: u32,
    strategy: NormStrategy,
    store: &WeightStore,
    table: &NodeTable,
    gates: &GateLibrary,
) -> QmddResult<Edge> {
    let mut edge = Edge::terminal(store.one());
    for qubit in (0..n_qubits).rev() {
        edge = stack_matrix(edge, qubit, crate::gate::GATEID_I, strategy, store, table, gates)?;
    }
    Ok(edge)
}

/// The `2^n x 2^n` operator applying `gate_id` to `target` and identity
/// everywhere else.
pub fn single_qubit_gate_matrix(
    n_qubits: u32,
    target: u32,
    gate_id: u32,
    strategy: NormStrategy,
    store: &WeightStore,
    table: &NodeTable,
    gates: &GateLibrary,
) -> QmddResult<Edge> {
    let mut edge = Edge::terminal(store.one());
    for qubit in (0..n_qubits).rev() {
        let id = if qubit == target { gate_id } else { crate::gate::GATEID_I };
        edge = stack_matrix(edge, qubit, id, strategy, store, table, gates)?;
    }
    Ok(edge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex64;

    fn fresh() -> (WeightStore, NodeTable) {
        (WeightStore::new(256, 1e-9), NodeTable::new(256))
    }

    #[test]
    fn redundant_node_collapses_to_child() {
        let (store, table) = fresh();
        let child = Edge::terminal(store.one());
        let edge = make_edge(NormStrategy::Low, store.one(), 0, child, child, &store, &table).unwrap();
        assert!(edge.is_terminal());
        assert_eq!(edge.weight, store.one());
        assert_eq!(table.count(), 0);
    }

    #[test]
    fn zero_weight_children_are_canonicalized_before_redundancy_check() {
        let (store, table) = fresh();
        // Two distinct targets, but both with zero weight, should compare
        // equal after canonicalization and collapse.
        let low_child = table.lookup_or_insert(5, Edge::terminal(store.zero()), Edge::terminal(store.one())).unwrap();
        let low = Edge {
            weight: store.zero(),
            target: Target::Node(low_child),
        };
        let high = Edge::terminal(store.zero());
        let edge = make_edge(NormStrategy::Low, store.one(), 1, low, high, &store, &table).unwrap();
        assert!(edge.is_terminal());
        assert_eq!(edge.weight, store.zero());
    }

    #[test]
    fn distinct_children_create_a_normalized_node() {
        let (store, table) = fresh();
        let two = store.find_or_put(Complex64::new(2.0, 0.0)).unwrap().0;
        let low = Edge::terminal(store.one());
        let high = Edge::terminal(two);
        let edge = make_edge(NormStrategy::Low, store.one(), 0, low, high, &store, &table).unwrap();
        match edge.target {
            Target::Node(n) => {
                let node = table.get(n).unwrap();
                assert_eq!(node.low.weight, store.one());
                assert_eq!(store.get(node.high.weight), Complex64::new(2.0, 0.0));
            }
            Target::Terminal => panic!("expected a node"),
        }
    }

    #[test]
    fn same_decomposition_reuses_the_node() {
        let (store, table) = fresh();
        let low = Edge::terminal(store.zero());
        let high = Edge::terminal(store.one());
        let a = make_edge(NormStrategy::Low, store.one(), 3, low, high, &store, &table).unwrap();
        let b = make_edge(NormStrategy::Low, store.one(), 3, low, high, &store, &table).unwrap();
        assert_eq!(a, b);
        assert_eq!(table.count(), 1);
    }

    #[test]
    fn identity_matrix_times_vector_is_identity() {
        let (store, table) = fresh();
        let cache = crate::opcache::OpCache::new(256);
        let gates = crate::gate::GateLibrary::new(&store).unwrap();
        let mat = all_identity_matrix(2, NormStrategy::Low, &store, &table, &gates).unwrap();

        let v = basis_state(&[1, 0], NormStrategy::Low, &store, &table).unwrap();
        let out = crate::apply::mat_vec(mat, v, 2, NormStrategy::Low, &store, &table, &cache).unwrap();
        assert_eq!(out, v);
    }

    #[test]
    fn single_qubit_gate_matrix_matches_direct_gate_application() {
        let (store, table) = fresh();
        let cache = crate::opcache::OpCache::new(256);
        let gates = crate::gate::GateLibrary::new(&store).unwrap();
        let mat = single_qubit_gate_matrix(2, 0, crate::gate::GATEID_X, NormStrategy::Low, &store, &table, &gates).unwrap();

        let v = basis_state(&[0, 1], NormStrategy::Low, &store, &table).unwrap();
        let via_matrix = crate::apply::mat_vec(mat, v, 2, NormStrategy::Low, &store, &table, &cache).unwrap();
        let via_gate = crate::apply::gate(v, crate::gate::GATEID_X, 0, NormStrategy::Low, &store, &table, &gates, &cache).unwrap();
        assert_eq!(via_matrix, via_gate);
    }
}
