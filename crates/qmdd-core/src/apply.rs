//! Recursive `Apply` kernels: `plus`, `scalar_mul`, `mat_vec`, `mat_mat`,
//! `gate`, `c_gate`. Every kernel bottoms out at [`crate::builder::make_edge`]
//! so the canonicalization invariants hold at every intermediate node, and
//! consults an [`crate::opcache::OpCache`] keyed on its operands so repeated
//! sub-DAGs are combined once rather than once per path.
//!
//! A matrix edge spends *two* tree levels per qubit — `2*qubit` selects the
//! row bit, `2*qubit + 1` the column bit — while a vector edge spends one
//! level per qubit. This doubling is the representation the source engine
//! uses for operators and is carried over unchanged; `Node::var` numbers are
//! just plain `u32`s, so no change to [`crate::node::Node`] was needed to
//! support it.

use crate::builder::make_edge;
use crate::error::QmddResult;
use crate::gate::GateLibrary;
use crate::node::{Edge, NodeTable, Target};
use crate::normalize::NormStrategy;
use crate::opcache::{OpCache, OpCode, OpKey};
use crate::weight::WeightStore;

pub(crate) fn pack2(hi: u32, lo: u32) -> u64 {
    ((hi as u64) << 32) | lo as u64
}

/// Resolve the child edges of `edge` at variable `expected`, accounting for
/// skipped (redundant-node-elided) levels: if `edge` is terminal or its node
/// sits at a variable past `expected`, both "children" are `edge`'s own
/// target with unit weight, and the reported variable is `expected` itself.
pub(crate) fn topvar_cofactors(
    edge: Edge,
    expected: u32,
    store: &WeightStore,
    table: &NodeTable,
) -> QmddResult<(u32, Edge, Edge)> {
    match edge.target {
        Target::Node(n) => {
            let node = table.get(n)?;
            if node.var <= expected {
                Ok((node.var, node.low, node.high))
            } else {
                let pass = Edge { weight: store.one(), target: edge.target };
                Ok((expected, pass, pass))
            }
        }
        Target::Terminal => {
            let pass = Edge { weight: store.one(), target: Target::Terminal };
            Ok((expected, pass, pass))
        }
    }
}

fn node_var(edge: Edge, table: &NodeTable) -> QmddResult<Option<u32>> {
    match edge.target {
        Target::Terminal => Ok(None),
        Target::Node(n) => Ok(Some(table.get(n)?.var)),
    }
}

/// `a + b`, entrywise. Works identically on vector and matrix edges, since
/// the recursion only ever inspects `Node::var`, never what it means.
pub fn plus(
    a: Edge,
    b: Edge,
    strategy: NormStrategy,
    store: &WeightStore,
    table: &NodeTable,
    cache: &OpCache,
) -> QmddResult<Edge> {
    if a.weight == store.zero() {
        return Ok(b);
    }
    if b.weight == store.zero() {
        return Ok(a);
    }

    let key = OpKey::simple(OpCode::Plus, a, Some(b), 0);
    if let Some(hit) = cache.get(&key) {
        return Ok(hit);
    }

    let var_a = node_var(a, table)?;
    let var_b = node_var(b, table)?;

    if a.target == b.target && var_a == var_b {
        let sum = store.add(a.weight, b.weight)?;
        let res = Edge { weight: sum, target: a.target };
        let res = if sum == store.zero() { Edge::terminal(sum) } else { res };
        cache.put(key, res);
        return Ok(res);
    }

    let top = var_a.unwrap_or(u32::MAX).min(var_b.unwrap_or(u32::MAX));
    let (_, low_a_c, high_a_c) = topvar_cofactors(a, top, store, table)?;
    let (_, low_b_c, high_b_c) = topvar_cofactors(b, top, store, table)?;

    let low_a = Edge { weight: store.mul(a.weight, low_a_c.weight)?, target: low_a_c.target };
    let high_a = Edge { weight: store.mul(a.weight, high_a_c.weight)?, target: high_a_c.target };
    let low_b = Edge { weight: store.mul(b.weight, low_b_c.weight)?, target: low_b_c.target };
    let high_b = Edge { weight: store.mul(b.weight, high_b_c.weight)?, target: high_b_c.target };

    let (low, high) = {
        let (l, h) = rayon::join(
            || plus(low_a, low_b, strategy, store, table, cache),
            || plus(high_a, high_b, strategy, store, table, cache),
        );
        (l?, h?)
    };

    let res = make_edge(strategy, store.one(), top, low, high, store, table)?;
    cache.put(key, res);
    Ok(res)
}

/// `w * edge`.
pub fn scalar_mul(w: crate::weight::WeightId, edge: Edge, store: &WeightStore) -> QmddResult<Edge> {
    let weight = store.mul(w, edge.weight)?;
    if weight == store.zero() {
        Ok(Edge::terminal(weight))
    } else {
        Ok(Edge { weight, target: edge.target })
    }
}

/// Apply a single-qubit gate to `target`, leaving every other qubit alone.
pub fn gate(
    q: Edge,
    gate_id: u32,
    target: u32,
    strategy: NormStrategy,
    store: &WeightStore,
    table: &NodeTable,
    gates: &GateLibrary,
    cache: &OpCache,
) -> QmddResult<Edge> {
    let key = OpKey {
        opcode: OpCode::Gate,
        a: q,
        b: None,
        c: None,
        params: pack2(gate_id, target),
        gate_generation: gates.generation(),
        controls: Vec::new(),
    };
    if let Some(hit) = cache.get(&key) {
        return Ok(hit);
    }

    let def = gates.get(gate_id)?;
    let (var, low, high) = topvar_cofactors(q, target, store, table)?;

    let res = if var == target {
        let a_u00 = store.mul(low.weight, def.u00)?;
        let a_u10 = store.mul(low.weight, def.u10)?;
        let b_u01 = store.mul(high.weight, def.u01)?;
        let b_u11 = store.mul(high.weight, def.u11)?;
        let qdd1 = make_edge(
            strategy,
            store.one(),
            target,
            Edge { weight: a_u00, target: low.target },
            Edge { weight: a_u10, target: low.target },
            store,
            table,
        )?;
        let qdd2 = make_edge(
            strategy,
            store.one(),
            target,
            Edge { weight: b_u01, target: high.target },
            Edge { weight: b_u11, target: high.target },
            store,
            table,
        )?;
        plus(qdd1, qdd2, strategy, store, table, cache)?
    } else {
        let (low_r, high_r) = {
            let (l, h) = rayon::join(
                || gate(low, gate_id, target, strategy, store, table, gates, cache),
                || gate(high, gate_id, target, strategy, store, table, gates, cache),
            );
            (l?, h?)
        };
        make_edge(strategy, store.one(), var, low_r, high_r, store, table)?
    };

    let final_weight = store.mul(q.weight, res.weight)?;
    let final_edge = if final_weight == store.zero() {
        Edge::terminal(final_weight)
    } else {
        Edge { weight: final_weight, target: res.target }
    };
    cache.put(key, final_edge);
    Ok(final_edge)
}

/// Apply a gate to `target` conditioned on every qubit in `controls` being
/// `1`. `controls` need not be sorted or deduplicated by the caller, but
/// must not contain `target`.
pub fn c_gate(
    q: Edge,
    gate_id: u32,
    controls: &[u32],
    target: u32,
    strategy: NormStrategy,
    store: &WeightStore,
    table: &NodeTable,
    gates: &GateLibrary,
    cache: &OpCache,
) -> QmddResult<Edge> {
    let mut sorted: Vec<u32> = controls.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    for &c in &sorted {
        if c == target {
            return Err(crate::error::QmddError::ControlTargetCollision(c));
        }
    }
    c_gate_rec(q, gate_id, &sorted, target, strategy, store, table, gates, cache)
}

fn c_gate_rec(
    q: Edge,
    gate_id: u32,
    controls: &[u32],
    target: u32,
    strategy: NormStrategy,
    store: &WeightStore,
    table: &NodeTable,
    gates: &GateLibrary,
    cache: &OpCache,
) -> QmddResult<Edge> {
    let Some((&c, rest)) = controls.split_first() else {
        return gate(q, gate_id, target, strategy, store, table, gates, cache);
    };

    let key = OpKey {
        opcode: OpCode::CGate,
        a: q,
        b: None,
        c: None,
        params: pack2(gate_id, target),
        gate_generation: gates.generation(),
        controls: controls.to_vec(),
    };
    if let Some(hit) = cache.get(&key) {
        return Ok(hit);
    }

    let (var, low, high) = topvar_cofactors(q, c, store, table)?;
    let res = if var == c {
        let high_r = c_gate_rec(high, gate_id, rest, target, strategy, store, table, gates, cache)?;
        make_edge(strategy, store.one(), var, low, high_r, store, table)?
    } else {
        let (low_r, high_r) = {
            let (l, h) = rayon::join(
                || c_gate_rec(low, gate_id, controls, target, strategy, store, table, gates, cache),
                || c_gate_rec(high, gate_id, controls, target, strategy, store, table, gates, cache),
            );
            (l?, h?)
        };
        make_edge(strategy, store.one(), var, low_r, high_r, store, table)?
    };

    let final_weight = store.mul(q.weight, res.weight)?;
    let final_edge = if final_weight == store.zero() {
        Edge::terminal(final_weight)
    } else {
        Edge { weight: final_weight, target: res.target }
    };
    cache.put(key, final_edge);
    Ok(final_edge)
}

/// Multiply an `n_qubits`-qubit operator edge by a state-vector edge.
pub fn mat_vec(
    mat: Edge,
    vec: Edge,
    n_qubits: u32,
    strategy: NormStrategy,
    store: &WeightStore,
    table: &NodeTable,
    cache: &OpCache,
) -> QmddResult<Edge> {
    mat_vec_rec(mat, vec, n_qubits, 0, strategy, store, table, cache)
}

fn mat_vec_rec(
    mat: Edge,
    vec: Edge,
    nvars: u32,
    nextvar: u32,
    strategy: NormStrategy,
    store: &WeightStore,
    table: &NodeTable,
    cache: &OpCache,
) -> QmddResult<Edge> {
    if mat.weight == store.zero() || vec.weight == store.zero() {
        return Ok(Edge::terminal(store.zero()));
    }
    if nextvar == nvars {
        return Ok(Edge::terminal(store.mul(mat.weight, vec.weight)?));
    }

    let key = OpKey::simple(OpCode::MatVec, mat, Some(vec), nextvar as u64);
    if let Some(hit) = cache.get(&key) {
        return Ok(hit);
    }

    let (_, vec_low_c, vec_high_c) = topvar_cofactors(vec, nextvar, store, table)?;
    let (_, mat_low_c, mat_high_c) = topvar_cofactors(mat, 2 * nextvar, store, table)?;
    let (_, u00_c, u10_c) = topvar_cofactors(mat_low_c, 2 * nextvar + 1, store, table)?;
    let (_, u01_c, u11_c) = topvar_cofactors(mat_high_c, 2 * nextvar + 1, store, table)?;

    let vec_low = Edge { weight: store.mul(vec.weight, vec_low_c.weight)?, target: vec_low_c.target };
    let vec_high = Edge { weight: store.mul(vec.weight, vec_high_c.weight)?, target: vec_high_c.target };
    let mat_low_amp = store.mul(mat.weight, mat_low_c.weight)?;
    let mat_high_amp = store.mul(mat.weight, mat_high_c.weight)?;
    let u00 = Edge { weight: store.mul(mat_low_amp, u00_c.weight)?, target: u00_c.target };
    let u10 = Edge { weight: store.mul(mat_low_amp, u10_c.weight)?, target: u10_c.target };
    let u01 = Edge { weight: store.mul(mat_high_amp, u01_c.weight)?, target: u01_c.target };
    let u11 = Edge { weight: store.mul(mat_high_amp, u11_c.weight)?, target: u11_c.target };

    let next = nextvar + 1;
    let ((res_low00, res_low10), (res_high01, res_high11)) = rayon::join(
        || {
            rayon::join(
                || mat_vec_rec(u00, vec_low, nvars, next, strategy, store, table, cache),
                || mat_vec_rec(u10, vec_low, nvars, next, strategy, store, table, cache),
            )
        },
        || {
            rayon::join(
                || mat_vec_rec(u01, vec_high, nvars, next, strategy, store, table, cache),
                || mat_vec_rec(u11, vec_high, nvars, next, strategy, store, table, cache),
            )
        },
    );
    let (res_low00, res_low10) = (res_low00?, res_low10?);
    let (res_high01, res_high11) = (res_high01?, res_high11?);

    let res_low = make_edge(strategy, store.one(), nextvar, res_low00, res_low10, store, table)?;
    let res_high = make_edge(strategy, store.one(), nextvar, res_high01, res_high11, store, table)?;
    let res = plus(res_low, res_high, strategy, store, table, cache)?;
    cache.put(key, res);
    Ok(res)
}

/// Multiply two `n_qubits`-qubit operator edges.
pub fn mat_mat(
    a: Edge,
    b: Edge,
    n_qubits: u32,
    strategy: NormStrategy,
    store: &WeightStore,
    table: &NodeTable,
    cache: &OpCache,
) -> QmddResult<Edge> {
    mat_mat_rec(a, b, n_qubits, 0, strategy, store, table, cache)
}

#[allow(clippy::too_many_arguments)]
fn mat_mat_rec(
    a: Edge,
    b: Edge,
    nvars: u32,
    nextvar: u32,
    strategy: NormStrategy,
    store: &WeightStore,
    table: &NodeTable,
    cache: &OpCache,
) -> QmddResult<Edge> {
    if a.weight == store.zero() || b.weight == store.zero() {
        return Ok(Edge::terminal(store.zero()));
    }
    if nextvar == nvars {
        return Ok(Edge::terminal(store.mul(a.weight, b.weight)?));
    }

    let key = OpKey::simple(OpCode::MatMat, a, Some(b), nextvar as u64);
    if let Some(hit) = cache.get(&key) {
        return Ok(hit);
    }

    let (_, a_low_c, a_high_c) = topvar_cofactors(a, 2 * nextvar, store, table)?;
    let (_, b_low_c, b_high_c) = topvar_cofactors(b, 2 * nextvar, store, table)?;
    let (_, a00_c, a10_c) = topvar_cofactors(a_low_c, 2 * nextvar + 1, store, table)?;
    let (_, a01_c, a11_c) = topvar_cofactors(a_high_c, 2 * nextvar + 1, store, table)?;
    let (_, b00_c, b10_c) = topvar_cofactors(b_low_c, 2 * nextvar + 1, store, table)?;
    let (_, b01_c, b11_c) = topvar_cofactors(b_high_c, 2 * nextvar + 1, store, table)?;

    let a_low_amp = store.mul(a.weight, a_low_c.weight)?;
    let a_high_amp = store.mul(a.weight, a_high_c.weight)?;
    let b_low_amp = store.mul(b.weight, b_low_c.weight)?;
    let b_high_amp = store.mul(b.weight, b_high_c.weight)?;

    let a00 = Edge { weight: store.mul(a_low_amp, a00_c.weight)?, target: a00_c.target };
    let a10 = Edge { weight: store.mul(a_low_amp, a10_c.weight)?, target: a10_c.target };
    let a01 = Edge { weight: store.mul(a_high_amp, a01_c.weight)?, target: a01_c.target };
    let a11 = Edge { weight: store.mul(a_high_amp, a11_c.weight)?, target: a11_c.target };
    let b00 = Edge { weight: store.mul(b_low_amp, b00_c.weight)?, target: b00_c.target };
    let b10 = Edge { weight: store.mul(b_low_amp, b10_c.weight)?, target: b10_c.target };
    let b01 = Edge { weight: store.mul(b_high_amp, b01_c.weight)?, target: b01_c.target };
    let b11 = Edge { weight: store.mul(b_high_amp, b11_c.weight)?, target: b11_c.target };

    let next = nextvar + 1;
    let (left, right) = rayon::join(
        || {
            let (p, q) = rayon::join(
                || mat_mat_rec(a00, b00, nvars, next, strategy, store, table, cache),
                || mat_mat_rec(a10, b00, nvars, next, strategy, store, table, cache),
            );
            let (r, s) = rayon::join(
                || mat_mat_rec(a01, b10, nvars, next, strategy, store, table, cache),
                || mat_mat_rec(a11, b10, nvars, next, strategy, store, table, cache),
            );
            (p, q, r, s)
        },
        || {
            let (p, q) = rayon::join(
                || mat_mat_rec(a00, b01, nvars, next, strategy, store, table, cache),
                || mat_mat_rec(a10, b01, nvars, next, strategy, store, table, cache),
            );
            let (r, s) = rayon::join(
                || mat_mat_rec(a01, b11, nvars, next, strategy, store, table, cache),
                || mat_mat_rec(a11, b11, nvars, next, strategy, store, table, cache),
            );
            (p, q, r, s)
        },
    );
    let (a00_b00, a10_b00, a01_b10, a11_b10) = (left.0?, left.1?, left.2?, left.3?);
    let (a00_b01, a10_b01, a01_b11, a11_b11) = (right.0?, right.1?, right.2?, right.3?);

    let lh1 = make_edge(strategy, store.one(), 2 * nextvar + 1, a00_b00, a10_b00, store, table)?;
    let lh2 = make_edge(strategy, store.one(), 2 * nextvar + 1, a01_b10, a11_b10, store, table)?;
    let rh1 = make_edge(strategy, store.one(), 2 * nextvar + 1, a00_b01, a10_b01, store, table)?;
    let rh2 = make_edge(strategy, store.one(), 2 * nextvar + 1, a01_b11, a11_b11, store, table)?;

    let (lh, rh) = {
        let (l, r) = rayon::join(
            || plus(lh1, lh2, strategy, store, table, cache),
            || plus(rh1, rh2, strategy, store, table, cache),
        );
        (l?, r?)
    };

    let res = make_edge(strategy, store.one(), 2 * nextvar, lh, rh, store, table)?;
    cache.put(key, res);
    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::{GATEID_H, GATEID_I, GATEID_X, GATEID_Z};
    use num_complex::Complex64;

    struct Fixture {
        store: WeightStore,
        table: NodeTable,
        gates: GateLibrary,
        cache: OpCache,
    }

    impl Fixture {
        fn new() -> Self {
            let store = WeightStore::new(1 << 14, 1e-9);
            let gates = GateLibrary::new(&store).unwrap();
            Fixture {
                store,
                table: NodeTable::new(1 << 14),
                gates,
                cache: OpCache::new(1 << 12),
            }
        }
    }

    fn basis_state(f: &Fixture, n_qubits: u32, value: u64) -> Edge {
        let mut edge = Edge::terminal(f.store.one());
        for q in (0..n_qubits).rev() {
            let bit = (value >> q) & 1;
            let zero = Edge::terminal(f.store.zero());
            let (low, high) = if bit == 0 { (edge, zero) } else { (zero, edge) };
            edge = make_edge(NormStrategy::Low, f.store.one(), q, low, high, &f.store, &f.table).unwrap();
        }
        edge
    }

    #[test]
    fn plus_is_commutative_and_has_zero_identity() {
        let f = Fixture::new();
        let a = basis_state(&f, 2, 0b01);
        let b = basis_state(&f, 2, 0b10);
        let zero = Edge::terminal(f.store.zero());
        let sum_ab = plus(a, b, NormStrategy::Low, &f.store, &f.table, &f.cache).unwrap();
        let sum_ba = plus(b, a, NormStrategy::Low, &f.store, &f.table, &f.cache).unwrap();
        assert_eq!(sum_ab, sum_ba);
        assert_eq!(plus(a, zero, NormStrategy::Low, &f.store, &f.table, &f.cache).unwrap(), a);
    }

    #[test]
    fn pauli_x_flips_basis_state() {
        let f = Fixture::new();
        let zero_state = basis_state(&f, 1, 0);
        let flipped = gate(zero_state, GATEID_X, 0, NormStrategy::Low, &f.store, &f.table, &f.gates, &f.cache).unwrap();
        let one_state = basis_state(&f, 1, 1);
        assert_eq!(flipped, one_state);
    }

    #[test]
    fn identity_gate_is_a_no_op() {
        let f = Fixture::new();
        let s = basis_state(&f, 1, 1);
        let out = gate(s, GATEID_I, 0, NormStrategy::Low, &f.store, &f.table, &f.gates, &f.cache).unwrap();
        assert_eq!(out, s);
    }

    #[test]
    fn hadamard_is_self_inverse_on_zero_state() {
        let f = Fixture::new();
        let s = basis_state(&f, 1, 0);
        let once = gate(s, GATEID_H, 0, NormStrategy::Low, &f.store, &f.table, &f.gates, &f.cache).unwrap();
        let twice = gate(once, GATEID_H, 0, NormStrategy::Low, &f.store, &f.table, &f.gates, &f.cache).unwrap();
        assert_eq!(twice, s);
    }

    #[test]
    fn cnot_flips_target_only_when_control_set() {
        let f = Fixture::new();
        let s00 = basis_state(&f, 2, 0b00);
        let out = c_gate(s00, GATEID_X, &[0], 1, NormStrategy::Low, &f.store, &f.table, &f.gates, &f.cache).unwrap();
        assert_eq!(out, s00);

        let s10 = basis_state(&f, 2, 0b10);
        let out = c_gate(s10, GATEID_X, &[0], 1, NormStrategy::Low, &f.store, &f.table, &f.gates, &f.cache).unwrap();
        let expected = basis_state(&f, 2, 0b11);
        assert_eq!(out, expected);
    }

    #[test]
    fn identity_matrix_times_vector_is_identity() {
        let f = Fixture::new();
        // Build the 1-qubit identity matrix QDD directly: two column
        // sub-levels both selecting the matching diagonal entry.
        let one = Edge::terminal(f.store.one());
        let zero = Edge::terminal(f.store.zero());
        let col0 = make_edge(NormStrategy::Low, f.store.one(), 1, one, zero, &f.store, &f.table).unwrap();
        let col1 = make_edge(NormStrategy::Low, f.store.one(), 1, zero, one, &f.store, &f.table).unwrap();
        let identity = make_edge(NormStrategy::Low, f.store.one(), 0, col0, col1, &f.store, &f.table).unwrap();

        let v = basis_state(&f, 1, 1);
        let out = mat_vec(identity, v, 1, NormStrategy::Low, &f.store, &f.table, &f.cache).unwrap();
        assert_eq!(out, v);
    }

    #[test]
    fn z_gate_adds_expected_phase() {
        let f = Fixture::new();
        let s = basis_state(&f, 1, 1);
        let out = gate(s, GATEID_Z, 0, NormStrategy::Low, &f.store, &f.table, &f.gates, &f.cache).unwrap();
        assert_eq!(out.target, s.target);
        let ratio = f.store.div(out.weight, s.weight).unwrap();
        assert!((f.store.get(ratio) - Complex64::new(-1.0, 0.0)).norm() < 1e-9);
    }
}
