//! Probability extraction and measurement.
//!
//! `measure_qubit` for `k != 0` is expressed as the source engine expresses
//! it: swap qubit `k` into position 0 with three CNOT-equivalents, measure
//! there, swap back. `measure_all` instead walks the tree level by level,
//! which avoids `n` swaps when every qubit is being measured anyway.

use num_complex::Complex64;
use rand::Rng;

use crate::apply::{c_gate, gate, pack2, topvar_cofactors};
use crate::builder::{basis_state, make_edge};
use crate::error::{QmddError, QmddResult};
use crate::gate::{GateLibrary, GATEID_H, GATEID_X, GATEID_Z};
use crate::node::{Edge, NodeTable, Target};
use crate::normalize::NormStrategy;
use crate::opcache::{OpCache, OpCode, OpKey};
use crate::weight::WeightStore;

/// Sum of `|amplitude|^2` over every basis state consistent with the path
/// taken from `edge` down to `level`, scaled by everything above `edge`.
/// `level == n_qubits` is the base case: `edge` must be a terminal edge and
/// its squared weight is returned directly.
pub fn prob_sum(
    edge: Edge,
    level: u32,
    n_qubits: u32,
    store: &WeightStore,
    table: &NodeTable,
    cache: &OpCache,
) -> QmddResult<f64> {
    if level == n_qubits {
        return Ok(store.get(edge.weight).norm_sqr());
    }

    let key = OpKey::simple(OpCode::ProbSum, edge, None, pack2(level, n_qubits));
    if let Some(hit) = cache.get(&key) {
        return Ok(store.get(hit.weight).re);
    }

    let (_, low, high) = topvar_cofactors(edge, level, store, table)?;
    let next = level + 1;
    let (p_low, p_high) = {
        let (a, b) = rayon::join(
            || prob_sum(low, next, n_qubits, store, table, cache),
            || prob_sum(high, next, n_qubits, store, table, cache),
        );
        (a?, b?)
    };

    let total = store.get(edge.weight).norm_sqr() * (p_low + p_high);
    let handle = store.find_or_put(Complex64::new(total, 0.0))?.0;
    cache.put(key, Edge::terminal(handle));
    Ok(total)
}

/// Read off the amplitude of a single computational basis string, without
/// allocating anything: a straight walk from the root following `bits`.
pub fn get_amplitude(edge: Edge, bits: &[u8], store: &WeightStore, table: &NodeTable) -> QmddResult<Complex64> {
    let mut amp = Complex64::new(1.0, 0.0);
    let mut cur = edge;
    loop {
        amp *= store.get(cur.weight);
        match cur.target {
            Target::Terminal => return Ok(amp),
            Target::Node(id) => {
                let node = table.get(id)?;
                let bit = bits.get(node.var as usize).copied().ok_or(QmddError::QubitOutOfRange {
                    qubit: node.var,
                    n_qubits: bits.len() as u32,
                })?;
                cur = if bit == 0 { node.low } else { node.high };
            }
        }
    }
}

/// Divide out the root edge's phase so the result carries no overall phase
/// beyond what's already implied by its magnitude — a uniform rescaling of
/// the whole state, so it is exactly `scalar_mul` by the phase's inverse.
fn remove_global_phase(edge: Edge, store: &WeightStore) -> QmddResult<Edge> {
    if edge.weight == store.zero() {
        return Ok(edge);
    }
    let c = store.get(edge.weight);
    let phase = c.arg();
    if phase == 0.0 {
        return Ok(edge);
    }
    let correction = store.find_or_put(Complex64::from_polar(1.0, -phase))?.0;
    crate::apply::scalar_mul(correction, edge, store)
}

fn assert_unitary(sum: f64, tolerance: f64) -> QmddResult<()> {
    if (sum - 1.0).abs() > tolerance {
        return Err(QmddError::NotUnitary { sum, tolerance });
    }
    Ok(())
}

/// Measure qubit 0 of an `n_qubits`-qubit unit vector. Returns the collapsed,
/// renormalized, global-phase-free post-measurement state, the outcome bit,
/// and its probability.
fn measure_qubit0(
    edge: Edge,
    n_qubits: u32,
    strategy: NormStrategy,
    store: &WeightStore,
    table: &NodeTable,
    cache: &OpCache,
    tolerance: f64,
    rng: &mut impl Rng,
) -> QmddResult<(Edge, u8, f64)> {
    let (_, low, high) = topvar_cofactors(edge, 0, store, table)?;
    let root_prob = store.get(edge.weight).norm_sqr();
    let prob_low = prob_sum(low, 1, n_qubits, store, table, cache)? * root_prob;
    let prob_high = prob_sum(high, 1, n_qubits, store, table, cache)? * root_prob;
    assert_unitary(prob_low + prob_high, tolerance)?;

    let draw: f64 = rng.gen();
    let outcome = if draw < prob_low { 0u8 } else { 1u8 };
    let chosen_prob = if outcome == 0 { prob_low } else { prob_high };

    let (low2, high2) = if outcome == 0 {
        (low, Edge::terminal(store.zero()))
    } else {
        (Edge::terminal(store.zero()), high)
    };
    let res = make_edge(strategy, store.one(), 0, low2, high2, store, table)?;
    let combined = store.mul(edge.weight, res.weight)?;
    let norm = store.find_or_put(Complex64::new(chosen_prob.sqrt(), 0.0))?.0;
    let collapsed = Edge { weight: store.div(combined, norm)?, target: res.target };
    let final_edge = remove_global_phase(collapsed, store)?;
    Ok((final_edge, outcome, chosen_prob))
}

#[allow(clippy::too_many_arguments)]
fn circuit_swap(
    edge: Edge,
    q1: u32,
    q2: u32,
    strategy: NormStrategy,
    store: &WeightStore,
    table: &NodeTable,
    gates: &GateLibrary,
    cache: &OpCache,
) -> QmddResult<Edge> {
    debug_assert!(q1 < q2);
    let e = c_gate(edge, GATEID_X, &[q1], q2, strategy, store, table, gates, cache)?;
    let e = gate(e, GATEID_H, q1, strategy, store, table, gates, cache)?;
    let e = c_gate(e, GATEID_Z, &[q1], q2, strategy, store, table, gates, cache)?;
    let e = gate(e, GATEID_H, q1, strategy, store, table, gates, cache)?;
    c_gate(e, GATEID_X, &[q1], q2, strategy, store, table, gates, cache)
}

/// Measure qubit `k` of an `n_qubits`-qubit unit vector.
#[allow(clippy::too_many_arguments)]
pub fn measure_qubit(
    edge: Edge,
    k: u32,
    n_qubits: u32,
    strategy: NormStrategy,
    store: &WeightStore,
    table: &NodeTable,
    gates: &GateLibrary,
    cache: &OpCache,
    tolerance: f64,
    rng: &mut impl Rng,
) -> QmddResult<(Edge, u8, f64)> {
    if k >= n_qubits {
        return Err(QmddError::QubitOutOfRange { qubit: k, n_qubits });
    }
    if k == 0 {
        return measure_qubit0(edge, n_qubits, strategy, store, table, cache, tolerance, rng);
    }
    let swapped = circuit_swap(edge, 0, k, strategy, store, table, gates, cache)?;
    let (measured, outcome, prob) = measure_qubit0(swapped, n_qubits, strategy, store, table, cache, tolerance, rng)?;
    let restored = circuit_swap(measured, 0, k, strategy, store, table, gates, cache)?;
    Ok((restored, outcome, prob))
}

/// Measure every qubit, in index order. Returns the freshly-built basis
/// state corresponding to the outcome string, the outcomes themselves, and
/// the overall (product) probability of that string.
pub fn measure_all(
    edge: Edge,
    n_qubits: u32,
    strategy: NormStrategy,
    store: &WeightStore,
    table: &NodeTable,
    cache: &OpCache,
    tolerance: f64,
    rng: &mut impl Rng,
) -> QmddResult<(Edge, Vec<u8>, f64)> {
    let mut current = edge;
    let mut outcomes = Vec::with_capacity(n_qubits as usize);
    let mut prob_path = 1.0f64;

    for k in 0..n_qubits {
        let (_, low, high) = topvar_cofactors(current, k, store, table)?;
        let root_prob = store.get(current.weight).norm_sqr();
        let prob_low = prob_sum(low, k + 1, n_qubits, store, table, cache)? * root_prob / prob_path;
        let prob_high = prob_sum(high, k + 1, n_qubits, store, table, cache)? * root_prob / prob_path;
        assert_unitary(prob_low + prob_high, tolerance)?;

        let draw: f64 = rng.gen();
        let bit = if draw < prob_low { 0u8 } else { 1u8 };
        outcomes.push(bit);
        current = if bit == 0 { low } else { high };
        prob_path *= if bit == 0 { prob_low } else { prob_high };
    }

    let basis = basis_state(&outcomes, strategy, store, table)?;
    Ok((basis, outcomes, prob_path))
}
