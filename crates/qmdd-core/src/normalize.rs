//! Factors a common weight out of a node's children to keep the DAG
//! canonical.

use crate::error::QmddResult;
use crate::node::Edge;
use crate::weight::WeightStore;

/// Which canonical form a [`crate::context::Context`] normalizes nodes to.
/// Fixed for the lifetime of a context — two node tables built under
/// different strategies are incomparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormStrategy {
    /// Factor out `low`'s weight when non-zero, else `high`'s.
    Low,
    /// Factor out whichever child has the larger squared magnitude, ties
    /// broken in favor of `low`.
    Largest,
}

/// Given the two child edges of a node-to-be, returns `(w, low', high')`
/// such that `low = w * low'` and `high = w * high'`, with `low'`/`high'` in
/// the chosen canonical form. Both strategies are idempotent and bijective
/// on non-zero pairs; zero edges are already canonicalized to
/// `(ZERO, terminal)` by the caller before this runs.
pub fn normalize(
    strategy: NormStrategy,
    low: Edge,
    high: Edge,
    store: &WeightStore,
) -> QmddResult<(crate::weight::WeightId, Edge, Edge)> {
    match strategy {
        NormStrategy::Low => normalize_low(low, high, store),
        NormStrategy::Largest => normalize_largest(low, high, store),
    }
}

fn normalize_low(low: Edge, high: Edge, store: &WeightStore) -> QmddResult<(crate::weight::WeightId, Edge, Edge)> {
    if low.weight != store.zero() {
        let w = low.weight;
        let low_p = Edge { weight: store.one(), target: low.target };
        let high_p = Edge { weight: store.div(high.weight, w)?, target: high.target };
        Ok((w, low_p, high_p))
    } else {
        let w = high.weight;
        let high_p = Edge { weight: store.one(), target: high.target };
        // low' is preserved as the canonical zero edge.
        let low_p = Edge { weight: store.zero(), target: crate::node::Target::Terminal };
        Ok((w, low_p, high_p))
    }
}

fn normalize_largest(low: Edge, high: Edge, store: &WeightStore) -> QmddResult<(crate::weight::WeightId, Edge, Edge)> {
    let m_low = store.get(low.weight).norm_sqr();
    let m_high = store.get(high.weight).norm_sqr();
    if m_low >= m_high {
        let w = low.weight;
        let low_p = Edge { weight: store.one(), target: low.target };
        let high_p = Edge { weight: store.div(high.weight, w)?, target: high.target };
        Ok((w, low_p, high_p))
    } else {
        let w = high.weight;
        let high_p = Edge { weight: store.one(), target: high.target };
        let low_p = Edge { weight: store.div(low.weight, w)?, target: low.target };
        Ok((w, low_p, high_p))
    }
}
