//! Quantum Multiplicative Decision Diagram (QMDD) engine.
//!
//! A QMDD represents a `2^n`-entry complex state vector or a `4^n`-entry
//! complex operator matrix as a compressed, canonical DAG: shared
//! sub-structure across the `2^n` basis amplitudes collapses to the same
//! nodes, and a fixed set of invariants (variable ordering, no redundant
//! nodes, unique nodes, normalized children, canonical zero, weight
//! uniqueness) guarantee that two mathematically equal states or operators
//! are represented by the exact same edge.
//!
//! [`Context`] owns every table the engine needs — the node and weight
//! unique tables, the gate library, and the operation cache — and exposes
//! the client-facing operations: build a basis state, apply a gate or a
//! matrix, measure a qubit, and garbage-collect.
//!
//! ```
//! use qmdd_core::{Config, Context};
//! use qmdd_core::gate::GATEID_H;
//!
//! let mut config = Config::default();
//! config.n_qubits = 1;
//! let ctx = Context::init(config).unwrap();
//!
//! let zero = ctx.all_zero_state().unwrap();
//! let plus = ctx.gate(zero, GATEID_H, 0).unwrap();
//! assert!((ctx.prob_sum(plus).unwrap() - 1.0).abs() < 1e-9);
//! ```

pub mod apply;
pub mod builder;
pub mod context;
pub mod dot;
pub mod error;
pub mod gate;
pub mod gc;
pub mod measure;
pub mod node;
pub mod normalize;
pub mod opcache;
pub mod weight;

pub use context::{Config, Context, Stats};
pub use error::{QmddError, QmddResult};
pub use node::Edge;
pub use normalize::NormStrategy;
