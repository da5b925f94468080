//! Error types for the QMDD core engine.

use thiserror::Error;

/// Errors that can occur in QMDD core operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum QmddError {
    /// `NodeTable` or `WeightStore` exhausted even after a GC retry.
    #[error("{table} exhausted: no free slot within the probe bound (capacity {capacity})")]
    TableFull {
        /// Which table overflowed.
        table: &'static str,
        /// The table's configured capacity.
        capacity: usize,
    },

    /// A handle was used after a weight-table rebuild invalidated it.
    #[error("stale {kind} handle used after a table rebuild")]
    InvalidHandle {
        /// Which kind of handle (`"weight"` or `"node"`).
        kind: &'static str,
    },

    /// Measurement probabilities failed to sum to one within tolerance.
    #[error("measurement probabilities sum to {sum} (expected 1.0 within tolerance {tolerance})")]
    NotUnitary {
        /// The observed sum of marginal probabilities.
        sum: f64,
        /// The tolerance that was violated.
        tolerance: f64,
    },

    /// A gate id is neither predefined nor a live dynamic slot.
    #[error("unknown gate id {0}")]
    UnknownGate(u32),

    /// A qubit index is out of range for the requested operation.
    #[error("qubit {qubit} out of range for a {n_qubits}-qubit state")]
    QubitOutOfRange {
        /// The offending qubit index.
        qubit: u32,
        /// The number of qubits in the state.
        n_qubits: u32,
    },

    /// A control and target qubit coincide.
    #[error("control and target qubit both refer to qubit {0}")]
    ControlTargetCollision(u32),

    /// The configuration supplied to `Context::init` is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for QMDD core operations.
pub type QmddResult<T> = Result<T, QmddError>;
