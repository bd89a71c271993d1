//! Error taxonomy for the reconstructability analysis engine.
//!
//! Each component that can fail owns a small `thiserror` enum; [`RaError`] is
//! the umbrella surfaced at the public API boundary (§6/§7 of the design
//! spec). Numerical edge cases (log of zero, division by zero in IPF/BP) are
//! clamped internally and never surface as errors.

use thiserror::Error;

/// Errors from the primal-graph / chordality module (C4).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    /// A vertex index referenced by an edge or clique is out of range.
    #[error("vertex index {0} out of range")]
    VertexOutOfRange(usize),
}

/// Errors from junction tree construction and verification (C5).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum JunctionTreeError {
    /// The model is not decomposable, so no junction tree exists.
    #[error("model is not decomposable: {0}")]
    NotDecomposable(String),

    /// A tree was built but failed the Running Intersection Property check.
    #[error("running intersection property violated for variable index {variable}")]
    RipViolation {
        /// The variable whose containing cliques did not form a connected subtree.
        variable: usize,
    },

    /// Construction was attempted on a model with fewer than one relation.
    #[error("cannot build a junction tree for an empty model")]
    EmptyModel,
}

/// Errors surfaced by iterative proportional fitting (C7).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConvergenceError {
    /// Iteration budget was exhausted before the tolerance was met.
    #[error("IPF did not converge after {iterations} iterations (tolerance {tolerance}, final error {final_error})")]
    NotConverged {
        /// Iterations actually run.
        iterations: usize,
        /// Requested convergence tolerance.
        tolerance: f64,
        /// Maximum marginal deviation observed at the final iteration.
        final_error: f64,
    },
}

/// The umbrella error type surfaced across the public API boundary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RaError {
    /// Bad input: empty variable list/data, unknown abbreviation, invalid
    /// cardinality, out-of-range value. Never recovered from automatically.
    #[error("validation error: {0}")]
    Validation(String),

    /// A computation could not be completed (e.g. a malformed intermediate
    /// state reached during fitting).
    #[error("computation error: {0}")]
    Computation(String),

    /// IPF failed to converge under a strict policy.
    #[error(transparent)]
    Convergence(#[from] ConvergenceError),

    /// Junction tree construction or verification failed under a strict
    /// policy.
    #[error(transparent)]
    JunctionTree(#[from] JunctionTreeError),

    /// A key operation failed (length mismatch, out-of-range value).
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// The parallel search driver could not complete.
    #[error("search error: {0}")]
    Search(String),
}

impl From<GraphError> for RaError {
    fn from(e: GraphError) -> Self {
        RaError::Computation(e.to_string())
    }
}

/// Convenience alias used throughout the crate's public functions.
pub type RaResult<T> = Result<T, RaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convergence_error_displays_fields() {
        let e = ConvergenceError::NotConverged {
            iterations: 200,
            tolerance: 1e-6,
            final_error: 0.003,
        };
        let msg = e.to_string();
        assert!(msg.contains("200"));
        assert!(msg.contains("0.003"));
    }

    #[test]
    fn rip_violation_wraps_into_ra_error() {
        let jt = JunctionTreeError::RipViolation { variable: 2 };
        let ra: RaError = jt.into();
        assert!(matches!(ra, RaError::JunctionTree(JunctionTreeError::RipViolation { variable: 2 })));
    }
}
