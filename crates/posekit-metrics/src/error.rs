use thiserror::Error;

/// Errors raised while scoring poses or aggregating scores.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// The ground-truth position is (near) zero or not finite, so a relative
    /// error is undefined.
    #[error("Degenerate reference position {position:?}: relative error is undefined")]
    DegenerateReference {
        /// The offending ground-truth position.
        position: [f64; 3],
    },

    /// Nothing to aggregate.
    #[error("No samples to aggregate")]
    NoSamples,

    /// A rotation could not be built from the given parameters.
    #[error("Invalid rotation: {0}")]
    InvalidRotation(String),

    /// Two sequences that must pair up have different lengths.
    #[error("Mismatched lengths: {left_name} ({left_len}) != {right_name} ({right_len})")]
    MismatchedLengths {
        /// Label for the left-hand sequence.
        left_name: &'static str,
        /// Length of the left-hand sequence.
        left_len: usize,
        /// Label for the right-hand sequence.
        right_name: &'static str,
        /// Length of the right-hand sequence.
        right_len: usize,
    },
}
