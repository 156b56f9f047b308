//! Error taxonomy for the arbitration engine
//!
//! Only contract violations are errors. Low confidence and non-convergence
//! are returned as ordinary values on the result records.

/// Error type for arbitration and consensus operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ArbiterError {
    #[error("No candidates provided for arbitration")]
    EmptyInput,

    #[error("Consensus requires at least one responder")]
    NoResponder,

    #[error("Consensus requires at least one initial candidate")]
    NoCandidate,

    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    #[error("Invalid candidate from {responder_id}: {reason}")]
    InvalidCandidate {
        responder_id: String,
        reason: String,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Consensus state transition failed: {0}")]
    Transition(String),
}

/// Result type for arbitration operations
pub type ArbiterResult<T> = Result<T, ArbiterError>;

impl ArbiterError {
    /// Whether this error is a caller-side input contract violation
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::EmptyInput
                | Self::NoResponder
                | Self::NoCandidate
                | Self::UnknownMethod(_)
                | Self::InvalidCandidate { .. }
        )
    }
}
