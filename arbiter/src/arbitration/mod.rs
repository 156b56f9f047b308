//! Decision arbitration: single-pass selection over a strategy ladder.
//!
//! # Ladder
//!
//! ```text
//! weighted-voting ──(< min_confidence)──▶ highest-confidence
//!        │                                       │
//!   ≥ min_confidence                   (< min_confidence)
//!        ▼                                       ▼
//!     result     consensus ◀─────────────────────┘
//!                    │
//!          (< consensus_threshold)
//!                    ▼
//!     executive (if enabled and the executive responded)
//!                    │
//!                    ▼
//!     forced fallback: weighted-voting winner, flagged low confidence
//! ```
//!
//! The ladder order is configurable; the forced fallback always applies,
//! so arbitration terminates with an answer for any non-empty input.

pub mod ladder;
pub mod reasoning;
pub mod result;

pub use ladder::{arbitrate, DecisionArbiter};
pub use reasoning::explain;
pub use result::ArbitrationResult;

use serde::{Deserialize, Serialize};

use crate::error::ArbiterError;

/// Prefix of the `UnknownMethod` display string
pub(crate) const UNKNOWN_METHOD_PREFIX: &str = "Unknown method: ";

/// Strategy that produced an arbitration result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ArbitrationMethod {
    /// Σ(weight × confidence) per value group
    WeightedVoting,
    /// Margin between the two most confident candidates
    HighestConfidence,
    /// Share of candidates in the largest agreement group
    Consensus,
    /// Candidate of the designated executive responder
    Executive,
}

impl ArbitrationMethod {
    /// Default ladder order
    pub fn all() -> &'static [ArbitrationMethod] {
        &[
            ArbitrationMethod::WeightedVoting,
            ArbitrationMethod::HighestConfidence,
            ArbitrationMethod::Consensus,
            ArbitrationMethod::Executive,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ArbitrationMethod::WeightedVoting => "weighted-voting",
            ArbitrationMethod::HighestConfidence => "highest-confidence",
            ArbitrationMethod::Consensus => "consensus",
            ArbitrationMethod::Executive => "executive",
        }
    }
}

impl std::fmt::Display for ArbitrationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ArbitrationMethod {
    type Err = ArbiterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ArbitrationMethod::all()
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| ArbiterError::UnknownMethod(s.to_string()))
    }
}

impl TryFrom<String> for ArbitrationMethod {
    type Error = ArbiterError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ArbitrationMethod> for String {
    fn from(method: ArbitrationMethod) -> Self {
        method.as_str().to_string()
    }
}
