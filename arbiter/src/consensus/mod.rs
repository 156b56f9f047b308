//! Consensus driver: bounded multi-round convergence.
//!
//! # Round Flow
//!
//! ```text
//! Collecting → Evaluating → [largest group share ≥ min_confidence?]
//!     ▲                              │
//!     │                              ├─ Yes → Converged
//!     │                              ├─ No, refinable, rounds left → RefinementNeeded
//!     └──────── (refined candidates) ┘                                   │
//!                                    └─ No, otherwise → Exhausted        │
//!     ◀──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The four methods only differ in the feedback handed to the external
//! [`Refiner`] between rounds. Majority vote never refines; the others
//! degrade to a single round when no refiner is attached.

pub mod driver;
pub mod outcome;
pub mod refinement;
pub mod state;

pub use driver::ConsensusDriver;
pub use outcome::{ConsensusOutcome, TerminationReason};
pub use refinement::{
    build_feedback, Feedback, PeerProposal, RefinementError, RefinementRequest, Refiner,
    ValueShare, WeightedProposal,
};
pub use state::{ConsensusPhase, ConsensusSession, ConsensusTransition, RoundRecord};

use serde::{Deserialize, Serialize};

use crate::error::ArbiterError;

/// How refined candidates are produced between rounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ConsensusMethod {
    /// Exactly one round
    MajorityVote,
    /// Feedback names the responder behind each proposal
    IterativeRefinement,
    /// Feedback is an anonymous value distribution
    Delphi,
    /// Feedback is scaled by each responder's weight share
    WeightedInfluence,
}

impl ConsensusMethod {
    pub fn all() -> &'static [ConsensusMethod] {
        &[
            ConsensusMethod::MajorityVote,
            ConsensusMethod::IterativeRefinement,
            ConsensusMethod::Delphi,
            ConsensusMethod::WeightedInfluence,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConsensusMethod::MajorityVote => "majority-vote",
            ConsensusMethod::IterativeRefinement => "iterative-refinement",
            ConsensusMethod::Delphi => "delphi",
            ConsensusMethod::WeightedInfluence => "weighted-influence",
        }
    }

    /// Whether the method may run more than one round
    pub fn is_multi_round(&self) -> bool {
        !matches!(self, ConsensusMethod::MajorityVote)
    }
}

impl std::fmt::Display for ConsensusMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConsensusMethod {
    type Err = ArbiterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConsensusMethod::all()
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| ArbiterError::UnknownMethod(s.to_string()))
    }
}

impl TryFrom<String> for ConsensusMethod {
    type Error = ArbiterError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ConsensusMethod> for String {
    fn from(method: ConsensusMethod) -> Self {
        method.as_str().to_string()
    }
}
