//! Consensus outcome record

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::state::RoundRecord;
use super::ConsensusMethod;
use crate::candidate::ResponderId;

/// Why the consensus loop stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum TerminationReason {
    /// Agreement threshold reached
    Converged,
    /// `max_rounds` used up
    RoundsExhausted,
    /// Method runs one round, or no refiner is attached
    SingleRound,
    /// Driver loop exceeded `timeout_ms`
    TimedOut,
    /// Caller cancelled the request
    Cancelled,
    /// The refiner reported an error
    RefinementFailed(String),
    /// The refiner returned no candidates
    NoProposals,
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Converged => write!(f, "converged"),
            Self::RoundsExhausted => write!(f, "rounds_exhausted"),
            Self::SingleRound => write!(f, "single_round"),
            Self::TimedOut => write!(f, "timed_out"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::RefinementFailed(reason) => write!(f, "refinement_failed: {}", reason),
            Self::NoProposals => write!(f, "no_proposals"),
        }
    }
}

/// Outcome of a consensus run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusOutcome {
    pub agreement_reached: bool,
    /// Converged value, `None` without agreement
    pub agreed_value: Option<Value>,
    /// Share of the final round agreeing on the value, 0 without agreement
    pub confidence: f64,
    pub rounds_run: u32,
    pub participants: Vec<ResponderId>,
    pub dissenting_responders: Vec<ResponderId>,
    pub method: ConsensusMethod,
    pub termination: TerminationReason,
    /// Per-round history
    pub rounds: Vec<RoundRecord>,
}

impl ConsensusOutcome {
    /// Whether every participant agreed
    pub fn is_unanimous(&self) -> bool {
        self.agreement_reached && self.dissenting_responders.is_empty()
    }

    /// Compact summary line
    pub fn summary_line(&self) -> String {
        let status = if self.agreement_reached {
            "AGREED"
        } else {
            "NO CONSENSUS"
        };
        format!(
            "[{}] {} | {} rounds | confidence={:.2} | dissent={}/{} | {}",
            status,
            self.method,
            self.rounds_run,
            self.confidence,
            self.dissenting_responders.len(),
            self.participants.len(),
            self.termination
        )
    }
}
