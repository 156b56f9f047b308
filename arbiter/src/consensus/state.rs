//! Consensus state machine: phases, transitions, and round tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ConsensusMethod;

/// Phase of a consensus session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusPhase {
    /// Candidates for the current round are being gathered.
    Collecting,
    /// Agreement is being measured.
    Evaluating,
    /// Largest group reached the threshold.
    Converged,
    /// Below threshold, another round will be requested.
    RefinementNeeded,
    /// Stopped without agreement.
    Exhausted,
}

impl ConsensusPhase {
    /// Whether this is a terminal phase.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Converged | Self::Exhausted)
    }

    /// Valid transitions from this phase.
    pub fn valid_transitions(self) -> &'static [ConsensusPhase] {
        match self {
            Self::Collecting => &[Self::Evaluating, Self::Exhausted],
            Self::Evaluating => &[Self::Converged, Self::RefinementNeeded, Self::Exhausted],
            Self::RefinementNeeded => &[Self::Collecting, Self::Exhausted],
            Self::Converged | Self::Exhausted => &[],
        }
    }
}

impl std::fmt::Display for ConsensusPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Collecting => write!(f, "collecting"),
            Self::Evaluating => write!(f, "evaluating"),
            Self::Converged => write!(f, "converged"),
            Self::RefinementNeeded => write!(f, "refinement_needed"),
            Self::Exhausted => write!(f, "exhausted"),
        }
    }
}

/// Record of a single consensus round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    /// Round number (1-indexed).
    pub round: u32,
    /// Candidates evaluated in this round.
    pub candidate_count: usize,
    /// Size of the largest agreement group.
    pub largest_group_size: usize,
    /// Share of candidates in the largest group.
    pub agreement_level: f64,
    /// Value of the largest group.
    pub leading_value: Value,
    /// Whether this was the last round of the session.
    pub final_round: bool,
    /// Evaluation time in milliseconds.
    pub duration_ms: u64,
    /// When this round started.
    pub started_at: DateTime<Utc>,
}

/// A phase transition record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusTransition {
    pub from: ConsensusPhase,
    pub to: ConsensusPhase,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

/// Error for invalid state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from: ConsensusPhase,
    pub to: ConsensusPhase,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} → {} (allowed: {:?})",
            self.from,
            self.to,
            self.from.valid_transitions()
        )
    }
}

impl std::error::Error for TransitionError {}

/// A consensus session tracking phase and round history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusSession {
    pub id: String,
    pub method: ConsensusMethod,
    pub phase: ConsensusPhase,
    /// Current round number, starting at 1.
    pub current_round: u32,
    pub max_rounds: u32,
    pub rounds: Vec<RoundRecord>,
    pub transitions: Vec<ConsensusTransition>,
    pub created_at: DateTime<Utc>,
}

impl ConsensusSession {
    /// Create a session collecting its first round.
    pub fn new(method: ConsensusMethod, max_rounds: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            method,
            phase: ConsensusPhase::Collecting,
            current_round: 1,
            max_rounds,
            rounds: Vec::new(),
            transitions: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Transition to a new phase with a reason.
    pub fn transition(&mut self, to: ConsensusPhase, reason: &str) -> Result<(), TransitionError> {
        if !self.phase.valid_transitions().contains(&to) {
            return Err(TransitionError {
                from: self.phase,
                to,
            });
        }

        self.transitions.push(ConsensusTransition {
            from: self.phase,
            to,
            timestamp: Utc::now(),
            reason: reason.to_string(),
        });

        // Re-entering Collecting starts the next round
        if to == ConsensusPhase::Collecting {
            self.current_round += 1;
        }
        self.phase = to;

        Ok(())
    }

    pub fn record_round(&mut self, record: RoundRecord) {
        self.rounds.push(record);
    }

    /// Flag the most recent round as the last one.
    pub fn mark_final_round(&mut self) {
        if let Some(last) = self.rounds.last_mut() {
            last.final_round = true;
        }
    }

    pub fn is_complete(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn has_rounds_remaining(&self) -> bool {
        self.current_round < self.max_rounds
    }

    /// Compact status line.
    pub fn status_line(&self) -> String {
        format!(
            "[{}] {} round {}/{} | {} rounds recorded",
            self.phase,
            self.method,
            self.current_round,
            self.max_rounds,
            self.rounds.len()
        )
    }
}
