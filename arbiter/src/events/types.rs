//! Event payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::arbitration::ArbitrationMethod;
use crate::consensus::ConsensusMethod;

/// Events produced by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArbiterEvent {
    /// The decision arbiter selected a winner
    DecisionMade {
        method: ArbitrationMethod,
        confidence: f64,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The consensus driver reached a terminal state
    ConsensusComplete {
        agreement_reached: bool,
        confidence: f64,
        rounds_run: u32,
        method: ConsensusMethod,
        timestamp: DateTime<Utc>,
    },
}

impl ArbiterEvent {
    /// Event name as exposed to observability collaborators
    pub fn event_type(&self) -> &'static str {
        match self {
            ArbiterEvent::DecisionMade { .. } => "decision:made",
            ArbiterEvent::ConsensusComplete { .. } => "consensus:complete",
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ArbiterEvent::DecisionMade { timestamp, .. } => *timestamp,
            ArbiterEvent::ConsensusComplete { timestamp, .. } => *timestamp,
        }
    }

    /// Engine confidence carried by the event
    pub fn confidence(&self) -> f64 {
        match self {
            ArbiterEvent::DecisionMade { confidence, .. } => *confidence,
            ArbiterEvent::ConsensusComplete { confidence, .. } => *confidence,
        }
    }
}
