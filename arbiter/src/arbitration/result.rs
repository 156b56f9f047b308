//! Arbitration result record

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ArbitrationMethod;
use crate::candidate::Candidate;

/// Outcome of a single arbitration call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitrationResult {
    /// The winning candidate
    pub selected: Candidate,
    /// Engine confidence in the winner, in [0, 1]
    pub confidence: f64,
    /// Every other candidate, most confident first
    pub alternatives: Vec<Candidate>,
    /// Generated explanation
    pub reasoning: String,
    /// Strategy that produced the result
    pub method: ArbitrationMethod,
    /// Share of all candidates proposing the winning value
    pub consensus_level: f64,
    /// Distinct responders among the candidates
    pub responder_count: usize,
    #[serde(rename = "elapsed_ms", with = "duration_ms")]
    pub elapsed: Duration,
    /// Set when no strategy cleared its threshold
    pub low_confidence: bool,
    pub warnings: Vec<String>,
}

impl ArbitrationResult {
    /// Whether a strategy cleared its threshold
    pub fn is_confident(&self) -> bool {
        !self.low_confidence
    }

    /// Responder of the winning candidate
    pub fn winner(&self) -> &str {
        self.selected.responder_id()
    }

    /// Compact summary line
    pub fn summary_line(&self) -> String {
        format!(
            "[{}] winner={} confidence={:.2} consensus={:.2} alternatives={}{}",
            self.method,
            self.winner(),
            self.confidence,
            self.consensus_level,
            self.alternatives.len(),
            if self.low_confidence { " LOW" } else { "" }
        )
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
