//! Candidate model and specialist descriptors
//!
//! A [`Candidate`] is one responder's proposed answer plus the scalar
//! metadata the arbiter works with. Candidates are validated on creation
//! and cannot be mutated afterwards.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{ArbiterError, ArbiterResult};

/// Identifier of the specialist that produced a candidate
pub type ResponderId = String;

/// Weight assumed when neither the output nor the roster supplies one
pub const DEFAULT_WEIGHT: f64 = 1.0;

/// One responder's proposal for a decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CandidateRecord")]
pub struct Candidate {
    id: String,
    value: Value,
    confidence: f64,
    responder_id: ResponderId,
    weight: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning: Option<String>,
}

impl Candidate {
    /// Start building a candidate for `responder_id` proposing `value`
    pub fn builder(responder_id: impl Into<ResponderId>, value: impl Into<Value>) -> CandidateBuilder {
        CandidateBuilder {
            id: None,
            responder_id: responder_id.into(),
            value: value.into(),
            confidence: 0.0,
            weight: DEFAULT_WEIGHT,
            reasoning: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The proposed answer
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Responder's self-reported certainty in [0, 1]
    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn responder_id(&self) -> &str {
        &self.responder_id
    }

    /// Externally assigned importance of the responder
    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn reasoning(&self) -> Option<&str> {
        self.reasoning.as_deref()
    }
}

/// Builder for [`Candidate`]; validation happens in [`CandidateBuilder::build`]
#[derive(Debug, Clone)]
pub struct CandidateBuilder {
    id: Option<String>,
    responder_id: ResponderId,
    value: Value,
    confidence: f64,
    weight: f64,
    reasoning: Option<String>,
}

impl CandidateBuilder {
    /// Use an explicit id instead of a generated one
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    /// Validate and produce the candidate
    pub fn build(self) -> ArbiterResult<Candidate> {
        let invalid = |reason: String| ArbiterError::InvalidCandidate {
            responder_id: self.responder_id.clone(),
            reason,
        };

        if self.responder_id.trim().is_empty() {
            return Err(invalid("responder id is empty".to_string()));
        }
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(invalid(format!(
                "confidence {} outside [0, 1]",
                self.confidence
            )));
        }
        if !self.weight.is_finite() || self.weight < 0.0 {
            return Err(invalid(format!("weight {} is negative", self.weight)));
        }
        if matches!(self.id.as_deref(), Some(id) if id.trim().is_empty()) {
            return Err(invalid("candidate id is empty".to_string()));
        }

        Ok(Candidate {
            id: self
                .id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            value: self.value,
            confidence: self.confidence,
            responder_id: self.responder_id,
            weight: self.weight,
            reasoning: self.reasoning,
        })
    }
}

/// Wire shape of a candidate, validated into [`Candidate`] on deserialize
#[derive(Debug, Deserialize)]
struct CandidateRecord {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    value: Value,
    confidence: f64,
    responder_id: ResponderId,
    #[serde(default = "default_weight")]
    weight: f64,
    #[serde(default)]
    reasoning: Option<String>,
}

fn default_weight() -> f64 {
    DEFAULT_WEIGHT
}

impl TryFrom<CandidateRecord> for Candidate {
    type Error = ArbiterError;

    fn try_from(record: CandidateRecord) -> Result<Self, Self::Error> {
        let mut builder = Candidate::builder(record.responder_id, record.value)
            .confidence(record.confidence)
            .weight(record.weight);
        if let Some(id) = record.id {
            builder = builder.id(id);
        }
        if let Some(reasoning) = record.reasoning {
            builder = builder.reasoning(reasoning);
        }
        builder.build()
    }
}

/// Descriptor of an external specialist
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Specialist {
    pub id: ResponderId,
    /// Higher means more important
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Voting weight override; falls back to the candidate's own weight
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

impl Specialist {
    pub fn new(id: impl Into<ResponderId>, priority: u32) -> Self {
        Self {
            id: id.into(),
            priority,
            capabilities: Vec::new(),
            weight: None,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = Some(weight);
        self
    }
}

/// Priority-ordered list of specialists
///
/// The first entry is the executive responder used by the executive
/// override. Duplicate ids keep their first occurrence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Specialist>", into = "Vec<Specialist>")]
pub struct SpecialistRoster {
    specialists: Vec<Specialist>,
}

impl SpecialistRoster {
    /// Keep the caller's ordering as the priority order
    pub fn new(specialists: Vec<Specialist>) -> Self {
        let mut roster: Vec<Specialist> = Vec::with_capacity(specialists.len());
        for specialist in specialists {
            if roster.iter().any(|s| s.id == specialist.id) {
                warn!(responder = %specialist.id, "Duplicate specialist ignored");
                continue;
            }
            roster.push(specialist);
        }
        Self { specialists: roster }
    }

    /// Order by descending `priority`, ties keep input order
    pub fn by_priority(mut specialists: Vec<Specialist>) -> Self {
        specialists.sort_by(|a, b| b.priority.cmp(&a.priority));
        Self::new(specialists)
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// The designated executive responder
    pub fn executive(&self) -> Option<&Specialist> {
        self.specialists.first()
    }

    pub fn get(&self, id: &str) -> Option<&Specialist> {
        self.specialists.iter().find(|s| s.id == id)
    }

    /// Roster-defined weight for a responder, if any
    pub fn weight_for(&self, id: &str) -> Option<f64> {
        self.get(id).and_then(|s| s.weight)
    }

    /// Weight used for voting: roster override, else the candidate's own
    pub fn effective_weight(&self, candidate: &Candidate) -> f64 {
        self.weight_for(candidate.responder_id())
            .filter(|w| w.is_finite() && *w >= 0.0)
            .unwrap_or_else(|| candidate.weight())
    }

    pub fn ids(&self) -> Vec<ResponderId> {
        self.specialists.iter().map(|s| s.id.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Specialist> {
        self.specialists.iter()
    }

    pub fn len(&self) -> usize {
        self.specialists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specialists.is_empty()
    }
}

impl From<Vec<Specialist>> for SpecialistRoster {
    fn from(specialists: Vec<Specialist>) -> Self {
        Self::new(specialists)
    }
}

impl From<SpecialistRoster> for Vec<Specialist> {
    fn from(roster: SpecialistRoster) -> Self {
        roster.specialists
    }
}

/// Raw output of a specialist as handed over by the invocation layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecialistOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub responder_id: ResponderId,
    #[serde(default)]
    pub value: Value,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl SpecialistOutput {
    /// Convert into a validated candidate, taking the weight from the
    /// roster when the output carries none
    pub fn into_candidate(self, roster: &SpecialistRoster) -> ArbiterResult<Candidate> {
        let weight = self
            .weight
            .or_else(|| roster.weight_for(&self.responder_id))
            .unwrap_or(DEFAULT_WEIGHT);

        let mut builder = Candidate::builder(self.responder_id, self.value)
            .confidence(self.confidence)
            .weight(weight);
        if let Some(id) = self.id {
            builder = builder.id(id);
        }
        if let Some(reasoning) = self.reasoning {
            builder = builder.reasoning(reasoning);
        }
        builder.build()
    }
}

/// Candidates accepted from a batch of raw outputs, plus the rejects
#[derive(Debug, Default)]
pub struct CandidateBatch {
    pub accepted: Vec<Candidate>,
    pub rejected: Vec<ArbiterError>,
}

/// Convert raw outputs one by one; malformed outputs are rejected
/// individually and never abort the batch
pub fn collect_candidates(
    outputs: impl IntoIterator<Item = SpecialistOutput>,
    roster: &SpecialistRoster,
) -> CandidateBatch {
    let mut batch = CandidateBatch::default();
    for output in outputs {
        match output.into_candidate(roster) {
            Ok(candidate) => batch.accepted.push(candidate),
            Err(e) => {
                warn!(error = %e, "Rejected specialist output");
                batch.rejected.push(e);
            }
        }
    }
    batch
}
