//! Refinement seam between consensus rounds.
//!
//! The driver never talks to responders. When a round falls short it builds
//! a [`RefinementRequest`] carrying method-specific [`Feedback`] and hands it
//! to a [`Refiner`], which returns the next round's candidates.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::ConsensusMethod;
use crate::agreement::group_by_value;
use crate::candidate::{Candidate, ResponderId, SpecialistRoster};

/// Errors a refiner may report.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefinementError {
    #[error("Refinement cancelled")]
    Cancelled,

    #[error("Refinement failed: {0}")]
    Failed(String),
}

/// A peer's proposal with attribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerProposal {
    pub responder_id: ResponderId,
    pub value: Value,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// One value's share of the previous round, without attribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueShare {
    pub value: Value,
    /// Fraction of candidates proposing this value.
    pub share: f64,
    pub mean_confidence: f64,
}

/// A peer's proposal scaled by its weight share.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedProposal {
    pub responder_id: ResponderId,
    pub value: Value,
    pub confidence: f64,
    /// Effective weight over the round's total, summing to 1.
    pub influence: f64,
}

/// Feedback shown to responders before they revise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "entries", rename_all = "snake_case")]
pub enum Feedback {
    /// Iterative refinement: every proposal with its author.
    Attributed(Vec<PeerProposal>),
    /// Delphi: value distribution, largest share first.
    Anonymous(Vec<ValueShare>),
    /// Weighted influence: proposals with influence, highest first.
    Weighted(Vec<WeightedProposal>),
}

impl Feedback {
    pub fn len(&self) -> usize {
        match self {
            Feedback::Attributed(entries) => entries.len(),
            Feedback::Anonymous(entries) => entries.len(),
            Feedback::Weighted(entries) => entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Build the feedback for a method, `None` for majority vote.
pub fn build_feedback(
    method: ConsensusMethod,
    candidates: &[Candidate],
    roster: &SpecialistRoster,
) -> Option<Feedback> {
    match method {
        ConsensusMethod::MajorityVote => None,
        ConsensusMethod::IterativeRefinement => Some(Feedback::Attributed(
            candidates
                .iter()
                .map(|c| PeerProposal {
                    responder_id: c.responder_id().to_string(),
                    value: c.value().clone(),
                    confidence: c.confidence(),
                    reasoning: c.reasoning().map(str::to_string),
                })
                .collect(),
        )),
        ConsensusMethod::Delphi => {
            let total = candidates.len().max(1) as f64;
            let mut shares: Vec<ValueShare> = group_by_value(candidates)
                .iter()
                .map(|group| ValueShare {
                    value: group.value().clone(),
                    share: group.size() as f64 / total,
                    mean_confidence: group.mean_confidence(),
                })
                .collect();
            shares.sort_by(|a, b| b.share.total_cmp(&a.share));
            Some(Feedback::Anonymous(shares))
        }
        ConsensusMethod::WeightedInfluence => {
            let weights: Vec<f64> = candidates
                .iter()
                .map(|c| roster.effective_weight(c))
                .collect();
            let total: f64 = weights.iter().sum();
            let even = 1.0 / candidates.len().max(1) as f64;

            let mut proposals: Vec<WeightedProposal> = candidates
                .iter()
                .zip(&weights)
                .map(|(c, weight)| WeightedProposal {
                    responder_id: c.responder_id().to_string(),
                    value: c.value().clone(),
                    confidence: c.confidence(),
                    // All-zero weights share influence evenly
                    influence: if total > 0.0 { weight / total } else { even },
                })
                .collect();
            proposals.sort_by(|a, b| b.influence.total_cmp(&a.influence));
            Some(Feedback::Weighted(proposals))
        }
    }
}

/// Everything a refiner needs to produce the next round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinementRequest {
    /// Round the refined candidates will be evaluated in.
    pub round: u32,
    pub method: ConsensusMethod,
    /// Previous round's candidates.
    pub previous: Vec<Candidate>,
    pub feedback: Feedback,
    /// Value of the previous round's largest group.
    pub leading_value: Value,
    pub agreement_level: f64,
}

impl RefinementRequest {
    /// Responders that took part in the previous round, first-seen order.
    pub fn responder_ids(&self) -> Vec<ResponderId> {
        let mut ids: Vec<ResponderId> = Vec::new();
        for candidate in &self.previous {
            if !ids.iter().any(|id| id == candidate.responder_id()) {
                ids.push(candidate.responder_id().to_string());
            }
        }
        ids
    }
}

/// Produces revised candidates between consensus rounds.
///
/// Implementations own all responder I/O and must return promptly once
/// `cancel` fires.
#[async_trait]
pub trait Refiner: Send + Sync {
    async fn refine(
        &self,
        request: &RefinementRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<Candidate>, RefinementError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::Specialist;
    use serde_json::json;

    fn candidate(responder: &str, value: Value, confidence: f64) -> Candidate {
        Candidate::builder(responder, value)
            .confidence(confidence)
            .build()
            .unwrap()
    }

    fn round() -> Vec<Candidate> {
        vec![
            candidate("a", json!("X"), 0.6),
            candidate("b", json!("Y"), 0.8),
            candidate("c", json!("Y"), 0.4),
        ]
    }

    #[test]
    fn test_majority_vote_has_no_feedback() {
        assert!(build_feedback(
            ConsensusMethod::MajorityVote,
            &round(),
            &SpecialistRoster::empty()
        )
        .is_none());
    }

    #[test]
    fn test_attributed_feedback() {
        let feedback = build_feedback(
            ConsensusMethod::IterativeRefinement,
            &round(),
            &SpecialistRoster::empty(),
        )
        .unwrap();
        let Feedback::Attributed(entries) = feedback else {
            panic!("expected attributed feedback");
        };
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].responder_id, "b");
        assert_eq!(entries[1].value, json!("Y"));
    }

    #[test]
    fn test_anonymous_feedback_orders_by_share() {
        let feedback =
            build_feedback(ConsensusMethod::Delphi, &round(), &SpecialistRoster::empty()).unwrap();
        let Feedback::Anonymous(shares) = feedback else {
            panic!("expected anonymous feedback");
        };
        assert_eq!(shares.len(), 2);
        assert_eq!(shares[0].value, json!("Y"));
        assert!((shares[0].share - 2.0 / 3.0).abs() < 1e-9);
        assert!((shares[0].mean_confidence - 0.6).abs() < 1e-9);
        assert_eq!(shares[1].value, json!("X"));
    }

    #[test]
    fn test_weighted_feedback_uses_roster() {
        let roster = SpecialistRoster::new(vec![
            Specialist::new("a", 3).with_weight(2.0),
            Specialist::new("b", 2),
            Specialist::new("c", 1),
        ]);
        let feedback = build_feedback(ConsensusMethod::WeightedInfluence, &round(), &roster).unwrap();
        let Feedback::Weighted(proposals) = feedback else {
            panic!("expected weighted feedback");
        };
        assert_eq!(proposals[0].responder_id, "a");
        assert!((proposals[0].influence - 0.5).abs() < 1e-9);
        let total: f64 = proposals.iter().map(|p| p.influence).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_feedback_zero_weights() {
        let candidates = vec![
            Candidate::builder("a", json!(1)).weight(0.0).build().unwrap(),
            Candidate::builder("b", json!(2)).weight(0.0).build().unwrap(),
        ];
        let feedback = build_feedback(
            ConsensusMethod::WeightedInfluence,
            &candidates,
            &SpecialistRoster::empty(),
        )
        .unwrap();
        let Feedback::Weighted(proposals) = feedback else {
            panic!("expected weighted feedback");
        };
        assert!(proposals.iter().all(|p| (p.influence - 0.5).abs() < 1e-9));
    }

    #[test]
    fn test_request_responder_ids() {
        let mut previous = round();
        previous.push(candidate("a", json!("Z"), 0.1));
        let request = RefinementRequest {
            round: 2,
            method: ConsensusMethod::Delphi,
            previous,
            feedback: Feedback::Anonymous(vec![]),
            leading_value: json!("Y"),
            agreement_level: 0.5,
        };
        assert_eq!(request.responder_ids(), vec!["a", "b", "c"]);
        assert!(request.feedback.is_empty());
    }
}
