//! Decision arbiter: runs the strategy ladder and builds the result.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::reasoning::explain;
use super::result::ArbitrationResult;
use super::ArbitrationMethod;
use crate::agreement::{canonical_key, AgreementEvaluator, AgreementGroup, AgreementSummary};
use crate::candidate::{Candidate, SpecialistRoster};
use crate::config::ArbiterConfig;
use crate::error::{ArbiterError, ArbiterResult};
use crate::events::{ArbiterEvent, NoopSink, SharedEventSink};

/// Scores closer than this count as tied
const SCORE_EPSILON: f64 = 1e-12;

/// A strategy's pick before the result record is assembled
#[derive(Debug, Clone, Copy)]
struct Selection<'a> {
    selected: &'a Candidate,
    confidence: f64,
    method: ArbitrationMethod,
}

/// Applies the configured strategy ladder to a candidate set
///
/// The arbiter holds no per-call state; one instance can serve concurrent
/// requests.
pub struct DecisionArbiter {
    config: ArbiterConfig,
    evaluator: AgreementEvaluator,
    sink: SharedEventSink,
}

impl DecisionArbiter {
    /// Create an arbiter that discards events
    pub fn new(config: ArbiterConfig) -> Self {
        Self {
            config,
            evaluator: AgreementEvaluator::new(),
            sink: Arc::new(NoopSink),
        }
    }

    /// Deliver `decision:made` events to `sink`
    pub fn with_sink(mut self, sink: SharedEventSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &ArbiterConfig {
        &self.config
    }

    /// Run the configured ladder, falling back to weighted voting
    pub fn arbitrate(
        &self,
        candidates: &[Candidate],
        roster: &SpecialistRoster,
    ) -> ArbiterResult<ArbitrationResult> {
        self.run(&self.config.ladder, candidates, roster)
    }

    /// Run a single named strategy, falling back to weighted voting
    pub fn arbitrate_with(
        &self,
        method: ArbitrationMethod,
        candidates: &[Candidate],
        roster: &SpecialistRoster,
    ) -> ArbiterResult<ArbitrationResult> {
        self.run(&[method], candidates, roster)
    }

    fn run(
        &self,
        ladder: &[ArbitrationMethod],
        candidates: &[Candidate],
        roster: &SpecialistRoster,
    ) -> ArbiterResult<ArbitrationResult> {
        let started = Instant::now();

        let summary = match self.evaluator.evaluate(candidates) {
            Some(summary) => summary,
            None => {
                error!("Arbitration called without candidates");
                return Err(ArbiterError::EmptyInput);
            }
        };

        debug!(
            candidates = candidates.len(),
            groups = summary.groups().len(),
            ladder = ?ladder,
            "Starting arbitration"
        );

        let weighted = self.weighted_voting(summary.groups(), roster);
        let mut warnings = Vec::new();

        let accepted = ladder.iter().find_map(|method| {
            let step = match method {
                ArbitrationMethod::WeightedVoting => self.accept_min(weighted),
                ArbitrationMethod::HighestConfidence => {
                    self.accept_min(self.highest_confidence(candidates))
                }
                ArbitrationMethod::Consensus => self.consensus(&summary),
                ArbitrationMethod::Executive => self.executive(candidates, roster),
            };
            debug!(method = %method, accepted = step.is_some(), "Ladder step evaluated");
            step
        });

        let (selection, low_confidence) = match accepted {
            Some(selection) if selection.method == ArbitrationMethod::Executive => {
                let message = format!(
                    "Executive override selected {}: no strategy reached its threshold",
                    selection.selected.responder_id()
                );
                warn!(
                    responder = selection.selected.responder_id(),
                    confidence = selection.confidence,
                    "Executive override used"
                );
                warnings.push(message);
                (selection, true)
            }
            Some(selection) => (selection, false),
            None => {
                let message = format!(
                    "No strategy reached its threshold; falling back to weighted voting at {:.1}% confidence",
                    weighted.confidence * 100.0
                );
                warn!(confidence = weighted.confidence, "Forced weighted-voting fallback");
                warnings.push(message);
                (weighted, true)
            }
        };

        let result = self.build_result(selection, candidates, low_confidence, warnings, started);

        let elapsed_ms = result.elapsed.as_millis() as u64;
        info!(
            method = %result.method,
            confidence = result.confidence,
            winner = result.winner(),
            elapsed_ms,
            "Decision made"
        );
        self.sink.emit(&ArbiterEvent::DecisionMade {
            method: result.method,
            confidence: result.confidence,
            elapsed_ms,
            timestamp: Utc::now(),
        });

        Ok(result)
    }

    fn accept_min<'a>(&self, selection: Selection<'a>) -> Option<Selection<'a>> {
        (selection.confidence >= self.config.min_confidence).then_some(selection)
    }

    /// Highest Σ(weight × confidence) group, represented by its most
    /// confident member
    fn weighted_voting<'a>(
        &self,
        groups: &[AgreementGroup<'a>],
        roster: &SpecialistRoster,
    ) -> Selection<'a> {
        let scores: Vec<f64> = groups
            .iter()
            .map(|group| {
                group
                    .members()
                    .iter()
                    .map(|c| roster.effective_weight(c) * c.confidence())
                    .sum()
            })
            .collect();

        let mut best = 0;
        for (i, score) in scores.iter().enumerate().skip(1) {
            if *score > scores[best] + SCORE_EPSILON {
                best = i;
            }
        }

        let total: f64 = scores.iter().sum();
        let confidence = if total > 0.0 {
            scores[best] / total
        } else {
            0.0
        };

        Selection {
            selected: groups[best].representative(),
            confidence,
            method: ArbitrationMethod::WeightedVoting,
        }
    }

    /// Most confident candidate; confidence is its relative margin over
    /// the runner-up
    fn highest_confidence<'a>(&self, candidates: &'a [Candidate]) -> Selection<'a> {
        let mut ranked: Vec<&Candidate> = candidates.iter().collect();
        ranked.sort_by(|a, b| b.confidence().total_cmp(&a.confidence()));

        let top = ranked[0];
        let confidence = match ranked.get(1) {
            None => top.confidence(),
            Some(_) if top.confidence() <= 0.0 => 0.0,
            Some(second) => (top.confidence() - second.confidence()) / top.confidence(),
        };

        Selection {
            selected: top,
            confidence,
            method: ArbitrationMethod::HighestConfidence,
        }
    }

    fn consensus<'a>(&self, summary: &AgreementSummary<'a>) -> Option<Selection<'a>> {
        let confidence = summary.proportion();
        (confidence >= self.config.consensus_threshold).then(|| Selection {
            selected: summary.largest().representative(),
            confidence,
            method: ArbitrationMethod::Consensus,
        })
    }

    /// The executive responder's most confident candidate, if it answered
    fn executive<'a>(
        &self,
        candidates: &'a [Candidate],
        roster: &SpecialistRoster,
    ) -> Option<Selection<'a>> {
        if !self.config.enable_executive_decision {
            return None;
        }
        let executive = roster.executive()?;

        let mut chosen: Option<&Candidate> = None;
        for candidate in candidates.iter().filter(|c| c.responder_id() == executive.id) {
            if chosen.map_or(true, |c| candidate.confidence() > c.confidence()) {
                chosen = Some(candidate);
            }
        }

        if chosen.is_none() {
            debug!(executive = %executive.id, "Executive responder has no candidate");
        }

        chosen.map(|selected| Selection {
            selected,
            confidence: selected.confidence(),
            method: ArbitrationMethod::Executive,
        })
    }

    fn build_result(
        &self,
        selection: Selection<'_>,
        candidates: &[Candidate],
        low_confidence: bool,
        warnings: Vec<String>,
        started: Instant,
    ) -> ArbitrationResult {
        let winning_key = canonical_key(selection.selected.value());
        let sharing = candidates
            .iter()
            .filter(|c| canonical_key(c.value()) == winning_key)
            .count();

        let mut alternatives: Vec<Candidate> = candidates
            .iter()
            .filter(|c| !std::ptr::eq(*c, selection.selected))
            .cloned()
            .collect();
        alternatives.sort_by(|a, b| b.confidence().total_cmp(&a.confidence()));

        let responder_count = candidates
            .iter()
            .map(|c| c.responder_id())
            .collect::<HashSet<_>>()
            .len();

        let reasoning = explain(
            selection.method,
            selection.selected,
            selection.confidence,
            &alternatives,
        );

        ArbitrationResult {
            selected: selection.selected.clone(),
            confidence: selection.confidence.clamp(0.0, 1.0),
            alternatives,
            reasoning,
            method: selection.method,
            consensus_level: sharing as f64 / candidates.len() as f64,
            responder_count,
            elapsed: started.elapsed(),
            low_confidence,
            warnings,
        }
    }
}

/// One-shot arbitration without event delivery
pub fn arbitrate(
    candidates: &[Candidate],
    roster: &SpecialistRoster,
    config: &ArbiterConfig,
) -> ArbiterResult<ArbitrationResult> {
    DecisionArbiter::new(config.clone()).arbitrate(candidates, roster)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::Specialist;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    fn candidate(responder: &str, value: Value, weight: f64, confidence: f64) -> Candidate {
        Candidate::builder(responder, value)
            .id(format!("{}-1", responder))
            .weight(weight)
            .confidence(confidence)
            .build()
            .unwrap()
    }

    fn arbiter(min_confidence: f64) -> DecisionArbiter {
        DecisionArbiter::new(ArbiterConfig::default().with_min_confidence(min_confidence))
    }

    #[test]
    fn test_empty_input() {
        let err = arbiter(0.6)
            .arbitrate(&[], &SpecialistRoster::empty())
            .unwrap_err();
        assert_eq!(err, ArbiterError::EmptyInput);
    }

    #[test]
    fn test_weighted_voting_scores() {
        // A: 0.8 * 0.7 = 0.56, B: 0.5 * 0.8 = 0.40, C: 0.3 * 0.6 = 0.18
        let candidates = vec![
            candidate("a", json!("A"), 0.8, 0.7),
            candidate("b", json!("B"), 0.5, 0.8),
            candidate("c", json!("C"), 0.3, 0.6),
        ];
        let result = arbiter(0.4)
            .arbitrate(&candidates, &SpecialistRoster::empty())
            .unwrap();

        assert_eq!(result.method, ArbitrationMethod::WeightedVoting);
        assert_eq!(result.winner(), "a");
        assert!((result.confidence - 0.56 / 1.14).abs() < 1e-9);
        assert!(!result.low_confidence);
    }

    #[test]
    fn test_roster_weight_overrides_candidate_weight() {
        let candidates = vec![
            candidate("a", json!("A"), 0.8, 0.7),
            candidate("b", json!("B"), 0.5, 0.8),
        ];
        let roster = SpecialistRoster::new(vec![Specialist::new("b", 1).with_weight(2.0)]);
        let result = arbiter(0.5).arbitrate(&candidates, &roster).unwrap();
        assert_eq!(result.winner(), "b");
    }

    #[test]
    fn test_weighted_group_represented_by_most_confident() {
        let candidates = vec![
            candidate("a", json!("X"), 1.0, 0.6),
            candidate("b", json!("X"), 1.0, 0.9),
            candidate("c", json!("Y"), 1.0, 0.5),
        ];
        let result = arbiter(0.6)
            .arbitrate(&candidates, &SpecialistRoster::empty())
            .unwrap();
        assert_eq!(result.winner(), "b");
        assert!((result.consensus_level - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(result.alternatives.len(), 2);
        assert_eq!(result.alternatives[0].responder_id(), "a");
    }

    #[test]
    fn test_highest_confidence_single_candidate() {
        let candidates = vec![candidate("solo", json!(1), 1.0, 0.4)];
        let result = arbiter(0.6)
            .arbitrate_with(
                ArbitrationMethod::HighestConfidence,
                &candidates,
                &SpecialistRoster::empty(),
            )
            .unwrap();
        // Single candidate: margin is its own confidence, below 0.6
        assert_eq!(result.method, ArbitrationMethod::WeightedVoting);
        assert!(result.low_confidence);

        let result = arbiter(0.3)
            .arbitrate_with(
                ArbitrationMethod::HighestConfidence,
                &candidates,
                &SpecialistRoster::empty(),
            )
            .unwrap();
        assert_eq!(result.method, ArbitrationMethod::HighestConfidence);
        assert!((result.confidence - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_highest_confidence_zero_top() {
        let candidates = vec![
            candidate("a", json!(1), 1.0, 0.0),
            candidate("b", json!(2), 1.0, 0.0),
        ];
        let result = arbiter(0.0)
            .arbitrate_with(
                ArbitrationMethod::HighestConfidence,
                &candidates,
                &SpecialistRoster::empty(),
            )
            .unwrap();
        assert_eq!(result.method, ArbitrationMethod::HighestConfidence);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.winner(), "a");
    }

    #[test]
    fn test_executive_disabled_falls_back() {
        let candidates = vec![
            candidate("a", json!(1), 1.0, 0.3),
            candidate("b", json!(2), 1.0, 0.35),
            candidate("c", json!(3), 1.0, 0.32),
        ];
        let roster = SpecialistRoster::new(vec![Specialist::new("c", 9)]);
        let config = ArbiterConfig::default().with_executive(false);
        let result = DecisionArbiter::new(config)
            .arbitrate(&candidates, &roster)
            .unwrap();

        assert_eq!(result.method, ArbitrationMethod::WeightedVoting);
        assert_eq!(result.winner(), "b");
        assert!(result.low_confidence);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_executive_without_candidate_falls_through() {
        let candidates = vec![
            candidate("a", json!(1), 1.0, 0.3),
            candidate("b", json!(2), 1.0, 0.35),
        ];
        let roster = SpecialistRoster::new(vec![Specialist::new("absent", 9), Specialist::new("a", 1)]);
        let result = arbiter(0.9).arbitrate(&candidates, &roster).unwrap();
        assert_eq!(result.method, ArbitrationMethod::WeightedVoting);
        assert!(result.low_confidence);
    }

    #[test]
    fn test_zero_weights_yield_zero_weighted_confidence() {
        let candidates = vec![
            candidate("a", json!(1), 0.0, 0.9),
            candidate("b", json!(2), 0.0, 0.8),
        ];
        let result = DecisionArbiter::new(ArbiterConfig::default().with_executive(false))
            .arbitrate_with(
                ArbitrationMethod::WeightedVoting,
                &candidates,
                &SpecialistRoster::empty(),
            )
            .unwrap();
        assert_eq!(result.confidence, 0.0);
        assert!(result.low_confidence);
        assert_eq!(result.winner(), "a");
    }

    #[test]
    fn test_emits_decision_made() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let captured = events.clone();
        let arbiter = arbiter(0.4).with_sink(Arc::new(move |event: &ArbiterEvent| {
            captured.lock().unwrap().push(event.clone());
        }));

        let candidates = vec![candidate("a", json!("A"), 1.0, 0.9)];
        arbiter
            .arbitrate(&candidates, &SpecialistRoster::empty())
            .unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            ArbiterEvent::DecisionMade {
                method, confidence, ..
            } => {
                assert_eq!(*method, ArbitrationMethod::WeightedVoting);
                assert!((confidence - 1.0).abs() < 1e-9);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_empty_input_emits_nothing() {
        let events = Arc::new(Mutex::new(0usize));
        let captured = events.clone();
        let arbiter = arbiter(0.4).with_sink(Arc::new(move |_: &ArbiterEvent| {
            *captured.lock().unwrap() += 1;
        }));
        assert!(arbiter.arbitrate(&[], &SpecialistRoster::empty()).is_err());
        assert_eq!(*events.lock().unwrap(), 0);
    }
}
