//! Consensus driver: bounded rounds of evaluate, then refine.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::outcome::{ConsensusOutcome, TerminationReason};
use super::refinement::{build_feedback, RefinementError, RefinementRequest, Refiner};
use super::state::{ConsensusPhase, ConsensusSession, RoundRecord, TransitionError};
use super::ConsensusMethod;
use crate::agreement::AgreementEvaluator;
use crate::candidate::{Candidate, ResponderId, SpecialistRoster};
use crate::config::ArbiterConfig;
use crate::context::RequestContext;
use crate::error::{ArbiterError, ArbiterResult};
use crate::events::{ArbiterEvent, NoopSink, SharedEventSink};

fn transition_error(err: TransitionError) -> ArbiterError {
    ArbiterError::Transition(err.to_string())
}

/// Drives candidates toward agreement over at most `max_rounds` rounds
///
/// Rounds after the first come from the attached [`Refiner`]. Without one,
/// every method runs a single round.
pub struct ConsensusDriver {
    config: ArbiterConfig,
    evaluator: AgreementEvaluator,
    sink: SharedEventSink,
    refiner: Option<Arc<dyn Refiner>>,
}

impl ConsensusDriver {
    pub fn new(config: ArbiterConfig) -> Self {
        Self {
            config,
            evaluator: AgreementEvaluator::new(),
            sink: Arc::new(NoopSink),
            refiner: None,
        }
    }

    /// Deliver `consensus:complete` events to `sink`
    pub fn with_sink(mut self, sink: SharedEventSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_refiner(mut self, refiner: Arc<dyn Refiner>) -> Self {
        self.refiner = Some(refiner);
        self
    }

    pub fn config(&self) -> &ArbiterConfig {
        &self.config
    }

    /// Run consensus with a throwaway request context
    pub async fn run_consensus(
        &self,
        responders: &SpecialistRoster,
        candidates: &[Candidate],
        method: ConsensusMethod,
        max_rounds: u32,
    ) -> ArbiterResult<ConsensusOutcome> {
        let mut context = RequestContext::new();
        self.run_consensus_in(&mut context, responders, candidates, method, max_rounds)
            .await
    }

    /// Run consensus, appending round history to `context` and honoring
    /// its cancellation token
    pub async fn run_consensus_in(
        &self,
        context: &mut RequestContext,
        responders: &SpecialistRoster,
        candidates: &[Candidate],
        method: ConsensusMethod,
        max_rounds: u32,
    ) -> ArbiterResult<ConsensusOutcome> {
        if responders.is_empty() {
            error!(request = %context.request_id, "Consensus called without responders");
            return Err(ArbiterError::NoResponder);
        }
        if candidates.is_empty() {
            error!(request = %context.request_id, "Consensus called without initial candidates");
            return Err(ArbiterError::NoCandidate);
        }
        if max_rounds == 0 {
            return Err(ArbiterError::InvalidConfig(
                "max_rounds must be at least 1".to_string(),
            ));
        }

        let started = Instant::now();
        let deadline = (self.config.timeout_ms > 0)
            .then(|| started + Duration::from_millis(self.config.timeout_ms));
        let cancel = context.cancellation_token().clone();

        let mut session = ConsensusSession::new(method, max_rounds);
        let mut current: Vec<Candidate> = candidates.to_vec();

        debug!(
            request = %context.request_id,
            session = %session.id,
            method = %method,
            max_rounds,
            responders = responders.len(),
            candidates = candidates.len(),
            "Starting consensus"
        );

        let termination = loop {
            let round_started = Instant::now();
            let started_at = Utc::now();
            session
                .transition(ConsensusPhase::Evaluating, "candidates collected")
                .map_err(transition_error)?;

            let Some(summary) = self.evaluator.evaluate(&current) else {
                session
                    .transition(ConsensusPhase::Exhausted, "no candidates to evaluate")
                    .map_err(transition_error)?;
                break TerminationReason::NoProposals;
            };

            let agreement = summary.proportion();
            let leading_value = summary.largest().value().clone();
            session.record_round(RoundRecord {
                round: session.current_round,
                candidate_count: current.len(),
                largest_group_size: summary.largest_size(),
                agreement_level: agreement,
                leading_value: leading_value.clone(),
                final_round: false,
                duration_ms: round_started.elapsed().as_millis() as u64,
                started_at,
            });

            debug!(
                round = session.current_round,
                agreement,
                groups = summary.groups().len(),
                "Consensus round evaluated"
            );

            if agreement >= self.config.min_confidence {
                session
                    .transition(ConsensusPhase::Converged, "agreement threshold reached")
                    .map_err(transition_error)?;
                break TerminationReason::Converged;
            }

            let refiner = match &self.refiner {
                Some(refiner) if method.is_multi_round() => refiner,
                _ => {
                    if method.is_multi_round() {
                        debug!(method = %method, "No refiner attached, stopping after one round");
                    }
                    session
                        .transition(ConsensusPhase::Exhausted, "single round")
                        .map_err(transition_error)?;
                    break TerminationReason::SingleRound;
                }
            };

            if let Some(reason) = Self::budget_exhausted(&session, deadline, &cancel) {
                session
                    .transition(ConsensusPhase::Exhausted, &reason.to_string())
                    .map_err(transition_error)?;
                break reason;
            }

            session
                .transition(ConsensusPhase::RefinementNeeded, "below agreement threshold")
                .map_err(transition_error)?;

            let Some(feedback) = build_feedback(method, &current, responders) else {
                session
                    .transition(ConsensusPhase::Exhausted, "method has no feedback")
                    .map_err(transition_error)?;
                break TerminationReason::SingleRound;
            };

            let request = RefinementRequest {
                round: session.current_round + 1,
                method,
                previous: current.clone(),
                feedback,
                leading_value,
                agreement_level: agreement,
            };
            debug!(
                round = request.round,
                feedback = request.feedback.len(),
                "Requesting refinement"
            );

            // Child token so a timed-out round can be cancelled without
            // touching the caller's token
            let round_cancel = cancel.child_token();
            let refine = refiner.refine(&request, &round_cancel);
            let refined = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, refine).await {
                    Ok(result) => result,
                    Err(_) => {
                        round_cancel.cancel();
                        warn!(
                            timeout_ms = self.config.timeout_ms,
                            round = request.round,
                            "Consensus timed out during refinement"
                        );
                        session
                            .transition(ConsensusPhase::Exhausted, "timed out")
                            .map_err(transition_error)?;
                        break TerminationReason::TimedOut;
                    }
                },
                None => refine.await,
            };

            match refined {
                Ok(next) if next.is_empty() => {
                    warn!(round = request.round, "Refiner returned no candidates");
                    session
                        .transition(ConsensusPhase::Exhausted, "no proposals")
                        .map_err(transition_error)?;
                    break TerminationReason::NoProposals;
                }
                Ok(next) => {
                    current = next;
                    session
                        .transition(ConsensusPhase::Collecting, "refined candidates received")
                        .map_err(transition_error)?;
                }
                Err(RefinementError::Cancelled) => {
                    warn!(round = request.round, "Refinement cancelled");
                    session
                        .transition(ConsensusPhase::Exhausted, "cancelled")
                        .map_err(transition_error)?;
                    break TerminationReason::Cancelled;
                }
                Err(RefinementError::Failed(reason)) => {
                    warn!(round = request.round, error = %reason, "Refinement failed, stopping consensus");
                    session
                        .transition(ConsensusPhase::Exhausted, "refinement failed")
                        .map_err(transition_error)?;
                    break TerminationReason::RefinementFailed(reason);
                }
            }
        };

        session.mark_final_round();
        debug!(
            session = %session.id,
            complete = session.is_complete(),
            status = %session.status_line(),
            "Consensus session closed"
        );
        context.record_rounds(&session.rounds);

        let outcome = self.build_outcome(&session, responders, candidates, &current, termination);

        info!(
            request = %context.request_id,
            method = %method,
            agreement_reached = outcome.agreement_reached,
            confidence = outcome.confidence,
            rounds = outcome.rounds_run,
            termination = %outcome.termination,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Consensus complete"
        );

        self.sink.emit(&ArbiterEvent::ConsensusComplete {
            agreement_reached: outcome.agreement_reached,
            confidence: outcome.confidence,
            rounds_run: outcome.rounds_run,
            method,
            timestamp: Utc::now(),
        });

        Ok(outcome)
    }

    /// Round, time and cancellation budget checks made before refining
    fn budget_exhausted(
        session: &ConsensusSession,
        deadline: Option<Instant>,
        cancel: &CancellationToken,
    ) -> Option<TerminationReason> {
        if !session.has_rounds_remaining() {
            debug!(max_rounds = session.max_rounds, "Round budget exhausted");
            return Some(TerminationReason::RoundsExhausted);
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            warn!(round = session.current_round, "Consensus timed out");
            return Some(TerminationReason::TimedOut);
        }
        if cancel.is_cancelled() {
            warn!(round = session.current_round, "Consensus cancelled by caller");
            return Some(TerminationReason::Cancelled);
        }
        None
    }

    fn build_outcome(
        &self,
        session: &ConsensusSession,
        responders: &SpecialistRoster,
        initial: &[Candidate],
        last_round: &[Candidate],
        termination: TerminationReason,
    ) -> ConsensusOutcome {
        let mut participants = responders.ids();
        for candidate in initial.iter().chain(last_round) {
            if !participants.iter().any(|id| id == candidate.responder_id()) {
                participants.push(candidate.responder_id().to_string());
            }
        }

        let converged = termination == TerminationReason::Converged;
        let summary = if converged {
            self.evaluator.evaluate(last_round)
        } else {
            None
        };

        let (agreed_value, confidence, dissenting_responders) = match summary {
            Some(summary) => {
                let winning = summary.largest();
                let dissenting: Vec<ResponderId> = participants
                    .iter()
                    .filter(|id| {
                        let mut own = last_round
                            .iter()
                            .filter(|c| c.responder_id() == id.as_str())
                            .peekable();
                        // Responders without a final-round candidate abstained
                        own.peek().is_some() && !own.any(|c| winning.contains_value(c.value()))
                    })
                    .cloned()
                    .collect();
                (
                    Some(winning.value().clone()),
                    summary.proportion(),
                    dissenting,
                )
            }
            None => (None, 0.0, participants.clone()),
        };

        ConsensusOutcome {
            agreement_reached: agreed_value.is_some(),
            agreed_value,
            confidence,
            rounds_run: session.rounds.len() as u32,
            participants,
            dissenting_responders,
            method: session.method,
            termination,
            rounds: session.rounds.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::Specialist;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn candidate(responder: &str, value: Value) -> Candidate {
        Candidate::builder(responder, value)
            .confidence(0.7)
            .build()
            .unwrap()
    }

    fn roster() -> SpecialistRoster {
        SpecialistRoster::new(vec![
            Specialist::new("a", 3),
            Specialist::new("b", 2),
            Specialist::new("c", 1),
        ])
    }

    fn split() -> Vec<Candidate> {
        vec![
            candidate("a", json!("X")),
            candidate("b", json!("Y")),
            candidate("c", json!("Z")),
        ]
    }

    fn driver() -> ConsensusDriver {
        ConsensusDriver::new(ArbiterConfig::default())
    }

    /// Replays scripted rounds, repeating the last one when exhausted
    struct ScriptedRefiner {
        rounds: Mutex<VecDeque<Result<Vec<Candidate>, RefinementError>>>,
        requests: Mutex<Vec<RefinementRequest>>,
    }

    impl ScriptedRefiner {
        fn new(rounds: Vec<Result<Vec<Candidate>, RefinementError>>) -> Arc<Self> {
            Arc::new(Self {
                rounds: Mutex::new(rounds.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Refiner for ScriptedRefiner {
        async fn refine(
            &self,
            request: &RefinementRequest,
            _cancel: &CancellationToken,
        ) -> Result<Vec<Candidate>, RefinementError> {
            self.requests.lock().unwrap().push(request.clone());
            let mut rounds = self.rounds.lock().unwrap();
            if rounds.len() > 1 {
                rounds.pop_front().unwrap()
            } else {
                rounds.front().cloned().unwrap()
            }
        }
    }

    /// Never answers until cancelled
    struct StalledRefiner {
        seen: Mutex<Option<CancellationToken>>,
    }

    #[async_trait]
    impl Refiner for StalledRefiner {
        async fn refine(
            &self,
            _request: &RefinementRequest,
            cancel: &CancellationToken,
        ) -> Result<Vec<Candidate>, RefinementError> {
            *self.seen.lock().unwrap() = Some(cancel.clone());
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(RefinementError::Failed("unreachable".into()))
        }
    }

    // ── Input contract ──

    #[tokio::test]
    async fn test_no_responders() {
        let err = driver()
            .run_consensus(&SpecialistRoster::empty(), &split(), ConsensusMethod::MajorityVote, 1)
            .await
            .unwrap_err();
        assert_eq!(err, ArbiterError::NoResponder);
    }

    #[tokio::test]
    async fn test_no_candidates() {
        let err = driver()
            .run_consensus(&roster(), &[], ConsensusMethod::Delphi, 3)
            .await
            .unwrap_err();
        assert_eq!(err, ArbiterError::NoCandidate);
    }

    #[tokio::test]
    async fn test_zero_rounds_rejected() {
        let err = driver()
            .run_consensus(&roster(), &split(), ConsensusMethod::Delphi, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, ArbiterError::InvalidConfig(_)));
    }

    // ── Single round ──

    #[tokio::test]
    async fn test_majority_vote_converges() {
        let candidates = vec![
            candidate("a", json!("X")),
            candidate("b", json!("X")),
            candidate("c", json!("Y")),
        ];
        let outcome = driver()
            .run_consensus(&roster(), &candidates, ConsensusMethod::MajorityVote, 3)
            .await
            .unwrap();

        assert!(outcome.agreement_reached);
        assert_eq!(outcome.agreed_value, Some(json!("X")));
        assert!((outcome.confidence - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(outcome.rounds_run, 1);
        assert_eq!(outcome.dissenting_responders, vec!["c"]);
        assert_eq!(outcome.termination, TerminationReason::Converged);
        assert!(outcome.rounds[0].final_round);
    }

    #[tokio::test]
    async fn test_majority_vote_never_refines() {
        let refiner = ScriptedRefiner::new(vec![Ok(split())]);
        let outcome = driver()
            .with_refiner(refiner.clone())
            .run_consensus(&roster(), &split(), ConsensusMethod::MajorityVote, 5)
            .await
            .unwrap();

        assert!(!outcome.agreement_reached);
        assert_eq!(outcome.agreed_value, None);
        assert_eq!(outcome.confidence, 0.0);
        assert_eq!(outcome.rounds_run, 1);
        assert_eq!(outcome.dissenting_responders, vec!["a", "b", "c"]);
        assert_eq!(outcome.termination, TerminationReason::SingleRound);
        assert_eq!(refiner.calls(), 0);
    }

    #[tokio::test]
    async fn test_multi_round_without_refiner() {
        let outcome = driver()
            .run_consensus(&roster(), &split(), ConsensusMethod::Delphi, 3)
            .await
            .unwrap();
        assert_eq!(outcome.rounds_run, 1);
        assert_eq!(outcome.termination, TerminationReason::SingleRound);
    }

    // ── Refinement rounds ──

    #[tokio::test]
    async fn test_converges_in_second_round() {
        let refiner = ScriptedRefiner::new(vec![Ok(vec![
            candidate("a", json!("X")),
            candidate("b", json!("X")),
            candidate("c", json!("Z")),
        ])]);
        let mut ctx = RequestContext::with_request_id("req-7");

        let outcome = driver()
            .with_refiner(refiner.clone())
            .run_consensus_in(
                &mut ctx,
                &roster(),
                &split(),
                ConsensusMethod::IterativeRefinement,
                3,
            )
            .await
            .unwrap();

        assert!(outcome.agreement_reached);
        assert_eq!(outcome.rounds_run, 2);
        assert_eq!(outcome.dissenting_responders, vec!["c"]);

        let requests = refiner.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].round, 2);
        assert!(matches!(requests[0].feedback, super::super::Feedback::Attributed(_)));

        assert_eq!(ctx.consensus_rounds.len(), 2);
        assert!(!ctx.consensus_rounds[0].final_round);
        assert!(ctx.consensus_rounds[1].final_round);
        assert_eq!(ctx.consensus_rounds[1].round, 2);
    }

    #[tokio::test]
    async fn test_rounds_exhausted() {
        let refiner = ScriptedRefiner::new(vec![Ok(split())]);
        let outcome = driver()
            .with_refiner(refiner.clone())
            .run_consensus(&roster(), &split(), ConsensusMethod::Delphi, 3)
            .await
            .unwrap();

        assert!(!outcome.agreement_reached);
        assert_eq!(outcome.rounds_run, 3);
        assert_eq!(outcome.termination, TerminationReason::RoundsExhausted);
        assert_eq!(refiner.calls(), 2);
        assert_eq!(outcome.dissenting_responders.len(), 3);
    }

    #[tokio::test]
    async fn test_refinement_failure_degrades() {
        let refiner = ScriptedRefiner::new(vec![Err(RefinementError::Failed("model offline".into()))]);
        let outcome = driver()
            .with_refiner(refiner)
            .run_consensus(&roster(), &split(), ConsensusMethod::WeightedInfluence, 3)
            .await
            .unwrap();

        assert!(!outcome.agreement_reached);
        assert_eq!(outcome.rounds_run, 1);
        assert_eq!(
            outcome.termination,
            TerminationReason::RefinementFailed("model offline".into())
        );
        assert!(outcome.rounds[0].final_round);
    }

    #[tokio::test]
    async fn test_empty_refinement() {
        let refiner = ScriptedRefiner::new(vec![Ok(vec![])]);
        let outcome = driver()
            .with_refiner(refiner)
            .run_consensus(&roster(), &split(), ConsensusMethod::Delphi, 3)
            .await
            .unwrap();
        assert_eq!(outcome.termination, TerminationReason::NoProposals);
        assert_eq!(outcome.rounds_run, 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_refinement() {
        let refiner = ScriptedRefiner::new(vec![Ok(split())]);
        let mut ctx = RequestContext::new();
        ctx.cancel();

        let outcome = driver()
            .with_refiner(refiner.clone())
            .run_consensus_in(&mut ctx, &roster(), &split(), ConsensusMethod::Delphi, 3)
            .await
            .unwrap();

        assert_eq!(outcome.termination, TerminationReason::Cancelled);
        assert_eq!(refiner.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_cancels_stalled_refiner() {
        let refiner = Arc::new(StalledRefiner {
            seen: Mutex::new(None),
        });
        let outcome = ConsensusDriver::new(ArbiterConfig::default().with_timeout_ms(1_000))
            .with_refiner(refiner.clone())
            .run_consensus(&roster(), &split(), ConsensusMethod::Delphi, 3)
            .await
            .unwrap();

        assert_eq!(outcome.termination, TerminationReason::TimedOut);
        assert_eq!(outcome.rounds_run, 1);
        let token = refiner.seen.lock().unwrap().clone().unwrap();
        assert!(token.is_cancelled());
    }

    // ── Participants and events ──

    #[tokio::test]
    async fn test_unlisted_responder_participates() {
        let candidates = vec![
            candidate("a", json!(1)),
            candidate("b", json!(1.0)),
            candidate("guest", json!(2)),
        ];
        let outcome = driver()
            .run_consensus(&roster(), &candidates, ConsensusMethod::MajorityVote, 1)
            .await
            .unwrap();

        assert_eq!(outcome.participants, vec!["a", "b", "c", "guest"]);
        // "c" has no candidate and is not counted as dissenting
        assert_eq!(outcome.dissenting_responders, vec!["guest"]);
        assert_eq!(outcome.agreed_value, Some(json!(1)));
    }

    #[tokio::test]
    async fn test_emits_consensus_complete() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let captured = events.clone();
        let driver = driver().with_sink(Arc::new(move |event: &ArbiterEvent| {
            captured.lock().unwrap().push(event.clone());
        }));

        driver
            .run_consensus(&roster(), &split(), ConsensusMethod::MajorityVote, 1)
            .await
            .unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type(), "consensus:complete");
        match &events[0] {
            ArbiterEvent::ConsensusComplete {
                agreement_reached,
                rounds_run,
                method,
                ..
            } => {
                assert!(!agreement_reached);
                assert_eq!(*rounds_run, 1);
                assert_eq!(*method, ConsensusMethod::MajorityVote);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
