//! Decision Arbitration Engine
//!
//! This library turns the proposals of several independent specialists into
//! one decision:
//!
//! - [`DecisionArbiter`]: runs a confidence-gated ladder of strategies
//!   (weighted voting, highest confidence, grouped consensus, executive
//!   override) and always returns a result, flagged when confidence is low
//! - [`ConsensusDriver`]: evaluates agreement over bounded rounds, asking an
//!   external [`Refiner`] for revised candidates between rounds
//! - [`AgreementEvaluator`]: groups candidates by canonical value equality
//!
//! # Usage
//!
//! ```no_run
//! use arbiter::{ArbiterConfig, Candidate, DecisionArbiter, SpecialistRoster};
//! use serde_json::json;
//!
//! let candidates = vec![
//!     Candidate::builder("logical", json!("A")).confidence(0.8).build()?,
//!     Candidate::builder("creative", json!("A")).confidence(0.6).build()?,
//!     Candidate::builder("skeptic", json!("B")).confidence(0.7).build()?,
//! ];
//!
//! let arbiter = DecisionArbiter::new(ArbiterConfig::from_env()?);
//! let result = arbiter.arbitrate(&candidates, &SpecialistRoster::empty())?;
//! println!("{}", result.summary_line());
//! # Ok::<(), arbiter::ArbiterError>(())
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod agreement;
pub mod arbitration;
pub mod candidate;
pub mod config;
pub mod consensus;
pub mod context;
pub mod error;
pub mod events;

pub use agreement::{canonical_key, AgreementEvaluator, AgreementGroup, AgreementSummary};
pub use arbitration::{arbitrate, explain, ArbitrationMethod, ArbitrationResult, DecisionArbiter};
pub use candidate::{
    collect_candidates, Candidate, CandidateBatch, CandidateBuilder, ResponderId, Specialist,
    SpecialistOutput, SpecialistRoster,
};
pub use config::ArbiterConfig;
pub use consensus::{
    ConsensusDriver, ConsensusMethod, ConsensusOutcome, Feedback, RefinementError,
    RefinementRequest, Refiner, RoundRecord, TerminationReason,
};
pub use context::RequestContext;
pub use error::{ArbiterError, ArbiterResult};
pub use events::{ArbiterEvent, BroadcastSink, EventSink, NoopSink, SharedEventSink};
