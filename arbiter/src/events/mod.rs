//! Observable events emitted by the arbiter and the consensus driver
//!
//! There is no process-global bus. Producers take an injected
//! [`EventSink`]; hosts choose between dropping events ([`NoopSink`]),
//! a plain closure, or the tokio-backed [`BroadcastSink`] fan-out.
//!
//! ```text
//! ┌────────────────┐  emit  ┌─────────────┐       ┌──────────────┐
//! │ DecisionArbiter│───────▶│  EventSink  │──────▶│  host logger │
//! │ ConsensusDriver│        │ (injected)  │       │  subscribers │
//! └────────────────┘        └─────────────┘       └──────────────┘
//! ```

pub mod sink;
pub mod types;

pub use sink::{BroadcastSink, EventSink, NoopSink, SharedEventSink};
pub use types::ArbiterEvent;
