//! Per-request context passed through by callers.
//!
//! The engine only appends consensus round history and observes the
//! cancellation token; everything else is carried for the caller.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::consensus::RoundRecord;

/// Opaque request state plus consensus round history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Rounds appended by every consensus run made with this context.
    #[serde(default)]
    pub consensus_rounds: Vec<RoundRecord>,
    #[serde(skip)]
    cancel: CancellationToken,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::with_request_id(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_request_id(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            session_id: None,
            metadata: Map::new(),
            consensus_rounds: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Share a caller-owned cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn insert_metadata(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    pub fn record_rounds(&mut self, rounds: &[RoundRecord]) {
        self.consensus_rounds.extend_from_slice(rounds);
    }

    pub fn last_round(&self) -> Option<&RoundRecord> {
        self.consensus_rounds.last()
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}
