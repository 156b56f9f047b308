//! Engine configuration
//!
//! Defaults match the documented thresholds; `from_env` applies
//! `ARBITER_*` overrides on top of them and `load` reads a TOML file.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::arbitration::ArbitrationMethod;
use crate::consensus::ConsensusMethod;
use crate::error::{ArbiterError, ArbiterResult};

/// Configuration shared by the decision arbiter and the consensus driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbiterConfig {
    /// Engine confidence a ladder step must reach to be accepted
    pub min_confidence: f64,
    /// Agreement share required by the grouped-consensus step
    pub consensus_threshold: f64,
    /// Whether the executive override may be used
    pub enable_executive_decision: bool,
    /// Upper bound on consensus rounds
    pub max_rounds: u32,
    /// Budget for the consensus driver's loop in milliseconds (0 = unlimited)
    pub timeout_ms: u64,
    /// Ordered arbitration strategies tried before the forced fallback
    pub ladder: Vec<ArbitrationMethod>,
    /// Consensus method used when the caller does not name one
    pub consensus_method: ConsensusMethod,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.6,
            consensus_threshold: 0.7,
            enable_executive_decision: true,
            max_rounds: 3,
            timeout_ms: 30_000,
            ladder: ArbitrationMethod::all().to_vec(),
            consensus_method: ConsensusMethod::MajorityVote,
        }
    }
}

impl ArbiterConfig {
    /// Defaults overridden by `ARBITER_*` environment variables
    ///
    /// Unparseable numbers and booleans keep their default; unknown method
    /// names are rejected.
    pub fn from_env() -> ArbiterResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ArbiterConfig::from_env`] with an explicit variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ArbiterResult<Self> {
        let mut config = Self::default();

        if let Some(v) = parsed(&lookup, "ARBITER_MIN_CONFIDENCE") {
            config.min_confidence = v;
        }
        if let Some(v) = parsed(&lookup, "ARBITER_CONSENSUS_THRESHOLD") {
            config.consensus_threshold = v;
        }
        if let Some(v) = flag(&lookup, "ARBITER_ENABLE_EXECUTIVE") {
            config.enable_executive_decision = v;
        }
        if let Some(v) = parsed(&lookup, "ARBITER_MAX_ROUNDS") {
            config.max_rounds = v;
        }
        if let Some(v) = parsed(&lookup, "ARBITER_TIMEOUT_MS") {
            config.timeout_ms = v;
        }
        if let Some(val) = lookup("ARBITER_LADDER") {
            config.ladder = val
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::parse::<ArbitrationMethod>)
                .collect::<ArbiterResult<Vec<_>>>()?;
        }
        if let Some(val) = lookup("ARBITER_CONSENSUS_METHOD") {
            config.consensus_method = val.trim().parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document; missing keys take their defaults
    pub fn from_toml_str(input: &str) -> ArbiterResult<Self> {
        let config: Self =
            toml::from_str(input).map_err(|e| map_toml_error(e.message().to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML config file
    pub fn load(path: impl AsRef<Path>) -> ArbiterResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ArbiterError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Range checks on every field
    pub fn validate(&self) -> ArbiterResult<()> {
        check_unit("min_confidence", self.min_confidence)?;
        check_unit("consensus_threshold", self.consensus_threshold)?;
        if self.max_rounds < 1 {
            return Err(ArbiterError::InvalidConfig(
                "max_rounds must be at least 1".to_string(),
            ));
        }
        if self.ladder.is_empty() {
            return Err(ArbiterError::InvalidConfig(
                "ladder must name at least one method".to_string(),
            ));
        }
        Ok(())
    }

    /// Builder-style threshold override
    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn with_consensus_threshold(mut self, threshold: f64) -> Self {
        self.consensus_threshold = threshold;
        self
    }

    pub fn with_executive(mut self, enabled: bool) -> Self {
        self.enable_executive_decision = enabled;
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_ladder(mut self, ladder: Vec<ArbitrationMethod>) -> Self {
        self.ladder = ladder;
        self
    }

    pub fn with_consensus_method(mut self, method: ConsensusMethod) -> Self {
        self.consensus_method = method;
        self
    }
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparseable config override");
            None
        }
    }
}

fn flag(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<bool> {
    let raw = lookup(key)?;
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => {
            warn!(key, value = %raw, "Ignoring unparseable config override");
            None
        }
    }
}

fn check_unit(name: &str, value: f64) -> ArbiterResult<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ArbiterError::InvalidConfig(format!(
            "{} must be within [0, 1], got {}",
            name, value
        )))
    }
}

/// Method names fail inside serde; surface them as `UnknownMethod`
fn map_toml_error(message: String) -> ArbiterError {
    match message.strip_prefix(crate::arbitration::UNKNOWN_METHOD_PREFIX) {
        Some(name) => ArbiterError::UnknownMethod(name.to_string()),
        None => ArbiterError::InvalidConfig(message),
    }
}
