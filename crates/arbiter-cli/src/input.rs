//! JSON input document

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use arbiter::{Specialist, SpecialistOutput, SpecialistRoster};
use serde::Deserialize;

/// Specialists in priority order plus their raw outputs
#[derive(Debug, Deserialize)]
pub struct ArbitrationInput {
    #[serde(default)]
    pub specialists: Vec<Specialist>,
    pub outputs: Vec<SpecialistOutput>,
    #[serde(default)]
    pub session_id: Option<String>,
    /// Sort specialists by `priority` instead of keeping list order
    #[serde(default)]
    pub sort_by_priority: bool,
}

impl ArbitrationInput {
    /// Read from a file, or from stdin when `path` is `-`
    pub fn read(path: &Path) -> Result<Self> {
        let raw = if path == Path::new("-") {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read stdin")?;
            buf
        } else {
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?
        };
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("Invalid arbitration input")
    }

    pub fn roster(&self) -> SpecialistRoster {
        if self.sort_by_priority {
            SpecialistRoster::by_priority(self.specialists.clone())
        } else {
            SpecialistRoster::new(self.specialists.clone())
        }
    }

    /// Roster for a consensus run; without `specialists` every responder
    /// that produced an output takes part, in first-seen order
    pub fn consensus_roster(&self) -> SpecialistRoster {
        if !self.specialists.is_empty() {
            return self.roster();
        }
        let mut derived: Vec<Specialist> = Vec::new();
        for output in &self.outputs {
            if !derived.iter().any(|s| s.id == output.responder_id) {
                derived.push(Specialist::new(output.responder_id.clone(), 0));
            }
        }
        SpecialistRoster::new(derived)
    }
}
