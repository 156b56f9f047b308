//! Explanation text for arbitration results

use super::ArbitrationMethod;
use crate::candidate::Candidate;

/// Alternatives above this fraction of the winner's confidence are quoted
const NOTABLE_RATIO: f64 = 0.7;

/// Maximum number of alternatives quoted
const MAX_NOTABLE: usize = 2;

/// Build the explanation for a selection
///
/// `alternatives` must already be ordered by descending confidence.
pub fn explain(
    method: ArbitrationMethod,
    selected: &Candidate,
    confidence: f64,
    alternatives: &[Candidate],
) -> String {
    let mut text = format!(
        "Selected {} via {} with {:.1}% engine confidence (responder confidence {:.1}%).",
        selected.responder_id(),
        method,
        confidence * 100.0,
        selected.confidence() * 100.0
    );

    if let Some(reasoning) = selected.reasoning().filter(|r| !r.trim().is_empty()) {
        text.push_str(&format!(" Rationale: \"{}\".", reasoning.trim()));
    }

    let threshold = selected.confidence() * NOTABLE_RATIO;
    let notable: Vec<String> = alternatives
        .iter()
        .filter(|alt| alt.confidence() > threshold)
        .take(MAX_NOTABLE)
        .map(|alt| format!("{} ({:.1}%)", alt.responder_id(), alt.confidence() * 100.0))
        .collect();

    if !notable.is_empty() {
        text.push_str(&format!(" Notable alternatives: {}.", notable.join(", ")));
    }

    text
}
