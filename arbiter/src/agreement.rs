//! Agreement evaluation: grouping candidates by structurally equal values.
//!
//! Two values are equal iff their canonical keys match. The canonical key
//! is an order-independent JSON encoding: object keys are sorted at every
//! depth and integral numbers are written without a fractional part, so
//! `{"a": 1, "b": 2.0}` and `{"b": 2, "a": 1}` land in the same group.
//!
//! # Tie-breaking
//!
//! The largest group wins. Among equally large groups the one with the
//! higher mean confidence wins; remaining ties go to the group whose first
//! member appears earliest in the input.

use std::collections::HashMap;
use std::fmt::Write as _;

use serde_json::{Number, Value};

use crate::candidate::{Candidate, ResponderId};

/// Confidence difference below which two groups count as tied
const CONFIDENCE_EPSILON: f64 = 1e-9;

/// Canonical, order-independent encoding of a value
pub fn canonical_key(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => {
            let _ = write!(out, "{}", b);
        }
        Value::Number(n) => out.push_str(&canonical_number(n)),
        Value::String(_) => {
            let _ = write!(out, "{}", value);
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{}", Value::from(key.as_str()));
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
    }
}

fn canonical_number(n: &Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    match n.as_f64() {
        // Integral floats inside the exactly-representable range
        Some(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => (f as i64).to_string(),
        Some(f) => f.to_string(),
        None => n.to_string(),
    }
}

/// Candidates sharing a structurally equal value
#[derive(Debug, Clone)]
pub struct AgreementGroup<'a> {
    key: String,
    members: Vec<&'a Candidate>,
}

impl<'a> AgreementGroup<'a> {
    /// The shared value, as proposed by the first member
    pub fn value(&self) -> &'a Value {
        self.members[0].value()
    }

    pub fn members(&self) -> &[&'a Candidate] {
        &self.members
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn mean_confidence(&self) -> f64 {
        self.members.iter().map(|c| c.confidence()).sum::<f64>() / self.members.len() as f64
    }

    /// Highest-confidence member; ties go to the first seen
    pub fn representative(&self) -> &'a Candidate {
        let mut best = self.members[0];
        for &candidate in &self.members[1..] {
            if candidate.confidence() > best.confidence() {
                best = candidate;
            }
        }
        best
    }

    pub fn responder_ids(&self) -> Vec<ResponderId> {
        self.members
            .iter()
            .map(|c| c.responder_id().to_string())
            .collect()
    }

    /// Whether a candidate belongs to this group
    pub fn contains_value(&self, value: &Value) -> bool {
        canonical_key(value) == self.key
    }
}

/// Group candidates by value, groups in first-seen order
pub fn group_by_value(candidates: &[Candidate]) -> Vec<AgreementGroup<'_>> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<AgreementGroup<'_>> = Vec::new();

    for candidate in candidates {
        let key = canonical_key(candidate.value());
        match index.get(&key) {
            Some(&i) => groups[i].members.push(candidate),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push(AgreementGroup {
                    key,
                    members: vec![candidate],
                });
            }
        }
    }

    groups
}

/// Result of evaluating agreement over a candidate set
#[derive(Debug, Clone)]
pub struct AgreementSummary<'a> {
    groups: Vec<AgreementGroup<'a>>,
    largest: usize,
    total: usize,
}

impl<'a> AgreementSummary<'a> {
    pub fn largest(&self) -> &AgreementGroup<'a> {
        &self.groups[self.largest]
    }

    pub fn largest_size(&self) -> usize {
        self.largest().size()
    }

    /// Mean confidence of the largest group's members
    pub fn mean_confidence(&self) -> f64 {
        self.largest().mean_confidence()
    }

    /// Share of all candidates that belong to the largest group
    pub fn proportion(&self) -> f64 {
        self.largest_size() as f64 / self.total as f64
    }

    pub fn groups(&self) -> &[AgreementGroup<'a>] {
        &self.groups
    }

    pub fn total_candidates(&self) -> usize {
        self.total
    }

    pub fn is_unanimous(&self) -> bool {
        self.groups.len() == 1
    }
}

/// Groups candidates and picks the dominant group
#[derive(Debug, Clone, Copy, Default)]
pub struct AgreementEvaluator;

impl AgreementEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate agreement; `None` for an empty candidate set
    pub fn evaluate<'a>(&self, candidates: &'a [Candidate]) -> Option<AgreementSummary<'a>> {
        if candidates.is_empty() {
            return None;
        }

        let groups = group_by_value(candidates);
        let mut largest = 0;
        for (i, group) in groups.iter().enumerate().skip(1) {
            let best = &groups[largest];
            let bigger = group.size() > best.size();
            let surer = group.size() == best.size()
                && group.mean_confidence() > best.mean_confidence() + CONFIDENCE_EPSILON;
            if bigger || surer {
                largest = i;
            }
        }

        Some(AgreementSummary {
            groups,
            largest,
            total: candidates.len(),
        })
    }
}
