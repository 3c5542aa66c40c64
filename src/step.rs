// ABOUTME: The Step record: everything one run returns to its caller

use crate::context::ToolCall;
use crate::error::LispError;
use crate::value::{display_plain, Value};
use serde::Serialize;
use std::collections::BTreeMap;

/// Failure half of a Step. `reason` is one of the closed taxonomy atoms,
/// plus `failed` for the user-level `(fail m)` sentinel.
#[derive(Debug, Clone, Serialize)]
pub struct Fail {
    pub reason: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl Fail {
    pub fn from_error(err: &LispError) -> Fail {
        Fail {
            reason: err.reason().to_string(),
            message: err.to_string(),
            details: None,
        }
    }

    /// The `(fail m)` sentinel: string payloads are the message, anything
    /// richer rides along in `details`.
    pub fn from_sentinel(payload: Value) -> Fail {
        let message = display_plain(&payload);
        let details = match payload {
            Value::Str(_) => None,
            other => Some(other),
        };
        Fail {
            reason: "failed".to_string(),
            message,
            details,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Usage {
    pub duration_ms: u64,
    pub memory_bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turns: Option<u32>,
}

/// The aggregate result of `run(source, options)`. Always produced; a
/// failing program yields `return = nil` and a populated `fail`, never a
/// crash.
#[derive(Debug, Clone, Serialize)]
pub struct Step {
    #[serde(rename = "return")]
    pub return_value: Value,
    pub fail: Option<Fail>,
    /// Full updated user namespace (previous memory + this run's defs).
    pub memory: BTreeMap<String, Value>,
    /// Only the new or overwritten keys.
    pub memory_delta: BTreeMap<String, Value>,
    pub prints: Vec<String>,
    pub tool_calls: Vec<ToolCall>,
    pub summaries: BTreeMap<String, String>,
    /// Present exactly when the caller supplied a journal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub journal: Option<BTreeMap<String, Value>>,
    pub usage: Usage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// Per-turn records, populated by the multi-turn caller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turns: Option<Vec<Value>>,
}

impl Step {
    pub fn empty() -> Step {
        Step {
            return_value: Value::Nil,
            fail: None,
            memory: BTreeMap::new(),
            memory_delta: BTreeMap::new(),
            prints: Vec::new(),
            tool_calls: Vec::new(),
            summaries: BTreeMap::new(),
            journal: None,
            usage: Usage::default(),
            signature: None,
            turns: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.fail.is_none()
    }

    /// Compact single-line rendering for feedback loops and logs.
    pub fn feedback(&self) -> String {
        match &self.fail {
            None => format!("ok: {}", self.return_value),
            Some(fail) => format!("{}: {}", fail.reason, fail.message),
        }
    }

    /// Derive the delta once `memory` is final.
    pub fn compute_delta(&mut self, prior: &BTreeMap<String, Value>) {
        self.memory_delta = self
            .memory
            .iter()
            .filter(|(k, v)| prior.get(*k) != Some(*v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fail_from_sentinel_string() {
        let fail = Fail::from_sentinel(Value::Str("ran out of budget".into()));
        assert_eq!(fail.reason, "failed");
        assert_eq!(fail.message, "ran out of budget");
        assert!(fail.details.is_none());
    }

    #[test]
    fn test_fail_from_sentinel_structured() {
        let payload = Value::Vector(vec![Value::Keyword("code".into()), Value::Int(7)]);
        let fail = Fail::from_sentinel(payload.clone());
        assert_eq!(fail.reason, "failed");
        assert_eq!(fail.details, Some(payload));
    }

    #[test]
    fn test_compute_delta_tracks_new_and_overwritten() {
        let mut prior = BTreeMap::new();
        prior.insert("kept".to_string(), Value::Int(1));
        prior.insert("changed".to_string(), Value::Int(2));

        let mut step = Step::empty();
        step.memory = prior.clone();
        step.memory.insert("changed".to_string(), Value::Int(20));
        step.memory.insert("added".to_string(), Value::Int(3));
        step.compute_delta(&prior);

        assert_eq!(step.memory_delta.len(), 2);
        assert_eq!(step.memory_delta.get("changed"), Some(&Value::Int(20)));
        assert_eq!(step.memory_delta.get("added"), Some(&Value::Int(3)));
        assert!(!step.memory_delta.contains_key("kept"));
    }

    #[test]
    fn test_serializes_to_json() {
        let mut step = Step::empty();
        step.return_value = Value::Int(6);
        step.memory.insert("x".to_string(), Value::Int(1));
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["return"], serde_json::json!(6));
        assert_eq!(json["fail"], serde_json::Value::Null);
        assert_eq!(json["memory"]["x"], serde_json::json!(1));
        assert!(json.get("journal").is_none());
    }
}
