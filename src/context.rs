//! Per-run execution context and cross-step reference resolution.
//!
//! The context is a write-once map from stepId to that step's committed
//! output. It is created fresh for each run (or rebuilt from a persisted
//! snapshot on resume) and mutated only by the executor, immediately after a
//! step succeeds. Resolution never mutates anything: an unresolvable
//! reference yields an explicit [`Resolved::Unresolved`] marker and the
//! executor decides what that means for the step.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

use crate::types::{ParameterValue, StepId, StepResult};

/// `step.<N>.<path>` with a non-empty path.
static STEP_REF_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^step\.(\d+)\.(.+)$").unwrap());

/// Path token addressing a step's whole output.
pub const WHOLE_OUTPUT: &str = "result";

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("step {0} already has a committed output")]
    DuplicateStep(StepId),
}

/// A parsed `step.<N>.<path>` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReference {
    pub step_id: StepId,
    pub path: String,
}

/// Parse a raw reference string. Anything that does not match
/// `step.<int>.<path>` is not a reference.
pub fn parse_reference(raw: &str) -> Option<StepReference> {
    let caps = STEP_REF_RE.captures(raw)?;
    let step_id: StepId = caps.get(1)?.as_str().parse().ok()?;
    Some(StepReference {
        step_id,
        path: caps.get(2)?.as_str().to_string(),
    })
}

/// Outcome of resolving one parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    Value(Value),
    Unresolved { reference: String, reason: String },
}

impl Resolved {
    pub fn is_unresolved(&self) -> bool {
        matches!(self, Resolved::Unresolved { .. })
    }
}

/// Write-once mapping from stepId to committed step output.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    outputs: HashMap<StepId, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a context from the flat string-keyed map persisted inside a
    /// session record. Keys that do not parse as stepIds are skipped.
    pub fn from_snapshot(snapshot: &HashMap<String, Value>) -> Self {
        let mut outputs = HashMap::new();
        for (key, value) in snapshot {
            match key.parse::<StepId>() {
                Ok(step_id) => {
                    outputs.insert(step_id, value.clone());
                }
                Err(_) => {
                    log::warn!("skipping context snapshot entry with non-step key '{}'", key);
                }
            }
        }
        Self { outputs }
    }

    /// Rebuild a context from an ordered prefix of step results, committing
    /// each successful result's context value. This is how session state is
    /// reconstructed before a resume or retry run: the persisted results are
    /// the source of truth and the context is derived from them.
    pub fn from_results(results: &[StepResult]) -> Self {
        let mut context = Self::new();
        for result in results {
            if let Some(value) = result.context_value() {
                if let Err(e) = context.commit(result.step_id(), value) {
                    log::warn!("ignoring conflicting result while rebuilding context: {}", e);
                }
            }
        }
        context
    }

    /// Flatten to the string-keyed map persisted inside a session record.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.outputs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    /// Commit a step's output. Each stepId may be committed exactly once.
    pub fn commit(&mut self, step_id: StepId, output: Value) -> Result<(), ContextError> {
        if self.outputs.contains_key(&step_id) {
            return Err(ContextError::DuplicateStep(step_id));
        }
        self.outputs.insert(step_id, output);
        Ok(())
    }

    pub fn get(&self, step_id: StepId) -> Option<&Value> {
        self.outputs.get(&step_id)
    }

    pub fn contains(&self, step_id: StepId) -> bool {
        self.outputs.contains_key(&step_id)
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Resolve one parameter value against the committed outputs.
    ///
    /// Literals pass through unchanged. For references, the leading path
    /// segment `result` addresses the step's whole output (any remaining
    /// segments keep walking inside it); other paths walk the output
    /// directly, dot-segment by dot-segment, through objects and numeric
    /// array indices. An output field literally named `result` is shadowed
    /// by the sentinel.
    pub fn resolve(&self, value: &ParameterValue) -> Resolved {
        match value {
            ParameterValue::Literal(v) => Resolved::Value(v.clone()),
            ParameterValue::Reference(raw) => self.resolve_reference(raw),
        }
    }

    fn resolve_reference(&self, raw: &str) -> Resolved {
        let reference = match parse_reference(raw) {
            Some(r) => r,
            None => {
                return Resolved::Unresolved {
                    reference: raw.to_string(),
                    reason: "malformed reference, expected step.<N>.<path>".to_string(),
                }
            }
        };

        let output = match self.outputs.get(&reference.step_id) {
            Some(v) => v,
            None => {
                return Resolved::Unresolved {
                    reference: raw.to_string(),
                    reason: format!("step {} has no committed output", reference.step_id),
                }
            }
        };

        let mut segments = reference.path.split('.').peekable();
        let mut current = output;
        if segments.peek() == Some(&WHOLE_OUTPUT) {
            segments.next();
        }
        for segment in segments {
            let next = match current {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment
                    .parse::<usize>()
                    .ok()
                    .and_then(|idx| items.get(idx)),
                _ => None,
            };
            match next {
                Some(v) => current = v,
                None => {
                    return Resolved::Unresolved {
                        reference: raw.to_string(),
                        reason: format!(
                            "path segment '{}' not found in step {} output",
                            segment, reference.step_id
                        ),
                    }
                }
            }
        }
        Resolved::Value(current.clone())
    }

    /// Resolve a whole parameter map, preserving parameter names.
    pub fn resolve_parameters(
        &self,
        parameters: &HashMap<String, ParameterValue>,
    ) -> HashMap<String, Resolved> {
        parameters
            .iter()
            .map(|(name, value)| (name.clone(), self.resolve(value)))
            .collect()
    }
}
