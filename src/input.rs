//! User input seam: how the executor asks a human for values.
//!
//! The executor only talks to [`UserInputProvider`]; what "asking" means
//! (terminal prompt, form push, test script) is the embedder's business.
//! Sessions run without a provider at all and pause instead, so interactive
//! collection and persisted waiting never mix.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use thiserror::Error;

use crate::functions::CancellationToken;
use crate::types::{FieldType, InputSchema};

/// Values collected for one input schema.
#[derive(Debug, Clone, PartialEq)]
pub struct InputResponse {
    pub values: HashMap<String, Value>,
    pub skipped: bool,
    pub timestamp: DateTime<Utc>,
}

impl InputResponse {
    pub fn collected(values: HashMap<String, Value>) -> Self {
        Self {
            values,
            skipped: false,
            timestamp: Utc::now(),
        }
    }

    pub fn skipped() -> Self {
        Self {
            values: HashMap::new(),
            skipped: true,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum InputError {
    #[error("field type '{field_type}' is not supported by input provider '{provider}'")]
    UnsupportedFieldType { provider: String, field_type: String },

    #[error("input collection failed: {0}")]
    Failed(String),

    #[error("input collection was cancelled")]
    Cancelled,

    #[error("required field '{0}' was not provided")]
    MissingRequiredField(String),

    #[error("field '{field}' is invalid: {message}")]
    InvalidField { field: String, message: String },
}

/// Collects values for an input schema.
#[async_trait]
pub trait UserInputProvider: Send + Sync {
    fn provider_id(&self) -> &str;

    /// Whether this provider can render the given field type. The executor
    /// rejects a user-input step up front when any field type is
    /// unsupported, before any prompt attempt.
    fn supports_field_type(&self, field_type: FieldType) -> bool;

    /// Collect values. May block for human-scale latency; implementations
    /// should abort when the cancellation token fires.
    async fn request_input(
        &self,
        schema: &InputSchema,
        context: Option<&HashMap<String, Value>>,
        cancel: &CancellationToken,
    ) -> Result<InputResponse, InputError>;
}

/// Check submitted values against a schema: required fields present, select
/// values drawn from the declared options, numeric bounds, regex patterns.
/// Shared by providers and by session resume.
pub fn validate_values(
    schema: &InputSchema,
    values: &HashMap<String, Value>,
) -> Result<(), InputError> {
    for field in &schema.fields {
        let value = match values.get(&field.id) {
            Some(v) if !v.is_null() => v,
            _ => {
                if field.required {
                    return Err(InputError::MissingRequiredField(field.id.clone()));
                }
                continue;
            }
        };

        if field.field_type == FieldType::Select {
            if let (Some(options), Some(chosen)) = (&field.options, value.as_str()) {
                if !options.iter().any(|o| o == chosen) {
                    return Err(InputError::InvalidField {
                        field: field.id.clone(),
                        message: format!("'{}' is not one of the declared options", chosen),
                    });
                }
            }
        }

        let validation = match &field.validation {
            Some(v) => v,
            None => continue,
        };
        if let Some(n) = value.as_f64() {
            if let Some(min) = validation.min {
                if n < min {
                    return Err(InputError::InvalidField {
                        field: field.id.clone(),
                        message: validation
                            .message
                            .clone()
                            .unwrap_or_else(|| format!("{} is below the minimum {}", n, min)),
                    });
                }
            }
            if let Some(max) = validation.max {
                if n > max {
                    return Err(InputError::InvalidField {
                        field: field.id.clone(),
                        message: validation
                            .message
                            .clone()
                            .unwrap_or_else(|| format!("{} is above the maximum {}", n, max)),
                    });
                }
            }
        }
        if let (Some(pattern), Some(text)) = (&validation.pattern, value.as_str()) {
            match regex::Regex::new(pattern) {
                Ok(re) => {
                    if !re.is_match(text) {
                        return Err(InputError::InvalidField {
                            field: field.id.clone(),
                            message: validation
                                .message
                                .clone()
                                .unwrap_or_else(|| format!("'{}' does not match the expected pattern", text)),
                        });
                    }
                }
                Err(e) => {
                    log::warn!(
                        "field '{}' declares an uncompilable pattern, skipping check: {}",
                        field.id,
                        e
                    );
                }
            }
        }
    }
    Ok(())
}

/// Deterministic provider answering from a queue of preloaded value maps.
/// Used by tests and by non-interactive embeddings; supports every field
/// type and records each schema it served.
#[derive(Default)]
pub struct QueuedInputProvider {
    queued: Mutex<VecDeque<HashMap<String, Value>>>,
    served: Mutex<Vec<InputSchema>>,
}

impl QueuedInputProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses(responses: Vec<HashMap<String, Value>>) -> Self {
        Self {
            queued: Mutex::new(responses.into()),
            served: Mutex::new(Vec::new()),
        }
    }

    pub fn enqueue(&self, values: HashMap<String, Value>) {
        self.queued.lock().unwrap().push_back(values);
    }

    /// Schemas this provider has answered, in order.
    pub fn served(&self) -> Vec<InputSchema> {
        self.served.lock().unwrap().clone()
    }
}

#[async_trait]
impl UserInputProvider for QueuedInputProvider {
    fn provider_id(&self) -> &str {
        "queued"
    }

    fn supports_field_type(&self, _field_type: FieldType) -> bool {
        true
    }

    async fn request_input(
        &self,
        schema: &InputSchema,
        _context: Option<&HashMap<String, Value>>,
        cancel: &CancellationToken,
    ) -> Result<InputResponse, InputError> {
        if cancel.is_cancelled() {
            return Err(InputError::Cancelled);
        }
        self.served.lock().unwrap().push(schema.clone());
        let values = match self.queued.lock().unwrap().pop_front() {
            Some(values) => values,
            None => return Ok(InputResponse::skipped()),
        };
        validate_values(schema, &values)?;
        Ok(InputResponse::collected(values))
    }
}
