//! Core data model for plans, steps, results, and their wire formats.
//!
//! Everything that crosses the LLM boundary or the storage boundary lives
//! here. Wire-facing structs serialize with camelCase keys because both the
//! plan JSON contract and persisted session records use camelCase.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Identifier of a step within a plan. Positive, unique, and strictly
/// increasing in execution order (gaps are allowed).
pub type StepId = u32;

/// Lifecycle status of a generated plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    /// Every called function exists; the plan may be executed.
    Executable,
    /// One or more called functions are missing; see `missing_functions`.
    Incomplete,
}

/// A single value handed to a function-call step.
///
/// Wire form: `{"kind": "literal", "value": ...}` or
/// `{"kind": "reference", "value": "step.<N>.<path>"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum ParameterValue {
    /// An opaque JSON value embedded directly in the plan.
    Literal(Value),
    /// A pointer into an earlier step's committed output.
    Reference(String),
}

impl ParameterValue {
    pub fn literal(value: impl Into<Value>) -> Self {
        ParameterValue::Literal(value.into())
    }

    pub fn reference(target: impl Into<String>) -> Self {
        ParameterValue::Reference(target.into())
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, ParameterValue::Reference(_))
    }
}

/// Field types an input schema may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Number,
    Boolean,
    Select,
    Date,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Select => "select",
            FieldType::Date => "date",
        }
    }
}

/// Declarative constraints attached to one input field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldValidation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Message shown when the constraint fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// One field of a user-input form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputField {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<FieldValidation>,
    /// Choices for `select` fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

impl InputField {
    pub fn new(id: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            id: id.into(),
            label: None,
            field_type,
            required: false,
            validation: None,
            options: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_options(mut self, options: Vec<String>) -> Self {
        self.options = Some(options);
        self
    }
}

/// Ordered form description carried by a user-input step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSchema {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub fields: Vec<InputField>,
}

impl InputSchema {
    pub fn new(fields: Vec<InputField>) -> Self {
        Self {
            title: None,
            fields,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn required_field_ids(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.id.as_str())
    }
}

/// Named, typed parameter in a function signature or suggestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "type", default = "default_param_type")]
    pub param_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_param_type() -> String {
    "string".to_string()
}

impl ParameterSpec {
    pub fn new(name: impl Into<String>, param_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type: param_type.into(),
            description: None,
        }
    }
}

/// A function the planner wanted but could not find in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingFunction {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub suggested_parameters: Vec<ParameterSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_returns: Option<String>,
}

/// Records whether any of a plan's functions were synthesized, and which.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanMetadata {
    #[serde(default)]
    pub uses_synthesized_functions: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub synthesized_functions: Vec<String>,
}

/// Calls a registered function with literal and/or cross-step parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCallStep {
    pub step_id: StepId,
    #[serde(default)]
    pub description: String,
    pub function_name: String,
    #[serde(default)]
    pub parameters: HashMap<String, ParameterValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<Vec<StepId>>,
}

/// Pauses the plan to collect values from the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInputStep {
    pub step_id: StepId,
    #[serde(default)]
    pub description: String,
    pub schema: InputSchema,
    /// Documentation only; downstream steps address the output by stepId.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_name: Option<String>,
}

/// Evaluates a boolean expression over earlier outputs and records the
/// branch that applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionStep {
    pub step_id: StepId,
    #[serde(default)]
    pub description: String,
    pub condition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_true: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_false: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_variable: Option<String>,
}

/// One unit of work in a plan.
///
/// Closed sum type: dispatch is an exhaustive match, so adding a kind is a
/// compile error everywhere it is not handled. Wire discriminator is `type`
/// with values `function_call` | `user_input` | `condition`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlanStep {
    FunctionCall(FunctionCallStep),
    UserInput(UserInputStep),
    Condition(ConditionStep),
}

impl PlanStep {
    pub fn step_id(&self) -> StepId {
        match self {
            PlanStep::FunctionCall(s) => s.step_id,
            PlanStep::UserInput(s) => s.step_id,
            PlanStep::Condition(s) => s.step_id,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            PlanStep::FunctionCall(s) => &s.description,
            PlanStep::UserInput(s) => &s.description,
            PlanStep::Condition(s) => &s.description,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PlanStep::FunctionCall(_) => "function_call",
            PlanStep::UserInput(_) => "user_input",
            PlanStep::Condition(_) => "condition",
        }
    }
}

/// A validated, ordered sequence of steps produced by the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    pub id: String,
    pub user_request: String,
    /// List order is execution order.
    pub steps: Vec<PlanStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_functions: Option<Vec<MissingFunction>>,
    pub status: PlanStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<PlanMetadata>,
}

impl ExecutionPlan {
    pub fn new(user_request: impl Into<String>, steps: Vec<PlanStep>, status: PlanStatus) -> Self {
        Self {
            id: format!("plan-{}", uuid::Uuid::new_v4()),
            user_request: user_request.into(),
            steps,
            missing_functions: None,
            status,
            created_at: Utc::now(),
            metadata: None,
        }
    }

    pub fn with_missing_functions(mut self, missing: Vec<MissingFunction>) -> Self {
        self.missing_functions = Some(missing);
        self
    }

    pub fn is_executable(&self) -> bool {
        self.status == PlanStatus::Executable
    }

    pub fn step(&self, step_id: StepId) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.step_id() == step_id)
    }

    pub fn contains_step(&self, step_id: StepId) -> bool {
        self.step(step_id).is_some()
    }

    /// Names of every function the plan calls, in step order.
    pub fn called_functions(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter_map(|s| match s {
                PlanStep::FunctionCall(fc) => Some(fc.function_name.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Outcome of one executed function-call step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCallResult {
    pub step_id: StepId,
    pub success: bool,
    pub executed_at: DateTime<Utc>,
    pub function_name: String,
    /// Parameters after reference resolution, as passed to the function.
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FunctionCallResult {
    pub fn succeeded(
        step_id: StepId,
        function_name: impl Into<String>,
        parameters: HashMap<String, Value>,
        result: Value,
    ) -> Self {
        Self {
            step_id,
            success: true,
            executed_at: Utc::now(),
            function_name: function_name.into(),
            parameters,
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(
        step_id: StepId,
        function_name: impl Into<String>,
        parameters: HashMap<String, Value>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            step_id,
            success: false,
            executed_at: Utc::now(),
            function_name: function_name.into(),
            parameters,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Outcome of one user-input step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInputResult {
    pub step_id: StepId,
    pub success: bool,
    pub executed_at: DateTime<Utc>,
    #[serde(default)]
    pub values: HashMap<String, Value>,
    #[serde(default)]
    pub skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UserInputResult {
    pub fn collected(step_id: StepId, values: HashMap<String, Value>, skipped: bool) -> Self {
        Self {
            step_id,
            success: true,
            executed_at: Utc::now(),
            values,
            skipped,
            error: None,
        }
    }

    pub fn failed(step_id: StepId, error: impl Into<String>) -> Self {
        Self {
            step_id,
            success: false,
            executed_at: Utc::now(),
            values: HashMap::new(),
            skipped: false,
            error: Some(error.into()),
        }
    }
}

/// Outcome of one condition step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionResult {
    pub step_id: StepId,
    pub success: bool,
    pub executed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<bool>,
    /// Branch label that applies (`onTrue`/`onFalse` target), if declared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Mirrors the step's `outputVariable`, so the committed context object
    /// exposes the outcome under that name too.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_variable: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConditionResult {
    pub fn evaluated(
        step_id: StepId,
        result: bool,
        branch: Option<String>,
        output_variable: Option<String>,
    ) -> Self {
        Self {
            step_id,
            success: true,
            executed_at: Utc::now(),
            result: Some(result),
            branch,
            output_variable,
            error: None,
        }
    }

    pub fn failed(step_id: StepId, error: impl Into<String>) -> Self {
        Self {
            step_id,
            success: false,
            executed_at: Utc::now(),
            result: None,
            branch: None,
            output_variable: None,
            error: Some(error.into()),
        }
    }
}

/// Result of one executed step, mirroring the step kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepResult {
    FunctionCall(FunctionCallResult),
    UserInput(UserInputResult),
    Condition(ConditionResult),
}

impl StepResult {
    pub fn step_id(&self) -> StepId {
        match self {
            StepResult::FunctionCall(r) => r.step_id,
            StepResult::UserInput(r) => r.step_id,
            StepResult::Condition(r) => r.step_id,
        }
    }

    pub fn success(&self) -> bool {
        match self {
            StepResult::FunctionCall(r) => r.success,
            StepResult::UserInput(r) => r.success,
            StepResult::Condition(r) => r.success,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            StepResult::FunctionCall(r) => r.error.as_deref(),
            StepResult::UserInput(r) => r.error.as_deref(),
            StepResult::Condition(r) => r.error.as_deref(),
        }
    }

    /// The value this step committed to the execution context, when it
    /// succeeded: the function result, the collected values object, or the
    /// condition outcome object.
    pub fn context_value(&self) -> Option<Value> {
        if !self.success() {
            return None;
        }
        match self {
            StepResult::FunctionCall(r) => r.result.clone(),
            StepResult::UserInput(r) => Some(Value::Object(
                r.values
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            )),
            StepResult::Condition(r) => {
                let outcome = r.result.unwrap_or(false);
                let mut out = serde_json::Map::new();
                out.insert("result".to_string(), Value::Bool(outcome));
                if let Some(branch) = &r.branch {
                    out.insert("branch".to_string(), Value::String(branch.clone()));
                }
                if let Some(variable) = &r.output_variable {
                    out.insert(variable.clone(), Value::Bool(outcome));
                }
                Some(Value::Object(out))
            }
        }
    }
}

/// Aggregate outcome of one plan run (full or resumed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub plan_id: String,
    pub steps: Vec<StepResult>,
    /// Output of the last successfully committed step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_result: Option<Value>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// What a paused run is waiting for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingInput {
    pub step_id: StepId,
    pub schema: InputSchema,
}
