//! Plan generation: turn a natural-language request into a validated
//! [`ExecutionPlan`](crate::types::ExecutionPlan).
//!
//! The [`LlmPlanner`] prompts a language model with the function catalog,
//! extracts the JSON plan from the reply, and runs it through structural
//! validation before anything downstream sees it.

pub mod llm_planner;
pub mod prompt;

pub use llm_planner::LlmPlanner;
pub use prompt::build_plan_prompt;

use async_trait::async_trait;
use thiserror::Error;

use crate::llm::LlmError;
use crate::types::ExecutionPlan;
use crate::validation::PlanValidationError;

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("no JSON object found in model output")]
    NoJsonFound,

    #[error("model output is not valid JSON: {0}")]
    MalformedJson(String),

    #[error("plan structure error: {0}")]
    Structure(String),

    #[error(transparent)]
    Validation(#[from] PlanValidationError),

    #[error("plan marked executable but calls unregistered functions: {}", .0.join(", "))]
    UnregisteredFunctions(Vec<String>),
}

/// Anything that can produce a plan for a request.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, user_request: &str) -> Result<ExecutionPlan, PlannerError>;
}

/// Knobs for plan generation.
#[derive(Debug, Clone, Default)]
pub struct PlannerConfig {
    /// Restrict the advertised catalog to these function names. `None`
    /// advertises everything the provider lists.
    pub advertised_functions: Option<Vec<String>>,
}
