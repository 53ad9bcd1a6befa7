//! LLM-backed planner: prompt, extract, parse, validate.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;

use crate::functions::FunctionProvider;
use crate::llm::LlmClient;
use crate::planner::prompt::build_plan_prompt;
use crate::planner::{Planner, PlannerConfig, PlannerError};
use crate::types::{ExecutionPlan, MissingFunction, PlanStatus, PlanStep};
use crate::validation::PlanValidator;

static JSON_BLOCK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```(?:json)?\s*([\s\S]*?)```").unwrap());

/// Pulls the plan JSON out of a model reply. Prefers a fenced block; falls
/// back to the first balanced top-level object in the raw text.
fn extract_json(raw: &str) -> Result<&str, PlannerError> {
    if let Some(captures) = JSON_BLOCK_RE.captures(raw) {
        if let Some(block) = captures.get(1) {
            let trimmed = block.as_str().trim();
            if trimmed.starts_with('{') {
                return Ok(trimmed);
            }
        }
    }
    first_balanced_object(raw).ok_or(PlannerError::NoJsonFound)
}

fn first_balanced_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let bytes = raw.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &b) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_plan(raw_json: &str, user_request: &str) -> Result<ExecutionPlan, PlannerError> {
    let value: Value =
        serde_json::from_str(raw_json).map_err(|e| PlannerError::MalformedJson(e.to_string()))?;
    let object = value
        .as_object()
        .ok_or_else(|| PlannerError::Structure("top-level value is not an object".to_string()))?;

    let raw_steps = object
        .get("steps")
        .and_then(Value::as_array)
        .ok_or_else(|| PlannerError::Structure("missing \"steps\" array".to_string()))?;
    let mut steps = Vec::with_capacity(raw_steps.len());
    for (index, raw_step) in raw_steps.iter().enumerate() {
        let step: PlanStep = serde_json::from_value(raw_step.clone())
            .map_err(|e| PlannerError::Structure(format!("step at index {}: {}", index, e)))?;
        steps.push(step);
    }

    let status: PlanStatus = match object.get("status") {
        Some(raw) => serde_json::from_value(raw.clone())
            .map_err(|_| PlannerError::Structure(format!("unknown plan status {}", raw)))?,
        None => return Err(PlannerError::Structure("missing \"status\" field".to_string())),
    };

    let missing: Vec<MissingFunction> = match object.get("missingFunctions") {
        Some(Value::Null) | None => Vec::new(),
        Some(raw) => serde_json::from_value(raw.clone())
            .map_err(|e| PlannerError::Structure(format!("missingFunctions: {}", e)))?,
    };

    let mut plan = ExecutionPlan::new(user_request, steps, status);
    if !missing.is_empty() {
        plan = plan.with_missing_functions(missing);
    }
    Ok(plan)
}

/// Planner that prompts an [`LlmClient`] with the live function catalog and
/// refuses to hand back anything that fails structural validation.
pub struct LlmPlanner {
    llm: Arc<dyn LlmClient>,
    functions: Arc<dyn FunctionProvider>,
    validator: PlanValidator,
    config: PlannerConfig,
}

impl LlmPlanner {
    pub fn new(llm: Arc<dyn LlmClient>, functions: Arc<dyn FunctionProvider>) -> Self {
        Self {
            llm,
            functions,
            validator: PlanValidator::new(),
            config: PlannerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PlannerConfig) -> Self {
        self.config = config;
        self
    }

    /// Executable plans must only call functions that exist right now. The
    /// registry may have changed since the catalog was advertised, so this
    /// re-checks against the provider rather than trusting the prompt.
    async fn check_registered(&self, plan: &ExecutionPlan) -> Result<(), PlannerError> {
        let mut unknown = Vec::new();
        for name in plan.called_functions() {
            if unknown.iter().any(|u| u == name) {
                continue;
            }
            if !self.functions.has_function(name).await {
                unknown.push(name.to_string());
            }
        }
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(PlannerError::UnregisteredFunctions(unknown))
        }
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn plan(&self, user_request: &str) -> Result<ExecutionPlan, PlannerError> {
        let mut catalog = self.functions.list_functions().await;
        if let Some(advertised) = &self.config.advertised_functions {
            catalog.retain(|f| advertised.iter().any(|name| name == &f.name));
        }

        let prompt = build_plan_prompt(user_request, &catalog);
        log::debug!(
            "planning request ({} catalog functions, model {})",
            catalog.len(),
            self.llm.client_info().model
        );

        let raw = self.llm.generate_text(&prompt).await?;
        let json = extract_json(&raw)?;
        let plan = parse_plan(json, user_request)?;
        self.validator.validate(&plan)?;
        if plan.is_executable() {
            self.check_registered(&plan).await?;
        }

        log::info!(
            "plan {} generated: {} steps, status {:?}, {} missing functions",
            plan.id,
            plan.steps.len(),
            plan.status,
            plan.missing_functions.as_ref().map_or(0, Vec::len)
        );
        Ok(plan)
    }
}
