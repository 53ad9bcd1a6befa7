//! Completion loop: close the gap between an `incomplete` plan and an
//! executable one.
//!
//! [`CompletingPlanner`] wraps any [`Planner`]. When the wrapped planner
//! reports missing functions, the loop hands them to a
//! [`FunctionSynthesizer`] (an LLM-backed code generator in production, a
//! scripted double in tests), together with the result fields downstream
//! steps actually reference. If everything the planner asked for appears
//! with the suggested signature, the plan is flipped to executable on the
//! spot; if the generated surface drifted, the planner runs again over the
//! now-richer registry so call sites can adjust. The loop is bounded and
//! never upgrades a plan whose gaps remain.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::parse_reference;
use crate::llm::LlmError;
use crate::planner::{Planner, PlannerError};
use crate::types::{
    ExecutionPlan, MissingFunction, ParameterSpec, ParameterValue, PlanMetadata, PlanStatus,
    PlanStep, StepId,
};

pub const DEFAULT_MAX_ITERATIONS: u32 = 3;

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("synthesis backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Llm(#[from] LlmError),
}

/// A function the synthesizer produced and registered, described by its
/// actual (not suggested) signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedFunction {
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<String>,
}

/// One function the synthesizer could not produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesisFailure {
    pub function_name: String,
    pub error: String,
}

/// What one synthesis round achieved. `success` is the synthesizer's own
/// claim that every requested function was generated; the completion loop
/// verifies coverage and signatures itself from `generated`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesisReport {
    pub success: bool,
    #[serde(default)]
    pub generated: Vec<GeneratedFunction>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<SynthesisFailure>,
}

/// Generates implementations for missing functions and registers them with
/// the live function provider, so a follow-up plan (or the current one) can
/// call them.
#[async_trait]
pub trait FunctionSynthesizer: Send + Sync {
    /// `referenced_fields` names, per missing function, the result fields
    /// downstream steps read (`result` standing for the whole output); the
    /// generated body must produce at least those.
    async fn generate_and_register(
        &self,
        missing: &[MissingFunction],
        referenced_fields: &HashMap<String, Vec<String>>,
    ) -> Result<SynthesisReport, CompletionError>;
}

#[derive(Debug, Clone)]
pub struct CompletionConfig {
    /// Upper bound on plan/synthesize rounds before the loop gives up and
    /// re-plans one last time.
    pub max_iterations: u32,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

/// Collapse common type-name synonyms so suggested and generated signatures
/// compare by meaning rather than spelling.
pub fn normalize_type(raw: &str) -> String {
    let lowered = raw.trim().to_ascii_lowercase();
    match lowered.as_str() {
        "int" | "integer" | "float" | "double" | "number" => "number".to_string(),
        "str" | "text" | "string" => "string".to_string(),
        "bool" | "boolean" => "boolean".to_string(),
        "dict" | "map" | "record" | "object" => "object".to_string(),
        "list" | "vec" | "array" => "array".to_string(),
        _ => lowered,
    }
}

/// For each missing function, collect the result-field paths that later
/// steps reference out of the steps calling it. The synthesizer uses this
/// to shape the generated outputs around what the plan actually consumes.
pub fn referenced_result_fields(plan: &ExecutionPlan) -> HashMap<String, Vec<String>> {
    let missing_names: HashSet<&str> = match &plan.missing_functions {
        Some(list) => list.iter().map(|m| m.name.as_str()).collect(),
        None => return HashMap::new(),
    };
    let missing_steps: HashMap<StepId, &str> = plan
        .steps
        .iter()
        .filter_map(|step| match step {
            PlanStep::FunctionCall(call) if missing_names.contains(call.function_name.as_str()) => {
                Some((call.step_id, call.function_name.as_str()))
            }
            _ => None,
        })
        .collect();
    if missing_steps.is_empty() {
        return HashMap::new();
    }

    let mut fields: HashMap<String, Vec<String>> = HashMap::new();
    for step in &plan.steps {
        if let PlanStep::FunctionCall(call) = step {
            for value in call.parameters.values() {
                if let ParameterValue::Reference(raw) = value {
                    if let Some(reference) = parse_reference(raw) {
                        if let Some(name) = missing_steps.get(&reference.step_id) {
                            fields
                                .entry((*name).to_string())
                                .or_default()
                                .push(reference.path.clone());
                        }
                    }
                }
            }
        }
    }
    for paths in fields.values_mut() {
        paths.sort();
        paths.dedup();
    }
    fields
}

/// Parameter names must match as a set; return types must agree after
/// normalization, with an undeclared return on either side matching
/// anything.
fn signature_matches(requested: &MissingFunction, generated: &GeneratedFunction) -> bool {
    let want: HashSet<&str> = requested
        .suggested_parameters
        .iter()
        .map(|p| p.name.as_str())
        .collect();
    let got: HashSet<&str> = generated.parameters.iter().map(|p| p.name.as_str()).collect();
    if want != got {
        return false;
    }
    match (&requested.suggested_returns, &generated.returns) {
        (Some(want), Some(got)) => normalize_type(want) == normalize_type(got),
        _ => true,
    }
}

/// Planner decorator that tries to synthesize its way out of `incomplete`
/// plans before handing them back.
pub struct CompletingPlanner {
    inner: Arc<dyn Planner>,
    synthesizer: Arc<dyn FunctionSynthesizer>,
    config: CompletionConfig,
}

impl CompletingPlanner {
    pub fn new(inner: Arc<dyn Planner>, synthesizer: Arc<dyn FunctionSynthesizer>) -> Self {
        Self::with_config(inner, synthesizer, CompletionConfig::default())
    }

    pub fn with_config(
        inner: Arc<dyn Planner>,
        synthesizer: Arc<dyn FunctionSynthesizer>,
        config: CompletionConfig,
    ) -> Self {
        Self {
            inner,
            synthesizer,
            config,
        }
    }

    /// Stamp the synthesis trail onto the plan, whatever status it ends in.
    fn finish(mut plan: ExecutionPlan, synthesized: &[String]) -> ExecutionPlan {
        if !synthesized.is_empty() {
            plan.metadata = Some(PlanMetadata {
                uses_synthesized_functions: true,
                synthesized_functions: synthesized.to_vec(),
            });
        }
        plan
    }
}

#[async_trait]
impl Planner for CompletingPlanner {
    async fn plan(&self, user_request: &str) -> Result<ExecutionPlan, PlannerError> {
        let mut synthesized: Vec<String> = Vec::new();

        for iteration in 1..=self.config.max_iterations {
            let mut plan = self.inner.plan(user_request).await?;

            if plan.is_executable() {
                return Ok(Self::finish(plan, &synthesized));
            }
            let missing = match plan.missing_functions.clone() {
                Some(list) if !list.is_empty() => list,
                // Incomplete but with nothing named: nothing to synthesize.
                _ => return Ok(Self::finish(plan, &synthesized)),
            };
            log::info!(
                "plan {} incomplete on iteration {}: missing [{}]",
                plan.id,
                iteration,
                missing
                    .iter()
                    .map(|m| m.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );

            let referenced = referenced_result_fields(&plan);
            let report = match self
                .synthesizer
                .generate_and_register(&missing, &referenced)
                .await
            {
                Ok(report) => report,
                Err(e) => {
                    log::warn!("synthesis failed on iteration {}: {}", iteration, e);
                    return Ok(Self::finish(plan, &synthesized));
                }
            };
            if report.generated.is_empty() {
                // Nothing new was registered, so re-planning cannot help.
                return Ok(Self::finish(plan, &synthesized));
            }
            for generated in &report.generated {
                if !synthesized.contains(&generated.name) {
                    synthesized.push(generated.name.clone());
                }
            }

            let fully_covered = missing.iter().all(|m| {
                report
                    .generated
                    .iter()
                    .any(|g| g.name == m.name && signature_matches(m, g))
            });
            if fully_covered {
                // Every gap filled exactly as suggested: the current call
                // sites are already right, no need to plan again.
                plan.status = PlanStatus::Executable;
                plan.missing_functions = None;
                log::info!("plan {} completed by synthesis", plan.id);
                return Ok(Self::finish(plan, &synthesized));
            }
            // Partial coverage or drifted signatures: plan again so call
            // sites can adjust to what actually got registered.
        }

        // Out of iterations; one last plan over the enriched registry,
        // returned however it comes out.
        let plan = self.inner.plan(user_request).await?;
        Ok(Self::finish(plan, &synthesized))
    }
}
