//! Plan execution: a strictly sequential walk over validated steps.
//!
//! References only point backward, so list order is execution order and no
//! scheduling is needed. The first failed step stops the walk; later steps
//! are never attempted and are simply absent from the result. A user-input
//! step with no provider configured pauses the run instead of failing it,
//! handing back what executed so far plus the schema being waited on.

use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::context::{ExecutionContext, Resolved};
use crate::functions::{CancellationToken, FunctionProvider};
use crate::input::{InputError, UserInputProvider};
use crate::types::{
    ConditionResult, ConditionStep, ExecutionPlan, ExecutionResult, FunctionCallResult,
    FunctionCallStep, ParameterValue, PendingInput, PlanStep, StepId, StepResult, UserInputResult,
    UserInputStep,
};
use crate::validation::{PlanValidationError, PlanValidator};

/// Execution knobs.
#[derive(Debug, Clone, Default)]
pub struct ExecutorConfig {
    /// Per-step deadline. `None` lets steps run unbounded. A fired timeout
    /// records the step as failed and signals the step's cancellation
    /// token; providers that ignore the token may keep running in the
    /// background.
    pub step_timeout: Option<Duration>,
}

/// Mid-plan entry point, used when resuming or retrying a session.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// First stepId to run. Steps with smaller ids are assumed to be
    /// covered by the seed and are skipped.
    pub start_at: Option<StepId>,
    /// Results already committed by an earlier run of this plan.
    pub seed_results: Vec<StepResult>,
    /// Context snapshot matching `seed_results`, keyed by stepId strings.
    pub seed_context: HashMap<String, Value>,
}

/// How a single `execute` call ended.
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    Finished(ExecutionResult),
    /// The walk reached a user-input step and no input provider is
    /// configured. `partial` carries everything committed so far.
    AwaitingInput {
        partial: ExecutionResult,
        pending: PendingInput,
    },
}

impl ExecutionOutcome {
    pub fn is_finished(&self) -> bool {
        matches!(self, ExecutionOutcome::Finished(_))
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    if let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) {
        return l == r;
    }
    left == right
}

fn compare(op: &str, left: &Value, right: &Value) -> Result<bool, String> {
    match op {
        "==" => Ok(values_equal(left, right)),
        "!=" => Ok(!values_equal(left, right)),
        ordering => {
            let (l, r) = match (left.as_f64(), right.as_f64()) {
                (Some(l), Some(r)) => (l, r),
                _ => {
                    return Err(format!(
                        "operator '{}' requires numeric operands, got {} and {}",
                        ordering, left, right
                    ))
                }
            };
            match ordering {
                ">=" => Ok(l >= r),
                "<=" => Ok(l <= r),
                ">" => Ok(l > r),
                "<" => Ok(l < r),
                other => Err(format!("unknown operator '{}'", other)),
            }
        }
    }
}

fn parse_operand(token: &str, context: &ExecutionContext) -> Result<Value, String> {
    let token = token.trim();
    if token.starts_with("step.") {
        return match context.resolve(&ParameterValue::reference(token)) {
            Resolved::Value(v) => Ok(v),
            Resolved::Unresolved { reference, reason } => {
                Err(format!("'{}' did not resolve: {}", reference, reason))
            }
        };
    }
    if let Ok(value) = serde_json::from_str::<Value>(token) {
        return Ok(value);
    }
    Ok(Value::String(token.to_string()))
}

/// Evaluate a condition expression: either a single binary comparison
/// (`lhs OP rhs` with OP one of `==`, `!=`, `>=`, `<=`, `>`, `<`) or a
/// lone operand judged for truthiness. Operands are step references,
/// JSON literals, or bare strings.
fn evaluate_condition(expression: &str, context: &ExecutionContext) -> Result<bool, String> {
    let expression = expression.trim();
    if expression.is_empty() {
        return Err("empty condition expression".to_string());
    }
    for op in ["==", "!=", ">=", "<=", ">", "<"] {
        if let Some(index) = expression.find(op) {
            let lhs = &expression[..index];
            let rhs = &expression[index + op.len()..];
            let left = parse_operand(lhs, context)?;
            let right = parse_operand(rhs, context)?;
            return compare(op, &left, &right);
        }
    }
    Ok(truthy(&parse_operand(expression, context)?))
}

/// Walks validated plans step by step.
pub struct PlanExecutor {
    functions: Arc<dyn FunctionProvider>,
    input: Option<Arc<dyn UserInputProvider>>,
    validator: PlanValidator,
    config: ExecutorConfig,
}

impl PlanExecutor {
    pub fn new(functions: Arc<dyn FunctionProvider>) -> Self {
        Self {
            functions,
            input: None,
            validator: PlanValidator::new(),
            config: ExecutorConfig::default(),
        }
    }

    pub fn with_input_provider(mut self, provider: Arc<dyn UserInputProvider>) -> Self {
        self.input = Some(provider);
        self
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub async fn execute(
        &self,
        plan: &ExecutionPlan,
    ) -> Result<ExecutionOutcome, PlanValidationError> {
        self.execute_with_options(plan, ExecuteOptions::default())
            .await
    }

    /// Run the plan, optionally entering mid-way with a seeded prefix.
    /// Validation failure is the only hard error; everything that happens
    /// during the walk is reflected in the returned outcome.
    pub async fn execute_with_options(
        &self,
        plan: &ExecutionPlan,
        options: ExecuteOptions,
    ) -> Result<ExecutionOutcome, PlanValidationError> {
        self.validator.validate(plan)?;

        let started_at = Utc::now();
        let start_at = options.start_at.unwrap_or(0);
        let mut context = ExecutionContext::from_snapshot(&options.seed_context);
        let mut results = options.seed_results;
        let mut final_result: Option<Value> = results
            .iter()
            .rev()
            .find_map(|r| r.context_value());
        let mut error: Option<String> = None;

        log::debug!(
            "executing plan {} ({} steps, starting at step {})",
            plan.id,
            plan.steps.len(),
            start_at
        );

        for step in &plan.steps {
            let step_id = step.step_id();
            if step_id < start_at {
                continue;
            }

            let result = match step {
                PlanStep::FunctionCall(fc) => {
                    StepResult::FunctionCall(self.run_function_step(fc, &context).await)
                }
                PlanStep::UserInput(ui) => match &self.input {
                    Some(provider) => {
                        StepResult::UserInput(self.run_input_step(ui, provider, &context).await)
                    }
                    None => {
                        log::info!(
                            "plan {} paused at step {} awaiting user input",
                            plan.id,
                            step_id
                        );
                        let partial = ExecutionResult {
                            plan_id: plan.id.clone(),
                            steps: results,
                            final_result,
                            success: true,
                            error: None,
                            started_at,
                            completed_at: Utc::now(),
                        };
                        return Ok(ExecutionOutcome::AwaitingInput {
                            partial,
                            pending: PendingInput {
                                step_id: ui.step_id,
                                schema: ui.schema.clone(),
                            },
                        });
                    }
                },
                PlanStep::Condition(cond) => {
                    StepResult::Condition(run_condition_step(cond, &context))
                }
            };

            let succeeded = result.success();
            if succeeded {
                if let Some(value) = result.context_value() {
                    if let Err(e) = context.commit(step_id, value.clone()) {
                        log::error!("plan {}: {}", plan.id, e);
                        error = Some(format!("step {} failed: {}", step_id, e));
                        results.push(result);
                        break;
                    }
                    final_result = Some(value);
                }
                results.push(result);
            } else {
                let message = result.error().unwrap_or("unknown error").to_string();
                log::warn!("plan {} stopped at step {}: {}", plan.id, step_id, message);
                error = Some(format!("step {} failed: {}", step_id, message));
                results.push(result);
                break;
            }
        }

        let success = error.is_none();
        log::info!(
            "plan {} finished: success={}, {} steps recorded",
            plan.id,
            success,
            results.len()
        );
        Ok(ExecutionOutcome::Finished(ExecutionResult {
            plan_id: plan.id.clone(),
            steps: results,
            final_result,
            success,
            error,
            started_at,
            completed_at: Utc::now(),
        }))
    }

    async fn run_function_step(
        &self,
        step: &FunctionCallStep,
        context: &ExecutionContext,
    ) -> FunctionCallResult {
        let mut resolved: Vec<(String, Resolved)> =
            context.resolve_parameters(&step.parameters).into_iter().collect();
        resolved.sort_by(|a, b| a.0.cmp(&b.0));

        let mut parameters = HashMap::with_capacity(resolved.len());
        for (name, value) in resolved {
            match value {
                Resolved::Value(v) => {
                    parameters.insert(name, v);
                }
                Resolved::Unresolved { reference, reason } => {
                    return FunctionCallResult::failed(
                        step.step_id,
                        &step.function_name,
                        HashMap::new(),
                        format!(
                            "parameter '{}' did not resolve ({}): {}",
                            name, reference, reason
                        ),
                    );
                }
            }
        }

        if !self.functions.has_function(&step.function_name).await {
            return FunctionCallResult::failed(
                step.step_id,
                &step.function_name,
                parameters,
                format!("function '{}' is not registered", step.function_name),
            );
        }

        let cancel = CancellationToken::new();
        let call = self
            .functions
            .call_function(&step.function_name, parameters.clone(), &cancel);
        let outcome = match self.config.step_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => {
                    cancel.cancel();
                    return FunctionCallResult::failed(
                        step.step_id,
                        &step.function_name,
                        parameters,
                        format!("step {} timed out after {}ms", step.step_id, limit.as_millis()),
                    );
                }
            },
            None => call.await,
        };

        match outcome {
            Ok(value) => {
                FunctionCallResult::succeeded(step.step_id, &step.function_name, parameters, value)
            }
            Err(e) => {
                FunctionCallResult::failed(step.step_id, &step.function_name, parameters, e.to_string())
            }
        }
    }

    async fn run_input_step(
        &self,
        step: &UserInputStep,
        provider: &Arc<dyn UserInputProvider>,
        context: &ExecutionContext,
    ) -> UserInputResult {
        for field in &step.schema.fields {
            if !provider.supports_field_type(field.field_type) {
                let e = InputError::UnsupportedFieldType {
                    provider: provider.provider_id().to_string(),
                    field_type: field.field_type.as_str().to_string(),
                };
                return UserInputResult::failed(step.step_id, e.to_string());
            }
        }

        let snapshot = context.snapshot();
        let cancel = CancellationToken::new();
        let request = provider.request_input(&step.schema, Some(&snapshot), &cancel);
        let outcome = match self.config.step_timeout {
            Some(limit) => match tokio::time::timeout(limit, request).await {
                Ok(result) => result,
                Err(_) => {
                    cancel.cancel();
                    return UserInputResult::failed(
                        step.step_id,
                        format!("step {} timed out after {}ms", step.step_id, limit.as_millis()),
                    );
                }
            },
            None => request.await,
        };

        match outcome {
            Ok(response) => {
                UserInputResult::collected(step.step_id, response.values, response.skipped)
            }
            Err(e) => UserInputResult::failed(step.step_id, e.to_string()),
        }
    }
}

fn run_condition_step(step: &ConditionStep, context: &ExecutionContext) -> ConditionResult {
    match evaluate_condition(&step.condition, context) {
        Ok(result) => {
            let branch = if result {
                step.on_true.clone()
            } else {
                step.on_false.clone()
            };
            ConditionResult::evaluated(step.step_id, result, branch, step.output_variable.clone())
        }
        Err(e) => ConditionResult::failed(step.step_id, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::{FunctionError, FunctionMetadata, LocalFunctionRegistry};
    use crate::input::QueuedInputProvider;
    use crate::types::{FieldType, InputField, InputSchema, PlanStatus};
    use crate::validation::ValidationIssue;
    use async_trait::async_trait;
    use serde_json::json;

    fn call_step(
        step_id: StepId,
        function_name: &str,
        parameters: Vec<(&str, ParameterValue)>,
    ) -> PlanStep {
        PlanStep::FunctionCall(FunctionCallStep {
            step_id,
            description: format!("call {}", function_name),
            function_name: function_name.to_string(),
            parameters: parameters
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            depends_on: None,
        })
    }

    fn input_step(step_id: StepId, field_id: &str, field_type: FieldType) -> PlanStep {
        PlanStep::UserInput(UserInputStep {
            step_id,
            description: format!("ask for {}", field_id),
            schema: InputSchema::new(vec![InputField::new(field_id, field_type).required()]),
            output_name: None,
        })
    }

    fn plan_of(steps: Vec<PlanStep>) -> ExecutionPlan {
        ExecutionPlan::new("test request", steps, PlanStatus::Executable)
    }

    async fn arithmetic_registry() -> Arc<LocalFunctionRegistry> {
        let registry = Arc::new(LocalFunctionRegistry::new());
        registry
            .register(FunctionMetadata::new("add", "Add"), |params| async move {
                let a = params.get("a").and_then(Value::as_f64).unwrap_or(0.0);
                let b = params.get("b").and_then(Value::as_f64).unwrap_or(0.0);
                Ok(json!(a + b))
            })
            .await;
        registry
            .register(
                FunctionMetadata::new("multiply", "Multiply"),
                |params| async move {
                    let a = params.get("a").and_then(Value::as_f64).unwrap_or(0.0);
                    let b = params.get("b").and_then(Value::as_f64).unwrap_or(0.0);
                    Ok(json!(a * b))
                },
            )
            .await;
        registry
            .register(FunctionMetadata::new("boom", "Always fails"), |_| async {
                Err(FunctionError::Failed {
                    name: "boom".to_string(),
                    message: "exploded".to_string(),
                })
            })
            .await;
        registry
            .register(FunctionMetadata::new("slow", "Sleeps"), |_| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(json!("done"))
            })
            .await;
        registry
    }

    fn unwrap_finished(outcome: ExecutionOutcome) -> ExecutionResult {
        match outcome {
            ExecutionOutcome::Finished(result) => result,
            ExecutionOutcome::AwaitingInput { .. } => panic!("run unexpectedly paused"),
        }
    }

    #[tokio::test]
    async fn chained_arithmetic_resolves_references() {
        let plan = plan_of(vec![
            call_step(
                1,
                "add",
                vec![
                    ("a", ParameterValue::literal(3)),
                    ("b", ParameterValue::literal(5)),
                ],
            ),
            call_step(
                2,
                "multiply",
                vec![
                    ("a", ParameterValue::reference("step.1.result")),
                    ("b", ParameterValue::literal(2)),
                ],
            ),
        ]);
        let executor = PlanExecutor::new(arithmetic_registry().await);

        let result = unwrap_finished(executor.execute(&plan).await.unwrap());
        assert!(result.success);
        assert_eq!(result.steps.len(), 2);
        assert_eq!(result.final_result, Some(json!(16.0)));
    }

    #[tokio::test]
    async fn first_failure_stops_the_walk() {
        let plan = plan_of(vec![
            call_step(
                1,
                "add",
                vec![
                    ("a", ParameterValue::literal(1)),
                    ("b", ParameterValue::literal(1)),
                ],
            ),
            call_step(2, "boom", vec![]),
            call_step(
                3,
                "add",
                vec![
                    ("a", ParameterValue::literal(1)),
                    ("b", ParameterValue::literal(1)),
                ],
            ),
        ]);
        let executor = PlanExecutor::new(arithmetic_registry().await);

        let result = unwrap_finished(executor.execute(&plan).await.unwrap());
        assert!(!result.success);
        assert_eq!(result.steps.len(), 2);
        assert!(result.error.as_deref().unwrap().contains("step 2 failed"));
        assert!(!result.steps[1].success());
    }

    #[tokio::test]
    async fn step_timeout_records_a_timeout_failure() {
        let plan = plan_of(vec![call_step(1, "slow", vec![])]);
        let executor = PlanExecutor::new(arithmetic_registry().await).with_config(ExecutorConfig {
            step_timeout: Some(Duration::from_millis(100)),
        });

        let result = unwrap_finished(executor.execute(&plan).await.unwrap());
        assert!(!result.success);
        assert_eq!(result.steps.len(), 1);
        assert!(result.steps[0]
            .error()
            .unwrap()
            .contains("timed out after 100ms"));
    }

    #[tokio::test]
    async fn generous_timeout_lets_slow_steps_finish() {
        let plan = plan_of(vec![call_step(1, "slow", vec![])]);
        let executor = PlanExecutor::new(arithmetic_registry().await).with_config(ExecutorConfig {
            step_timeout: Some(Duration::from_secs(5)),
        });

        let result = unwrap_finished(executor.execute(&plan).await.unwrap());
        assert!(result.success);
        assert_eq!(result.final_result, Some(json!("done")));
    }

    #[tokio::test]
    async fn unresolved_reference_fails_the_step() {
        let plan = plan_of(vec![
            call_step(
                1,
                "add",
                vec![
                    ("a", ParameterValue::literal(1)),
                    ("b", ParameterValue::literal(1)),
                ],
            ),
            call_step(
                2,
                "add",
                vec![
                    ("a", ParameterValue::reference("step.1.result.missing.field")),
                    ("b", ParameterValue::literal(1)),
                ],
            ),
        ]);
        let executor = PlanExecutor::new(arithmetic_registry().await);

        let result = unwrap_finished(executor.execute(&plan).await.unwrap());
        assert!(!result.success);
        assert_eq!(result.steps.len(), 2);
        assert!(result.steps[1].error().unwrap().contains("did not resolve"));
    }

    #[tokio::test]
    async fn invalid_plan_is_rejected_before_any_step_runs() {
        let plan = plan_of(vec![call_step(
            1,
            "add",
            vec![("a", ParameterValue::reference("step.1.result"))],
        )]);
        let executor = PlanExecutor::new(arithmetic_registry().await);

        let err = executor.execute(&plan).await.unwrap_err();
        assert!(err
            .issues
            .iter()
            .any(|i| matches!(i, ValidationIssue::ForwardReference { .. })));
    }

    #[tokio::test]
    async fn user_input_without_provider_pauses_the_run() {
        let plan = plan_of(vec![
            call_step(
                1,
                "add",
                vec![
                    ("a", ParameterValue::literal(2)),
                    ("b", ParameterValue::literal(2)),
                ],
            ),
            input_step(2, "amount", FieldType::Number),
            call_step(
                3,
                "multiply",
                vec![
                    ("a", ParameterValue::reference("step.1.result")),
                    ("b", ParameterValue::reference("step.2.amount")),
                ],
            ),
        ]);
        let executor = PlanExecutor::new(arithmetic_registry().await);

        match executor.execute(&plan).await.unwrap() {
            ExecutionOutcome::AwaitingInput { partial, pending } => {
                assert_eq!(pending.step_id, 2);
                assert_eq!(pending.schema.fields[0].id, "amount");
                assert_eq!(partial.steps.len(), 1);
                assert!(partial.success);
            }
            ExecutionOutcome::Finished(_) => panic!("expected a paused run"),
        }
    }

    #[tokio::test]
    async fn queued_provider_answers_input_steps_inline() {
        let plan = plan_of(vec![
            input_step(1, "amount", FieldType::Number),
            call_step(
                2,
                "multiply",
                vec![
                    ("a", ParameterValue::reference("step.1.amount")),
                    ("b", ParameterValue::literal(3)),
                ],
            ),
        ]);
        let provider = Arc::new(QueuedInputProvider::with_responses(vec![
            [("amount".to_string(), json!(7))].into_iter().collect(),
        ]));
        let executor =
            PlanExecutor::new(arithmetic_registry().await).with_input_provider(provider.clone());

        let result = unwrap_finished(executor.execute(&plan).await.unwrap());
        assert!(result.success);
        assert_eq!(result.final_result, Some(json!(21.0)));
        assert_eq!(provider.served().len(), 1);
    }

    struct TextOnlyProvider;

    #[async_trait]
    impl UserInputProvider for TextOnlyProvider {
        fn provider_id(&self) -> &str {
            "text-only"
        }

        fn supports_field_type(&self, field_type: FieldType) -> bool {
            field_type == FieldType::Text
        }

        async fn request_input(
            &self,
            _schema: &InputSchema,
            _context: Option<&HashMap<String, Value>>,
            _cancel: &CancellationToken,
        ) -> Result<crate::input::InputResponse, InputError> {
            panic!("request_input must not be reached for unsupported fields");
        }
    }

    #[tokio::test]
    async fn unsupported_field_type_fails_before_any_prompt() {
        let plan = plan_of(vec![input_step(1, "amount", FieldType::Number)]);
        let executor =
            PlanExecutor::new(arithmetic_registry().await).with_input_provider(Arc::new(TextOnlyProvider));

        let result = unwrap_finished(executor.execute(&plan).await.unwrap());
        assert!(!result.success);
        let message = result.steps[0].error().unwrap();
        assert!(message.contains("number"));
        assert!(message.contains("text-only"));
    }

    #[tokio::test]
    async fn condition_step_records_branch_and_keeps_walking() {
        let plan = plan_of(vec![
            call_step(
                1,
                "add",
                vec![
                    ("a", ParameterValue::literal(6)),
                    ("b", ParameterValue::literal(6)),
                ],
            ),
            PlanStep::Condition(ConditionStep {
                step_id: 2,
                description: "is it big".to_string(),
                condition: "step.1.result >= 10".to_string(),
                on_true: Some("notify".to_string()),
                on_false: Some("ignore".to_string()),
                output_variable: None,
            }),
            call_step(
                3,
                "add",
                vec![
                    ("a", ParameterValue::reference("step.1.result")),
                    ("b", ParameterValue::literal(1)),
                ],
            ),
        ]);
        let executor = PlanExecutor::new(arithmetic_registry().await);

        let result = unwrap_finished(executor.execute(&plan).await.unwrap());
        assert!(result.success);
        assert_eq!(result.steps.len(), 3);
        match &result.steps[1] {
            StepResult::Condition(c) => {
                assert_eq!(c.result, Some(true));
                assert_eq!(c.branch.as_deref(), Some("notify"));
            }
            other => panic!("expected a condition result, got {:?}", other),
        }
        assert_eq!(result.final_result, Some(json!(13.0)));
    }

    #[tokio::test]
    async fn condition_output_variable_lands_in_context() {
        let plan = plan_of(vec![
            call_step(
                1,
                "add",
                vec![
                    ("a", ParameterValue::literal(6)),
                    ("b", ParameterValue::literal(6)),
                ],
            ),
            PlanStep::Condition(ConditionStep {
                step_id: 2,
                description: "flag large totals".to_string(),
                condition: "step.1.result >= 10".to_string(),
                on_true: None,
                on_false: None,
                output_variable: Some("isLarge".to_string()),
            }),
            PlanStep::Condition(ConditionStep {
                step_id: 3,
                description: "read the flag back".to_string(),
                condition: "step.2.isLarge == true".to_string(),
                on_true: Some("done".to_string()),
                on_false: None,
                output_variable: None,
            }),
        ]);
        let executor = PlanExecutor::new(arithmetic_registry().await);

        let result = unwrap_finished(executor.execute(&plan).await.unwrap());
        assert!(result.success);
        match &result.steps[2] {
            StepResult::Condition(c) => {
                assert_eq!(c.result, Some(true));
                assert_eq!(c.branch.as_deref(), Some("done"));
            }
            other => panic!("expected a condition result, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn seeded_resume_skips_completed_prefix() {
        let plan = plan_of(vec![
            call_step(
                1,
                "add",
                vec![
                    ("a", ParameterValue::literal(3)),
                    ("b", ParameterValue::literal(5)),
                ],
            ),
            call_step(
                2,
                "multiply",
                vec![
                    ("a", ParameterValue::reference("step.1.result")),
                    ("b", ParameterValue::literal(2)),
                ],
            ),
        ]);
        let executor = PlanExecutor::new(arithmetic_registry().await);

        let seed_result =
            StepResult::FunctionCall(FunctionCallResult::succeeded(1, "add", HashMap::new(), json!(8.0)));
        let options = ExecuteOptions {
            start_at: Some(2),
            seed_results: vec![seed_result],
            seed_context: [("1".to_string(), json!(8.0))].into_iter().collect(),
        };

        let result = unwrap_finished(executor.execute_with_options(&plan, options).await.unwrap());
        assert!(result.success);
        assert_eq!(result.steps.len(), 2);
        assert_eq!(result.final_result, Some(json!(16.0)));
    }

    #[test]
    fn condition_language_covers_comparisons_and_truthiness() {
        let mut context = ExecutionContext::new();
        context.commit(1, json!({"count": 3, "name": "ada"})).unwrap();

        let cases = [
            ("step.1.count >= 3", true),
            ("step.1.count > 3", false),
            ("step.1.count != 4", true),
            ("step.1.name == ada", true),
            ("step.1.count", true),
            ("0", false),
            ("false", false),
            ("standalone", true),
        ];
        for (expression, expected) in cases {
            assert_eq!(
                evaluate_condition(expression, &context).unwrap(),
                expected,
                "expression: {}",
                expression
            );
        }

        assert!(evaluate_condition("step.2.result == 1", &context).is_err());
        assert!(evaluate_condition("", &context).is_err());
    }
}
