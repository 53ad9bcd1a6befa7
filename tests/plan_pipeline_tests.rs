//! Pipeline tests: a stubbed model reply flows through the planner and,
//! where needed, the completion loop, and the resulting plan runs against
//! a live in-process function registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use ordo::completion::{
    CompletingPlanner, CompletionError, FunctionSynthesizer, GeneratedFunction, SynthesisReport,
};
use ordo::executor::{ExecutionOutcome, PlanExecutor};
use ordo::functions::{FunctionMetadata, LocalFunctionRegistry};
use ordo::input::QueuedInputProvider;
use ordo::llm::StubLlmClient;
use ordo::planner::{LlmPlanner, Planner};
use ordo::types::{ExecutionResult, MissingFunction};

const ADD_THEN_DOUBLE: &str = r#"{
    "steps": [
        {"type": "function_call", "stepId": 1, "description": "Add 3 and 5",
         "functionName": "add", "parameters": {
           "a": {"kind": "literal", "value": 3},
           "b": {"kind": "literal", "value": 5}}},
        {"type": "function_call", "stepId": 2, "description": "Double the sum",
         "functionName": "multiply", "parameters": {
           "a": {"kind": "reference", "value": "step.1.result"},
           "b": {"kind": "literal", "value": 2}}}
    ],
    "status": "executable"
}"#;

const ASK_THEN_ADD: &str = r#"{
    "steps": [
        {"type": "user_input", "stepId": 1, "description": "Ask for two numbers",
         "schema": {"fields": [
            {"id": "a", "type": "number", "required": true},
            {"id": "b", "type": "number", "required": true}]}},
        {"type": "function_call", "stepId": 2, "description": "Add them",
         "functionName": "add", "parameters": {
           "a": {"kind": "reference", "value": "step.1.a"},
           "b": {"kind": "reference", "value": "step.1.b"}}}
    ],
    "status": "executable"
}"#;

const CONVERT_INCOMPLETE: &str = r#"{
    "steps": [
        {"type": "function_call", "stepId": 1, "description": "Convert to EUR",
         "functionName": "convert_currency", "parameters": {
           "amount": {"kind": "literal", "value": 100},
           "to": {"kind": "literal", "value": "EUR"}}},
        {"type": "function_call", "stepId": 2, "description": "Round it",
         "functionName": "round_to", "parameters": {
           "value": {"kind": "reference", "value": "step.1.converted"},
           "digits": {"kind": "literal", "value": 0}}}
    ],
    "missingFunctions": [
        {"name": "convert_currency",
         "description": "Convert an amount between currencies",
         "suggestedParameters": [
            {"name": "amount", "type": "number"},
            {"name": "to", "type": "string"}],
         "suggestedReturns": "object"}
    ],
    "status": "incomplete"
}"#;

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
        .register(
            FunctionMetadata::new("round_to", "Round a number"),
            |params| async move {
                let value = params.get("value").and_then(Value::as_f64).unwrap_or(0.0);
                let digits = params.get("digits").and_then(Value::as_u64).unwrap_or(0);
                let scale = 10f64.powi(digits as i32);
                Ok(json!((value * scale).round() / scale))
            },
        )
        .await;
    registry
}

fn finished(outcome: ExecutionOutcome) -> ExecutionResult {
    match outcome {
        ExecutionOutcome::Finished(result) => result,
        ExecutionOutcome::AwaitingInput { pending, .. } => {
            panic!("run unexpectedly paused at step {}", pending.step_id)
        }
    }
}

#[tokio::test]
async fn planned_arithmetic_chain_executes_to_sixteen() {
    let registry = arithmetic_registry().await;
    let llm = Arc::new(StubLlmClient::with_responses(vec![ADD_THEN_DOUBLE]));
    let planner = LlmPlanner::new(llm, registry.clone());

    let plan = planner.plan("add 3 and 5 then double it").await.unwrap();
    assert!(plan.is_executable());

    let executor = PlanExecutor::new(registry);
    let result = finished(executor.execute(&plan).await.unwrap());
    assert!(result.success);
    assert_eq!(result.steps.len(), 2);
    assert_eq!(result.final_result, Some(json!(16.0)));
}

#[tokio::test]
async fn planned_input_step_collects_and_feeds_downstream() {
    let registry = arithmetic_registry().await;
    let llm = Arc::new(StubLlmClient::with_responses(vec![ASK_THEN_ADD]));
    let planner = LlmPlanner::new(llm, registry.clone());
    let plan = planner
        .plan("ask me for two numbers and add them")
        .await
        .unwrap();

    let mut answers = HashMap::new();
    answers.insert("a".to_string(), json!(4));
    answers.insert("b".to_string(), json!(9));
    let provider = Arc::new(QueuedInputProvider::with_responses(vec![answers]));
    let executor = PlanExecutor::new(registry).with_input_provider(provider.clone());

    let result = finished(executor.execute(&plan).await.unwrap());
    assert!(result.success);
    assert_eq!(result.final_result, Some(json!(13.0)));
    // One schema was served, carrying both requested fields.
    let served = provider.served();
    assert_eq!(served.len(), 1);
    assert_eq!(served[0].fields.len(), 2);
}

#[tokio::test]
async fn planned_input_step_pauses_without_a_provider() {
    let registry = arithmetic_registry().await;
    let llm = Arc::new(StubLlmClient::with_responses(vec![ASK_THEN_ADD]));
    let planner = LlmPlanner::new(llm, registry.clone());
    let plan = planner.plan("ask and add").await.unwrap();

    let executor = PlanExecutor::new(registry);
    match executor.execute(&plan).await.unwrap() {
        ExecutionOutcome::AwaitingInput { partial, pending } => {
            assert!(partial.steps.is_empty());
            assert_eq!(pending.step_id, 1);
            assert_eq!(pending.schema.fields[0].id, "a");
        }
        ExecutionOutcome::Finished(result) => {
            panic!("expected a pause, finished with {:?}", result.final_result)
        }
    }
}

/// Test double standing in for the LLM-codegen side: registers a stub
/// implementation for every requested function, echoing the suggested
/// signature back as the generated one.
struct RegisteringSynthesizer {
    registry: Arc<LocalFunctionRegistry>,
    calls: AtomicUsize,
}

#[async_trait]
impl FunctionSynthesizer for RegisteringSynthesizer {
    async fn generate_and_register(
        &self,
        missing: &[MissingFunction],
        referenced_fields: &HashMap<String, Vec<String>>,
    ) -> Result<SynthesisReport, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut generated = Vec::new();
        for function in missing {
            // The plan reads step.1.converted, so the stub must produce it.
            assert_eq!(
                referenced_fields.get(&function.name),
                Some(&vec!["converted".to_string()])
            );
            self.registry
                .register(
                    FunctionMetadata::new(function.name.clone(), function.description.clone()),
                    |_params| async move { Ok(json!({"converted": 88.4, "rate": 0.884})) },
                )
                .await;
            generated.push(GeneratedFunction {
                name: function.name.clone(),
                parameters: function.suggested_parameters.clone(),
                returns: function.suggested_returns.clone(),
            });
        }
        Ok(SynthesisReport {
            success: true,
            generated,
            errors: Vec::new(),
        })
    }
}

#[tokio::test]
async fn missing_function_is_synthesized_then_the_plan_runs() {
    let registry = arithmetic_registry().await;
    let llm = Arc::new(StubLlmClient::with_responses(vec![CONVERT_INCOMPLETE]));
    let planner = Arc::new(LlmPlanner::new(llm.clone(), registry.clone()));
    let synthesizer = Arc::new(RegisteringSynthesizer {
        registry: registry.clone(),
        calls: AtomicUsize::new(0),
    });
    let completing = CompletingPlanner::new(planner, synthesizer.clone());

    let plan = completing
        .plan("convert 100 usd to eur, rounded to whole euros")
        .await
        .unwrap();

    // The generated signature matched the suggestion, so the plan flipped
    // to executable without a second model call.
    assert!(plan.is_executable());
    assert!(plan.missing_functions.is_none());
    assert_eq!(llm.prompts().len(), 1);
    assert_eq!(synthesizer.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        plan.metadata.as_ref().unwrap().synthesized_functions,
        vec!["convert_currency"]
    );

    let executor = PlanExecutor::new(registry);
    let result = finished(executor.execute(&plan).await.unwrap());
    assert!(result.success);
    assert_eq!(result.final_result, Some(json!(88.0)));
}
