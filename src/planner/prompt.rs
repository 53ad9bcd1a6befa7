//! Prompt assembly for plan generation.

use itertools::Itertools;

use crate::functions::FunctionMetadata;

const OUTPUT_CONTRACT: &str = r#"You are a planning engine. Given a user request and a catalog of callable
functions, produce an execution plan as a single JSON object. Reply with that
JSON object only. You may wrap it in a ```json fenced block, but include no
other prose.

The plan object has this shape:

{
  "steps": [ ... ],
  "missingFunctions": [ ... ],   // omit entirely when nothing is missing
  "status": "executable" | "incomplete"
}

Each step is one of three kinds, discriminated by "type":

- {"type": "function_call", "stepId": N, "description": "...",
   "functionName": "...", "parameters": {"param": <ParameterValue>},
   "dependsOn": [earlier step ids]}
- {"type": "user_input", "stepId": N, "description": "...",
   "schema": {"title": "...", "fields": [{"id": "...", "type":
   "text|number|boolean|select|date", "label": "...", "required": true}]}}
- {"type": "condition", "stepId": N, "description": "...",
   "condition": "expression", "onTrue": "label", "onFalse": "label"}

Every ParameterValue is an object of one of two forms:
- {"kind": "literal", "value": <any JSON value>} for a value known now;
- {"kind": "reference", "value": "step.N.path"} for an earlier step's
  output. Use "step.N.result" for the whole output of a function step;
  append segments to reach inside structured output (for example
  "step.2.result.user.email"). Reference a user_input step's collected
  field as "step.N.fieldId". References may only point at strictly
  earlier steps.

Rules:
- stepId values are positive integers, strictly increasing in list order.
- Set "status": "executable" only when every called function exists in the
  catalog below and every reference resolves. If the request needs a
  function the catalog lacks, set "status": "incomplete" and describe each
  gap in "missingFunctions" with its name, what it should do, and suggested
  parameters ({"name", "type", "description"}) and return type.
- When a value must come from the user rather than a function, insert a
  user_input step and reference its fields from later steps."#;

const EXAMPLE_CHAINING: &str = r#"Example 1 (chaining function outputs):
Request: "Add 3 and 5, then multiply the sum by 2"
Catalog: add(a: number, b: number) -> number; multiply(a: number, b: number) -> number
Plan:
{
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

const EXAMPLE_USER_INPUT: &str = r#"Example 2 (asking the user for a missing value):
Request: "What's the weather like?"
Catalog: get_weather(city: string) -> object
Plan:
{
  "steps": [
    {"type": "user_input", "stepId": 1, "description": "Ask which city",
     "schema": {"title": "Weather lookup", "fields": [
       {"id": "city", "type": "text", "label": "Which city?", "required": true}]}},
    {"type": "function_call", "stepId": 2, "description": "Fetch the forecast",
     "functionName": "get_weather", "parameters": {
       "city": {"kind": "reference", "value": "step.1.city"}}}
  ],
  "status": "executable"
}"#;

const EXAMPLE_MISSING_FUNCTION: &str = r#"Example 3 (catalog gap):
Request: "Translate 'good morning' to French"
Catalog: add(a: number, b: number) -> number
Plan:
{
  "steps": [
    {"type": "function_call", "stepId": 1, "description": "Translate the phrase",
     "functionName": "translate_text", "parameters": {
       "text": {"kind": "literal", "value": "good morning"},
       "target_language": {"kind": "literal", "value": "fr"}}}
  ],
  "missingFunctions": [
    {"name": "translate_text",
     "description": "Translate text into a target language",
     "suggestedParameters": [
       {"name": "text", "type": "string", "description": "Text to translate"},
       {"name": "target_language", "type": "string", "description": "ISO language code"}],
     "suggestedReturns": "string"}
  ],
  "status": "incomplete"
}"#;

const EXAMPLE_MID_SEQUENCE_INPUT: &str = r#"Example 4 (input needed mid-sequence):
Request: "Look up my account balance and transfer some of it to savings"
Catalog: get_balance(account: string) -> number; transfer(from: string, to: string, amount: number) -> object
Plan:
{
  "steps": [
    {"type": "function_call", "stepId": 1, "description": "Fetch the balance",
     "functionName": "get_balance", "parameters": {
       "account": {"kind": "literal", "value": "checking"}}},
    {"type": "user_input", "stepId": 2, "description": "Ask how much to move",
     "schema": {"title": "Transfer amount", "fields": [
       {"id": "amount", "type": "number", "label": "How much?", "required": true}]}},
    {"type": "function_call", "stepId": 3, "description": "Move the money",
     "functionName": "transfer", "parameters": {
       "from": {"kind": "literal", "value": "checking"},
       "to": {"kind": "literal", "value": "savings"},
       "amount": {"kind": "reference", "value": "step.2.amount"}}}
  ],
  "status": "executable"
}"#;

/// One catalog line per function: `name(param: type, ...) -> returns  description`.
fn format_catalog(functions: &[FunctionMetadata]) -> String {
    if functions.is_empty() {
        return "(no functions are currently registered)".to_string();
    }
    functions
        .iter()
        .map(|f| {
            let params = f
                .parameters
                .iter()
                .map(|p| format!("{}: {}", p.name, p.param_type))
                .join(", ");
            let returns = f.returns.as_deref().unwrap_or("unknown");
            let description = if f.description.is_empty() {
                String::new()
            } else {
                format!("  {}", f.description)
            };
            format!("- {}({}) -> {}{}", f.name, params, returns, description)
        })
        .join("\n")
}

/// Assembles the full planning prompt for one request.
pub fn build_plan_prompt(user_request: &str, functions: &[FunctionMetadata]) -> String {
    let mut prompt = String::with_capacity(4096);
    prompt.push_str(OUTPUT_CONTRACT);
    prompt.push_str("\n\n");
    prompt.push_str(EXAMPLE_CHAINING);
    prompt.push_str("\n\n");
    prompt.push_str(EXAMPLE_USER_INPUT);
    prompt.push_str("\n\n");
    prompt.push_str(EXAMPLE_MISSING_FUNCTION);
    prompt.push_str("\n\n");
    prompt.push_str(EXAMPLE_MID_SEQUENCE_INPUT);
    prompt.push_str("\n\nAVAILABLE FUNCTIONS:\n");
    prompt.push_str(&format_catalog(functions));
    prompt.push_str("\n\nUSER REQUEST:\n");
    prompt.push_str(user_request);
    prompt
}
