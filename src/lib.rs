//! LLM-planned, stepwise-executed workflows with durable sessions.
//!
//! The pipeline runs in stages. A [`planner::Planner`] turns a
//! natural-language request into a typed [`types::ExecutionPlan`];
//! [`validation`] rejects malformed plans before anything runs;
//! [`executor::PlanExecutor`] walks the steps strictly in order, resolving
//! `step.<N>.<path>` references against the per-run [`context`];
//! [`session`] wraps runs in a persisted state machine so they can pause
//! for user input, survive restarts, and be resumed, retried, or
//! cancelled; [`completion`] closes planner-reported function gaps by
//! synthesizing the missing functions and re-planning when their shapes
//! drift.
//!
//! Function execution and input collection sit behind the
//! [`functions::FunctionProvider`] and [`input::UserInputProvider`] traits,
//! and the model behind [`llm::LlmClient`], so every stage runs against
//! in-process doubles in tests.

pub mod completion;
pub mod context;
pub mod executor;
pub mod functions;
pub mod input;
pub mod llm;
pub mod planner;
pub mod session;
pub mod types;
pub mod validation;

pub use completion::{CompletingPlanner, CompletionConfig, FunctionSynthesizer};
pub use context::ExecutionContext;
pub use executor::{ExecuteOptions, ExecutionOutcome, ExecutorConfig, PlanExecutor};
pub use functions::{FunctionProvider, LocalFunctionRegistry, ProviderChain};
pub use input::UserInputProvider;
pub use llm::{LlmClient, LlmConfig};
pub use planner::{LlmPlanner, Planner, PlannerError};
pub use session::{
    ExecutionSession, SessionManager, SessionOutcome, SessionStatus, SessionStorage,
};
pub use types::{ExecutionPlan, ExecutionResult, PlanStatus, PlanStep, StepResult};
pub use validation::{PlanValidationError, PlanValidator};
