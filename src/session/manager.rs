//! Session lifecycle orchestration.
//!
//! The manager is the only writer of persisted sessions: callers create,
//! start, resume, retry, and cancel through it, and every status change it
//! makes respects the transition relation in [`super::types`]. It drives the
//! plan executor deliberately *without* a user-input provider, so any
//! user-input step pauses the session into `waiting_input` instead of
//! prompting whoever happens to own the process; the collected values come
//! back later through [`SessionManager::resume_session`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;

use crate::context::ExecutionContext;
use crate::executor::{ExecuteOptions, ExecutionOutcome, ExecutorConfig, PlanExecutor};
use crate::functions::FunctionProvider;
use crate::input::{validate_values, InputError};
use crate::session::types::{
    is_valid_transition, ExecutionSession, SessionFilter, SessionStatus, SessionStorage,
    SessionUpdate, StorageError,
};
use crate::types::{ExecutionPlan, ExecutionResult, StepId, StepResult, UserInputResult};

/// Error surfaced by a session operation. Execution failures are not here:
/// a plan that runs and fails yields a `failed` session, not an `Err`.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session '{0}' not found")]
    NotFound(String),

    #[error("cannot {operation} session '{id}' while it is {}", .actual.as_str())]
    InvalidStatus {
        operation: &'static str,
        id: String,
        actual: SessionStatus,
    },

    #[error("session '{0}' is waiting for input but carries no pending schema")]
    MissingPendingInput(String),

    #[error("submitted input rejected: {0}")]
    InvalidInput(#[from] InputError),

    #[error(transparent)]
    Storage(StorageError),
}

impl From<StorageError> for SessionError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(id) => SessionError::NotFound(id),
            other => SessionError::Storage(other),
        }
    }
}

/// Where a session came to rest after an execute or resume call.
#[derive(Debug, Clone)]
pub enum SessionOutcome {
    Completed(ExecutionSession),
    Failed(ExecutionSession),
    /// Paused on a user-input step; the session's `pending_input` holds the
    /// schema to collect.
    WaitingInput(ExecutionSession),
}

impl SessionOutcome {
    pub fn session(&self) -> &ExecutionSession {
        match self {
            SessionOutcome::Completed(s)
            | SessionOutcome::Failed(s)
            | SessionOutcome::WaitingInput(s) => s,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, SessionOutcome::Completed(_))
    }

    pub fn is_waiting(&self) -> bool {
        matches!(self, SessionOutcome::WaitingInput(_))
    }
}

pub struct SessionManager {
    storage: Arc<dyn SessionStorage>,
    executor: PlanExecutor,
}

impl SessionManager {
    pub fn new(storage: Arc<dyn SessionStorage>, functions: Arc<dyn FunctionProvider>) -> Self {
        Self::with_executor_config(storage, functions, ExecutorConfig::default())
    }

    pub fn with_executor_config(
        storage: Arc<dyn SessionStorage>,
        functions: Arc<dyn FunctionProvider>,
        config: ExecutorConfig,
    ) -> Self {
        // No input provider: inside a session, input steps pause the run.
        let executor = PlanExecutor::new(functions).with_config(config);
        Self { storage, executor }
    }

    /// Persist a new `pending` session wrapping the plan. Nothing runs yet.
    pub async fn create_session(
        &self,
        plan: ExecutionPlan,
        platform: impl Into<String>,
    ) -> Result<ExecutionSession, SessionError> {
        let session = ExecutionSession::new(plan, platform);
        self.storage.save_session(&session).await?;
        log::info!(
            "created session {} for plan {} on '{}'",
            session.id,
            session.plan_id,
            session.platform
        );
        Ok(session)
    }

    /// Start a `pending` session and drive it until it completes, fails, or
    /// pauses on a user-input step. A retried session enters mid-plan from
    /// its seeded prefix.
    pub async fn execute_session(&self, id: &str) -> Result<SessionOutcome, SessionError> {
        let session = self.storage.load_session(id).await?;
        if session.status != SessionStatus::Pending {
            return Err(SessionError::InvalidStatus {
                operation: "execute",
                id: id.to_string(),
                actual: session.status,
            });
        }
        let session = self
            .storage
            .update_session(id, SessionUpdate::new().status(SessionStatus::Running))
            .await?;
        log::info!("session {} running", id);

        let options = ExecuteOptions {
            start_at: session.current_step_id,
            seed_results: session.step_results.clone(),
            seed_context: session.context.clone(),
        };
        self.run_to_rest(session, options).await
    }

    /// Feed collected values into a `waiting_input` session and drive it
    /// onward. The values are checked against the pending schema, recorded
    /// as the waiting step's result, and merged into the context before the
    /// walk restarts at the following step.
    pub async fn resume_session(
        &self,
        id: &str,
        values: HashMap<String, Value>,
    ) -> Result<SessionOutcome, SessionError> {
        let session = self.storage.load_session(id).await?;
        if session.status != SessionStatus::WaitingInput {
            return Err(SessionError::InvalidStatus {
                operation: "resume",
                id: id.to_string(),
                actual: session.status,
            });
        }
        let pending = session
            .pending_input
            .clone()
            .ok_or_else(|| SessionError::MissingPendingInput(id.to_string()))?;
        validate_values(&pending.schema, &values)?;

        let mut results = session.step_results.clone();
        results.push(StepResult::UserInput(UserInputResult::collected(
            pending.step_id,
            values,
            false,
        )));
        let context = ExecutionContext::from_results(&results).snapshot();
        let next_step = pending.step_id + 1;

        let update = SessionUpdate::new()
            .status(SessionStatus::Running)
            .current_step(next_step)
            .step_results(results.clone())
            .context(context.clone())
            .clear_pending_input();
        let session = self.storage.update_session(id, update).await?;
        log::info!("session {} resumed past step {}", id, pending.step_id);

        let options = ExecuteOptions {
            start_at: Some(next_step),
            seed_results: results,
            seed_context: context,
        };
        self.run_to_rest(session, options).await
    }

    /// Clone a `failed` session into a fresh `pending` one, linked through
    /// `parent_session_id`. With `from_step`, the results and context
    /// strictly before that step carry over and the new session enters
    /// mid-plan there; without it the rerun starts clean. The clone is
    /// returned unstarted; run it with [`SessionManager::execute_session`].
    pub async fn retry_session(
        &self,
        failed_id: &str,
        from_step: Option<StepId>,
    ) -> Result<ExecutionSession, SessionError> {
        let parent = self.storage.load_session(failed_id).await?;
        if parent.status != SessionStatus::Failed {
            return Err(SessionError::InvalidStatus {
                operation: "retry",
                id: failed_id.to_string(),
                actual: parent.status,
            });
        }

        let mut retry = ExecutionSession::new(parent.plan.clone(), parent.platform.clone());
        retry.base_plan_id = parent.base_plan_id.clone();
        retry.plan_version = parent.plan_version;
        retry.parent_session_id = Some(parent.id.clone());
        retry.retry_count = parent.retry_count + 1;

        if let Some(from) = from_step.filter(|&from| from > 0) {
            retry.step_results = parent
                .step_results
                .iter()
                .filter(|r| r.step_id() < from)
                .cloned()
                .collect();
            retry.context = ExecutionContext::from_results(&retry.step_results).snapshot();
            retry.current_step_id = Some(from);
        }

        self.storage.save_session(&retry).await?;
        log::info!(
            "session {} created as retry #{} of {} (from step {:?})",
            retry.id,
            retry.retry_count,
            parent.id,
            retry.current_step_id
        );
        Ok(retry)
    }

    /// Abort a session that has not yet reached a terminal status. Committed
    /// step results stay as they are; the session lands in `failed` with a
    /// cancellation error on its result.
    pub async fn cancel_session(&self, id: &str) -> Result<ExecutionSession, SessionError> {
        let session = self.storage.load_session(id).await?;
        if !is_valid_transition(session.status, SessionStatus::Failed) {
            return Err(SessionError::InvalidStatus {
                operation: "cancel",
                id: id.to_string(),
                actual: session.status,
            });
        }

        let now = Utc::now();
        let result = ExecutionResult {
            plan_id: session.plan.id.clone(),
            steps: session.step_results.clone(),
            final_result: None,
            success: false,
            error: Some("session cancelled before completion".to_string()),
            started_at: now,
            completed_at: now,
        };
        let update = SessionUpdate::new()
            .status(SessionStatus::Failed)
            .clear_pending_input()
            .execution_result(result);
        let updated = self.storage.update_session(id, update).await?;
        log::info!("session {} cancelled", id);
        Ok(updated)
    }

    pub async fn get_session(&self, id: &str) -> Result<ExecutionSession, SessionError> {
        Ok(self.storage.load_session(id).await?)
    }

    pub async fn get_session_status(&self, id: &str) -> Result<SessionStatus, SessionError> {
        Ok(self.storage.load_session(id).await?.status)
    }

    pub async fn list_sessions(
        &self,
        filter: &SessionFilter,
    ) -> Result<Vec<ExecutionSession>, SessionError> {
        Ok(self.storage.list_sessions(filter).await?)
    }

    /// Run the executor and persist whichever state the walk lands in.
    async fn run_to_rest(
        &self,
        session: ExecutionSession,
        options: ExecuteOptions,
    ) -> Result<SessionOutcome, SessionError> {
        match self
            .executor
            .execute_with_options(&session.plan, options)
            .await
        {
            Ok(ExecutionOutcome::Finished(result)) => {
                let status = if result.success {
                    SessionStatus::Completed
                } else {
                    SessionStatus::Failed
                };
                let context = ExecutionContext::from_results(&result.steps).snapshot();
                let update = SessionUpdate::new()
                    .status(status)
                    .step_results(result.steps.clone())
                    .context(context)
                    .clear_pending_input()
                    .execution_result(result);
                let updated = self.storage.update_session(&session.id, update).await?;
                log::info!("session {} finished as {}", session.id, status.as_str());
                Ok(if status == SessionStatus::Completed {
                    SessionOutcome::Completed(updated)
                } else {
                    SessionOutcome::Failed(updated)
                })
            }
            Ok(ExecutionOutcome::AwaitingInput { partial, pending }) => {
                let context = ExecutionContext::from_results(&partial.steps).snapshot();
                let waiting_at = pending.step_id;
                let update = SessionUpdate::new()
                    .status(SessionStatus::WaitingInput)
                    .current_step(waiting_at)
                    .step_results(partial.steps)
                    .context(context)
                    .pending_input(pending);
                let updated = self.storage.update_session(&session.id, update).await?;
                log::info!(
                    "session {} waiting for input at step {}",
                    session.id,
                    waiting_at
                );
                Ok(SessionOutcome::WaitingInput(updated))
            }
            // An unrunnable plan makes a failed session, not a thrown
            // error: callers read it the same way as a mid-plan failure.
            Err(validation) => {
                let now = Utc::now();
                let result = ExecutionResult {
                    plan_id: session.plan.id.clone(),
                    steps: session.step_results.clone(),
                    final_result: None,
                    success: false,
                    error: Some(validation.to_string()),
                    started_at: now,
                    completed_at: now,
                };
                let update = SessionUpdate::new()
                    .status(SessionStatus::Failed)
                    .clear_pending_input()
                    .execution_result(result);
                let updated = self.storage.update_session(&session.id, update).await?;
                log::warn!("session {} rejected: {}", session.id, validation);
                Ok(SessionOutcome::Failed(updated))
            }
        }
    }
}
