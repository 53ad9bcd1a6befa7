//! Session records, the status machine, and the storage seam.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

use crate::types::{ExecutionPlan, ExecutionResult, PendingInput, StepId, StepResult};

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Running,
    WaitingInput,
    Completed,
    Failed,
}

impl SessionStatus {
    pub const ALL: [SessionStatus; 5] = [
        SessionStatus::Pending,
        SessionStatus::Running,
        SessionStatus::WaitingInput,
        SessionStatus::Completed,
        SessionStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Running => "running",
            SessionStatus::WaitingInput => "waiting_input",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }

    /// Terminal sessions accept no further transitions. Failed sessions can
    /// still be used as the source of a retry, which creates a new session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }
}

/// The full transition relation. Every status change a manager performs
/// must be an edge here.
pub fn is_valid_transition(from: SessionStatus, to: SessionStatus) -> bool {
    use SessionStatus::*;
    matches!(
        (from, to),
        (Pending, Running)
            | (Pending, Failed)
            | (Running, Completed)
            | (Running, Failed)
            | (Running, WaitingInput)
            | (WaitingInput, Running)
            | (WaitingInput, Failed)
    )
}

/// One tracked run of a plan, durable across pauses and process restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSession {
    pub id: String,
    pub plan_id: String,
    /// Root of the retry chain; equals `plan_id` for first runs.
    pub base_plan_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_version: Option<u32>,
    pub plan: ExecutionPlan,
    pub status: SessionStatus,
    /// Next step to run when the session is (re)started mid-plan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step_id: Option<StepId>,
    #[serde(default)]
    pub step_results: Vec<StepResult>,
    /// Flat context snapshot, keyed by stepId strings.
    #[serde(default)]
    pub context: HashMap<String, Value>,
    /// Set only while `waiting_input`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_input: Option<PendingInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_result: Option<ExecutionResult>,
    /// Set only on sessions created by a retry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    /// Where the session was started from (chat surface, API, test rig).
    pub platform: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionSession {
    pub fn new(plan: ExecutionPlan, platform: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: format!("session-{}", uuid::Uuid::new_v4()),
            plan_id: plan.id.clone(),
            base_plan_id: plan.id.clone(),
            plan_version: None,
            plan,
            status: SessionStatus::Pending,
            current_step_id: None,
            step_results: Vec::new(),
            context: HashMap::new(),
            pending_input: None,
            execution_result: None,
            parent_session_id: None,
            retry_count: 0,
            platform: platform.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a partial update and bump `updated_at`.
    pub fn apply(&mut self, update: SessionUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(current) = update.current_step_id {
            self.current_step_id = current;
        }
        if let Some(results) = update.step_results {
            self.step_results = results;
        }
        if let Some(context) = update.context {
            self.context = context;
        }
        if let Some(pending) = update.pending_input {
            self.pending_input = pending;
        }
        if let Some(result) = update.execution_result {
            self.execution_result = Some(result);
        }
        self.updated_at = Utc::now();
    }
}

/// Partial update applied atomically by the storage layer. Unset fields
/// keep their stored values; the doubled options distinguish "leave alone"
/// from "set to none".
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub status: Option<SessionStatus>,
    pub current_step_id: Option<Option<StepId>>,
    pub step_results: Option<Vec<StepResult>>,
    pub context: Option<HashMap<String, Value>>,
    pub pending_input: Option<Option<PendingInput>>,
    pub execution_result: Option<ExecutionResult>,
}

impl SessionUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: SessionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn current_step(mut self, step_id: StepId) -> Self {
        self.current_step_id = Some(Some(step_id));
        self
    }

    pub fn step_results(mut self, results: Vec<StepResult>) -> Self {
        self.step_results = Some(results);
        self
    }

    pub fn context(mut self, context: HashMap<String, Value>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn pending_input(mut self, pending: PendingInput) -> Self {
        self.pending_input = Some(Some(pending));
        self
    }

    pub fn clear_pending_input(mut self) -> Self {
        self.pending_input = Some(None);
        self
    }

    pub fn execution_result(mut self, result: ExecutionResult) -> Self {
        self.execution_result = Some(result);
        self
    }
}

/// Conjunctive filter for listing sessions.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub status: Option<SessionStatus>,
    pub platform: Option<String>,
    pub base_plan_id: Option<String>,
}

impl SessionFilter {
    pub fn with_status(mut self, status: SessionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    pub fn with_base_plan(mut self, base_plan_id: impl Into<String>) -> Self {
        self.base_plan_id = Some(base_plan_id.into());
        self
    }

    pub fn matches(&self, session: &ExecutionSession) -> bool {
        if let Some(status) = self.status {
            if session.status != status {
                return false;
            }
        }
        if let Some(platform) = &self.platform {
            if &session.platform != platform {
                return false;
            }
        }
        if let Some(base) = &self.base_plan_id {
            if &session.base_plan_id != base {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("session '{0}' not found")]
    NotFound(String),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Keyed record store for sessions with partial-update semantics.
///
/// `update_session` is a read-modify-write; implementations must arbitrate
/// concurrent transitions against the same id (a per-store lock is enough
/// for the in-process backends here).
#[async_trait]
pub trait SessionStorage: Send + Sync {
    async fn save_session(&self, session: &ExecutionSession) -> Result<(), StorageError>;

    async fn load_session(&self, id: &str) -> Result<ExecutionSession, StorageError>;

    async fn update_session(
        &self,
        id: &str,
        update: SessionUpdate,
    ) -> Result<ExecutionSession, StorageError>;

    async fn list_sessions(
        &self,
        filter: &SessionFilter,
    ) -> Result<Vec<ExecutionSession>, StorageError>;
}
