//! In-memory session storage for tests and single-process runs.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::session::types::{
    ExecutionSession, SessionFilter, SessionStorage, SessionUpdate, StorageError,
};

/// Map-backed storage. The write lock makes each update an atomic
/// read-modify-write, which is all the arbitration the storage contract
/// asks for.
#[derive(Default)]
pub struct InMemorySessionStorage {
    sessions: RwLock<HashMap<String, ExecutionSession>>,
}

impl InMemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStorage for InMemorySessionStorage {
    async fn save_session(&self, session: &ExecutionSession) -> Result<(), StorageError> {
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn load_session(&self, id: &str) -> Result<ExecutionSession, StorageError> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    async fn update_session(
        &self,
        id: &str,
        update: SessionUpdate,
    ) -> Result<ExecutionSession, StorageError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        session.apply(update);
        Ok(session.clone())
    }

    async fn list_sessions(
        &self,
        filter: &SessionFilter,
    ) -> Result<Vec<ExecutionSession>, StorageError> {
        let sessions = self.sessions.read().await;
        let mut matching: Vec<ExecutionSession> =
            sessions.values().filter(|s| filter.matches(s)).cloned().collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matching)
    }
}
