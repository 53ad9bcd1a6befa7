//! File-backed session storage: one JSON file per session, grouped into
//! per-status subdirectories so operators can eyeball the store with `ls`.
//!
//! A status change moves the file between subdirectories. All records are
//! cached in memory at startup; files are the durable copy, the cache is
//! the fast path.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use tokio::sync::RwLock;

use crate::session::types::{
    ExecutionSession, SessionFilter, SessionStatus, SessionStorage, SessionUpdate, StorageError,
};

pub struct FileSessionStorage {
    base_path: PathBuf,
    cache: RwLock<HashMap<String, ExecutionSession>>,
}

impl FileSessionStorage {
    /// Opens (or initializes) a session store rooted at `base_path`,
    /// creating the per-status directories and warming the cache from any
    /// existing records.
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let base_path = base_path.into();
        let mut cache = HashMap::new();

        for status in SessionStatus::ALL {
            let dir = base_path.join(status.as_str());
            fs::create_dir_all(&dir)?;
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let raw = match fs::read_to_string(&path) {
                    Ok(raw) => raw,
                    Err(e) => {
                        log::warn!("skipping unreadable session file {}: {}", path.display(), e);
                        continue;
                    }
                };
                match serde_json::from_str::<ExecutionSession>(&raw) {
                    Ok(session) => {
                        cache.insert(session.id.clone(), session);
                    }
                    Err(e) => {
                        log::warn!("skipping unparseable session file {}: {}", path.display(), e);
                    }
                }
            }
        }

        log::info!(
            "file session storage at {} ({} sessions loaded)",
            base_path.display(),
            cache.len()
        );
        Ok(Self {
            base_path,
            cache: RwLock::new(cache),
        })
    }

    fn session_path(&self, status: SessionStatus, id: &str) -> PathBuf {
        self.base_path
            .join(status.as_str())
            .join(format!("{}.json", id))
    }

    fn write_record(&self, session: &ExecutionSession) -> Result<(), StorageError> {
        let path = self.session_path(session.status, &session.id);
        let json = serde_json::to_string_pretty(session)?;
        fs::write(&path, json)?;
        Ok(())
    }

    fn remove_record(&self, status: SessionStatus, id: &str) {
        let path = self.session_path(status, id);
        if let Err(e) = fs::remove_file(&path) {
            log::warn!("failed to remove stale session file {}: {}", path.display(), e);
        }
    }
}

#[async_trait]
impl SessionStorage for FileSessionStorage {
    async fn save_session(&self, session: &ExecutionSession) -> Result<(), StorageError> {
        let mut cache = self.cache.write().await;
        if let Some(existing) = cache.get(&session.id) {
            if existing.status != session.status {
                self.remove_record(existing.status, &session.id);
            }
        }
        self.write_record(session)?;
        cache.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn load_session(&self, id: &str) -> Result<ExecutionSession, StorageError> {
        self.cache
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
        let mut cache = self.cache.write().await;
        let session = cache
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        let old_status = session.status;
        session.apply(update);
        let updated = session.clone();

        self.write_record(&updated)?;
        if old_status != updated.status {
            self.remove_record(old_status, id);
        }
        Ok(updated)
    }

    async fn list_sessions(
        &self,
        filter: &SessionFilter,
    ) -> Result<Vec<ExecutionSession>, StorageError> {
        let cache = self.cache.read().await;
        let mut matching: Vec<ExecutionSession> =
            cache.values().filter(|s| filter.matches(s)).cloned().collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matching)
    }
}
