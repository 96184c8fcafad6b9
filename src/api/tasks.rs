//! Task control seam for the signed `/v1` routes.
//!
//! Scheduling and dispatch live outside this crate. The routes only need to
//! flip a task's enabled flag and drop log entries.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use tokio::sync::RwLock;
use tracing::info;

use crate::auth::BoxFuture;

pub type TaskId = i64;

pub trait TaskControl: Send + Sync {
    /// Returns false if the task does not exist.
    fn set_enabled(&self, id: TaskId, enabled: bool) -> BoxFuture<'_, Result<bool>>;

    /// Returns false if the log entry does not exist.
    fn remove_log(&self, id: TaskId) -> BoxFuture<'_, Result<bool>>;
}

/// In-process task table.
#[derive(Debug, Default)]
pub struct MemoryTaskControl {
    tasks: RwLock<HashMap<TaskId, bool>>,
    logs: RwLock<HashSet<TaskId>>,
}

impl MemoryTaskControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_task(&self, id: TaskId, enabled: bool) {
        self.tasks.write().await.insert(id, enabled);
    }

    pub async fn insert_log(&self, id: TaskId) {
        self.logs.write().await.insert(id);
    }

    pub async fn is_enabled(&self, id: TaskId) -> Option<bool> {
        self.tasks.read().await.get(&id).copied()
    }

    pub async fn has_log(&self, id: TaskId) -> bool {
        self.logs.read().await.contains(&id)
    }
}

impl TaskControl for MemoryTaskControl {
    fn set_enabled(&self, id: TaskId, enabled: bool) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async move {
            let mut tasks = self.tasks.write().await;
            match tasks.get_mut(&id) {
                Some(state) => {
                    *state = enabled;
                    info!("Task {} enabled={}", id, enabled);
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    fn remove_log(&self, id: TaskId) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async move { Ok(self.logs.write().await.remove(&id)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_enabled() {
        let tasks = MemoryTaskControl::new();
        tasks.insert_task(5, false).await;
        assert!(tasks.set_enabled(5, true).await.unwrap());
        assert_eq!(tasks.is_enabled(5).await, Some(true));
        assert!(!tasks.set_enabled(6, true).await.unwrap());
        assert_eq!(tasks.is_enabled(6).await, None);
    }

    #[tokio::test]
    async fn test_remove_log() {
        let tasks = MemoryTaskControl::new();
        tasks.insert_log(9).await;
        assert!(tasks.remove_log(9).await.unwrap());
        assert!(!tasks.has_log(9).await);
        assert!(!tasks.remove_log(9).await.unwrap());
    }
}
