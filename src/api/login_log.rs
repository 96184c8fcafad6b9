//! Record of successful console logins.

use std::collections::VecDeque;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::auth::BoxFuture;
use crate::types::Username;

/// Entries kept by [`MemoryLoginLog::new`].
pub const DEFAULT_LOGIN_LOG_CAPACITY: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginRecord {
    pub username: Username,
    /// Empty when the caller address could not be determined.
    pub ip: String,
    pub created: DateTime<Utc>,
}

/// One page of the log, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoginPage {
    pub total: usize,
    pub data: Vec<LoginRecord>,
}

pub trait LoginLog: Send + Sync {
    fn record(&self, entry: LoginRecord) -> BoxFuture<'_, Result<()>>;

    /// `page` starts at 1.
    fn page(&self, page: usize, page_size: usize) -> BoxFuture<'_, Result<LoginPage>>;
}

/// Bounded in-process log; the oldest entries are dropped first.
#[derive(Debug)]
pub struct MemoryLoginLog {
    capacity: usize,
    entries: RwLock<VecDeque<LoginRecord>>,
}

impl MemoryLoginLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_LOGIN_LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: RwLock::new(VecDeque::new()),
        }
    }
}

impl Default for MemoryLoginLog {
    fn default() -> Self {
        Self::new()
    }
}

impl LoginLog for MemoryLoginLog {
    fn record(&self, entry: LoginRecord) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut entries = self.entries.write().await;
            if entries.len() == self.capacity {
                entries.pop_back();
            }
            entries.push_front(entry);
            Ok(())
        })
    }

    fn page(&self, page: usize, page_size: usize) -> BoxFuture<'_, Result<LoginPage>> {
        Box::pin(async move {
            let entries = self.entries.read().await;
            let skip = page.saturating_sub(1).saturating_mul(page_size);
            Ok(LoginPage {
                total: entries.len(),
                data: entries.iter().skip(skip).take(page_size).cloned().collect(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str) -> LoginRecord {
        LoginRecord {
            username: Username::new(name),
            ip: "10.0.0.1".to_string(),
            created: Utc::now(),
        }
    }

    fn names(page: &LoginPage) -> Vec<&str> {
        page.data.iter().map(|r| r.username.as_str()).collect()
    }

    #[tokio::test]
    async fn test_newest_first_with_paging() {
        let log = MemoryLoginLog::new();
        for name in ["a", "b", "c"] {
            log.record(entry(name)).await.unwrap();
        }

        let first = log.page(1, 2).await.unwrap();
        assert_eq!(first.total, 3);
        assert_eq!(names(&first), vec!["c", "b"]);
        let second = log.page(2, 2).await.unwrap();
        assert_eq!(names(&second), vec!["a"]);
        assert!(log.page(3, 2).await.unwrap().data.is_empty());
    }

    #[tokio::test]
    async fn test_capacity_drops_oldest() {
        let log = MemoryLoginLog::with_capacity(2);
        for name in ["a", "b", "c"] {
            log.record(entry(name)).await.unwrap();
        }
        let all = log.page(1, 10).await.unwrap();
        assert_eq!(all.total, 2);
        assert_eq!(names(&all), vec!["c", "b"]);
    }
}
