//! Credential store seam.
//!
//! The gate never reads user records itself; login and password changes go
//! through [`CredentialStore`]. [`MemoryCredentialStore`] backs local mode
//! and the tests.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use anyhow::Result;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::info;

use crate::auth::context::Identity;
use crate::types::{SubjectId, Username};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Account to create.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: Username,
    pub email: String,
    pub password: String,
    pub is_admin: bool,
}

/// Source of truth for console accounts.
///
/// Lookups may block on storage; the gate does not retry them.
pub trait CredentialStore: Send + Sync {
    /// Identity for a matching account; `None` on any mismatch.
    fn verify<'a>(
        &'a self,
        username: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, Result<Option<Identity>>>;

    /// Identity by id, `None` if unknown.
    fn lookup(&self, id: SubjectId) -> BoxFuture<'_, Result<Option<Identity>>>;

    fn create_user(&self, user: NewUser) -> BoxFuture<'_, Result<Identity>>;

    fn update_password<'a>(&'a self, id: SubjectId, password: &'a str)
    -> BoxFuture<'a, Result<()>>;

    /// Delete an account. Returns false if it did not exist.
    fn remove_user(&self, id: SubjectId) -> BoxFuture<'_, Result<bool>>;
}

#[derive(Debug, Clone)]
struct UserRecord {
    id: SubjectId,
    username: Username,
    salt: String,
    password_hash: String,
    is_admin: bool,
}

impl UserRecord {
    fn identity(&self) -> Identity {
        Identity::new(self.id, self.username.clone(), self.is_admin)
    }

    fn matches(&self, password: &str) -> bool {
        hash_password(password, &self.salt) == self.password_hash
    }
}

fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hasher.update(salt.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn new_salt() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[derive(Debug, Default)]
struct Accounts {
    next_id: SubjectId,
    by_id: HashMap<SubjectId, UserRecord>,
}

/// In-process credential store.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    accounts: RwLock<Accounts>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn verify<'a>(
        &'a self,
        username: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, Result<Option<Identity>>> {
        Box::pin(async move {
            let accounts = self.accounts.read().await;
            let found = accounts
                .by_id
                .values()
                .find(|r| r.username.as_str() == username)
                .filter(|r| r.matches(password))
                .map(UserRecord::identity);
            Ok(found)
        })
    }

    fn lookup(&self, id: SubjectId) -> BoxFuture<'_, Result<Option<Identity>>> {
        Box::pin(async move {
            let accounts = self.accounts.read().await;
            Ok(accounts
                .by_id
                .get(&id)
                .map(UserRecord::identity))
        })
    }

    fn create_user(&self, user: NewUser) -> BoxFuture<'_, Result<Identity>> {
        Box::pin(async move {
            let mut accounts = self.accounts.write().await;
            if accounts.by_id.values().any(|r| r.username == user.username) {
                return Err(anyhow::anyhow!("Username `{}` already exists", user.username));
            }
            accounts.next_id += 1;
            let salt = new_salt();
            let record = UserRecord {
                id: accounts.next_id,
                password_hash: hash_password(&user.password, &salt),
                salt,
                username: user.username,
                is_admin: user.is_admin,
            };
            let identity = record.identity();
            accounts.by_id.insert(record.id, record);
            info!(
                "Created user {} <{}> (admin: {})",
                identity.username(),
                user.email,
                identity.is_admin()
            );
            Ok(identity)
        })
    }

    fn update_password<'a>(
        &'a self,
        id: SubjectId,
        password: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut accounts = self.accounts.write().await;
            let record = accounts
                .by_id
                .get_mut(&id)
                .ok_or_else(|| anyhow::anyhow!("User {} not found", id))?;
            record.salt = new_salt();
            record.password_hash = hash_password(password, &record.salt);
            Ok(())
        })
    }

    fn remove_user(&self, id: SubjectId) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async move {
            let removed = self.accounts.write().await.by_id.remove(&id);
            if let Some(record) = &removed {
                info!("Removed user {}", record.username);
            }
            Ok(removed.is_some())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(name: &str, is_admin: bool) -> NewUser {
        NewUser {
            username: Username::new(name),
            email: format!("{}@example.com", name),
            password: "hunter22".to_string(),
            is_admin,
        }
    }

    #[tokio::test]
    async fn test_verify_matches_password() {
        let store = MemoryCredentialStore::new();
        let created = store.create_user(new_user("alice", false)).await.unwrap();

        let found = store.verify("alice", "hunter22").await.unwrap();
        assert_eq!(found, Some(created.clone()));
        assert!(store.verify("alice", "wrong").await.unwrap().is_none());
        assert!(store.verify("nobody", "hunter22").await.unwrap().is_none());
        assert_eq!(store.lookup(created.subject_id()).await.unwrap(), Some(created));
    }

    #[tokio::test]
    async fn test_ids_are_sequential_and_names_unique() {
        let store = MemoryCredentialStore::new();
        let a = store.create_user(new_user("a", true)).await.unwrap();
        let b = store.create_user(new_user("b", false)).await.unwrap();
        assert_eq!(a.subject_id(), 1);
        assert_eq!(b.subject_id(), 2);
        assert!(a.is_admin());
        assert!(store.create_user(new_user("a", false)).await.is_err());
    }

    #[tokio::test]
    async fn test_removed_user_frees_the_name() {
        let store = MemoryCredentialStore::new();
        let alice = store.create_user(new_user("alice", false)).await.unwrap();
        assert!(store.remove_user(alice.subject_id()).await.unwrap());

        assert!(store.verify("alice", "hunter22").await.unwrap().is_none());
        assert!(store.lookup(alice.subject_id()).await.unwrap().is_none());
        assert!(!store.remove_user(alice.subject_id()).await.unwrap());

        let again = store.create_user(new_user("alice", false)).await.unwrap();
        assert_ne!(again.subject_id(), alice.subject_id());
    }

    #[tokio::test]
    async fn test_update_password() {
        let store = MemoryCredentialStore::new();
        let alice = store.create_user(new_user("alice", false)).await.unwrap();
        store
            .update_password(alice.subject_id(), "new-password")
            .await
            .unwrap();

        assert!(store.verify("alice", "hunter22").await.unwrap().is_none());
        assert!(store.verify("alice", "new-password").await.unwrap().is_some());
        assert!(store.update_password(99, "x").await.is_err());
    }

    #[test]
    fn test_hash_password_is_salted() {
        assert_ne!(hash_password("pw", "a"), hash_password("pw", "b"));
        assert_eq!(hash_password("pw", "a"), hash_password("pw", "a"));
    }
}
