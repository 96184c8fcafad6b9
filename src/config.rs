//! Console settings and the shared configuration snapshot.
//!
//! Every request reads one immutable [`ConfigSnapshot`] through
//! [`ConfigStore::read`]. Administrative writes never mutate a snapshot in
//! place: they clone the current value, apply a [`ConfigPatch`] and swap the
//! shared `Arc`, so a request that already holds a snapshot keeps seeing a
//! consistent set of fields until it finishes.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::{env, fs};
use tracing::info;

use crate::auth::SignScheme;

/// Settings for the signed machine-to-machine API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    #[serde(default)]
    pub sign_enabled: bool,
    /// Digest used for `sign`; `md5` keeps existing clients working.
    #[serde(default)]
    pub sign_scheme: SignScheme,
    /// Reject `/v1` calls when signing is enabled but key or secret is blank,
    /// instead of letting them through.
    #[serde(default)]
    pub fail_closed: bool,
}

impl SigningConfig {
    /// Trimmed key and secret, only when both are present.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        let key = self.api_key.trim();
        let secret = self.api_secret.trim();
        if key.is_empty() || secret.is_empty() {
            None
        } else {
            Some((key, secret))
        }
    }
}

/// The full set of security settings a request is evaluated against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    /// HMAC secret for session tokens.
    pub auth_secret: String,
    /// Comma-separated client addresses; empty disables the IP filter.
    #[serde(default)]
    pub allow_ips: String,
    #[serde(default)]
    pub api: SigningConfig,
}

impl ConfigSnapshot {
    pub fn new(auth_secret: impl Into<String>) -> Self {
        Self {
            auth_secret: auth_secret.into(),
            allow_ips: String::new(),
            api: SigningConfig::default(),
        }
    }

    /// Parsed allow-list entries.
    pub fn allowed_ips(&self) -> Vec<&str> {
        self.allow_ips
            .split(',')
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .collect()
    }

    fn apply(&self, patch: &ConfigPatch) -> Self {
        let mut next = self.clone();
        if let Some(secret) = &patch.auth_secret {
            next.auth_secret = secret.clone();
        }
        if let Some(ips) = &patch.allow_ips {
            next.allow_ips = ips.trim().to_string();
        }
        if let Some(key) = &patch.api_key {
            next.api.api_key = key.trim().to_string();
        }
        if let Some(secret) = &patch.api_secret {
            next.api.api_secret = secret.trim().to_string();
        }
        if let Some(enabled) = patch.sign_enabled {
            next.api.sign_enabled = enabled;
        }
        if let Some(scheme) = patch.sign_scheme {
            next.api.sign_scheme = scheme;
        }
        if let Some(fail_closed) = patch.fail_closed {
            next.api.fail_closed = fail_closed;
        }
        next
    }
}

/// A partial update; `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigPatch {
    pub auth_secret: Option<String>,
    pub allow_ips: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub sign_enabled: Option<bool>,
    pub sign_scheme: Option<SignScheme>,
    pub fail_closed: Option<bool>,
}

/// Copy-on-write holder of the current snapshot.
#[derive(Debug)]
pub struct ConfigStore {
    current: RwLock<Arc<ConfigSnapshot>>,
    path: Option<PathBuf>,
}

impl ConfigStore {
    /// In-memory store that is never written to disk.
    pub fn new(snapshot: ConfigSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
            path: None,
        }
    }

    /// Store backed by a settings file; `persist` writes back to `path`.
    pub fn with_path(snapshot: ConfigSnapshot, path: impl Into<PathBuf>) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
            path: Some(path.into()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Current snapshot. The returned value never changes underneath the caller.
    pub fn read(&self) -> Arc<ConfigSnapshot> {
        // A panicking writer cannot leave a torn snapshot behind, only the old Arc.
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Apply `patch` to the current snapshot and publish the result.
    pub fn write(&self, patch: &ConfigPatch) -> Arc<ConfigSnapshot> {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        let next = Arc::new(guard.apply(patch));
        *guard = Arc::clone(&next);
        next
    }

    /// Publish a whole new snapshot.
    pub fn replace(&self, snapshot: ConfigSnapshot) -> Arc<ConfigSnapshot> {
        let next = Arc::new(snapshot);
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::clone(&next);
        next
    }

    /// Write the current snapshot to the settings file, if there is one.
    pub async fn persist(&self) -> anyhow::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let snapshot = self.read();
        let raw = serde_json::to_string_pretty(snapshot.as_ref())?;
        tokio::fs::write(path, raw).await?;
        info!("Settings written to {}", path.display());
        Ok(())
    }
}

/// Locate the settings file: `CONSOLE_GATE_CONFIG`, then `./console-gate.json`.
///
/// The path is returned even when the file does not exist yet; a missing
/// file means the console has not been installed.
pub fn resolve_config_path() -> PathBuf {
    if let Ok(p) = env::var("CONSOLE_GATE_CONFIG") {
        return PathBuf::from(p);
    }
    PathBuf::from("console-gate.json")
}

/// Replace `${NAME}` with the value of the environment variable `NAME`.
/// Unknown variables are left as written.
fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match env::var(name) {
                    Ok(val) => out.push_str(&val),
                    Err(_) => {
                        out.push_str("${");
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);

    out
}

fn expand_snapshot(mut cfg: ConfigSnapshot) -> ConfigSnapshot {
    cfg.auth_secret = expand_env_vars(&cfg.auth_secret);
    cfg.allow_ips = expand_env_vars(&cfg.allow_ips);
    cfg.api.api_key = expand_env_vars(&cfg.api.api_key);
    cfg.api.api_secret = expand_env_vars(&cfg.api.api_secret);
    cfg
}

/// Read a settings file from disk.
pub fn load_settings(path: &Path) -> anyhow::Result<ConfigSnapshot> {
    let raw = fs::read_to_string(path)?;
    let cfg: ConfigSnapshot = serde_json::from_str(&raw)?;
    if cfg.auth_secret.trim().is_empty() {
        return Err(anyhow::anyhow!(
            "`auth_secret` in {} must not be empty",
            path.display()
        ));
    }
    Ok(expand_snapshot(cfg))
}

/// Random secret used for fresh installs and secret rotation.
pub fn generate_auth_secret() -> String {
    format!(
        "{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    )
}
