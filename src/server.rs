//! HTTP listener for the console.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::api::login_log::LoginLog;
use crate::api::tasks::TaskControl;
use crate::api::{AppState, create_router};
use crate::auth::CredentialStore;
use crate::config::ConfigStore;
use crate::gate::{Gate, InstallState};

/// Assemble the application state from its collaborators.
pub fn build_state(
    config: Arc<ConfigStore>,
    installed: bool,
    credentials: Arc<dyn CredentialStore>,
    tasks: Arc<dyn TaskControl>,
    login_log: Arc<dyn LoginLog>,
) -> AppState {
    AppState {
        gate: Gate::new(config, Arc::new(InstallState::new(installed))),
        credentials,
        tasks,
        login_log,
    }
}

/// Bind `bind` and serve the console until the process exits.
///
/// Peer addresses are recorded so the IP allow-list works without a proxy.
pub async fn serve(state: AppState, bind: &str) -> Result<()> {
    let installed = state.gate.install().is_installed();
    match state.gate.config().path() {
        Some(path) => tracing::info!("Settings file: {}", path.display()),
        None => tracing::warn!("Settings are in memory only and will not survive a restart"),
    }
    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {}", bind))?;

    if installed {
        tracing::info!("Console listening on http://{}", bind);
    } else {
        tracing::info!(
            "Console listening on http://{} (not installed, only /install is reachable)",
            bind
        );
    }

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
