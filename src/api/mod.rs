// HTTP routes of the console that sit behind the gate

pub mod login_log;
pub mod tasks;

use std::sync::Arc;

use axum::{
    Extension, Form, Router,
    extract::{
        Path, Query, State,
        rejection::{ExtensionRejection, FormRejection, PathRejection, QueryRejection},
    },
    middleware,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::auth::{AuthenticatedUser, CredentialStore, NewUser, RequestIdentity, SignScheme, token};
use crate::config::{ConfigPatch, ConfigSnapshot, generate_auth_secret};
use crate::gate::{ClientAddr, Gate, gate_layer, signature_layer};
use crate::response::{ApiError, ApiResult, JsonResponse, ResponseCode};
use crate::types::Username;
use login_log::{LoginLog, LoginRecord};
use tasks::{TaskControl, TaskId};

/// Everything a handler can reach.
#[derive(Clone)]
pub struct AppState {
    pub gate: Gate,
    pub credentials: Arc<dyn CredentialStore>,
    pub tasks: Arc<dyn TaskControl>,
    pub login_log: Arc<dyn LoginLog>,
}

/// Build the console router with the gate in front of every route.
pub fn create_router(state: AppState) -> Router {
    let signed = Router::new()
        .route("/v1/task/enable/{id}", post(enable_task))
        .route("/v1/task/disable/{id}", post(disable_task))
        .route("/v1/tasklog/remove/{id}", post(remove_task_log))
        .route_layer(middleware::from_fn_with_state(
            state.gate.clone(),
            signature_layer,
        ));

    Router::new()
        .route("/", get(index))
        .route("/install/status", get(install_status))
        .route("/install/store", post(install_store))
        .route("/user/login", post(login))
        .route("/user/editMyPassword", post(edit_my_password))
        .route("/system/api", get(api_settings))
        .route("/system/api/update", post(update_api_settings))
        .route("/system/secret/rotate", post(rotate_secret))
        .route("/system/login-log", get(login_log_page))
        .merge(signed)
        .method_not_allowed_fallback(not_found)
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.gate.clone(), gate_layer))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

fn form_failure(_: FormRejection) -> ApiError {
    ApiError::failure("Form validation failed, please check your input")
}

fn path_failure(_: PathRejection) -> ApiError {
    ApiError::failure("Invalid id")
}

async fn index(identity: RequestIdentity) -> ApiResult {
    Ok(JsonResponse::success(
        "",
        json!({ "name": "console-gate", "user": identity.identity().map(|i| i.username().to_string()) }),
    ))
}

async fn not_found() -> JsonResponse {
    JsonResponse::failure(ResponseCode::NotFound, "The page you requested does not exist")
}

// region install

async fn install_status(State(state): State<AppState>) -> JsonResponse {
    JsonResponse::success("", json!(state.gate.install().is_installed()))
}

#[derive(Debug, Deserialize)]
struct InstallForm {
    admin_username: String,
    admin_password: String,
    confirm_admin_password: String,
    admin_email: String,
}

impl InstallForm {
    fn validate(&self) -> Result<(), ApiError> {
        if self.admin_username.trim().chars().count() < 3 {
            return Err(ApiError::failure("Admin username needs at least 3 characters"));
        }
        if self.admin_password.chars().count() < 6 {
            return Err(ApiError::failure("Admin password needs at least 6 characters"));
        }
        if self.admin_password != self.confirm_admin_password {
            return Err(ApiError::failure("The two passwords do not match"));
        }
        let email = self.admin_email.trim();
        if email.len() > 50 || !email.contains('@') {
            return Err(ApiError::failure("Admin email is invalid"));
        }
        Ok(())
    }
}

async fn install_store(
    State(state): State<AppState>,
    form: Result<Form<InstallForm>, FormRejection>,
) -> ApiResult {
    let Form(form) = form.map_err(form_failure)?;
    form.validate()?;

    let install = state.gate.install();
    if !install.begin() {
        return Err(ApiError::failure(
            "The console is already installed or being installed",
        ));
    }
    match run_install(&state, &form).await {
        Ok(()) => {
            install.finish();
            info!("Console installed, admin account `{}`", form.admin_username.trim());
            Ok(JsonResponse::success("Installed", serde_json::Value::Null))
        }
        Err(err) => {
            install.abort();
            Err(err)
        }
    }
}

/// Create the admin and persist a fresh secret. If persisting fails, both
/// the account and the secret are rolled back so the install can be retried.
async fn run_install(state: &AppState, form: &InstallForm) -> Result<(), ApiError> {
    let admin = state
        .credentials
        .create_user(NewUser {
            username: Username::new(form.admin_username.trim()),
            email: form.admin_email.trim().to_string(),
            password: form.admin_password.clone(),
            is_admin: true,
        })
        .await?;

    let config = state.gate.config();
    let previous = config.read();
    config.write(&ConfigPatch {
        auth_secret: Some(generate_auth_secret()),
        ..Default::default()
    });
    if let Err(err) = config.persist().await {
        config.replace(ConfigSnapshot::clone(&previous));
        if let Err(e) = state.credentials.remove_user(admin.subject_id()).await {
            warn!(
                "Failed to roll back admin account `{}`: {:#}",
                admin.username(),
                e
            );
        }
        return Err(err.into());
    }
    Ok(())
}

// endregion

// region user

#[derive(Debug, Default, Deserialize)]
struct LoginForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

/// Trimmed `primary`, or trimmed `fallback` when `primary` is blank.
fn non_blank<'a>(primary: &'a str, fallback: &'a str) -> &'a str {
    match primary.trim() {
        "" => fallback.trim(),
        value => value,
    }
}

/// Credentials may come in the form body or in the query string.
async fn login(
    State(state): State<AppState>,
    client: Result<Extension<ClientAddr>, ExtensionRejection>,
    query: Result<Query<LoginForm>, QueryRejection>,
    form: Result<Form<LoginForm>, FormRejection>,
) -> ApiResult {
    let form = form.map(|Form(form)| form).unwrap_or_default();
    let query = query.map(|Query(query)| query).unwrap_or_default();
    let username = non_blank(&form.username, &query.username);
    let password = non_blank(&form.password, &query.password);
    if username.is_empty() || password.is_empty() {
        return Err(ApiError::failure("Username and password are required"));
    }

    let Some(identity) = state.credentials.verify(username, password).await? else {
        return Err(ApiError::failure("Incorrect username or password"));
    };

    let entry = LoginRecord {
        username: identity.username().clone(),
        ip: client
            .ok()
            .and_then(|Extension(ClientAddr(ip))| ip)
            .unwrap_or_default(),
        created: chrono::Utc::now(),
    };
    if let Err(e) = state.login_log.record(entry).await {
        error!("Failed to record login of {}: {:#}", identity.username(), e);
    }

    let snapshot = state.gate.config().read();
    let token = token::issue(&identity, &snapshot.auth_secret).map_err(|e| {
        error!("Failed to issue session token: {}", e);
        ApiError::Rejected(
            ResponseCode::AuthenticationRequired,
            "Authentication failed".to_string(),
        )
    })?;
    info!("User {} logged in", identity.username());

    Ok(JsonResponse::success(
        "",
        json!({
            "token": token,
            "uid": identity.subject_id(),
            "username": identity.username(),
            "is_admin": identity.is_admin(),
        }),
    ))
}

#[derive(Debug, Deserialize)]
struct EditMyPasswordForm {
    #[serde(default)]
    old_password: String,
    #[serde(default)]
    new_password: String,
    #[serde(default)]
    confirm_new_password: String,
}

async fn edit_my_password(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    form: Result<Form<EditMyPasswordForm>, FormRejection>,
) -> ApiResult {
    let Form(form) = form.map_err(form_failure)?;
    let old = form.old_password.trim();
    let new = form.new_password.trim();
    let confirm = form.confirm_new_password.trim();
    if old.is_empty() || new.is_empty() || confirm.is_empty() {
        return Err(ApiError::failure("Old and new passwords are required"));
    }
    if new != confirm {
        return Err(ApiError::failure("The two passwords do not match"));
    }
    if old == new {
        return Err(ApiError::failure("The new password must differ from the old one"));
    }
    if state
        .credentials
        .verify(user.username().as_str(), old)
        .await?
        .is_none()
    {
        return Err(ApiError::failure("The old password is incorrect"));
    }

    state
        .credentials
        .update_password(user.subject_id(), new)
        .await?;
    info!("User {} changed their password", user.username());

    Ok(JsonResponse::success("Password updated", serde_json::Value::Null))
}

// endregion

// region system

async fn api_settings(State(state): State<AppState>) -> JsonResponse {
    let snapshot = state.gate.config().read();
    JsonResponse::success(
        "",
        json!({
            "api_key": snapshot.api.api_key,
            "api_secret_set": !snapshot.api.api_secret.trim().is_empty(),
            "sign_enabled": snapshot.api.sign_enabled,
            "sign_scheme": snapshot.api.sign_scheme,
            "fail_closed": snapshot.api.fail_closed,
            "allow_ips": snapshot.allow_ips,
        }),
    )
}

#[derive(Debug, Deserialize)]
struct ApiSettingsForm {
    api_key: Option<String>,
    api_secret: Option<String>,
    sign_enabled: Option<bool>,
    sign_scheme: Option<SignScheme>,
    fail_closed: Option<bool>,
    allow_ips: Option<String>,
}

async fn update_api_settings(
    State(state): State<AppState>,
    identity: RequestIdentity,
    form: Result<Form<ApiSettingsForm>, FormRejection>,
) -> ApiResult {
    let Form(form) = form.map_err(form_failure)?;
    let patch = ConfigPatch {
        auth_secret: None,
        allow_ips: form.allow_ips,
        api_key: form.api_key,
        api_secret: form.api_secret,
        sign_enabled: form.sign_enabled,
        sign_scheme: form.sign_scheme,
        fail_closed: form.fail_closed,
    };

    let config = state.gate.config();
    let next = config.write(&patch);
    config.persist().await?;
    info!(
        "{} updated API settings (sign_enabled={}, scheme={:?})",
        identity.display(),
        next.api.sign_enabled,
        next.api.sign_scheme
    );

    Ok(JsonResponse::success("Saved", serde_json::Value::Null))
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    #[serde(default = "default_page")]
    page: usize,
    #[serde(default = "default_page_size")]
    page_size: usize,
}

fn default_page() -> usize {
    1
}

fn default_page_size() -> usize {
    20
}

async fn login_log_page(
    State(state): State<AppState>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> ApiResult {
    let Query(query) = query.map_err(|_| ApiError::failure("Invalid page parameters"))?;
    let page = state
        .login_log
        .page(query.page.max(1), query.page_size.clamp(1, 100))
        .await?;
    Ok(JsonResponse::success("", json!(page)))
}

async fn rotate_secret(State(state): State<AppState>, identity: RequestIdentity) -> ApiResult {
    let config = state.gate.config();
    config.write(&ConfigPatch {
        auth_secret: Some(generate_auth_secret()),
        ..Default::default()
    });
    config.persist().await?;
    info!(
        "{} rotated the session secret; all sessions are now invalid",
        identity.display()
    );

    Ok(JsonResponse::success("Secret rotated", serde_json::Value::Null))
}

// endregion

// region v1

async fn change_task(tasks: &dyn TaskControl, id: TaskId, enabled: bool) -> ApiResult {
    if !tasks.set_enabled(id, enabled).await? {
        return Err(ApiError::failure(format!("Task {} not found", id)));
    }
    Ok(JsonResponse::success("", serde_json::Value::Null))
}

async fn enable_task(
    State(state): State<AppState>,
    id: Result<Path<TaskId>, PathRejection>,
) -> ApiResult {
    let Path(id) = id.map_err(path_failure)?;
    change_task(state.tasks.as_ref(), id, true).await
}

async fn disable_task(
    State(state): State<AppState>,
    id: Result<Path<TaskId>, PathRejection>,
) -> ApiResult {
    let Path(id) = id.map_err(path_failure)?;
    change_task(state.tasks.as_ref(), id, false).await
}

async fn remove_task_log(
    State(state): State<AppState>,
    id: Result<Path<TaskId>, PathRejection>,
) -> ApiResult {
    let Path(id) = id.map_err(path_failure)?;
    if !state.tasks.remove_log(id).await? {
        return Err(ApiError::failure(format!("Task log {} not found", id)));
    }
    Ok(JsonResponse::success("", serde_json::Value::Null))
}

// endregion
