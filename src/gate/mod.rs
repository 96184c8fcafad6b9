//! The request gate: an ordered chain of decision stages in front of every
//! route.
//!
//! ```text
//! InstallGate -> IpFilter -> SessionAuth -> PathAuthorization -> handler
//!                                            (/v1 routes) -> SignatureAuth -> handler
//! ```
//!
//! Each stage returns a [`Decision`]. The runner stops at the first
//! `Reject` and renders it as the JSON envelope; the inner service is not
//! called for a rejected request. The configuration snapshot is read once
//! when the chain starts and the same `Arc` is used by every stage, including
//! the signature check on `/v1` routes.

mod install;
mod ip_filter;
mod session;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, Uri};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};

use crate::auth::signature::{self, SignatureOutcome, SignedParams};
use crate::auth::{PathDecision, RequestIdentity, authorize};
use crate::config::{ConfigSnapshot, ConfigStore};
use crate::response::{JsonResponse, ResponseCode};

pub use install::InstallState;
pub use ip_filter::client_ip;

/// Header carrying the session token.
pub const AUTH_TOKEN_HEADER: &str = "auth-token";

/// A stage's verdict on a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Hand the request to the next stage.
    Continue,
    /// Let the request through without running the remaining stages.
    Accept,
    Reject(Rejection),
}

/// Terminal answer for a rejected request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub code: ResponseCode,
    pub message: String,
}

impl Rejection {
    pub fn new(code: ResponseCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        JsonResponse::failure(self.code, self.message).into_response()
    }
}

/// What the stages get to see of a request.
#[derive(Debug)]
pub struct GateRequest<'a> {
    /// URI path without the query string.
    pub path: &'a str,
    pub headers: &'a HeaderMap,
    /// Transport-level peer, when the server was started with connect info.
    pub peer: Option<std::net::IpAddr>,
    pub installed: bool,
    pub config: &'a ConfigSnapshot,
}

type Stage = fn(&GateRequest<'_>, &mut RequestIdentity) -> Decision;

fn path_authorization(req: &GateRequest<'_>, identity: &mut RequestIdentity) -> Decision {
    match authorize(req.path, identity) {
        PathDecision::Allow | PathDecision::Deferred => Decision::Continue,
        PathDecision::Deny(code) => {
            debug!("{} denied access to {}", identity.display(), req.path);
            let message = match code {
                ResponseCode::AuthenticationRequired => "Authentication required",
                _ => "You are not allowed to access this page",
            };
            Decision::Reject(Rejection::new(code, message))
        }
    }
}

/// Fixed stage order.
const STAGES: [(&str, Stage); 4] = [
    ("install", install::check),
    ("ip_filter", ip_filter::check),
    ("session", session::check),
    ("path", path_authorization),
];

/// Run the chain and return the resolved identity, or the first rejection.
pub fn run_chain(req: &GateRequest<'_>) -> Result<RequestIdentity, Rejection> {
    let mut identity = RequestIdentity::Anonymous;
    for (name, stage) in STAGES {
        match stage(req, &mut identity) {
            Decision::Continue => {}
            Decision::Accept => {
                debug!("Stage `{}` accepted {}", name, req.path);
                break;
            }
            Decision::Reject(rejection) => {
                debug!(
                    "Stage `{}` rejected {} with code {}",
                    name, req.path, rejection.code
                );
                return Err(rejection);
            }
        }
    }
    Ok(identity)
}

/// Signed-request stage for `/v1` routes.
///
/// `path` is the decoded route path the client signed, see
/// [`signature::signed_path`].
pub fn check_signature(
    config: &ConfigSnapshot,
    path: &str,
    uri: &Uri,
    now: i64,
) -> Result<SignatureOutcome, Rejection> {
    let params = SignedParams::from_uri(uri);
    match signature::verify(&config.api, &params, path, now) {
        Ok(SignatureOutcome::ConfigurationMissing) => {
            warn!(
                "API signing is enabled but the key or secret is empty; {} passed unsigned",
                path
            );
            Ok(SignatureOutcome::ConfigurationMissing)
        }
        Ok(outcome) => Ok(outcome),
        Err(err) => {
            warn!("Rejected signed request to {}: {}", path, err);
            Err(Rejection::new(err.code(), err.to_string()))
        }
    }
}

/// Shared state of the gate middleware.
#[derive(Debug, Clone)]
pub struct Gate {
    config: Arc<ConfigStore>,
    install: Arc<InstallState>,
}

impl Gate {
    pub fn new(config: Arc<ConfigStore>, install: Arc<InstallState>) -> Self {
        Self { config, install }
    }

    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    pub fn install(&self) -> &Arc<InstallState> {
        &self.install
    }
}

/// Caller address as resolved by the IP filter, `None` when unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientAddr(pub Option<String>);

/// Middleware running the main chain. On success the resolved
/// [`RequestIdentity`], the caller's [`ClientAddr`] and the snapshot it was
/// checked against are stored in the request extensions.
pub async fn gate_layer(State(gate): State<Gate>, mut request: Request, next: Next) -> Response {
    let snapshot = gate.config.read();
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    let gate_request = GateRequest {
        path: request.uri().path(),
        headers: request.headers(),
        peer,
        installed: gate.install.is_installed(),
        config: &snapshot,
    };
    let outcome = run_chain(&gate_request);
    let client = ClientAddr(client_ip(&gate_request));

    match outcome {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            request.extensions_mut().insert(client);
            request.extensions_mut().insert(snapshot);
            next.run(request).await
        }
        Err(rejection) => rejection.into_response(),
    }
}

/// Middleware for the `/v1` route group. Must sit inside [`gate_layer`].
pub async fn signature_layer(
    State(gate): State<Gate>,
    mut request: Request,
    next: Next,
) -> Response {
    let snapshot = request
        .extensions()
        .get::<Arc<ConfigSnapshot>>()
        .cloned()
        .unwrap_or_else(|| gate.config.read());
    let now = chrono::Utc::now().timestamp();

    let path = signature::signed_path(request.uri()).into_owned();
    match check_signature(&snapshot, &path, request.uri(), now) {
        Ok(outcome) => {
            request.extensions_mut().insert(outcome);
            next.run(request).await
        }
        Err(rejection) => rejection.into_response(),
    }
}
