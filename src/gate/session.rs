//! Session stage: resolve the `Auth-Token` header into the request identity.

use tracing::debug;

use super::{AUTH_TOKEN_HEADER, Decision, GateRequest, Rejection};
use crate::auth::policy::{is_machine_path, is_public_path};
use crate::auth::{RequestIdentity, token};

pub(super) fn check(req: &GateRequest<'_>, identity: &mut RequestIdentity) -> Decision {
    let Some(raw) = req.headers.get(AUTH_TOKEN_HEADER) else {
        return Decision::Continue;
    };
    if raw.is_empty() {
        return Decision::Continue;
    }

    let result = raw
        .to_str()
        .map_err(|_| token::TokenError::Malformed("header is not ASCII".to_string()))
        .and_then(|t| token::validate(t.trim(), &req.config.auth_secret));

    match result {
        Ok(claims) => {
            *identity = RequestIdentity::User(claims.identity());
            Decision::Continue
        }
        // A stale token must not lock anyone out of the login page.
        Err(err) if is_public_path(req.path) || is_machine_path(req.path) => {
            debug!("Ignoring invalid session token on {}: {}", req.path, err);
            Decision::Continue
        }
        Err(err) => {
            debug!("Rejected session token on {}: {}", req.path, err);
            Decision::Reject(Rejection::new(err.code(), err.to_string()))
        }
    }
}
