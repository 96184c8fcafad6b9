//! Client address allow-list.
//!
//! Behind a reverse proxy the peer address is the proxy's, so the proxy has
//! to forward the client address in `X-Real-IP` (or `X-Forwarded-For`).

use axum::http::HeaderMap;
use tracing::warn;

use super::{Decision, GateRequest, Rejection};
use crate::auth::RequestIdentity;
use crate::response::ResponseCode;

pub const REAL_IP_HEADER: &str = "x-real-ip";
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Caller address: `X-Real-IP`, then the first `X-Forwarded-For` hop, then
/// the transport peer.
pub fn client_ip(req: &GateRequest<'_>) -> Option<String> {
    if let Some(ip) = header_str(req.headers, REAL_IP_HEADER) {
        return Some(ip.to_string());
    }
    if let Some(first) = header_str(req.headers, FORWARDED_FOR_HEADER)
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return Some(first.to_string());
    }
    req.peer.map(|ip| ip.to_string())
}

pub(super) fn check(req: &GateRequest<'_>, _identity: &mut RequestIdentity) -> Decision {
    let allowed = req.config.allowed_ips();
    if allowed.is_empty() {
        return Decision::Continue;
    }
    let client = client_ip(req);
    if let Some(ip) = client.as_deref()
        && allowed.contains(&ip)
    {
        return Decision::Continue;
    }
    warn!(
        "Rejected request from address not on the allow-list: {}",
        client.as_deref().unwrap_or("<unknown>")
    );
    Decision::Reject(Rejection::new(
        ResponseCode::Unauthorized,
        "You are not allowed to access this console",
    ))
}
