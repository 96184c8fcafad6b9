//! Path-based role authorization.

use crate::auth::context::RequestIdentity;
use crate::response::ResponseCode;

/// Route group that authenticates with signed requests instead.
pub const MACHINE_PREFIX: &str = "/v1";

/// Reachable without a session.
pub const PUBLIC_PATHS: &[&str] = &["", "/user/login", "/install/status"];

/// Reachable by any signed-in user; admins are not limited to this list.
pub const MEMBER_PATHS: &[&str] = &[
    "",
    "/install/status",
    "/task",
    "/task/log",
    "/host",
    "/host/all",
    "/user/login",
    "/user/editMyPassword",
];

/// Trim trailing slashes, so `/` becomes `""` and `/task/` becomes `/task`.
pub fn normalize_path(path: &str) -> &str {
    path.trim_end_matches('/')
}

pub fn is_machine_path(path: &str) -> bool {
    normalize_path(path).starts_with(MACHINE_PREFIX)
}

pub fn is_public_path(path: &str) -> bool {
    PUBLIC_PATHS.contains(&normalize_path(path))
}

/// Outcome of [`authorize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathDecision {
    Allow,
    /// Not ours to decide; the signature check covers this path.
    Deferred,
    Deny(ResponseCode),
}

/// Decide whether `identity` may reach `path`. First matching rule wins:
/// machine prefix, anonymous, admin, member.
pub fn authorize(path: &str, identity: &RequestIdentity) -> PathDecision {
    let path = normalize_path(path);
    if path.starts_with(MACHINE_PREFIX) {
        return PathDecision::Deferred;
    }
    match identity {
        RequestIdentity::Anonymous if PUBLIC_PATHS.contains(&path) => PathDecision::Allow,
        RequestIdentity::Anonymous => PathDecision::Deny(ResponseCode::AuthenticationRequired),
        RequestIdentity::User(user) if user.is_admin() => PathDecision::Allow,
        RequestIdentity::User(_) if MEMBER_PATHS.contains(&path) => PathDecision::Allow,
        RequestIdentity::User(_) => PathDecision::Deny(ResponseCode::Unauthorized),
    }
}
