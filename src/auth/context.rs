//! Request-scoped identity.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use serde::{Deserialize, Serialize};

use crate::response::{ApiError, ResponseCode};
use crate::types::{SubjectId, Username};

/// A signed-in console user.
///
/// Only built by the credential store (at login) or by the token codec (from
/// a verified token), never field by field from request input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    subject_id: SubjectId,
    username: Username,
    is_admin: bool,
}

impl Identity {
    pub fn new(subject_id: SubjectId, username: Username, is_admin: bool) -> Self {
        Self {
            subject_id,
            username,
            is_admin,
        }
    }

    pub fn subject_id(&self) -> SubjectId {
        self.subject_id
    }

    pub fn username(&self) -> &Username {
        &self.username
    }

    pub fn is_admin(&self) -> bool {
        self.is_admin
    }
}

/// What the session stage resolved for this request.
///
/// Inserted into the request extensions by the gate before any route
/// handler runs. Handlers read it and trust that path rules already passed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RequestIdentity {
    #[default]
    Anonymous,
    User(Identity),
}

impl RequestIdentity {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Self::User(identity) if identity.is_admin())
    }

    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Self::User(identity) => Some(identity),
            Self::Anonymous => None,
        }
    }

    /// Name for log lines.
    pub fn display(&self) -> &str {
        match self {
            Self::User(identity) => identity.username().as_str(),
            Self::Anonymous => "anonymous",
        }
    }
}

impl<S: Send + Sync> FromRequestParts<S> for RequestIdentity {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // Missing means the route was mounted outside the gate.
        parts
            .extensions
            .get::<RequestIdentity>()
            .cloned()
            .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("route is not behind the gate")))
    }
}

/// Extractor for handlers that act on the caller's own account.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub Identity);

impl<S: Send + Sync> FromRequestParts<S> for AuthenticatedUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match RequestIdentity::from_request_parts(parts, state).await? {
            RequestIdentity::User(identity) => Ok(Self(identity)),
            RequestIdentity::Anonymous => Err(ApiError::Rejected(
                ResponseCode::AuthenticationRequired,
                "Authentication required".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admin() -> Identity {
        Identity::new(1, Username::new("root"), true)
    }

    #[test]
    fn test_request_identity_defaults_to_anonymous() {
        let ctx = RequestIdentity::default();
        assert!(ctx.is_anonymous());
        assert!(!ctx.is_admin());
        assert!(ctx.identity().is_none());
        assert_eq!(ctx.display(), "anonymous");
    }

    #[test]
    fn test_request_identity_user() {
        let ctx = RequestIdentity::User(admin());
        assert!(!ctx.is_anonymous());
        assert!(ctx.is_admin());
        assert_eq!(ctx.identity().map(Identity::subject_id), Some(1));
        assert_eq!(ctx.display(), "root");

        let plain = RequestIdentity::User(Identity::new(2, Username::new("bob"), false));
        assert!(!plain.is_admin());
    }

    #[tokio::test]
    async fn test_extractor_reads_extension() {
        let (mut parts, _) = axum::http::Request::new(()).into_parts();
        parts.extensions.insert(RequestIdentity::User(admin()));

        let ctx = RequestIdentity::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(ctx.identity(), Some(&admin()));
        let AuthenticatedUser(user) = AuthenticatedUser::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert_eq!(user, admin());
    }

    #[tokio::test]
    async fn test_authenticated_user_rejects_anonymous() {
        let (mut parts, _) = axum::http::Request::new(()).into_parts();
        parts.extensions.insert(RequestIdentity::Anonymous);

        let err = AuthenticatedUser::from_request_parts(&mut parts, &())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ApiError::Rejected(ResponseCode::AuthenticationRequired, _)
        ));
    }

    #[tokio::test]
    async fn test_extractor_fails_closed_without_gate() {
        let (mut parts, _) = axum::http::Request::new(()).into_parts();
        let err = RequestIdentity::from_request_parts(&mut parts, &())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Internal(_)));
    }
}
