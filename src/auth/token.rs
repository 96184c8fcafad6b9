//! Session token codec.
//!
//! Tokens are HS256 JWTs signed with the snapshot's `auth_secret`. They are
//! self-contained: validity is decided by algorithm, signature and expiry
//! alone, so rotating the secret invalidates every outstanding token at once.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::auth::context::Identity;
use crate::response::ResponseCode;
use crate::types::{SessionToken, SubjectId, Username};

/// The only algorithm tokens are issued with or accepted under.
pub const TOKEN_ALGORITHM: Algorithm = Algorithm::HS256;

/// `alg` header value of [`TOKEN_ALGORITHM`].
const TOKEN_ALGORITHM_NAME: &str = "HS256";

/// Tokens expire this many seconds after issuance.
pub const TOKEN_LIFETIME_SECS: i64 = 4 * 60 * 60;

pub const TOKEN_ISSUER: &str = "console-gate";

/// Claim set carried inside a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub uid: SubjectId,
    pub username: String,
    pub is_admin: bool,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

impl Claims {
    fn for_identity(identity: &Identity, now: i64) -> Self {
        Self {
            uid: identity.subject_id(),
            username: identity.username().to_string(),
            is_admin: identity.is_admin(),
            iat: now,
            exp: now + TOKEN_LIFETIME_SECS,
            iss: TOKEN_ISSUER.to_string(),
        }
    }

    pub fn identity(&self) -> Identity {
        Identity::new(self.uid, Username::new(self.username.clone()), self.is_admin)
    }
}

/// Why a token was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Not a decodable token, or claims of the wrong shape.
    Malformed(String),
    /// Header declares something other than HS256.
    AlgorithmMismatch(String),
    /// Signed under a different secret, or tampered with.
    BadSignature,
    /// `exp` is not in the future.
    Expired,
    /// Signing failed while issuing.
    Encoding(String),
}

impl TokenError {
    pub fn code(&self) -> ResponseCode {
        match self {
            Self::Malformed(_) => ResponseCode::Malformed,
            Self::AlgorithmMismatch(_) => ResponseCode::AlgorithmMismatch,
            Self::BadSignature => ResponseCode::BadSignature,
            Self::Expired => ResponseCode::Expired,
            Self::Encoding(_) => ResponseCode::ServerError,
        }
    }
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(msg) => write!(f, "Malformed token: {}", msg),
            Self::AlgorithmMismatch(alg) => write!(f, "Unexpected token algorithm: {}", alg),
            Self::BadSignature => write!(f, "Token signature is invalid"),
            Self::Expired => write!(f, "Token has expired"),
            Self::Encoding(msg) => write!(f, "Failed to sign token: {}", msg),
        }
    }
}

impl std::error::Error for TokenError {}

/// Only `exp`, read before the signature is checked so an expired token
/// reports `Expired` whatever its signature.
#[derive(Deserialize)]
struct HeaderProbe {
    alg: String,
}

#[derive(Deserialize)]
struct ExpiryProbe {
    exp: i64,
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Issue a token for `identity`, valid for four hours from now.
pub fn issue(identity: &Identity, secret: &str) -> Result<SessionToken, TokenError> {
    issue_at(identity, secret, now_secs())
}

/// Issue a token as if the current time were `now`.
pub fn issue_at(identity: &Identity, secret: &str, now: i64) -> Result<SessionToken, TokenError> {
    let claims = Claims::for_identity(identity, now);
    encode(
        &Header::new(TOKEN_ALGORITHM),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map(SessionToken::new)
    .map_err(|e| TokenError::Encoding(e.to_string()))
}

/// Validate a token against the current secret.
pub fn validate(token: &str, secret: &str) -> Result<Claims, TokenError> {
    validate_at(token, secret, now_secs())
}

/// Validate a token as if the current time were `now`.
pub fn validate_at(token: &str, secret: &str, now: i64) -> Result<Claims, TokenError> {
    let (header, payload) = segments(token)?;

    // Read `alg` as a plain string so names the codec does not know (`none`)
    // are still reported as a mismatch.
    let alg = read_segment::<HeaderProbe>(header)?.alg;
    if alg != TOKEN_ALGORITHM_NAME {
        return Err(TokenError::AlgorithmMismatch(alg));
    }

    let expiry = read_segment::<ExpiryProbe>(payload)?.exp;
    if now >= expiry {
        return Err(TokenError::Expired);
    }

    let mut validation = Validation::new(TOKEN_ALGORITHM);
    validation.leeway = 0;
    validation.validate_exp = false;
    validation.required_spec_claims.clear();

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        ErrorKind::InvalidSignature => TokenError::BadSignature,
        ErrorKind::InvalidAlgorithm => TokenError::AlgorithmMismatch(alg.clone()),
        ErrorKind::ExpiredSignature => TokenError::Expired,
        _ => TokenError::Malformed(e.to_string()),
    })?;

    Ok(data.claims)
}

/// Header and payload segments of a compact JWT.
fn segments(token: &str) -> Result<(&str, &str), TokenError> {
    let mut parts = token.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(header), Some(payload), Some(_), None) => Ok((header, payload)),
        _ => Err(TokenError::Malformed("expected three segments".to_string())),
    }
}

/// Decode one segment without checking the signature.
fn read_segment<T: serde::de::DeserializeOwned>(segment: &str) -> Result<T, TokenError> {
    let raw = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| TokenError::Malformed(e.to_string()))?;
    serde_json::from_slice(&raw).map_err(|e| TokenError::Malformed(e.to_string()))
}
