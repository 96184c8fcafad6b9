//! The JSON envelope every console response is wrapped in.
//!
//! All outcomes, including pipeline rejections, use HTTP 200 and the
//! `{code, message, data}` shape. Clients branch on `code` only; `message` is
//! display text.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// Programmatic result codes carried in the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseCode {
    Success,
    /// Generic handler-level failure (validation, bad credentials).
    Failure,
    NotFound,
    AuthenticationRequired,
    ServerError,
    /// IP or path denial.
    Unauthorized,
    NotInstalled,
    Malformed,
    BadSignature,
    Expired,
    AlgorithmMismatch,
    ConfigurationMissing,
}

impl ResponseCode {
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
            Self::NotFound => 2,
            Self::AuthenticationRequired => 3,
            Self::ServerError => 4,
            Self::Unauthorized => 403,
            Self::NotInstalled => 801,
            Self::Malformed => 4001,
            Self::BadSignature => 4002,
            Self::Expired => 4003,
            Self::AlgorithmMismatch => 4004,
            Self::ConfigurationMissing => 4005,
        }
    }
}

impl Serialize for ResponseCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.as_i32())
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i32())
    }
}

/// `{code, message, data}`.
#[derive(Debug, Clone, Serialize)]
pub struct JsonResponse {
    pub code: ResponseCode,
    pub message: String,
    pub data: Value,
}

impl JsonResponse {
    pub fn success(message: impl Into<String>, data: Value) -> Self {
        Self {
            code: ResponseCode::Success,
            message: message.into(),
            data,
        }
    }

    pub fn failure(code: ResponseCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: Value::Null,
        }
    }
}

impl IntoResponse for JsonResponse {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Handler error, rendered as an envelope.
#[derive(Debug)]
pub enum ApiError {
    /// A user-facing failure with its code.
    Rejected(ResponseCode, String),
    /// Anything unexpected; details are logged, not returned.
    Internal(anyhow::Error),
}

impl ApiError {
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Rejected(ResponseCode::Failure, message.into())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Rejected(code, message) => JsonResponse::failure(code, message).into_response(),
            Self::Internal(err) => {
                tracing::error!("Request failed: {:#}", err);
                JsonResponse::failure(ResponseCode::ServerError, "Internal server error")
                    .into_response()
            }
        }
    }
}

pub type ApiResult = Result<JsonResponse, ApiError>;
