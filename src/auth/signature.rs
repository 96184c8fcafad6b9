//! Signed-request check for the machine-to-machine (`/v1`) routes.
//!
//! A caller sends `time` (unix seconds) and `sign` as query parameters, where
//! `sign` is the lowercase hex digest of
//! `api_key + time + path + api_secret`, concatenated without separators.
//!
//! The default scheme is MD5 with a plain string comparison. That is weak on
//! both counts and is kept only because deployed clients compute it; the
//! `sha256` scheme signs the same canonical string with SHA-256 and compares
//! in constant time.

use std::borrow::Cow;
use std::fmt;

use axum::extract::Query;
use axum::http::Uri;
use md5::Md5;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::config::SigningConfig;
use crate::response::ResponseCode;

/// A signed request is rejected once its `time` is this many seconds behind
/// the server clock. There is no bound on timestamps in the future.
pub const REPLAY_WINDOW_SECS: i64 = 1800;

/// Digest used to sign `/v1` requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignScheme {
    /// Legacy wire format.
    #[default]
    Md5,
    Sha256,
}

impl SignScheme {
    pub fn digest(self, canonical: &str) -> String {
        match self {
            Self::Md5 => format!("{:x}", Md5::digest(canonical.as_bytes())),
            Self::Sha256 => format!("{:x}", Sha256::digest(canonical.as_bytes())),
        }
    }

    fn matches(self, expected: &str, provided: &str) -> bool {
        match self {
            Self::Md5 => expected == provided,
            Self::Sha256 => bool::from(expected.as_bytes().ct_eq(provided.as_bytes())),
        }
    }
}

/// Why a signed request was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    /// `time` missing or not a positive integer, or `sign` missing.
    Malformed(&'static str),
    /// `time` is older than the replay window.
    Expired { time: i64, now: i64 },
    BadSignature,
    /// Signing is enabled but key or secret is blank, and the config asks
    /// for such requests to be refused.
    ConfigurationMissing,
}

impl SignatureError {
    pub fn code(&self) -> ResponseCode {
        match self {
            Self::Malformed(_) => ResponseCode::Malformed,
            Self::Expired { .. } => ResponseCode::Expired,
            Self::BadSignature => ResponseCode::BadSignature,
            Self::ConfigurationMissing => ResponseCode::ConfigurationMissing,
        }
    }
}

impl fmt::Display for SignatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(msg) => write!(f, "{}", msg),
            Self::Expired { time, now } => {
                write!(f, "Request time {} is outside the window (server time {})", time, now)
            }
            Self::BadSignature => write!(f, "Signature verification failed"),
            Self::ConfigurationMissing => {
                write!(f, "Configure the API key and secret before using the API")
            }
        }
    }
}

impl std::error::Error for SignatureError {}

/// Result of a check that did not reject the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureOutcome {
    /// Signing is switched off.
    Disabled,
    /// Signing is on but key or secret is blank; the request was let through.
    ConfigurationMissing,
    Verified,
}

/// Query parameters of a signed request, as received.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignedParams {
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub sign: Option<String>,
}

impl SignedParams {
    /// Read `time` and `sign` from the request URI; anything unparsable
    /// counts as absent.
    pub fn from_uri(uri: &Uri) -> Self {
        Query::<SignedParams>::try_from_uri(uri)
            .map(|Query(params)| params)
            .unwrap_or_default()
    }
}

/// Path a client signs: the request path with percent-escapes decoded, so
/// `/v1/task/enable/a%20b` is signed as `/v1/task/enable/a b`.
pub fn signed_path(uri: &Uri) -> Cow<'_, str> {
    percent_decode_str(uri.path()).decode_utf8_lossy()
}

/// `api_key + time + path + api_secret`.
pub fn canonical_string(api_key: &str, time: i64, path: &str, api_secret: &str) -> String {
    format!("{}{}{}{}", api_key, time, path, api_secret)
}

/// Signature a client should send for `path` at `time`.
pub fn sign_request(config: &SigningConfig, time: i64, path: &str) -> Option<String> {
    let (key, secret) = config.credentials()?;
    Some(
        config
            .sign_scheme
            .digest(&canonical_string(key, time, path.trim(), secret)),
    )
}

/// Check a `/v1` request against the signing config.
///
/// `path` is the route path the client signed (without query string).
pub fn verify(
    config: &SigningConfig,
    params: &SignedParams,
    path: &str,
    now: i64,
) -> Result<SignatureOutcome, SignatureError> {
    if !config.sign_enabled {
        return Ok(SignatureOutcome::Disabled);
    }
    let Some((key, secret)) = config.credentials() else {
        if config.fail_closed {
            return Err(SignatureError::ConfigurationMissing);
        }
        return Ok(SignatureOutcome::ConfigurationMissing);
    };

    let time = params
        .time
        .as_deref()
        .and_then(|t| t.trim().parse::<i64>().ok())
        .filter(|t| *t > 0)
        .ok_or(SignatureError::Malformed("Parameter `time` is required"))?;
    if time < now - REPLAY_WINDOW_SECS {
        return Err(SignatureError::Expired { time, now });
    }

    let sign = params
        .sign
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(SignatureError::Malformed("Parameter `sign` is required"))?;

    let expected = config
        .sign_scheme
        .digest(&canonical_string(key, time, path.trim(), secret));
    if !config.sign_scheme.matches(&expected, sign) {
        return Err(SignatureError::BadSignature);
    }

    Ok(SignatureOutcome::Verified)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PATH: &str = "/v1/task/enable/5";
    const TIME: i64 = 1_700_000_000;

    fn config() -> SigningConfig {
        SigningConfig {
            api_key: "K".to_string(),
            api_secret: "S".to_string(),
            sign_enabled: true,
            ..Default::default()
        }
    }

    fn params(time: i64, sign: &str) -> SignedParams {
        SignedParams {
            time: Some(time.to_string()),
            sign: Some(sign.to_string()),
        }
    }

    #[test]
    fn test_canonical_string_has_no_separators() {
        assert_eq!(canonical_string("K", TIME, PATH, "S"), "K1700000000/v1/task/enable/5S");
    }

    #[test]
    fn test_md5_digest_is_lowercase_hex() {
        // md5("") is a well-known vector.
        assert_eq!(SignScheme::Md5.digest(""), "d41d8cd98f00b204e9800998ecf8427e");
        let digest = SignScheme::Md5.digest("K1700000000/v1/task/enable/5S");
        assert_eq!(digest.len(), 32);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_signed_request_within_window_passes() {
        let sign = sign_request(&config(), TIME, PATH).unwrap();
        assert_eq!(sign, SignScheme::Md5.digest("K1700000000/v1/task/enable/5S"));
        assert_eq!(
            verify(&config(), &params(TIME, &sign), PATH, TIME + 100),
            Ok(SignatureOutcome::Verified)
        );
        assert_eq!(
            verify(&config(), &params(TIME, &sign), PATH, TIME + REPLAY_WINDOW_SECS),
            Ok(SignatureOutcome::Verified)
        );
    }

    #[test]
    fn test_stale_time_is_expired() {
        let now = TIME + REPLAY_WINDOW_SECS + 1;
        let sign = sign_request(&config(), TIME, PATH).unwrap();
        assert_eq!(
            verify(&config(), &params(TIME, &sign), PATH, now),
            Err(SignatureError::Expired { time: TIME, now })
        );
    }

    #[test]
    fn test_future_time_is_accepted() {
        let future = TIME + 10 * REPLAY_WINDOW_SECS;
        let sign = sign_request(&config(), future, PATH).unwrap();
        assert_eq!(
            verify(&config(), &params(future, &sign), PATH, TIME),
            Ok(SignatureOutcome::Verified)
        );
    }

    #[test]
    fn test_altered_digest_is_bad_signature() {
        let mut sign = sign_request(&config(), TIME, PATH).unwrap();
        sign.replace_range(0..1, if sign.starts_with('0') { "1" } else { "0" });
        assert_eq!(
            verify(&config(), &params(TIME, &sign), PATH, TIME),
            Err(SignatureError::BadSignature)
        );
    }

    #[test]
    fn test_signature_is_bound_to_path() {
        let sign = sign_request(&config(), TIME, PATH).unwrap();
        assert_eq!(
            verify(&config(), &params(TIME, &sign), "/v1/task/disable/5", TIME),
            Err(SignatureError::BadSignature)
        );
    }

    #[test]
    fn test_missing_or_bad_params_are_malformed() {
        let cases = [
            SignedParams::default(),
            SignedParams {
                time: Some("0".into()),
                sign: Some("x".into()),
            },
            SignedParams {
                time: Some("-5".into()),
                sign: Some("x".into()),
            },
            SignedParams {
                time: Some("soon".into()),
                sign: Some("x".into()),
            },
            SignedParams {
                time: Some(TIME.to_string()),
                sign: None,
            },
            SignedParams {
                time: Some(TIME.to_string()),
                sign: Some("  ".into()),
            },
        ];
        for p in cases {
            assert!(
                matches!(verify(&config(), &p, PATH, TIME), Err(SignatureError::Malformed(_))),
                "{:?}",
                p
            );
        }
    }

    #[test]
    fn test_disabled_passes_without_params() {
        let cfg = SigningConfig {
            sign_enabled: false,
            ..config()
        };
        assert_eq!(
            verify(&cfg, &SignedParams::default(), PATH, TIME),
            Ok(SignatureOutcome::Disabled)
        );
    }

    #[test]
    fn test_unconfigured_is_observable_pass_through() {
        let cfg = SigningConfig {
            api_secret: "   ".to_string(),
            ..config()
        };
        assert_eq!(
            verify(&cfg, &SignedParams::default(), PATH, TIME),
            Ok(SignatureOutcome::ConfigurationMissing)
        );

        let closed = SigningConfig {
            fail_closed: true,
            ..cfg
        };
        assert_eq!(
            verify(&closed, &SignedParams::default(), PATH, TIME),
            Err(SignatureError::ConfigurationMissing)
        );
    }

    #[test]
    fn test_sha256_scheme() {
        let cfg = SigningConfig {
            sign_scheme: SignScheme::Sha256,
            ..config()
        };
        let sign = sign_request(&cfg, TIME, PATH).unwrap();
        assert_eq!(sign.len(), 64);
        assert_eq!(
            verify(&cfg, &params(TIME, &sign), PATH, TIME),
            Ok(SignatureOutcome::Verified)
        );

        // An md5 signature does not satisfy the sha256 scheme.
        let legacy = sign_request(&config(), TIME, PATH).unwrap();
        assert_eq!(
            verify(&cfg, &params(TIME, &legacy), PATH, TIME),
            Err(SignatureError::BadSignature)
        );
    }

    #[test]
    fn test_key_and_secret_are_trimmed() {
        let padded = SigningConfig {
            api_key: " K ".to_string(),
            api_secret: "S\n".to_string(),
            ..config()
        };
        let sign = SignScheme::Md5.digest("K1700000000/v1/task/enable/5S");
        assert_eq!(
            verify(&padded, &params(TIME, &sign), PATH, TIME),
            Ok(SignatureOutcome::Verified)
        );
    }

    #[test]
    fn test_params_from_uri() {
        let uri: Uri = "/v1/task/enable/5?sign=abc&time=123&other=1".parse().unwrap();
        let p = SignedParams::from_uri(&uri);
        assert_eq!(p.time.as_deref(), Some("123"));
        assert_eq!(p.sign.as_deref(), Some("abc"));
        let bare: Uri = "/v1/task/enable/5".parse().unwrap();
        let empty = SignedParams::from_uri(&bare);
        assert!(empty.time.is_none() && empty.sign.is_none());
    }

    #[test]
    fn test_signed_path_is_decoded() {
        let uri: Uri = "/v1/tasklog/remove/a%20b?time=1&sign=x".parse().unwrap();
        assert_eq!(signed_path(&uri), "/v1/tasklog/remove/a b");
        let plain: Uri = PATH.parse().unwrap();
        assert_eq!(signed_path(&plain), PATH);
    }

    #[test]
    fn test_scheme_serde_names() {
        assert_eq!(serde_json::to_string(&SignScheme::Md5).unwrap(), "\"md5\"");
        let s: SignScheme = serde_json::from_str("\"sha256\"").unwrap();
        assert_eq!(s, SignScheme::Sha256);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(SignatureError::BadSignature.code(), ResponseCode::BadSignature);
        assert_eq!(
            SignatureError::Expired { time: 1, now: 2 }.code(),
            ResponseCode::Expired
        );
        assert_eq!(SignatureError::Malformed("x").code(), ResponseCode::Malformed);
        assert_eq!(
            SignatureError::ConfigurationMissing.code(),
            ResponseCode::ConfigurationMissing
        );
    }
}
