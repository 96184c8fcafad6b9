//! NewType wrappers for values that travel through the gate as plain strings.
//!
//! These keep a username from being passed where an encoded token is
//! expected, and the other way round.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to generate a NewType wrapper with standard trait implementations.
macro_rules! newtype_string {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the inner value as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner String.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

newtype_string!(
    /// Login name of a console user.
    Username
);

newtype_string!(
    /// Encoded session token as carried in the `Auth-Token` header.
    SessionToken
);

/// Numeric user id as stored by the credential store.
pub type SubjectId = i64;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newtype_conversions() {
        let name = Username::from("alice");
        assert_eq!(name.as_str(), "alice");
        assert_eq!(name.to_string(), "alice");
        assert_eq!(name.clone().into_inner(), "alice".to_string());
        assert_eq!(Username::new(String::from("alice")), name);
    }

    #[test]
    fn test_newtype_serializes_transparently() {
        let token = SessionToken::new("a.b.c");
        assert_eq!(serde_json::to_string(&token).unwrap(), "\"a.b.c\"");
    }
}
