//! NewType wrappers for strong typing across the gateway.
//!
//! These types prevent accidental mixing of semantically different strings
//! (e.g., passing a session cookie where a username is expected). Both cross
//! the platform-login seam, where swapping them would be a silent bug.

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

            /// Whether the inner value is the empty string.
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
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

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

newtype_string!(
    /// Canonical login name on the dashboard platform.
    ///
    /// For employees this is the `upn` claim; for technical clients it is
    /// `subject + "@" + realm`. The provider keys user records by it and
    /// the platform login endpoint receives it as the `user` field.
    Username
);

newtype_string!(
    /// Session cookie value issued by the dashboard platform.
    ///
    /// This is the opaque value of the configured session cookie, either
    /// read from the inbound request, returned by a platform login, or
    /// minted when a token-authenticated session is provisioned.
    SessionCookie
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_username_roundtrip() {
        let name = Username::new("j.doe@example.com");
        assert_eq!(name.as_str(), "j.doe@example.com");
        assert_eq!(name.to_string(), "j.doe@example.com");
        assert_eq!(Username::from("j.doe@example.com"), name);
        assert_eq!(name.into_inner(), "j.doe@example.com");
    }

    #[test]
    fn test_session_cookie_is_empty() {
        assert!(SessionCookie::new("").is_empty());
        assert!(!SessionCookie::new("abc123").is_empty());
    }

    #[test]
    fn test_newtype_serde_transparent() {
        let cookie = SessionCookie::new("xyz");
        let json = serde_json::to_string(&cookie).unwrap();
        assert_eq!(json, "\"xyz\"");

        let back: SessionCookie = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cookie);
    }
}
