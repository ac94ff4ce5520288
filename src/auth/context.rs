//! User context for request-scoped identity.

use crate::types::SessionCookie;
use serde::{Deserialize, Serialize};

/// Identity resolved for one authenticated request.
///
/// Produced once by the authenticator and attached to the request; every
/// downstream authorized operation consumes it. It is immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    /// Internal platform user id
    user_id: i64,
    /// Session cookie valid for this user on the platform
    cookie: SessionCookie,
}

impl UserContext {
    /// Create a new user context.
    pub fn new(user_id: i64, cookie: SessionCookie) -> Self {
        Self { user_id, cookie }
    }

    /// Get the internal user id.
    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    /// Get the platform session cookie.
    pub fn cookie(&self) -> &SessionCookie {
        &self.cookie
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_context_accessors() {
        let ctx = UserContext::new(4, SessionCookie::new("xyz"));
        assert_eq!(ctx.user_id(), 4);
        assert_eq!(ctx.cookie().as_str(), "xyz");
    }

    #[test]
    fn test_user_context_serializes() {
        let ctx = UserContext::new(7, SessionCookie::new("abc"));
        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json["user_id"], 7);
        assert_eq!(json["cookie"], "abc");
    }
}
