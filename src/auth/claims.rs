//! Token claims and their translation into a canonical identity.
//!
//! The identity provider issues JWTs whose `authorization` claim carries
//! named role grants, each optionally scoped by a context set. This module
//! parses that shape and condenses it into the flags the role synchronizer
//! works with.

use std::collections::{BTreeSet, HashMap};

use crate::types::Username;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// `userType` claim value for real (employee) users.
pub const USER_TYPE_EMPLOYEE: &str = "EMP";
/// `userType` claim value for technical users (identity-provider clients).
pub const USER_TYPE_CLIENT: &str = "CLIENT";

/// Role granting global admin rights on the platform.
pub const ROLE_GLOBAL_ADMIN: &str = "OMA_ADMIN";
/// Role granting read visibility over all verticals.
pub const ROLE_ALL_VERTICALS_VIEW: &str = "OMA_VIEW_ALL";
/// Role granting full access to specific verticals, named in its context.
pub const ROLE_VERTICAL_FULL_ACCESS: &str = "2TR_VERTICAL_FULL_ACCESS";
/// Context key under which vertical names are listed.
pub const CONTEXT_VERTICAL: &str = "vertical";

/// Values for one context key (e.g., vertical names).
pub type ContextValues = Vec<String>;
/// One key→values combination scoping a role grant.
pub type ContextCombination = HashMap<String, ContextValues>;
/// All context combinations attached to one role grant.
pub type ContextSet = Vec<ContextCombination>;

/// The `authorization` claim: a list of role-name → context-set entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Entitlements(Vec<HashMap<String, ContextSet>>);

impl Entitlements {
    /// Create entitlements from raw entries. Mainly useful in tests.
    pub fn new(entries: Vec<HashMap<String, ContextSet>>) -> Self {
        Self(entries)
    }

    /// Find the context set of the first entry granting the named role.
    pub fn find(&self, role_name: &str) -> Option<&ContextSet> {
        self.0.iter().find_map(|entry| entry.get(role_name))
    }

    /// Whether the named context-less role is granted.
    ///
    /// Admin-type roles are expected to carry no context; one that does is
    /// anomalous but non-fatal and only logged.
    fn has_context_free_role(&self, role_name: &str) -> bool {
        match self.find(role_name) {
            Some(contexts) => {
                if !contexts.is_empty() {
                    warn!(
                        role = role_name,
                        "found a role that should be context-less but carries context entries"
                    );
                }
                true
            }
            None => false,
        }
    }
}

/// Claims parsed from a validated identity-provider token.
///
/// Standard registered claims plus the provider's custom ones. Parsed per
/// validation, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (client name for technical users)
    #[serde(default)]
    pub sub: String,
    /// Issuer
    #[serde(default)]
    pub iss: String,
    /// Audience the token was issued for
    #[serde(default)]
    pub aud: String,
    /// Expiry (Unix seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    /// Not valid before (Unix seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    /// Issued at (Unix seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    /// "EMP" for employees, "CLIENT" for technical users
    #[serde(rename = "userType", default)]
    pub user_type: String,
    /// User principal name (employees only)
    #[serde(rename = "upn", default)]
    pub user_principal_name: String,
    /// Realm a technical user belongs to
    #[serde(default)]
    pub realm: String,
    /// Granted roles with their contexts
    #[serde(default)]
    pub authorization: Entitlements,
}

impl Claims {
    /// Canonical platform username for these claims.
    ///
    /// Technical users have no principal name; their identity is the
    /// subject qualified by the realm.
    pub fn username(&self) -> Username {
        if self.user_type == USER_TYPE_CLIENT {
            Username::new(format!("{}@{}", self.sub, self.realm))
        } else {
            Username::new(self.user_principal_name.clone())
        }
    }
}

/// Entitlements condensed to the three facts role reconciliation needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntitlementSummary {
    /// Token grants global admin rights
    pub is_global_admin: bool,
    /// Token grants read visibility over all verticals
    pub has_all_verticals_view: bool,
    /// Verticals with full access granted specifically
    pub specific_verticals: BTreeSet<String>,
}

impl EntitlementSummary {
    /// Scan the entitlements for the three well-known roles.
    pub fn from_entitlements(entitlements: &Entitlements) -> Self {
        let is_global_admin = entitlements.has_context_free_role(ROLE_GLOBAL_ADMIN);
        let has_all_verticals_view = entitlements.has_context_free_role(ROLE_ALL_VERTICALS_VIEW);

        let mut specific_verticals = BTreeSet::new();
        if let Some(contexts) = entitlements.find(ROLE_VERTICAL_FULL_ACCESS) {
            for combination in contexts {
                if let Some(values) = combination.get(CONTEXT_VERTICAL) {
                    specific_verticals.extend(values.iter().cloned());
                }
            }
        }

        Self {
            is_global_admin,
            has_all_verticals_view,
            specific_verticals,
        }
    }

    /// Whether the named org falls under a specifically granted vertical.
    pub fn has_vertical_access(&self, org: &str) -> bool {
        self.specific_verticals.contains(org)
    }
}
