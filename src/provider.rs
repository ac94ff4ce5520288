//! Pluggable backend for the platform's users, sessions, and org roles.
//!
//! The gateway never talks to the dashboard platform's database itself;
//! everything it needs is behind [`AuthProvider`]. The bundled
//! [`InMemoryProvider`] backs local development and tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::auth::roles::{OrgRole, OrgRoleMap, Role};
use crate::types::{SessionCookie, Username};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Errors surfaced by a provider backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The presented cookie maps to no live session
    SessionNotFound,
    /// The backend itself failed
    Backend(String),
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SessionNotFound => write!(f, "session not found"),
            Self::Backend(detail) => write!(f, "provider backend error: {detail}"),
        }
    }
}

impl std::error::Error for ProviderError {}

/// User, session, and role storage as the gateway sees it.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Resolve a session cookie to the id of the user holding it.
    async fn resolve_session(&self, cookie: &SessionCookie) -> Result<i64, ProviderError>;

    /// Look a user up by name, creating it on first sight. The flag
    /// reports whether the user was just created.
    async fn find_or_create_user(&self, username: &Username)
    -> Result<(i64, bool), ProviderError>;

    /// The user's membership in every org the platform knows, keyed by
    /// org name. Orgs the user holds no role in are included with an
    /// empty role.
    async fn get_org_roles(&self, user_id: i64) -> Result<OrgRoleMap, ProviderError>;

    /// Grant a role in an org the user holds none in.
    async fn create_user_role(
        &self,
        user_id: i64,
        org_id: i64,
        role: Role,
    ) -> Result<(), ProviderError>;

    /// Replace the role the user already holds in an org.
    async fn update_user_role(
        &self,
        user_id: i64,
        org_id: i64,
        role: Role,
    ) -> Result<(), ProviderError>;

    /// Set the user's default org and platform admin flag.
    async fn update_user_defaults(
        &self,
        user_id: i64,
        org_id: i64,
        is_admin: bool,
    ) -> Result<(), ProviderError>;

    /// Return a live session cookie for the user, minting one if none
    /// exists.
    async fn find_or_create_session(
        &self,
        user_id: i64,
        username: &Username,
    ) -> Result<SessionCookie, ProviderError>;

    /// Record that the user authenticates externally so the platform
    /// skips its own password checks for the account.
    async fn register_external_login(&self, user_id: i64) -> Result<(), ProviderError>;
}

#[derive(Default)]
struct ProviderState {
    /// Org name to org id, fixed at construction.
    orgs: BTreeMap<String, i64>,
    /// Username to user id.
    users: HashMap<String, i64>,
    next_user_id: i64,
    /// Session cookie to user id.
    sessions: HashMap<String, i64>,
    /// (user id, org id) to held role.
    roles: HashMap<(i64, i64), Role>,
    /// User id to (default org, admin flag).
    defaults: HashMap<i64, (i64, bool)>,
    /// User id to the time of the last externally authenticated login.
    external_logins: HashMap<i64, DateTime<Utc>>,
}

/// Provider holding everything in process memory.
pub struct InMemoryProvider {
    state: Arc<RwLock<ProviderState>>,
}

impl InMemoryProvider {
    /// A provider knowing only the default org.
    pub fn new() -> Self {
        Self::with_orgs([("default".to_string(), crate::auth::roles::DEFAULT_ORG_ID)])
    }

    /// A provider with a fixed set of orgs, given as name and id pairs.
    pub fn with_orgs(orgs: impl IntoIterator<Item = (String, i64)>) -> Self {
        let state = ProviderState {
            orgs: orgs.into_iter().collect(),
            next_user_id: 1,
            ..ProviderState::default()
        };
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Install a known session, mainly to prepare test and demo state.
    pub async fn seed_session(&self, cookie: &SessionCookie, user_id: i64) {
        let mut state = self.state.write().await;
        state.sessions.insert(cookie.as_str().to_string(), user_id);
    }

    /// Role the user currently holds in an org, if any.
    pub async fn role_of(&self, user_id: i64, org_id: i64) -> Option<Role> {
        self.state.read().await.roles.get(&(user_id, org_id)).copied()
    }

    /// Default org and admin flag last assigned to the user, if any.
    pub async fn defaults_of(&self, user_id: i64) -> Option<(i64, bool)> {
        self.state.read().await.defaults.get(&user_id).copied()
    }

    /// Time of the user's last externally authenticated login, if any.
    pub async fn last_external_login(&self, user_id: i64) -> Option<DateTime<Utc>> {
        self.state.read().await.external_logins.get(&user_id).copied()
    }
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthProvider for InMemoryProvider {
    async fn resolve_session(&self, cookie: &SessionCookie) -> Result<i64, ProviderError> {
        self.state
            .read()
            .await
            .sessions
            .get(cookie.as_str())
            .copied()
            .ok_or(ProviderError::SessionNotFound)
    }

    async fn find_or_create_user(
        &self,
        username: &Username,
    ) -> Result<(i64, bool), ProviderError> {
        let mut state = self.state.write().await;
        if let Some(id) = state.users.get(username.as_str()) {
            return Ok((*id, false));
        }

        let id = state.next_user_id;
        state.next_user_id += 1;
        state.users.insert(username.as_str().to_string(), id);
        Ok((id, true))
    }

    async fn get_org_roles(&self, user_id: i64) -> Result<OrgRoleMap, ProviderError> {
        let state = self.state.read().await;
        Ok(state
            .orgs
            .iter()
            .map(|(name, org_id)| {
                let role = state.roles.get(&(user_id, *org_id)).copied();
                (name.clone(), OrgRole::new(*org_id, role))
            })
            .collect())
    }

    async fn create_user_role(
        &self,
        user_id: i64,
        org_id: i64,
        role: Role,
    ) -> Result<(), ProviderError> {
        let mut state = self.state.write().await;
        state.roles.insert((user_id, org_id), role);
        Ok(())
    }

    async fn update_user_role(
        &self,
        user_id: i64,
        org_id: i64,
        role: Role,
    ) -> Result<(), ProviderError> {
        let mut state = self.state.write().await;
        state.roles.insert((user_id, org_id), role);
        Ok(())
    }

    async fn update_user_defaults(
        &self,
        user_id: i64,
        org_id: i64,
        is_admin: bool,
    ) -> Result<(), ProviderError> {
        let mut state = self.state.write().await;
        state.defaults.insert(user_id, (org_id, is_admin));
        Ok(())
    }

    async fn find_or_create_session(
        &self,
        user_id: i64,
        _username: &Username,
    ) -> Result<SessionCookie, ProviderError> {
        let mut state = self.state.write().await;
        if let Some((cookie, _)) = state.sessions.iter().find(|(_, id)| **id == user_id) {
            return Ok(SessionCookie::new(cookie.clone()));
        }

        let cookie = Uuid::new_v4().simple().to_string();
        state.sessions.insert(cookie.clone(), user_id);
        Ok(SessionCookie::new(cookie))
    }

    async fn register_external_login(&self, user_id: i64) -> Result<(), ProviderError> {
        let mut state = self.state.write().await;
        state.external_logins.insert(user_id, Utc::now());
        Ok(())
    }
}
