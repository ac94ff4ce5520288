//! The authentication orchestrator.
//!
//! Every inbound request passes through [`Authenticator::authenticate`],
//! which turns whatever credentials the request carries into a
//! [`UserContext`] holding the platform user id and a live session
//! cookie. Cookies resolve directly, Basic credentials go through the
//! platform's login, and bearer tokens additionally provision the user
//! and reconcile org roles before a session is handed out.

use std::sync::Arc;

use crate::auth::claims::{Claims, EntitlementSummary};
use crate::auth::context::UserContext;
use crate::auth::credentials::{self, Credentials};
use crate::auth::roles::{
    DEFAULT_ORG_ID, OrgRoleMap, RoleOperation, reconcile, select_default_org,
};
use crate::auth::validator::TokenValidator;
use crate::platform::{PlatformClient, PlatformError};
use crate::provider::{AuthProvider, ProviderError};
use crate::types::{SessionCookie, Username};
use http::HeaderMap;
use tracing::info;

/// Errors an authentication attempt can end in. The variant decides the
/// HTTP status the request is answered with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The request's credentials are absent, malformed, or wrong
    Authentication(String),
    /// The dashboard platform failed while exchanging credentials
    UpstreamAuth(PlatformError),
    /// The provider backend failed
    Provider(ProviderError),
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Authentication(explanation) => write!(f, "{explanation}"),
            Self::UpstreamAuth(e) => write!(f, "{e}"),
            Self::Provider(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for AuthError {}

/// Ties credential extraction, token validation, the platform client,
/// and the provider together.
pub struct Authenticator {
    validator: TokenValidator,
    provider: Arc<dyn AuthProvider>,
    platform: Arc<dyn PlatformClient>,
    session_cookie_name: String,
}

impl Authenticator {
    pub fn new(
        validator: TokenValidator,
        provider: Arc<dyn AuthProvider>,
        platform: Arc<dyn PlatformClient>,
        session_cookie_name: String,
    ) -> Self {
        Self {
            validator,
            provider,
            platform,
            session_cookie_name,
        }
    }

    /// Authenticate a request by its headers.
    ///
    /// Credentials that extract cleanly but are empty where it matters
    /// (blank cookie, blank Basic field, blank token) are rejected the
    /// same way as absent ones.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<UserContext, AuthError> {
        let credentials = credentials::extract(headers, &self.session_cookie_name)
            .map_err(|e| AuthError::Authentication(e.to_string()))?;

        match credentials {
            Credentials::Cookie(cookie) if !cookie.is_empty() => {
                self.authenticate_session(cookie).await
            }
            Credentials::Basic { username, password }
                if !username.is_empty() && !password.is_empty() =>
            {
                self.authenticate_password(&username, &password).await
            }
            Credentials::Bearer(token) if !token.is_empty() => {
                self.authenticate_token(&token).await
            }
            _ => Err(AuthError::Authentication(
                "authorization credentials incorrect".to_string(),
            )),
        }
    }

    /// A presented cookie only has to resolve to a live session.
    async fn authenticate_session(&self, cookie: SessionCookie) -> Result<UserContext, AuthError> {
        let user_id = self.resolve_session(&cookie).await?;
        Ok(UserContext::new(user_id, cookie))
    }

    /// Basic credentials are exchanged for a platform session first; the
    /// fresh cookie then resolves like any other.
    async fn authenticate_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<UserContext, AuthError> {
        let cookie = self
            .platform
            .login(username, password)
            .await
            .map_err(AuthError::UpstreamAuth)?;
        let user_id = self.resolve_session(&cookie).await?;
        Ok(UserContext::new(user_id, cookie))
    }

    async fn resolve_session(&self, cookie: &SessionCookie) -> Result<i64, AuthError> {
        match self.provider.resolve_session(cookie).await {
            Ok(user_id) => Ok(user_id),
            Err(ProviderError::SessionNotFound) => Err(AuthError::Authentication(
                "authorization credentials incorrect".to_string(),
            )),
            Err(e) => Err(AuthError::Provider(e)),
        }
    }

    /// The bearer token path: validate, provision, reconcile roles, then
    /// hand out a session.
    async fn authenticate_token(&self, token: &str) -> Result<UserContext, AuthError> {
        let claims = self.validator.validate(token).await.map_err(|rejection| {
            AuthError::Authentication(format!("bearer token incorrect: {rejection}"))
        })?;
        let username = claims.username();

        let user_id = self.configure_user(&claims, &username).await?;

        let cookie = self
            .provider
            .find_or_create_session(user_id, &username)
            .await
            .map_err(AuthError::Provider)?;
        self.provider
            .register_external_login(user_id)
            .await
            .map_err(AuthError::Provider)?;

        info!("User {} logged in with token", username);

        Ok(UserContext::new(user_id, cookie))
    }

    /// Ensure the user exists and carries the roles the token grants.
    ///
    /// The org snapshot is fetched exactly once and feeds both the
    /// default-org pick and role reconciliation.
    async fn configure_user(
        &self,
        claims: &Claims,
        username: &Username,
    ) -> Result<i64, AuthError> {
        let (user_id, created) = self
            .provider
            .find_or_create_user(username)
            .await
            .map_err(AuthError::Provider)?;

        let summary = EntitlementSummary::from_entitlements(&claims.authorization);
        let org_roles = self
            .provider
            .get_org_roles(user_id)
            .await
            .map_err(AuthError::Provider)?;

        if created {
            self.assign_default_org(user_id, &org_roles, &summary).await?;
        }

        self.apply_role_operations(user_id, &org_roles, &summary)
            .await?;

        Ok(user_id)
    }

    /// Land a freshly created user in a sensible org. Writing the
    /// platform default is skipped when nothing would change.
    async fn assign_default_org(
        &self,
        user_id: i64,
        org_roles: &OrgRoleMap,
        summary: &EntitlementSummary,
    ) -> Result<(), AuthError> {
        let default_org_id = select_default_org(org_roles, summary);
        if default_org_id != DEFAULT_ORG_ID || summary.is_global_admin {
            info!(
                "Assigned org id: {}, isAdmin: {} to user {}",
                default_org_id, summary.is_global_admin, user_id
            );
            self.provider
                .update_user_defaults(user_id, default_org_id, summary.is_global_admin)
                .await
                .map_err(AuthError::Provider)?;
        }
        Ok(())
    }

    /// Apply the reconciliation outcome in order; the first failing
    /// write aborts the attempt, already applied changes stay.
    async fn apply_role_operations(
        &self,
        user_id: i64,
        org_roles: &OrgRoleMap,
        summary: &EntitlementSummary,
    ) -> Result<(), AuthError> {
        for operation in reconcile(org_roles, summary) {
            match operation {
                RoleOperation::Create { org_id, role } => {
                    self.provider.create_user_role(user_id, org_id, role).await
                }
                RoleOperation::Update { org_id, role } => {
                    self.provider.update_user_role(user_id, org_id, role).await
                }
            }
            .map_err(AuthError::Provider)?;
        }
        Ok(())
    }
}
