//! Reconciliation of granted entitlements against current org roles.
//!
//! The decision logic is a fixed, ordered rule table. For every org the
//! user is known to the platform under, the first matching rule produces
//! the single operation to apply there; later rules are not consulted.
//! Evaluation is pure, so the outcome for a given membership snapshot and
//! entitlement summary is fully deterministic.

use std::collections::BTreeMap;

use crate::auth::claims::EntitlementSummary;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Org every user is a member of by default.
pub const DEFAULT_ORG_ID: i64 = 1;

/// Role a user holds within one org.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Viewer,
    Editor,
    Admin,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Viewer => write!(f, "Viewer"),
            Self::Editor => write!(f, "Editor"),
            Self::Admin => write!(f, "Admin"),
        }
    }
}

/// Current membership of a user in one org. `role` is `None` when the
/// platform knows the org but the user holds no role in it yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrgRole {
    pub org_id: i64,
    pub role: Option<Role>,
}

impl OrgRole {
    pub fn new(org_id: i64, role: Option<Role>) -> Self {
        Self { org_id, role }
    }
}

/// Membership snapshot keyed by org name. Ordered so reconciliation walks
/// orgs deterministically.
pub type OrgRoleMap = BTreeMap<String, OrgRole>;

/// One role change to apply against the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleOperation {
    /// Grant a role in an org the user holds none in
    Create { org_id: i64, role: Role },
    /// Replace the role the user already holds in an org
    Update { org_id: i64, role: Role },
}

/// Inputs a rule decides on: one org's membership plus the token grants.
struct RuleContext<'a> {
    org: &'a str,
    current: &'a OrgRole,
    summary: &'a EntitlementSummary,
}

type Rule = fn(&RuleContext<'_>) -> Option<RoleOperation>;

/// The rule table. Order is significant; the first hit wins.
const RULES: &[(&str, Rule)] = &[
    ("admin-grant", admin_grant),
    ("admin-upgrade", admin_upgrade),
    ("vertical-grant", vertical_grant),
    ("vertical-upgrade", vertical_upgrade),
    ("baseline-viewer", baseline_viewer),
];

/// Global admins become Admin in every org they have no role in yet.
fn admin_grant(ctx: &RuleContext<'_>) -> Option<RoleOperation> {
    if ctx.summary.is_global_admin && ctx.current.role.is_none() {
        return Some(RoleOperation::Create {
            org_id: ctx.current.org_id,
            role: Role::Admin,
        });
    }
    None
}

/// Global admins holding any lesser role get raised to Admin.
fn admin_upgrade(ctx: &RuleContext<'_>) -> Option<RoleOperation> {
    if ctx.summary.is_global_admin && ctx.current.role != Some(Role::Admin) {
        return Some(RoleOperation::Update {
            org_id: ctx.current.org_id,
            role: Role::Admin,
        });
    }
    None
}

/// Full access to an org's vertical grants Editor where no role exists.
fn vertical_grant(ctx: &RuleContext<'_>) -> Option<RoleOperation> {
    if ctx.summary.has_vertical_access(ctx.org) && ctx.current.role.is_none() {
        return Some(RoleOperation::Create {
            org_id: ctx.current.org_id,
            role: Role::Editor,
        });
    }
    None
}

/// Full access to an org's vertical raises an existing Viewer to Editor.
/// Editors and Admins are left alone; roles are never lowered here.
fn vertical_upgrade(ctx: &RuleContext<'_>) -> Option<RoleOperation> {
    if ctx.summary.has_vertical_access(ctx.org) && ctx.current.role == Some(Role::Viewer) {
        return Some(RoleOperation::Update {
            org_id: ctx.current.org_id,
            role: Role::Editor,
        });
    }
    None
}

/// Users without a role become Viewer in the default org, and in every
/// org when the token grants visibility over all verticals.
fn baseline_viewer(ctx: &RuleContext<'_>) -> Option<RoleOperation> {
    if ctx.current.role.is_none()
        && (ctx.current.org_id == DEFAULT_ORG_ID || ctx.summary.has_all_verticals_view)
    {
        return Some(RoleOperation::Create {
            org_id: ctx.current.org_id,
            role: Role::Viewer,
        });
    }
    None
}

/// Compute the role operations bringing `org_roles` in line with the
/// entitlement summary. At most one operation per org; orgs where no rule
/// fires are left untouched.
pub fn reconcile(org_roles: &OrgRoleMap, summary: &EntitlementSummary) -> Vec<RoleOperation> {
    let mut operations = Vec::new();
    for (org, current) in org_roles {
        let ctx = RuleContext {
            org,
            current,
            summary,
        };
        for (name, rule) in RULES {
            if let Some(operation) = rule(&ctx) {
                debug!(org = %org, rule = name, ?operation, "role rule matched");
                operations.push(operation);
                break;
            }
        }
    }
    operations
}

/// Pick the org a freshly created user should land in: the first org (by
/// name) whose vertical the token grants full access to, the default org
/// otherwise. Visibility over all verticals is deliberately not a
/// criterion; it singles out no org.
pub fn select_default_org(org_roles: &OrgRoleMap, summary: &EntitlementSummary) -> i64 {
    org_roles
        .iter()
        .find(|(org, _)| summary.has_vertical_access(org))
        .map_or(DEFAULT_ORG_ID, |(_, entry)| entry.org_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn summary(admin: bool, view_all: bool, verticals: &[&str]) -> EntitlementSummary {
        EntitlementSummary {
            is_global_admin: admin,
            has_all_verticals_view: view_all,
            specific_verticals: verticals.iter().map(|v| v.to_string()).collect::<BTreeSet<_>>(),
        }
    }

    fn membership(entries: &[(&str, i64, Option<Role>)]) -> OrgRoleMap {
        entries
            .iter()
            .map(|(org, id, role)| (org.to_string(), OrgRole::new(*id, *role)))
            .collect()
    }

    #[test]
    fn test_no_orgs_no_operations() {
        let operations = reconcile(&OrgRoleMap::new(), &summary(false, false, &[]));
        assert!(operations.is_empty());
    }

    #[test]
    fn test_no_grants_only_default_org_gets_viewer() {
        let org_roles = membership(&[
            ("default", DEFAULT_ORG_ID, None),
            ("errorbudget", 12, None),
        ]);

        let operations = reconcile(&org_roles, &summary(false, false, &[]));
        assert_eq!(
            operations,
            vec![RoleOperation::Create {
                org_id: DEFAULT_ORG_ID,
                role: Role::Viewer,
            }]
        );
    }

    #[test]
    fn test_vertical_access_upgrades_viewer_and_fills_default() {
        let org_roles = membership(&[
            ("custo", 14, None),
            ("default", DEFAULT_ORG_ID, None),
            ("errorbudget", 12, Some(Role::Viewer)),
            ("other1", 13, None),
        ]);

        let operations = reconcile(&org_roles, &summary(false, false, &["errorbudget"]));
        assert_eq!(
            operations,
            vec![
                RoleOperation::Create {
                    org_id: DEFAULT_ORG_ID,
                    role: Role::Viewer,
                },
                RoleOperation::Update {
                    org_id: 12,
                    role: Role::Editor,
                },
            ]
        );
    }

    #[test]
    fn test_view_all_creates_viewer_everywhere_without_role() {
        let org_roles = membership(&[("custo", 14, None), ("other1", 13, None)]);

        let operations = reconcile(&org_roles, &summary(false, true, &[]));
        assert_eq!(
            operations,
            vec![
                RoleOperation::Create {
                    org_id: 14,
                    role: Role::Viewer,
                },
                RoleOperation::Create {
                    org_id: 13,
                    role: Role::Viewer,
                },
            ]
        );
    }

    #[test]
    fn test_vertical_access_takes_precedence_over_view_all() {
        let org_roles = membership(&[("custo", 14, None), ("other1", 13, None)]);

        let operations = reconcile(&org_roles, &summary(false, true, &["other1"]));
        assert_eq!(
            operations,
            vec![
                RoleOperation::Create {
                    org_id: 14,
                    role: Role::Viewer,
                },
                RoleOperation::Create {
                    org_id: 13,
                    role: Role::Editor,
                },
            ]
        );
    }

    #[test]
    fn test_admin_outranks_everything() {
        let org_roles = membership(&[
            ("custo", 14, None),
            ("errorbudget", 12, Some(Role::Viewer)),
            ("other1", 13, None),
        ]);

        let operations = reconcile(&org_roles, &summary(true, false, &["errorbudget"]));
        assert_eq!(
            operations,
            vec![
                RoleOperation::Create {
                    org_id: 14,
                    role: Role::Admin,
                },
                RoleOperation::Update {
                    org_id: 12,
                    role: Role::Admin,
                },
                RoleOperation::Create {
                    org_id: 13,
                    role: Role::Admin,
                },
            ]
        );
    }

    #[test]
    fn test_existing_admin_is_left_alone() {
        let org_roles = membership(&[("errorbudget", 12, Some(Role::Admin))]);

        let operations = reconcile(&org_roles, &summary(true, false, &[]));
        assert!(operations.is_empty());
    }

    #[test]
    fn test_roles_are_never_demoted() {
        // Editors keep their role even when the token only grants viewing.
        let org_roles = membership(&[("errorbudget", 12, Some(Role::Editor))]);

        let operations = reconcile(&org_roles, &summary(false, true, &[]));
        assert!(operations.is_empty());
    }

    #[test]
    fn test_identical_inputs_reconcile_identically() {
        let org_roles = membership(&[
            ("custo", 14, None),
            ("default", DEFAULT_ORG_ID, None),
            ("errorbudget", 12, Some(Role::Viewer)),
        ]);
        let grants = summary(false, true, &["errorbudget"]);

        let first = reconcile(&org_roles, &grants);
        let second = reconcile(&org_roles, &grants);
        assert!(!first.is_empty());
        assert_eq!(first, second);
    }

    #[test]
    fn test_default_org_prefers_first_granted_vertical() {
        let org_roles = membership(&[
            ("custo", 14, None),
            ("errorbudget", 12, None),
            ("other1", 13, None),
        ]);

        let selected = select_default_org(&org_roles, &summary(false, false, &["other1", "errorbudget"]));
        assert_eq!(selected, 12);
    }

    #[test]
    fn test_default_org_falls_back_without_vertical_match() {
        let org_roles = membership(&[("custo", 14, None)]);

        assert_eq!(
            select_default_org(&org_roles, &summary(false, true, &[])),
            DEFAULT_ORG_ID
        );
        assert_eq!(
            select_default_org(&org_roles, &summary(false, false, &["absent"])),
            DEFAULT_ORG_ID
        );
    }
}
