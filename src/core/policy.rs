//! Promotion policy: may this proposer move this revision into this
//! environment at all?
//!
//! Rules run in order and the first failure wins:
//! 1. protected environments only accept allowed source branches;
//! 2. every `requires_prior` environment must already run the candidate (or a
//!    descendant of it);
//! 3. when roles are configured, the proposer's role must list the environment.

use serde::Serialize;

use crate::config::{PermissionsConfig, RoleConfig};
use crate::conflict::Conflict;
use crate::environment::Environment;
use crate::error::Result;
use crate::git::VersionControl;
use crate::log_status;
use crate::store::DeploymentStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyRule {
    ProtectedBranch,
    RequiresPrior,
    RolePermission,
}

impl PolicyRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyRule::ProtectedBranch => "protected_branch",
            PolicyRule::RequiresPrior => "requires_prior",
            PolicyRule::RolePermission => "role_permission",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Allowed {
        #[serde(skip_serializing_if = "Vec::is_empty")]
        warnings: Vec<String>,
    },
    Denied {
        rule: PolicyRule,
        reason: String,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }

    fn allowed() -> Self {
        Decision::Allowed {
            warnings: Vec::new(),
        }
    }

    fn denied(rule: PolicyRule, reason: impl Into<String>) -> Self {
        Decision::Denied {
            rule,
            reason: reason.into(),
        }
    }
}

/// Role lookups over `[permissions]`.
#[derive(Debug, Clone, Default)]
pub struct Permissions {
    config: PermissionsConfig,
}

/// Outcome of a role check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleCheck {
    /// No roles configured: everything is allowed.
    Unrestricted,
    Allowed,
    /// Proposer has no resolvable role; allowed with a warning.
    NoRole(String),
    Denied(String),
}

impl Permissions {
    pub fn new(config: PermissionsConfig) -> Self {
        Self { config }
    }

    pub fn is_configured(&self) -> bool {
        !self.config.roles.is_empty()
    }

    /// Direct assignment first, then the default role. Assignments to
    /// undefined roles resolve to nothing.
    pub fn role_for(&self, user: &str) -> Option<(&str, &RoleConfig)> {
        let name = self
            .config
            .user_assignments
            .get(user)
            .or(self.config.default_role.as_ref())?;
        self.config
            .roles
            .get_key_value(name)
            .map(|(name, role)| (name.as_str(), role))
    }

    pub fn can_deploy(&self, user: &str, environment: &str) -> RoleCheck {
        if !self.is_configured() {
            return RoleCheck::Unrestricted;
        }
        let Some((name, role)) = self.role_for(user) else {
            return RoleCheck::NoRole(format!(
                "Warning: User '{}' has no assigned role. Allowing action.",
                user
            ));
        };

        let allowed = &role.deployable_environments;
        if allowed.is_empty() {
            return RoleCheck::Denied(format!(
                "Role '{}' is not allowed to deploy to any environment.",
                name
            ));
        }
        if allowed.iter().any(|e| e == "*" || e == environment) {
            return RoleCheck::Allowed;
        }
        RoleCheck::Denied(format!(
            "Role '{}' cannot deploy to environment '{}'. Allowed environments: {}",
            name,
            environment,
            allowed.join(", ")
        ))
    }

    pub fn can_override_conflicts(&self, user: &str) -> bool {
        if !self.is_configured() {
            return true;
        }
        self.role_for(user)
            .map(|(_, role)| role.can_override_conflicts)
            .unwrap_or(false)
    }
}

pub struct PolicyEngine<'a> {
    store: &'a DeploymentStore,
    vcs: &'a dyn VersionControl,
    permissions: &'a Permissions,
}

impl<'a> PolicyEngine<'a> {
    pub fn new(
        store: &'a DeploymentStore,
        vcs: &'a dyn VersionControl,
        permissions: &'a Permissions,
    ) -> Self {
        Self {
            store,
            vcs,
            permissions,
        }
    }

    pub fn authorize(
        &self,
        environment: &Environment,
        candidate: &str,
        source_branch: Option<&str>,
        proposer: &str,
    ) -> Result<Decision> {
        let decision = self.evaluate(environment, candidate, source_branch, proposer)?;
        match &decision {
            Decision::Allowed { warnings } => {
                for warning in warnings {
                    log_status!("policy", "{}", warning);
                }
                log_status!("policy", "{} may deploy to {}", proposer, environment.name);
            }
            Decision::Denied { rule, reason } => {
                log_status!(
                    "policy",
                    "Denied {} for {} ({}): {}",
                    environment.name,
                    proposer,
                    rule.as_str(),
                    reason
                );
            }
        }
        Ok(decision)
    }

    fn evaluate(
        &self,
        environment: &Environment,
        candidate: &str,
        source_branch: Option<&str>,
        proposer: &str,
    ) -> Result<Decision> {
        if environment.protected && !source_branch.is_some_and(|b| environment.allows_branch(b)) {
            return Ok(Decision::denied(
                PolicyRule::ProtectedBranch,
                "branch not permitted for protected environment",
            ));
        }

        for prior in &environment.requires_prior {
            let present = match self.store.current_for(prior)? {
                Some(current) => self.vcs.is_ancestor(candidate, &current.revision)?,
                None => false,
            };
            if !present {
                return Ok(Decision::denied(
                    PolicyRule::RequiresPrior,
                    format!(
                        "prerequisite environment not yet at or ahead of this revision ({})",
                        prior
                    ),
                ));
            }
        }

        Ok(match self.permissions.can_deploy(proposer, &environment.name) {
            RoleCheck::Unrestricted | RoleCheck::Allowed => Decision::allowed(),
            RoleCheck::NoRole(warning) => Decision::Allowed {
                warnings: vec![warning],
            },
            RoleCheck::Denied(reason) => Decision::denied(PolicyRule::RolePermission, reason),
        })
    }
}

/// Decides whether a proposer may force a deployment past a conflict.
pub trait OverrideAuthorizer: Send + Sync {
    fn may_override(&self, proposer: &str, conflict: &Conflict) -> bool;
}

/// Role-based override authorization (`can_override_conflicts`).
pub struct RoleOverrideAuthorizer {
    permissions: Permissions,
}

impl RoleOverrideAuthorizer {
    pub fn new(permissions: Permissions) -> Self {
        Self { permissions }
    }
}

impl OverrideAuthorizer for RoleOverrideAuthorizer {
    fn may_override(&self, proposer: &str, conflict: &Conflict) -> bool {
        let allowed = self.permissions.can_override_conflicts(proposer);
        log_status!(
            "policy",
            "Override of {} by {}: {}",
            conflict.conflicting_record_id,
            proposer,
            if allowed { "accepted" } else { "refused" }
        );
        allowed
    }
}
