//! Capability authorization
//!
//! An [`Authorizer`] answers whether a [`Principal`] may perform an
//! [`Operation`] on an entity. Decisions depend only on the principal, the
//! entity reference and the operation, so checking every item of a page is
//! the same as checking each item on its own.
//!
//! Two implementations ship with the gateway:
//!
//! - [`NoopAuthorizer`]: allows everything, for trusted operator tooling
//! - [`PolicyAuthorizer`]: evaluates JSON role policies, deny overrides allow

use catalog_gateway_core::{
    CatalogError, EntityRef, EntityType, Operation, Principal, Result,
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

/// Outcome of an authorization check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Allowed,
    /// Denied, with the reason for logs
    Denied(String),
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allowed)
    }
}

/// Capability authorizer consumed by the gateway.
pub trait Authorizer: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Blanket admin override.
    fn is_admin(&self, principal: &Principal) -> bool;

    /// Every operation `principal` may perform on `entity`.
    fn list_permissions(&self, principal: &Principal, entity: &EntityRef) -> BTreeSet<Operation>;

    fn has_permission(
        &self,
        principal: &Principal,
        entity: &EntityRef,
        operation: Operation,
    ) -> bool {
        self.list_permissions(principal, entity).contains(&operation)
    }

    /// Typed fine-grained decision.
    fn authorize(
        &self,
        principal: &Principal,
        entity: &EntityRef,
        operation: Operation,
    ) -> AccessDecision {
        if self.has_permission(principal, entity, operation) {
            AccessDecision::Allowed
        } else {
            AccessDecision::Denied(format!(
                "{} may not {} {} '{}'",
                principal.name, operation, entity.entity_type, entity.name
            ))
        }
    }

    /// Typed admin decision.
    fn authorize_admin(&self, principal: &Principal) -> AccessDecision {
        if self.is_admin(principal) {
            AccessDecision::Allowed
        } else {
            AccessDecision::Denied(format!("{} is not an admin", principal.name))
        }
    }
}

/// Permissive authorizer for trusted contexts.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuthorizer;

impl Authorizer for NoopAuthorizer {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn is_admin(&self, _principal: &Principal) -> bool {
        true
    }

    fn list_permissions(&self, _principal: &Principal, _entity: &EntityRef) -> BTreeSet<Operation> {
        Operation::ALL.into_iter().collect()
    }
}

// ============================================================================
// Policies
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Allow,
    Deny,
}

/// Resource a rule applies to: every entity type, or one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Resource {
    All,
    Type(EntityType),
}

impl Resource {
    fn matches(&self, entity_type: EntityType) -> bool {
        match self {
            Resource::All => true,
            Resource::Type(t) => *t == entity_type,
        }
    }
}

impl TryFrom<String> for Resource {
    type Error = CatalogError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        if value.eq_ignore_ascii_case("all") {
            Ok(Resource::All)
        } else {
            value.parse().map(Resource::Type)
        }
    }
}

impl From<Resource> for String {
    fn from(resource: Resource) -> Self {
        match resource {
            Resource::All => "all".to_string(),
            Resource::Type(t) => t.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Condition {
    /// Principal owns the entity
    #[serde(rename = "isOwner")]
    IsOwner,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub name: String,
    pub effect: Effect,
    pub resources: Vec<Resource>,
    pub operations: Vec<Operation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
}

impl PolicyRule {
    fn matches(&self, entity_type: EntityType, is_owner: bool) -> bool {
        let condition_holds = match self.condition {
            Some(Condition::IsOwner) => is_owner,
            None => true,
        };
        condition_holds && self.resources.iter().any(|r| r.matches(entity_type))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePolicy {
    pub role: String,
    pub rules: Vec<PolicyRule>,
}

/// Complete policy document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySet {
    /// Rules that apply to every principal
    #[serde(default)]
    pub default_rules: Vec<PolicyRule>,
    #[serde(default)]
    pub roles: Vec<RolePolicy>,
}

impl PolicySet {
    /// Built-in policies: everyone may view, owners may edit, delete and see
    /// their services' secrets, stewards may edit anything, and auditors are
    /// never shown secrets.
    pub fn builtin() -> Self {
        Self {
            default_rules: vec![
                PolicyRule {
                    name: "organization-view".to_string(),
                    effect: Effect::Allow,
                    resources: vec![Resource::All],
                    operations: vec![Operation::ViewBasic, Operation::ViewAll],
                    condition: None,
                },
                PolicyRule {
                    name: "owner-manage".to_string(),
                    effect: Effect::Allow,
                    resources: vec![Resource::All],
                    operations: vec![
                        Operation::EditAll,
                        Operation::Delete,
                        Operation::ViewSecrets,
                    ],
                    condition: Some(Condition::IsOwner),
                },
            ],
            roles: vec![
                RolePolicy {
                    role: "DataSteward".to_string(),
                    rules: vec![PolicyRule {
                        name: "steward-edit".to_string(),
                        effect: Effect::Allow,
                        resources: vec![Resource::All],
                        operations: vec![Operation::EditAll],
                        condition: None,
                    }],
                },
                RolePolicy {
                    role: "Auditor".to_string(),
                    rules: vec![PolicyRule {
                        name: "auditor-no-secrets".to_string(),
                        effect: Effect::Deny,
                        resources: vec![Resource::All],
                        operations: vec![Operation::ViewSecrets],
                        condition: None,
                    }],
                },
            ],
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let policies: PolicySet = serde_json::from_str(json)
            .map_err(|e| CatalogError::ValidationError(format!("Invalid policy document: {}", e)))?;
        policies.validate()?;
        Ok(policies)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            CatalogError::Other(format!("Failed to read policy file {:?}: {}", path, e))
        })?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        let rules = self
            .default_rules
            .iter()
            .chain(self.roles.iter().flat_map(|r| r.rules.iter()));
        for rule in rules {
            if rule.resources.is_empty() || rule.operations.is_empty() {
                return Err(CatalogError::ValidationError(format!(
                    "Policy rule '{}' must name at least one resource and one operation",
                    rule.name
                )));
            }
        }
        if let Some(role) = self.roles.iter().find(|r| r.role.trim().is_empty()) {
            return Err(CatalogError::ValidationError(format!(
                "Role policy with {} rules has an empty role name",
                role.rules.len()
            )));
        }
        Ok(())
    }

    fn rules_for<'a>(&'a self, roles: &'a [String]) -> impl Iterator<Item = &'a PolicyRule> + 'a {
        self.default_rules.iter().chain(
            self.roles
                .iter()
                .filter(move |policy| roles.iter().any(|r| *r == policy.role))
                .flat_map(|policy| policy.rules.iter()),
        )
    }
}

/// Everything a policy decision depends on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PermissionKey {
    roles: Vec<String>,
    entity_type: EntityType,
    is_owner: bool,
}

/// Authorizer backed by a [`PolicySet`].
///
/// Evaluated permission sets are cached by the complete decision input, so
/// the cache can only ever return what a fresh evaluation would.
pub struct PolicyAuthorizer {
    policies: PolicySet,
    cache: DashMap<PermissionKey, BTreeSet<Operation>>,
}

impl PolicyAuthorizer {
    pub fn new(policies: PolicySet) -> Self {
        info!(
            roles = policies.roles.len(),
            default_rules = policies.default_rules.len(),
            "Loaded authorization policies"
        );
        Self {
            policies,
            cache: DashMap::new(),
        }
    }

    pub fn builtin() -> Self {
        Self::new(PolicySet::builtin())
    }

    fn evaluate(&self, key: &PermissionKey) -> BTreeSet<Operation> {
        let mut allowed = BTreeSet::new();
        let mut denied = BTreeSet::new();

        for rule in self.policies.rules_for(&key.roles) {
            if !rule.matches(key.entity_type, key.is_owner) {
                continue;
            }
            match rule.effect {
                Effect::Allow => allowed.extend(rule.operations.iter().copied()),
                Effect::Deny => denied.extend(rule.operations.iter().copied()),
            }
        }

        allowed.difference(&denied).copied().collect()
    }
}

impl fmt::Debug for PolicyAuthorizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyAuthorizer")
            .field("policies", &self.policies)
            .field("cached_decisions", &self.cache.len())
            .finish()
    }
}

impl Authorizer for PolicyAuthorizer {
    fn name(&self) -> &'static str {
        "policy"
    }

    fn is_admin(&self, principal: &Principal) -> bool {
        principal.holds_admin_rights()
    }

    fn list_permissions(&self, principal: &Principal, entity: &EntityRef) -> BTreeSet<Operation> {
        if self.is_admin(principal) {
            return Operation::ALL.into_iter().collect();
        }

        let mut roles = principal.roles.clone();
        roles.sort();
        roles.dedup();

        let key = PermissionKey {
            roles,
            entity_type: entity.entity_type,
            is_owner: entity.owner.as_deref() == Some(principal.name.as_str()),
        };

        if let Some(cached) = self.cache.get(&key) {
            return cached.clone();
        }

        let permissions = self.evaluate(&key);
        debug!(
            principal = %principal.name,
            entity_type = %entity.entity_type,
            is_owner = key.is_owner,
            permissions = permissions.len(),
            "Evaluated permissions"
        );
        self.cache.insert(key, permissions.clone());
        permissions
    }
}
