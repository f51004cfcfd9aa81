//! Caller identity and the operations it can be granted.

use crate::CatalogError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role name that grants admin rights regardless of the `is_admin` flag.
pub const ADMIN_ROLE: &str = "Admin";

/// Operation a principal may perform on an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// See the entity's name and type
    ViewBasic,
    /// See every non-sensitive field
    ViewAll,
    EditAll,
    Delete,
    /// See service connection secrets in cleartext
    ViewSecrets,
}

impl Operation {
    pub const ALL: [Operation; 5] = [
        Operation::ViewBasic,
        Operation::ViewAll,
        Operation::EditAll,
        Operation::Delete,
        Operation::ViewSecrets,
    ];
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::ViewBasic => write!(f, "view_basic"),
            Operation::ViewAll => write!(f, "view_all"),
            Operation::EditAll => write!(f, "edit_all"),
            Operation::Delete => write!(f, "delete"),
            Operation::ViewSecrets => write!(f, "view_secrets"),
        }
    }
}

impl std::str::FromStr for Operation {
    type Err = CatalogError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "view_basic" => Ok(Operation::ViewBasic),
            "view_all" => Ok(Operation::ViewAll),
            "edit_all" => Ok(Operation::EditAll),
            "delete" => Ok(Operation::Delete),
            "view_secrets" => Ok(Operation::ViewSecrets),
            _ => Err(CatalogError::ValidationError(format!(
                "Unknown operation: {}",
                s
            ))),
        }
    }
}

/// Authenticated caller, resolved once per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub name: String,
    pub roles: Vec<String>,
    pub is_admin: bool,
    /// Automation account rather than a person
    pub is_bot: bool,
}

impl Principal {
    /// A principal with no roles and no admin rights.
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            roles: Vec::new(),
            is_admin: false,
            is_bot: false,
        }
    }

    pub fn admin(name: impl Into<String>) -> Self {
        Self {
            is_admin: true,
            ..Self::user(name)
        }
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn bot(mut self) -> Self {
        self.is_bot = true;
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Admin by flag or by holding the admin role.
    pub fn holds_admin_rights(&self) -> bool {
        self.is_admin || self.has_role(ADMIN_ROLE)
    }
}
