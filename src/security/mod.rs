pub mod access_control;

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use access_control::{AccessControl, RoleDefinition, UserAccount};

/// Scope names every dashboard deployment knows about
pub const DEFAULT_SCOPES: &[&str] = &[
    "hosts",
    "config-opt",
    "pool",
    "osd",
    "monitor",
    "rbd-image",
    "iscsi",
    "rbd-mirroring",
    "rgw",
    "cephfs",
    "manager",
    "log",
    "grafana",
    "user",
    "dashboard-settings",
    "crash",
];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecurityError {
    #[error("Invalid security scope name: {0}")]
    ScopeNotValid(String),

    #[error("Invalid security permission: {0}")]
    PermissionNotValid(String),

    #[error("Unknown role '{role}' assigned to user '{user}'")]
    UnknownRole { user: String, role: String },

    #[error("Failed to read access control file {path}: {message}")]
    AccessFile { path: String, message: String },
}

/// Permission verb required to invoke an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Create,
    Update,
    Delete,
}

impl Permission {
    pub fn all() -> [Permission; 4] {
        [Permission::Read, Permission::Create, Permission::Update, Permission::Delete]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Read => "read",
            Permission::Create => "create",
            Permission::Update => "update",
            Permission::Delete => "delete",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = SecurityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "read" => Ok(Permission::Read),
            "create" => Ok(Permission::Create),
            "update" => Ok(Permission::Update),
            "delete" => Ok(Permission::Delete),
            _ => {
                tracing::debug!(
                    "Invalid security permission: {} possible values: {:?}",
                    s,
                    Permission::all()
                );
                Err(SecurityError::PermissionNotValid(s.to_string()))
            }
        }
    }
}

/// Named category of protected resources. Only obtainable through a
/// [`ScopeCatalog`], so every `Scope` in circulation is a known one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Scope(String);

impl Scope {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The set of scope names accepted at registration time
#[derive(Debug, Clone)]
pub struct ScopeCatalog {
    scopes: BTreeSet<String>,
}

impl Default for ScopeCatalog {
    fn default() -> Self {
        Self::new(DEFAULT_SCOPES.iter().copied())
    }
}

impl ScopeCatalog {
    pub fn new<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            scopes: scopes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scopes.insert(scope.into());
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.scopes.contains(name)
    }

    pub fn scope(&self, name: &str) -> Result<Scope, SecurityError> {
        if self.contains(name) {
            Ok(Scope(name.to_string()))
        } else {
            tracing::debug!(
                "Invalid security scope name: {} possible values: {:?}",
                name,
                self.scopes
            );
            Err(SecurityError::ScopeNotValid(name.to_string()))
        }
    }

    pub fn all(&self) -> impl Iterator<Item = Scope> + '_ {
        self.scopes.iter().map(|s| Scope(s.clone()))
    }
}

/// Authenticated identity attached to a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub username: String,
    pub roles: Vec<String>,
}

impl Principal {
    pub fn new(username: impl Into<String>, roles: Vec<String>) -> Self {
        Self {
            username: username.into(),
            roles,
        }
    }
}

/// Decides whether a principal holds every listed permission on a scope
pub trait Authorizer: Send + Sync {
    fn authorize(&self, principal: &Principal, scope: &Scope, permissions: &[Permission]) -> bool;
}
