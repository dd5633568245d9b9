use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use serde::Deserialize;

use super::{Authorizer, Permission, Principal, Scope, ScopeCatalog, SecurityError};
use crate::auth::{hash_password, verify_password};

/// Role granted every permission on every scope
pub const ADMINISTRATOR_ROLE: &str = "administrator";

/// On-disk shape of the access control file:
///
/// ```yaml
/// roles:
///   crash-manager:
///     crash: [read, create, delete]
/// users:
///   alice:
///     password: <sha256 hex digest>
///     roles: [crash-manager]
/// ```
#[derive(Debug, Default, Deserialize)]
struct AccessControlFile {
    #[serde(default)]
    roles: BTreeMap<String, BTreeMap<String, Vec<String>>>,
    #[serde(default)]
    users: BTreeMap<String, UserEntry>,
}

#[derive(Debug, Deserialize)]
struct UserEntry {
    password: String,
    #[serde(default)]
    roles: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RoleDefinition {
    pub name: String,
    pub grants: HashMap<Scope, BTreeSet<Permission>>,
}

impl RoleDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            grants: HashMap::new(),
        }
    }

    pub fn grant(mut self, scope: Scope, permissions: impl IntoIterator<Item = Permission>) -> Self {
        self.grants.entry(scope).or_default().extend(permissions);
        self
    }

    fn allows(&self, scope: &Scope, permission: Permission) -> bool {
        self.name == ADMINISTRATOR_ROLE
            || self
                .grants
                .get(scope)
                .map_or(false, |granted| granted.contains(&permission))
    }
}

#[derive(Debug, Clone)]
pub struct UserAccount {
    pub username: String,
    pub password_hash: String,
    pub roles: Vec<String>,
}

/// Users and roles known to the dashboard
#[derive(Debug, Clone)]
pub struct AccessControl {
    roles: HashMap<String, RoleDefinition>,
    users: HashMap<String, UserAccount>,
}

impl Default for AccessControl {
    fn default() -> Self {
        let mut roles = HashMap::new();
        roles.insert(ADMINISTRATOR_ROLE.to_string(), RoleDefinition::new(ADMINISTRATOR_ROLE));
        Self {
            roles,
            users: HashMap::new(),
        }
    }
}

impl AccessControl {
    pub fn load(path: impl AsRef<Path>, catalog: &ScopeCatalog) -> Result<Self, SecurityError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| SecurityError::AccessFile {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_yaml_str(&raw, catalog).map_err(|e| match e {
            SecurityError::AccessFile { message, .. } => SecurityError::AccessFile {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    pub fn from_yaml_str(raw: &str, catalog: &ScopeCatalog) -> Result<Self, SecurityError> {
        let file: AccessControlFile = serde_yaml::from_str(raw).map_err(|e| SecurityError::AccessFile {
            path: "<inline>".to_string(),
            message: e.to_string(),
        })?;

        let mut access = Self::default();

        for (role_name, scopes) in file.roles {
            let mut role = RoleDefinition::new(role_name.clone());
            for (scope_name, permissions) in scopes {
                let scope = catalog.scope(&scope_name)?;
                let permissions = permissions
                    .iter()
                    .map(|p| p.parse::<Permission>())
                    .collect::<Result<Vec<_>, _>>()?;
                role = role.grant(scope, permissions);
            }
            access.add_role(role);
        }

        for (username, entry) in file.users {
            access.add_user_hashed(username, entry.password, entry.roles)?;
        }

        tracing::info!(
            "Loaded access control: {} roles, {} users",
            access.roles.len(),
            access.users.len()
        );
        Ok(access)
    }

    pub fn add_role(&mut self, role: RoleDefinition) {
        self.roles.insert(role.name.clone(), role);
    }

    /// Register a user with a plaintext password
    pub fn add_user(
        &mut self,
        username: impl Into<String>,
        password: &str,
        roles: Vec<String>,
    ) -> Result<(), SecurityError> {
        self.add_user_hashed(username, hash_password(password), roles)
    }

    fn add_user_hashed(
        &mut self,
        username: impl Into<String>,
        password_hash: String,
        roles: Vec<String>,
    ) -> Result<(), SecurityError> {
        let username = username.into();
        if let Some(role) = roles.iter().find(|r| !self.roles.contains_key(*r)) {
            return Err(SecurityError::UnknownRole {
                user: username,
                role: role.clone(),
            });
        }
        self.users.insert(
            username.clone(),
            UserAccount {
                username,
                password_hash,
                roles,
            },
        );
        Ok(())
    }

    /// Verify credentials and return the matching principal
    pub fn authenticate(&self, username: &str, password: &str) -> Option<Principal> {
        let account = self.users.get(username)?;
        if !verify_password(password, &account.password_hash) {
            return None;
        }
        Some(Principal::new(account.username.clone(), account.roles.clone()))
    }

    /// Current principal for a username, reflecting role changes since a token was issued
    pub fn principal(&self, username: &str) -> Option<Principal> {
        self.users
            .get(username)
            .map(|account| Principal::new(account.username.clone(), account.roles.clone()))
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}

impl Authorizer for AccessControl {
    fn authorize(&self, principal: &Principal, scope: &Scope, permissions: &[Permission]) -> bool {
        permissions.iter().all(|permission| {
            principal
                .roles
                .iter()
                .filter_map(|name| self.roles.get(name))
                .any(|role| role.allows(scope, *permission))
        })
    }
}
