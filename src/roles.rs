//! Role catalog: the static, ordered registry of role identities a matrix run
//! exercises.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Role reference as understood by the system under test.
///
/// Serializes either as a bare role name (`"read"`) or as a scoped document
/// (`{"role": "read", "db": "local"}`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RoleSpec {
    Named(String),
    Scoped { role: String, db: String },
}

impl RoleSpec {
    pub fn named(role: impl Into<String>) -> Self {
        Self::Named(role.into())
    }

    pub fn scoped(role: impl Into<String>, db: impl Into<String>) -> Self {
        Self::Scoped {
            role: role.into(),
            db: db.into(),
        }
    }

    /// The role name without its database qualifier.
    pub fn role_name(&self) -> &str {
        match self {
            Self::Named(role) | Self::Scoped { role, .. } => role,
        }
    }

    /// Pin this spec to `db` unless it already carries its own scope.
    #[must_use]
    pub fn scoped_to(&self, db: &str) -> Self {
        match self {
            Self::Named(role) => Self::scoped(role.clone(), db),
            Self::Scoped { .. } => self.clone(),
        }
    }
}

impl fmt::Display for RoleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(role) => f.write_str(role),
            Self::Scoped { role, db } => write!(f, "{role}@{db}"),
        }
    }
}

/// A single catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Unique key referenced by test case expectations.
    pub key: String,
    #[serde(rename = "role")]
    pub spec: RoleSpec,
    /// Database the probe identity is bound on.
    #[serde(rename = "dbname", alias = "targetDb")]
    pub target_db: String,
}

impl Role {
    pub fn new(key: impl Into<String>, spec: RoleSpec, target_db: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            spec,
            target_db: target_db.into(),
        }
    }
}

/// Immutable, ordered role registry.
#[derive(Debug, Clone, Default)]
pub struct RoleCatalog {
    roles: Vec<Role>,
    index: HashMap<String, usize>,
}

impl RoleCatalog {
    /// Build a catalog, rejecting duplicate keys.
    pub fn new(roles: Vec<Role>) -> Result<Self> {
        let mut index = HashMap::with_capacity(roles.len());
        for (position, role) in roles.iter().enumerate() {
            if role.key.trim().is_empty() {
                return Err(Error::config(format!(
                    "role at position {position} has an empty key"
                )));
            }
            if index.insert(role.key.clone(), position).is_some() {
                return Err(Error::config(format!(
                    "duplicate role key in catalog: {}",
                    role.key
                )));
            }
        }
        Ok(Self { roles, index })
    }

    /// The built-in role set: database-scoped roles bind on `first_db`,
    /// cluster-wide and `AnyDatabase` roles bind on `admin_db`.
    pub fn builtin(first_db: &str, admin_db: &str) -> Self {
        let scoped_to_first = |key: &str| Role::new(key, RoleSpec::named(key), first_db);
        let on_admin = |key: &str| Role::new(key, RoleSpec::named(key), admin_db);
        let roles = vec![
            scoped_to_first("read"),
            Role::new("readLocal", RoleSpec::scoped("read", "local"), admin_db),
            on_admin("readAnyDatabase"),
            scoped_to_first("readWrite"),
            Role::new(
                "readWriteLocal",
                RoleSpec::scoped("readWrite", "local"),
                admin_db,
            ),
            on_admin("readWriteAnyDatabase"),
            scoped_to_first("userAdmin"),
            on_admin("userAdminAnyDatabase"),
            scoped_to_first("dbAdmin"),
            on_admin("dbAdminAnyDatabase"),
            on_admin("clusterAdmin"),
            scoped_to_first("dbOwner"),
            scoped_to_first("enableSharding"),
            on_admin("clusterMonitor"),
            on_admin("hostManager"),
            on_admin("clusterManager"),
            on_admin("backup"),
            on_admin("restore"),
            on_admin("root"),
            on_admin("__system"),
        ];
        // Keys above are literal and distinct.
        let index = roles
            .iter()
            .enumerate()
            .map(|(i, role)| (role.key.clone(), i))
            .collect();
        Self { roles, index }
    }

    /// Look up a role by key; absence is an [`Error::UnknownRole`] with no
    /// owning test.
    pub fn lookup(&self, key: &str) -> Result<&Role> {
        self.get(key)
            .ok_or_else(|| Error::unknown_role("<catalog lookup>", key))
    }

    pub fn get(&self, key: &str) -> Option<&Role> {
        self.index.get(key).map(|&i| &self.roles[i])
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// All roles in declaration order.
    pub fn all(&self) -> &[Role] {
        &self.roles
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.roles.iter().map(|role| role.key.as_str())
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}
