//! Probe identity provisioning and scoped authentication sessions.
//!
//! Every trial runs as a freshly created probe user bound to exactly one role.
//! The probe is dropped again on every exit path, so no grant can leak into
//! the next trial.

use crate::error::{Error, Result};
use crate::roles::{Role, RoleSpec};
use crate::system::{CommandSystem, UserSpec};
use serde::{Deserialize, Serialize};

/// A user/password pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

/// The single-use identity a trial runs as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeIdentity {
    pub credentials: Credentials,
    /// Catalog key of the role the probe is bound to.
    pub bound_role: String,
    /// The grant actually issued to the system.
    pub grant: RoleSpec,
}

/// Authenticate on `db`, run `f`, and log out on every path.
///
/// An error from `f` takes precedence over a logout error.
pub fn with_session<T>(
    system: &mut dyn CommandSystem,
    db: &str,
    credentials: &Credentials,
    f: impl FnOnce(&mut dyn CommandSystem) -> Result<T>,
) -> Result<T> {
    if !system.auth(db, &credentials.user, &credentials.password)? {
        return Err(Error::auth(format!(
            "credentials for {} rejected on {db}",
            credentials.user
        )));
    }
    let result = f(&mut *system);
    let logout = system.logout(db);
    match (result, logout) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(err)) => Err(err),
        (Err(err), logout) => {
            if let Err(logout_err) = logout {
                tracing::warn!(
                    db,
                    user = %credentials.user,
                    error = %logout_err,
                    "logout failed after error"
                );
            }
            Err(err)
        }
    }
}

/// Creates, rebinds, and destroys the probe identity.
#[derive(Debug, Clone)]
pub struct UserProvisioner {
    admin_db: String,
    operator: Credentials,
    probe: Credentials,
    operator_roles: Vec<RoleSpec>,
}

impl UserProvisioner {
    pub fn new(admin_db: impl Into<String>, operator: Credentials, probe: Credentials) -> Self {
        Self {
            admin_db: admin_db.into(),
            operator,
            probe,
            operator_roles: vec![RoleSpec::named("__system")],
        }
    }

    pub fn admin_db(&self) -> &str {
        &self.admin_db
    }

    pub const fn operator(&self) -> &Credentials {
        &self.operator
    }

    /// Ensure the privileged operator account exists and authenticates.
    ///
    /// Tolerates an operator created by a previous run.
    pub fn bootstrap_operator(&self, system: &mut dyn CommandSystem) -> Result<()> {
        let db = self.admin_db.as_str();
        if system.auth(db, &self.operator.user, &self.operator.password)? {
            system.logout(db)?;
            tracing::debug!(user = %self.operator.user, "operator already provisioned");
            return Ok(());
        }
        let spec = UserSpec::new(
            self.operator.user.clone(),
            self.operator.password.clone(),
            self.operator_roles.clone(),
        );
        system.create_user(db, &spec)?;
        with_session(system, db, &self.operator, |_| Ok(()))?;
        tracing::info!(user = %self.operator.user, db, "operator provisioned");
        Ok(())
    }

    /// Grant issued for `role`: the bare spec on the admin database, scoped to
    /// the role's target database everywhere else.
    pub fn grant_for(&self, role: &Role) -> RoleSpec {
        if role.target_db == self.admin_db {
            role.spec.clone()
        } else {
            role.spec.scoped_to(&role.target_db)
        }
    }

    /// Replace any existing probe with a fresh one bound to `role` only.
    pub fn reset(&self, system: &mut dyn CommandSystem, role: &Role) -> Result<ProbeIdentity> {
        let grant = self.grant_for(role);
        let admin_db = self.admin_db.as_str();
        let probe = &self.probe;
        with_session(system, admin_db, &self.operator, |system| {
            if system.drop_user(admin_db, &probe.user)? {
                tracing::debug!(user = %probe.user, "dropped stale probe identity");
            }
            system.create_user(
                admin_db,
                &UserSpec::new(probe.user.clone(), probe.password.clone(), Vec::new()),
            )?;
            system.grant_roles_to_user(admin_db, &probe.user, std::slice::from_ref(&grant))
        })?;
        tracing::debug!(role = %role.key, grant = %grant, "probe identity bound");
        Ok(ProbeIdentity {
            credentials: self.probe.clone(),
            bound_role: role.key.clone(),
            grant,
        })
    }

    /// Drop the probe identity.
    pub fn revoke(&self, system: &mut dyn CommandSystem) -> Result<()> {
        let admin_db = self.admin_db.as_str();
        let probe_user = self.probe.user.as_str();
        with_session(system, admin_db, &self.operator, |system| {
            if !system.drop_user(admin_db, probe_user)? {
                tracing::warn!(user = probe_user, "probe identity was already gone at revoke");
            }
            Ok(())
        })
    }

    /// Run `f` with a probe bound to `role`, revoking it afterwards whether or
    /// not `f` succeeded.
    pub fn with_probe<T>(
        &self,
        system: &mut dyn CommandSystem,
        role: &Role,
        f: impl FnOnce(&mut dyn CommandSystem, &ProbeIdentity) -> Result<T>,
    ) -> Result<T> {
        let probe = match self.reset(system, role) {
            Ok(probe) => probe,
            Err(err) => {
                // A partially created probe must not survive a failed reset.
                if let Err(revoke_err) = self.revoke(system) {
                    tracing::warn!(
                        role = %role.key,
                        error = %revoke_err,
                        "cleanup after failed reset"
                    );
                }
                return Err(err);
            }
        };
        let result = f(&mut *system, &probe);
        let revoked = self.revoke(system);
        match (result, revoked) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(err)) => Err(err),
            (Err(err), revoked) => {
                if let Err(revoke_err) = revoked {
                    tracing::warn!(
                        role = %role.key,
                        error = %revoke_err,
                        "revoke failed after error"
                    );
                }
                Err(err)
            }
        }
    }
}
