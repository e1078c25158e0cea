//! Common test infrastructure for `authz_matrix` integration tests.
//!
//! - [`RecordingSystem`]: a [`CommandSystem`] wrapper that logs every call,
//!   tracks which identity dispatched each command, and checks that the probe
//!   identity never exists twice
//! - fixtures for configs, catalogs, and bootstrapped reference deployments
//! - test logging

#![allow(dead_code)]

use std::collections::{BTreeSet, HashSet};
use std::sync::Once;

use authz_matrix::Result;
use authz_matrix::config::Config;
use authz_matrix::error::Error;
use authz_matrix::memory::InMemoryDeployment;
use authz_matrix::roles::{RoleCatalog, RoleSpec};
use authz_matrix::system::{CommandSystem, Document, Topology, UserSpec};

/// Route `tracing` output through the test writer so it shows on failure.
pub fn init_test_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
            .with_test_writer()
            .with_target(false)
            .try_init();
    });
}

/// Default config, the built-in role catalog, and a reference deployment with
/// the operator already provisioned.
pub fn fixture(topology: Topology) -> (Config, RoleCatalog, InMemoryDeployment) {
    init_test_logging();
    let config = Config::default();
    let catalog = RoleCatalog::builtin(&config.first_db, &config.admin_db);
    let mut system = InMemoryDeployment::new(topology, &config);
    config
        .provisioner()
        .bootstrap_operator(&mut system)
        .expect("bootstrap operator");
    (config, catalog, system)
}

/// One observed call on the wrapped system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Auth { db: String, user: String, ok: bool },
    Logout { db: String },
    CreateUser { user: String, roles: Vec<RoleSpec> },
    DropUser { user: String, existed: bool },
    Grant { user: String, roles: Vec<RoleSpec> },
    Command { db: String, name: String, as_user: Option<String> },
}

/// Wraps a system, records every call, and can fail chosen commands.
pub struct RecordingSystem<S> {
    pub inner: S,
    pub events: Vec<Event>,
    probe_user: String,
    live_users: BTreeSet<String>,
    current_user: Option<String>,
    failing_commands: HashSet<String>,
    pub peak_live_probes: usize,
}

impl<S: CommandSystem> RecordingSystem<S> {
    pub fn new(inner: S, config: &Config) -> Self {
        Self {
            inner,
            events: Vec::new(),
            probe_user: config.probe_user.clone(),
            live_users: BTreeSet::new(),
            current_user: None,
            failing_commands: HashSet::new(),
            peak_live_probes: 0,
        }
    }

    /// Make `run_command` return a transport error for `name`.
    pub fn fail_command(mut self, name: &str) -> Self {
        self.failing_commands.insert(name.to_string());
        self
    }

    /// `(user, command)` for every dispatched command, in order.
    pub fn dispatches(&self) -> Vec<(Option<String>, String)> {
        self.events
            .iter()
            .filter_map(|event| match event {
                Event::Command { name, as_user, .. } => Some((as_user.clone(), name.clone())),
                _ => None,
            })
            .collect()
    }

    /// Roles granted to the probe, one entry per grant call.
    pub fn probe_grants(&self) -> Vec<Vec<RoleSpec>> {
        self.events
            .iter()
            .filter_map(|event| match event {
                Event::Grant { user, roles } if *user == self.probe_user => Some(roles.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn probe_is_live(&self) -> bool {
        self.live_users.contains(&self.probe_user)
    }
}

/// First key with a scalar value; argument keys such as `documents` or
/// `pipeline` hold arrays or objects.
fn command_name(command: &Document) -> String {
    let Some(obj) = command.as_object() else {
        return String::new();
    };
    obj.iter()
        .find(|(_, value)| !value.is_array() && !value.is_object())
        .or_else(|| obj.iter().next())
        .map(|(key, _)| key.clone())
        .unwrap_or_default()
}

impl<S: CommandSystem> CommandSystem for RecordingSystem<S> {
    fn topology(&self) -> Topology {
        self.inner.topology()
    }

    fn run_command(&mut self, db: &str, command: &Document) -> Result<Document> {
        let name = command_name(command);
        self.events.push(Event::Command {
            db: db.to_string(),
            name: name.clone(),
            as_user: self.current_user.clone(),
        });
        if self.failing_commands.contains(&name) {
            return Err(Error::transport(format!("connection reset during {name}")));
        }
        self.inner.run_command(db, command)
    }

    fn create_user(&mut self, db: &str, spec: &UserSpec) -> Result<()> {
        self.inner.create_user(db, spec)?;
        self.events.push(Event::CreateUser {
            user: spec.user.clone(),
            roles: spec.roles.clone(),
        });
        assert!(
            self.live_users.insert(spec.user.clone()),
            "user {} created while already live",
            spec.user
        );
        let probes = usize::from(self.live_users.contains(&self.probe_user));
        self.peak_live_probes = self.peak_live_probes.max(probes);
        Ok(())
    }

    fn drop_user(&mut self, db: &str, user: &str) -> Result<bool> {
        let existed = self.inner.drop_user(db, user)?;
        self.live_users.remove(user);
        self.events.push(Event::DropUser {
            user: user.to_string(),
            existed,
        });
        Ok(existed)
    }

    fn grant_roles_to_user(&mut self, db: &str, user: &str, roles: &[RoleSpec]) -> Result<()> {
        self.inner.grant_roles_to_user(db, user, roles)?;
        self.events.push(Event::Grant {
            user: user.to_string(),
            roles: roles.to_vec(),
        });
        Ok(())
    }

    fn auth(&mut self, db: &str, user: &str, password: &str) -> Result<bool> {
        let ok = self.inner.auth(db, user, password)?;
        if ok {
            self.current_user = Some(user.to_string());
        }
        self.events.push(Event::Auth {
            db: db.to_string(),
            user: user.to_string(),
            ok,
        });
        Ok(ok)
    }

    fn logout(&mut self, db: &str) -> Result<()> {
        self.inner.logout(db)?;
        self.current_user = None;
        self.events.push(Event::Logout { db: db.to_string() });
        Ok(())
    }
}
