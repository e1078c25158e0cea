//! In-memory reference deployment.
//!
//! A small table-driven stand-in for a real command-dispatching server. It
//! speaks the [`CommandSystem`] contract, enforces a built-in role privilege
//! table, and keeps just enough data (users, collections) for setup hooks to
//! leave observable state. Tests inject faults with
//! [`InMemoryDeployment::with_policy_override`] and
//! [`InMemoryDeployment::with_forced_reply`].

use crate::config::Config;
use crate::error::{Error, Result};
use crate::roles::RoleSpec;
use crate::system::{
    COMMAND_NOT_FOUND_CODE, CommandSystem, Document, Topology, UNSUPPORTED_OPERATION_CODE,
    UserSpec, reply_err, reply_ok, reply_unauthorized,
};
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};

// ============================================================================
// Privilege table
// ============================================================================

/// Where a role's actions apply once granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reach {
    /// Only on the database the role is bound to.
    Database,
    /// On every database and the cluster, but only when bound on the admin db.
    Global,
}

#[derive(Debug, Clone, Copy)]
struct RoleDefinition {
    reach: Reach,
    actions: &'static [&'static str],
    inherits: &'static [&'static str],
}

const READ_ACTIONS: &[&str] = &["find", "listCollections", "listIndexes", "collStats", "dbStats"];
const READ_WRITE_ACTIONS: &[&str] = &[
    "find",
    "listCollections",
    "listIndexes",
    "collStats",
    "dbStats",
    "insert",
    "update",
    "remove",
    "createCollection",
    "dropCollection",
    "createIndex",
];
const DB_ADMIN_ACTIONS: &[&str] = &[
    "listCollections",
    "listIndexes",
    "collStats",
    "dbStats",
    "createCollection",
    "dropCollection",
    "createIndex",
    "collMod",
    "dropDatabase",
];
const USER_ADMIN_ACTIONS: &[&str] = &["createUser", "dropUser", "viewUser", "grantRole"];

const fn role(
    reach: Reach,
    actions: &'static [&'static str],
    inherits: &'static [&'static str],
) -> RoleDefinition {
    RoleDefinition {
        reach,
        actions,
        inherits,
    }
}

fn builtin_role(name: &str) -> Option<RoleDefinition> {
    let definition = match name {
        "read" => role(Reach::Database, READ_ACTIONS, &[]),
        "readWrite" => role(Reach::Database, READ_WRITE_ACTIONS, &[]),
        "dbAdmin" => role(Reach::Database, DB_ADMIN_ACTIONS, &[]),
        "userAdmin" => role(Reach::Database, USER_ADMIN_ACTIONS, &[]),
        "dbOwner" => role(Reach::Database, &[], &["readWrite", "dbAdmin", "userAdmin"]),
        "enableSharding" => role(Reach::Database, &["enableSharding"], &[]),
        "readAnyDatabase" => role(Reach::Global, &["listDatabases"], &["read"]),
        "readWriteAnyDatabase" => role(Reach::Global, &["listDatabases"], &["readWrite"]),
        "userAdminAnyDatabase" => role(Reach::Global, &["listDatabases"], &["userAdmin"]),
        "dbAdminAnyDatabase" => role(Reach::Global, &["listDatabases"], &["dbAdmin"]),
        "clusterMonitor" => role(
            Reach::Global,
            &["serverStatus", "listDatabases", "getParameter", "listShards", "listSessions"],
            &[],
        ),
        "hostManager" => role(Reach::Global, &["touch", "setParameter", "killAnySession"], &[]),
        "clusterManager" => role(
            Reach::Global,
            &["listShards", "listDatabases", "enableSharding"],
            &[],
        ),
        "clusterAdmin" => role(
            Reach::Global,
            &["dropDatabase"],
            &["clusterMonitor", "hostManager", "clusterManager"],
        ),
        "backup" => role(
            Reach::Global,
            &["listCollections", "listIndexes", "listDatabases", "serverStatus", "dbStats"],
            &[],
        ),
        "restore" => role(
            Reach::Global,
            &[
                "insert",
                "createCollection",
                "createIndex",
                "listCollections",
                "createUser",
                "grantRole",
            ],
            &[],
        ),
        "root" => role(
            Reach::Global,
            &[],
            &[
                "readWriteAnyDatabase",
                "dbAdminAnyDatabase",
                "userAdminAnyDatabase",
                "clusterAdmin",
                "backup",
                "restore",
            ],
        ),
        _ => return None,
    };
    Some(definition)
}

fn is_builtin_role(name: &str) -> bool {
    name == "__system" || builtin_role(name).is_some()
}

/// A role as it is held by an authenticated user: role name plus the database
/// the grant is bound on.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Binding {
    role: String,
    db: String,
}

/// Resource an action is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resource<'a> {
    Database(&'a str),
    Cluster,
}

fn binding_allows(binding: &Binding, action: &str, resource: Resource<'_>, admin_db: &str) -> bool {
    if binding.role == "__system" {
        return binding.db == admin_db;
    }
    role_allows(&binding.role, &binding.db, action, resource, admin_db, None)
}

fn role_allows(
    name: &str,
    bound_db: &str,
    action: &str,
    resource: Resource<'_>,
    admin_db: &str,
    // A global parent widens inherited database roles to every database.
    inherited_reach: Option<Reach>,
) -> bool {
    let Some(definition) = builtin_role(name) else {
        return false;
    };
    let reach = inherited_reach.unwrap_or(definition.reach);
    let in_scope = match (reach, resource) {
        (Reach::Database, Resource::Database(db)) => db == bound_db,
        (Reach::Database, Resource::Cluster) => false,
        (Reach::Global, _) => bound_db == admin_db,
    };
    if in_scope && definition.actions.contains(&action) {
        return true;
    }
    let child_reach = match reach {
        Reach::Global => Some(Reach::Global),
        Reach::Database => None,
    };
    definition
        .inherits
        .iter()
        .any(|parent| role_allows(parent, bound_db, action, resource, admin_db, child_reach))
}

/// Action and resource a command needs; `None` for commands open to anyone
/// and for unknown commands, which fail the same way for every caller.
fn command_requirement<'a>(
    name: &str,
    db: &'a str,
    command: &Document,
) -> Option<(&'static str, Resource<'a>)> {
    let on_db = |action: &'static str| Some((action, Resource::Database(db)));
    let on_cluster = |action: &'static str| Some((action, Resource::Cluster));
    match name {
        "find" | "count" => on_db("find"),
        "aggregate" => {
            if lists_all_sessions(command) {
                on_cluster("listSessions")
            } else {
                on_db("find")
            }
        }
        "listCollections" => on_db("listCollections"),
        "listIndexes" => on_db("listIndexes"),
        "dbStats" => on_db("dbStats"),
        "collStats" => on_db("collStats"),
        "insert" => on_db("insert"),
        "update" => on_db("update"),
        "delete" => on_db("remove"),
        "create" => on_db("createCollection"),
        "drop" => on_db("dropCollection"),
        "createIndexes" => on_db("createIndex"),
        "collMod" => on_db("collMod"),
        "dropDatabase" => on_db("dropDatabase"),
        "createUser" => on_db("createUser"),
        "dropUser" => on_db("dropUser"),
        "usersInfo" => on_db("viewUser"),
        "grantRolesToUser" => on_db("grantRole"),
        "enableSharding" => on_db("enableSharding"),
        "serverStatus" => on_cluster("serverStatus"),
        "listDatabases" => on_cluster("listDatabases"),
        "getParameter" => on_cluster("getParameter"),
        "setParameter" => on_cluster("setParameter"),
        "listShards" => on_cluster("listShards"),
        "touch" => on_cluster("touch"),
        "killAllSessions" => on_cluster("killAnySession"),
        _ => None,
    }
}

const KNOWN_COMMANDS: &[&str] = &[
    "ping",
    "isMaster",
    "hello",
    "buildInfo",
    "find",
    "count",
    "aggregate",
    "listCollections",
    "listIndexes",
    "dbStats",
    "collStats",
    "insert",
    "update",
    "delete",
    "create",
    "drop",
    "createIndexes",
    "collMod",
    "dropDatabase",
    "createUser",
    "dropUser",
    "usersInfo",
    "grantRolesToUser",
    "enableSharding",
    "serverStatus",
    "listDatabases",
    "getParameter",
    "setParameter",
    "listShards",
    "touch",
    "killAllSessions",
];

/// Command name: the first key naming a known command, else the first key.
/// Documents carry no key order, so arguments may sort ahead of the name.
fn command_name(command: &Document) -> Option<String> {
    let obj = command.as_object()?;
    obj.keys()
        .find(|key| KNOWN_COMMANDS.contains(&key.as_str()))
        .or_else(|| obj.keys().next())
        .cloned()
}

/// `{aggregate: 1, pipeline: [{$listSessions: {allUsers: true}}]}`.
fn lists_all_sessions(command: &Document) -> bool {
    command
        .get("pipeline")
        .and_then(Value::as_array)
        .and_then(|stages| stages.first())
        .and_then(|stage| stage.get("$listSessions"))
        .is_some_and(|spec| spec.get("allUsers").and_then(Value::as_bool) == Some(true))
}

// ============================================================================
// Deployment
// ============================================================================

#[derive(Debug, Clone)]
struct UserRecord {
    password: String,
    roles: Vec<RoleSpec>,
}

/// In-memory [`CommandSystem`] with a fixed built-in privilege table.
#[derive(Debug, Clone)]
pub struct InMemoryDeployment {
    topology: Topology,
    admin_db: String,
    /// Keyed by (db, user).
    users: BTreeMap<(String, String), UserRecord>,
    /// Authenticated user per database.
    sessions: BTreeMap<String, String>,
    /// Documents per (db, collection).
    collections: BTreeMap<(String, String), Vec<Value>>,
    parameters: BTreeMap<String, Value>,
    policy_overrides: HashMap<(String, String), bool>,
    forced_replies: HashMap<String, Document>,
    commands_dispatched: usize,
    peak_user_count: usize,
}

impl InMemoryDeployment {
    pub fn new(topology: Topology, config: &Config) -> Self {
        let parameters = [
            ("logLevel", json!(0)),
            ("quiet", json!(false)),
            ("cursorTimeoutMillis", json!(600_000)),
        ]
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect();
        Self {
            topology,
            admin_db: config.admin_db.clone(),
            users: BTreeMap::new(),
            sessions: BTreeMap::new(),
            collections: BTreeMap::new(),
            parameters,
            policy_overrides: HashMap::new(),
            forced_replies: HashMap::new(),
            commands_dispatched: 0,
            peak_user_count: 0,
        }
    }

    /// Force `role` to be allowed (`true`) or denied (`false`) for `command`,
    /// regardless of the privilege table.
    #[must_use]
    pub fn with_policy_override(
        mut self,
        role: impl Into<String>,
        command: impl Into<String>,
        allow: bool,
    ) -> Self {
        self.policy_overrides
            .insert((role.into(), command.into()), allow);
        self
    }

    /// Reply with `reply` whenever `command` passes authorization.
    #[must_use]
    pub fn with_forced_reply(mut self, command: impl Into<String>, reply: Document) -> Self {
        self.forced_replies.insert(command.into(), reply);
        self
    }

    pub fn user_roles(&self, db: &str, user: &str) -> Option<Vec<RoleSpec>> {
        self.users
            .get(&(db.to_string(), user.to_string()))
            .map(|record| record.roles.clone())
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Highest number of users that existed at the same time.
    pub const fn peak_user_count(&self) -> usize {
        self.peak_user_count
    }

    pub fn authenticated_user(&self, db: &str) -> Option<&str> {
        self.sessions.get(db).map(String::as_str)
    }

    pub const fn commands_dispatched(&self) -> usize {
        self.commands_dispatched
    }

    pub fn documents(&self, db: &str, collection: &str) -> &[Value] {
        self.collections
            .get(&(db.to_string(), collection.to_string()))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    fn bindings(&self) -> Vec<Binding> {
        self.sessions
            .iter()
            .filter_map(|(db, user)| self.users.get(&(db.clone(), user.clone())).map(|r| (db, r)))
            .flat_map(|(user_db, record)| {
                record.roles.iter().map(move |spec| match spec {
                    RoleSpec::Named(role) => Binding {
                        role: role.clone(),
                        db: user_db.clone(),
                    },
                    RoleSpec::Scoped { role, db } => Binding {
                        role: role.clone(),
                        db: db.clone(),
                    },
                })
            })
            .collect()
    }

    fn is_authorized(&self, command_name: &str, action: &str, resource: Resource<'_>) -> bool {
        let bindings = self.bindings();
        let overrides: Vec<bool> = bindings
            .iter()
            .filter_map(|binding| {
                self.policy_overrides
                    .get(&(binding.role.clone(), command_name.to_string()))
                    .copied()
            })
            .collect();
        if !overrides.is_empty() {
            return overrides.contains(&true);
        }
        bindings
            .iter()
            .any(|binding| binding_allows(binding, action, resource, &self.admin_db))
    }

    fn require(&self, action: &str, db: &str) -> Result<()> {
        // Bootstrap exception: the very first user may be created
        // unauthenticated.
        if self.users.is_empty() && action == "createUser" {
            return Ok(());
        }
        if self.is_authorized(action, action, Resource::Database(db)) {
            Ok(())
        } else {
            Err(Error::auth(format!("not authorized on {db} to {action}")))
        }
    }

    fn track_users(&mut self) {
        self.peak_user_count = self.peak_user_count.max(self.users.len());
    }

    fn collection_name(command: &Document, name: &str) -> Option<String> {
        command.get(name).and_then(Value::as_str).map(str::to_string)
    }

    fn execute(&mut self, name: &str, db: &str, command: &Document) -> Document {
        let sharded = matches!(self.topology, Topology::Sharded { .. });
        let (process, grid_msg) = if sharded {
            ("mongos", Value::from("isdbgrid"))
        } else {
            ("mongod", Value::Null)
        };
        match name {
            "ping" => reply_ok(json!({})),
            "isMaster" | "hello" => reply_ok(json!({"ismaster": true, "msg": grid_msg})),
            "buildInfo" => reply_ok(json!({"version": env!("CARGO_PKG_VERSION")})),
            "find" | "aggregate" if !lists_all_sessions(command) => {
                let coll = Self::collection_name(command, name).unwrap_or_default();
                let docs = self.documents(db, &coll).to_vec();
                let ns = format!("{db}.{coll}");
                reply_ok(json!({"cursor": {"id": 0, "ns": ns, "firstBatch": docs}}))
            }
            "aggregate" => reply_ok(json!({
                "cursor": {"id": 0, "ns": "config.system.sessions", "firstBatch": []}
            })),
            "count" => {
                let coll = Self::collection_name(command, name).unwrap_or_default();
                reply_ok(json!({"n": self.documents(db, &coll).len()}))
            }
            "insert" => {
                let coll = Self::collection_name(command, name).unwrap_or_default();
                let docs = command
                    .get("documents")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                let n = docs.len();
                self.collections
                    .entry((db.to_string(), coll))
                    .or_default()
                    .extend(docs);
                reply_ok(json!({"n": n}))
            }
            "update" | "delete" | "collMod" | "createIndexes" | "dbStats" | "collStats"
            | "listIndexes" => reply_ok(json!({})),
            "create" => {
                let coll = Self::collection_name(command, name).unwrap_or_default();
                self.collections.entry((db.to_string(), coll)).or_default();
                reply_ok(json!({}))
            }
            "drop" => {
                let coll = Self::collection_name(command, name).unwrap_or_default();
                match self.collections.remove(&(db.to_string(), coll)) {
                    Some(_) => reply_ok(json!({})),
                    None => reply_err(26, "NamespaceNotFound", "ns not found"),
                }
            }
            "dropDatabase" => {
                self.collections.retain(|(coll_db, _), _| coll_db != db);
                reply_ok(json!({"dropped": db}))
            }
            "listCollections" => {
                let names: Vec<Value> = self
                    .collections
                    .keys()
                    .filter(|(coll_db, _)| coll_db == db)
                    .map(|(_, coll)| json!({"name": coll}))
                    .collect();
                reply_ok(json!({"cursor": {"id": 0, "firstBatch": names}}))
            }
            "listDatabases" => {
                let mut names: Vec<&str> =
                    self.collections.keys().map(|(d, _)| d.as_str()).collect();
                names.dedup();
                reply_ok(json!({"databases": names}))
            }
            "serverStatus" => reply_ok(json!({"process": process, "uptime": 1})),
            "getParameter" => {
                let wanted: Vec<&String> = command
                    .as_object()
                    .map(|obj| {
                        obj.keys()
                            .filter(|key| self.parameters.contains_key(*key))
                            .collect()
                    })
                    .unwrap_or_default();
                if wanted.is_empty() {
                    return reply_err(72, "InvalidOptions", "no option found to get");
                }
                let mut fields = serde_json::Map::new();
                for key in wanted {
                    fields.insert(key.clone(), self.parameters[key].clone());
                }
                reply_ok(Value::Object(fields))
            }
            "setParameter" => {
                let updates: Vec<(String, Value)> = command
                    .as_object()
                    .into_iter()
                    .flatten()
                    .filter(|(key, _)| {
                        key.as_str() != "setParameter" && self.parameters.contains_key(*key)
                    })
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect();
                if updates.is_empty() {
                    return reply_err(72, "InvalidOptions", "no option found to set");
                }
                let mut was = serde_json::Map::new();
                for (key, value) in updates {
                    if let Some(old) = self.parameters.insert(key, value) {
                        was.insert("was".to_string(), old);
                    }
                }
                reply_ok(Value::Object(was))
            }
            "touch" => reply_err(
                UNSUPPORTED_OPERATION_CODE,
                "CommandNotSupported",
                "storage engine does not support touch",
            ),
            "listShards" | "enableSharding" if !sharded => reply_err(
                UNSUPPORTED_OPERATION_CODE,
                "CommandNotSupported",
                format!("{name} requires a sharded deployment"),
            ),
            "listShards" => {
                let shards = match self.topology {
                    Topology::Sharded { shards } => shards,
                    Topology::Standalone => 0,
                };
                let list: Vec<Value> = (0..shards)
                    .map(|i| json!({"_id": format!("shard{i:04}")}))
                    .collect();
                reply_ok(json!({"shards": list}))
            }
            "enableSharding" | "killAllSessions" => reply_ok(json!({})),
            "usersInfo" => {
                let users: Vec<Value> = self
                    .users
                    .keys()
                    .filter(|(user_db, _)| user_db == db)
                    .map(|(user_db, user)| json!({"user": user, "db": user_db}))
                    .collect();
                reply_ok(json!({"users": users}))
            }
            "createUser" | "dropUser" | "grantRolesToUser" => reply_err(
                UNSUPPORTED_OPERATION_CODE,
                "CommandNotSupported",
                "user administration is only available through the provisioning interface",
            ),
            _ => reply_err(
                COMMAND_NOT_FOUND_CODE,
                "CommandNotFound",
                format!("no such command: '{name}'"),
            ),
        }
    }
}

impl CommandSystem for InMemoryDeployment {
    fn topology(&self) -> Topology {
        self.topology
    }

    fn run_command(&mut self, db: &str, command: &Document) -> Result<Document> {
        let Some(name) = command_name(command) else {
            return Err(Error::transport(format!(
                "command must be a non-empty document: {command}"
            )));
        };
        self.commands_dispatched += 1;

        let authorized = command_requirement(&name, db, command)
            .is_none_or(|(action, resource)| self.is_authorized(&name, action, resource));
        if !authorized {
            return Ok(reply_unauthorized(&name, db));
        }
        if let Some(reply) = self.forced_replies.get(&name) {
            return Ok(reply.clone());
        }
        Ok(self.execute(&name, db, command))
    }

    fn create_user(&mut self, db: &str, spec: &UserSpec) -> Result<()> {
        self.require("createUser", db)?;
        if let Some(unknown) = spec.roles.iter().find(|r| !is_builtin_role(r.role_name())) {
            return Err(Error::transport(format!("Could not find role: {unknown}")));
        }
        let key = (db.to_string(), spec.user.clone());
        if self.users.contains_key(&key) {
            return Err(Error::transport(format!(
                "User \"{}@{db}\" already exists",
                spec.user
            )));
        }
        self.users.insert(
            key,
            UserRecord {
                password: spec.password.clone(),
                roles: spec.roles.clone(),
            },
        );
        self.track_users();
        Ok(())
    }

    fn drop_user(&mut self, db: &str, user: &str) -> Result<bool> {
        self.require("dropUser", db)?;
        let removed = self
            .users
            .remove(&(db.to_string(), user.to_string()))
            .is_some();
        if removed {
            self.sessions
                .retain(|session_db, session_user| !(session_db == db && session_user == user));
        }
        Ok(removed)
    }

    fn grant_roles_to_user(&mut self, db: &str, user: &str, roles: &[RoleSpec]) -> Result<()> {
        self.require("grantRole", db)?;
        if let Some(unknown) = roles.iter().find(|r| !is_builtin_role(r.role_name())) {
            return Err(Error::transport(format!("Could not find role: {unknown}")));
        }
        let record = self
            .users
            .get_mut(&(db.to_string(), user.to_string()))
            .ok_or_else(|| Error::transport(format!("Could not find user \"{user}@{db}\"")))?;
        for spec in roles {
            if !record.roles.contains(spec) {
                record.roles.push(spec.clone());
            }
        }
        Ok(())
    }

    fn auth(&mut self, db: &str, user: &str, password: &str) -> Result<bool> {
        let valid = self
            .users
            .get(&(db.to_string(), user.to_string()))
            .is_some_and(|record| record.password == password);
        if valid {
            self.sessions.insert(db.to_string(), user.to_string());
        }
        Ok(valid)
    }

    fn logout(&mut self, db: &str) -> Result<()> {
        self.sessions.remove(db);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::{AUTHORIZATION_ERROR_CODE, CommandReply};

    fn deployment(topology: Topology) -> InMemoryDeployment {
        let config = Config::default();
        let mut system = InMemoryDeployment::new(topology, &config);
        system
            .create_user(
                "admin",
                &UserSpec::new("admin", "pw", vec![RoleSpec::named("__system")]),
            )
            .unwrap();
        system
    }

    fn as_user(system: &mut InMemoryDeployment, grant: RoleSpec) {
        assert!(system.auth("admin", "admin", "pw").unwrap());
        let _ = system.drop_user("admin", "probe").unwrap();
        system
            .create_user("admin", &UserSpec::new("probe", "pw", vec![grant]))
            .unwrap();
        system.logout("admin").unwrap();
        assert!(system.auth("admin", "probe", "pw").unwrap());
    }

    fn run(system: &mut InMemoryDeployment, db: &str, command: Value) -> CommandReply {
        CommandReply::parse(system.run_command(db, &command).unwrap()).unwrap()
    }

    #[test]
    fn database_role_is_confined_to_its_database() {
        let mut system = deployment(Topology::Standalone);
        as_user(&mut system, RoleSpec::scoped("read", "db1"));
        assert!(run(&mut system, "db1", json!({"find": "foo"})).ok);
        let other = run(&mut system, "db2", json!({"find": "foo"}));
        assert_eq!(other.code, Some(AUTHORIZATION_ERROR_CODE));
        assert!(run(&mut system, "db1", json!({"dropDatabase": 1})).is_authorization_error());
    }

    #[test]
    fn global_role_requires_admin_binding() {
        let mut system = deployment(Topology::Standalone);
        as_user(&mut system, RoleSpec::named("readAnyDatabase"));
        assert!(run(&mut system, "db9", json!({"find": "foo"})).ok);
        let insert = json!({"insert": "foo", "documents": []});
        assert!(run(&mut system, "db9", insert).is_authorization_error());

        as_user(&mut system, RoleSpec::scoped("readAnyDatabase", "db1"));
        assert!(run(&mut system, "db1", json!({"find": "foo"})).is_authorization_error());
    }

    #[test]
    fn root_inherits_everything_but_system_only_actions() {
        let mut system = deployment(Topology::Standalone);
        as_user(&mut system, RoleSpec::named("root"));
        assert!(run(&mut system, "db1", json!({"dropDatabase": 1})).ok);
        assert!(run(&mut system, "admin", json!({"serverStatus": 1})).ok);
        assert!(run(&mut system, "db1", json!({"insert": "foo", "documents": [{"a": 1}]})).ok);
    }

    #[test]
    fn unauthenticated_commands_are_refused_except_ping() {
        let mut system = deployment(Topology::Standalone);
        assert!(run(&mut system, "db1", json!({"find": "foo"})).is_authorization_error());
        assert!(run(&mut system, "db1", json!({"ping": 1})).ok);
    }

    #[test]
    fn touch_is_unsupported_after_authorization() {
        let mut system = deployment(Topology::Standalone);
        as_user(&mut system, RoleSpec::named("hostManager"));
        assert!(run(&mut system, "admin", json!({"touch": "foo"})).is_unsupported());
        as_user(&mut system, RoleSpec::scoped("read", "db1"));
        assert!(run(&mut system, "admin", json!({"touch": "foo"})).is_authorization_error());
    }

    #[test]
    fn list_sessions_for_all_users_needs_cluster_monitor() {
        let mut system = deployment(Topology::Sharded { shards: 2 });
        let pipeline = json!({"aggregate": 1, "pipeline": [{"$listSessions": {"allUsers": true}}]});
        as_user(&mut system, RoleSpec::scoped("readWrite", "config"));
        assert!(run(&mut system, "config", pipeline.clone()).is_authorization_error());
        as_user(&mut system, RoleSpec::named("clusterMonitor"));
        assert!(run(&mut system, "config", pipeline).ok);
    }

    #[test]
    fn sharded_only_commands_are_unsupported_standalone() {
        let mut standalone = deployment(Topology::Standalone);
        as_user(&mut standalone, RoleSpec::named("clusterManager"));
        assert!(run(&mut standalone, "admin", json!({"listShards": 1})).is_unsupported());

        let mut sharded = deployment(Topology::Sharded { shards: 3 });
        as_user(&mut sharded, RoleSpec::named("clusterManager"));
        let reply = run(&mut sharded, "admin", json!({"listShards": 1}));
        assert!(reply.ok);
        assert_eq!(reply.raw["shards"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn data_commands_observe_seeded_documents() {
        let mut system = deployment(Topology::Standalone);
        assert!(system.auth("admin", "admin", "pw").unwrap());
        run(&mut system, "db1", json!({"insert": "foo", "documents": [{"a": 1}, {"a": 2}]}));
        assert_eq!(system.documents("db1", "foo").len(), 2);
        assert_eq!(run(&mut system, "db1", json!({"count": "foo"})).raw["n"], json!(2));
        run(&mut system, "db1", json!({"dropDatabase": 1}));
        assert!(system.documents("db1", "foo").is_empty());
    }

    #[test]
    fn parameters_round_trip() {
        let mut system = deployment(Topology::Standalone);
        assert!(system.auth("admin", "admin", "pw").unwrap());
        let reply = run(&mut system, "admin", json!({"setParameter": 1, "logLevel": 2}));
        assert_eq!(reply.raw["was"], json!(0));
        let reply = run(&mut system, "admin", json!({"getParameter": 1, "logLevel": 1}));
        assert_eq!(reply.raw["logLevel"], json!(2));
        assert!(!run(&mut system, "admin", json!({"getParameter": 1, "nope": 1})).ok);
    }

    #[test]
    fn unknown_command_is_not_found_for_everyone() {
        let mut system = deployment(Topology::Standalone);
        as_user(&mut system, RoleSpec::scoped("read", "db1"));
        let reply = run(&mut system, "db1", json!({"frobnicate": 1}));
        assert_eq!(reply.code, Some(COMMAND_NOT_FOUND_CODE));
    }

    #[test]
    fn policy_override_and_forced_reply() {
        let mut system = deployment(Topology::Standalone)
            .with_policy_override("read", "dropDatabase", true)
            .with_forced_reply("find", json!({"ok": 0, "code": 26}));
        as_user(&mut system, RoleSpec::scoped("read", "db1"));
        assert!(run(&mut system, "db1", json!({"dropDatabase": 1})).ok);
        assert_eq!(run(&mut system, "db1", json!({"find": "foo"})).code, Some(26));
    }

    #[test]
    fn provisioning_requires_privilege_after_bootstrap() {
        let mut system = deployment(Topology::Standalone);
        let err = system
            .create_user("admin", &UserSpec::new("x", "pw", vec![]))
            .unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
        assert!(system.auth("admin", "admin", "pw").unwrap());
        let err = system
            .grant_roles_to_user("admin", "admin", &[RoleSpec::named("nonsense")])
            .unwrap_err();
        assert!(err.to_string().contains("Could not find role"));
    }

    #[test]
    fn dropping_a_user_ends_its_session() {
        let mut system = deployment(Topology::Standalone);
        as_user(&mut system, RoleSpec::scoped("read", "db1"));
        system.logout("admin").unwrap();
        assert!(system.auth("admin", "admin", "pw").unwrap());
        assert!(system.drop_user("admin", "probe").unwrap());
        assert!(!system.drop_user("admin", "probe").unwrap());
        assert!(!system.auth("admin", "probe", "pw").unwrap());
    }
}
