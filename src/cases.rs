//! Test declarations: which command to run, on which database, and which
//! roles must be allowed or denied.

use crate::error::{Error, Result};
use crate::system::{CommandReply, CommandSystem, Document};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Opaque state produced by a setup hook and handed to command generators.
pub type State = Value;

pub type SetupHook = Box<dyn Fn(&mut dyn CommandSystem, &str) -> Result<State>>;
pub type TeardownHook = Box<dyn Fn(&mut dyn CommandSystem, &str) -> Result<()>>;
/// Runs after an authorized, successful dispatch; `Err` becomes a failure record.
pub type SuccessHook = Box<dyn Fn(&CommandReply) -> std::result::Result<(), String>>;
pub type CommandGenerator = Box<dyn Fn(&State) -> Document>;

/// How a trial's command document is obtained.
pub enum CommandSpec {
    Literal(Document),
    /// Built per trial from the setup hook's state.
    Generator(CommandGenerator),
}

impl CommandSpec {
    pub const fn literal(document: Document) -> Self {
        Self::Literal(document)
    }

    pub fn generator(f: impl Fn(&State) -> Document + 'static) -> Self {
        Self::Generator(Box::new(f))
    }

    pub fn resolve(&self, state: &State) -> Document {
        match self {
            Self::Literal(document) => document.clone(),
            Self::Generator(generate) => generate(state),
        }
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(document) => f.debug_tuple("Literal").field(document).finish(),
            Self::Generator(_) => f.write_str("Generator(..)"),
        }
    }
}

/// Which roles a case is exercised against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Coverage {
    /// Only the roles named in the case's expectation map.
    #[default]
    Declared,
    /// Every catalog role; roles missing from the map must be denied.
    FullCatalog,
}

/// One database-specific expectation set for a command.
pub struct TestCase {
    pub run_on_db: String,
    /// Role key to "must succeed". `None` means the case declares no
    /// expectations and is skipped.
    pub roles: Option<BTreeMap<String, bool>>,
    /// Tolerate non-authorization failures for roles that must succeed.
    pub expect_fail: bool,
    pub on_success: Option<SuccessHook>,
}

impl TestCase {
    /// A case on `db` with an empty expectation map.
    pub fn on(db: impl Into<String>) -> Self {
        Self {
            run_on_db: db.into(),
            roles: Some(BTreeMap::new()),
            expect_fail: false,
            on_success: None,
        }
    }

    /// A case on `db` that declares no expectations at all.
    pub fn undeclared(db: impl Into<String>) -> Self {
        Self {
            run_on_db: db.into(),
            roles: None,
            expect_fail: false,
            on_success: None,
        }
    }

    #[must_use]
    pub fn allow<I, S>(self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expect_roles(keys, true)
    }

    #[must_use]
    pub fn deny<I, S>(self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expect_roles(keys, false)
    }

    fn expect_roles<I, S>(mut self, keys: I, allowed: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let roles = self.roles.get_or_insert_with(BTreeMap::new);
        for key in keys {
            roles.insert(key.into(), allowed);
        }
        self
    }

    #[must_use]
    pub const fn expect_fail(mut self) -> Self {
        self.expect_fail = true;
        self
    }

    #[must_use]
    pub fn on_success(
        mut self,
        hook: impl Fn(&CommandReply) -> std::result::Result<(), String> + 'static,
    ) -> Self {
        self.on_success = Some(Box::new(hook));
        self
    }

    pub const fn declares_roles(&self) -> bool {
        self.roles.is_some()
    }

    /// Expected outcome for `key` under `coverage`; `None` means the role is
    /// not exercised by this case.
    pub fn expectation(&self, key: &str, coverage: Coverage) -> Option<bool> {
        let roles = self.roles.as_ref()?;
        match (roles.get(key), coverage) {
            (Some(&allowed), _) => Some(allowed),
            (None, Coverage::FullCatalog) => Some(false),
            (None, Coverage::Declared) => None,
        }
    }
}

impl fmt::Debug for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase")
            .field("run_on_db", &self.run_on_db)
            .field("roles", &self.roles)
            .field("expect_fail", &self.expect_fail)
            .field("on_success", &self.on_success.is_some())
            .finish()
    }
}

/// A named command together with its per-database cases and optional
/// environment hooks.
pub struct AuthTest {
    pub name: String,
    pub command: CommandSpec,
    pub cases: Vec<TestCase>,
    pub setup: Option<SetupHook>,
    pub teardown: Option<TeardownHook>,
}

impl AuthTest {
    pub fn new(name: impl Into<String>, command: CommandSpec) -> Self {
        Self {
            name: name.into(),
            command,
            cases: Vec::new(),
            setup: None,
            teardown: None,
        }
    }

    #[must_use]
    pub fn case(mut self, case: TestCase) -> Self {
        self.cases.push(case);
        self
    }

    #[must_use]
    pub fn setup(
        mut self,
        hook: impl Fn(&mut dyn CommandSystem, &str) -> Result<State> + 'static,
    ) -> Self {
        self.setup = Some(Box::new(hook));
        self
    }

    #[must_use]
    pub fn teardown(
        mut self,
        hook: impl Fn(&mut dyn CommandSystem, &str) -> Result<()> + 'static,
    ) -> Self {
        self.teardown = Some(Box::new(hook));
        self
    }
}

impl fmt::Debug for AuthTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthTest")
            .field("name", &self.name)
            .field("command", &self.command)
            .field("cases", &self.cases)
            .field("setup", &self.setup.is_some())
            .field("teardown", &self.teardown.is_some())
            .finish()
    }
}

// ============================================================================
// Declarative catalog files
// ============================================================================

/// On-disk catalog. Only literal commands can be expressed; hooks need code.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogFile {
    pub tests: Vec<AuthTestDecl>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthTestDecl {
    #[serde(alias = "testname")]
    pub name: String,
    pub command: Document,
    #[serde(alias = "testcases")]
    pub cases: Vec<TestCaseDecl>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCaseDecl {
    #[serde(alias = "runOnDb")]
    pub run_on_db: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<BTreeMap<String, bool>>,
    #[serde(default, alias = "expectFail")]
    pub expect_fail: bool,
}

impl CatalogFile {
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::config(format!("invalid test catalog: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text).map_err(|err| match err {
            Error::Config(message) => Error::config(format!("{}: {message}", path.display())),
            other => other,
        })
    }

    pub fn into_tests(self) -> Result<Vec<AuthTest>> {
        self.tests
            .into_iter()
            .map(|decl| {
                if !decl.command.is_object() {
                    return Err(Error::config(format!(
                        "test {} has a non-document command: {}",
                        decl.name, decl.command
                    )));
                }
                let cases = decl
                    .cases
                    .into_iter()
                    .map(|case| TestCase {
                        run_on_db: case.run_on_db,
                        roles: case.roles,
                        expect_fail: case.expect_fail,
                        on_success: None,
                    })
                    .collect();
                Ok(AuthTest {
                    name: decl.name,
                    command: CommandSpec::Literal(decl.command),
                    cases,
                    setup: None,
                    teardown: None,
                })
            })
            .collect()
    }
}
