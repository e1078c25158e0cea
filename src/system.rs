//! Contract with the system under test.
//!
//! The harness never reaches into the authorization engine directly. Every
//! interaction (command dispatch, user provisioning, authentication) goes
//! through [`CommandSystem`], so the same matrix can drive a live deployment
//! client or the in-memory reference deployment.

use crate::error::{Error, Result};
use crate::roles::RoleSpec;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;

/// Command and reply documents.
pub type Document = Value;

/// Failure code returned when a request is denied purely on policy grounds.
pub const AUTHORIZATION_ERROR_CODE: i32 = 13;
/// Failure code returned when the deployment lacks the feature entirely.
pub const UNSUPPORTED_OPERATION_CODE: i32 = 115;
/// Failure code returned for a command name the system does not recognize.
pub const COMMAND_NOT_FOUND_CODE: i32 = 59;

/// Deployment shape the system was started in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Topology {
    Standalone,
    Sharded { shards: u8 },
}

impl Topology {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Standalone => "standalone",
            Self::Sharded { .. } => "sharded",
        }
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standalone => f.write_str("standalone"),
            Self::Sharded { shards } => write!(f, "sharded({shards} shards)"),
        }
    }
}

/// User creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSpec {
    pub user: String,
    #[serde(rename = "pwd")]
    pub password: String,
    pub roles: Vec<RoleSpec>,
}

impl UserSpec {
    pub fn new(user: impl Into<String>, password: impl Into<String>, roles: Vec<RoleSpec>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
            roles,
        }
    }
}

/// The operations the harness consumes from the system under test.
///
/// Calls are synchronous and blocking; the runner owns the handle mutably for
/// the whole run, which is what serializes trials.
pub trait CommandSystem {
    /// Deployment shape, used to label reports.
    fn topology(&self) -> Topology;

    /// Dispatch a command on `db` as the currently authenticated user.
    ///
    /// Returns the raw reply document. `Err` is reserved for transport-level
    /// failures; a refused command is an `Ok` reply with `ok: 0`.
    fn run_command(&mut self, db: &str, command: &Document) -> Result<Document>;

    fn create_user(&mut self, db: &str, spec: &UserSpec) -> Result<()>;

    /// Drop `user` from `db`. Returns `false` when no such user existed.
    fn drop_user(&mut self, db: &str, user: &str) -> Result<bool>;

    fn grant_roles_to_user(&mut self, db: &str, user: &str, roles: &[RoleSpec]) -> Result<()>;

    /// Authenticate on `db`. Returns `false` on bad credentials.
    fn auth(&mut self, db: &str, user: &str, password: &str) -> Result<bool>;

    fn logout(&mut self, db: &str) -> Result<()>;
}

/// Parsed view of a reply document.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandReply {
    pub ok: bool,
    pub code: Option<i32>,
    /// The literal reply, kept for diagnostics.
    pub raw: Document,
}

impl CommandReply {
    /// Interpret a reply document. `ok` may be numeric (`0`/`1`) or boolean.
    pub fn parse(raw: Document) -> Result<Self> {
        let ok = match raw.get("ok") {
            Some(Value::Bool(ok)) => *ok,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
            Some(other) => {
                return Err(Error::transport(format!(
                    "reply field `ok` has unexpected type: {other}"
                )));
            }
            None => {
                return Err(Error::transport(format!(
                    "reply is missing the `ok` field: {raw}"
                )));
            }
        };
        let code = raw.get("code").and_then(integral_code);
        Ok(Self { ok, code, raw })
    }

    pub fn is_authorization_error(&self) -> bool {
        !self.ok && self.code == Some(AUTHORIZATION_ERROR_CODE)
    }

    pub fn is_unsupported(&self) -> bool {
        !self.ok && self.code == Some(UNSUPPORTED_OPERATION_CODE)
    }
}

/// Reply codes may arrive as `13` or `13.0` depending on the client encoding.
fn integral_code(value: &Value) -> Option<i32> {
    if let Some(code) = value.as_i64() {
        return i32::try_from(code).ok();
    }
    let code = value.as_f64()?;
    if code.fract() != 0.0 || code < f64::from(i32::MIN) || code > f64::from(i32::MAX) {
        return None;
    }
    #[allow(clippy::cast_possible_truncation)]
    Some(code as i32)
}

impl fmt::Display for CommandReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Helper to create a successful reply document.
pub fn reply_ok(fields: Value) -> Document {
    let mut reply = json!({ "ok": 1 });
    if let (Some(out), Value::Object(extra)) = (reply.as_object_mut(), fields) {
        for (key, value) in extra {
            if key != "ok" {
                out.insert(key, value);
            }
        }
    }
    reply
}

/// Helper to create a failed reply document.
pub fn reply_err(code: i32, code_name: &str, message: impl Into<String>) -> Document {
    json!({
        "ok": 0,
        "errmsg": message.into(),
        "code": code,
        "codeName": code_name,
    })
}

/// Helper for the policy-denial reply.
pub fn reply_unauthorized(command: &str, db: &str) -> Document {
    reply_err(
        AUTHORIZATION_ERROR_CODE,
        "Unauthorized",
        format!("not authorized on {db} to execute command {command}"),
    )
}
