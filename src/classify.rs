//! Outcome classification: compares a trial's reply with its declared
//! expectation.
//!
//! The decision table is intentionally asymmetric. A role that must succeed
//! tolerates an unsupported-operation reply (some deployments lack optional
//! engine features); a role that must be denied accepts nothing but the
//! authorization error code.

use crate::system::{AUTHORIZATION_ERROR_CODE, CommandReply, UNSUPPORTED_OPERATION_CODE};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a trial disagreed with its expectation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchKind {
    /// Must succeed, but was refused on authorization grounds.
    UnexpectedDenial,
    /// Must succeed, and failed for a reason that is neither authorization nor
    /// a tolerated one.
    CommandFailed,
    /// Must be denied, but succeeded or failed for a non-authorization reason.
    UnexpectedAuthorization,
    /// Succeeded, but the case's success hook rejected the reply.
    SuccessHookFailed,
}

impl MismatchKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::UnexpectedDenial => "unexpected denial",
            Self::CommandFailed => "command failed",
            Self::UnexpectedAuthorization => "unexpected authorization",
            Self::SuccessHookFailed => "success hook failed",
        }
    }
}

impl fmt::Display for MismatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Classified result of one trial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Must succeed and did.
    Authorized,
    /// Must be denied and was, on authorization grounds.
    Denied,
    /// Must succeed, failed, but the failure is tolerated (unsupported
    /// operation, or the case expects the command itself to fail).
    Tolerated { code: Option<i32> },
    Mismatch { kind: MismatchKind, message: String },
}

impl Outcome {
    pub const fn is_mismatch(&self) -> bool {
        matches!(self, Self::Mismatch { .. })
    }
}

/// Where a trial ran, for diagnostic messages.
#[derive(Debug, Clone, Copy)]
pub struct TrialSite<'a> {
    pub run_on_db: &'a str,
    pub role_key: &'a str,
}

impl TrialSite<'_> {
    fn suffix(&self) -> String {
        format!(" on db {} with role {}", self.run_on_db, self.role_key)
    }
}

/// Classify `reply` against `expected` (`true` = must succeed).
pub fn classify(
    expected: bool,
    expect_fail: bool,
    reply: &CommandReply,
    site: TrialSite<'_>,
) -> Outcome {
    if expected {
        if reply.ok {
            return Outcome::Authorized;
        }
        if reply.code == Some(AUTHORIZATION_ERROR_CODE) {
            return Outcome::Mismatch {
                kind: MismatchKind::UnexpectedDenial,
                message: format!(
                    "expected authorization success but received {reply}{}",
                    site.suffix()
                ),
            };
        }
        if !expect_fail && reply.code != Some(UNSUPPORTED_OPERATION_CODE) {
            return Outcome::Mismatch {
                kind: MismatchKind::CommandFailed,
                message: format!("command failed with {reply}{}", site.suffix()),
            };
        }
        return Outcome::Tolerated { code: reply.code };
    }

    if reply.ok || reply.code != Some(AUTHORIZATION_ERROR_CODE) {
        return Outcome::Mismatch {
            kind: MismatchKind::UnexpectedAuthorization,
            message: format!(
                "expected authorization failure but received result {reply}{}",
                site.suffix()
            ),
        };
    }
    Outcome::Denied
}

/// Outcome for a success hook that rejected an authorized reply.
pub fn success_hook_failure(reason: &str, site: TrialSite<'_>) -> Outcome {
    Outcome::Mismatch {
        kind: MismatchKind::SuccessHookFailed,
        message: format!("success hook failed: {reason}{}", site.suffix()),
    }
}
