//! Error types for the authorization matrix harness.

use thiserror::Error;

/// Result type alias using our error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the harness.
///
/// Authorization mismatches are not errors: they are collected as
/// [`FailureRecord`](crate::report::FailureRecord)s and only surface here as
/// [`Error::Mismatches`] once a run has finished.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration or catalog errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A test case declares an expectation for a role the catalog does not know
    #[error("Role {role} found in test: {test}, but doesn't exist in role catalog")]
    UnknownRole { test: String, role: String },

    /// Setup/teardown hook failures; the environment can no longer be trusted
    #[error("Environment error in {phase} for {test}: {message}")]
    Environment {
        phase: String,
        test: String,
        message: String,
    },

    /// Failures talking to the system under test
    #[error("Transport error: {0}")]
    Transport(String),

    /// Operator or probe credentials were rejected
    #[error("Authentication error: {0}")]
    Auth(String),

    /// One or more trials disagreed with their declared expectation
    #[error("{count} authorization mismatch(es):\n{report}")]
    Mismatches { count: usize, report: String },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] Box<std::io::Error>),

    /// JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] Box<serde_json::Error>),
}

impl Error {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an unknown-role error.
    pub fn unknown_role(test: impl Into<String>, role: impl Into<String>) -> Self {
        Self::UnknownRole {
            test: test.into(),
            role: role.into(),
        }
    }

    /// Create an environment error for a hook phase (`setup`, `teardown`, ...).
    pub fn environment(
        phase: impl Into<String>,
        test: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Environment {
            phase: phase.into(),
            test: test.into(),
            message: message.into(),
        }
    }

    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Create an authentication error.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Box::new(value))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(Box::new(value))
    }
}
