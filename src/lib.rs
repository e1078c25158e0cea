//! Authorization matrix conformance harness.
//!
//! Checks a command-dispatching server's role-based access control against a
//! declared expectation matrix. For every (test case, role) pair the runner
//! binds a fresh probe identity to the role, dispatches the command as that
//! identity, and classifies the reply against the declared expectation. All
//! disagreements are collected and reported together.
//!
//! Entry points:
//! - [`runner::MatrixRunner`] / [`runner::run_matrix`] for a full run
//! - [`validate::validate`] for the pre-flight catalog check
//! - [`memory::InMemoryDeployment`] as a reference system under test

#![forbid(unsafe_code)]
#![cfg_attr(
    test,
    allow(
        clippy::match_same_arms,
        clippy::uninlined_format_args,
        clippy::missing_const_for_fn,
        clippy::too_many_lines
    )
)]
#![allow(
    clippy::must_use_candidate,
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::similar_names
)]

pub mod builtin;
pub mod cases;
pub mod cli;
pub mod classify;
pub mod config;
pub mod error;
pub mod memory;
pub mod provision;
pub mod report;
pub mod roles;
pub mod runner;
pub mod system;
pub mod validate;

pub use error::{Error, Result};
