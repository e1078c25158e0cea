//! CLI argument parsing using Clap.

use crate::config::{Config, TopologySelection, parse_coverage};
use crate::error::{Error, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Authorization matrix conformance harness
#[derive(Parser, Debug)]
#[command(name = "authz_matrix")]
#[command(version, about, long_about = None)]
#[command(after_help = "Examples:
  authz_matrix                                   Run the built-in catalog on both topologies
  authz_matrix run --topology standalone         Run on a standalone deployment only
  authz_matrix run --catalog tests.json --report out/report.json
  authz_matrix validate --catalog tests.json     Pre-flight check only
  authz_matrix roles                             List the role catalog
")]
pub struct Cli {
    /// Configuration file (overrides AUTHZ_MATRIX_CONFIG)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Declarative test catalog (JSON); the built-in catalog when omitted
    #[arg(long, global = true)]
    pub catalog: Option<PathBuf>,

    /// Deployments to run against
    #[arg(long, global = true, value_parser = ["standalone", "sharded", "both"])]
    pub topology: Option<String>,

    /// Which roles each case runs: declared keys only, or the full catalog
    #[arg(long, global = true, value_parser = ["declared", "full"])]
    pub coverage: Option<String>,

    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run the matrix (default)
    Run {
        /// Write the JSON report here (one file per topology when several run)
        #[arg(long)]
        report: Option<PathBuf>,

        /// Append failure records as JSON lines
        #[arg(long)]
        jsonl: Option<PathBuf>,

        /// Force a policy decision on the reference deployment, e.g.
        /// `read:dropDatabase=allow`
        #[arg(long = "policy-override", value_name = "ROLE:COMMAND=allow|deny")]
        policy_overrides: Vec<String>,
    },

    /// Check the catalog against the role catalog without dispatching
    Validate,

    /// List the role catalog
    Roles,
}

impl Default for Commands {
    fn default() -> Self {
        Self::Run {
            report: None,
            jsonl: None,
            policy_overrides: Vec::new(),
        }
    }
}

/// One parsed `--policy-override`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyOverride {
    pub role: String,
    pub command: String,
    pub allow: bool,
}

impl PolicyOverride {
    pub fn parse(value: &str) -> Result<Self> {
        let invalid = || {
            Error::config(format!(
                "invalid policy override {value:?}: expected ROLE:COMMAND=allow|deny"
            ))
        };
        let (target, decision) = value.split_once('=').ok_or_else(invalid)?;
        let (role, command) = target.split_once(':').ok_or_else(invalid)?;
        let allow = match decision.trim() {
            "allow" => true,
            "deny" => false,
            _ => return Err(invalid()),
        };
        if role.trim().is_empty() || command.trim().is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            role: role.trim().to_string(),
            command: command.trim().to_string(),
            allow,
        })
    }
}

impl Cli {
    /// Command to execute; `run` when none was given.
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or_default()
    }

    /// Flags win over every other configuration source.
    pub fn apply_to(&self, config: &mut Config) -> Result<()> {
        if let Some(value) = &self.topology {
            config.topology = TopologySelection::parse(value)
                .ok_or_else(|| Error::config(format!("unknown topology {value}")))?;
        }
        if let Some(value) = &self.coverage {
            config.coverage = parse_coverage(value)
                .ok_or_else(|| Error::config(format!("unknown coverage {value}")))?;
        }
        Ok(())
    }
}
