//! Configuration loading and management.

use crate::cases::Coverage;
use crate::error::{Error, Result};
use crate::provision::{Credentials, UserProvisioner};
use crate::system::Topology;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_PATH_ENV: &str = "AUTHZ_MATRIX_CONFIG";
const DEFAULT_PASSWORD: &str = "Password@a1b";

/// Which deployments a driver run covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopologySelection {
    Standalone,
    Sharded,
    #[default]
    Both,
}

impl TopologySelection {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "standalone" | "single" => Some(Self::Standalone),
            "sharded" | "multi" => Some(Self::Sharded),
            "both" | "all" => Some(Self::Both),
            _ => None,
        }
    }

    /// Deployments to run, standalone first.
    pub fn topologies(self, shards: u8) -> Vec<Topology> {
        match self {
            Self::Standalone => vec![Topology::Standalone],
            Self::Sharded => vec![Topology::Sharded { shards }],
            Self::Both => vec![Topology::Standalone, Topology::Sharded { shards }],
        }
    }
}

pub fn parse_coverage(value: &str) -> Option<Coverage> {
    match value.trim().to_ascii_lowercase().as_str() {
        "declared" => Some(Coverage::Declared),
        "full" | "full_catalog" | "full-catalog" => Some(Coverage::FullCatalog),
        _ => None,
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    #[serde(alias = "adminDb")]
    pub admin_db: String,
    /// Database that database-scoped roles bind on.
    #[serde(alias = "firstDb")]
    pub first_db: String,
    #[serde(alias = "secondDb")]
    pub second_db: String,

    #[serde(alias = "operatorUser")]
    pub operator_user: String,
    #[serde(alias = "operatorPassword")]
    pub operator_password: String,
    /// Fixed name reused by every probe identity.
    #[serde(alias = "probeUser")]
    pub probe_user: String,
    #[serde(alias = "probePassword")]
    pub probe_password: String,

    pub coverage: Coverage,
    pub topology: TopologySelection,
    pub shards: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            admin_db: "admin".to_string(),
            first_db: "roles_commands_1".to_string(),
            second_db: "roles_commands_2".to_string(),
            operator_user: "admin".to_string(),
            operator_password: DEFAULT_PASSWORD.to_string(),
            probe_user: "monitor".to_string(),
            probe_password: DEFAULT_PASSWORD.to_string(),
            coverage: Coverage::Declared,
            topology: TopologySelection::Both,
            shards: 2,
        }
    }
}

impl Config {
    /// Global config directory (`<config_dir>/authz-matrix`).
    pub fn global_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("authz-matrix"))
    }

    /// Load with precedence: explicit path, `AUTHZ_MATRIX_CONFIG`, the global
    /// config file, defaults. Environment field overrides apply last.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
        let mut config = match explicit.map(Path::to_path_buf).or(env_path) {
            Some(path) => {
                if !path.exists() {
                    return Err(Error::config(format!(
                        "config file not found: {}",
                        path.display()
                    )));
                }
                Self::load_from_path(&path)?
            }
            None => match Self::global_dir() {
                Some(dir) => Self::load_from_path(&dir.join("config.json"))?,
                None => Self::default(),
            },
        };
        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load settings from a specific path; a missing or empty file means
    /// defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_json::from_str(&content).map_err(|e| {
            Error::config(format!(
                "Failed to parse config file {}: {e}",
                path.display()
            ))
        })
    }

    /// Apply `AUTHZ_MATRIX_*` overrides through `lookup`.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<()> {
        let text = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(value) = text("AUTHZ_MATRIX_ADMIN_DB") {
            self.admin_db = value;
        }
        if let Some(value) = text("AUTHZ_MATRIX_FIRST_DB") {
            self.first_db = value;
        }
        if let Some(value) = text("AUTHZ_MATRIX_OPERATOR_USER") {
            self.operator_user = value;
        }
        if let Some(value) = text("AUTHZ_MATRIX_OPERATOR_PASSWORD") {
            self.operator_password = value;
        }
        if let Some(value) = text("AUTHZ_MATRIX_PROBE_USER") {
            self.probe_user = value;
        }
        if let Some(value) = text("AUTHZ_MATRIX_PROBE_PASSWORD") {
            self.probe_password = value;
        }
        if let Some(value) = text("AUTHZ_MATRIX_COVERAGE") {
            self.coverage = parse_coverage(&value).ok_or_else(|| {
                Error::config(format!("AUTHZ_MATRIX_COVERAGE: unknown coverage {value}"))
            })?;
        }
        if let Some(value) = text("AUTHZ_MATRIX_TOPOLOGY") {
            self.topology = TopologySelection::parse(&value).ok_or_else(|| {
                Error::config(format!("AUTHZ_MATRIX_TOPOLOGY: unknown topology {value}"))
            })?;
        }
        if let Some(value) = text("AUTHZ_MATRIX_SHARDS") {
            self.shards = value.trim().parse().map_err(|_| {
                Error::config(format!("AUTHZ_MATRIX_SHARDS: not a shard count: {value}"))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.operator_user == self.probe_user {
            return Err(Error::config(format!(
                "operator and probe must be distinct users (both are {})",
                self.probe_user
            )));
        }
        for (field, value) in [
            ("admin_db", &self.admin_db),
            ("first_db", &self.first_db),
            ("operator_user", &self.operator_user),
            ("probe_user", &self.probe_user),
        ] {
            if value.trim().is_empty() {
                return Err(Error::config(format!("{field} must not be empty")));
            }
        }
        if self.shards == 0 {
            return Err(Error::config("shards must be at least 1"));
        }
        Ok(())
    }

    pub fn operator_credentials(&self) -> Credentials {
        Credentials::new(&self.operator_user, &self.operator_password)
    }

    pub fn probe_credentials(&self) -> Credentials {
        Credentials::new(&self.probe_user, &self.probe_password)
    }

    pub fn provisioner(&self) -> UserProvisioner {
        UserProvisioner::new(
            self.admin_db.clone(),
            self.operator_credentials(),
            self.probe_credentials(),
        )
    }

    pub fn topologies(&self) -> Vec<Topology> {
        self.topology.topologies(self.shards)
    }
}
