// CLI configuration
// YAML file holding the server address, log filter, executor limits and seed organizations

use std::net::SocketAddr;
use std::path::Path;

use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use txs_engine::{ExecutorConfig, MemoryPersistence};

pub const DEFAULT_BIND: &str = "127.0.0.1:8080";
pub const DEFAULT_LOG_FILTER: &str = "warn";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Address `txs serve` listens on
    pub bind: SocketAddr,
    /// Used when `RUST_LOG` is unset
    pub log_filter: String,
    pub executor: ExecutorConfig,
    /// Organizations loaded into the in-memory backend at startup
    pub organizations: Vec<OrganizationSeed>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationSeed {
    pub id: Uuid,
    #[serde(default)]
    pub members: Vec<Uuid>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            executor: ExecutorConfig::default(),
            organizations: Vec::new(),
        }
    }
}

impl CliConfig {
    pub fn parse(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).wrap_err("invalid configuration")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read config file {}", path.display()))?;
        Self::parse(&content).wrap_err_with(|| format!("in {}", path.display()))
    }

    /// Load the file when one is given, otherwise use defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Register the configured organizations with the store
    pub fn seed(&self, store: &MemoryPersistence) {
        for org in &self.organizations {
            store.add_organization(org.id, org.members.iter().copied());
            tracing::debug!(org = %org.id, members = org.members.len(), "seeded organization");
        }
    }
}
