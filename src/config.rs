//! Coordinator configuration with TOML file support

use crate::transaction::NetworkId;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// A chain network the wallet can switch to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub id: NetworkId,
    pub name: String,
}

impl NetworkConfig {
    pub fn new(id: NetworkId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Coordinator configuration
///
/// Can be loaded from a TOML file via [`CoordinatorConfig::from_toml_file`]
/// or built programmatically with [`Default`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Networks available for switching
    #[serde(default = "default_networks")]
    pub networks: Vec<NetworkConfig>,

    /// Network served by the history indexer
    #[serde(default = "default_primary_network")]
    pub primary_network: NetworkId,

    /// Network active at startup
    #[serde(default = "default_primary_network")]
    pub default_network: NetworkId,

    /// Block polling interval (milliseconds)
    #[serde(default = "default_block_poll_interval_ms")]
    pub block_poll_interval_ms: u64,

    /// Balance polling interval (milliseconds)
    #[serde(default = "default_balance_poll_interval_ms")]
    pub balance_poll_interval_ms: u64,
}

fn default_networks() -> Vec<NetworkConfig> {
    vec![
        NetworkConfig::new(1, "Main"),
        NetworkConfig::new(3, "Ropsten"),
        NetworkConfig::new(4, "Rinkeby"),
    ]
}

fn default_primary_network() -> NetworkId {
    1
}

fn default_block_poll_interval_ms() -> u64 {
    3_000
}

fn default_balance_poll_interval_ms() -> u64 {
    5_000
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            networks: default_networks(),
            primary_network: default_primary_network(),
            default_network: default_primary_network(),
            block_poll_interval_ms: default_block_poll_interval_ms(),
            balance_poll_interval_ms: default_balance_poll_interval_ms(),
        }
    }
}

impl CoordinatorConfig {
    /// Load and validate configuration from a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!("{}: {}", path.as_ref().display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.networks.is_empty() {
            return Err(Error::Config("no networks configured".to_string()));
        }

        let mut seen = HashSet::new();
        for network in &self.networks {
            if !seen.insert(network.id) {
                return Err(Error::Config(format!("duplicate network id {}", network.id)));
            }
        }

        for (field, id) in [
            ("primary_network", self.primary_network),
            ("default_network", self.default_network),
        ] {
            if !self.has_network(id) {
                return Err(Error::Config(format!("{} {} is not configured", field, id)));
            }
        }

        if self.block_poll_interval_ms == 0 || self.balance_poll_interval_ms == 0 {
            return Err(Error::Config("poll intervals must be positive".to_string()));
        }
        Ok(())
    }

    pub fn has_network(&self, id: NetworkId) -> bool {
        self.networks.iter().any(|network| network.id == id)
    }

    pub fn network(&self, id: NetworkId) -> Option<&NetworkConfig> {
        self.networks.iter().find(|network| network.id == id)
    }

    pub fn block_poll_interval(&self) -> Duration {
        Duration::from_millis(self.block_poll_interval_ms)
    }

    pub fn balance_poll_interval(&self) -> Duration {
        Duration::from_millis(self.balance_poll_interval_ms)
    }
}
