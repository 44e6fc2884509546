//! grid configuration
//!
//! defaults mirror the on-disk layout of a single-host grid:
//!
//! ```text
//! data_storage/node{1,2,3}/   ciphertext replicas (+ honeypot on node1)
//! key_storage/node{1,2,3}/    key shares
//! registry.db                 asset registry
//! audit_trail.log             audit trail
//! security_events.log         watchdog breach log
//! performance_metrics.json    latency ledger
//! ```
//!
//! any field can be overridden from a toml file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::quorum::{Topology, DEFAULT_NODES, DEFAULT_THRESHOLD, SECRET_LEN};
use crate::store::FsStore;
use crate::watchdog::{normalized_hash, Watchdog};
use crate::{Error, Result};

/// known-good honeypot content
pub const BAIT_CONTENT: &str = "# ADMIN CREDENTIALS - DO NOT SHARE
username: admin1
password:admin@123";

/// honeypot file name, planted in the first data node
pub const HONEYPOT_FILE: &str = "admin_credentials.txt";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// node display names
    pub node_names: Vec<String>,
    /// shares needed to reconstruct a key
    pub threshold: usize,
    /// ciphertext storage root per node
    pub data_nodes: Vec<PathBuf>,
    /// key share storage root per node
    pub key_nodes: Vec<PathBuf>,
    pub registry_path: PathBuf,
    pub audit_log: PathBuf,
    pub security_log: PathBuf,
    pub latency_log: PathBuf,
    /// decoy credential file watched for tampering
    pub honeypot: PathBuf,
    /// known-good honeypot content
    pub bait_content: String,
    /// simulated per-node write delay
    pub write_latency_ms: u64,
    /// watchdog poll period
    pub watchdog_interval_ms: u64,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self::rooted_at(Path::new(""))
    }
}

impl GridConfig {
    /// default layout under `base`
    pub fn rooted_at(base: &Path) -> Self {
        let data_nodes: Vec<PathBuf> = (1..=3)
            .map(|i| base.join("data_storage").join(format!("node{}", i)))
            .collect();
        let key_nodes = (1..=3)
            .map(|i| base.join("key_storage").join(format!("node{}", i)))
            .collect();
        let honeypot = data_nodes[0].join(HONEYPOT_FILE);

        Self {
            node_names: DEFAULT_NODES.iter().map(|s| s.to_string()).collect(),
            threshold: DEFAULT_THRESHOLD,
            data_nodes,
            key_nodes,
            registry_path: base.join("registry.db"),
            audit_log: base.join("audit_trail.log"),
            security_log: base.join("security_events.log"),
            latency_log: base.join("performance_metrics.json"),
            honeypot,
            bait_content: BAIT_CONTENT.to_string(),
            write_latency_ms: 10,
            watchdog_interval_ms: 1000,
        }
    }

    /// load from a toml file; missing fields take defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        info!("loaded config from {}", path.display());
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        let nodes = self.node_names.len();
        if self.data_nodes.len() != nodes || self.key_nodes.len() != nodes {
            return Err(Error::Config(format!(
                "{} node names but {} data roots and {} key roots",
                nodes,
                self.data_nodes.len(),
                self.key_nodes.len()
            )));
        }
        self.topology().scheme()?;
        if self.watchdog_interval_ms == 0 {
            return Err(Error::Config("watchdog interval must be positive".into()));
        }
        Ok(())
    }

    /// create every node directory
    pub fn prepare(&self) -> Result<()> {
        self.validate()?;
        self.data_store().create_dirs()?;
        self.key_store().create_dirs()?;
        Ok(())
    }

    pub fn topology(&self) -> Topology {
        Topology {
            nodes: self.node_names.clone(),
            threshold: self.threshold,
            secret_len: SECRET_LEN,
        }
    }

    pub fn data_store(&self) -> FsStore {
        FsStore::new(self.data_nodes.clone(), "enc")
    }

    pub fn key_store(&self) -> FsStore {
        FsStore::new(self.key_nodes.clone(), "key")
    }

    pub fn golden_hash(&self) -> String {
        normalized_hash(&self.bait_content)
    }

    pub fn watchdog(&self) -> Watchdog {
        Watchdog::new(self.honeypot.clone(), self.bait_content.clone())
    }

    pub fn write_latency(&self) -> Duration {
        Duration::from_millis(self.write_latency_ms)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_layout() {
        let config = GridConfig::default();
        assert_eq!(config.data_nodes[1], PathBuf::from("data_storage/node2"));
        assert_eq!(config.key_nodes[2], PathBuf::from("key_storage/node3"));
        assert_eq!(
            config.honeypot,
            PathBuf::from("data_storage/node1/admin_credentials.txt")
        );
        assert_eq!(config.topology(), Topology::default());
        config.validate().unwrap();
    }

    #[test]
    fn test_golden_hash_matches_normalized_bait() {
        let config = GridConfig::default();
        assert_eq!(
            config.golden_hash(),
            normalized_hash("#ADMINCREDENTIALS-DONOTSHAREusername:admin1password:admin@123")
        );
    }

    #[test]
    fn test_load_partial_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("grid.toml");
        fs::write(&path, "write_latency_ms = 0\nthreshold = 3\n").unwrap();

        let config = GridConfig::load(&path).unwrap();
        assert_eq!(config.write_latency_ms, 0);
        assert_eq!(config.threshold, 3);
        assert_eq!(config.node_names.len(), 3);
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = GridConfig::rooted_at(Path::new("/srv/vault"));
        let parsed: GridConfig = toml::from_str(&config.to_toml().unwrap()).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_invalid_configs() {
        let mut config = GridConfig::default();
        config.threshold = 4;
        assert!(matches!(config.validate(), Err(Error::InvalidScheme { .. })));

        let mut config = GridConfig::default();
        config.key_nodes.pop();
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "threshold = \"two\"").unwrap();
        assert!(matches!(GridConfig::load(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_prepare_creates_dirs() {
        let dir = tempdir().unwrap();
        let config = GridConfig::rooted_at(dir.path());
        config.prepare().unwrap();
        for root in config.data_nodes.iter().chain(&config.key_nodes) {
            assert!(root.is_dir());
        }
    }
}
