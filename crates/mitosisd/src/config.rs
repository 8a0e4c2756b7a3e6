//! mitosis.toml configuration parser.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use semver::Version;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use mitosis_split::{ClusterRole, NodeCapabilities, SplitConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MitosisConfig {
    /// Directory holding the catalog and every local shard's store.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub split: SplitSettings,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub shards: Vec<ShardConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub role: ClusterRole,
    /// Feature compatibility version the cluster currently runs.
    pub feature_version: String,
    /// Version the split-shard command requires.
    pub required_feature_version: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            role: ClusterRole::ConfigServer,
            feature_version: "4.4.0".to_string(),
            required_feature_version: "4.4.0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitSettings {
    pub retry_attempts: u32,
    pub refresh_timeout_secs: u64,
    pub command_timeout_secs: u64,
    pub max_batch_bytes: usize,
    pub batch_headroom_bytes: usize,
}

impl Default for SplitSettings {
    fn default() -> Self {
        let defaults = SplitConfig::default();
        Self {
            retry_attempts: defaults.retry_attempts,
            refresh_timeout_secs: defaults.refresh_timeout.as_secs(),
            command_timeout_secs: defaults.command_timeout.as_secs(),
            max_batch_bytes: defaults.max_batch_bytes,
            batch_headroom_bytes: defaults.batch_headroom_bytes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub port: u16,
    /// Bearer token that grants the internal cluster privilege.
    pub admin_token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: 8443,
            admin_token: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardConfig {
    pub id: String,
    pub host: String,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/mitosis")
}

impl MitosisConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let config: MitosisConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Scaffold a config with two local shards and a fresh admin token.
    pub fn scaffold(data_dir: &Path) -> Self {
        MitosisConfig {
            data_dir: data_dir.to_path_buf(),
            node: NodeConfig::default(),
            split: SplitSettings::default(),
            api: ApiConfig {
                port: 8443,
                admin_token: Some(Uuid::new_v4().simple().to_string()),
            },
            shards: vec![
                ShardConfig {
                    id: "rs0".to_string(),
                    host: "rs0/localhost:27018".to_string(),
                },
                ShardConfig {
                    id: "rs1".to_string(),
                    host: "rs1/localhost:27019".to_string(),
                },
            ],
        }
    }

    /// Reject duplicate shard ids or hosts and unparsable versions.
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut ids = HashSet::new();
        let mut hosts = HashSet::new();
        for shard in &self.shards {
            if !ids.insert(shard.id.as_str()) {
                bail!("duplicate shard id {}", shard.id);
            }
            if !hosts.insert(shard.host.as_str()) {
                bail!("duplicate shard host {}", shard.host);
            }
        }
        self.node_capabilities()?;
        self.split_config()?;
        Ok(())
    }

    pub fn node_capabilities(&self) -> anyhow::Result<NodeCapabilities> {
        Ok(NodeCapabilities {
            role: self.node.role,
            feature_version: parse_version("node.feature_version", &self.node.feature_version)?,
        })
    }

    pub fn split_config(&self) -> anyhow::Result<SplitConfig> {
        Ok(SplitConfig {
            retry_attempts: self.split.retry_attempts,
            refresh_timeout: Duration::from_secs(self.split.refresh_timeout_secs),
            command_timeout: Duration::from_secs(self.split.command_timeout_secs),
            max_batch_bytes: self.split.max_batch_bytes,
            batch_headroom_bytes: self.split.batch_headroom_bytes,
            required_feature_version: parse_version(
                "node.required_feature_version",
                &self.node.required_feature_version,
            )?,
            ..SplitConfig::default()
        })
    }
}

fn parse_version(field: &str, raw: &str) -> anyhow::Result<Version> {
    Version::parse(raw).with_context(|| format!("{field}: invalid version {raw:?}"))
}
