//! Node configuration
//!
//! A small TOML file covers everything the runtime needs: where durable
//! state lives and where the collector is. Every field has a default so a
//! bare `pigeon run` works out of the box.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use lib_storage::KvStore;
use serde::Deserialize;
use tracing::debug;

/// KV key holding the collector endpoint last used.
pub const ENDPOINT_KEY: &str = "uploader.endpoint";

const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8080/api/messages";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Directory for identity, the message log and synced-id snapshots.
    pub data_dir: PathBuf,
    /// Overrides the persisted device name when set.
    pub device_name: Option<String>,
    pub collector: CollectorConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Full URL of the collector's message intake.
    pub endpoint: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pigeon");
        Self {
            data_dir,
            device_name: None,
            collector: CollectorConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load a config file, falling back to defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("parsing config {}", path.display()))?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if let Some(endpoint) = &self.collector.endpoint {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                bail!("collector endpoint must be an http(s) URL, got {endpoint}");
            }
        }
        if let Some(name) = &self.device_name {
            if name.trim().is_empty() {
                bail!("device_name must not be blank");
            }
        }
        Ok(())
    }

    /// The collector endpoint to use, persisting the choice.
    ///
    /// A configured endpoint wins and is stored; otherwise the previously
    /// stored endpoint is reused; otherwise the default.
    pub fn resolve_endpoint(&self, kv: &KvStore) -> String {
        if let Some(endpoint) = &self.collector.endpoint {
            if let Err(e) = kv.put(ENDPOINT_KEY, endpoint) {
                debug!("could not persist collector endpoint: {e:#}");
            }
            return endpoint.clone();
        }
        match kv.get::<String>(ENDPOINT_KEY) {
            Ok(Some(stored)) => stored,
            _ => DEFAULT_ENDPOINT.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let config = NodeConfig::default();
        assert!(config.data_dir.ends_with("pigeon"));
        assert!(config.collector.endpoint.is_none());
    }

    #[test]
    fn parses_a_full_file() {
        let raw = r#"
            data_dir = "/tmp/pigeon-test"
            device_name = "Field Team 3"

            [collector]
            endpoint = "https://collector.example/api/messages"
        "#;
        let config: NodeConfig = toml::from_str(raw).expect("parse");
        config.validate().expect("valid");
        assert_eq!(config.device_name.as_deref(), Some("Field Team 3"));
    }

    #[test]
    fn rejects_non_http_endpoint() {
        let raw = r#"
            [collector]
            endpoint = "ftp://nope"
        "#;
        let config: NodeConfig = toml::from_str(raw).expect("parse");
        assert!(config.validate().is_err());
    }

    #[test]
    fn endpoint_resolution_prefers_config_then_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let kv = KvStore::open(dir.path()).expect("kv");

        let mut config = NodeConfig::default();
        config.collector.endpoint = Some("https://collector.example/api/messages".into());
        assert_eq!(
            config.resolve_endpoint(&kv),
            "https://collector.example/api/messages"
        );

        // Next run without a configured endpoint reuses the stored one.
        config.collector.endpoint = None;
        assert_eq!(
            config.resolve_endpoint(&kv),
            "https://collector.example/api/messages"
        );
    }
}
