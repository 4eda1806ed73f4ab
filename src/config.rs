//! Agent configuration.
//!
//! Stored as camelCase JSON, by default at `<config_dir>/hostscope/config.json`.
//! Every field has a default so an absent or partial file is fine.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::exec::DEFAULT_TIMEOUT;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    /// Base URL of the collector that receives reports.
    pub collector_url: Option<String>,
    pub api_key: Option<String>,
    /// Label used in generated share links.
    pub node_name: Option<String>,
    pub proc_path: PathBuf,
    /// Where the host's proc tree is bind-mounted when running in a container.
    pub host_proc_path: PathBuf,
    pub docker_binary: String,
    pub http_timeout_secs: u64,
    pub dns_timeout_ms: u64,
    pub command_timeout_secs: u64,
    pub public_ip_url: String,
    /// Service name (lowercase) to config paths tried before the built-in defaults.
    pub extra_config_paths: BTreeMap<String, Vec<PathBuf>>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            collector_url: None,
            api_key: None,
            node_name: None,
            proc_path: PathBuf::from("/proc"),
            host_proc_path: PathBuf::from("/host/proc"),
            docker_binary: "docker".to_string(),
            http_timeout_secs: 10,
            dns_timeout_ms: 3000,
            command_timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            public_ip_url: "https://api.ipify.org".to_string(),
            extra_config_paths: BTreeMap::new(),
        }
    }
}

impl AgentConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("hostscope").join("config.json"))
    }

    /// Load from an explicit path, else the default location if it exists,
    /// else defaults. Environment overrides are applied last.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.is_file() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("invalid config {}: {}", path.display(), e)))
    }

    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("HOSTSCOPE_COLLECTOR_URL") {
            self.collector_url = Some(url);
        }
        if let Some(key) = lookup("HOSTSCOPE_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(name) = lookup("HOSTSCOPE_NODE_NAME") {
            self.node_name = Some(name);
        }
        if let Some(path) = lookup("HOSTSCOPE_HOST_PROC") {
            self.host_proc_path = PathBuf::from(path);
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn dns_timeout(&self) -> Duration {
        Duration::from_millis(self.dns_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Configured node name, else the kernel hostname, else "node".
    pub fn resolved_node_name(&self) -> String {
        if let Some(name) = self.node_name.as_ref().filter(|n| !n.trim().is_empty()) {
            return name.trim().to_string();
        }
        std::fs::read_to_string(self.proc_path.join("sys/kernel/hostname"))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "node".to_string())
    }
}
