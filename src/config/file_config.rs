use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub api_url: Option<String>,
    pub ws_url: Option<String>,
    pub token: Option<String>,
    pub user_id: Option<String>,
    pub request_timeout_sec: Option<u64>,
    pub reconcile: Option<String>,
    pub load_baseline_on_login: Option<bool>,

    // Feature configs
    pub stream: Option<StreamConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct StreamConfig {
    pub reconnect_delay_ms: Option<u64>,
    pub heartbeat_ms: Option<u64>,
    pub connect_timeout_sec: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
