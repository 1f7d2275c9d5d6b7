mod file_config;

pub use file_config::{FileConfig, StreamConfig};

use anyhow::{bail, Context, Result};
use reqwest::Url;
use std::path::PathBuf;
use std::time::Duration;

use crate::notifications::ReconcilePolicy;
use crate::session::{Session, UserId};
use crate::stream::StreamSettings;

pub const DEFAULT_API_URL: &str = "http://localhost:8080/api";
pub const DEFAULT_WS_URL: &str = "ws://localhost:8080/ws";

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub api_url: String,
    pub ws_url: String,
    pub token: Option<String>,
    pub user_id: Option<String>,
    pub request_timeout_sec: u64,
    pub reconcile: ReconcilePolicy,
    pub reconnect_delay_ms: u64,
    pub heartbeat_ms: u64,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            token: None,
            user_id: None,
            request_timeout_sec: 30,
            reconcile: ReconcilePolicy::Additive,
            reconnect_delay_ms: 5000,
            heartbeat_ms: 10000,
        }
    }
}

/// Connection flags shared by the binaries.
#[derive(clap::Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// Path to a TOML config file. Values in the file override flags.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Base URL of the REST API.
    #[clap(long, env = "MEDTRACKER_API_URL", default_value = DEFAULT_API_URL)]
    pub api_url: String,

    /// URL of the STOMP broker endpoint. http(s) is rewritten to ws(s).
    #[clap(long, env = "MEDTRACKER_WS_URL", default_value = DEFAULT_WS_URL)]
    pub ws_url: String,

    /// Bearer token of an existing session.
    #[clap(long, env = "MEDTRACKER_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// User id of an existing session, required together with --token.
    #[clap(long, env = "MEDTRACKER_USER_ID")]
    pub user_id: Option<String>,

    /// Timeout in seconds for REST requests.
    #[clap(long, default_value_t = 30)]
    pub request_timeout_sec: u64,

    /// How pushed alerts are merged with the history: additive or dedup.
    #[clap(long, default_value = "additive")]
    pub reconcile: ReconcilePolicy,

    /// Delay in milliseconds before reconnecting a lost stream.
    #[clap(long, default_value_t = 5000)]
    pub reconnect_delay_ms: u64,

    /// STOMP heart-beat interval in milliseconds, 0 disables it.
    #[clap(long, default_value_t = 10000)]
    pub heartbeat_ms: u64,
}

impl ConnectionArgs {
    /// Load the optional config file and resolve the final configuration.
    pub fn resolve(&self) -> Result<AppConfig> {
        let file_config = match &self.config {
            Some(path) => Some(FileConfig::load(path)?),
            None => None,
        };
        AppConfig::resolve(&self.to_cli_config(), file_config)
    }

    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            api_url: self.api_url.clone(),
            ws_url: self.ws_url.clone(),
            token: self.token.clone(),
            user_id: self.user_id.clone(),
            request_timeout_sec: self.request_timeout_sec,
            reconcile: self.reconcile,
            reconnect_delay_ms: self.reconnect_delay_ms,
            heartbeat_ms: self.heartbeat_ms,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_url: String,
    pub request_timeout: Duration,
    pub reconcile: ReconcilePolicy,
    pub load_baseline_on_login: bool,

    pub stream: StreamSettings,

    /// Credentials to start with, if any were configured.
    pub session: Option<Session>,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let api_url = file.api_url.unwrap_or_else(|| cli.api_url.clone());
        let api_url = validate_url(&api_url, &["http", "https"])
            .with_context(|| format!("Invalid API URL: {}", api_url))?;

        let ws_url = normalize_ws_url(&file.ws_url.unwrap_or_else(|| cli.ws_url.clone()));
        let ws_url = validate_url(&ws_url, &["ws", "wss"])
            .with_context(|| format!("Invalid broker URL: {}", ws_url))?;

        let request_timeout_sec = file.request_timeout_sec.unwrap_or(cli.request_timeout_sec);
        if request_timeout_sec == 0 {
            bail!("request_timeout_sec must be greater than zero");
        }

        let reconcile = match file.reconcile {
            Some(s) => s.parse::<ReconcilePolicy>().map_err(anyhow::Error::msg)?,
            None => cli.reconcile,
        };

        let stream_file = file.stream.unwrap_or_default();
        let connect_timeout_sec = stream_file.connect_timeout_sec.unwrap_or(10);
        if connect_timeout_sec == 0 {
            bail!("stream.connect_timeout_sec must be greater than zero");
        }
        let stream = StreamSettings {
            ws_url,
            reconnect_delay: Duration::from_millis(
                stream_file
                    .reconnect_delay_ms
                    .unwrap_or(cli.reconnect_delay_ms),
            ),
            heartbeat: Duration::from_millis(stream_file.heartbeat_ms.unwrap_or(cli.heartbeat_ms)),
            connect_timeout: Duration::from_secs(connect_timeout_sec),
        };

        let token = file.token.or_else(|| cli.token.clone());
        let user_id = file.user_id.or_else(|| cli.user_id.clone());
        let session = match (token, user_id) {
            (Some(token), Some(user_id)) => Some(Session {
                token,
                user_id: UserId::new(user_id),
                name: String::new(),
                email: String::new(),
            }),
            (None, None) => None,
            _ => bail!("token and user_id must be provided together"),
        };

        Ok(Self {
            api_url,
            request_timeout: Duration::from_secs(request_timeout_sec),
            reconcile,
            load_baseline_on_login: file.load_baseline_on_login.unwrap_or(true),
            stream,
            session,
        })
    }
}

/// Broker URLs are often configured with the HTTP scheme of the backend.
fn normalize_ws_url(url: &str) -> String {
    if url.starts_with("http") {
        url.replacen("http", "ws", 1)
    } else {
        url.to_string()
    }
}

fn validate_url(url: &str, schemes: &[&str]) -> Result<String> {
    let parsed = Url::parse(url)?;
    if !schemes.contains(&parsed.scheme()) {
        bail!(
            "unsupported scheme '{}', expected one of {:?}",
            parsed.scheme(),
            schemes
        );
    }
    Ok(url.trim_end_matches('/').to_string())
}
