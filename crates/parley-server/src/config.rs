//! Server configuration: TOML file + CLI overrides + credential from env.

use parley_core::{RelayError, RelayResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Environment variable holding the upstream credential. Takes precedence
/// over the config file.
pub const CREDENTIAL_ENV_VAR: &str = "PARLEY_API_KEY";

/// Top-level config file structure.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub upstream: UpstreamSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

/// How the credential is attached to the upstream request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthScheme {
    /// Signed query parameter, e.g. `?key=<credential>`.
    Query,
    /// HTTP header on the upgrade request.
    Header,
}

/// `[upstream]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamSection {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_auth_scheme")]
    pub auth_scheme: AuthScheme,
    #[serde(default = "default_auth_param")]
    pub auth_param: String,
    /// Credential; the `PARLEY_API_KEY` env var takes precedence.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_dial_timeout_secs")]
    pub dial_timeout_secs: u64,
}

impl Default for UpstreamSection {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            auth_scheme: default_auth_scheme(),
            auth_param: default_auth_param(),
            api_key: None,
            dial_timeout_secs: default_dial_timeout_secs(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_endpoint() -> String {
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContent".to_string()
}
fn default_auth_scheme() -> AuthScheme {
    AuthScheme::Query
}
fn default_auth_param() -> String {
    "key".to_string()
}
fn default_dial_timeout_secs() -> u64 {
    10
}

/// Resolved upstream dial settings.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub endpoint: String,
    pub auth_scheme: AuthScheme,
    pub auth_param: String,
    pub dial_timeout: Duration,
}

/// Resolved server configuration (file + CLI overrides + env applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub upstream: UpstreamConfig,
    /// Upstream credential. `None` means every session is refused with a
    /// configuration-error close. Never logged.
    pub credential: Option<Arc<str>>,
}

impl ServerConfig {
    /// Load config from TOML file, then apply CLI overrides and the
    /// credential env var.
    ///
    /// A missing credential is a valid loaded state, not an error: the
    /// server starts and refuses each session at accept time.
    pub fn load(
        config_path: Option<&Path>,
        cli_bind: Option<&str>,
        cli_port: Option<u16>,
        cli_upstream: Option<&str>,
    ) -> RelayResult<Self> {
        let file_config = if let Some(path) = config_path {
            let expanded = expand_tilde(path);
            if expanded.exists() {
                info!(path = %expanded.display(), "loading config file");
                let content = std::fs::read_to_string(&expanded)?;
                toml::from_str::<ConfigFile>(&content)
                    .map_err(|e| RelayError::Config(format!("config parse error: {e}")))?
            } else {
                info!(path = %expanded.display(), "config file not found, using defaults");
                ConfigFile {
                    server: ServerSection::default(),
                    upstream: UpstreamSection::default(),
                }
            }
        } else {
            ConfigFile {
                server: ServerSection::default(),
                upstream: UpstreamSection::default(),
            }
        };

        // Merge CLI overrides
        let bind = cli_bind
            .map(|s| s.to_string())
            .unwrap_or(file_config.server.bind);
        let port = cli_port.unwrap_or(file_config.server.port);
        let endpoint = cli_upstream
            .map(|s| s.to_string())
            .unwrap_or(file_config.upstream.endpoint);

        let credential = resolve_credential(
            std::env::var(CREDENTIAL_ENV_VAR).ok(),
            file_config.upstream.api_key,
        );
        if credential.is_none() {
            tracing::warn!(
                "no upstream credential configured — all sessions will be refused"
            );
        }

        Ok(Self {
            bind,
            port,
            upstream: UpstreamConfig {
                endpoint,
                auth_scheme: file_config.upstream.auth_scheme,
                auth_param: file_config.upstream.auth_param,
                dial_timeout: Duration::from_secs(file_config.upstream.dial_timeout_secs),
            },
            credential,
        })
    }

    /// The socket address to listen on.
    pub fn listen_addr(&self) -> RelayResult<std::net::SocketAddr> {
        format!("{}:{}", self.bind, self.port)
            .parse()
            .map_err(|e| RelayError::Config(format!("invalid listen address: {e}")))
    }
}

/// Pick the credential: env var wins over the config file; empty strings
/// count as absent.
fn resolve_credential(env: Option<String>, file: Option<String>) -> Option<Arc<str>> {
    env.filter(|s| !s.is_empty())
        .or(file.filter(|s| !s.is_empty()))
        .map(Arc::from)
}

/// Expand `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s.as_ref())
}
