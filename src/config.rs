use std::net::SocketAddr;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::repo::RepositoryRef;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Every section is optional; an absent or empty file yields the defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub upstream: UpstreamConfig,
    pub credentials: CredentialsConfig,
    pub target: TargetConfig,
    pub commit: CommitConfig,
    pub server: ServerConfig,
}

// ---------------------------------------------------------------------------
// Upstream
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Root of the REST API (e.g. `https://ghe.corp.example.com/api/v3`).
    pub api_url: String,
    /// Root of the web UI, used for browser links.
    pub web_url: String,
    /// Sent as `X-GitHub-Api-Version`; empty disables the header.
    pub api_version: String,
    pub user_agent: String,
    pub request_timeout_secs: u64,
    /// Minimum number of API calls to keep in reserve before self-throttling.
    pub api_rate_limit_buffer: u32,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.github.com".to_string(),
            web_url: "https://github.com".to_string(),
            api_version: "2022-11-28".to_string(),
            user_agent: concat!("codesave/", env!("CARGO_PKG_VERSION")).to_string(),
            request_timeout_secs: 30,
            api_rate_limit_buffer: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Name of the environment variable holding the access token.
    pub token_env: String,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            token_env: "CODESAVE_TOKEN".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Target repository
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// `owner/name` or repository URL used when none is given per call.
    pub repository: Option<RepositoryRef>,
    /// Directory solutions are written under. Empty writes to the root.
    pub path_prefix: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            repository: None,
            path_prefix: "leetcode".to_string(),
        }
    }
}

impl TargetConfig {
    /// `path` placed under [`Self::path_prefix`].
    pub fn remote_path(&self, path: &str) -> String {
        let prefix = self.path_prefix.trim_matches('/');
        let path = path.trim_start_matches('/');
        if prefix.is_empty() {
            path.to_string()
        } else {
            format!("{prefix}/{path}")
        }
    }
}

// ---------------------------------------------------------------------------
// Commits
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CommitConfig {
    /// Side branches are named `<prefix>-<millis>`.
    pub side_branch_prefix: String,
    /// Used when a write carries no message.
    pub default_message: String,
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            side_branch_prefix: "autocommit".to_string(),
            default_message: "Add solution via codesave".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Commit server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
    /// Environment variable holding a key callers must present as a bearer
    /// token. Unset means the server accepts unauthenticated requests.
    pub api_key_env: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8787".to_string(),
            api_key_env: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load and validate a [`Config`]. Without a path the defaults are used.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        None => Config::default(),
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file: {}", path.display()))?;
            if contents.trim().is_empty() {
                Config::default()
            } else {
                serde_yaml::from_str(&contents)
                    .with_context(|| format!("failed to parse config file: {}", path.display()))?
            }
        }
    };
    validate_config(&config)?;
    Ok(config)
}

/// Basic sanity checks that cannot be expressed purely with serde.
fn validate_config(config: &Config) -> Result<()> {
    for (name, url) in [
        ("upstream.api_url", &config.upstream.api_url),
        ("upstream.web_url", &config.upstream.web_url),
    ] {
        let parsed =
            reqwest::Url::parse(url).with_context(|| format!("{name} is not a valid URL: {url}"))?;
        anyhow::ensure!(
            matches!(parsed.scheme(), "http" | "https"),
            "{name} must be an http(s) URL"
        );
    }
    anyhow::ensure!(
        config.upstream.request_timeout_secs > 0,
        "upstream.request_timeout_secs must be positive"
    );
    anyhow::ensure!(
        !config.credentials.token_env.trim().is_empty(),
        "credentials.token_env must not be empty"
    );
    let prefix = &config.commit.side_branch_prefix;
    anyhow::ensure!(
        !prefix.is_empty()
            && prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '/' | '.')),
        "commit.side_branch_prefix must be a non-empty branch-name fragment"
    );
    config
        .server
        .listen
        .parse::<SocketAddr>()
        .with_context(|| format!("server.listen is not a socket address: {}", config.server.listen))?;
    Ok(())
}
