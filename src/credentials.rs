//! Access-token resolution.
//!
//! The token comes from an explicit override (CLI flag) or the environment
//! variable named in config. It is never read from request bodies and never
//! written anywhere.

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::config::CredentialsConfig;
use crate::repo::Credential;

/// Where a resolved credential came from, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Explicit,
    Environment,
}

impl CredentialSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::Environment => "environment",
        }
    }
}

/// Resolve the access token from the process environment.
pub fn resolve_credential(
    config: &CredentialsConfig,
    explicit: Option<&str>,
) -> Result<(Credential, CredentialSource)> {
    resolve_with(config, explicit, |name| std::env::var(name).ok())
}

#[instrument(skip_all, fields(token_env = %config.token_env))]
fn resolve_with(
    config: &CredentialsConfig,
    explicit: Option<&str>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(Credential, CredentialSource)> {
    let (token, source) = match explicit {
        Some(token) => (token.to_string(), CredentialSource::Explicit),
        None => {
            let token = lookup(&config.token_env).with_context(|| {
                format!(
                    "no access token: set {} or pass --token",
                    config.token_env
                )
            })?;
            (token, CredentialSource::Environment)
        }
    };
    let credential = Credential::new(token)
        .with_context(|| format!("access token from {} is unusable", source.as_str()))?;
    debug!(source = source.as_str(), "resolved access token");
    Ok((credential, source))
}

/// Whether a token is configured, without reading it into a [`Credential`].
pub fn credential_present(config: &CredentialsConfig) -> bool {
    std::env::var(&config.token_env)
        .map(|v| !v.trim().is_empty())
        .unwrap_or(false)
}
