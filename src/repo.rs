//! Per-call inputs and outputs of a remote write.
//!
//! Everything here is constructed from caller-supplied state for a single
//! operation and dropped afterwards; nothing is persisted.

use std::fmt;
use std::str::FromStr;

use base64::prelude::{Engine as _, BASE64_STANDARD};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Input validation errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("repository reference is empty")]
    EmptyRepository,
    #[error("expected `owner/name` or a repository URL, got `{0}`")]
    MalformedRepository(String),
    #[error("invalid repository segment `{0}`")]
    InvalidSegment(String),
    #[error("credential is empty")]
    EmptyCredential,
    #[error("file path `{0}` is empty or leaves the repository root")]
    InvalidPath(String),
    #[error("problem slug or id `{0}` is empty or contains a path separator")]
    InvalidProblem(String),
}

// ---------------------------------------------------------------------------
// RepositoryRef
// ---------------------------------------------------------------------------

/// Target repository, `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepositoryRef {
    owner: String,
    name: String,
}

impl RepositoryRef {
    pub fn new(owner: &str, name: &str) -> Result<Self, InputError> {
        let owner = owner.trim();
        let name = name.trim().trim_end_matches(".git");
        for segment in [owner, name] {
            if !is_valid_segment(segment) {
                return Err(InputError::InvalidSegment(segment.to_string()));
            }
        }
        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Accepts `owner/name` or a URL such as `https://github.com/owner/name.git`.
/// Path segments after the repository name in a URL are ignored.
impl FromStr for RepositoryRef {
    type Err = InputError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        if input.is_empty() {
            return Err(InputError::EmptyRepository);
        }

        if input.starts_with("http://") || input.starts_with("https://") {
            let url = reqwest::Url::parse(input)
                .map_err(|_| InputError::MalformedRepository(input.to_string()))?;
            let mut segments = url
                .path_segments()
                .into_iter()
                .flatten()
                .filter(|s| !s.is_empty());
            return match (segments.next(), segments.next()) {
                (Some(owner), Some(name)) => Self::new(owner, name),
                _ => Err(InputError::MalformedRepository(input.to_string())),
            };
        }

        let parts: Vec<&str> = input
            .split('/')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        match parts.as_slice() {
            [owner, name] => Self::new(owner, name),
            _ => Err(InputError::MalformedRepository(input.to_string())),
        }
    }
}

impl TryFrom<String> for RepositoryRef {
    type Error = InputError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RepositoryRef> for String {
    fn from(value: RepositoryRef) -> Self {
        value.to_string()
    }
}

impl fmt::Display for RepositoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

// ---------------------------------------------------------------------------
// Credential
// ---------------------------------------------------------------------------

/// Personal access token. The remote is the only judge of its validity.
#[derive(Clone)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Result<Self, InputError> {
        let token: String = token.into();
        let token = token.trim();
        if token.is_empty() {
            return Err(InputError::EmptyCredential);
        }
        Ok(Self(token.to_string()))
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

// ---------------------------------------------------------------------------
// FileWrite
// ---------------------------------------------------------------------------

/// One desired file write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileWrite {
    path: String,
    content: Vec<u8>,
    message: String,
    branch: Option<String>,
}

impl FileWrite {
    /// `path` is normalised to a slash-separated, root-relative form.
    pub fn new(
        path: &str,
        content: impl Into<Vec<u8>>,
        message: impl Into<String>,
    ) -> Result<Self, InputError> {
        Ok(Self {
            path: normalize_path(path)?,
            content: content.into(),
            message: message.into(),
            branch: None,
        })
    }

    /// Target `branch` instead of the repository default. Blank names are ignored.
    pub fn on_branch(mut self, branch: impl Into<String>) -> Self {
        let branch = branch.into();
        let branch = branch.trim();
        self.branch = (!branch.is_empty()).then(|| branch.to_string());
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn branch(&self) -> Option<&str> {
        self.branch.as_deref()
    }

    /// Commit message to send, falling back to `default` when none was given.
    pub fn message_or<'a>(&'a self, default: &'a str) -> &'a str {
        if self.message.trim().is_empty() {
            default
        } else {
            &self.message
        }
    }

    /// Content as the remote expects it on the wire.
    pub fn encoded_content(&self) -> String {
        BASE64_STANDARD.encode(&self.content)
    }
}

fn normalize_path(path: &str) -> Result<String, InputError> {
    let segments: Vec<&str> = path
        .trim()
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    if segments.is_empty() || segments.iter().any(|s| *s == "." || *s == "..") {
        return Err(InputError::InvalidPath(path.to_string()));
    }
    Ok(segments.join("/"))
}

// ---------------------------------------------------------------------------
// WriteOutcome
// ---------------------------------------------------------------------------

/// Which path through the writer produced an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteRoute {
    /// Written straight to the requested (usually default) branch.
    Direct,
    /// Default branch refused the write; content landed on a new branch.
    SideBranch,
    /// Repository had no history; first commit built from scratch.
    Bootstrap,
}

impl WriteRoute {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::SideBranch => "side_branch",
            Self::Bootstrap => "bootstrap",
        }
    }
}

/// Result of a successful write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteOutcome {
    /// Browser URL of the written content.
    pub target_ref: String,
    pub branch: String,
    pub commit_id: Option<String>,
    pub route: WriteRoute,
}
