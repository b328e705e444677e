//! Remote content API abstraction.
//!
//! Provides the [`ContentApi`] trait that encapsulates every call the writer
//! makes against the repository host (file metadata, file writes, and the git
//! database endpoints used for branch creation and bootstrap).  Callers
//! dispatch through this trait so that URL construction and response parsing
//! stay inside this module.

#[cfg(test)]
pub mod fake;
pub mod github;
pub mod permission;
pub mod rate_limit;
pub mod types;

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::repo::{Credential, RepositoryRef};

pub use types::{
    ContentMeta, CreateBlob, CreateCommit, CreateRef, CreateTree, GitRef, ObjectSha, PutContent,
    PutContentResponse, RepositoryMeta,
};

// ---------------------------------------------------------------------------
// Endpoint names (metrics labels and log fields)
// ---------------------------------------------------------------------------

pub mod endpoint {
    pub const GET_CONTENT: &str = "get_content";
    pub const PUT_CONTENT: &str = "put_content";
    pub const GET_REPOSITORY: &str = "get_repository";
    pub const GET_BRANCH_REF: &str = "get_branch_ref";
    pub const CREATE_REF: &str = "create_ref";
    pub const CREATE_BLOB: &str = "create_blob";
    pub const CREATE_TREE: &str = "create_tree";
    pub const CREATE_COMMIT: &str = "create_commit";
}

// ---------------------------------------------------------------------------
// Authorization
// ---------------------------------------------------------------------------

/// How the credential is presented in the `Authorization` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthScheme {
    /// `Authorization: Bearer <token>` (fine-grained tokens).
    Bearer,
    /// `Authorization: token <token>` (classic tokens on older hosts).
    LegacyToken,
}

impl AuthScheme {
    /// Probe order. The first scheme the remote accepts wins for the rest
    /// of the operation.
    pub const ORDER: [AuthScheme; 2] = [AuthScheme::Bearer, AuthScheme::LegacyToken];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bearer => "bearer",
            Self::LegacyToken => "legacy_token",
        }
    }

    /// The scheme not tried first.
    pub fn other(&self) -> AuthScheme {
        match self {
            Self::Bearer => Self::LegacyToken,
            Self::LegacyToken => Self::Bearer,
        }
    }

    pub fn header_value(&self, credential: &Credential) -> String {
        match self {
            Self::Bearer => format!("Bearer {}", credential.secret()),
            Self::LegacyToken => format!("token {}", credential.secret()),
        }
    }
}

/// Everything a single remote call needs to know about the caller.
#[derive(Debug, Clone, Copy)]
pub struct Session<'a> {
    pub repo: &'a RepositoryRef,
    pub credential: &'a Credential,
    pub scheme: AuthScheme,
}

impl<'a> Session<'a> {
    pub fn new(repo: &'a RepositoryRef, credential: &'a Credential, scheme: AuthScheme) -> Self {
        Self {
            repo,
            credential,
            scheme,
        }
    }

    pub fn authorization(&self) -> String {
        self.scheme.header_value(self.credential)
    }
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

/// Coarse classification of a non-success status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    Unprocessable,
    Other,
}

impl FailureKind {
    /// Statuses that mean "try the next authorization scheme".
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Unauthorized | Self::Forbidden)
    }
}

/// A non-success response: status code plus the remote's raw body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("HTTP {status}: {body}")]
pub struct RemoteFailure {
    pub status: u16,
    pub body: String,
}

impl RemoteFailure {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self.status {
            401 => FailureKind::Unauthorized,
            403 => FailureKind::Forbidden,
            404 => FailureKind::NotFound,
            409 => FailureKind::Conflict,
            422 => FailureKind::Unprocessable,
            _ => FailureKind::Other,
        }
    }

    /// The `message` field of a JSON error body, or the raw body.
    pub fn message(&self) -> String {
        serde_json::from_str::<serde_json::Value>(&self.body)
            .ok()
            .and_then(|v| v.get("message")?.as_str().map(str::to_string))
            .unwrap_or_else(|| self.body.clone())
    }
}

/// Outcome of a failed remote call.
#[derive(Debug)]
pub enum ApiError {
    /// The remote answered with a non-success status.
    Remote(RemoteFailure),
    /// No usable response: connection, TLS, or body decoding failure.
    Transport(anyhow::Error),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote(failure) => failure.fmt(f),
            Self::Transport(err) => write!(f, "{err:#}"),
        }
    }
}

impl std::error::Error for ApiError {}

pub type ApiResult<T> = Result<T, ApiError>;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// The subset of the repository host's REST API the writer relies on.
#[async_trait::async_trait]
pub trait ContentApi: Send + Sync {
    /// Read metadata (including the version marker) of a file.
    async fn get_content(
        &self,
        session: &Session<'_>,
        path: &str,
        git_ref: Option<&str>,
    ) -> ApiResult<ContentMeta>;

    /// Create or update a file.
    async fn put_content(
        &self,
        session: &Session<'_>,
        path: &str,
        body: &PutContent,
    ) -> ApiResult<PutContentResponse>;

    /// Repository metadata: default branch and the caller's permissions.
    async fn get_repository(&self, session: &Session<'_>) -> ApiResult<RepositoryMeta>;

    /// Resolve `refs/heads/<branch>`.
    async fn get_branch_ref(&self, session: &Session<'_>, branch: &str) -> ApiResult<GitRef>;

    async fn create_ref(&self, session: &Session<'_>, body: &CreateRef) -> ApiResult<GitRef>;

    async fn create_blob(&self, session: &Session<'_>, body: &CreateBlob) -> ApiResult<ObjectSha>;

    async fn create_tree(&self, session: &Session<'_>, body: &CreateTree) -> ApiResult<ObjectSha>;

    async fn create_commit(
        &self,
        session: &Session<'_>,
        body: &CreateCommit,
    ) -> ApiResult<ObjectSha>;

    /// Root of the host's web UI, used to build browser links.
    fn web_url(&self) -> &str;
}
