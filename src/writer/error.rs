use std::fmt;

use thiserror::Error;

use crate::forge::{ApiError, RemoteFailure};

/// Sub-step of forbidden-write recovery, named in [`WriteError::RecoveryFailed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStep {
    ReadRepository,
    ResolveBaseBranch,
    CreateSideBranch,
    RetryWrite,
    CreateBlob,
    CreateTree,
    CreateCommit,
    CreateBootstrapRef,
}

impl RecoveryStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadRepository => "read repository metadata",
            Self::ResolveBaseBranch => "resolve base branch",
            Self::CreateSideBranch => "create side branch",
            Self::RetryWrite => "retry write on side branch",
            Self::CreateBlob => "create blob",
            Self::CreateTree => "create tree",
            Self::CreateCommit => "create initial commit",
            Self::CreateBootstrapRef => "create branch for initial commit",
        }
    }
}

impl fmt::Display for RecoveryStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a recovery step failed.
#[derive(Debug, Error)]
pub enum StepFailure {
    #[error("{0}")]
    Remote(RemoteFailure),
    #[error("{0:#}")]
    Transport(anyhow::Error),
    #[error("{0}")]
    Malformed(String),
}

impl From<ApiError> for StepFailure {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Remote(failure) => Self::Remote(failure),
            ApiError::Transport(err) => Self::Transport(err),
        }
    }
}

/// Failure of a write or verification. Every variant carries the remote's
/// raw diagnostic where one exists.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("credential rejected under every authorization scheme ({0})")]
    Auth(RemoteFailure),

    #[error("{what} not found ({failure})")]
    NotFound {
        what: String,
        failure: RemoteFailure,
    },

    #[error("remote rejected the write ({0})")]
    WriteRejected(RemoteFailure),

    #[error("write failed ({original}); fallback failed at step '{step}': {cause}")]
    RecoveryFailed {
        original: RemoteFailure,
        step: RecoveryStep,
        cause: StepFailure,
    },

    #[error("unexpected response from {operation} ({failure})")]
    Remote {
        operation: &'static str,
        failure: RemoteFailure,
    },

    #[error("remote request failed: {0:#}")]
    Transport(anyhow::Error),
}

impl WriteError {
    /// Stable machine-readable name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::NotFound { .. } => "not_found",
            Self::WriteRejected(_) => "write_rejected",
            Self::RecoveryFailed { .. } => "recovery_failed",
            Self::Remote { .. } => "remote",
            Self::Transport(_) => "transport",
        }
    }

    /// Raw remote bodies for display: the primary failure, and for recovery
    /// failures also the failing step's diagnostic.
    pub fn diagnostics(&self) -> Vec<String> {
        match self {
            Self::Auth(failure)
            | Self::NotFound { failure, .. }
            | Self::WriteRejected(failure)
            | Self::Remote { failure, .. } => vec![failure.body.clone()],
            Self::RecoveryFailed {
                original, cause, ..
            } => vec![original.body.clone(), cause.to_string()],
            Self::Transport(err) => vec![format!("{err:#}")],
        }
    }
}
