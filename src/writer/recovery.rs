//! Recovery from a forbidden direct write.
//!
//! ```text
//! ProbeDefaultBranch ──► CreateSideBranch ──► RetryWrite ──► Done
//!        │
//!        └────────────► BootstrapEmptyRepo ───────────────► Done
//! ```
//!
//! Any failing transition ends the run with [`WriteError::RecoveryFailed`].
//! Objects created before a failed bootstrap ref are left for the remote to
//! garbage-collect.

use tracing::{debug, info, warn};

use crate::forge::types::TreeEntry;
use crate::forge::{
    ApiError, ContentApi, CreateBlob, CreateCommit, CreateRef, CreateTree, FailureKind,
    PutContent, RemoteFailure, Session,
};
use crate::links::blob_url;
use crate::repo::{FileWrite, WriteOutcome, WriteRoute};

use super::branch::side_branch_name;
use super::error::{RecoveryStep, StepFailure, WriteError};
use super::{outcome_from_put, DEFAULT_BRANCH};

#[derive(Debug)]
enum State {
    ProbeDefaultBranch,
    CreateSideBranch { base_sha: String },
    BootstrapEmptyRepo,
    RetryWrite { branch: String },
    Done(WriteOutcome),
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            Self::ProbeDefaultBranch => "probe_default_branch",
            Self::CreateSideBranch { .. } => "create_side_branch",
            Self::BootstrapEmptyRepo => "bootstrap_empty_repo",
            Self::RetryWrite { .. } => "retry_write",
            Self::Done(_) => "done",
        }
    }
}

pub(super) struct Recovery<'a> {
    pub api: &'a dyn ContentApi,
    pub session: Session<'a>,
    pub write: &'a FileWrite,
    /// The rejected request; reused verbatim apart from the branch.
    pub body: PutContent,
    pub original: RemoteFailure,
    pub branch_prefix: &'a str,
}

impl Recovery<'_> {
    pub(super) async fn run(self) -> Result<WriteOutcome, WriteError> {
        let mut state = State::ProbeDefaultBranch;
        loop {
            debug!(state = state.name(), "recovery state");
            state = match state {
                State::ProbeDefaultBranch => self.probe_default_branch().await?,
                State::CreateSideBranch { base_sha } => self.create_side_branch(&base_sha).await?,
                State::BootstrapEmptyRepo => self.bootstrap().await?,
                State::RetryWrite { branch } => self.retry_write(branch).await?,
                State::Done(outcome) => return Ok(outcome),
            };
        }
    }

    fn fail(&self, step: RecoveryStep, cause: impl Into<StepFailure>) -> WriteError {
        let cause = cause.into();
        warn!(step = step.as_str(), error = %cause, "recovery step failed");
        WriteError::RecoveryFailed {
            original: self.original.clone(),
            step,
            cause,
        }
    }

    /// The side branch forks from the branch the write targeted, so the
    /// version marker read there still matches on the fork.
    async fn probe_default_branch(&self) -> Result<State, WriteError> {
        let base = match self.write.branch() {
            Some(branch) => branch.to_string(),
            None => self
                .api
                .get_repository(&self.session)
                .await
                .map_err(|e| self.fail(RecoveryStep::ReadRepository, e))?
                .default_branch
                .unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
        };

        match self.api.get_branch_ref(&self.session, &base).await {
            Ok(git_ref) if git_ref.object.sha.is_empty() => Err(self.fail(
                RecoveryStep::ResolveBaseBranch,
                StepFailure::Malformed(format!("ref for {base} has no commit sha")),
            )),
            Ok(git_ref) => Ok(State::CreateSideBranch {
                base_sha: git_ref.object.sha,
            }),
            // 409 is how the host reports "Git Repository is empty."
            Err(ApiError::Remote(failure))
                if matches!(failure.kind(), FailureKind::NotFound | FailureKind::Conflict) =>
            {
                info!(
                    branch = %base,
                    status = failure.status,
                    "base branch has no history, bootstrapping"
                );
                Ok(State::BootstrapEmptyRepo)
            }
            Err(e) => Err(self.fail(RecoveryStep::ResolveBaseBranch, e)),
        }
    }

    async fn create_side_branch(&self, base_sha: &str) -> Result<State, WriteError> {
        let branch = side_branch_name(self.branch_prefix);
        self.api
            .create_ref(&self.session, &CreateRef::branch(&branch, base_sha))
            .await
            .map_err(|e| self.fail(RecoveryStep::CreateSideBranch, e))?;
        info!(%branch, base = base_sha, "side branch created");
        Ok(State::RetryWrite { branch })
    }

    async fn retry_write(&self, branch: String) -> Result<State, WriteError> {
        let body = PutContent {
            branch: Some(branch.clone()),
            ..self.body.clone()
        };
        let resp = self
            .api
            .put_content(&self.session, self.write.path(), &body)
            .await
            .map_err(|e| self.fail(RecoveryStep::RetryWrite, e))?;
        Ok(State::Done(outcome_from_put(
            self.api.web_url(),
            self.session.repo,
            self.write.path(),
            branch,
            resp,
            WriteRoute::SideBranch,
        )))
    }

    async fn bootstrap(&self) -> Result<State, WriteError> {
        let blob = self
            .api
            .create_blob(&self.session, &CreateBlob::base64(self.body.content.clone()))
            .await
            .map_err(|e| self.fail(RecoveryStep::CreateBlob, e))?;

        let tree = self
            .api
            .create_tree(
                &self.session,
                &CreateTree {
                    tree: vec![TreeEntry::file(self.write.path(), blob.sha)],
                },
            )
            .await
            .map_err(|e| self.fail(RecoveryStep::CreateTree, e))?;

        let commit = self
            .api
            .create_commit(
                &self.session,
                &CreateCommit {
                    message: self.body.message.clone(),
                    tree: tree.sha,
                    parents: Vec::new(),
                },
            )
            .await
            .map_err(|e| self.fail(RecoveryStep::CreateCommit, e))?;

        let branch = side_branch_name(self.branch_prefix);
        self.api
            .create_ref(&self.session, &CreateRef::branch(&branch, &commit.sha))
            .await
            .map_err(|e| self.fail(RecoveryStep::CreateBootstrapRef, e))?;
        info!(%branch, commit = %commit.sha, "initial commit created");

        // Nothing to list yet, so the link is synthesized rather than read back.
        Ok(State::Done(WriteOutcome {
            target_ref: blob_url(
                self.api.web_url(),
                self.session.repo,
                &branch,
                self.write.path(),
            ),
            branch,
            commit_id: Some(commit.sha),
            route: WriteRoute::Bootstrap,
        }))
    }
}
