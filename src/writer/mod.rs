//! Create-or-update of a single file through the remote content API.
//!
//! A write walks a fixed pipeline: find the authorization scheme the remote
//! accepts while reading the file's current version marker, send the new
//! content with that marker as a precondition, and on a forbidden write hand
//! over to [`recovery`], which lands the content on a fresh side branch (or
//! builds the first commit of an empty repository).
//!
//! The writer keeps no state between calls beyond its settings and the API
//! handle; the scheme found by the probe lives only for one operation.

pub mod branch;
pub mod error;
mod recovery;

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::config::CommitConfig;
use crate::forge::permission::{writable, Permission};
use crate::forge::{
    endpoint, ApiError, AuthScheme, ContentApi, FailureKind, PutContent, PutContentResponse,
    RemoteFailure, Session,
};
use crate::links::{blob_url, encode_path};
use crate::metrics::{MetricsRegistry, Route, VerifyLabels, Writable};
use crate::repo::{Credential, FileWrite, RepositoryRef, WriteOutcome, WriteRoute};

pub use error::{RecoveryStep, StepFailure, WriteError};

use recovery::Recovery;

/// Branch assumed when the remote does not report one.
pub const DEFAULT_BRANCH: &str = "main";

#[derive(Debug, Clone)]
pub struct WriterSettings {
    pub side_branch_prefix: String,
    pub default_message: String,
}

impl From<&CommitConfig> for WriterSettings {
    fn from(config: &CommitConfig) -> Self {
        Self {
            side_branch_prefix: config.side_branch_prefix.clone(),
            default_message: config.default_message.clone(),
        }
    }
}

/// Result of a credential check.
#[derive(Debug, Clone, Serialize)]
pub struct Verification {
    pub scheme: AuthScheme,
    /// `None` when the remote does not disclose the caller's permissions.
    pub writable: Option<bool>,
    pub permission: Permission,
    pub default_branch: String,
}

pub struct RemoteFileWriter {
    api: Arc<dyn ContentApi>,
    settings: WriterSettings,
    metrics: MetricsRegistry,
}

impl RemoteFileWriter {
    pub fn new(api: Arc<dyn ContentApi>, settings: WriterSettings, metrics: MetricsRegistry) -> Self {
        Self {
            api,
            settings,
            metrics,
        }
    }

    pub fn web_url(&self) -> &str {
        self.api.web_url()
    }

    /// Ensure `write` is stored in `repo`, on its target branch or a side
    /// branch when the target refuses direct writes.
    #[instrument(skip_all, fields(repo = %repo, path = write.path()))]
    pub async fn write(
        &self,
        repo: &RepositoryRef,
        write: &FileWrite,
        credential: &Credential,
    ) -> Result<WriteOutcome, WriteError> {
        let started = Instant::now();
        let result = self.write_inner(repo, write, credential).await;

        let route = match &result {
            Ok(outcome) => {
                info!(
                    route = outcome.route.as_str(),
                    branch = %outcome.branch,
                    target = %outcome.target_ref,
                    "file written"
                );
                Route::from(outcome.route)
            }
            Err(err) => {
                warn!(kind = err.kind(), error = %err, "write failed");
                Route::Failed
            }
        };
        self.metrics
            .metrics
            .record_write(route, started.elapsed().as_secs_f64());
        result
    }

    async fn write_inner(
        &self,
        repo: &RepositoryRef,
        write: &FileWrite,
        credential: &Credential,
    ) -> Result<WriteOutcome, WriteError> {
        let (scheme, marker) = self.read_marker(repo, write, credential).await?;
        let mut session = Session::new(repo, credential, scheme);

        let body = PutContent {
            message: write.message_or(&self.settings.default_message).to_string(),
            content: write.encoded_content(),
            sha: marker,
            branch: write.branch().map(str::to_string),
        };

        let mut result = self.api.put_content(&session, write.path(), &body).await;
        // Some hosts accept a scheme for reads but not for writes.
        if matches!(&result, Err(ApiError::Remote(f)) if f.kind() == FailureKind::Unauthorized) {
            session.scheme = scheme.other();
            debug!(
                scheme = session.scheme.as_str(),
                "write unauthorized, retrying under the other scheme"
            );
            result = self.api.put_content(&session, write.path(), &body).await;
        }

        let failure = match result {
            Ok(resp) => {
                let branch = self.resolve_branch(&session, write, &resp).await;
                return Ok(outcome_from_put(
                    self.api.web_url(),
                    repo,
                    write.path(),
                    branch,
                    resp,
                    WriteRoute::Direct,
                ));
            }
            Err(ApiError::Transport(err)) => return Err(WriteError::Transport(err)),
            Err(ApiError::Remote(failure)) => failure,
        };

        match failure.kind() {
            FailureKind::Forbidden => {
                warn!(
                    status = failure.status,
                    message = %failure.message(),
                    "direct write forbidden, falling back to a side branch"
                );
                Recovery {
                    api: self.api.as_ref(),
                    session,
                    write,
                    body,
                    original: failure,
                    branch_prefix: &self.settings.side_branch_prefix,
                }
                .run()
                .await
            }
            FailureKind::Unauthorized => Err(WriteError::Auth(failure)),
            FailureKind::NotFound => Err(WriteError::NotFound {
                what: match write.branch() {
                    Some(branch) => format!("repository {repo} or branch {branch}"),
                    None => format!("repository {repo}"),
                },
                failure,
            }),
            _ => Err(WriteError::WriteRejected(failure)),
        }
    }

    /// Read the file's version marker, walking the authorization schemes in
    /// order. A missing file is not an error: it just has no marker.
    async fn read_marker(
        &self,
        repo: &RepositoryRef,
        write: &FileWrite,
        credential: &Credential,
    ) -> Result<(AuthScheme, Option<String>), WriteError> {
        let mut rejection = None;
        for scheme in AuthScheme::ORDER {
            let session = Session::new(repo, credential, scheme);
            match self
                .api
                .get_content(&session, write.path(), write.branch())
                .await
            {
                Ok(meta) => {
                    debug!(scheme = scheme.as_str(), sha = %meta.sha, "existing file found");
                    return Ok((scheme, Some(meta.sha)));
                }
                Err(ApiError::Remote(failure)) if failure.kind() == FailureKind::NotFound => {
                    debug!(scheme = scheme.as_str(), "no existing file");
                    return Ok((scheme, None));
                }
                Err(ApiError::Remote(failure)) if failure.kind().is_auth() => {
                    debug!(scheme = scheme.as_str(), status = failure.status, "scheme rejected");
                    rejection = Some(failure);
                }
                Err(ApiError::Remote(failure)) => {
                    return Err(WriteError::Remote {
                        operation: endpoint::GET_CONTENT,
                        failure,
                    })
                }
                Err(ApiError::Transport(err)) => return Err(WriteError::Transport(err)),
            }
        }
        Err(all_schemes_rejected(rejection))
    }

    /// Branch a direct write landed on: the requested one, else the one in
    /// the response link, else the repository default.
    async fn resolve_branch(
        &self,
        session: &Session<'_>,
        write: &FileWrite,
        resp: &PutContentResponse,
    ) -> String {
        if let Some(branch) = write.branch() {
            return branch.to_string();
        }
        let from_link = resp
            .content
            .as_ref()
            .and_then(|c| c.html_url.as_deref())
            .and_then(|url| branch_from_link(self.api.web_url(), session.repo, write.path(), url));
        if let Some(branch) = from_link {
            return branch;
        }
        match self.api.get_repository(session).await {
            Ok(meta) => meta
                .default_branch
                .unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
            Err(err) => {
                warn!(error = %err, "could not read default branch after write");
                DEFAULT_BRANCH.to_string()
            }
        }
    }

    /// The repository's default branch, or [`DEFAULT_BRANCH`] when the
    /// metadata cannot be read.
    pub async fn default_branch(&self, repo: &RepositoryRef, credential: &Credential) -> String {
        let mut last_error = None;
        for scheme in AuthScheme::ORDER {
            let session = Session::new(repo, credential, scheme);
            match self.api.get_repository(&session).await {
                Ok(meta) => {
                    return meta
                        .default_branch
                        .unwrap_or_else(|| DEFAULT_BRANCH.to_string())
                }
                Err(ApiError::Remote(failure)) if failure.kind().is_auth() => {
                    last_error = Some(ApiError::Remote(failure));
                }
                Err(err) => {
                    last_error = Some(err);
                    break;
                }
            }
        }
        if let Some(err) = last_error {
            warn!(error = %err, fallback = DEFAULT_BRANCH, "could not read default branch");
        }
        DEFAULT_BRANCH.to_string()
    }

    /// Check that `credential` is accepted for `repo` and report whether it
    /// can push.
    #[instrument(skip_all, fields(repo = %repo))]
    pub async fn verify(
        &self,
        repo: &RepositoryRef,
        credential: &Credential,
    ) -> Result<Verification, WriteError> {
        let result = self.verify_inner(repo, credential).await;
        let label = match &result {
            Ok(v) => match v.writable {
                Some(true) => Writable::Yes,
                Some(false) => Writable::No,
                None => Writable::Unknown,
            },
            Err(_) => Writable::Error,
        };
        self.metrics
            .metrics
            .verifications_total
            .get_or_create(&VerifyLabels { writable: label })
            .inc();
        result
    }

    async fn verify_inner(
        &self,
        repo: &RepositoryRef,
        credential: &Credential,
    ) -> Result<Verification, WriteError> {
        let mut rejection = None;
        for scheme in AuthScheme::ORDER {
            let session = Session::new(repo, credential, scheme);
            match self.api.get_repository(&session).await {
                Ok(meta) => {
                    info!(scheme = scheme.as_str(), "credential accepted");
                    return Ok(Verification {
                        scheme,
                        writable: writable(meta.permissions),
                        permission: meta.permissions.map(Permission::from).unwrap_or_default(),
                        default_branch: meta
                            .default_branch
                            .unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
                    });
                }
                Err(ApiError::Remote(failure)) if failure.kind().is_auth() => {
                    debug!(scheme = scheme.as_str(), status = failure.status, "scheme rejected");
                    rejection = Some(failure);
                }
                Err(ApiError::Remote(failure)) if failure.kind() == FailureKind::NotFound => {
                    return Err(WriteError::NotFound {
                        what: format!("repository {repo}"),
                        failure,
                    })
                }
                Err(ApiError::Remote(failure)) => {
                    return Err(WriteError::Remote {
                        operation: endpoint::GET_REPOSITORY,
                        failure,
                    })
                }
                Err(ApiError::Transport(err)) => return Err(WriteError::Transport(err)),
            }
        }
        Err(all_schemes_rejected(rejection))
    }
}

fn all_schemes_rejected(last: Option<RemoteFailure>) -> WriteError {
    WriteError::Auth(last.unwrap_or_else(|| RemoteFailure::new(401, "no scheme accepted")))
}

/// Outcome of a successful content PUT. Falls back to a constructed link
/// when the response carries none.
pub(crate) fn outcome_from_put(
    web_url: &str,
    repo: &RepositoryRef,
    path: &str,
    branch: String,
    resp: PutContentResponse,
    route: WriteRoute,
) -> WriteOutcome {
    let target_ref = resp
        .content
        .and_then(|c| c.html_url)
        .filter(|url| !url.is_empty())
        .unwrap_or_else(|| blob_url(web_url, repo, &branch, path));
    WriteOutcome {
        target_ref,
        branch,
        commit_id: Some(resp.commit.sha).filter(|sha| !sha.is_empty()),
        route,
    }
}

/// Pull `<branch>` out of `{web}/{owner}/{name}/blob/<branch>/{path}`.
fn branch_from_link(web_url: &str, repo: &RepositoryRef, path: &str, link: &str) -> Option<String> {
    let prefix = format!(
        "{}/{}/{}/blob/",
        web_url.trim_end_matches('/'),
        repo.owner(),
        repo.name()
    );
    let suffix = format!("/{}", encode_path(path));
    let branch = link.strip_prefix(&prefix)?.strip_suffix(&suffix)?;
    if branch.is_empty() {
        return None;
    }
    let decoded = urlencoding::decode(branch).ok()?;
    Some(decoded.into_owned())
}
