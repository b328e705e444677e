//! Axum router and request handlers for the commit server.
//!
//! Routes:
//! - `POST /commit`   - Create or update one file in a repository
//! - `POST /verify`   - Check the server's token against a repository
//! - `GET  /healthz`  - Health check
//! - `GET  /metrics`  - Prometheus metrics

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::config::TargetConfig;
use crate::credentials::resolve_credential;
use crate::links::new_file_url;
use crate::repo::{Credential, FileWrite, RepositoryRef, WriteRoute};
use crate::solution::{self, Problem};
use crate::writer::{Verification, WriteError};
use crate::AppState;

/// Request bodies above this size are refused before parsing.
const MAX_BODY_BYTES: usize = 256 * 1024;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the axum [`Router`] with all HTTP routes and shared state.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/commit", post(handle_commit))
        .route("/verify", post(handle_verify))
        .route("/healthz", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Target repository as either `repository` (`owner/name` or URL) or the
/// `owner` + `repo` pair. Falls back to the configured target.
#[derive(Debug, Default, Deserialize)]
pub struct RepositorySelector {
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub repo: Option<String>,
}

fn non_blank(s: &Option<String>) -> Option<&str> {
    s.as_deref().filter(|v| !v.trim().is_empty())
}

impl RepositorySelector {
    fn resolve(&self, fallback: Option<&RepositoryRef>) -> Result<RepositoryRef, AppError> {
        let parsed = match (
            non_blank(&self.repository),
            non_blank(&self.owner),
            non_blank(&self.repo),
        ) {
            (Some(repository), _, _) => repository.parse(),
            (None, Some(owner), Some(repo)) => RepositoryRef::new(owner, repo),
            (None, None, None) => {
                return fallback.cloned().ok_or_else(|| {
                    AppError::BadRequest("no repository given and none configured".into())
                })
            }
            _ => return Err(AppError::BadRequest("owner and repo must be given together".into())),
        };
        parsed.map_err(|e| AppError::BadRequest(e.to_string()))
    }
}

/// A file to commit. Without `path`, the problem fields (`slug` and
/// optionally `question_id`, `title`, `language`) name a file in this
/// week's solution folder.
#[derive(Debug, Deserialize)]
pub struct CommitRequest {
    #[serde(flatten)]
    pub target: RepositorySelector,
    #[serde(default)]
    pub path: Option<String>,
    /// Raw file content (UTF-8).
    pub content: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub question_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

impl CommitRequest {
    fn problem(&self) -> Option<Problem> {
        non_blank(&self.slug).map(|slug| Problem {
            slug: slug.to_string(),
            question_id: self.question_id.clone(),
            title: self.title.clone(),
            language: self.language.clone(),
        })
    }

    fn file_write(&self, target: &TargetConfig, today: NaiveDate) -> Result<FileWrite, AppError> {
        let problem = self.problem();
        let path = match (non_blank(&self.path), &problem) {
            (Some(path), _) => path.to_string(),
            (None, Some(problem)) => target.remote_path(
                &problem
                    .relative_path(today)
                    .map_err(|e| AppError::BadRequest(e.to_string()))?,
            ),
            (None, None) => return Err(AppError::BadRequest("either path or slug is required".into())),
        };
        let message = match (non_blank(&self.message), &problem) {
            (Some(message), _) => message.to_string(),
            (None, Some(problem)) => problem.commit_message(),
            (None, None) => String::new(),
        };
        let write = FileWrite::new(&path, self.content.as_bytes(), message)
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        Ok(match &self.branch {
            Some(branch) => write.on_branch(branch.as_str()),
            None => write,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct CommitResponse {
    pub ok: bool,
    pub url: String,
    pub branch: String,
    pub commit: Option<String>,
    pub route: WriteRoute,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    ok: bool,
    error: String,
    kind: &'static str,
    detail: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    new_file_url: Option<String>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `POST /commit`
#[instrument(skip_all)]
async fn handle_commit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<CommitRequest>, JsonRejection>,
) -> Result<Json<CommitResponse>, AppError> {
    check_api_key(state.api_key.as_deref(), &headers)?;
    let Json(request) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;

    let repo = request
        .target
        .resolve(state.config.target.repository.as_ref())?;
    let write = request.file_write(&state.config.target, solution::today())?;
    let credential = server_credential(&state)?;

    info!(repo = %repo, path = write.path(), "commit requested");
    match state.writer.write(&repo, &write, &credential).await {
        Ok(outcome) => Ok(Json(CommitResponse {
            ok: true,
            url: outcome.target_ref,
            branch: outcome.branch,
            commit: outcome.commit_id,
            route: outcome.route,
        })),
        Err(err) => {
            let branch = match write.branch() {
                Some(branch) => branch.to_string(),
                None => state.writer.default_branch(&repo, &credential).await,
            };
            let fallback = new_file_url(
                state.writer.web_url(),
                &repo,
                &branch,
                write.path(),
                &request.content,
            )
            .map(|url| url.to_string())
            .map_err(|e| warn!(error = %e, "could not build manual fallback link"))
            .ok();
            Err(AppError::Write {
                error: err,
                new_file_url: fallback,
            })
        }
    }
}

/// `POST /verify`
#[instrument(skip_all)]
async fn handle_verify(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<RepositorySelector>, JsonRejection>,
) -> Result<Json<Verification>, AppError> {
    check_api_key(state.api_key.as_deref(), &headers)?;
    let Json(selector) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let repo = selector.resolve(state.config.target.repository.as_ref())?;
    let credential = server_credential(&state)?;

    state
        .writer
        .verify(&repo, &credential)
        .await
        .map(Json)
        .map_err(|error| AppError::Write {
            error,
            new_file_url: None,
        })
}

/// `GET /healthz`
async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health_state = crate::health::HealthState {
        config: Arc::clone(&state.config),
        http_client: state.http_client.clone(),
    };
    crate::health::health_handler(State(health_state)).await
}

/// `GET /metrics`
async fn handle_metrics(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let buf = state
        .metrics
        .encode()
        .map_err(|e| AppError::Internal(anyhow::anyhow!("metrics encoding failed: {e}")))?;

    Ok((
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        buf,
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Extract the `Authorization` header value, returning an error if absent.
fn extract_auth_header(headers: &HeaderMap) -> Result<String, AppError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_owned())
        .ok_or_else(|| AppError::Unauthorized("missing Authorization header".into()))
}

/// Require `Authorization: Bearer <key>` when the server has a key.
fn check_api_key(expected: Option<&str>, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let header = extract_auth_header(headers)?;
    let presented = header.strip_prefix("Bearer ").unwrap_or_default().trim();
    if presented.is_empty() || presented != expected {
        warn!("rejected request with wrong API key");
        return Err(AppError::Unauthorized("invalid API key".into()));
    }
    Ok(())
}

/// The server's own token. Read on every request so it can be rotated
/// without a restart.
fn server_credential(state: &AppState) -> Result<Credential, AppError> {
    resolve_credential(&state.config.credentials, state.token_override.as_deref())
        .map(|(credential, _)| credential)
        .map_err(AppError::Internal)
}

/// HTTP status for a failed write or verification.
fn status_for(err: &WriteError) -> StatusCode {
    match err {
        WriteError::Auth(_) => StatusCode::UNAUTHORIZED,
        WriteError::NotFound { .. } => StatusCode::NOT_FOUND,
        WriteError::WriteRejected(_) => StatusCode::CONFLICT,
        WriteError::RecoveryFailed { .. }
        | WriteError::Remote { .. }
        | WriteError::Transport(_) => StatusCode::BAD_GATEWAY,
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Application-level error type that maps cleanly to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// The request body or its fields are unusable.
    BadRequest(String),
    /// The caller did not present the server's API key.
    Unauthorized(String),
    /// The remote refused or failed the operation.
    Write {
        error: WriteError,
        new_file_url: Option<String>,
    },
    /// An unexpected internal error.
    Internal(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    ok: false,
                    error: msg,
                    kind: "bad_request",
                    detail: Vec::new(),
                    new_file_url: None,
                },
            ),
            AppError::Unauthorized(msg) => {
                let body = ErrorBody {
                    ok: false,
                    error: msg,
                    kind: "unauthorized",
                    detail: Vec::new(),
                    new_file_url: None,
                };
                return (
                    StatusCode::UNAUTHORIZED,
                    [(header::WWW_AUTHENTICATE, "Bearer realm=\"codesave\"")],
                    Json(body),
                )
                    .into_response();
            }
            AppError::Write {
                error,
                new_file_url,
            } => (
                status_for(&error),
                ErrorBody {
                    ok: false,
                    error: error.to_string(),
                    kind: error.kind(),
                    detail: error.diagnostics(),
                    new_file_url,
                },
            ),
            AppError::Internal(err) => {
                error!(error = %err, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        ok: false,
                        error: format!("{err:#}"),
                        kind: "internal",
                        detail: Vec::new(),
                        new_file_url: None,
                    },
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;
    use serde_json::{json, Value};

    use super::*;
    use crate::config::Config;
    use crate::forge::fake::{FakeRemote, VALID_TOKEN};
    use crate::forge::RemoteFailure;
    use crate::metrics::MetricsRegistry;
    use crate::writer::{RecoveryStep, RemoteFileWriter, StepFailure, WriterSettings};

    fn state_with(api: Arc<FakeRemote>, api_key: Option<&str>) -> Arc<AppState> {
        let config = Config::default();
        let metrics = MetricsRegistry::new();
        let writer = RemoteFileWriter::new(api, WriterSettings::from(&config.commit), metrics.clone());
        Arc::new(AppState {
            config: Arc::new(config),
            metrics,
            http_client: reqwest::Client::new(),
            writer: Arc::new(writer),
            token_override: Some(VALID_TOKEN.to_string()),
            api_key: api_key.map(str::to_string),
        })
    }

    fn commit_request(body: Value) -> Result<Json<CommitRequest>, JsonRejection> {
        Ok(Json(serde_json::from_value(body).unwrap()))
    }

    async fn body_json(resp: Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn bearer(key: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {key}")).unwrap(),
        );
        headers
    }

    // ── Request parsing ─────────────────────────────────────────────────

    #[test]
    fn selector_accepts_both_forms() {
        let by_string = RepositorySelector {
            repository: Some("https://github.com/alice/solutions".into()),
            ..Default::default()
        };
        assert_eq!(by_string.resolve(None).unwrap().to_string(), "alice/solutions");

        let by_pair = RepositorySelector {
            owner: Some("alice".into()),
            repo: Some("solutions".into()),
            ..Default::default()
        };
        assert_eq!(by_pair.resolve(None).unwrap().to_string(), "alice/solutions");
    }

    #[test]
    fn selector_falls_back_to_configured_repository() {
        let configured: RepositoryRef = "bob/notes".parse().unwrap();
        let empty = RepositorySelector::default();
        assert_eq!(empty.resolve(Some(&configured)).unwrap(), configured);
        assert!(matches!(empty.resolve(None), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn selector_rejects_half_pair_and_garbage() {
        let half = RepositorySelector {
            owner: Some("alice".into()),
            ..Default::default()
        };
        assert!(matches!(half.resolve(None), Err(AppError::BadRequest(_))));

        let garbage = RepositorySelector {
            repository: Some("a/b/c".into()),
            ..Default::default()
        };
        assert!(matches!(garbage.resolve(None), Err(AppError::BadRequest(_))));
    }

    fn wednesday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 6).unwrap()
    }

    #[test]
    fn commit_request_deserializes_flattened_target() {
        let req: CommitRequest = serde_json::from_value(json!({
            "owner": "alice",
            "repo": "solutions",
            "path": "/leetcode/two-sum.py",
            "content": "print(1)",
            "branch": "dev"
        }))
        .unwrap();
        let write = req
            .file_write(&TargetConfig::default(), wednesday())
            .unwrap();
        assert_eq!(write.path(), "leetcode/two-sum.py");
        assert_eq!(write.branch(), Some("dev"));
        assert_eq!(write.message_or("fallback"), "fallback");
    }

    #[test]
    fn problem_fields_place_file_in_week_folder() {
        let req: CommitRequest = serde_json::from_value(json!({
            "content": "print(1)",
            "slug": "two-sum",
            "question_id": "1",
            "title": "Two Sum",
            "language": "python3"
        }))
        .unwrap();
        let write = req
            .file_write(&TargetConfig::default(), wednesday())
            .unwrap();
        assert_eq!(
            write.path(),
            "leetcode/04-03-2024_to_10-03-2024/06-03-2024__1. Two Sum.py"
        );
        assert_eq!(write.message_or("fallback"), "Add solution for Two Sum");
    }

    #[test]
    fn commit_request_needs_path_or_slug() {
        let req: CommitRequest =
            serde_json::from_value(json!({ "content": "x", "slug": "  " })).unwrap();
        assert!(matches!(
            req.file_write(&TargetConfig::default(), wednesday()),
            Err(AppError::BadRequest(_))
        ));

        let req: CommitRequest =
            serde_json::from_value(json!({ "content": "x", "slug": "a/b" })).unwrap();
        assert!(matches!(
            req.file_write(&TargetConfig::default(), wednesday()),
            Err(AppError::BadRequest(_))
        ));
    }

    // ── API key ─────────────────────────────────────────────────────────

    #[test]
    fn api_key_is_optional_and_enforced_when_set() {
        assert!(check_api_key(None, &HeaderMap::new()).is_ok());
        assert!(check_api_key(Some("k"), &bearer("k")).is_ok());
        assert!(matches!(
            check_api_key(Some("k"), &bearer("other")),
            Err(AppError::Unauthorized(_))
        ));
        assert!(matches!(
            check_api_key(Some("k"), &HeaderMap::new()),
            Err(AppError::Unauthorized(_))
        ));
    }

    // ── Status mapping ──────────────────────────────────────────────────

    #[test]
    fn write_errors_map_to_statuses() {
        let f = || RemoteFailure::new(403, "x");
        assert_eq!(status_for(&WriteError::Auth(f())), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status_for(&WriteError::NotFound {
                what: "repository a/b".into(),
                failure: f()
            }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(status_for(&WriteError::WriteRejected(f())), StatusCode::CONFLICT);
        assert_eq!(
            status_for(&WriteError::RecoveryFailed {
                original: f(),
                step: RecoveryStep::CreateBlob,
                cause: StepFailure::Malformed("x".into()),
            }),
            StatusCode::BAD_GATEWAY
        );
    }

    #[tokio::test]
    async fn write_error_body_carries_kind_and_diagnostics() {
        let resp = AppError::Write {
            error: WriteError::WriteRejected(RemoteFailure::new(422, "bad sha")),
            new_file_url: Some("https://github.com/a/b/new/main".into()),
        }
        .into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let body = body_json(resp).await;
        assert_eq!(body["ok"], false);
        assert_eq!(body["kind"], "write_rejected");
        assert_eq!(body["detail"], json!(["bad sha"]));
        assert_eq!(body["new_file_url"], "https://github.com/a/b/new/main");
    }

    // ── Handlers ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn commit_writes_file() {
        let api = Arc::new(FakeRemote::with_history(&[]));
        let state = state_with(api.clone(), Some("k"));

        let Json(resp) = handle_commit(
            State(state),
            bearer("k"),
            commit_request(json!({
                "repository": "alice/solutions",
                "path": "leetcode/two-sum.py",
                "content": "print(1)",
                "message": "Add solution"
            })),
        )
        .await
        .unwrap();

        assert!(resp.ok);
        assert_eq!(resp.branch, "main");
        assert_eq!(resp.route, WriteRoute::Direct);
        assert!(resp.url.ends_with("/alice/solutions/blob/main/leetcode/two-sum.py"));
        assert_eq!(
            api.file("main", "leetcode/two-sum.py").await.unwrap(),
            b"print(1)"
        );
    }

    #[tokio::test]
    async fn commit_without_key_writes_nothing() {
        let api = Arc::new(FakeRemote::with_history(&[]));
        let state = state_with(api.clone(), Some("k"));

        let err = handle_commit(
            State(state),
            HeaderMap::new(),
            commit_request(json!({
                "repository": "alice/solutions",
                "path": "a.py",
                "content": "x"
            })),
        )
        .await
        .unwrap_err();

        assert_eq!(err.into_response().status(), StatusCode::UNAUTHORIZED);
        assert!(api.state.lock().await.calls.is_empty());
    }

    #[tokio::test]
    async fn failed_commit_offers_manual_link() {
        let api = Arc::new(FakeRemote::missing());
        let state = state_with(api, None);

        let err = handle_commit(
            State(state),
            HeaderMap::new(),
            commit_request(json!({
                "repository": "alice/solutions",
                "path": "leetcode/a.py",
                "content": "x = 1"
            })),
        )
        .await
        .unwrap_err();

        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body = body_json(resp).await;
        assert_eq!(body["kind"], "not_found");
        let link = body["new_file_url"].as_str().unwrap();
        assert!(link.contains("/alice/solutions/new/main?"));
        assert!(link.contains("filename=leetcode%2Fa.py"));
    }

    #[tokio::test]
    async fn manual_link_targets_repository_default_branch() {
        let api = Arc::new(FakeRemote::with_history(&[]));
        api.state.lock().await.default_branch = "master".to_string();
        api.fail(
            crate::forge::endpoint::PUT_CONTENT,
            409,
            r#"{"message":"sha does not match"}"#,
        )
        .await;
        let state = state_with(api, None);

        let err = handle_commit(
            State(state),
            HeaderMap::new(),
            commit_request(json!({
                "repository": "alice/solutions",
                "path": "a.py",
                "content": "x"
            })),
        )
        .await
        .unwrap_err();

        let body = body_json(err.into_response()).await;
        assert_eq!(body["kind"], "write_rejected");
        let link = body["new_file_url"].as_str().unwrap();
        assert!(link.contains("/alice/solutions/new/master?"), "{link}");
    }

    #[tokio::test]
    async fn verify_reports_access() {
        let api = Arc::new(FakeRemote::with_history(&[]));
        let state = state_with(api, None);

        let Json(v) = handle_verify(
            State(state),
            HeaderMap::new(),
            Ok(Json(RepositorySelector {
                repository: Some("alice/solutions".into()),
                ..Default::default()
            })),
        )
        .await
        .unwrap();

        assert_eq!(v.writable, Some(true));
        assert_eq!(v.default_branch, "main");
    }

    #[tokio::test]
    async fn metrics_endpoint_exposes_text() {
        let api = Arc::new(FakeRemote::with_history(&[]));
        let state = state_with(api, None);
        let resp = handle_metrics(State(state)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("codesave_writes"));
    }
}
