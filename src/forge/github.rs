//! GitHub (and GitHub-compatible) REST implementation of [`ContentApi`].

use anyhow::Context;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, trace};

use crate::config::UpstreamConfig;
use crate::links::encode_path;
use crate::metrics::MetricsRegistry;
use crate::repo::RepositoryRef;

use super::rate_limit::RateLimitState;
use super::{
    endpoint, ApiError, ApiResult, ContentApi, ContentMeta, CreateBlob, CreateCommit, CreateRef,
    CreateTree, GitRef, ObjectSha, PutContent, PutContentResponse, RemoteFailure, RepositoryMeta,
    Session,
};

const ACCEPT_JSON: &str = "application/vnd.github+json";

// ---------------------------------------------------------------------------
// Client struct
// ---------------------------------------------------------------------------

pub struct GitHubApi {
    http: reqwest::Client,
    api_url: String,
    web_url: String,
    api_version: String,
    rate_limit: RateLimitState,
    rate_limit_buffer: u32,
    metrics: MetricsRegistry,
}

impl GitHubApi {
    pub fn new(config: &UpstreamConfig, http: reqwest::Client, metrics: MetricsRegistry) -> Self {
        Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            web_url: config.web_url.trim_end_matches('/').to_string(),
            api_version: config.api_version.clone(),
            rate_limit: RateLimitState::new(),
            rate_limit_buffer: config.api_rate_limit_buffer,
            metrics,
        }
    }

    fn repo_url(&self, repo: &RepositoryRef) -> String {
        format!("{}/repos/{}/{}", self.api_url, repo.owner(), repo.name())
    }

    fn contents_url(&self, repo: &RepositoryRef, path: &str) -> String {
        format!("{}/contents/{}", self.repo_url(repo), encode_path(path))
    }

    fn git_url(&self, repo: &RepositoryRef, rest: &str) -> String {
        format!("{}/git/{rest}", self.repo_url(repo))
    }

    fn request(&self, session: &Session<'_>, method: Method, url: &str) -> RequestBuilder {
        let mut builder = self
            .http
            .request(method, url)
            .header(AUTHORIZATION, session.authorization())
            .header(ACCEPT, ACCEPT_JSON);
        if !self.api_version.is_empty() {
            builder = builder.header("X-GitHub-Api-Version", &self.api_version);
        }
        builder
    }

    /// Send a request and decode a JSON body, classifying non-success
    /// statuses as [`ApiError::Remote`] with the raw body attached.
    async fn send<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        builder: RequestBuilder,
    ) -> ApiResult<T> {
        self.rate_limit.throttle(self.rate_limit_buffer).await;
        self.metrics.metrics.record_api_call(endpoint);

        let resp = builder
            .send()
            .await
            .with_context(|| format!("{endpoint} request failed"))
            .map_err(ApiError::Transport)?;

        self.rate_limit.observe(resp.headers());
        if let Some(remaining) = self.rate_limit.remaining() {
            self.metrics
                .metrics
                .upstream_api_rate_limit_remaining
                .set(i64::try_from(remaining).unwrap_or(i64::MAX));
        }

        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| String::from("<unreadable>"));
            debug!(endpoint, %status, "remote returned non-success");
            return Err(ApiError::Remote(RemoteFailure::new(status.as_u16(), body)));
        }

        trace!(endpoint, %status, "remote call succeeded");
        resp.json::<T>()
            .await
            .with_context(|| format!("failed to parse {endpoint} response"))
            .map_err(ApiError::Transport)
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        session: &Session<'_>,
        endpoint: &'static str,
        url: &str,
        body: &B,
    ) -> ApiResult<T> {
        let builder = self.request(session, Method::POST, url).json(body);
        self.send(endpoint, builder).await
    }
}

// ---------------------------------------------------------------------------
// Trait implementation
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
impl ContentApi for GitHubApi {
    async fn get_content(
        &self,
        session: &Session<'_>,
        path: &str,
        git_ref: Option<&str>,
    ) -> ApiResult<ContentMeta> {
        let url = self.contents_url(session.repo, path);
        let mut builder = self.request(session, Method::GET, &url);
        if let Some(git_ref) = git_ref {
            builder = builder.query(&[("ref", git_ref)]);
        }
        self.send(endpoint::GET_CONTENT, builder).await
    }

    async fn put_content(
        &self,
        session: &Session<'_>,
        path: &str,
        body: &PutContent,
    ) -> ApiResult<PutContentResponse> {
        let url = self.contents_url(session.repo, path);
        let builder = self.request(session, Method::PUT, &url).json(body);
        self.send(endpoint::PUT_CONTENT, builder).await
    }

    async fn get_repository(&self, session: &Session<'_>) -> ApiResult<RepositoryMeta> {
        let url = self.repo_url(session.repo);
        let builder = self.request(session, Method::GET, &url);
        self.send(endpoint::GET_REPOSITORY, builder).await
    }

    async fn get_branch_ref(&self, session: &Session<'_>, branch: &str) -> ApiResult<GitRef> {
        let url = self.git_url(session.repo, &format!("ref/heads/{}", encode_path(branch)));
        let builder = self.request(session, Method::GET, &url);
        self.send(endpoint::GET_BRANCH_REF, builder).await
    }

    async fn create_ref(&self, session: &Session<'_>, body: &CreateRef) -> ApiResult<GitRef> {
        let url = self.git_url(session.repo, "refs");
        self.post(session, endpoint::CREATE_REF, &url, body).await
    }

    async fn create_blob(&self, session: &Session<'_>, body: &CreateBlob) -> ApiResult<ObjectSha> {
        let url = self.git_url(session.repo, "blobs");
        self.post(session, endpoint::CREATE_BLOB, &url, body).await
    }

    async fn create_tree(&self, session: &Session<'_>, body: &CreateTree) -> ApiResult<ObjectSha> {
        let url = self.git_url(session.repo, "trees");
        self.post(session, endpoint::CREATE_TREE, &url, body).await
    }

    async fn create_commit(
        &self,
        session: &Session<'_>,
        body: &CreateCommit,
    ) -> ApiResult<ObjectSha> {
        let url = self.git_url(session.repo, "commits");
        self.post(session, endpoint::CREATE_COMMIT, &url, body).await
    }

    fn web_url(&self) -> &str {
        &self.web_url
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forge::AuthScheme;
    use crate::repo::Credential;

    fn api() -> GitHubApi {
        let config = UpstreamConfig {
            api_url: "https://api.github.com/".to_string(),
            ..UpstreamConfig::default()
        };
        GitHubApi::new(&config, reqwest::Client::new(), MetricsRegistry::new())
    }

    fn repo() -> RepositoryRef {
        "alice/solutions".parse().unwrap()
    }

    // ── URL construction ────────────────────────────────────────────────

    #[test]
    fn repo_url_strips_trailing_slash() {
        assert_eq!(
            api().repo_url(&repo()),
            "https://api.github.com/repos/alice/solutions"
        );
    }

    #[test]
    fn contents_url_keeps_path_separators() {
        assert_eq!(
            api().contents_url(&repo(), "leetcode/two sum.py"),
            "https://api.github.com/repos/alice/solutions/contents/leetcode/two%20sum.py"
        );
    }

    #[test]
    fn git_urls() {
        let api = api();
        assert_eq!(
            api.git_url(&repo(), "refs"),
            "https://api.github.com/repos/alice/solutions/git/refs"
        );
        assert_eq!(
            api.git_url(&repo(), "ref/heads/main"),
            "https://api.github.com/repos/alice/solutions/git/ref/heads/main"
        );
    }

    #[test]
    fn web_url_defaults_to_github() {
        assert_eq!(api().web_url(), "https://github.com");
    }

    // ── Request headers ─────────────────────────────────────────────────

    #[test]
    fn request_carries_scheme_specific_authorization() {
        let api = api();
        let repo = repo();
        let cred = Credential::new("tok").unwrap();

        let bearer = Session::new(&repo, &cred, AuthScheme::Bearer);
        let req = api
            .request(&bearer, Method::GET, &api.repo_url(&repo))
            .build()
            .unwrap();
        assert_eq!(req.headers()[AUTHORIZATION], "Bearer tok");
        assert_eq!(req.headers()[ACCEPT], ACCEPT_JSON);
        assert_eq!(req.headers()["X-GitHub-Api-Version"], "2022-11-28");

        let legacy = Session::new(&repo, &cred, AuthScheme::LegacyToken);
        let req = api
            .request(&legacy, Method::GET, &api.repo_url(&repo))
            .build()
            .unwrap();
        assert_eq!(req.headers()[AUTHORIZATION], "token tok");
    }
}
