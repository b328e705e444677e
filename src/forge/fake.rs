//! In-memory repository host used by the writer tests.
//!
//! Models just enough of the remote: one repository with branches, commits,
//! trees and blobs, branch protection on direct content writes, and the two
//! authorization schemes.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use base64::prelude::{Engine as _, BASE64_STANDARD};
use tokio::sync::Mutex;

use crate::links::blob_url;

use super::permission::RepoPermissions;
use super::types::{CommitMeta, GitObject};
use super::{
    endpoint, ApiError, ApiResult, AuthScheme, ContentApi, ContentMeta, CreateBlob, CreateCommit,
    CreateRef, CreateTree, GitRef, ObjectSha, PutContent, PutContentResponse, RemoteFailure,
    RepositoryMeta, Session,
};

pub const VALID_TOKEN: &str = "valid-write-token";
pub const WEB_URL: &str = "https://github.example";

#[derive(Debug, Clone)]
pub struct FakeCommit {
    pub tree: BTreeMap<String, String>,
    pub parents: Vec<String>,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub repository_exists: bool,
    pub default_branch: String,
    pub protected: HashSet<String>,
    /// branch -> commit sha
    pub branches: BTreeMap<String, String>,
    pub commits: HashMap<String, FakeCommit>,
    pub trees: HashMap<String, BTreeMap<String, String>>,
    pub blobs: HashMap<String, Vec<u8>>,
    pub permissions: Option<RepoPermissions>,
    /// Schemes under which [`VALID_TOKEN`] is accepted.
    pub accepted_schemes: Vec<AuthScheme>,
    /// Endpoint and scheme pairs answered with 401 despite a valid token.
    pub rejected: HashSet<(&'static str, AuthScheme)>,
    /// Forced failures keyed by endpoint name.
    pub failures: HashMap<&'static str, RemoteFailure>,
    /// `(endpoint, scheme)` for every call, in order.
    pub calls: Vec<(&'static str, AuthScheme)>,
    next_id: u64,
}

pub struct FakeRemote {
    pub state: Mutex<FakeState>,
}

impl FakeRemote {
    /// Repository with no commits, default branch `main`, both schemes accepted.
    pub fn empty() -> Self {
        Self {
            state: Mutex::new(FakeState {
                repository_exists: true,
                default_branch: "main".to_string(),
                permissions: Some(RepoPermissions {
                    admin: false,
                    push: true,
                    pull: true,
                }),
                accepted_schemes: AuthScheme::ORDER.to_vec(),
                ..FakeState::default()
            }),
        }
    }

    /// Repository whose default branch `main` holds one commit with `files`.
    pub fn with_history(files: &[(&str, &str)]) -> Self {
        let remote = Self::empty();
        {
            let mut state = remote.state.try_lock().expect("fresh fake is unlocked");
            let mut tree = BTreeMap::new();
            for (path, content) in files {
                let blob = state.store_blob(content.as_bytes().to_vec());
                tree.insert(path.to_string(), blob);
            }
            let tree_sha = state.store_tree(tree);
            let commit = state
                .store_commit(&tree_sha, Vec::new(), "initial")
                .expect("tree was just stored");
            state.branches.insert("main".to_string(), commit);
        }
        remote
    }

    pub fn missing() -> Self {
        let remote = Self::empty();
        remote
            .state
            .try_lock()
            .expect("fresh fake is unlocked")
            .repository_exists = false;
        remote
    }

    pub async fn protect(&self, branch: &str) {
        self.state.lock().await.protected.insert(branch.to_string());
    }

    pub async fn fail(&self, endpoint: &'static str, status: u16, body: &str) {
        self.state
            .lock()
            .await
            .failures
            .insert(endpoint, RemoteFailure::new(status, body));
    }

    pub async fn calls_to(&self, endpoint: &str) -> usize {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|(e, _)| *e == endpoint)
            .count()
    }

    /// Content of `path` at the tip of `branch`.
    pub async fn file(&self, branch: &str, path: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().await;
        let commit = state.commits.get(state.branches.get(branch)?)?;
        let blob = commit.tree.get(path)?;
        state.blobs.get(blob).cloned()
    }

    /// Number of commits reachable from `branch` through first parents.
    pub async fn history_len(&self, branch: &str) -> usize {
        let state = self.state.lock().await;
        let mut next = state.branches.get(branch).cloned();
        let mut len = 0;
        while let Some(sha) = next {
            len += 1;
            next = state
                .commits
                .get(&sha)
                .and_then(|c| c.parents.first().cloned());
        }
        len
    }
}

impl FakeState {
    fn fresh_id(&mut self, kind: &str) -> String {
        self.next_id += 1;
        format!("{kind}{:04}", self.next_id)
    }

    fn store_blob(&mut self, content: Vec<u8>) -> String {
        let mut hasher = DefaultHasher::new();
        content.hash(&mut hasher);
        let sha = format!("blob{:016x}", hasher.finish());
        self.blobs.insert(sha.clone(), content);
        sha
    }

    fn store_tree(&mut self, entries: BTreeMap<String, String>) -> String {
        let sha = self.fresh_id("tree");
        self.trees.insert(sha.clone(), entries);
        sha
    }

    fn store_commit(
        &mut self,
        tree_sha: &str,
        parents: Vec<String>,
        message: &str,
    ) -> Option<String> {
        let tree = self.trees.get(tree_sha)?.clone();
        let sha = self.fresh_id("commit");
        self.commits.insert(
            sha.clone(),
            FakeCommit {
                tree,
                parents,
                message: message.to_string(),
            },
        );
        Some(sha)
    }

    /// Record the call, then apply auth, existence and forced failures.
    fn admit(&mut self, endpoint: &'static str, session: &Session<'_>) -> ApiResult<()> {
        self.calls.push((endpoint, session.scheme));
        if session.credential.secret() != VALID_TOKEN
            || !self.accepted_schemes.contains(&session.scheme)
            || self.rejected.contains(&(endpoint, session.scheme))
        {
            return Err(remote(401, r#"{"message":"Bad credentials"}"#));
        }
        if !self.repository_exists {
            return Err(remote(404, r#"{"message":"Not Found"}"#));
        }
        if let Some(failure) = self.failures.get(endpoint) {
            return Err(ApiError::Remote(failure.clone()));
        }
        Ok(())
    }

    fn empty_repo_error() -> ApiError {
        remote(409, r#"{"message":"Git Repository is empty."}"#)
    }
}

fn remote(status: u16, body: &str) -> ApiError {
    ApiError::Remote(RemoteFailure::new(status, body))
}

#[async_trait]
impl ContentApi for FakeRemote {
    async fn get_content(
        &self,
        session: &Session<'_>,
        path: &str,
        git_ref: Option<&str>,
    ) -> ApiResult<ContentMeta> {
        let mut state = self.state.lock().await;
        state.admit(endpoint::GET_CONTENT, session)?;
        let branch = git_ref.unwrap_or(&state.default_branch).to_string();
        let Some(commit_sha) = state.branches.get(&branch) else {
            return Err(remote(404, r#"{"message":"This repository is empty."}"#));
        };
        let commit = &state.commits[commit_sha];
        match commit.tree.get(path) {
            Some(blob) => Ok(ContentMeta {
                sha: blob.clone(),
                path: Some(path.to_string()),
                html_url: Some(blob_url(WEB_URL, session.repo, &branch, path)),
            }),
            None => Err(remote(404, r#"{"message":"Not Found"}"#)),
        }
    }

    async fn put_content(
        &self,
        session: &Session<'_>,
        path: &str,
        body: &PutContent,
    ) -> ApiResult<PutContentResponse> {
        let mut state = self.state.lock().await;
        state.admit(endpoint::PUT_CONTENT, session)?;
        let branch = body
            .branch
            .clone()
            .unwrap_or_else(|| state.default_branch.clone());

        if state.protected.contains(&branch) {
            return Err(remote(
                403,
                r#"{"message":"Resource not accessible by personal access token"}"#,
            ));
        }

        let parent = state.branches.get(&branch).cloned();
        if parent.is_none() && (body.branch.is_some() || !state.branches.is_empty()) {
            return Err(remote(404, r#"{"message":"Branch not found"}"#));
        }

        let mut tree = parent
            .as_ref()
            .map(|sha| state.commits[sha].tree.clone())
            .unwrap_or_default();
        match (tree.get(path), body.sha.as_deref()) {
            (Some(current), Some(given)) if current != given => {
                return Err(remote(409, r#"{"message":"sha does not match"}"#));
            }
            (Some(_), None) => {
                return Err(remote(422, r#"{"message":"\"sha\" wasn't supplied."}"#));
            }
            _ => {}
        }

        let content = BASE64_STANDARD
            .decode(&body.content)
            .map_err(|e| remote(422, &format!("invalid base64: {e}")))?;
        let blob = state.store_blob(content);
        tree.insert(path.to_string(), blob.clone());
        let tree_sha = state.store_tree(tree);
        let commit = state
            .store_commit(&tree_sha, parent.into_iter().collect(), &body.message)
            .ok_or_else(|| remote(500, "tree vanished"))?;
        state.branches.insert(branch.clone(), commit.clone());

        Ok(PutContentResponse {
            content: Some(ContentMeta {
                sha: blob,
                path: Some(path.to_string()),
                html_url: Some(blob_url(WEB_URL, session.repo, &branch, path)),
            }),
            commit: CommitMeta {
                sha: commit,
                html_url: None,
            },
        })
    }

    async fn get_repository(&self, session: &Session<'_>) -> ApiResult<RepositoryMeta> {
        let mut state = self.state.lock().await;
        state.admit(endpoint::GET_REPOSITORY, session)?;
        Ok(RepositoryMeta {
            default_branch: Some(state.default_branch.clone()),
            permissions: state.permissions,
        })
    }

    async fn get_branch_ref(&self, session: &Session<'_>, branch: &str) -> ApiResult<GitRef> {
        let mut state = self.state.lock().await;
        state.admit(endpoint::GET_BRANCH_REF, session)?;
        if state.branches.is_empty() {
            return Err(FakeState::empty_repo_error());
        }
        match state.branches.get(branch) {
            Some(sha) => Ok(GitRef {
                name: format!("refs/heads/{branch}"),
                object: GitObject { sha: sha.clone() },
            }),
            None => Err(remote(404, r#"{"message":"Not Found"}"#)),
        }
    }

    async fn create_ref(&self, session: &Session<'_>, body: &CreateRef) -> ApiResult<GitRef> {
        let mut state = self.state.lock().await;
        state.admit(endpoint::CREATE_REF, session)?;
        let Some(branch) = body.name.strip_prefix("refs/heads/") else {
            return Err(remote(422, r#"{"message":"Reference name is invalid"}"#));
        };
        if state.branches.contains_key(branch) {
            return Err(remote(422, r#"{"message":"Reference already exists"}"#));
        }
        if !state.commits.contains_key(&body.sha) {
            return Err(remote(422, r#"{"message":"Object does not exist"}"#));
        }
        state.branches.insert(branch.to_string(), body.sha.clone());
        Ok(GitRef {
            name: body.name.clone(),
            object: GitObject {
                sha: body.sha.clone(),
            },
        })
    }

    async fn create_blob(&self, session: &Session<'_>, body: &CreateBlob) -> ApiResult<ObjectSha> {
        let mut state = self.state.lock().await;
        state.admit(endpoint::CREATE_BLOB, session)?;
        let content = BASE64_STANDARD
            .decode(&body.content)
            .map_err(|e| remote(422, &format!("invalid base64: {e}")))?;
        Ok(ObjectSha {
            sha: state.store_blob(content),
        })
    }

    async fn create_tree(&self, session: &Session<'_>, body: &CreateTree) -> ApiResult<ObjectSha> {
        let mut state = self.state.lock().await;
        state.admit(endpoint::CREATE_TREE, session)?;
        let mut entries = BTreeMap::new();
        for entry in &body.tree {
            if !state.blobs.contains_key(&entry.sha) {
                return Err(remote(422, r#"{"message":"tree.sha is not a blob"}"#));
            }
            entries.insert(entry.path.clone(), entry.sha.clone());
        }
        Ok(ObjectSha {
            sha: state.store_tree(entries),
        })
    }

    async fn create_commit(
        &self,
        session: &Session<'_>,
        body: &CreateCommit,
    ) -> ApiResult<ObjectSha> {
        let mut state = self.state.lock().await;
        state.admit(endpoint::CREATE_COMMIT, session)?;
        if body.parents.iter().any(|p| !state.commits.contains_key(p)) {
            return Err(remote(422, r#"{"message":"Parent does not exist"}"#));
        }
        let sha = state
            .store_commit(&body.tree, body.parents.clone(), &body.message)
            .ok_or_else(|| remote(422, r#"{"message":"Tree does not exist"}"#))?;
        Ok(ObjectSha { sha })
    }

    fn web_url(&self) -> &str {
        WEB_URL
    }
}
