//! Wire types for the content and git database endpoints.

use serde::{Deserialize, Serialize};

use super::permission::RepoPermissions;

// ---------------------------------------------------------------------------
// Contents API
// ---------------------------------------------------------------------------

/// Metadata of an existing file. `sha` is the version marker required to
/// overwrite it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentMeta {
    pub sha: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutContent {
    pub message: String,
    /// Base64-encoded file content.
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMeta {
    pub sha: String,
    #[serde(default)]
    pub html_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutContentResponse {
    #[serde(default)]
    pub content: Option<ContentMeta>,
    pub commit: CommitMeta,
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryMeta {
    #[serde(default)]
    pub default_branch: Option<String>,
    /// Only present when the caller is authenticated.
    #[serde(default)]
    pub permissions: Option<RepoPermissions>,
}

// ---------------------------------------------------------------------------
// Git database
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitObject {
    pub sha: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitRef {
    #[serde(rename = "ref")]
    pub name: String,
    pub object: GitObject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRef {
    /// Fully qualified, e.g. `refs/heads/autocommit-1700000000000`.
    #[serde(rename = "ref")]
    pub name: String,
    pub sha: String,
}

impl CreateRef {
    pub fn branch(branch: &str, sha: impl Into<String>) -> Self {
        Self {
            name: format!("refs/heads/{branch}"),
            sha: sha.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateBlob {
    pub content: String,
    pub encoding: String,
}

impl CreateBlob {
    pub fn base64(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            encoding: "base64".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub path: String,
    pub mode: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub sha: String,
}

impl TreeEntry {
    /// Regular (non-executable) file entry.
    pub fn file(path: impl Into<String>, blob_sha: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: "100644".to_string(),
            kind: "blob".to_string(),
            sha: blob_sha.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTree {
    pub tree: Vec<TreeEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateCommit {
    pub message: String,
    pub tree: String,
    #[serde(default)]
    pub parents: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSha {
    pub sha: String,
}
