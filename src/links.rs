//! Browser-facing URLs on the repository host's web UI.

use anyhow::{Context, Result};

use crate::repo::RepositoryRef;

/// Percent-encode each segment of a slash-separated path, keeping the slashes.
pub fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Web URL of a file on a branch, e.g. `https://github.com/o/r/blob/main/a.py`.
pub fn blob_url(web_url: &str, repo: &RepositoryRef, branch: &str, path: &str) -> String {
    format!(
        "{}/{}/{}/blob/{}/{}",
        web_url.trim_end_matches('/'),
        repo.owner(),
        repo.name(),
        encode_path(branch),
        encode_path(path),
    )
}

/// Prefilled "create new file" page, the manual way out when every API
/// route has failed.
pub fn new_file_url(
    web_url: &str,
    repo: &RepositoryRef,
    branch: &str,
    path: &str,
    content: &str,
) -> Result<reqwest::Url> {
    let base = format!(
        "{}/{}/{}/new/{}",
        web_url.trim_end_matches('/'),
        repo.owner(),
        repo.name(),
        encode_path(branch),
    );
    reqwest::Url::parse_with_params(&base, &[("filename", path), ("value", content)])
        .with_context(|| format!("failed to build new-file URL from {base}"))
}
