//! Repository-derived session identifiers.
//!
//! The same repository must always land in the same session no matter how
//! its URL was spelled, so ids are derived from a normalized URL:
//! `repo_{sha256(url)[..8]}_{owner}_{repo}`. The hash disambiguates, the
//! owner/repo suffix keeps ids readable in logs and on disk.

use sha2::{Digest, Sha256};

use crate::error::SessionError;

/// Canonical form of a repository URL: https scheme, no `.git` suffix, no
/// trailing slash, lowercased host. `git@host:owner/repo` becomes
/// `https://host/owner/repo`.
pub fn normalize_repo_url(url: &str) -> String {
    let mut url = url.trim().trim_end_matches('/').to_string();

    if let Some(rest) = url.strip_prefix("git@") {
        if let Some((host, path)) = rest.split_once(':') {
            url = format!("https://{host}/{path}");
        }
    }
    if let Some(stripped) = url.strip_suffix(".git") {
        url = stripped.to_string();
    }

    if let Some(scheme_end) = url.find("://") {
        let path_start = url[scheme_end + 3..]
            .find('/')
            .map(|i| scheme_end + 3 + i)
            .unwrap_or(url.len());
        let (head, tail) = url.split_at(path_start);
        url = format!("{}{}", head.to_lowercase(), tail);
    }

    url
}

/// Owner and repository name, the last two path segments of the URL.
pub fn extract_repo_info(url: &str) -> Option<(String, String)> {
    let normalized = normalize_repo_url(url);
    let path = normalized.split("://").nth(1).unwrap_or(&normalized);
    let mut segments = path.split('/').filter(|s| !s.is_empty()).rev();
    let repo = segments.next()?.to_string();
    let owner = segments.next()?.to_string();
    Some((owner, repo))
}

/// Session id for a repository URL.
pub fn repo_session_id(url: &str) -> Result<String, SessionError> {
    let normalized = normalize_repo_url(url);
    let (owner, repo) = extract_repo_info(url)
        .ok_or_else(|| SessionError::InvalidSessionId(format!("not a repository url: {url}")))?;

    let digest = Sha256::digest(normalized.as_bytes());
    let hash: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();

    Ok(format!(
        "repo_{hash}_{}_{}",
        sanitize_component(&owner),
        sanitize_component(&repo)
    ))
}

/// Make an arbitrary session name safe for collection names and file paths.
pub fn sanitize_session_id(name: &str) -> String {
    sanitize_component(name)
}

pub fn is_repo_session_id(id: &str) -> bool {
    match id.strip_prefix("repo_") {
        Some(rest) => rest
            .split_once('_')
            .is_some_and(|(hash, tail)| {
                hash.len() == 8 && hash.chars().all(|c| c.is_ascii_hexdigit()) && !tail.is_empty()
            }),
        None => false,
    }
}

fn sanitize_component(raw: &str) -> String {
    let sanitized: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.is_empty() {
        "_".to_string()
    } else {
        sanitized
    }
}
