//! Index a repository checkout into a session

use std::fs;
use std::path::Path;
use std::time::Instant;

use anyhow::Result;
use codescout_chunker::Chunker;
use ignore::WalkBuilder;
use tracing::{debug, info};

use super::common::{AppConfig, MAX_FILE_SIZE, resolve_session_id};

pub async fn index(
    path: &Path,
    repo: Option<&str>,
    session: Option<&str>,
    force: bool,
) -> Result<()> {
    let config = AppConfig::from_env();
    let session_id = resolve_session_id(repo, session)?;

    let root = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    info!(session = %session_id, path = %root.display(), "indexing repository");

    let embedder = config.embedder()?;
    let manager = config.manager(embedder);
    let lock = config.lock()?;

    // Writers contend per session; readers never take this lock.
    let guard = lock.acquire(&session_id).await?;

    let result = index_locked(&manager, &session_id, &root, repo, force).await;
    guard.release().await?;
    result
}

async fn index_locked(
    manager: &codescout_session::SessionManager,
    session_id: &str,
    root: &Path,
    repo: Option<&str>,
    force: bool,
) -> Result<()> {
    let start = Instant::now();
    let session = manager.get_or_create(session_id).await?;

    // A changed repo URL means the session would mix two checkouts.
    let previous_url = session
        .load_context()
        .await?
        .and_then(|c| c["repo_url"].as_str().map(str::to_string));
    let url_changed = matches!((repo, previous_url.as_deref()), (Some(new), Some(old)) if new != old);
    if force || url_changed {
        info!(session = %session_id, force, url_changed, "resetting session before indexing");
        session.reset().await?;
    }

    let mut chunker = Chunker::new()?;

    let mut file_count = 0usize;
    let mut skipped = 0usize;
    let mut chunks = Vec::new();

    let walker = WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(true)
        .build();

    for entry in walker.filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let rel_path = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .to_string();

        if let Ok(meta) = entry.metadata() {
            if meta.len() > MAX_FILE_SIZE {
                debug!("Skipping {} (too large: {} bytes)", rel_path, meta.len());
                skipped += 1;
                continue;
            }
        }

        // Binary and non-UTF-8 files fall out here.
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                debug!("Skipping {}: {}", rel_path, e);
                skipped += 1;
                continue;
            }
        };

        let file_chunks = chunker.chunk(&content, &rel_path);
        debug!("Chunked {}: {} chunks", rel_path, file_chunks.len());
        chunks.extend(file_chunks);
        file_count += 1;

        if file_count % 100 == 0 {
            info!("Scanned {} files...", file_count);
        }
    }

    info!(
        files = file_count,
        chunks = chunks.len(),
        "embedding and storing chunks"
    );
    let added = session.index_chunks(&chunks).await?;

    if let Some(url) = repo {
        let context = context_with_repo_url(session.load_context().await?, url);
        session.save_context(&context).await?;
    }

    let elapsed = start.elapsed();
    println!("Indexing complete for session '{session_id}'");
    println!("  Files scanned: {file_count}");
    println!("  Files skipped: {skipped}");
    println!("  Chunks produced: {}", chunks.len());
    println!("  Documents stored: {added}");
    println!("  Time: {:.2}s", elapsed.as_secs_f64());

    Ok(())
}

/// Fold the repo URL into the saved context without dropping other keys.
fn context_with_repo_url(context: Option<serde_json::Value>, url: &str) -> serde_json::Value {
    let mut context = context
        .filter(|c| c.is_object())
        .unwrap_or_else(|| serde_json::json!({}));
    context["repo_url"] = serde_json::json!(url);
    context
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_url_merges_into_existing_context() {
        let existing = serde_json::json!({"branch": "main", "notes": "wip"});
        let merged = context_with_repo_url(Some(existing), "https://github.com/acme/widgets");
        assert_eq!(merged["branch"], "main");
        assert_eq!(merged["notes"], "wip");
        assert_eq!(merged["repo_url"], "https://github.com/acme/widgets");
    }

    #[test]
    fn missing_or_malformed_context_starts_fresh() {
        let merged = context_with_repo_url(None, "https://github.com/acme/widgets");
        assert_eq!(merged["repo_url"], "https://github.com/acme/widgets");

        let merged = context_with_repo_url(
            Some(serde_json::json!(["not", "an", "object"])),
            "https://github.com/acme/widgets",
        );
        assert_eq!(merged["repo_url"], "https://github.com/acme/widgets");
    }
}
