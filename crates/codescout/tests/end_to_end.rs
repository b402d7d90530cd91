//! Full pipeline over a temporary repository checkout: chunk, index,
//! search, reset. Uses the deterministic hash embedder so no network or
//! model is involved.

use std::fs;
use std::sync::Arc;

use codescout_chunker::Chunker;
use codescout_embeddings::HashEmbedder;
use codescout_session::{ResultSource, SessionManager, repo_session_id};
use codescout_store::SqliteStoreFactory;

const DIM: usize = 128;

fn write_repo(root: &std::path::Path) {
    fs::write(
        root.join("retry.py"),
        r#"import time


def with_backoff(operation, attempts=3):
    """Retry an operation with exponential backoff."""
    delay = 0.5
    for attempt in range(attempts):
        try:
            return operation()
        except TimeoutError:
            time.sleep(delay)
            delay *= 2
    raise RuntimeError("operation failed after retries")
"#,
    )
    .unwrap();

    fs::write(
        root.join("server.c"),
        r#"#include <stdio.h>

static int request_count;

int handle_request(int socket_fd) {
    request_count++;
    return socket_fd > 0 ? 0 : -1;
}
"#,
    )
    .unwrap();

    fs::write(root.join("NOTES.txt"), "deployment notes\nrestart nginx after rollout\n").unwrap();
}

#[tokio::test]
async fn index_search_reset_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let repo_root = dir.path().join("checkout");
    fs::create_dir_all(&repo_root).unwrap();
    write_repo(&repo_root);

    let session_id = repo_session_id("https://github.com/acme/widgets").unwrap();
    let manager = SessionManager::new(
        Arc::new(SqliteStoreFactory::new(dir.path().join("collections"))),
        Arc::new(HashEmbedder::new(DIM)),
        dir.path().join("sessions"),
    );
    let session = manager.get_or_create(&session_id).await.unwrap();

    // Chunk every file the way the index command does.
    let mut chunker = Chunker::new().unwrap();
    let mut chunks = Vec::new();
    for entry in fs::read_dir(&repo_root).unwrap() {
        let path = entry.unwrap().path();
        let rel = path.file_name().unwrap().to_string_lossy().to_string();
        let content = fs::read_to_string(&path).unwrap();
        chunks.extend(chunker.chunk(&content, &rel));
    }
    assert!(!chunks.is_empty());

    let added = session.index_chunks(&chunks).await.unwrap();
    assert!(added > 0);
    assert!(session.has_index().await.unwrap());

    // Lexical terms from the Python chunk should surface it first.
    let results = session
        .search_hybrid("exponential backoff retry", 5, None)
        .await
        .unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].document.metadata.file_path, "retry.py");
    assert!(matches!(
        results[0].source,
        ResultSource::Hybrid | ResultSource::Vector | ResultSource::Lexical
    ));

    // The C file is reachable through its own vocabulary and the filter.
    let c_hits = session
        .search_hybrid("handle request socket", 5, Some("server.c"))
        .await
        .unwrap();
    assert!(!c_hits.is_empty());
    assert!(c_hits.iter().all(|r| r.document.metadata.file_path == "server.c"));

    // Reset empties the session but leaves it usable.
    session.reset().await.unwrap();
    assert!(!session.has_index().await.unwrap());
    assert!(
        session
            .search_hybrid("exponential backoff", 5, None)
            .await
            .unwrap()
            .is_empty()
    );

    let re_added = session.index_chunks(&chunks).await.unwrap();
    assert_eq!(re_added, added);

    manager.close_all().await;
}
