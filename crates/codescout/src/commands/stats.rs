//! Show session statistics

use anyhow::Result;

use super::common::{AppConfig, resolve_session_id};

pub async fn stats(repo: Option<&str>, session: Option<&str>) -> Result<()> {
    let config = AppConfig::from_env();
    let session_id = resolve_session_id(repo, session)?;

    let embedder = config.embedder()?;
    let manager = config.manager(embedder);
    let store = manager.get_or_create(&session_id).await?;

    let stats = store.stats().await?;
    let files = store.indexed_files().await?;
    let reports = store.available_report_languages().await?;

    println!("Codescout Session Statistics");
    println!("============================");
    println!("Session: {}", stats.session_id);
    println!("Data dir: {}", config.data_dir.display());
    println!("Documents: {}", stats.document_count);
    println!("Files indexed: {}", stats.file_count);
    if !files.is_empty() {
        println!("Sample files:");
        for file in files.iter().take(10) {
            println!("  {file}");
        }
    }
    if !reports.is_empty() {
        println!("Reports: {}", reports.join(", "));
    }

    Ok(())
}
