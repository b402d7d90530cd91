//! Search an indexed session

use anyhow::Result;
use codescout_session::ResultSource;

use super::common::{AppConfig, resolve_session_id};

pub async fn search(
    query: &str,
    repo: Option<&str>,
    session: Option<&str>,
    limit: usize,
    file: Option<&str>,
) -> Result<()> {
    let config = AppConfig::from_env();
    let session_id = resolve_session_id(repo, session)?;

    let embedder = config.embedder()?;
    let manager = config.manager(embedder);
    let store = manager.get_or_create(&session_id).await?;

    if !store.has_index().await? {
        anyhow::bail!("Session '{session_id}' has no index. Run 'codescout index' first.");
    }

    let results = store.search_hybrid(query, limit, file).await?;

    println!("Search results for '{query}' in session '{session_id}'");
    println!("Found {} results\n", results.len());

    for result in &results {
        let source = match result.source {
            ResultSource::Vector => "vector",
            ResultSource::Lexical => "lexical",
            ResultSource::Hybrid => "hybrid",
        };
        println!(
            "📄 {}:{} (score: {:.4}, {})",
            result.document.metadata.file_path, result.document.metadata.start_line,
            result.score, source
        );
        println!(
            "   Symbol: {} ({})",
            result.document.metadata.symbol_name, result.document.metadata.kind
        );
        if let Some(ref class) = result.document.metadata.enclosing_type {
            println!("   In: {class}");
        }

        let snippet: String = result.document.content.chars().take(100).collect();
        println!("   {}", snippet.trim());
        println!();
    }

    Ok(())
}
