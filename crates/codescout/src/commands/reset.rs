//! Delete every indexed document in a session

use anyhow::Result;
use tracing::info;

use super::common::{AppConfig, resolve_session_id};

pub async fn reset(repo: Option<&str>, session: Option<&str>) -> Result<()> {
    let config = AppConfig::from_env();
    let session_id = resolve_session_id(repo, session)?;

    let embedder = config.embedder()?;
    let manager = config.manager(embedder);
    let lock = config.lock()?;

    let guard = lock.acquire(&session_id).await?;
    let result = async {
        let store = manager.get_or_create(&session_id).await?;
        store.reset().await?;
        Ok::<(), anyhow::Error>(())
    }
    .await;
    guard.release().await?;
    result?;

    info!(session = %session_id, "session reset");
    println!("Session '{session_id}' reset. Re-run 'codescout index' to rebuild.");
    Ok(())
}
