//! Inspect or force-release a session's indexing lock

use anyhow::Result;

use super::common::{AppConfig, resolve_session_id};

pub async fn locks(repo: Option<&str>, session: Option<&str>, release: bool) -> Result<()> {
    let config = AppConfig::from_env();
    let session_id = resolve_session_id(repo, session)?;
    let lock = config.lock()?;

    if release {
        lock.force_release(&session_id).await?;
        println!("Lock for '{session_id}' released.");
        return Ok(());
    }

    if lock.is_locked(&session_id).await? {
        println!("Lock for '{session_id}': held");
        println!("Use 'codescout locks --release' if the holder is gone.");
    } else {
        println!("Lock for '{session_id}': free");
    }
    Ok(())
}
