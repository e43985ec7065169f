use std::path::Path;

use anyhow::{Context, Result};
use tokio_rusqlite::Connection;

pub mod attempts;

/// Open the history database at `path`, creating it and its parent
/// directory if needed, and apply the schema.
pub async fn init(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let conn = Connection::open(path)
        .await
        .with_context(|| format!("Failed to open history database at {}", path.display()))?;

    conn.call(|conn| {
        conn.execute_batch(include_str!("schema.sql"))?;
        Ok::<(), tokio_rusqlite::rusqlite::Error>(())
    })
    .await?;

    Ok(conn)
}
