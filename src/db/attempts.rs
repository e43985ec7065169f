//! Relocation attempt history.
//!
//! Every relocation started from the CLI gets one row: created when the
//! attempt begins, closed with its outcome when it ends. Rows left in
//! `running` mark attempts that died with the process.

use anyhow::{Context, Result};
use serde::Serialize;
use tokio_rusqlite::{Connection, params, rusqlite};

#[derive(Debug, Clone, Serialize)]
pub struct RelocationRecord {
    pub id: String,
    pub destination: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub outcome: String,
    pub error: Option<String>,
}

pub async fn create(conn: &Connection, id: String, destination: String) -> Result<()> {
    conn.call(move |c| {
        c.execute(
            "INSERT INTO relocations (id, destination) VALUES (?1, ?2)",
            params![id, destination],
        )?;
        Ok::<(), rusqlite::Error>(())
    })
    .await
    .context("Failed to record relocation attempt")?;

    Ok(())
}

pub async fn finish(
    conn: &Connection,
    id: String,
    outcome: String,
    error: Option<String>,
) -> Result<()> {
    conn.call(move |c| {
        c.execute(
            "UPDATE relocations
             SET outcome = ?2, error = ?3, finished_at = datetime('now')
             WHERE id = ?1",
            params![id, outcome, error],
        )?;
        Ok::<(), rusqlite::Error>(())
    })
    .await
    .context("Failed to close relocation attempt")?;

    Ok(())
}

/// Most recent attempts first.
pub async fn list(conn: &Connection, limit: u32) -> Result<Vec<RelocationRecord>> {
    conn.call(move |c| {
        let mut stmt = c.prepare(
            "SELECT id, destination, started_at, finished_at, outcome, error
             FROM relocations
             ORDER BY started_at DESC, id DESC
             LIMIT ?1",
        )?;
        let records = stmt
            .query_map(params![limit], |row| {
                Ok(RelocationRecord {
                    id: row.get(0)?,
                    destination: row.get(1)?,
                    started_at: row.get(2)?,
                    finished_at: row.get(3)?,
                    outcome: row.get(4)?,
                    error: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
        Ok::<_, rusqlite::Error>(records)
    })
    .await
    .context("Failed to read relocation history")
}
