//! Durable per-step job checkpoints.
//!
//! Each pipeline step stores its JSON-serialized result keyed by
//! (job_id, step). A restarted job replays the stored result instead of
//! re-running the step.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

pub struct CheckpointRepository;

impl CheckpointRepository {
    pub fn get(conn: &Connection, job_id: &str, step: &str) -> Result<Option<String>> {
        conn.query_row(
            "SELECT result FROM job_checkpoints WHERE job_id = ?1 AND step = ?2",
            params![job_id, step],
            |row| row.get(0),
        )
        .optional()
        .context("Failed to query checkpoint")
    }

    pub fn put(conn: &Connection, job_id: &str, step: &str, result: &str) -> Result<()> {
        conn.execute(
            "INSERT OR REPLACE INTO job_checkpoints (job_id, step, result) VALUES (?1, ?2, ?3)",
            params![job_id, step, result],
        )
        .context("Failed to store checkpoint")?;
        Ok(())
    }
}
