//! Processing job persistence.
//!
//! Jobs are the durable half of the at-least-once enqueue contract: a row is
//! inserted as queued, claimed by the worker as running, and finished as
//! done or failed. Rows stuck in running (crash mid-job) are requeued at
//! startup; the checkpoint table makes the re-run skip completed steps.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: String,
    pub meeting_id: String,
    pub transcript_url: Option<String>,
    pub regenerate: bool,
    pub status: String,
    pub error: Option<String>,
    pub created_at: String,
}

pub struct JobRepository;

impl JobRepository {
    pub fn enqueue(
        conn: &Connection,
        id: &str,
        meeting_id: &str,
        transcript_url: Option<&str>,
        regenerate: bool,
    ) -> Result<()> {
        conn.execute(
            "INSERT INTO jobs (id, meeting_id, transcript_url, regenerate, status) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id,
                meeting_id,
                transcript_url,
                regenerate as i64,
                JobStatus::Queued.as_str()
            ],
        )
        .context("Failed to enqueue job")?;
        Ok(())
    }

    /// Claim the oldest queued job, marking it running.
    pub fn claim_next(conn: &Connection) -> Result<Option<JobRecord>> {
        let job = conn
            .query_row(
                "SELECT id, meeting_id, transcript_url, regenerate, status, error, created_at \
                 FROM jobs WHERE status = ?1 ORDER BY created_at ASC, id ASC LIMIT 1",
                params![JobStatus::Queued.as_str()],
                |row| {
                    let regenerate: i64 = row.get(3)?;
                    Ok(JobRecord {
                        id: row.get(0)?,
                        meeting_id: row.get(1)?,
                        transcript_url: row.get(2)?,
                        regenerate: regenerate != 0,
                        status: row.get(4)?,
                        error: row.get(5)?,
                        created_at: row.get(6)?,
                    })
                },
            )
            .optional()
            .context("Failed to query queued jobs")?;

        if let Some(job) = &job {
            conn.execute(
                "UPDATE jobs SET status = ?2 WHERE id = ?1",
                params![job.id, JobStatus::Running.as_str()],
            )
            .context("Failed to mark job running")?;
        }

        Ok(job)
    }

    pub fn mark_done(conn: &Connection, id: &str) -> Result<()> {
        conn.execute(
            "UPDATE jobs SET status = ?2 WHERE id = ?1",
            params![id, JobStatus::Done.as_str()],
        )
        .context("Failed to mark job done")?;
        Ok(())
    }

    pub fn mark_failed(conn: &Connection, id: &str, error: &str) -> Result<()> {
        conn.execute(
            "UPDATE jobs SET status = ?2, error = ?3 WHERE id = ?1",
            params![id, JobStatus::Failed.as_str(), error],
        )
        .context("Failed to mark job failed")?;
        Ok(())
    }

    /// Requeue jobs left running by a previous process (crash recovery).
    pub fn requeue_running(conn: &Connection) -> Result<usize> {
        conn.execute(
            "UPDATE jobs SET status = ?1 WHERE status = ?2",
            params![JobStatus::Queued.as_str(), JobStatus::Running.as_str()],
        )
        .context("Failed to requeue running jobs")
    }
}
