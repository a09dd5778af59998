//! Meeting record persistence.
//!
//! Every lifecycle transition is expressed as a conditional UPDATE whose
//! affected-row count tells the caller whether the transition actually
//! happened. Duplicate event delivery then degrades to a no-op instead of a
//! lost update.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

use crate::lifecycle::status::MeetingStatus;

/// A meeting record from the database.
#[derive(Debug, Clone)]
pub struct MeetingRecord {
    pub id: String,
    pub name: Option<String>,
    pub user_id: String,
    pub agent_id: Option<String>,
    pub status: MeetingStatus,
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
    pub transcript_url: Option<String>,
    pub recording_url: Option<String>,
    pub summary: Option<String>,
    pub created_at: String,
}

const MEETING_COLUMNS: &str = "id, name, user_id, agent_id, status, started_at, ended_at, \
     transcript_url, recording_url, summary, created_at";

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MeetingRecord> {
    let status: String = row.get(4)?;
    Ok(MeetingRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        user_id: row.get(2)?,
        agent_id: row.get(3)?,
        status: MeetingStatus::parse(&status).ok_or(rusqlite::Error::InvalidQuery)?,
        started_at: row.get(5)?,
        ended_at: row.get(6)?,
        transcript_url: row.get(7)?,
        recording_url: row.get(8)?,
        summary: row.get(9)?,
        created_at: row.get(10)?,
    })
}

/// Repository for meeting records.
pub struct MeetingRepository;

impl MeetingRepository {
    /// Insert a new meeting record (status = upcoming).
    pub fn insert(
        conn: &Connection,
        id: &str,
        name: Option<&str>,
        user_id: &str,
        agent_id: Option<&str>,
    ) -> Result<()> {
        conn.execute(
            "INSERT INTO meetings (id, name, user_id, agent_id, status) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, name, user_id, agent_id, MeetingStatus::Upcoming.as_str()],
        )
        .context("Failed to insert meeting")?;
        Ok(())
    }

    /// Get a meeting by ID.
    pub fn get(conn: &Connection, id: &str) -> Result<Option<MeetingRecord>> {
        conn.query_row(
            &format!("SELECT {MEETING_COLUMNS} FROM meetings WHERE id = ?1"),
            params![id],
            map_row,
        )
        .optional()
        .context("Failed to query meeting")
    }

    /// List meetings, newest first.
    pub fn list(conn: &Connection, limit: usize) -> Result<Vec<MeetingRecord>> {
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {MEETING_COLUMNS} FROM meetings \
                 ORDER BY created_at DESC, id DESC LIMIT ?1"
            ))
            .context("Failed to prepare meetings list query")?;

        let rows = stmt
            .query_map(params![limit as i64], map_row)
            .context("Failed to list meetings")?;

        let mut meetings = Vec::new();
        for row in rows {
            meetings.push(row?);
        }

        Ok(meetings)
    }

    /// Transition to active unless the meeting has already started, finished
    /// or been cancelled. Returns whether the row actually changed.
    pub fn start_if_eligible(conn: &Connection, id: &str, started_at: &str) -> Result<bool> {
        let changed = conn
            .execute(
                "UPDATE meetings SET status = 'active', started_at = ?2 \
                 WHERE id = ?1 AND status NOT IN ('completed', 'active', 'cancelled', 'processing')",
                params![id, started_at],
            )
            .context("Failed to start meeting")?;
        Ok(changed > 0)
    }

    /// Transition active → processing. Returns whether the row changed; a
    /// redelivered session-ended event finds no active row and is a no-op.
    pub fn begin_processing_if_active(conn: &Connection, id: &str, ended_at: &str) -> Result<bool> {
        let changed = conn
            .execute(
                "UPDATE meetings SET status = 'processing', ended_at = ?2 \
                 WHERE id = ?1 AND status = 'active'",
                params![id, ended_at],
            )
            .context("Failed to move meeting to processing")?;
        Ok(changed > 0)
    }

    /// Unconditionally mark a meeting processing (end-of-call fallback;
    /// last writer wins against the authoritative webhook).
    pub fn force_processing(conn: &Connection, id: &str, ended_at: &str) -> Result<bool> {
        let changed = conn
            .execute(
                "UPDATE meetings SET status = 'processing', ended_at = ?2 WHERE id = ?1",
                params![id, ended_at],
            )
            .context("Failed to mark meeting ended")?;
        Ok(changed > 0)
    }

    /// Cancel an upcoming meeting. Cancellation is terminal and only valid
    /// before the meeting starts.
    pub fn cancel_if_upcoming(conn: &Connection, id: &str) -> Result<bool> {
        let changed = conn
            .execute(
                "UPDATE meetings SET status = 'cancelled' \
                 WHERE id = ?1 AND status = 'upcoming'",
                params![id],
            )
            .context("Failed to cancel meeting")?;
        Ok(changed > 0)
    }

    /// Record the transcript artifact URL. Returns whether the meeting exists.
    pub fn set_transcript_url(conn: &Connection, id: &str, url: &str) -> Result<bool> {
        let changed = conn
            .execute(
                "UPDATE meetings SET transcript_url = ?2 WHERE id = ?1",
                params![id, url],
            )
            .context("Failed to set transcript URL")?;
        Ok(changed > 0)
    }

    /// Record the recording artifact URL.
    pub fn set_recording_url(conn: &Connection, id: &str, url: &str) -> Result<bool> {
        let changed = conn
            .execute(
                "UPDATE meetings SET recording_url = ?2 WHERE id = ?1",
                params![id, url],
            )
            .context("Failed to set recording URL")?;
        Ok(changed > 0)
    }

    /// Persist the connected agent on the meeting.
    pub fn assign_agent(conn: &Connection, id: &str, agent_id: &str) -> Result<()> {
        conn.execute(
            "UPDATE meetings SET agent_id = ?2 WHERE id = ?1",
            params![id, agent_id],
        )
        .context("Failed to assign agent")?;
        Ok(())
    }

    /// Write the summary and mark the meeting completed.
    pub fn complete_with_summary(conn: &Connection, id: &str, summary: &str) -> Result<()> {
        conn.execute(
            "UPDATE meetings SET summary = ?2, status = 'completed' WHERE id = ?1",
            params![id, summary],
        )
        .context("Failed to complete meeting")?;
        Ok(())
    }
}
