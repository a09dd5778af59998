//! Agent persona persistence.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

/// An agent record from the database.
#[derive(Debug, Clone)]
pub struct AgentRecord {
    pub id: String,
    pub name: String,
    pub instructions: String,
    pub user_id: String,
    pub created_at: String,
}

/// Repository for agent records.
pub struct AgentRepository;

impl AgentRepository {
    pub fn insert(
        conn: &Connection,
        id: &str,
        name: &str,
        instructions: &str,
        user_id: &str,
    ) -> Result<()> {
        conn.execute(
            "INSERT INTO agents (id, name, instructions, user_id) VALUES (?1, ?2, ?3, ?4)",
            params![id, name, instructions, user_id],
        )
        .context("Failed to insert agent")?;
        Ok(())
    }

    pub fn get(conn: &Connection, id: &str) -> Result<Option<AgentRecord>> {
        conn.query_row(
            "SELECT id, name, instructions, user_id, created_at FROM agents WHERE id = ?1",
            params![id],
            |row| {
                Ok(AgentRecord {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    instructions: row.get(2)?,
                    user_id: row.get(3)?,
                    created_at: row.get(4)?,
                })
            },
        )
        .optional()
        .context("Failed to query agent")
    }

    pub fn list(conn: &Connection, limit: usize) -> Result<Vec<AgentRecord>> {
        let mut stmt = conn
            .prepare(
                "SELECT id, name, instructions, user_id, created_at FROM agents \
                 ORDER BY created_at DESC, id DESC LIMIT ?1",
            )
            .context("Failed to prepare agents list query")?;

        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(AgentRecord {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    instructions: row.get(2)?,
                    user_id: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })
            .context("Failed to list agents")?;

        let mut agents = Vec::new();
        for row in rows {
            agents.push(row?);
        }

        Ok(agents)
    }
}
