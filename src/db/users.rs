//! User persistence.
//!
//! Account management lives outside this service; the table carries the
//! minimum needed for chat channel membership and transcript speaker
//! resolution.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: String,
    pub name: String,
    pub created_at: String,
}

pub struct UserRepository;

impl UserRepository {
    pub fn upsert(conn: &Connection, id: &str, name: &str) -> Result<()> {
        conn.execute(
            "INSERT INTO users (id, name) VALUES (?1, ?2) \
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
            params![id, name],
        )
        .context("Failed to upsert user")?;
        Ok(())
    }

    pub fn get(conn: &Connection, id: &str) -> Result<Option<UserRecord>> {
        conn.query_row(
            "SELECT id, name, created_at FROM users WHERE id = ?1",
            params![id],
            |row| {
                Ok(UserRecord {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    created_at: row.get(2)?,
                })
            },
        )
        .optional()
        .context("Failed to query user")
    }
}
