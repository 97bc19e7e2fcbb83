// src/db/history.rs

//! Persistent action history
//!
//! Each executed command appends one entry recording the action, its target,
//! and whether it succeeded.

use crate::db::schema;
use crate::error::{Error, Result};
use rusqlite::{Connection, Row, params};
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// Outcome of a recorded action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryStatus {
    Success,
    Failed,
}

impl HistoryStatus {
    pub fn as_str(&self) -> &str {
        match self {
            HistoryStatus::Success => "success",
            HistoryStatus::Failed => "failed",
        }
    }
}

impl FromStr for HistoryStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "success" => Ok(HistoryStatus::Success),
            "failed" => Ok(HistoryStatus::Failed),
            _ => Err(format!("Invalid history status: {}", s)),
        }
    }
}

/// One executed command
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub id: Option<i64>,
    pub action: String,
    pub target: String,
    pub status: HistoryStatus,
    pub message: Option<String>,
    pub created_at: Option<String>,
}

impl HistoryEntry {
    /// Create a new entry
    pub fn new(action: &str, target: &str, status: HistoryStatus) -> Self {
        Self {
            id: None,
            action: action.to_string(),
            target: target.to_string(),
            status,
            message: None,
            created_at: None,
        }
    }

    /// Attach an outcome or failure cause
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Insert this entry into the database
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO history (action, target, status, message) VALUES (?1, ?2, ?3, ?4)",
            params![&self.action, &self.target, self.status.as_str(), &self.message],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// List the most recent entries, newest first
    pub fn list_recent(conn: &Connection, limit: usize) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, action, target, status, message, created_at
             FROM history ORDER BY id DESC LIMIT ?1",
        )?;

        let entries = stmt
            .query_map([limit as i64], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(entries)
    }

    /// List every entry for one target, oldest first
    pub fn find_by_target(conn: &Connection, target: &str) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, action, target, status, message, created_at
             FROM history WHERE target = ?1 ORDER BY id",
        )?;

        let entries = stmt
            .query_map([target], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(entries)
    }

    /// Convert a database row to a HistoryEntry
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let status_str: String = row.get(3)?;
        let status = status_str.parse::<HistoryStatus>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
            )
        })?;

        Ok(Self {
            id: Some(row.get(0)?),
            action: row.get(1)?,
            target: row.get(2)?,
            status,
            message: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}

/// Open (creating and migrating if needed) the history database
pub fn open(path: &Path) -> Result<Connection> {
    debug!("Opening history database at: {}", path.display());

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            Error::InitError(format!("Failed to create history directory: {}", e))
        })?;
    }

    let conn = Connection::open(path)?;
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA busy_timeout = 5000;
        ",
    )?;

    schema::migrate(&conn)?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_list() {
        let temp_dir = tempfile::tempdir().unwrap();
        let conn = open(&temp_dir.path().join("history.sqlite")).unwrap();

        let mut first = HistoryEntry::new("install", "foo", HistoryStatus::Success);
        let id = first.insert(&conn).unwrap();
        assert_eq!(first.id, Some(id));

        HistoryEntry::new("remove", "bar", HistoryStatus::Failed)
            .with_message("Package 'bar' is not installed")
            .insert(&conn)
            .unwrap();

        let recent = HistoryEntry::list_recent(&conn, 10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].action, "remove");
        assert_eq!(recent[0].status, HistoryStatus::Failed);
        assert_eq!(recent[0].message.as_deref(), Some("Package 'bar' is not installed"));
        assert!(recent[0].created_at.is_some());

        let limited = HistoryEntry::list_recent(&conn, 1).unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn test_find_by_target() {
        let temp_dir = tempfile::tempdir().unwrap();
        let conn = open(&temp_dir.path().join("nested/history.sqlite")).unwrap();

        HistoryEntry::new("install", "foo", HistoryStatus::Success).insert(&conn).unwrap();
        HistoryEntry::new("install", "bar", HistoryStatus::Success).insert(&conn).unwrap();
        HistoryEntry::new("remove", "foo", HistoryStatus::Success).insert(&conn).unwrap();

        let entries = HistoryEntry::find_by_target(&conn, "foo").unwrap();
        let actions: Vec<_> = entries.iter().map(|e| e.action.as_str()).collect();
        assert_eq!(actions, vec!["install", "remove"]);
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("success".parse::<HistoryStatus>(), Ok(HistoryStatus::Success));
        assert_eq!("failed".parse::<HistoryStatus>(), Ok(HistoryStatus::Failed));
        assert!("applied".parse::<HistoryStatus>().is_err());
    }
}
