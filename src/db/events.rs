//! Event mailbox CRUD
//!
//! Events are addressed to a single agent and destructively read: the
//! envelope drain deletes what it returns, so each event reaches at most
//! one response.

use rusqlite::{params, Connection, Row};
use serde::Serialize;
use serde_json::Value;

use crate::types::MashError;

/// Event row
#[derive(Debug, Clone, Serialize)]
pub struct EventRow {
    pub ordinal: i64,
    #[serde(skip_serializing)]
    pub agent_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: Value,
    pub created_at: i64,
}

impl EventRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        let data_json: String = row.get("data_json")?;
        Ok(Self {
            ordinal: row.get("ordinal")?,
            agent_id: row.get("agent_id")?,
            event_type: row.get("event_type")?,
            data: serde_json::from_str(&data_json).unwrap_or(Value::Null),
            created_at: row.get("created_at")?,
        })
    }
}

/// Append an event addressed to one agent
pub fn append_event(
    conn: &Connection,
    agent_id: &str,
    event_type: &str,
    data: &Value,
    now: i64,
) -> Result<i64, MashError> {
    conn.execute(
        "INSERT INTO events (agent_id, event_type, data_json, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![agent_id, event_type, serde_json::to_string(data)?, now],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Read and delete up to `limit` events for an agent, in ordinal order
pub fn drain_events(
    conn: &Connection,
    agent_id: &str,
    limit: i64,
) -> Result<Vec<EventRow>, MashError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM events WHERE agent_id = ? ORDER BY ordinal LIMIT ?",
    )?;
    let rows: Vec<EventRow> = stmt
        .query_map(params![agent_id, limit], |row| EventRow::from_row(row))?
        .collect::<Result<Vec<_>, _>>()?;

    if let Some(last) = rows.last() {
        conn.execute(
            "DELETE FROM events WHERE agent_id = ? AND ordinal <= ?",
            params![agent_id, last.ordinal],
        )?;
    }

    Ok(rows)
}

/// Drop undelivered events older than the cutoff (tick phase 5)
pub fn delete_older_than(conn: &Connection, cutoff: i64) -> Result<usize, MashError> {
    let deleted = conn.execute("DELETE FROM events WHERE created_at < ?", params![cutoff])?;
    Ok(deleted)
}
