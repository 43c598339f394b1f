//! Action queue CRUD
//!
//! The AUTOINCREMENT ordinal is the single global execution order; the
//! tick drains every entry whose target tick has arrived, in ordinal
//! order.

use rusqlite::{params, Connection, Row};
use serde_json::Value;

use crate::types::MashError;

/// Action queue row
#[derive(Debug, Clone)]
pub struct QueueRow {
    pub ordinal: i64,
    pub agent_id: String,
    pub verb: String,
    pub params: Value,
    pub tick_number: i64,
    pub created_at: i64,
}

impl QueueRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        let params_json: String = row.get("params_json")?;
        Ok(Self {
            ordinal: row.get("ordinal")?,
            agent_id: row.get("agent_id")?,
            verb: row.get("verb")?,
            params: serde_json::from_str(&params_json).unwrap_or(Value::Null),
            tick_number: row.get("tick_number")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Append an action; returns its ordinal
pub fn enqueue(
    conn: &Connection,
    agent_id: &str,
    verb: &str,
    params: &Value,
    tick_number: i64,
    now: i64,
) -> Result<i64, MashError> {
    conn.execute(
        "INSERT INTO action_queue (agent_id, verb, params_json, tick_number, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            agent_id,
            verb,
            serde_json::to_string(params)?,
            tick_number,
            now
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Entries due at or before the given tick, in ordinal order
pub fn due_entries(conn: &Connection, tick_number: i64) -> Result<Vec<QueueRow>, MashError> {
    let mut stmt = conn
        .prepare("SELECT * FROM action_queue WHERE tick_number <= ? ORDER BY ordinal")?;
    let rows = stmt
        .query_map(params![tick_number], |row| QueueRow::from_row(row))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Remove a drained entry
pub fn delete_entry(conn: &Connection, ordinal: i64) -> Result<(), MashError> {
    conn.execute(
        "DELETE FROM action_queue WHERE ordinal = ?",
        params![ordinal],
    )?;
    Ok(())
}
