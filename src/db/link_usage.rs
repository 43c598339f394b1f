//! Link usage history
//!
//! One row per successful travel hop; the link_index system thing lists
//! an agent's most recent rows.

use rusqlite::{params, Connection, Row};
use serde::Serialize;

use crate::types::MashError;

/// Link usage row
#[derive(Debug, Clone, Serialize)]
pub struct LinkUsageRow {
    #[serde(skip_serializing)]
    pub id: i64,
    #[serde(skip_serializing)]
    pub agent_id: String,
    pub link_id: String,
    pub destination_node_id: String,
    pub destination_name: String,
    pub used_at: i64,
}

impl LinkUsageRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            agent_id: row.get("agent_id")?,
            link_id: row.get("link_id")?,
            destination_node_id: row.get("destination_node_id")?,
            destination_name: row.get("destination_name")?,
            used_at: row.get("used_at")?,
        })
    }
}

/// Record a completed hop
pub fn record_usage(
    conn: &Connection,
    agent_id: &str,
    link_id: &str,
    destination_node_id: &str,
    destination_name: &str,
    now: i64,
) -> Result<(), MashError> {
    conn.execute(
        "INSERT INTO link_usage (agent_id, link_id, destination_node_id, destination_name, used_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![agent_id, link_id, destination_node_id, destination_name, now],
    )?;
    Ok(())
}

/// Most recent hops for an agent, newest first
pub fn recent_for_agent(
    conn: &Connection,
    agent_id: &str,
    limit: i64,
) -> Result<Vec<LinkUsageRow>, MashError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM link_usage WHERE agent_id = ? ORDER BY used_at DESC, id DESC LIMIT ?",
    )?;
    let rows = stmt
        .query_map(params![agent_id, limit], |row| LinkUsageRow::from_row(row))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
