//! World state key-value table: tick counter and last-tick timestamp

use rusqlite::{params, Connection, OptionalExtension};

use crate::types::MashError;

const KEY_TICK_NUMBER: &str = "tick_number";
const KEY_LAST_TICK_AT: &str = "last_tick_at";

fn get(conn: &Connection, key: &str) -> Result<Option<String>, MashError> {
    let value = conn
        .query_row(
            "SELECT value FROM world_state WHERE key = ?",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

fn set(conn: &Connection, key: &str, value: &str) -> Result<(), MashError> {
    conn.execute(
        "INSERT INTO world_state (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

/// Current tick number (0 before the first tick)
pub fn get_tick_number(conn: &Connection) -> Result<i64, MashError> {
    Ok(get(conn, KEY_TICK_NUMBER)?
        .and_then(|v| v.parse().ok())
        .unwrap_or(0))
}

pub fn set_tick_number(conn: &Connection, tick: i64) -> Result<(), MashError> {
    set(conn, KEY_TICK_NUMBER, &tick.to_string())
}

/// Wall-clock ms of the last tick boundary
pub fn get_last_tick_at(conn: &Connection) -> Result<i64, MashError> {
    Ok(get(conn, KEY_LAST_TICK_AT)?
        .and_then(|v| v.parse().ok())
        .unwrap_or(0))
}

pub fn set_last_tick_at(conn: &Connection, at: i64) -> Result<(), MashError> {
    set(conn, KEY_LAST_TICK_AT, &at.to_string())
}
