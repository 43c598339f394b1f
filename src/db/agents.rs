//! Agent account CRUD

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::types::MashError;

/// Agent row from database
#[derive(Debug, Clone, Serialize)]
pub struct AgentRow {
    pub id: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    #[serde(skip_serializing)]
    pub token: String,
    /// NULL means limbo
    pub current_node_id: Option<String>,
    pub home_node_id: String,
    pub ap: i64,
    pub purchased_ap_this_tick: i64,
    pub short_description: String,
    pub long_description: String,
    pub cap_agents: i64,
    pub cap_links: i64,
    pub cap_things: i64,
    pub see_broadcasts: bool,
    pub last_active_at: i64,
}

impl AgentRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            username: row.get("username")?,
            password_hash: row.get("password_hash")?,
            token: row.get("token")?,
            current_node_id: row.get("current_node_id")?,
            home_node_id: row.get("home_node_id")?,
            ap: row.get("ap")?,
            purchased_ap_this_tick: row.get("purchased_ap_this_tick")?,
            short_description: row.get("short_description")?,
            long_description: row.get("long_description")?,
            cap_agents: row.get("cap_agents")?,
            cap_links: row.get("cap_links")?,
            cap_things: row.get("cap_things")?,
            see_broadcasts: row.get::<_, i64>("see_broadcasts")? != 0,
            last_active_at: row.get("last_active_at")?,
        })
    }
}

/// Insert a new agent row
pub fn create_agent(conn: &Connection, agent: &AgentRow) -> Result<(), MashError> {
    conn.execute(
        "INSERT INTO agents (id, username, password_hash, token, current_node_id, home_node_id,
                             ap, purchased_ap_this_tick, short_description, long_description,
                             cap_agents, cap_links, cap_things, see_broadcasts, last_active_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            agent.id,
            agent.username,
            agent.password_hash,
            agent.token,
            agent.current_node_id,
            agent.home_node_id,
            agent.ap,
            agent.purchased_ap_this_tick,
            agent.short_description,
            agent.long_description,
            agent.cap_agents,
            agent.cap_links,
            agent.cap_things,
            agent.see_broadcasts as i64,
            agent.last_active_at,
        ],
    )?;
    Ok(())
}

/// Get agent by id
pub fn get_agent(conn: &Connection, id: &str) -> Result<Option<AgentRow>, MashError> {
    let agent = conn
        .query_row("SELECT * FROM agents WHERE id = ?", params![id], |row| {
            AgentRow::from_row(row)
        })
        .optional()?;
    Ok(agent)
}

/// Get agent by unique username
pub fn get_agent_by_username(
    conn: &Connection,
    username: &str,
) -> Result<Option<AgentRow>, MashError> {
    let agent = conn
        .query_row(
            "SELECT * FROM agents WHERE username = ?",
            params![username],
            |row| AgentRow::from_row(row),
        )
        .optional()?;
    Ok(agent)
}

/// Get agent by bearer token
pub fn get_agent_by_token(conn: &Connection, token: &str) -> Result<Option<AgentRow>, MashError> {
    let agent = conn
        .query_row(
            "SELECT * FROM agents WHERE token = ?",
            params![token],
            |row| AgentRow::from_row(row),
        )
        .optional()?;
    Ok(agent)
}

/// Rotate an agent's bearer token
pub fn set_token(conn: &Connection, id: &str, token: &str) -> Result<(), MashError> {
    conn.execute(
        "UPDATE agents SET token = ? WHERE id = ?",
        params![token, id],
    )?;
    Ok(())
}

/// Move an agent; NULL sends it to limbo
pub fn set_current_node(
    conn: &Connection,
    id: &str,
    node_id: Option<&str>,
) -> Result<(), MashError> {
    conn.execute(
        "UPDATE agents SET current_node_id = ? WHERE id = ?",
        params![node_id, id],
    )?;
    Ok(())
}

/// Overwrite an agent's AP balance
pub fn set_ap(conn: &Connection, id: &str, ap: i64) -> Result<(), MashError> {
    conn.execute("UPDATE agents SET ap = ? WHERE id = ?", params![ap, id])?;
    Ok(())
}

/// Record a purchase against the per-tick cap
pub fn set_purchased_ap(conn: &Connection, id: &str, purchased: i64) -> Result<(), MashError> {
    conn.execute(
        "UPDATE agents SET purchased_ap_this_tick = ? WHERE id = ?",
        params![purchased, id],
    )?;
    Ok(())
}

/// Update the activity timestamp used by idle reaping
pub fn touch(conn: &Connection, id: &str, now: i64) -> Result<(), MashError> {
    conn.execute(
        "UPDATE agents SET last_active_at = ? WHERE id = ?",
        params![now, id],
    )?;
    Ok(())
}

/// Update profile descriptions
pub fn set_profile(
    conn: &Connection,
    id: &str,
    short: &str,
    long: &str,
) -> Result<(), MashError> {
    conn.execute(
        "UPDATE agents SET short_description = ?, long_description = ? WHERE id = ?",
        params![short, long, id],
    )?;
    Ok(())
}

/// Update perception caps and the broadcast flag
pub fn set_perception(
    conn: &Connection,
    id: &str,
    cap_agents: i64,
    cap_links: i64,
    cap_things: i64,
    see_broadcasts: bool,
) -> Result<(), MashError> {
    conn.execute(
        "UPDATE agents SET cap_agents = ?, cap_links = ?, cap_things = ?, see_broadcasts = ?
         WHERE id = ?",
        params![cap_agents, cap_links, cap_things, see_broadcasts as i64, id],
    )?;
    Ok(())
}

/// All live agents currently in a node, in username order
pub fn agents_in_node(conn: &Connection, node_id: &str) -> Result<Vec<AgentRow>, MashError> {
    let mut stmt =
        conn.prepare("SELECT * FROM agents WHERE current_node_id = ? ORDER BY username")?;
    let agents = stmt
        .query_map(params![node_id], |row| AgentRow::from_row(row))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(agents)
}

/// Distinct occupied node ids
pub fn occupied_nodes(conn: &Connection) -> Result<Vec<String>, MashError> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT current_node_id FROM agents
         WHERE current_node_id IS NOT NULL ORDER BY current_node_id",
    )?;
    let nodes = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(nodes)
}

/// Home node ids of every agent (random_link must avoid these)
pub fn all_home_nodes(conn: &Connection) -> Result<Vec<String>, MashError> {
    let mut stmt = conn.prepare("SELECT home_node_id FROM agents")?;
    let nodes = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(nodes)
}

/// Reset the AP economy for every agent (tick phase 1)
pub fn reset_ap_all(conn: &Connection, max_ap: i64) -> Result<(), MashError> {
    conn.execute(
        "UPDATE agents SET ap = ?, purchased_ap_this_tick = 0",
        params![max_ap],
    )?;
    Ok(())
}

/// Agents idle since before the cutoff and not already in limbo
pub fn idle_agents(conn: &Connection, cutoff: i64) -> Result<Vec<AgentRow>, MashError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM agents WHERE last_active_at < ? AND current_node_id IS NOT NULL",
    )?;
    let agents = stmt
        .query_map(params![cutoff], |row| AgentRow::from_row(row))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(agents)
}
