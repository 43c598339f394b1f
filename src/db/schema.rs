//! Database schema definitions

use rusqlite::Connection;
use tracing::info;

use crate::types::MashError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<(), MashError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new world schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!(
            "Migrating schema from v{} to v{}",
            current_version, SCHEMA_VERSION
        );
        migrate_schema(conn, current_version)?;
    } else {
        info!("World schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32, MashError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )
    .map_err(|e| MashError::Database(format!("Failed to create schema_version table: {}", e)))?;

    let version: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .unwrap_or(0);

    Ok(version)
}

/// Set schema version
fn set_schema_version(conn: &Connection, version: i32) -> Result<(), MashError> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(|e| MashError::Database(format!("Failed to clear schema_version: {}", e)))?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])
        .map_err(|e| MashError::Database(format!("Failed to set schema_version: {}", e)))?;
    Ok(())
}

/// Create all tables
fn create_tables(conn: &Connection) -> Result<(), MashError> {
    conn.execute_batch(WORLD_SCHEMA)
        .map_err(|e| MashError::Database(format!("Failed to create world tables: {}", e)))?;

    conn.execute_batch(INDEXES_SCHEMA)
        .map_err(|e| MashError::Database(format!("Failed to create indexes: {}", e)))?;

    Ok(())
}

/// Migrate schema from older version
fn migrate_schema(conn: &Connection, from_version: i32) -> Result<(), MashError> {
    // Add migration steps here as the schema evolves
    let current = from_version;
    set_schema_version(conn, current)?;
    Ok(())
}

/// World tables
const WORLD_SCHEMA: &str = r#"
-- Agent accounts and their live state
CREATE TABLE IF NOT EXISTS agents (
    id TEXT PRIMARY KEY NOT NULL,
    username TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    token TEXT NOT NULL,

    -- Position; NULL current_node_id means limbo
    current_node_id TEXT,
    home_node_id TEXT NOT NULL,

    -- AP economy
    ap INTEGER NOT NULL DEFAULT 0,
    purchased_ap_this_tick INTEGER NOT NULL DEFAULT 0,

    -- Profile
    short_description TEXT NOT NULL DEFAULT '',
    long_description TEXT NOT NULL DEFAULT '',

    -- Perception caps (1-100)
    cap_agents INTEGER NOT NULL DEFAULT 20,
    cap_links INTEGER NOT NULL DEFAULT 20,
    cap_things INTEGER NOT NULL DEFAULT 20,
    see_broadcasts INTEGER NOT NULL DEFAULT 1,

    last_active_at INTEGER NOT NULL DEFAULT 0
);

-- User-authored blueprints
CREATE TABLE IF NOT EXISTS templates (
    id TEXT PRIMARY KEY NOT NULL,
    owner_id TEXT NOT NULL,
    name TEXT NOT NULL,
    kind TEXT NOT NULL,  -- node, link, thing
    short_description TEXT NOT NULL DEFAULT '',
    long_description TEXT NOT NULL DEFAULT '',
    fields_json TEXT NOT NULL DEFAULT '{}',
    default_permissions_json TEXT NOT NULL DEFAULT '{}',
    interactions_json TEXT NOT NULL DEFAULT '[]',
    created_at INTEGER NOT NULL
);

-- Live entities
CREATE TABLE IF NOT EXISTS instances (
    id TEXT PRIMARY KEY NOT NULL,
    template_id TEXT,  -- NULL means voided or system instance
    kind TEXT NOT NULL,  -- node, link, thing
    short_description TEXT NOT NULL DEFAULT '',
    long_description TEXT NOT NULL DEFAULT '',
    fields_json TEXT NOT NULL DEFAULT '{}',
    permissions_json TEXT NOT NULL DEFAULT '{}',  -- sparse overrides

    -- Containment; both NULL for top-level (nodes)
    container_type TEXT,  -- 'agent' or 'instance'
    container_id TEXT,

    is_void INTEGER NOT NULL DEFAULT 0,
    is_destroyed INTEGER NOT NULL DEFAULT 0,
    system_type TEXT NOT NULL DEFAULT 'none',  -- none, random_link, link_index
    interactions_used_this_tick INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);

-- Deferred verbs; ordinal is the global execution order
CREATE TABLE IF NOT EXISTS action_queue (
    ordinal INTEGER PRIMARY KEY AUTOINCREMENT,
    agent_id TEXT NOT NULL,
    verb TEXT NOT NULL,
    params_json TEXT NOT NULL DEFAULT '{}',
    tick_number INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);

-- Per-agent mailbox; rows are deleted as they are read
CREATE TABLE IF NOT EXISTS events (
    ordinal INTEGER PRIMARY KEY AUTOINCREMENT,
    agent_id TEXT NOT NULL,
    event_type TEXT NOT NULL,  -- action_result, chat, broadcast, system
    data_json TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER NOT NULL
);

-- Travel history for the link_index system thing
CREATE TABLE IF NOT EXISTS link_usage (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    agent_id TEXT NOT NULL,
    link_id TEXT NOT NULL,
    destination_node_id TEXT NOT NULL,
    destination_name TEXT NOT NULL DEFAULT '',
    used_at INTEGER NOT NULL
);

-- Key-value world state: tick_number, last_tick_at
CREATE TABLE IF NOT EXISTS world_state (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);
"#;

/// Index definitions for fast queries
const INDEXES_SCHEMA: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS idx_agents_token ON agents(token);
CREATE INDEX IF NOT EXISTS idx_agents_current_node ON agents(current_node_id);

CREATE INDEX IF NOT EXISTS idx_templates_owner ON templates(owner_id);

CREATE INDEX IF NOT EXISTS idx_instances_template ON instances(template_id);
CREATE INDEX IF NOT EXISTS idx_instances_container ON instances(container_type, container_id);

CREATE INDEX IF NOT EXISTS idx_queue_tick ON action_queue(tick_number, ordinal);

CREATE INDEX IF NOT EXISTS idx_events_agent ON events(agent_id, ordinal);
CREATE INDEX IF NOT EXISTS idx_events_created ON events(created_at);

CREATE INDEX IF NOT EXISTS idx_link_usage_agent ON link_usage(agent_id, used_at);
"#;
