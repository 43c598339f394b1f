//! SQLite world store
//!
//! Single-connection serialised store. The tick engine takes the
//! connection lock once for a whole tick, so the tick observes (and
//! produces) one globally ordered stream of mutations; request handlers
//! take the lock per operation and see the last committed state.
//!
//! ## Tables
//!
//! - `agents` - accounts, position, AP economy, perception caps
//! - `templates` - user-authored blueprints with interaction rules
//! - `instances` - live entities (nodes, links, things)
//! - `action_queue` - deferred verbs keyed by a global ordinal
//! - `events` - per-agent mailbox rows, destructively read
//! - `link_usage` - travel history for the link_index directory
//! - `world_state` - tick counter and last-tick timestamp

pub mod agents;
pub mod events;
pub mod instances;
pub mod link_usage;
pub mod queue;
pub mod schema;
pub mod templates;
pub mod world_state;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::{debug, info};

use crate::types::MashError;

/// SQLite database holding the entire world
pub struct WorldDb {
    conn: Mutex<Connection>,
}

impl WorldDb {
    /// Open or create the world database
    pub fn open(db_path: &Path) -> Result<Self, MashError> {
        info!("Opening world database at {:?}", db_path);

        let conn = Connection::open(db_path)
            .map_err(|e| MashError::Database(format!("Failed to open SQLite: {}", e)))?;

        // WAL keeps concurrent envelope reads cheap while the tick writes
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| MashError::Database(format!("Failed to set PRAGMA: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };

        db.init_schema()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing and ephemeral mode)
    pub fn open_in_memory() -> Result<Self, MashError> {
        debug!("Opening in-memory world database");

        let conn = Connection::open_in_memory()
            .map_err(|e| MashError::Database(format!("Failed to open in-memory SQLite: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };

        db.init_schema()?;

        Ok(db)
    }

    fn init_schema(&self) -> Result<(), MashError> {
        self.with_conn(|conn| schema::init_schema(conn))
    }

    /// Run a read against the connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, MashError>
    where
        F: FnOnce(&Connection) -> Result<T, MashError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| MashError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Run a write (or transaction) with exclusive access
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T, MashError>
    where
        F: FnOnce(&mut Connection) -> Result<T, MashError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| MashError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&mut conn)
    }
}

/// Wall-clock milliseconds since the Unix epoch
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
