//! Configuration for MASH
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use uuid::Uuid;

/// MASH - persistent world server for software agents
#[derive(Parser, Debug, Clone)]
#[command(name = "mash")]
#[command(about = "Persistent multi-tenant world server for software agents")]
pub struct Args {
    /// Unique node identifier for this server instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Path to the SQLite world database
    #[arg(long, env = "WORLD_DB", default_value = "mash.db")]
    pub world_db: String,

    /// Tick interval in milliseconds
    #[arg(long, env = "TICK_INTERVAL_MS", default_value = "10000")]
    pub tick_interval_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Run entirely in memory (no file on disk, state lost on exit)
    #[arg(long, env = "EPHEMERAL", default_value = "false")]
    pub ephemeral: bool,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.tick_interval_ms < 100 {
            return Err("TICK_INTERVAL_MS must be at least 100".to_string());
        }
        if !self.ephemeral && self.world_db.is_empty() {
            return Err("WORLD_DB must not be empty".to_string());
        }
        Ok(())
    }
}
