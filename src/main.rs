//! MASH - persistent world server for software agents

use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mash::config::Args;
use mash::db::WorldDb;
use mash::server::{self, AppState};
use mash::world::tick::{spawn_tick_task, TickWaiters};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Initialize tracing/logging
    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("mash={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  MASH - world server for agents");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Listen: {}", args.listen);
    info!(
        "Store: {}",
        if args.ephemeral {
            "in-memory"
        } else {
            args.world_db.as_str()
        }
    );
    info!("Tick interval: {} ms", args.tick_interval_ms);
    info!("======================================");

    let db = if args.ephemeral {
        WorldDb::open_in_memory()
    } else {
        WorldDb::open(Path::new(&args.world_db))
    };
    let db = match db {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!("Failed to open world database: {}", e);
            std::process::exit(1);
        }
    };

    let waiters = Arc::new(TickWaiters::new());
    let _tick_handle = spawn_tick_task(
        Arc::clone(&db),
        Arc::clone(&waiters),
        args.tick_interval_ms,
    );
    info!("Tick engine started");

    let state = Arc::new(AppState::new(args, db, waiters));
    if let Err(e) = server::run(state).await {
        error!("Server error: {:?}", e);
        std::process::exit(1);
    }

    Ok(())
}
