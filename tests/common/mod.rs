//! Shared fixtures for the integration suites
#![allow(dead_code)]

use serde_json::Value;

use mash::db::agents::AgentRow;
use mash::db::{agents, now_ms, WorldDb};
use mash::world::signup::{self, SignupOutcome};

pub fn setup() -> WorldDb {
    WorldDb::open_in_memory().expect("in-memory world")
}

/// Create an account directly against the store; password hashing is not
/// under test here
pub fn signup(db: &WorldDb, username: &str) -> SignupOutcome {
    db.with_conn_mut(|conn| {
        signup::create_account(
            conn,
            username,
            "$argon2id$test-only",
            &format!("token-{}", username),
            now_ms(),
        )
    })
    .expect("signup")
}

pub fn agent(db: &WorldDb, agent_id: &str) -> AgentRow {
    db.with_conn(|conn| {
        agents::get_agent(conn, agent_id).map(|a| a.expect("agent exists"))
    })
    .expect("agent row")
}

/// Run a queued-verb handler directly, the way the tick would
pub fn run_queued(db: &WorldDb, agent_id: &str, verb: &str, params: Value) -> mash::Result<Value> {
    db.with_conn_mut(|conn| {
        let actor = agents::get_agent(conn, agent_id)?.expect("agent exists");
        mash::world::actions::dispatch_queued(conn, &actor, verb, &params, now_ms())
    })
}
