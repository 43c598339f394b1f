//! Verb dispatch
//!
//! Verbs fall into three classes: instant (reads and chat, run on the
//! calling thread), queued (mutations, deferred to the tick) and free
//! (profile and AP purchases, no AP charge). Anything unrecognised is a
//! custom verb and queues.

pub mod free;
pub mod instant;
pub mod queued;

use rusqlite::Connection;
use serde_json::Value;

use crate::db::agents::AgentRow;
use crate::types::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbClass {
    Instant,
    Queued,
    Free,
}

pub fn classify(verb: &str) -> VerbClass {
    match verb {
        "look" | "survey" | "inspect" | "say" | "list" => VerbClass::Instant,
        "configure" | "buy_ap" => VerbClass::Free,
        _ => VerbClass::Queued,
    }
}

/// AP charged at handler entry; travel pre-debits one per hop
pub fn ap_cost(verb: &str, params: &Value) -> i64 {
    match classify(verb) {
        VerbClass::Free => 0,
        VerbClass::Instant => 1,
        VerbClass::Queued => {
            if verb == "travel" {
                (via_list(params).len() as i64).max(1)
            } else {
                1
            }
        }
    }
}

/// The `via` parameter of travel: one link id or an ordered list
pub fn via_list(params: &Value) -> Vec<String> {
    match params.get("via") {
        Some(Value::String(id)) => vec![id.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(|s| s.to_string()))
            .collect(),
        _ => Vec::new(),
    }
}

/// Run an instant verb on the calling thread
pub fn dispatch_instant(
    conn: &Connection,
    agent: &AgentRow,
    verb: &str,
    params: &Value,
    now: i64,
) -> Result<Value> {
    match verb {
        "look" => instant::look(conn, agent, params),
        "survey" => instant::survey(conn, agent, params),
        "inspect" => instant::inspect(conn, agent, params),
        "say" => instant::say(conn, agent, params, now),
        "list" => instant::list(conn, agent, params),
        _ => Err(crate::types::MashError::Validation(format!(
            "unknown instant verb: {}",
            verb
        ))),
    }
}

/// Run a queued verb inside the tick
pub fn dispatch_queued(
    conn: &Connection,
    agent: &AgentRow,
    verb: &str,
    params: &Value,
    now: i64,
) -> Result<Value> {
    match verb {
        "create" => queued::create(conn, agent, params, now),
        "edit" => queued::edit(conn, agent, params),
        "delete" => queued::delete(conn, agent, params, now),
        "travel" => queued::travel(conn, agent, params, now),
        "home" => queued::home(conn, agent, now),
        "take" => queued::take(conn, agent, params, now),
        "drop" => queued::drop_thing(conn, agent, params, now),
        custom => queued::custom_verb(conn, agent, custom, params, now),
    }
}

/// Run a free verb on the calling thread
pub fn dispatch_free(
    conn: &Connection,
    agent: &AgentRow,
    verb: &str,
    params: &Value,
) -> Result<Value> {
    match verb {
        "configure" => free::configure(conn, agent, params),
        "buy_ap" => free::buy_ap(conn, agent, params),
        _ => Err(crate::types::MashError::Validation(format!(
            "unknown free verb: {}",
            verb
        ))),
    }
}
