//! Response envelope and the event bus
//!
//! Every authenticated response wraps its payload with the agent's AP,
//! the tick position and the drained event backlog. Broadcasts are only
//! enqueued as event rows; delivery happens whenever the recipient next
//! calls any endpoint.

use rusqlite::Connection;
use serde_json::{json, Value};

use crate::db::{agents, events, world_state};
use crate::types::{MashError, Result};
use crate::world::{MAX_EVENTS_PER_ENVELOPE, TICK_INTERVAL_MS};

/// Compose the `info` block for one agent, destructively draining its
/// event backlog
pub fn build_info(conn: &Connection, agent_id: &str, now: i64) -> Result<Value> {
    let agent = agents::get_agent(conn, agent_id)?
        .ok_or_else(|| MashError::Internal(format!("agent vanished: {}", agent_id)))?;

    let tick = world_state::get_tick_number(conn)?;
    let last_tick_at = world_state::get_last_tick_at(conn)?;
    let next_tick_in_ms = (last_tick_at + TICK_INTERVAL_MS - now).max(0);

    let drained = events::drain_events(conn, agent_id, MAX_EVENTS_PER_ENVELOPE)?;
    let events: Vec<Value> = drained
        .iter()
        .map(|e| {
            json!({
                "ordinal": e.ordinal,
                "type": e.event_type,
                "data": e.data,
                "created_at": e.created_at,
            })
        })
        .collect();

    Ok(json!({
        "tick": tick,
        "next_tick_in_ms": next_tick_in_ms,
        "ap": agent.ap,
        "purchased_ap_this_tick": agent.purchased_ap_this_tick,
        "events": events,
    }))
}

/// Enqueue an event for every agent currently in the node whose
/// `see_broadcasts` flag is set, excluding at most one agent.
///
/// Returns the number of recipients.
pub fn broadcast_to_node(
    conn: &Connection,
    node_id: &str,
    event_type: &str,
    data: &Value,
    exclude: Option<&str>,
    now: i64,
) -> Result<usize> {
    let mut delivered = 0;
    for agent in agents::agents_in_node(conn, node_id)? {
        if Some(agent.id.as_str()) == exclude {
            continue;
        }
        if !agent.see_broadcasts {
            continue;
        }
        events::append_event(conn, &agent.id, event_type, data, now)?;
        delivered += 1;
    }
    Ok(delivered)
}
