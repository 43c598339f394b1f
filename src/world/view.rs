//! Perception: what an agent sees when it looks around
//!
//! Node snapshots cap each category at the agent's perception limits;
//! `survey` is the single uncapped path.

use rusqlite::Connection;
use serde_json::{json, Value};

use crate::db::agents::{self, AgentRow};
use crate::db::instances::{self, ContainerRef, EntityKind, InstanceRow};
use crate::types::{MashError, Result};

/// Snapshot of a node from one agent's perspective, capped by that
/// agent's perception limits
pub fn node_snapshot(conn: &Connection, viewer: &AgentRow, node_id: &str) -> Result<Value> {
    snapshot_inner(conn, viewer, node_id, true)
}

/// Uncapped dump of a node's contents (`survey`)
pub fn node_survey(conn: &Connection, viewer: &AgentRow, node_id: &str) -> Result<Value> {
    snapshot_inner(conn, viewer, node_id, false)
}

fn snapshot_inner(
    conn: &Connection,
    viewer: &AgentRow,
    node_id: &str,
    capped: bool,
) -> Result<Value> {
    let node = instances::get_instance(conn, node_id)?
        .ok_or_else(|| MashError::Lookup("node not found".into()))?;

    let mut agents_seen: Vec<Value> = agents::agents_in_node(conn, node_id)?
        .iter()
        .filter(|a| a.id != viewer.id)
        .map(|a| {
            json!({
                "id": a.id,
                "username": a.username,
                "short_description": a.short_description,
            })
        })
        .collect();

    let contents = instances::contained_in(conn, &ContainerRef::Instance(node_id.to_string()))?;
    let mut links: Vec<Value> = Vec::new();
    let mut things: Vec<Value> = Vec::new();
    for inst in contents.iter().filter(|i| !i.is_void) {
        let entry = json!({
            "id": inst.id,
            "short_description": inst.short_description,
        });
        match inst.kind {
            EntityKind::Link => links.push(entry),
            EntityKind::Thing => things.push(entry),
            EntityKind::Node => {}
        }
    }

    if capped {
        agents_seen.truncate(viewer.cap_agents.max(1) as usize);
        links.truncate(viewer.cap_links.max(1) as usize);
        things.truncate(viewer.cap_things.max(1) as usize);
    }

    Ok(json!({
        "type": "node",
        "id": node.id,
        "short_description": node.short_description,
        "long_description": node.long_description,
        "agents": agents_seen,
        "links": links,
        "things": things,
    }))
}

/// Identity card for an agent in the same node
pub fn agent_card(agent: &AgentRow) -> Value {
    json!({
        "type": "agent",
        "id": agent.id,
        "username": agent.username,
        "short_description": agent.short_description,
        "long_description": agent.long_description,
    })
}

/// Descriptive card for an instance
pub fn instance_card(inst: &InstanceRow) -> Value {
    json!({
        "type": inst.kind.as_str(),
        "id": inst.id,
        "short_description": inst.short_description,
        "long_description": inst.long_description,
    })
}
