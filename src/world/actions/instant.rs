//! Instant verbs: look, survey, inspect, say, list

use rusqlite::Connection;
use serde_json::{json, Value};

use crate::db::agents::{self, AgentRow};
use crate::db::instances::{self, EntityKind, SystemType};
use crate::db::{link_usage, templates};
use crate::types::{MashError, Result};
use crate::world::envelope;
use crate::world::perms::{self, PERM_INSPECT, PERM_PERMS};
use crate::world::view;

fn current_node(agent: &AgentRow) -> Result<&str> {
    agent
        .current_node_id
        .as_deref()
        .ok_or_else(|| MashError::State("you are nowhere".into()))
}

/// `look [target?]`: the node around you, or one entity in detail
pub fn look(conn: &Connection, agent: &AgentRow, params: &Value) -> Result<Value> {
    let node_id = current_node(agent)?;

    let Some(target) = params.get("target").and_then(Value::as_str) else {
        return view::node_snapshot(conn, agent, node_id);
    };

    // another agent in the same node
    if let Some(other) = agents::get_agent(conn, target)? {
        if other.current_node_id.as_deref() == Some(node_id) {
            return Ok(view::agent_card(&other));
        }
        return Err(MashError::Lookup("nothing like that here".into()));
    }

    let Some(inst) = instances::get_instance(conn, target)? else {
        return Err(MashError::Lookup("nothing like that here".into()));
    };
    if !inst.is_live() {
        return Err(MashError::Lookup("nothing like that here".into()));
    }

    // your current node, by id
    if inst.kind == EntityKind::Node {
        if inst.id == node_id {
            return view::node_snapshot(conn, agent, node_id);
        }
        return Err(MashError::Lookup("nothing like that here".into()));
    }

    let visible = perms::containing_node(conn, &inst).as_deref() == Some(node_id)
        || perms::chain_reaches_agent(conn, &inst, &agent.id);
    if !visible {
        return Err(MashError::Lookup("nothing like that here".into()));
    }

    // the glowing directory lists your recent travels
    if inst.system_type == SystemType::LinkIndex {
        let recent = link_usage::recent_for_agent(conn, &agent.id, agent.cap_links.max(1))?;
        let mut card = view::instance_card(&inst);
        card["recent_links"] = json!(recent);
        return Ok(card);
    }

    Ok(view::instance_card(&inst))
}

/// `survey [category?]`: uncapped dump of the current node
pub fn survey(conn: &Connection, agent: &AgentRow, params: &Value) -> Result<Value> {
    let node_id = current_node(agent)?;
    let mut full = view::node_survey(conn, agent, node_id)?;

    if let Some(category) = params.get("category").and_then(Value::as_str) {
        if !matches!(category, "agents" | "links" | "things") {
            return Err(MashError::Validation(format!(
                "unknown category: {}",
                category
            )));
        }
        let list = full[category].take();
        let mut filtered = serde_json::Map::new();
        filtered.insert("type".into(), json!("node"));
        filtered.insert("id".into(), json!(node_id));
        filtered.insert(category.to_string(), list);
        return Ok(Value::Object(filtered));
    }

    Ok(full)
}

/// `inspect target_id`: template pointer, owner, fields; rule internals
/// only with `perms`
pub fn inspect(conn: &Connection, agent: &AgentRow, params: &Value) -> Result<Value> {
    let target_id = params
        .get("target_id")
        .and_then(Value::as_str)
        .ok_or_else(|| MashError::Validation("missing target_id".into()))?;

    let inst = instances::get_instance(conn, target_id)?
        .filter(|i| !i.is_destroyed)
        .ok_or_else(|| MashError::Lookup("no such instance".into()))?;

    if !perms::agent_allowed(conn, agent, &inst, PERM_INSPECT) {
        return Err(MashError::Authorisation("inspect not permitted".into()));
    }

    let template = match &inst.template_id {
        Some(id) => templates::get_template(conn, id)?,
        None => None,
    };
    let owner_username = match &template {
        Some(tpl) => agents::get_agent(conn, &tpl.owner_id)?.map(|a| a.username),
        None => None,
    };

    let mut card = json!({
        "id": inst.id,
        "type": inst.kind.as_str(),
        "template_id": inst.template_id,
        "owner": owner_username,
        "short_description": inst.short_description,
        "long_description": inst.long_description,
        "fields": inst.fields,
        "is_void": inst.is_void,
    });

    if perms::agent_allowed(conn, agent, &inst, PERM_PERMS) {
        card["permissions"] = Value::Object(inst.permissions.clone());
        if let Some(tpl) = &template {
            card["default_permissions"] = Value::Object(tpl.default_permissions.clone());
            card["interactions"] = Value::Array(tpl.interactions.clone());
        }
    }

    Ok(card)
}

/// `say message`: chat to everyone else in the node
pub fn say(conn: &Connection, agent: &AgentRow, params: &Value, now: i64) -> Result<Value> {
    let message = params
        .get("message")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| MashError::Validation("missing message".into()))?;
    let node_id = current_node(agent)?;

    let delivered = envelope::broadcast_to_node(
        conn,
        node_id,
        "chat",
        &json!({
            "from": agent.username,
            "from_id": agent.id,
            "message": message,
        }),
        Some(&agent.id),
        now,
    )?;

    Ok(json!({ "delivered": delivered }))
}

/// `list template_id`: instances of a template you own
pub fn list(conn: &Connection, agent: &AgentRow, params: &Value) -> Result<Value> {
    let template_id = params
        .get("template_id")
        .and_then(Value::as_str)
        .ok_or_else(|| MashError::Validation("missing template_id".into()))?;

    let tpl = templates::get_template(conn, template_id)?
        .ok_or_else(|| MashError::Lookup("no such template".into()))?;
    if tpl.owner_id != agent.id {
        return Err(MashError::Authorisation("not your template".into()));
    }

    let rows: Vec<Value> = instances::instances_of_template(conn, template_id)?
        .iter()
        .map(|i| {
            json!({
                "id": i.id,
                "short_description": i.short_description,
                "container_type": i.container.as_ref().map(|c| c.type_str()),
                "container_id": i.container.as_ref().map(|c| c.id().to_string()),
                "is_void": i.is_void,
            })
        })
        .collect();

    Ok(json!({ "template_id": template_id, "instances": rows }))
}
