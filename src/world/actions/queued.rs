//! Queued verbs, executed inside the tick in queue order

use rand::seq::SliceRandom;
use rusqlite::Connection;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::db::agents::{self, AgentRow};
use crate::db::instances::{self, ContainerRef, EntityKind};
use crate::db::templates::{self, TemplateRow};
use crate::db::link_usage;
use crate::types::{MashError, Result};
use crate::world::dsl;
use crate::world::envelope;
use crate::world::lifecycle;
use crate::world::perms::{self, PermRule, PERM_CONTAIN, PERM_DELETE, PERM_INTERACT};
use crate::world::signup;
use crate::world::view;
use crate::world::AP_CEILING;

fn param_str<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| MashError::Validation(format!("missing {}", key)))
}

fn current_node(agent: &AgentRow) -> Result<String> {
    agent
        .current_node_id
        .clone()
        .ok_or_else(|| MashError::State("you are nowhere".into()))
}

/// `create`: a template or an instance of one
pub fn create(conn: &Connection, agent: &AgentRow, params: &Value, now: i64) -> Result<Value> {
    match param_str(params, "type")? {
        "template" => create_template(conn, agent, params, now),
        "instance" => create_instance(conn, agent, params, now),
        other => Err(MashError::Validation(format!(
            "unknown create type: {}",
            other
        ))),
    }
}

fn validated_permissions(raw: &Value) -> Result<Map<String, Value>> {
    let obj = raw
        .as_object()
        .ok_or_else(|| MashError::Validation("permissions must be an object".into()))?;
    for (key, rule) in obj {
        if PermRule::parse(rule).is_none() {
            return Err(MashError::Validation(format!(
                "invalid permission rule for {:?}: {}",
                key, rule
            )));
        }
    }
    Ok(obj.clone())
}

fn validated_fields(raw: &Value) -> Result<Map<String, Value>> {
    raw.as_object()
        .cloned()
        .ok_or_else(|| MashError::Validation("fields must be an object".into()))
}

fn validated_interactions(raw: &Value) -> Result<Vec<Value>> {
    let list = raw
        .as_array()
        .cloned()
        .ok_or_else(|| MashError::Validation("interactions must be a list".into()))?;
    dsl::parse_rules(&list).map_err(MashError::Validation)?;
    Ok(list)
}

fn create_template(conn: &Connection, agent: &AgentRow, params: &Value, now: i64) -> Result<Value> {
    let name = param_str(params, "name")?;
    if name.is_empty() || name.len() > 64 {
        return Err(MashError::Validation("name must be 1-64 characters".into()));
    }
    let kind = EntityKind::parse(param_str(params, "template_type")?)
        .ok_or_else(|| MashError::Validation("template_type must be node, link or thing".into()))?;

    let fields = match params.get("fields") {
        Some(raw) => validated_fields(raw)?,
        None => Map::new(),
    };
    let default_permissions = match params.get("default_permissions") {
        Some(raw) => validated_permissions(raw)?,
        None => perms::stock_default_permissions(),
    };
    let interactions = match params.get("interactions") {
        Some(raw) => validated_interactions(raw)?,
        None => Vec::new(),
    };

    let tpl = TemplateRow {
        id: Uuid::new_v4().to_string(),
        owner_id: agent.id.clone(),
        name: name.to_string(),
        kind,
        short_description: params
            .get("short_description")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
        long_description: params
            .get("long_description")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
        fields,
        default_permissions,
        interactions,
        created_at: now,
    };
    templates::create_template(conn, &tpl)?;

    Ok(json!({ "template_id": tpl.id }))
}

fn create_instance(conn: &Connection, agent: &AgentRow, params: &Value, now: i64) -> Result<Value> {
    let template_id = param_str(params, "template_id")?;
    let tpl = templates::get_template(conn, template_id)?
        .ok_or_else(|| MashError::Lookup("no such template".into()))?;
    if tpl.owner_id != agent.id {
        return Err(MashError::Authorisation("not your template".into()));
    }

    let container = match tpl.kind {
        EntityKind::Node => {
            if params.get("container_id").is_some() {
                return Err(MashError::Validation("nodes cannot be contained".into()));
            }
            None
        }
        EntityKind::Link | EntityKind::Thing => {
            let container = match params.get("container_id").and_then(Value::as_str) {
                Some(container_id) => {
                    let target = instances::get_instance(conn, container_id)?
                        .filter(|i| i.is_live())
                        .ok_or_else(|| MashError::Lookup("no such container".into()))?;
                    if !perms::agent_allowed(conn, agent, &target, PERM_CONTAIN) {
                        return Err(MashError::Authorisation(
                            "contain not permitted on container".into(),
                        ));
                    }
                    ContainerRef::Instance(target.id)
                }
                None => ContainerRef::Instance(current_node(agent)?),
            };
            if !perms::depth_allows_child(conn, &container) {
                return Err(MashError::Policy("containment too deep".into()));
            }
            Some(container)
        }
    };

    let extra_fields = match params.get("fields") {
        Some(raw) => Some(validated_fields(raw)?),
        None => None,
    };
    let inst =
        lifecycle::instantiate_template(conn, &tpl, container, extra_fields.as_ref(), now)?;

    Ok(json!({ "instance_id": inst.id }))
}

/// `edit`: mutate a template you own or an instance you may edit
pub fn edit(conn: &Connection, agent: &AgentRow, params: &Value) -> Result<Value> {
    match param_str(params, "type")? {
        "template" => edit_template(conn, agent, params),
        "instance" => edit_instance(conn, agent, params),
        other => Err(MashError::Validation(format!(
            "unknown edit type: {}",
            other
        ))),
    }
}

fn edit_template(conn: &Connection, agent: &AgentRow, params: &Value) -> Result<Value> {
    let target_id = param_str(params, "target_id")?;
    let mut tpl = templates::get_template(conn, target_id)?
        .ok_or_else(|| MashError::Lookup("no such template".into()))?;
    if tpl.owner_id != agent.id {
        return Err(MashError::Authorisation("not your template".into()));
    }

    if let Some(name) = params.get("name").and_then(Value::as_str) {
        if name.is_empty() || name.len() > 64 {
            return Err(MashError::Validation("name must be 1-64 characters".into()));
        }
        tpl.name = name.to_string();
    }
    if let Some(short) = params.get("short_description").and_then(Value::as_str) {
        tpl.short_description = short.to_string();
    }
    if let Some(long) = params.get("long_description").and_then(Value::as_str) {
        tpl.long_description = long.to_string();
    }
    if let Some(raw) = params.get("fields") {
        tpl.fields = validated_fields(raw)?;
    }
    if let Some(raw) = params.get("default_permissions") {
        tpl.default_permissions = validated_permissions(raw)?;
    }
    if let Some(raw) = params.get("interactions") {
        tpl.interactions = validated_interactions(raw)?;
    }

    templates::update_template(conn, &tpl)?;
    Ok(json!({ "template_id": tpl.id }))
}

fn edit_instance(conn: &Connection, agent: &AgentRow, params: &Value) -> Result<Value> {
    let target_id = param_str(params, "target_id")?;
    let inst = instances::get_instance(conn, target_id)?
        .filter(|i| i.is_live())
        .ok_or_else(|| MashError::Lookup("no such instance".into()))?;
    if !perms::agent_allowed(conn, agent, &inst, perms::PERM_EDIT) {
        return Err(MashError::Authorisation("edit not permitted".into()));
    }

    let mut short = inst.short_description.clone();
    let mut long = inst.long_description.clone();
    if let Some(s) = params.get("short_description").and_then(Value::as_str) {
        short = s.to_string();
    }
    if let Some(l) = params.get("long_description").and_then(Value::as_str) {
        long = l.to_string();
    }
    if short != inst.short_description || long != inst.long_description {
        instances::set_descriptions(conn, &inst.id, &short, &long)?;
    }

    if let Some(raw) = params.get("fields") {
        // shallow merge over the existing mapping
        let patch = validated_fields(raw)?;
        let mut fields = inst.fields.clone();
        for (key, value) in patch {
            fields.insert(key, value);
        }
        instances::set_fields(conn, &inst.id, &fields)?;
    }

    if let Some(raw) = params.get("permissions") {
        if !perms::agent_allowed(conn, agent, &inst, perms::PERM_PERMS) {
            return Err(MashError::Authorisation("perms not permitted".into()));
        }
        let patch = validated_permissions(raw)?;
        let mut permissions = inst.permissions.clone();
        for (key, value) in patch {
            permissions.insert(key, value);
        }
        instances::set_permissions(conn, &inst.id, &permissions)?;
    }

    Ok(json!({ "instance_id": inst.id }))
}

/// `delete`: void a template's instances, or destroy one instance
pub fn delete(conn: &Connection, agent: &AgentRow, params: &Value, now: i64) -> Result<Value> {
    let target_id = param_str(params, "target_id")?;

    if let Some(tpl) = templates::get_template(conn, target_id)? {
        if tpl.owner_id != agent.id {
            return Err(MashError::Authorisation("not your template".into()));
        }
        let voided = lifecycle::void_template_instances(conn, &tpl.id, now)?;
        templates::delete_template(conn, &tpl.id)?;
        return Ok(json!({ "template_id": tpl.id, "voided": voided }));
    }

    let inst = instances::get_instance(conn, target_id)?
        .filter(|i| !i.is_destroyed)
        .ok_or_else(|| MashError::Lookup("no such template or instance".into()))?;
    if !perms::agent_allowed(conn, agent, &inst, PERM_DELETE) {
        return Err(MashError::Authorisation("delete not permitted".into()));
    }
    lifecycle::cascade_destroy(conn, &inst.id, now)?;
    Ok(json!({ "destroyed": inst.id }))
}

/// One hop of travel; returns the destination node id
fn travel_hop(
    conn: &Connection,
    agent_id: &str,
    from_node: &str,
    link_id: &str,
    now: i64,
) -> std::result::Result<String, String> {
    let agent = agents::get_agent(conn, agent_id)
        .ok()
        .flatten()
        .ok_or_else(|| "agent vanished".to_string())?;
    let link = instances::get_instance(conn, link_id)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "no such link".to_string())?;
    if link.kind != EntityKind::Link || !link.is_live() {
        return Err("that is not a usable link".to_string());
    }
    if link.container != Some(ContainerRef::Instance(from_node.to_string())) {
        return Err("that link is not here".to_string());
    }

    let dest_id = if link.system_type == instances::SystemType::RandomLink {
        pick_random_destination(conn, &agent, from_node)?
    } else {
        link.fields
            .get("destination")
            .and_then(Value::as_str)
            .map(|s| s.to_string())
            .ok_or_else(|| "link has no destination".to_string())?
    };
    let dest = instances::get_instance(conn, &dest_id)
        .map_err(|e| e.to_string())?
        .filter(|i| i.kind == EntityKind::Node && i.is_live())
        .ok_or_else(|| "destination is gone".to_string())?;

    let fire = |target: &str, verb: &str| {
        dsl::fire(conn, target, verb, Some(agent_id), None, now).map_err(|e| e.to_string())
    };
    if fire(link_id, "travel")? {
        return Err("the link refuses".to_string());
    }
    if fire(from_node, "exit")? {
        return Err("the way out is barred".to_string());
    }
    if fire(&dest.id, "enter")? {
        return Err("the way in is barred".to_string());
    }

    link_usage::record_usage(
        conn,
        agent_id,
        link_id,
        &dest.id,
        &dest.short_description,
        now,
    )
    .map_err(|e| e.to_string())?;
    agents::set_current_node(conn, agent_id, Some(&dest.id)).map_err(|e| e.to_string())?;

    let left = json!({ "message": format!("{} left", agent.username) });
    let arrived = json!({ "message": format!("{} arrived", agent.username) });
    envelope::broadcast_to_node(conn, from_node, "broadcast", &left, Some(agent_id), now)
        .map_err(|e| e.to_string())?;
    envelope::broadcast_to_node(conn, &dest.id, "broadcast", &arrived, Some(agent_id), now)
        .map_err(|e| e.to_string())?;

    Ok(dest.id)
}

/// Candidate nodes for a random link: live, elsewhere, nobody's home, and
/// open to this agent
fn pick_random_destination(
    conn: &Connection,
    agent: &AgentRow,
    from_node: &str,
) -> std::result::Result<String, String> {
    let homes = agents::all_home_nodes(conn).map_err(|e| e.to_string())?;
    let candidates: Vec<String> = instances::live_nodes(conn)
        .map_err(|e| e.to_string())?
        .into_iter()
        .filter(|n| n.id != from_node)
        .filter(|n| !homes.contains(&n.id))
        .filter(|n| perms::agent_allowed(conn, agent, n, PERM_INTERACT))
        .map(|n| n.id)
        .collect();
    candidates
        .choose(&mut rand::thread_rng())
        .cloned()
        .ok_or_else(|| "the portal fizzles; nowhere to go".to_string())
}

/// `travel via`: hop along one or more links, refunding AP for hops that
/// never ran
pub fn travel(conn: &Connection, agent: &AgentRow, params: &Value, now: i64) -> Result<Value> {
    let via = super::via_list(params);
    if via.is_empty() {
        return Err(MashError::Validation("missing via".into()));
    }

    let mut current = current_node(agent)?;
    let total = via.len() as i64;
    let mut completed: i64 = 0;

    for link_id in &via {
        match travel_hop(conn, &agent.id, &current, link_id, now) {
            Ok(dest) => {
                completed += 1;
                current = dest;
            }
            Err(reason) => {
                let refund = total - completed;
                if refund > 0 {
                    if let Some(fresh) = agents::get_agent(conn, &agent.id)? {
                        agents::set_ap(conn, &agent.id, (fresh.ap + refund).min(AP_CEILING))?;
                    }
                }
                return Ok(json!({
                    "stopped_at": current,
                    "completed": completed,
                    "ap_refunded": refund,
                    "error": reason,
                }));
            }
        }
    }

    let fresh = agents::get_agent(conn, &agent.id)?
        .ok_or_else(|| MashError::Internal("agent vanished".into()))?;
    view::node_snapshot(conn, &fresh, &current)
}

/// `home`: zero-hop teleport to your home node
pub fn home(conn: &Connection, agent: &AgentRow, now: i64) -> Result<Value> {
    let current = current_node(agent)?;
    if current == agent.home_node_id {
        return Err(MashError::State("already home".into()));
    }

    agents::set_current_node(conn, &agent.id, Some(&agent.home_node_id))?;
    let left = json!({ "message": format!("{} left", agent.username) });
    let arrived = json!({ "message": format!("{} arrived", agent.username) });
    envelope::broadcast_to_node(conn, &current, "broadcast", &left, Some(&agent.id), now)?;
    envelope::broadcast_to_node(
        conn,
        &agent.home_node_id,
        "broadcast",
        &arrived,
        Some(&agent.id),
        now,
    )?;

    let fresh = agents::get_agent(conn, &agent.id)?
        .ok_or_else(|| MashError::Internal("agent vanished".into()))?;
    view::node_snapshot(conn, &fresh, &agent.home_node_id)
}

/// `take target_id [into?]`: pick a thing up from the node around you
pub fn take(conn: &Connection, agent: &AgentRow, params: &Value, now: i64) -> Result<Value> {
    let target_id = param_str(params, "target_id")?;
    let node_id = current_node(agent)?;

    let thing = instances::get_instance(conn, target_id)?
        .filter(|i| i.is_live())
        .ok_or_else(|| MashError::Lookup("no such thing".into()))?;
    if thing.kind != EntityKind::Thing {
        return Err(MashError::Validation("only things can be taken".into()));
    }
    if !perms::chain_reaches_node(conn, &thing, &node_id) {
        return Err(MashError::Lookup("that is not here".into()));
    }
    if !perms::agent_allowed(conn, agent, &thing, PERM_CONTAIN) {
        return Err(MashError::Authorisation("contain not permitted".into()));
    }
    if let Some(ContainerRef::Instance(parent_id)) = &thing.container {
        let parent = instances::get_instance(conn, parent_id)?
            .ok_or_else(|| MashError::Lookup("container is gone".into()))?;
        if !perms::agent_allowed(conn, agent, &parent, PERM_CONTAIN) {
            return Err(MashError::Authorisation(
                "contain not permitted on its container".into(),
            ));
        }
    }

    let dest = match params.get("into").and_then(Value::as_str) {
        Some(into_id) => {
            let into = instances::get_instance(conn, into_id)?
                .filter(|i| i.is_live())
                .ok_or_else(|| MashError::Lookup("no such container".into()))?;
            if !perms::chain_reaches_agent(conn, &into, &agent.id) {
                return Err(MashError::Validation(
                    "destination is not in your inventory".into(),
                ));
            }
            if !perms::agent_allowed(conn, agent, &into, PERM_CONTAIN) {
                return Err(MashError::Authorisation(
                    "contain not permitted on destination".into(),
                ));
            }
            ContainerRef::Instance(into.id)
        }
        None => ContainerRef::Agent(agent.id.clone()),
    };
    if !perms::depth_allows_child(conn, &dest) {
        return Err(MashError::Policy("containment too deep".into()));
    }

    if dsl::fire(conn, &thing.id, "take", Some(&agent.id), None, now)? {
        return Err(MashError::State("it refuses to be taken".into()));
    }

    instances::set_container(conn, &thing.id, Some(&dest))?;
    Ok(json!({ "taken": thing.id, "into": dest.id() }))
}

/// `drop target_id [into?]`: put a carried thing down
pub fn drop_thing(conn: &Connection, agent: &AgentRow, params: &Value, now: i64) -> Result<Value> {
    let target_id = param_str(params, "target_id")?;
    let node_id = current_node(agent)?;

    let thing = instances::get_instance(conn, target_id)?
        .filter(|i| i.is_live())
        .ok_or_else(|| MashError::Lookup("no such thing".into()))?;
    if !perms::chain_reaches_agent(conn, &thing, &agent.id) {
        return Err(MashError::Lookup("you are not carrying that".into()));
    }
    if !perms::agent_allowed(conn, agent, &thing, PERM_CONTAIN) {
        return Err(MashError::Authorisation("contain not permitted".into()));
    }

    let dest = match params.get("into").and_then(Value::as_str) {
        Some(into_id) => {
            let into = instances::get_instance(conn, into_id)?
                .filter(|i| i.is_live())
                .ok_or_else(|| MashError::Lookup("no such container".into()))?;
            if into.id != node_id && !perms::chain_reaches_node(conn, &into, &node_id) {
                return Err(MashError::Validation("destination is not here".into()));
            }
            if !perms::agent_allowed(conn, agent, &into, PERM_CONTAIN) {
                return Err(MashError::Authorisation(
                    "contain not permitted on destination".into(),
                ));
            }
            ContainerRef::Instance(into.id)
        }
        None => {
            let node = instances::get_instance(conn, &node_id)?
                .ok_or_else(|| MashError::Lookup("the node is gone".into()))?;
            if !perms::agent_allowed(conn, agent, &node, PERM_CONTAIN) {
                return Err(MashError::Authorisation(
                    "contain not permitted here".into(),
                ));
            }
            ContainerRef::Instance(node_id.clone())
        }
    };
    if !perms::depth_allows_child(conn, &dest) {
        return Err(MashError::Policy("containment too deep".into()));
    }

    if dsl::fire(conn, &thing.id, "drop", Some(&agent.id), None, now)? {
        return Err(MashError::State("it refuses to be dropped".into()));
    }

    instances::set_container(conn, &thing.id, Some(&dest))?;
    Ok(json!({ "dropped": thing.id, "into": dest.id() }))
}

/// `<custom_verb>`: fire a template's rules on a target
pub fn custom_verb(
    conn: &Connection,
    agent: &AgentRow,
    verb: &str,
    params: &Value,
    now: i64,
) -> Result<Value> {
    let target_id = param_str(params, "target_id")?;

    // resetting your own home restores the seeded state
    if verb == "reset" && target_id == agent.home_node_id {
        signup::reset_home(conn, &agent.home_node_id, now)?;
        return Ok(json!({ "reset": agent.home_node_id }));
    }

    let target = instances::get_instance(conn, target_id)?
        .filter(|i| i.is_live())
        .ok_or_else(|| MashError::Lookup("no such instance".into()))?;
    if !perms::agent_allowed(conn, agent, &target, PERM_INTERACT) {
        return Err(MashError::Authorisation("interact not permitted".into()));
    }

    let subject_id = params.get("subject_id").and_then(Value::as_str);
    if let Some(sid) = subject_id {
        if instances::get_instance(conn, sid)?.filter(|i| i.is_live()).is_none() {
            return Err(MashError::Lookup("no such subject".into()));
        }
    }

    let denied = dsl::fire(conn, &target.id, verb, Some(&agent.id), subject_id, now)?;
    if denied {
        return Err(MashError::State("refused".into()));
    }
    Ok(json!({ "fired": verb, "target": target.id }))
}
