//! Destruction and voiding cascades
//!
//! Voiding is not destruction: a voided instance loses its template and
//! drops out of most queries but keeps a stable id; destruction is
//! terminal. Both cascade downward through containment, and voiding a
//! node also evicts its occupants to their homes.

use rusqlite::Connection;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::db::agents;
use crate::db::events;
use crate::db::instances::{self, ContainerRef, EntityKind, InstanceRow, SystemType};
use crate::db::templates::TemplateRow;
use crate::types::Result;

/// Destroy an instance and everything transitively contained in it.
/// Destroying a node evicts its occupants first.
pub fn cascade_destroy(conn: &Connection, instance_id: &str, now: i64) -> Result<()> {
    let Some(root) = instances::get_instance(conn, instance_id)? else {
        return Ok(());
    };
    if root.is_destroyed {
        return Ok(());
    }
    if root.kind == EntityKind::Node {
        evict_occupants(conn, &root.id, now)?;
    }

    let mut pending = vec![root.id.clone()];
    while let Some(id) = pending.pop() {
        for child in instances::contained_in(conn, &ContainerRef::Instance(id.clone()))? {
            pending.push(child.id);
        }
        instances::mark_destroyed(conn, &id)?;
    }
    debug!(instance = %instance_id, "cascade destroy complete");
    Ok(())
}

/// Void every instance of a deleted template, then cascade: occupants of
/// voided nodes go home, and contained items are destroyed.
pub fn void_template_instances(conn: &Connection, template_id: &str, now: i64) -> Result<usize> {
    let voided = instances::void_by_template(conn, template_id)?;
    for id in &voided {
        let Some(inst) = instances::get_instance(conn, id)? else {
            continue;
        };
        if inst.kind == EntityKind::Node {
            evict_occupants(conn, id, now)?;
        }
        for child in instances::contained_in(conn, &ContainerRef::Instance(id.clone()))? {
            cascade_destroy(conn, &child.id, now)?;
        }
    }
    Ok(voided.len())
}

/// Instantiate a template into a container, copying descriptions and
/// fields; `extra_fields` are merged shallowly over the template defaults.
pub fn instantiate_template(
    conn: &Connection,
    tpl: &TemplateRow,
    container: Option<ContainerRef>,
    extra_fields: Option<&serde_json::Map<String, serde_json::Value>>,
    now: i64,
) -> Result<InstanceRow> {
    let mut fields = tpl.fields.clone();
    if let Some(extra) = extra_fields {
        for (key, value) in extra {
            fields.insert(key.clone(), value.clone());
        }
    }
    let inst = InstanceRow {
        id: Uuid::new_v4().to_string(),
        template_id: Some(tpl.id.clone()),
        kind: tpl.kind,
        short_description: tpl.short_description.clone(),
        long_description: tpl.long_description.clone(),
        fields,
        permissions: serde_json::Map::new(),
        container,
        is_void: false,
        is_destroyed: false,
        system_type: SystemType::None,
        interactions_used_this_tick: 0,
        created_at: now,
    };
    instances::create_instance(conn, &inst)?;
    Ok(inst)
}

/// Send every agent in a node back to its home with a system event
pub fn evict_occupants(conn: &Connection, node_id: &str, now: i64) -> Result<()> {
    for agent in agents::agents_in_node(conn, node_id)? {
        agents::set_current_node(conn, &agent.id, Some(&agent.home_node_id))?;
        events::append_event(
            conn,
            &agent.id,
            "system",
            &json!({ "message": "the world dissolves around you; you are home again" }),
            now,
        )?;
    }
    Ok(())
}
