//! Instance CRUD
//!
//! Instances are the live entities of the world. Nodes are always
//! top-level (no container); links and things sit in a node, in another
//! instance, or in an agent's inventory.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::MashError;

/// Entity kind shared by templates and instances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Node,
    Link,
    Thing,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Node => "node",
            EntityKind::Link => "link",
            EntityKind::Thing => "thing",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "node" => Some(EntityKind::Node),
            "link" => Some(EntityKind::Link),
            "thing" => Some(EntityKind::Thing),
            _ => None,
        }
    }
}

/// Runtime-wired behaviour marker for the two per-home system instances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemType {
    None,
    RandomLink,
    LinkIndex,
}

impl SystemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemType::None => "none",
            SystemType::RandomLink => "random_link",
            SystemType::LinkIndex => "link_index",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(SystemType::None),
            "random_link" => Some(SystemType::RandomLink),
            "link_index" => Some(SystemType::LinkIndex),
            _ => None,
        }
    }
}

/// Where an instance lives; `None` (on the row) means top-level
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerRef {
    Agent(String),
    Instance(String),
}

impl ContainerRef {
    pub fn type_str(&self) -> &'static str {
        match self {
            ContainerRef::Agent(_) => "agent",
            ContainerRef::Instance(_) => "instance",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            ContainerRef::Agent(id) => id,
            ContainerRef::Instance(id) => id,
        }
    }
}

/// Instance row from database
#[derive(Debug, Clone)]
pub struct InstanceRow {
    pub id: String,
    /// NULL means voided (or a system instance, which never had one)
    pub template_id: Option<String>,
    pub kind: EntityKind,
    pub short_description: String,
    pub long_description: String,
    pub fields: Map<String, Value>,
    /// Sparse permission overrides
    pub permissions: Map<String, Value>,
    pub container: Option<ContainerRef>,
    pub is_void: bool,
    pub is_destroyed: bool,
    pub system_type: SystemType,
    pub interactions_used_this_tick: i64,
    pub created_at: i64,
}

impl InstanceRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        let kind_str: String = row.get("kind")?;
        let system_str: String = row.get("system_type")?;
        let fields_json: String = row.get("fields_json")?;
        let permissions_json: String = row.get("permissions_json")?;
        let container_type: Option<String> = row.get("container_type")?;
        let container_id: Option<String> = row.get("container_id")?;

        let container = match (container_type.as_deref(), container_id) {
            (Some("agent"), Some(id)) => Some(ContainerRef::Agent(id)),
            (Some("instance"), Some(id)) => Some(ContainerRef::Instance(id)),
            _ => None,
        };

        Ok(Self {
            id: row.get("id")?,
            template_id: row.get("template_id")?,
            kind: EntityKind::parse(&kind_str).unwrap_or(EntityKind::Thing),
            short_description: row.get("short_description")?,
            long_description: row.get("long_description")?,
            fields: serde_json::from_str(&fields_json).unwrap_or_default(),
            permissions: serde_json::from_str(&permissions_json).unwrap_or_default(),
            container,
            is_void: row.get::<_, i64>("is_void")? != 0,
            is_destroyed: row.get::<_, i64>("is_destroyed")? != 0,
            system_type: SystemType::parse(&system_str).unwrap_or(SystemType::None),
            interactions_used_this_tick: row.get("interactions_used_this_tick")?,
            created_at: row.get("created_at")?,
        })
    }

    /// Live instances are neither void nor destroyed
    pub fn is_live(&self) -> bool {
        !self.is_void && !self.is_destroyed
    }
}

/// Insert a new instance row
pub fn create_instance(conn: &Connection, inst: &InstanceRow) -> Result<(), MashError> {
    let (container_type, container_id) = match &inst.container {
        Some(c) => (Some(c.type_str()), Some(c.id().to_string())),
        None => (None, None),
    };
    conn.execute(
        "INSERT INTO instances (id, template_id, kind, short_description, long_description,
                                fields_json, permissions_json, container_type, container_id,
                                is_void, is_destroyed, system_type,
                                interactions_used_this_tick, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            inst.id,
            inst.template_id,
            inst.kind.as_str(),
            inst.short_description,
            inst.long_description,
            serde_json::to_string(&inst.fields)?,
            serde_json::to_string(&inst.permissions)?,
            container_type,
            container_id,
            inst.is_void as i64,
            inst.is_destroyed as i64,
            inst.system_type.as_str(),
            inst.interactions_used_this_tick,
            inst.created_at,
        ],
    )?;
    Ok(())
}

/// Get instance by id
pub fn get_instance(conn: &Connection, id: &str) -> Result<Option<InstanceRow>, MashError> {
    let inst = conn
        .query_row("SELECT * FROM instances WHERE id = ?", params![id], |row| {
            InstanceRow::from_row(row)
        })
        .optional()?;
    Ok(inst)
}

/// Overwrite the custom fields mapping
pub fn set_fields(
    conn: &Connection,
    id: &str,
    fields: &Map<String, Value>,
) -> Result<(), MashError> {
    conn.execute(
        "UPDATE instances SET fields_json = ? WHERE id = ?",
        params![serde_json::to_string(fields)?, id],
    )?;
    Ok(())
}

/// Overwrite the permission overrides mapping
pub fn set_permissions(
    conn: &Connection,
    id: &str,
    permissions: &Map<String, Value>,
) -> Result<(), MashError> {
    conn.execute(
        "UPDATE instances SET permissions_json = ? WHERE id = ?",
        params![serde_json::to_string(permissions)?, id],
    )?;
    Ok(())
}

/// Update the copied (mutable) descriptions
pub fn set_descriptions(
    conn: &Connection,
    id: &str,
    short: &str,
    long: &str,
) -> Result<(), MashError> {
    conn.execute(
        "UPDATE instances SET short_description = ?, long_description = ? WHERE id = ?",
        params![short, long, id],
    )?;
    Ok(())
}

/// Re-parent an instance
pub fn set_container(
    conn: &Connection,
    id: &str,
    container: Option<&ContainerRef>,
) -> Result<(), MashError> {
    let (container_type, container_id) = match container {
        Some(c) => (Some(c.type_str()), Some(c.id().to_string())),
        None => (None, None),
    };
    conn.execute(
        "UPDATE instances SET container_type = ?, container_id = ? WHERE id = ?",
        params![container_type, container_id, id],
    )?;
    Ok(())
}

/// Void every instance of a template (template deletion cascade, step 1)
pub fn void_by_template(conn: &Connection, template_id: &str) -> Result<Vec<String>, MashError> {
    let mut stmt =
        conn.prepare("SELECT id FROM instances WHERE template_id = ? AND is_destroyed = 0")?;
    let ids: Vec<String> = stmt
        .query_map(params![template_id], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    conn.execute(
        "UPDATE instances SET is_void = 1, template_id = NULL WHERE template_id = ?",
        params![template_id],
    )?;
    Ok(ids)
}

/// Mark a single instance destroyed
pub fn mark_destroyed(conn: &Connection, id: &str) -> Result<(), MashError> {
    conn.execute(
        "UPDATE instances SET is_destroyed = 1 WHERE id = ?",
        params![id],
    )?;
    Ok(())
}

/// Immediate children of a container, in creation order
pub fn contained_in(
    conn: &Connection,
    container: &ContainerRef,
) -> Result<Vec<InstanceRow>, MashError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM instances
         WHERE container_type = ? AND container_id = ? AND is_destroyed = 0
         ORDER BY created_at, rowid",
    )?;
    let rows = stmt
        .query_map(params![container.type_str(), container.id()], |row| {
            InstanceRow::from_row(row)
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Non-destroyed instances of a template, in creation order
pub fn instances_of_template(
    conn: &Connection,
    template_id: &str,
) -> Result<Vec<InstanceRow>, MashError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM instances WHERE template_id = ? AND is_destroyed = 0
         ORDER BY created_at, rowid",
    )?;
    let rows = stmt
        .query_map(params![template_id], |row| InstanceRow::from_row(row))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// First live instance of a template directly inside a container
pub fn first_of_template_in(
    conn: &Connection,
    container: &ContainerRef,
    template_id: &str,
) -> Result<Option<InstanceRow>, MashError> {
    let inst = conn
        .query_row(
            "SELECT * FROM instances
             WHERE container_type = ? AND container_id = ? AND template_id = ?
               AND is_void = 0 AND is_destroyed = 0
             ORDER BY created_at, rowid LIMIT 1",
            params![container.type_str(), container.id(), template_id],
            |row| InstanceRow::from_row(row),
        )
        .optional()?;
    Ok(inst)
}

/// Whether any live instance of a template has the given container id,
/// regardless of container type
pub fn any_of_template_with_container_id(
    conn: &Connection,
    template_id: &str,
    container_id: &str,
) -> Result<bool, MashError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM instances
         WHERE template_id = ? AND container_id = ? AND is_void = 0 AND is_destroyed = 0",
        params![template_id, container_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// All live top-level nodes
pub fn live_nodes(conn: &Connection) -> Result<Vec<InstanceRow>, MashError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM instances
         WHERE kind = 'node' AND is_void = 0 AND is_destroyed = 0
         ORDER BY created_at, rowid",
    )?;
    let rows = stmt
        .query_map([], |row| InstanceRow::from_row(row))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Zero every per-tick interaction counter (tick phase 1)
pub fn reset_interaction_counters(conn: &Connection) -> Result<(), MashError> {
    conn.execute(
        "UPDATE instances SET interactions_used_this_tick = 0
         WHERE interactions_used_this_tick != 0",
        [],
    )?;
    Ok(())
}

/// Advance an instance's per-tick interaction counter
pub fn bump_interaction_counter(conn: &Connection, id: &str) -> Result<(), MashError> {
    conn.execute(
        "UPDATE instances SET interactions_used_this_tick = interactions_used_this_tick + 1
         WHERE id = ?",
        params![id],
    )?;
    Ok(())
}
