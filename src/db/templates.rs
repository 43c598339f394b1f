//! Template CRUD

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{Map, Value};

use crate::db::instances::EntityKind;
use crate::types::MashError;

/// Template row from database
#[derive(Debug, Clone)]
pub struct TemplateRow {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub kind: EntityKind,
    pub short_description: String,
    pub long_description: String,
    pub fields: Map<String, Value>,
    pub default_permissions: Map<String, Value>,
    /// Raw interaction rules; parsed by the DSL layer
    pub interactions: Vec<Value>,
    pub created_at: i64,
}

impl TemplateRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        let kind_str: String = row.get("kind")?;
        let fields_json: String = row.get("fields_json")?;
        let permissions_json: String = row.get("default_permissions_json")?;
        let interactions_json: String = row.get("interactions_json")?;

        Ok(Self {
            id: row.get("id")?,
            owner_id: row.get("owner_id")?,
            name: row.get("name")?,
            kind: EntityKind::parse(&kind_str).unwrap_or(EntityKind::Thing),
            short_description: row.get("short_description")?,
            long_description: row.get("long_description")?,
            fields: serde_json::from_str(&fields_json).unwrap_or_default(),
            default_permissions: serde_json::from_str(&permissions_json).unwrap_or_default(),
            interactions: serde_json::from_str(&interactions_json).unwrap_or_default(),
            created_at: row.get("created_at")?,
        })
    }
}

/// Insert a new template row
pub fn create_template(conn: &Connection, tpl: &TemplateRow) -> Result<(), MashError> {
    conn.execute(
        "INSERT INTO templates (id, owner_id, name, kind, short_description, long_description,
                                fields_json, default_permissions_json, interactions_json,
                                created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            tpl.id,
            tpl.owner_id,
            tpl.name,
            tpl.kind.as_str(),
            tpl.short_description,
            tpl.long_description,
            serde_json::to_string(&tpl.fields)?,
            serde_json::to_string(&tpl.default_permissions)?,
            serde_json::to_string(&tpl.interactions)?,
            tpl.created_at,
        ],
    )?;
    Ok(())
}

/// Get template by id
pub fn get_template(conn: &Connection, id: &str) -> Result<Option<TemplateRow>, MashError> {
    let tpl = conn
        .query_row("SELECT * FROM templates WHERE id = ?", params![id], |row| {
            TemplateRow::from_row(row)
        })
        .optional()?;
    Ok(tpl)
}

/// Persist a mutated template (edit verb)
pub fn update_template(conn: &Connection, tpl: &TemplateRow) -> Result<(), MashError> {
    conn.execute(
        "UPDATE templates SET name = ?, short_description = ?, long_description = ?,
                fields_json = ?, default_permissions_json = ?, interactions_json = ?
         WHERE id = ?",
        params![
            tpl.name,
            tpl.short_description,
            tpl.long_description,
            serde_json::to_string(&tpl.fields)?,
            serde_json::to_string(&tpl.default_permissions)?,
            serde_json::to_string(&tpl.interactions)?,
            tpl.id,
        ],
    )?;
    Ok(())
}

/// Delete a template row (instances are voided separately)
pub fn delete_template(conn: &Connection, id: &str) -> Result<(), MashError> {
    conn.execute("DELETE FROM templates WHERE id = ?", params![id])?;
    Ok(())
}

/// Templates owned by an agent, oldest first
pub fn templates_by_owner(
    conn: &Connection,
    owner_id: &str,
) -> Result<Vec<TemplateRow>, MashError> {
    let mut stmt =
        conn.prepare("SELECT * FROM templates WHERE owner_id = ? ORDER BY created_at, rowid")?;
    let rows = stmt
        .query_map(params![owner_id], |row| TemplateRow::from_row(row))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
