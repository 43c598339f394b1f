//! Account creation and home-node seeding

use rusqlite::Connection;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::db::agents::{self, AgentRow};
use crate::db::instances::{self, ContainerRef, EntityKind, InstanceRow, SystemType};
use crate::types::{MashError, Result};
use crate::world::perms;
use crate::world::{DEFAULT_PERCEPTION_CAP, MAX_AP};

pub const HOME_SHORT_DESCRIPTION: &str = "your home node";
pub const HOME_LONG_DESCRIPTION: &str =
    "A quiet pocket of the world that belongs to you alone. A shimmering portal \
     and a glowing directory are fixed here.";
pub const PORTAL_SHORT_DESCRIPTION: &str = "a shimmering portal";
pub const PORTAL_LONG_DESCRIPTION: &str =
    "The surface ripples. Travelling through it leads somewhere new every time.";
pub const DIRECTORY_SHORT_DESCRIPTION: &str = "a glowing directory";
pub const DIRECTORY_LONG_DESCRIPTION: &str =
    "Soft light lists the links you have travelled most recently.";

/// Result of a successful signup
#[derive(Debug, Clone)]
pub struct SignupOutcome {
    pub agent_id: String,
    pub home_node_id: String,
}

/// Permission overrides for a home node: only the owner interacts, edits,
/// contains or re-grants; nobody deletes; anyone inspects.
fn home_permissions(username: &str) -> Map<String, Value> {
    let only_owner = serde_json::json!(["list", [username]]);
    let mut map = Map::new();
    map.insert(perms::PERM_INTERACT.into(), only_owner.clone());
    map.insert(perms::PERM_EDIT.into(), only_owner.clone());
    map.insert(perms::PERM_CONTAIN.into(), only_owner.clone());
    map.insert(perms::PERM_PERMS.into(), only_owner);
    map.insert(perms::PERM_DELETE.into(), Value::String("none".into()));
    map.insert(perms::PERM_INSPECT.into(), Value::String("any".into()));
    map
}

/// Permission overrides for the two system instances: open to look at and
/// use, untouchable otherwise.
fn system_permissions() -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(perms::PERM_INTERACT.into(), Value::String("any".into()));
    map.insert(perms::PERM_INSPECT.into(), Value::String("any".into()));
    map.insert(perms::PERM_EDIT.into(), Value::String("none".into()));
    map.insert(perms::PERM_CONTAIN.into(), Value::String("none".into()));
    map.insert(perms::PERM_PERMS.into(), Value::String("none".into()));
    map.insert(perms::PERM_DELETE.into(), Value::String("none".into()));
    map
}

/// Create an agent, its home node and the two system instances.
///
/// The caller has already validated the username and hashed the password.
pub fn create_account(
    conn: &Connection,
    username: &str,
    password_hash: &str,
    token: &str,
    now: i64,
) -> Result<SignupOutcome> {
    if agents::get_agent_by_username(conn, username)?.is_some() {
        return Err(MashError::Validation("username already taken".into()));
    }

    let agent_id = Uuid::new_v4().to_string();
    let home_node_id = Uuid::new_v4().to_string();

    let home = InstanceRow {
        id: home_node_id.clone(),
        template_id: None,
        kind: EntityKind::Node,
        short_description: HOME_SHORT_DESCRIPTION.to_string(),
        long_description: HOME_LONG_DESCRIPTION.to_string(),
        fields: Map::new(),
        permissions: home_permissions(username),
        container: None,
        is_void: false,
        is_destroyed: false,
        system_type: SystemType::None,
        interactions_used_this_tick: 0,
        created_at: now,
    };
    instances::create_instance(conn, &home)?;

    let portal = InstanceRow {
        id: Uuid::new_v4().to_string(),
        template_id: None,
        kind: EntityKind::Link,
        short_description: PORTAL_SHORT_DESCRIPTION.to_string(),
        long_description: PORTAL_LONG_DESCRIPTION.to_string(),
        fields: Map::new(),
        permissions: system_permissions(),
        container: Some(ContainerRef::Instance(home_node_id.clone())),
        is_void: false,
        is_destroyed: false,
        system_type: SystemType::RandomLink,
        interactions_used_this_tick: 0,
        created_at: now,
    };
    instances::create_instance(conn, &portal)?;

    let directory = InstanceRow {
        id: Uuid::new_v4().to_string(),
        template_id: None,
        kind: EntityKind::Thing,
        short_description: DIRECTORY_SHORT_DESCRIPTION.to_string(),
        long_description: DIRECTORY_LONG_DESCRIPTION.to_string(),
        fields: Map::new(),
        permissions: system_permissions(),
        container: Some(ContainerRef::Instance(home_node_id.clone())),
        is_void: false,
        is_destroyed: false,
        system_type: SystemType::LinkIndex,
        interactions_used_this_tick: 0,
        created_at: now,
    };
    instances::create_instance(conn, &directory)?;

    let agent = AgentRow {
        id: agent_id.clone(),
        username: username.to_string(),
        password_hash: password_hash.to_string(),
        token: token.to_string(),
        current_node_id: Some(home_node_id.clone()),
        home_node_id: home_node_id.clone(),
        ap: MAX_AP,
        purchased_ap_this_tick: 0,
        short_description: format!("an agent called {}", username),
        long_description: String::new(),
        cap_agents: DEFAULT_PERCEPTION_CAP,
        cap_links: DEFAULT_PERCEPTION_CAP,
        cap_things: DEFAULT_PERCEPTION_CAP,
        see_broadcasts: true,
        last_active_at: now,
    };
    agents::create_agent(conn, &agent)?;

    Ok(SignupOutcome {
        agent_id,
        home_node_id,
    })
}

/// Restore a home node to its seeded state: default descriptions, empty
/// fields, and no contents beyond the two system instances.
pub fn reset_home(conn: &Connection, home_node_id: &str, now: i64) -> Result<()> {
    instances::set_descriptions(
        conn,
        home_node_id,
        HOME_SHORT_DESCRIPTION,
        HOME_LONG_DESCRIPTION,
    )?;
    instances::set_fields(conn, home_node_id, &Map::new())?;

    let container = ContainerRef::Instance(home_node_id.to_string());
    for child in instances::contained_in(conn, &container)? {
        if child.system_type == SystemType::None {
            crate::world::lifecycle::cascade_destroy(conn, &child.id, now)?;
        }
    }
    Ok(())
}
