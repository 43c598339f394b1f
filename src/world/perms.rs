//! Permission rules and the containment model
//!
//! Nothing in this module returns an error: every check resolves to a
//! boolean (or an Option for the walks), with store failures treated as
//! a refusal.

use rusqlite::Connection;
use serde_json::Value;
use tracing::debug;

use crate::db::agents::{self, AgentRow};
use crate::db::instances::{self, ContainerRef, EntityKind, InstanceRow};
use crate::db::templates;
use crate::world::MAX_CONTAINMENT_DEPTH;

pub const PERM_INTERACT: &str = "interact";
pub const PERM_EDIT: &str = "edit";
pub const PERM_CONTAIN: &str = "contain";
pub const PERM_PERMS: &str = "perms";
pub const PERM_DELETE: &str = "delete";
pub const PERM_INSPECT: &str = "inspect";

/// A permission rule: `"any"`, `"none"`, `"owner"`, `"node"` or
/// `["list", [username, ...]]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermRule {
    Any,
    None,
    Owner,
    Node,
    List(Vec<String>),
}

impl PermRule {
    /// Parse a rule literal; rejects anything outside the grammar
    pub fn parse(value: &Value) -> Option<PermRule> {
        match value {
            Value::String(s) => match s.as_str() {
                "any" => Some(PermRule::Any),
                "none" => Some(PermRule::None),
                "owner" => Some(PermRule::Owner),
                "node" => Some(PermRule::Node),
                _ => Option::None,
            },
            Value::Array(items) => {
                if items.len() != 2 || items[0] != Value::String("list".into()) {
                    return Option::None;
                }
                let names = items[1].as_array()?;
                let mut usernames = Vec::with_capacity(names.len());
                for name in names {
                    usernames.push(name.as_str()?.to_string());
                }
                Some(PermRule::List(usernames))
            }
            _ => Option::None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            PermRule::Any => Value::String("any".into()),
            PermRule::None => Value::String("none".into()),
            PermRule::Owner => Value::String("owner".into()),
            PermRule::Node => Value::String("node".into()),
            PermRule::List(names) => serde_json::json!(["list", names]),
        }
    }
}

/// Stock default permissions applied to templates created without any
pub fn stock_default_permissions() -> serde_json::Map<String, Value> {
    let mut map = serde_json::Map::new();
    map.insert(PERM_INTERACT.into(), Value::String("any".into()));
    map.insert(PERM_INSPECT.into(), Value::String("any".into()));
    map.insert(PERM_EDIT.into(), Value::String("owner".into()));
    map.insert(PERM_CONTAIN.into(), Value::String("owner".into()));
    map.insert(PERM_PERMS.into(), Value::String("owner".into()));
    map.insert(PERM_DELETE.into(), Value::String("owner".into()));
    map
}

/// Effective rule for (instance, key): instance override, then template
/// default, then `"owner"`
pub fn effective_rule(conn: &Connection, inst: &InstanceRow, key: &str) -> PermRule {
    if let Some(raw) = inst.permissions.get(key) {
        if let Some(rule) = PermRule::parse(raw) {
            return rule;
        }
    }
    if let Some(template_id) = &inst.template_id {
        if let Ok(Some(tpl)) = templates::get_template(conn, template_id) {
            if let Some(raw) = tpl.default_permissions.get(key) {
                if let Some(rule) = PermRule::parse(raw) {
                    return rule;
                }
            }
        }
    }
    PermRule::Owner
}

/// Evaluate a rule against (agent, instance)
pub fn rule_allows(
    conn: &Connection,
    rule: &PermRule,
    agent: &AgentRow,
    inst: &InstanceRow,
) -> bool {
    match rule {
        PermRule::Any => true,
        PermRule::None => false,
        PermRule::Owner => owner_of(conn, inst)
            .map(|owner_id| owner_id == agent.id)
            .unwrap_or(false),
        PermRule::Node => match (containing_node(conn, inst), &agent.current_node_id) {
            (Some(node), Some(current)) => &node == current,
            _ => false,
        },
        PermRule::List(names) => names.iter().any(|n| n == &agent.username),
    }
}

/// Whether the agent holds `key` on the instance
pub fn agent_allowed(conn: &Connection, agent: &AgentRow, inst: &InstanceRow, key: &str) -> bool {
    let rule = effective_rule(conn, inst, key);
    rule_allows(conn, &rule, agent, inst)
}

/// Template owner of an instance; void instances have none
pub fn owner_of(conn: &Connection, inst: &InstanceRow) -> Option<String> {
    let template_id = inst.template_id.as_ref()?;
    templates::get_template(conn, template_id)
        .ok()
        .flatten()
        .map(|tpl| tpl.owner_id)
}

/// The node reached by walking container edges upward; a node is its own
/// containing node, and an inventory chain resolves through the carrying
/// agent's current node. The walk is bounded so malformed loops cannot
/// spin.
pub fn containing_node(conn: &Connection, inst: &InstanceRow) -> Option<String> {
    if inst.kind == EntityKind::Node {
        return Some(inst.id.clone());
    }
    let mut current = inst.container.clone();
    for _ in 0..(MAX_CONTAINMENT_DEPTH * 2 + 2) {
        match current {
            Some(ContainerRef::Agent(agent_id)) => {
                return agents::get_agent(conn, &agent_id)
                    .ok()
                    .flatten()
                    .and_then(|a| a.current_node_id);
            }
            Some(ContainerRef::Instance(id)) => {
                let parent = instances::get_instance(conn, &id).ok().flatten()?;
                if parent.kind == EntityKind::Node {
                    return Some(parent.id);
                }
                current = parent.container;
            }
            Option::None => return Option::None,
        }
    }
    debug!(instance = %inst.id, "containment walk exceeded bound");
    Option::None
}

/// Containing node by instance id
pub fn containing_node_of_id(conn: &Connection, instance_id: &str) -> Option<String> {
    let inst = instances::get_instance(conn, instance_id).ok().flatten()?;
    containing_node(conn, &inst)
}

/// The agent at the top of an instance's container chain, if any
pub fn carrier_agent(conn: &Connection, inst: &InstanceRow) -> Option<String> {
    let mut current = inst.container.clone();
    for _ in 0..(MAX_CONTAINMENT_DEPTH * 2 + 2) {
        match current {
            Some(ContainerRef::Agent(agent_id)) => return Some(agent_id),
            Some(ContainerRef::Instance(id)) => {
                let parent = instances::get_instance(conn, &id).ok().flatten()?;
                current = parent.container;
            }
            Option::None => return Option::None,
        }
    }
    Option::None
}

/// Whether the instance's upward chain reaches the given node without
/// passing through any agent inventory
pub fn chain_reaches_node(conn: &Connection, inst: &InstanceRow, node_id: &str) -> bool {
    let mut current = inst.container.clone();
    for _ in 0..(MAX_CONTAINMENT_DEPTH * 2 + 2) {
        match current {
            Some(ContainerRef::Agent(_)) => return false,
            Some(ContainerRef::Instance(id)) => {
                if id == node_id {
                    // only counts if the target actually is a node
                    return instances::get_instance(conn, &id)
                        .ok()
                        .flatten()
                        .map(|p| p.kind == EntityKind::Node)
                        .unwrap_or(false);
                }
                match instances::get_instance(conn, &id).ok().flatten() {
                    Some(parent) if parent.kind != EntityKind::Node => {
                        current = parent.container
                    }
                    _ => return false,
                }
            }
            Option::None => return false,
        }
    }
    false
}

/// Whether the instance sits (possibly nested) inside an agent's inventory
pub fn chain_reaches_agent(conn: &Connection, inst: &InstanceRow, agent_id: &str) -> bool {
    carrier_agent(conn, inst)
        .map(|carrier| carrier == agent_id)
        .unwrap_or(false)
}

/// Container-edge distance from a candidate container down to a new child.
/// A child sitting directly in a node or an inventory is at depth 1.
fn depth_of_container(conn: &Connection, container: &ContainerRef) -> Option<usize> {
    let mut depth = 0usize;
    let mut current = container.clone();
    for _ in 0..(MAX_CONTAINMENT_DEPTH * 2 + 2) {
        match current {
            ContainerRef::Agent(_) => return Some(depth),
            ContainerRef::Instance(id) => {
                let inst = instances::get_instance(conn, &id).ok().flatten()?;
                if inst.kind == EntityKind::Node {
                    return Some(depth);
                }
                depth += 1;
                match inst.container {
                    Some(parent) => current = parent,
                    Option::None => return Some(depth),
                }
            }
        }
    }
    Option::None
}

/// Whether placing a child into `container` keeps the root-path length
/// within MAX_CONTAINMENT_DEPTH
pub fn depth_allows_child(conn: &Connection, container: &ContainerRef) -> bool {
    match depth_of_container(conn, container) {
        Some(depth) => depth + 1 <= MAX_CONTAINMENT_DEPTH,
        Option::None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rule_literals() {
        assert_eq!(PermRule::parse(&serde_json::json!("any")), Some(PermRule::Any));
        assert_eq!(PermRule::parse(&serde_json::json!("none")), Some(PermRule::None));
        assert_eq!(PermRule::parse(&serde_json::json!("owner")), Some(PermRule::Owner));
        assert_eq!(PermRule::parse(&serde_json::json!("node")), Some(PermRule::Node));
        assert_eq!(
            PermRule::parse(&serde_json::json!(["list", ["alice", "bob"]])),
            Some(PermRule::List(vec!["alice".into(), "bob".into()]))
        );
    }

    #[test]
    fn test_parse_rule_rejects_garbage() {
        assert_eq!(PermRule::parse(&serde_json::json!("everyone")), Option::None);
        assert_eq!(PermRule::parse(&serde_json::json!(42)), Option::None);
        assert_eq!(PermRule::parse(&serde_json::json!(["list"])), Option::None);
        assert_eq!(
            PermRule::parse(&serde_json::json!(["list", [1, 2]])),
            Option::None
        );
        assert_eq!(PermRule::parse(&serde_json::json!(["allow", []])), Option::None);
    }

    #[test]
    fn test_rule_round_trip() {
        for raw in [
            serde_json::json!("any"),
            serde_json::json!("none"),
            serde_json::json!("owner"),
            serde_json::json!("node"),
            serde_json::json!(["list", ["alice"]]),
        ] {
            let rule = PermRule::parse(&raw).unwrap();
            assert_eq!(rule.to_value(), raw);
        }
    }
}
