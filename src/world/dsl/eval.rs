//! Rule evaluation
//!
//! `fire` runs every matching rule of an instance's template against the
//! store, within the per-tick interaction budget. Effects apply eagerly;
//! `deny` halts the remaining effects and rules and tells the caller to
//! withhold its own mutation. Unauthorised or unresolvable effects are
//! skipped silently so a half-evaluated rule never leaks partial state.

use chrono::Timelike;
use rusqlite::Connection;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::db::agents::{self, AgentRow};
use crate::db::instances::{self, ContainerRef, EntityKind, InstanceRow};
use crate::db::{events, templates};
use crate::types::Result;
use crate::world::dsl::parse::{
    parse_rules, CondBlock, Condition, Effect, EffectEntry, RefBase, Reference,
};
use crate::world::envelope;
use crate::world::lifecycle;
use crate::world::perms::{self, PERM_CONTAIN, PERM_DELETE, PERM_EDIT, PERM_PERMS};
use crate::world::MAX_INTERACTIONS_PER_TICK;

/// An entity a reference resolved to
enum Resolved {
    Agent(AgentRow),
    Instance(InstanceRow),
}

impl Resolved {
    fn id(&self) -> &str {
        match self {
            Resolved::Agent(a) => &a.id,
            Resolved::Instance(i) => &i.id,
        }
    }
}

struct Ctx<'a> {
    conn: &'a Connection,
    self_id: String,
    actor_id: Option<String>,
    subject_id: Option<String>,
    /// Owner of the firing template; effects on non-self targets are
    /// authorised against this agent
    owner: Option<AgentRow>,
    now: i64,
    denied: bool,
}

/// Run the instance's rules whose `on` matches `verb`.
///
/// Returns the denied flag so the caller can withhold its mutation.
pub fn fire(
    conn: &Connection,
    instance_id: &str,
    verb: &str,
    actor_id: Option<&str>,
    subject_id: Option<&str>,
    now: i64,
) -> Result<bool> {
    let Some(inst) = instances::get_instance(conn, instance_id)? else {
        return Ok(false);
    };
    if !inst.is_live() {
        return Ok(false);
    }
    // system instances and voided instances carry no rules
    let Some(template_id) = inst.template_id.clone() else {
        return Ok(false);
    };
    let Some(tpl) = templates::get_template(conn, &template_id)? else {
        return Ok(false);
    };

    let rules = match parse_rules(&tpl.interactions) {
        Ok(rules) => rules,
        Err(e) => {
            warn!(template = %template_id, error = %e, "skipping unparseable interactions");
            return Ok(false);
        }
    };

    let owner = agents::get_agent(conn, &tpl.owner_id)?;
    let mut ctx = Ctx {
        conn,
        self_id: instance_id.to_string(),
        actor_id: actor_id.map(|s| s.to_string()),
        subject_id: subject_id.map(|s| s.to_string()),
        owner,
        now,
        denied: false,
    };

    for rule in rules.iter().filter(|r| r.on == verb) {
        // the budget is re-read so concurrent verbs in the same tick share it
        let Some(fresh) = instances::get_instance(conn, &ctx.self_id)? else {
            break;
        };
        if !fresh.is_live() {
            break;
        }
        if fresh.interactions_used_this_tick >= MAX_INTERACTIONS_PER_TICK {
            break;
        }
        instances::bump_interaction_counter(conn, &ctx.self_id)?;

        let branch = if eval_conditions(&ctx, &rule.conditions) {
            &rule.then_effects
        } else {
            &rule.else_effects
        };
        run_entries(&mut ctx, branch);
        if ctx.denied {
            break;
        }
    }

    Ok(ctx.denied)
}

fn run_entries(ctx: &mut Ctx, entries: &[EffectEntry]) {
    for entry in entries {
        if ctx.denied {
            break;
        }
        match entry {
            EffectEntry::Primitive(effect) => {
                if let Err(e) = apply_effect(ctx, effect) {
                    warn!(instance = %ctx.self_id, error = %e, "interaction effect failed");
                }
            }
            EffectEntry::Block(block) => run_block(ctx, block),
        }
    }
}

fn run_block(ctx: &mut Ctx, block: &CondBlock) {
    let branch = if eval_conditions(ctx, &block.conditions) {
        &block.then_effects
    } else {
        &block.else_effects
    };
    run_entries(ctx, branch);
}

// ---------------------------------------------------------------------------
// Reference resolution

fn resolve_base(ctx: &Ctx, base: RefBase) -> Option<Resolved> {
    match base {
        RefBase::Slf => instances::get_instance(ctx.conn, &ctx.self_id)
            .ok()
            .flatten()
            .map(Resolved::Instance),
        RefBase::Actor => ctx
            .actor_id
            .as_ref()
            .and_then(|id| agents::get_agent(ctx.conn, id).ok().flatten())
            .map(Resolved::Agent),
        RefBase::Subject => ctx
            .subject_id
            .as_ref()
            .and_then(|id| instances::get_instance(ctx.conn, id).ok().flatten())
            .map(Resolved::Instance),
        RefBase::Container => {
            let slf = instances::get_instance(ctx.conn, &ctx.self_id).ok().flatten()?;
            match slf.container? {
                ContainerRef::Agent(id) => agents::get_agent(ctx.conn, &id)
                    .ok()
                    .flatten()
                    .map(Resolved::Agent),
                ContainerRef::Instance(id) => instances::get_instance(ctx.conn, &id)
                    .ok()
                    .flatten()
                    .map(Resolved::Instance),
            }
        }
        RefBase::Carrier => {
            let slf = instances::get_instance(ctx.conn, &ctx.self_id).ok().flatten()?;
            let carrier = perms::carrier_agent(ctx.conn, &slf)?;
            agents::get_agent(ctx.conn, &carrier)
                .ok()
                .flatten()
                .map(Resolved::Agent)
        }
    }
}

/// Resolve a reference to a scalar; undefined resolves to null
fn resolve(ctx: &Ctx, reference: &Reference) -> Value {
    match reference {
        Reference::TickCount => {
            // portable time-of-day scalar: seconds since UTC midnight
            Value::from(chrono::Utc::now().time().num_seconds_from_midnight() as i64)
        }
        Reference::Entity { base, field } => {
            let Some(entity) = resolve_base(ctx, *base) else {
                return Value::Null;
            };
            match field {
                None => Value::String(entity.id().to_string()),
                Some(name) => entity_field(&entity, name),
            }
        }
        Reference::Contents {
            base,
            template_id,
            field,
        } => {
            let container = match base {
                RefBase::Slf => ContainerRef::Instance(ctx.self_id.clone()),
                RefBase::Carrier => {
                    let Some(Resolved::Agent(carrier)) = resolve_base(ctx, RefBase::Carrier)
                    else {
                        return Value::Null;
                    };
                    ContainerRef::Agent(carrier.id)
                }
                _ => return Value::Null,
            };
            match instances::first_of_template_in(ctx.conn, &container, template_id) {
                Ok(Some(inst)) => inst.fields.get(field).cloned().unwrap_or(Value::Null),
                _ => Value::Null,
            }
        }
    }
}

fn entity_field(entity: &Resolved, field: &str) -> Value {
    match entity {
        Resolved::Agent(agent) => match field {
            "id" => Value::String(agent.id.clone()),
            "username" => Value::String(agent.username.clone()),
            "short_description" => Value::String(agent.short_description.clone()),
            "long_description" => Value::String(agent.long_description.clone()),
            _ => Value::Null,
        },
        Resolved::Instance(inst) => match field {
            "id" => Value::String(inst.id.clone()),
            "short_description" => Value::String(inst.short_description.clone()),
            "long_description" => Value::String(inst.long_description.clone()),
            custom => inst.fields.get(custom).cloned().unwrap_or(Value::Null),
        },
    }
}

/// Resolve a reference to the entity it denotes. A bare entity reference
/// resolves directly; anything else resolves to a scalar that is then
/// looked up as an instance or agent id.
fn resolve_entity(ctx: &Ctx, reference: &Reference) -> Option<Resolved> {
    if let Reference::Entity { base, field: None } = reference {
        return resolve_base(ctx, *base);
    }
    let value = resolve(ctx, reference);
    let id = value.as_str()?;
    if let Some(inst) = instances::get_instance(ctx.conn, id).ok().flatten() {
        return Some(Resolved::Instance(inst));
    }
    agents::get_agent(ctx.conn, id).ok().flatten().map(Resolved::Agent)
}

/// A literal value, unless it is a string that parses as a reference
fn resolve_operand(ctx: &Ctx, value: &Value) -> Value {
    if let Some(s) = value.as_str() {
        if let Ok(reference) = Reference::parse(s) {
            return resolve(ctx, &reference);
        }
    }
    value.clone()
}

// ---------------------------------------------------------------------------
// Conditions

fn eval_conditions(ctx: &Ctx, conditions: &[Condition]) -> bool {
    conditions.iter().all(|c| eval_condition(ctx, c))
}

fn eval_condition(ctx: &Ctx, condition: &Condition) -> bool {
    match condition {
        Condition::Eq(reference, literal) => values_equal(&resolve(ctx, reference), literal),
        Condition::Neq(reference, literal) => !values_equal(&resolve(ctx, reference), literal),
        Condition::Gt(reference, literal) => {
            match (resolve(ctx, reference).as_f64(), literal.as_f64()) {
                (Some(a), Some(b)) => a > b,
                _ => false,
            }
        }
        Condition::Lt(reference, literal) => {
            match (resolve(ctx, reference).as_f64(), literal.as_f64()) {
                (Some(a), Some(b)) => a < b,
                _ => false,
            }
        }
        Condition::Has(reference, template_id) => {
            let value = resolve(ctx, reference);
            match value.as_str() {
                Some(container_id) => instances::any_of_template_with_container_id(
                    ctx.conn,
                    template_id,
                    container_id,
                )
                .unwrap_or(false),
                None => false,
            }
        }
        Condition::Not(inner) => !eval_condition(ctx, inner),
    }
}

/// Scalar equality with numeric coercion across integer/float encodings
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

// ---------------------------------------------------------------------------
// Effects

/// Whether the template's owner holds `key` on the target instance
fn owner_allowed(ctx: &Ctx, inst: &InstanceRow, key: &str) -> bool {
    match &ctx.owner {
        Some(owner) => perms::agent_allowed(ctx.conn, owner, inst, key),
        None => false,
    }
}

fn apply_effect(ctx: &mut Ctx, effect: &Effect) -> Result<()> {
    match effect {
        Effect::Deny => {
            ctx.denied = true;
            Ok(())
        }
        Effect::Set { target, value } => apply_set(ctx, target, value),
        Effect::Add { target, amount } => apply_add(ctx, target, amount),
        Effect::Say { text } => apply_say(ctx, text),
        Effect::Take { template_id, from } => apply_take(ctx, template_id, from),
        Effect::Give { template_id, to } => apply_give(ctx, template_id, to),
        Effect::Move { target, node } => apply_move(ctx, target, node),
        Effect::Create { template_id, at } => apply_create(ctx, template_id, at),
        Effect::Destroy { target } => apply_destroy(ctx, target),
        Effect::Perm { target, key, rule } => apply_perm(ctx, target, key, rule),
    }
}

/// Resolve a writable target to (fresh instance, field, is_self); agents
/// and missing entities are not writable
fn write_target(ctx: &Ctx, target: &Reference) -> Option<(InstanceRow, String, bool)> {
    let Reference::Entity {
        base,
        field: Some(field),
    } = target
    else {
        return None;
    };
    match resolve_base(ctx, *base)? {
        Resolved::Instance(inst) if inst.is_live() => {
            let is_self = inst.id == ctx.self_id;
            Some((inst, field.clone(), is_self))
        }
        _ => None,
    }
}

fn apply_set(ctx: &Ctx, target: &Reference, value: &Value) -> Result<()> {
    let Some((inst, field, is_self)) = write_target(ctx, target) else {
        return Ok(());
    };
    if !is_self && !owner_allowed(ctx, &inst, PERM_EDIT) {
        debug!(instance = %inst.id, "set skipped: owner lacks edit");
        return Ok(());
    }
    match field.as_str() {
        "short_description" => {
            let text = display_string(value);
            instances::set_descriptions(ctx.conn, &inst.id, &text, &inst.long_description)
        }
        "long_description" => {
            let text = display_string(value);
            instances::set_descriptions(ctx.conn, &inst.id, &inst.short_description, &text)
        }
        "id" => Ok(()),
        _ => {
            let mut fields = inst.fields.clone();
            fields.insert(field, value.clone());
            instances::set_fields(ctx.conn, &inst.id, &fields)
        }
    }
}

fn apply_add(ctx: &Ctx, target: &Reference, amount: &Value) -> Result<()> {
    let Some((inst, field, is_self)) = write_target(ctx, target) else {
        return Ok(());
    };
    if matches!(field.as_str(), "short_description" | "long_description" | "id") {
        return Ok(());
    }
    if !is_self && !owner_allowed(ctx, &inst, PERM_EDIT) {
        debug!(instance = %inst.id, "add skipped: owner lacks edit");
        return Ok(());
    }
    let current = inst.fields.get(&field).and_then(Value::as_f64).unwrap_or(0.0);
    let delta = resolve_operand(ctx, amount).as_f64().unwrap_or(0.0);
    let sum = current + delta;

    let mut fields = inst.fields.clone();
    fields.insert(field, number_value(sum));
    instances::set_fields(ctx.conn, &inst.id, &fields)
}

fn apply_say(ctx: &Ctx, text: &str) -> Result<()> {
    let message = interpolate(ctx, text);
    let Some(slf) = instances::get_instance(ctx.conn, &ctx.self_id)? else {
        return Ok(());
    };
    let Some(node_id) = perms::containing_node(ctx.conn, &slf) else {
        return Ok(());
    };
    envelope::broadcast_to_node(
        ctx.conn,
        &node_id,
        "broadcast",
        &json!({ "message": message }),
        None,
        ctx.now,
    )?;
    Ok(())
}

fn apply_take(ctx: &Ctx, template_id: &str, from: &Reference) -> Result<()> {
    let Some(source) = resolve_entity(ctx, from) else {
        return Ok(());
    };
    let source_container = match &source {
        Resolved::Agent(a) => ContainerRef::Agent(a.id.clone()),
        Resolved::Instance(i) => ContainerRef::Instance(i.id.clone()),
    };
    let Some(thing) = instances::first_of_template_in(ctx.conn, &source_container, template_id)?
    else {
        return Ok(());
    };
    if !owner_allowed(ctx, &thing, PERM_CONTAIN) {
        debug!(instance = %thing.id, "take skipped: owner lacks contain");
        return Ok(());
    }
    if let Resolved::Instance(src) = &source {
        if src.id != ctx.self_id && !owner_allowed(ctx, src, PERM_CONTAIN) {
            return Ok(());
        }
    }
    let dest = ContainerRef::Instance(ctx.self_id.clone());
    if !perms::depth_allows_child(ctx.conn, &dest) {
        return Ok(());
    }
    instances::set_container(ctx.conn, &thing.id, Some(&dest))
}

fn apply_give(ctx: &Ctx, template_id: &str, to: &Reference) -> Result<()> {
    let source = ContainerRef::Instance(ctx.self_id.clone());
    let Some(thing) = instances::first_of_template_in(ctx.conn, &source, template_id)? else {
        return Ok(());
    };
    if !owner_allowed(ctx, &thing, PERM_CONTAIN) {
        debug!(instance = %thing.id, "give skipped: owner lacks contain");
        return Ok(());
    }
    let Some(dest_entity) = resolve_entity(ctx, to) else {
        return Ok(());
    };
    let dest = match &dest_entity {
        Resolved::Agent(a) => ContainerRef::Agent(a.id.clone()),
        Resolved::Instance(i) => {
            if !i.is_live() {
                return Ok(());
            }
            if i.id != ctx.self_id && !owner_allowed(ctx, i, PERM_CONTAIN) {
                return Ok(());
            }
            ContainerRef::Instance(i.id.clone())
        }
    };
    if !perms::depth_allows_child(ctx.conn, &dest) {
        return Ok(());
    }
    instances::set_container(ctx.conn, &thing.id, Some(&dest))
}

fn apply_move(ctx: &Ctx, target: &Reference, node: &Value) -> Result<()> {
    let Some(entity) = resolve_entity(ctx, target) else {
        return Ok(());
    };
    let node_value = resolve_operand(ctx, node);
    let Some(node_id) = node_value.as_str() else {
        return Ok(());
    };
    let Some(node_inst) = instances::get_instance(ctx.conn, node_id)? else {
        return Ok(());
    };
    if node_inst.kind != EntityKind::Node || !node_inst.is_live() {
        return Ok(());
    }

    match entity {
        Resolved::Agent(agent) => {
            agents::set_current_node(ctx.conn, &agent.id, Some(&node_inst.id))?;
            events::append_event(
                ctx.conn,
                &agent.id,
                "system",
                &json!({
                    "message": format!("you are moved to {}", node_inst.short_description)
                }),
                ctx.now,
            )?;
            Ok(())
        }
        Resolved::Instance(inst) => {
            if inst.kind == EntityKind::Node {
                return Ok(());
            }
            if inst.id != ctx.self_id && !owner_allowed(ctx, &inst, PERM_CONTAIN) {
                return Ok(());
            }
            instances::set_container(
                ctx.conn,
                &inst.id,
                Some(&ContainerRef::Instance(node_inst.id)),
            )
        }
    }
}

fn apply_create(ctx: &Ctx, template_id: &str, at: &Reference) -> Result<()> {
    let Some(tpl) = templates::get_template(ctx.conn, template_id)? else {
        return Ok(());
    };
    let Some(owner) = &ctx.owner else {
        return Ok(());
    };
    if tpl.owner_id != owner.id {
        debug!(template = %template_id, "create skipped: rule owner does not own template");
        return Ok(());
    }
    if tpl.kind == EntityKind::Node {
        return Ok(());
    }
    let Some(dest_entity) = resolve_entity(ctx, at) else {
        return Ok(());
    };
    let dest = match &dest_entity {
        Resolved::Agent(a) => ContainerRef::Agent(a.id.clone()),
        Resolved::Instance(i) => {
            if !i.is_live() {
                return Ok(());
            }
            if i.id != ctx.self_id && !owner_allowed(ctx, i, PERM_CONTAIN) {
                return Ok(());
            }
            ContainerRef::Instance(i.id.clone())
        }
    };
    if !perms::depth_allows_child(ctx.conn, &dest) {
        return Ok(());
    }
    lifecycle::instantiate_template(ctx.conn, &tpl, Some(dest), None, ctx.now)?;
    Ok(())
}

fn apply_destroy(ctx: &Ctx, target: &Reference) -> Result<()> {
    let Some(Resolved::Instance(inst)) = resolve_entity(ctx, target) else {
        return Ok(());
    };
    if inst.id != ctx.self_id && !owner_allowed(ctx, &inst, PERM_DELETE) {
        debug!(instance = %inst.id, "destroy skipped: owner lacks delete");
        return Ok(());
    }
    lifecycle::cascade_destroy(ctx.conn, &inst.id, ctx.now)
}

fn apply_perm(
    ctx: &Ctx,
    target: &Reference,
    key: &str,
    rule: &crate::world::perms::PermRule,
) -> Result<()> {
    let Some(Resolved::Instance(inst)) = resolve_entity(ctx, target) else {
        return Ok(());
    };
    if inst.id != ctx.self_id {
        let Some(owner) = &ctx.owner else {
            return Ok(());
        };
        if !perms::agent_allowed(ctx.conn, owner, &inst, PERM_PERMS) {
            return Ok(());
        }
        // granting a permission the owner does not hold would be an
        // escalation; refuse it
        if !perms::agent_allowed(ctx.conn, owner, &inst, key) {
            return Ok(());
        }
    }
    let mut permissions = inst.permissions.clone();
    permissions.insert(key.to_string(), rule.to_value());
    instances::set_permissions(ctx.conn, &inst.id, &permissions)
}

// ---------------------------------------------------------------------------
// Helpers

/// Interpolate `{ref}` tokens; unresolvable references render empty
fn interpolate(ctx: &Ctx, text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        match rest[open..].find('}') {
            Some(close_offset) => {
                let token = &rest[open + 1..open + close_offset];
                if let Ok(reference) = Reference::parse(token) {
                    out.push_str(&display_string(&resolve(ctx, &reference)));
                }
                rest = &rest[open + close_offset + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}

fn display_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// Keep integral results integral so field JSON stays clean
fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < (i64::MAX as f64) {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}
