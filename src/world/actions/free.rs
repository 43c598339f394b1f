//! Free verbs: configure and buy_ap

use rusqlite::Connection;
use serde_json::{json, Value};

use crate::db::agents::{self, AgentRow};
use crate::types::{MashError, Result};
use crate::world::{AP_CEILING, MAX_BUY_AP, MAX_BUY_PER_CALL};

fn clamp_cap(value: i64) -> i64 {
    value.clamp(1, 100)
}

/// `configure`: profile, perception caps and the broadcast flag
pub fn configure(conn: &Connection, agent: &AgentRow, params: &Value) -> Result<Value> {
    let short = params
        .get("short_description")
        .and_then(Value::as_str)
        .unwrap_or(&agent.short_description);
    let long = params
        .get("long_description")
        .and_then(Value::as_str)
        .unwrap_or(&agent.long_description);
    if short != agent.short_description || long != agent.long_description {
        agents::set_profile(conn, &agent.id, short, long)?;
    }

    let caps = params.get("caps").and_then(Value::as_object);
    let cap = |key: &str, current: i64| -> i64 {
        caps.and_then(|c| c.get(key))
            .and_then(Value::as_i64)
            .map(clamp_cap)
            .unwrap_or(current)
    };
    let cap_agents = cap("agents", agent.cap_agents);
    let cap_links = cap("links", agent.cap_links);
    let cap_things = cap("things", agent.cap_things);
    let see_broadcasts = params
        .get("see_broadcasts")
        .and_then(Value::as_bool)
        .unwrap_or(agent.see_broadcasts);

    agents::set_perception(
        conn,
        &agent.id,
        cap_agents,
        cap_links,
        cap_things,
        see_broadcasts,
    )?;

    Ok(json!({
        "short_description": short,
        "long_description": long,
        "caps": { "agents": cap_agents, "links": cap_links, "things": cap_things },
        "see_broadcasts": see_broadcasts,
    }))
}

/// `buy_ap count`: purchase extra AP against the per-tick cap
pub fn buy_ap(conn: &Connection, agent: &AgentRow, params: &Value) -> Result<Value> {
    let count = params
        .get("count")
        .and_then(Value::as_i64)
        .ok_or_else(|| MashError::Validation("missing count".into()))?;
    if !(1..=MAX_BUY_PER_CALL).contains(&count) {
        return Err(MashError::Validation(format!(
            "count must be 1-{}",
            MAX_BUY_PER_CALL
        )));
    }
    if agent.purchased_ap_this_tick + count > MAX_BUY_AP {
        return Err(MashError::Policy("AP purchase cap reached this tick".into()));
    }

    let ap = (agent.ap + count).min(AP_CEILING);
    let purchased = agent.purchased_ap_this_tick + count;
    agents::set_ap(conn, &agent.id, ap)?;
    agents::set_purchased_ap(conn, &agent.id, purchased)?;

    Ok(json!({ "ap": ap, "purchased_ap_this_tick": purchased }))
}
