//! Tick phases: counters, reaping, world tick, queue drain, GC

mod common;

use serde_json::json;

use mash::db::{agents, events, instances, now_ms, queue, world_state};
use mash::world::tick::run_tick;
use mash::world::{IDLE_TIMEOUT_MS, MAX_AP};

#[test]
fn tick_advances_counters_and_resets_ap() {
    let db = common::setup();
    let alice = common::signup(&db, "alice");

    db.with_conn(|conn| {
        agents::set_ap(conn, &alice.agent_id, 0)?;
        agents::set_purchased_ap(conn, &alice.agent_id, 7)
    })
    .unwrap();

    let summary = run_tick(&db).unwrap();
    assert_eq!(summary.tick_number, 1);

    let row = common::agent(&db, &alice.agent_id);
    assert_eq!(row.ap, MAX_AP);
    assert_eq!(row.purchased_ap_this_tick, 0);

    let (tick, last_at) = db
        .with_conn(|conn| {
            Ok((
                world_state::get_tick_number(conn)?,
                world_state::get_last_tick_at(conn)?,
            ))
        })
        .unwrap();
    assert_eq!(tick, 1);
    assert!(last_at > 0);

    assert_eq!(run_tick(&db).unwrap().tick_number, 2);
}

#[test]
fn idle_agents_are_reaped_to_limbo() {
    let db = common::setup();
    let alice = common::signup(&db, "alice");

    db.with_conn(|conn| {
        agents::touch(conn, &alice.agent_id, now_ms() - IDLE_TIMEOUT_MS - 1000)
    })
    .unwrap();

    let summary = run_tick(&db).unwrap();
    assert_eq!(summary.reaped, 1);

    let row = common::agent(&db, &alice.agent_id);
    assert!(row.current_node_id.is_none());

    let drained = db
        .with_conn(|conn| events::drain_events(conn, &alice.agent_id, 10))
        .unwrap();
    assert!(drained.iter().any(|e| e.event_type == "system"));
}

#[test]
fn queued_create_resolves_as_an_action_result() {
    let db = common::setup();
    let alice = common::signup(&db, "alice");

    let ordinal = db
        .with_conn_mut(|conn| {
            let tick = world_state::get_tick_number(conn)?;
            queue::enqueue(
                conn,
                &alice.agent_id,
                "create",
                &json!({
                    "type": "template",
                    "name": "door",
                    "template_type": "link",
                    "short_description": "a red door",
                    "fields": { "destination": alice.home_node_id },
                }),
                tick + 1,
                now_ms(),
            )
        })
        .unwrap();

    let summary = run_tick(&db).unwrap();
    assert_eq!(summary.drained, 1);

    let drained = db
        .with_conn(|conn| events::drain_events(conn, &alice.agent_id, 10))
        .unwrap();
    let result = drained
        .iter()
        .find(|e| e.event_type == "action_result")
        .expect("action_result event");
    assert_eq!(result.data["action"], "create");
    assert_eq!(result.data["action_id"], json!(ordinal));
    assert!(result.data["result"]["template_id"].is_string());

    // the queue row is gone
    let remaining = db
        .with_conn(|conn| queue::due_entries(conn, i64::MAX))
        .unwrap();
    assert!(remaining.is_empty());
}

#[test]
fn queued_actions_resolve_in_enqueue_order() {
    let db = common::setup();
    let alice = common::signup(&db, "alice");

    db.with_conn_mut(|conn| {
        let tick = world_state::get_tick_number(conn)?;
        for name in ["first", "second", "third"] {
            queue::enqueue(
                conn,
                &alice.agent_id,
                "create",
                &json!({ "type": "template", "name": name, "template_type": "thing" }),
                tick + 1,
                now_ms(),
            )?;
        }
        Ok(())
    })
    .unwrap();

    run_tick(&db).unwrap();

    let drained = db
        .with_conn(|conn| events::drain_events(conn, &alice.agent_id, 10))
        .unwrap();
    let ids: Vec<i64> = drained
        .iter()
        .filter(|e| e.event_type == "action_result")
        .map(|e| e.data["action_id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids.len(), 3);
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn failing_action_yields_an_error_result_not_a_crash() {
    let db = common::setup();
    let alice = common::signup(&db, "alice");

    db.with_conn_mut(|conn| {
        let tick = world_state::get_tick_number(conn)?;
        queue::enqueue(
            conn,
            &alice.agent_id,
            "delete",
            &json!({ "target_id": "no-such-id" }),
            tick + 1,
            now_ms(),
        )
    })
    .unwrap();

    run_tick(&db).unwrap();

    let drained = db
        .with_conn(|conn| events::drain_events(conn, &alice.agent_id, 10))
        .unwrap();
    let result = drained
        .iter()
        .find(|e| e.event_type == "action_result")
        .expect("action_result event");
    assert!(result.data["result"]["error"].is_string());
}

#[test]
fn actions_from_limbo_are_skipped() {
    let db = common::setup();
    let alice = common::signup(&db, "alice");

    db.with_conn_mut(|conn| {
        agents::set_current_node(conn, &alice.agent_id, None)?;
        let tick = world_state::get_tick_number(conn)?;
        queue::enqueue(
            conn,
            &alice.agent_id,
            "create",
            &json!({ "type": "template", "name": "x", "template_type": "thing" }),
            tick + 1,
            now_ms(),
        )
    })
    .unwrap();

    run_tick(&db).unwrap();

    let drained = db
        .with_conn(|conn| events::drain_events(conn, &alice.agent_id, 10))
        .unwrap();
    assert!(drained.iter().all(|e| e.event_type != "action_result"));
}

#[test]
fn interaction_budget_caps_tick_rules_at_four() {
    let db = common::setup();
    let alice = common::signup(&db, "alice");

    // five identical tick rules; only four may run
    let rules: Vec<_> = (0..5)
        .map(|_| json!({ "on": "tick", "do": [["add", "self.hits", 1]] }))
        .collect();
    let template_id = common::run_queued(
        &db,
        &alice.agent_id,
        "create",
        json!({
            "type": "template",
            "name": "ticker",
            "template_type": "thing",
            "interactions": rules,
        }),
    )
    .unwrap()["template_id"]
        .as_str()
        .unwrap()
        .to_string();
    let instance_id = common::run_queued(
        &db,
        &alice.agent_id,
        "create",
        json!({ "type": "instance", "template_id": template_id }),
    )
    .unwrap()["instance_id"]
        .as_str()
        .unwrap()
        .to_string();

    run_tick(&db).unwrap();

    let inst = db
        .with_conn(|conn| Ok(instances::get_instance(conn, &instance_id)?.unwrap()))
        .unwrap();
    assert_eq!(inst.interactions_used_this_tick, 4);
    assert_eq!(inst.fields.get("hits"), Some(&json!(4)));
}

#[test]
fn old_events_are_garbage_collected() {
    let db = common::setup();
    let alice = common::signup(&db, "alice");

    db.with_conn(|conn| {
        events::append_event(conn, &alice.agent_id, "system", &json!({}), 0)?;
        events::append_event(conn, &alice.agent_id, "system", &json!({}), now_ms())
    })
    .unwrap();

    let summary = run_tick(&db).unwrap();
    assert_eq!(summary.gc_events, 1);

    let drained = db
        .with_conn(|conn| events::drain_events(conn, &alice.agent_id, 10))
        .unwrap();
    assert_eq!(drained.len(), 1);
}
