//! Signup seeding, perception, chat and the AP economy

mod common;

use serde_json::{json, Value};

use mash::db::{agents, events, now_ms};
use mash::world::actions::{free, instant};
use mash::world::envelope;
use mash::world::{AP_CEILING, MAX_BUY_AP};

fn descriptions(list: &Value) -> Vec<String> {
    list.as_array()
        .unwrap()
        .iter()
        .map(|e| e["short_description"].as_str().unwrap().to_string())
        .collect()
}

#[test]
fn signup_seeds_home_with_system_instances() {
    let db = common::setup();
    let alice = common::signup(&db, "alice");
    let row = common::agent(&db, &alice.agent_id);
    assert_eq!(row.current_node_id.as_deref(), Some(alice.home_node_id.as_str()));

    let snapshot = db
        .with_conn(|conn| instant::look(conn, &row, &json!({})))
        .unwrap();

    assert_eq!(snapshot["type"], "node");
    assert_eq!(snapshot["id"], json!(alice.home_node_id));
    assert!(descriptions(&snapshot["links"]).contains(&"a shimmering portal".to_string()));
    assert!(descriptions(&snapshot["things"]).contains(&"a glowing directory".to_string()));
    assert_eq!(snapshot["agents"].as_array().unwrap().len(), 0);
}

#[test]
fn look_at_directory_lists_recent_links() {
    let db = common::setup();
    let alice = common::signup(&db, "alice");
    let row = common::agent(&db, &alice.agent_id);

    let snapshot = db
        .with_conn(|conn| instant::look(conn, &row, &json!({})))
        .unwrap();
    let directory_id = snapshot["things"][0]["id"].as_str().unwrap().to_string();

    let card = db
        .with_conn(|conn| instant::look(conn, &row, &json!({ "target": directory_id })))
        .unwrap();
    assert_eq!(card["type"], "thing");
    assert_eq!(card["recent_links"], json!([]));
}

#[test]
fn say_reaches_everyone_else_in_the_node() {
    let db = common::setup();
    let alice = common::signup(&db, "alice");
    let bob = common::signup(&db, "bob");

    // bring bob to alice's home
    db.with_conn(|conn| agents::set_current_node(conn, &bob.agent_id, Some(&alice.home_node_id)))
        .unwrap();

    let alice_row = common::agent(&db, &alice.agent_id);
    let result = db
        .with_conn(|conn| instant::say(conn, &alice_row, &json!({ "message": "hello" }), now_ms()))
        .unwrap();
    assert_eq!(result["delivered"], json!(1));

    let bob_events = db
        .with_conn(|conn| events::drain_events(conn, &bob.agent_id, 10))
        .unwrap();
    assert_eq!(bob_events.len(), 1);
    assert_eq!(bob_events[0].event_type, "chat");
    assert_eq!(bob_events[0].data["from"], "alice");
    assert_eq!(bob_events[0].data["message"], "hello");

    // the speaker is excluded
    let alice_events = db
        .with_conn(|conn| events::drain_events(conn, &alice.agent_id, 10))
        .unwrap();
    assert!(alice_events.is_empty());
}

#[test]
fn event_reads_are_destructive() {
    let db = common::setup();
    let alice = common::signup(&db, "alice");

    db.with_conn(|conn| {
        for i in 0..3 {
            events::append_event(conn, &alice.agent_id, "system", &json!({ "n": i }), now_ms())?;
        }
        Ok(())
    })
    .unwrap();

    let first = db
        .with_conn(|conn| events::drain_events(conn, &alice.agent_id, 10))
        .unwrap();
    assert_eq!(first.len(), 3);
    // ordinals strictly increase
    assert!(first.windows(2).all(|w| w[0].ordinal < w[1].ordinal));

    let second = db
        .with_conn(|conn| events::drain_events(conn, &alice.agent_id, 10))
        .unwrap();
    assert!(second.is_empty());
}

#[test]
fn configure_clamps_perception_caps() {
    let db = common::setup();
    let alice = common::signup(&db, "alice");
    let row = common::agent(&db, &alice.agent_id);

    let result = db
        .with_conn(|conn| {
            free::configure(
                conn,
                &row,
                &json!({
                    "short_description": "a chrome sphere",
                    "caps": { "agents": 500, "links": 0, "things": 7 },
                    "see_broadcasts": false,
                }),
            )
        })
        .unwrap();

    assert_eq!(result["caps"]["agents"], json!(100));
    assert_eq!(result["caps"]["links"], json!(1));
    assert_eq!(result["caps"]["things"], json!(7));

    let row = common::agent(&db, &alice.agent_id);
    assert_eq!(row.cap_agents, 100);
    assert_eq!(row.cap_links, 1);
    assert!(!row.see_broadcasts);
    assert_eq!(row.short_description, "a chrome sphere");
}

#[test]
fn buy_ap_enforces_the_per_tick_cap() {
    let db = common::setup();
    let alice = common::signup(&db, "alice");

    let buy = |count: i64| {
        let row = common::agent(&db, &alice.agent_id);
        db.with_conn(|conn| free::buy_ap(conn, &row, &json!({ "count": count })))
    };

    assert_eq!(buy(10).unwrap()["ap"], json!(14));
    assert_eq!(buy(10).unwrap()["purchased_ap_this_tick"], json!(MAX_BUY_AP));

    // cap reached: a third purchase fails
    let err = buy(1).unwrap_err();
    assert!(err.to_string().contains("cap"));

    // per-call bounds
    assert!(buy(0).is_err());
    assert!(buy(11).is_err());

    let row = common::agent(&db, &alice.agent_id);
    assert_eq!(row.ap, AP_CEILING);
    assert_eq!(row.purchased_ap_this_tick, MAX_BUY_AP);
}

#[test]
fn envelope_reports_ap_and_drains_events() {
    let db = common::setup();
    let alice = common::signup(&db, "alice");

    db.with_conn(|conn| {
        events::append_event(conn, &alice.agent_id, "system", &json!({ "message": "hi" }), now_ms())
    })
    .unwrap();

    let info = db
        .with_conn(|conn| envelope::build_info(conn, &alice.agent_id, now_ms()))
        .unwrap();

    assert_eq!(info["ap"], json!(4));
    assert_eq!(info["purchased_ap_this_tick"], json!(0));
    assert!(info["next_tick_in_ms"].as_i64().unwrap() >= 0);
    assert_eq!(info["events"].as_array().unwrap().len(), 1);

    // drained by the first envelope
    let again = db
        .with_conn(|conn| envelope::build_info(conn, &alice.agent_id, now_ms()))
        .unwrap();
    assert!(again["events"].as_array().unwrap().is_empty());
}
