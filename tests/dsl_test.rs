//! Interaction DSL behaviour: conditions, effects, deny, travel, cascades

mod common;

use serde_json::{json, Value};

use mash::db::{agents, events, instances, link_usage, now_ms};
use mash::world::actions::queued;
use mash::world::perms::{self, PERM_INTERACT};

fn create_template(db: &mash::WorldDb, agent_id: &str, params: Value) -> String {
    common::run_queued(db, agent_id, "create", params).unwrap()["template_id"]
        .as_str()
        .unwrap()
        .to_string()
}

fn create_instance(db: &mash::WorldDb, agent_id: &str, params: Value) -> String {
    common::run_queued(db, agent_id, "create", params).unwrap()["instance_id"]
        .as_str()
        .unwrap()
        .to_string()
}

fn get_instance(db: &mash::WorldDb, id: &str) -> mash::db::instances::InstanceRow {
    db.with_conn(|conn| Ok(instances::get_instance(conn, id)?.expect("instance")))
        .unwrap()
}

/// A top-level node the public can enter, plus a link to it from alice's
/// home. Returns (node_id, link_id).
fn node_with_link(db: &mash::WorldDb, agent_id: &str) -> (String, String) {
    let node_tpl = create_template(
        db,
        agent_id,
        json!({
            "type": "template", "name": "plaza", "template_type": "node",
            "short_description": "a wide plaza",
        }),
    );
    let node_id = create_instance(
        db,
        agent_id,
        json!({ "type": "instance", "template_id": node_tpl }),
    );
    let link_tpl = create_template(
        db,
        agent_id,
        json!({
            "type": "template", "name": "gate", "template_type": "link",
            "short_description": "an iron gate",
            "fields": { "destination": node_id },
        }),
    );
    let link_id = create_instance(
        db,
        agent_id,
        json!({ "type": "instance", "template_id": link_tpl }),
    );
    (node_id, link_id)
}

#[test]
fn custom_verb_runs_rules_and_mutates_fields() {
    let db = common::setup();
    let alice = common::signup(&db, "alice");

    let tpl = create_template(
        &db,
        &alice.agent_id,
        json!({
            "type": "template", "name": "counter", "template_type": "thing",
            "interactions": [
                { "on": "poke", "do": [["add", "self.count", 1]] },
            ],
        }),
    );
    let inst = create_instance(
        &db,
        &alice.agent_id,
        json!({ "type": "instance", "template_id": tpl }),
    );

    common::run_queued(&db, &alice.agent_id, "poke", json!({ "target_id": inst })).unwrap();
    common::run_queued(&db, &alice.agent_id, "poke", json!({ "target_id": inst })).unwrap();

    assert_eq!(get_instance(&db, &inst).fields.get("count"), Some(&json!(2)));
}

#[test]
fn deny_aborts_the_rest_of_the_call() {
    let db = common::setup();
    let alice = common::signup(&db, "alice");

    let tpl = create_template(
        &db,
        &alice.agent_id,
        json!({
            "type": "template", "name": "stubborn", "template_type": "thing",
            "interactions": [
                { "on": "poke", "do": [["deny"]] },
                { "on": "poke", "do": [["add", "self.count", 1]] },
            ],
        }),
    );
    let inst = create_instance(
        &db,
        &alice.agent_id,
        json!({ "type": "instance", "template_id": tpl }),
    );

    let err = common::run_queued(&db, &alice.agent_id, "poke", json!({ "target_id": inst }))
        .unwrap_err();
    assert!(err.to_string().contains("refused"));

    let row = get_instance(&db, &inst);
    // the second rule never ran, but the denying rule spent one slot
    assert_eq!(row.fields.get("count"), None);
    assert_eq!(row.interactions_used_this_tick, 1);
}

#[test]
fn travel_moves_records_usage_and_broadcasts() {
    let db = common::setup();
    let alice = common::signup(&db, "alice");
    let bob = common::signup(&db, "bob");
    let (node_id, link_id) = node_with_link(&db, &alice.agent_id);

    // bob watches from alice's home
    db.with_conn(|conn| agents::set_current_node(conn, &bob.agent_id, Some(&alice.home_node_id)))
        .unwrap();

    let snapshot =
        common::run_queued(&db, &alice.agent_id, "travel", json!({ "via": link_id })).unwrap();
    assert_eq!(snapshot["type"], "node");
    assert_eq!(snapshot["id"], json!(node_id.clone()));

    let row = common::agent(&db, &alice.agent_id);
    assert_eq!(row.current_node_id.as_deref(), Some(node_id.as_str()));

    let usage = db
        .with_conn(|conn| link_usage::recent_for_agent(conn, &alice.agent_id, 10))
        .unwrap();
    assert_eq!(usage.len(), 1);
    assert_eq!(usage[0].destination_node_id, node_id);
    assert_eq!(usage[0].destination_name, "a wide plaza");

    let bob_events = db
        .with_conn(|conn| events::drain_events(conn, &bob.agent_id, 10))
        .unwrap();
    assert!(bob_events
        .iter()
        .any(|e| e.event_type == "broadcast" && e.data["message"] == "alice left"));
}

#[test]
fn travel_refunds_unused_hops() {
    let db = common::setup();
    let alice = common::signup(&db, "alice");
    let (node_id, link_id) = node_with_link(&db, &alice.agent_id);

    // a second link, voided by deleting its template
    let doomed_tpl = create_template(
        &db,
        &alice.agent_id,
        json!({
            "type": "template", "name": "doomed", "template_type": "link",
            "fields": { "destination": alice.home_node_id },
        }),
    );
    let doomed_link = create_instance(
        &db,
        &alice.agent_id,
        json!({ "type": "instance", "template_id": doomed_tpl, "container_id": node_id }),
    );
    common::run_queued(
        &db,
        &alice.agent_id,
        "delete",
        json!({ "target_id": doomed_tpl }),
    )
    .unwrap();
    assert!(get_instance(&db, &doomed_link).is_void);

    // the route pre-debits one AP per hop
    db.with_conn(|conn| agents::set_ap(conn, &alice.agent_id, 4 - 2)).unwrap();

    let result = common::run_queued(
        &db,
        &alice.agent_id,
        "travel",
        json!({ "via": [link_id, doomed_link] }),
    )
    .unwrap();

    assert_eq!(result["completed"], json!(1));
    assert_eq!(result["ap_refunded"], json!(1));
    assert_eq!(result["stopped_at"], json!(node_id.clone()));

    let row = common::agent(&db, &alice.agent_id);
    assert_eq!(row.current_node_id.as_deref(), Some(node_id.as_str()));
    assert_eq!(row.ap, 3);
}

#[test]
fn locked_link_denies_travel_but_still_broadcasts() {
    let db = common::setup();
    let alice = common::signup(&db, "alice");
    let (node_id, _) = node_with_link(&db, &alice.agent_id);

    let locked_tpl = create_template(
        &db,
        &alice.agent_id,
        json!({
            "type": "template", "name": "locked-door", "template_type": "link",
            "fields": { "destination": node_id, "locked": true },
            "interactions": [
                {
                    "on": "travel",
                    "if": [["eq", "self.locked", true]],
                    "do": [["say", "locked"], ["deny"]],
                },
            ],
        }),
    );
    let locked_link = create_instance(
        &db,
        &alice.agent_id,
        json!({ "type": "instance", "template_id": locked_tpl }),
    );

    let result = common::run_queued(
        &db,
        &alice.agent_id,
        "travel",
        json!({ "via": locked_link }),
    )
    .unwrap();
    assert_eq!(result["completed"], json!(0));
    assert_eq!(result["stopped_at"], json!(alice.home_node_id.clone()));

    // still at home, and the say broadcast was delivered
    let row = common::agent(&db, &alice.agent_id);
    assert_eq!(row.current_node_id.as_deref(), Some(alice.home_node_id.as_str()));

    let drained = db
        .with_conn(|conn| events::drain_events(conn, &alice.agent_id, 10))
        .unwrap();
    assert!(drained
        .iter()
        .any(|e| e.event_type == "broadcast" && e.data["message"] == "locked"));
}

#[test]
fn random_link_avoids_homes_and_the_current_node() {
    let db = common::setup();
    let alice = common::signup(&db, "alice");
    let _bob = common::signup(&db, "bob");
    let (node_id, _) = node_with_link(&db, &alice.agent_id);

    let home_contents = db
        .with_conn(|conn| {
            instances::contained_in(
                conn,
                &mash::db::instances::ContainerRef::Instance(alice.home_node_id.clone()),
            )
        })
        .unwrap();
    let portal = home_contents
        .iter()
        .find(|i| i.system_type == mash::db::instances::SystemType::RandomLink)
        .expect("portal");

    // the only legal candidate is the plaza: not home, not anyone's home
    let result = common::run_queued(
        &db,
        &alice.agent_id,
        "travel",
        json!({ "via": portal.id }),
    )
    .unwrap();
    assert_eq!(result["type"], "node");
    assert_eq!(result["id"], json!(node_id.clone()));

    let row = common::agent(&db, &alice.agent_id);
    assert_eq!(row.current_node_id.as_deref(), Some(node_id.as_str()));
}

#[test]
fn deleting_a_node_template_voids_evicts_and_destroys() {
    let db = common::setup();
    let alice = common::signup(&db, "alice");
    let bob = common::signup(&db, "bob");
    let (node_id, _) = node_with_link(&db, &alice.agent_id);

    // a thing inside the plaza, and bob standing in it
    let thing_tpl = create_template(
        &db,
        &alice.agent_id,
        json!({ "type": "template", "name": "statue", "template_type": "thing" }),
    );
    let thing_id = create_instance(
        &db,
        &alice.agent_id,
        json!({ "type": "instance", "template_id": thing_tpl, "container_id": node_id }),
    );
    db.with_conn(|conn| agents::set_current_node(conn, &bob.agent_id, Some(&node_id)))
        .unwrap();

    // find the plaza's template and delete it
    let plaza = get_instance(&db, &node_id);
    let plaza_tpl = plaza.template_id.expect("template");
    let result = common::run_queued(
        &db,
        &alice.agent_id,
        "delete",
        json!({ "target_id": plaza_tpl }),
    )
    .unwrap();
    assert_eq!(result["voided"], json!(1));

    let plaza = get_instance(&db, &node_id);
    assert!(plaza.is_void);
    assert!(plaza.template_id.is_none());

    let thing = get_instance(&db, &thing_id);
    assert!(thing.is_destroyed);

    let bob_row = common::agent(&db, &bob.agent_id);
    assert_eq!(bob_row.current_node_id.as_deref(), Some(bob.home_node_id.as_str()));
    let bob_events = db
        .with_conn(|conn| events::drain_events(conn, &bob.agent_id, 10))
        .unwrap();
    assert!(bob_events.iter().any(|e| e.event_type == "system"));
}

#[test]
fn take_and_drop_move_through_the_inventory() {
    let db = common::setup();
    let alice = common::signup(&db, "alice");

    let tpl = create_template(
        &db,
        &alice.agent_id,
        json!({ "type": "template", "name": "pebble", "template_type": "thing" }),
    );
    let pebble = create_instance(
        &db,
        &alice.agent_id,
        json!({ "type": "instance", "template_id": tpl }),
    );

    common::run_queued(&db, &alice.agent_id, "take", json!({ "target_id": pebble })).unwrap();
    let row = get_instance(&db, &pebble);
    assert_eq!(
        row.container,
        Some(mash::db::instances::ContainerRef::Agent(alice.agent_id.clone()))
    );

    common::run_queued(&db, &alice.agent_id, "drop", json!({ "target_id": pebble })).unwrap();
    let row = get_instance(&db, &pebble);
    assert_eq!(
        row.container,
        Some(mash::db::instances::ContainerRef::Instance(alice.home_node_id.clone()))
    );
}

#[test]
fn containment_depth_is_bounded() {
    let db = common::setup();
    let alice = common::signup(&db, "alice");

    let tpl = create_template(
        &db,
        &alice.agent_id,
        json!({ "type": "template", "name": "box", "template_type": "thing" }),
    );

    // five nested boxes fit; a sixth exceeds the depth bound
    let mut container: Option<String> = None;
    for _ in 0..5 {
        let mut params = json!({ "type": "instance", "template_id": tpl });
        if let Some(parent) = &container {
            params["container_id"] = json!(parent);
        }
        container = Some(create_instance(&db, &alice.agent_id, params));
    }

    let mut params = json!({ "type": "instance", "template_id": tpl });
    params["container_id"] = json!(container.unwrap());
    let err = common::run_queued(&db, &alice.agent_id, "create", params).unwrap_err();
    assert!(err.to_string().contains("too deep"));
}

#[test]
fn home_node_permissions_shield_strangers() {
    let db = common::setup();
    let alice = common::signup(&db, "alice");
    let bob = common::signup(&db, "bob");

    let home = get_instance(&db, &alice.home_node_id);
    let alice_row = common::agent(&db, &alice.agent_id);
    let bob_row = common::agent(&db, &bob.agent_id);

    db.with_conn(|conn| {
        assert!(perms::agent_allowed(conn, &alice_row, &home, PERM_INTERACT));
        assert!(!perms::agent_allowed(conn, &bob_row, &home, PERM_INTERACT));
        assert!(perms::agent_allowed(conn, &bob_row, &home, perms::PERM_INSPECT));
        // delete is forbidden for everyone, the owner included
        assert!(!perms::agent_allowed(conn, &alice_row, &home, perms::PERM_DELETE));
        Ok(())
    })
    .unwrap();
}

#[test]
fn reset_restores_the_home_and_clears_clutter() {
    let db = common::setup();
    let alice = common::signup(&db, "alice");

    let tpl = create_template(
        &db,
        &alice.agent_id,
        json!({ "type": "template", "name": "clutter", "template_type": "thing" }),
    );
    let clutter = create_instance(
        &db,
        &alice.agent_id,
        json!({ "type": "instance", "template_id": tpl }),
    );
    common::run_queued(
        &db,
        &alice.agent_id,
        "edit",
        json!({
            "type": "instance",
            "target_id": alice.home_node_id,
            "short_description": "a renamed lair",
        }),
    )
    .unwrap();

    common::run_queued(
        &db,
        &alice.agent_id,
        "reset",
        json!({ "target_id": alice.home_node_id }),
    )
    .unwrap();

    let home = get_instance(&db, &alice.home_node_id);
    assert_eq!(home.short_description, "your home node");
    assert!(get_instance(&db, &clutter).is_destroyed);

    // system instances survive
    let contents = db
        .with_conn(|conn| {
            instances::contained_in(
                conn,
                &mash::db::instances::ContainerRef::Instance(alice.home_node_id.clone()),
            )
        })
        .unwrap();
    let live: Vec<_> = contents.iter().filter(|i| i.is_live()).collect();
    assert_eq!(live.len(), 2);
}

#[test]
fn dsl_perm_cannot_grant_what_the_owner_lacks() {
    let db = common::setup();
    let alice = common::signup(&db, "alice");
    let bob = common::signup(&db, "bob");

    // bob's thing: alice's rules hold no perms on it
    let bob_tpl = create_template(
        &db,
        &bob.agent_id,
        json!({ "type": "template", "name": "treasure", "template_type": "thing" }),
    );
    db.with_conn(|conn| agents::set_current_node(conn, &bob.agent_id, Some(&alice.home_node_id)))
        .unwrap();
    let treasure = db
        .with_conn_mut(|conn| {
            let bob_row = agents::get_agent(conn, &bob.agent_id)?.unwrap();
            queued::create(
                conn,
                &bob_row,
                &json!({ "type": "instance", "template_id": bob_tpl }),
                now_ms(),
            )
        })
        .unwrap()["instance_id"]
        .as_str()
        .unwrap()
        .to_string();

    // alice's gadget tries to open bob's treasure to everyone
    let gadget_tpl = create_template(
        &db,
        &alice.agent_id,
        json!({
            "type": "template", "name": "gadget", "template_type": "thing",
            "interactions": [
                { "on": "zap", "do": [["perm", "subject", "edit", "any"]] },
            ],
        }),
    );
    let gadget = create_instance(
        &db,
        &alice.agent_id,
        json!({ "type": "instance", "template_id": gadget_tpl }),
    );

    common::run_queued(
        &db,
        &alice.agent_id,
        "zap",
        json!({ "target_id": gadget, "subject_id": treasure }),
    )
    .unwrap();

    // the escalation was silently swallowed
    let row = get_instance(&db, &treasure);
    assert!(row.permissions.get("edit").is_none());
}

#[test]
fn contents_reference_reads_nested_fields() {
    let db = common::setup();
    let alice = common::signup(&db, "alice");

    let battery_tpl = create_template(
        &db,
        &alice.agent_id,
        json!({
            "type": "template", "name": "battery", "template_type": "thing",
            "fields": { "charge": 9 },
        }),
    );
    let socket_tpl = create_template(
        &db,
        &alice.agent_id,
        json!({
            "type": "template", "name": "socket", "template_type": "thing",
            "interactions": [
                {
                    "on": "read",
                    "if": [["gt", format!("self.contents.t:{}.charge", battery_tpl), 5]],
                    "do": [["set", "self.powered", true]],
                },
            ],
        }),
    );
    let socket = create_instance(
        &db,
        &alice.agent_id,
        json!({ "type": "instance", "template_id": socket_tpl }),
    );
    create_instance(
        &db,
        &alice.agent_id,
        json!({ "type": "instance", "template_id": battery_tpl, "container_id": socket }),
    );

    common::run_queued(&db, &alice.agent_id, "read", json!({ "target_id": socket })).unwrap();

    assert_eq!(get_instance(&db, &socket).fields.get("powered"), Some(&json!(true)));
}
