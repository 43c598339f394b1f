//! The tick engine
//!
//! One tick every TICK_INTERVAL_MS. A tick is a single critical section:
//! it holds the store lock through all five store phases, then releases
//! every parked `/wait` handle.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;
use serde_json::json;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::db::instances::ContainerRef;
use crate::db::{agents, events, instances, queue, world_state, now_ms, WorldDb};
use crate::types::Result;
use crate::world::{actions, dsl};
use crate::world::{EVENT_TTL_MS, IDLE_TIMEOUT_MS, MAX_AP};

/// One-shot completion handles parked by `/wait`; drained every tick, so
/// stale entries never outlive one interval
#[derive(Default)]
pub struct TickWaiters {
    senders: Mutex<Vec<oneshot::Sender<()>>>,
}

impl TickWaiters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a waiter until the next tick completes
    pub fn register(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        if let Ok(mut senders) = self.senders.lock() {
            senders.push(tx);
        }
        rx
    }

    /// Release everyone (tick phase 6)
    pub fn release_all(&self) {
        let drained: Vec<oneshot::Sender<()>> = match self.senders.lock() {
            Ok(mut senders) => senders.drain(..).collect(),
            Err(_) => return,
        };
        for tx in drained {
            // a dropped client just discards its response
            let _ = tx.send(());
        }
    }
}

/// Summary of one tick, for logging
#[derive(Debug, Default)]
pub struct TickSummary {
    pub tick_number: i64,
    pub reaped: usize,
    pub fired: usize,
    pub drained: usize,
    pub gc_events: usize,
}

/// Run one tick against the store. Phases per the runtime contract:
/// counters, idle reaping, world tick, queue drain, garbage collection.
pub fn run_tick(db: &WorldDb) -> Result<TickSummary> {
    db.with_conn_mut(|conn| {
        let now = now_ms();
        let tick = world_state::get_tick_number(conn)? + 1;
        let mut summary = TickSummary {
            tick_number: tick,
            ..TickSummary::default()
        };

        // phase 1: advance counters, refill AP, reset budgets
        world_state::set_tick_number(conn, tick)?;
        world_state::set_last_tick_at(conn, now)?;
        agents::reset_ap_all(conn, MAX_AP)?;
        instances::reset_interaction_counters(conn)?;

        // phase 2: idle reaping
        for agent in agents::idle_agents(conn, now - IDLE_TIMEOUT_MS)? {
            agents::set_current_node(conn, &agent.id, None)?;
            events::append_event(
                conn,
                &agent.id,
                "system",
                &json!({ "message": "you drift into limbo" }),
                now,
            )?;
            summary.reaped += 1;
        }

        // phase 3: fire `tick` on every instance in an occupied node
        for node_id in agents::occupied_nodes(conn)? {
            let contents =
                instances::contained_in(conn, &ContainerRef::Instance(node_id.clone()))?;
            for inst in contents.iter().filter(|i| !i.is_void) {
                match dsl::fire(conn, &inst.id, "tick", None, None, now) {
                    Ok(_) => summary.fired += 1,
                    Err(e) => {
                        warn!(instance = %inst.id, error = %e, "tick rule failed");
                    }
                }
            }
        }

        // phase 4: drain the action queue in ordinal order
        for entry in queue::due_entries(conn, tick)? {
            drain_entry(conn, &entry, now);
            queue::delete_entry(conn, entry.ordinal)?;
            summary.drained += 1;
        }

        // phase 5: event garbage collection
        summary.gc_events = events::delete_older_than(conn, now - EVENT_TTL_MS)?;

        debug!(
            tick = summary.tick_number,
            reaped = summary.reaped,
            fired = summary.fired,
            drained = summary.drained,
            gc = summary.gc_events,
            "tick complete"
        );
        Ok(summary)
    })
}

/// Execute one queued action in its own transaction and record the
/// outcome as an `action_result` event. Never lets an error escape.
fn drain_entry(conn: &mut Connection, entry: &queue::QueueRow, now: i64) {
    let agent = match agents::get_agent(conn, &entry.agent_id) {
        Ok(Some(agent)) => agent,
        Ok(None) => {
            debug!(ordinal = entry.ordinal, "queued action for missing agent");
            return;
        }
        Err(e) => {
            error!(ordinal = entry.ordinal, error = %e, "queue drain load failed");
            return;
        }
    };
    if agent.current_node_id.is_none() {
        debug!(ordinal = entry.ordinal, agent = %agent.id, "skipping action from limbo");
        return;
    }

    let result = match conn.transaction() {
        Ok(tx) => {
            match actions::dispatch_queued(&tx, &agent, &entry.verb, &entry.params, now) {
                Ok(value) => match tx.commit() {
                    Ok(()) => value,
                    Err(e) => {
                        error!(ordinal = entry.ordinal, error = %e, "commit failed");
                        json!({ "error": "internal error" })
                    }
                },
                Err(e) => {
                    // rollback on drop; surface the reason to the agent
                    drop(tx);
                    json!({ "error": e.to_string() })
                }
            }
        }
        Err(e) => {
            error!(ordinal = entry.ordinal, error = %e, "transaction open failed");
            json!({ "error": "internal error" })
        }
    };

    let event = json!({
        "action": entry.verb,
        "action_id": entry.ordinal,
        "result": result,
    });
    if let Err(e) = events::append_event(conn, &entry.agent_id, "action_result", &event, now) {
        error!(ordinal = entry.ordinal, error = %e, "action_result append failed");
    }
}

/// Spawn the periodic tick task; phase 6 (waiter fan-out) happens after
/// the store lock is released
pub fn spawn_tick_task(
    db: Arc<WorldDb>,
    waiters: Arc<TickWaiters>,
    interval_ms: u64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // the first tick of `interval` fires immediately; skip it so the
        // first world tick lands one full period after startup
        interval.tick().await;
        loop {
            interval.tick().await;
            match run_tick(&db) {
                Ok(summary) => {
                    info!(
                        tick = summary.tick_number,
                        drained = summary.drained,
                        "tick"
                    );
                }
                Err(e) => error!(error = %e, "tick failed"),
            }
            waiters.release_all();
        }
    })
}
