//! Action, poll and wait routes
//!
//! Every handler here runs under a bearer token. AP is debited before
//! dispatch; the response wraps the handler payload with the envelope
//! (tick position, AP, drained events).

use hyper::header::AUTHORIZATION;
use hyper::{Request, Response, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::auth::extract_bearer;
use crate::db::agents::{self, AgentRow};
use crate::db::{now_ms, queue, world_state};
use crate::routes::{error_response, json_response, parse_json_body, BoxBody};
use crate::server::AppState;
use crate::types::{MashError, Result};
use crate::world::actions::{self, VerbClass};
use crate::world::envelope;

/// Resolve the bearer token, refresh activity, and pull a limbo agent
/// back to its home node
fn authenticate(
    state: &AppState,
    req: &Request<hyper::body::Incoming>,
) -> Result<AgentRow> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| MashError::Unauthorized("missing bearer token".into()))?;
    let token = extract_bearer(header)
        .ok_or_else(|| MashError::Unauthorized("missing bearer token".into()))?;

    state.db.with_conn(|conn| {
        let agent = agents::get_agent_by_token(conn, token)?
            .ok_or_else(|| MashError::Unauthorized("invalid token".into()))?;
        agents::touch(conn, &agent.id, now_ms())?;
        if agent.current_node_id.is_none() {
            // limbo agents re-enter at home on their next request
            agents::set_current_node(conn, &agent.id, Some(&agent.home_node_id))?;
        }
        agents::get_agent(conn, &agent.id)?
            .ok_or_else(|| MashError::Internal("agent vanished".into()))
    })
}

/// Wrap a handler payload with the envelope for one agent
fn envelope_response(state: &AppState, agent_id: &str, result: Value) -> Response<BoxBody> {
    let info = state
        .db
        .with_conn(|conn| envelope::build_info(conn, agent_id, now_ms()));
    match info {
        Ok(info) => json_response(StatusCode::OK, &json!({ "info": info, "result": result })),
        Err(e) => error_response(e),
    }
}

/// POST /action/{verb}
pub async fn handle_action(
    state: Arc<AppState>,
    req: Request<hyper::body::Incoming>,
    verb: String,
) -> Response<BoxBody> {
    let agent = match authenticate(&state, &req) {
        Ok(agent) => agent,
        Err(e) => return error_response(e),
    };
    let params = match parse_json_body(req).await {
        Ok(params) => params,
        Err(e) => return error_response(e),
    };

    let class = actions::classify(&verb);
    let cost = actions::ap_cost(&verb, &params);
    let now = now_ms();

    let result = state.db.with_conn_mut(|conn| {
        let mut fresh = agents::get_agent(conn, &agent.id)?
            .ok_or_else(|| MashError::Internal("agent vanished".into()))?;
        if fresh.ap < cost {
            return Err(MashError::Policy("no AP remaining".into()));
        }
        if cost > 0 {
            agents::set_ap(conn, &fresh.id, fresh.ap - cost)?;
            fresh.ap -= cost;
        }

        match class {
            VerbClass::Instant => actions::dispatch_instant(conn, &fresh, &verb, &params, now),
            VerbClass::Free => actions::dispatch_free(conn, &fresh, &verb, &params),
            VerbClass::Queued => {
                let tick = world_state::get_tick_number(conn)?;
                let ordinal = queue::enqueue(conn, &fresh.id, &verb, &params, tick + 1, now)?;
                debug!(agent = %fresh.id, verb = %verb, ordinal, "action queued");
                Ok(json!({
                    "queued": true,
                    "action_id": ordinal,
                    "tick_number": tick + 1,
                    "ap_remaining": fresh.ap,
                }))
            }
        }
    });

    let payload = match result {
        Ok(value) => value,
        Err(e) if e.is_result_error() => json!({ "error": e.to_string() }),
        Err(e) => return error_response(e),
    };

    envelope_response(&state, &agent.id, payload)
}

/// POST /poll: just the envelope
pub async fn handle_poll(
    state: Arc<AppState>,
    req: Request<hyper::body::Incoming>,
) -> Response<BoxBody> {
    let agent = match authenticate(&state, &req) {
        Ok(agent) => agent,
        Err(e) => return error_response(e),
    };
    if let Err(e) = parse_json_body(req).await {
        return error_response(e);
    }
    envelope_response(&state, &agent.id, json!({}))
}

/// POST /wait: long-poll until the next tick, capped at one interval
pub async fn handle_wait(
    state: Arc<AppState>,
    req: Request<hyper::body::Incoming>,
) -> Response<BoxBody> {
    let agent = match authenticate(&state, &req) {
        Ok(agent) => agent,
        Err(e) => return error_response(e),
    };
    if let Err(e) = parse_json_body(req).await {
        return error_response(e);
    }

    let rx = state.waiters.register();
    let cap = Duration::from_millis(state.args.tick_interval_ms);
    // either the tick released us or the wall-clock cap expired
    let _ = tokio::time::timeout(cap, rx).await;

    envelope_response(&state, &agent.id, json!({}))
}
