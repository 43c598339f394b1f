//! Health check endpoint

use hyper::{Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;

use crate::db::world_state;
use crate::routes::{json_response, BoxBody};
use crate::server::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub tick_number: i64,
    /// Seconds since startup
    pub uptime: u64,
    pub version: &'static str,
}

/// Handle `GET /health`
pub fn health_check(state: Arc<AppState>) -> Response<BoxBody> {
    let tick_number = state
        .db
        .with_conn(|conn| world_state::get_tick_number(conn))
        .unwrap_or(0);

    let response = HealthResponse {
        status: "ok",
        tick_number,
        uptime: state.started_at.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION"),
    };

    json_response(StatusCode::OK, &response)
}
