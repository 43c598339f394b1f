//! Signup and login routes

use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use crate::auth::{hash_password, mint_token, verify_password};
use crate::db::{agents, now_ms};
use crate::routes::{error_response, json_response, parse_json_body, BoxBody};
use crate::server::AppState;
use crate::types::MashError;
use crate::world::signup;

#[derive(Debug, Deserialize)]
struct Credentials {
    username: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct SignupResponse {
    agent_id: String,
    token: String,
    home_node_id: String,
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    agent_id: String,
    token: String,
}

fn parse_credentials(body: Value) -> Result<Credentials, MashError> {
    serde_json::from_value(body)
        .map_err(|_| MashError::BadRequest("username and password required".into()))
}

fn validate_username(username: &str) -> Result<(), MashError> {
    if username.is_empty() || username.len() > 32 {
        return Err(MashError::Validation(
            "username must be 1-32 characters".into(),
        ));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(MashError::Validation(
            "username may contain letters, digits, _ and -".into(),
        ));
    }
    Ok(())
}

/// POST /auth/signup
pub async fn handle_signup(
    state: Arc<AppState>,
    req: Request<hyper::body::Incoming>,
) -> Response<BoxBody> {
    let creds = match parse_json_body(req).await.and_then(parse_credentials) {
        Ok(c) => c,
        Err(e) => return error_response(e),
    };
    if let Err(e) = validate_username(&creds.username) {
        return error_response(e);
    }
    if creds.password.len() < 8 {
        return error_response(MashError::Validation(
            "password must be at least 8 characters".into(),
        ));
    }

    let password_hash = match hash_password(&creds.password) {
        Ok(h) => h,
        Err(e) => return error_response(e),
    };
    let token = mint_token();
    let now = now_ms();

    let outcome = state.db.with_conn_mut(|conn| {
        signup::create_account(conn, &creds.username, &password_hash, &token, now)
    });

    match outcome {
        Ok(outcome) => {
            info!(username = %creds.username, agent = %outcome.agent_id, "agent signed up");
            json_response(
                StatusCode::OK,
                &SignupResponse {
                    agent_id: outcome.agent_id,
                    token,
                    home_node_id: outcome.home_node_id,
                },
            )
        }
        Err(e) if e.is_result_error() => {
            json_response(StatusCode::OK, &serde_json::json!({ "error": e.to_string() }))
        }
        Err(e) => error_response(e),
    }
}

/// POST /auth/login
pub async fn handle_login(
    state: Arc<AppState>,
    req: Request<hyper::body::Incoming>,
) -> Response<BoxBody> {
    let creds = match parse_json_body(req).await.and_then(parse_credentials) {
        Ok(c) => c,
        Err(e) => return error_response(e),
    };

    let result = state.db.with_conn(|conn| {
        let agent = agents::get_agent_by_username(conn, &creds.username)?
            .ok_or_else(|| MashError::Unauthorized("invalid credentials".into()))?;
        if !verify_password(&creds.password, &agent.password_hash)? {
            return Err(MashError::Unauthorized("invalid credentials".into()));
        }
        // rotate the token on every login
        let token = mint_token();
        agents::set_token(conn, &agent.id, &token)?;
        agents::touch(conn, &agent.id, now_ms())?;
        Ok(LoginResponse {
            agent_id: agent.id,
            token,
        })
    });

    match result {
        Ok(response) => {
            info!(username = %creds.username, "agent logged in");
            json_response(StatusCode::OK, &response)
        }
        Err(e) => error_response(e),
    }
}
