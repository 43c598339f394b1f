//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo for async handling; routing is a plain
//! match on (method, path).

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::config::Args;
use crate::db::WorldDb;
use crate::routes::{self, BoxBody};
use crate::types::MashError;
use crate::world::tick::TickWaiters;

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub db: Arc<WorldDb>,
    /// `/wait` handles released by tick phase 6
    pub waiters: Arc<TickWaiters>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(args: Args, db: Arc<WorldDb>, waiters: Arc<TickWaiters>) -> Self {
        Self {
            args,
            db,
            waiters,
            started_at: Instant::now(),
        }
    }
}

/// Start the HTTP server
pub async fn run(state: Arc<AppState>) -> Result<(), MashError> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        "MASH listening on {} as node {}",
        state.args.listen, state.args.node_id
    );

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, req).await }
                    });

                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        debug!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    req: Request<Incoming>,
) -> Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    debug!("{} {}", method, path);

    let response = match (method, path.as_str()) {
        (Method::GET, "/health") | (Method::GET, "/healthz") => {
            routes::health::health_check(Arc::clone(&state))
        }

        (Method::OPTIONS, _) => routes::cors_preflight(),

        (Method::POST, "/auth/signup") => {
            routes::auth_routes::handle_signup(Arc::clone(&state), req).await
        }
        (Method::POST, "/auth/login") => {
            routes::auth_routes::handle_login(Arc::clone(&state), req).await
        }

        (Method::POST, "/poll") => routes::action::handle_poll(Arc::clone(&state), req).await,
        (Method::POST, "/wait") => routes::action::handle_wait(Arc::clone(&state), req).await,

        (Method::POST, p) if p.starts_with("/action/") => {
            let verb = p.strip_prefix("/action/").unwrap_or("").to_string();
            if verb.is_empty() || verb.contains('/') {
                routes::not_found_response(&path)
            } else {
                routes::action::handle_action(Arc::clone(&state), req, verb).await
            }
        }

        _ => routes::not_found_response(&path),
    };

    Ok(response)
}
