//! HTTP server exposing rate-limited and administrative routes.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::middleware::from_fn_with_state;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::middleware::{rate_limit, GateOptions, GateState, RateLimitInfo};
use crate::error::Result;
use crate::ratelimit::{ClientState, RateAccountingEngine};

/// HTTP server for the gated service.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    state: GateState,
}

impl HttpServer {
    pub fn new(addr: SocketAddr, engine: Arc<RateAccountingEngine>, options: GateOptions) -> Self {
        Self {
            addr,
            state: GateState::new(engine, options),
        }
    }

    /// The application routes.
    ///
    /// `/` is metered; `/health` and everything under `/admin` are not.
    pub fn router(&self) -> Router {
        router(self.state.clone())
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await?;
        info!(addr = %listener.local_addr()?, "HTTP server listening");

        let app = self.router();
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            e.into()
        })
    }
}

fn router(state: GateState) -> Router {
    let admin = Router::new()
        .route("/clients", get(list_clients).delete(reset_all_clients))
        .route("/clients/:id", get(client_status).delete(reset_client))
        .route("/sweep", post(sweep));

    Router::new()
        .route("/", get(index))
        .route_layer(from_fn_with_state(state.clone(), rate_limit))
        .route("/health", get(health))
        .nest("/admin", admin)
        .with_state(state)
}

async fn index(Extension(info): Extension<RateLimitInfo>) -> Json<serde_json::Value> {
    Json(json!({
        "message": "Hello!",
        "rateLimit": info,
    }))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientList {
    population: usize,
    over_limit: bool,
    /// Active clients with no requests left in their window
    exhausted: usize,
    active: Vec<ClientState>,
}

async fn list_clients(State(state): State<GateState>) -> Json<ClientList> {
    let engine = &state.engine;
    let active = engine.list_active();
    Json(ClientList {
        population: engine.population_size(),
        over_limit: engine.population_over_limit(),
        exhausted: active.iter().filter(|client| client.is_exhausted()).count(),
        active,
    })
}

async fn client_status(State(state): State<GateState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.engine.peek_status(&id) {
        Some(decision) => Json(decision).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn reset_client(State(state): State<GateState>, Path(id): Path<String>) -> StatusCode {
    state.engine.reset_client(&id);
    StatusCode::NO_CONTENT
}

async fn reset_all_clients(State(state): State<GateState>) -> StatusCode {
    state.engine.reset_all();
    StatusCode::NO_CONTENT
}

async fn sweep(State(state): State<GateState>) -> Json<serde_json::Value> {
    let removed = state.engine.sweep();
    Json(json!({ "removed": removed }))
}
