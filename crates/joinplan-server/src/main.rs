//! # joinplan-server: HTTP Service for the Join Planner
//!
//! Exposes the hypergraph join planner as a network service. A caller sends either a
//! full query block (join graph plus post-join clauses) or the simplified table/join
//! protocol, and gets back the chosen plan.
//!
//! ```text
//! caller
//!   |
//!   | HTTP POST /plan (QueryBlock + table statistics, JSON)
//!   v
//! joinplan-server (this binary)
//!   |
//!   +-> InMemoryCostOracle built from the request statistics
//!   +-> Planner::find_best_plan (enumerate, cost, assemble)
//!   |
//!   | HTTP response (explain text + JSON operator tree)
//!   v
//! caller
//! ```
//!
//! ## Endpoints
//!
//! - `GET  /health`            - Health check
//! - `GET  /config`            - Active planner configuration
//! - `POST /plan`              - Plan a query block
//! - `POST /plan/join-graph`   - Order joins for the simplified table/join protocol
//!
//! ## Configuration
//!
//! The server listens on `0.0.0.0:3000` unless `JOINPLAN_ADDR` says otherwise.
//! `JOINPLAN_CONFIG` may hold a JSON `PlannerConfig`; missing fields keep their
//! defaults. Logging is controlled by `RUST_LOG` (defaults to `joinplan=debug`).

mod join_graph;
mod routes;
mod state;

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

const DEFAULT_ADDR: &str = "0.0.0.0:3000";

fn app(state: Arc<state::AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/config", get(routes::get_config))
        .route("/plan", post(routes::plan_query))
        .route("/plan/join-graph", post(join_graph::plan_join_graph))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("joinplan=debug".parse()?))
        .init();

    let state = Arc::new(state::AppState::from_env());
    let addr = std::env::var("JOINPLAN_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("joinplan-server listening on http://{}", addr);
    axum::serve(listener, app(state)).await?;
    Ok(())
}
