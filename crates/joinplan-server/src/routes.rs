//! # HTTP Route Handlers
//!
//! ## Planning Pipeline
//!
//! `POST /plan` and `POST /plan/join-graph` share the same steps:
//!
//! 1. **Decode**: Deserialize the request into a `QueryBlock` and table statistics.
//! 2. **Configure**: Use the request's `PlannerConfig` or the server default.
//! 3. **Plan**: Run `Planner::find_best_plan` with an `InMemoryCostOracle`.
//! 4. **Render**: Return the explain text and the JSON operator tree.
//!
//! ## Error Handling
//!
//! - 400 Bad Request: the query or its graph is at fault (every user-facing `PlannerError`)
//! - 500 Internal Server Error: a planner bookkeeping invariant broke

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use joinplan_core::stats::Statistics;
use joinplan_core::{InMemoryCostOracle, Plan, Planner, PlannerConfig, PlannerError, QueryBlock};

use crate::state::AppState;

/// GET /health
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

/// GET /config
pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<PlannerConfig> {
    Json(state.config.clone())
}

/// Request body for `POST /plan`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanRequest {
    pub query: QueryBlock,
    /// Statistics keyed by table alias. Tables without an entry get default estimates.
    #[serde(default)]
    pub tables: HashMap<String, Statistics>,
    /// Overrides the server configuration for this request only.
    pub config: Option<PlannerConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanResponse {
    pub explain: String,
    pub cost: f64,
    pub rows: f64,
    pub best_rowcount: f64,
    pub num_subsets: usize,
    pub plan: serde_json::Value,
}

impl From<&Plan> for PlanResponse {
    fn from(plan: &Plan) -> Self {
        Self {
            explain: plan.explain(),
            cost: plan.cost(),
            rows: plan.rows(),
            best_rowcount: plan.best_rowcount(),
            num_subsets: plan.num_subsets(),
            plan: plan.to_json(),
        }
    }
}

/// POST /plan
pub async fn plan_query(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PlanRequest>,
) -> Result<Json<PlanResponse>, (StatusCode, String)> {
    let config = req.config.unwrap_or_else(|| state.config.clone());
    let plan = run_planner(&req.query, req.tables, config)?;
    Ok(Json(PlanResponse::from(&plan)))
}

/// Plans `query` against an oracle built from `tables`.
pub(crate) fn run_planner(
    query: &QueryBlock,
    tables: HashMap<String, Statistics>,
    config: PlannerConfig,
) -> Result<Plan, (StatusCode, String)> {
    let oracle = tables
        .into_iter()
        .fold(InMemoryCostOracle::new(), |oracle, (alias, stats)| oracle.with_table(alias, stats));
    tracing::debug!(
        tables = query.graph.nodes.len(),
        edges = query.graph.edges.len(),
        "planning request"
    );
    Planner::new(Arc::new(oracle), config)
        .find_best_plan(query)
        .map_err(error_response)
}

pub(crate) fn error_response(err: PlannerError) -> (StatusCode, String) {
    if err.is_user_error() {
        (StatusCode::BAD_REQUEST, err.to_string())
    } else {
        tracing::error!("planning failed: {}", err);
        (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}
