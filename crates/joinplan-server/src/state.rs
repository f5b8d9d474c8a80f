//! # Application State
//!
//! Shared by every request handler through `Arc`. The planner itself keeps no state
//! between requests: each request builds its own oracle from the statistics it carries,
//! so the only thing the server holds is the default [`PlannerConfig`].

use joinplan_core::PlannerConfig;

pub struct AppState {
    /// Configuration used when a request does not bring its own.
    pub config: PlannerConfig,
}

impl AppState {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    /// Reads `JOINPLAN_CONFIG` as a JSON `PlannerConfig`.
    ///
    /// An unset variable gives the defaults. A malformed one is logged and ignored
    /// rather than keeping the server from starting.
    pub fn from_env() -> Self {
        let config = match std::env::var("JOINPLAN_CONFIG") {
            Ok(json) => parse_config(&json).unwrap_or_else(|e| {
                tracing::warn!("ignoring JOINPLAN_CONFIG: {}", e);
                PlannerConfig::default()
            }),
            Err(_) => PlannerConfig::default(),
        };
        tracing::debug!(max_subsets = config.max_subsets, "planner configuration loaded");
        Self::new(config)
    }
}

fn parse_config(json: &str) -> Result<PlannerConfig, serde_json::Error> {
    serde_json::from_str(json)
}
