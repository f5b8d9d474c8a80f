//! # joinplan-core: Hypergraph Join Planner
//!
//! Cost-based join-order and access-path selection for a single query block. The input
//! is a join hypergraph (tables, join edges with conflict rules, WHERE predicates) plus
//! the query's post-join clauses; the output is a tree of access paths covering every
//! table, with GROUP BY, HAVING, DISTINCT, ORDER BY and LIMIT applied on top.
//!
//! ## Module Overview
//!
//! - **`graph`**: The join hypergraph: nodes, edges, predicates, items and indexes.
//! - **`query`**: A query block: the graph plus its post-join clauses.
//! - **`enumerate`**: DPhyp enumeration of connected subgraph/complement pairs.
//! - **`arbiter`**: The Plan Arbiter that costs each pair and keeps Pareto-optimal paths.
//! - **`dominance`**: Path comparison and the per-subset tournament.
//! - **`memo`**: Candidate paths per subset of tables.
//! - **`path`**: Access path operators and the arena that owns them.
//! - **`cost`**: Cost functions for joins, filters, sorts, aggregation and materialization.
//! - **`orderings`**: Orderings, functional dependencies and the ordering state machine.
//! - **`interesting`**: Collection of the orderings worth tracking for a query.
//! - **`sargable`**: Discovery of predicates usable as index lookups.
//! - **`assembler`**: Post-join operators over the candidates for the whole query.
//! - **`planner`**: The [`Planner`] entry point and the resulting [`Plan`].
//! - **`secondary`**: Secondary engine restrictions and cost hook.
//! - **`oracle`** / **`stats`**: Table statistics for base-table cardinalities.

pub mod arbiter;
pub mod assembler;
pub mod bitset;
pub mod config;
pub mod cost;
pub mod dominance;
pub mod enumerate;
pub mod error;
pub mod graph;
pub mod interesting;
pub mod memo;
pub mod oracle;
pub mod orderings;
pub mod path;
pub mod planner;
pub mod query;
pub mod sargable;
pub mod secondary;
pub mod stats;

pub use config::PlannerConfig;
pub use error::{PlannerError, Result};
pub use graph::JoinGraph;
pub use oracle::{CostOracle, InMemoryCostOracle};
pub use planner::{find_best_plan, Plan, Planner};
pub use query::QueryBlock;
pub use secondary::{HookVerdict, SecondaryEngine, SecondaryEngineCostHook};
