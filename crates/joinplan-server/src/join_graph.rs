//! # Join-Graph Planning Endpoint
//!
//! A simplified protocol for callers that only need a join order. Instead of a full
//! `QueryBlock`, the request lists:
//!
//! - **Tables**: id, row count, size, per-column NDV statistics and optional filters
//! - **Joins**: a join type and one or more equi-join column pairs between two tables
//!
//! Join selectivities are derived from the NDVs (`1 / max(ndv_l, ndv_r)` per column
//! pair). Filters are `column = value` (`1 / ndv`) or `column IS NULL` (the column's
//! null fraction), with 0.1 for columns without statistics. The response is the chosen join tree with the algorithm picked for each join.
//!
//! ## Wire Protocol
//!
//! - Request: `POST /plan/join-graph` with JSON body (`JoinGraphRequest`)
//! - Response: JSON body (`JoinGraphResponse`) with the planned join tree

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use joinplan_core::graph::{BoolExpr, Condition, JoinEdge, JoinType};
use joinplan_core::path::{PathArena, PathId, PathKind};
use joinplan_core::stats::{
    equality_selectivity, is_null_selectivity, join_equality_selectivity, ColumnStatistics, Statistics,
};
use joinplan_core::{JoinGraph, Plan, QueryBlock};

use crate::routes::run_planner;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// JSON wire-protocol types
// ---------------------------------------------------------------------------

/// Request body for `POST /plan/join-graph`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinGraphRequest {
    pub tables: Vec<TableInfo>,
    #[serde(default)]
    pub joins: Vec<JoinInfo>,
}

/// A table in the join graph with its statistics.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableInfo {
    /// Unique identifier within the request (e.g., "t0"); used as the table alias.
    pub id: String,
    /// Table name, informational only.
    #[serde(default)]
    pub name: String,
    pub row_count: f64,
    pub size_bytes: f64,
    #[serde(default)]
    pub columns: Vec<ColumnInfo>,
    /// Indexes as lists of column names.
    #[serde(default)]
    pub indexes: Vec<IndexInfo>,
    #[serde(default)]
    pub filters: Vec<FilterInfo>,
}

/// A WHERE condition on a single column of the table.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterInfo {
    pub column: String,
    /// EQ or IS_NULL.
    pub op: String,
    /// The constant an EQ filter compares against.
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    pub name: String,
    /// Number of distinct values (NDV).
    pub ndv: f64,
    #[serde(default)]
    pub null_fraction: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

/// A join between two tables.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinInfo {
    pub left_table_id: String,
    pub right_table_id: String,
    /// INNER, STRAIGHT, LEFT, SEMI, ANTI or CROSS.
    #[serde(default = "default_join_type")]
    pub join_type: String,
    /// Equi-join column pairs, all of which must hold.
    #[serde(default)]
    pub conditions: Vec<ColumnPair>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnPair {
    pub left_column: String,
    pub right_column: String,
}

fn default_join_type() -> String {
    "INNER".to_string()
}

/// Response body from the join-graph endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinGraphResponse {
    pub tree: JoinTreeNode,
    pub cost: f64,
    pub rows: f64,
}

/// A node in the planned join tree: a table reference or a join of two subtrees.
#[derive(Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JoinTreeNode {
    Leaf {
        #[serde(rename = "tableId")]
        table_id: String,
    },
    Join {
        #[serde(rename = "joinType")]
        join_type: String,
        /// HASH or NESTED_LOOP.
        algorithm: String,
        /// Probe side for hash joins, outer side for nested loops.
        left: Box<JoinTreeNode>,
        right: Box<JoinTreeNode>,
    },
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// POST /plan/join-graph
pub async fn plan_join_graph(
    State(state): State<Arc<AppState>>,
    Json(req): Json<JoinGraphRequest>,
) -> Result<Json<JoinGraphResponse>, (StatusCode, String)> {
    if req.tables.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "Request must contain at least one table".to_string(),
        ));
    }

    let (graph, stats) = build_graph(&req)?;
    let plan = run_planner(&QueryBlock::new(graph), stats, state.config.clone())?;
    let tree = plan_to_tree(&plan, plan.root())?;

    Ok(Json(JoinGraphResponse {
        tree,
        cost: plan.cost(),
        rows: plan.rows(),
    }))
}

// ---------------------------------------------------------------------------
// Request -> join graph
// ---------------------------------------------------------------------------

/// Builds the join graph and the per-alias statistics for the oracle.
fn build_graph(
    req: &JoinGraphRequest,
) -> Result<(JoinGraph, HashMap<String, Statistics>), (StatusCode, String)> {
    let mut graph = JoinGraph::new();
    let mut stats: HashMap<String, Statistics> = HashMap::new();
    let mut node_of: HashMap<&str, usize> = HashMap::new();

    for table in &req.tables {
        if node_of.contains_key(table.id.as_str()) {
            return Err((
                StatusCode::BAD_REQUEST,
                format!("Duplicate table ID: {}", table.id),
            ));
        }
        let node = graph.add_table(table.id.as_str());
        node_of.insert(table.id.as_str(), node);

        let table_stats = table.columns.iter().fold(
            Statistics::new(table.row_count, table.size_bytes),
            |s, col| s.with_column(&col.name, ColumnStatistics::new(col.ndv, col.null_fraction)),
        );
        if table.row_count > 0.0 {
            graph.nodes[node].row_width = table.size_bytes / table.row_count;
        }
        for column in &table.columns {
            graph.column(node, &column.name);
        }
        for index in &table.indexes {
            let columns: Vec<&str> = index.columns.iter().map(String::as_str).collect();
            graph.add_index(node, &index.name, &columns, index.unique);
        }
        for filter in &table.filters {
            let predicate = filter_predicate(&mut graph, node, &table_stats, filter)?;
            graph.add_predicate(predicate);
        }
        stats.insert(table.id.clone(), table_stats);
    }

    let lookup = |id: &str| {
        node_of
            .get(id)
            .copied()
            .ok_or_else(|| (StatusCode::BAD_REQUEST, format!("Unknown table ID: {}", id)))
    };

    for join in &req.joins {
        let left = lookup(&join.left_table_id)?;
        let right = lookup(&join.right_table_id)?;
        let join_type = parse_join_type(&join.join_type)
            .ok_or_else(|| (StatusCode::BAD_REQUEST, format!("Unknown join type: {}", join.join_type)))?;

        let mut edge = JoinEdge::new(join_type, 1 << left, 1 << right);
        for pair in &join.conditions {
            let selectivity = join_equality_selectivity(
                &stats[&join.left_table_id],
                &pair.left_column,
                &stats[&join.right_table_id],
                &pair.right_column,
            );
            let l = graph.column(left, &pair.left_column);
            let r = graph.column(right, &pair.right_column);
            edge = edge.with_equijoin(graph.eq(l, r, selectivity));
        }
        graph.add_edge(edge);
    }

    Ok((graph, stats))
}

fn filter_predicate(
    graph: &mut JoinGraph,
    node: usize,
    stats: &Statistics,
    filter: &FilterInfo,
) -> Result<BoolExpr, (StatusCode, String)> {
    let item = graph.column(node, &filter.column);
    let label = graph.items[item].label.clone();
    match filter.op.to_uppercase().as_str() {
        "EQ" => {
            let value = filter.value.as_deref().ok_or_else(|| {
                (
                    StatusCode::BAD_REQUEST,
                    format!("EQ filter on {} needs a value", label),
                )
            })?;
            let constant = graph.constant(value);
            Ok(JoinGraph::eq(graph, item, constant, equality_selectivity(stats, &filter.column)))
        }
        "IS_NULL" => Ok(BoolExpr::new(
            format!("{} IS NULL", label),
            Condition::IsNull { item },
            is_null_selectivity(stats, &filter.column),
        )),
        other => Err((
            StatusCode::BAD_REQUEST,
            format!("Unknown filter operator: {}", other),
        )),
    }
}

fn parse_join_type(s: &str) -> Option<JoinType> {
    match s.to_uppercase().as_str() {
        "INNER" => Some(JoinType::Inner),
        "STRAIGHT" => Some(JoinType::StraightInner),
        "LEFT" => Some(JoinType::Left),
        "SEMI" => Some(JoinType::Semi),
        "ANTI" => Some(JoinType::Anti),
        "CROSS" => Some(JoinType::Cartesian),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Plan -> response
// ---------------------------------------------------------------------------

/// Converts the chosen plan into the response tree.
///
/// Joins map to `Join` nodes and table accesses to `Leaf` nodes. Single-input operators
/// (filters, sorts, materialization) are skipped.
fn plan_to_tree(plan: &Plan, id: PathId) -> Result<JoinTreeNode, (StatusCode, String)> {
    let arena: &PathArena = plan.arena();
    match &arena[id].kind {
        PathKind::HashJoin {
            outer,
            inner,
            join_type,
            ..
        } => Ok(JoinTreeNode::Join {
            join_type: format_join_type(*join_type),
            algorithm: "HASH".to_string(),
            left: Box::new(plan_to_tree(plan, *outer)?),
            right: Box::new(plan_to_tree(plan, *inner)?),
        }),
        PathKind::NestedLoopJoin {
            outer,
            inner,
            join_type,
            ..
        } => Ok(JoinTreeNode::Join {
            join_type: format_join_type(*join_type),
            algorithm: "NESTED_LOOP".to_string(),
            left: Box::new(plan_to_tree(plan, *outer)?),
            right: Box::new(plan_to_tree(plan, *inner)?),
        }),
        PathKind::TableScan { node }
        | PathKind::IndexScan { node, .. }
        | PathKind::Ref { node, .. }
        | PathKind::FollowTail { node }
        | PathKind::MaterializeInformationSchema { node, .. }
        | PathKind::MaterializedTableFunction { node, .. } => Ok(JoinTreeNode::Leaf {
            table_id: plan.graph().nodes[*node].alias.clone(),
        }),
        other => match other.children().as_slice() {
            [child] => plan_to_tree(plan, *child),
            children => Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                format!(
                    "Unexpected operator with {} inputs in planned join tree",
                    children.len()
                ),
            )),
        },
    }
}

fn format_join_type(jt: JoinType) -> String {
    match jt {
        JoinType::Inner => "INNER",
        JoinType::StraightInner => "STRAIGHT",
        JoinType::Left => "LEFT",
        JoinType::Semi => "SEMI",
        JoinType::Anti => "ANTI",
        JoinType::Cartesian => "CROSS",
    }
    .to_string()
}
