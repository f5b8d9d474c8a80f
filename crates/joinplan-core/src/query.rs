//! # Query Block
//!
//! A query block is the join graph plus everything that happens after the joins:
//! grouping, HAVING, DISTINCT, ORDER BY and LIMIT/OFFSET, along with the statement
//! flags that influence planning. It is the unit `find_best_plan` plans.

use crate::error::{PlannerError, Result};
use crate::graph::{BoolExpr, ItemId, JoinGraph};
use crate::orderings::OrderElement;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryBlock {
    pub graph: JoinGraph,
    #[serde(default)]
    pub select_list: Vec<ItemId>,
    #[serde(default)]
    pub group_by: Vec<OrderElement>,
    /// Aggregates without GROUP BY (implicit grouping).
    #[serde(default)]
    pub has_aggregates: bool,
    #[serde(default)]
    pub rollup: bool,
    #[serde(default)]
    pub having: Option<BoolExpr>,
    #[serde(default)]
    pub distinct: bool,
    #[serde(default)]
    pub order_by: Vec<OrderElement>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: u64,
    /// SQL_CALC_FOUND_ROWS: LIMIT must still count every row.
    #[serde(default)]
    pub calc_found_rows: bool,
    /// SQL_BUFFER_RESULT: materialize the result before sending it.
    #[serde(default)]
    pub buffer_result: bool,
    #[serde(default = "default_true")]
    pub outermost: bool,
    #[serde(default)]
    pub uses_fulltext: bool,
    #[serde(default)]
    pub uses_window_functions: bool,
}

impl QueryBlock {
    pub fn new(graph: JoinGraph) -> Self {
        Self {
            graph,
            select_list: Vec::new(),
            group_by: Vec::new(),
            has_aggregates: false,
            rollup: false,
            having: None,
            distinct: false,
            order_by: Vec::new(),
            limit: None,
            offset: 0,
            calc_found_rows: false,
            buffer_result: false,
            outermost: true,
            uses_fulltext: false,
            uses_window_functions: false,
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| PlannerError::invalid_graph(e.to_string()))
    }

    pub fn is_grouped(&self) -> bool {
        self.is_explicitly_grouped() || self.has_aggregates
    }

    pub fn is_explicitly_grouped(&self) -> bool {
        !self.group_by.is_empty()
    }

    pub fn is_ordered(&self) -> bool {
        !self.order_by.is_empty()
    }

    pub fn has_limit_or_offset(&self) -> bool {
        self.limit.is_some() || self.offset > 0
    }
}

fn default_true() -> bool {
    true
}
