//! # Cost Model
//!
//! Pure, stateless cost and cardinality functions. The arbiter builds a candidate
//! path, hands its children to one of these functions, and gets back the row count
//! and the three cost figures (`cost`, `init_cost`, `init_once_cost`).
//!
//! ## Per-Row Constants
//!
//! Costs are dimensionless relative units. The per-row constants are intentionally
//! coarse and all default to 0.1; each is a named field of [`CostModel`] and can be
//! overridden through the planner configuration:
//!
//! ```text
//! apply one filter      0.1      hash build one row    0.1
//! aggregate one row     0.1      hash probe one row    0.1
//! sort one row          0.1      materialize one row   0.1
//! ```
//!
//! Temporary tables cost 0.1 per row read or written in memory and 0.5 on disk.
//!
//! ## Cost Accumulation
//!
//! Costs are additive: a path's cost includes the cost of its children. Start-up cost
//! (`init_cost`) is the part paid before the first row, and `init_once_cost` is the part
//! of that which survives a rescan.

use crate::graph::{BoolExpr, JoinType, MaterializedBlock};
use crate::path::AccessPath;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CostModel {
    /// Evaluating one condition against one row.
    pub apply_one_filter_cost: f64,
    /// Feeding one row through an aggregate.
    pub aggregate_one_row_cost: f64,
    /// Sorting one row, scaled by log2 of the input size.
    pub sort_one_row_cost: f64,
    /// Inserting one row into a hash table.
    pub hash_build_one_row_cost: f64,
    /// Probing the hash table with one row, or emitting one joined row.
    pub hash_probe_one_row_cost: f64,
    /// Writing one row into a materialized result.
    pub materialize_one_row_cost: f64,
    pub memory_temptable_row_cost: f64,
    pub disk_temptable_row_cost: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            apply_one_filter_cost: 0.1,
            aggregate_one_row_cost: 0.1,
            sort_one_row_cost: 0.1,
            hash_build_one_row_cost: 0.1,
            hash_probe_one_row_cost: 0.1,
            materialize_one_row_cost: 0.1,
            memory_temptable_row_cost: 0.1,
            disk_temptable_row_cost: 0.5,
        }
    }
}

/// The two ways of paying for a filter that contains subqueries.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FilterCost {
    /// Subqueries re-evaluated for every row.
    pub cost_if_not_materialized: f64,
    /// Materializable subqueries read from their materialized result.
    pub cost_if_materialized: f64,
    /// One-time cost of materializing the materializable subqueries.
    pub cost_to_materialize: f64,
}

impl std::ops::AddAssign for FilterCost {
    fn add_assign(&mut self, other: FilterCost) {
        self.cost_if_not_materialized += other.cost_if_not_materialized;
        self.cost_if_materialized += other.cost_if_materialized;
        self.cost_to_materialize += other.cost_to_materialize;
    }
}

/// Costs of a join operator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JoinCost {
    pub cost: f64,
    pub init_cost: f64,
    pub init_once_cost: f64,
}

impl CostModel {
    /// Cost of evaluating `condition` on `num_rows` rows.
    pub fn filter_cost(&self, num_rows: f64, condition: &BoolExpr, max_heap_table_size: f64) -> FilterCost {
        let base = num_rows * self.apply_one_filter_cost;
        let mut cost = FilterCost {
            cost_if_not_materialized: base,
            cost_if_materialized: base,
            cost_to_materialize: 0.0,
        };
        for subquery in &condition.subqueries {
            cost.cost_if_not_materialized += num_rows * subquery.cost;
            if subquery.materializable {
                let in_memory = subquery.row_width * subquery.rows < max_heap_table_size;
                cost.cost_if_materialized += self.tmptable_readwrite_cost(in_memory, 0.0, num_rows);
                cost.cost_to_materialize +=
                    subquery.cost + subquery.rows * self.materialize_one_row_cost;
            } else {
                cost.cost_if_materialized += num_rows * subquery.cost;
            }
        }
        cost
    }

    /// `n * log2(n)` sort units; a single sort unit for one row or fewer.
    pub fn sort_cost(&self, num_rows: f64) -> f64 {
        if num_rows <= 1.0 {
            self.sort_one_row_cost
        } else {
            self.sort_one_row_cost * num_rows * num_rows.log2().max(1.0)
        }
    }

    pub fn tmptable_readwrite_cost(&self, in_memory: bool, write_rows: f64, read_rows: f64) -> f64 {
        let per_row = if in_memory {
            self.memory_temptable_row_cost
        } else {
            self.disk_temptable_row_cost
        };
        (write_rows + read_rows) * per_row
    }

    /// Reading back every row of an in-memory temporary table.
    pub fn temp_table_scan_cost(&self, num_rows: f64) -> f64 {
        self.tmptable_readwrite_cost(true, 0.0, num_rows)
    }
}

/// Output rows of a join, given the selectivity already consumed below it by
/// index lookups (which must not be applied twice).
///
/// The remaining selectivity is the plain ratio of the two and is not clamped. An
/// already-applied selectivity of zero is ignored instead of divided by.
pub fn find_output_rows_for_join(
    outer_rows: f64,
    inner_rows: f64,
    join_type: JoinType,
    edge_selectivity: f64,
    already_applied_selectivity: f64,
) -> f64 {
    let selectivity = if already_applied_selectivity > 0.0 {
        edge_selectivity / already_applied_selectivity
    } else {
        edge_selectivity
    };
    match join_type {
        JoinType::Anti => outer_rows * (1.0 - selectivity),
        JoinType::Semi => outer_rows * selectivity,
        JoinType::Left => (outer_rows * inner_rows * selectivity).max(outer_rows),
        _ => outer_rows * inner_rows * selectivity,
    }
}

/// Whether a hash table over `inner_rows` rows fits in the join buffer, so that it
/// can be kept across rescans instead of being rebuilt.
pub fn hash_table_fits(bytes_per_row: f64, inner_rows: f64, join_buffer_size: f64) -> bool {
    bytes_per_row * inner_rows <= join_buffer_size * 0.9
}

pub fn hash_join_cost(
    model: &CostModel,
    outer: &AccessPath,
    inner: &AccessPath,
    output_rows: f64,
    num_join_conditions: usize,
    reusable_hash_table: bool,
) -> JoinCost {
    let build_cost = inner.cost + inner.num_output_rows * model.hash_build_one_row_cost;
    let cost = outer.cost
        + build_cost
        + (outer.num_output_rows + output_rows) * model.hash_probe_one_row_cost
        + output_rows * num_join_conditions as f64 * model.apply_one_filter_cost;
    let init_once_cost = if reusable_hash_table {
        build_cost + outer.init_once_cost
    } else {
        outer.init_once_cost + inner.init_once_cost
    };
    JoinCost {
        cost,
        init_cost: build_cost + outer.init_cost,
        init_once_cost,
    }
}

/// The inner side is set up once and rescanned for every outer row; its one-time
/// cost is not paid again on rescans. The inner side runs at least once.
pub fn nested_loop_cost(outer: &AccessPath, inner: &AccessPath) -> JoinCost {
    let inner_rescan_cost = inner.cost - inner.init_once_cost;
    JoinCost {
        cost: outer.cost + inner.init_cost + inner_rescan_cost * outer.num_output_rows.max(1.0),
        init_cost: outer.init_cost,
        init_once_cost: 0.0,
    }
}

pub fn estimate_sort_cost(model: &CostModel, child: &AccessPath, path: &mut AccessPath) {
    let sort_cost = model.sort_cost(child.num_output_rows);
    path.num_output_rows = child.num_output_rows;
    path.num_output_rows_before_filter = child.num_output_rows;
    path.cost = child.cost + sort_cost;
    path.cost_before_filter = path.cost;
    path.init_cost = path.cost;
    path.init_once_cost = 0.0;
}

pub fn estimate_aggregate_cost(model: &CostModel, child: &AccessPath, path: &mut AccessPath) {
    path.num_output_rows = child.num_output_rows;
    path.num_output_rows_before_filter = child.num_output_rows;
    path.cost = child.cost + model.aggregate_one_row_cost * child.num_output_rows;
    path.cost_before_filter = path.cost;
    path.init_cost = child.init_cost;
    path.init_once_cost = child.init_once_cost;
    path.ordering_state = child.ordering_state;
}

/// Materializing `blocks` into a temporary table and then reading it through a scan
/// costing `table_scan_cost`.
pub fn estimate_materialize_cost(
    model: &CostModel,
    blocks: &[MaterializedBlock],
    table_scan_cost: f64,
    path: &mut AccessPath,
) {
    let mut cost_for_materialize = 0.0;
    let mut cost_for_cacheable = 0.0;
    let mut num_rows = 0.0;
    for block in blocks {
        cost_for_materialize += block.cost;
        num_rows += block.rows;
        if block.cacheable {
            cost_for_cacheable += block.cost;
        }
    }
    cost_for_materialize += model.materialize_one_row_cost * num_rows;

    path.num_output_rows = num_rows;
    path.num_output_rows_before_filter = num_rows;
    path.init_cost = cost_for_materialize;
    path.init_once_cost = cost_for_cacheable;
    path.cost = cost_for_materialize + table_scan_cost.max(0.0);
    path.cost_before_filter = path.cost;
}

/// `limit` counts rows after `offset`. With `count_all_rows` the child runs to
/// completion to count every row.
pub fn estimate_limit_offset_cost(
    child: &AccessPath,
    limit: Option<u64>,
    offset: u64,
    count_all_rows: bool,
    path: &mut AccessPath,
) {
    let offset = offset as f64;
    let end = limit.map_or(f64::INFINITY, |limit| offset + limit as f64);
    path.num_output_rows = if offset >= child.num_output_rows {
        0.0
    } else {
        child.num_output_rows.min(end) - offset
    };
    path.num_output_rows_before_filter = path.num_output_rows;
    path.init_once_cost = child.init_once_cost;
    if child.num_output_rows > 0.0 {
        let running = child.cost - child.init_cost;
        let fraction_start = (offset / child.num_output_rows).min(1.0);
        let fraction_end = (end / child.num_output_rows).min(1.0);
        path.init_cost = child.init_cost + fraction_start * running;
        path.cost = child.init_cost + fraction_end * running;
    } else {
        path.init_cost = child.init_cost;
        path.cost = child.cost;
    }
    if count_all_rows {
        path.cost = child.cost;
    }
    path.cost_before_filter = path.cost;
    path.ordering_state = child.ordering_state;
    path.parameter_tables = child.parameter_tables;
}
