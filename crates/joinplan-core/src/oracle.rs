//! # Cost Oracle Interface
//!
//! The planner asks the storage layer three questions about each table: how much a
//! full scan costs, how much an index access over some number of ranges and rows
//! costs, and how many rows the table holds. Everything else is derived by the
//! cost model from those answers.
//!
//! ## Trait Design
//!
//! The `CostOracle` trait is intentionally narrow and used behind a trait object
//! (`&dyn CostOracle`) so that each storage engine can plug in its own adapter. The
//! calls are pure queries; the planner caches nothing across compilations.
//!
//! [`InMemoryCostOracle`] is a statistics-backed adapter keyed by table alias, used by
//! the server and the tests. Its formulas follow a page-oriented model: reading a
//! page costs `io_block_read_cost`, evaluating a row costs `row_evaluate_cost`, and an
//! index range adds one extra page read for the descent.

use crate::graph::{Index, Node};
use crate::stats::{Statistics, DEFAULT_ROW_COUNT};
use std::collections::HashMap;

/// Storage-engine cost queries.
pub trait CostOracle: Send + Sync {
    fn table_scan_cost(&self, node: &Node) -> f64;
    fn index_scan_cost(&self, node: &Node, index: &Index, ranges: f64, rows: f64) -> f64;
    fn row_count_estimate(&self, node: &Node) -> f64;
}

/// Statistics-backed oracle for testing and development.
#[derive(Debug, Clone)]
pub struct InMemoryCostOracle {
    /// Table statistics keyed by alias.
    pub table_stats: HashMap<String, Statistics>,
    pub io_block_read_cost: f64,
    pub row_evaluate_cost: f64,
    pub page_size: f64,
}

impl Default for InMemoryCostOracle {
    fn default() -> Self {
        Self {
            table_stats: HashMap::new(),
            io_block_read_cost: 1.0,
            row_evaluate_cost: 0.1,
            page_size: 16384.0,
        }
    }
}

impl InMemoryCostOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, alias: impl Into<String>, stats: Statistics) {
        self.table_stats.insert(alias.into(), stats);
    }

    pub fn with_table(mut self, alias: impl Into<String>, stats: Statistics) -> Self {
        self.add_table(alias, stats);
        self
    }

    fn row_count(&self, node: &Node) -> f64 {
        self.table_stats
            .get(&node.alias)
            .map(|s| s.row_count)
            .unwrap_or(DEFAULT_ROW_COUNT)
    }

    fn avg_row_size(&self, node: &Node) -> f64 {
        self.table_stats
            .get(&node.alias)
            .map(Statistics::avg_row_size)
            .unwrap_or(node.row_width)
    }

    fn pages(&self, bytes: f64) -> f64 {
        (bytes / self.page_size).ceil().max(1.0)
    }
}

impl CostOracle for InMemoryCostOracle {
    fn table_scan_cost(&self, node: &Node) -> f64 {
        let rows = self.row_count(node);
        self.pages(rows * self.avg_row_size(node)) * self.io_block_read_cost
            + rows * self.row_evaluate_cost
    }

    fn index_scan_cost(&self, node: &Node, _index: &Index, ranges: f64, rows: f64) -> f64 {
        ranges * self.io_block_read_cost
            + self.pages(rows * self.avg_row_size(node)) * self.io_block_read_cost
            + rows * self.row_evaluate_cost
    }

    fn row_count_estimate(&self, node: &Node) -> f64 {
        self.row_count(node)
    }
}
