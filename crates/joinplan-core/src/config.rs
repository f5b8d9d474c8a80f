//! Planner configuration.

use crate::cost::CostModel;
use serde::{Deserialize, Serialize};

/// Tunables for one planning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlannerConfig {
    /// Planning aborts with `GraphTooLarge` once the memo holds more subsets.
    pub max_subsets: usize,
    /// Hash tables under 90% of this size are kept across rescans.
    pub join_buffer_size: f64,
    /// Materialized subquery results above this size go to disk.
    pub max_heap_table_size: f64,
    /// Keep the output row count as a dominance dimension. Without it, a
    /// parametrized path that filters early but costs more is pruned.
    pub compare_row_counts: bool,
    /// Propose full index scans whose key order is interesting.
    pub enable_ordered_index_scans: bool,
    /// Sorts over rows wider than this many bytes carry row IDs instead of rows.
    pub max_length_for_sort_data: f64,
    pub cost_model: CostModel,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_subsets: 100_000,
            join_buffer_size: 256.0 * 1024.0,
            max_heap_table_size: 16.0 * 1024.0 * 1024.0,
            compare_row_counts: true,
            enable_ordered_index_scans: true,
            max_length_for_sort_data: 4096.0,
            cost_model: CostModel::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: PlannerConfig =
            serde_json::from_str(r#"{"maxSubsets": 500, "costModel": {"sortOneRowCost": 0.2}}"#)
                .unwrap();
        assert_eq!(config.max_subsets, 500);
        assert_eq!(config.cost_model.sort_one_row_cost, 0.2);
        assert_eq!(config.cost_model.apply_one_filter_cost, 0.1);
        assert!(config.compare_row_counts);
        assert_eq!(config.max_length_for_sort_data, 4096.0);
    }
}
