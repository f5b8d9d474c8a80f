//! # Table Statistics
//!
//! Statistics records consumed by cost oracles, plus the selectivity formulas used
//! by front-ends that derive predicate selectivities before handing a join graph to
//! the planner. The planner itself treats selectivities as given inputs.
//!
//! ## Selectivity Estimation
//!
//! - **Equality with a constant**: 1 / NDV (uniform distribution assumption).
//! - **Equi-join**: 1 / max(NDV_left, NDV_right), the containment assumption: the
//!   smaller domain is fully contained in the larger one.
//! - **Default**: 0.1 (10%) when no better estimate is available.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default filter selectivity when we can't determine it.
pub const DEFAULT_FILTER_SELECTIVITY: f64 = 0.1;

/// Rows assumed for a table nobody has analyzed.
pub const DEFAULT_ROW_COUNT: f64 = 1000.0;

/// Statistics for one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub row_count: f64,
    pub total_size_bytes: f64,
    #[serde(default)]
    pub column_stats: HashMap<String, ColumnStatistics>,
}

impl Statistics {
    pub fn new(row_count: f64, total_size_bytes: f64) -> Self {
        Self {
            row_count,
            total_size_bytes,
            column_stats: HashMap::new(),
        }
    }

    pub fn with_column(mut self, name: impl Into<String>, stats: ColumnStatistics) -> Self {
        self.column_stats.insert(name.into(), stats);
        self
    }

    pub fn avg_row_size(&self) -> f64 {
        if self.row_count > 0.0 {
            self.total_size_bytes / self.row_count
        } else {
            100.0
        }
    }

    /// Number of distinct values in a column; the row count when unknown.
    pub fn distinct_count(&self, column: &str) -> f64 {
        self.column_stats
            .get(column)
            .map(|cs| cs.distinct_count)
            .unwrap_or(self.row_count)
    }
}

/// Per-column statistics used for selectivity estimation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnStatistics {
    /// Number of distinct values (NDV). Used for equality selectivity: sel = 1/NDV.
    pub distinct_count: f64,
    /// Fraction of rows that are NULL [0.0, 1.0].
    #[serde(default)]
    pub null_fraction: f64,
}

impl ColumnStatistics {
    pub fn new(distinct_count: f64, null_fraction: f64) -> Self {
        Self {
            distinct_count,
            null_fraction,
        }
    }
}

/// Estimate selectivity for `column = constant`: `sel = 1 / NDV`.
///
/// Falls back to the default selectivity of 0.1 (10%) without column statistics.
pub fn equality_selectivity(stats: &Statistics, column: &str) -> f64 {
    stats
        .column_stats
        .get(column)
        .map(|cs| 1.0 / cs.distinct_count.max(1.0))
        .unwrap_or(DEFAULT_FILTER_SELECTIVITY)
}

/// Estimate selectivity for `left.column = right.column`.
///
/// When NDV information is unavailable for a column, the relation's row count is
/// used as the NDV (assuming all values are distinct).
pub fn join_equality_selectivity(
    left: &Statistics,
    left_column: &str,
    right: &Statistics,
    right_column: &str,
) -> f64 {
    let max_ndv = left
        .distinct_count(left_column)
        .max(right.distinct_count(right_column))
        .max(1.0);
    1.0 / max_ndv
}

/// Selectivity of `column IS NULL`.
pub fn is_null_selectivity(stats: &Statistics, column: &str) -> f64 {
    stats
        .column_stats
        .get(column)
        .map(|cs| cs.null_fraction)
        .unwrap_or(DEFAULT_FILTER_SELECTIVITY)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orders() -> Statistics {
        Statistics::new(1_500_000.0, 150_000_000.0)
            .with_column("o_orderkey", ColumnStatistics::new(1_500_000.0, 0.0))
            .with_column("o_custkey", ColumnStatistics::new(100_000.0, 0.0))
            .with_column("o_comment", ColumnStatistics::new(1_000.0, 0.25))
    }

    #[test]
    fn test_equality_selectivity() {
        let stats = orders();
        assert!((equality_selectivity(&stats, "o_custkey") - 1e-5).abs() < 1e-12);
        assert_eq!(
            equality_selectivity(&stats, "missing"),
            DEFAULT_FILTER_SELECTIVITY
        );
    }

    #[test]
    fn test_join_selectivity_uses_larger_domain() {
        let customer = Statistics::new(150_000.0, 15_000_000.0)
            .with_column("c_custkey", ColumnStatistics::new(150_000.0, 0.0));
        let sel = join_equality_selectivity(&orders(), "o_custkey", &customer, "c_custkey");
        assert!((sel - 1.0 / 150_000.0).abs() < 1e-15);
    }

    #[test]
    fn test_missing_column_falls_back_to_row_count() {
        let small = Statistics::new(10.0, 1_000.0);
        let sel = join_equality_selectivity(&small, "k", &small, "k");
        assert!((sel - 0.1).abs() < 1e-12);
        assert_eq!(small.avg_row_size(), 100.0);
    }

    #[test]
    fn test_is_null_selectivity() {
        assert_eq!(is_null_selectivity(&orders(), "o_comment"), 0.25);
    }
}
