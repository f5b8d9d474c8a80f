//! # Access Paths
//!
//! An access path is one candidate way of producing the rows of a node subset: a scan,
//! an index lookup, a join of two smaller paths, or a post-join operator stacked on top.
//! Paths live in a [`PathArena`] and refer to their children by [`PathId`]. Once pushed,
//! a path is never mutated; rewrites push a modified copy. Children are shared read-only
//! between sibling candidates, and the whole arena is dropped in bulk when planning
//! for the query block ends.
//!
//! ## Cost Fields
//!
//! - `cost`: total cost of producing every row once.
//! - `init_cost`: cost paid before the first row is produced.
//! - `init_once_cost`: the part of `init_cost` that is not paid again on a rescan
//!   (a cached hash table, a materialized cacheable subquery).
//!
//! Bookkeeping invariant: `cost >= init_cost >= init_once_cost >= 0`.

use crate::bitset::{NodeMap, PredicateMap};
use crate::graph::{JoinGraph, JoinType};
use crate::orderings::{Direction, LogicalOrderings, StateIndex};
use serde::Serialize;
use std::fmt::Write;
use std::sync::Arc;

pub type PathId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AccessPathType {
    TableScan,
    IndexScan,
    Ref,
    EqRef,
    FollowTail,
    MaterializeInformationSchema,
    MaterializedTableFunction,
    Materialize,
    HashJoin,
    NestedLoopJoin,
    Filter,
    Sort,
    Aggregate,
    Stream,
    LimitOffset,
}

/// A set of access path types, e.g. the types a secondary engine can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessPathTypes(u32);

impl AccessPathTypes {
    pub fn all() -> Self {
        Self(u32::MAX)
    }

    pub fn none() -> Self {
        Self(0)
    }

    pub fn only(types: &[AccessPathType]) -> Self {
        types.iter().fold(Self::none(), |set, t| set.with(*t))
    }

    pub fn with(self, t: AccessPathType) -> Self {
        Self(self.0 | (1 << t as u32))
    }

    pub fn contains(self, t: AccessPathType) -> bool {
        self.0 & (1 << t as u32) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl Default for AccessPathTypes {
    fn default() -> Self {
        Self::all()
    }
}

/// One condition of a join edge, referenced from a nested-loop filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinConditionRef {
    pub edge: usize,
    pub condition: usize,
    /// Index into `equijoin_conditions` when set, else into `join_conditions`.
    pub equijoin: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterCondition {
    /// WHERE predicates, by index.
    Predicates(PredicateMap),
    /// Join conditions evaluated on the inner side of a nested loop.
    JoinConditions(Vec<JoinConditionRef>),
    Having { label: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum MaterializeSource {
    DerivedTable { node: usize, table_path: PathId },
    /// Grouped rows written to a temporary table so a later sort can use row IDs.
    SortingAggregates { child: PathId },
    BufferResult { child: PathId },
}

#[derive(Debug, Clone, PartialEq)]
pub enum PathKind {
    TableScan {
        node: usize,
    },
    IndexScan {
        node: usize,
        index: usize,
    },
    Ref {
        node: usize,
        index: usize,
        /// Number of keyparts used by the lookup.
        key_length: usize,
        /// Unique lookup returning at most one row.
        eq_ref: bool,
        /// Predicates used as lookup keys.
        applied: PredicateMap,
        /// Of those, predicates the lookup fully checks.
        subsumed: PredicateMap,
    },
    FollowTail {
        node: usize,
    },
    MaterializeInformationSchema {
        node: usize,
        table_path: PathId,
    },
    MaterializedTableFunction {
        node: usize,
        table_path: PathId,
    },
    Materialize {
        source: MaterializeSource,
    },
    HashJoin {
        outer: PathId,
        inner: PathId,
        join_type: JoinType,
        /// Edges whose conditions this join evaluates; the first is the enumerated edge.
        /// Shared by every candidate built for the same pair of subsets.
        edges: Arc<[usize]>,
        /// The hash table fits in the join buffer and survives rescans.
        reusable_hash_table: bool,
    },
    NestedLoopJoin {
        outer: PathId,
        inner: PathId,
        join_type: JoinType,
        edges: Arc<[usize]>,
    },
    Filter {
        child: PathId,
        condition: FilterCondition,
        materialize_subqueries: bool,
    },
    Sort {
        child: PathId,
        ordering: usize,
        remove_duplicates: bool,
        /// Sort row positions even though the row fits, to agree with a later sort.
        force_sort_positions: bool,
        /// The sort carries row IDs instead of rows.
        use_row_ids: bool,
        tables_to_get_rowid_for: NodeMap,
    },
    Aggregate {
        child: PathId,
        rollup: bool,
    },
    Stream {
        child: PathId,
    },
    LimitOffset {
        child: PathId,
        limit: Option<u64>,
        offset: u64,
        count_all_rows: bool,
    },
}

impl PathKind {
    pub fn path_type(&self) -> AccessPathType {
        match self {
            PathKind::TableScan { .. } => AccessPathType::TableScan,
            PathKind::IndexScan { .. } => AccessPathType::IndexScan,
            PathKind::Ref { eq_ref: true, .. } => AccessPathType::EqRef,
            PathKind::Ref { .. } => AccessPathType::Ref,
            PathKind::FollowTail { .. } => AccessPathType::FollowTail,
            PathKind::MaterializeInformationSchema { .. } => {
                AccessPathType::MaterializeInformationSchema
            }
            PathKind::MaterializedTableFunction { .. } => AccessPathType::MaterializedTableFunction,
            PathKind::Materialize { .. } => AccessPathType::Materialize,
            PathKind::HashJoin { .. } => AccessPathType::HashJoin,
            PathKind::NestedLoopJoin { .. } => AccessPathType::NestedLoopJoin,
            PathKind::Filter { .. } => AccessPathType::Filter,
            PathKind::Sort { .. } => AccessPathType::Sort,
            PathKind::Aggregate { .. } => AccessPathType::Aggregate,
            PathKind::Stream { .. } => AccessPathType::Stream,
            PathKind::LimitOffset { .. } => AccessPathType::LimitOffset,
        }
    }

    pub fn children(&self) -> Vec<PathId> {
        match self {
            PathKind::TableScan { .. }
            | PathKind::IndexScan { .. }
            | PathKind::Ref { .. }
            | PathKind::FollowTail { .. } => Vec::new(),
            PathKind::MaterializeInformationSchema { table_path, .. }
            | PathKind::MaterializedTableFunction { table_path, .. } => vec![*table_path],
            PathKind::Materialize { source } => match source {
                MaterializeSource::DerivedTable { table_path, .. } => vec![*table_path],
                MaterializeSource::SortingAggregates { child }
                | MaterializeSource::BufferResult { child } => vec![*child],
            },
            PathKind::HashJoin { outer, inner, .. }
            | PathKind::NestedLoopJoin { outer, inner, .. } => vec![*outer, *inner],
            PathKind::Filter { child, .. }
            | PathKind::Sort { child, .. }
            | PathKind::Aggregate { child, .. }
            | PathKind::Stream { child }
            | PathKind::LimitOffset { child, .. } => vec![*child],
        }
    }

    /// Rewrites child references through `map`.
    pub fn map_children(&self, mut map: impl FnMut(PathId) -> PathId) -> PathKind {
        let mut kind = self.clone();
        match &mut kind {
            PathKind::TableScan { .. }
            | PathKind::IndexScan { .. }
            | PathKind::Ref { .. }
            | PathKind::FollowTail { .. } => {}
            PathKind::MaterializeInformationSchema { table_path, .. }
            | PathKind::MaterializedTableFunction { table_path, .. } => *table_path = map(*table_path),
            PathKind::Materialize { source } => match source {
                MaterializeSource::DerivedTable { table_path, .. } => *table_path = map(*table_path),
                MaterializeSource::SortingAggregates { child }
                | MaterializeSource::BufferResult { child } => *child = map(*child),
            },
            PathKind::HashJoin { outer, inner, .. }
            | PathKind::NestedLoopJoin { outer, inner, .. } => {
                *outer = map(*outer);
                *inner = map(*inner);
            }
            PathKind::Filter { child, .. }
            | PathKind::Sort { child, .. }
            | PathKind::Aggregate { child, .. }
            | PathKind::Stream { child }
            | PathKind::LimitOffset { child, .. } => *child = map(*child),
        }
        kind
    }

    pub fn is_materialization(&self) -> bool {
        matches!(
            self,
            PathKind::Materialize { .. }
                | PathKind::MaterializeInformationSchema { .. }
                | PathKind::MaterializedTableFunction { .. }
        )
    }

    /// One-line, EXPLAIN-style description of the operator.
    pub fn describe(&self, graph: &JoinGraph, orderings: &LogicalOrderings) -> String {
        let alias = |node: usize| graph.nodes[node].alias.as_str();
        let index_name = |node: usize, index: usize| graph.nodes[node].indexes[index].name.as_str();
        match self {
            PathKind::TableScan { node } => format!("Table scan on {}", alias(*node)),
            PathKind::IndexScan { node, index } => {
                format!("Index scan on {} using {}", alias(*node), index_name(*node, *index))
            }
            PathKind::Ref {
                node, index, eq_ref, ..
            } => {
                let prefix = if *eq_ref { "Single-row index lookup" } else { "Index lookup" };
                format!("{} on {} using {}", prefix, alias(*node), index_name(*node, *index))
            }
            PathKind::FollowTail { node } => format!("Scan new records on {}", alias(*node)),
            PathKind::MaterializeInformationSchema { node, .. } => {
                format!("Fill information schema table {}", alias(*node))
            }
            PathKind::MaterializedTableFunction { node, .. } => {
                format!("Materialize table function {}", alias(*node))
            }
            PathKind::Materialize { source } => match source {
                MaterializeSource::DerivedTable { node, .. } => {
                    format!("Materialize derived table {}", alias(*node))
                }
                MaterializeSource::SortingAggregates { .. } => {
                    "Temporary table for grouped rows".to_string()
                }
                MaterializeSource::BufferResult { .. } => "Buffer result".to_string(),
            },
            PathKind::HashJoin {
                join_type, edges, ..
            } => {
                let name = match join_type {
                    JoinType::Semi => "Hash semijoin".to_string(),
                    JoinType::Anti => "Hash antijoin".to_string(),
                    other => format!("{} hash join", capitalize(other.name())),
                };
                format!("{} ({})", name, edge_conditions(graph, edges))
            }
            PathKind::NestedLoopJoin { join_type, .. } => match join_type {
                JoinType::Semi => "Nested loop semijoin".to_string(),
                JoinType::Anti => "Nested loop antijoin".to_string(),
                other => format!("Nested loop {} join", other.name()),
            },
            PathKind::Filter {
                condition,
                materialize_subqueries,
                ..
            } => {
                let text = match condition {
                    FilterCondition::Predicates(mask) => crate::bitset::bits_set_in(*mask)
                        .map(|idx| graph.predicates[idx].expr.label.clone())
                        .collect::<Vec<_>>()
                        .join(" and "),
                    FilterCondition::JoinConditions(conditions) => conditions
                        .iter()
                        .map(|c| {
                            let edge = &graph.edges[c.edge];
                            let list = if c.equijoin {
                                &edge.equijoin_conditions
                            } else {
                                &edge.join_conditions
                            };
                            list[c.condition].label.clone()
                        })
                        .collect::<Vec<_>>()
                        .join(" and "),
                    FilterCondition::Having { label } => label.clone(),
                };
                if *materialize_subqueries {
                    format!("Filter: ({}) [materialized subqueries]", text)
                } else {
                    format!("Filter: ({})", text)
                }
            }
            PathKind::Sort {
                ordering,
                remove_duplicates,
                use_row_ids,
                ..
            } => {
                let keys = orderings
                    .ordering(*ordering)
                    .iter()
                    .map(|e| match e.direction {
                        Direction::Asc => graph.items[e.item].label.clone(),
                        Direction::Desc => format!("{} DESC", graph.items[e.item].label),
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                let mut text = if *remove_duplicates {
                    format!("Sort with duplicate removal: {}", keys)
                } else {
                    format!("Sort: {}", keys)
                };
                if *use_row_ids {
                    text.push_str(" (row IDs)");
                }
                text
            }
            PathKind::Aggregate { rollup, .. } => {
                if *rollup {
                    "Group aggregate with rollup".to_string()
                } else {
                    "Aggregate".to_string()
                }
            }
            PathKind::Stream { .. } => "Stream results".to_string(),
            PathKind::LimitOffset { limit, offset, .. } => match (limit, offset) {
                (Some(limit), 0) => format!("Limit: {} row(s)", limit),
                (Some(limit), offset) => format!("Limit/Offset: {}/{} row(s)", limit, offset),
                (None, offset) => format!("Offset: {} row(s)", offset),
            },
        }
    }
}

fn edge_conditions(graph: &JoinGraph, edges: &[usize]) -> String {
    let labels: Vec<&str> = edges
        .iter()
        .flat_map(|&e| graph.edges[e].conditions())
        .map(|c| c.label.as_str())
        .collect();
    if labels.is_empty() {
        "no condition".to_string()
    } else {
        labels.join(" and ")
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccessPath {
    pub kind: PathKind,

    pub num_output_rows: f64,
    /// Rows before `filter_predicates` are applied.
    pub num_output_rows_before_filter: f64,
    pub cost: f64,
    pub init_cost: f64,
    pub init_once_cost: f64,
    /// Cost before `filter_predicates` are applied.
    pub cost_before_filter: f64,

    /// Tables outside this subset the path needs values from.
    pub parameter_tables: NodeMap,
    pub ordering_state: StateIndex,

    /// WHERE predicates applied on top of this path, not yet expanded into a `Filter`.
    pub filter_predicates: PredicateMap,
    /// WHERE predicates that touch this subset but need more tables.
    pub delayed_predicates: PredicateMap,
    /// Promoted join predicates already used by a lookup somewhere below.
    pub applied_sargable_join_predicates: PredicateMap,
    /// Of those, predicates the lookup fully checked.
    pub subsumed_sargable_join_predicates: PredicateMap,
}

impl AccessPath {
    pub fn new(kind: PathKind) -> Self {
        Self {
            kind,
            num_output_rows: 0.0,
            num_output_rows_before_filter: 0.0,
            cost: 0.0,
            init_cost: 0.0,
            init_once_cost: 0.0,
            cost_before_filter: 0.0,
            parameter_tables: 0,
            ordering_state: 0,
            filter_predicates: 0,
            delayed_predicates: 0,
            applied_sargable_join_predicates: 0,
            subsumed_sargable_join_predicates: 0,
        }
    }

    /// A new path of `kind` with the row estimate, costs, parameters and ordering of `from`.
    pub fn wrapping(kind: PathKind, from: &AccessPath) -> Self {
        Self {
            num_output_rows: from.num_output_rows,
            num_output_rows_before_filter: from.num_output_rows,
            cost: from.cost,
            init_cost: from.init_cost,
            init_once_cost: from.init_once_cost,
            cost_before_filter: from.cost,
            parameter_tables: from.parameter_tables,
            ordering_state: from.ordering_state,
            ..Self::new(kind)
        }
    }

    pub fn path_type(&self) -> AccessPathType {
        self.kind.path_type()
    }

    /// Short cost summary used in trace output.
    pub fn summary(&self) -> String {
        let mut text = format!(
            "{:?} cost={:.1} init_cost={:.1}",
            self.path_type(),
            self.cost,
            self.init_cost
        );
        if self.init_once_cost != self.init_cost {
            let _ = write!(text, " init_once_cost={:.1}", self.init_once_cost);
        }
        let _ = write!(text, " rows={:.1}", self.num_output_rows);
        if self.parameter_tables != 0 {
            let _ = write!(text, " parameterized=0x{:x}", self.parameter_tables);
        }
        if self.ordering_state != 0 {
            let _ = write!(text, " order={}", self.ordering_state);
        }
        text
    }

    pub fn check_cost_invariants(&self) -> Result<(), String> {
        let ok = self.cost >= self.init_cost - 1e-6
            && self.init_cost >= self.init_once_cost - 1e-6
            && self.init_once_cost >= 0.0
            && self.num_output_rows >= 0.0;
        if ok {
            Ok(())
        } else {
            Err(format!(
                "inconsistent costs on {:?}: cost={} init_cost={} init_once_cost={} rows={}",
                self.path_type(),
                self.cost,
                self.init_cost,
                self.init_once_cost,
                self.num_output_rows
            ))
        }
    }
}

/// Per-compilation storage for every access path ever kept.
#[derive(Debug, Clone, Default)]
pub struct PathArena {
    paths: Vec<AccessPath>,
}

impl PathArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, path: AccessPath) -> PathId {
        self.paths.push(path);
        self.paths.len() - 1
    }

    pub fn get(&self, id: PathId) -> &AccessPath {
        &self.paths[id]
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Drops every path from `len` on. A path is only ever referenced by paths pushed
    /// after it, so this is safe as long as nothing kept in a memo is dropped.
    pub fn truncate(&mut self, len: usize) {
        self.paths.truncate(len);
    }

    /// Every path reachable from `root`, parents before children.
    pub fn walk(&self, root: PathId) -> Vec<PathId> {
        let mut order = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            order.push(id);
            let children = self.paths[id].kind.children();
            stack.extend(children.into_iter().rev());
        }
        order
    }

    /// Indented tree with one operator per line.
    pub fn explain(&self, root: PathId, graph: &JoinGraph, orderings: &LogicalOrderings) -> String {
        let mut out = String::new();
        self.explain_into(&mut out, root, 0, graph, orderings);
        out
    }

    fn explain_into(
        &self,
        out: &mut String,
        id: PathId,
        depth: usize,
        graph: &JoinGraph,
        orderings: &LogicalOrderings,
    ) {
        let path = &self.paths[id];
        let _ = writeln!(
            out,
            "{}-> {}  (cost={:.2} rows={:.2})",
            "    ".repeat(depth),
            path.kind.describe(graph, orderings),
            path.cost,
            path.num_output_rows
        );
        for child in path.kind.children() {
            self.explain_into(out, child, depth + 1, graph, orderings);
        }
    }
}

impl std::ops::Index<PathId> for PathArena {
    type Output = AccessPath;

    fn index(&self, id: PathId) -> &AccessPath {
        &self.paths[id]
    }
}
