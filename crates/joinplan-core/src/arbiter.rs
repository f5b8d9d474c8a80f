//! # Plan Arbiter
//!
//! The arbiter is the receiver of the subgraph enumerator. It owns the memo and the
//! path arena for one compilation and turns every enumerator event into candidate
//! access paths:
//!
//! - **Single node**: a table scan (or the virtual-table equivalent), index lookups
//!   using only constants, parametrized index lookups on the outer tables referenced by
//!   sargable predicates, and full scans of ordered indexes whose order is interesting.
//! - **Subgraph pair**: hash joins and nested-loop joins for every pair of candidates of
//!   the two halves, in both orientations when the join is commutative.
//!
//! Every candidate then goes through predicate application, the optional secondary
//! engine hook, and the dominance tournament of its subset. A candidate that survives
//! is also offered pre-sorted for each sort-ahead ordering it could satisfy.
//!
//! ## Predicates
//!
//! A WHERE predicate is applied as soon as its eligibility set is present: on the base
//! table when the set is exactly that table, otherwise on the first join containing the
//! whole set. In between it travels as a *delayed* predicate on both halves; a
//! predicate delayed on both sides of a join is ready to be checked there.
//!
//! Predicates that contain materializable subqueries give a second sibling per
//! candidate, with the subqueries materialized once in an explicit filter.
//!
//! ## Cancellation
//!
//! The first error (a forbidden join order, the subset ceiling, a hook failure, a broken
//! invariant) is stored and every later callback asks the enumerator to abort.

use crate::bitset::{
    bits_set_in, find_lowest_bit_set, is_subset, nonzero_subsets_of, overlaps, popcount,
    table_bitmap, NodeMap, PredicateMap, PSEUDO_TABLE_BITS, RAND_TABLE_BIT,
};
use crate::config::PlannerConfig;
use crate::cost::{
    estimate_materialize_cost, estimate_sort_cost, find_output_rows_for_join, hash_join_cost,
    hash_table_fits, nested_loop_cost,
};
use crate::dominance::propose_access_path;
use crate::enumerate::SubgraphReceiver;
use crate::error::{PlannerError, Result};
use crate::graph::{EdgeConditionRef, ItemKind, JoinEdge, JoinGraph, JoinType, SargablePredicate, TableKind};
use crate::interesting::InterestingOrders;
use crate::memo::Memo;
use crate::oracle::CostOracle;
use crate::orderings::{FdSet, LogicalOrderings};
use crate::path::{
    AccessPath, AccessPathType, FilterCondition, JoinConditionRef, MaterializeSource, PathArena,
    PathId, PathKind,
};
use crate::secondary::{HookVerdict, SecondaryEngine};
use std::mem::swap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Rows assumed for virtual tables that report none.
const VIRTUAL_TABLE_ROWS: f64 = 1000.0;

/// Feeds a candidate through the secondary engine (if any) and then the tournament.
#[derive(Clone, Copy)]
pub struct Proposer<'a> {
    pub graph: &'a JoinGraph,
    pub engine: Option<&'a SecondaryEngine>,
    pub compare_row_counts: bool,
}

impl<'a> Proposer<'a> {
    pub fn supports(&self, path_type: AccessPathType) -> bool {
        self.engine
            .map_or(true, |engine| engine.supported_access_paths.contains(path_type))
    }

    /// Returns the id of the stored path if it survived.
    pub fn propose(
        &self,
        orderings: &LogicalOrderings,
        arena: &mut PathArena,
        mut path: AccessPath,
        existing: &mut Vec<PathId>,
        description: &str,
    ) -> Result<Option<PathId>> {
        if !self.supports(path.path_type()) {
            trace!("{} [{}] is not supported by the secondary engine", description, path.summary());
            return Ok(None);
        }
        if let Some(hook) = self.engine.and_then(|engine| engine.cost_hook.as_deref()) {
            match hook.modify_access_path_cost(self.graph, &mut path) {
                Ok(HookVerdict::Accept) => {}
                Ok(HookVerdict::Reject) => {
                    trace!("{} [{}] rejected by the secondary engine", description, path.summary());
                    return Ok(None);
                }
                Err(message) => return Err(PlannerError::SecondaryEngine { message }),
            }
        }
        Ok(propose_access_path(
            arena,
            orderings,
            self.compare_row_counts,
            path,
            existing,
            description,
        )
        .kept())
    }
}

/// Whether a sort over `nodes` must carry row IDs instead of whole rows, and for which
/// tables. Rows with blobs or wider than `max_length_for_sort_data` are not copied.
pub fn row_id_sort(graph: &JoinGraph, nodes: NodeMap, max_length_for_sort_data: f64) -> (bool, NodeMap) {
    let tables = nodes & graph.all_tables();
    let use_row_ids = bits_set_in(tables).any(|idx| graph.nodes[idx].has_blobs)
        || graph.bytes_per_row(tables) > max_length_for_sort_data;
    (use_row_ids, if use_row_ids { tables } else { 0 })
}

/// The join conditions evaluated by one join: the enumerated edge plus, for inner
/// joins, every other inner edge connecting the same two halves.
#[derive(Debug, Clone)]
struct JoinPredicate {
    join_type: JoinType,
    commutative: bool,
    edges: Arc<[usize]>,
    selectivity: f64,
    functional_dependencies: FdSet,
    /// Conditions a hash join evaluates after the probe.
    num_filter_conditions: usize,
}

fn connects(edge: &JoinEdge, left: NodeMap, right: NodeMap) -> bool {
    (is_subset(edge.left, left) && is_subset(edge.right, right))
        || (is_subset(edge.left, right) && is_subset(edge.right, left))
}

/// Straight joins only constrain the order; they execute as inner joins.
fn executed_join_type(join_type: JoinType) -> JoinType {
    match join_type {
        JoinType::StraightInner => JoinType::Inner,
        other => other,
    }
}

fn leaf_path(kind: PathKind, rows: f64, cost: f64) -> AccessPath {
    let mut path = AccessPath::new(kind);
    path.num_output_rows = rows;
    path.num_output_rows_before_filter = rows;
    path.cost = cost;
    path.cost_before_filter = cost;
    path
}

/// Moves the pending filter of `path` into an explicit filter node that materializes
/// its subqueries once. `materialize_cost` is paid on the first execution only.
pub(crate) fn materialize_filter_subqueries(
    arena: &mut PathArena,
    path: AccessPath,
    materialize_cost: f64,
) -> AccessPath {
    let mut child = path.clone();
    child.num_output_rows = path.num_output_rows_before_filter;
    child.cost = path.cost_before_filter;
    child.filter_predicates = 0;
    let child_id = arena.push(child);

    let mut filter = AccessPath::wrapping(
        PathKind::Filter {
            child: child_id,
            condition: FilterCondition::Predicates(path.filter_predicates),
            materialize_subqueries: true,
        },
        &path,
    );
    filter.num_output_rows_before_filter = path.num_output_rows_before_filter;
    filter.cost_before_filter = path.cost_before_filter;
    filter.cost += materialize_cost;
    filter.init_cost += materialize_cost;
    filter.init_once_cost += materialize_cost;
    filter.delayed_predicates = path.delayed_predicates;
    filter.applied_sargable_join_predicates = path.applied_sargable_join_predicates;
    filter.subsumed_sargable_join_predicates = path.subsumed_sargable_join_predicates;
    filter
}

pub struct PlanArbiter<'a> {
    graph: &'a JoinGraph,
    oracle: &'a dyn CostOracle,
    config: &'a PlannerConfig,
    interesting: &'a mut InterestingOrders,
    engine: Option<&'a SecondaryEngine>,
    memo: Memo,
    arena: PathArena,
    /// The recursive reference, if any; it must stay on the outer side of every join.
    forced_leftmost_table: NodeMap,
    error: Option<PlannerError>,
}

impl<'a> PlanArbiter<'a> {
    pub fn new(
        graph: &'a JoinGraph,
        oracle: &'a dyn CostOracle,
        config: &'a PlannerConfig,
        interesting: &'a mut InterestingOrders,
        engine: Option<&'a SecondaryEngine>,
    ) -> Self {
        Self {
            graph,
            oracle,
            config,
            interesting,
            engine,
            memo: Memo::new(),
            arena: PathArena::new(),
            forced_leftmost_table: 0,
            error: None,
        }
    }

    pub fn memo(&self) -> &Memo {
        &self.memo
    }

    pub fn arena(&self) -> &PathArena {
        &self.arena
    }

    pub fn take_error(&mut self) -> Option<PlannerError> {
        self.error.take()
    }

    pub fn into_parts(self) -> (Memo, PathArena) {
        (self.memo, self.arena)
    }

    fn proposer(&self) -> Proposer<'a> {
        Proposer {
            graph: self.graph,
            engine: self.engine,
            compare_row_counts: self.config.compare_row_counts,
        }
    }

    fn record(&mut self, result: Result<()>) -> bool {
        match result {
            Ok(()) => false,
            Err(err) => {
                debug!("Aborting enumeration: {}", err);
                self.error = Some(err);
                true
            }
        }
    }

    // ---------------------------------------------------------------------
    // Single tables
    // ---------------------------------------------------------------------

    fn on_single_node(&mut self, node_idx: usize) -> Result<()> {
        let graph = self.graph;
        let node = &graph.nodes[node_idx];
        self.propose_table_scan(node_idx)?;
        if node.kind != TableKind::Base || node.no_index_access {
            return Ok(());
        }

        let my_map = table_bitmap(node_idx);
        for (index_idx, index) in node.indexes.iter().enumerate() {
            self.propose_ref_access(node_idx, index_idx, 0)?;

            // Outer tables that could supply a value for some keypart of this index.
            let wanted = node
                .sargable_predicates
                .iter()
                .filter(|sp| match graph.items[sp.field].kind {
                    ItemKind::Column { column, .. } => index.keyparts.contains(&column),
                    _ => false,
                })
                .map(|sp| graph.items[sp.other_side].used_tables())
                .filter(|&tables| !overlaps(tables, PSEUDO_TABLE_BITS | my_map))
                .fold(0, |wanted, tables| wanted | tables);
            for allowed in nonzero_subsets_of(wanted) {
                self.propose_ref_access(node_idx, index_idx, allowed)?;
            }

            self.propose_ordered_index_scan(node_idx, index_idx)?;
        }
        Ok(())
    }

    fn propose_table_scan(&mut self, node_idx: usize) -> Result<()> {
        let graph = self.graph;
        let model = &self.config.cost_model;
        let node = &graph.nodes[node_idx];
        let my_map = table_bitmap(node_idx);
        let rows = self.oracle.row_count_estimate(node);
        let scan_cost = self.oracle.table_scan_cost(node);

        let (path, description) = match &node.kind {
            TableKind::Base => (
                leaf_path(PathKind::TableScan { node: node_idx }, rows, scan_cost),
                "table scan",
            ),
            TableKind::RecursiveReference => {
                if self.forced_leftmost_table != 0 {
                    return Err(PlannerError::invalid_graph(
                        "a query block can contain only one recursive reference",
                    ));
                }
                self.forced_leftmost_table = my_map;
                (
                    leaf_path(
                        PathKind::FollowTail { node: node_idx },
                        rows.max(VIRTUAL_TABLE_ROWS),
                        scan_cost,
                    ),
                    "follow tail",
                )
            }
            TableKind::InformationSchema => {
                let rows = if rows > 0.0 { rows } else { VIRTUAL_TABLE_ROWS };
                let table_path = self.arena.push(leaf_path(
                    PathKind::TableScan { node: node_idx },
                    rows,
                    scan_cost,
                ));
                let mut path = leaf_path(
                    PathKind::MaterializeInformationSchema {
                        node: node_idx,
                        table_path,
                    },
                    rows,
                    scan_cost,
                );
                path.init_cost = scan_cost;
                path.init_once_cost = scan_cost;
                (path, "information schema")
            }
            TableKind::TableFunction { used_tables } => {
                let rows = if rows > 0.0 { rows } else { VIRTUAL_TABLE_ROWS };
                let table_path = self.arena.push(leaf_path(
                    PathKind::TableScan { node: node_idx },
                    rows,
                    scan_cost,
                ));
                let mut path = leaf_path(
                    PathKind::MaterializedTableFunction {
                        node: node_idx,
                        table_path,
                    },
                    rows,
                    scan_cost,
                );
                path.init_cost = scan_cost;
                path.init_once_cost = scan_cost;
                path.parameter_tables = used_tables & !PSEUDO_TABLE_BITS & !my_map;
                // Reading outer references or nondeterministic input: re-run per row, never hash.
                if overlaps(*used_tables, PSEUDO_TABLE_BITS) {
                    path.parameter_tables |= RAND_TABLE_BIT;
                }
                (path, "table function")
            }
            TableKind::Derived {
                lateral_deps,
                blocks,
            } => {
                let total_rows: f64 = blocks.iter().map(|block| block.rows).sum();
                let temp_scan_cost = model.temp_table_scan_cost(total_rows);
                let table_path = self.arena.push(leaf_path(
                    PathKind::TableScan { node: node_idx },
                    total_rows,
                    temp_scan_cost,
                ));
                let mut path = AccessPath::new(PathKind::Materialize {
                    source: MaterializeSource::DerivedTable {
                        node: node_idx,
                        table_path,
                    },
                });
                estimate_materialize_cost(model, blocks, temp_scan_cost, &mut path);
                path.parameter_tables = lateral_deps & !PSEUDO_TABLE_BITS & !my_map;
                (path, "derived table")
            }
        };

        self.propose_base_table_path(node_idx, path, 0, 0, description)
    }

    /// Proposes an index lookup on `index` whose non-constant keyparts come from exactly
    /// the tables in `allowed`.
    fn propose_ref_access(&mut self, node_idx: usize, index_idx: usize, allowed: NodeMap) -> Result<()> {
        let graph = self.graph;
        let node = &graph.nodes[node_idx];
        let index = &node.indexes[index_idx];
        if popcount(allowed) > index.keyparts.len() {
            return Ok(());
        }

        let mut matched: Vec<SargablePredicate> = Vec::new();
        let mut parameter_tables: NodeMap = 0;
        for &keypart in &index.keyparts {
            let found = node.sargable_predicates.iter().find_map(|sp| {
                match graph.items[sp.field].kind {
                    ItemKind::Column { column, .. } if column == keypart => {}
                    _ => return None,
                }
                let other_side = &graph.items[sp.other_side];
                if other_side.is_const_for_execution() {
                    Some((*sp, 0))
                } else if other_side.is_field() && is_subset(other_side.used_tables(), allowed) {
                    Some((*sp, other_side.used_tables()))
                } else {
                    None
                }
            });
            match found {
                Some((sp, tables)) => {
                    matched.push(sp);
                    parameter_tables |= tables;
                }
                None => break,
            }
        }

        if matched.is_empty() || parameter_tables != allowed {
            return Ok(());
        }
        if index.whole_key_only && matched.len() < index.keyparts.len() {
            trace!(
                "{} on {} needs all {} keyparts, only {} usable",
                index.name,
                node.alias,
                index.keyparts.len(),
                matched.len()
            );
            return Ok(());
        }

        let mut rows = self.oracle.row_count_estimate(node);
        let mut applied: PredicateMap = 0;
        let mut subsumed: PredicateMap = 0;
        for sp in &matched {
            let bit = 1u64 << sp.predicate_index;
            if overlaps(applied, bit) {
                continue;
            }
            rows *= graph.predicates[sp.predicate_index].selectivity();
            applied |= bit;
            let lookup_subsumes = match graph.items[sp.field].kind {
                ItemKind::Column { column, .. } => node.columns[column].lookup_subsumes_comparison,
                _ => false,
            };
            if lookup_subsumes {
                subsumed |= bit;
            }
        }

        // Equality lookups reject NULLs, so a unique key matched in full yields one row.
        let single_row = index.unique && matched.len() == index.keyparts.len();
        if single_row {
            rows = rows.min(1.0);
        }
        let worst_seeks = 3.0 * self.oracle.table_scan_cost(node);
        let cost = self
            .oracle
            .index_scan_cost(node, index, 1.0, rows.ceil())
            .min(worst_seeks);

        let mut path = leaf_path(
            PathKind::Ref {
                node: node_idx,
                index: index_idx,
                key_length: matched.len(),
                eq_ref: single_row,
                applied,
                subsumed,
            },
            rows,
            cost,
        );
        path.parameter_tables = parameter_tables & !table_bitmap(node_idx);

        let description = if allowed == 0 {
            format!("ref access on {}", index.name)
        } else {
            format!("ref access on {} parametrized on 0x{:x}", index.name, allowed)
        };
        self.propose_base_table_path(node_idx, path, applied, subsumed, &description)
    }

    fn propose_ordered_index_scan(&mut self, node_idx: usize, index_idx: usize) -> Result<()> {
        if !self.config.enable_ordered_index_scans {
            return Ok(());
        }
        let Some(&ordering_idx) = self.interesting.index_orderings.get(&(node_idx, index_idx)) else {
            return Ok(());
        };
        let graph = self.graph;
        let my_map = table_bitmap(node_idx);
        let node_fds = graph.predicates[..graph.num_where_predicates]
            .iter()
            .filter(|p| p.eligibility_set == my_map)
            .fold(0, |fds, p| fds | p.functional_dependencies);
        let orderings = &mut self.interesting.orderings;
        let state = orderings.set_order(ordering_idx);
        let with_fds = orderings.apply_fds(state, node_fds);
        if !orderings.follows_any_interesting_order(with_fds) {
            return Ok(());
        }

        let node = &graph.nodes[node_idx];
        let index = &node.indexes[index_idx];
        let rows = self.oracle.row_count_estimate(node);
        let cost = self.oracle.index_scan_cost(node, index, 1.0, rows);
        let mut path = leaf_path(
            PathKind::IndexScan {
                node: node_idx,
                index: index_idx,
            },
            rows,
            cost,
        );
        path.ordering_state = state;
        let description = format!("index scan on {}", index.name);
        self.propose_base_table_path(node_idx, path, 0, 0, &description)
    }

    /// Applies the WHERE predicates of the table to `path` and proposes the result, plus
    /// a sibling with materialized subqueries when any applied predicate has some.
    fn propose_base_table_path(
        &mut self,
        node_idx: usize,
        path: AccessPath,
        applied: PredicateMap,
        subsumed: PredicateMap,
        description: &str,
    ) -> Result<()> {
        let my_map = table_bitmap(node_idx);
        let where_mask = self.graph.where_predicates();
        for materialize_subqueries in [false, true] {
            let (mut candidate, filters, fds) = self.apply_predicates_for_base_table(
                node_idx,
                &path,
                applied,
                subsumed,
                materialize_subqueries,
            );
            candidate.ordering_state = self
                .interesting
                .orderings
                .apply_fds(candidate.ordering_state, fds);
            candidate.applied_sargable_join_predicates |= applied & !where_mask;
            candidate.subsumed_sargable_join_predicates |= subsumed & !where_mask;

            if materialize_subqueries {
                let description = format!("{}, mat. subq", description);
                self.propose_access_path_with_orderings(my_map, fds, candidate, &description)?;
            } else {
                self.propose_access_path_with_orderings(my_map, fds, candidate, description)?;
            }
            if !overlaps(filters, self.graph.materializable_predicates) {
                break;
            }
        }
        Ok(())
    }

    /// Returns the filtered path, the predicates it filters on, and the FDs they activate.
    fn apply_predicates_for_base_table(
        &mut self,
        node_idx: usize,
        base: &AccessPath,
        applied: PredicateMap,
        subsumed: PredicateMap,
        materialize_subqueries: bool,
    ) -> (AccessPath, PredicateMap, FdSet) {
        let graph = self.graph;
        let config = self.config;
        let my_map = table_bitmap(node_idx);

        let mut path = base.clone();
        path.num_output_rows = path.num_output_rows_before_filter;
        path.cost = path.cost_before_filter;
        path.filter_predicates = 0;
        path.delayed_predicates = 0;

        let mut fds: FdSet = 0;
        let mut materialize_cost = 0.0;
        for (pred_idx, predicate) in graph.predicates[..graph.num_where_predicates].iter().enumerate() {
            let bit = 1u64 << pred_idx;
            if overlaps(subsumed, bit) {
                if predicate.eligibility_set == my_map {
                    fds |= predicate.functional_dependencies;
                } else {
                    path.delayed_predicates |= bit;
                }
                continue;
            }
            if predicate.eligibility_set == my_map {
                path.filter_predicates |= bit;
                let cost = config.cost_model.filter_cost(
                    path.num_output_rows,
                    &predicate.expr,
                    config.max_heap_table_size,
                );
                if materialize_subqueries {
                    path.cost += cost.cost_if_materialized;
                    materialize_cost += cost.cost_to_materialize;
                } else {
                    path.cost += cost.cost_if_not_materialized;
                }
                if !overlaps(applied, bit) {
                    path.num_output_rows *= predicate.selectivity();
                }
                fds |= predicate.functional_dependencies;
            } else if overlaps(predicate.eligibility_set, my_map) {
                path.delayed_predicates |= bit;
            }
        }

        let filters = path.filter_predicates;
        if materialize_subqueries {
            path = materialize_filter_subqueries(&mut self.arena, path, materialize_cost);
        }
        (path, filters, fds)
    }

    // ---------------------------------------------------------------------
    // Joins
    // ---------------------------------------------------------------------

    fn join_predicate(&self, left: NodeMap, right: NodeMap, edge_idx: usize) -> Option<JoinPredicate> {
        let graph = self.graph;
        let edge = &graph.edges[edge_idx];
        let joined = left | right;

        let edges: Arc<[usize]> = if edge.join_type.is_inner() {
            // Cycles: every inner edge between the two halves is evaluated by this join,
            // and only the lowest-numbered one produces it.
            let connecting: Vec<usize> = graph
                .edges
                .iter()
                .enumerate()
                .filter(|(_, e)| {
                    e.join_type.is_inner()
                        && connects(e, left, right)
                        && graph.passes_conflict_rules(joined, e)
                })
                .map(|(idx, _)| idx)
                .collect();
            if connecting.first() != Some(&edge_idx) {
                return None;
            }
            connecting.into()
        } else {
            if !graph.passes_conflict_rules(joined, edge) {
                return None;
            }
            Arc::from([edge_idx])
        };

        let mut predicate = JoinPredicate {
            join_type: edge.join_type,
            commutative: true,
            edges: Arc::clone(&edges),
            selectivity: 1.0,
            functional_dependencies: 0,
            num_filter_conditions: 0,
        };
        for &idx in edges.iter() {
            let e = &graph.edges[idx];
            predicate.commutative &= e.join_type.is_commutative();
            predicate.selectivity *= e.selectivity();
            predicate.functional_dependencies |= e.functional_dependencies;
            predicate.num_filter_conditions += e.join_conditions.len();
        }
        Some(predicate)
    }

    fn on_subgraph_pair(&mut self, left: NodeMap, right: NodeMap, edge_idx: usize) -> Result<()> {
        let graph = self.graph;
        let Some(join) = self.join_predicate(left, right, edge_idx) else {
            return Ok(());
        };
        // A join that would open one subset too many is refused before any costing.
        if self.memo.len() >= self.config.max_subsets && !self.memo.contains(left | right) {
            return Err(PlannerError::GraphTooLarge {
                limit: self.config.max_subsets,
            });
        }

        let (mut left, mut right) = (left, right);
        // The enumerator does not know which side of a directed edge is which.
        if !join.commutative && !is_subset(graph.edges[edge_idx].left, left) {
            swap(&mut left, &mut right);
        }

        let mut is_commutative = join.commutative;
        if overlaps(right, self.forced_leftmost_table) {
            if !is_commutative {
                let node_idx = find_lowest_bit_set(self.forced_leftmost_table);
                return Err(PlannerError::ForbiddenJoinOrder {
                    table: graph.nodes[node_idx].alias.clone(),
                });
            }
            swap(&mut left, &mut right);
        }
        if overlaps(left, self.forced_leftmost_table) {
            is_commutative = false;
        }

        let (Some(left_set), Some(right_set)) = (self.memo.get(left), self.memo.get(right)) else {
            return Err(PlannerError::internal(format!(
                "subsets 0x{:x} and 0x{:x} joined before being planned",
                left, right
            )));
        };
        let new_fds = left_set.active_functional_dependencies
            | right_set.active_functional_dependencies
            | join.functional_dependencies;
        let left_paths = left_set.paths.clone();
        let right_paths = right_set.paths.clone();

        trace!(
            "Found sets 0x{:x} and 0x{:x}, connected by {} join over {} edge(s)",
            left,
            right,
            join.join_type.name(),
            join.edges.len()
        );

        let hook_active = self.engine.is_some_and(|engine| engine.cost_hook.is_some());
        for &left_id in &left_paths {
            for &right_id in &right_paths {
                if is_commutative && !hook_active {
                    // Same total cost either way; hashing the smaller side starts sooner.
                    if self.arena[left_id].num_output_rows < self.arena[right_id].num_output_rows {
                        self.propose_hash_join(right, left, right_id, left_id, &join, new_fds)?;
                    } else {
                        self.propose_hash_join(left, right, left_id, right_id, &join, new_fds)?;
                    }
                } else {
                    self.propose_hash_join(left, right, left_id, right_id, &join, new_fds)?;
                    if is_commutative {
                        self.propose_hash_join(right, left, right_id, left_id, &join, new_fds)?;
                    }
                }

                self.propose_nested_loop_join(left, right, left_id, right_id, &join, new_fds)?;
                if is_commutative {
                    self.propose_nested_loop_join(right, left, right_id, left_id, &join, new_fds)?;
                }
            }
        }
        Ok(())
    }

    /// `right` is the build side.
    fn propose_hash_join(
        &mut self,
        left: NodeMap,
        right: NodeMap,
        left_id: PathId,
        right_id: PathId,
        join: &JoinPredicate,
        new_fds: FdSet,
    ) -> Result<()> {
        if !self.proposer().supports(AccessPathType::HashJoin) {
            return Ok(());
        }
        let left_path = self.arena[left_id].clone();
        let right_path = self.arena[right_id].clone();
        // Parametrized paths can only be resolved by a nested loop; outside
        // parameters are allowed on the probe side only.
        if overlaps(left_path.parameter_tables, right) || right_path.parameter_tables != 0 {
            return Ok(());
        }

        let rows = find_output_rows_for_join(
            left_path.num_output_rows,
            right_path.num_output_rows,
            join.join_type,
            join.selectivity,
            1.0,
        );
        let reusable_hash_table = hash_table_fits(
            self.graph.bytes_per_row(right),
            right_path.num_output_rows,
            self.config.join_buffer_size,
        );
        let cost = hash_join_cost(
            &self.config.cost_model,
            &left_path,
            &right_path,
            rows,
            join.num_filter_conditions,
            reusable_hash_table,
        );

        let mut path = AccessPath::new(PathKind::HashJoin {
            outer: left_id,
            inner: right_id,
            join_type: executed_join_type(join.join_type),
            edges: Arc::clone(&join.edges),
            reusable_hash_table,
        });
        path.num_output_rows = rows;
        path.num_output_rows_before_filter = rows;
        path.cost = cost.cost;
        path.cost_before_filter = cost.cost;
        path.init_cost = cost.init_cost;
        path.init_once_cost = cost.init_once_cost;
        path.parameter_tables = (left_path.parameter_tables | right_path.parameter_tables)
            & !(left | right | PSEUDO_TABLE_BITS);
        // Hash joins may spill to disk, which loses every ordering, even the probe side's.
        path.ordering_state = 0;

        self.propose_join_with_delayed_predicates(
            left,
            right,
            &left_path,
            &right_path,
            path,
            new_fds,
            "hash join",
        )
    }

    /// `right` is the inner side, rescanned once per outer row.
    fn propose_nested_loop_join(
        &mut self,
        left: NodeMap,
        right: NodeMap,
        left_id: PathId,
        right_id: PathId,
        join: &JoinPredicate,
        new_fds: FdSet,
    ) -> Result<()> {
        if !self.proposer().supports(AccessPathType::NestedLoopJoin) {
            return Ok(());
        }
        let left_path = self.arena[left_id].clone();
        let right_path = self.arena[right_id].clone();
        if overlaps(left_path.parameter_tables, right) {
            return Ok(());
        }

        let (inner_id, already_applied) = self.nested_loop_inner(right_id, &right_path, join);
        let inner_filter = (inner_id != right_id).then_some(inner_id);
        let rows = find_output_rows_for_join(
            left_path.num_output_rows,
            right_path.num_output_rows,
            join.join_type,
            join.selectivity,
            already_applied,
        );
        let cost = nested_loop_cost(&left_path, &self.arena[inner_id]);

        let mut path = AccessPath::new(PathKind::NestedLoopJoin {
            outer: left_id,
            inner: inner_id,
            join_type: executed_join_type(join.join_type),
            edges: Arc::clone(&join.edges),
        });
        path.num_output_rows = rows;
        path.num_output_rows_before_filter = rows;
        path.cost = cost.cost;
        path.cost_before_filter = cost.cost;
        path.init_cost = cost.init_cost;
        path.init_once_cost = cost.init_once_cost;
        path.parameter_tables = (left_path.parameter_tables | right_path.parameter_tables)
            & !(left | right | PSEUDO_TABLE_BITS);
        path.ordering_state = left_path.ordering_state;

        self.propose_join_with_delayed_predicates(
            left,
            right,
            &left_path,
            &right_path,
            path,
            new_fds,
            "nested loop",
        )?;
        // Nothing pushed after the inner filter means no candidate was kept on top of it.
        if let Some(filter_id) = inner_filter {
            if self.arena.len() == filter_id + 1 {
                self.arena.truncate(filter_id);
            }
        }
        Ok(())
    }

    /// Wraps the inner side in a filter on the join conditions a lookup has not already
    /// checked. Returns the inner path and the selectivity the lookups already applied.
    fn nested_loop_inner(
        &mut self,
        right_id: PathId,
        right_path: &AccessPath,
        join: &JoinPredicate,
    ) -> (PathId, f64) {
        let graph = self.graph;
        let config = self.config;
        let mut already_applied = 1.0;
        let mut conditions = Vec::new();
        let mut filter_cost = 0.0;

        for &edge_idx in join.edges.iter() {
            let edge = &graph.edges[edge_idx];
            for (condition_idx, condition) in edge.equijoin_conditions.iter().enumerate() {
                let key = EdgeConditionRef {
                    edge: edge_idx,
                    condition: condition_idx,
                };
                if let Some(&pred_idx) = graph.sargable_join_predicates.get(&key) {
                    let bit = 1u64 << pred_idx;
                    if overlaps(right_path.applied_sargable_join_predicates, bit) {
                        already_applied *= condition.selectivity;
                        if overlaps(right_path.subsumed_sargable_join_predicates, bit) {
                            continue;
                        }
                    }
                }
                filter_cost += config
                    .cost_model
                    .filter_cost(right_path.num_output_rows, condition, config.max_heap_table_size)
                    .cost_if_not_materialized;
                conditions.push(JoinConditionRef {
                    edge: edge_idx,
                    condition: condition_idx,
                    equijoin: true,
                });
            }
            for (condition_idx, condition) in edge.join_conditions.iter().enumerate() {
                filter_cost += config
                    .cost_model
                    .filter_cost(right_path.num_output_rows, condition, config.max_heap_table_size)
                    .cost_if_not_materialized;
                conditions.push(JoinConditionRef {
                    edge: edge_idx,
                    condition: condition_idx,
                    equijoin: false,
                });
            }
        }

        if conditions.is_empty() {
            return (right_id, already_applied);
        }
        let mut filter = AccessPath::wrapping(
            PathKind::Filter {
                child: right_id,
                condition: FilterCondition::JoinConditions(conditions),
                materialize_subqueries: false,
            },
            right_path,
        );
        filter.cost += filter_cost;
        filter.cost_before_filter = filter.cost;
        (self.arena.push(filter), already_applied)
    }

    /// Checks the predicates delayed on both sides that the join makes ready, then
    /// proposes the join (and its materialized-subquery sibling when relevant).
    #[allow(clippy::too_many_arguments)]
    fn propose_join_with_delayed_predicates(
        &mut self,
        left: NodeMap,
        right: NodeMap,
        left_path: &AccessPath,
        right_path: &AccessPath,
        join_path: AccessPath,
        new_fds: FdSet,
        description: &str,
    ) -> Result<()> {
        let graph = self.graph;
        let config = self.config;
        let ready_tables = left | right;
        let not_where = !graph.where_predicates();

        for materialize_subqueries in [false, true] {
            let mut path = join_path.clone();
            path.applied_sargable_join_predicates = (left_path.applied_sargable_join_predicates
                | right_path.applied_sargable_join_predicates)
                & not_where;
            path.subsumed_sargable_join_predicates = (left_path.subsumed_sargable_join_predicates
                | right_path.subsumed_sargable_join_predicates)
                & not_where;
            path.delayed_predicates = left_path.delayed_predicates ^ right_path.delayed_predicates;
            path.filter_predicates = 0;

            let mut filter_fds: FdSet = 0;
            let mut materialize_cost = 0.0;
            for pred_idx in bits_set_in(left_path.delayed_predicates & right_path.delayed_predicates) {
                let predicate = &graph.predicates[pred_idx];
                let bit = 1u64 << pred_idx;
                if !is_subset(predicate.eligibility_set, ready_tables) {
                    path.delayed_predicates |= bit;
                    continue;
                }
                path.filter_predicates |= bit;
                let cost = config.cost_model.filter_cost(
                    path.num_output_rows,
                    &predicate.expr,
                    config.max_heap_table_size,
                );
                if materialize_subqueries {
                    path.cost += cost.cost_if_materialized;
                    materialize_cost += cost.cost_to_materialize;
                } else {
                    path.cost += cost.cost_if_not_materialized;
                }
                path.num_output_rows *= predicate.selectivity();
                filter_fds |= predicate.functional_dependencies;
            }

            let filters = path.filter_predicates;
            if materialize_subqueries {
                path = materialize_filter_subqueries(&mut self.arena, path, materialize_cost);
            }
            let fds = new_fds | filter_fds;
            path.ordering_state = self.interesting.orderings.apply_fds(path.ordering_state, fds);

            if materialize_subqueries {
                let description = format!("{}, mat. subq", description);
                self.propose_access_path_with_orderings(ready_tables, fds, path, &description)?;
            } else {
                self.propose_access_path_with_orderings(ready_tables, fds, path, description)?;
            }
            if !overlaps(filters, graph.materializable_predicates) {
                break;
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Proposals
    // ---------------------------------------------------------------------

    /// Runs `path` through the tournament for `nodes`, then offers it pre-sorted for
    /// every sort-ahead ordering that would make it more ordered.
    fn propose_access_path_with_orderings(
        &mut self,
        nodes: NodeMap,
        fds: FdSet,
        path: AccessPath,
        description: &str,
    ) -> Result<()> {
        let proposer = self.proposer();
        // A sort at the top is left to the post-join assembler; parametrized paths end
        // up on the inner side of a nested loop, where order is lost.
        let sort_ahead_source = (nodes != self.graph.all_tables()
            && path.parameter_tables == 0
            && !self.interesting.sort_ahead_orderings.is_empty())
        .then(|| path.clone());

        let mut existing = self.memo.take_paths(nodes);
        let result = proposer.propose(
            &self.interesting.orderings,
            &mut self.arena,
            path,
            &mut existing,
            description,
        );
        self.memo.put_paths(nodes, existing, fds)?;
        let mut child = result?;

        let Some(original) = sort_ahead_source else {
            return Ok(());
        };
        let sort_aheads = self.interesting.sort_ahead_orderings.clone();
        for sort_ahead in sort_aheads {
            if !is_subset(sort_ahead.required_nodes, nodes) {
                continue;
            }
            let orderings = &mut self.interesting.orderings;
            let ordered = orderings.set_order(sort_ahead.ordering_idx);
            let new_state = orderings.apply_fds(ordered, fds);
            if !orderings.more_ordered_than(new_state, original.ordering_state) {
                continue;
            }

            let child_id = match child {
                Some(id) => id,
                None => {
                    let id = self.arena.push(original.clone());
                    child = Some(id);
                    id
                }
            };
            let child_path = &self.arena[child_id];
            let (use_row_ids, tables_to_get_rowid_for) = row_id_sort(self.graph, nodes, self.config.max_length_for_sort_data);
            let mut sort = AccessPath::new(PathKind::Sort {
                child: child_id,
                ordering: sort_ahead.ordering_idx,
                remove_duplicates: false,
                force_sort_positions: false,
                use_row_ids,
                tables_to_get_rowid_for,
            });
            estimate_sort_cost(&self.config.cost_model, child_path, &mut sort);
            sort.ordering_state = new_state;
            sort.delayed_predicates = child_path.delayed_predicates;
            sort.applied_sargable_join_predicates = child_path.applied_sargable_join_predicates;
            sort.subsumed_sargable_join_predicates = child_path.subsumed_sargable_join_predicates;

            let description = format!("sort({}) of {}", sort_ahead.ordering_idx, description);
            let mut existing = self.memo.take_paths(nodes);
            let result = proposer.propose(
                &self.interesting.orderings,
                &mut self.arena,
                sort,
                &mut existing,
                &description,
            );
            self.memo.put_paths(nodes, existing, fds)?;
            result?;
        }
        Ok(())
    }
}

impl SubgraphReceiver for PlanArbiter<'_> {
    fn has_seen(&self, subgraph: NodeMap) -> bool {
        self.memo.contains(subgraph)
    }

    fn found_single_node(&mut self, node_idx: usize) -> bool {
        if self.error.is_some() {
            return true;
        }
        let result = self.on_single_node(node_idx);
        self.record(result)
    }

    fn found_subgraph_pair(&mut self, left: NodeMap, right: NodeMap, edge_idx: usize) -> bool {
        if self.error.is_some() {
            return true;
        }
        let result = self.on_subgraph_pair(left, right, edge_idx);
        self.record(result)
    }
}
