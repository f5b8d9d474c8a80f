//! # Post-Join Assembler
//!
//! Turns the candidates for the full table set into complete plans for the query
//! block. The steps run in execution order, each over every surviving candidate:
//!
//! 1. Final predicates: WHERE predicates that belong to no table or are
//!    nondeterministic. Pending filter masks become explicit `Filter` nodes here.
//! 2. GROUP BY: a sort (unless the order is already there) feeding a streaming aggregate.
//! 3. HAVING.
//! 4. DISTINCT and ORDER BY. Grouped rows first pass through a temporary table or a
//!    streaming buffer.
//! 5. LIMIT/OFFSET.
//!
//! After each step the new candidates go through the tournament, so a rewrite that
//! only makes a candidate worse in every dimension is pruned right away.

use crate::arbiter::{row_id_sort, Proposer};
use crate::bitset::{overlaps, NodeMap, RAND_TABLE_BIT};
use crate::config::PlannerConfig;
use crate::cost::{
    estimate_aggregate_cost, estimate_limit_offset_cost, estimate_materialize_cost, estimate_sort_cost,
};
use crate::error::{PlannerError, Result};
use crate::graph::{JoinGraph, MaterializedBlock};
use crate::interesting::InterestingOrders;
use crate::orderings::FdSet;
use crate::path::{AccessPath, FilterCondition, MaterializeSource, PathArena, PathId, PathKind};
use crate::query::QueryBlock;
use std::collections::HashMap;
use tracing::debug;

pub struct PostJoinAssembler<'a> {
    graph: &'a JoinGraph,
    query: &'a QueryBlock,
    config: &'a PlannerConfig,
    interesting: &'a mut InterestingOrders,
    arena: &'a mut PathArena,
    proposer: Proposer<'a>,
    /// Functional dependencies active once every table is joined.
    root_fds: FdSet,
    /// Paths already rewritten with explicit filters, by original id.
    expanded: HashMap<PathId, PathId>,
}

impl<'a> PostJoinAssembler<'a> {
    pub fn new(
        graph: &'a JoinGraph,
        query: &'a QueryBlock,
        config: &'a PlannerConfig,
        interesting: &'a mut InterestingOrders,
        arena: &'a mut PathArena,
        proposer: Proposer<'a>,
        root_fds: FdSet,
    ) -> Self {
        Self {
            graph,
            query,
            config,
            interesting,
            arena,
            proposer,
            root_fds,
            expanded: HashMap::new(),
        }
    }

    /// Runs every step over `roots`. The result may be empty if the secondary
    /// engine rejected everything.
    pub fn assemble(mut self, roots: &[PathId]) -> Result<Vec<PathId>> {
        let mut candidates = self.apply_final_predicates(roots)?;

        if self.query.is_grouped() {
            debug!("Applying aggregation for GROUP BY");
            candidates = self.apply_group_by(candidates)?;
        }
        if self.query.having.is_some() {
            debug!("Applying filter for HAVING");
            candidates = self.apply_having(candidates)?;
        }
        if self.query.distinct || self.query.is_ordered() {
            candidates = self.apply_distinct_and_order(candidates)?;
        }
        if self.query.has_limit_or_offset() {
            debug!("Applying LIMIT");
            candidates = self.apply_limit(candidates)?;
        }
        Ok(candidates)
    }

    fn propose(&mut self, path: AccessPath, candidates: &mut Vec<PathId>, description: &str) -> Result<()> {
        self.proposer.propose(
            &self.interesting.orderings,
            self.arena,
            path,
            candidates,
            description,
        )?;
        Ok(())
    }

    /// Ordering state after sorting on `ordering_idx` with every table joined.
    fn sorted_state(&mut self, ordering_idx: usize) -> usize {
        let orderings = &mut self.interesting.orderings;
        let state = orderings.set_order(ordering_idx);
        orderings.apply_fds(state, self.root_fds)
    }

    fn sort_path(
        &mut self,
        child: PathId,
        ordering: usize,
        remove_duplicates: bool,
        force_sort_positions: bool,
        row_ids: (bool, NodeMap),
    ) -> AccessPath {
        let (use_row_ids, tables_to_get_rowid_for) = row_ids;
        let mut sort = AccessPath::new(PathKind::Sort {
            child,
            ordering,
            remove_duplicates,
            force_sort_positions,
            use_row_ids,
            tables_to_get_rowid_for,
        });
        estimate_sort_cost(&self.config.cost_model, &self.arena[child], &mut sort);
        sort.ordering_state = self.sorted_state(ordering);
        sort
    }

    // ---------------------------------------------------------------------
    // Final predicates and filter expansion
    // ---------------------------------------------------------------------

    fn apply_final_predicates(&mut self, roots: &[PathId]) -> Result<Vec<PathId>> {
        debug!("Adding final predicates");
        let graph = self.graph;
        let config = self.config;
        let all_tables = graph.all_tables();
        let final_predicates: Vec<usize> = (0..graph.num_where_predicates)
            .filter(|&idx| {
                let eligibility = graph.predicates[idx].eligibility_set;
                !overlaps(eligibility, all_tables) || overlaps(eligibility, RAND_TABLE_BIT)
            })
            .collect();

        let mut candidates = Vec::new();
        for &root in roots {
            for materialize_subqueries in [false, true] {
                let mut path = self.arena[root].clone();
                path.delayed_predicates = 0;
                let mut materialize_cost = 0.0;
                for &idx in &final_predicates {
                    let predicate = &graph.predicates[idx];
                    let rows = self.arena[root].num_output_rows;
                    let cost = config
                        .cost_model
                        .filter_cost(rows, &predicate.expr, config.max_heap_table_size);
                    path.filter_predicates |= 1u64 << idx;
                    if materialize_subqueries {
                        path.cost += cost.cost_if_materialized;
                        materialize_cost += cost.cost_to_materialize;
                    } else {
                        path.cost += cost.cost_if_not_materialized;
                    }
                    path.num_output_rows *= predicate.selectivity();
                }
                let contains_subqueries =
                    overlaps(path.filter_predicates, graph.materializable_predicates);

                let mut path = self.expand_path(path);
                if materialize_subqueries {
                    match &mut path.kind {
                        PathKind::Filter {
                            materialize_subqueries,
                            ..
                        } => *materialize_subqueries = true,
                        _ => {
                            return Err(PlannerError::internal(
                                "materialized final predicates without a filter",
                            ))
                        }
                    }
                    path.cost += materialize_cost;
                    path.init_cost += materialize_cost;
                    path.init_once_cost += materialize_cost;
                }
                let description = if materialize_subqueries { "mat. subq" } else { "final" };
                self.propose(path, &mut candidates, description)?;
                if !contains_subqueries {
                    break;
                }
            }
        }
        Ok(candidates)
    }

    /// `expand_path` for a path already in the arena; shared subtrees are rewritten once.
    fn expand(&mut self, id: PathId) -> PathId {
        if let Some(&done) = self.expanded.get(&id) {
            return done;
        }
        let original = self.arena[id].clone();
        let rewritten = self.expand_path(original.clone());
        let new_id = if rewritten == original {
            id
        } else {
            self.arena.push(rewritten)
        };
        self.expanded.insert(id, new_id);
        new_id
    }

    /// Replaces pending filter masks in the tree under `path` with `Filter` nodes.
    /// Costs and row counts do not change.
    fn expand_path(&mut self, path: AccessPath) -> AccessPath {
        let mapping: Vec<(PathId, PathId)> = path
            .kind
            .children()
            .into_iter()
            .map(|child| (child, self.expand(child)))
            .collect();
        let kind = path.kind.map_children(|child| {
            mapping
                .iter()
                .find(|(from, _)| *from == child)
                .map_or(child, |&(_, to)| to)
        });
        let path = AccessPath { kind, ..path };
        if path.filter_predicates == 0 {
            return path;
        }

        let mut unfiltered = path.clone();
        unfiltered.num_output_rows = path.num_output_rows_before_filter;
        unfiltered.cost = path.cost_before_filter;
        unfiltered.filter_predicates = 0;
        let child = self.arena.push(unfiltered);

        let mut filter = AccessPath::wrapping(
            PathKind::Filter {
                child,
                condition: FilterCondition::Predicates(path.filter_predicates),
                materialize_subqueries: false,
            },
            &path,
        );
        filter.num_output_rows_before_filter = path.num_output_rows_before_filter;
        filter.cost_before_filter = path.cost_before_filter;
        filter.delayed_predicates = path.delayed_predicates;
        filter.applied_sargable_join_predicates = path.applied_sargable_join_predicates;
        filter.subsumed_sargable_join_predicates = path.subsumed_sargable_join_predicates;
        filter
    }

    // ---------------------------------------------------------------------
    // Grouping
    // ---------------------------------------------------------------------

    fn apply_group_by(&mut self, candidates: Vec<PathId>) -> Result<Vec<PathId>> {
        let row_ids = row_id_sort(
            self.graph,
            self.graph.all_tables(),
            self.config.max_length_for_sort_data,
        );
        let group_by = self.interesting.group_by;
        let implicit = !self.query.is_explicitly_grouped();

        let mut new_candidates = Vec::new();
        for root in candidates {
            let mut child = root;
            let mut description = "aggregate";
            if let Some(group_by) = group_by {
                if self
                    .interesting
                    .orderings
                    .does_follow_order(self.arena[root].ordering_state, group_by)
                {
                    description = "aggregate, sort elided";
                } else {
                    let sort = self.sort_path(root, group_by, false, false, row_ids);
                    child = self.arena.push(sort);
                }
            }

            let mut aggregate = AccessPath::new(PathKind::Aggregate {
                child,
                rollup: self.query.rollup,
            });
            estimate_aggregate_cost(&self.config.cost_model, &self.arena[child], &mut aggregate);
            if implicit {
                aggregate.num_output_rows = 1.0;
                aggregate.num_output_rows_before_filter = 1.0;
            }
            self.propose(aggregate, &mut new_candidates, description)?;
        }
        Ok(new_candidates)
    }

    fn apply_having(&mut self, candidates: Vec<PathId>) -> Result<Vec<PathId>> {
        let query = self.query;
        let Some(having) = &query.having else {
            return Ok(candidates);
        };
        let mut new_candidates = Vec::new();
        for root in candidates {
            let child = &self.arena[root];
            let mut filter = AccessPath::wrapping(
                PathKind::Filter {
                    child: root,
                    condition: FilterCondition::Having {
                        label: having.label.clone(),
                    },
                    materialize_subqueries: false,
                },
                child,
            );
            filter.cost += self
                .config
                .cost_model
                .filter_cost(child.num_output_rows, having, self.config.max_heap_table_size)
                .cost_if_not_materialized;
            filter.num_output_rows *= having.selectivity;
            filter.num_output_rows_before_filter = filter.num_output_rows;
            filter.cost_before_filter = filter.cost;
            self.propose(filter, &mut new_candidates, "having")?;
        }
        Ok(new_candidates)
    }

    // ---------------------------------------------------------------------
    // DISTINCT and ORDER BY
    // ---------------------------------------------------------------------

    fn apply_distinct_and_order(&mut self, mut candidates: Vec<PathId>) -> Result<Vec<PathId>> {
        if candidates.is_empty() {
            return Ok(candidates);
        }
        let grouped = self.query.is_grouped();
        let ordered = self.query.is_ordered();
        // Sorts after grouping read one temporary table; there are no base tables to
        // fetch rows from.
        let row_ids = if grouped {
            (self.grouped_rows_need_row_ids(), 0)
        } else {
            row_id_sort(
                self.graph,
                self.graph.all_tables(),
                self.config.max_length_for_sort_data,
            )
        };

        if grouped {
            candidates = self.buffer_aggregates(candidates, row_ids.0)?;
        }

        if self.query.distinct {
            debug!("Applying sort for DISTINCT");
            let mut new_candidates = Vec::new();
            for root in candidates {
                match self.interesting.distinct {
                    None => {
                        let path = self.limit_path(root, Some(1), 0);
                        self.propose(path, &mut new_candidates, "distinct of constants")?;
                    }
                    Some(distinct) => {
                        // Two sorts in a row must agree on sorting positions.
                        let force_sort_positions =
                            ordered && !self.interesting.order_by_subsumed_by_distinct && row_ids.0;
                        let sort = self.sort_path(root, distinct, true, force_sort_positions, row_ids);
                        self.propose(sort, &mut new_candidates, "distinct")?;
                    }
                }
            }
            candidates = new_candidates;
        }

        if ordered && self.interesting.order_by_subsumed_by_distinct {
            debug!("ORDER BY subsumed by sort for DISTINCT, ignoring");
        } else if let (true, Some(order_by)) = (ordered, self.interesting.order_by) {
            debug!("Applying sort for ORDER BY");
            let mut new_candidates = Vec::new();
            for root in candidates {
                if self
                    .interesting
                    .orderings
                    .does_follow_order(self.arena[root].ordering_state, order_by)
                {
                    let path = self.arena[root].clone();
                    self.propose(path, &mut new_candidates, "sort elided")?;
                } else {
                    let sort = self.sort_path(root, order_by, false, false, row_ids);
                    self.propose(sort, &mut new_candidates, "order by")?;
                }
            }
            candidates = new_candidates;
        }
        Ok(candidates)
    }

    /// Whether a sort after grouping must refer to grouped rows by position. The grouped
    /// rows carry the selected columns, so blobs or wide rows in the join make them
    /// too big to copy into the sort buffer.
    fn grouped_rows_need_row_ids(&self) -> bool {
        let sorts = (self.query.is_ordered() && self.interesting.order_by.is_some())
            || (self.query.distinct && self.interesting.distinct.is_some());
        sorts
            && row_id_sort(
                self.graph,
                self.graph.all_tables(),
                self.config.max_length_for_sort_data,
            )
            .0
    }

    /// Grouped rows reach a later sort either through a temporary table or, when the
    /// sort can hold whole rows, through a streaming buffer. Sorting by row ID needs
    /// the temporary table.
    fn buffer_aggregates(&mut self, candidates: Vec<PathId>, need_row_ids: bool) -> Result<Vec<PathId>> {
        let config = self.config;
        let model = &config.cost_model;
        let mut new_candidates = Vec::new();
        for root in candidates {
            let child = self.arena[root].clone();
            let block = MaterializedBlock {
                cost: child.cost,
                rows: child.num_output_rows,
                cacheable: false,
            };
            let mut materialize = AccessPath::new(PathKind::Materialize {
                source: MaterializeSource::SortingAggregates { child: root },
            });
            estimate_materialize_cost(
                model,
                std::slice::from_ref(&block),
                model.temp_table_scan_cost(child.num_output_rows),
                &mut materialize,
            );
            materialize.ordering_state = child.ordering_state;
            self.propose(materialize, &mut new_candidates, "materialize aggregates")?;

            if !need_row_ids {
                let stream = AccessPath::wrapping(PathKind::Stream { child: root }, &child);
                self.propose(stream, &mut new_candidates, "stream aggregates")?;
            }
        }
        Ok(new_candidates)
    }

    // ---------------------------------------------------------------------
    // LIMIT
    // ---------------------------------------------------------------------

    fn limit_path(&self, child: PathId, limit: Option<u64>, offset: u64) -> AccessPath {
        let count_all_rows = self.query.calc_found_rows;
        let mut path = AccessPath::new(PathKind::LimitOffset {
            child,
            limit,
            offset,
            count_all_rows,
        });
        let child_path = &self.arena[child];
        estimate_limit_offset_cost(child_path, limit, offset, count_all_rows, &mut path);
        path.ordering_state = child_path.ordering_state;
        path
    }

    fn apply_limit(&mut self, candidates: Vec<PathId>) -> Result<Vec<PathId>> {
        let mut new_candidates = Vec::new();
        for root in candidates {
            let path = self.limit_path(root, self.query.limit, self.query.offset);
            self.propose(path, &mut new_candidates, "limit")?;
        }
        Ok(new_candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{BoolExpr, Condition, Subquery};
    use crate::interesting::build_interesting_orders;
    use crate::orderings::OrderElement;

    struct Fixture {
        graph: JoinGraph,
        query: QueryBlock,
        config: PlannerConfig,
        interesting: InterestingOrders,
        arena: PathArena,
        root: PathId,
    }

    /// One table `t` scanned in 100 rows, with the query shaped by `shape`.
    fn fixture(shape: impl FnOnce(&mut JoinGraph, &mut QueryBlock)) -> Fixture {
        let mut graph = JoinGraph::new();
        graph.add_table("t");
        let mut query = QueryBlock::new(JoinGraph::new());
        shape(&mut graph, &mut query);
        query.graph = graph.clone();
        let interesting = build_interesting_orders(&mut graph, &query).unwrap();

        let mut arena = PathArena::new();
        let mut scan = AccessPath::new(PathKind::TableScan { node: 0 });
        scan.num_output_rows = 100.0;
        scan.num_output_rows_before_filter = 100.0;
        scan.cost = 20.0;
        scan.cost_before_filter = 20.0;
        let root = arena.push(scan);
        Fixture {
            graph,
            query,
            config: PlannerConfig::default(),
            interesting,
            arena,
            root,
        }
    }

    /// Replaces the root candidate with an edited copy.
    fn edit_root(f: &mut Fixture, edit: impl FnOnce(&mut AccessPath)) {
        let mut path = f.arena[f.root].clone();
        edit(&mut path);
        f.root = f.arena.push(path);
    }

    fn assemble(f: &mut Fixture) -> Vec<PathId> {
        let proposer = Proposer {
            graph: &f.graph,
            engine: None,
            compare_row_counts: true,
        };
        PostJoinAssembler::new(
            &f.graph,
            &f.query,
            &f.config,
            &mut f.interesting,
            &mut f.arena,
            proposer,
            0,
        )
        .assemble(&[f.root])
        .unwrap()
    }

    fn types_top_down(arena: &PathArena, root: PathId) -> Vec<String> {
        arena
            .walk(root)
            .into_iter()
            .map(|id| format!("{:?}", arena[id].path_type()))
            .collect()
    }

    #[test]
    fn test_no_post_processing_keeps_root() {
        let mut f = fixture(|_, _| {});
        let candidates = assemble(&mut f);
        assert_eq!(candidates.len(), 1);
        assert_eq!(types_top_down(&f.arena, candidates[0]), ["TableScan"]);
        assert_eq!(f.arena[candidates[0]], f.arena[f.root]);
    }

    #[test]
    fn test_filter_masks_become_filter_nodes() {
        let mut f = fixture(|graph, _| {
            let a = graph.column(0, "a");
            let one = graph.constant("1");
            graph.add_predicate(JoinGraph::eq(graph, a, one, 0.5));
        });
        edit_root(&mut f, |scan| {
            scan.filter_predicates = 0b1;
            scan.num_output_rows = 50.0;
            scan.cost = 30.0;
        });
        let candidates = assemble(&mut f);
        assert_eq!(candidates.len(), 1);
        let top = &f.arena[candidates[0]];
        assert!(matches!(
            top.kind,
            PathKind::Filter {
                condition: FilterCondition::Predicates(0b1),
                ..
            }
        ));
        assert_eq!(top.filter_predicates, 0);
        assert_eq!(top.cost, 30.0);
        let PathKind::Filter { child, .. } = top.kind else { unreachable!() };
        assert_eq!(f.arena[child].num_output_rows, 100.0);
        assert_eq!(f.arena[child].cost, 20.0);
        assert_eq!(f.arena[child].filter_predicates, 0);
    }

    #[test]
    fn test_nondeterministic_predicate_applied_at_the_end() {
        let mut f = fixture(|graph, _| {
            graph.add_predicate_with_eligibility(
                BoolExpr::new("rand() < 0.5", Condition::Other { used_tables: RAND_TABLE_BIT }, 0.5),
                RAND_TABLE_BIT,
            );
        });
        let candidates = assemble(&mut f);
        let top = &f.arena[candidates[0]];
        assert_eq!(top.num_output_rows, 50.0);
        assert!(top.cost > 20.0);
        assert_eq!(types_top_down(&f.arena, candidates[0]), ["Filter", "TableScan"]);
    }

    #[test]
    fn test_final_predicate_with_subquery_gets_materialized_sibling() {
        let mut f = fixture(|graph, _| {
            let expr = BoolExpr::new("1 IN (SELECT ...)", Condition::Other { used_tables: 0 }, 0.5)
                .with_subquery(Subquery {
                    cost: 1000.0,
                    rows: 10.0,
                    materializable: true,
                    row_width: 8.0,
                });
            graph.add_predicate_with_eligibility(expr, 0);
            graph.materializable_predicates = 0b1;
        });
        let candidates = assemble(&mut f);
        // Materializing once is far cheaper than 100 executions; the non-materialized
        // sibling loses on every dimension but the one-time cost.
        assert!(candidates.iter().any(|&id| matches!(
            f.arena[id].kind,
            PathKind::Filter {
                materialize_subqueries: true,
                ..
            }
        )));
        for &id in &candidates {
            f.arena[id].check_cost_invariants().unwrap();
        }
    }

    #[test]
    fn test_group_by_sorts_then_aggregates() {
        let mut f = fixture(|graph, query| {
            let a = graph.column(0, "a");
            query.group_by = vec![OrderElement::asc(a)];
            query.rollup = true;
        });
        let candidates = assemble(&mut f);
        assert_eq!(candidates.len(), 1);
        assert_eq!(
            types_top_down(&f.arena, candidates[0]),
            ["Aggregate", "Sort", "TableScan"]
        );
        assert!(matches!(f.arena[candidates[0]].kind, PathKind::Aggregate { rollup: true, .. }));
    }

    #[test]
    fn test_group_by_sort_elided_when_ordered() {
        let mut f = fixture(|graph, query| {
            let a = graph.column(0, "a");
            query.group_by = vec![OrderElement::asc(a)];
        });
        let group_by = f.interesting.group_by.unwrap();
        let state = f.interesting.orderings.set_order(group_by);
        edit_root(&mut f, |scan| scan.ordering_state = state);
        let candidates = assemble(&mut f);
        assert_eq!(types_top_down(&f.arena, candidates[0]), ["Aggregate", "TableScan"]);
    }

    #[test]
    fn test_implicit_grouping_returns_one_row() {
        let mut f = fixture(|_, query| query.has_aggregates = true);
        let candidates = assemble(&mut f);
        let top = &f.arena[candidates[0]];
        assert_eq!(top.num_output_rows, 1.0);
        assert_eq!(types_top_down(&f.arena, candidates[0]), ["Aggregate", "TableScan"]);
    }

    #[test]
    fn test_having_filters_groups() {
        let mut f = fixture(|_, query| {
            query.has_aggregates = true;
            query.having = Some(BoolExpr::new("count(*) > 1", Condition::Other { used_tables: 0 }, 0.5));
        });
        let candidates = assemble(&mut f);
        let top = &f.arena[candidates[0]];
        assert!(matches!(
            &top.kind,
            PathKind::Filter {
                condition: FilterCondition::Having { label },
                ..
            } if label == "count(*) > 1"
        ));
        assert_eq!(top.num_output_rows, 0.5);
    }

    #[test]
    fn test_order_by_sort_elided_when_ordered() {
        let mut f = fixture(|graph, query| {
            let a = graph.column(0, "a");
            query.order_by = vec![OrderElement::asc(a)];
        });
        let order_by = f.interesting.order_by.unwrap();
        let unsorted = assemble(&mut f);
        assert_eq!(types_top_down(&f.arena, unsorted[0]), ["Sort", "TableScan"]);

        let mut f = fixture(|graph, query| {
            let a = graph.column(0, "a");
            query.order_by = vec![OrderElement::asc(a)];
        });
        let state = f.interesting.orderings.set_order(order_by);
        edit_root(&mut f, |scan| scan.ordering_state = state);
        let sorted = assemble(&mut f);
        assert_eq!(types_top_down(&f.arena, sorted[0]), ["TableScan"]);
    }

    #[test]
    fn test_distinct_of_constants_is_limit_one() {
        let mut f = fixture(|graph, query| {
            let one = graph.constant("1");
            query.select_list = vec![one];
            query.distinct = true;
        });
        let candidates = assemble(&mut f);
        let top = &f.arena[candidates[0]];
        assert!(matches!(top.kind, PathKind::LimitOffset { limit: Some(1), offset: 0, .. }));
        assert_eq!(top.num_output_rows, 1.0);
    }

    #[test]
    fn test_distinct_subsumes_order_by() {
        let mut f = fixture(|graph, query| {
            let a = graph.column(0, "a");
            let b = graph.column(0, "b");
            query.select_list = vec![a, b];
            query.distinct = true;
            query.order_by = vec![OrderElement::asc(a)];
        });
        assert!(f.interesting.order_by_subsumed_by_distinct);
        let candidates = assemble(&mut f);
        assert_eq!(types_top_down(&f.arena, candidates[0]), ["Sort", "TableScan"]);
        assert!(matches!(
            f.arena[candidates[0]].kind,
            PathKind::Sort {
                remove_duplicates: true,
                ..
            }
        ));
    }

    #[test]
    fn test_grouped_then_ordered_goes_through_buffer() {
        let mut f = fixture(|graph, query| {
            let a = graph.column(0, "a");
            let b = graph.column(0, "b");
            query.group_by = vec![OrderElement::asc(a)];
            query.order_by = vec![OrderElement::asc(b)];
        });
        let candidates = assemble(&mut f);
        for &id in &candidates {
            let types = types_top_down(&f.arena, id);
            assert_eq!(types[0], "Sort");
            assert!(types[1] == "Stream" || types[1] == "Materialize");
        }
        // Streaming is free, so it dominates the temporary table.
        assert_eq!(types_top_down(&f.arena, candidates[0])[1], "Stream");
    }

    #[test]
    fn test_limit_with_found_rows() {
        let mut f = fixture(|_, query| {
            query.limit = Some(10);
            query.offset = 5;
            query.calc_found_rows = true;
        });
        let candidates = assemble(&mut f);
        let top = &f.arena[candidates[0]];
        assert!(matches!(
            top.kind,
            PathKind::LimitOffset {
                limit: Some(10),
                offset: 5,
                count_all_rows: true,
                ..
            }
        ));
        assert_eq!(top.num_output_rows, 10.0);
        assert_eq!(top.cost, 20.0);
    }
}
