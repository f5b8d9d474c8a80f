//! # Planner
//!
//! Entry point for planning one query block. A call to [`Planner::find_best_plan`]
//! builds all per-compilation state (the planning copy of the graph, the ordering
//! engine, the memo and the path arena), runs the enumeration and the post-join steps,
//! and returns either a complete [`Plan`] or a single [`PlannerError`].
//!
//! ```text
//! QueryBlock
//!   -> supported-query checks, graph validation
//!   -> sargable predicates, materializable predicates, interesting orders
//!   -> DPhyp enumeration into the PlanArbiter (memo of Pareto-optimal candidates)
//!   -> PostJoinAssembler over the candidates for all tables
//!   -> cheapest candidate, SQL_BUFFER_RESULT, cost invariant walk
//!   -> Plan
//! ```

use crate::arbiter::{PlanArbiter, Proposer};
use crate::assembler::PostJoinAssembler;
use crate::bitset::PredicateMap;
use crate::config::PlannerConfig;
use crate::cost::estimate_materialize_cost;
use crate::enumerate::{count_connected_subgraphs, enumerate_all_connected_partitions, Hypergraph};
use crate::error::{PlannerError, Result};
use crate::graph::{JoinGraph, MaterializedBlock};
use crate::interesting::build_interesting_orders;
use crate::oracle::CostOracle;
use crate::orderings::LogicalOrderings;
use crate::path::{AccessPath, MaterializeSource, PathArena, PathId, PathKind};
use crate::query::QueryBlock;
use crate::sargable::find_sargable_predicates;
use crate::secondary::SecondaryEngine;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// The chosen plan together with everything needed to interpret it.
#[derive(Debug, Clone)]
pub struct Plan {
    arena: PathArena,
    root: PathId,
    graph: JoinGraph,
    orderings: LogicalOrderings,
    num_subsets: usize,
    best_rowcount: f64,
}

impl Plan {
    pub fn root(&self) -> PathId {
        self.root
    }

    pub fn root_path(&self) -> &AccessPath {
        &self.arena[self.root]
    }

    pub fn path(&self, id: PathId) -> &AccessPath {
        &self.arena[id]
    }

    pub fn arena(&self) -> &PathArena {
        &self.arena
    }

    /// The planning copy of the graph, including promoted join predicates.
    pub fn graph(&self) -> &JoinGraph {
        &self.graph
    }

    pub fn cost(&self) -> f64 {
        self.root_path().cost
    }

    pub fn rows(&self) -> f64 {
        self.root_path().num_output_rows
    }

    /// Row estimate reported to callers. Never claims a single row under a LIMIT
    /// above one, since callers treat one-row results specially.
    pub fn best_rowcount(&self) -> f64 {
        self.best_rowcount
    }

    /// Number of connected subsets planned during enumeration.
    pub fn num_subsets(&self) -> usize {
        self.num_subsets
    }

    pub fn explain(&self) -> String {
        self.arena.explain(self.root, &self.graph, &self.orderings)
    }

    /// Operator tree as JSON, children nested under `inputs`.
    pub fn to_json(&self) -> Value {
        self.path_to_json(self.root)
    }

    fn path_to_json(&self, id: PathId) -> Value {
        let path = &self.arena[id];
        let inputs: Vec<Value> = path
            .kind
            .children()
            .into_iter()
            .map(|child| self.path_to_json(child))
            .collect();
        json!({
            "operator": format!("{:?}", path.path_type()),
            "description": path.kind.describe(&self.graph, &self.orderings),
            "cost": path.cost,
            "initCost": path.init_cost,
            "rows": path.num_output_rows,
            "inputs": inputs,
        })
    }
}

pub struct Planner {
    oracle: Arc<dyn CostOracle>,
    config: PlannerConfig,
    secondary_engine: Option<Arc<SecondaryEngine>>,
}

impl Planner {
    pub fn new(oracle: Arc<dyn CostOracle>, config: PlannerConfig) -> Self {
        Self {
            oracle,
            config,
            secondary_engine: None,
        }
    }

    pub fn with_secondary_engine(mut self, engine: Arc<SecondaryEngine>) -> Self {
        self.secondary_engine = Some(engine);
        self
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    fn check_supported(&self, query: &QueryBlock) -> Result<()> {
        let unsupported = |feature: &str| {
            Err(PlannerError::Unsupported {
                feature: feature.to_string(),
            })
        };
        if query.uses_fulltext {
            return unsupported("fulltext search");
        }
        if query.uses_window_functions {
            return unsupported("windowing functions");
        }
        if let Some(engine) = &self.secondary_engine {
            if engine.supported_access_paths.is_empty() {
                return unsupported("the secondary engine in use");
            }
        }
        Ok(())
    }

    /// Whether enumeration would certainly open more than `max_subsets` subsets.
    ///
    /// With only commutative edges and no conflict rules, every connected subset gets
    /// candidates, so counting them answers up front what a full enumeration would
    /// find out only after costing millions of pairs.
    fn exceeds_subset_ceiling(&self, graph: &JoinGraph, hypergraph: &Hypergraph) -> bool {
        let unconstrained = graph
            .edges
            .iter()
            .all(|edge| edge.join_type.is_commutative() && edge.conflict_rules.is_empty());
        if !unconstrained {
            return false;
        }
        let limit = self.config.max_subsets;
        match count_connected_subgraphs(hypergraph, limit) {
            Some(count) if count > limit => {
                debug!("More than {} connected subsets, not enumerating", limit);
                true
            }
            _ => false,
        }
    }

    pub fn find_best_plan(&self, query: &QueryBlock) -> Result<Plan> {
        self.check_supported(query)?;

        let mut graph = query.graph.clone();
        graph.normalize_eligibility_sets();
        graph.validate()?;
        debug!(
            "Planning query block with {} tables, {} edges, {} predicates",
            graph.nodes.len(),
            graph.edges.len(),
            graph.predicates.len()
        );

        find_sargable_predicates(&mut graph)?;
        graph.materializable_predicates = materializable_predicates(&graph);
        let mut interesting = build_interesting_orders(&mut graph, query)?;
        let hypergraph = Hypergraph::from_join_graph(&graph);
        let engine = self.secondary_engine.as_deref();
        if engine.is_none() && self.exceeds_subset_ceiling(&graph, &hypergraph) {
            return Err(PlannerError::GraphTooLarge {
                limit: self.config.max_subsets,
            });
        }

        let (memo, mut arena) = {
            let mut arbiter = PlanArbiter::new(
                &graph,
                self.oracle.as_ref(),
                &self.config,
                &mut interesting,
                engine,
            );
            enumerate_all_connected_partitions(&hypergraph, &mut arbiter);
            if let Some(err) = arbiter.take_error() {
                return Err(err);
            }
            arbiter.into_parts()
        };
        debug!("Enumeration done: {} subsets, {} paths", memo.len(), arena.len());

        let all_tables = graph.all_tables();
        let Some(root_set) = memo.get(all_tables) else {
            if engine.is_some() {
                return Err(PlannerError::AllPlansRejected);
            }
            return Err(PlannerError::invalid_graph("the join graph is not connected"));
        };

        let proposer = Proposer {
            graph: &graph,
            engine,
            compare_row_counts: self.config.compare_row_counts,
        };
        let candidates = PostJoinAssembler::new(
            &graph,
            query,
            &self.config,
            &mut interesting,
            &mut arena,
            proposer,
            root_set.active_functional_dependencies,
        )
        .assemble(&root_set.paths)?;

        let Some(mut root) = candidates
            .iter()
            .copied()
            .min_by(|&a, &b| arena[a].cost.total_cmp(&arena[b].cost))
        else {
            return Err(PlannerError::AllPlansRejected);
        };

        if query.buffer_result && query.outermost && !arena[root].kind.is_materialization() {
            debug!("Adding temporary table for SQL_BUFFER_RESULT");
            root = arena.push(buffer_result(&self.config, &arena[root], root));
        }

        for id in arena.walk(root) {
            arena[id].check_cost_invariants().map_err(PlannerError::internal)?;
        }

        let root_path = &arena[root];
        let best_rowcount = if root_path.num_output_rows <= 1.0 && query.limit.map_or(true, |limit| limit > 1) {
            2.0
        } else {
            root_path.num_output_rows
        };
        debug!(
            "Final cost is {:.1}, {:.1} rows",
            root_path.cost, root_path.num_output_rows
        );

        Ok(Plan {
            arena,
            root,
            graph,
            orderings: interesting.orderings,
            num_subsets: memo.len(),
            best_rowcount,
        })
    }
}

/// Plans `query` with the default configuration and no secondary engine.
pub fn find_best_plan(query: &QueryBlock, oracle: Arc<dyn CostOracle>) -> Result<Plan> {
    Planner::new(oracle, PlannerConfig::default()).find_best_plan(query)
}

/// WHERE predicates with at least one subquery that can be materialized.
fn materializable_predicates(graph: &JoinGraph) -> PredicateMap {
    graph.predicates[..graph.num_where_predicates]
        .iter()
        .enumerate()
        .filter(|(_, p)| p.expr.subqueries.iter().any(|s| s.materializable))
        .fold(0, |mask, (idx, _)| mask | (1u64 << idx))
}

fn buffer_result(config: &PlannerConfig, child: &AccessPath, child_id: PathId) -> AccessPath {
    let model = &config.cost_model;
    let block = MaterializedBlock {
        cost: child.cost,
        rows: child.num_output_rows,
        cacheable: false,
    };
    let mut path = AccessPath::new(PathKind::Materialize {
        source: MaterializeSource::BufferResult { child: child_id },
    });
    estimate_materialize_cost(
        model,
        std::slice::from_ref(&block),
        model.temp_table_scan_cost(child.num_output_rows),
        &mut path,
    );
    path.ordering_state = child.ordering_state;
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{BoolExpr, Condition, JoinEdge, JoinType, Subquery};
    use crate::oracle::InMemoryCostOracle;
    use crate::path::AccessPathTypes;
    use crate::stats::Statistics;

    fn planner() -> Planner {
        let oracle = InMemoryCostOracle::new()
            .with_table("a", Statistics::new(1000.0, 100_000.0))
            .with_table("b", Statistics::new(10.0, 1_000.0));
        Planner::new(Arc::new(oracle), PlannerConfig::default())
    }

    fn two_tables() -> QueryBlock {
        let mut graph = JoinGraph::new();
        let a = graph.add_table("a");
        let b = graph.add_table("b");
        let ak = graph.column(a, "k");
        let bk = graph.column(b, "k");
        let cond = graph.eq(ak, bk, 0.1);
        graph.add_edge(JoinEdge::new(JoinType::Inner, 0b01, 0b10).with_equijoin(cond));
        QueryBlock::new(graph)
    }

    #[test]
    fn test_plans_two_table_join() {
        let plan = planner().find_best_plan(&two_tables()).unwrap();
        assert!(matches!(
            plan.root_path().kind,
            PathKind::HashJoin { .. } | PathKind::NestedLoopJoin { .. }
        ));
        assert!(plan.cost() > 0.0);
        assert!((plan.rows() - 1000.0).abs() < 1e-6);
        assert_eq!(plan.num_subsets(), 3);
        assert!(plan.explain().contains("join"));
        assert_eq!(plan.to_json()["inputs"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_unsupported_features_rejected_up_front() {
        let mut query = two_tables();
        query.uses_window_functions = true;
        assert_eq!(
            planner().find_best_plan(&query).unwrap_err(),
            PlannerError::Unsupported {
                feature: "windowing functions".into()
            }
        );

        let engine = SecondaryEngine::new("nothing", AccessPathTypes::none());
        let err = planner()
            .with_secondary_engine(Arc::new(engine))
            .find_best_plan(&two_tables())
            .unwrap_err();
        assert_eq!(err.to_string(), "the join planner does not support the secondary engine in use");
    }

    #[test]
    fn test_disconnected_graph() {
        let mut graph = JoinGraph::new();
        graph.add_table("a");
        graph.add_table("b");
        let err = planner().find_best_plan(&QueryBlock::new(graph)).unwrap_err();
        assert!(matches!(err, PlannerError::InvalidGraph { .. }));
    }

    #[test]
    fn test_buffer_result_materializes_root() {
        let mut query = two_tables();
        query.buffer_result = true;
        let plan = planner().find_best_plan(&query).unwrap();
        assert!(matches!(
            plan.root_path().kind,
            PathKind::Materialize {
                source: MaterializeSource::BufferResult { .. }
            }
        ));

        query.outermost = false;
        let plan = planner().find_best_plan(&query).unwrap();
        assert!(!plan.root_path().kind.is_materialization());
    }

    #[test]
    fn test_best_rowcount_placeholder() {
        let mut graph = JoinGraph::new();
        graph.add_table("b");
        let bk = graph.column(0, "k");
        let one = graph.constant("1");
        graph.add_predicate(graph.eq(bk, one, 0.01));
        let mut query = QueryBlock::new(graph);
        let plan = planner().find_best_plan(&query).unwrap();
        assert!(plan.rows() <= 1.0);
        assert_eq!(plan.best_rowcount(), 2.0);

        query.limit = Some(1);
        let plan = planner().find_best_plan(&query).unwrap();
        assert!(plan.best_rowcount() <= 1.0);
    }

    #[test]
    fn test_materializable_predicates_detected() {
        let mut graph = JoinGraph::new();
        graph.add_table("a");
        let plain = BoolExpr::new("a.x > 1", Condition::Other { used_tables: 0b1 }, 0.5);
        let with_subquery = BoolExpr::new("a.y IN (SELECT ...)", Condition::Other { used_tables: 0b1 }, 0.5)
            .with_subquery(Subquery {
                cost: 50.0,
                rows: 5.0,
                materializable: true,
                row_width: 8.0,
            });
        graph.add_predicate(plain);
        graph.add_predicate(with_subquery);
        assert_eq!(materializable_predicates(&graph), 0b10);

        let plan = planner().find_best_plan(&QueryBlock::new(graph)).unwrap();
        // Re-running the subquery per row costs 1000 * 50; materializing it wins.
        assert!(plan.arena().walk(plan.root()).iter().any(|&id| matches!(
            plan.path(id).kind,
            PathKind::Filter {
                materialize_subqueries: true,
                ..
            }
        )));
    }

    fn clique(num_tables: usize) -> QueryBlock {
        let mut graph = JoinGraph::new();
        for i in 0..num_tables {
            graph.add_table(&format!("t{}", i));
        }
        for i in 0..num_tables {
            for j in i + 1..num_tables {
                let left = graph.column(i, &format!("c{}", j));
                let right = graph.column(j, &format!("c{}", i));
                let cond = graph.eq(left, right, 0.1);
                graph.add_edge(
                    JoinEdge::new(JoinType::Inner, 1 << i, 1 << j).with_equijoin(cond),
                );
            }
        }
        QueryBlock::new(graph)
    }

    #[test]
    fn test_clique_over_default_ceiling_fails_fast() {
        // 2^20 - 1 connected subsets against a ceiling of 100000.
        let err = planner().find_best_plan(&clique(20)).unwrap_err();
        assert_eq!(err, PlannerError::GraphTooLarge { limit: 100_000 });
    }

    #[test]
    fn test_small_clique_under_default_ceiling() {
        let plan = planner().find_best_plan(&clique(6)).unwrap();
        assert_eq!(plan.num_subsets(), (1 << 6) - 1);
    }

    #[test]
    fn test_deterministic() {
        let first = planner().find_best_plan(&two_tables()).unwrap();
        let second = planner().find_best_plan(&two_tables()).unwrap();
        assert_eq!(first.cost(), second.cost());
        assert_eq!(first.explain(), second.explain());
    }
}
