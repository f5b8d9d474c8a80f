//! End-to-end test: TPC-H Q5 planning.
//!
//! Builds the six-table Q5 join graph with SF=1 statistics, runs the planner, and checks
//! the plan against properties that hold regardless of which join order wins.
//!
//! ```sql
//! SELECT n_name, SUM(l_extendedprice * (1 - l_discount)) AS revenue
//! FROM customer, orders, lineitem, supplier, nation, region
//! WHERE c_custkey = o_custkey AND l_orderkey = o_orderkey AND l_suppkey = s_suppkey
//!   AND c_nationkey = s_nationkey AND s_nationkey = n_nationkey
//!   AND n_regionkey = r_regionkey AND r_name = 'ASIA'
//!   AND o_orderdate >= DATE '1994-01-01' AND o_orderdate < DATE '1995-01-01'
//! GROUP BY n_name
//! ORDER BY revenue DESC
//! ```
//!
//! `c_nationkey = s_nationkey` closes the cycle customer - orders - lineitem - supplier.

use joinplan_core::bitset::{nonzero_subsets_of, overlaps, NodeMap};
use joinplan_core::graph::{BoolExpr, Condition, ItemId, JoinEdge, JoinType};
use joinplan_core::orderings::OrderElement;
use joinplan_core::path::{AccessPathType, AccessPathTypes, PathArena, PathId, PathKind};
use joinplan_core::stats::{equality_selectivity, join_equality_selectivity, ColumnStatistics, Statistics};
use joinplan_core::{
    InMemoryCostOracle, JoinGraph, Plan, Planner, PlannerConfig, QueryBlock, SecondaryEngine,
};
use std::collections::HashMap;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const CUSTOMER: usize = 0;
const ORDERS: usize = 1;
const LINEITEM: usize = 2;
const SUPPLIER: usize = 3;
const NATION: usize = 4;
const REGION: usize = 5;

const ORDERDATE_SELECTIVITY: f64 = 0.15;

/// TPC-H SF=1 statistics.
fn tpch_stats() -> HashMap<&'static str, Statistics> {
    let col = |ndv: f64| ColumnStatistics::new(ndv, 0.0);
    HashMap::from([
        (
            "customer",
            Statistics::new(150_000.0, 15_000_000.0)
                .with_column("c_custkey", col(150_000.0))
                .with_column("c_nationkey", col(25.0)),
        ),
        (
            "orders",
            Statistics::new(1_500_000.0, 150_000_000.0)
                .with_column("o_orderkey", col(1_500_000.0))
                .with_column("o_custkey", col(150_000.0))
                .with_column("o_orderdate", col(2_500.0)),
        ),
        (
            "lineitem",
            Statistics::new(6_001_215.0, 600_121_500.0)
                .with_column("l_orderkey", col(1_500_000.0))
                .with_column("l_suppkey", col(10_000.0)),
        ),
        (
            "supplier",
            Statistics::new(10_000.0, 1_000_000.0)
                .with_column("s_suppkey", col(10_000.0))
                .with_column("s_nationkey", col(25.0)),
        ),
        (
            "nation",
            Statistics::new(25.0, 2_500.0)
                .with_column("n_nationkey", col(25.0))
                .with_column("n_regionkey", col(5.0))
                .with_column("n_name", col(25.0)),
        ),
        (
            "region",
            Statistics::new(5.0, 500.0)
                .with_column("r_regionkey", col(5.0))
                .with_column("r_name", col(5.0)),
        ),
    ])
}

fn oracle() -> InMemoryCostOracle {
    tpch_stats()
        .into_iter()
        .fold(InMemoryCostOracle::new(), |oracle, (name, stats)| oracle.with_table(name, stats))
}

struct Q5 {
    graph: JoinGraph,
    n_name: ItemId,
    revenue: ItemId,
    /// Product of every join and WHERE selectivity.
    selectivity: f64,
}

fn q5_graph() -> Q5 {
    let stats = tpch_stats();
    let mut graph = JoinGraph::new();
    for name in ["customer", "orders", "lineitem", "supplier", "nation", "region"] {
        graph.add_table(name);
    }
    graph.add_index(CUSTOMER, "c_pk", &["c_custkey"], true);
    graph.add_index(ORDERS, "o_pk", &["o_orderkey"], true);
    graph.add_index(ORDERS, "o_custkey", &["o_custkey"], false);
    graph.add_index(LINEITEM, "l_orderkey", &["l_orderkey"], false);
    graph.add_index(SUPPLIER, "s_pk", &["s_suppkey"], true);
    graph.add_index(NATION, "n_pk", &["n_nationkey"], true);
    graph.add_index(REGION, "r_pk", &["r_regionkey"], true);

    let mut selectivity = 1.0;
    let mut join = |graph: &mut JoinGraph, (lt, lc): (usize, &str), (rt, rc): (usize, &str)| {
        let sel = join_equality_selectivity(
            &stats[graph.nodes[lt].alias.as_str()],
            lc,
            &stats[graph.nodes[rt].alias.as_str()],
            rc,
        );
        selectivity *= sel;
        let l = graph.column(lt, lc);
        let r = graph.column(rt, rc);
        let cond = JoinGraph::eq(graph, l, r, sel);
        graph.add_edge(JoinEdge::new(JoinType::Inner, 1 << lt, 1 << rt).with_equijoin(cond));
    };
    join(&mut graph, (CUSTOMER, "c_custkey"), (ORDERS, "o_custkey"));
    join(&mut graph, (LINEITEM, "l_orderkey"), (ORDERS, "o_orderkey"));
    join(&mut graph, (LINEITEM, "l_suppkey"), (SUPPLIER, "s_suppkey"));
    join(&mut graph, (CUSTOMER, "c_nationkey"), (SUPPLIER, "s_nationkey"));
    join(&mut graph, (SUPPLIER, "s_nationkey"), (NATION, "n_nationkey"));
    join(&mut graph, (NATION, "n_regionkey"), (REGION, "r_regionkey"));

    let r_name = graph.column(REGION, "r_name");
    let asia = graph.constant("'ASIA'");
    let asia_sel = equality_selectivity(&stats["region"], "r_name");
    selectivity *= asia_sel;
    graph.add_predicate(graph.eq(r_name, asia, asia_sel));
    graph.column(ORDERS, "o_orderdate");
    graph.add_predicate(BoolExpr::new(
        "o_orderdate >= DATE '1994-01-01' AND o_orderdate < DATE '1995-01-01'",
        Condition::Other {
            used_tables: 1 << ORDERS,
        },
        ORDERDATE_SELECTIVITY,
    ));
    selectivity *= ORDERDATE_SELECTIVITY;

    let n_name = graph.column(NATION, "n_name");
    let revenue = graph.expression("SUM(l_extendedprice * (1 - l_discount))", 1 << LINEITEM);
    Q5 {
        graph,
        n_name,
        revenue,
        selectivity,
    }
}

/// The full query, with grouping and ordering.
fn q5_query() -> QueryBlock {
    let q5 = q5_graph();
    let mut query = QueryBlock::new(q5.graph);
    query.select_list = vec![q5.n_name, q5.revenue];
    query.group_by = vec![OrderElement::asc(q5.n_name)];
    query.order_by = vec![OrderElement::desc(q5.revenue)];
    query
}

fn planner() -> Planner {
    Planner::new(Arc::new(oracle()), PlannerConfig::default())
}

fn hash_join_only() -> Arc<SecondaryEngine> {
    Arc::new(SecondaryEngine::new(
        "hash join only",
        AccessPathTypes::only(&[AccessPathType::TableScan, AccessPathType::HashJoin, AccessPathType::Filter]),
    ))
}

fn tables_under(arena: &PathArena, id: PathId) -> NodeMap {
    arena.walk(id).into_iter().fold(0, |map, p| match arena[p].kind {
        PathKind::TableScan { node } | PathKind::IndexScan { node, .. } | PathKind::Ref { node, .. } => {
            map | (1 << node)
        }
        _ => map,
    })
}

fn is_connected(graph: &JoinGraph, subset: NodeMap) -> bool {
    let mut reached = subset & subset.wrapping_neg();
    loop {
        let grown = graph.edges.iter().fold(reached, |reached, edge| {
            if edge.nodes() & !subset == 0 && overlaps(edge.nodes(), reached) {
                reached | edge.nodes()
            } else {
                reached
            }
        });
        if grown == reached {
            return reached == subset;
        }
        reached = grown;
    }
}

fn spine(plan: &Plan) -> Vec<AccessPathType> {
    let mut types = vec![plan.root_path().path_type()];
    let mut id = plan.root();
    while let Some(&child) = plan.path(id).kind.children().first() {
        types.push(plan.path(child).path_type());
        id = child;
    }
    types
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn test_q5_joins_all_tables() {
    let plan = planner().find_best_plan(&q5_query()).unwrap();
    assert_eq!(tables_under(plan.arena(), plan.root()), 0b11_1111);
    let explain = plan.explain();
    for alias in ["customer", "orders", "lineitem", "supplier", "nation", "region"] {
        assert!(explain.contains(alias), "{} missing from:\n{}", alias, explain);
    }
}

#[test]
fn test_q5_plans_every_connected_subset() {
    let q5 = q5_graph();
    let expected = nonzero_subsets_of(0b11_1111)
        .filter(|&subset| is_connected(&q5.graph, subset))
        .count();
    let plan = planner().find_best_plan(&QueryBlock::new(q5.graph)).unwrap();
    assert_eq!(plan.num_subsets(), expected);
}

#[test]
fn test_q5_row_estimate_does_not_depend_on_join_order() {
    let q5 = q5_graph();
    let table_rows: f64 = tpch_stats().values().map(|s| s.row_count).product();
    let expected = table_rows * q5.selectivity;
    let query = QueryBlock::new(q5.graph);

    let best = planner().find_best_plan(&query).unwrap();
    let hashed = planner()
        .with_secondary_engine(hash_join_only())
        .find_best_plan(&query)
        .unwrap();
    assert!((best.rows() - expected).abs() <= expected * 1e-6, "{} vs {}", best.rows(), expected);
    assert!((hashed.rows() - expected).abs() <= expected * 1e-6);
}

#[test]
fn test_q5_index_lookups_beat_hash_joins_alone() {
    let query = q5_query();
    let best = planner().find_best_plan(&query).unwrap();
    let hashed = planner()
        .with_secondary_engine(Arc::new(SecondaryEngine::new(
            "hash join and post-join only",
            AccessPathTypes::only(&[
                AccessPathType::TableScan,
                AccessPathType::HashJoin,
                AccessPathType::Filter,
                AccessPathType::Sort,
                AccessPathType::Aggregate,
                AccessPathType::Stream,
                AccessPathType::Materialize,
            ]),
        )))
        .find_best_plan(&query)
        .unwrap();
    assert!(best.cost() <= hashed.cost() + 1e-6);
    assert!(hashed
        .arena()
        .walk(hashed.root())
        .iter()
        .all(|&id| !matches!(hashed.path(id).kind, PathKind::NestedLoopJoin { .. })));
}

#[test]
fn test_q5_post_join_shape() {
    let plan = planner().find_best_plan(&q5_query()).unwrap();
    let types = spine(&plan);
    assert_eq!(
        &types[..3],
        &[AccessPathType::Sort, AccessPathType::Stream, AccessPathType::Aggregate],
        "{}",
        plan.explain()
    );
}

#[test]
fn test_q5_costs_are_consistent() {
    let plan = planner().find_best_plan(&q5_query()).unwrap();
    for id in plan.arena().walk(plan.root()) {
        let path = plan.path(id);
        assert!(path.check_cost_invariants().is_ok(), "{}", path.summary());
        for child in path.kind.children() {
            assert!(
                path.cost >= plan.path(child).cost - 1e-6 || matches!(path.kind, PathKind::LimitOffset { .. }),
                "{} is cheaper than its input {}",
                path.summary(),
                plan.path(child).summary()
            );
        }
    }
}

#[test]
fn test_q5_is_deterministic() {
    let first = planner().find_best_plan(&q5_query()).unwrap();
    let second = planner().find_best_plan(&q5_query()).unwrap();
    assert_eq!(first.cost(), second.cost());
    pretty_assertions::assert_eq!(first.explain(), second.explain());
}
