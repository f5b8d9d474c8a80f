//! # Sargable Predicate Discovery
//!
//! Finds the equalities that can drive an index lookup on each table, before
//! enumeration starts. Two sources are considered:
//!
//! - WHERE predicates that mention a single table, of the form `t.col = expr` where
//!   `t.col` is part of an index key.
//! - Equi-join conditions that can be pushed down to one side of their join. These are
//!   not WHERE predicates, so they are promoted into the predicate list (once per
//!   condition) with an eligibility set that can never be satisfied. Thus they are
//!   never applied as filters, but they get a predicate index so that lookups can
//!   record them as applied or subsumed.
//!
//! Inner joins can push conditions to both sides; outer, semi and anti joins only
//! to their inner (right) side, since the outer side must see every row.

use crate::bitset::{is_single_bit_set, overlaps, table_bitmap, MAX_PREDICATES, PSEUDO_TABLE_BITS};
use crate::error::{PlannerError, Result};
use crate::graph::{
    Condition, EdgeConditionRef, ItemKind, JoinEdge, JoinGraph, Predicate, SargablePredicate,
};
use tracing::trace;

#[derive(Debug, Clone, Copy)]
enum ConditionSource {
    Where(usize),
    JoinCondition(EdgeConditionRef),
}

/// Attaches sargable predicates to every node, promoting join conditions as needed.
pub fn find_sargable_predicates(graph: &mut JoinGraph) -> Result<()> {
    graph.num_where_predicates = graph.predicates.len();
    graph.sargable_join_predicates.clear();
    for node in &mut graph.nodes {
        node.sargable_predicates.clear();
        node.join_conditions_pushable_to_this.clear();
    }

    collect_pushable_join_conditions(graph);

    for predicate_idx in 0..graph.num_where_predicates {
        let eligibility_set = graph.predicates[predicate_idx].eligibility_set;
        if is_single_bit_set(eligibility_set) && !overlaps(eligibility_set, PSEUDO_TABLE_BITS) {
            possibly_add_sargable_condition(graph, ConditionSource::Where(predicate_idx), None);
        }
    }

    for node_idx in 0..graph.nodes.len() {
        let pushable = graph.nodes[node_idx].join_conditions_pushable_to_this.clone();
        for condition in pushable {
            possibly_add_sargable_condition(
                graph,
                ConditionSource::JoinCondition(condition),
                Some(node_idx),
            );
        }
    }

    if graph.predicates.len() > MAX_PREDICATES {
        return Err(PlannerError::CapacityExceeded {
            what: "predicates",
            limit: MAX_PREDICATES,
        });
    }
    Ok(())
}

fn can_push_to(edge: &JoinEdge, node: usize) -> bool {
    let bit = table_bitmap(node);
    overlaps(edge.right, bit) || (edge.join_type.is_inner() && overlaps(edge.left, bit))
}

fn collect_pushable_join_conditions(graph: &mut JoinGraph) {
    let mut pushes = Vec::new();
    for (edge_idx, edge) in graph.edges.iter().enumerate() {
        for (condition_idx, condition) in edge.equijoin_conditions.iter().enumerate() {
            let Condition::Eq { left, right } = condition.condition else {
                continue;
            };
            for item in [left, right] {
                if let ItemKind::Column { node, .. } = graph.items[item].kind {
                    if can_push_to(edge, node) {
                        pushes.push((
                            node,
                            EdgeConditionRef {
                                edge: edge_idx,
                                condition: condition_idx,
                            },
                        ));
                    }
                }
            }
        }
    }
    for (node, condition) in pushes {
        let list = &mut graph.nodes[node].join_conditions_pushable_to_this;
        if !list.contains(&condition) {
            list.push(condition);
        }
    }
}

fn possibly_add_sargable_condition(
    graph: &mut JoinGraph,
    source: ConditionSource,
    force_node: Option<usize>,
) {
    let expr = match source {
        ConditionSource::Where(idx) => &graph.predicates[idx].expr,
        ConditionSource::JoinCondition(r) => &graph.edges[r.edge].equijoin_conditions[r.condition],
    };
    let Condition::Eq { left, right } = expr.condition else {
        return;
    };

    for (field, other_side) in [(left, right), (right, left)] {
        let ItemKind::Column { node, column } = graph.items[field].kind else {
            continue;
        };
        if force_node.is_some_and(|forced| forced != node) {
            continue;
        }
        if !graph.nodes[node].is_part_of_key(column) {
            continue;
        }

        let predicate_index = match source {
            ConditionSource::Where(idx) => idx,
            ConditionSource::JoinCondition(r) => promote_join_condition(graph, r),
        };
        trace!(
            "Found sargable condition {} on {}",
            graph.predicates[predicate_index].expr.label,
            graph.nodes[node].alias
        );
        graph.nodes[node].sargable_predicates.push(SargablePredicate {
            predicate_index,
            field,
            other_side,
        });
    }
}

fn promote_join_condition(graph: &mut JoinGraph, condition: EdgeConditionRef) -> usize {
    if let Some(&idx) = graph.sargable_join_predicates.get(&condition) {
        return idx;
    }
    let expr = graph.edges[condition.edge].equijoin_conditions[condition.condition].clone();
    graph.predicates.push(Predicate::new(expr, u64::MAX));
    let idx = graph.predicates.len() - 1;
    graph.sargable_join_predicates.insert(condition, idx);
    idx
}
