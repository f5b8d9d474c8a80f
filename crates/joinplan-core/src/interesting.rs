//! # Interesting Orders
//!
//! Sets up the ordering engine for one query block before enumeration:
//!
//! - ORDER BY and GROUP BY become *interesting* orderings, i.e. orderings whose
//!   presence makes a plan more valuable. Each deterministic one also becomes a
//!   sort-ahead candidate, so that the arbiter can try sorting early, below joins that
//!   preserve order.
//! - The DISTINCT sort order and the key order of every ordered index are registered
//!   as plain orderings that plans can produce.
//! - Functional dependencies are collected from inner/semi join conditions, from
//!   predicates, and from unique non-nullable keys. Equalities with constants become
//!   `{} -> x`, column equalities become equivalences, `x IS NULL` makes `x` constant.
//!
//! When nothing is interesting there is no point in collecting dependencies, and
//! every plan carries the unordered state.

use crate::bitset::{overlaps, NodeMap, PSEUDO_TABLE_BITS, RAND_TABLE_BIT};
use crate::error::{PlannerError, Result};
use crate::graph::{BoolExpr, Condition, ItemId, ItemKind, JoinGraph, JoinType, TableKind};
use crate::orderings::{FunctionalDependency, LogicalOrderings, OrderElement, Ordering};
use crate::query::QueryBlock;
use std::collections::HashMap;
use tracing::debug;

/// An ordering worth sorting for early, once `required_nodes` are joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortAheadOrdering {
    pub ordering_idx: usize,
    pub required_nodes: NodeMap,
}

#[derive(Debug, Clone)]
pub struct InterestingOrders {
    pub orderings: LogicalOrderings,
    pub sort_ahead_orderings: Vec<SortAheadOrdering>,
    pub order_by: Option<usize>,
    pub group_by: Option<usize>,
    /// Order of the deduplicating sort; `None` when every selected item is constant.
    pub distinct: Option<usize>,
    /// The DISTINCT sort already produces the ORDER BY order.
    pub order_by_subsumed_by_distinct: bool,
    /// Ordering produced by a full scan of `(node, index)`.
    pub index_orderings: HashMap<(usize, usize), usize>,
}

pub fn build_interesting_orders(graph: &mut JoinGraph, query: &QueryBlock) -> Result<InterestingOrders> {
    let mut orderings = LogicalOrderings::new();
    let mut sort_ahead_orderings = Vec::new();

    let order_by = add_query_ordering(graph, &mut orderings, &mut sort_ahead_orderings, &query.order_by)?;
    let group_by = add_query_ordering(graph, &mut orderings, &mut sort_ahead_orderings, &query.group_by)?;

    let (distinct, order_by_subsumed_by_distinct) = if query.distinct {
        match distinct_ordering(graph, query) {
            (Some(ordering), subsumed) => (Some(orderings.add_ordering(ordering, false)?), subsumed),
            (None, _) => (None, false),
        }
    } else {
        (None, false)
    };

    let mut index_orderings = HashMap::new();
    for node_idx in 0..graph.nodes.len() {
        let node = &graph.nodes[node_idx];
        if node.kind != TableKind::Base || node.no_index_access {
            continue;
        }
        let ordered: Vec<(usize, Vec<usize>)> = node
            .indexes
            .iter()
            .enumerate()
            .filter(|(_, index)| index.ordered)
            .map(|(idx, index)| (idx, index.keyparts.clone()))
            .collect();
        for (index_idx, keyparts) in ordered {
            let ordering: Ordering = keyparts
                .into_iter()
                .map(|column| OrderElement::asc(graph.column_item(node_idx, column)))
                .collect();
            let ordering_idx = orderings.add_ordering(ordering, false)?;
            index_orderings.insert((node_idx, index_idx), ordering_idx);
        }
    }

    if orderings.num_interesting_orderings() > 0 {
        collect_functional_dependencies(graph, &mut orderings)?;
    }
    orderings.build();

    for predicate in &mut graph.predicates {
        predicate.functional_dependencies = fd_mask(&predicate.functional_dependencies_idx);
    }
    for edge in &mut graph.edges {
        edge.functional_dependencies = fd_mask(&edge.functional_dependencies_idx);
    }

    debug!(
        "Interesting orders: {} orderings ({} interesting), {} functional dependencies, {} sort-ahead",
        orderings.num_orderings(),
        orderings.num_interesting_orderings(),
        orderings.num_fds(),
        sort_ahead_orderings.len()
    );

    Ok(InterestingOrders {
        orderings,
        sort_ahead_orderings,
        order_by,
        group_by,
        distinct,
        order_by_subsumed_by_distinct,
        index_orderings,
    })
}

fn fd_mask(indexes: &[usize]) -> u64 {
    indexes.iter().fold(0, |mask, idx| mask | (1u64 << idx))
}

/// Registers an ORDER BY or GROUP BY list. Orderings over nondeterministic items
/// can never be satisfied by anything but an explicit sort, so they are not interesting.
fn add_query_ordering(
    graph: &JoinGraph,
    orderings: &mut LogicalOrderings,
    sort_ahead: &mut Vec<SortAheadOrdering>,
    ordering: &[OrderElement],
) -> Result<Option<usize>> {
    if ordering.is_empty() {
        return Ok(None);
    }
    let used_tables = ordering
        .iter()
        .fold(0, |used, e| used | graph.items[e.item].used_tables());
    let deterministic = !overlaps(used_tables, RAND_TABLE_BIT);
    let idx = orderings.add_ordering(ordering.to_vec(), deterministic)?;
    if deterministic && !sort_ahead.iter().any(|s| s.ordering_idx == idx) {
        sort_ahead.push(SortAheadOrdering {
            ordering_idx: idx,
            required_nodes: used_tables & !PSEUDO_TABLE_BITS,
        });
    }
    Ok(Some(idx))
}

/// ORDER BY items that are selected come first, in ORDER BY order, then the rest of
/// the non-constant select list. Returns whether the ORDER BY is a prefix of the result.
fn distinct_ordering(graph: &JoinGraph, query: &QueryBlock) -> (Option<Ordering>, bool) {
    let mut ordering: Ordering = Vec::new();
    let mut all_order_by_selected = true;
    for element in &query.order_by {
        if !query.select_list.contains(&element.item) {
            all_order_by_selected = false;
            continue;
        }
        if !ordering.iter().any(|e| e.item == element.item) {
            ordering.push(*element);
        }
    }
    for &item in &query.select_list {
        if graph.items[item].is_const_for_execution() || ordering.iter().any(|e| e.item == item) {
            continue;
        }
        ordering.push(OrderElement::asc(item));
    }
    if ordering.is_empty() {
        return (None, false);
    }
    (Some(ordering), query.is_ordered() && all_order_by_selected)
}

fn fd_from_condition(graph: &JoinGraph, expr: &BoolExpr) -> Option<FunctionalDependency> {
    match expr.condition {
        Condition::IsNull { item } => Some(FunctionalDependency::constant(item)),
        Condition::Eq { left, right } => {
            let left_const = graph.items[left].is_const_for_execution();
            let right_const = graph.items[right].is_const_for_execution();
            match (left_const, right_const) {
                (true, true) => None,
                (true, false) => Some(FunctionalDependency::constant(right)),
                (false, true) => Some(FunctionalDependency::constant(left)),
                (false, false) => Some(FunctionalDependency::equivalence(left, right)),
            }
        }
        Condition::Other { .. } => None,
    }
}

/// Adds an FD; once the FD mask is full, further dependencies are dropped, which only
/// loses ordering information.
fn try_add_fd(orderings: &mut LogicalOrderings, fd: FunctionalDependency) -> Result<Option<usize>> {
    match orderings.add_functional_dependency(fd) {
        Ok(idx) => Ok(Some(idx)),
        Err(PlannerError::CapacityExceeded { limit, .. }) => {
            debug!("Functional dependency limit of {} reached, ignoring the rest", limit);
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

fn collect_functional_dependencies(graph: &mut JoinGraph, orderings: &mut LogicalOrderings) -> Result<()> {
    for edge_idx in 0..graph.edges.len() {
        let join_type = graph.edges[edge_idx].join_type;
        if !(join_type.is_inner() || join_type == JoinType::Semi) {
            continue;
        }
        let fds: Vec<FunctionalDependency> = graph.edges[edge_idx]
            .conditions()
            .filter_map(|c| fd_from_condition(graph, c))
            .collect();
        for fd in fds {
            if let Some(idx) = try_add_fd(orderings, fd)? {
                graph.edges[edge_idx].functional_dependencies_idx.push(idx);
            }
        }
    }

    for predicate_idx in 0..graph.predicates.len() {
        let Some(fd) = fd_from_condition(graph, &graph.predicates[predicate_idx].expr) else {
            continue;
        };
        if let Some(idx) = try_add_fd(orderings, fd)? {
            graph.predicates[predicate_idx]
                .functional_dependencies_idx
                .push(idx);
        }
    }

    for fd in unique_key_dependencies(graph) {
        if try_add_fd(orderings, fd)?.is_none() {
            break;
        }
    }
    Ok(())
}

/// A unique key over non-nullable columns determines every other referenced column
/// of its table, no matter which predicates have been applied.
fn unique_key_dependencies(graph: &JoinGraph) -> Vec<FunctionalDependency> {
    let mut fds = Vec::new();
    for (node_idx, node) in graph.nodes.iter().enumerate() {
        let column_items: HashMap<usize, ItemId> = graph
            .items
            .iter()
            .enumerate()
            .filter_map(|(id, item)| match item.kind {
                ItemKind::Column { node, column } if node == node_idx => Some((column, id)),
                _ => None,
            })
            .collect();
        for index in node.indexes.iter().filter(|index| index.unique) {
            if index.keyparts.iter().any(|&kp| node.columns[kp].nullable) {
                continue;
            }
            let Some(head) = index
                .keyparts
                .iter()
                .map(|kp| column_items.get(kp).copied())
                .collect::<Option<Vec<ItemId>>>()
            else {
                continue;
            };
            let mut columns: Vec<(&usize, &ItemId)> = column_items.iter().collect();
            columns.sort();
            for (column, &item) in columns {
                if index.keyparts.contains(column) {
                    continue;
                }
                let mut fd = FunctionalDependency::determines(head.clone(), item);
                fd.always_active = true;
                fds.push(fd);
            }
        }
    }
    fds
}
