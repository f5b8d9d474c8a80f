//! # Join Graph
//!
//! The join graph is the planner's input: the tables of one query block (nodes), the
//! join conditions connecting them (hyperedges), and the WHERE conditions (predicates).
//! It is built once per query block, serialized over the wire by the server, and only
//! touched by the planner to attach derived data (sargable predicates, promoted join
//! predicates, functional dependencies) to its own private copy.
//!
//! ## Items
//!
//! Conditions refer to scalar values through [`ItemId`]s, indexes into
//! [`JoinGraph::items`]. An item is a column of a node, a constant, a reference to an
//! enclosing query block, or an opaque expression with a known set of used tables.
//! Items are what orderings and functional dependencies talk about.
//!
//! ## Eligibility Sets
//!
//! Every predicate carries the minimal set of nodes that must be joined before it can
//! be evaluated. For plain WHERE conditions this is the set of tables the condition
//! reads; the builder of the graph may widen it (e.g. for conditions above an outer join).

use crate::bitset::{
    is_subset, overlaps, table_bitmap, tables_between, NodeMap, PredicateMap, MAX_PREDICATES,
    MAX_TABLES, OUTER_REF_TABLE_BIT, PSEUDO_TABLE_BITS, RAND_TABLE_BIT,
};
use crate::error::{PlannerError, Result};
use crate::orderings::FdSet;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type ItemId = usize;

// ---------------------------------------------------------------------------
// Items and conditions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ItemKind {
    Column {
        node: usize,
        column: usize,
    },
    Constant,
    /// A value supplied by an enclosing query block; constant during one execution.
    OuterReference,
    Expression {
        #[serde(rename = "usedTables")]
        used_tables: NodeMap,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub label: String,
    #[serde(flatten)]
    pub kind: ItemKind,
}

impl Item {
    pub fn used_tables(&self) -> NodeMap {
        match &self.kind {
            ItemKind::Column { node, .. } => table_bitmap(*node),
            ItemKind::Constant => 0,
            ItemKind::OuterReference => OUTER_REF_TABLE_BIT,
            ItemKind::Expression { used_tables } => *used_tables,
        }
    }

    pub fn is_field(&self) -> bool {
        matches!(self.kind, ItemKind::Column { .. })
    }

    /// Constant for the duration of one execution of the query block.
    pub fn is_const_for_execution(&self) -> bool {
        self.used_tables() & !OUTER_REF_TABLE_BIT == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Condition {
    Eq {
        left: ItemId,
        right: ItemId,
    },
    IsNull {
        item: ItemId,
    },
    Other {
        #[serde(rename = "usedTables")]
        used_tables: NodeMap,
    },
}

/// A correlated or uncorrelated subquery contained in a condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subquery {
    /// Cost of one execution of the subquery.
    pub cost: f64,
    /// Rows produced by one execution.
    pub rows: f64,
    /// Whether the result can be materialized once instead of re-evaluated per row.
    #[serde(default)]
    pub materializable: bool,
    #[serde(default = "default_row_width")]
    pub row_width: f64,
}

/// A boolean condition together with its estimated selectivity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoolExpr {
    pub label: String,
    pub condition: Condition,
    pub selectivity: f64,
    #[serde(default)]
    pub subqueries: Vec<Subquery>,
}

impl BoolExpr {
    pub fn new(label: impl Into<String>, condition: Condition, selectivity: f64) -> Self {
        Self {
            label: label.into(),
            condition,
            selectivity,
            subqueries: Vec::new(),
        }
    }

    pub fn with_subquery(mut self, subquery: Subquery) -> Self {
        self.subqueries.push(subquery);
        self
    }

    pub fn used_tables(&self, items: &[Item]) -> NodeMap {
        let item_tables = |id: ItemId| items.get(id).map_or(0, Item::used_tables);
        match &self.condition {
            Condition::Eq { left, right } => item_tables(*left) | item_tables(*right),
            Condition::IsNull { item } => item_tables(*item),
            Condition::Other { used_tables } => *used_tables,
        }
    }

    pub fn contains_subqueries(&self) -> bool {
        !self.subqueries.is_empty()
    }

    fn referenced_items(&self) -> Vec<ItemId> {
        match &self.condition {
            Condition::Eq { left, right } => vec![*left, *right],
            Condition::IsNull { item } => vec![*item],
            Condition::Other { .. } => Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub name: String,
    #[serde(default)]
    pub nullable: bool,
    /// An index lookup on this column fully checks an equality against it, so the
    /// comparison need not be re-evaluated after the lookup.
    #[serde(default = "default_true")]
    pub lookup_subsumes_comparison: bool,
}

impl Column {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nullable: false,
            lookup_subsumes_comparison: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Index {
    pub name: String,
    /// Column positions (into [`Node::columns`]) in key order.
    pub keyparts: Vec<usize>,
    #[serde(default)]
    pub unique: bool,
    /// Hash-style index that only supports lookups on the full key.
    #[serde(default)]
    pub whole_key_only: bool,
    /// Full scans return rows in key order.
    #[serde(default)]
    pub ordered: bool,
}

/// Rows produced by one query block feeding a derived table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterializedBlock {
    pub cost: f64,
    pub rows: f64,
    /// Result can be reused across re-executions of the owning block.
    #[serde(default)]
    pub cacheable: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TableKind {
    #[default]
    Base,
    /// The recursive reference inside a recursive common table expression.
    RecursiveReference,
    InformationSchema,
    TableFunction {
        #[serde(rename = "usedTables", default)]
        used_tables: NodeMap,
    },
    Derived {
        #[serde(rename = "lateralDeps", default)]
        lateral_deps: NodeMap,
        blocks: Vec<MaterializedBlock>,
    },
}

/// A sargable predicate: `field = other_side`, usable to drive an index lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SargablePredicate {
    pub predicate_index: usize,
    pub field: ItemId,
    pub other_side: ItemId,
}

/// One equi-join condition of one edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeConditionRef {
    pub edge: usize,
    pub condition: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub alias: String,
    #[serde(default)]
    pub kind: TableKind,
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub indexes: Vec<Index>,
    /// Average row width in bytes, used for hash table and temp table sizing.
    #[serde(default = "default_row_width")]
    pub row_width: f64,
    /// Rows are too wide for sorts to carry them; sorts must fetch rows by row ID.
    #[serde(default)]
    pub has_blobs: bool,
    #[serde(default)]
    pub no_index_access: bool,

    #[serde(skip)]
    pub sargable_predicates: Vec<SargablePredicate>,
    #[serde(skip)]
    pub join_conditions_pushable_to_this: Vec<EdgeConditionRef>,
}

impl Node {
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            kind: TableKind::Base,
            columns: Vec::new(),
            indexes: Vec::new(),
            row_width: default_row_width(),
            has_blobs: false,
            no_index_access: false,
            sargable_predicates: Vec::new(),
            join_conditions_pushable_to_this: Vec::new(),
        }
    }

    pub fn with_kind(mut self, kind: TableKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_blobs(mut self) -> Self {
        self.has_blobs = true;
        self
    }

    pub fn with_row_width(mut self, row_width: f64) -> Self {
        self.row_width = row_width;
        self
    }

    pub fn without_index_access(mut self) -> Self {
        self.no_index_access = true;
        self
    }

    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Whether the column is part of any index key.
    pub fn is_part_of_key(&self, column: usize) -> bool {
        self.indexes.iter().any(|idx| idx.keyparts.contains(&column))
    }

    pub fn is_recursive_reference(&self) -> bool {
        matches!(self.kind, TableKind::RecursiveReference)
    }
}

// ---------------------------------------------------------------------------
// Predicates and edges
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Predicate {
    #[serde(flatten)]
    pub expr: BoolExpr,
    pub eligibility_set: NodeMap,

    #[serde(skip)]
    pub functional_dependencies: FdSet,
    #[serde(skip)]
    pub functional_dependencies_idx: Vec<usize>,
}

impl Predicate {
    pub fn new(expr: BoolExpr, eligibility_set: NodeMap) -> Self {
        Self {
            expr,
            eligibility_set,
            functional_dependencies: 0,
            functional_dependencies_idx: Vec::new(),
        }
    }

    pub fn selectivity(&self) -> f64 {
        self.expr.selectivity
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JoinType {
    Inner,
    /// Inner join whose order is fixed by the query (STRAIGHT_JOIN).
    StraightInner,
    Left,
    Semi,
    Anti,
    Cartesian,
}

impl JoinType {
    pub fn is_commutative(self) -> bool {
        matches!(self, JoinType::Inner | JoinType::Cartesian)
    }

    pub fn is_inner(self) -> bool {
        matches!(
            self,
            JoinType::Inner | JoinType::StraightInner | JoinType::Cartesian
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            JoinType::Inner | JoinType::StraightInner => "inner",
            JoinType::Left => "left",
            JoinType::Semi => "semi",
            JoinType::Anti => "anti",
            JoinType::Cartesian => "cartesian",
        }
    }
}

/// A join may only be performed once `required_nodes` are all present, as soon as any
/// of `needed_to_activate` take part in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRule {
    pub needed_to_activate: NodeMap,
    pub required_nodes: NodeMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinEdge {
    pub join_type: JoinType,
    pub left: NodeMap,
    pub right: NodeMap,
    #[serde(default)]
    pub equijoin_conditions: Vec<BoolExpr>,
    #[serde(default)]
    pub join_conditions: Vec<BoolExpr>,
    #[serde(default)]
    pub conflict_rules: Vec<ConflictRule>,

    #[serde(skip)]
    pub functional_dependencies: FdSet,
    #[serde(skip)]
    pub functional_dependencies_idx: Vec<usize>,
}

impl JoinEdge {
    pub fn new(join_type: JoinType, left: NodeMap, right: NodeMap) -> Self {
        Self {
            join_type,
            left,
            right,
            equijoin_conditions: Vec::new(),
            join_conditions: Vec::new(),
            conflict_rules: Vec::new(),
            functional_dependencies: 0,
            functional_dependencies_idx: Vec::new(),
        }
    }

    pub fn with_equijoin(mut self, condition: BoolExpr) -> Self {
        self.equijoin_conditions.push(condition);
        self
    }

    pub fn with_condition(mut self, condition: BoolExpr) -> Self {
        self.join_conditions.push(condition);
        self
    }

    pub fn with_conflict_rule(mut self, rule: ConflictRule) -> Self {
        self.conflict_rules.push(rule);
        self
    }

    pub fn nodes(&self) -> NodeMap {
        self.left | self.right
    }

    /// Combined selectivity of every condition on the edge.
    pub fn selectivity(&self) -> f64 {
        self.equijoin_conditions
            .iter()
            .chain(self.join_conditions.iter())
            .map(|c| c.selectivity)
            .product()
    }

    pub fn conditions(&self) -> impl Iterator<Item = &BoolExpr> {
        self.equijoin_conditions
            .iter()
            .chain(self.join_conditions.iter())
    }
}

// ---------------------------------------------------------------------------
// The graph
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinGraph {
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<JoinEdge>,
    #[serde(default)]
    pub predicates: Vec<Predicate>,
    #[serde(default)]
    pub items: Vec<Item>,

    /// Predicates at or above this index are join conditions promoted for index lookups.
    #[serde(skip)]
    pub num_where_predicates: usize,
    #[serde(skip)]
    pub sargable_join_predicates: HashMap<EdgeConditionRef, usize>,
    /// Predicates containing subqueries that could be materialized.
    #[serde(skip)]
    pub materializable_predicates: PredicateMap,
}

impl JoinGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: Node) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    pub fn add_table(&mut self, alias: impl Into<String>) -> usize {
        self.add_node(Node::new(alias))
    }

    /// Returns the item for `alias.name`, declaring the column if needed.
    pub fn column(&mut self, node: usize, name: &str) -> ItemId {
        let position = self.declare_column(node, name);
        self.column_item(node, position)
    }

    fn declare_column(&mut self, node: usize, name: &str) -> usize {
        match self.nodes[node].column_position(name) {
            Some(position) => position,
            None => {
                self.nodes[node].columns.push(Column::new(name));
                self.nodes[node].columns.len() - 1
            }
        }
    }

    /// Returns the item for a declared column, creating it on first use.
    pub fn column_item(&mut self, node: usize, column: usize) -> ItemId {
        let kind = ItemKind::Column { node, column };
        if let Some(id) = self.items.iter().position(|item| item.kind == kind) {
            return id;
        }
        let label = format!(
            "{}.{}",
            self.nodes[node].alias, self.nodes[node].columns[column].name
        );
        self.push_item(label, kind)
    }

    pub fn constant(&mut self, label: impl Into<String>) -> ItemId {
        self.push_item(label.into(), ItemKind::Constant)
    }

    pub fn outer_reference(&mut self, label: impl Into<String>) -> ItemId {
        self.push_item(label.into(), ItemKind::OuterReference)
    }

    pub fn expression(&mut self, label: impl Into<String>, used_tables: NodeMap) -> ItemId {
        self.push_item(label.into(), ItemKind::Expression { used_tables })
    }

    fn push_item(&mut self, label: String, kind: ItemKind) -> ItemId {
        self.items.push(Item { label, kind });
        self.items.len() - 1
    }

    pub fn item(&self, id: ItemId) -> &Item {
        &self.items[id]
    }

    /// Adds an index over the named columns, declaring them as needed.
    pub fn add_index(&mut self, node: usize, name: &str, columns: &[&str], unique: bool) -> usize {
        let keyparts = columns
            .iter()
            .map(|column| {
                let position = self.declare_column(node, column);
                self.column_item(node, position);
                position
            })
            .collect();
        self.nodes[node].indexes.push(Index {
            name: name.to_string(),
            keyparts,
            unique,
            whole_key_only: false,
            ordered: true,
        });
        self.nodes[node].indexes.len() - 1
    }

    /// `left = right` with a label rendered from the item labels.
    pub fn eq(&self, left: ItemId, right: ItemId, selectivity: f64) -> BoolExpr {
        BoolExpr::new(
            format!("{} = {}", self.items[left].label, self.items[right].label),
            Condition::Eq { left, right },
            selectivity,
        )
    }

    /// Adds a WHERE predicate whose eligibility set is the set of tables it reads.
    pub fn add_predicate(&mut self, expr: BoolExpr) -> usize {
        let used = expr.used_tables(&self.items);
        self.add_predicate_with_eligibility(expr, used)
    }

    pub fn add_predicate_with_eligibility(&mut self, expr: BoolExpr, eligibility_set: NodeMap) -> usize {
        let eligibility_set = normalized_eligibility(eligibility_set);
        self.predicates.push(Predicate::new(expr, eligibility_set));
        self.num_where_predicates = self.predicates.len();
        self.predicates.len() - 1
    }

    pub fn add_edge(&mut self, edge: JoinEdge) -> usize {
        self.edges.push(edge);
        self.edges.len() - 1
    }

    pub fn all_tables(&self) -> NodeMap {
        tables_between(0, self.nodes.len())
    }

    pub fn where_predicates(&self) -> PredicateMap {
        tables_between(0, self.num_where_predicates)
    }

    /// Estimated width of a row joined from `nodes`.
    pub fn bytes_per_row(&self, nodes: NodeMap) -> f64 {
        crate::bitset::bits_set_in(nodes & self.all_tables())
            .map(|idx| self.nodes[idx].row_width)
            .sum()
    }

    pub fn passes_conflict_rules(&self, joined: NodeMap, edge: &JoinEdge) -> bool {
        edge.conflict_rules.iter().all(|rule| {
            !overlaps(joined, rule.needed_to_activate) || is_subset(rule.required_nodes, joined)
        })
    }

    /// Drops the outer-reference bit from every eligibility set, including those of
    /// deserialized predicates. Outer references are constants within the block.
    pub fn normalize_eligibility_sets(&mut self) {
        for predicate in &mut self.predicates {
            predicate.eligibility_set = normalized_eligibility(predicate.eligibility_set);
        }
    }

    /// Checks the structural invariants the planner relies on.
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(PlannerError::invalid_graph("the query block has no tables"));
        }
        if self.nodes.len() > MAX_TABLES {
            return Err(PlannerError::CapacityExceeded {
                what: "tables",
                limit: MAX_TABLES,
            });
        }
        if self.predicates.len() > MAX_PREDICATES {
            return Err(PlannerError::CapacityExceeded {
                what: "predicates",
                limit: MAX_PREDICATES,
            });
        }

        for item in &self.items {
            if let ItemKind::Column { node, column } = item.kind {
                let valid = self
                    .nodes
                    .get(node)
                    .is_some_and(|n| column < n.columns.len());
                if !valid {
                    return Err(PlannerError::invalid_graph(format!(
                        "item '{}' refers to a column that does not exist",
                        item.label
                    )));
                }
            }
        }

        for node in &self.nodes {
            for index in &node.indexes {
                if index.keyparts.is_empty()
                    || index.keyparts.iter().any(|&kp| kp >= node.columns.len())
                {
                    return Err(PlannerError::invalid_graph(format!(
                        "index '{}' on '{}' has invalid key parts",
                        index.name, node.alias
                    )));
                }
            }
        }

        let all = self.all_tables();
        for (idx, edge) in self.edges.iter().enumerate() {
            if edge.left == 0
                || edge.right == 0
                || overlaps(edge.left, edge.right)
                || !is_subset(edge.nodes(), all)
            {
                return Err(PlannerError::invalid_graph(format!(
                    "edge {} does not connect two disjoint, non-empty sets of tables",
                    idx
                )));
            }
            for condition in edge.conditions() {
                self.check_expr(condition)?;
            }
        }
        for predicate in &self.predicates {
            if !is_subset(normalized_eligibility(predicate.eligibility_set) & !RAND_TABLE_BIT, all) {
                return Err(PlannerError::invalid_graph(format!(
                    "predicate '{}' is eligible on tables 0x{:x}, not all of which exist",
                    predicate.expr.label, predicate.eligibility_set
                )));
            }
            self.check_expr(&predicate.expr)?;
        }
        Ok(())
    }

    fn check_expr(&self, expr: &BoolExpr) -> Result<()> {
        if expr.referenced_items().iter().any(|&id| id >= self.items.len()) {
            return Err(PlannerError::invalid_graph(format!(
                "condition '{}' refers to an unknown item",
                expr.label
            )));
        }
        if !(0.0..=1.0).contains(&expr.selectivity) {
            return Err(PlannerError::invalid_graph(format!(
                "condition '{}' has selectivity {} outside [0, 1]",
                expr.label, expr.selectivity
            )));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

/// Nondeterministic predicates keep `RAND_TABLE_BIT`; outer references are dropped.
fn normalized_eligibility(eligibility_set: NodeMap) -> NodeMap {
    (eligibility_set & !PSEUDO_TABLE_BITS) | (eligibility_set & RAND_TABLE_BIT)
}

fn default_row_width() -> f64 {
    100.0
}
