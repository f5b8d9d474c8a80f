//! # Logical Orderings and Functional Dependencies
//!
//! Tracks which sort orders a plan's output satisfies. A plan does not carry its
//! ordering directly; it carries a small [`StateIndex`] that stands for the pair
//! (physical ordering produced by the plan, set of active functional dependencies).
//! States are interned, so two plans with the same pair share one index, and the set
//! of *interesting* orderings each state satisfies is computed once, on interning.
//!
//! ## Implication
//!
//! Given active functional dependencies, an ordering `P` implies an ordering `Q` when
//! the reduced form of `Q` is a prefix of the reduced form of `P`. Reduction:
//!
//! 1. Equivalences (`a = b`) merge items into one class; every element is replaced by
//!    its class representative.
//! 2. Items that are functionally determined by the items already seen (or that are
//!    constant, `{} -> x`) add no ordering information and are dropped.
//!
//! Directions must match element by element. This mirrors the way
//! `PhysicalPropertySet::satisfied_by` compares sort keys by prefix, extended with FDs.
//!
//! ## Limits
//!
//! Interesting-ordering membership and FD sets are both 64-bit masks; adding more than
//! 64 orderings or 64 functional dependencies fails with `CapacityExceeded`.

use crate::bitset::{bits_set_in, is_subset};
use crate::error::{PlannerError, Result};
use crate::graph::ItemId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A set of functional dependency indexes.
pub type FdSet = u64;

/// Opaque handle to an interned ordering state.
pub type StateIndex = usize;

pub const MAX_ORDERINGS: usize = 64;
pub const MAX_FUNCTIONAL_DEPENDENCIES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderElement {
    pub item: ItemId,
    #[serde(default)]
    pub direction: Direction,
}

impl OrderElement {
    pub fn asc(item: ItemId) -> Self {
        Self {
            item,
            direction: Direction::Asc,
        }
    }

    pub fn desc(item: ItemId) -> Self {
        Self {
            item,
            direction: Direction::Desc,
        }
    }
}

pub type Ordering = Vec<OrderElement>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdKind {
    /// `head -> tail`
    Determines,
    /// `head[0] = tail`, usable in both directions.
    Equivalence,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionalDependency {
    pub kind: FdKind,
    pub head: Vec<ItemId>,
    pub tail: ItemId,
    /// Holds regardless of which predicates have been applied (e.g. unique keys).
    pub always_active: bool,
}

impl FunctionalDependency {
    pub fn determines(head: Vec<ItemId>, tail: ItemId) -> Self {
        Self {
            kind: FdKind::Determines,
            head,
            tail,
            always_active: false,
        }
    }

    pub fn constant(tail: ItemId) -> Self {
        Self::determines(Vec::new(), tail)
    }

    pub fn equivalence(left: ItemId, right: ItemId) -> Self {
        Self {
            kind: FdKind::Equivalence,
            head: vec![left],
            tail: right,
            always_active: false,
        }
    }
}

#[derive(Debug, Clone)]
struct OrderingState {
    ordering: usize,
    fds: FdSet,
    /// Interesting orderings this state satisfies.
    follows: u64,
}

#[derive(Debug, Clone)]
pub struct LogicalOrderings {
    orderings: Vec<Ordering>,
    interesting: u64,
    fds: Vec<FunctionalDependency>,
    always_active: FdSet,
    states: Vec<OrderingState>,
    state_lookup: HashMap<(usize, FdSet), StateIndex>,
    built: bool,
}

impl Default for LogicalOrderings {
    fn default() -> Self {
        Self::new()
    }
}

impl LogicalOrderings {
    /// Ordering 0 is always the empty ordering and state 0 is always "unordered".
    pub fn new() -> Self {
        Self {
            orderings: vec![Vec::new()],
            interesting: 0,
            fds: Vec::new(),
            always_active: 0,
            states: Vec::new(),
            state_lookup: HashMap::new(),
            built: false,
        }
    }

    pub fn add_ordering(&mut self, ordering: Ordering, interesting: bool) -> Result<usize> {
        self.check_not_built()?;
        if ordering.is_empty() {
            return Ok(0);
        }
        let idx = match self.orderings.iter().position(|o| *o == ordering) {
            Some(idx) => idx,
            None => {
                if self.orderings.len() >= MAX_ORDERINGS {
                    return Err(PlannerError::CapacityExceeded {
                        what: "orderings",
                        limit: MAX_ORDERINGS,
                    });
                }
                self.orderings.push(ordering);
                self.orderings.len() - 1
            }
        };
        if interesting {
            self.interesting |= 1u64 << idx;
        }
        Ok(idx)
    }

    pub fn add_functional_dependency(&mut self, fd: FunctionalDependency) -> Result<usize> {
        self.check_not_built()?;
        if let Some(idx) = self.fds.iter().position(|existing| *existing == fd) {
            return Ok(idx);
        }
        if self.fds.len() >= MAX_FUNCTIONAL_DEPENDENCIES {
            return Err(PlannerError::CapacityExceeded {
                what: "functional dependencies",
                limit: MAX_FUNCTIONAL_DEPENDENCIES,
            });
        }
        if fd.always_active {
            self.always_active |= 1u64 << self.fds.len();
        }
        self.fds.push(fd);
        Ok(self.fds.len() - 1)
    }

    fn check_not_built(&self) -> Result<()> {
        if self.built {
            return Err(PlannerError::internal(
                "orderings and functional dependencies must be added before build()",
            ));
        }
        Ok(())
    }

    /// Freezes the set of orderings and FDs and interns the unordered state.
    pub fn build(&mut self) {
        self.built = true;
        self.intern(0, 0);
    }

    pub fn fd_set(&self, fd_idx: usize) -> FdSet {
        1u64 << fd_idx
    }

    pub fn num_orderings(&self) -> usize {
        self.orderings.len()
    }

    pub fn num_interesting_orderings(&self) -> usize {
        self.interesting.count_ones() as usize
    }

    pub fn num_fds(&self) -> usize {
        self.fds.len()
    }

    pub fn ordering(&self, idx: usize) -> &Ordering {
        &self.orderings[idx]
    }

    pub fn functional_dependency(&self, idx: usize) -> &FunctionalDependency {
        &self.fds[idx]
    }

    pub fn is_interesting(&self, idx: usize) -> bool {
        self.interesting & (1u64 << idx) != 0
    }

    /// The state of a plan that produces exactly ordering `idx`.
    pub fn set_order(&mut self, ordering_idx: usize) -> StateIndex {
        self.intern(ordering_idx, 0)
    }

    /// The state reached from `state` once `fds` also hold.
    pub fn apply_fds(&mut self, state: StateIndex, fds: FdSet) -> StateIndex {
        let current = &self.states[state];
        if is_subset(fds, current.fds) {
            return state;
        }
        let (ordering, merged) = (current.ordering, current.fds | fds);
        self.intern(ordering, merged)
    }

    /// `a` satisfies every interesting ordering `b` does, and at least one more.
    pub fn more_ordered_than(&self, a: StateIndex, b: StateIndex) -> bool {
        let follows_a = self.states[a].follows & self.interesting;
        let follows_b = self.states[b].follows & self.interesting;
        is_subset(follows_b, follows_a) && follows_a != follows_b
    }

    pub fn does_follow_order(&self, state: StateIndex, ordering_idx: usize) -> bool {
        if ordering_idx == 0 {
            return true;
        }
        let current = &self.states[state];
        if self.is_interesting(ordering_idx) {
            return current.follows & (1u64 << ordering_idx) != 0;
        }
        let closure = self.closure(current.fds);
        prefix_of(
            &closure.reduce(&self.orderings[ordering_idx]),
            &closure.reduce(&self.orderings[current.ordering]),
        )
    }

    pub fn follows_any_interesting_order(&self, state: StateIndex) -> bool {
        self.states[state].follows & self.interesting != 0
    }

    fn intern(&mut self, ordering: usize, fds: FdSet) -> StateIndex {
        if let Some(&idx) = self.state_lookup.get(&(ordering, fds)) {
            return idx;
        }
        let closure = self.closure(fds);
        let reduced = closure.reduce(&self.orderings[ordering]);
        let follows = bits_set_in(self.interesting)
            .filter(|&q| prefix_of(&closure.reduce(&self.orderings[q]), &reduced))
            .fold(0u64, |acc, q| acc | (1u64 << q));

        self.states.push(OrderingState {
            ordering,
            fds,
            follows,
        });
        let idx = self.states.len() - 1;
        self.state_lookup.insert((ordering, fds), idx);
        idx
    }

    fn closure(&self, fds: FdSet) -> DependencyClosure {
        let active = fds | self.always_active;
        let mut parent: HashMap<ItemId, ItemId> = HashMap::new();
        for idx in bits_set_in(active) {
            let Some(fd) = self.fds.get(idx) else { continue };
            if fd.kind == FdKind::Equivalence {
                let a = find(&parent, fd.head[0]);
                let b = find(&parent, fd.tail);
                if a != b {
                    parent.insert(a.max(b), a.min(b));
                }
            }
        }
        let canonical: HashMap<ItemId, ItemId> = parent
            .keys()
            .map(|&item| (item, find(&parent, item)))
            .collect();

        let dependencies = bits_set_in(active)
            .filter_map(|idx| self.fds.get(idx))
            .filter(|fd| fd.kind == FdKind::Determines)
            .map(|fd| {
                let head = fd
                    .head
                    .iter()
                    .map(|item| *canonical.get(item).unwrap_or(item))
                    .collect();
                (head, *canonical.get(&fd.tail).unwrap_or(&fd.tail))
            })
            .collect();
        DependencyClosure {
            canonical,
            dependencies,
        }
    }
}

fn find(parent: &HashMap<ItemId, ItemId>, mut item: ItemId) -> ItemId {
    while let Some(&next) = parent.get(&item) {
        item = next;
    }
    item
}

fn prefix_of(needle: &[(ItemId, Direction)], haystack: &[(ItemId, Direction)]) -> bool {
    needle.len() <= haystack.len() && haystack[..needle.len()] == *needle
}

struct DependencyClosure {
    canonical: HashMap<ItemId, ItemId>,
    dependencies: Vec<(Vec<ItemId>, ItemId)>,
}

impl DependencyClosure {
    fn canonical(&self, item: ItemId) -> ItemId {
        *self.canonical.get(&item).unwrap_or(&item)
    }

    fn expand(&self, known: &mut HashSet<ItemId>) {
        loop {
            let mut changed = false;
            for (head, tail) in &self.dependencies {
                if !known.contains(tail) && head.iter().all(|h| known.contains(h)) {
                    known.insert(*tail);
                    changed = true;
                }
            }
            if !changed {
                return;
            }
        }
    }

    fn reduce(&self, ordering: &[OrderElement]) -> Vec<(ItemId, Direction)> {
        let mut known = HashSet::new();
        self.expand(&mut known);
        let mut reduced = Vec::with_capacity(ordering.len());
        for element in ordering {
            let item = self.canonical(element.item);
            if known.contains(&item) {
                continue;
            }
            reduced.push((item, element.direction));
            known.insert(item);
            self.expand(&mut known);
        }
        reduced
    }
}
