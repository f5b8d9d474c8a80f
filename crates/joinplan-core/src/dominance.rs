//! # Path Dominance
//!
//! Compares two access paths for the same node subset along every dimension that can
//! make one of them the better building block for a larger plan:
//!
//! 1. `cost`
//! 2. `init_cost` (matters under a LIMIT or on the inner side of a nested loop)
//! 3. `init_once_cost` (matters on rescans)
//! 4. parameter tables, where fewer is better (subset containment)
//! 5. interesting orderings satisfied
//! 6. output row count, when enabled in the configuration
//!
//! A path dominates another when it is at least as good in every dimension and strictly
//! better in at least one. [`propose_access_path`] runs the tournament that keeps a
//! list of mutually non-dominated paths.

use crate::bitset::is_subset;
use crate::orderings::LogicalOrderings;
use crate::path::{AccessPath, PathArena, PathId};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathComparison {
    FirstDominates,
    SecondDominates,
    DifferentStrengths,
    Identical,
}

/// Tracks which side is better in at least one dimension.
#[derive(Debug, Default)]
struct Scoreboard {
    a_is_better: bool,
    b_is_better: bool,
}

impl Scoreboard {
    fn record(&mut self, a_better: bool, b_better: bool) {
        self.a_is_better |= a_better;
        self.b_is_better |= b_better;
    }

    fn compare_f64(&mut self, a: f64, b: f64) {
        self.record(a < b, b < a);
    }

    fn result(&self) -> PathComparison {
        match (self.a_is_better, self.b_is_better) {
            (true, true) => PathComparison::DifferentStrengths,
            (true, false) => PathComparison::FirstDominates,
            (false, true) => PathComparison::SecondDominates,
            (false, false) => PathComparison::Identical,
        }
    }
}

pub fn compare_access_paths(
    orderings: &LogicalOrderings,
    a: &AccessPath,
    b: &AccessPath,
    compare_row_counts: bool,
) -> PathComparison {
    let mut score = Scoreboard::default();

    score.compare_f64(a.cost, b.cost);
    score.compare_f64(a.init_cost, b.init_cost);
    score.compare_f64(a.init_once_cost, b.init_once_cost);

    // Parameter tables: a strict subset is better, incomparable sets make both better.
    if a.parameter_tables != b.parameter_tables {
        let a_subset = is_subset(a.parameter_tables, b.parameter_tables);
        let b_subset = is_subset(b.parameter_tables, a.parameter_tables);
        score.record(!b_subset, !a_subset);
    }

    // A parametrized path can only be used on the inner side of a nested loop, which
    // destroys any ordering it has.
    let a_state = if a.parameter_tables == 0 { a.ordering_state } else { 0 };
    let b_state = if b.parameter_tables == 0 { b.ordering_state } else { 0 };
    if a_state != b_state {
        score.record(
            orderings.more_ordered_than(a_state, b_state),
            orderings.more_ordered_than(b_state, a_state),
        );
    }

    if compare_row_counts {
        score.compare_f64(a.num_output_rows, b.num_output_rows);
    }

    score.result()
}

/// Outcome of one proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Proposal {
    Kept(PathId),
    Discarded,
}

impl Proposal {
    pub fn kept(self) -> Option<PathId> {
        match self {
            Proposal::Kept(id) => Some(id),
            Proposal::Discarded => None,
        }
    }
}

/// Offers `path` to the list of existing candidates for one subset.
///
/// The new path is discarded if any existing path dominates it or is identical to it.
/// Otherwise it is pushed to the arena and every existing path it dominates is
/// removed from the list; the first removed slot is reused, so removals may reorder
/// the tail of the list.
pub fn propose_access_path(
    arena: &mut PathArena,
    orderings: &LogicalOrderings,
    compare_row_counts: bool,
    path: AccessPath,
    existing: &mut Vec<PathId>,
    description: &str,
) -> Proposal {
    if existing.is_empty() {
        trace!("{} [{}] is first alternative, keeping", description, path.summary());
        let id = arena.push(path);
        existing.push(id);
        return Proposal::Kept(id);
    }

    let num_before = existing.len();
    let mut insert_position: Option<usize> = None;
    let mut num_dominated = 0;
    let mut i = 0;
    while i < existing.len() {
        let other = arena.get(existing[i]);
        match compare_access_paths(orderings, &path, other, compare_row_counts) {
            PathComparison::SecondDominates | PathComparison::Identical => {
                trace!(
                    "{} [{}] is not better than existing path [{}], discarding",
                    description,
                    path.summary(),
                    other.summary()
                );
                debug_assert!(insert_position.is_none());
                return Proposal::Discarded;
            }
            PathComparison::FirstDominates => {
                num_dominated += 1;
                if insert_position.is_none() {
                    insert_position = Some(i);
                    i += 1;
                } else {
                    existing.swap_remove(i);
                }
            }
            PathComparison::DifferentStrengths => {
                i += 1;
            }
        }
    }

    let id = arena.push(path);
    let summary = || arena[id].summary();
    match insert_position {
        Some(position) => {
            existing[position] = id;
            if num_before == 1 {
                trace!("{} [{}] is better than previous, replacing", description, summary());
            } else if num_dominated == num_before {
                trace!(
                    "{} [{}] is better than all previous alternatives, replacing all",
                    description,
                    summary()
                );
            } else {
                trace!(
                    "{} [{}] is better than {} others, replacing them",
                    description,
                    summary(),
                    num_dominated
                );
            }
        }
        None => {
            trace!("{} [{}] is potential alternative, appending", description, summary());
            existing.push(id);
        }
    }
    Proposal::Kept(id)
}
