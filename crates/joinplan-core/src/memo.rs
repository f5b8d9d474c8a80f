//! # Memo
//!
//! Maps each connected node subset seen during enumeration to its set of surviving
//! candidate paths. Every path for a subset was built with the same functional
//! dependencies active (those of the join edges inside the subset), which is recorded
//! alongside the list and checked whenever the list is stored back.
//!
//! Candidate lists are taken out of the memo while a proposal runs against them and
//! put back afterwards, so that the list can be mutated while the rest of the planner
//! state is borrowed.

use crate::bitset::NodeMap;
use crate::error::{PlannerError, Result};
use crate::orderings::FdSet;
use crate::path::PathId;
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccessPathSet {
    pub paths: Vec<PathId>,
    pub active_functional_dependencies: FdSet,
}

#[derive(Debug, Clone, Default)]
pub struct Memo {
    sets: HashMap<NodeMap, AccessPathSet>,
}

impl Memo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of subsets with an entry.
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn contains(&self, subset: NodeMap) -> bool {
        self.sets.contains_key(&subset)
    }

    pub fn get(&self, subset: NodeMap) -> Option<&AccessPathSet> {
        self.sets.get(&subset)
    }

    /// Candidates for `subset`; empty if the subset has not been seen.
    pub fn paths(&self, subset: NodeMap) -> &[PathId] {
        self.sets.get(&subset).map_or(&[], |set| set.paths.as_slice())
    }

    /// Removes the candidate list for `subset`, leaving the entry itself in place.
    pub fn take_paths(&mut self, subset: NodeMap) -> Vec<PathId> {
        self.sets
            .get_mut(&subset)
            .map(|set| std::mem::take(&mut set.paths))
            .unwrap_or_default()
    }

    /// Stores the candidate list for `subset`, creating the entry on first use.
    pub fn put_paths(&mut self, subset: NodeMap, paths: Vec<PathId>, fds: FdSet) -> Result<()> {
        match self.sets.get_mut(&subset) {
            Some(set) => {
                if set.active_functional_dependencies != fds {
                    return Err(PlannerError::internal(format!(
                        "subset 0x{:x} was planned with functional dependencies 0x{:x}, now 0x{:x}",
                        subset, set.active_functional_dependencies, fds
                    )));
                }
                set.paths = paths;
            }
            None => {
                self.sets.insert(
                    subset,
                    AccessPathSet {
                        paths,
                        active_functional_dependencies: fds,
                    },
                );
            }
        }
        Ok(())
    }

    pub fn subsets(&self) -> impl Iterator<Item = (&NodeMap, &AccessPathSet)> {
        self.sets.iter()
    }
}
