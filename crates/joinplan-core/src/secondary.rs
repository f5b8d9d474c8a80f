//! # Secondary Engine Hook
//!
//! A secondary execution engine can restrict which operators the planner may use and
//! adjust (or veto) the cost of every candidate before it enters a tournament. A
//! veto is not an error: the candidate is simply dropped. A hook error aborts planning.

use crate::graph::JoinGraph;
use crate::path::{AccessPath, AccessPathTypes};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookVerdict {
    Accept,
    Reject,
}

pub trait SecondaryEngineCostHook: Send + Sync {
    /// May rewrite the costs of `path`. `Err` carries a message for the user.
    fn modify_access_path_cost(
        &self,
        graph: &JoinGraph,
        path: &mut AccessPath,
    ) -> Result<HookVerdict, String>;
}

impl<F> SecondaryEngineCostHook for F
where
    F: Fn(&JoinGraph, &mut AccessPath) -> Result<HookVerdict, String> + Send + Sync,
{
    fn modify_access_path_cost(
        &self,
        graph: &JoinGraph,
        path: &mut AccessPath,
    ) -> Result<HookVerdict, String> {
        self(graph, path)
    }
}

pub struct SecondaryEngine {
    pub name: String,
    pub supported_access_paths: AccessPathTypes,
    pub cost_hook: Option<Box<dyn SecondaryEngineCostHook>>,
}

impl SecondaryEngine {
    pub fn new(name: impl Into<String>, supported_access_paths: AccessPathTypes) -> Self {
        Self {
            name: name.into(),
            supported_access_paths,
            cost_hook: None,
        }
    }

    pub fn with_cost_hook(mut self, hook: impl SecondaryEngineCostHook + 'static) -> Self {
        self.cost_hook = Some(Box::new(hook));
        self
    }
}

impl fmt::Debug for SecondaryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecondaryEngine")
            .field("name", &self.name)
            .field("supported_access_paths", &self.supported_access_paths)
            .field("cost_hook", &self.cost_hook.is_some())
            .finish()
    }
}
