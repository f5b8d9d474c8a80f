//! # Planner Errors
//!
//! Every failure leaves the planner through [`PlannerError`]. There is no partial
//! plan on failure: `find_best_plan` returns either a complete plan or one error.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlannerError {
    // === Rejected before planning starts ===
    /// The query uses a construct the join planner cannot handle.
    #[error("the join planner does not support {feature}")]
    Unsupported { feature: String },

    /// More tables, predicates, orderings or functional dependencies than fit in a mask.
    #[error("{what} exceeds the supported maximum of {limit}")]
    CapacityExceeded { what: &'static str, limit: usize },

    /// Structurally invalid input graph.
    #[error("invalid join graph: {detail}")]
    InvalidGraph { detail: String },

    // === Raised during enumeration ===
    /// The memo grew past the configured subset ceiling.
    #[error("the join planner does not support large join graphs (more than {limit} connected subsets)")]
    GraphTooLarge { limit: usize },

    /// A recursive reference would have to be placed on the inner side of a non-commutative join.
    #[error("recursive reference to '{table}' must be the leftmost table of the join")]
    ForbiddenJoinOrder { table: String },

    // === Secondary engine ===
    /// The cost hook reported a hard error.
    #[error("secondary engine error: {message}")]
    SecondaryEngine { message: String },

    /// The cost hook rejected every complete plan.
    #[error("All plans were rejected by the secondary storage engine.")]
    AllPlansRejected,

    // === Bookkeeping ===
    #[error("internal planner error: {detail}")]
    Internal { detail: String },
}

impl PlannerError {
    pub fn internal(detail: impl Into<String>) -> Self {
        PlannerError::Internal {
            detail: detail.into(),
        }
    }

    pub fn invalid_graph(detail: impl Into<String>) -> Self {
        PlannerError::InvalidGraph {
            detail: detail.into(),
        }
    }

    /// Whether the error stems from the query or its input rather than a planner bug.
    pub fn is_user_error(&self) -> bool {
        !matches!(self, PlannerError::Internal { .. })
    }
}

pub type Result<T> = std::result::Result<T, PlannerError>;
