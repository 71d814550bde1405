//! Schema composition and query planning for the federated gateway.
//!
//! Subgraph schemas are registered in a [`SchemaRegistry`], merged by [`compose`] into a
//! [`FederatedSchema`], and client operations are turned into a [`QueryPlan`] by the
//! [`QueryPlanner`]. Executing plans is the job of `gateway-router`.

#![warn(
    rustdoc::broken_intra_doc_links,
    unreachable_pub,
    unreachable_patterns,
    unused,
    unused_qualifications,
    dead_code,
    while_true,
    unconditional_panic,
    clippy::all
)]

pub mod composition;
pub mod error;
pub mod operation;
pub mod query_plan;
pub mod registry;
pub mod schema;
pub mod subgraph;
mod values;

pub use crate::composition::compose;
pub use crate::error::CompositionError;
pub use crate::error::CompositionErrors;
pub use crate::error::DuplicateSubgraphError;
pub use crate::error::PlanError;
pub use crate::error::PlanningError;
pub use crate::error::ValidationError;
pub use crate::error::ValidationErrors;
pub use crate::operation::Operation;
pub use crate::operation::OperationKind;
pub use crate::operation::Variables;
pub use crate::query_plan::query_planner::QueryPlanner;
pub use crate::query_plan::FetchDataPathElement;
pub use crate::query_plan::FetchNode;
pub use crate::query_plan::QueryPlan;
pub use crate::registry::SchemaRegistry;
pub use crate::schema::FederatedSchema;
pub use crate::subgraph::Subgraph;
