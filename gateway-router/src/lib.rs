//! Runtime of the federated gateway: executes query plans against subgraphs and assembles
//! the client response.

#![warn(unreachable_pub)]

#[macro_use]
pub mod json_ext;

pub mod configuration;
pub mod error;
mod gateway;
pub mod graphql;
pub mod merger;
mod query_planner;
pub mod services;
mod spec;

pub use configuration::Configuration;
pub use gateway::Gateway;
pub use gateway::SubgraphDefinition;
pub use merger::ResultFragment;
pub use merger::ResultTree;
pub use services::MakeSubgraphService;
pub use services::SubgraphRequest;
pub use services::SubgraphResponse;
