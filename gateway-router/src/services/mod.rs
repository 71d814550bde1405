//! Implementation of the various steps in the gateway's processing pipeline.

use gateway_federation::OperationKind;
use tower::util::BoxCloneService;
use tower::BoxError;

use crate::graphql;

mod service_registry;
mod subgraph_service;

pub(crate) use self::service_registry::ServiceRegistry;
pub use self::subgraph_service::HttpMakeSubgraphService;
pub use self::subgraph_service::HttpSubgraphService;

/// The service every fetch of a subgraph goes through.
pub type BoxSubgraphService = BoxCloneService<SubgraphRequest, SubgraphResponse, BoxError>;

/// One request sent to a subgraph.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct SubgraphRequest {
    /// Name of the subgraph the request is for.
    pub subgraph_name: String,

    /// Kind of the subgraph operation.
    pub operation_kind: OperationKind,

    /// The GraphQL request body.
    pub subgraph_request: graphql::Request,
}

#[buildstructor::buildstructor]
impl SubgraphRequest {
    #[builder(visibility = "pub")]
    fn new(
        subgraph_name: String,
        operation_kind: Option<OperationKind>,
        subgraph_request: graphql::Request,
    ) -> Self {
        Self {
            subgraph_name,
            operation_kind: operation_kind.unwrap_or(OperationKind::Query),
            subgraph_request,
        }
    }
}

/// The answer of a subgraph.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct SubgraphResponse {
    pub response: graphql::Response,
}

#[buildstructor::buildstructor]
impl SubgraphResponse {
    #[builder(visibility = "pub")]
    fn new(response: graphql::Response) -> Self {
        Self { response }
    }
}

impl From<graphql::Response> for SubgraphResponse {
    fn from(response: graphql::Response) -> Self {
        Self { response }
    }
}

/// Creates the service used to fetch from a subgraph.
///
/// The gateway wraps every service it creates with the subgraph's timeout and concurrency limit.
pub trait MakeSubgraphService: Send + Sync + 'static {
    fn make(&self, subgraph_name: &str, url: &str) -> Result<BoxSubgraphService, BoxError>;
}

impl<F> MakeSubgraphService for F
where
    F: Fn(&str, &str) -> Result<BoxSubgraphService, BoxError> + Send + Sync + 'static,
{
    fn make(&self, subgraph_name: &str, url: &str) -> Result<BoxSubgraphService, BoxError> {
        self(subgraph_name, url)
    }
}
