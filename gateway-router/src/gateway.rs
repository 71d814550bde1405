//! The gateway facade: holds the federated schema and runs client operations against it.

use std::sync::Arc;

use gateway_federation::compose;
use gateway_federation::FederatedSchema;
use gateway_federation::QueryPlan;
use gateway_federation::SchemaRegistry;
use gateway_federation::Subgraph;
use parking_lot::Mutex;
use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::Instrument;

use crate::configuration::Configuration;
use crate::error::GatewayError;
use crate::error::QueryPlannerError;
use crate::graphql;
use crate::graphql::IntoGraphQLErrors;
use crate::query_planner::execute;
use crate::query_planner::plan_request;
use crate::query_planner::ExecutionParameters;
use crate::query_planner::EXECUTION_SPAN_NAME;
use crate::services::HttpMakeSubgraphService;
use crate::services::MakeSubgraphService;
use crate::services::ServiceRegistry;
use crate::spec::Query;

/// A subgraph as handed to the gateway: its name, routing url and schema.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubgraphDefinition {
    pub name: String,
    pub url: String,
    pub sdl: String,
}

impl SubgraphDefinition {
    pub fn new(name: impl Into<String>, url: impl Into<String>, sdl: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            sdl: sdl.into(),
        }
    }
}

/// What queries run against. Replaced as a whole when the schema changes.
struct GatewayState {
    schema: Arc<FederatedSchema>,
    services: Arc<ServiceRegistry>,
}

/// A federated GraphQL gateway.
///
/// Queries read a snapshot of the current schema, so a reload never affects a query that
/// already started.
pub struct Gateway {
    configuration: Configuration,
    registry: SchemaRegistry,
    service_factory: Arc<dyn MakeSubgraphService>,
    state: RwLock<Arc<GatewayState>>,
    reload_lock: Mutex<()>,
}

#[buildstructor::buildstructor]
impl Gateway {
    /// Registers `subgraphs` and composes them.
    ///
    /// Subgraphs are fetched over HTTP unless a `service_factory` is given.
    #[builder(visibility = "pub")]
    fn new(
        configuration: Option<Configuration>,
        subgraphs: Vec<SubgraphDefinition>,
        service_factory: Option<Arc<dyn MakeSubgraphService>>,
    ) -> Result<Self, GatewayError> {
        let configuration = configuration.unwrap_or_default().validate()?;
        let service_factory =
            service_factory.unwrap_or_else(|| Arc::new(HttpMakeSubgraphService::default()));

        let registry = SchemaRegistry::new();
        for definition in subgraphs {
            let subgraph = Subgraph::parse(definition.name, definition.url, definition.sdl)?;
            registry.register(subgraph, false)?;
        }

        let schema = compose(&registry.snapshot())?;
        let services = ServiceRegistry::new(&schema, &configuration, service_factory.as_ref(), None)?;
        tracing::info!(
            schema_id = %schema.schema_id(),
            subgraphs = registry.len(),
            "federated schema composed"
        );

        Ok(Self {
            configuration,
            registry,
            service_factory,
            state: RwLock::new(Arc::new(GatewayState {
                schema: Arc::new(schema),
                services: Arc::new(services),
            })),
            reload_lock: Mutex::new(()),
        })
    }

    /// The federated schema queries currently run against.
    pub fn schema(&self) -> Arc<FederatedSchema> {
        self.state.read().schema.clone()
    }

    /// Validates and plans the operation of `request` without running it.
    pub fn plan(&self, request: &graphql::Request) -> Result<QueryPlan, QueryPlannerError> {
        let schema = self.schema();
        plan_request(&schema, request)
    }

    /// Runs a client operation within the configured query timeout.
    pub async fn execute_query(&self, request: graphql::Request) -> graphql::Response {
        let deadline = Instant::now() + self.configuration.gateway.query_timeout;
        self.execute_query_until(request, deadline).await
    }

    /// Runs a client operation, returning whatever completed by `deadline`.
    ///
    /// Operations failing validation or planning return errors without data and without
    /// contacting any subgraph.
    pub async fn execute_query_until(
        &self,
        request: graphql::Request,
        deadline: Instant,
    ) -> graphql::Response {
        let started = std::time::Instant::now();
        let state = self.state.read().clone();

        let plan = match plan_request(&state.schema, &request) {
            Ok(plan) => plan,
            Err(error) => {
                tracing::info!(
                    operation_name = request.operation_name.as_deref().unwrap_or_default(),
                    %error,
                    "rejected query"
                );
                return graphql::Response::builder()
                    .errors(error.into_graphql_errors())
                    .build();
            }
        };

        let parameters = ExecutionParameters {
            schema: &state.schema,
            services: &state.services,
            variables: &request.variables,
        };
        let tree = execute(&plan, &parameters, deadline)
            .instrument(tracing::info_span!(
                EXECUTION_SPAN_NAME,
                steps = plan.nodes().len()
            ))
            .await;

        let mut response = graphql::Response::builder()
            .data(tree.data)
            .errors(tree.errors)
            .build();
        Query::new(plan.operation(), &state.schema).format_response(&mut response);

        tracing::info!(
            operation_name = request.operation_name.as_deref().unwrap_or_default(),
            latency_ms = started.elapsed().as_millis() as u64,
            steps = plan.nodes().len(),
            errors = response.errors.len(),
            "executed query"
        );
        response
    }

    /// Replaces the schema of a registered subgraph and recomposes.
    ///
    /// On failure the current schema stays in use and the error is returned.
    pub fn reload(&self, name: &str, sdl: &str) -> Result<(), GatewayError> {
        let _guard = self.reload_lock.lock();
        let result = self
            .registry
            .get(name)
            .ok_or_else(|| GatewayError::UnknownSubgraph(name.to_string()))
            .and_then(|existing| Ok(Subgraph::parse(name, existing.url.clone(), sdl)?))
            .and_then(|subgraph| self.recompose(subgraph, true));
        if let Err(error) = &result {
            tracing::error!(subgraph = name, %error, "schema reload failed, keeping the current schema");
        }
        result
    }

    /// Adds a subgraph and recomposes. The name must not be registered with another schema.
    pub fn add_subgraph(&self, definition: SubgraphDefinition) -> Result<(), GatewayError> {
        let _guard = self.reload_lock.lock();
        let name = definition.name.clone();
        let result = Subgraph::parse(definition.name, definition.url, definition.sdl)
            .map_err(GatewayError::from)
            .and_then(|subgraph| {
                self.registry.check_new(&subgraph)?;
                self.recompose(subgraph, false)
            });
        if let Err(error) = &result {
            tracing::error!(subgraph = %name, %error, "adding subgraph failed, keeping the current schema");
        }
        result
    }

    /// Composes the registry with `candidate` in it and, if that succeeds, registers it and
    /// publishes the new schema.
    fn recompose(&self, candidate: Subgraph, replace: bool) -> Result<(), GatewayError> {
        let candidate = Arc::new(candidate);
        let schema = compose(&self.registry.snapshot_with(candidate.clone()))?;
        let previous = self.state.read().clone();
        let services = ServiceRegistry::new(
            &schema,
            &self.configuration,
            self.service_factory.as_ref(),
            Some(&previous.services),
        )?;
        self.registry.register((*candidate).clone(), replace)?;

        tracing::info!(
            subgraph = %candidate.name,
            signature = %candidate.signature(),
            schema_id = %schema.schema_id(),
            "federated schema updated"
        );
        *self.state.write() = Arc::new(GatewayState {
            schema: Arc::new(schema),
            services: Arc::new(services),
        });
        Ok(())
    }
}
