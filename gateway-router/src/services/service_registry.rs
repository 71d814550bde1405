use std::collections::HashMap;
use std::sync::Arc;

use gateway_federation::FederatedSchema;
use parking_lot::Mutex;
use tower::ServiceBuilder;
use tower::ServiceExt;

use super::BoxSubgraphService;
use super::MakeSubgraphService;
use crate::configuration::Configuration;
use crate::configuration::SubgraphShaping;
use crate::error::GatewayError;

struct Entry {
    url: String,
    shaping: SubgraphShaping,
    service: Mutex<BoxSubgraphService>,
}

/// The shaped services of every subgraph in a federated schema.
///
/// Clones of a subgraph's service share its concurrency limit.
pub(crate) struct ServiceRegistry {
    services: HashMap<String, Arc<Entry>>,
}

impl ServiceRegistry {
    /// Creates a service for each subgraph of `schema`.
    ///
    /// Services of `previous` are kept when the subgraph's url and shaping did not change, so
    /// in-flight limits survive schema reloads.
    pub(crate) fn new(
        schema: &FederatedSchema,
        configuration: &Configuration,
        factory: &dyn MakeSubgraphService,
        previous: Option<&ServiceRegistry>,
    ) -> Result<Self, GatewayError> {
        let mut services = HashMap::new();
        for subgraph in schema.subgraphs() {
            let shaping = configuration.subgraphs.get(&subgraph.name);
            let reusable = previous
                .and_then(|previous| previous.services.get(&subgraph.name))
                .filter(|entry| entry.url == subgraph.url && &entry.shaping == shaping);
            let entry = match reusable {
                Some(entry) => entry.clone(),
                None => {
                    let inner = factory.make(&subgraph.name, &subgraph.url).map_err(|err| {
                        GatewayError::ServiceCreation {
                            name: subgraph.name.clone(),
                            reason: err.to_string(),
                        }
                    })?;
                    tracing::debug!(
                        subgraph = %subgraph.name,
                        url = %subgraph.url,
                        timeout = ?shaping.timeout,
                        max_in_flight = shaping.max_in_flight.get(),
                        "created subgraph service"
                    );
                    let service = ServiceBuilder::new()
                        .concurrency_limit(shaping.max_in_flight.get())
                        .timeout(shaping.timeout)
                        .service(inner)
                        .boxed_clone();
                    Arc::new(Entry {
                        url: subgraph.url.clone(),
                        shaping: shaping.clone(),
                        service: Mutex::new(service),
                    })
                }
            };
            services.insert(subgraph.name.clone(), entry);
        }
        Ok(Self { services })
    }

    pub(crate) fn get(&self, name: &str) -> Option<BoxSubgraphService> {
        self.services
            .get(name)
            .map(|entry| entry.service.lock().clone())
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use gateway_federation::compose;
    use gateway_federation::Subgraph;
    use serde_json_bytes::json;
    use tower::BoxError;

    use super::*;
    use crate::error::FetchError;
    use crate::graphql;
    use crate::services::SubgraphRequest;
    use crate::services::SubgraphResponse;

    fn schema(accounts_url: &str) -> FederatedSchema {
        compose(&[
            Arc::new(
                Subgraph::parse(
                    "accounts",
                    accounts_url,
                    include_str!("../testdata/accounts.graphql"),
                )
                .unwrap(),
            ),
            Arc::new(
                Subgraph::parse(
                    "products",
                    "http://products",
                    include_str!("../testdata/products.graphql"),
                )
                .unwrap(),
            ),
        ])
        .unwrap()
    }

    fn counting_factory(created: Arc<AtomicUsize>) -> impl MakeSubgraphService {
        move |_: &str, _: &str| -> Result<BoxSubgraphService, BoxError> {
            created.fetch_add(1, Ordering::SeqCst);
            Ok(tower::service_fn(|_: SubgraphRequest| async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, BoxError>(SubgraphResponse::from(
                    graphql::Response::builder().data(json!({})).build(),
                ))
            })
            .boxed_clone())
        }
    }

    fn request() -> SubgraphRequest {
        SubgraphRequest::builder()
            .subgraph_name("accounts")
            .subgraph_request(graphql::Request::builder().query("{ me { id } }").build())
            .build()
    }

    #[test]
    fn keeps_services_whose_subgraph_did_not_change() {
        let created = Arc::new(AtomicUsize::new(0));
        let factory = counting_factory(created.clone());
        let configuration = Configuration::default();

        let first =
            ServiceRegistry::new(&schema("http://accounts"), &configuration, &factory, None)
                .unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 2);
        assert!(first.contains("accounts"));
        assert!(first.contains("products"));
        assert!(!first.contains("reviews"));

        let second = ServiceRegistry::new(
            &schema("http://accounts"),
            &configuration,
            &factory,
            Some(&first),
        )
        .unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 2);
        assert!(second.get("accounts").is_some());

        ServiceRegistry::new(
            &schema("http://accounts-v2"),
            &configuration,
            &factory,
            Some(&second),
        )
        .unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn factory_errors_name_the_subgraph() {
        let factory = |name: &str, _: &str| -> Result<BoxSubgraphService, BoxError> {
            Err(format!("no transport for {name}").into())
        };
        let error = ServiceRegistry::new(
            &schema("http://accounts"),
            &Configuration::default(),
            &factory,
            None,
        )
        .err()
        .unwrap();
        assert!(matches!(error, GatewayError::ServiceCreation { .. }));
    }

    #[tokio::test]
    async fn services_time_out() {
        let configuration: Configuration =
            "subgraphs:\n  all:\n    timeout: 10ms\n".parse().unwrap();
        let registry = ServiceRegistry::new(
            &schema("http://accounts"),
            &configuration,
            &counting_factory(Arc::new(AtomicUsize::new(0))),
            None,
        )
        .unwrap();

        let error = registry
            .get("accounts")
            .unwrap()
            .oneshot(request())
            .await
            .unwrap_err();
        assert_eq!(
            FetchError::from_service_error("accounts", error),
            FetchError::SubrequestTimeout {
                service: "accounts".to_string()
            }
        );
    }
}
