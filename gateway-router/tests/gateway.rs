use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use gateway_router::error::GatewayError;
use gateway_router::graphql;
use gateway_router::json_ext::Path;
use gateway_router::services::BoxSubgraphService;
use gateway_router::Configuration;
use gateway_router::Gateway;
use gateway_router::MakeSubgraphService;
use gateway_router::SubgraphDefinition;
use gateway_router::SubgraphRequest;
use gateway_router::SubgraphResponse;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::json;
use serde_json_bytes::json as bjson;
use test_log::test;
use tower::BoxError;
use tower::ServiceExt;

type Handler = Arc<dyn Fn(&graphql::Request) -> serde_json::Value + Send + Sync>;

/// What the mocked subgraphs saw.
#[derive(Clone, Default)]
struct Recorder {
    calls: Arc<Mutex<Vec<String>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl Recorder {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

/// Subgraphs answering from closures. A handler returning `null` fails the request.
#[derive(Default)]
struct MockSubgraphs {
    handlers: HashMap<String, (Handler, Duration)>,
    recorder: Recorder,
}

impl MockSubgraphs {
    fn with(
        mut self,
        name: &str,
        delay: Duration,
        handler: impl Fn(&graphql::Request) -> serde_json::Value + Send + Sync + 'static,
    ) -> Self {
        self.handlers
            .insert(name.to_string(), (Arc::new(handler), delay));
        self
    }

    fn respond(self, name: &str, body: serde_json::Value) -> Self {
        self.with(name, Duration::ZERO, move |_| body.clone())
    }
}

impl MakeSubgraphService for MockSubgraphs {
    fn make(&self, subgraph_name: &str, _url: &str) -> Result<BoxSubgraphService, BoxError> {
        let (handler, delay) = self
            .handlers
            .get(subgraph_name)
            .cloned()
            .ok_or_else(|| format!("no mock for subgraph '{subgraph_name}'"))?;
        let recorder = self.recorder.clone();
        Ok(tower::service_fn(move |request: SubgraphRequest| {
            let handler = handler.clone();
            let recorder = recorder.clone();
            async move {
                recorder.calls.lock().push(request.subgraph_name.clone());
                let current = recorder.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                recorder.max_in_flight.fetch_max(current, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                recorder.in_flight.fetch_sub(1, Ordering::SeqCst);

                let body = handler(&request.subgraph_request);
                if body.is_null() {
                    return Err("connection refused".into());
                }
                let response: graphql::Response = serde_json::from_value(body)?;
                Ok::<_, BoxError>(SubgraphResponse::from(response))
            }
        })
        .boxed_clone())
    }
}

fn demo_subgraphs() -> Vec<SubgraphDefinition> {
    vec![
        SubgraphDefinition::new(
            "accounts",
            "http://accounts",
            include_str!("../src/testdata/accounts.graphql"),
        ),
        SubgraphDefinition::new(
            "products",
            "http://products",
            include_str!("../src/testdata/products.graphql"),
        ),
        SubgraphDefinition::new(
            "reviews",
            "http://reviews",
            include_str!("../src/testdata/reviews.graphql"),
        ),
    ]
}

fn letter_subgraphs() -> Vec<SubgraphDefinition> {
    ["a", "b", "c"]
        .into_iter()
        .map(|name| {
            SubgraphDefinition::new(
                name,
                format!("http://{name}"),
                format!("type Query {{ {name}: String }}"),
            )
        })
        .collect()
}

fn letters(delay_of_b: Duration) -> MockSubgraphs {
    MockSubgraphs::default()
        .respond("a", json!({ "data": { "a": "A" } }))
        .with("b", delay_of_b, |_| json!({ "data": { "b": "B" } }))
        .respond("c", json!({ "data": { "c": "C" } }))
}

fn gateway(
    configuration: Configuration,
    subgraphs: Vec<SubgraphDefinition>,
    mocks: MockSubgraphs,
) -> (Gateway, Recorder) {
    let recorder = mocks.recorder.clone();
    let factory: Arc<dyn MakeSubgraphService> = Arc::new(mocks);
    let gateway = Gateway::builder()
        .configuration(configuration)
        .subgraphs(subgraphs)
        .service_factory(factory)
        .build()
        .unwrap();
    (gateway, recorder)
}

fn query(query: &str) -> graphql::Request {
    graphql::Request::builder().query(query).build()
}

fn error_codes(response: &graphql::Response) -> Vec<(Option<String>, Option<Path>)> {
    response
        .errors
        .iter()
        .map(|error| (error.extension_code().map(str::to_string), error.path.clone()))
        .collect()
}

fn demo_mocks() -> MockSubgraphs {
    MockSubgraphs::default()
        .respond(
            "accounts",
            json!({ "data": { "me": { "name": "Ada", "__typename": "User", "id": "1" } } }),
        )
        .with("reviews", Duration::ZERO, |request| {
            assert_eq!(
                request.variables.get("representations"),
                Some(&bjson!([{ "__typename": "User", "id": "1" }]))
            );
            json!({ "data": { "_entities": [{ "reviews": [
                { "body": "great", "product": { "__typename": "Product", "upc": "1" } },
                { "body": "sturdy", "product": { "__typename": "Product", "upc": "1" } }
            ] }] } })
        })
        .with("products", Duration::ZERO, |request| {
            assert_eq!(
                request.variables.get("representations"),
                Some(&bjson!([{ "__typename": "Product", "upc": "1" }]))
            );
            json!({ "data": { "_entities": [{ "name": "Table" }] } })
        })
}

#[test(tokio::test)]
async fn resolves_entities_across_subgraphs() {
    let (gateway, recorder) = gateway(Configuration::default(), demo_subgraphs(), demo_mocks());

    let response = gateway
        .execute_query(query("{ me { name reviews { body product { name } } } }"))
        .await;

    insta::assert_json_snapshot!(response, @r###"
    {
      "data": {
        "me": {
          "name": "Ada",
          "reviews": [
            {
              "body": "great",
              "product": {
                "name": "Table"
              }
            },
            {
              "body": "sturdy",
              "product": {
                "name": "Table"
              }
            }
          ]
        }
      }
    }
    "###);
    assert_eq!(recorder.calls(), vec!["accounts", "reviews", "products"]);
}

#[test(tokio::test)]
async fn aliases_never_shadow_entity_keys() {
    let mocks = MockSubgraphs::default()
        .with("accounts", Duration::ZERO, |request| {
            assert_eq!(
                request.query.as_deref(),
                Some("{ me { id: name __typename __gateway_id: id } }")
            );
            json!({ "data": { "me": { "id": "Ada", "__typename": "User", "__gateway_id": "1" } } })
        })
        .with("reviews", Duration::ZERO, |request| {
            assert_eq!(
                request.variables.get("representations"),
                Some(&bjson!([{ "__typename": "User", "id": "1" }]))
            );
            json!({ "data": { "_entities": [{ "reviews": [{ "body": "great" }] }] } })
        });
    let (gateway, recorder) = gateway(Configuration::default(), demo_subgraphs(), mocks);

    let response = gateway
        .execute_query(query("{ me { id: name reviews { body } } }"))
        .await;

    assert_eq!(
        response.data,
        Some(bjson!({ "me": { "id": "Ada", "reviews": [{ "body": "great" }] } }))
    );
    assert!(response.errors.is_empty());
    assert_eq!(recorder.calls(), vec!["accounts", "reviews"]);
}

#[test(tokio::test)]
async fn a_slow_subgraph_only_loses_its_own_fields() {
    let configuration = Configuration::from_str(
        r#"
subgraphs:
  subgraphs:
    b:
      timeout: 50ms
"#,
    )
    .unwrap();
    let (gateway, _) = gateway(
        configuration,
        letter_subgraphs(),
        letters(Duration::from_secs(5)),
    );

    let response = gateway.execute_query(query("{ a b c }")).await;

    assert_eq!(
        response.data,
        Some(bjson!({ "a": "A", "b": null, "c": "C" }))
    );
    assert_eq!(
        error_codes(&response),
        vec![(Some("SUBREQUEST_TIMEOUT".to_string()), Some(Path::from("b")))]
    );
}

#[test(tokio::test)]
async fn failed_fetches_skip_dependent_steps() {
    let mocks = MockSubgraphs::default()
        .respond("accounts", serde_json::Value::Null)
        .respond("reviews", json!({ "data": { "_entities": [] } }))
        .respond(
            "products",
            json!({ "data": { "topProducts": [{ "name": "Table" }] } }),
        );
    let (gateway, recorder) = gateway(Configuration::default(), demo_subgraphs(), mocks);

    let response = gateway
        .execute_query(query("{ me { name reviews { body } } topProducts { name } }"))
        .await;

    assert_eq!(
        response.data,
        Some(bjson!({ "me": null, "topProducts": [{ "name": "Table" }] }))
    );
    assert_eq!(
        error_codes(&response),
        vec![
            (
                Some("SUBREQUEST_HTTP_ERROR".to_string()),
                Some(Path::from("me"))
            ),
            (Some("FETCH_SKIPPED".to_string()), Some(Path::from("me"))),
        ]
    );
    assert!(!recorder.calls().contains(&"reviews".to_string()));
}

#[test(tokio::test)]
async fn the_deadline_returns_partial_data() {
    let (gateway, _) = gateway(
        Configuration::default(),
        letter_subgraphs(),
        letters(Duration::from_secs(10)),
    );

    let started = tokio::time::Instant::now();
    let response = gateway
        .execute_query_until(
            query("{ a b c }"),
            tokio::time::Instant::now() + Duration::from_millis(200),
        )
        .await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(
        response.data,
        Some(bjson!({ "a": "A", "b": null, "c": "C" }))
    );
    assert_eq!(
        error_codes(&response),
        vec![(Some("DEADLINE_EXCEEDED".to_string()), None)]
    );
}

#[test(tokio::test)]
async fn concurrency_per_subgraph_is_limited() {
    let configuration = Configuration::from_str(
        r#"
subgraphs:
  all:
    max_in_flight: 2
"#,
    )
    .unwrap();
    let mocks = MockSubgraphs::default().with("a", Duration::from_millis(50), |_| {
        json!({ "data": { "a": "A" } })
    });
    let mocks = mocks
        .respond("b", json!({ "data": { "b": "B" } }))
        .respond("c", json!({ "data": { "c": "C" } }));
    let (gateway, recorder) = gateway(configuration, letter_subgraphs(), mocks);

    let responses = join_all((0..6).map(|_| gateway.execute_query(query("{ a }")))).await;

    for response in responses {
        assert_eq!(response.data, Some(bjson!({ "a": "A" })));
        assert!(response.errors.is_empty());
    }
    assert_eq!(recorder.calls().len(), 6);
    assert_eq!(recorder.max_in_flight.load(Ordering::SeqCst), 2);
}

#[test(tokio::test)]
async fn mutation_fields_run_in_document_order() {
    let subgraphs = vec![
        SubgraphDefinition::new(
            "accounts",
            "http://accounts",
            "type Query { me: ID } type Mutation { login(name: String!): ID logout: Boolean }",
        ),
        SubgraphDefinition::new(
            "cart",
            "http://cart",
            "type Query { cart: [ID] } type Mutation { addItem(id: ID!): Int }",
        ),
    ];
    let mocks = MockSubgraphs::default()
        .with("accounts", Duration::from_millis(20), |request| {
            if request.query.as_deref().unwrap_or_default().contains("login") {
                json!({ "data": { "login": "1" } })
            } else {
                json!({ "data": { "logout": true } })
            }
        })
        .respond("cart", json!({ "data": { "addItem": 1 } }));
    let (gateway, recorder) = gateway(Configuration::default(), subgraphs, mocks);

    let response = gateway
        .execute_query(query(
            r#"mutation { login(name: "ada") addItem(id: "1") logout }"#,
        ))
        .await;

    assert_eq!(
        response.data,
        Some(bjson!({ "login": "1", "addItem": 1, "logout": true }))
    );
    assert_eq!(recorder.calls(), vec!["accounts", "cart", "accounts"]);
}

#[test(tokio::test)]
async fn invalid_operations_never_reach_subgraphs() {
    let (gateway, recorder) = gateway(Configuration::default(), demo_subgraphs(), demo_mocks());

    let response = gateway.execute_query(query("{ me { nope } }")).await;
    assert_eq!(response.data, None);
    assert_eq!(response.errors.len(), 1);
    assert_eq!(
        response.errors[0].extension_code(),
        Some("GRAPHQL_VALIDATION_FAILED")
    );

    let response = gateway
        .execute_query(graphql::Request::builder().build())
        .await;
    assert_eq!(response.data, None);
    assert_eq!(response.errors[0].message, "Must provide query string.");

    assert!(recorder.calls().is_empty());
}

#[test(tokio::test)]
async fn failed_reload_keeps_the_current_schema() {
    let (gateway, _) = gateway(Configuration::default(), demo_subgraphs(), demo_mocks());
    let schema_id = gateway.schema().schema_id().to_string();

    let conflicting = r#"
        type Query { topProducts: [Product] }
        type Product @key(fields: "upc") { upc: Int! name: String }
    "#;
    assert!(matches!(
        gateway.reload("products", conflicting),
        Err(GatewayError::Composition(_))
    ));
    assert!(matches!(
        gateway.reload("products", "type Query {"),
        Err(GatewayError::InvalidSubgraph(_))
    ));
    assert!(matches!(
        gateway.reload("inventory", "type Query { stock: Int }"),
        Err(GatewayError::UnknownSubgraph(name)) if name == "inventory"
    ));

    assert_eq!(gateway.schema().schema_id().to_string(), schema_id);
    let response = gateway
        .execute_query(query("{ me { name reviews { body product { name } } } }"))
        .await;
    assert!(response.errors.is_empty(), "{:?}", response.errors);
}

#[test(tokio::test)]
async fn reload_publishes_the_new_schema() {
    let mocks = demo_mocks().respond(
        "products",
        json!({ "data": { "topProducts": [{ "name": "Table", "weight": 12 }] } }),
    );
    let (gateway, _) = gateway(Configuration::default(), demo_subgraphs(), mocks);
    let schema_id = gateway.schema().schema_id().to_string();
    let request = query("{ topProducts { name weight } }");
    assert!(gateway.plan(&request).is_err());

    gateway
        .reload(
            "products",
            r#"
            type Query { topProducts(first: Int = 5): [Product] }
            type Product @key(fields: "upc") { upc: String! name: String price: Int weight: Int }
            "#,
        )
        .unwrap();

    assert_ne!(gateway.schema().schema_id().to_string(), schema_id);
    let response = gateway.execute_query(request).await;
    assert_eq!(
        response.data,
        Some(bjson!({ "topProducts": [{ "name": "Table", "weight": 12 }] }))
    );
}

#[test(tokio::test)]
async fn subgraphs_can_be_added() {
    let mocks = demo_mocks().respond("inventory", json!({ "data": { "stock": 3 } }));
    let (gateway, _) = gateway(Configuration::default(), demo_subgraphs(), mocks);

    assert!(matches!(
        gateway.add_subgraph(SubgraphDefinition::new(
            "products",
            "http://products",
            "type Query { other: Int }"
        )),
        Err(GatewayError::DuplicateSubgraph(_))
    ));

    gateway
        .add_subgraph(SubgraphDefinition::new(
            "inventory",
            "http://inventory",
            "type Query { stock: Int }",
        ))
        .unwrap();
    let response = gateway.execute_query(query("{ stock }")).await;
    assert_eq!(response.data, Some(bjson!({ "stock": 3 })));
}

#[test]
fn construction_rejects_bad_input() {
    let factory: Arc<dyn MakeSubgraphService> = Arc::new(MockSubgraphs::default());
    let duplicated = Gateway::builder()
        .subgraph(SubgraphDefinition::new("a", "http://a", "type Query { a: Int }"))
        .subgraph(SubgraphDefinition::new("a", "http://a", "type Query { b: Int }"))
        .service_factory(factory.clone())
        .build();
    assert!(matches!(duplicated, Err(GatewayError::DuplicateSubgraph(_))));

    let unknown_mock = Gateway::builder()
        .subgraph(SubgraphDefinition::new("a", "http://a", "type Query { a: Int }"))
        .service_factory(factory)
        .build();
    assert!(matches!(
        unknown_mock,
        Err(GatewayError::ServiceCreation { name, .. }) if name == "a"
    ));
}

#[test(tokio::test)]
async fn fetches_subgraphs_over_http() {
    let server = wiremock::MockServer::start().await;
    wiremock::Mock::given(wiremock::matchers::method("POST"))
        .and(wiremock::matchers::body_partial_json(
            json!({ "query": "{ a }" }),
        ))
        .respond_with(
            wiremock::ResponseTemplate::new(200).set_body_json(json!({ "data": { "a": "A" } })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let gateway = Gateway::builder()
        .subgraph(SubgraphDefinition::new(
            "a",
            server.uri(),
            "type Query { a: String }",
        ))
        .build()
        .unwrap();

    let response = gateway.execute_query(query("{ a }")).await;
    assert_eq!(response.data, Some(bjson!({ "a": "A" })));
    assert!(response.errors.is_empty());
}
