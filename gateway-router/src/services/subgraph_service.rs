//! Tower fetcher for subgraphs.

use std::sync::Arc;
use std::task::Poll;

use futures::future::BoxFuture;
use tower::BoxError;
use tower::ServiceExt;

use super::BoxSubgraphService;
use super::MakeSubgraphService;
use super::SubgraphRequest;
use super::SubgraphResponse;
use crate::error::FetchError;
use crate::graphql;

/// Posts GraphQL requests to a subgraph over HTTP.
#[derive(Clone)]
pub struct HttpSubgraphService {
    client: reqwest::Client,
    service: Arc<String>,
    url: Arc<String>,
}

impl HttpSubgraphService {
    pub fn new(client: reqwest::Client, service: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            client,
            service: Arc::new(service.into()),
            url: Arc::new(url.into()),
        }
    }
}

impl tower::Service<SubgraphRequest> for HttpSubgraphService {
    type Response = SubgraphResponse;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: SubgraphRequest) -> Self::Future {
        let client = self.client.clone();
        let service_name = (*self.service).to_owned();
        let url = (*self.url).to_owned();

        Box::pin(async move {
            let response = client
                .post(url.as_str())
                .json(&request.subgraph_request)
                .send()
                .await
                .map_err(|err| {
                    tracing::error!(fetch_error = ?err);
                    FetchError::SubrequestHttpError {
                        status_code: err.status().map(|status| status.as_u16()),
                        service: service_name.clone(),
                        reason: err.to_string(),
                    }
                })?;

            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::SubrequestHttpError {
                    status_code: Some(status.as_u16()),
                    service: service_name,
                    reason: format!(
                        "{}: {}",
                        status.as_str(),
                        status.canonical_reason().unwrap_or("Unknown")
                    ),
                }
                .into());
            }

            let body = response
                .bytes()
                .await
                .map_err(|err| FetchError::SubrequestHttpError {
                    status_code: Some(status.as_u16()),
                    service: service_name.clone(),
                    reason: err.to_string(),
                })?;
            let graphql_response = graphql::Response::from_bytes(&service_name, &body)?;

            Ok(SubgraphResponse::from(graphql_response))
        })
    }
}

/// Creates an [`HttpSubgraphService`] per subgraph, sharing one connection pool.
#[derive(Clone, Default)]
pub struct HttpMakeSubgraphService {
    client: reqwest::Client,
}

impl HttpMakeSubgraphService {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl MakeSubgraphService for HttpMakeSubgraphService {
    fn make(&self, subgraph_name: &str, url: &str) -> Result<BoxSubgraphService, BoxError> {
        reqwest::Url::parse(url).map_err(|err| format!("invalid url '{url}': {err}"))?;
        Ok(HttpSubgraphService::new(self.client.clone(), subgraph_name, url).boxed_clone())
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;
    use wiremock::matchers::body_json;
    use wiremock::matchers::method;
    use wiremock::Mock;
    use wiremock::MockServer;
    use wiremock::ResponseTemplate;

    use super::*;

    fn request() -> SubgraphRequest {
        SubgraphRequest::builder()
            .subgraph_name("accounts")
            .subgraph_request(
                graphql::Request::builder()
                    .query("query Me__accounts__0 { me { name } }")
                    .operation_name("Me__accounts__0")
                    .build(),
            )
            .build()
    }

    #[tokio::test]
    async fn posts_the_graphql_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_json(serde_json::json!({
                "query": "query Me__accounts__0 { me { name } }",
                "operationName": "Me__accounts__0"
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "data": { "me": { "name": "Ada" } } })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let service = HttpMakeSubgraphService::default()
            .make("accounts", &server.uri())
            .unwrap();
        let response = service.oneshot(request()).await.unwrap();
        assert_eq!(
            response.response.data,
            Some(json!({ "me": { "name": "Ada" } }))
        );
        assert!(response.response.errors.is_empty());
    }

    #[tokio::test]
    async fn non_success_status_is_an_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let service = HttpSubgraphService::new(reqwest::Client::new(), "accounts", server.uri());
        let error = service.oneshot(request()).await.unwrap_err();
        assert_eq!(
            FetchError::from_service_error("accounts", error),
            FetchError::SubrequestHttpError {
                status_code: Some(503),
                service: "accounts".to_string(),
                reason: "503: Service Unavailable".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn invalid_body_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let service = HttpSubgraphService::new(reqwest::Client::new(), "accounts", server.uri());
        let error = service.oneshot(request()).await.unwrap_err();
        assert!(matches!(
            FetchError::from_service_error("accounts", error),
            FetchError::SubrequestMalformedResponse { service, .. } if service == "accounts"
        ));
    }

    #[test]
    fn rejects_invalid_urls() {
        assert!(HttpMakeSubgraphService::default()
            .make("accounts", "not a url")
            .is_err());
    }
}
