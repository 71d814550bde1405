//! Gateway errors.
use displaydoc::Display;
use gateway_federation::CompositionError;
use gateway_federation::CompositionErrors;
use gateway_federation::DuplicateSubgraphError;
use gateway_federation::PlanError;
use gateway_federation::PlanningError;
use gateway_federation::ValidationErrors;
use serde::Serialize;
use thiserror::Error;
use tower::BoxError;

pub use crate::configuration::ConfigurationError;
pub use crate::graphql::Error;
use crate::graphql::ErrorExtension;
use crate::graphql::IntoGraphQLErrors;
use crate::json_ext::Path;
use crate::json_ext::Value;

/// Error types for execution.
///
/// Note that these are not actually returned to the client, but are instead converted to JSON for
/// [`struct@Error`].
#[derive(Error, Display, Debug, Clone, Serialize, Eq, PartialEq)]
#[serde(untagged)]
#[ignore_extra_doc_attributes]
#[non_exhaustive]
pub enum FetchError {
    /// service '{service}' response was malformed: {reason}
    SubrequestMalformedResponse {
        /// The service that responded with the malformed response.
        service: String,

        /// The reason the serialization failed.
        reason: String,
    },

    /// HTTP fetch failed from '{service}': {reason}
    ///
    /// note that this relates to a transport error and not a GraphQL error
    SubrequestHttpError {
        status_code: Option<u16>,

        /// The service failed.
        service: String,

        /// The reason the fetch failed.
        reason: String,
    },

    /// request to '{service}' timed out
    SubrequestTimeout {
        /// The service that did not answer in time.
        service: String,
    },

    /// unknown service '{service}'
    ValidationUnknownServiceError {
        /// The service that was unknown.
        service: String,
    },

    /// fetch from '{service}' was skipped: {reason}
    FetchSkipped {
        /// The service that was not called.
        service: String,

        /// Why the fetch could not run.
        reason: String,
    },

    /// request exceeded the deadline of {timeout_ms}ms
    DeadlineExceeded {
        /// The overall query budget.
        timeout_ms: u64,
    },

    /// could not find path: {reason}
    ExecutionPathNotFound { reason: String },
}

impl FetchError {
    /// Classifies an error returned by a subgraph service.
    pub(crate) fn from_service_error(service: &str, error: BoxError) -> FetchError {
        if error.is::<tower::timeout::error::Elapsed>() {
            return FetchError::SubrequestTimeout {
                service: service.to_string(),
            };
        }
        match error.downcast::<FetchError>() {
            Ok(fetch_error) => *fetch_error,
            Err(error) => FetchError::SubrequestHttpError {
                status_code: None,
                service: service.to_string(),
                reason: error.to_string(),
            },
        }
    }

    /// Convert the fetch error to a GraphQL error.
    pub(crate) fn to_graphql_error(&self, path: Option<Path>) -> Error {
        let mut value: Value = serde_json_bytes::to_value(self).unwrap_or_default();
        if let Some(extensions) = value.as_object_mut() {
            extensions
                .entry("code")
                .or_insert_with(|| self.extension_code().into());
            match self {
                FetchError::SubrequestHttpError {
                    service,
                    status_code,
                    ..
                } => {
                    extensions
                        .entry("service")
                        .or_insert_with(|| service.clone().into());
                    extensions.remove("status_code");
                    if let Some(status_code) = status_code {
                        extensions
                            .insert("http", serde_json_bytes::json!({ "status": status_code }));
                    }
                }
                FetchError::SubrequestMalformedResponse { service, .. }
                | FetchError::SubrequestTimeout { service }
                | FetchError::FetchSkipped { service, .. } => {
                    extensions
                        .entry("service")
                        .or_insert_with(|| service.clone().into());
                }
                _ => (),
            }
        }

        Error {
            message: self.to_string(),
            locations: Default::default(),
            path,
            extensions: value.as_object().cloned().unwrap_or_default(),
        }
    }
}

impl ErrorExtension for FetchError {
    fn extension_code(&self) -> String {
        match self {
            FetchError::SubrequestMalformedResponse { .. } => "SUBREQUEST_MALFORMED_RESPONSE",
            FetchError::SubrequestHttpError { .. } => "SUBREQUEST_HTTP_ERROR",
            FetchError::SubrequestTimeout { .. } => "SUBREQUEST_TIMEOUT",
            FetchError::ValidationUnknownServiceError { .. } => "VALIDATION_UNKNOWN_SERVICE",
            FetchError::FetchSkipped { .. } => "FETCH_SKIPPED",
            FetchError::DeadlineExceeded { .. } => "DEADLINE_EXCEEDED",
            FetchError::ExecutionPathNotFound { .. } => "EXECUTION_PATH_NOT_FOUND",
        }
        .to_string()
    }
}

/// An error while validating or planning a client operation.
#[derive(Error, Debug, Display, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QueryPlannerError {
    /// Must provide query string.
    MissingQuery,

    /// {0}
    Validation(ValidationErrors),

    /// {0}
    Planning(PlanningError),
}

impl From<PlanError> for QueryPlannerError {
    fn from(error: PlanError) -> Self {
        match error {
            PlanError::Validation(errors) => QueryPlannerError::Validation(errors),
            PlanError::Planning(error) => QueryPlannerError::Planning(error),
        }
    }
}

impl ErrorExtension for QueryPlannerError {
    fn extension_code(&self) -> String {
        match self {
            QueryPlannerError::MissingQuery | QueryPlannerError::Validation(_) => {
                "GRAPHQL_VALIDATION_FAILED"
            }
            QueryPlannerError::Planning(_) => "QUERY_PLANNING_FAILED",
        }
        .to_string()
    }
}

impl IntoGraphQLErrors for QueryPlannerError {
    fn into_graphql_errors(self) -> Vec<Error> {
        let code = self.extension_code();
        match self {
            QueryPlannerError::Validation(errors) => errors
                .errors
                .into_iter()
                .map(|error| {
                    Error::builder()
                        .message(error.message)
                        .extension_code(code.clone())
                        .build()
                })
                .collect(),
            error => vec![Error::builder()
                .message(error.to_string())
                .extension_code(code)
                .build()],
        }
    }
}

/// Errors raised while setting up the gateway or changing its schema.
#[derive(Error, Display, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    /// composition failed: {0}
    Composition(#[from] CompositionErrors),

    /// {0}
    DuplicateSubgraph(#[from] DuplicateSubgraphError),

    /// {0}
    InvalidSubgraph(#[from] CompositionError),

    /// {0}
    Configuration(#[from] ConfigurationError),

    /// unknown subgraph '{0}'
    UnknownSubgraph(String),

    /// could not create the service for subgraph '{name}': {reason}
    ServiceCreation {
        /// The subgraph the service was for.
        name: String,

        /// The reason the factory failed.
        reason: String,
    },
}
