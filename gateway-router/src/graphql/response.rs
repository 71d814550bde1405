use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map;

use crate::error::FetchError;
use crate::graphql::Error;
use crate::json_ext::Object;
use crate::json_ext::Value;

/// A graphql primary response.
/// Used for federated and subgraph queries.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct Response {
    /// The response data.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<Value>,

    /// The optional graphql errors encountered.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<Error>,

    /// The optional graphql extensions.
    #[serde(skip_serializing_if = "Object::is_empty", default)]
    pub extensions: Object,
}

#[buildstructor::buildstructor]
impl Response {
    /// Constructor
    #[builder(visibility = "pub")]
    fn new(data: Option<Value>, errors: Vec<Error>, extensions: Map<ByteString, Value>) -> Self {
        Self {
            data,
            errors,
            extensions,
        }
    }

    /// Create a [`Response`] from a subgraph's JSON payload.
    ///
    /// This will return an error (identifying the faulty service) if the input is invalid.
    pub(crate) fn from_value(service_name: &str, value: Value) -> Result<Response, FetchError> {
        let malformed = |reason: String| FetchError::SubrequestMalformedResponse {
            service: service_name.to_string(),
            reason,
        };
        let mut object = ensure_object!(value).map_err(|error| malformed(error.to_string()))?;

        let data = object.remove("data");
        let errors = extract_key_value_from_object!(object, "errors", Value::Array(v) => v)
            .map_err(|err| malformed(err.to_string()))?
            .into_iter()
            .flatten()
            .map(|v| Error::from_value(service_name, v))
            .collect::<Result<Vec<Error>, FetchError>>()?;
        let extensions =
            extract_key_value_from_object!(object, "extensions", Value::Object(o) => o)
                .map_err(|err| malformed(err.to_string()))?
                .unwrap_or_default();

        if data.is_none() && errors.is_empty() {
            return Err(malformed(
                "graphql response without data must contain at least one error".to_string(),
            ));
        }

        Ok(Response {
            data,
            errors,
            extensions,
        })
    }

    /// Parse a subgraph's response body.
    pub(crate) fn from_bytes(service_name: &str, bytes: &[u8]) -> Result<Response, FetchError> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|error| FetchError::SubrequestMalformedResponse {
                service: service_name.to_string(),
                reason: error.to_string(),
            })?;
        Response::from_value(service_name, value)
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;
    use crate::json_ext::Path;

    #[test]
    fn test_response() {
        let response = Response::from_bytes(
            "reviews",
            br#"{
              "data": { "reviews": [{ "body": "great" }] },
              "errors": [{ "message": "partial", "path": ["reviews", 0, "author"] }]
            }"#,
        )
        .unwrap();
        assert_eq!(
            response,
            Response::builder()
                .data(json!({ "reviews": [{ "body": "great" }] }))
                .error(
                    Error::builder()
                        .message("partial")
                        .path(Path::from("reviews/0/author"))
                        .build()
                )
                .build()
        );
    }

    #[test]
    fn test_malformed_responses() {
        for body in [&b"not json"[..], b"[]", b"{}", br#"{"errors": {}}"#] {
            assert!(
                matches!(
                    Response::from_bytes("reviews", body),
                    Err(FetchError::SubrequestMalformedResponse { ref service, .. }) if service == "reviews"
                ),
                "{}",
                String::from_utf8_lossy(body)
            );
        }
    }

    #[test]
    fn test_null_data_with_errors() {
        let response = Response::from_value(
            "reviews",
            json!({ "data": null, "errors": [{ "message": "down" }] }),
        )
        .unwrap();
        assert_eq!(response.data, Some(Value::Null));
        assert_eq!(response.errors.len(), 1);
    }
}
