use gateway_federation::FederatedSchema;
use gateway_federation::FetchDataPathElement;
use gateway_federation::FetchNode;
use indexmap::IndexSet;
use serde_json_bytes::ByteString;
use tower::ServiceExt;
use tracing::Instrument;

use super::selection::execute_selection_set;
use super::FETCH_SPAN_NAME;
use crate::error::FetchError;
use crate::graphql;
use crate::graphql::Error;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::PathElement;
use crate::json_ext::Value;
use crate::json_ext::ValueExt;
use crate::merger::ResultFragment;
use crate::services::BoxSubgraphService;
use crate::services::SubgraphRequest;

const ENTITIES: &str = "_entities";
const REPRESENTATIONS: &str = "representations";

/// The variables sent with a fetch.
#[derive(Debug, PartialEq)]
pub(crate) struct Variables {
    pub(crate) variables: Object,
    /// For entity fetches, the response paths of each representation, in order.
    pub(crate) inverted_paths: Vec<Vec<Path>>,
}

impl Variables {
    /// Builds the variables of `node` from the client's variables and the data fetched so far.
    ///
    /// Returns `None` for an entity fetch that has nothing to resolve.
    pub(crate) fn new(
        node: &FetchNode,
        request_variables: &Object,
        data: &Value,
        schema: &FederatedSchema,
    ) -> Option<Variables> {
        let mut variables = Object::with_capacity(1 + node.variable_usages.len());
        variables.extend(node.variable_usages.iter().filter_map(|key| {
            request_variables
                .get_key_value(key.as_str())
                .map(|(variable_key, value)| (variable_key.clone(), value.clone()))
        }));

        if !node.is_entity_fetch() {
            return Some(Variables {
                variables,
                inverted_paths: Vec::new(),
            });
        }

        let mut inverted_paths: Vec<Vec<Path>> = Vec::new();
        let mut values: IndexSet<Value> = IndexSet::new();

        data.select_values_and_paths(&merge_path(node), |path, value| {
            let value = execute_selection_set(value, &node.requires, schema);
            if value.as_object().map(|o| !o.is_empty()).unwrap_or(false) {
                match values.get_index_of(&value) {
                    Some(index) => {
                        inverted_paths[index].push(path.clone());
                    }
                    None => {
                        inverted_paths.push(vec![path.clone()]);
                        values.insert(value);
                        debug_assert!(inverted_paths.len() == values.len());
                    }
                }
            }
        });

        if values.is_empty() {
            return None;
        }

        variables.insert(REPRESENTATIONS, Value::Array(Vec::from_iter(values)));
        Some(Variables {
            variables,
            inverted_paths,
        })
    }
}

/// The response path of a step, with `@` standing for every list item.
pub(crate) fn merge_path(node: &FetchNode) -> Path {
    Path(
        node.merge_at
            .iter()
            .map(|element| match element {
                FetchDataPathElement::Key(key) => PathElement::Key(key.clone()),
                FetchDataPathElement::AnyIndex => PathElement::Flatten,
            })
            .collect(),
    )
}

/// Where errors about the step as a whole are reported.
///
/// Root fetches selecting a single field report at that field. Entity fetches report at the
/// deepest location shared by everything they resolve.
pub(crate) fn error_path(node: &FetchNode) -> Option<Path> {
    if node.is_entity_fetch() {
        let path = merge_path(node);
        let shared = path
            .iter()
            .take_while(|element| !matches!(element, PathElement::Flatten))
            .count();
        return Some(path.prefix(shared));
    }
    match node.response_keys.as_slice() {
        [key] => Some(Path::from_slice(&[key])),
        _ => None,
    }
}

/// Sends `node` to its subgraph and turns the answer into fragments of the response.
pub(crate) async fn fetch_node(
    node: &FetchNode,
    service: BoxSubgraphService,
    variables: Variables,
) -> Result<Vec<ResultFragment>, FetchError> {
    let Variables {
        variables,
        inverted_paths,
    } = variables;

    let request = SubgraphRequest::builder()
        .subgraph_name(node.service_name.clone())
        .operation_kind(node.operation_kind)
        .subgraph_request(
            graphql::Request::builder()
                .query(node.operation.clone())
                .and_operation_name(node.operation_name.clone())
                .variables(variables)
                .build(),
        )
        .build();

    let response = service
        .oneshot(request)
        .instrument(tracing::info_span!(
            FETCH_SPAN_NAME,
            "subgraph.name" = %node.service_name,
            "step" = node.id,
        ))
        .await
        .map_err(|err| FetchError::from_service_error(&node.service_name, err))?
        .response;

    let errors = response
        .errors
        .into_iter()
        .map(|error| with_service(error, &node.service_name))
        .collect::<Vec<_>>();

    if node.is_entity_fetch() {
        response_at_path(node, response.data, errors, inverted_paths)
    } else {
        Ok(vec![ResultFragment {
            step: node.id,
            path: Path::empty(),
            value: response.data.unwrap_or_default(),
            errors,
        }])
    }
}

/// Places the `_entities` of an entity fetch at the paths their representations came from.
fn response_at_path(
    node: &FetchNode,
    data: Option<Value>,
    errors: Vec<Error>,
    inverted_paths: Vec<Vec<Path>>,
) -> Result<Vec<ResultFragment>, FetchError> {
    let malformed = |reason: String| FetchError::SubrequestMalformedResponse {
        service: node.service_name.clone(),
        reason,
    };

    let entities = match data {
        Some(Value::Object(mut data)) => match data.remove(ENTITIES) {
            Some(Value::Array(entities)) => Some(entities),
            Some(Value::Null) | None => None,
            Some(_) => return Err(malformed(format!("{ENTITIES} is not an array"))),
        },
        Some(Value::Null) | None => None,
        Some(_) => return Err(malformed("data is not an object".to_string())),
    };

    let mut fragments = Vec::new();
    match entities {
        Some(entities) => {
            if entities.len() != inverted_paths.len() {
                return Err(malformed(format!(
                    "expected {} entities, got {}",
                    inverted_paths.len(),
                    entities.len()
                )));
            }
            for (entity, paths) in entities.into_iter().zip(inverted_paths.iter()) {
                for path in paths {
                    fragments.push(ResultFragment::new(node.id, path.clone(), entity.clone()));
                }
            }
        }
        None if errors.is_empty() => {
            return Err(malformed(format!(
                "response to an entity fetch must contain {ENTITIES}"
            )));
        }
        None => {}
    }

    let errors = rebase_errors(node, errors, &inverted_paths);
    if !errors.is_empty() {
        fragments.push(ResultFragment::errors(node.id, errors));
    }
    Ok(fragments)
}

/// Rewrites `_entities/<i>/...` error paths to the response paths of entity `i`.
fn rebase_errors(node: &FetchNode, errors: Vec<Error>, inverted_paths: &[Vec<Path>]) -> Vec<Error> {
    let mut rebased = Vec::with_capacity(errors.len());
    for error in errors {
        let entity = match error.path.as_ref().map(|path| path.0.as_slice()) {
            Some([PathElement::Key(key), PathElement::Index(index), rest @ ..])
                if key.as_str() == ENTITIES =>
            {
                inverted_paths
                    .get(*index)
                    .map(|paths| (paths, Path(rest.to_vec())))
            }
            _ => None,
        };
        match entity {
            Some((paths, rest)) => {
                for path in paths {
                    let mut error = error.clone();
                    error.path = Some(path.join(&rest));
                    rebased.push(error);
                }
            }
            None => {
                let mut error = error;
                error.path = error_path(node);
                rebased.push(error);
            }
        }
    }
    rebased
}

fn with_service(mut error: Error, service_name: &str) -> Error {
    error
        .extensions
        .entry("service")
        .or_insert_with(|| Value::String(ByteString::from(service_name)));
    error
}
