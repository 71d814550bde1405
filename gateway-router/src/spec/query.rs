//! Query processing.
//!
//! Shapes the merged data of a plan into the response the client asked for.

use gateway_federation::operation::Field;
use gateway_federation::operation::Operation;
use gateway_federation::operation::Selection;
use gateway_federation::operation::SelectionSet;
use gateway_federation::schema::FieldType;
use gateway_federation::FederatedSchema;
use serde_json_bytes::ByteString;
use serde_json_bytes::Entry;

use crate::graphql::Error;
use crate::graphql::Response;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::PathElement;
use crate::json_ext::Value;
use crate::json_ext::ValueExt;

pub(crate) const TYPENAME: &str = "__typename";

/// A null found where the schema forbids one. Propagates up to the nearest nullable parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct InvalidValue;

/// A client operation, normalized against the federated schema.
pub(crate) struct Query<'a> {
    operation: &'a Operation,
    schema: &'a FederatedSchema,
}

struct FormatParameters<'a> {
    schema: &'a FederatedSchema,
    errors: Vec<Error>,
}

impl<'a> Query<'a> {
    pub(crate) fn new(operation: &'a Operation, schema: &'a FederatedSchema) -> Self {
        Self { operation, schema }
    }

    /// Re-format the response value to match this query.
    ///
    /// This will discard unrequested fields, re-order the output to match the order of the
    /// query, and replace missing fields with `null`. A `null` in a non-null position nulls the
    /// nearest nullable parent, or the whole data when there is none.
    #[tracing::instrument(skip_all, level = "trace")]
    pub(crate) fn format_response(&self, response: &mut Response) {
        let data = std::mem::take(&mut response.data);
        let empty = Object::new();
        let input = match &data {
            Some(Value::Object(input)) => input,
            _ => &empty,
        };

        let mut parameters = FormatParameters {
            schema: self.schema,
            errors: Vec::new(),
        };
        let mut output = Object::with_capacity(self.operation.selection_set.selections.len());
        let mut path = Path::default();
        let formatted = match self.apply_selection_set(
            &mut parameters,
            &self.operation.selection_set,
            input,
            &mut output,
            &mut path,
            &self.operation.selection_set.type_name,
        ) {
            Ok(()) => Value::Object(output),
            Err(InvalidValue) => Value::Null,
        };

        response.data = Some(formatted);
        response.errors.append(&mut parameters.errors);
    }

    fn apply_selection_set(
        &self,
        parameters: &mut FormatParameters,
        selection_set: &SelectionSet,
        input: &Object,
        output: &mut Object,
        path: &mut Path,
        runtime_type: &str,
    ) -> Result<(), InvalidValue> {
        for selection in &selection_set.selections {
            match selection {
                Selection::Field(field) => {
                    let key = field.response_key();
                    let value = if field.is_typename() {
                        input
                            .get(TYPENAME)
                            .filter(|typename| typename.is_string())
                            .cloned()
                            .unwrap_or_else(|| Value::String(ByteString::from(runtime_type)))
                    } else {
                        path.push(PathElement::Key(key.to_string()));
                        let value = self.format_value(
                            parameters,
                            &field.ty,
                            input.get(key).unwrap_or(&Value::Null),
                            path,
                            runtime_type,
                            field,
                        );
                        path.pop();
                        value?
                    };

                    match output.entry(key) {
                        Entry::Vacant(entry) => {
                            entry.insert(value);
                        }
                        Entry::Occupied(entry) => {
                            entry.into_mut().deep_merge(value);
                        }
                    }
                }
                Selection::InlineFragment(fragment) => {
                    if self
                        .schema
                        .is_subtype(&fragment.type_condition, runtime_type)
                    {
                        self.apply_selection_set(
                            parameters,
                            &fragment.selection_set,
                            input,
                            output,
                            path,
                            runtime_type,
                        )?;
                    }
                }
            }
        }
        Ok(())
    }

    fn format_value(
        &self,
        parameters: &mut FormatParameters,
        field_type: &FieldType,
        input: &Value,
        path: &mut Path,
        parent_type: &str,
        field: &Field,
    ) -> Result<Value, InvalidValue> {
        match field_type {
            FieldType::NonNull(inner_type) => {
                let reported = parameters.errors.len();
                let value =
                    self.format_value(parameters, inner_type, input, path, parent_type, field)?;
                if !value.is_null() {
                    return Ok(value);
                }
                if parameters.errors.len() > reported {
                    // a descendant was already reported for this null
                    return Err(InvalidValue);
                }
                let message = match path.0.last() {
                    Some(PathElement::Index(i)) => format!(
                        "Cannot return null for non-nullable array element of type {} at index {i}",
                        inner_type.inner_type_name()
                    ),
                    _ => format!(
                        "Cannot return null for non-nullable field {parent_type}.{}",
                        field.name
                    ),
                };
                parameters.errors.push(
                    Error::builder()
                        .message(message)
                        .path(path.clone())
                        .build(),
                );
                Err(InvalidValue)
            }

            // an invalid element nulls the whole list
            FieldType::List(inner_type) => match input {
                Value::Array(input_array) => {
                    let mut output_array = Vec::with_capacity(input_array.len());
                    for (i, element) in input_array.iter().enumerate() {
                        path.push(PathElement::Index(i));
                        let value =
                            self.format_value(parameters, inner_type, element, path, parent_type, field);
                        path.pop();
                        match value {
                            Ok(value) => output_array.push(value),
                            Err(InvalidValue) => return Ok(Value::Null),
                        }
                    }
                    Ok(Value::Array(output_array))
                }
                _ => Ok(Value::Null),
            },

            FieldType::Named(type_name) => {
                if parameters.schema.is_leaf(type_name) {
                    return Ok(input.clone());
                }
                let (Value::Object(input_object), Some(selection_set)) =
                    (input, field.selection_set.as_ref())
                else {
                    return Ok(Value::Null);
                };
                let runtime_type = input_object
                    .get(TYPENAME)
                    .and_then(|typename| typename.as_str())
                    .unwrap_or(type_name);

                let mut output = Object::with_capacity(selection_set.selections.len());
                match self.apply_selection_set(
                    parameters,
                    selection_set,
                    input_object,
                    &mut output,
                    path,
                    runtime_type,
                ) {
                    Ok(()) => Ok(Value::Object(output)),
                    Err(InvalidValue) => Ok(Value::Null),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use gateway_federation::compose;
    use gateway_federation::Subgraph;
    use serde_json_bytes::json;

    use super::*;

    fn schema() -> FederatedSchema {
        compose(&[Arc::new(
            Subgraph::parse(
                "shop",
                "http://shop",
                r#"
                type Query {
                  me: User
                  owner: User!
                  items: [Item!]
                  search: [Result]
                }
                type User @key(fields: "id") {
                  id: ID!
                  name: String!
                  nickname: String
                }
                type Item { sku: String! }
                union Result = User | Item
                "#,
            )
            .unwrap(),
        )])
        .unwrap()
    }

    fn format(query: &str, data: Value) -> Response {
        let schema = schema();
        let operation =
            Operation::parse(&schema, query, None, &Default::default()).unwrap();
        let mut response = Response::builder().data(data).build();
        Query::new(&operation, &schema).format_response(&mut response);
        response
    }

    #[test]
    fn projects_onto_the_operation() {
        let response = format(
            "{ me { nickname user: name } }",
            json!({ "me": { "user": "Ada", "__typename": "User", "id": "1", "nickname": "ada" } }),
        );
        assert_eq!(
            response.data,
            Some(json!({ "me": { "nickname": "ada", "user": "Ada" } }))
        );
        assert!(response.errors.is_empty());
    }

    #[test]
    fn missing_fields_become_null() {
        let response = format("{ me { nickname } items { sku } }", json!({}));
        assert_eq!(response.data, Some(json!({ "me": null, "items": null })));
    }

    #[test]
    fn typename_comes_from_the_data_or_the_schema() {
        let response = format(
            "{ me { __typename } search { __typename ... on Item { sku } } }",
            json!({
                "me": {},
                "search": [{ "__typename": "Item", "sku": "a" }, { "__typename": "User" }]
            }),
        );
        assert_eq!(
            response.data,
            Some(json!({
                "me": { "__typename": "User" },
                "search": [{ "__typename": "Item", "sku": "a" }, { "__typename": "User" }]
            }))
        );
    }

    #[test]
    fn null_bubbles_to_the_nearest_nullable_parent() {
        let response = format(
            "{ me { name nickname } items { sku } }",
            json!({
                "me": { "name": null, "nickname": "ada" },
                "items": [{ "sku": "a" }, { "sku": null }]
            }),
        );
        assert_eq!(response.data, Some(json!({ "me": null, "items": null })));
        assert_eq!(
            response
                .errors
                .iter()
                .map(|error| (error.message.as_str(), error.path.as_ref().map(ToString::to_string)))
                .collect::<Vec<_>>(),
            vec![
                (
                    "Cannot return null for non-nullable field User.name",
                    Some("/me/name".to_string())
                ),
                (
                    "Cannot return null for non-nullable field Item.sku",
                    Some("/items/1/sku".to_string())
                ),
            ]
        );
    }

    #[test]
    fn null_non_null_root_field_nulls_data() {
        let response = format("{ owner { id } me { id } }", json!({ "me": { "id": "1" } }));
        assert_eq!(response.data, Some(Value::Null));
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].path, Some(Path::from("owner")));
    }
}
