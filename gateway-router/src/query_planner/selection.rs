use gateway_federation::query_plan::Field;
use gateway_federation::query_plan::InlineFragment;
use gateway_federation::query_plan::Selection;
use gateway_federation::FederatedSchema;
use serde_json_bytes::ByteString;
use serde_json_bytes::Entry;

use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::json_ext::ValueExt;
use crate::spec::TYPENAME;

/// Projects `input_content` onto `selections`.
///
/// Aliased fields are read under their alias and written under their name, so key fields the
/// planner fetched under a reserved alias come out as the subgraph expects them. Returns
/// `Value::Null` when a selected field is missing: a representation lacking part of its key
/// cannot be resolved by the subgraph.
pub(crate) fn execute_selection_set(
    input_content: &Value,
    selections: &[Selection],
    schema: &FederatedSchema,
) -> Value {
    let content = match input_content.as_object() {
        Some(o) => o,
        None => return Value::Null,
    };

    let mut output = Object::with_capacity(selections.len());
    for selection in selections {
        match selection {
            Selection::Field(Field {
                alias,
                name,
                selections,
            }) => {
                let key = ByteString::from(name.as_str());
                let response_key = alias.as_deref().unwrap_or(name.as_str());

                match content.get(response_key) {
                    None => return Value::Null,
                    Some(value) => {
                        if let Some(elements) = value.as_array() {
                            let selected = elements
                                .iter()
                                .map(|element| match selections {
                                    Some(sels) => execute_selection_set(element, sels, schema),
                                    None => element.clone(),
                                })
                                .collect::<Vec<_>>();
                            output.insert(key, Value::Array(selected));
                        } else if let Some(sels) = selections {
                            let selected = execute_selection_set(value, sels, schema);
                            if selected.is_null() && !value.is_null() {
                                return Value::Null;
                            }
                            output.insert(key, selected);
                        } else {
                            output.insert(key, value.clone());
                        }
                    }
                }
            }
            Selection::InlineFragment(InlineFragment {
                type_condition,
                selections,
            }) => {
                let applies = match type_condition {
                    None => true,
                    Some(condition) => {
                        is_object_of_type(content, typename_key(selections), condition, schema)
                    }
                };
                if !applies {
                    continue;
                }
                match execute_selection_set(input_content, selections, schema) {
                    Value::Object(selected) => {
                        for (key, value) in selected.into_iter() {
                            match output.entry(key) {
                                Entry::Vacant(e) => {
                                    e.insert(value);
                                }
                                Entry::Occupied(e) => {
                                    e.into_mut().deep_merge(value);
                                }
                            }
                        }
                    }
                    _ => return Value::Null,
                }
            }
        }
    }

    Value::Object(output)
}

/// The response key `__typename` is read from: its alias when `selections` alias it.
fn typename_key(selections: &[Selection]) -> &str {
    selections
        .iter()
        .find_map(|selection| match selection {
            Selection::Field(Field { alias, name, .. }) if name == TYPENAME => {
                Some(alias.as_deref().unwrap_or(TYPENAME))
            }
            _ => None,
        })
        .unwrap_or(TYPENAME)
}

/// Whether `obj`, going by the type name under `typename_key`, is a value of the type
/// `condition`.
pub(crate) fn is_object_of_type(
    obj: &Object,
    typename_key: &str,
    condition: &str,
    schema: &FederatedSchema,
) -> bool {
    let typename = match obj.get(typename_key).and_then(|v| v.as_str()) {
        None => return false,
        Some(t) => t,
    };

    condition == typename || schema.is_subtype(condition, typename)
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
                "media",
                "http://media",
                r#"
                type Query { media: [Media] }
                interface Media { id: ID! }
                type Book implements Media @key(fields: "id") { id: ID! isbn: String }
                type Movie implements Media @key(fields: "id") { id: ID! }
                "#,
            )
            .unwrap(),
        )])
        .unwrap()
    }

    fn field(name: &str) -> Selection {
        Selection::Field(Field {
            alias: None,
            name: name.to_string(),
            selections: None,
        })
    }

    fn representation(type_condition: &str, fields: &[&str]) -> Vec<Selection> {
        vec![Selection::InlineFragment(InlineFragment {
            type_condition: Some(type_condition.to_string()),
            selections: fields.iter().map(|name| field(name)).collect(),
        })]
    }

    #[test]
    fn selects_key_fields() {
        let schema = schema();
        let selections = representation("Book", &["__typename", "id"]);
        assert_eq!(
            execute_selection_set(
                &json!({ "__typename": "Book", "id": "1", "isbn": "978" }),
                &selections,
                &schema
            ),
            json!({ "__typename": "Book", "id": "1" })
        );
    }

    #[test]
    fn skips_other_types() {
        let schema = schema();
        let selections = representation("Book", &["__typename", "id"]);
        assert_eq!(
            execute_selection_set(
                &json!({ "__typename": "Movie", "id": "2" }),
                &selections,
                &schema
            ),
            json!({})
        );
    }

    #[test]
    fn missing_fields_yield_null() {
        let schema = schema();
        let selections = representation("Book", &["__typename", "id"]);
        assert_eq!(
            execute_selection_set(&json!({ "__typename": "Book" }), &selections, &schema),
            Value::Null
        );
        assert_eq!(
            execute_selection_set(&Value::Null, &selections, &schema),
            Value::Null
        );
    }

    #[test]
    fn reads_aliased_key_fields_under_their_names() {
        let schema = schema();
        let aliased = |alias: &str, name: &str| {
            Selection::Field(Field {
                alias: Some(alias.to_string()),
                name: name.to_string(),
                selections: None,
            })
        };
        let selections = vec![Selection::InlineFragment(InlineFragment {
            type_condition: Some("Book".to_string()),
            selections: vec![
                aliased("__gateway_typename", "__typename"),
                aliased("__gateway_id", "id"),
            ],
        })];
        assert_eq!(
            execute_selection_set(
                &json!({
                    "__typename": "Ada",
                    "id": "Ada",
                    "__gateway_typename": "Book",
                    "__gateway_id": "1"
                }),
                &selections,
                &schema
            ),
            json!({ "__typename": "Book", "id": "1" })
        );
    }

    #[test]
    fn abstract_conditions_match_implementations() {
        let schema = schema();
        let object = json!({ "__typename": "Movie" });
        let object = object.as_object().unwrap();
        assert!(is_object_of_type(object, TYPENAME, "Media", &schema));
        assert!(is_object_of_type(object, TYPENAME, "Movie", &schema));
        assert!(!is_object_of_type(object, TYPENAME, "Book", &schema));
        assert!(!is_object_of_type(&Object::new(), TYPENAME, "Movie", &schema));
    }
}
