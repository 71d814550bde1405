use std::fmt::Display;
use std::fmt::Formatter;

use apollo_compiler::ast;
use itertools::Itertools;
use serde::Serialize;

/// The parsed `fields` argument of a `@key` directive, e.g. `id organization { id }`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct FieldSet {
    selections: Vec<KeyField>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct KeyField {
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub selections: Vec<KeyField>,
}

impl FieldSet {
    pub fn parse(fields: &str) -> Result<FieldSet, String> {
        let source = format!("{{ {fields} }}");
        let document = ast::Document::parse(source, "field_set.graphql")
            .map_err(|with_errors| with_errors.errors.to_string())?;
        let mut operations = document
            .definitions
            .iter()
            .filter_map(|definition| match definition {
                ast::Definition::OperationDefinition(operation) => Some(operation),
                _ => None,
            });
        let operation = operations
            .next()
            .ok_or_else(|| "the field set is empty".to_string())?;
        if operations.next().is_some() || document.definitions.len() != 1 {
            return Err("the field set must be a single selection set".to_string());
        }
        let selections = convert(&operation.selection_set)?;
        if selections.is_empty() {
            return Err("the field set is empty".to_string());
        }
        Ok(FieldSet { selections })
    }

    pub fn selections(&self) -> &[KeyField] {
        &self.selections
    }

    /// A representation that ignores selection order, for comparing keys across subgraphs.
    pub fn canonical(&self) -> String {
        canonical(&self.selections)
    }
}

fn convert(selection_set: &[ast::Selection]) -> Result<Vec<KeyField>, String> {
    selection_set
        .iter()
        .map(|selection| match selection {
            ast::Selection::Field(field) => {
                if field.alias.is_some() {
                    return Err(format!("field \"{}\" must not be aliased", field.name));
                }
                if !field.arguments.is_empty() {
                    return Err(format!("field \"{}\" must not have arguments", field.name));
                }
                Ok(KeyField {
                    name: field.name.to_string(),
                    selections: convert(&field.selection_set)?,
                })
            }
            ast::Selection::FragmentSpread(_) | ast::Selection::InlineFragment(_) => {
                Err("fragments are not allowed in a key".to_string())
            }
        })
        .collect()
}

fn canonical(selections: &[KeyField]) -> String {
    selections
        .iter()
        .map(|field| {
            if field.selections.is_empty() {
                field.name.clone()
            } else {
                format!("{} {{ {} }}", field.name, canonical(&field.selections))
            }
        })
        .sorted()
        .dedup()
        .join(" ")
}

impl Display for FieldSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write_fields(f, &self.selections)
    }
}

fn write_fields(f: &mut Formatter<'_>, fields: &[KeyField]) -> std::fmt::Result {
    for (index, field) in fields.iter().enumerate() {
        if index > 0 {
            f.write_str(" ")?;
        }
        f.write_str(&field.name)?;
        if !field.selections.is_empty() {
            f.write_str(" { ")?;
            write_fields(f, &field.selections)?;
            f.write_str(" }")?;
        }
    }
    Ok(())
}
