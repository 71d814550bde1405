//! Client operations validated against the federated schema and normalized for planning.
//!
//! Normalization inlines named fragments, evaluates `@skip`/`@include`, merges fields sharing
//! a response key and flattens fragments that always apply. What remains are fields and inline
//! fragments on narrower types.

use std::fmt::Display;
use std::fmt::Formatter;

use apollo_compiler::ast;
use apollo_compiler::Node;
use indexmap::IndexMap;
use indexmap::IndexSet;
use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Value;

use crate::error::ValidationError;
use crate::error::ValidationErrors;
use crate::schema::FederatedSchema;
use crate::schema::FieldType;
use crate::subgraph::spec::TYPENAME_FIELD;
use crate::values::collect_variables;

/// Variable values supplied with a request.
pub type Variables = serde_json_bytes::Map<ByteString, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    Query,
    Mutation,
}

impl Display for OperationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            OperationKind::Query => "query",
            OperationKind::Mutation => "mutation",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub kind: OperationKind,
    pub name: Option<String>,
    pub variables: Vec<VariableDefinition>,
    pub selection_set: SelectionSet,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableDefinition {
    pub name: String,
    pub ty: FieldType,
    pub default_value: Option<Node<ast::Value>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectionSet {
    /// The type the selections apply to.
    pub type_name: String,
    pub selections: Vec<Selection>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Field(Field),
    InlineFragment(InlineFragment),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub alias: Option<String>,
    pub name: String,
    pub arguments: Vec<Argument>,
    /// Declared type of the field in the federated schema.
    pub ty: FieldType,
    pub selection_set: Option<SelectionSet>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    pub name: String,
    pub value: Node<ast::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InlineFragment {
    pub type_condition: String,
    pub selection_set: SelectionSet,
}

impl Field {
    /// The key this field is written under in the response.
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub fn is_typename(&self) -> bool {
        self.name == TYPENAME_FIELD
    }

    /// Whether both fields pass the same value for each argument, in any order.
    fn same_arguments(&self, other: &Field) -> bool {
        self.arguments.len() == other.arguments.len()
            && self.arguments.iter().all(|argument| {
                other
                    .arguments
                    .iter()
                    .any(|o| o.name == argument.name && *o.value == *argument.value)
            })
    }

    pub(crate) fn variable_usages(&self, usages: &mut IndexSet<String>) {
        for argument in &self.arguments {
            collect_variables(&argument.value, usages);
        }
    }
}

impl SelectionSet {
    fn new(type_name: &str) -> Self {
        SelectionSet {
            type_name: type_name.to_string(),
            selections: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.selections.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.selections.iter().filter_map(|selection| match selection {
            Selection::Field(field) => Some(field),
            Selection::InlineFragment(_) => None,
        })
    }

    fn add(&mut self, selection: Selection) -> Result<(), ValidationError> {
        match selection {
            Selection::Field(field) => self.add_field(field),
            Selection::InlineFragment(fragment) => {
                self.add_inline_fragment(fragment.type_condition, fragment.selection_set)
            }
        }
    }

    fn add_field(&mut self, field: Field) -> Result<(), ValidationError> {
        for selection in &mut self.selections {
            let Selection::Field(existing) = selection else {
                continue;
            };
            if existing.response_key() != field.response_key() {
                continue;
            }
            if existing.name != field.name {
                return Err(ValidationError::new(format!(
                    "Fields \"{}\" conflict because \"{}\" and \"{}\" are different fields.",
                    field.response_key(),
                    existing.name,
                    field.name
                )));
            }
            if !existing.same_arguments(&field) {
                return Err(ValidationError::new(format!(
                    "Fields \"{}\" conflict because they have differing arguments.",
                    field.response_key()
                )));
            }
            if let (Some(existing), Some(incoming)) =
                (&mut existing.selection_set, field.selection_set)
            {
                for selection in incoming.selections {
                    existing.add(selection)?;
                }
            }
            return Ok(());
        }
        self.selections.push(Selection::Field(field));
        Ok(())
    }

    fn add_inline_fragment(
        &mut self,
        type_condition: String,
        selection_set: SelectionSet,
    ) -> Result<(), ValidationError> {
        for selection in &mut self.selections {
            if let Selection::InlineFragment(existing) = selection {
                if existing.type_condition == type_condition {
                    for selection in selection_set.selections {
                        existing.selection_set.add(selection)?;
                    }
                    return Ok(());
                }
            }
        }
        self.selections.push(Selection::InlineFragment(InlineFragment {
            type_condition,
            selection_set,
        }));
        Ok(())
    }
}

impl Operation {
    /// Parses `query`, picks the operation to run and normalizes it against `schema`.
    pub fn parse(
        schema: &FederatedSchema,
        query: &str,
        operation_name: Option<&str>,
        variables: &Variables,
    ) -> Result<Operation, ValidationErrors> {
        let document = ast::Document::parse(query, "query.graphql").map_err(|with_errors| {
            ValidationErrors::from(ValidationError::new(with_errors.errors.to_string()))
        })?;

        let mut errors = Vec::new();
        let mut operations = Vec::new();
        let mut fragments = IndexMap::new();
        for definition in &document.definitions {
            match definition {
                ast::Definition::OperationDefinition(operation) => operations.push(operation),
                ast::Definition::FragmentDefinition(fragment) => {
                    if fragments
                        .insert(fragment.name.to_string(), fragment)
                        .is_some()
                    {
                        errors.push(ValidationError::new(format!(
                            "There can be only one fragment named \"{}\".",
                            fragment.name
                        )));
                    }
                }
                _ => errors.push(ValidationError::new(
                    "Type system definitions are not allowed in an operation document.",
                )),
            }
        }

        let operation = match operation_name {
            Some(name) => operations
                .iter()
                .find(|operation| {
                    operation
                        .name
                        .as_ref()
                        .is_some_and(|operation_name| operation_name.as_str() == name)
                })
                .copied()
                .ok_or_else(|| {
                    ValidationError::new(format!("Unknown operation named \"{name}\"."))
                })?,
            None => match operations[..] {
                [operation] => operation,
                [] => return Err(ValidationError::new("Must provide an operation.").into()),
                _ => {
                    return Err(ValidationError::new(
                        "Must provide operation name if query contains multiple operations.",
                    )
                    .into())
                }
            },
        };

        let kind = match operation.operation_type {
            ast::OperationType::Query => OperationKind::Query,
            ast::OperationType::Mutation => OperationKind::Mutation,
            ast::OperationType::Subscription => {
                return Err(ValidationError::new("Subscriptions are not supported.").into())
            }
        };
        let Some(root_type) = schema.root_type_name(kind) else {
            return Err(ValidationError::new(format!(
                "The schema does not define a {kind} root type."
            ))
            .into());
        };

        let definitions: Vec<VariableDefinition> = operation
            .variables
            .iter()
            .map(|definition| VariableDefinition {
                name: definition.name.to_string(),
                ty: FieldType::from(&*definition.ty),
                default_value: definition.default_value.clone(),
            })
            .collect();
        for definition in &definitions {
            if !schema.is_input_type(definition.ty.inner_type_name()) {
                errors.push(ValidationError::new(format!(
                    "Variable \"${}\" cannot be non-input type \"{}\".",
                    definition.name, definition.ty
                )));
            }
            let provided = variables
                .get(definition.name.as_str())
                .is_some_and(|value| !value.is_null());
            if definition.ty.is_non_null() && definition.default_value.is_none() && !provided {
                errors.push(ValidationError::new(format!(
                    "Variable \"${}\" of required type \"{}\" was not provided.",
                    definition.name, definition.ty
                )));
            }
        }

        let mut normalizer = Normalizer {
            schema,
            fragments,
            variables,
            definitions: &definitions,
            spreading: Vec::new(),
            errors,
        };
        let selection_set = normalizer.selection_set(root_type, &operation.selection_set);
        if !normalizer.errors.is_empty() {
            return Err(ValidationErrors {
                errors: normalizer.errors,
            });
        }

        Ok(Operation {
            kind,
            name: operation.name.as_ref().map(|name| name.to_string()),
            variables: definitions,
            selection_set,
        })
    }

    pub fn variable(&self, name: &str) -> Option<&VariableDefinition> {
        self.variables.iter().find(|variable| variable.name == name)
    }
}

struct Normalizer<'a> {
    schema: &'a FederatedSchema,
    fragments: IndexMap<String, &'a Node<ast::FragmentDefinition>>,
    variables: &'a Variables,
    definitions: &'a [VariableDefinition],
    /// Named fragments being expanded, to detect cycles.
    spreading: Vec<String>,
    errors: Vec<ValidationError>,
}

impl Normalizer<'_> {
    fn selection_set(&mut self, type_name: &str, selections: &[ast::Selection]) -> SelectionSet {
        let mut selection_set = SelectionSet::new(type_name);
        self.collect(type_name, selections, &mut selection_set);
        selection_set
    }

    fn collect(&mut self, type_name: &str, selections: &[ast::Selection], into: &mut SelectionSet) {
        for selection in selections {
            match selection {
                ast::Selection::Field(field) => {
                    if !self.included(&field.directives) {
                        continue;
                    }
                    if let Some(field) = self.field(type_name, field) {
                        if let Err(error) = into.add_field(field) {
                            self.errors.push(error);
                        }
                    }
                }
                ast::Selection::InlineFragment(fragment) => {
                    if !self.included(&fragment.directives) {
                        continue;
                    }
                    let type_condition = fragment
                        .type_condition
                        .as_ref()
                        .map(|name| name.to_string());
                    self.fragment(type_name, type_condition, &fragment.selection_set, into);
                }
                ast::Selection::FragmentSpread(spread) => {
                    if !self.included(&spread.directives) {
                        continue;
                    }
                    let name = spread.fragment_name.to_string();
                    let Some(definition) = self.fragments.get(&name).copied() else {
                        self.errors
                            .push(ValidationError::new(format!("Unknown fragment \"{name}\".")));
                        continue;
                    };
                    if self.spreading.contains(&name) {
                        self.errors.push(ValidationError::new(format!(
                            "Cannot spread fragment \"{name}\" within itself."
                        )));
                        continue;
                    }
                    self.spreading.push(name);
                    self.fragment(
                        type_name,
                        Some(definition.type_condition.to_string()),
                        &definition.selection_set,
                        into,
                    );
                    self.spreading.pop();
                }
            }
        }
    }

    fn fragment(
        &mut self,
        parent_type: &str,
        type_condition: Option<String>,
        selections: &[ast::Selection],
        into: &mut SelectionSet,
    ) {
        let type_condition = type_condition.unwrap_or_else(|| parent_type.to_string());
        if !self.schema.is_composite(&type_condition) {
            self.errors.push(ValidationError::new(format!(
                "Unknown type \"{type_condition}\"."
            )));
            return;
        }
        if !self.schema.types_overlap(parent_type, &type_condition) {
            self.errors.push(ValidationError::new(format!(
                "Fragment cannot be spread here as objects of type \"{parent_type}\" can never be of type \"{type_condition}\"."
            )));
            return;
        }
        if self.schema.is_subtype(&type_condition, parent_type) {
            self.collect(parent_type, selections, into);
        } else {
            let selection_set = self.selection_set(&type_condition, selections);
            if let Err(error) = into.add_inline_fragment(type_condition, selection_set) {
                self.errors.push(error);
            }
        }
    }

    fn field(&mut self, parent_type: &str, field: &ast::Field) -> Option<Field> {
        let name = field.name.to_string();
        let alias = field.alias.as_ref().map(|alias| alias.to_string());
        if name == TYPENAME_FIELD {
            if !field.selection_set.is_empty() {
                self.errors.push(ValidationError::new(
                    "Field \"__typename\" must not have a selection since type \"String!\" has no subfields.",
                ));
                return None;
            }
            return Some(Field {
                alias,
                name,
                arguments: Vec::new(),
                ty: FieldType::NonNull(Box::new(FieldType::Named("String".to_string()))),
                selection_set: None,
            });
        }

        let Some(definition) = self.schema.field(parent_type, &name) else {
            self.errors.push(ValidationError::new(format!(
                "Cannot query field \"{name}\" on type \"{parent_type}\"."
            )));
            return None;
        };

        let mut arguments = Vec::new();
        let mut usages = IndexSet::new();
        for argument in &field.arguments {
            if definition.argument(&argument.name).is_none() {
                self.errors.push(ValidationError::new(format!(
                    "Unknown argument \"{}\" on field \"{parent_type}.{name}\".",
                    argument.name
                )));
                continue;
            }
            collect_variables(&argument.value, &mut usages);
            arguments.push(Argument {
                name: argument.name.to_string(),
                value: argument.value.clone(),
            });
        }
        for variable in usages {
            if !self
                .definitions
                .iter()
                .any(|definition| definition.name == variable)
            {
                self.errors.push(ValidationError::new(format!(
                    "Variable \"${variable}\" is not defined."
                )));
            }
        }
        for argument in &definition.arguments {
            let required = argument.ty.is_non_null() && argument.default_value.is_none();
            if required
                && !field
                    .arguments
                    .iter()
                    .any(|provided| provided.name.as_str() == argument.name)
            {
                self.errors.push(ValidationError::new(format!(
                    "Field \"{name}\" argument \"{}\" of type \"{}\" is required, but it was not provided.",
                    argument.name, argument.ty
                )));
            }
        }

        let inner_type = definition.ty.inner_type_name();
        let selection_set = if self.schema.is_leaf(inner_type) {
            if !field.selection_set.is_empty() {
                self.errors.push(ValidationError::new(format!(
                    "Field \"{name}\" must not have a selection since type \"{}\" has no subfields.",
                    definition.ty
                )));
                return None;
            }
            None
        } else {
            if field.selection_set.is_empty() {
                self.errors.push(ValidationError::new(format!(
                    "Field \"{name}\" of type \"{}\" must have a selection of subfields.",
                    definition.ty
                )));
                return None;
            }
            Some(self.selection_set(inner_type, &field.selection_set))
        };

        Some(Field {
            alias,
            name,
            arguments,
            ty: definition.ty.clone(),
            selection_set,
        })
    }

    /// Evaluates `@skip` and `@include`.
    fn included(&mut self, directives: &ast::DirectiveList) -> bool {
        for directive in directives.iter() {
            let skip_when = match directive.name.as_str() {
                "skip" => true,
                "include" => false,
                _ => continue,
            };
            if self.condition(directive) == Some(skip_when) {
                return false;
            }
        }
        true
    }

    fn condition(&mut self, directive: &ast::Directive) -> Option<bool> {
        let Some(value) = directive.specified_argument_by_name("if") else {
            self.errors.push(ValidationError::new(format!(
                "Directive \"@{}\" argument \"if\" of type \"Boolean!\" is required, but it was not provided.",
                directive.name
            )));
            return None;
        };
        match &**value {
            ast::Value::Boolean(condition) => Some(*condition),
            ast::Value::Variable(name) => {
                let provided = self.variables.get(name.as_str());
                let default = self
                    .definitions
                    .iter()
                    .find(|definition| definition.name == name.as_str())
                    .and_then(|definition| definition.default_value.as_ref());
                match (provided, default) {
                    (Some(Value::Bool(condition)), _) => Some(*condition),
                    (None, Some(default)) => match &**default {
                        ast::Value::Boolean(condition) => Some(*condition),
                        _ => None,
                    },
                    _ => {
                        self.errors.push(ValidationError::new(format!(
                            "Variable \"${name}\" must be a Boolean."
                        )));
                        None
                    }
                }
            }
            _ => {
                self.errors.push(ValidationError::new(format!(
                    "Argument \"if\" of \"@{}\" must be a Boolean.",
                    directive.name
                )));
                None
            }
        }
    }
}
