use std::fmt::Display;

use itertools::Itertools;

/// A single reason why a set of subgraphs cannot be composed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompositionError {
    #[error("subgraph \"{subgraph}\" has an invalid schema: {message}")]
    InvalidSubgraphSchema { subgraph: String, message: String },

    #[error("subgraph \"{0}\" is declared more than once")]
    DuplicateSubgraphName(String),

    #[error("[{subgraph}] \"{directive}\" on {location} is not supported")]
    UnsupportedDirective {
        subgraph: String,
        directive: String,
        location: String,
    },

    #[error("[{subgraph}] type \"{type_name}\" has an invalid @key(fields: \"{fields}\"): {message}")]
    InvalidKey {
        subgraph: String,
        type_name: String,
        fields: String,
        message: String,
    },

    #[error("type \"{type_name}\" cannot be resolved across subgraphs: {message}")]
    UnresolvableEntity { type_name: String, message: String },

    #[error("field \"{type_name}.{field_name}\" has incompatible definitions: {message}")]
    FieldConflict {
        type_name: String,
        field_name: String,
        message: String,
    },

    #[error("type \"{type_name}\" is declared with different kinds: {message}")]
    TypeKindConflict { type_name: String, message: String },

    #[error("type \"{type_name}\" has incompatible definitions: {message}")]
    TypeDefinitionConflict { type_name: String, message: String },

    #[error("field \"{type_name}.{field_name}\" is not resolvable by any subgraph")]
    UnresolvableField {
        type_name: String,
        field_name: String,
    },

    #[error("type \"{type_name}\" referenced by \"{referenced_by}\" is not defined by any subgraph")]
    UnknownType {
        type_name: String,
        referenced_by: String,
    },

    #[error("no subgraph defines a query root type")]
    NoQueryRoot,
}

/// Every error found while composing, in the order they were found.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", join_errors(.errors))]
pub struct CompositionErrors {
    pub errors: Vec<CompositionError>,
}

impl CompositionErrors {
    pub fn iter(&self) -> impl Iterator<Item = &CompositionError> {
        self.errors.iter()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl From<CompositionError> for CompositionErrors {
    fn from(error: CompositionError) -> Self {
        CompositionErrors {
            errors: vec![error],
        }
    }
}

fn join_errors<I>(errors: I) -> String
where
    I: IntoIterator,
    I::Item: Display,
{
    errors.into_iter().join("\n")
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("subgraph \"{name}\" is already registered with a different schema (registered {existing}, submitted {submitted})")]
pub struct DuplicateSubgraphError {
    pub name: String,
    pub existing: String,
    pub submitted: String,
}

/// A client operation that does not fit the federated schema.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ValidationError {
    pub message: String,
}

impl ValidationError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        ValidationError {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", join_errors(.errors))]
pub struct ValidationErrors {
    pub errors: Vec<ValidationError>,
}

impl From<ValidationError> for ValidationErrors {
    fn from(error: ValidationError) -> Self {
        ValidationErrors {
            errors: vec![error],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanningError {
    #[error("cannot fetch \"{type_name}.{field_name}\" from subgraph \"{subgraph}\": {message}")]
    UnsatisfiableDependency {
        type_name: String,
        field_name: String,
        subgraph: String,
        message: String,
    },

    #[error("unsatisfiable dependency: fetch steps form a cycle through step {0}")]
    Cycle(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error(transparent)]
    Validation(#[from] ValidationErrors),
    #[error(transparent)]
    Planning(#[from] PlanningError),
}

impl From<ValidationError> for PlanError {
    fn from(error: ValidationError) -> Self {
        PlanError::Validation(error.into())
    }
}
