//! The composed, federated schema.
//!
//! Every object field records the subgraphs able to resolve it and every entity records the
//! keys each subgraph declares. The query planner works from nothing else.

use std::fmt::Display;
use std::fmt::Formatter;

use apollo_compiler::ast;
use indexmap::IndexMap;
use itertools::Itertools;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

use crate::operation::OperationKind;
use crate::subgraph::spec::is_built_in_scalar;

mod field_set;

pub use field_set::FieldSet;
pub use field_set::KeyField;

/// A field or argument type, e.g. `[User!]!`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum FieldType {
    Named(String),
    NonNull(Box<FieldType>),
    List(Box<FieldType>),
}

impl FieldType {
    /// The named type at the bottom of any list and non-null wrappers.
    pub fn inner_type_name(&self) -> &str {
        match self {
            FieldType::Named(name) => name,
            FieldType::NonNull(inner) | FieldType::List(inner) => inner.inner_type_name(),
        }
    }

    pub fn is_non_null(&self) -> bool {
        matches!(self, FieldType::NonNull(_))
    }

    pub fn is_list(&self) -> bool {
        matches!(self.nullable(), FieldType::List(_))
    }

    /// How many lists wrap the named type.
    pub fn list_depth(&self) -> usize {
        match self {
            FieldType::Named(_) => 0,
            FieldType::NonNull(inner) => inner.list_depth(),
            FieldType::List(inner) => inner.list_depth() + 1,
        }
    }

    /// This type without its outermost non-null wrapper.
    pub fn nullable(&self) -> &FieldType {
        match self {
            FieldType::NonNull(inner) => inner,
            other => other,
        }
    }

    /// The type both declarations can be exposed as, if they share a named type and list
    /// structure. A level is only non-null when both sides are.
    pub(crate) fn merge(&self, other: &FieldType) -> Option<FieldType> {
        match (self, other) {
            (FieldType::NonNull(left), FieldType::NonNull(right)) => {
                Some(FieldType::NonNull(Box::new(left.merge(right)?)))
            }
            (FieldType::NonNull(left), right) | (right, FieldType::NonNull(left)) => {
                left.merge(right)
            }
            (FieldType::List(left), FieldType::List(right)) => {
                Some(FieldType::List(Box::new(left.merge(right)?)))
            }
            (FieldType::Named(left), FieldType::Named(right)) if left == right => {
                Some(FieldType::Named(left.clone()))
            }
            _ => None,
        }
    }
}

impl From<&ast::Type> for FieldType {
    fn from(ty: &ast::Type) -> Self {
        match ty {
            ast::Type::Named(name) => FieldType::Named(name.to_string()),
            ast::Type::NonNullNamed(name) => {
                FieldType::NonNull(Box::new(FieldType::Named(name.to_string())))
            }
            ast::Type::List(inner) => FieldType::List(Box::new(FieldType::from(inner.as_ref()))),
            ast::Type::NonNullList(inner) => FieldType::NonNull(Box::new(FieldType::List(
                Box::new(FieldType::from(inner.as_ref())),
            ))),
        }
    }
}

impl Display for FieldType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::Named(name) => f.write_str(name),
            FieldType::NonNull(inner) => write!(f, "{inner}!"),
            FieldType::List(inner) => write!(f, "[{inner}]"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TypeKind {
    Scalar,
    Object,
    Interface,
    Union,
    Enum,
    InputObject,
}

impl Display for TypeKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TypeKind::Scalar => "scalar",
            TypeKind::Object => "object",
            TypeKind::Interface => "interface",
            TypeKind::Union => "union",
            TypeKind::Enum => "enum",
            TypeKind::InputObject => "input object",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubgraphInfo {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputValueDefinition {
    pub name: String,
    pub ty: FieldType,
    /// Printed GraphQL literal.
    pub default_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDefinition {
    pub name: String,
    pub ty: FieldType,
    pub arguments: Vec<InputValueDefinition>,
    /// Subgraphs able to resolve this field, sorted by name.
    pub owners: Vec<String>,
    /// Per owning subgraph, the entity fields it needs to resolve this one.
    pub requires: IndexMap<String, FieldSet>,
}

impl FieldDefinition {
    pub fn argument(&self, name: &str) -> Option<&InputValueDefinition> {
        self.arguments.iter().find(|argument| argument.name == name)
    }

    pub fn is_owned_by(&self, subgraph: &str) -> bool {
        self.owners.iter().any(|owner| owner == subgraph)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityKey {
    pub subgraph: String,
    pub fields: FieldSet,
    pub resolvable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDefinition {
    pub name: String,
    pub kind: TypeKind,
    pub fields: IndexMap<String, FieldDefinition>,
    pub interfaces: Vec<String>,
    pub members: Vec<String>,
    pub values: Vec<String>,
    pub input_fields: IndexMap<String, InputValueDefinition>,
    pub keys: Vec<EntityKey>,
    /// Subgraphs declaring this type, sorted by name.
    pub subgraphs: Vec<String>,
}

impl TypeDefinition {
    pub(crate) fn new(name: String, kind: TypeKind) -> Self {
        TypeDefinition {
            name,
            kind,
            fields: IndexMap::new(),
            interfaces: Vec::new(),
            members: Vec::new(),
            values: Vec::new(),
            input_fields: IndexMap::new(),
            keys: Vec::new(),
            subgraphs: Vec::new(),
        }
    }

    pub fn is_entity(&self) -> bool {
        !self.keys.is_empty()
    }
}

/// The result of composing every registered subgraph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederatedSchema {
    subgraphs: IndexMap<String, SubgraphInfo>,
    query_type: String,
    mutation_type: Option<String>,
    types: IndexMap<String, TypeDefinition>,
    schema_id: String,
}

impl FederatedSchema {
    pub(crate) fn new(
        subgraphs: IndexMap<String, SubgraphInfo>,
        query_type: String,
        mutation_type: Option<String>,
        types: IndexMap<String, TypeDefinition>,
    ) -> Self {
        let mut schema = FederatedSchema {
            subgraphs,
            query_type,
            mutation_type,
            types,
            schema_id: String::new(),
        };
        let mut hasher = Sha256::new();
        hasher.update(schema.to_string().as_bytes());
        for subgraph in schema.subgraphs.values() {
            hasher.update(subgraph.name.as_bytes());
            hasher.update(subgraph.url.as_bytes());
        }
        schema.schema_id = hex::encode(hasher.finalize());
        schema
    }

    /// SHA-256 of the printed schema and the subgraph locations.
    pub fn schema_id(&self) -> &str {
        &self.schema_id
    }

    pub fn subgraphs(&self) -> impl Iterator<Item = &SubgraphInfo> {
        self.subgraphs.values()
    }

    pub fn subgraph(&self, name: &str) -> Option<&SubgraphInfo> {
        self.subgraphs.get(name)
    }

    pub fn types(&self) -> impl Iterator<Item = &TypeDefinition> {
        self.types.values()
    }

    pub fn get_type(&self, name: &str) -> Option<&TypeDefinition> {
        self.types.get(name)
    }

    pub fn root_type_name(&self, kind: OperationKind) -> Option<&str> {
        match kind {
            OperationKind::Query => Some(&self.query_type),
            OperationKind::Mutation => self.mutation_type.as_deref(),
        }
    }

    pub fn field(&self, type_name: &str, field_name: &str) -> Option<&FieldDefinition> {
        self.types.get(type_name)?.fields.get(field_name)
    }

    pub fn is_entity(&self, type_name: &str) -> bool {
        self.types
            .get(type_name)
            .is_some_and(TypeDefinition::is_entity)
    }

    pub fn is_abstract(&self, type_name: &str) -> bool {
        self.types.get(type_name).is_some_and(|ty| {
            matches!(ty.kind, TypeKind::Interface | TypeKind::Union)
        })
    }

    pub fn is_composite(&self, type_name: &str) -> bool {
        self.types.get(type_name).is_some_and(|ty| {
            matches!(
                ty.kind,
                TypeKind::Object | TypeKind::Interface | TypeKind::Union
            )
        })
    }

    pub fn is_leaf(&self, type_name: &str) -> bool {
        is_built_in_scalar(type_name)
            || self
                .types
                .get(type_name)
                .is_some_and(|ty| matches!(ty.kind, TypeKind::Scalar | TypeKind::Enum))
    }

    pub fn is_input_type(&self, type_name: &str) -> bool {
        self.is_leaf(type_name)
            || self
                .types
                .get(type_name)
                .is_some_and(|ty| ty.kind == TypeKind::InputObject)
    }

    /// Object types a value of `type_name` can have at runtime.
    pub fn possible_types(&self, type_name: &str) -> Vec<&str> {
        let Some(ty) = self.types.get(type_name) else {
            return Vec::new();
        };
        match ty.kind {
            TypeKind::Object => vec![ty.name.as_str()],
            TypeKind::Union => ty.members.iter().map(String::as_str).collect(),
            TypeKind::Interface => self
                .types
                .values()
                .filter(|candidate| {
                    candidate.kind == TypeKind::Object
                        && candidate.interfaces.iter().any(|name| name == type_name)
                })
                .map(|candidate| candidate.name.as_str())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Whether every runtime value of `maybe_subtype` is also a `super_type`.
    pub fn is_subtype(&self, super_type: &str, maybe_subtype: &str) -> bool {
        if super_type == maybe_subtype {
            return true;
        }
        match self.types.get(maybe_subtype) {
            Some(ty) if ty.interfaces.iter().any(|name| name == super_type) => true,
            Some(ty) if ty.kind == TypeKind::Object => self
                .types
                .get(super_type)
                .is_some_and(|sup| sup.kind == TypeKind::Union && sup.members.contains(&ty.name)),
            _ => false,
        }
    }

    /// Whether a value of `left` may also be a value of `right`.
    pub fn types_overlap(&self, left: &str, right: &str) -> bool {
        let right_types = self.possible_types(right);
        self.possible_types(left)
            .iter()
            .any(|name| right_types.contains(name))
    }

    pub fn keys_for<'a>(
        &'a self,
        type_name: &str,
        subgraph: &'a str,
    ) -> impl Iterator<Item = &'a EntityKey> + 'a {
        self.types
            .get(type_name)
            .into_iter()
            .flat_map(|ty| ty.keys.iter())
            .filter(move |key| key.subgraph == subgraph)
    }

    pub fn can_resolve(&self, type_name: &str, field_name: &str, subgraph: &str) -> bool {
        self.field(type_name, field_name)
            .is_some_and(|field| field.is_owned_by(subgraph))
    }

    /// What `subgraph` needs in a representation of `type_name` to resolve `field_name`.
    pub fn requires(&self, type_name: &str, field_name: &str, subgraph: &str) -> Option<&FieldSet> {
        self.field(type_name, field_name)
            .and_then(|field| field.requires.get(subgraph))
    }

    /// Whether `subgraph` can produce every field of `fields` on `type_name`.
    pub fn can_resolve_fields(&self, type_name: &str, fields: &[KeyField], subgraph: &str) -> bool {
        fields.iter().all(|key_field| {
            let Some(field) = self.field(type_name, &key_field.name) else {
                return false;
            };
            field.is_owned_by(subgraph)
                && self.can_resolve_fields(
                    field.ty.inner_type_name(),
                    &key_field.selections,
                    subgraph,
                )
        })
    }
}

impl Display for FederatedSchema {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "schema {{")?;
        writeln!(f, "  query: {}", self.query_type)?;
        if let Some(mutation) = &self.mutation_type {
            writeln!(f, "  mutation: {mutation}")?;
        }
        write!(f, "}}")?;

        for ty in self.types.values() {
            f.write_str("\n\n")?;
            match ty.kind {
                TypeKind::Scalar => write!(f, "scalar {}", ty.name)?,
                TypeKind::Union => {
                    write!(f, "union {} = {}", ty.name, ty.members.iter().join(" | "))?
                }
                TypeKind::Enum => {
                    writeln!(f, "enum {} {{", ty.name)?;
                    for value in &ty.values {
                        writeln!(f, "  {value}")?;
                    }
                    write!(f, "}}")?;
                }
                TypeKind::InputObject => {
                    writeln!(f, "input {} {{", ty.name)?;
                    for field in ty.input_fields.values() {
                        writeln!(f, "  {}", InputValueDisplay(field))?;
                    }
                    write!(f, "}}")?;
                }
                TypeKind::Object | TypeKind::Interface => {
                    let keyword = if ty.kind == TypeKind::Object {
                        "type"
                    } else {
                        "interface"
                    };
                    write!(f, "{keyword} {}", ty.name)?;
                    if !ty.interfaces.is_empty() {
                        write!(f, " implements {}", ty.interfaces.iter().join(" & "))?;
                    }
                    for key in &ty.keys {
                        write!(
                            f,
                            " @key(subgraph: \"{}\", fields: \"{}\"",
                            key.subgraph, key.fields
                        )?;
                        if !key.resolvable {
                            f.write_str(", resolvable: false")?;
                        }
                        f.write_str(")")?;
                    }
                    writeln!(f, " {{")?;
                    for field in ty.fields.values() {
                        write!(f, "  {}", field.name)?;
                        if !field.arguments.is_empty() {
                            write!(
                                f,
                                "({})",
                                field.arguments.iter().map(InputValueDisplay).join(", ")
                            )?;
                        }
                        writeln!(
                            f,
                            ": {} @resolvedBy(subgraphs: [{}])",
                            field.ty,
                            field.owners.iter().map(|owner| format!("\"{owner}\"")).join(", ")
                        )?;
                    }
                    write!(f, "}}")?;
                }
            }
        }
        writeln!(f)
    }
}

struct InputValueDisplay<'a>(&'a InputValueDefinition);

impl Display for InputValueDisplay<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.0.name, self.0.ty)?;
        if let Some(default_value) = &self.0.default_value {
            write!(f, " = {default_value}")?;
        }
        Ok(())
    }
}
