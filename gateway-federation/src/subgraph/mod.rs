//! Subgraph schemas as submitted by their services.

use std::fmt::Debug;
use std::fmt::Formatter;

use apollo_compiler::ast;
use indexmap::IndexMap;
use itertools::Itertools;
use sha1::Digest;
use sha1::Sha1;

use crate::error::CompositionError;
use crate::schema::FieldSet;
use crate::schema::FieldType;
use crate::schema::TypeKind;
use crate::subgraph::spec::directive_name;
use crate::subgraph::spec::is_federation_root_field;
use crate::subgraph::spec::is_federation_type;
use crate::subgraph::spec::EXTENDS_DIRECTIVE_NAME;
use crate::subgraph::spec::EXTERNAL_DIRECTIVE_NAME;
use crate::subgraph::spec::FIELDS_ARGUMENT_NAME;
use crate::subgraph::spec::KEY_DIRECTIVE_NAME;
use crate::subgraph::spec::OVERRIDE_DIRECTIVE_NAME;
use crate::subgraph::spec::PROVIDES_DIRECTIVE_NAME;
use crate::subgraph::spec::REQUIRES_DIRECTIVE_NAME;
use crate::subgraph::spec::RESOLVABLE_ARGUMENT_NAME;
use crate::subgraph::spec::SHAREABLE_DIRECTIVE_NAME;
use crate::values::print_value;

pub mod spec;

/// A named subgraph: its routing URL and the SDL it serves.
#[derive(Clone)]
pub struct Subgraph {
    pub name: String,
    pub url: String,
    sdl: String,
    signature: String,
    pub(crate) schema: SubgraphSchema,
}

impl Subgraph {
    pub fn parse(
        name: impl Into<String>,
        url: impl Into<String>,
        sdl: impl Into<String>,
    ) -> Result<Self, CompositionError> {
        let name = name.into();
        let sdl = sdl.into();
        let document = ast::Document::parse(sdl.as_str(), format!("{name}.graphql")).map_err(
            |with_errors| CompositionError::InvalidSubgraphSchema {
                subgraph: name.clone(),
                message: with_errors.errors.to_string(),
            },
        )?;
        let schema = SubgraphSchema::extract(&name, &document)?;
        let signature = signature_of(&sdl);
        Ok(Subgraph {
            name,
            url: url.into(),
            sdl,
            signature,
            schema,
        })
    }

    pub fn sdl(&self) -> &str {
        &self.sdl
    }

    /// SHA-1 of the SDL with whitespace runs collapsed.
    pub fn signature(&self) -> &str {
        &self.signature
    }
}

impl Debug for Subgraph {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subgraph")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("signature", &self.signature)
            .finish()
    }
}

fn signature_of(sdl: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(sdl.split_whitespace().join(" ").as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone)]
pub(crate) struct SubgraphSchema {
    pub(crate) types: IndexMap<String, SubgraphType>,
}

#[derive(Debug, Clone)]
pub(crate) struct SubgraphType {
    pub(crate) name: String,
    pub(crate) kind: TypeKind,
    pub(crate) fields: IndexMap<String, SubgraphField>,
    pub(crate) interfaces: Vec<String>,
    pub(crate) members: Vec<String>,
    pub(crate) values: Vec<String>,
    pub(crate) input_fields: IndexMap<String, SubgraphInputValue>,
    pub(crate) keys: Vec<KeyDirective>,
}

#[derive(Debug, Clone)]
pub(crate) struct SubgraphField {
    pub(crate) name: String,
    pub(crate) ty: FieldType,
    pub(crate) arguments: Vec<SubgraphInputValue>,
    pub(crate) external: bool,
    /// Entity fields this field needs in its representation (`@requires`).
    pub(crate) requires: Option<FieldSet>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SubgraphInputValue {
    pub(crate) name: String,
    pub(crate) ty: FieldType,
    pub(crate) default_value: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct KeyDirective {
    pub(crate) fields: String,
    pub(crate) resolvable: bool,
}

impl SubgraphSchema {
    fn extract(subgraph: &str, document: &ast::Document) -> Result<Self, CompositionError> {
        let mut query_type = "Query".to_string();
        let mut mutation_type = "Mutation".to_string();
        for definition in &document.definitions {
            let root_operations = match definition {
                ast::Definition::SchemaDefinition(schema) => &schema.root_operations,
                ast::Definition::SchemaExtension(schema) => &schema.root_operations,
                _ => continue,
            };
            for root_operation in root_operations {
                let (operation_type, type_name) = &**root_operation;
                match operation_type {
                    ast::OperationType::Query => query_type = type_name.to_string(),
                    ast::OperationType::Mutation => mutation_type = type_name.to_string(),
                    ast::OperationType::Subscription => {}
                }
            }
        }

        let mut extractor = Extractor {
            subgraph,
            query_type: &query_type,
            mutation_type: &mutation_type,
            types: IndexMap::new(),
        };
        for definition in &document.definitions {
            extractor.add_definition(definition)?;
        }
        Ok(SubgraphSchema {
            types: extractor.types,
        })
    }
}

struct Extractor<'a> {
    subgraph: &'a str,
    query_type: &'a str,
    mutation_type: &'a str,
    types: IndexMap<String, SubgraphType>,
}

impl Extractor<'_> {
    fn add_definition(&mut self, definition: &ast::Definition) -> Result<(), CompositionError> {
        if definition
            .name()
            .is_some_and(|name| is_federation_type(name))
        {
            return Ok(());
        }
        match definition {
            ast::Definition::ObjectTypeDefinition(object) => self.add_fields_type(
                TypeKind::Object,
                &object.name,
                &object.directives,
                &object.fields,
                &object.implements_interfaces,
            ),
            ast::Definition::ObjectTypeExtension(object) => self.add_fields_type(
                TypeKind::Object,
                &object.name,
                &object.directives,
                &object.fields,
                &object.implements_interfaces,
            ),
            ast::Definition::InterfaceTypeDefinition(interface) => self.add_fields_type(
                TypeKind::Interface,
                &interface.name,
                &interface.directives,
                &interface.fields,
                &interface.implements_interfaces,
            ),
            ast::Definition::InterfaceTypeExtension(interface) => self.add_fields_type(
                TypeKind::Interface,
                &interface.name,
                &interface.directives,
                &interface.fields,
                &interface.implements_interfaces,
            ),
            ast::Definition::UnionTypeDefinition(union_) => {
                let ty = self.type_entry(TypeKind::Union, &union_.name)?;
                extend_unique(&mut ty.members, union_.members.iter().map(|m| m.to_string()));
                Ok(())
            }
            ast::Definition::UnionTypeExtension(union_) => {
                let ty = self.type_entry(TypeKind::Union, &union_.name)?;
                extend_unique(&mut ty.members, union_.members.iter().map(|m| m.to_string()));
                Ok(())
            }
            ast::Definition::EnumTypeDefinition(enum_) => {
                let ty = self.type_entry(TypeKind::Enum, &enum_.name)?;
                extend_unique(
                    &mut ty.values,
                    enum_.values.iter().map(|value| value.value.to_string()),
                );
                Ok(())
            }
            ast::Definition::EnumTypeExtension(enum_) => {
                let ty = self.type_entry(TypeKind::Enum, &enum_.name)?;
                extend_unique(
                    &mut ty.values,
                    enum_.values.iter().map(|value| value.value.to_string()),
                );
                Ok(())
            }
            ast::Definition::InputObjectTypeDefinition(input) => {
                self.add_input_fields(&input.name, &input.fields)
            }
            ast::Definition::InputObjectTypeExtension(input) => {
                self.add_input_fields(&input.name, &input.fields)
            }
            ast::Definition::ScalarTypeDefinition(scalar) => {
                self.type_entry(TypeKind::Scalar, &scalar.name).map(|_| ())
            }
            ast::Definition::ScalarTypeExtension(scalar) => {
                self.type_entry(TypeKind::Scalar, &scalar.name).map(|_| ())
            }
            ast::Definition::OperationDefinition(_) | ast::Definition::FragmentDefinition(_) => {
                Err(CompositionError::InvalidSubgraphSchema {
                    subgraph: self.subgraph.to_string(),
                    message: "executable definitions are not allowed in a subgraph schema"
                        .to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Root types are renamed to their default names so every subgraph agrees on them.
    fn canonical_name(&self, name: &str) -> String {
        if name == self.query_type {
            "Query".to_string()
        } else if name == self.mutation_type {
            "Mutation".to_string()
        } else {
            name.to_string()
        }
    }

    fn type_entry(
        &mut self,
        kind: TypeKind,
        name: &str,
    ) -> Result<&mut SubgraphType, CompositionError> {
        let name = self.canonical_name(name);
        let subgraph = self.subgraph;
        let ty = self
            .types
            .entry(name.clone())
            .or_insert_with(|| SubgraphType {
                name: name.clone(),
                kind,
                fields: IndexMap::new(),
                interfaces: Vec::new(),
                members: Vec::new(),
                values: Vec::new(),
                input_fields: IndexMap::new(),
                keys: Vec::new(),
            });
        if ty.kind != kind {
            return Err(CompositionError::InvalidSubgraphSchema {
                subgraph: subgraph.to_string(),
                message: format!(
                    "type \"{name}\" is declared both as {} and as {kind}",
                    ty.kind
                ),
            });
        }
        Ok(ty)
    }

    fn add_fields_type(
        &mut self,
        kind: TypeKind,
        name: &apollo_compiler::Name,
        directives: &ast::DirectiveList,
        fields: &[apollo_compiler::Node<ast::FieldDefinition>],
        interfaces: &[apollo_compiler::Name],
    ) -> Result<(), CompositionError> {
        let subgraph = self.subgraph.to_string();
        let mut keys = Vec::new();
        for directive in directives.iter() {
            match directive_name(&directive.name) {
                KEY_DIRECTIVE_NAME => {
                    let fields = directive
                        .specified_argument_by_name(FIELDS_ARGUMENT_NAME)
                        .and_then(|value| value.as_str())
                        .ok_or_else(|| CompositionError::InvalidKey {
                            subgraph: subgraph.clone(),
                            type_name: name.to_string(),
                            fields: String::new(),
                            message: "the \"fields\" argument must be a string".to_string(),
                        })?;
                    let resolvable = directive
                        .specified_argument_by_name(RESOLVABLE_ARGUMENT_NAME)
                        .map(|value| !matches!(&**value, ast::Value::Boolean(false)))
                        .unwrap_or(true);
                    keys.push(KeyDirective {
                        fields: fields.to_string(),
                        resolvable,
                    });
                }
                OVERRIDE_DIRECTIVE_NAME => {
                    return Err(unsupported(&subgraph, &directive.name, name.as_str()));
                }
                EXTENDS_DIRECTIVE_NAME | SHAREABLE_DIRECTIVE_NAME => {}
                _ => {}
            }
        }

        let mut extracted = IndexMap::new();
        for field in fields {
            if is_federation_root_field(&field.name) {
                continue;
            }
            let location = format!("{}.{}", name, field.name);
            let mut external = false;
            let mut requires = None;
            for directive in field.directives.iter() {
                match directive_name(&directive.name) {
                    EXTERNAL_DIRECTIVE_NAME => external = true,
                    REQUIRES_DIRECTIVE_NAME => {
                        let fields = directive
                            .specified_argument_by_name(FIELDS_ARGUMENT_NAME)
                            .and_then(|value| value.as_str())
                            .ok_or_else(|| "the \"fields\" argument must be a string".to_string())
                            .and_then(FieldSet::parse)
                            .map_err(|message| CompositionError::InvalidSubgraphSchema {
                                subgraph: subgraph.clone(),
                                message: format!("invalid @requires on {location}: {message}"),
                            })?;
                        requires = Some(fields);
                    }
                    // Only narrows what a subgraph can return; planning never relies on it.
                    PROVIDES_DIRECTIVE_NAME => {}
                    OVERRIDE_DIRECTIVE_NAME => {
                        return Err(unsupported(&subgraph, &directive.name, &location));
                    }
                    _ => {}
                }
            }
            let arguments = field
                .arguments
                .iter()
                .map(|argument| SubgraphInputValue {
                    name: argument.name.to_string(),
                    ty: FieldType::from(&*argument.ty),
                    default_value: argument.default_value.as_ref().map(|v| print_value(v)),
                })
                .collect();
            extracted.insert(
                field.name.to_string(),
                SubgraphField {
                    name: field.name.to_string(),
                    ty: FieldType::from(&field.ty),
                    arguments,
                    external,
                    requires,
                },
            );
        }

        let ty = self.type_entry(kind, name)?;
        ty.keys.extend(keys);
        extend_unique(
            &mut ty.interfaces,
            interfaces.iter().map(|interface| interface.to_string()),
        );
        for (field_name, field) in extracted {
            if ty.fields.contains_key(&field_name) {
                return Err(CompositionError::InvalidSubgraphSchema {
                    subgraph,
                    message: format!("field \"{}.{field_name}\" is declared twice", ty.name),
                });
            }
            ty.fields.insert(field_name, field);
        }
        Ok(())
    }

    fn add_input_fields(
        &mut self,
        name: &apollo_compiler::Name,
        fields: &[apollo_compiler::Node<ast::InputValueDefinition>],
    ) -> Result<(), CompositionError> {
        let ty = self.type_entry(TypeKind::InputObject, name)?;
        for field in fields {
            ty.input_fields.insert(
                field.name.to_string(),
                SubgraphInputValue {
                    name: field.name.to_string(),
                    ty: FieldType::from(&*field.ty),
                    default_value: field.default_value.as_ref().map(|v| print_value(v)),
                },
            );
        }
        Ok(())
    }
}

fn unsupported(subgraph: &str, directive: &str, location: &str) -> CompositionError {
    CompositionError::UnsupportedDirective {
        subgraph: subgraph.to_string(),
        directive: format!("@{directive}"),
        location: location.to_string(),
    }
}

fn extend_unique(target: &mut Vec<String>, values: impl Iterator<Item = String>) {
    for value in values {
        if !target.contains(&value) {
            target.push(value);
        }
    }
}
