//! Merges subgraph schemas into one [`FederatedSchema`].

use std::collections::HashSet;
use std::sync::Arc;

use indexmap::map::Entry;
use indexmap::IndexMap;
use itertools::Itertools;

use crate::error::CompositionError;
use crate::error::CompositionErrors;
use crate::schema::EntityKey;
use crate::schema::FederatedSchema;
use crate::schema::FieldDefinition;
use crate::schema::FieldSet;
use crate::schema::InputValueDefinition;
use crate::schema::KeyField;
use crate::schema::SubgraphInfo;
use crate::schema::TypeDefinition;
use crate::schema::TypeKind;
use crate::subgraph::spec::is_built_in_scalar;
use crate::subgraph::KeyDirective;
use crate::subgraph::Subgraph;
use crate::subgraph::SubgraphInputValue;
use crate::subgraph::SubgraphType;

const QUERY_TYPE: &str = "Query";
const MUTATION_TYPE: &str = "Mutation";

/// Composes `subgraphs` into a federated schema.
///
/// Subgraphs are merged in name order. Every problem found is reported, not just the first.
pub fn compose(subgraphs: &[Arc<Subgraph>]) -> Result<FederatedSchema, CompositionErrors> {
    let mut sorted: Vec<&Subgraph> = subgraphs.iter().map(AsRef::as_ref).collect();
    sorted.sort_by(|left, right| left.name.cmp(&right.name));

    let mut composer = Composer::default();
    for (index, subgraph) in sorted.iter().enumerate() {
        if index > 0 && sorted[index - 1].name == subgraph.name {
            composer
                .errors
                .push(CompositionError::DuplicateSubgraphName(subgraph.name.clone()));
            continue;
        }
        composer.merge_subgraph(subgraph);
    }
    let schema = composer.finish()?;
    tracing::info!(
        schema_id = %schema.schema_id(),
        subgraphs = sorted.len(),
        "composed federated schema"
    );
    Ok(schema)
}

#[derive(Default)]
struct Composer {
    errors: Vec<CompositionError>,
    subgraphs: IndexMap<String, SubgraphInfo>,
    types: IndexMap<String, TypeDefinition>,
    /// Field names declared for each type, per subgraph.
    declared_fields: IndexMap<String, IndexMap<String, Vec<String>>>,
    keys: Vec<(String, String, KeyDirective)>,
    kind_conflicts: HashSet<String>,
}

impl Composer {
    fn merge_subgraph(&mut self, subgraph: &Subgraph) {
        self.subgraphs.insert(
            subgraph.name.clone(),
            SubgraphInfo {
                name: subgraph.name.clone(),
                url: subgraph.url.clone(),
            },
        );
        for ty in subgraph.schema.types.values() {
            self.merge_type(&subgraph.name, ty);
        }
    }

    fn merge_type(&mut self, subgraph: &str, ty: &SubgraphType) {
        let merged = match self.types.entry(ty.name.clone()) {
            Entry::Vacant(entry) => entry.insert(TypeDefinition::new(ty.name.clone(), ty.kind)),
            Entry::Occupied(entry) => entry.into_mut(),
        };
        if merged.kind != ty.kind {
            if self.kind_conflicts.insert(ty.name.clone()) {
                self.errors.push(CompositionError::TypeKindConflict {
                    type_name: ty.name.clone(),
                    message: format!(
                        "{} in {} but {} in subgraph \"{subgraph}\"",
                        merged.kind,
                        describe_subgraphs(&merged.subgraphs),
                        ty.kind
                    ),
                });
            }
            return;
        }
        let first_declaration = merged.subgraphs.is_empty();
        merged.subgraphs.push(subgraph.to_string());

        match ty.kind {
            TypeKind::Object | TypeKind::Interface => {
                extend_unique(&mut merged.interfaces, &ty.interfaces);
                for field in ty.fields.values() {
                    let arguments = arguments_of(&field.arguments);
                    match merged.fields.get_mut(&field.name) {
                        Some(existing) => {
                            match existing.ty.merge(&field.ty) {
                                Some(merged_type) => existing.ty = merged_type,
                                None => self.errors.push(CompositionError::FieldConflict {
                                    type_name: ty.name.clone(),
                                    field_name: field.name.clone(),
                                    message: format!(
                                        "type \"{}\" in subgraph \"{subgraph}\" does not match \"{}\"",
                                        field.ty, existing.ty
                                    ),
                                }),
                            }
                            if !same_arguments(&existing.arguments, &arguments) {
                                self.errors.push(CompositionError::FieldConflict {
                                    type_name: ty.name.clone(),
                                    field_name: field.name.clone(),
                                    message: format!(
                                        "arguments in subgraph \"{subgraph}\" differ from other subgraphs"
                                    ),
                                });
                            }
                            if !field.external {
                                existing.owners.push(subgraph.to_string());
                            }
                            if let Some(requires) = &field.requires {
                                existing
                                    .requires
                                    .insert(subgraph.to_string(), requires.clone());
                            }
                        }
                        None => {
                            merged.fields.insert(
                                field.name.clone(),
                                FieldDefinition {
                                    name: field.name.clone(),
                                    ty: field.ty.clone(),
                                    arguments,
                                    owners: if field.external {
                                        Vec::new()
                                    } else {
                                        vec![subgraph.to_string()]
                                    },
                                    requires: field
                                        .requires
                                        .iter()
                                        .map(|requires| (subgraph.to_string(), requires.clone()))
                                        .collect(),
                                },
                            );
                        }
                    }
                }
                self.declared_fields
                    .entry(ty.name.clone())
                    .or_default()
                    .insert(subgraph.to_string(), ty.fields.keys().cloned().collect());
                for key in &ty.keys {
                    self.keys
                        .push((subgraph.to_string(), ty.name.clone(), key.clone()));
                }
            }
            TypeKind::Union => extend_unique(&mut merged.members, &ty.members),
            TypeKind::Enum => {
                if first_declaration {
                    merged.values = ty.values.clone();
                } else if !same_set(&merged.values, &ty.values) {
                    self.errors.push(CompositionError::TypeDefinitionConflict {
                        type_name: ty.name.clone(),
                        message: format!(
                            "enum values in subgraph \"{subgraph}\" differ from other subgraphs"
                        ),
                    });
                }
            }
            TypeKind::InputObject => {
                let fields: IndexMap<String, InputValueDefinition> = ty
                    .input_fields
                    .values()
                    .map(|field| (field.name.clone(), input_value(field)))
                    .collect();
                if first_declaration {
                    merged.input_fields = fields;
                } else if !same_input_fields(&merged.input_fields, &fields) {
                    self.errors.push(CompositionError::TypeDefinitionConflict {
                        type_name: ty.name.clone(),
                        message: format!(
                            "input fields in subgraph \"{subgraph}\" differ from other subgraphs"
                        ),
                    });
                }
            }
            TypeKind::Scalar => {}
        }
    }

    fn finish(mut self) -> Result<FederatedSchema, CompositionErrors> {
        self.apply_keys();
        self.check_entities();
        self.check_references();
        self.check_resolvability();

        let query_type = match self.types.get(QUERY_TYPE) {
            Some(query) if query.kind == TypeKind::Object && !query.fields.is_empty() => {
                QUERY_TYPE.to_string()
            }
            _ => {
                self.errors.push(CompositionError::NoQueryRoot);
                QUERY_TYPE.to_string()
            }
        };
        let mutation_type = self
            .types
            .get(MUTATION_TYPE)
            .filter(|mutation| mutation.kind == TypeKind::Object)
            .map(|_| MUTATION_TYPE.to_string());

        if !self.errors.is_empty() {
            return Err(CompositionErrors {
                errors: self.errors,
            });
        }

        for ty in self.types.values_mut() {
            ty.subgraphs.sort();
            ty.interfaces.sort();
            ty.members.sort();
            ty.keys.sort_by(|left, right| {
                (&left.subgraph, left.fields.to_string())
                    .cmp(&(&right.subgraph, right.fields.to_string()))
            });
            for field in ty.fields.values_mut() {
                field.owners.sort();
                field.owners.dedup();
            }
        }
        self.types.sort_keys();
        self.subgraphs.sort_keys();
        Ok(FederatedSchema::new(
            self.subgraphs,
            query_type,
            mutation_type,
            self.types,
        ))
    }

    /// Validates every `@key` and makes its fields resolvable by the declaring subgraph.
    fn apply_keys(&mut self) {
        for (subgraph, type_name, key) in std::mem::take(&mut self.keys) {
            let invalid_key = |message: String| CompositionError::InvalidKey {
                subgraph: subgraph.clone(),
                type_name: type_name.clone(),
                fields: key.fields.clone(),
                message,
            };
            let fields = match FieldSet::parse(&key.fields) {
                Ok(fields) => fields,
                Err(message) => {
                    self.errors.push(invalid_key(message));
                    continue;
                }
            };
            if let Err(message) = self.validate_key_fields(&subgraph, &type_name, fields.selections())
            {
                self.errors.push(invalid_key(message));
                continue;
            }
            self.add_key_owners(&subgraph, &type_name, fields.selections());
            if let Some(ty) = self.types.get_mut(&type_name) {
                ty.keys.push(EntityKey {
                    subgraph,
                    fields,
                    resolvable: key.resolvable,
                });
            }
        }
    }

    fn validate_key_fields(
        &self,
        subgraph: &str,
        type_name: &str,
        fields: &[KeyField],
    ) -> Result<(), String> {
        for key_field in fields {
            let declared = self
                .declared_fields
                .get(type_name)
                .and_then(|by_subgraph| by_subgraph.get(subgraph))
                .is_some_and(|names| names.contains(&key_field.name));
            let field = self
                .types
                .get(type_name)
                .and_then(|ty| ty.fields.get(&key_field.name))
                .filter(|_| declared)
                .ok_or_else(|| {
                    format!(
                        "field \"{}\" is not declared on \"{type_name}\"",
                        key_field.name
                    )
                })?;
            if field.ty.is_list() {
                return Err(format!("list field \"{}\" cannot be a key", key_field.name));
            }
            if !field.arguments.is_empty() {
                return Err(format!(
                    "field \"{}\" takes arguments and cannot be a key",
                    key_field.name
                ));
            }
            let inner = field.ty.inner_type_name();
            let kind = if is_built_in_scalar(inner) {
                Some(TypeKind::Scalar)
            } else {
                self.types.get(inner).map(|ty| ty.kind)
            };
            match kind {
                Some(TypeKind::Scalar | TypeKind::Enum) => {
                    if !key_field.selections.is_empty() {
                        return Err(format!(
                            "field \"{}\" of type \"{inner}\" cannot have a selection",
                            key_field.name
                        ));
                    }
                }
                Some(TypeKind::Object | TypeKind::Interface) => {
                    if key_field.selections.is_empty() {
                        return Err(format!(
                            "field \"{}\" of type \"{inner}\" must have a selection",
                            key_field.name
                        ));
                    }
                    self.validate_key_fields(subgraph, inner, &key_field.selections)?;
                }
                _ => {
                    return Err(format!(
                        "field \"{}\" of type \"{inner}\" cannot be part of a key",
                        key_field.name
                    ));
                }
            }
        }
        Ok(())
    }

    fn add_key_owners(&mut self, subgraph: &str, type_name: &str, fields: &[KeyField]) {
        for key_field in fields {
            let Some(field) = self
                .types
                .get_mut(type_name)
                .and_then(|ty| ty.fields.get_mut(&key_field.name))
            else {
                continue;
            };
            if !field.is_owned_by(subgraph) {
                field.owners.push(subgraph.to_string());
            }
            let inner = field.ty.inner_type_name().to_string();
            self.add_key_owners(subgraph, &inner, &key_field.selections);
        }
    }

    /// An object type declared by several subgraphs is either an entity, where every declaring
    /// subgraph shares a key with another one, or a value type declared identically everywhere.
    fn check_entities(&mut self) {
        for ty in self.types.values() {
            if ty.kind != TypeKind::Object
                || ty.subgraphs.len() < 2
                || ty.name == QUERY_TYPE
                || ty.name == MUTATION_TYPE
            {
                continue;
            }
            if ty.keys.is_empty() {
                let Some(by_subgraph) = self.declared_fields.get(&ty.name) else {
                    continue;
                };
                let mut declarations = by_subgraph.iter();
                let Some((first_subgraph, first_fields)) = declarations.next() else {
                    continue;
                };
                for (subgraph, fields) in declarations {
                    if !same_set(first_fields, fields) {
                        self.errors.push(CompositionError::UnresolvableEntity {
                            type_name: ty.name.clone(),
                            message: format!(
                                "value type fields in subgraph \"{subgraph}\" differ from subgraph \"{first_subgraph}\"; declare a @key to make it an entity"
                            ),
                        });
                        break;
                    }
                }
                continue;
            }
            for subgraph in &ty.subgraphs {
                let own_keys = ty
                    .keys
                    .iter()
                    .filter(|key| &key.subgraph == subgraph)
                    .collect_vec();
                if own_keys.is_empty() {
                    self.errors.push(CompositionError::UnresolvableEntity {
                        type_name: ty.name.clone(),
                        message: format!("subgraph \"{subgraph}\" declares it without a @key"),
                    });
                    continue;
                }
                let shares_a_key = own_keys.iter().any(|own| {
                    ty.keys.iter().any(|other| {
                        &other.subgraph != subgraph
                            && other.fields.canonical() == own.fields.canonical()
                    })
                });
                let others_have_keys = ty.keys.iter().any(|key| &key.subgraph != subgraph);
                if others_have_keys && !shares_a_key {
                    self.errors.push(CompositionError::UnresolvableEntity {
                        type_name: ty.name.clone(),
                        message: format!(
                            "no @key of subgraph \"{subgraph}\" is declared by another subgraph"
                        ),
                    });
                }
            }
        }
    }

    fn check_references(&mut self) {
        let exists = |name: &str| is_built_in_scalar(name) || self.types.contains_key(name);
        let mut errors = Vec::new();
        for ty in self.types.values() {
            let mut referenced = Vec::new();
            for field in ty.fields.values() {
                let location = format!("{}.{}", ty.name, field.name);
                referenced.push((field.ty.inner_type_name(), location.clone()));
                for argument in &field.arguments {
                    referenced.push((
                        argument.ty.inner_type_name(),
                        format!("{location}({}:)", argument.name),
                    ));
                }
            }
            for field in ty.input_fields.values() {
                referenced.push((
                    field.ty.inner_type_name(),
                    format!("{}.{}", ty.name, field.name),
                ));
            }
            for name in ty.interfaces.iter().chain(&ty.members) {
                referenced.push((name.as_str(), ty.name.clone()));
            }
            for (type_name, referenced_by) in referenced {
                if !exists(type_name) {
                    errors.push(CompositionError::UnknownType {
                        type_name: type_name.to_string(),
                        referenced_by,
                    });
                }
            }
        }
        self.errors.extend(errors);
    }

    fn check_resolvability(&mut self) {
        for ty in self.types.values() {
            if !matches!(ty.kind, TypeKind::Object | TypeKind::Interface) {
                continue;
            }
            for field in ty.fields.values() {
                if field.owners.is_empty() {
                    self.errors.push(CompositionError::UnresolvableField {
                        type_name: ty.name.clone(),
                        field_name: field.name.clone(),
                    });
                }
            }
        }
    }
}

fn describe_subgraphs(subgraphs: &[String]) -> String {
    match subgraphs {
        [single] => format!("subgraph \"{single}\""),
        _ => format!(
            "subgraphs {}",
            subgraphs.iter().map(|name| format!("\"{name}\"")).join(", ")
        ),
    }
}

fn input_value(value: &SubgraphInputValue) -> InputValueDefinition {
    InputValueDefinition {
        name: value.name.clone(),
        ty: value.ty.clone(),
        default_value: value.default_value.clone(),
    }
}

fn arguments_of(arguments: &[SubgraphInputValue]) -> Vec<InputValueDefinition> {
    arguments.iter().map(input_value).collect()
}

fn same_arguments(left: &[InputValueDefinition], right: &[InputValueDefinition]) -> bool {
    left.len() == right.len()
        && left.iter().all(|argument| {
            right
                .iter()
                .any(|other| other.name == argument.name && other.ty == argument.ty)
        })
}

fn same_input_fields(
    left: &IndexMap<String, InputValueDefinition>,
    right: &IndexMap<String, InputValueDefinition>,
) -> bool {
    left.len() == right.len()
        && left
            .iter()
            .all(|(name, field)| right.get(name).is_some_and(|other| other.ty == field.ty))
}

fn same_set(left: &[String], right: &[String]) -> bool {
    left.iter().sorted().dedup().eq(right.iter().sorted().dedup())
}

fn extend_unique(target: &mut Vec<String>, values: &[String]) {
    for value in values {
        if !target.contains(value) {
            target.push(value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn subgraph(name: &str, sdl: &str) -> Arc<Subgraph> {
        Arc::new(Subgraph::parse(name, format!("http://{name}/graphql"), sdl).unwrap())
    }

    fn demo_subgraphs() -> Vec<Arc<Subgraph>> {
        vec![
            subgraph("reviews", include_str!("../testdata/reviews.graphql")),
            subgraph("accounts", include_str!("../testdata/accounts.graphql")),
            subgraph("products", include_str!("../testdata/products.graphql")),
        ]
    }

    fn compose_errors(subgraphs: &[Arc<Subgraph>]) -> Vec<CompositionError> {
        compose(subgraphs).unwrap_err().errors
    }

    #[test]
    fn composes_the_demo_graph() {
        let schema = compose(&demo_subgraphs()).unwrap();
        insta::assert_snapshot!(schema.to_string(), @r###"
        schema {
          query: Query
        }

        type Product @key(subgraph: "products", fields: "upc") @key(subgraph: "reviews", fields: "upc") {
          upc: String! @resolvedBy(subgraphs: ["products", "reviews"])
          name: String @resolvedBy(subgraphs: ["products"])
          price: Int @resolvedBy(subgraphs: ["products"])
          reviews: [Review] @resolvedBy(subgraphs: ["reviews"])
        }

        type Query {
          me: User @resolvedBy(subgraphs: ["accounts"])
          user(id: ID!): User @resolvedBy(subgraphs: ["accounts"])
          topProducts(first: Int = 5): [Product] @resolvedBy(subgraphs: ["products"])
          reviews: [Review] @resolvedBy(subgraphs: ["reviews"])
        }

        type Review @key(subgraph: "reviews", fields: "id") {
          id: ID! @resolvedBy(subgraphs: ["reviews"])
          body: String @resolvedBy(subgraphs: ["reviews"])
          author: User @resolvedBy(subgraphs: ["reviews"])
          product: Product @resolvedBy(subgraphs: ["reviews"])
        }

        type User @key(subgraph: "accounts", fields: "id") @key(subgraph: "reviews", fields: "id") {
          id: ID! @resolvedBy(subgraphs: ["accounts", "reviews"])
          name: String @resolvedBy(subgraphs: ["accounts"])
          username: String @resolvedBy(subgraphs: ["accounts"])
          reviews: [Review] @resolvedBy(subgraphs: ["reviews"])
        }
        "###);
        assert_eq!(
            schema.subgraph("accounts").unwrap().url,
            "http://accounts/graphql"
        );
        assert_eq!(schema.schema_id().len(), 64);
    }

    #[test]
    fn composes_subgraphs_using_provides_and_requires() {
        let schema = compose(&[
            subgraph(
                "accounts",
                r#"type Query { me: User } type User @key(fields: "id") { id: ID! username: String! }"#,
            ),
            subgraph(
                "products",
                r#"type Query { topProducts: [Product] } type Product @key(fields: "upc") { upc: String! name: String! price: Int! }"#,
            ),
            subgraph(
                "reviews",
                r#"
                scalar DateTime

                type Review {
                  id: ID!
                  created: DateTime!
                  body: String!
                  author: User! @provides(fields: "username")
                  product: Product!
                }

                type Query {
                  getReview(id: ID!): Review
                }

                extend type User @key(fields: "id") {
                  id: ID! @external
                  reviews: [Review]
                }

                extend type Product @key(fields: "upc") {
                  upc: String! @external
                  name: String! @external
                  reviews: [Review] @requires(fields: "name")
                }
                "#,
            ),
        ])
        .unwrap();
        assert_eq!(
            schema
                .requires("Product", "reviews", "reviews")
                .map(FieldSet::canonical),
            Some("name".to_string())
        );
        assert_eq!(schema.requires("Product", "name", "products"), None);
        assert_eq!(
            schema.field("Product", "name").map(|field| field.owners.clone()),
            Some(vec!["products".to_string()])
        );
        assert_eq!(
            schema.field("Review", "author").map(|field| field.owners.clone()),
            Some(vec!["reviews".to_string()])
        );
    }

    #[test]
    fn composition_does_not_depend_on_registration_order() {
        let subgraphs = demo_subgraphs();
        let reference = compose(&subgraphs).unwrap();
        for permutation in subgraphs.iter().cloned().permutations(subgraphs.len()) {
            let schema = compose(&permutation).unwrap();
            assert_eq!(schema, reference);
            assert_eq!(schema.schema_id(), reference.schema_id());
        }
    }

    #[test]
    fn single_subgraph_composes_to_itself() {
        let schema = compose(&[subgraph(
            "accounts",
            include_str!("../testdata/accounts.graphql"),
        )])
        .unwrap();
        assert_eq!(schema.subgraphs().count(), 1);
        assert!(schema.can_resolve("User", "name", "accounts"));
        assert!(schema.is_entity("User"));
    }

    #[test]
    fn nullability_differences_merge_to_nullable() {
        let schema = compose(&[
            subgraph("a", r#"type Query { a: Info } type Info { id: ID! label: String! }"#),
            subgraph("b", r#"type Query { b: Info } type Info { id: ID! label: String }"#),
        ])
        .unwrap();
        assert_eq!(schema.field("Info", "label").unwrap().ty.to_string(), "String");
        assert_eq!(schema.field("Info", "id").unwrap().ty.to_string(), "ID!");
        assert_eq!(schema.field("Info", "id").unwrap().owners, vec!["a", "b"]);
    }

    #[test]
    fn incompatible_field_types_conflict() {
        let errors = compose_errors(&[
            subgraph("a", r#"type Query { a: User } type User @key(fields: "id") { id: ID! age: Int }"#),
            subgraph("b", r#"type Query { b: User } type User @key(fields: "id") { id: ID! age: String }"#),
        ]);
        assert_eq!(
            errors,
            vec![CompositionError::FieldConflict {
                type_name: "User".to_string(),
                field_name: "age".to_string(),
                message: "type \"String\" in subgraph \"b\" does not match \"Int\"".to_string(),
            }]
        );
    }

    #[test]
    fn list_structure_must_match() {
        let errors = compose_errors(&[
            subgraph("a", r#"type Query { tags: [String] }"#),
            subgraph("b", r#"type Query { tags: String }"#),
        ]);
        assert!(matches!(
            &errors[..],
            [CompositionError::FieldConflict { field_name, .. }] if field_name == "tags"
        ));
    }

    #[test]
    fn type_kinds_must_match() {
        let errors = compose_errors(&[
            subgraph("a", r#"type Query { a: Thing } type Thing { id: ID }"#),
            subgraph("b", r#"type Query { b: Thing } interface Thing { id: ID }"#),
        ]);
        assert_eq!(
            errors,
            vec![CompositionError::TypeKindConflict {
                type_name: "Thing".to_string(),
                message: "object in subgraph \"a\" but interface in subgraph \"b\"".to_string(),
            }]
        );
    }

    #[test]
    fn keys_must_reference_declared_fields() {
        let errors = compose_errors(&[subgraph(
            "a",
            r#"type Query { a: User } type User @key(fields: "uuid") { id: ID! }"#,
        )]);
        assert_eq!(
            errors,
            vec![CompositionError::InvalidKey {
                subgraph: "a".to_string(),
                type_name: "User".to_string(),
                fields: "uuid".to_string(),
                message: "field \"uuid\" is not declared on \"User\"".to_string(),
            }]
        );
    }

    #[test]
    fn keys_must_have_valid_types() {
        let errors = compose_errors(&[subgraph(
            "a",
            r#"
            type Query { a: User }
            type User @key(fields: "tags") @key(fields: "org") { tags: [String] org: Org }
            type Org { id: ID }
            "#,
        )]);
        assert_eq!(errors.len(), 2);
        assert!(errors
            .iter()
            .all(|error| matches!(error, CompositionError::InvalidKey { .. })));
    }

    #[test]
    fn nested_keys_are_resolvable_by_the_declaring_subgraph() {
        let schema = compose(&[
            subgraph(
                "a",
                r#"
                type Query { a: User }
                type User @key(fields: "org { id } id") { id: ID! org: Org! name: String }
                type Org { id: ID! }
                "#,
            ),
            subgraph(
                "b",
                r#"
                type Query { b: User }
                type User @key(fields: "id org { id }") { id: ID! org: Org! @external }
                type Org { id: ID! }
                "#,
            ),
        ])
        .unwrap();
        assert_eq!(schema.field("User", "org").unwrap().owners, vec!["a", "b"]);
    }

    #[test]
    fn entity_without_key_in_one_subgraph_is_unresolvable() {
        let errors = compose_errors(&[
            subgraph("a", r#"type Query { a: User } type User @key(fields: "id") { id: ID! name: String }"#),
            subgraph("b", r#"type Query { b: User } type User { id: ID! email: String }"#),
        ]);
        assert_eq!(
            errors,
            vec![CompositionError::UnresolvableEntity {
                type_name: "User".to_string(),
                message: "subgraph \"b\" declares it without a @key".to_string(),
            }]
        );
    }

    #[test]
    fn entity_keys_must_overlap() {
        let errors = compose_errors(&[
            subgraph("a", r#"type Query { a: User } type User @key(fields: "id") { id: ID! email: String! }"#),
            subgraph("b", r#"type Query { b: User } type User @key(fields: "email") { id: ID! email: String! }"#),
        ]);
        assert_eq!(errors.len(), 2);
        assert!(errors
            .iter()
            .all(|error| matches!(error, CompositionError::UnresolvableEntity { .. })));
    }

    #[test]
    fn value_types_must_be_identical() {
        let errors = compose_errors(&[
            subgraph("a", r#"type Query { a: Money } type Money { amount: Int currency: String }"#),
            subgraph("b", r#"type Query { b: Money } type Money { amount: Int }"#),
        ]);
        assert!(matches!(
            &errors[..],
            [CompositionError::UnresolvableEntity { type_name, .. }] if type_name == "Money"
        ));
    }

    #[test]
    fn enums_and_inputs_must_be_identical() {
        let errors = compose_errors(&[
            subgraph(
                "a",
                r#"type Query { a(filter: Filter): Color } enum Color { RED GREEN } input Filter { limit: Int }"#,
            ),
            subgraph(
                "b",
                r#"type Query { b(filter: Filter): Color } enum Color { RED BLUE } input Filter { limit: String }"#,
            ),
        ]);
        let conflicting: Vec<_> = errors
            .iter()
            .filter_map(|error| match error {
                CompositionError::TypeDefinitionConflict { type_name, .. } => {
                    Some(type_name.as_str())
                }
                _ => None,
            })
            .collect();
        assert_eq!(conflicting, vec!["Color", "Filter"]);
    }

    #[test]
    fn unions_are_merged() {
        let schema = compose(&[
            subgraph("a", r#"type Query { a: Result } union Result = Book type Book { id: ID }"#),
            subgraph("b", r#"type Query { b: Result } union Result = Movie type Movie { id: ID }"#),
        ])
        .unwrap();
        assert_eq!(schema.possible_types("Result"), vec!["Book", "Movie"]);
    }

    #[test]
    fn external_only_fields_are_unresolvable() {
        let errors = compose_errors(&[subgraph(
            "a",
            r#"type Query { a: User } type User @key(fields: "id") { id: ID! name: String @external }"#,
        )]);
        assert_eq!(
            errors,
            vec![CompositionError::UnresolvableField {
                type_name: "User".to_string(),
                field_name: "name".to_string(),
            }]
        );
    }

    #[test]
    fn reports_every_error_at_once() {
        let errors = compose_errors(&[
            subgraph("a", r#"type Query { a: Missing count: Int }"#),
            subgraph("b", r#"type Query { count: String }"#),
        ]);
        assert_eq!(errors.len(), 2);
        assert!(errors
            .iter()
            .any(|error| matches!(error, CompositionError::FieldConflict { .. })));
        assert!(errors
            .iter()
            .any(|error| matches!(error, CompositionError::UnknownType { .. })));
    }

    #[test]
    fn query_root_is_required() {
        let errors = compose_errors(&[subgraph("a", r#"type Thing { id: ID }"#)]);
        assert_eq!(errors, vec![CompositionError::NoQueryRoot]);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let errors = compose_errors(&[
            subgraph("a", r#"type Query { a: Int }"#),
            subgraph("a", r#"type Query { b: Int }"#),
        ]);
        assert_eq!(
            errors,
            vec![CompositionError::DuplicateSubgraphName("a".to_string())]
        );
    }
}
