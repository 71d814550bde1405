use std::collections::BTreeMap;

use indexmap::IndexMap;

use crate::error::PlanError;
use crate::error::PlanningError;
use crate::operation::Field;
use crate::operation::Operation;
use crate::operation::OperationKind;
use crate::operation::Selection;
use crate::operation::SelectionSet;
use crate::operation::Variables;
use crate::query_plan::fetch_dependency_graph::FetchDependencyGraph;
use crate::query_plan::fetch_dependency_graph::FetchSelection;
use crate::query_plan::fetch_dependency_graph::FetchSelectionSet;
use crate::query_plan::FetchDataPathElement;
use crate::query_plan::QueryPlan;
use crate::schema::FederatedSchema;
use crate::schema::KeyField;

/// Builds query plans against one federated schema.
///
/// Fields are grouped greedily: at every level the subgraph resolving the most remaining
/// fields wins, preferring the subgraph already fetching the parent object and then the
/// lexically smallest name. Fields the current subgraph cannot resolve move to an entity fetch
/// keyed by a `@key` the current subgraph can produce.
pub struct QueryPlanner<'a> {
    schema: &'a FederatedSchema,
}

impl<'a> QueryPlanner<'a> {
    pub fn new(schema: &'a FederatedSchema) -> Self {
        QueryPlanner { schema }
    }

    pub fn plan(
        &self,
        query: &str,
        operation_name: Option<&str>,
        variables: &Variables,
    ) -> Result<QueryPlan, PlanError> {
        let operation = Operation::parse(self.schema, query, operation_name, variables)?;
        Ok(self.build_plan(operation)?)
    }

    /// Plans an operation that was already validated against this schema.
    pub fn build_plan(&self, operation: Operation) -> Result<QueryPlan, PlanningError> {
        let mut traversal = PlanningTraversal {
            schema: self.schema,
            graph: FetchDependencyGraph::default(),
        };
        match operation.kind {
            OperationKind::Query => traversal.plan_query_root(&operation.selection_set)?,
            OperationKind::Mutation => traversal.plan_mutation_root(&operation.selection_set)?,
        }
        let nodes = traversal.graph.into_nodes(&operation)?;
        tracing::debug!(
            operation.name = operation.name.as_deref().unwrap_or_default(),
            steps = nodes.len(),
            "built query plan"
        );
        Ok(QueryPlan::new(operation.kind, nodes, operation))
    }
}

struct PlanningTraversal<'a> {
    schema: &'a FederatedSchema,
    graph: FetchDependencyGraph,
}

impl PlanningTraversal<'_> {
    /// Root query fields are grouped into one fetch per subgraph, all running in parallel.
    fn plan_query_root(&mut self, selection_set: &SelectionSet) -> Result<(), PlanningError> {
        let root_type = selection_set.type_name.as_str();
        let mut remaining: Vec<&Field> = selection_set
            .fields()
            .filter(|field| !field.is_typename())
            .collect();
        while !remaining.is_empty() {
            let subgraph = self.best_subgraph(root_type, &remaining, None)?;
            let (assigned, rest): (Vec<&Field>, Vec<&Field>) =
                remaining.into_iter().partition(|field| {
                    self.schema.can_resolve(root_type, &field.name, &subgraph)
                });
            let group = match self.graph.root_group(&subgraph) {
                Some(group) => group,
                None => self
                    .graph
                    .new_root_group(&subgraph, OperationKind::Query, None),
            };
            for field in assigned {
                let selection = self.plan_field(group, field, &[])?;
                self.graph.group_mut(group).selection_set.add(selection);
            }
            remaining = rest;
        }
        Ok(())
    }

    /// Root mutation fields run in document order: consecutive fields resolvable by the same
    /// subgraph share a fetch and each fetch waits for the previous one.
    fn plan_mutation_root(&mut self, selection_set: &SelectionSet) -> Result<(), PlanningError> {
        let root_type = selection_set.type_name.as_str();
        let fields: Vec<&Field> = selection_set
            .fields()
            .filter(|field| !field.is_typename())
            .collect();
        let mut current: Option<usize> = None;
        for (index, field) in fields.iter().enumerate() {
            let reusable = current.filter(|group| {
                self.schema
                    .can_resolve(root_type, &field.name, &self.graph.group(*group).subgraph)
            });
            let group = match reusable {
                Some(group) => group,
                None => {
                    let subgraph = self.subgraph_for_run(root_type, &fields[index..])?;
                    let group =
                        self.graph
                            .new_root_group(&subgraph, OperationKind::Mutation, current);
                    current = Some(group);
                    group
                }
            };
            let selection = self.plan_field(group, field, &[])?;
            self.graph.group_mut(group).selection_set.add(selection);
        }
        Ok(())
    }

    /// Plans `selection_set` on `parent_type` inside `group`, splitting off entity fetches.
    /// Returns what `group` itself must select.
    fn plan_selection_set(
        &mut self,
        group: usize,
        parent_type: &str,
        selection_set: &SelectionSet,
        path: &[FetchDataPathElement],
    ) -> Result<FetchSelectionSet, PlanningError> {
        let subgraph = self.graph.group(group).subgraph.clone();

        let mut remaining: Vec<&Field> = selection_set
            .fields()
            .filter(|field| !field.is_typename())
            .collect();
        let mut assignment: IndexMap<String, Vec<&Field>> = IndexMap::new();
        while !remaining.is_empty() {
            let chosen = self.best_subgraph(parent_type, &remaining, Some(&subgraph))?;
            let (assigned, rest): (Vec<&Field>, Vec<&Field>) =
                remaining.into_iter().partition(|field| {
                    self.schema.can_resolve(parent_type, &field.name, &chosen)
                });
            assignment.insert(chosen, assigned);
            remaining = rest;
        }
        let local_fields = assignment.shift_remove(&subgraph).unwrap_or_default();

        let mut local = FetchSelectionSet::default();
        for selection in &selection_set.selections {
            match selection {
                Selection::Field(field) if field.is_typename() => {
                    local.add(FetchSelection::Field {
                        alias: field.alias.clone(),
                        name: field.name.clone(),
                        arguments: Vec::new(),
                        selection_set: None,
                    });
                }
                Selection::Field(field) => {
                    if local_fields
                        .iter()
                        .any(|local_field| std::ptr::eq(*local_field, field))
                    {
                        let selection = self.plan_field(group, field, path)?;
                        local.add(selection);
                    }
                }
                Selection::InlineFragment(fragment) => {
                    let nested = self.plan_selection_set(
                        group,
                        &fragment.type_condition,
                        &fragment.selection_set,
                        path,
                    )?;
                    if !nested.is_empty() {
                        local.add(FetchSelection::InlineFragment {
                            type_condition: fragment.type_condition.clone(),
                            selection_set: nested,
                        });
                    }
                }
            }
        }

        for (target, fields) in assignment {
            self.plan_entity_fetch(group, parent_type, &target, &fields, path, &mut local)?;
        }
        if self.schema.is_abstract(parent_type) {
            local.add_typename();
        }
        Ok(local)
    }

    fn plan_field(
        &mut self,
        group: usize,
        field: &Field,
        path: &[FetchDataPathElement],
    ) -> Result<FetchSelection, PlanningError> {
        field.variable_usages(&mut self.graph.group_mut(group).variable_usages);
        let selection_set = match &field.selection_set {
            Some(selection_set) => {
                let mut field_path = path.to_vec();
                field_path.push(FetchDataPathElement::Key(field.response_key().to_string()));
                field_path.extend(
                    std::iter::repeat(FetchDataPathElement::AnyIndex).take(field.ty.list_depth()),
                );
                Some(self.plan_selection_set(
                    group,
                    &selection_set.type_name,
                    selection_set,
                    &field_path,
                )?)
            }
            None => None,
        };
        Ok(FetchSelection::Field {
            alias: field.alias.clone(),
            name: field.name.clone(),
            arguments: field.arguments.clone(),
            selection_set,
        })
    }

    /// Moves `fields` of `parent_type` into an entity fetch from `target`. The current group
    /// selects `__typename`, the key and whatever `fields` require so the representations can
    /// be built.
    fn plan_entity_fetch(
        &mut self,
        group: usize,
        parent_type: &str,
        target: &str,
        fields: &[&Field],
        path: &[FetchDataPathElement],
        local: &mut FetchSelectionSet,
    ) -> Result<(), PlanningError> {
        let source = self.graph.group(group).subgraph.clone();
        let unsatisfiable = |message: String| PlanningError::UnsatisfiableDependency {
            type_name: parent_type.to_string(),
            field_name: fields
                .first()
                .map(|field| field.name.clone())
                .unwrap_or_default(),
            subgraph: target.to_string(),
            message,
        };
        if !self.schema.is_entity(parent_type) {
            return Err(unsatisfiable(format!(
                "\"{parent_type}\" is not an entity and cannot be fetched from subgraph \"{source}\""
            )));
        }
        let key = self
            .schema
            .keys_for(parent_type, target)
            .filter(|key| key.resolvable)
            .find(|key| {
                self.schema
                    .can_resolve_fields(parent_type, key.fields.selections(), &source)
            })
            .map(|key| key.fields.clone())
            .ok_or_else(|| {
                unsatisfiable(format!(
                    "no resolvable @key of subgraph \"{target}\" can be provided by subgraph \"{source}\""
                ))
            })?;

        let mut required_fields = key.selections().to_vec();
        for field in fields {
            let Some(requires) = self.schema.requires(parent_type, &field.name, target) else {
                continue;
            };
            if !self
                .schema
                .can_resolve_fields(parent_type, requires.selections(), &source)
            {
                return Err(unsatisfiable(format!(
                    "@requires(fields: \"{requires}\") of \"{}\" cannot be provided by subgraph \"{source}\"",
                    field.name
                )));
            }
            merge_key_fields(&mut required_fields, requires.selections());
        }
        let required = local.add_required(&required_fields);

        let entity_group = self
            .graph
            .entity_group(group, target, parent_type, path, required);
        let mut entity_selection = FetchSelectionSet::default();
        for field in fields {
            let selection = self.plan_field(entity_group, field, path)?;
            entity_selection.add(selection);
        }
        self.graph
            .group_mut(entity_group)
            .selection_set
            .merge(entity_selection);
        Ok(())
    }

    /// The subgraph resolving the most of `fields`. Ties go to `preferred`, then to the
    /// lexically smallest name.
    fn best_subgraph(
        &self,
        type_name: &str,
        fields: &[&Field],
        preferred: Option<&str>,
    ) -> Result<String, PlanningError> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for field in fields {
            let owners = self
                .schema
                .field(type_name, &field.name)
                .map(|definition| definition.owners.as_slice())
                .unwrap_or_default();
            if owners.is_empty() {
                return Err(PlanningError::UnsatisfiableDependency {
                    type_name: type_name.to_string(),
                    field_name: field.name.clone(),
                    subgraph: preferred.unwrap_or_default().to_string(),
                    message: "no subgraph resolves this field".to_string(),
                });
            }
            for owner in owners {
                *counts.entry(owner.as_str()).or_default() += 1;
            }
        }
        let max = counts.values().copied().max().unwrap_or_default();
        if let Some(preferred) = preferred {
            if counts.get(preferred) == Some(&max) {
                return Ok(preferred.to_string());
            }
        }
        counts
            .into_iter()
            .find(|(_, count)| *count == max)
            .map(|(subgraph, _)| subgraph.to_string())
            .ok_or_else(|| PlanningError::UnsatisfiableDependency {
                type_name: type_name.to_string(),
                field_name: String::new(),
                subgraph: String::new(),
                message: "no fields to plan".to_string(),
            })
    }

    /// The owner of `fields[0]` resolving the longest run of consecutive fields.
    fn subgraph_for_run(&self, type_name: &str, fields: &[&Field]) -> Result<String, PlanningError> {
        let Some(first) = fields.first() else {
            return Err(PlanningError::UnsatisfiableDependency {
                type_name: type_name.to_string(),
                field_name: String::new(),
                subgraph: String::new(),
                message: "no fields to plan".to_string(),
            });
        };
        let owners = self
            .schema
            .field(type_name, &first.name)
            .map(|definition| definition.owners.clone())
            .unwrap_or_default();
        owners
            .iter()
            .map(|owner| {
                let run = fields
                    .iter()
                    .take_while(|field| self.schema.can_resolve(type_name, &field.name, owner))
                    .count();
                (owner, run)
            })
            // owners are sorted, so the first maximum is the lexically smallest
            .fold(None, |best: Option<(&String, usize)>, (owner, run)| match best {
                Some((_, best_run)) if best_run >= run => best,
                _ => Some((owner, run)),
            })
            .map(|(owner, _)| owner.clone())
            .ok_or_else(|| PlanningError::UnsatisfiableDependency {
                type_name: type_name.to_string(),
                field_name: first.name.clone(),
                subgraph: String::new(),
                message: "no subgraph resolves this field".to_string(),
            })
    }
}

/// Adds `fields` to `into`, merging the sub-selections of fields selected by both.
fn merge_key_fields(into: &mut Vec<KeyField>, fields: &[KeyField]) {
    for field in fields {
        match into.iter_mut().find(|existing| existing.name == field.name) {
            Some(existing) => merge_key_fields(&mut existing.selections, &field.selections),
            None => into.push(field.clone()),
        }
    }
}
