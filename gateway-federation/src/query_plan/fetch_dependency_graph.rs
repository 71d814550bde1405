use std::collections::BTreeSet;
use std::fmt::Display;
use std::fmt::Formatter;

use indexmap::IndexSet;
use itertools::Itertools;
use petgraph::algo::toposort;
use petgraph::stable_graph::NodeIndex;
use petgraph::stable_graph::StableDiGraph;

use crate::error::PlanningError;
use crate::operation::Argument;
use crate::operation::Operation;
use crate::operation::OperationKind;
use crate::query_plan::FetchDataPathElement;
use crate::query_plan::FetchNode;
use crate::query_plan::Field;
use crate::query_plan::InlineFragment;
use crate::query_plan::Selection;
use crate::schema::KeyField;
use crate::subgraph::spec::ANY_SCALAR_NAME;
use crate::subgraph::spec::ENTITIES_QUERY;
use crate::subgraph::spec::REPRESENTATIONS_VARIABLE;
use crate::subgraph::spec::TYPENAME_FIELD;
use crate::values::print_value;

/// The selection a fetch group sends to its subgraph.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct FetchSelectionSet {
    selections: Vec<FetchSelection>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum FetchSelection {
    Field {
        alias: Option<String>,
        name: String,
        arguments: Vec<Argument>,
        selection_set: Option<FetchSelectionSet>,
    },
    InlineFragment {
        type_condition: String,
        selection_set: FetchSelectionSet,
    },
}

impl FetchSelection {
    pub(crate) fn leaf(name: &str) -> Self {
        FetchSelection::Field {
            alias: None,
            name: name.to_string(),
            arguments: Vec::new(),
            selection_set: None,
        }
    }

    fn response_key(&self) -> Option<&str> {
        match self {
            FetchSelection::Field { alias, name, .. } => Some(alias.as_deref().unwrap_or(name)),
            FetchSelection::InlineFragment { .. } => None,
        }
    }

    /// Whether this selects the field `field_name` itself, without arguments.
    fn is_plain_field(&self, field_name: &str) -> bool {
        matches!(
            self,
            FetchSelection::Field { name, arguments, .. } if name == field_name && arguments.is_empty()
        )
    }
}

/// The alias a required field is fetched under when a client selection took its name.
fn reserved_alias(name: &str) -> String {
    format!("__gateway_{}", name.trim_start_matches('_'))
}

impl FetchSelectionSet {
    pub(crate) fn is_empty(&self) -> bool {
        self.selections.is_empty()
    }

    /// Adds `selection`, merging it into an existing field with the same response key or an
    /// existing fragment with the same type condition.
    pub(crate) fn add(&mut self, selection: FetchSelection) {
        let existing = self.selections.iter_mut().find(|existing| {
            match (&**existing, &selection) {
                (
                    FetchSelection::InlineFragment { type_condition, .. },
                    FetchSelection::InlineFragment {
                        type_condition: other,
                        ..
                    },
                ) => type_condition == other,
                (existing, selection) => {
                    existing.response_key().is_some()
                        && existing.response_key() == selection.response_key()
                }
            }
        });
        let Some(existing) = existing else {
            self.selections.push(selection);
            return;
        };
        match (existing, selection) {
            (
                FetchSelection::Field {
                    selection_set: Some(existing),
                    ..
                },
                FetchSelection::Field {
                    selection_set: Some(incoming),
                    ..
                },
            ) => existing.merge(incoming),
            (
                FetchSelection::InlineFragment {
                    selection_set: existing,
                    ..
                },
                FetchSelection::InlineFragment {
                    selection_set: incoming,
                    ..
                },
            ) => existing.merge(incoming),
            _ => {}
        }
    }

    pub(crate) fn add_typename(&mut self) {
        self.add(FetchSelection::leaf(TYPENAME_FIELD));
    }

    pub(crate) fn merge(&mut self, other: FetchSelectionSet) {
        for selection in other.selections {
            self.add(selection);
        }
    }

    /// Selects `__typename` and the key `fields` for building entity representations, and
    /// returns the selection reading them back from the fetched data.
    ///
    /// A required field whose response key is already taken by another field, or by the same
    /// field with arguments, is fetched under a reserved alias.
    pub(crate) fn add_required(&mut self, fields: &[KeyField]) -> Vec<Selection> {
        let mut required = vec![self.add_required_field(TYPENAME_FIELD, &[])];
        required.extend(self.add_key_fields(fields));
        required
    }

    fn add_key_fields(&mut self, fields: &[KeyField]) -> Vec<Selection> {
        fields
            .iter()
            .map(|field| self.add_required_field(&field.name, &field.selections))
            .collect()
    }

    fn add_required_field(&mut self, name: &str, nested: &[KeyField]) -> Selection {
        let alias = match self.field_mut(name) {
            Some(existing) if !existing.is_plain_field(name) => Some(reserved_alias(name)),
            _ => None,
        };
        let response_key = alias.as_deref().unwrap_or(name).to_string();
        if self.field_mut(&response_key).is_none() {
            self.selections.push(FetchSelection::Field {
                alias: alias.clone(),
                name: name.to_string(),
                arguments: Vec::new(),
                selection_set: (!nested.is_empty()).then(FetchSelectionSet::default),
            });
        }
        let selections = match self.field_mut(&response_key) {
            Some(FetchSelection::Field {
                selection_set: Some(selection_set),
                ..
            }) if !nested.is_empty() => Some(selection_set.add_key_fields(nested)),
            _ => None,
        };
        Selection::Field(Field {
            alias,
            name: name.to_string(),
            selections,
        })
    }

    fn field_mut(&mut self, response_key: &str) -> Option<&mut FetchSelection> {
        self.selections
            .iter_mut()
            .find(|selection| selection.response_key() == Some(response_key))
    }

    fn response_keys(&self) -> Vec<String> {
        self.selections
            .iter()
            .filter_map(|selection| selection.response_key().map(str::to_string))
            .collect()
    }
}

impl Display for FetchSelectionSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("{")?;
        for selection in &self.selections {
            f.write_str(" ")?;
            match selection {
                FetchSelection::Field {
                    alias,
                    name,
                    arguments,
                    selection_set,
                } => {
                    if let Some(alias) = alias {
                        write!(f, "{alias}: ")?;
                    }
                    f.write_str(name)?;
                    if !arguments.is_empty() {
                        write!(
                            f,
                            "({})",
                            arguments
                                .iter()
                                .map(|argument| format!(
                                    "{}: {}",
                                    argument.name,
                                    print_value(&argument.value)
                                ))
                                .join(", ")
                        )?;
                    }
                    if let Some(selection_set) = selection_set {
                        write!(f, " {selection_set}")?;
                    }
                }
                FetchSelection::InlineFragment {
                    type_condition,
                    selection_set,
                } => write!(f, "... on {type_condition} {selection_set}")?,
            }
        }
        f.write_str(" }")
    }
}

#[derive(Debug, Clone)]
pub(crate) struct FetchGroup {
    pub(crate) id: usize,
    pub(crate) subgraph: String,
    pub(crate) kind: OperationKind,
    /// The group this one was split from, for entity groups.
    pub(crate) parent: Option<usize>,
    pub(crate) entity_type: Option<String>,
    /// For entity groups, how representations are read from the parent's data.
    pub(crate) required: Vec<Selection>,
    pub(crate) merge_at: Vec<FetchDataPathElement>,
    pub(crate) selection_set: FetchSelectionSet,
    pub(crate) depends_on: BTreeSet<usize>,
    pub(crate) variable_usages: IndexSet<String>,
}

/// Fetch groups under construction, indexed by id.
#[derive(Debug, Default)]
pub(crate) struct FetchDependencyGraph {
    groups: Vec<FetchGroup>,
}

impl FetchDependencyGraph {
    pub(crate) fn group(&self, id: usize) -> &FetchGroup {
        &self.groups[id]
    }

    pub(crate) fn group_mut(&mut self, id: usize) -> &mut FetchGroup {
        &mut self.groups[id]
    }

    pub(crate) fn root_group(&self, subgraph: &str) -> Option<usize> {
        self.groups
            .iter()
            .find(|group| group.parent.is_none() && group.entity_type.is_none() && group.subgraph == subgraph)
            .map(|group| group.id)
    }

    pub(crate) fn new_root_group(
        &mut self,
        subgraph: &str,
        kind: OperationKind,
        after: Option<usize>,
    ) -> usize {
        let id = self.groups.len();
        self.groups.push(FetchGroup {
            id,
            subgraph: subgraph.to_string(),
            kind,
            parent: None,
            entity_type: None,
            required: Vec::new(),
            merge_at: Vec::new(),
            selection_set: FetchSelectionSet::default(),
            depends_on: after.into_iter().collect(),
            variable_usages: IndexSet::new(),
        });
        id
    }

    /// The group fetching `entity_type` entities from `subgraph` at `merge_at`, created on
    /// first use.
    pub(crate) fn entity_group(
        &mut self,
        parent: usize,
        subgraph: &str,
        entity_type: &str,
        merge_at: &[FetchDataPathElement],
        required: Vec<Selection>,
    ) -> usize {
        if let Some(existing) = self.groups.iter_mut().find(|group| {
            group.parent == Some(parent)
                && group.subgraph == subgraph
                && group.entity_type.as_deref() == Some(entity_type)
                && group.merge_at == merge_at
        }) {
            merge_required(&mut existing.required, required);
            return existing.id;
        }
        let id = self.groups.len();
        self.groups.push(FetchGroup {
            id,
            subgraph: subgraph.to_string(),
            kind: OperationKind::Query,
            parent: Some(parent),
            entity_type: Some(entity_type.to_string()),
            required,
            merge_at: merge_at.to_vec(),
            selection_set: FetchSelectionSet::default(),
            depends_on: BTreeSet::from([parent]),
            variable_usages: IndexSet::new(),
        });
        id
    }

    /// Checks the groups form a DAG and turns them into plan nodes.
    pub(crate) fn into_nodes(self, operation: &Operation) -> Result<Vec<FetchNode>, PlanningError> {
        let mut graph: StableDiGraph<usize, ()> = StableDiGraph::new();
        let indices: Vec<NodeIndex> = self
            .groups
            .iter()
            .map(|group| graph.add_node(group.id))
            .collect();
        for group in &self.groups {
            for dependency in &group.depends_on {
                graph.add_edge(indices[*dependency], indices[group.id], ());
            }
        }
        toposort(&graph, None).map_err(|cycle| PlanningError::Cycle(graph[cycle.node_id()]))?;

        Ok(self
            .groups
            .iter()
            .map(|group| to_fetch_node(group, operation))
            .collect())
    }
}

/// Adds `incoming` read-back fields to `into`, merging fields read under the same response key.
fn merge_required(into: &mut Vec<Selection>, incoming: Vec<Selection>) {
    for selection in incoming {
        let Selection::Field(field) = selection else {
            continue;
        };
        let response_key = field.alias.as_deref().unwrap_or(&field.name);
        let existing = into.iter_mut().find_map(|existing| match existing {
            Selection::Field(existing)
                if existing.alias.as_deref().unwrap_or(&existing.name) == response_key =>
            {
                Some(existing)
            }
            _ => None,
        });
        match existing {
            Some(existing) => {
                if let (Some(into), Some(incoming)) = (&mut existing.selections, field.selections) {
                    merge_required(into, incoming);
                }
            }
            None => into.push(Selection::Field(field)),
        }
    }
}

fn to_fetch_node(group: &FetchGroup, operation: &Operation) -> FetchNode {
    let variables = operation
        .variables
        .iter()
        .filter(|variable| group.variable_usages.contains(&variable.name))
        .collect_vec();
    let mut definitions = Vec::new();
    if group.entity_type.is_some() {
        definitions.push(format!("${REPRESENTATIONS_VARIABLE}: [{ANY_SCALAR_NAME}!]!"));
    }
    for variable in &variables {
        let mut definition = format!("${}: {}", variable.name, variable.ty);
        if let Some(default_value) = &variable.default_value {
            definition.push_str(" = ");
            definition.push_str(&print_value(default_value));
        }
        definitions.push(definition);
    }

    let operation_name = operation.name.as_ref().map(|name| {
        let subgraph: String = group
            .subgraph
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        format!("{name}__{subgraph}__{}", group.id)
    });

    let (selection_set, body, requires) = match &group.entity_type {
        Some(entity_type) => {
            let inner = format!("... on {entity_type} {}", group.selection_set);
            let body = format!(
                "{{ {ENTITIES_QUERY}({REPRESENTATIONS_VARIABLE}: ${REPRESENTATIONS_VARIABLE}) {{ {inner} }} }}"
            );
            let requires = vec![Selection::InlineFragment(InlineFragment {
                type_condition: Some(entity_type.clone()),
                selections: group.required.clone(),
            })];
            (format!("{{ {inner} }}"), body, requires)
        }
        None => {
            let printed = group.selection_set.to_string();
            (printed.clone(), printed, Vec::new())
        }
    };

    let mut text = String::new();
    let needs_header =
        group.kind != OperationKind::Query || operation_name.is_some() || !definitions.is_empty();
    if needs_header {
        text.push_str(&group.kind.to_string());
        if let Some(name) = &operation_name {
            text.push(' ');
            text.push_str(name);
        }
        if !definitions.is_empty() {
            text.push('(');
            text.push_str(&definitions.join(", "));
            text.push(')');
        }
        text.push(' ');
    }
    text.push_str(&body);

    FetchNode {
        id: group.id,
        service_name: group.subgraph.clone(),
        operation_kind: group.kind,
        operation: text,
        operation_name,
        variable_usages: variables
            .iter()
            .map(|variable| variable.name.clone())
            .collect(),
        requires,
        merge_at: group.merge_at.clone(),
        depends_on: group.depends_on.iter().copied().collect(),
        selection_set,
        response_keys: if group.entity_type.is_none() {
            group.selection_set.response_keys()
        } else {
            Vec::new()
        },
    }
}
