use std::fmt::Display;
use std::fmt::Formatter;
use std::sync::Arc;

use itertools::Itertools;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;

use crate::operation::Operation;
use crate::operation::OperationKind;

pub(crate) mod fetch_dependency_graph;
pub mod query_planner;

/// A DAG of subgraph fetches answering one client operation.
///
/// Nodes are stored in topological order and a node's `id` is its index.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPlan {
    pub kind: OperationKind,
    pub nodes: Vec<FetchNode>,
    #[serde(skip)]
    operation: Arc<Operation>,
}

/// One request to one subgraph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchNode {
    pub id: usize,
    pub service_name: String,
    pub operation_kind: OperationKind,
    /// The GraphQL document sent to the subgraph.
    pub operation: String,
    pub operation_name: Option<String>,
    /// Client variables the subgraph operation references.
    pub variable_usages: Vec<String>,
    /// Selection applied to the data at `merge_at` to build entity representations.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub requires: Vec<Selection>,
    /// Where the fetched data belongs in the response. Empty for root fetches.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub merge_at: Vec<FetchDataPathElement>,
    pub depends_on: Vec<usize>,
    /// The selection sent to the subgraph, printed on one line.
    pub selection_set: String,
    /// Top-level response keys selected by a root fetch.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub response_keys: Vec<String>,
}

impl FetchNode {
    pub fn is_entity_fetch(&self) -> bool {
        !self.requires.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FetchDataPathElement {
    Key(String),
    AnyIndex,
}

impl Serialize for FetchDataPathElement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FetchDataPathElement::Key(key) => serializer.serialize_str(key),
            FetchDataPathElement::AnyIndex => serializer.serialize_str("@"),
        }
    }
}

impl<'de> Deserialize<'de> for FetchDataPathElement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let element = String::deserialize(deserializer)?;
        Ok(if element == "@" {
            FetchDataPathElement::AnyIndex
        } else {
            FetchDataPathElement::Key(element)
        })
    }
}

impl Display for FetchDataPathElement {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchDataPathElement::Key(key) => f.write_str(key),
            FetchDataPathElement::AnyIndex => f.write_str("@"),
        }
    }
}

/// A selection over already fetched data, used to build entity representations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", tag = "kind")]
pub enum Selection {
    Field(Field),
    InlineFragment(InlineFragment),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub alias: Option<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub selections: Option<Vec<Selection>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineFragment {
    pub type_condition: Option<String>,
    pub selections: Vec<Selection>,
}

pub(crate) struct SelectionsDisplay<'a>(pub(crate) &'a [Selection]);

impl Display for SelectionsDisplay<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("{")?;
        for selection in self.0 {
            f.write_str(" ")?;
            match selection {
                Selection::Field(field) => {
                    if let Some(alias) = &field.alias {
                        write!(f, "{alias}: ")?;
                    }
                    f.write_str(&field.name)?;
                    if let Some(selections) = &field.selections {
                        write!(f, " {}", SelectionsDisplay(selections))?;
                    }
                }
                Selection::InlineFragment(fragment) => {
                    f.write_str("...")?;
                    if let Some(type_condition) = &fragment.type_condition {
                        write!(f, " on {type_condition}")?;
                    }
                    write!(f, " {}", SelectionsDisplay(&fragment.selections))?;
                }
            }
        }
        f.write_str(" }")
    }
}

impl QueryPlan {
    pub(crate) fn new(kind: OperationKind, nodes: Vec<FetchNode>, operation: Operation) -> Self {
        QueryPlan {
            kind,
            nodes,
            operation: Arc::new(operation),
        }
    }

    /// The normalized client operation this plan answers.
    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub fn nodes(&self) -> &[FetchNode] {
        &self.nodes
    }

    pub fn node(&self, id: usize) -> Option<&FetchNode> {
        self.nodes.get(id)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Steps that list `id` as a dependency.
    pub fn dependents(&self, id: usize) -> Vec<usize> {
        self.nodes
            .iter()
            .filter(|node| node.depends_on.contains(&id))
            .map(|node| node.id)
            .collect()
    }

    /// Steps grouped by depth: every step in a stage only depends on earlier stages.
    pub fn stages(&self) -> Vec<Vec<usize>> {
        let mut depths = vec![0usize; self.nodes.len()];
        for node in &self.nodes {
            depths[node.id] = node
                .depends_on
                .iter()
                .map(|dependency| depths[*dependency] + 1)
                .max()
                .unwrap_or(0);
        }
        let mut stages: Vec<Vec<usize>> = Vec::new();
        for (id, depth) in depths.into_iter().enumerate() {
            if stages.len() <= depth {
                stages.resize_with(depth + 1, Vec::new);
            }
            stages[depth].push(id);
        }
        stages
    }

    /// Subgraphs fetched from, in order of first use.
    pub fn service_usage(&self) -> impl Iterator<Item = &str> {
        self.nodes
            .iter()
            .map(|node| node.service_name.as_str())
            .unique()
    }
}

impl Display for QueryPlan {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "QueryPlan {{")?;
        let stages = self.stages();
        if stages.len() > 1 {
            writeln!(f, "  Sequence {{")?;
            for stage in &stages {
                self.write_stage(f, stage, 2)?;
            }
            writeln!(f, "  }},")?;
        } else if let Some(stage) = stages.first() {
            self.write_stage(f, stage, 1)?;
        }
        write!(f, "}}")
    }
}

impl QueryPlan {
    fn write_stage(&self, f: &mut Formatter<'_>, stage: &[usize], level: usize) -> std::fmt::Result {
        if let [id] = stage {
            return self.write_node(f, &self.nodes[*id], level);
        }
        writeln!(f, "{}Parallel {{", indent(level))?;
        for id in stage {
            self.write_node(f, &self.nodes[*id], level + 1)?;
        }
        writeln!(f, "{}}},", indent(level))
    }

    fn write_node(&self, f: &mut Formatter<'_>, node: &FetchNode, level: usize) -> std::fmt::Result {
        if node.merge_at.is_empty() {
            return write_fetch(f, node, level);
        }
        writeln!(
            f,
            "{}Flatten(path: \"{}\") {{",
            indent(level),
            node.merge_at.iter().join(".")
        )?;
        write_fetch(f, node, level + 1)?;
        writeln!(f, "{}}},", indent(level))
    }
}

fn write_fetch(f: &mut Formatter<'_>, node: &FetchNode, level: usize) -> std::fmt::Result {
    writeln!(
        f,
        "{}Fetch(service: \"{}\") {{",
        indent(level),
        node.service_name
    )?;
    if !node.requires.is_empty() {
        writeln!(
            f,
            "{}{} =>",
            indent(level + 1),
            SelectionsDisplay(&node.requires)
        )?;
    }
    writeln!(f, "{}{}", indent(level + 1), node.selection_set)?;
    writeln!(f, "{}}},", indent(level))
}

fn indent(level: usize) -> String {
    "  ".repeat(level)
}
