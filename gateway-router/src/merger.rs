//! Assembles the fragments returned by fetch steps into one response tree.

use serde::Serialize;

use crate::graphql::Error;
use crate::json_ext::Path;
use crate::json_ext::Value;
use crate::json_ext::ValueExt;

/// The data one fetch step produced for one location of the response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ResultFragment {
    /// Id of the step that produced the fragment.
    pub step: usize,

    /// Where `value` belongs in the response. Concrete: list positions are indexes.
    pub path: Path,

    pub value: Value,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<Error>,
}

impl ResultFragment {
    pub fn new(step: usize, path: Path, value: Value) -> Self {
        Self {
            step,
            path,
            value,
            errors: Vec::new(),
        }
    }

    /// A fragment only carrying errors.
    pub fn errors(step: usize, errors: Vec<Error>) -> Self {
        Self {
            step,
            path: Path::empty(),
            value: Value::Null,
            errors,
        }
    }
}

/// The merged data of every fragment, and their errors.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ResultTree {
    pub data: Value,
    pub errors: Vec<Error>,
}

/// Merges fragments into one tree.
///
/// Fragments are applied ordered by step, then by path, so the result does not depend on the
/// order fetches completed in. Objects merge key-wise, `null` never overwrites a value, and on
/// any other conflict the fragment applied last wins.
pub fn merge(mut fragments: Vec<ResultFragment>) -> ResultTree {
    fragments.sort_by(|a, b| a.step.cmp(&b.step).then_with(|| a.path.cmp(&b.path)));

    let mut tree = ResultTree::default();
    for fragment in fragments {
        tree.data
            .deep_merge(Value::from_path(&fragment.path, fragment.value));
        tree.errors.extend(fragment.errors);
    }
    tree
}
