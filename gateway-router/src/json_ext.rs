//! Performance oriented JSON manipulation.

use std::cmp::min;
use std::fmt;

use serde::de;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map;
pub use serde_json_bytes::Value;

/// A JSON object.
pub type Object = Map<ByteString, Value>;

macro_rules! extract_key_value_from_object {
    ($object:expr, $key:literal, $pattern:pat => $var:ident) => {{
        match $object.remove($key) {
            Some($pattern) => Ok(Some($var)),
            None | Some(crate::json_ext::Value::Null) => Ok(None),
            _ => Err(concat!("invalid type for key: ", $key)),
        }
    }};
    ($object:expr, $key:literal) => {{
        match $object.remove($key) {
            None | Some(crate::json_ext::Value::Null) => None,
            Some(value) => Some(value),
        }
    }};
}

macro_rules! ensure_object {
    ($value:expr) => {{
        match $value {
            crate::json_ext::Value::Object(o) => Ok(o),
            _ => Err("invalid type, expected an object"),
        }
    }};
}

/// Extension trait for [`serde_json_bytes::Value`].
pub trait ValueExt {
    /// Deep merge the JSON objects, array and override the values in `&mut self` if they already
    /// exists. A `null` in `other` never replaces existing data.
    fn deep_merge(&mut self, other: Self);

    /// Create a `Value` by inserting a value at a subpath.
    fn from_path(path: &Path, value: Value) -> Value;

    /// Insert a `value` at a `Path`, replacing what was there.
    fn insert(&mut self, path: &Path, value: Value);

    /// Get a reference to the value at a concrete `Path`.
    fn get_path<'a>(&'a self, path: &Path) -> Option<&'a Value>;

    /// Select all values matching a `Path`, with their concrete paths. Flatten elements match
    /// every element of a list.
    fn select_values_and_paths<'a, F>(&'a self, path: &Path, f: F)
    where
        F: FnMut(&Path, &'a Value);
}

impl ValueExt for Value {
    fn deep_merge(&mut self, other: Self) {
        match (self, other) {
            (Value::Object(a), Value::Object(b)) => {
                for (key, value) in b.into_iter() {
                    match a.get_mut(&key) {
                        Some(existing) => existing.deep_merge(value),
                        None => {
                            a.insert(key, value);
                        }
                    }
                }
            }
            (Value::Array(a), Value::Array(b)) => {
                for (index, value) in b.into_iter().enumerate() {
                    match a.get_mut(index) {
                        Some(existing) => existing.deep_merge(value),
                        None => a.push(value),
                    }
                }
            }
            (_, Value::Null) => {}
            (a, b) => {
                *a = b;
            }
        }
    }

    fn from_path(path: &Path, value: Value) -> Value {
        let mut res_value = Value::Null;
        res_value.insert(path, value);
        res_value
    }

    fn insert(&mut self, path: &Path, value: Value) {
        let mut current = self;
        for element in path.iter() {
            current = match element {
                PathElement::Index(index) => {
                    if !current.is_array() {
                        *current = Value::Array(Vec::new());
                    }
                    let Value::Array(array) = current else {
                        return;
                    };
                    if array.len() <= *index {
                        array.resize(index + 1, Value::Null);
                    }
                    &mut array[*index]
                }
                PathElement::Key(key) => {
                    if !current.is_object() {
                        *current = Value::Object(Object::new());
                    }
                    let Value::Object(object) = current else {
                        return;
                    };
                    object
                        .entry(key.as_str())
                        .or_insert(Value::Null)
                }
                // only concrete paths can be written to
                PathElement::Flatten => return,
            };
        }
        *current = value;
    }

    fn get_path<'a>(&'a self, path: &Path) -> Option<&'a Value> {
        let mut current = self;
        for element in path.iter() {
            current = match element {
                PathElement::Index(index) => current.as_array()?.get(*index)?,
                PathElement::Key(key) => current.as_object()?.get(key.as_str())?,
                PathElement::Flatten => return None,
            };
        }
        Some(current)
    }

    fn select_values_and_paths<'a, F>(&'a self, path: &Path, mut f: F)
    where
        F: FnMut(&Path, &'a Value),
    {
        iterate_path(&mut Path::default(), &path.0, self, &mut f);
    }
}

fn iterate_path<'a, F>(parent: &mut Path, path: &[PathElement], data: &'a Value, f: &mut F)
where
    F: FnMut(&Path, &'a Value),
{
    match path.first() {
        None => f(parent, data),
        Some(PathElement::Flatten) => {
            if let Some(array) = data.as_array() {
                for (index, value) in array.iter().enumerate() {
                    parent.push(PathElement::Index(index));
                    iterate_path(parent, &path[1..], value, f);
                    parent.pop();
                }
            }
        }
        Some(PathElement::Index(index)) => {
            if let Some(value) = data.as_array().and_then(|array| array.get(*index)) {
                parent.push(PathElement::Index(*index));
                iterate_path(parent, &path[1..], value, f);
                parent.pop();
            }
        }
        Some(PathElement::Key(key)) => {
            if let Some(value) = data.as_object().and_then(|object| object.get(key.as_str())) {
                parent.push(PathElement::Key(key.clone()));
                iterate_path(parent, &path[1..], value, f);
                parent.pop();
            }
        }
    }
}

/// A GraphQL path element that is composes of strings or numbers.
/// e.g `/book/3/name`
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum PathElement {
    /// A path element that given an array will flatmap the content.
    Flatten,

    /// An index path element.
    Index(usize),

    /// A key path element.
    Key(String),
}

impl Serialize for PathElement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PathElement::Flatten => serializer.serialize_str("@"),
            PathElement::Index(index) => serializer.serialize_u64(*index as u64),
            PathElement::Key(key) => serializer.serialize_str(key),
        }
    }
}

impl<'de> Deserialize<'de> for PathElement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(PathElementVisitor)
    }
}

struct PathElementVisitor;

impl de::Visitor<'_> for PathElementVisitor {
    type Value = PathElement;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a string or an unsigned integer")
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
        usize::try_from(value)
            .map(PathElement::Index)
            .map_err(|_| E::custom("path index is too large"))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
        usize::try_from(value)
            .map(PathElement::Index)
            .map_err(|_| E::custom("path index must not be negative"))
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
        Ok(match value {
            "@" => PathElement::Flatten,
            key => PathElement::Key(key.to_string()),
        })
    }
}

/// A path into the result document.
///
/// This can be composed of strings and numbers
#[derive(Clone, Debug, Eq, PartialEq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(pub Vec<PathElement>);

impl Path {
    pub fn from_slice<T: AsRef<str>>(s: &[T]) -> Self {
        Self(
            s.iter()
                .map(|x| x.as_ref())
                .map(|s| {
                    if let Ok(index) = s.parse::<usize>() {
                        PathElement::Index(index)
                    } else if s == "@" {
                        PathElement::Flatten
                    } else {
                        PathElement::Key(s.to_string())
                    }
                })
                .collect(),
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathElement> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn empty() -> Path {
        Path(Default::default())
    }

    pub fn parent(&self) -> Option<Path> {
        if self.is_empty() {
            None
        } else {
            Some(Path(self.0[..self.len() - 1].to_vec()))
        }
    }

    pub fn join(&self, other: impl AsRef<Self>) -> Self {
        let other = other.as_ref();
        let mut new = Vec::with_capacity(self.len() + other.len());
        new.extend(self.iter().cloned());
        new.extend(other.iter().cloned());
        Path(new)
    }

    pub fn push(&mut self, element: PathElement) {
        self.0.push(element)
    }

    pub fn pop(&mut self) -> Option<PathElement> {
        self.0.pop()
    }

    /// Whether every element of `self` matches the start of `other`, flatten markers matching
    /// any index.
    pub fn is_prefix_of(&self, other: &Path) -> bool {
        self.len() <= other.len()
            && self
                .iter()
                .zip(other.iter())
                .all(|(left, right)| match (left, right) {
                    (PathElement::Flatten, PathElement::Index(_))
                    | (PathElement::Index(_), PathElement::Flatten) => true,
                    (left, right) => left == right,
                })
    }

    /// The first `len` elements of the path.
    pub fn prefix(&self, len: usize) -> Path {
        Path(self.0[..min(len, self.len())].to_vec())
    }
}

impl AsRef<Path> for Path {
    fn as_ref(&self) -> &Path {
        self
    }
}

impl<T> From<T> for Path
where
    T: AsRef<str>,
{
    fn from(s: T) -> Self {
        Self(
            s.as_ref()
                .split('/')
                .filter(|s| !s.is_empty())
                .map(|s| {
                    if let Ok(index) = s.parse::<usize>() {
                        PathElement::Index(index)
                    } else if s == "@" {
                        PathElement::Flatten
                    } else {
                        PathElement::Key(s.to_string())
                    }
                })
                .collect(),
        )
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for element in self.iter() {
            write!(f, "/")?;
            match element {
                PathElement::Index(index) => write!(f, "{index}")?,
                PathElement::Key(key) => write!(f, "{key}")?,
                PathElement::Flatten => write!(f, "@")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    fn select_values<'a>(path: &'a Path, data: &'a Value) -> Vec<(String, &'a Value)> {
        let mut result = Vec::new();
        data.select_values_and_paths(path, |path, value| {
            result.push((path.to_string(), value));
        });
        result
    }

    #[test]
    fn test_get_at_path() {
        let json = json!({"obj":{"arr":[{"prop1":1},{"prop1":2}]}});
        let path = Path::from("obj/arr/1/prop1");
        assert_eq!(json.get_path(&path), Some(&json!(2)));
        assert_eq!(json.get_path(&Path::from("obj/missing")), None);
        assert_eq!(json.get_path(&Path::from("obj/arr/@/prop1")), None);
    }

    #[test]
    fn test_select_values_and_paths_with_flatten() {
        let json = json!({"obj":{"arr":[{"prop1":1},{"prop2":2},{"prop1":3}]}});
        let path = Path::from("obj/arr/@/prop1");
        assert_eq!(
            select_values(&path, &json),
            vec![
                ("/obj/arr/0/prop1".to_string(), &json!(1)),
                ("/obj/arr/2/prop1".to_string(), &json!(3)),
            ]
        );
    }

    #[test]
    fn test_select_values_through_nested_lists() {
        let json = json!({"a":[[{"b":1}],[{"b":2},{"b":3}]]});
        let path = Path::from("a/@/@/b");
        assert_eq!(
            select_values(&path, &json)
                .into_iter()
                .map(|(path, _)| path)
                .collect::<Vec<_>>(),
            vec!["/a/0/0/b", "/a/1/0/b", "/a/1/1/b"]
        );
    }

    #[test]
    fn test_deep_merge_objects_and_arrays() {
        let mut json = json!({"obj":{"arr":[{"prop1":1},{"prop2":2}]}});
        json.deep_merge(json!({"obj":{"arr":[{"prop1":2,"prop3":3},{"prop4":4},{"prop5":5}]}}));
        assert_eq!(
            json,
            json!({"obj":{"arr":[{"prop1":2, "prop3":3},{"prop2":2, "prop4":4},{"prop5":5}]}})
        );
    }

    #[test]
    fn test_deep_merge_null_never_overwrites() {
        let mut json = json!({"a": {"b": 1}, "c": [1, 2]});
        json.deep_merge(json!({"a": null, "c": [null, 3]}));
        assert_eq!(json, json!({"a": {"b": 1}, "c": [1, 3]}));

        let mut json = Value::Null;
        json.deep_merge(json!({"a": 1}));
        assert_eq!(json, json!({"a": 1}));
    }

    #[test]
    fn test_from_path() {
        let json = json!([{"prop1":1},{"prop1":2}]);
        let path = Path::from("obj/arr");
        assert_eq!(
            Value::from_path(&path, json),
            json!({"obj":{"arr":[{"prop1":1},{"prop1":2}]}})
        );
        assert_eq!(
            Value::from_path(&Path::from("a/2/b"), json!(true)),
            json!({"a": [null, null, {"b": true}]})
        );
    }

    #[test]
    fn test_insert_replaces_existing_value() {
        let mut json = json!({"a": [{"b": 1}, {"b": 2}]});
        json.insert(&Path::from("a/1"), json!({"c": 3}));
        assert_eq!(json, json!({"a": [{"b": 1}, {"c": 3}]}));
    }

    #[test]
    fn path_serde_json() {
        let path: Path = serde_json::from_str(
            r#"[
          "k",
          "@",
          1
        ]"#,
        )
        .unwrap();
        assert_eq!(
            path.0,
            vec![
                PathElement::Key("k".to_string()),
                PathElement::Flatten,
                PathElement::Index(1),
            ]
        );
        assert_eq!(serde_json::to_string(&path).unwrap(), r#"["k","@",1]"#);
        assert_eq!(path.to_string(), "/k/@/1");
    }

    #[test]
    fn path_prefix_matching() {
        let pattern = Path::from("reviews/@/author");
        assert!(pattern.is_prefix_of(&Path::from("reviews/3/author/name")));
        assert!(!pattern.is_prefix_of(&Path::from("reviews/3")));
        assert!(!pattern.is_prefix_of(&Path::from("products/0/author")));
        assert_eq!(Path::from("a/b/c").prefix(2), Path::from("a/b"));
        assert_eq!(Path::from("a/b").parent(), Some(Path::from("a")));
    }

    #[test]
    fn paths_order_by_element() {
        let mut paths = vec![
            Path::from("b"),
            Path::from("a/1"),
            Path::empty(),
            Path::from("a/0/name"),
        ];
        paths.sort();
        assert_eq!(
            paths,
            vec![
                Path::empty(),
                Path::from("a/0/name"),
                Path::from("a/1"),
                Path::from("b"),
            ]
        );
    }
}
