use std::collections::HashMap;
use std::fmt;

use schemars::JsonSchema;
use serde::de;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;
use serde_yaml::Mapping;

/// Options set once for every subgraph and overridden per subgraph.
///
/// Per subgraph values are layered over `all`: a subgraph entry only needs the keys it changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, JsonSchema)]
pub struct SubgraphConfiguration<T>
where
    T: fmt::Debug + Default + Clone + Serialize + JsonSchema,
{
    /// options applying to all subgraphs
    #[serde(default)]
    pub all: T,
    /// per subgraph options
    #[serde(default)]
    pub subgraphs: HashMap<String, T>,
}

impl<T> SubgraphConfiguration<T>
where
    T: fmt::Debug + Default + Clone + Serialize + JsonSchema,
{
    /// The options for `subgraph_name`.
    pub fn get(&self, subgraph_name: &str) -> &T {
        self.subgraphs.get(subgraph_name).unwrap_or(&self.all)
    }
}

/// The options as written, before subgraph entries are layered over `all`.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Layers {
    #[serde(default)]
    all: Mapping,
    #[serde(default)]
    subgraphs: HashMap<String, Mapping>,
}

impl<'de, T> Deserialize<'de> for SubgraphConfiguration<T>
where
    T: DeserializeOwned,
    T: fmt::Debug + Default + Clone + Serialize + JsonSchema,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let Layers { all, subgraphs } = Layers::deserialize(deserializer)?;
        let subgraphs = subgraphs
            .into_iter()
            .map(|(subgraph_name, overrides)| {
                let mut layered = all.clone();
                layered.extend(overrides);
                Ok((subgraph_name, from_mapping(layered)?))
            })
            .collect::<Result<_, D::Error>>()?;
        Ok(SubgraphConfiguration {
            all: from_mapping(all)?,
            subgraphs,
        })
    }
}

fn from_mapping<T: DeserializeOwned, E: de::Error>(mapping: Mapping) -> Result<T, E> {
    serde_yaml::from_value(serde_yaml::Value::Mapping(mapping)).map_err(E::custom)
}
