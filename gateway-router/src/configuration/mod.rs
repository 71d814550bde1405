//! Logic for loading configuration in to an object model
mod subgraph;

use std::num::NonZeroUsize;
use std::str::FromStr;
use std::time::Duration;

use displaydoc::Display;
use schemars::schema::RootSchema;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

pub use self::subgraph::SubgraphConfiguration;

/// Configuration error.
#[derive(Debug, Error, Display)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// could not parse configuration: {0}
    Parse(#[from] serde_yaml::Error),

    /// {message}: {error}
    InvalidConfiguration {
        message: &'static str,
        error: String,
    },
}

/// The configuration for the gateway.
///
/// Can be created through `serde::Deserialize` from various formats, or parsed from YAML with
/// [`FromStr`].
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct Configuration {
    /// Options applying to whole client operations.
    pub gateway: GatewayConfig,

    /// Options applying to the services of individual subgraphs.
    pub subgraphs: SubgraphConfiguration<SubgraphShaping>,
}

#[buildstructor::buildstructor]
impl Configuration {
    #[builder]
    pub fn new(
        gateway: Option<GatewayConfig>,
        subgraphs: Option<SubgraphConfiguration<SubgraphShaping>>,
    ) -> Self {
        Self {
            gateway: gateway.unwrap_or_default(),
            subgraphs: subgraphs.unwrap_or_default(),
        }
    }

    /// Rejects values that parse but cannot be honoured.
    pub fn validate(self) -> Result<Self, ConfigurationError> {
        if self.gateway.query_timeout.is_zero() {
            return Err(ConfigurationError::InvalidConfiguration {
                message: "invalid gateway configuration",
                error: "query_timeout must be greater than zero".to_string(),
            });
        }
        let per_subgraph = std::iter::once(("all", &self.subgraphs.all)).chain(
            self.subgraphs
                .subgraphs
                .iter()
                .map(|(name, shaping)| (name.as_str(), shaping)),
        );
        for (name, shaping) in per_subgraph {
            if shaping.timeout.is_zero() {
                return Err(ConfigurationError::InvalidConfiguration {
                    message: "invalid subgraph configuration",
                    error: format!("timeout of '{name}' must be greater than zero"),
                });
            }
        }
        Ok(self)
    }

    /// The JSON schema of the configuration file.
    pub fn json_schema() -> RootSchema {
        schemars::schema_for!(Configuration)
    }
}

/// Parse configuration from a string in YAML syntax
impl FromStr for Configuration {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let configuration: Configuration = serde_yaml::from_str(s)?;
        configuration.validate()
    }
}

/// Options applying to whole client operations.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct GatewayConfig {
    /// Time budget of one client operation, every fetch included. Defaults to 60s.
    #[serde(with = "humantime_serde")]
    #[schemars(with = "String")]
    pub query_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            query_timeout: default_query_timeout(),
        }
    }
}

/// Traffic shaping options of one subgraph service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct SubgraphShaping {
    /// Timeout of a single fetch. Defaults to 30s.
    #[serde(with = "humantime_serde")]
    #[schemars(with = "String")]
    pub timeout: Duration,

    /// Fetches dispatched to the subgraph at once. Defaults to 64.
    #[schemars(with = "usize")]
    pub max_in_flight: NonZeroUsize,
}

impl Default for SubgraphShaping {
    fn default() -> Self {
        Self {
            timeout: default_subgraph_timeout(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

fn default_query_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_subgraph_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_in_flight() -> NonZeroUsize {
    NonZeroUsize::new(64).unwrap_or(NonZeroUsize::MIN)
}
