//! Names defined by the federation subgraph specification.

pub const KEY_DIRECTIVE_NAME: &str = "key";
pub const EXTERNAL_DIRECTIVE_NAME: &str = "external";
pub const SHAREABLE_DIRECTIVE_NAME: &str = "shareable";
pub const EXTENDS_DIRECTIVE_NAME: &str = "extends";
pub const REQUIRES_DIRECTIVE_NAME: &str = "requires";
pub const PROVIDES_DIRECTIVE_NAME: &str = "provides";
pub const OVERRIDE_DIRECTIVE_NAME: &str = "override";

pub const FIELDS_ARGUMENT_NAME: &str = "fields";
pub const RESOLVABLE_ARGUMENT_NAME: &str = "resolvable";

pub const ENTITIES_QUERY: &str = "_entities";
pub const SERVICE_QUERY: &str = "_service";
pub const REPRESENTATIONS_VARIABLE: &str = "representations";
pub const ANY_SCALAR_NAME: &str = "_Any";
pub const TYPENAME_FIELD: &str = "__typename";

/// Prefix used when a subgraph imports federation directives under a namespace.
pub const FEDERATION_NAMESPACE: &str = "federation__";

const FEDERATION_TYPES: [&str; 6] = [
    "_Any",
    "_Entity",
    "_Service",
    "_FieldSet",
    "FieldSet",
    "federation__FieldSet",
];

const PLUMBING_PREFIXES: [&str; 3] = ["link__", "federation__", "join__"];

pub(crate) const BUILT_IN_SCALARS: [&str; 5] = ["Int", "Float", "String", "Boolean", "ID"];

/// Strips the federation namespace from a directive name.
pub(crate) fn directive_name(name: &str) -> &str {
    name.strip_prefix(FEDERATION_NAMESPACE).unwrap_or(name)
}

/// Types every subgraph carries for the federation protocol, never part of the composed API.
pub(crate) fn is_federation_type(name: &str) -> bool {
    FEDERATION_TYPES.contains(&name)
        || PLUMBING_PREFIXES
            .iter()
            .any(|prefix| name.starts_with(prefix))
}

pub(crate) fn is_federation_root_field(name: &str) -> bool {
    name == ENTITIES_QUERY || name == SERVICE_QUERY
}

pub(crate) fn is_built_in_scalar(name: &str) -> bool {
    BUILT_IN_SCALARS.contains(&name)
}
