use super::{ConfigError, StratumConfig};

/// Metadata about a single configuration property, used to render
/// human-readable validation errors (see `validation::validate_section`).
#[derive(Debug, Clone)]
pub struct PropertyMeta {
    /// Relative key (e.g., `"pool_size"`).
    pub key: String,
    /// Absolute key (e.g., `"database.pool_size"`).
    pub full_key: String,
    /// Rust type name (e.g., `"i64"`).
    pub type_name: &'static str,
    /// Whether the property is required (no default and not `Option`).
    pub required: bool,
    /// Whether this entry documents a nested section rather than a leaf key.
    pub is_section: bool,
    /// Default value as a string, if any.
    pub default_value: Option<String>,
    /// Explicit environment variable name, if it doesn't follow the
    /// `FULL_KEY.to_uppercase().replace('.', "_")` convention.
    pub env_var: Option<String>,
    /// Human-readable description.
    pub description: Option<String>,
}

/// Trait for a strongly-typed configuration section (`database`, `stores`,
/// `audit`, `synchro`, `security`, `cache` — see `StratumConfig`'s module
/// docs). Each section is implemented by hand against `StratumConfig`'s raw
/// `get`/`get_or` accessors; there is no `#[derive(ConfigProperties)]` here.
pub trait ConfigProperties: Sized {
    /// The configuration key prefix (e.g., `"database"`).
    fn prefix() -> &'static str;

    /// Metadata about all expected properties, for validation diagnostics.
    fn properties_metadata() -> Vec<PropertyMeta>;

    /// Construct from a `StratumConfig` instance.
    fn from_config(config: &StratumConfig) -> Result<Self, ConfigError>;
}
