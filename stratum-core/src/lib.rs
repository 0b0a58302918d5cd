pub mod config;
pub mod error;
pub mod http;
pub mod params;

pub use config::{
    ConfigError, ConfigProperties, ConfigValidationError, ConfigValue, DefaultSecretResolver,
    FromConfigValue, MissingKeyError, PropertyMeta, RegisteredSection, SecretResolver,
    StratumConfig, register_section, registered_sections, validate_keys, validate_section,
};
pub use error::{AppError, ErrorKind};
