use stratum_core::{ConfigError, ConfigProperties, PropertyMeta, StratumConfig};

use crate::filter::AuditFilter;
use crate::sinks::SyslogSink;

/// The `audit.*` configuration section: filter tokens plus which sinks are
/// active and the syslog line template.
#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub syslog_enabled: bool,
    pub storage_enabled: bool,
    pub syslog_template: String,
}

impl AuditConfig {
    pub fn filter(&self) -> AuditFilter {
        AuditFilter::new(self.include.clone(), self.exclude.clone())
    }

    pub fn syslog_sink(&self) -> SyslogSink {
        SyslogSink::new(self.syslog_template.clone())
    }
}

impl ConfigProperties for AuditConfig {
    fn prefix() -> &'static str {
        "audit"
    }

    fn properties_metadata() -> Vec<PropertyMeta> {
        vec![
            PropertyMeta {
                key: "include".to_string(),
                full_key: "audit.include".to_string(),
                type_name: "Vec<String>",
                required: false,
                is_section: false,
                default_value: Some("[\"all\"]".to_string()),
                env_var: None,
                description: Some("methods to audit, supports \"all\" and \"<class>.all\"".to_string()),
            },
            PropertyMeta {
                key: "exclude".to_string(),
                full_key: "audit.exclude".to_string(),
                type_name: "Vec<String>",
                required: false,
                is_section: false,
                default_value: Some("[]".to_string()),
                env_var: None,
                description: Some("methods exempted from the include set".to_string()),
            },
            PropertyMeta {
                key: "syslog_enabled".to_string(),
                full_key: "audit.syslog_enabled".to_string(),
                type_name: "bool",
                required: false,
                is_section: false,
                default_value: Some("true".to_string()),
                env_var: None,
                description: None,
            },
            PropertyMeta {
                key: "storage_enabled".to_string(),
                full_key: "audit.storage_enabled".to_string(),
                type_name: "bool",
                required: false,
                is_section: false,
                default_value: Some("true".to_string()),
                env_var: None,
                description: None,
            },
            PropertyMeta {
                key: "syslog_template".to_string(),
                full_key: "audit.syslog_template".to_string(),
                type_name: "String",
                required: false,
                is_section: false,
                default_value: Some("\"{userid} {content.action}: {content.message}\"".to_string()),
                env_var: None,
                description: None,
            },
        ]
    }

    fn from_config(config: &StratumConfig) -> Result<Self, ConfigError> {
        Ok(AuditConfig {
            include: config.get_or("audit.include", vec!["all".to_string()]),
            exclude: config.get_or("audit.exclude", Vec::new()),
            syslog_enabled: config.get_or("audit.syslog_enabled", true),
            storage_enabled: config.get_or("audit.storage_enabled", true),
            syslog_template: config.get_or(
                "audit.syslog_template",
                "{userid} {content.action}: {content.message}".to_string(),
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_core::ConfigValue;

    #[test]
    fn defaults_apply_when_section_absent() {
        let config = StratumConfig::empty();
        let audit = AuditConfig::from_config(&config).unwrap();
        assert_eq!(audit.include, vec!["all".to_string()]);
        assert!(audit.exclude.is_empty());
        assert!(audit.syslog_enabled);
        assert!(audit.storage_enabled);
    }

    #[test]
    fn explicit_filter_lists_are_read_from_config() {
        let mut config = StratumConfig::empty();
        config.set(
            "audit.include",
            ConfigValue::List(vec![ConfigValue::String("events.all".into())]),
        );
        config.set(
            "audit.exclude",
            ConfigValue::List(vec![ConfigValue::String("events.get".into())]),
        );
        let audit = AuditConfig::from_config(&config).unwrap();
        let filter = audit.filter();
        assert!(!filter.allows("events.get"));
        assert!(filter.allows("events.create"));
    }
}
