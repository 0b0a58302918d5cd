//! [`AuditRecord`]: the content of a single audit line, shared verbatim by
//! both sinks.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use stratum_context::Source;

pub const VALID_EVENT_TYPE: &str = "audit-log/pryv-api";
pub const ERROR_EVENT_TYPE: &str = "audit-log/pryv-api-error";

/// The created/modified resource's integrity digest and cache key, so an
/// external log reader can cryptographically match a write to its line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordRef {
    pub integrity: String,
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub action: String,
    pub query: Value,
    pub source: Source,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<RecordRef>,
    /// `accessId` to file the record under `:_audit:access-<id>`; absent
    /// only for calls that never resolved an access (e.g. a rejected
    /// `auth.login`).
    #[serde(skip)]
    pub access_id: Option<String>,
}

impl AuditRecord {
    pub fn success(action: impl Into<String>, query: Value, source: Source) -> Self {
        AuditRecord {
            action: action.into(),
            query,
            source,
            id: None,
            message: None,
            record: None,
            access_id: None,
        }
    }

    pub fn error(
        action: impl Into<String>,
        query: Value,
        source: Source,
        error_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        AuditRecord {
            action: action.into(),
            query,
            source,
            id: Some(error_id.into()),
            message: Some(message.into()),
            record: None,
            access_id: None,
        }
    }

    pub fn with_access_id(mut self, access_id: impl Into<String>) -> Self {
        self.access_id = Some(access_id.into());
        self
    }

    pub fn with_record_ref(mut self, integrity: impl Into<String>, key: impl Into<String>) -> Self {
        self.record = Some(RecordRef {
            integrity: integrity.into(),
            key: key.into(),
        });
        self
    }

    pub fn is_error(&self) -> bool {
        self.id.is_some()
    }

    pub fn event_type(&self) -> &'static str {
        if self.is_error() {
            ERROR_EVENT_TYPE
        } else {
            VALID_EVENT_TYPE
        }
    }

    /// `content.xxx` value at `dotted_path`, or `None` if any segment is
    /// absent — used by the syslog template renderer.
    pub fn content_path(&self, dotted_path: &str) -> Option<Value> {
        let content = serde_json::to_value(self).ok()?;
        let mut current = &content;
        for segment in dotted_path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// The stream ids a storage sink files this record under.
    pub fn stream_ids(&self) -> Vec<String> {
        let mut ids = vec![format!(":_audit:action-{}", self.action)];
        if let Some(access_id) = &self.access_id {
            ids.push(format!(":_audit:access-{access_id}"));
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> Source {
        Source {
            name: "web".into(),
            ip: "127.0.0.1".into(),
        }
    }

    #[test]
    fn success_record_has_valid_event_type() {
        let record = AuditRecord::success("events.get", serde_json::json!({}), source());
        assert_eq!(record.event_type(), VALID_EVENT_TYPE);
        assert!(!record.is_error());
    }

    #[test]
    fn error_record_has_error_event_type() {
        let record = AuditRecord::error(
            "events.get",
            serde_json::json!({}),
            source(),
            "forbidden",
            "nope",
        );
        assert_eq!(record.event_type(), ERROR_EVENT_TYPE);
        assert!(record.is_error());
    }

    #[test]
    fn stream_ids_include_action_and_access_when_present() {
        let record = AuditRecord::success("events.create", serde_json::json!({}), source())
            .with_access_id("a1");
        assert_eq!(
            record.stream_ids(),
            vec![
                ":_audit:action-events.create".to_string(),
                ":_audit:access-a1".to_string()
            ]
        );
    }

    #[test]
    fn content_path_resolves_nested_fields() {
        let record = AuditRecord::error(
            "events.get",
            serde_json::json!({}),
            source(),
            "forbidden",
            "no access",
        );
        assert_eq!(
            record.content_path("message"),
            Some(Value::String("no access".to_string()))
        );
        assert_eq!(
            record.content_path("source.name"),
            Some(Value::String("web".to_string()))
        );
        assert_eq!(record.content_path("nope.nope"), None);
    }
}
