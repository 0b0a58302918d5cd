//! The two independently-filtered audit sinks: `syslog` (a rendered line
//! handed to `tracing`, standing in for a real syslog transport — wiring
//! an actual `syslog`/`RFC 5424` sender is outside this workspace's
//! scope) and `storage` (append-only events in the `:_audit:` namespace,
//! via the Mall).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use stratum_mall::Mall;

use crate::error::AuditError;
use crate::record::AuditRecord;

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, user_id: &str, record: &AuditRecord) -> Result<(), AuditError>;
}

/// Priority levels a syslog line can be mapped to, ordered least to most
/// severe per RFC 5424's subset this system actually uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Notice,
    Warning,
    Error,
    Critical,
    Alert,
    Emerg,
}

impl Level {
    pub fn for_record(record: &AuditRecord) -> Self {
        if record.is_error() {
            Level::Error
        } else {
            Level::Notice
        }
    }
}

/// Render a syslog template: `{userid}` and dotted `{content.path}`
/// placeholders are substituted; an unresolved placeholder is left
/// verbatim; a resolved object/array value is JSON-encoded.
pub fn render_template(template: &str, user_id: &str, record: &AuditRecord) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after_brace = &rest[start + 1..];
        let Some(end) = after_brace.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let placeholder = &after_brace[..end];
        out.push_str(&resolve_placeholder(placeholder, user_id, record));
        rest = &after_brace[end + 1..];
    }
    out.push_str(rest);
    out
}

fn resolve_placeholder(placeholder: &str, user_id: &str, record: &AuditRecord) -> String {
    if placeholder == "userid" {
        return user_id.to_string();
    }
    if let Some(path) = placeholder.strip_prefix("content.") {
        return match record.content_path(path) {
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => format!("{{{placeholder}}}"),
        };
    }
    format!("{{{placeholder}}}")
}

pub struct SyslogSink {
    template: String,
}

impl SyslogSink {
    pub fn new(template: impl Into<String>) -> Self {
        SyslogSink {
            template: template.into(),
        }
    }
}

impl Default for SyslogSink {
    fn default() -> Self {
        Self::new("{userid} {content.action}: {content.message}")
    }
}

#[async_trait]
impl AuditSink for SyslogSink {
    async fn record(&self, user_id: &str, record: &AuditRecord) -> Result<(), AuditError> {
        let line = render_template(&self.template, user_id, record);
        match Level::for_record(record) {
            Level::Emerg | Level::Alert | Level::Critical | Level::Error => {
                tracing::error!(target: "stratum_audit::syslog", %line)
            }
            Level::Warning => tracing::warn!(target: "stratum_audit::syslog", %line),
            Level::Notice => tracing::info!(target: "stratum_audit::syslog", %line),
        }
        Ok(())
    }
}

/// Append-only per-user storage sink: one event per record, filed under
/// `:_audit:action-<method>` and, when resolved, `:_audit:access-<id>`.
pub struct StorageSink {
    mall: Arc<Mall>,
}

impl StorageSink {
    pub fn new(mall: Arc<Mall>) -> Self {
        StorageSink { mall }
    }
}

#[async_trait]
impl AuditSink for StorageSink {
    async fn record(&self, user_id: &str, record: &AuditRecord) -> Result<(), AuditError> {
        let now = Utc::now().timestamp();
        let content = serde_json::to_value(record)
            .map_err(|e| AuditError::Sink(format!("failed to encode audit content: {e}")))?;
        let event = stratum_data::domain::EventData {
            id: uuid::Uuid::new_v4().to_string(),
            stream_ids: record.stream_ids(),
            event_type: record.event_type().to_string(),
            content,
            time: now as f64,
            duration: Some(0.0),
            tags: Vec::new(),
            description: None,
            attachments: Vec::new(),
            client_data: Value::Null,
            trashed: false,
            integrity: None,
            created: now,
            created_by: "system".to_string(),
            modified: now,
            modified_by: "system".to_string(),
        };
        self.mall.events_create(user_id, event).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_context::Source;

    fn source() -> Source {
        Source {
            name: "web".into(),
            ip: "127.0.0.1".into(),
        }
    }

    #[test]
    fn template_substitutes_userid_and_content_paths() {
        let record = AuditRecord::success("events.create", serde_json::json!({}), source());
        let rendered = render_template("{userid} did {content.action}", "user-1", &record);
        assert_eq!(rendered, "user-1 did events.create");
    }

    #[test]
    fn unresolved_placeholder_is_left_verbatim() {
        let record = AuditRecord::success("events.create", serde_json::json!({}), source());
        let rendered = render_template("{content.nope.nope}", "user-1", &record);
        assert_eq!(rendered, "{content.nope.nope}");
    }

    #[test]
    fn error_records_map_to_error_severity() {
        let record = AuditRecord::error(
            "events.get",
            serde_json::json!({}),
            source(),
            "forbidden",
            "nope",
        );
        assert_eq!(Level::for_record(&record), Level::Error);
    }
}
