//! [`AuditRecorder`]: the pipeline-facing entry point that applies the
//! filter and fans a record out to every enabled sink. Per the error
//! handling design, a sink failure is logged and never propagated — it
//! must not fail the underlying call it is auditing.

use std::sync::Arc;

use tracing::warn;

use crate::filter::AuditFilter;
use crate::record::AuditRecord;
use crate::sinks::AuditSink;

pub struct AuditRecorder {
    filter: AuditFilter,
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl AuditRecorder {
    pub fn new(filter: AuditFilter, sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        AuditRecorder { filter, sinks }
    }

    /// Apply the filter and, if the method passes, hand the record to every
    /// sink concurrently. Always returns `Ok` — sink errors are logged, not
    /// surfaced.
    pub async fn record(&self, user_id: &str, record: AuditRecord) {
        if !self.filter.allows(&record.action) {
            return;
        }
        for sink in &self.sinks {
            if let Err(e) = sink.record(user_id, &record).await {
                warn!(action = %record.action, error = %e, "audit sink failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use stratum_context::Source;

    use crate::error::AuditError;

    struct RecordingSink {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AuditSink for RecordingSink {
        async fn record(&self, _user_id: &str, record: &AuditRecord) -> Result<(), AuditError> {
            self.seen.lock().unwrap().push(record.action.clone());
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl AuditSink for FailingSink {
        async fn record(&self, _user_id: &str, _record: &AuditRecord) -> Result<(), AuditError> {
            Err(AuditError::Sink("boom".to_string()))
        }
    }

    fn source() -> Source {
        Source {
            name: "web".into(),
            ip: "127.0.0.1".into(),
        }
    }

    #[tokio::test]
    async fn scenario_s5_storage_sink_records_exactly_events_create() {
        let sink = Arc::new(RecordingSink {
            seen: Mutex::new(Vec::new()),
        });
        let filter = AuditFilter::new(vec!["events.all".into()], vec!["events.get".into()]);
        let recorder = AuditRecorder::new(filter, vec![sink.clone()]);

        recorder
            .record(
                "user-1",
                AuditRecord::success("events.get", serde_json::json!({}), source()),
            )
            .await;
        recorder
            .record(
                "user-1",
                AuditRecord::success("events.create", serde_json::json!({}), source()),
            )
            .await;
        recorder
            .record(
                "user-1",
                AuditRecord::success("auth.login", serde_json::json!({}), source()),
            )
            .await;

        assert_eq!(*sink.seen.lock().unwrap(), vec!["events.create".to_string()]);
    }

    #[tokio::test]
    async fn sink_failure_does_not_panic_or_propagate() {
        let filter = AuditFilter::new(vec!["all".into()], vec![]);
        let recorder = AuditRecorder::new(filter, vec![Arc::new(FailingSink)]);
        recorder
            .record(
                "user-1",
                AuditRecord::success("events.get", serde_json::json!({}), source()),
            )
            .await;
    }
}
