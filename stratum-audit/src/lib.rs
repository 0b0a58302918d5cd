//! Per-call audit records: two independently-filtered sinks (`syslog`,
//! `storage`) fed by an [`AuditRecorder`] the pipeline calls once per
//! method after the method body has run (success or error alike).

pub mod config;
pub mod error;
pub mod filter;
pub mod record;
pub mod recorder;
pub mod sinks;

pub mod prelude {
    pub use crate::config::AuditConfig;
    pub use crate::error::AuditError;
    pub use crate::filter::AuditFilter;
    pub use crate::record::{AuditRecord, RecordRef, ERROR_EVENT_TYPE, VALID_EVENT_TYPE};
    pub use crate::recorder::AuditRecorder;
    pub use crate::sinks::{render_template, AuditSink, Level, StorageSink, SyslogSink};
}

pub use prelude::*;
