//! Domain entities: `User`, `Stream`, `Event`, `Session`.
//!
//! These are plain data structs plus the invariant checks that are
//! independent of which store backs them (`stratum-data-sqlx` or another
//! registered store behind the Mall). Cross-store concerns — no cycles
//! across a store boundary, id namespacing — are the Mall's job, not this
//! crate's.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identified by a unique immutable `userId` and a unique case-insensitive
/// `username`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub username: String,
    pub email: String,
    pub language: String,
    /// Additional unique/indexed fields declared by deployment config,
    /// stored opaquely here.
    #[serde(default)]
    pub custom_fields: Value,
}

/// A node in a user's stream forest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stream {
    pub id: String,
    pub name: String,
    /// `None` = root.
    pub parent_id: Option<String>,
    #[serde(default)]
    pub client_data: Value,
    pub trashed: bool,
    pub created: i64,
    pub created_by: String,
    pub modified: i64,
    pub modified_by: String,
    pub single_activity: bool,
}

/// `time + duration` is the end time, open (running) if `duration` is
/// `None`. Absent-or-zero duration at the wire boundary is normalized to
/// `Some(0.0)` by the request-parsing layer before an `EventData` is
/// constructed — this type only distinguishes "running" (`None`) from
/// "has an end time" (`Some`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventData {
    pub id: String,
    pub stream_ids: Vec<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub content: Value,
    pub time: f64,
    pub duration: Option<f64>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub client_data: Value,
    pub trashed: bool,
    pub integrity: Option<String>,
    pub created: i64,
    pub created_by: String,
    pub modified: i64,
    pub modified_by: String,
}

impl EventData {
    /// End of the event's interval; `None` means still running.
    pub fn end_time(&self) -> Option<f64> {
        self.duration.map(|d| self.time + d)
    }

    /// Whether this event's `[time, end_time)` interval overlaps another's.
    /// An open (running) interval is treated as extending to `+inf`.
    pub fn overlaps(&self, other: &EventData) -> bool {
        let self_end = self.end_time().unwrap_or(f64::INFINITY);
        let other_end = other.end_time().unwrap_or(f64::INFINITY);
        self.time < other_end && other.time < self_end
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub file_name: String,
    pub content_type: String,
    pub size: u64,
    pub integrity: String,
}

/// An event, or its tombstone once deleted — a deleted event keeps only
/// `{id, deleted}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Event {
    Active(EventData),
    Deleted { id: String, deleted: bool },
}

impl Event {
    pub fn event_id(&self) -> &str {
        match self {
            Event::Active(data) => &data.id,
            Event::Deleted { id, .. } => id,
        }
    }

    pub fn tombstone(id: impl Into<String>) -> Self {
        Event::Deleted {
            id: id.into(),
            deleted: true,
        }
    }
}

/// A TTL-scoped token → `{username, appId}` mapping, created on login,
/// touched on each authenticated call, auto-expiring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub username: String,
    pub app_id: String,
    pub expires: i64,
}

impl Session {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires < now
    }

    pub fn touched(&self, now: i64, ttl_seconds: i64) -> Session {
        Session {
            expires: now + ttl_seconds,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str, time: f64, duration: Option<f64>) -> EventData {
        EventData {
            id: id.to_string(),
            stream_ids: vec!["s1".into()],
            event_type: "note/txt".into(),
            content: Value::String("x".into()),
            time,
            duration,
            tags: vec![],
            description: None,
            attachments: vec![],
            client_data: Value::Null,
            trashed: false,
            integrity: None,
            created: 0,
            created_by: "access-1".into(),
            modified: 0,
            modified_by: "access-1".into(),
        }
    }

    #[test]
    fn instantaneous_events_do_not_overlap_unless_same_instant() {
        let a = event("a", 100.0, Some(0.0));
        let b = event("b", 100.0, Some(0.0));
        assert!(a.overlaps(&b));
        let c = event("c", 101.0, Some(0.0));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn fixed_duration_intervals_overlap_when_ranges_intersect() {
        let a = event("a", 100.0, Some(10.0)); // [100, 110)
        let b = event("b", 105.0, Some(10.0)); // [105, 115)
        assert!(a.overlaps(&b));
        let c = event("c", 110.0, Some(10.0)); // [110, 120) - half-open, no overlap
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn running_event_extends_to_infinity() {
        let a = event("a", 100.0, None); // still running
        let b = event("b", 10_000.0, Some(1.0));
        assert!(a.overlaps(&b));
    }

    #[test]
    fn deleted_event_keeps_only_id_and_deleted_flag() {
        let tombstone = Event::tombstone("e1");
        let json = serde_json::to_value(&tombstone).unwrap();
        assert_eq!(json, serde_json::json!({"id": "e1", "deleted": true}));
    }

    #[test]
    fn session_touch_extends_expiry() {
        let session = Session {
            token: "tok".into(),
            username: "alice".into(),
            app_id: "app1".into(),
            expires: 100,
        };
        let touched = session.touched(200, 3600);
        assert_eq!(touched.expires, 3800);
        assert!(!touched.is_expired(200));
    }
}
