//! The `Store` contract every pluggable backend implements.
//!
//! Methods here operate on **store-local** ids — no `:<storeId>:` prefix.
//! Translating to/from the globally-namespaced id space the rest of the
//! system sees is the [`crate::mall::Mall`]'s job, not the store's.
//!
//! The query/filter shapes (`StreamQuery`, `EventQuery`, `StreamAndBlock`)
//! are shared with `stratum-data-sqlx`'s `LocalStore` rather than
//! redefined here — today `local` is the only implemented backend, so the
//! contract and its one implementation evolve together. A second
//! backend crate would pull these types out into this crate proper; see
//! `DESIGN.md`.

use async_trait::async_trait;
use stratum_data::domain::{Event, EventData, Stream};
pub use stratum_data_sqlx::{EventQuery, StreamAndBlock, StreamQuery};

use crate::error::MallError;

/// A pluggable backend providing stream/event operations for one
/// namespace. The built-in `local` store has no prefix; every other
/// store is addressed by its `id()`.
#[async_trait]
pub trait Store: Send + Sync {
    fn id(&self) -> &str;

    /// Whether this store can participate in `Mall::new_transaction()`.
    /// Stores that return `false` are wrapped in a stub whose `exec(fn)`
    /// just invokes `fn` directly.
    fn supports_transactions(&self) -> bool {
        false
    }

    async fn streams_get(&self, user_id: &str, query: &StreamQuery) -> Result<Vec<Stream>, MallError>;
    async fn streams_create(&self, user_id: &str, stream: Stream) -> Result<Stream, MallError>;
    async fn streams_update(&self, user_id: &str, stream: Stream) -> Result<Stream, MallError>;
    async fn streams_delete(&self, user_id: &str, stream_id: &str) -> Result<(), MallError>;
    async fn stream_has_children(&self, user_id: &str, stream_id: &str) -> Result<bool, MallError>;

    async fn events_get(&self, user_id: &str, query: &EventQuery) -> Result<Vec<Event>, MallError>;
    async fn events_get_one(&self, user_id: &str, event_id: &str) -> Result<Option<Event>, MallError>;
    async fn events_create(&self, user_id: &str, event: EventData) -> Result<EventData, MallError>;
    async fn events_update(&self, user_id: &str, event: EventData) -> Result<EventData, MallError>;
    async fn events_delete(&self, user_id: &str, event_id: &str) -> Result<(), MallError>;

    /// Non-deleted events of `stream_id` flagged `singleActivity`,
    /// excluding `exclude_event_id` — used to enforce the single-activity
    /// invariant before an insert/update commits.
    async fn single_activity_siblings(
        &self,
        user_id: &str,
        stream_id: &str,
        exclude_event_id: Option<&str>,
    ) -> Result<Vec<EventData>, MallError>;
}
