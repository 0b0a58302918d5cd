//! Shared fixtures for exercising the method pipeline directly, without
//! going through HTTP: an [`AppState`](stratum_pipeline::AppState) wired
//! to a fresh in-memory SQLite `local` store plus builders for the
//! users/streams/accesses a test needs, and [`Fixture::call`] to drive
//! [`stratum_pipeline::run_call`] the same way `stratum-api` does.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use sqlx::SqlitePool;
use stratum_audit::{AuditFilter, AuditRecorder, SyslogSink};
use stratum_cache::UserCache;
use stratum_context::{MethodContext, Source};
use stratum_core::AppError;
use stratum_data::domain::{EventData, Stream, User};
use stratum_data_sqlx::{LocalStore, UserAccountStorage};
use stratum_mall::{LocalStoreAdapter, Mall, StreamForestSnapshot};
use stratum_pipeline::{AppState, MethodRegistry, SecurityConfig};
use stratum_security::{Access, AccessKind, Permission};

/// An in-memory, fully-wired application plus the method registry, ready
/// to run calls against. One per test — SQLite's `sqlite::memory:` gives
/// each pool its own private database.
pub struct Fixture {
    pub app: Arc<AppState>,
    pub registry: Arc<MethodRegistry>,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_security(SecurityConfig::default()).await
    }

    /// Like [`Fixture::new`] but with a caller-supplied [`SecurityConfig`] —
    /// for tests that need non-default trusted-app patterns or session TTLs.
    pub async fn with_security(security: SecurityConfig) -> Self {
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .expect("failed to open in-memory sqlite pool");

        // `AppState.local_store` (used directly by `auth.rs`'s session
        // touch and `account.rs`'s field helpers) and the Mall's
        // registered adapter each get their own `LocalStore` over a
        // cloned `SqlitePool` handle — cheap, and `migrate()` is
        // idempotent (`CREATE TABLE IF NOT EXISTS`).
        let local_store = Arc::new(
            LocalStore::new(pool.clone())
                .await
                .expect("failed to migrate local store"),
        );
        let adapter_store = LocalStore::new(pool.clone())
            .await
            .expect("failed to migrate local store for mall adapter");
        let user_accounts = Arc::new(
            UserAccountStorage::new(pool)
                .await
                .expect("failed to migrate user account storage"),
        );

        let mut mall = Mall::new();
        mall.register_store(Arc::new(LocalStoreAdapter::new(adapter_store)));
        let mall = Arc::new(mall);

        let audit = Arc::new(AuditRecorder::new(
            AuditFilter::new(vec!["all".to_string()], Vec::new()),
            vec![Arc::new(SyslogSink::default())],
        ));

        let app = Arc::new(AppState::new(
            mall,
            local_store,
            user_accounts,
            Arc::new(UserCache::<Arc<StreamForestSnapshot>>::new()),
            audit,
            None,
            security,
        ));

        Fixture {
            app,
            registry: Arc::new(MethodRegistry::build()),
        }
    }

    /// Create a user with a root-level (`*`) personal access and return
    /// `(userId, token)`.
    pub async fn create_user(&self, username: &str) -> (String, String) {
        let user_id = uuid::Uuid::new_v4().to_string();
        let user = User {
            user_id: user_id.clone(),
            username: username.to_string(),
            email: format!("{username}@example.test"),
            language: "en".to_string(),
            custom_fields: Value::Null,
        };
        self.app
            .local_store
            .create_user(&user)
            .await
            .expect("failed to create user");

        let token = stratum_pipeline::state::new_token();
        let access = Access {
            id: uuid::Uuid::new_v4().to_string(),
            token: token.clone(),
            kind: AccessKind::Personal,
            name: "test-harness".to_string(),
            // Empty, like `find_or_create_personal_access` mints one: a
            // personal access's `manage *` is implicit in `AccessLogic::build`,
            // not stored, so this exercises the same path `auth.login` does.
            permissions: Vec::new(),
            expires: None,
            created_by: None,
            deleted: false,
        };
        self.app
            .local_store
            .create_access(&user_id, &access)
            .await
            .expect("failed to create access");

        (user_id, token)
    }

    /// Mint an access scoped to `permissions` rather than the root `*`
    /// manage grant `create_user` hands out, for permission-boundary
    /// tests.
    pub async fn create_scoped_access(
        &self,
        user_id: &str,
        name: &str,
        kind: AccessKind,
        permissions: Vec<Permission>,
    ) -> (String, String) {
        let id = uuid::Uuid::new_v4().to_string();
        let token = stratum_pipeline::state::new_token();
        let access = Access {
            id: id.clone(),
            token: token.clone(),
            kind,
            name: name.to_string(),
            permissions,
            expires: None,
            created_by: None,
            deleted: false,
        };
        self.app
            .local_store
            .create_access(user_id, &access)
            .await
            .expect("failed to create scoped access");
        (id, token)
    }

    pub async fn create_stream(&self, user_id: &str, id: &str, name: &str, parent_id: Option<&str>) -> Stream {
        let now = self.app.now();
        let stream = Stream {
            id: id.to_string(),
            name: name.to_string(),
            parent_id: parent_id.map(str::to_string),
            client_data: Value::Null,
            trashed: false,
            created: now,
            created_by: "test-harness".to_string(),
            modified: now,
            modified_by: "test-harness".to_string(),
            single_activity: false,
        };
        self.app
            .mall
            .streams_create(user_id, stream)
            .await
            .expect("failed to create stream")
    }

    pub async fn create_event(&self, user_id: &str, stream_id: &str, event_type: &str, time: f64) -> EventData {
        let now = self.app.now();
        let mut event = EventData {
            id: uuid::Uuid::new_v4().to_string(),
            stream_ids: vec![stream_id.to_string()],
            event_type: event_type.to_string(),
            content: Value::Null,
            time,
            duration: None,
            tags: Vec::new(),
            description: None,
            attachments: Vec::new(),
            client_data: Value::Null,
            trashed: false,
            integrity: None,
            created: now,
            created_by: "test-harness".to_string(),
            modified: now,
            modified_by: "test-harness".to_string(),
        };
        event.integrity = Some(stratum_integrity::hash_value(
            &serde_json::to_value(&event).expect("event serializes"),
        ));
        self.app
            .mall
            .events_create(user_id, event)
            .await
            .expect("failed to create event")
    }

    /// Build a [`MethodContext`] for `username` carrying `token` as a
    /// bearer credential, the same shape `stratum-api` constructs per
    /// request.
    pub fn context(&self, username: &str, token: Option<&str>) -> MethodContext {
        self.context_from(username, token, "test")
    }

    /// Like [`Fixture::context`] but with a caller-supplied source name —
    /// for exercising the trusted-app origin check.
    pub fn context_from(&self, username: &str, token: Option<&str>, source_name: &str) -> MethodContext {
        MethodContext::new(
            Source {
                name: source_name.to_string(),
                ip: "127.0.0.1".to_string(),
            },
            username.to_string(),
            token,
            stratum_core::http::HeaderMap::new(),
            HashMap::new(),
            uuid::Uuid::new_v4().to_string(),
        )
    }

    /// Run one method call through the real registry/pipeline, exactly as
    /// `stratum-api` would for an inbound request.
    pub async fn call(&self, ctx: &mut MethodContext, method: &str, params: Value) -> Result<Value, AppError> {
        stratum_pipeline::run_call(&self.registry, &self.app, ctx, method, params).await
    }

    /// Convenience: build a fresh context for `username`/`token` and run
    /// one call against it.
    pub async fn call_as(
        &self,
        username: &str,
        token: &str,
        method: &str,
        params: Value,
    ) -> Result<Value, AppError> {
        let mut ctx = self.context(username, Some(token));
        self.call(&mut ctx, method, params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_user_and_round_trip_a_stream() {
        let fixture = Fixture::new().await;
        let (user_id, token) = fixture.create_user("alice").await;

        let result = fixture
            .call_as("alice", &token, "streams.create", serde_json::json!({"name": "Diary"}))
            .await
            .expect("streams.create should succeed");
        let stream_id = result["stream"]["id"].as_str().unwrap().to_string();

        let listed = fixture
            .call_as("alice", &token, "streams.get", serde_json::json!({}))
            .await
            .expect("streams.get should succeed");
        let streams = listed["streams"].as_array().unwrap();
        assert!(streams.iter().any(|s| s["id"] == stream_id));

        let _ = user_id;
    }

    #[tokio::test]
    async fn unknown_method_is_unknown_resource() {
        let fixture = Fixture::new().await;
        let (_, token) = fixture.create_user("bob").await;
        let err = fixture
            .call_as("bob", &token, "does.not.exist", serde_json::json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind, stratum_core::ErrorKind::UnknownResource);
    }
}
