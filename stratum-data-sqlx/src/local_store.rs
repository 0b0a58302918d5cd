//! `LocalStore`: the concrete backend for the Mall's implicit `local`
//! store — streams, events, accesses and sessions, each scoped per user,
//! backed by the same per-process SQLite pool `UserAccountStorage` uses.
//!
//! This crate only knows about a single user's rows at a time; the
//! cross-store id namespacing (`:<storeId>:` prefixes), query splitting
//! across stores and the `Store` trait itself live in `stratum-mall`,
//! which wraps this type. Keeping that boundary here means `LocalStore`
//! can be unit-tested without pulling in the Mall at all.

use serde_json::Value;
use sqlx::{Row, SqlitePool};
use stratum_data::domain::{Event, EventData, Session, Stream, User};
use stratum_data::DataError;
use stratum_security::{Access, AccessKind, Permission};

/// Query parameters for `streams.get`.
#[derive(Debug, Clone, Default)]
pub struct StreamQuery {
    pub parent_id: Option<String>,
    pub id: Option<String>,
    pub expand_children: bool,
    pub exclude_ids: Vec<String>,
    pub include_trashed: bool,
    pub include_deletions_since: Option<i64>,
}

/// One AND-block of a stream-query OR, already resolved to local ids.
#[derive(Debug, Clone, Default)]
pub struct StreamAndBlock {
    pub any: Vec<String>,
    pub all: Vec<String>,
    pub not: Vec<String>,
}

/// The decomposed per-store event query `stratum-mall` hands to a store.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub stream_blocks: Vec<StreamAndBlock>,
    pub types: Vec<String>,
    pub from_time: Option<f64>,
    pub to_time: Option<f64>,
    pub running_at_or_after: Option<f64>,
    pub include_trashed: bool,
    pub sort_ascending: bool,
    /// `limit`/`skip` are applied by the Mall across stores, not here —
    /// a store may still use them as a hint to avoid scanning everything.
    pub limit_hint: Option<u64>,
}

pub struct LocalStore {
    pool: SqlitePool,
}

impl LocalStore {
    pub async fn new(pool: SqlitePool) -> Result<Self, DataError> {
        let store = LocalStore { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), DataError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (
                user_id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL,
                language TEXT NOT NULL,
                custom_fields TEXT NOT NULL DEFAULT '{}'
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(DataError::database)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS streams (
                user_id TEXT NOT NULL,
                id TEXT NOT NULL,
                name TEXT NOT NULL,
                parent_id TEXT,
                client_data TEXT NOT NULL DEFAULT '{}',
                trashed INTEGER NOT NULL DEFAULT 0,
                created INTEGER NOT NULL,
                created_by TEXT NOT NULL,
                modified INTEGER NOT NULL,
                modified_by TEXT NOT NULL,
                single_activity INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (user_id, id)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(DataError::database)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS events (
                user_id TEXT NOT NULL,
                id TEXT NOT NULL,
                stream_ids TEXT NOT NULL,
                type TEXT,
                content TEXT,
                time REAL,
                duration REAL,
                tags TEXT NOT NULL DEFAULT '[]',
                description TEXT,
                attachments TEXT NOT NULL DEFAULT '[]',
                client_data TEXT NOT NULL DEFAULT '{}',
                trashed INTEGER NOT NULL DEFAULT 0,
                integrity TEXT,
                deleted INTEGER NOT NULL DEFAULT 0,
                created INTEGER,
                created_by TEXT,
                modified INTEGER,
                modified_by TEXT,
                PRIMARY KEY (user_id, id)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(DataError::database)?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_user_time ON events(user_id, time)")
            .execute(&self.pool)
            .await
            .map_err(DataError::database)?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_modified ON events(user_id, modified)")
            .execute(&self.pool)
            .await
            .map_err(DataError::database)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS accesses (
                user_id TEXT NOT NULL,
                id TEXT NOT NULL,
                token TEXT NOT NULL,
                kind TEXT NOT NULL,
                name TEXT NOT NULL,
                permissions TEXT NOT NULL DEFAULT '[]',
                expires INTEGER,
                created_by TEXT,
                deleted INTEGER NOT NULL DEFAULT 0,
                integrity TEXT,
                PRIMARY KEY (user_id, id)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(DataError::database)?;
        sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS idx_accesses_token ON accesses(token)")
            .execute(&self.pool)
            .await
            .map_err(DataError::database)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sessions (
                token TEXT PRIMARY KEY,
                username TEXT NOT NULL,
                app_id TEXT NOT NULL,
                expires INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(DataError::database)?;

        // Backs system-stream unique-field enforcement (e.g. `email`):
        // one row per (field, value) naming the user currently holding it,
        // across the whole store rather than per-user, since uniqueness is
        // a cross-user property. See `claim_system_field`/`find_system_field_claim_owner`.
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS system_field_claims (
                field TEXT NOT NULL,
                value TEXT NOT NULL,
                user_id TEXT NOT NULL,
                PRIMARY KEY (field, value)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(DataError::database)?;

        Ok(())
    }

    // -- System-stream unique fields ------------------------------------

    /// The user id currently holding `value` for `field`, if any.
    pub async fn find_system_field_claim_owner(
        &self,
        field: &str,
        value: &str,
    ) -> Result<Option<String>, DataError> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT user_id FROM system_field_claims WHERE field = ? AND value = ?",
        )
        .bind(field)
        .bind(value)
        .fetch_optional(&self.pool)
        .await
        .map_err(DataError::database)?;
        Ok(row.map(|r| r.0))
    }

    /// Claim `value` for `field` on behalf of `user_id`. Fails with
    /// `DataError::Other` if another user already holds it (including the
    /// case where the race loses to a concurrent claim between the caller's
    /// own `find_system_field_claim_owner` check and this insert).
    pub async fn claim_system_field(&self, field: &str, value: &str, user_id: &str) -> Result<(), DataError> {
        sqlx::query("INSERT INTO system_field_claims (field, value, user_id) VALUES (?, ?, ?)")
            .bind(field)
            .bind(value)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                    DataError::Other(format!("{field} value already claimed"))
                }
                other => DataError::database(other),
            })?;
        Ok(())
    }

    /// Release a previously held claim, e.g. when a field's value changes
    /// away from it. A no-op if the claim is already gone.
    pub async fn release_system_field_claim(&self, field: &str, value: &str) -> Result<(), DataError> {
        sqlx::query("DELETE FROM system_field_claims WHERE field = ? AND value = ?")
            .bind(field)
            .bind(value)
            .execute(&self.pool)
            .await
            .map_err(DataError::database)?;
        Ok(())
    }

    // -- Users ------------------------------------------------------

    pub async fn create_user(&self, user: &User) -> Result<(), DataError> {
        sqlx::query(
            "INSERT INTO users (user_id, username, email, language, custom_fields)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&user.user_id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.language)
        .bind(user.custom_fields.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                DataError::Other(format!("username already exists: {}", user.username))
            }
            other => DataError::database(other),
        })?;
        Ok(())
    }

    pub async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, DataError> {
        let row = sqlx::query(
            "SELECT user_id, username, email, language, custom_fields FROM users
             WHERE lower(username) = lower(?)",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(DataError::database)?;
        Ok(row.map(|r| user_from_row(&r)))
    }

    pub async fn find_user_by_id(&self, user_id: &str) -> Result<Option<User>, DataError> {
        let row = sqlx::query(
            "SELECT user_id, username, email, language, custom_fields FROM users WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DataError::database)?;
        Ok(row.map(|r| user_from_row(&r)))
    }

    pub async fn update_user(&self, user: &User) -> Result<(), DataError> {
        sqlx::query(
            "UPDATE users SET email = ?, language = ?, custom_fields = ? WHERE user_id = ?",
        )
        .bind(&user.email)
        .bind(&user.language)
        .bind(user.custom_fields.to_string())
        .bind(&user.user_id)
        .execute(&self.pool)
        .await
        .map_err(DataError::database)?;
        Ok(())
    }

    /// Cascades over every per-user resource: streams, events, accesses,
    /// sessions (by joining through the user's accesses' tokens is not
    /// needed — sessions key off username, handled by the caller).
    pub async fn delete_user_cascade(&self, user_id: &str) -> Result<(), DataError> {
        let mut tx = self.pool.begin().await.map_err(DataError::database)?;
        sqlx::query("DELETE FROM events WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(DataError::database)?;
        sqlx::query("DELETE FROM streams WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(DataError::database)?;
        sqlx::query("DELETE FROM accesses WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(DataError::database)?;
        sqlx::query("DELETE FROM users WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(DataError::database)?;
        tx.commit().await.map_err(DataError::database)?;
        Ok(())
    }

    // -- Streams ------------------------------------------------------

    pub async fn create_stream(&self, user_id: &str, stream: &Stream) -> Result<(), DataError> {
        if let Some(parent) = &stream.parent_id {
            let exists: Option<(i64,)> =
                sqlx::query_as("SELECT 1 FROM streams WHERE user_id = ? AND id = ?")
                    .bind(user_id)
                    .bind(parent)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(DataError::database)?;
            if exists.is_none() {
                return Err(DataError::NotFound(format!(
                    "parent stream {parent} does not exist"
                )));
            }
        }
        sqlx::query(
            "INSERT INTO streams (user_id, id, name, parent_id, client_data, trashed, created,
             created_by, modified, modified_by, single_activity)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(&stream.id)
        .bind(&stream.name)
        .bind(&stream.parent_id)
        .bind(stream.client_data.to_string())
        .bind(stream.trashed)
        .bind(stream.created)
        .bind(&stream.created_by)
        .bind(stream.modified)
        .bind(&stream.modified_by)
        .bind(stream.single_activity)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                DataError::Other(format!("stream id already exists: {}", stream.id))
            }
            other => DataError::database(other),
        })?;
        Ok(())
    }

    pub async fn update_stream(&self, user_id: &str, stream: &Stream) -> Result<(), DataError> {
        sqlx::query(
            "UPDATE streams SET name = ?, parent_id = ?, client_data = ?, trashed = ?,
             modified = ?, modified_by = ?, single_activity = ?
             WHERE user_id = ? AND id = ?",
        )
        .bind(&stream.name)
        .bind(&stream.parent_id)
        .bind(stream.client_data.to_string())
        .bind(stream.trashed)
        .bind(stream.modified)
        .bind(&stream.modified_by)
        .bind(stream.single_activity)
        .bind(user_id)
        .bind(&stream.id)
        .execute(&self.pool)
        .await
        .map_err(DataError::database)?;
        Ok(())
    }

    pub async fn delete_stream(&self, user_id: &str, stream_id: &str) -> Result<(), DataError> {
        sqlx::query("DELETE FROM streams WHERE user_id = ? AND id = ?")
            .bind(user_id)
            .bind(stream_id)
            .execute(&self.pool)
            .await
            .map_err(DataError::database)?;
        Ok(())
    }

    pub async fn get_stream(&self, user_id: &str, stream_id: &str) -> Result<Option<Stream>, DataError> {
        let row = sqlx::query(
            "SELECT id, name, parent_id, client_data, trashed, created, created_by, modified,
             modified_by, single_activity FROM streams WHERE user_id = ? AND id = ?",
        )
        .bind(user_id)
        .bind(stream_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DataError::database)?;
        Ok(row.map(|r| stream_from_row(&r)))
    }

    /// Every stream belonging to the user, flat. Tree assembly (parentId
    /// filtering, `expandChildren`, `excludeIds`) is the Mall's job so it
    /// can apply the same logic uniformly across every store.
    pub async fn all_streams(&self, user_id: &str, include_trashed: bool) -> Result<Vec<Stream>, DataError> {
        let sql = if include_trashed {
            "SELECT id, name, parent_id, client_data, trashed, created, created_by, modified,
             modified_by, single_activity FROM streams WHERE user_id = ?"
        } else {
            "SELECT id, name, parent_id, client_data, trashed, created, created_by, modified,
             modified_by, single_activity FROM streams WHERE user_id = ? AND trashed = 0"
        };
        let rows = sqlx::query(sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(DataError::database)?;
        Ok(rows.iter().map(stream_from_row).collect())
    }

    pub async fn stream_has_children(&self, user_id: &str, stream_id: &str) -> Result<bool, DataError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM streams WHERE user_id = ? AND parent_id = ? LIMIT 1")
                .bind(user_id)
                .bind(stream_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(DataError::database)?;
        Ok(row.is_some())
    }

    // -- Events ---------------------------------------------------------

    /// All non-deleted events of `stream_id` flagged `singleActivity`,
    /// used for the overlap check. Excludes `exclude_event_id` (the event
    /// being updated, so it doesn't conflict with its own prior self).
    pub async fn single_activity_siblings(
        &self,
        user_id: &str,
        stream_id: &str,
        exclude_event_id: Option<&str>,
    ) -> Result<Vec<EventData>, DataError> {
        let rows = sqlx::query(
            "SELECT id, stream_ids, type, content, time, duration, tags, description,
             attachments, client_data, trashed, integrity, created, created_by, modified,
             modified_by FROM events
             WHERE user_id = ? AND deleted = 0 AND stream_ids LIKE ? AND id != ?",
        )
        .bind(user_id)
        .bind(format!("%\"{stream_id}\"%"))
        .bind(exclude_event_id.unwrap_or(""))
        .fetch_all(&self.pool)
        .await
        .map_err(DataError::database)?;
        Ok(rows
            .iter()
            .map(event_data_from_row)
            .filter(|e| e.stream_ids.iter().any(|s| s == stream_id))
            .collect())
    }

    pub async fn create_event(&self, user_id: &str, event: &EventData) -> Result<(), DataError> {
        self.upsert_event(user_id, event, true).await
    }

    pub async fn update_event(&self, user_id: &str, event: &EventData) -> Result<(), DataError> {
        self.upsert_event(user_id, event, false).await
    }

    async fn upsert_event(&self, user_id: &str, event: &EventData, insert: bool) -> Result<(), DataError> {
        let stream_ids_json = serde_json::to_string(&event.stream_ids).unwrap();
        let tags_json = serde_json::to_string(&event.tags).unwrap();
        let attachments_json = serde_json::to_string(&event.attachments).unwrap();
        if insert {
            sqlx::query(
                "INSERT INTO events (user_id, id, stream_ids, type, content, time, duration, tags,
                 description, attachments, client_data, trashed, integrity, deleted, created,
                 created_by, modified, modified_by)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?)",
            )
            .bind(user_id)
            .bind(&event.id)
            .bind(stream_ids_json)
            .bind(&event.event_type)
            .bind(event.content.to_string())
            .bind(event.time)
            .bind(event.duration)
            .bind(tags_json)
            .bind(&event.description)
            .bind(attachments_json)
            .bind(event.client_data.to_string())
            .bind(event.trashed)
            .bind(&event.integrity)
            .bind(event.created)
            .bind(&event.created_by)
            .bind(event.modified)
            .bind(&event.modified_by)
            .execute(&self.pool)
            .await
            .map_err(DataError::database)?;
        } else {
            sqlx::query(
                "UPDATE events SET stream_ids = ?, type = ?, content = ?, time = ?, duration = ?,
                 tags = ?, description = ?, attachments = ?, client_data = ?, trashed = ?,
                 integrity = ?, modified = ?, modified_by = ? WHERE user_id = ? AND id = ?",
            )
            .bind(stream_ids_json)
            .bind(&event.event_type)
            .bind(event.content.to_string())
            .bind(event.time)
            .bind(event.duration)
            .bind(tags_json)
            .bind(&event.description)
            .bind(attachments_json)
            .bind(event.client_data.to_string())
            .bind(event.trashed)
            .bind(&event.integrity)
            .bind(event.modified)
            .bind(&event.modified_by)
            .bind(user_id)
            .bind(&event.id)
            .execute(&self.pool)
            .await
            .map_err(DataError::database)?;
        }
        Ok(())
    }

    /// Marks an event deleted, keeping only `{id, deleted}`.
    pub async fn delete_event(&self, user_id: &str, event_id: &str) -> Result<(), DataError> {
        sqlx::query(
            "UPDATE events SET deleted = 1, content = NULL, type = NULL, time = NULL,
             duration = NULL WHERE user_id = ? AND id = ?",
        )
        .bind(user_id)
        .bind(event_id)
        .execute(&self.pool)
        .await
        .map_err(DataError::database)?;
        Ok(())
    }

    pub async fn get_event(&self, user_id: &str, event_id: &str) -> Result<Option<Event>, DataError> {
        let row = sqlx::query(
            "SELECT id, stream_ids, type, content, time, duration, tags, description, attachments,
             client_data, trashed, integrity, deleted, created, created_by, modified, modified_by
             FROM events WHERE user_id = ? AND id = ?",
        )
        .bind(user_id)
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DataError::database)?;
        Ok(row.map(|r| event_from_row(&r)))
    }

    /// Run `query` against this user's events and return matches ordered
    /// by `time` per `sort_ascending`. `stratum-mall` applies the global
    /// `{sort, limit, skip}` across stores — this is the per-store fetch.
    pub async fn query_events(&self, user_id: &str, query: &EventQuery) -> Result<Vec<Event>, DataError> {
        let sql = if query.include_trashed {
            "SELECT id, stream_ids, type, content, time, duration, tags, description, attachments,
             client_data, trashed, integrity, deleted, created, created_by, modified, modified_by
             FROM events WHERE user_id = ? AND deleted = 0"
        } else {
            "SELECT id, stream_ids, type, content, time, duration, tags, description, attachments,
             client_data, trashed, integrity, deleted, created, created_by, modified, modified_by
             FROM events WHERE user_id = ? AND deleted = 0 AND trashed = 0"
        };
        let rows = sqlx::query(sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(DataError::database)?;
        let mut events: Vec<Event> = rows
            .iter()
            .map(event_from_row)
            .filter(|e| matches_query(e, query))
            .collect();
        events.sort_by(|a, b| {
            let ta = time_of(a);
            let tb = time_of(b);
            if query.sort_ascending {
                ta.partial_cmp(&tb).unwrap_or(std::cmp::Ordering::Equal)
            } else {
                tb.partial_cmp(&ta).unwrap_or(std::cmp::Ordering::Equal)
            }
        });
        Ok(events)
    }

    // -- Accesses ---------------------------------------------------------

    pub async fn create_access(&self, user_id: &str, access: &Access) -> Result<(), DataError> {
        let permissions_json = serde_json::to_string(&access.permissions).unwrap();
        sqlx::query(
            "INSERT INTO accesses (user_id, id, token, kind, name, permissions, expires,
             created_by, deleted, integrity) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?)",
        )
        .bind(user_id)
        .bind(&access.id)
        .bind(&access.token)
        .bind(kind_str(access.kind))
        .bind(&access.name)
        .bind(permissions_json)
        .bind(access.expires)
        .bind(&access.created_by)
        .bind(stratum_integrity::hash_value(&serde_json::json!({
            "id": access.id, "token": access.token,
        })))
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                DataError::Other("access token already exists".to_string())
            }
            other => DataError::database(other),
        })?;
        Ok(())
    }

    pub async fn find_access_by_token(&self, token: &str) -> Result<Option<(String, Access)>, DataError> {
        let row = sqlx::query(
            "SELECT user_id, id, token, kind, name, permissions, expires, created_by, deleted
             FROM accesses WHERE token = ?",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(DataError::database)?;
        Ok(row.map(|r| {
            let user_id: String = r.get("user_id");
            (user_id, access_from_row(&r))
        }))
    }

    pub async fn find_access_by_id(&self, user_id: &str, access_id: &str) -> Result<Option<Access>, DataError> {
        let row = sqlx::query(
            "SELECT user_id, id, token, kind, name, permissions, expires, created_by, deleted
             FROM accesses WHERE user_id = ? AND id = ?",
        )
        .bind(user_id)
        .bind(access_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DataError::database)?;
        Ok(row.map(|r| access_from_row(&r)))
    }

    pub async fn list_accesses(&self, user_id: &str, include_deleted: bool) -> Result<Vec<Access>, DataError> {
        let sql = if include_deleted {
            "SELECT user_id, id, token, kind, name, permissions, expires, created_by, deleted
             FROM accesses WHERE user_id = ?"
        } else {
            "SELECT user_id, id, token, kind, name, permissions, expires, created_by, deleted
             FROM accesses WHERE user_id = ? AND deleted = 0"
        };
        let rows = sqlx::query(sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(DataError::database)?;
        Ok(rows.iter().map(access_from_row).collect())
    }

    /// Soft-delete: preserves the id as an opaque audit reference.
    pub async fn soft_delete_access(&self, user_id: &str, access_id: &str) -> Result<(), DataError> {
        sqlx::query("UPDATE accesses SET deleted = 1 WHERE user_id = ? AND id = ?")
            .bind(user_id)
            .bind(access_id)
            .execute(&self.pool)
            .await
            .map_err(DataError::database)?;
        Ok(())
    }

    // -- Sessions ---------------------------------------------------------

    pub async fn create_session(&self, session: &Session) -> Result<(), DataError> {
        sqlx::query(
            "INSERT INTO sessions (token, username, app_id, expires) VALUES (?, ?, ?, ?)
             ON CONFLICT(token) DO UPDATE SET expires = excluded.expires",
        )
        .bind(&session.token)
        .bind(&session.username)
        .bind(&session.app_id)
        .bind(session.expires)
        .execute(&self.pool)
        .await
        .map_err(DataError::database)?;
        Ok(())
    }

    pub async fn get_session(&self, token: &str) -> Result<Option<Session>, DataError> {
        let row = sqlx::query("SELECT token, username, app_id, expires FROM sessions WHERE token = ?")
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .map_err(DataError::database)?;
        Ok(row.map(|r| Session {
            token: r.get("token"),
            username: r.get("username"),
            app_id: r.get("app_id"),
            expires: r.get("expires"),
        }))
    }

    /// Renews the session's `expires`. Fails (returns `Ok(false)`) if the
    /// session is already expired or missing — the caller must then treat
    /// the token as `invalid-access-token`, regardless of any race with a
    /// concurrent touch.
    pub async fn touch_session(&self, token: &str, now: i64, ttl_seconds: i64) -> Result<bool, DataError> {
        let session = self.get_session(token).await?;
        match session {
            Some(s) if !s.is_expired(now) => {
                self.create_session(&s.touched(now, ttl_seconds)).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub async fn expire_session(&self, token: &str) -> Result<(), DataError> {
        sqlx::query("DELETE FROM sessions WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(DataError::database)?;
        Ok(())
    }
}

fn user_from_row(row: &sqlx::sqlite::SqliteRow) -> User {
    User {
        user_id: row.get("user_id"),
        username: row.get("username"),
        email: row.get("email"),
        language: row.get("language"),
        custom_fields: parse_json(row.get("custom_fields")),
    }
}

fn stream_from_row(row: &sqlx::sqlite::SqliteRow) -> Stream {
    Stream {
        id: row.get("id"),
        name: row.get("name"),
        parent_id: row.get("parent_id"),
        client_data: parse_json(row.get("client_data")),
        trashed: row.get("trashed"),
        created: row.get("created"),
        created_by: row.get("created_by"),
        modified: row.get("modified"),
        modified_by: row.get("modified_by"),
        single_activity: row.get("single_activity"),
    }
}

fn event_data_from_row(row: &sqlx::sqlite::SqliteRow) -> EventData {
    EventData {
        id: row.get("id"),
        stream_ids: serde_json::from_str(&row.get::<String, _>("stream_ids")).unwrap_or_default(),
        event_type: row.get::<Option<String>, _>("type").unwrap_or_default(),
        content: row
            .get::<Option<String>, _>("content")
            .map(|s| parse_json(s))
            .unwrap_or(Value::Null),
        time: row.get::<Option<f64>, _>("time").unwrap_or(0.0),
        duration: row.get("duration"),
        tags: serde_json::from_str(&row.get::<String, _>("tags")).unwrap_or_default(),
        description: row.get("description"),
        attachments: serde_json::from_str(&row.get::<String, _>("attachments")).unwrap_or_default(),
        client_data: parse_json(row.get("client_data")),
        trashed: row.get("trashed"),
        integrity: row.get("integrity"),
        created: row.get::<Option<i64>, _>("created").unwrap_or(0),
        created_by: row.get::<Option<String>, _>("created_by").unwrap_or_default(),
        modified: row.get::<Option<i64>, _>("modified").unwrap_or(0),
        modified_by: row.get::<Option<String>, _>("modified_by").unwrap_or_default(),
    }
}

fn event_from_row(row: &sqlx::sqlite::SqliteRow) -> Event {
    let deleted: bool = row.get("deleted");
    if deleted {
        Event::tombstone(row.get::<String, _>("id"))
    } else {
        Event::Active(event_data_from_row(row))
    }
}

fn kind_str(kind: AccessKind) -> &'static str {
    match kind {
        AccessKind::Personal => "personal",
        AccessKind::App => "app",
        AccessKind::Shared => "shared",
    }
}

fn kind_from_str(s: &str) -> AccessKind {
    match s {
        "personal" => AccessKind::Personal,
        "shared" => AccessKind::Shared,
        _ => AccessKind::App,
    }
}

fn access_from_row(row: &sqlx::sqlite::SqliteRow) -> Access {
    let permissions: Vec<Permission> =
        serde_json::from_str(&row.get::<String, _>("permissions")).unwrap_or_default();
    Access {
        id: row.get("id"),
        token: row.get("token"),
        kind: kind_from_str(&row.get::<String, _>("kind")),
        name: row.get("name"),
        permissions,
        expires: row.get("expires"),
        created_by: row.get("created_by"),
        deleted: row.get("deleted"),
    }
}

fn parse_json(s: String) -> Value {
    serde_json::from_str(&s).unwrap_or(Value::Null)
}

fn time_of(event: &Event) -> f64 {
    match event {
        Event::Active(data) => data.time,
        Event::Deleted { .. } => 0.0,
    }
}

/// In-process filter mirroring the Mall's stream-query AND/OR/NOT and
/// time-range semantics for this store's own rows. Kept
/// deliberately simple — a real backend would push this into SQL, but the
/// shape must match exactly what `stratum-mall` expects back.
fn matches_query(event: &Event, query: &EventQuery) -> bool {
    let data = match event {
        Event::Active(d) => d,
        Event::Deleted { .. } => return query.include_trashed,
    };

    if !query.types.is_empty() {
        let type_ok = query.types.iter().any(|t| type_matches(t, &data.event_type));
        if !type_ok {
            return false;
        }
    }

    if !query.stream_blocks.is_empty() {
        let block_ok = query.stream_blocks.iter().any(|block| {
            let any_ok = block.any.is_empty()
                || block.any.iter().any(|s| data.stream_ids.contains(s));
            let all_ok = block.all.iter().all(|s| data.stream_ids.contains(s));
            let not_ok = !block.not.iter().any(|s| data.stream_ids.contains(s));
            any_ok && all_ok && not_ok
        });
        if !block_ok {
            return false;
        }
    }

    if query.from_time.is_some() || query.to_time.is_some() || query.running_at_or_after.is_some() {
        let end = data.end_time();
        let from = query.from_time.unwrap_or(f64::NEG_INFINITY);
        let to = query.to_time.unwrap_or(f64::INFINITY);
        let inside = data.time < to && end.unwrap_or(f64::INFINITY) > from;
        let running = end.is_none()
            && query
                .running_at_or_after
                .map(|floor| data.time >= floor || to >= floor)
                .unwrap_or(true);
        if !(inside || running) {
            return false;
        }
    }

    true
}

fn type_matches(pattern: &str, event_type: &str) -> bool {
    if let Some(class) = pattern.strip_suffix("/*") {
        event_type
            .split('/')
            .next()
            .map(|c| c == class)
            .unwrap_or(false)
    } else {
        pattern == event_type
    }
}
