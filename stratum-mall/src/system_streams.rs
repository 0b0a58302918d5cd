//! Built-in metadata streams mirroring account fields.
//!
//! Each declared field is backed by a stream `:system:<field>` (shown) or
//! `:_system:<field>` (private). The event currently in effect carries a
//! second stream membership, the shared `:_system:active` marker; updating
//! a field drops the marker from the previous event and creates a new one
//! that carries it, so `account.get` only ever sees the marked event while
//! history remains queryable for audit.

use chrono::Utc;
use serde_json::Value;
use stratum_data::domain::{Event, EventData};
use stratum_data_sqlx::LocalStore;

use crate::error::MallError;
use crate::mall::{Mall, MallEventQuery};
use crate::store::StreamAndBlock;

pub const ACTIVE_MARKER: &str = ":_system:active";

#[derive(Debug, Clone, Copy)]
pub struct SystemStreamField {
    pub id: &'static str,
    pub field: &'static str,
    pub is_indexed: bool,
    pub is_unique: bool,
    pub is_shown: bool,
    pub is_editable: bool,
    pub is_required_in_validation: bool,
    pub event_type: &'static str,
}

/// The default declared set: public `email`/`language`, private `storageUsed`.
/// A deployment with custom account fields would extend this list; nothing
/// else in this crate assumes it is exhaustive.
pub const DECLARED_FIELDS: &[SystemStreamField] = &[
    SystemStreamField {
        id: ":system:email",
        field: "email",
        is_indexed: true,
        is_unique: true,
        is_shown: true,
        is_editable: true,
        is_required_in_validation: true,
        event_type: "identifier/email",
    },
    SystemStreamField {
        id: ":system:language",
        field: "language",
        is_indexed: false,
        is_unique: false,
        is_shown: true,
        is_editable: true,
        is_required_in_validation: false,
        event_type: "language/iso-639-1",
    },
    SystemStreamField {
        id: ":_system:storage-used",
        field: "storageUsed",
        is_indexed: false,
        is_unique: false,
        is_shown: false,
        is_editable: false,
        is_required_in_validation: false,
        event_type: "data-quantity/b",
    },
];

#[derive(Debug, thiserror::Error)]
pub enum SystemStreamError {
    #[error("unknown account field: {0}")]
    UnknownField(String),

    #[error("{field} already in use")]
    ItemAlreadyExists { field: String, value: Value },

    #[error(transparent)]
    Mall(#[from] MallError),

    #[error(transparent)]
    Data(#[from] stratum_data::DataError),
}

impl From<SystemStreamError> for stratum_core::AppError {
    fn from(err: SystemStreamError) -> Self {
        match err {
            SystemStreamError::UnknownField(field) => {
                stratum_core::AppError::invalid_request_structure(format!("unknown account field: {field}"))
            }
            SystemStreamError::ItemAlreadyExists { field, value } => {
                stratum_core::AppError::item_already_exists(
                    format!("{field} already in use"),
                    serde_json::json!({ field: value }),
                )
            }
            SystemStreamError::Mall(e) => e.into(),
            SystemStreamError::Data(e) => e.into(),
        }
    }
}

pub struct SystemStreams;

impl SystemStreams {
    pub fn declared() -> &'static [SystemStreamField] {
        DECLARED_FIELDS
    }

    fn field_def(field: &str) -> Result<&'static SystemStreamField, SystemStreamError> {
        DECLARED_FIELDS
            .iter()
            .find(|f| f.field == field)
            .ok_or_else(|| SystemStreamError::UnknownField(field.to_string()))
    }

    /// Write the initial active event for every declared field at user
    /// creation time, using `values` where present and skipping fields with
    /// neither a supplied value nor one already defaulted upstream.
    pub async fn on_user_created(
        mall: &Mall,
        local_store: &LocalStore,
        user_id: &str,
        values: &std::collections::HashMap<String, Value>,
    ) -> Result<(), SystemStreamError> {
        for def in DECLARED_FIELDS {
            if let Some(value) = values.get(def.field) {
                Self::record_field(mall, local_store, user_id, def.field, value.clone()).await?;
            }
        }
        Ok(())
    }

    /// Read the value of the currently active event for `field`, if any.
    pub async fn get_field(mall: &Mall, user_id: &str, field: &str) -> Result<Option<Value>, SystemStreamError> {
        let def = Self::field_def(field)?;
        let active = Self::active_event(mall, user_id, def).await?;
        Ok(active.and_then(|e| match e {
            Event::Active(data) => Some(data.content),
            Event::Deleted { .. } => None,
        }))
    }

    /// Record a new value for `field`: deactivate the previous active
    /// event (if any) and create a new one carrying the marker.
    ///
    /// For `is_unique` fields, uniqueness is enforced store-wide via
    /// `local_store`'s `system_field_claims` table (the Mall's per-user view
    /// of events can't see other users' values at all, so the check has to
    /// happen there), not the stub it used to be.
    pub async fn record_field(
        mall: &Mall,
        local_store: &LocalStore,
        user_id: &str,
        field: &str,
        value: Value,
    ) -> Result<(), SystemStreamError> {
        let def = Self::field_def(field)?;
        let value_key = value.to_string();

        let previous = Self::active_event(mall, user_id, def).await?;
        let previous_value_key = previous.as_ref().and_then(|e| match e {
            Event::Active(data) => Some(data.content.to_string()),
            Event::Deleted { .. } => None,
        });

        if def.is_unique && previous_value_key.as_deref() != Some(value_key.as_str()) {
            match local_store.find_system_field_claim_owner(field, &value_key).await? {
                Some(owner) if owner != user_id => {
                    return Err(SystemStreamError::ItemAlreadyExists {
                        field: field.to_string(),
                        value,
                    });
                }
                _ => {}
            }
        }

        if let Some(Event::Active(mut current)) = previous {
            current.stream_ids.retain(|s| s != ACTIVE_MARKER);
            current.modified = Utc::now().timestamp();
            current.modified_by = "system".to_string();
            mall.events_update(user_id, current).await?;
        }

        let now = Utc::now().timestamp();
        let event = EventData {
            id: uuid::Uuid::new_v4().to_string(),
            stream_ids: vec![def.id.to_string(), ACTIVE_MARKER.to_string()],
            event_type: def.event_type.to_string(),
            content: value.clone(),
            time: now as f64,
            duration: None,
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
        mall.events_create(user_id, event).await?;

        if def.is_unique && previous_value_key.as_deref() != Some(value_key.as_str()) {
            if let Some(prev_key) = previous_value_key {
                local_store.release_system_field_claim(field, &prev_key).await?;
            }
            // A concurrent claim of the same value can still win the race
            // between the check above and this insert; that surfaces as
            // `item-already-exists` too rather than silently overwriting
            // the other user's ownership.
            local_store
                .claim_system_field(field, &value_key, user_id)
                .await
                .map_err(|_| SystemStreamError::ItemAlreadyExists {
                    field: field.to_string(),
                    value,
                })?;
        }
        Ok(())
    }

    async fn active_event(
        mall: &Mall,
        user_id: &str,
        def: &SystemStreamField,
    ) -> Result<Option<Event>, MallError> {
        let query = MallEventQuery {
            stream_blocks: vec![StreamAndBlock {
                any: Vec::new(),
                all: vec![def.id.to_string(), ACTIVE_MARKER.to_string()],
                not: Vec::new(),
            }],
            sort_ascending: false,
            limit: Some(1),
            ..Default::default()
        };
        let mut results = mall.events_get(user_id, &query).await?;
        Ok(if results.is_empty() { None } else { Some(results.remove(0)) })
    }
}
