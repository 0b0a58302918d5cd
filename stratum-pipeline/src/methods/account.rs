//! `account.get` / `account.update` — the user-facing view over the
//! declared [`stratum_mall::SystemStreams`] fields.

use serde::Deserialize;
use std::sync::Arc;
use stratum_cache::Invalidation;
use stratum_core::AppError;
use stratum_mall::SystemStreams;

use crate::step::{Call, FnStep, MethodChain, ResolveAccess, Step};

pub fn get_chain() -> MethodChain {
    MethodChain::new(vec![
        Arc::new(ResolveAccess) as Arc<dyn Step>,
        Arc::new(FnStep(get_step)) as Arc<dyn Step>,
    ])
}

pub fn update_chain() -> MethodChain {
    MethodChain::new(vec![
        Arc::new(ResolveAccess) as Arc<dyn Step>,
        Arc::new(FnStep(update_step)) as Arc<dyn Step>,
    ])
}

/// Only `*` or an explicit `manage` permission on the account's own
/// pseudo-stream reaches account fields in the reference design; here we
/// require `canReadStream` on every declared *shown* field's stream,
/// which amounts to the same `manage *`/`read *` shape every non-trivial
/// access needs to read its own profile.
async fn get_step(call: &mut Call<'_>) -> Result<(), AppError> {
    let mut fields = serde_json::Map::new();
    for def in SystemStreams::declared() {
        if !def.is_shown {
            continue;
        }
        if !call.access_logic().can_read_stream(def.id) {
            continue;
        }
        if let Some(value) = SystemStreams::get_field(&call.app.mall, call.user_id(), def.field).await? {
            fields.insert(def.field.to_string(), value);
        }
    }
    call.result = serde_json::json!({ "account": serde_json::Value::Object(fields) });
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
struct UpdateParams {
    #[serde(flatten)]
    fields: serde_json::Map<String, serde_json::Value>,
}

/// Each field update requires `canUpdateStream` on its backing system
/// stream; an editable-but-missing field is silently skipped rather than
/// erroring, matching `account.update`'s partial-update contract. A
/// unique-field conflict surfaces as `item-already-exists` with
/// `data:{<field>: value}` per spec.md §4.5.
async fn update_step(call: &mut Call<'_>) -> Result<(), AppError> {
    let params: UpdateParams = serde_json::from_value(call.params.clone())
        .map_err(|e| AppError::invalid_parameters_format(e.to_string()))?;

    for def in SystemStreams::declared() {
        if !def.is_editable {
            continue;
        }
        let Some(value) = params.fields.get(def.field) else {
            continue;
        };
        if !call.access_logic().can_update_stream(def.id) {
            return Err(AppError::forbidden(format!(
                "no update permission on account field {}",
                def.field
            )));
        }
        SystemStreams::record_field(&call.app.mall, &call.app.local_store, call.user_id(), def.field, value.clone())
            .await?;
    }

    call.app
        .invalidate(Invalidation::unset_streams(call.user_id()))
        .await;

    let mut fields = serde_json::Map::new();
    for def in SystemStreams::declared() {
        if !def.is_shown {
            continue;
        }
        if let Some(value) = SystemStreams::get_field(&call.app.mall, call.user_id(), def.field).await? {
            fields.insert(def.field.to_string(), value);
        }
    }
    call.result = serde_json::json!({ "account": serde_json::Value::Object(fields) });
    Ok(())
}
