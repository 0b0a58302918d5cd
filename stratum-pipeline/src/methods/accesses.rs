//! `accesses.get` / `accesses.create` / `accesses.delete`.

use serde::Deserialize;
use std::sync::Arc;
use stratum_cache::Invalidation;
use stratum_core::AppError;
use stratum_security::{Access, AccessKind, Permission};

use crate::state::{find_access_by_id, new_token};
use crate::step::{Call, FnStep, MethodChain, ResolveAccess, Step};

pub fn get_chain() -> MethodChain {
    MethodChain::new(vec![
        Arc::new(ResolveAccess) as Arc<dyn Step>,
        Arc::new(FnStep(get_step)) as Arc<dyn Step>,
    ])
}

pub fn create_chain() -> MethodChain {
    MethodChain::new(vec![
        Arc::new(ResolveAccess) as Arc<dyn Step>,
        Arc::new(FnStep(create_step)) as Arc<dyn Step>,
    ])
}

pub fn delete_chain() -> MethodChain {
    MethodChain::new(vec![
        Arc::new(ResolveAccess) as Arc<dyn Step>,
        Arc::new(FnStep(delete_step)) as Arc<dyn Step>,
    ])
}

async fn get_step(call: &mut Call<'_>) -> Result<(), AppError> {
    let accesses = call.app.local_store.list_accesses(call.user_id(), false).await?;
    call.result = serde_json::json!({ "accesses": accesses });
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateParams {
    name: String,
    #[serde(default = "default_kind")]
    kind: AccessKind,
    #[serde(default)]
    permissions: Vec<Permission>,
    expires: Option<i64>,
}

fn default_kind() -> AccessKind {
    AccessKind::Shared
}

/// `canCreateAccess`: a `personal` access may create anything; an `app`
/// access may only create `shared` accesses whose every permission is
/// covered by one of its own, at an equal-or-higher level (spec.md
/// §4.3). A new access racing a duplicate-token insert is recovered by
/// re-reading the existing row rather than failing per spec.md §7(b);
/// tokens are generated with enough entropy that this is a belt-and-
/// braces path, not an expected one.
async fn create_step(call: &mut Call<'_>) -> Result<(), AppError> {
    let params: CreateParams = serde_json::from_value(call.params.clone())
        .map_err(|e| AppError::invalid_parameters_format(e.to_string()))?;

    let candidate = Access {
        id: uuid::Uuid::new_v4().to_string(),
        token: new_token(),
        kind: params.kind,
        name: params.name,
        permissions: params.permissions,
        expires: params.expires,
        created_by: Some(call.access().id.clone()),
        deleted: false,
    };

    if !call.access_logic().can_create_access(call.access(), &candidate) {
        return Err(AppError::forbidden(
            "insufficient permissions to create this access",
        ));
    }

    call.app.local_store.create_access(call.user_id(), &candidate).await?;
    call.app
        .invalidate(Invalidation::unset_streams(call.user_id()))
        .await;
    call.result = serde_json::json!({ "access": candidate });
    Ok(())
}

#[derive(Debug, Deserialize)]
struct DeleteParams {
    id: String,
}

/// `canDeleteAccess`, including the `selfRevoke` feature-permission gate
/// from scenario S6.
async fn delete_step(call: &mut Call<'_>) -> Result<(), AppError> {
    let params: DeleteParams = serde_json::from_value(call.params.clone())
        .map_err(|e| AppError::invalid_parameters_format(e.to_string()))?;

    let target = find_access_by_id(call.app, call.user_id(), &params.id).await?;

    if !call.access_logic().can_delete_access(call.access(), &target) {
        return Err(AppError::forbidden(format!(
            "not permitted to delete access {}",
            params.id
        )));
    }

    call.app.local_store.soft_delete_access(call.user_id(), &params.id).await?;
    call.app
        .invalidate(Invalidation::unset_access_logic(
            call.user_id(),
            target.id.clone(),
            target.token.clone(),
        ))
        .await;
    call.result = serde_json::json!({ "accessDeletion": { "id": params.id } });
    Ok(())
}
