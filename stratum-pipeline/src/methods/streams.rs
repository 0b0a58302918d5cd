//! `streams.get` / `streams.create` / `streams.update` / `streams.delete`.

use serde::Deserialize;
use std::sync::Arc;
use stratum_cache::Invalidation;
use stratum_core::AppError;
use stratum_data::domain::Stream;
use stratum_mall::MallStreamQuery;

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

pub fn update_chain() -> MethodChain {
    MethodChain::new(vec![
        Arc::new(ResolveAccess) as Arc<dyn Step>,
        Arc::new(FnStep(update_step)) as Arc<dyn Step>,
    ])
}

pub fn delete_chain() -> MethodChain {
    MethodChain::new(vec![
        Arc::new(ResolveAccess) as Arc<dyn Step>,
        Arc::new(FnStep(delete_step)) as Arc<dyn Step>,
    ])
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetParams {
    parent_id: Option<String>,
    id: Option<String>,
    #[serde(default)]
    expand_children: bool,
    #[serde(default)]
    exclude_ids: Vec<String>,
    #[serde(default)]
    include_trashed: bool,
    include_deletions_since: Option<i64>,
}

async fn get_step(call: &mut Call<'_>) -> Result<(), AppError> {
    let params: GetParams = serde_json::from_value(call.params.clone())
        .map_err(|e| AppError::invalid_parameters_format(e.to_string()))?;

    // Open question (b): a trashed child surfaces via an explicit `id`
    // lookup only for personal tokens; app/shared access never sees a
    // trashed stream regardless of the `includeTrashed` flag it passes.
    let include_trashed =
        params.include_trashed && call.access().kind == stratum_security::AccessKind::Personal;

    let query = MallStreamQuery {
        parent_id: params.parent_id,
        id: params.id,
        expand_children: params.expand_children,
        exclude_ids: params.exclude_ids,
        include_trashed,
        include_deletions_since: params.include_deletions_since,
    };
    let all = call.app.mall.streams_get(call.user_id(), &query).await?;

    // Only `canListStream` results surface — per spec.md §4.3's
    // design note, list and read are deliberately distinct capabilities.
    let logic = call.access_logic();
    let visible: Vec<Stream> = all.into_iter().filter(|s| logic.can_list_stream(&s.id)).collect();

    call.result = serde_json::json!({ "streams": visible });
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateParams {
    #[serde(default)]
    id: String,
    name: String,
    parent_id: Option<String>,
    #[serde(default)]
    client_data: serde_json::Value,
    #[serde(default)]
    single_activity: bool,
}

async fn create_step(call: &mut Call<'_>) -> Result<(), AppError> {
    let params: CreateParams = serde_json::from_value(call.params.clone())
        .map_err(|e| AppError::invalid_parameters_format(e.to_string()))?;

    let parent_key = params.parent_id.clone().unwrap_or_else(|| "*".to_string());
    if !call.access_logic().can_manage_stream(&parent_key) {
        return Err(AppError::forbidden(format!(
            "no manage permission on parent stream {parent_key}"
        )));
    }

    let now = call.app.now();
    let author = call.ctx.tracking_author_id().unwrap_or_default();
    let stream = Stream {
        id: if params.id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            params.id
        },
        name: params.name,
        parent_id: params.parent_id,
        client_data: params.client_data,
        trashed: false,
        created: now,
        created_by: author.clone(),
        modified: now,
        modified_by: author,
        single_activity: params.single_activity,
    };

    let created = call.app.mall.streams_create(call.user_id(), stream).await?;
    // A forest topology change invalidates every cached `AccessLogic` for
    // this user too, not just the forest snapshot — permission inheritance
    // (spec.md §4.3 rule 2) is computed over the forest at build time, so
    // a stale `AccessLogic` would keep reflecting the pre-mutation tree
    // (spec.md §8 scenario S2's "cache must be invalidated").
    call.app
        .invalidate(Invalidation::unset_user_data(call.user_id()))
        .await;
    call.result = serde_json::json!({ "stream": created });
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateParams {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    parent_id: Option<Option<String>>,
    #[serde(default)]
    client_data: Option<serde_json::Value>,
    #[serde(default)]
    single_activity: Option<bool>,
}

async fn update_step(call: &mut Call<'_>) -> Result<(), AppError> {
    let params: UpdateParams = serde_json::from_value(call.params.clone())
        .map_err(|e| AppError::invalid_parameters_format(e.to_string()))?;

    if !call.access_logic().can_manage_stream(&params.id) {
        return Err(AppError::forbidden(format!("no manage permission on stream {}", params.id)));
    }

    let mut stream = fetch_stream(call, &params.id).await?;

    if let Some(name) = params.name {
        stream.name = name;
    }
    if let Some(new_parent) = params.parent_id {
        let target = new_parent.clone().unwrap_or_else(|| "*".to_string());
        if !call.access_logic().can_manage_stream(&target) {
            return Err(AppError::forbidden(format!("no manage permission on target parent {target}")));
        }
        stream.parent_id = new_parent;
    }
    if let Some(client_data) = params.client_data {
        stream.client_data = client_data;
    }
    if let Some(single_activity) = params.single_activity {
        stream.single_activity = single_activity;
    }
    stream.modified = call.app.now();
    stream.modified_by = call.ctx.tracking_author_id().unwrap_or_default();

    let updated = call.app.mall.streams_update(call.user_id(), stream).await?;
    // Same reasoning as in `create_step`: a rename is harmless to cached
    // `AccessLogic`, but a reparent (`parentId` branch above) is not, and
    // this step can't tell which happened after the fact.
    call.app
        .invalidate(Invalidation::unset_user_data(call.user_id()))
        .await;
    call.result = serde_json::json!({ "stream": updated });
    Ok(())
}

#[derive(Debug, Deserialize)]
struct DeleteParams {
    id: String,
}

/// First call trashes (`trashed = true`); a second call on an
/// already-trashed, childless stream removes it for good — per
/// SPEC_FULL.md §3's "stream trashing" supplement.
async fn delete_step(call: &mut Call<'_>) -> Result<(), AppError> {
    let params: DeleteParams = serde_json::from_value(call.params.clone())
        .map_err(|e| AppError::invalid_parameters_format(e.to_string()))?;

    if !call.access_logic().can_manage_stream(&params.id) {
        return Err(AppError::forbidden(format!("no manage permission on stream {}", params.id)));
    }

    let stream = fetch_stream(call, &params.id).await?;

    if stream.trashed {
        if call.app.mall.stream_has_children(call.user_id(), &params.id).await? {
            return Err(AppError::invalid_operation(
                "cannot permanently delete a stream with children",
            ));
        }
        call.app.mall.streams_delete(call.user_id(), &params.id).await?;
        call.result = serde_json::json!({ "streamDeletion": { "id": params.id } });
    } else {
        let mut trashed = stream;
        trashed.trashed = true;
        trashed.modified = call.app.now();
        trashed.modified_by = call.ctx.tracking_author_id().unwrap_or_default();
        let updated = call.app.mall.streams_update(call.user_id(), trashed).await?;
        call.result = serde_json::json!({ "stream": updated });
    }

    // Trashing removes the stream from the forest any app/shared access
    // can see (Open Question (b)); permanent deletion removes it outright.
    // Either way the cached forest, and any `AccessLogic` built over it,
    // is stale.
    call.app
        .invalidate(Invalidation::unset_user_data(call.user_id()))
        .await;
    Ok(())
}

async fn fetch_stream(call: &Call<'_>, id: &str) -> Result<Stream, AppError> {
    // Must see trashed streams too: `delete_step`'s permanent-delete branch
    // re-fetches an already-trashed stream by id, and a `false` here would
    // make that branch unreachable (mirrors `fetch_event` in events.rs,
    // which uses `events_get_one` for the same reason). Callers already
    // gate on `can_manage_stream` before reaching this, so this doesn't
    // leak trashed visibility to callers who shouldn't have it.
    let query = MallStreamQuery {
        id: Some(id.to_string()),
        include_trashed: true,
        ..Default::default()
    };
    let mut found = call.app.mall.streams_get(call.user_id(), &query).await?;
    found
        .pop()
        .ok_or_else(|| AppError::unknown_resource(format!("no such stream: {id}")))
}
