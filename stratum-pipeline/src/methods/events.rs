//! `events.get` / `events.create` / `events.update` / `events.delete`.

use serde::Deserialize;
use std::sync::Arc;
use stratum_cache::Invalidation;
use stratum_core::AppError;
use stratum_data::domain::{Event, EventData};
use stratum_mall::{MallEventQuery, StreamAndBlock};

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
    #[serde(default)]
    streams: Vec<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    types: Vec<String>,
    from_time: Option<f64>,
    to_time: Option<f64>,
    #[serde(default)]
    include_trashed: bool,
    #[serde(default = "default_sort_ascending")]
    sort_ascending: bool,
    limit: Option<u64>,
    skip: Option<u64>,
}

fn default_sort_ascending() -> bool {
    false
}

/// `streams`/`tags` both narrow to one AND-block each (an OR across the
/// two arrays as a whole) — the stream-query "OR of AND-blocks" shape
/// from spec.md §4.4 collapses to this for the single-array parameter
/// shape `events.get` exposes at the wire boundary.
async fn get_step(call: &mut Call<'_>) -> Result<(), AppError> {
    let params: GetParams = serde_json::from_value(call.params.clone())
        .map_err(|e| AppError::invalid_parameters_format(e.to_string()))?;

    // S2: naming a stream the caller cannot read is forbidden outright,
    // not silently filtered out of the result set.
    for stream_id in &params.streams {
        if !call.access_logic().can_read_stream(stream_id) {
            return Err(AppError::forbidden(format!(
                "no read permission on stream {stream_id}"
            )));
        }
    }
    for tag in &params.tags {
        if !call.access_logic().can_read_tag(tag) {
            return Err(AppError::forbidden(format!("no read permission on tag {tag}")));
        }
    }

    let mut stream_blocks = Vec::new();
    if !params.streams.is_empty() {
        stream_blocks.push(StreamAndBlock {
            any: params.streams.clone(),
            all: Vec::new(),
            not: Vec::new(),
        });
    }

    let query = MallEventQuery {
        stream_blocks,
        types: params.types,
        from_time: params.from_time,
        to_time: params.to_time,
        running_at_or_after: None,
        include_trashed: params.include_trashed,
        sort_ascending: params.sort_ascending,
        limit: params.limit,
        skip: params.skip,
    };
    let all = call.app.mall.events_get(call.user_id(), &query).await?;

    let logic = call.access_logic();
    let visible: Vec<Event> = all
        .into_iter()
        .filter(|e| event_is_readable(e, logic))
        .collect();

    call.result = serde_json::json!({ "events": visible });
    Ok(())
}

/// An event is visible if the caller can read any stream it's filed
/// under, or holds read on any of its tags — independent of whatever
/// `streams`/`tags` the query itself narrowed on.
fn event_is_readable(event: &Event, logic: &stratum_security::AccessLogic) -> bool {
    match event {
        Event::Deleted { .. } => true,
        Event::Active(data) => {
            data.stream_ids.iter().any(|s| logic.can_read_stream(s))
                || data.tags.iter().any(|t| logic.can_read_tag(t))
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateParams {
    #[serde(default)]
    id: String,
    stream_ids: Vec<String>,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    content: serde_json::Value,
    time: f64,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    tags: Vec<String>,
    description: Option<String>,
    #[serde(default)]
    client_data: serde_json::Value,
}

/// Contribute is required on *every* stream the event is filed under —
/// a caller that can contribute to `A` but not `B` may not create an
/// event spanning both.
fn require_contribute_on_all(call: &Call<'_>, stream_ids: &[String]) -> Result<(), AppError> {
    for stream_id in stream_ids {
        if !call.access_logic().can_contribute_to_stream(stream_id) {
            return Err(AppError::forbidden(format!(
                "no contribute permission on stream {stream_id}"
            )));
        }
    }
    Ok(())
}

async fn create_step(call: &mut Call<'_>) -> Result<(), AppError> {
    let params: CreateParams = serde_json::from_value(call.params.clone())
        .map_err(|e| AppError::invalid_parameters_format(e.to_string()))?;

    if params.stream_ids.is_empty() {
        return Err(AppError::invalid_request_structure(
            "event must reference at least one stream",
        ));
    }
    require_contribute_on_all(call, &params.stream_ids)?;

    let now = call.app.now();
    let author = call.ctx.tracking_author_id().unwrap_or_default();
    let mut event = EventData {
        id: if params.id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            params.id
        },
        stream_ids: params.stream_ids,
        event_type: params.event_type,
        content: params.content,
        time: params.time,
        duration: params.duration,
        tags: params.tags,
        description: params.description,
        attachments: Vec::new(),
        client_data: params.client_data,
        trashed: false,
        integrity: None,
        created: now,
        created_by: author.clone(),
        modified: now,
        modified_by: author,
    };
    event.integrity = Some(stratum_integrity::hash_value(&serde_json::to_value(&event).unwrap()));

    let created = call.app.mall.events_create(call.user_id(), event).await?;
    call.app
        .invalidate(Invalidation::unset_streams(call.user_id()))
        .await;
    call.result = serde_json::json!({ "event": created });
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateParams {
    id: String,
    stream_ids: Option<Vec<String>>,
    #[serde(rename = "type")]
    event_type: Option<String>,
    content: Option<serde_json::Value>,
    time: Option<f64>,
    #[serde(default)]
    duration: Option<Option<f64>>,
    tags: Option<Vec<String>>,
    description: Option<Option<String>>,
    client_data: Option<serde_json::Value>,
}

async fn update_step(call: &mut Call<'_>) -> Result<(), AppError> {
    let params: UpdateParams = serde_json::from_value(call.params.clone())
        .map_err(|e| AppError::invalid_parameters_format(e.to_string()))?;

    let mut event = fetch_event(call, &params.id).await?;
    require_update_on_all(call, &event.stream_ids)?;

    if let Some(stream_ids) = params.stream_ids {
        require_contribute_on_all(call, &stream_ids)?;
        event.stream_ids = stream_ids;
    }
    if let Some(event_type) = params.event_type {
        event.event_type = event_type;
    }
    if let Some(content) = params.content {
        event.content = content;
    }
    if let Some(time) = params.time {
        event.time = time;
    }
    if let Some(duration) = params.duration {
        event.duration = duration;
    }
    if let Some(tags) = params.tags {
        event.tags = tags;
    }
    if let Some(description) = params.description {
        event.description = description;
    }
    if let Some(client_data) = params.client_data {
        event.client_data = client_data;
    }
    event.modified = call.app.now();
    event.modified_by = call.ctx.tracking_author_id().unwrap_or_default();
    event.integrity = Some(stratum_integrity::hash_value(&serde_json::to_value(&event).unwrap()));

    let updated = call.app.mall.events_update(call.user_id(), event).await?;
    call.app
        .invalidate(Invalidation::unset_streams(call.user_id()))
        .await;
    call.result = serde_json::json!({ "event": updated });
    Ok(())
}

fn require_update_on_all(call: &Call<'_>, stream_ids: &[String]) -> Result<(), AppError> {
    for stream_id in stream_ids {
        if !call.access_logic().can_update_stream(stream_id) {
            return Err(AppError::forbidden(format!(
                "no update permission on stream {stream_id}"
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct DeleteParams {
    id: String,
}

/// First call trashes; a second call on an already-trashed event deletes
/// it for good, leaving only `{id, deleted}` per spec.md §3.
async fn delete_step(call: &mut Call<'_>) -> Result<(), AppError> {
    let params: DeleteParams = serde_json::from_value(call.params.clone())
        .map_err(|e| AppError::invalid_parameters_format(e.to_string()))?;

    let event = fetch_event(call, &params.id).await?;
    require_update_on_all(call, &event.stream_ids)?;

    if event.trashed {
        call.app.mall.events_delete(call.user_id(), &params.id).await?;
        call.result = serde_json::json!({ "eventDeletion": { "id": params.id } });
    } else {
        let mut trashed = event;
        trashed.trashed = true;
        trashed.modified = call.app.now();
        trashed.modified_by = call.ctx.tracking_author_id().unwrap_or_default();
        trashed.integrity = Some(stratum_integrity::hash_value(&serde_json::to_value(&trashed).unwrap()));
        let updated = call.app.mall.events_update(call.user_id(), trashed).await?;
        call.result = serde_json::json!({ "event": updated });
    }

    call.app
        .invalidate(Invalidation::unset_streams(call.user_id()))
        .await;
    Ok(())
}

async fn fetch_event(call: &Call<'_>, id: &str) -> Result<EventData, AppError> {
    let found = call
        .app
        .mall
        .events_get_one(call.user_id(), id)
        .await?
        .ok_or_else(|| AppError::unknown_resource(format!("no such event: {id}")))?;
    match found {
        Event::Active(data) => Ok(data),
        Event::Deleted { .. } => Err(AppError::unknown_resource(format!("no such event: {id}"))),
    }
}
