//! Adapts `stratum_data_sqlx::LocalStore` to the Mall's [`Store`] trait,
//! including the single-activity overlap check that is a `local`-store-only
//! rule.

use async_trait::async_trait;
use stratum_data::domain::{Event, EventData, Stream};
use stratum_data_sqlx::LocalStore;

use crate::error::MallError;
use crate::store::{EventQuery, Store, StreamQuery};

pub struct LocalStoreAdapter {
    inner: LocalStore,
}

impl LocalStoreAdapter {
    pub fn new(inner: LocalStore) -> Self {
        LocalStoreAdapter { inner }
    }

    /// Reject (rather than truncate) a conflicting insert/update — the
    /// simpler of the two acceptable behaviors.
    async fn check_single_activity(
        &self,
        user_id: &str,
        event: &EventData,
        streams: &[Stream],
        exclude_event_id: Option<&str>,
    ) -> Result<(), MallError> {
        for stream in streams {
            if !stream.single_activity {
                continue;
            }
            let siblings = self
                .inner
                .single_activity_siblings(user_id, &stream.id, exclude_event_id)
                .await?;
            if siblings.iter().any(|sibling| sibling.overlaps(event)) {
                return Err(MallError::InvalidOperation(format!(
                    "event overlaps an existing activity on single-activity stream {}",
                    stream.id
                )));
            }
        }
        Ok(())
    }

    async fn streams_by_id(&self, user_id: &str, ids: &[String]) -> Result<Vec<Stream>, MallError> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(stream) = self.inner.get_stream(user_id, id).await? {
                out.push(stream);
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl Store for LocalStoreAdapter {
    fn id(&self) -> &str {
        "local"
    }

    fn supports_transactions(&self) -> bool {
        true
    }

    async fn streams_get(&self, user_id: &str, query: &StreamQuery) -> Result<Vec<Stream>, MallError> {
        let all = self.inner.all_streams(user_id, query.include_trashed).await?;
        Ok(filter_stream_tree(all, query))
    }

    async fn streams_create(&self, user_id: &str, stream: Stream) -> Result<Stream, MallError> {
        self.inner.create_stream(user_id, &stream).await?;
        Ok(stream)
    }

    async fn streams_update(&self, user_id: &str, stream: Stream) -> Result<Stream, MallError> {
        self.inner.update_stream(user_id, &stream).await?;
        Ok(stream)
    }

    async fn streams_delete(&self, user_id: &str, stream_id: &str) -> Result<(), MallError> {
        self.inner.delete_stream(user_id, stream_id).await?;
        Ok(())
    }

    async fn stream_has_children(&self, user_id: &str, stream_id: &str) -> Result<bool, MallError> {
        Ok(self.inner.stream_has_children(user_id, stream_id).await?)
    }

    async fn events_get(&self, user_id: &str, query: &EventQuery) -> Result<Vec<Event>, MallError> {
        Ok(self.inner.query_events(user_id, query).await?)
    }

    async fn events_get_one(&self, user_id: &str, event_id: &str) -> Result<Option<Event>, MallError> {
        Ok(self.inner.get_event(user_id, event_id).await?)
    }

    async fn events_create(&self, user_id: &str, event: EventData) -> Result<EventData, MallError> {
        let streams = self.streams_by_id(user_id, &event.stream_ids).await?;
        self.check_single_activity(user_id, &event, &streams, None).await?;
        self.inner.create_event(user_id, &event).await?;
        Ok(event)
    }

    async fn events_update(&self, user_id: &str, event: EventData) -> Result<EventData, MallError> {
        let streams = self.streams_by_id(user_id, &event.stream_ids).await?;
        self.check_single_activity(user_id, &event, &streams, Some(&event.id)).await?;
        self.inner.update_event(user_id, &event).await?;
        Ok(event)
    }

    async fn events_delete(&self, user_id: &str, event_id: &str) -> Result<(), MallError> {
        self.inner.delete_event(user_id, event_id).await?;
        Ok(())
    }

    async fn single_activity_siblings(
        &self,
        user_id: &str,
        stream_id: &str,
        exclude_event_id: Option<&str>,
    ) -> Result<Vec<EventData>, MallError> {
        Ok(self
            .inner
            .single_activity_siblings(user_id, stream_id, exclude_event_id)
            .await?)
    }
}

/// Apply `parentId`/`id`/`excludeIds`/`expandChildren` over a flat list of
/// a user's streams, assembling the requested subtree(s). A trashed child
/// is excluded for everyone except when the caller explicitly asked for
/// it via `id`.
fn filter_stream_tree(all: Vec<Stream>, query: &StreamQuery) -> Vec<Stream> {
    let mut by_parent: std::collections::HashMap<Option<String>, Vec<Stream>> =
        std::collections::HashMap::new();
    for stream in all.iter().cloned() {
        by_parent.entry(stream.parent_id.clone()).or_default().push(stream);
    }

    let roots: Vec<Stream> = if let Some(id) = &query.id {
        all.iter().filter(|s| &s.id == id).cloned().collect()
    } else {
        let parent_key = query.parent_id.clone().filter(|p| p != "*");
        by_parent.get(&parent_key).cloned().unwrap_or_default()
    };

    let mut out = Vec::new();
    for root in roots {
        if query.exclude_ids.contains(&root.id) {
            continue;
        }
        collect_subtree(&root, &by_parent, query.expand_children, &mut out, &query.exclude_ids);
    }
    out
}

fn collect_subtree(
    node: &Stream,
    by_parent: &std::collections::HashMap<Option<String>, Vec<Stream>>,
    expand: bool,
    out: &mut Vec<Stream>,
    exclude: &[String],
) {
    out.push(node.clone());
    if !expand {
        return;
    }
    if let Some(children) = by_parent.get(&Some(node.id.clone())) {
        for child in children {
            if exclude.contains(&child.id) {
                continue;
            }
            collect_subtree(child, by_parent, expand, out, exclude);
        }
    }
}
