//! The Mall: dispatches stream/event operations to one or more
//! registered [`Store`]s, translating between full (globally-namespaced)
//! ids and each store's local id space.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex as AsyncMutex;

use stratum_data::domain::{Event, EventData, Stream};

use crate::error::MallError;
use crate::ids::{get_full_item_id, parse_store_id_and_store_item_id, StoreRef, LOCAL_STORE_ID};
use crate::store::{EventQuery, Store, StreamAndBlock, StreamQuery};

/// `streams.get` parameters at the Mall boundary — full ids throughout.
#[derive(Debug, Clone, Default)]
pub struct MallStreamQuery {
    pub parent_id: Option<String>,
    pub id: Option<String>,
    pub expand_children: bool,
    pub exclude_ids: Vec<String>,
    pub include_trashed: bool,
    pub include_deletions_since: Option<i64>,
}

/// `events.get` parameters at the Mall boundary — full ids throughout.
#[derive(Debug, Clone, Default)]
pub struct MallEventQuery {
    pub stream_blocks: Vec<StreamAndBlock>,
    pub types: Vec<String>,
    pub from_time: Option<f64>,
    pub to_time: Option<f64>,
    pub running_at_or_after: Option<f64>,
    pub include_trashed: bool,
    pub sort_ascending: bool,
    pub limit: Option<u64>,
    pub skip: Option<u64>,
}

/// Stub transaction handle. Stores that cannot transact are wrapped in a
/// stub whose `exec(fn)` simply invokes `fn` — every store currently
/// registered takes that path; coordinating a real multi-store
/// 2-phase commit is out of scope for the single `local` backend this
/// workspace ships.
pub struct MallTransaction;

impl MallTransaction {
    pub async fn exec<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        f().await
    }
}

pub struct Mall {
    /// Registration order matters: it is the order stores are
    /// concatenated in for `parentId == "*"` / unfiltered `events.get`.
    stores: Vec<Arc<dyn Store>>,
    by_id: HashMap<String, usize>,
    /// Per-user write-serialization locks (spec.md §5: "writes on the
    /// same stream/event are serialized by a per-user, per-resource-class
    /// lock"). One lock per user covers the whole stream/event resource
    /// class, which also closes the query-overlap → insert/update race
    /// window single-activity enforcement spans.
    write_locks: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl Mall {
    pub fn new() -> Self {
        Mall {
            stores: Vec::new(),
            by_id: HashMap::new(),
            write_locks: StdMutex::new(HashMap::new()),
        }
    }

    pub fn register_store(&mut self, store: Arc<dyn Store>) {
        let id = store.id().to_string();
        self.by_id.insert(id, self.stores.len());
        self.stores.push(store);
    }

    pub fn new_transaction(&self) -> MallTransaction {
        MallTransaction
    }

    /// The lock a caller must hold for the duration of a single
    /// streams/events mutation on `user_id`. Held across the `.await`
    /// points of the check-then-write sequence; released on every exit
    /// path, including a panic unwinding through the guard's `Drop`.
    fn user_write_lock(&self, user_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.write_locks.lock().expect("write_locks mutex poisoned");
        locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn store_for(&self, store_ref: &StoreRef) -> Result<&Arc<dyn Store>, MallError> {
        let id = match store_ref {
            StoreRef::Local => LOCAL_STORE_ID,
            StoreRef::Named(id) => id.as_str(),
        };
        self.by_id
            .get(id)
            .map(|idx| &self.stores[*idx])
            .ok_or_else(|| MallError::UnknownStore(id.to_string()))
    }

    // -- Streams ----------------------------------------------------------

    pub async fn streams_get(&self, user_id: &str, query: &MallStreamQuery) -> Result<Vec<Stream>, MallError> {
        if query.parent_id.as_deref() == Some("*") && query.id.is_none() {
            let mut all = Vec::new();
            for store in &self.stores {
                let store_ref = StoreRef::Named(store.id().to_string());
                let store_ref = if store.id() == LOCAL_STORE_ID { StoreRef::Local } else { store_ref };
                let local_query = StreamQuery {
                    parent_id: None,
                    id: None,
                    expand_children: query.expand_children,
                    exclude_ids: translate_ids_to_local(&store_ref, &query.exclude_ids),
                    include_trashed: query.include_trashed,
                    include_deletions_since: query.include_deletions_since,
                };
                let results = store.streams_get(user_id, &local_query).await?;
                all.extend(rewrite_streams(&store_ref, results));
            }
            return Ok(all);
        }

        let (store_ref, local_query) = self.translate_stream_query(query)?;
        let store = self.store_for(&store_ref)?;
        let results = store.streams_get(user_id, &local_query).await?;
        Ok(rewrite_streams(&store_ref, results))
    }

    fn translate_stream_query(&self, query: &MallStreamQuery) -> Result<(StoreRef, StreamQuery), MallError> {
        let id_ref = query.id.as_deref().map(parse_store_id_and_store_item_id);
        let parent_ref = query
            .parent_id
            .as_deref()
            .filter(|p| *p != "*")
            .map(parse_store_id_and_store_item_id);

        let store_ref = match (&id_ref, &parent_ref) {
            (Some((s1, _)), Some((s2, _))) if s1 != s2 => {
                return Err(MallError::InvalidRequestStructure(
                    "id and parentId belong to different stores".to_string(),
                ));
            }
            (Some((s, _)), _) => s.clone(),
            (_, Some((s, _))) => s.clone(),
            _ => StoreRef::Local,
        };

        let local_query = StreamQuery {
            parent_id: parent_ref.map(|(_, local)| local),
            id: id_ref.map(|(_, local)| local),
            expand_children: query.expand_children,
            exclude_ids: translate_ids_to_local(&store_ref, &query.exclude_ids),
            include_trashed: query.include_trashed,
            include_deletions_since: query.include_deletions_since,
        };
        Ok((store_ref, local_query))
    }

    pub async fn streams_create(&self, user_id: &str, mut stream: Stream) -> Result<Stream, MallError> {
        let lock = self.user_write_lock(user_id);
        let _guard = lock.lock().await;
        let (id_ref, id_local) = parse_store_id_and_store_item_id(&stream.id);
        let store_ref = match &stream.parent_id {
            Some(parent) => {
                let (parent_store, parent_local) = parse_store_id_and_store_item_id(parent);
                if parent_store != id_ref {
                    return Err(MallError::InvalidRequestStructure(
                        "id and parentId belong to different stores".to_string(),
                    ));
                }
                stream.parent_id = Some(parent_local);
                parent_store
            }
            None => id_ref,
        };
        stream.id = id_local;
        let store = self.store_for(&store_ref)?;
        let created = store.streams_create(user_id, stream).await?;
        Ok(rewrite_stream(&store_ref, created))
    }

    pub async fn streams_update(&self, user_id: &str, mut stream: Stream) -> Result<Stream, MallError> {
        let lock = self.user_write_lock(user_id);
        let _guard = lock.lock().await;
        let (id_ref, id_local) = parse_store_id_and_store_item_id(&stream.id);
        if let Some(parent) = &stream.parent_id {
            let (parent_store, parent_local) = parse_store_id_and_store_item_id(parent);
            if parent_store != id_ref {
                return Err(MallError::InvalidRequestStructure(
                    "id and parentId belong to different stores".to_string(),
                ));
            }
            stream.parent_id = Some(parent_local);
        }
        stream.id = id_local;
        let store = self.store_for(&id_ref)?;
        let updated = store.streams_update(user_id, stream).await?;
        Ok(rewrite_stream(&id_ref, updated))
    }

    pub async fn streams_delete(&self, user_id: &str, full_id: &str) -> Result<(), MallError> {
        let lock = self.user_write_lock(user_id);
        let _guard = lock.lock().await;
        let (store_ref, local_id) = parse_store_id_and_store_item_id(full_id);
        let store = self.store_for(&store_ref)?;
        store.streams_delete(user_id, &local_id).await
    }

    pub async fn stream_has_children(&self, user_id: &str, full_id: &str) -> Result<bool, MallError> {
        let (store_ref, local_id) = parse_store_id_and_store_item_id(full_id);
        let store = self.store_for(&store_ref)?;
        store.stream_has_children(user_id, &local_id).await
    }

    // -- Events -------------------------------------------------------

    pub async fn events_get(&self, user_id: &str, query: &MallEventQuery) -> Result<Vec<Event>, MallError> {
        let mut per_store: HashMap<String, (StoreRef, Vec<StreamAndBlock>)> = HashMap::new();

        if query.stream_blocks.is_empty() {
            for store in &self.stores {
                let store_ref = if store.id() == LOCAL_STORE_ID {
                    StoreRef::Local
                } else {
                    StoreRef::Named(store.id().to_string())
                };
                per_store.insert(store.id().to_string(), (store_ref, Vec::new()));
            }
        } else {
            for block in &query.stream_blocks {
                let store_ref = block_store(block)?;
                let local_block = translate_block(&store_ref, block);
                per_store
                    .entry(store_ref.as_str().to_string())
                    .or_insert_with(|| (store_ref.clone(), Vec::new()))
                    .1
                    .push(local_block);
            }
        }

        let mut all = Vec::new();
        for (_, (store_ref, blocks)) in per_store {
            let store = self.store_for(&store_ref)?;
            let local_query = EventQuery {
                stream_blocks: blocks,
                types: query.types.clone(),
                from_time: query.from_time,
                to_time: query.to_time,
                running_at_or_after: query.running_at_or_after,
                include_trashed: query.include_trashed,
                sort_ascending: query.sort_ascending,
                limit_hint: query.limit,
            };
            let results = store.events_get(user_id, &local_query).await?;
            all.extend(rewrite_events(&store_ref, results));
        }

        all.sort_by(|a, b| {
            let ta = event_time(a);
            let tb = event_time(b);
            if query.sort_ascending {
                ta.partial_cmp(&tb).unwrap_or(std::cmp::Ordering::Equal)
            } else {
                tb.partial_cmp(&ta).unwrap_or(std::cmp::Ordering::Equal)
            }
        });

        let skip = query.skip.unwrap_or(0) as usize;
        let limited: Vec<Event> = match query.limit {
            Some(limit) => all.into_iter().skip(skip).take(limit as usize).collect(),
            None => all.into_iter().skip(skip).collect(),
        };
        Ok(limited)
    }

    pub async fn events_get_one(&self, user_id: &str, full_id: &str) -> Result<Option<Event>, MallError> {
        let (store_ref, local_id) = parse_store_id_and_store_item_id(full_id);
        let store = self.store_for(&store_ref)?;
        let found = store.events_get_one(user_id, &local_id).await?;
        Ok(found.map(|e| rewrite_event(&store_ref, e)))
    }

    pub async fn events_create(&self, user_id: &str, mut event: EventData) -> Result<EventData, MallError> {
        let lock = self.user_write_lock(user_id);
        let _guard = lock.lock().await;
        let store_ref = self.resolve_event_store(&event)?;
        event.id = parse_store_id_and_store_item_id(&event.id).1;
        event.stream_ids = translate_ids_to_local(&store_ref, &event.stream_ids);
        let store = self.store_for(&store_ref)?;
        let created = store.events_create(user_id, event).await?;
        Ok(rewrite_event_data(&store_ref, created))
    }

    pub async fn events_update(&self, user_id: &str, mut event: EventData) -> Result<EventData, MallError> {
        let lock = self.user_write_lock(user_id);
        let _guard = lock.lock().await;
        let store_ref = self.resolve_event_store(&event)?;
        event.id = parse_store_id_and_store_item_id(&event.id).1;
        event.stream_ids = translate_ids_to_local(&store_ref, &event.stream_ids);
        let store = self.store_for(&store_ref)?;
        let updated = store.events_update(user_id, event).await?;
        Ok(rewrite_event_data(&store_ref, updated))
    }

    pub async fn events_delete(&self, user_id: &str, full_id: &str) -> Result<(), MallError> {
        let (store_ref, local_id) = parse_store_id_and_store_item_id(full_id);
        let store = self.store_for(&store_ref)?;
        store.events_delete(user_id, &local_id).await
    }

    /// A create/update is rejected if its `id` prefix disagrees with any
    /// `streamIds` prefix.
    fn resolve_event_store(&self, event: &EventData) -> Result<StoreRef, MallError> {
        if event.stream_ids.is_empty() {
            return Err(MallError::InvalidRequestStructure(
                "event must reference at least one stream".to_string(),
            ));
        }
        let (first_store, _) = parse_store_id_and_store_item_id(&event.stream_ids[0]);
        for stream_id in &event.stream_ids[1..] {
            let (store, _) = parse_store_id_and_store_item_id(stream_id);
            if store != first_store {
                return Err(MallError::InvalidRequestStructure(
                    "event streamIds span more than one store".to_string(),
                ));
            }
        }
        if !event.id.is_empty() {
            let (id_store, _) = parse_store_id_and_store_item_id(&event.id);
            if id_store != first_store {
                return Err(MallError::InvalidRequestStructure(
                    "event id and streamIds belong to different stores".to_string(),
                ));
            }
        }
        Ok(first_store)
    }
}

impl Default for Mall {
    fn default() -> Self {
        Self::new()
    }
}

fn block_store(block: &StreamAndBlock) -> Result<StoreRef, MallError> {
    let mut all_ids = block.any.iter().chain(block.all.iter()).chain(block.not.iter());
    let Some(first) = all_ids.next() else {
        return Ok(StoreRef::Local);
    };
    let (first_store, _) = parse_store_id_and_store_item_id(first);
    for id in all_ids {
        let (store, _) = parse_store_id_and_store_item_id(id);
        if store != first_store {
            return Err(MallError::InvalidRequestStructure(
                "stream query AND-block references more than one store".to_string(),
            ));
        }
    }
    Ok(first_store)
}

fn translate_block(store_ref: &StoreRef, block: &StreamAndBlock) -> StreamAndBlock {
    StreamAndBlock {
        any: translate_ids_to_local(store_ref, &block.any),
        all: translate_ids_to_local(store_ref, &block.all),
        not: translate_ids_to_local(store_ref, &block.not),
    }
}

fn translate_ids_to_local(store_ref: &StoreRef, ids: &[String]) -> Vec<String> {
    ids.iter()
        .map(|id| parse_store_id_and_store_item_id(id).1)
        .collect()
}

fn rewrite_stream(store_ref: &StoreRef, mut stream: Stream) -> Stream {
    stream.id = get_full_item_id(store_ref, &stream.id);
    stream.parent_id = stream.parent_id.map(|p| get_full_item_id(store_ref, &p));
    stream
}

fn rewrite_streams(store_ref: &StoreRef, streams: Vec<Stream>) -> Vec<Stream> {
    streams.into_iter().map(|s| rewrite_stream(store_ref, s)).collect()
}

fn rewrite_event_data(store_ref: &StoreRef, mut event: EventData) -> EventData {
    event.id = get_full_item_id(store_ref, &event.id);
    event.stream_ids = event
        .stream_ids
        .into_iter()
        .map(|s| get_full_item_id(store_ref, &s))
        .collect();
    event
}

fn rewrite_event(store_ref: &StoreRef, event: Event) -> Event {
    match event {
        Event::Active(data) => Event::Active(rewrite_event_data(store_ref, data)),
        Event::Deleted { id, deleted } => Event::Deleted {
            id: get_full_item_id(store_ref, &id),
            deleted,
        },
    }
}

fn rewrite_events(store_ref: &StoreRef, events: Vec<Event>) -> Vec<Event> {
    events.into_iter().map(|e| rewrite_event(store_ref, e)).collect()
}

fn event_time(event: &Event) -> f64 {
    match event {
        Event::Active(data) => data.time,
        Event::Deleted { .. } => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex2;

    /// An in-memory second backend, registered alongside `local`, purely
    /// to exercise the Mall's `:<storeId>:` id rewriting without pulling
    /// in `stratum-data-sqlx` — scenario S4.
    struct DummyStore {
        events: StdMutex2<HashMap<String, EventData>>,
    }

    impl DummyStore {
        fn new() -> Self {
            DummyStore {
                events: StdMutex2::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl Store for DummyStore {
        fn id(&self) -> &str {
            "dummy"
        }

        async fn streams_get(&self, _user_id: &str, _query: &StreamQuery) -> Result<Vec<Stream>, MallError> {
            Ok(Vec::new())
        }
        async fn streams_create(&self, _user_id: &str, stream: Stream) -> Result<Stream, MallError> {
            Ok(stream)
        }
        async fn streams_update(&self, _user_id: &str, stream: Stream) -> Result<Stream, MallError> {
            Ok(stream)
        }
        async fn streams_delete(&self, _user_id: &str, _stream_id: &str) -> Result<(), MallError> {
            Ok(())
        }
        async fn stream_has_children(&self, _user_id: &str, _stream_id: &str) -> Result<bool, MallError> {
            Ok(false)
        }
        async fn events_get(&self, _user_id: &str, _query: &EventQuery) -> Result<Vec<Event>, MallError> {
            Ok(self.events.lock().unwrap().values().cloned().map(Event::Active).collect())
        }
        async fn events_get_one(&self, _user_id: &str, event_id: &str) -> Result<Option<Event>, MallError> {
            Ok(self.events.lock().unwrap().get(event_id).cloned().map(Event::Active))
        }
        async fn events_create(&self, _user_id: &str, event: EventData) -> Result<EventData, MallError> {
            self.events.lock().unwrap().insert(event.id.clone(), event.clone());
            Ok(event)
        }
        async fn events_update(&self, _user_id: &str, event: EventData) -> Result<EventData, MallError> {
            self.events.lock().unwrap().insert(event.id.clone(), event.clone());
            Ok(event)
        }
        async fn events_delete(&self, _user_id: &str, event_id: &str) -> Result<(), MallError> {
            self.events.lock().unwrap().remove(event_id);
            Ok(())
        }
        async fn single_activity_siblings(
            &self,
            _user_id: &str,
            _stream_id: &str,
            _exclude_event_id: Option<&str>,
        ) -> Result<Vec<EventData>, MallError> {
            Ok(Vec::new())
        }
    }

    fn event_with(id: &str, stream_ids: Vec<String>) -> EventData {
        EventData {
            id: id.to_string(),
            stream_ids,
            event_type: "note/txt".to_string(),
            content: serde_json::Value::String("hi".to_string()),
            time: 0.0,
            duration: None,
            tags: vec![],
            description: None,
            attachments: vec![],
            client_data: serde_json::Value::Null,
            trashed: false,
            integrity: None,
            created: 0,
            created_by: "a1".to_string(),
            modified: 0,
            modified_by: "a1".to_string(),
        }
    }

    /// S4: posting an event whose `streamIds` carry a `:dummy:` prefix is
    /// created in the `dummy` store and comes back with its id rewritten
    /// to `:dummy:<local>`.
    #[tokio::test]
    async fn scenario_s4_store_id_is_rewritten_on_the_way_out() {
        let mut mall = Mall::new();
        mall.register_store(Arc::new(DummyStore::new()));

        let event = event_with("", vec![":dummy:mariana".to_string()]);
        let created = mall.events_create("user-1", event).await.unwrap();

        assert!(created.id.starts_with(":dummy:"));
        assert_eq!(created.stream_ids, vec![":dummy:mariana".to_string()]);
    }

    /// S4: an id/streamIds pair that disagree about which store they
    /// belong to is rejected as `invalid-request-structure`.
    #[tokio::test]
    async fn scenario_s4_mismatched_id_and_stream_store_is_rejected() {
        let mut mall = Mall::new();
        mall.register_store(Arc::new(DummyStore::new()));

        let event = event_with(":dummy:x", vec!["yo".to_string()]);
        let err = mall.events_create("user-1", event).await.unwrap_err();
        assert!(matches!(err, MallError::InvalidRequestStructure(_)));
    }

    #[tokio::test]
    async fn events_spanning_more_than_one_store_are_rejected() {
        let mut mall = Mall::new();
        mall.register_store(Arc::new(DummyStore::new()));

        let event = event_with("", vec!["local-stream".to_string(), ":dummy:other".to_string()]);
        let err = mall.events_create("user-1", event).await.unwrap_err();
        assert!(matches!(err, MallError::InvalidRequestStructure(_)));
    }
}
