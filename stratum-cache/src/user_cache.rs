//! Per-user in-memory cache: stream forests, `AccessLogic` objects (keyed
//! by both `accessId` and `token`), and `username → userId`.
//!
//! This is the component `stratum-synchro` invalidates from, in-process,
//! on receipt of a broker message — and that every mutating Mall
//! operation invalidates locally (the "apply the invalidation locally
//! before returning success" rule that preserves read-your-writes).

use dashmap::DashMap;
use std::sync::Arc;
use stratum_security::AccessLogic;

/// The four invalidation actions a cache message can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationActionKind {
    UnsetStreams,
    UnsetAccessLogic,
    UnsetUserData,
    UnsetUser,
}

/// Wire shape of a cache invalidation: `{action, userId, accessId?,
/// accessToken?}`. `stratum-synchro` publishes and receives exactly this.
#[derive(Debug, Clone)]
pub struct Invalidation {
    pub action: InvalidationActionKind,
    pub user_id: String,
    pub access_id: Option<String>,
    pub access_token: Option<String>,
}

impl Invalidation {
    pub fn unset_streams(user_id: impl Into<String>) -> Self {
        Invalidation {
            action: InvalidationActionKind::UnsetStreams,
            user_id: user_id.into(),
            access_id: None,
            access_token: None,
        }
    }

    pub fn unset_access_logic(
        user_id: impl Into<String>,
        access_id: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Invalidation {
            action: InvalidationActionKind::UnsetAccessLogic,
            user_id: user_id.into(),
            access_id: Some(access_id.into()),
            access_token: Some(access_token.into()),
        }
    }

    pub fn unset_user_data(user_id: impl Into<String>) -> Self {
        Invalidation {
            action: InvalidationActionKind::UnsetUserData,
            user_id: user_id.into(),
            access_id: None,
            access_token: None,
        }
    }

    pub fn unset_user(user_id: impl Into<String>) -> Self {
        Invalidation {
            action: InvalidationActionKind::UnsetUser,
            user_id: user_id.into(),
            access_id: None,
            access_token: None,
        }
    }
}

/// The per-user cache. Generic over `F`, the stream-forest snapshot type
/// owned by whichever Mall implementation builds it — this crate has no
/// dependency on `stratum-mall`.
pub struct UserCache<F: Clone + Send + Sync + 'static> {
    stream_forests: DashMap<String, F>,
    access_logic_by_id: DashMap<String, Arc<AccessLogic>>,
    access_logic_by_token: DashMap<String, Arc<AccessLogic>>,
    /// Reverse index so `UNSET_USER_DATA`/`UNSET_USER` can clear every
    /// access-logic entry belonging to a user without scanning both maps.
    user_access_keys: DashMap<String, Vec<(String, String)>>,
    username_to_user_id: DashMap<String, String>,
}

impl<F: Clone + Send + Sync + 'static> Default for UserCache<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: Clone + Send + Sync + 'static> UserCache<F> {
    pub fn new() -> Self {
        UserCache {
            stream_forests: DashMap::new(),
            access_logic_by_id: DashMap::new(),
            access_logic_by_token: DashMap::new(),
            user_access_keys: DashMap::new(),
            username_to_user_id: DashMap::new(),
        }
    }

    pub fn stream_forest(&self, user_id: &str) -> Option<F> {
        self.stream_forests.get(user_id).map(|e| e.clone())
    }

    pub fn set_stream_forest(&self, user_id: &str, forest: F) {
        self.stream_forests.insert(user_id.to_string(), forest);
    }

    pub fn access_logic_by_access_id(&self, access_id: &str) -> Option<Arc<AccessLogic>> {
        self.access_logic_by_id.get(access_id).map(|e| e.clone())
    }

    pub fn access_logic_by_token(&self, token: &str) -> Option<Arc<AccessLogic>> {
        self.access_logic_by_token.get(token).map(|e| e.clone())
    }

    pub fn set_access_logic(
        &self,
        user_id: &str,
        access_id: &str,
        token: &str,
        logic: Arc<AccessLogic>,
    ) {
        self.access_logic_by_id
            .insert(access_id.to_string(), logic.clone());
        self.access_logic_by_token
            .insert(token.to_string(), logic);
        self.user_access_keys
            .entry(user_id.to_string())
            .or_default()
            .push((access_id.to_string(), token.to_string()));
    }

    pub fn user_id_for_username(&self, username: &str) -> Option<String> {
        self.username_to_user_id.get(username).map(|e| e.clone())
    }

    pub fn set_user_id_for_username(&self, username: &str, user_id: &str) {
        self.username_to_user_id
            .insert(username.to_string(), user_id.to_string());
    }

    /// Apply an invalidation, clearing exactly the slots it names.
    pub fn apply(&self, invalidation: &Invalidation) {
        match invalidation.action {
            InvalidationActionKind::UnsetStreams => {
                self.stream_forests.remove(&invalidation.user_id);
            }
            InvalidationActionKind::UnsetAccessLogic => {
                if let Some(id) = &invalidation.access_id {
                    self.access_logic_by_id.remove(id);
                }
                if let Some(token) = &invalidation.access_token {
                    self.access_logic_by_token.remove(token);
                }
            }
            InvalidationActionKind::UnsetUserData => {
                self.stream_forests.remove(&invalidation.user_id);
                self.clear_user_access_logic(&invalidation.user_id);
            }
            InvalidationActionKind::UnsetUser => {
                self.stream_forests.remove(&invalidation.user_id);
                self.clear_user_access_logic(&invalidation.user_id);
                self.username_to_user_id
                    .retain(|_, uid| uid != &invalidation.user_id);
            }
        }
    }

    fn clear_user_access_logic(&self, user_id: &str) {
        if let Some((_, keys)) = self.user_access_keys.remove(user_id) {
            for (access_id, token) in keys {
                self.access_logic_by_id.remove(&access_id);
                self.access_logic_by_token.remove(&token);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_security::{Access, AccessKind};

    fn dummy_logic() -> Arc<AccessLogic> {
        struct EmptyForest;
        impl stratum_security::StreamForest for EmptyForest {
            fn descendants_of(&self, _stream_id: &str) -> Vec<String> {
                vec![]
            }
        }
        let access = Access {
            id: "a1".into(),
            token: "tok".into(),
            kind: AccessKind::App,
            name: "x".into(),
            permissions: vec![],
            expires: None,
            created_by: None,
            deleted: false,
        };
        Arc::new(AccessLogic::build(&access, &EmptyForest))
    }

    #[test]
    fn unset_streams_clears_only_stream_forest() {
        let cache: UserCache<String> = UserCache::new();
        cache.set_stream_forest("user-1", "forest-snapshot".to_string());
        cache.set_access_logic("user-1", "a1", "tok", dummy_logic());

        cache.apply(&Invalidation::unset_streams("user-1"));

        assert!(cache.stream_forest("user-1").is_none());
        assert!(cache.access_logic_by_access_id("a1").is_some());
    }

    #[test]
    fn unset_access_logic_clears_both_keys() {
        let cache: UserCache<String> = UserCache::new();
        cache.set_access_logic("user-1", "a1", "tok", dummy_logic());

        cache.apply(&Invalidation::unset_access_logic("user-1", "a1", "tok"));

        assert!(cache.access_logic_by_access_id("a1").is_none());
        assert!(cache.access_logic_by_token("tok").is_none());
    }

    #[test]
    fn unset_user_clears_everything_including_username_mapping() {
        let cache: UserCache<String> = UserCache::new();
        cache.set_stream_forest("user-1", "forest".to_string());
        cache.set_access_logic("user-1", "a1", "tok", dummy_logic());
        cache.set_user_id_for_username("alice", "user-1");

        cache.apply(&Invalidation::unset_user("user-1"));

        assert!(cache.stream_forest("user-1").is_none());
        assert!(cache.access_logic_by_access_id("a1").is_none());
        assert!(cache.user_id_for_username("alice").is_none());
    }

    #[test]
    fn unset_user_data_keeps_username_mapping() {
        let cache: UserCache<String> = UserCache::new();
        cache.set_user_id_for_username("alice", "user-1");
        cache.set_stream_forest("user-1", "forest".to_string());

        cache.apply(&Invalidation::unset_user_data("user-1"));

        assert!(cache.stream_forest("user-1").is_none());
        assert_eq!(cache.user_id_for_username("alice"), Some("user-1".to_string()));
    }
}
