//! Cross-process cache invalidation.
//!
//! Every process that caches per-user state publishes the same
//! [`Invalidation`] it applies locally onto a broker subject —
//! `cache.<userId>` for scoped invalidations, the distinguished
//! `cache.unset-user` for whole-user teardown — and listens back so
//! invalidations produced by *other* processes get applied here too.
//! Messages this process itself produced are dropped on receipt by
//! comparing an `origin` tag stamped on every publish.

pub mod error;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use stratum_cache::{Invalidation, InvalidationActionKind};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub use error::SynchroError;

const UNSET_USER_SUBJECT: &str = "cache.unset-user";

fn user_subject(user_id: &str) -> String {
    format!("cache.{user_id}")
}

fn action_str(action: InvalidationActionKind) -> &'static str {
    match action {
        InvalidationActionKind::UnsetStreams => "UNSET_STREAMS",
        InvalidationActionKind::UnsetAccessLogic => "UNSET_ACCESS_LOGIC",
        InvalidationActionKind::UnsetUserData => "UNSET_USER_DATA",
        InvalidationActionKind::UnsetUser => "UNSET_USER",
    }
}

fn action_from_str(s: &str) -> Option<InvalidationActionKind> {
    match s {
        "UNSET_STREAMS" => Some(InvalidationActionKind::UnsetStreams),
        "UNSET_ACCESS_LOGIC" => Some(InvalidationActionKind::UnsetAccessLogic),
        "UNSET_USER_DATA" => Some(InvalidationActionKind::UnsetUserData),
        "UNSET_USER" => Some(InvalidationActionKind::UnsetUser),
        _ => None,
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireInvalidation {
    origin: String,
    action: String,
    user_id: String,
    access_id: Option<String>,
    access_token: Option<String>,
}

impl WireInvalidation {
    fn encode(origin: &str, invalidation: &Invalidation) -> Result<Vec<u8>, SynchroError> {
        let wire = WireInvalidation {
            origin: origin.to_string(),
            action: action_str(invalidation.action).to_string(),
            user_id: invalidation.user_id.clone(),
            access_id: invalidation.access_id.clone(),
            access_token: invalidation.access_token.clone(),
        };
        Ok(serde_json::to_vec(&wire)?)
    }

    fn decode(bytes: &[u8]) -> Result<Self, SynchroError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn into_invalidation(self) -> Option<Invalidation> {
        Some(Invalidation {
            action: action_from_str(&self.action)?,
            user_id: self.user_id,
            access_id: self.access_id,
            access_token: self.access_token,
        })
    }
}

type OnInvalidation = Arc<dyn Fn(Invalidation) + Send + Sync>;

/// Broker-backed invalidation bus. One instance per process.
pub struct Synchro {
    client: async_nats::Client,
    origin: String,
    on_invalidation: OnInvalidation,
    /// `listenerMap[userId]`: lazily created on the first cached write for
    /// that user, torn down when that user's cache slot is fully unset.
    listeners: Arc<DashMap<String, JoinHandle<()>>>,
    unset_user_started: Arc<AtomicBool>,
}

impl Synchro {
    /// Connect to the broker with a short retry loop, then start the
    /// single process-wide listener on `cache.unset-user`.
    pub async fn connect(
        url: &str,
        on_invalidation: impl Fn(Invalidation) + Send + Sync + 'static,
    ) -> Result<Self, SynchroError> {
        const MAX_RETRIES: u32 = 5;
        const RETRY_DELAY: Duration = Duration::from_secs(2);

        let mut attempt = 0;
        let client = loop {
            match async_nats::ConnectOptions::new()
                .connection_timeout(Duration::from_secs(10))
                .ping_interval(Duration::from_secs(30))
                .max_reconnects(Some(10))
                .connect(url)
                .await
            {
                Ok(client) => break client,
                Err(e) => {
                    attempt += 1;
                    if attempt >= MAX_RETRIES {
                        return Err(SynchroError::Connect(e.to_string()));
                    }
                    warn!(attempt, %e, "synchro broker connection failed, retrying");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        };
        Ok(Self::with_client(client, on_invalidation))
    }

    /// Build a `Synchro` around an already-connected client — the path
    /// tests use to point at an in-process or ephemeral broker instance.
    pub fn with_client(
        client: async_nats::Client,
        on_invalidation: impl Fn(Invalidation) + Send + Sync + 'static,
    ) -> Self {
        let synchro = Synchro {
            client,
            origin: uuid::Uuid::new_v4().to_string(),
            on_invalidation: Arc::new(on_invalidation),
            listeners: Arc::new(DashMap::new()),
            unset_user_started: Arc::new(AtomicBool::new(false)),
        };
        synchro.start_unset_user_listener();
        synchro
    }

    /// Publish an invalidation to every other process and make sure this
    /// process is listening for further invalidations of `user_id`.
    pub async fn publish(&self, invalidation: &Invalidation) -> Result<(), SynchroError> {
        let subject = match invalidation.action {
            InvalidationActionKind::UnsetUser => UNSET_USER_SUBJECT.to_string(),
            _ => user_subject(&invalidation.user_id),
        };
        let payload = WireInvalidation::encode(&self.origin, invalidation)?;
        self.client
            .publish(subject, payload.into())
            .await
            .map_err(|e| SynchroError::Publish(e.to_string()))?;

        if !matches!(invalidation.action, InvalidationActionKind::UnsetUser) {
            self.ensure_listener(&invalidation.user_id).await?;
        }
        Ok(())
    }

    /// Start (if not already running) the per-user listener on
    /// `cache.<userId>`. Call whenever this process caches something new
    /// for `user_id` so later invalidations from other processes reach it.
    pub async fn ensure_listener(&self, user_id: &str) -> Result<(), SynchroError> {
        if self.listeners.contains_key(user_id) {
            return Ok(());
        }
        let mut subscriber = self
            .client
            .subscribe(user_subject(user_id))
            .await
            .map_err(|e| SynchroError::Subscribe(e.to_string()))?;

        let origin = self.origin.clone();
        let on_invalidation = self.on_invalidation.clone();
        let listeners = self.listeners.clone();
        let user_id = user_id.to_string();

        let handle = tokio::spawn({
            let user_id = user_id.clone();
            async move {
                while let Some(message) = subscriber.next().await {
                    match WireInvalidation::decode(&message.payload) {
                        Ok(wire) if wire.origin == origin => continue,
                        Ok(wire) => {
                            let torn_down = matches!(
                                wire.action.as_str(),
                                "UNSET_USER_DATA" | "UNSET_USER"
                            );
                            if let Some(invalidation) = wire.into_invalidation() {
                                on_invalidation(invalidation);
                            }
                            if torn_down {
                                listeners.remove(&user_id);
                                return;
                            }
                        }
                        Err(e) => debug!(%e, "dropping malformed invalidation message"),
                    }
                }
            }
        });

        self.listeners.insert(user_id, handle);
        Ok(())
    }

    fn start_unset_user_listener(&self) {
        if self
            .unset_user_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let client = self.client.clone();
        let origin = self.origin.clone();
        let on_invalidation = self.on_invalidation.clone();
        let listeners = self.listeners.clone();

        tokio::spawn(async move {
            let mut subscriber = match client.subscribe(UNSET_USER_SUBJECT).await {
                Ok(sub) => sub,
                Err(e) => {
                    warn!(%e, "failed to subscribe to cache.unset-user");
                    return;
                }
            };
            while let Some(message) = subscriber.next().await {
                match WireInvalidation::decode(&message.payload) {
                    Ok(wire) if wire.origin == origin => continue,
                    Ok(wire) => {
                        let user_id = wire.user_id.clone();
                        if let Some(invalidation) = wire.into_invalidation() {
                            on_invalidation(invalidation);
                        }
                        listeners.remove(&user_id);
                    }
                    Err(e) => debug!(%e, "dropping malformed invalidation message"),
                }
            }
        });
    }

    /// Number of users this process currently listens for — test/ops hook.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_round_trips_through_json() {
        let invalidation = Invalidation::unset_access_logic("user1", "acc1", "tok1");
        let bytes = WireInvalidation::encode("origin-a", &invalidation).unwrap();
        let decoded = WireInvalidation::decode(&bytes).unwrap();
        assert_eq!(decoded.origin, "origin-a");
        assert_eq!(decoded.user_id, "user1");
        let restored = decoded.into_invalidation().unwrap();
        assert_eq!(restored.action, InvalidationActionKind::UnsetAccessLogic);
        assert_eq!(restored.access_id.as_deref(), Some("acc1"));
        assert_eq!(restored.access_token.as_deref(), Some("tok1"));
    }

    #[test]
    fn unset_user_routes_to_distinguished_subject() {
        let invalidation = Invalidation::unset_user("user1");
        assert_eq!(
            match invalidation.action {
                InvalidationActionKind::UnsetUser => UNSET_USER_SUBJECT,
                _ => "",
            },
            "cache.unset-user"
        );
    }

    #[test]
    fn scoped_subject_is_per_user() {
        assert_eq!(user_subject("user1"), "cache.user1");
    }

    #[test]
    fn unknown_action_string_is_rejected() {
        assert!(action_from_str("NOT_A_REAL_ACTION").is_none());
    }
}
