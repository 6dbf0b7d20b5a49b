//! Presence Registry - live connection tracking with debounced offline.
//!
//! Tracks every live connection per user and answers "is this user
//! reachable right now". A user's first connection flips them Online
//! immediately; losing the last one only flips them Offline after a grace
//! window with no reconnect, so page refreshes and brief network blips
//! never flap presence for observers.
//!
//! The registry is also the fan-out point: a push goes to every live
//! connection of a user, each guarded by the per-connection send timeout.
//! A connection that cannot keep up is dropped through the normal
//! disconnect path; siblings and other users are unaffected.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, RwLock};

use crate::domain::foundation::{ConnectionId, DeviceTag, Timestamp, UserId};
use crate::domain::presence::{PresenceChange, PresenceState, PresenceStatus};
use crate::ports::{ConnectionSink, PushFrame};

/// Capacity of the presence-change broadcast channel.
const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// One live connection: identity plus its push sink.
#[derive(Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub user_id: UserId,
    pub device_tag: DeviceTag,
    pub connected_at: Timestamp,
    pub sink: Arc<dyn ConnectionSink>,
}

impl ConnectionHandle {
    pub fn new(user_id: UserId, device_tag: DeviceTag, sink: Arc<dyn ConnectionSink>) -> Self {
        Self {
            id: ConnectionId::new(),
            user_id,
            device_tag,
            connected_at: Timestamp::now(),
            sink,
        }
    }
}

#[derive(Default)]
struct UserEntry {
    connections: HashMap<ConnectionId, ConnectionHandle>,
    last_seen_at: Option<Timestamp>,
    /// Bumped on every online/offline-relevant change; a pending grace
    /// timer only fires if the epoch it captured is still current.
    grace_epoch: u64,
}

struct Inner {
    users: RwLock<HashMap<UserId, UserEntry>>,
    changes: broadcast::Sender<PresenceChange>,
    grace: Duration,
    send_timeout: Duration,
}

/// Tracks live connections per user and fans frames out to them.
///
/// Cheap to clone; all clones share one registry.
#[derive(Clone)]
pub struct PresenceRegistry {
    inner: Arc<Inner>,
}

impl PresenceRegistry {
    pub fn new(grace: Duration, send_timeout: Duration) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                users: RwLock::new(HashMap::new()),
                changes,
                grace,
                send_timeout,
            }),
        }
    }

    /// Registers a live connection.
    ///
    /// A 0→1 transition emits "went online" immediately. Re-registering
    /// an already-known connection id replaces the handle without a
    /// second transition.
    pub async fn connect(&self, handle: ConnectionHandle) {
        let user_id = handle.user_id;
        let mut users = self.inner.users.write().await;
        let entry = users.entry(user_id).or_default();

        let was_offline = entry.connections.is_empty();
        entry.connections.insert(handle.id, handle);
        // Cancel any pending offline timer.
        entry.grace_epoch += 1;
        drop(users);

        if was_offline {
            tracing::debug!(user_id = %user_id, "user went online");
            let _ = self.inner.changes.send(PresenceChange {
                user_id,
                status: PresenceStatus::Online,
                at: Timestamp::now(),
            });
        }
    }

    /// Removes a connection. Unknown users or connection ids are a no-op.
    ///
    /// When the user's connection set becomes empty a grace timer starts;
    /// if no reconnect arrives before it expires, "went offline" fires
    /// and `last_seen_at` is recorded.
    pub async fn disconnect(&self, user_id: UserId, connection_id: ConnectionId) {
        let mut users = self.inner.users.write().await;
        let Some(entry) = users.get_mut(&user_id) else {
            return;
        };
        if entry.connections.remove(&connection_id).is_none() {
            return;
        }
        if !entry.connections.is_empty() {
            return;
        }

        entry.grace_epoch += 1;
        let epoch = entry.grace_epoch;
        drop(users);

        let registry = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(registry.inner.grace).await;
            registry.finish_offline(user_id, epoch).await;
        });
    }

    /// Applies the offline transition if the grace window elapsed
    /// undisturbed.
    async fn finish_offline(&self, user_id: UserId, epoch: u64) {
        let mut users = self.inner.users.write().await;
        let Some(entry) = users.get_mut(&user_id) else {
            return;
        };
        if entry.grace_epoch != epoch || !entry.connections.is_empty() {
            // Reconnected (or raced another disconnect) inside the window.
            return;
        }

        let at = Timestamp::now();
        entry.last_seen_at = Some(at);
        drop(users);

        tracing::debug!(user_id = %user_id, "user went offline");
        let _ = self.inner.changes.send(PresenceChange {
            user_id,
            status: PresenceStatus::Offline,
            at,
        });
    }

    /// Whether the user has at least one live connection.
    pub async fn is_online(&self, user_id: UserId) -> bool {
        self.inner
            .users
            .read()
            .await
            .get(&user_id)
            .map(|e| !e.connections.is_empty())
            .unwrap_or(false)
    }

    /// Observable presence of one user.
    pub async fn presence(&self, user_id: UserId) -> PresenceState {
        let users = self.inner.users.read().await;
        match users.get(&user_id) {
            Some(entry) => {
                let count = entry.connections.len();
                PresenceState {
                    status: if count > 0 {
                        PresenceStatus::Online
                    } else {
                        PresenceStatus::Offline
                    },
                    last_seen_at: entry.last_seen_at,
                    active_connection_count: count,
                }
            }
            None => PresenceState::offline(),
        }
    }

    /// Subscribes to presence transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<PresenceChange> {
        self.inner.changes.subscribe()
    }

    /// The subset of `user_ids` that is currently online.
    pub async fn online_among(&self, user_ids: &[UserId]) -> Vec<UserId> {
        let users = self.inner.users.read().await;
        user_ids
            .iter()
            .copied()
            .filter(|id| {
                users
                    .get(id)
                    .map(|e| !e.connections.is_empty())
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Pushes a frame to every live connection of a user.
    ///
    /// Returns the number of connections that accepted the frame. A push
    /// that errors or exceeds the send timeout drops that connection via
    /// the normal disconnect path; delivery to siblings continues.
    /// Connections are served sequentially, preserving per-user frame
    /// order.
    pub async fn push_to_user(&self, user_id: UserId, frame: PushFrame) -> usize {
        let sinks: Vec<(ConnectionId, Arc<dyn ConnectionSink>)> = {
            let users = self.inner.users.read().await;
            match users.get(&user_id) {
                Some(entry) => entry
                    .connections
                    .values()
                    .map(|h| (h.id, Arc::clone(&h.sink)))
                    .collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        for (connection_id, sink) in sinks {
            match tokio::time::timeout(self.inner.send_timeout, sink.push(frame.clone())).await {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    tracing::warn!(
                        user_id = %user_id,
                        connection_id = %connection_id,
                        error = %e,
                        "push failed, dropping connection"
                    );
                    self.disconnect(user_id, connection_id).await;
                }
                Err(_) => {
                    tracing::warn!(
                        user_id = %user_id,
                        connection_id = %connection_id,
                        timeout_ms = self.inner.send_timeout.as_millis() as u64,
                        "push timed out, dropping connection"
                    );
                    self.disconnect(user_id, connection_id).await;
                }
            }
        }
        delivered
    }

    /// Total live connections across all users (for monitoring).
    pub async fn total_connections(&self) -> usize {
        self.inner
            .users
            .read()
            .await
            .values()
            .map(|e| e.connections.len())
            .sum()
    }
}
