use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use uuid::Uuid;

use ripple_types::events::ServerEvent;

/// A broadcast frame. `exclude` lets an actor's own connection drop the
/// frame (e.g. a new status is pushed to everyone but its owner).
#[derive(Debug, Clone)]
pub struct Broadcast {
    pub event: ServerEvent,
    pub exclude: Option<Uuid>,
}

/// Presence registry and shared notifier.
///
/// Maps each user to at most one live connection. Every component pushes
/// realtime events through here; an absent session is always a silent
/// no-op, because durable storage is the system of record and the push is
/// a best-effort optimization.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Broadcast channel — every connected client's send loop subscribes.
    broadcast_tx: broadcast::Sender<Broadcast>,

    /// Live sessions: user_id -> (conn_id, targeted sender).
    sessions: RwLock<HashMap<Uuid, (Uuid, mpsc::UnboundedSender<ServerEvent>)>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                sessions: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to broadcast frames. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<Broadcast> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connected clients.
    pub fn broadcast(&self, event: ServerEvent) {
        let _ = self.inner.broadcast_tx.send(Broadcast {
            event,
            exclude: None,
        });
    }

    /// Broadcast to everyone except one user (typically the actor).
    pub fn broadcast_except(&self, event: ServerEvent, exclude: Uuid) {
        let _ = self.inner.broadcast_tx.send(Broadcast {
            event,
            exclude: Some(exclude),
        });
    }

    /// Register a session for a user. A new connection for the same user
    /// silently replaces the old mapping — the previous connection's events
    /// are no longer addressable, but its socket is not forcibly closed.
    /// Returns (conn_id, receiver for targeted events).
    pub async fn register(&self, user_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<ServerEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .sessions
            .write()
            .await
            .insert(user_id, (conn_id, tx));
        (conn_id, rx)
    }

    /// Remove a session, but only if `conn_id` still owns it. A stale
    /// disconnect from a replaced connection must not tear down the
    /// successor's session.
    pub async fn unregister(&self, user_id: Uuid, conn_id: Uuid) {
        let mut sessions = self.inner.sessions.write().await;
        if let Some((stored_conn_id, _)) = sessions.get(&user_id) {
            if *stored_conn_id == conn_id {
                sessions.remove(&user_id);
            }
        }
    }

    /// Whether `conn_id` is still the live connection for `user_id`.
    pub async fn owns(&self, user_id: Uuid, conn_id: Uuid) -> bool {
        self.inner
            .sessions
            .read()
            .await
            .get(&user_id)
            .is_some_and(|(cid, _)| *cid == conn_id)
    }

    /// Presence lookup.
    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.inner.sessions.read().await.contains_key(&user_id)
    }

    /// Push a targeted event to a user's session. Fire-and-forget: an
    /// absent or already-closed session is silently skipped.
    pub async fn emit_to_user(&self, user_id: Uuid, event: ServerEvent) {
        let sessions = self.inner.sessions.read().await;
        if let Some((_, tx)) = sessions.get(&user_id) {
            let _ = tx.send(event);
        }
    }

    /// Snapshot of currently-online users.
    pub async fn online_users(&self) -> Vec<Uuid> {
        self.inner.sessions.read().await.keys().copied().collect()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ripple_types::api::MessageStatus;

    fn status_event(message_id: Uuid) -> ServerEvent {
        ServerEvent::MessageStatusUpdate {
            message_id,
            message_status: MessageStatus::Read,
        }
    }

    #[tokio::test]
    async fn targeted_emit_reaches_registered_session() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();
        let (_conn, mut rx) = dispatcher.register(user).await;

        assert!(dispatcher.is_online(user).await);

        let msg_id = Uuid::new_v4();
        dispatcher.emit_to_user(user, status_event(msg_id)).await;

        match rx.recv().await {
            Some(ServerEvent::MessageStatusUpdate { message_id, .. }) => {
                assert_eq!(message_id, msg_id)
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn emit_to_absent_user_is_silent() {
        let dispatcher = Dispatcher::new();
        // No session registered; must not panic or error.
        dispatcher
            .emit_to_user(Uuid::new_v4(), status_event(Uuid::new_v4()))
            .await;
    }

    #[tokio::test]
    async fn new_connection_replaces_old_session() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();

        let (old_conn, mut old_rx) = dispatcher.register(user).await;
        let (new_conn, mut new_rx) = dispatcher.register(user).await;
        assert_ne!(old_conn, new_conn);

        // Stale disconnect from the replaced connection is a no-op
        dispatcher.unregister(user, old_conn).await;
        assert!(dispatcher.is_online(user).await);
        assert!(dispatcher.owns(user, new_conn).await);

        dispatcher.emit_to_user(user, status_event(Uuid::new_v4())).await;
        assert!(new_rx.recv().await.is_some());
        assert!(old_rx.try_recv().is_err());

        // The current connection can tear the session down
        dispatcher.unregister(user, new_conn).await;
        assert!(!dispatcher.is_online(user).await);
    }

    #[tokio::test]
    async fn broadcast_carries_exclusion() {
        let dispatcher = Dispatcher::new();
        let actor = Uuid::new_v4();
        let mut rx = dispatcher.subscribe();

        dispatcher.broadcast_except(
            ServerEvent::StatusDeleted {
                status_id: Uuid::new_v4(),
            },
            actor,
        );

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.exclude, Some(actor));

        dispatcher.broadcast(ServerEvent::StatusDeleted {
            status_id: Uuid::new_v4(),
        });
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.exclude, None);
    }
}
