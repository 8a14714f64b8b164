use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use uuid::Uuid;

use ripple_types::events::ServerEvent;

use crate::dispatcher::Dispatcher;

/// Typing auto-stops this long after the last `typing_start`.
const AUTO_STOP: Duration = Duration::from_secs(3);

struct TypingEntry {
    receiver_id: Uuid,
    generation: u64,
    timer: JoinHandle<()>,
}

/// Ephemeral per-(user, conversation) typing flags with debounced
/// auto-expiry. Never persisted; cleared wholesale on disconnect.
///
/// At most one timer is outstanding per (user, conversation): starting
/// again replaces the entry and aborts the previous timer under the same
/// lock acquisition. The generation counter closes the race where an
/// aborted timer is already past its sleep — an expiry only fires if its
/// generation still matches the stored entry.
#[derive(Clone)]
pub struct TypingTracker {
    inner: Arc<TypingInner>,
}

struct TypingInner {
    dispatcher: Dispatcher,
    entries: Mutex<HashMap<(Uuid, Uuid), TypingEntry>>,
    generation: AtomicU64,
}

impl TypingTracker {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            inner: Arc::new(TypingInner {
                dispatcher,
                entries: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Idle -> Typing (or re-arm while Typing). Notifies the receiver's
    /// session, if present, that the user is typing.
    pub async fn start(&self, user_id: Uuid, conversation_id: Uuid, receiver_id: Uuid) {
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);

        let tracker = self.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(AUTO_STOP).await;
            tracker.expire(user_id, conversation_id, generation).await;
        });

        {
            let mut entries = self.inner.entries.lock().expect("typing lock poisoned");
            if let Some(prev) = entries.insert(
                (user_id, conversation_id),
                TypingEntry {
                    receiver_id,
                    generation,
                    timer,
                },
            ) {
                prev.timer.abort();
            }
        }

        self.inner
            .dispatcher
            .emit_to_user(
                receiver_id,
                ServerEvent::UserTyping {
                    user_id,
                    conversation_id,
                    is_typing: true,
                },
            )
            .await;
    }

    /// Explicit Typing -> Idle. Cancels the pending timer and notifies the
    /// receiver that typing stopped.
    pub async fn stop(&self, user_id: Uuid, conversation_id: Uuid, receiver_id: Uuid) {
        let removed = {
            let mut entries = self.inner.entries.lock().expect("typing lock poisoned");
            entries.remove(&(user_id, conversation_id))
        };
        if let Some(entry) = removed {
            entry.timer.abort();
        }

        self.inner
            .dispatcher
            .emit_to_user(
                receiver_id,
                ServerEvent::UserTyping {
                    user_id,
                    conversation_id,
                    is_typing: false,
                },
            )
            .await;
    }

    /// Tear down every typing entry the user owns, without notifications.
    /// Called on disconnect so no timer fires against a gone session.
    pub fn clear_user(&self, user_id: Uuid) {
        let mut entries = self.inner.entries.lock().expect("typing lock poisoned");
        entries.retain(|(owner, _), entry| {
            if *owner == user_id {
                entry.timer.abort();
                false
            } else {
                true
            }
        });
    }

    pub fn is_typing(&self, user_id: Uuid, conversation_id: Uuid) -> bool {
        self.inner
            .entries
            .lock()
            .expect("typing lock poisoned")
            .contains_key(&(user_id, conversation_id))
    }

    /// Timer expiry: Typing -> Idle, but only if this timer's generation is
    /// still the stored one (a replacement or stop may have won the race).
    async fn expire(&self, user_id: Uuid, conversation_id: Uuid, generation: u64) {
        let expired = {
            let mut entries = self.inner.entries.lock().expect("typing lock poisoned");
            match entries.get(&(user_id, conversation_id)) {
                Some(entry) if entry.generation == generation => {
                    entries.remove(&(user_id, conversation_id))
                }
                _ => None,
            }
        };

        if let Some(entry) = expired {
            self.inner
                .dispatcher
                .emit_to_user(
                    entry.receiver_id,
                    ServerEvent::UserTyping {
                        user_id,
                        conversation_id,
                        is_typing: false,
                    },
                )
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::UnboundedReceiver;

    async fn setup() -> (TypingTracker, Uuid, UnboundedReceiver<ServerEvent>) {
        let dispatcher = Dispatcher::new();
        let receiver = Uuid::new_v4();
        let (_conn, rx) = dispatcher.register(receiver).await;
        (TypingTracker::new(dispatcher), receiver, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = vec![];
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn stop_count(events: &[ServerEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, ServerEvent::UserTyping { is_typing: false, .. }))
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn timer_fires_once_after_three_seconds() {
        let (tracker, receiver, mut rx) = setup().await;
        let user = Uuid::new_v4();
        let conv = Uuid::new_v4();

        tracker.start(user, conv, receiver).await;
        assert!(tracker.is_typing(user, conv));

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(!tracker.is_typing(user, conv));

        let events = drain(&mut rx);
        assert_eq!(stop_count(&events), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_starts_debounce_to_one_stop() {
        let (tracker, receiver, mut rx) = setup().await;
        let user = Uuid::new_v4();
        let conv = Uuid::new_v4();

        for _ in 0..5 {
            tracker.start(user, conv, receiver).await;
            tokio::time::sleep(Duration::from_millis(500)).await;
        }

        // Give the surviving timer room to fire, plus time any leaked timer
        // would have needed.
        tokio::time::sleep(Duration::from_secs(10)).await;

        let events = drain(&mut rx);
        assert_eq!(stop_count(&events), 1, "debounce must collapse to one stop");
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_stop_cancels_timer() {
        let (tracker, receiver, mut rx) = setup().await;
        let user = Uuid::new_v4();
        let conv = Uuid::new_v4();

        tracker.start(user, conv, receiver).await;
        tracker.stop(user, conv, receiver).await;
        assert!(!tracker.is_typing(user, conv));

        tokio::time::sleep(Duration::from_secs(5)).await;

        // One stop from the explicit call, none from the cancelled timer
        let events = drain(&mut rx);
        assert_eq!(stop_count(&events), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_clears_without_notifying() {
        let (tracker, receiver, mut rx) = setup().await;
        let user = Uuid::new_v4();
        let conv_a = Uuid::new_v4();
        let conv_b = Uuid::new_v4();

        tracker.start(user, conv_a, receiver).await;
        tracker.start(user, conv_b, receiver).await;
        drain(&mut rx); // discard the start notifications

        tracker.clear_user(user);
        assert!(!tracker.is_typing(user, conv_a));
        assert!(!tracker.is_typing(user, conv_b));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(stop_count(&drain(&mut rx)), 0, "no late notifications");
    }

    #[tokio::test(start_paused = true)]
    async fn conversations_track_independently() {
        let (tracker, receiver, mut rx) = setup().await;
        let user = Uuid::new_v4();
        let conv_a = Uuid::new_v4();
        let conv_b = Uuid::new_v4();

        tracker.start(user, conv_a, receiver).await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        tracker.start(user, conv_b, receiver).await;

        // conv_a expires at t=3, conv_b at t=5
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!tracker.is_typing(user, conv_a));
        assert!(tracker.is_typing(user, conv_b));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!tracker.is_typing(user, conv_b));

        assert_eq!(stop_count(&drain(&mut rx)), 2);
    }
}
