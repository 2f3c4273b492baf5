use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::bus::EventBus;
use crate::protocol::{user_channel, Event, PubSubFrame};
use crate::pubsub::{PubSub, PubSubHandler};

/// Send side of one live client session. Events queue FIFO per session;
/// the write task drains the queue onto the socket.
struct SessionHandle {
    id: Uuid,
    tx: mpsc::UnboundedSender<Event>,
}

/// The per-node session table, shared with pub/sub callbacks. Callbacks
/// capture only this registry (never the pub/sub client), so delivery from
/// a remote node can never publish outward again.
#[derive(Default)]
struct SessionRegistry {
    sessions: DashMap<Uuid, Vec<SessionHandle>>,
}

impl SessionRegistry {
    /// Write the event to every live session of the user, pruning any
    /// session whose receiver is gone.
    fn deliver_local(&self, user_id: Uuid, event: &Event) {
        if let Some(mut entry) = self.sessions.get_mut(&user_id) {
            entry.retain(|session| {
                let alive = session.tx.send(event.clone()).is_ok();
                if !alive {
                    tracing::debug!(
                        component = "hub",
                        user_id = %user_id,
                        session_id = %session.id,
                        "pruned dead session"
                    );
                }
                alive
            });
        }
    }
}

/// Per-node registry of live sessions. Subscribes the node to a user's
/// fan-out channel while at least one of their sessions is connected here.
pub struct Hub {
    instance_id: String,
    registry: Arc<SessionRegistry>,
    pubsub: Arc<dyn PubSub>,
    bus: Arc<dyn EventBus>,
}

impl Hub {
    pub fn new(instance_id: String, pubsub: Arc<dyn PubSub>, bus: Arc<dyn EventBus>) -> Self {
        Self {
            instance_id,
            registry: Arc::new(SessionRegistry::default()),
            pubsub,
            bus,
        }
    }

    /// Add a session. The first session for a user on this node subscribes
    /// the node to the user's channel and announces the connect on the bus.
    pub async fn register(&self, user_id: Uuid, tx: mpsc::UnboundedSender<Event>) -> Uuid {
        let session_id = Uuid::new_v4();
        let first = {
            let mut entry = self.registry.sessions.entry(user_id).or_default();
            entry.push(SessionHandle { id: session_id, tx });
            entry.len() == 1
        };

        if first {
            let registry = self.registry.clone();
            let own_instance = self.instance_id.clone();
            let handler: PubSubHandler = Arc::new(move |frame: PubSubFrame| {
                // This node's own publishes come back around; drop them.
                if frame.instance_id == own_instance {
                    return;
                }
                registry.deliver_local(user_id, &frame.event);
            });

            if let Err(e) = self.pubsub.subscribe(&user_channel(user_id), handler).await {
                tracing::warn!(component = "hub", user_id = %user_id, error = %e, "channel subscribe failed");
            }
            let event = Event::user_connected(user_id);
            if let Err(e) = self.bus.publish(event.kind.routing_key(), &event).await {
                tracing::warn!(component = "hub", user_id = %user_id, error = %e, "connect announce failed");
            }
            tracing::info!(component = "hub", user_id = %user_id, "user connected");
        }

        session_id
    }

    /// Remove a session. The last session for a user on this node releases
    /// the channel subscription and announces the disconnect.
    pub async fn unregister(&self, user_id: Uuid, session_id: Uuid) {
        let last = match self.registry.sessions.get_mut(&user_id) {
            Some(mut entry) => {
                entry.retain(|session| session.id != session_id);
                entry.is_empty()
            }
            None => false,
        };

        if last {
            self.registry
                .sessions
                .remove_if(&user_id, |_, sessions| sessions.is_empty());

            if let Err(e) = self.pubsub.unsubscribe(&user_channel(user_id)).await {
                tracing::warn!(component = "hub", user_id = %user_id, error = %e, "channel unsubscribe failed");
            }
            let event = Event::user_disconnected(user_id);
            if let Err(e) = self.bus.publish(event.kind.routing_key(), &event).await {
                tracing::warn!(component = "hub", user_id = %user_id, error = %e, "disconnect announce failed");
            }
            tracing::info!(component = "hub", user_id = %user_id, "user disconnected");
        }
    }

    /// Broadcast primitive: local sessions first, then the user's channel
    /// for whichever node holds their other sessions. Channel publish
    /// failure is logged and swallowed; the local write already happened.
    pub async fn deliver_to_user(&self, user_id: Uuid, event: &Event) {
        self.registry.deliver_local(user_id, event);

        let frame = PubSubFrame {
            instance_id: self.instance_id.clone(),
            event: event.clone(),
        };
        if let Err(e) = self.pubsub.publish(&user_channel(user_id), &frame).await {
            tracing::warn!(
                component = "hub",
                user_id = %user_id,
                error = %e,
                "cross-node publish failed; local sessions already served"
            );
        }
    }

    pub fn local_session_count(&self, user_id: Uuid) -> usize {
        self.registry
            .sessions
            .get(&user_id)
            .map(|entry| entry.len())
            .unwrap_or(0)
    }

    /// Drop every session and release every channel subscription. Write
    /// tasks observe their queue closing and drain out.
    pub async fn shutdown(&self) {
        let users: Vec<Uuid> = self
            .registry
            .sessions
            .iter()
            .map(|entry| *entry.key())
            .collect();
        self.registry.sessions.clear();

        for user_id in users {
            let _ = self.pubsub.unsubscribe(&user_channel(user_id)).await;
        }
        tracing::info!(component = "hub", "all sessions closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use crate::protocol::EventType;
    use crate::pubsub::MemoryPubSub;

    fn test_hub(instance: &str, pubsub: Arc<MemoryPubSub>) -> Hub {
        Hub::new(
            instance.to_string(),
            pubsub,
            Arc::new(MemoryBus::new()),
        )
    }

    #[tokio::test]
    async fn delivers_locally_in_fifo_order() {
        let hub = test_hub("n1", Arc::new(MemoryPubSub::new()));
        let user = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.register(user, tx).await;

        let first = Event::typing_indicator(Uuid::new_v4(), user, true);
        let second = Event::typing_indicator(Uuid::new_v4(), user, false);
        hub.deliver_to_user(user, &first).await;
        hub.deliver_to_user(user, &second).await;

        assert_eq!(rx.recv().await.unwrap().payload["isTyping"], true);
        assert_eq!(rx.recv().await.unwrap().payload["isTyping"], false);
    }

    #[tokio::test]
    async fn own_echo_is_never_redelivered() {
        let pubsub = Arc::new(MemoryPubSub::new());
        let hub = test_hub("n1", pubsub.clone());
        let user = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.register(user, tx).await;

        // A frame stamped with this node's own instance id must be dropped
        // by the subscription callback.
        let own_frame = PubSubFrame {
            instance_id: "n1".into(),
            event: Event::user_connected(user),
        };
        pubsub.publish(&user_channel(user), &own_frame).await.unwrap();
        assert!(rx.try_recv().is_err());

        // A remote frame goes through.
        let remote_frame = PubSubFrame {
            instance_id: "n2".into(),
            event: Event::user_connected(user),
        };
        pubsub
            .publish(&user_channel(user), &remote_frame)
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().kind, EventType::UserConnected);
    }

    #[tokio::test]
    async fn cross_node_delivery_yields_exactly_one_copy_per_session() {
        let pubsub = Arc::new(MemoryPubSub::new());
        let n1 = test_hub("n1", pubsub.clone());
        let n2 = test_hub("n2", pubsub.clone());
        let user = Uuid::new_v4();

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        n1.register(user, tx1).await;
        n2.register(user, tx2).await;

        let event = Event::user_connected(user);
        n1.deliver_to_user(user, &event).await;

        // Local session on n1: the direct write, and the echoed frame was
        // filtered by instance id.
        assert_eq!(rx1.recv().await.unwrap().kind, EventType::UserConnected);
        assert!(rx1.try_recv().is_err());

        // Remote session on n2: exactly one copy via the channel callback.
        assert_eq!(rx2.recv().await.unwrap().kind, EventType::UserConnected);
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn last_disconnect_releases_the_subscription() {
        let pubsub = Arc::new(MemoryPubSub::new());
        let hub = test_hub("n1", pubsub.clone());
        let user = Uuid::new_v4();

        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let session_a = hub.register(user, tx_a).await;
        let session_b = hub.register(user, tx_b).await;
        drop(rx_a);

        hub.unregister(user, session_a).await;

        // Still one live session: remote frames keep flowing.
        let remote = PubSubFrame {
            instance_id: "n2".into(),
            event: Event::user_connected(user),
        };
        pubsub.publish(&user_channel(user), &remote).await.unwrap();
        assert_eq!(rx_b.recv().await.unwrap().kind, EventType::UserConnected);

        hub.unregister(user, session_b).await;
        assert_eq!(hub.local_session_count(user), 0);

        // Subscription released: publishing reaches nobody.
        pubsub.publish(&user_channel(user), &remote).await.unwrap();
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn dead_sessions_are_pruned_on_delivery() {
        let hub = test_hub("n1", Arc::new(MemoryPubSub::new()));
        let user = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        hub.register(user, tx).await;
        drop(rx);

        hub.deliver_to_user(user, &Event::user_connected(user)).await;
        assert_eq!(hub.local_session_count(user), 0);
    }

    #[tokio::test]
    async fn presence_announced_on_first_and_last_session_only() {
        let bus = Arc::new(MemoryBus::new());
        let mut presence = bus
            .consume("presence", &["user.*".to_string()])
            .await
            .unwrap();

        let hub = Hub::new(
            "n1".to_string(),
            Arc::new(MemoryPubSub::new()),
            bus.clone(),
        );
        let user = Uuid::new_v4();

        let (tx_a, _rx_a) = mpsc::unbounded_channel();
        let (tx_b, _rx_b) = mpsc::unbounded_channel();
        let session_a = hub.register(user, tx_a).await;
        let session_b = hub.register(user, tx_b).await;
        hub.unregister(user, session_a).await;
        hub.unregister(user, session_b).await;

        assert_eq!(presence.recv().await.unwrap().routing_key, "user.connected");
        assert_eq!(
            presence.recv().await.unwrap().routing_key,
            "user.disconnected"
        );
        assert!(presence.try_recv().is_err());
    }
}
