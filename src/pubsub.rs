use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use redis::aio::{ConnectionManager, PubSubSink};
use redis::AsyncCommands;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::backoff::Backoff;
use crate::config::PubSubConfig;
use crate::protocol::PubSubFrame;

#[derive(Debug, Error)]
pub enum PubSubError {
    #[error("pubsub connection failed: {0}")]
    Connection(#[from] redis::RedisError),
    #[error("pubsub payload could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type PubSubHandler = Arc<dyn Fn(PubSubFrame) + Send + Sync>;

/// Ephemeral publish/subscribe keyed by channel name. Not durable: frames
/// published to a channel nobody subscribes to are lost by design.
#[async_trait]
pub trait PubSub: Send + Sync {
    async fn publish(&self, channel: &str, frame: &PubSubFrame) -> Result<(), PubSubError>;
    async fn subscribe(&self, channel: &str, handler: PubSubHandler) -> Result<(), PubSubError>;
    async fn unsubscribe(&self, channel: &str) -> Result<(), PubSubError>;
}

/// Redis-backed pub/sub: one multiplexed publish connection, one receive
/// connection driven by a supervisor task that resubscribes every known
/// channel after a reconnect.
pub struct RedisPubSub {
    publisher: ConnectionManager,
    sink: Arc<Mutex<Option<PubSubSink>>>,
    handlers: Arc<DashMap<String, PubSubHandler>>,
}

impl RedisPubSub {
    pub async fn connect(config: &PubSubConfig) -> Result<Self, PubSubError> {
        let client = redis::Client::open(config.url.as_str())?;
        let publisher = ConnectionManager::new(client.clone()).await?;

        let sink = Arc::new(Mutex::new(None));
        let handlers: Arc<DashMap<String, PubSubHandler>> = Arc::new(DashMap::new());

        tokio::spawn(receive_loop(
            client,
            sink.clone(),
            handlers.clone(),
            config.reconnect(),
        ));

        Ok(Self {
            publisher,
            sink,
            handlers,
        })
    }
}

async fn receive_loop(
    client: redis::Client,
    sink_slot: Arc<Mutex<Option<PubSubSink>>>,
    handlers: Arc<DashMap<String, PubSubHandler>>,
    mut backoff: Backoff,
) {
    loop {
        match client.get_async_pubsub().await {
            Ok(pubsub) => {
                let (mut sink, mut stream) = pubsub.split();

                let channels: Vec<String> =
                    handlers.iter().map(|entry| entry.key().clone()).collect();
                let mut resubscribed = true;
                for channel in &channels {
                    if let Err(e) = sink.subscribe(channel).await {
                        tracing::warn!(component = "pubsub", channel = %channel, error = %e, "resubscribe failed");
                        resubscribed = false;
                        break;
                    }
                }

                if resubscribed {
                    *sink_slot.lock().await = Some(sink);
                    backoff.reset();
                    tracing::info!(
                        component = "pubsub",
                        channels = channels.len(),
                        "receive connection established"
                    );

                    while let Some(msg) = stream.next().await {
                        let channel = msg.get_channel_name().to_string();
                        match serde_json::from_slice::<PubSubFrame>(msg.get_payload_bytes()) {
                            Ok(frame) => {
                                let handler =
                                    handlers.get(&channel).map(|entry| entry.value().clone());
                                if let Some(handler) = handler {
                                    handler(frame);
                                }
                            }
                            Err(e) => {
                                tracing::warn!(component = "pubsub", channel = %channel, error = %e, "undecodable frame dropped");
                            }
                        }
                    }

                    *sink_slot.lock().await = None;
                    tracing::warn!(component = "pubsub", "receive connection lost");
                }
            }
            Err(e) => {
                tracing::warn!(component = "pubsub", error = %e, "pubsub connect failed");
            }
        }

        tokio::time::sleep(backoff.next_delay()).await;
    }
}

#[async_trait]
impl PubSub for RedisPubSub {
    async fn publish(&self, channel: &str, frame: &PubSubFrame) -> Result<(), PubSubError> {
        let payload = serde_json::to_vec(frame)?;
        let mut conn = self.publisher.clone();
        let _receivers: i64 = conn.publish(channel, payload).await?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str, handler: PubSubHandler) -> Result<(), PubSubError> {
        self.handlers.insert(channel.to_string(), handler);
        // With the receive connection down, the supervisor picks the channel
        // up from the handler table on reconnect.
        if let Some(sink) = self.sink.lock().await.as_mut() {
            sink.subscribe(channel).await?;
        }
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), PubSubError> {
        self.handlers.remove(channel);
        if let Some(sink) = self.sink.lock().await.as_mut() {
            sink.unsubscribe(channel).await?;
        }
        Ok(())
    }
}

/// In-process pub/sub for tests and single-node runs. Supports several
/// subscribers per channel so one process can host multiple hubs in tests.
#[derive(Default)]
pub struct MemoryPubSub {
    handlers: DashMap<String, Vec<PubSubHandler>>,
}

impl MemoryPubSub {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PubSub for MemoryPubSub {
    async fn publish(&self, channel: &str, frame: &PubSubFrame) -> Result<(), PubSubError> {
        let handlers = self
            .handlers
            .get(channel)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        for handler in handlers {
            handler(frame.clone());
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str, handler: PubSubHandler) -> Result<(), PubSubError> {
        self.handlers
            .entry(channel.to_string())
            .or_default()
            .push(handler);
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), PubSubError> {
        self.handlers.remove(channel);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Event;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    fn frame(instance_id: &str) -> PubSubFrame {
        PubSubFrame {
            instance_id: instance_id.to_string(),
            event: Event::user_connected(Uuid::new_v4()),
        }
    }

    #[tokio::test]
    async fn delivers_to_every_subscriber() {
        let pubsub = MemoryPubSub::new();
        let hits = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let hits = hits.clone();
            pubsub
                .subscribe(
                    "ws:user:a",
                    Arc::new(move |_| {
                        hits.fetch_add(1, Ordering::SeqCst);
                    }),
                )
                .await
                .unwrap();
        }

        pubsub.publish("ws:user:a", &frame("n1")).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn no_subscriber_means_the_frame_is_lost() {
        let pubsub = MemoryPubSub::new();
        // Publishing into the void must not error; ephemeral by contract.
        pubsub.publish("ws:user:ghost", &frame("n1")).await.unwrap();
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let pubsub = MemoryPubSub::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        pubsub
            .subscribe(
                "ws:user:a",
                Arc::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await
            .unwrap();
        pubsub.unsubscribe("ws:user:a").await.unwrap();
        pubsub.publish("ws:user:a", &frame("n1")).await.unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
