use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

use crate::config::BusConfig;
use crate::protocol::Event;

const MEMORY_QUEUE_DEPTH: usize = 1024;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus connection failed: {0}")]
    Connection(#[from] lapin::Error),
    #[error("bus payload could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One consumed bus message. Handlers must ack after handling, or nack
/// without requeue for poison payloads.
pub struct BusDelivery {
    pub routing_key: String,
    pub event: Event,
    acker: Option<lapin::acker::Acker>,
}

impl BusDelivery {
    pub async fn ack(&self) -> Result<(), BusError> {
        if let Some(acker) = &self.acker {
            acker.ack(BasicAckOptions::default()).await?;
        }
        Ok(())
    }

    pub async fn nack(&self, requeue: bool) -> Result<(), BusError> {
        if let Some(acker) = &self.acker {
            acker
                .nack(BasicNackOptions {
                    requeue,
                    ..Default::default()
                })
                .await?;
        }
        Ok(())
    }
}

/// Durable topic exchange seam. Producers publish routing-keyed events;
/// consumers declare a durable queue bound by patterns and receive
/// at-least-once deliveries.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, routing_key: &str, event: &Event) -> Result<(), BusError>;

    /// Declare `queue`, bind it to the exchange with `bindings`, and start
    /// consuming. The stream ends when the underlying connection drops;
    /// callers reconnect by calling `consume` again.
    async fn consume(
        &self,
        queue: &str,
        bindings: &[String],
    ) -> Result<mpsc::Receiver<BusDelivery>, BusError>;
}

/// RabbitMQ-backed bus. One publisher channel per node, re-dialed lazily
/// after a connection loss; each `consume` call owns its own connection.
pub struct AmqpBus {
    url: String,
    exchange: String,
    publisher: Mutex<Option<(Connection, Channel)>>,
}

impl AmqpBus {
    pub async fn connect(config: &BusConfig) -> Result<Self, BusError> {
        let bus = Self {
            url: config.url.clone(),
            exchange: config.exchange.clone(),
            publisher: Mutex::new(None),
        };
        bus.ensure_publisher().await?;
        Ok(bus)
    }

    async fn open_channel(&self) -> Result<(Connection, Channel), BusError> {
        let connection =
            Connection::connect(&self.url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        channel
            .exchange_declare(
                &self.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok((connection, channel))
    }

    async fn ensure_publisher(&self) -> Result<(), BusError> {
        let mut guard = self.publisher.lock().await;
        if guard.is_none() {
            *guard = Some(self.open_channel().await?);
            tracing::info!(component = "bus", exchange = %self.exchange, "publisher channel open");
        }
        Ok(())
    }
}

#[async_trait]
impl EventBus for AmqpBus {
    async fn publish(&self, routing_key: &str, event: &Event) -> Result<(), BusError> {
        let payload = serde_json::to_vec(event)?;

        let mut guard = self.publisher.lock().await;
        let pair = match guard.take() {
            Some(pair) => pair,
            None => self.open_channel().await?,
        };

        let result = pair
            .1
            .basic_publish(
                &self.exchange,
                routing_key,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default()
                    .with_content_type("application/json".into())
                    .with_delivery_mode(2),
            )
            .await;

        match result {
            Ok(_) => {
                *guard = Some(pair);
                Ok(())
            }
            // The broken channel is dropped; the next publish re-dials.
            Err(e) => Err(e.into()),
        }
    }

    async fn consume(
        &self,
        queue: &str,
        bindings: &[String],
    ) -> Result<mpsc::Receiver<BusDelivery>, BusError> {
        let (connection, channel) = self.open_channel().await?;

        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        for binding in bindings {
            channel
                .queue_bind(
                    queue,
                    &self.exchange,
                    binding,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await?;
        }

        let mut consumer = channel
            .basic_consume(
                queue,
                "fanout-consumer",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        let (tx, rx) = mpsc::channel(MEMORY_QUEUE_DEPTH);
        let queue_name = queue.to_string();
        tokio::spawn(async move {
            // Owning the connection keeps the consumer channel alive.
            let _connection = connection;

            while let Some(delivery) = consumer.next().await {
                let delivery = match delivery {
                    Ok(delivery) => delivery,
                    Err(e) => {
                        tracing::warn!(component = "bus", queue = %queue_name, error = %e, "consume stream failed");
                        break;
                    }
                };

                let routing_key = delivery.routing_key.to_string();
                let event: Event = match serde_json::from_slice(&delivery.data) {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::warn!(component = "bus", queue = %queue_name, routing_key = %routing_key, error = %e, "poison payload, dropping");
                        let _ = delivery.acker.nack(BasicNackOptions::default()).await;
                        continue;
                    }
                };

                let out = BusDelivery {
                    routing_key,
                    event,
                    acker: Some(delivery.acker),
                };
                if tx.send(out).await.is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }
}

/// In-process bus for tests and broker-less runs. Topic semantics match
/// AMQP: `*` matches one word, `#` matches zero or more.
#[derive(Default)]
pub struct MemoryBus {
    queues: DashMap<String, MemoryQueue>,
}

struct MemoryQueue {
    bindings: Vec<String>,
    tx: mpsc::Sender<BusDelivery>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventBus for MemoryBus {
    async fn publish(&self, routing_key: &str, event: &Event) -> Result<(), BusError> {
        for entry in self.queues.iter() {
            if entry
                .bindings
                .iter()
                .any(|binding| topic_matches(binding, routing_key))
            {
                let delivery = BusDelivery {
                    routing_key: routing_key.to_string(),
                    event: event.clone(),
                    acker: None,
                };
                if entry.tx.try_send(delivery).is_err() {
                    tracing::warn!(component = "bus", queue = %entry.key(), "memory queue full, delivery dropped");
                }
            }
        }
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        bindings: &[String],
    ) -> Result<mpsc::Receiver<BusDelivery>, BusError> {
        let (tx, rx) = mpsc::channel(MEMORY_QUEUE_DEPTH);
        self.queues.insert(
            queue.to_string(),
            MemoryQueue {
                bindings: bindings.to_vec(),
                tx,
            },
        );
        Ok(rx)
    }
}

fn topic_matches(pattern: &str, key: &str) -> bool {
    fn matches(pattern: &[&str], key: &[&str]) -> bool {
        match (pattern.first(), key.first()) {
            (None, None) => true,
            (Some(&"#"), _) => {
                if pattern.len() == 1 {
                    return true;
                }
                (0..=key.len()).any(|skip| matches(&pattern[1..], &key[skip..]))
            }
            (Some(&"*"), Some(_)) => matches(&pattern[1..], &key[1..]),
            (Some(&word), Some(&head)) if word == head => matches(&pattern[1..], &key[1..]),
            _ => false,
        }
    }

    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = key.split('.').collect();
    matches(&pattern, &key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn topic_patterns_follow_amqp_semantics() {
        assert!(topic_matches("message.sent", "message.sent"));
        assert!(topic_matches("message.*", "message.sent"));
        assert!(topic_matches("message.*", "message.read"));
        assert!(!topic_matches("message.*", "typing.indicator"));
        assert!(!topic_matches("message.*", "message.sent.extra"));
        assert!(topic_matches("#", "anything.at.all"));
        assert!(topic_matches("message.#", "message.sent.extra"));
        assert!(topic_matches("message.#", "message"));
        assert!(!topic_matches("typing.indicator", "message.sent"));
    }

    #[tokio::test]
    async fn memory_bus_routes_by_binding() {
        let bus = MemoryBus::new();
        let mut messages = bus
            .consume("q1", &["message.*".to_string()])
            .await
            .unwrap();
        let mut everything = bus.consume("q2", &["#".to_string()]).await.unwrap();

        let event = Event::user_connected(Uuid::new_v4());
        bus.publish("user.connected", &event).await.unwrap();
        bus.publish("message.sent", &event).await.unwrap();

        let delivery = messages.recv().await.unwrap();
        assert_eq!(delivery.routing_key, "message.sent");
        delivery.ack().await.unwrap();

        assert_eq!(everything.recv().await.unwrap().routing_key, "user.connected");
        assert_eq!(everything.recv().await.unwrap().routing_key, "message.sent");
    }

    #[tokio::test]
    async fn unbound_keys_are_not_delivered() {
        let bus = MemoryBus::new();
        let mut rx = bus
            .consume("q", &["typing.indicator".to_string()])
            .await
            .unwrap();

        bus.publish("message.sent", &Event::user_connected(Uuid::new_v4()))
            .await
            .unwrap();
        drop(bus);

        assert!(rx.recv().await.is_none());
    }
}
