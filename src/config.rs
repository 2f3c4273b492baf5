use std::time::Duration;

use uuid::Uuid;

use crate::backoff::Backoff;

const DEV_JWT_SECRET: &str = "dev-only-insecure-default-key-change-me";
const MIN_SECRET_BYTES: usize = 32;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub max_connections: u32,
}

impl StoreConfig {
    pub fn connect_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.database
        )
    }
}

#[derive(Debug, Clone)]
pub struct BusConfig {
    pub url: String,
    pub exchange: String,
    pub queue: String,
    pub retry_floor: Duration,
    pub retry_ceiling: Duration,
}

impl BusConfig {
    pub fn reconnect(&self) -> Backoff {
        Backoff::new(self.retry_floor, self.retry_ceiling)
    }
}

#[derive(Debug, Clone)]
pub struct PubSubConfig {
    pub url: String,
    pub retry_floor: Duration,
    pub retry_ceiling: Duration,
}

impl PubSubConfig {
    pub fn reconnect(&self) -> Backoff {
        Backoff::new(self.retry_floor, self.retry_ceiling)
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub secret: Vec<u8>,
    pub expiration: Duration,
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub listen_port: u16,
    pub ping_interval: Duration,
    pub write_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Identity of this fan-out node: stable when NODE_NAME is set, minted
    /// per process otherwise. Stamped on pub/sub frames and names the
    /// node's durable queue.
    pub node_id: String,
    pub store: StoreConfig,
    pub bus: BusConfig,
    pub pubsub: PubSubConfig,
    pub auth: AuthConfig,
    pub hub: HubConfig,
    pub media_base_url: String,
}

impl Config {
    pub fn from_env() -> Self {
        let node_id = std::env::var("NODE_NAME")
            .unwrap_or_else(|_| format!("node-{}", Uuid::new_v4().simple()));

        let store = StoreConfig {
            host: env_or("STORE_HOST", "localhost"),
            port: env_parsed("STORE_PORT", 5432),
            database: env_or("STORE_DATABASE", "chat"),
            user: env_or("STORE_USER", "postgres"),
            password: env_or("STORE_PASSWORD", "postgres"),
            max_connections: env_parsed("STORE_MAX_CONNECTIONS", 20),
        };

        let bus = BusConfig {
            url: env_or("AMQP_URL", "amqp://localhost:5672"),
            exchange: env_or("BUS_EXCHANGE", "chat_events"),
            queue: env_or("BUS_QUEUE", &format!("fanout.{node_id}")),
            retry_floor: Duration::from_millis(env_parsed("BUS_RETRY_FLOOR_MS", 1000u64)),
            retry_ceiling: Duration::from_millis(env_parsed("BUS_RETRY_CEILING_MS", 30_000u64)),
        };

        let pubsub = PubSubConfig {
            url: env_or("REDIS_URL", "redis://localhost:6379"),
            retry_floor: Duration::from_millis(env_parsed("REDIS_RETRY_FLOOR_MS", 500u64)),
            retry_ceiling: Duration::from_millis(env_parsed("REDIS_RETRY_CEILING_MS", 30_000u64)),
        };

        let auth = AuthConfig {
            secret: jwt_secret_from_env(),
            expiration: Duration::from_secs(env_parsed("JWT_EXPIRATION_HOURS", 24u64) * 3600),
        };

        let hub = HubConfig {
            listen_port: env_parsed("LISTEN_PORT", 3000),
            ping_interval: Duration::from_secs(env_parsed("WS_PING_INTERVAL_SECS", 30u64)),
            write_timeout: Duration::from_secs(env_parsed("WS_WRITE_TIMEOUT_SECS", 10u64)),
        };

        Self {
            node_id,
            store,
            bus,
            pubsub,
            auth,
            hub,
            media_base_url: env_or("MEDIA_BASE_URL", "http://localhost:9000/media"),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

fn jwt_secret_from_env() -> Vec<u8> {
    let raw = match std::env::var("JWT_SECRET") {
        Ok(secret) if !secret.is_empty() => secret,
        _ => {
            tracing::warn!(
                component = "config",
                "JWT_SECRET not set! Using insecure default. Set JWT_SECRET in production!"
            );
            DEV_JWT_SECRET.to_string()
        }
    };
    pad_secret(raw.into_bytes())
}

// HS256 wants at least 32 key bytes; short secrets are repeated out to the
// minimum rather than rejected so older deployments keep working.
fn pad_secret(bytes: Vec<u8>) -> Vec<u8> {
    if bytes.len() >= MIN_SECRET_BYTES {
        return bytes;
    }
    tracing::warn!(
        component = "config",
        secret_bytes = bytes.len(),
        "JWT secret shorter than 32 bytes; padding by repetition"
    );
    let mut padded = Vec::with_capacity(MIN_SECRET_BYTES);
    while padded.len() < MIN_SECRET_BYTES {
        let take = (MIN_SECRET_BYTES - padded.len()).min(bytes.len());
        padded.extend_from_slice(&bytes[..take]);
    }
    padded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_secret_pads_to_minimum() {
        let padded = pad_secret(b"abc".to_vec());
        assert_eq!(padded.len(), MIN_SECRET_BYTES);
        assert!(padded.starts_with(b"abcabc"));
    }

    #[test]
    fn long_secret_is_untouched() {
        let secret = vec![7u8; 48];
        assert_eq!(pad_secret(secret.clone()), secret);
    }

    #[test]
    fn store_connect_url_shape() {
        let store = StoreConfig {
            host: "db".into(),
            port: 5433,
            database: "chat".into(),
            user: "app".into(),
            password: "pw".into(),
            max_connections: 10,
        };
        assert_eq!(store.connect_url(), "postgres://app:pw@db:5433/chat");
    }
}
