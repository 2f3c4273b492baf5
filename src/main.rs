use std::sync::Arc;
use std::time::Duration;

mod auth;
mod backoff;
mod bus;
mod config;
mod consumer;
mod dispatcher;
mod error;
mod hub;
mod models;
mod protocol;
mod pubsub;
mod routes;
mod state;
mod store;
mod validation;
mod ws;

use bus::{AmqpBus, EventBus};
use config::Config;
use dispatcher::Dispatcher;
use hub::Hub;
use pubsub::{PubSub, RedisPubSub};
use state::AppState;
use store::Store;
use tracing_subscriber::EnvFilter;

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);
const STORY_PURGE_INTERVAL: Duration = Duration::from_secs(3600);

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    let config = Arc::new(Config::from_env());

    let store = match Store::connect(&config.store).await {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(component = "bootstrap", error = %e, "store connect failed");
            std::process::exit(1);
        }
    };

    let bus: Arc<dyn EventBus> = match AmqpBus::connect(&config.bus).await {
        Ok(bus) => Arc::new(bus),
        Err(e) => {
            tracing::error!(component = "bootstrap", error = %e, "bus connect failed");
            std::process::exit(1);
        }
    };

    let pubsub: Arc<dyn PubSub> = match RedisPubSub::connect(&config.pubsub).await {
        Ok(pubsub) => Arc::new(pubsub),
        Err(e) => {
            tracing::error!(component = "bootstrap", error = %e, "pubsub connect failed");
            std::process::exit(1);
        }
    };

    tracing::info!(
        component = "bootstrap",
        node_id = %config.node_id,
        exchange = %config.bus.exchange,
        queue = %config.bus.queue,
        protocol_version = protocol::PROTOCOL_VERSION,
        "store, bus and pubsub connected"
    );

    let hub = Arc::new(Hub::new(config.node_id.clone(), pubsub, bus.clone()));
    let dispatcher = Arc::new(Dispatcher::new(store.clone(), bus.clone(), hub.clone()));

    let consumer_task = tokio::spawn(consumer::run(
        bus.clone(),
        store.clone(),
        hub.clone(),
        config.bus.queue.clone(),
        config.bus.reconnect(),
    ));

    // Hourly purge of expired stories; the first tick fires at startup.
    let purge_store = store.clone();
    let purge_task = tokio::spawn(async move {
        let mut tick = tokio::time::interval(STORY_PURGE_INTERVAL);
        loop {
            tick.tick().await;
            match purge_store.purge_expired_stories().await {
                Ok(0) => {}
                Ok(purged) => {
                    tracing::info!(component = "stories", purged, "expired stories removed");
                }
                Err(e) => {
                    tracing::warn!(component = "stories", error = %e, "story purge failed");
                }
            }
        }
    });

    let app = routes::create_router(AppState {
        config: config.clone(),
        store: store.clone(),
        bus: bus.clone(),
        hub: hub.clone(),
        dispatcher,
    });

    let addr = format!("0.0.0.0:{}", config.hub.listen_port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(component = "bootstrap", addr = %addr, error = %e, "bind failed");
            std::process::exit(1);
        }
    };
    tracing::info!(component = "bootstrap", addr = %addr, "listening");

    let shutdown_hub = hub.clone();
    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tracing::info!(component = "bootstrap", "shutdown signal received");
            // Closing the sessions lets the server drain its connections.
            shutdown_hub.shutdown().await;
        })
        .await;

    if let Err(e) = serve_result {
        tracing::error!(component = "bootstrap", error = %e, "server error");
    }

    let drain = async {
        consumer_task.abort();
        purge_task.abort();
        store.close().await;
    };
    if tokio::time::timeout(SHUTDOWN_DEADLINE, drain).await.is_err() {
        tracing::error!(component = "bootstrap", "shutdown deadline exceeded");
        std::process::exit(1);
    }

    tracing::info!(component = "bootstrap", "shutdown complete");
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("terminate signal handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
