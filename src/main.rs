//! PulseHub binary: wires configuration, tracing, the delivery core
//! services, and the axum server together.

use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use http::{header, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pulsehub::adapters::memory::{InMemoryEventLog, InMemoryProjectionStore};
use pulsehub::adapters::websocket::{websocket_router, WebSocketState};
use pulsehub::application::{
    CatchUpCoordinator, DeliveryDispatcher, ChatOrderingIndex, EventBus, PresenceRegistry,
    TypingStore, UnreadAggregator,
};
use pulsehub::config::AppConfig;
use pulsehub::ports::EventLog;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    config.validate()?;

    init_tracing(&config);

    let addr = config.server.socket_addr();
    tracing::info!(
        environment = ?config.server.environment,
        %addr,
        "starting pulsehub delivery core"
    );

    let log: Arc<InMemoryEventLog> = Arc::new(InMemoryEventLog::new());
    let store = Arc::new(InMemoryProjectionStore::new());
    let head = log.head().await?;

    let presence = PresenceRegistry::new(
        config.realtime.presence_grace(),
        config.realtime.send_timeout(),
    );
    let unread = Arc::new(UnreadAggregator::new());
    let ordering = Arc::new(ChatOrderingIndex::new());
    let catchup = Arc::new(CatchUpCoordinator::new(
        log.clone(),
        store.clone(),
        &config.realtime,
    ));
    let dispatcher = Arc::new(DeliveryDispatcher::new(
        presence.clone(),
        unread.clone(),
        ordering.clone(),
        catchup.clone(),
        store.clone(),
        &config.realtime,
        head,
    ));

    let bus = Arc::new(EventBus::starting_after(
        log.clone(),
        config.realtime.retry,
        head,
    ));
    bus.register_mandatory(dispatcher).await;

    let typing = Arc::new(TypingStore::new(
        presence.clone(),
        config.realtime.typing_ttl(),
    ));
    spawn_typing_sweeper(typing.clone(), config.realtime.typing_ttl());

    let ws_state = WebSocketState {
        presence,
        bus,
        catchup,
        typing,
        send_queue_capacity: config.realtime.send_queue_capacity,
    };

    let app = Router::new()
        .route("/health", get(health))
        .nest("/realtime", websocket_router())
        .with_state(ws_state)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&config));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("pulsehub shut down cleanly");
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.server.log_level.clone()));

    if config.is_production() {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let origins = config.server.cors_origins_list();
    let allow_origin = if origins.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            origins
                .iter()
                .filter_map(|origin| origin.parse().ok()),
        )
    };
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET])
        .allow_headers([header::CONTENT_TYPE])
}

/// Periodically drops expired typing indicators; reads are correct
/// without it, this just bounds memory.
fn spawn_typing_sweeper(typing: Arc<TypingStore>, ttl: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(ttl.max(Duration::from_secs(1)) * 2);
        loop {
            interval.tick().await;
            typing.sweep().await;
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
