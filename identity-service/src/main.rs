use identity_service::{
    build_router,
    clock::{Clock, SystemClock},
    config::IdentityConfig,
    db::InMemoryUserRepository,
    models::{Membership, Role},
    store::{RedisCounterStore, RedisSessionStore},
    AppState,
};
use service_core::observability::logging::init_tracing;
use service_core::redis::SharedRedis;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<(), service_core::error::AppError> {
    // Load configuration - fail fast if invalid
    let config = IdentityConfig::from_env()?;

    init_tracing(&config.service_name, &config.log_level);

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting identity service"
    );

    // The connection is opened lazily; a store that is down at startup
    // surfaces as 503 on the first request instead of a crash.
    let redis = Arc::new(SharedRedis::new(&config.redis.url)?);
    if let Err(e) = redis.health_check().await {
        tracing::warn!(error = %e, "Redis not reachable at startup");
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let sessions = Arc::new(RedisSessionStore::new(redis.clone(), clock.clone()));
    let counters = Arc::new(RedisCounterStore::new(redis));
    // Accounts live in process memory; self-registered users act as
    // platform-level members with no tenant.
    let users = Arc::new(
        InMemoryUserRepository::new(clock.clone()).with_default_membership(Membership {
            tenant_id: None,
            user_tenant_id: None,
            role: Role {
                role_id: Uuid::new_v4(),
                name: "member".to_string(),
                permissions: Vec::new(),
            },
        }),
    );
    tracing::info!("Stores initialized");

    let state = AppState::new(config.clone(), clock, sessions, counters, users)?;
    let app = build_router(state)?;

    let addr = config.common.socket_addr();

    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );
    let _guard = service_span.enter();

    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(Duration::from_secs(
        config.common.shutdown_grace_seconds,
    )))
    .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal(grace: Duration) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }

    tokio::time::sleep(grace).await;
}
