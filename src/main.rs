use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;

use notification_publisher::catalog::create_catalog_source;
use notification_publisher::config::Settings;
use notification_publisher::lock::create_lock_coordinator;
use notification_publisher::notification::{OutcomeDispatcher, PlatformSettings, PublisherHandler};
use notification_publisher::outcome::{create_inbox_store, create_mail_transport, HttpWebhookClient};
use notification_publisher::postgres::PostgresPool;
use notification_publisher::publisher::PublisherSupervisor;
use notification_publisher::redis::{CircuitBreaker, CircuitBreakerConfig, RedisHealth, RedisPool};
use notification_publisher::server::{create_app, AppState};
use notification_publisher::shutdown::GracefulShutdown;
use notification_publisher::stream::create_stream_factory;
use notification_publisher::telemetry::init_telemetry;
use notification_publisher::template::HandlebarsRenderer;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Arc::new(Settings::new()?);
    let _telemetry = init_telemetry(&settings.otel, &settings.log)?;
    tracing::info!("Configuration loaded");

    let redis_pool = if needs_redis(&settings) {
        let circuit_breaker = Arc::new(CircuitBreaker::with_config(CircuitBreakerConfig {
            failure_threshold: settings.redis.circuit_breaker_failure_threshold,
            success_threshold: settings.redis.circuit_breaker_success_threshold,
            reset_timeout_ms: settings.redis.circuit_breaker_reset_timeout_seconds * 1000,
        }));
        let pool = RedisPool::new(
            settings.redis.clone(),
            circuit_breaker,
            Arc::new(RedisHealth::new()),
        )?;
        Some(Arc::new(pool))
    } else {
        None
    };

    let postgres_pool = match settings.database {
        Some(ref database) if settings.inbox.backend == "postgres" => {
            let pool = PostgresPool::new(database, Arc::new(CircuitBreaker::new())).await?;
            pool.migrate().await?;
            Some(pool)
        }
        _ => None,
    };

    let mail = create_mail_transport(&settings.smtp)?;
    let dispatcher = Arc::new(OutcomeDispatcher::new(
        create_inbox_store(&settings.inbox, postgres_pool.clone()),
        mail.clone(),
        Arc::new(HttpWebhookClient::new(Duration::from_secs(
            settings.webhook.timeout_seconds,
        ))?),
        Arc::new(HandlebarsRenderer::new()),
        PlatformSettings::from(&settings.platform),
    ));

    let handler = Arc::new(PublisherHandler::new(
        create_catalog_source(&settings.catalog, redis_pool.clone()),
        dispatcher.clone(),
    ));

    let supervisor = Arc::new(PublisherSupervisor::new(
        settings.publisher.clone(),
        create_lock_coordinator(&settings.publisher, redis_pool.clone()),
        create_stream_factory(&settings.stream, redis_pool.clone()),
        handler.clone(),
        mail,
    ));
    supervisor.start().await;

    let state = AppState::new(
        settings.clone(),
        supervisor.clone(),
        dispatcher,
        redis_pool,
        postgres_pool.clone(),
    );
    let app = create_app(state);

    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let shutdown = GracefulShutdown::new(
        supervisor,
        handler,
        postgres_pool,
        settings.publisher.drain_timeout(),
    );
    shutdown.execute("signal").await;

    tracing::info!("Server shutdown complete");
    Ok(())
}

fn needs_redis(settings: &Settings) -> bool {
    settings.publisher.lock_backend == "redis"
        || settings.stream.backend == "redis"
        || settings.catalog.backend == "redis"
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
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
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
