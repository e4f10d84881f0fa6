//! Binary entrypoint: loads configuration, wires every component, and
//! serves the HTTP surface until shutdown (SPEC_FULL §E.3).

use concierge::booking::BookingEngine;
use concierge::catalog::PostgresCatalog;
use concierge::config::Config;
use concierge::conversation::ConversationController;
use concierge::locking::RedisLockRegistry;
use concierge::messaging::HttpMessagingClient;
use concierge::payments::{HttpHostedAdapter, HttpStkAdapter};
use concierge::server::{router, AppState};
use concierge::session::RedisSessionStore;
use concierge::users::PostgresUserDirectory;
use concierge::webhooks::WebhookIngress;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.postgres.max_connections)
        .connect(&config.postgres.url)
        .await?;

    let redis_client = redis::Client::open(config.redis.url.clone())?;
    let redis_conn = redis::aio::ConnectionManager::new(redis_client).await?;

    let http_client = reqwest::Client::builder().timeout(Duration::from_secs(30)).build()?;

    let catalog = Arc::new(PostgresCatalog::new(pool.clone()));
    let users = Arc::new(PostgresUserDirectory::new(pool.clone()));
    let booking = Arc::new(BookingEngine::new(pool.clone()));

    let sessions = Arc::new(RedisSessionStore::new(redis_conn.clone(), config.session.ttl));
    let locks = Arc::new(RedisLockRegistry::new(redis_conn));

    let stk = Arc::new(HttpStkAdapter::new(
        http_client.clone(),
        config.stk.base_url.clone().unwrap_or_default(),
        config.stk.clone(),
    ));
    let hosted = Arc::new(HttpHostedAdapter::new(http_client.clone(), config.hosted.clone()));

    let messaging = Arc::new(HttpMessagingClient::new(
        http_client,
        config.messaging.base_url.clone().unwrap_or_default(),
        config.messaging.access_token.clone().unwrap_or_default(),
        config.messaging.phone_number_id.clone().unwrap_or_default(),
    ));

    let controller = Arc::new(ConversationController::new(
        sessions,
        locks,
        catalog.clone(),
        users.clone(),
        booking.clone(),
        stk,
        hosted.clone(),
        messaging.clone(),
        config.clone(),
    ));

    let webhook_ingress = Arc::new(WebhookIngress::new(controller, booking.clone(), catalog, users, hosted, messaging));

    spawn_expiry_sweep(booking);

    let state = AppState {
        webhooks: webhook_ingress,
        pool,
        messaging_verify_token: Arc::from(config.messaging.verify_token.clone().unwrap_or_default()),
    };

    let app = router(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "concierge listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    Ok(())
}

/// Background sweep expiring stale `PENDING`/`AWAITING_PAYMENT` bookings
/// (SPEC_FULL §E.2). Runs independently of any request; failures are
/// logged and retried on the next tick.
fn spawn_expiry_sweep(booking: Arc<BookingEngine>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            match booking.expire_stale_bookings().await {
                Ok(count) if count > 0 => tracing::info!(count, "expired stale bookings"),
                Ok(_) => {}
                Err(error) => tracing::error!(%error, "booking expiry sweep failed"),
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut signal) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            signal.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
