mod auth;
mod clock;
mod config;
mod db;
mod error;
mod handlers;
mod links;
mod models;
mod ratelimit;
mod rest;
mod token;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use jsonwebtoken::DecodingKey;
use sqlx::sqlite::SqlitePool;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use clock::{Clock, SystemClock};
use config::{Config, RateLimitBackend};
use ratelimit::{InMemoryRateLimitStore, RateLimitStore, RateLimiter, SqliteRateLimitStore};
use token::LinkSigner;

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub decoding_key: DecodingKey,
    pub signer: LinkSigner,
    pub limiter: RateLimiter,
    pub clock: Arc<dyn Clock>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(
        config: Config,
        db: SqlitePool,
        decoding_key: DecodingKey,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let store: Arc<dyn RateLimitStore> = match config.rate_limit_backend {
            RateLimitBackend::Sqlite => Arc::new(SqliteRateLimitStore::new(db.clone())),
            RateLimitBackend::Memory => Arc::new(InMemoryRateLimitStore::new()),
        };
        let limiter = RateLimiter::new(store, config.rate_limits.clone(), clock.clone());
        let signer = LinkSigner::new(config.link_secret.clone(), clock.clone());

        Self {
            db,
            decoding_key,
            signer,
            limiter,
            clock,
            config: Arc::new(config),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "aurum=debug,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let pool = db::connect(&config.database_url, 5).await?;
    db::init_schema(&pool).await?;

    let decoding_key = auth::load_decoding_key(&config.session_public_key_path)?;

    if config.link_secret.is_none() {
        tracing::warn!("ONBOARDING_LINK_SECRET is not set; e-mail links will be rejected");
    }
    if config.rate_limit_backend == RateLimitBackend::Memory {
        tracing::warn!("Rate limits are kept in process memory and not shared across instances");
    }

    let bind_addr = config.bind_addr.clone();
    let app_state = AppState::new(config, pool, decoding_key, Arc::new(SystemClock));

    let rest_app = rest::router(app_state);
    tracing::info!("REST API listening on {}", bind_addr);
    let rest_listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    axum::serve(rest_listener, rest_app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
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
}
