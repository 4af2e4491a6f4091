use dialer_rs::config::AppConfig;
use dialer_rs::rate_limit::RateLimiter;
use dialer_rs::store::PgCallStore;
use dialer_rs::types::AppState;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::prelude::*;

const RATE_LIMIT_CLEANUP_EVERY: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional in deployed environments
    let _ = dotenvy::dotenv();
    let subscriber = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_file(true)
                .with_line_number(true),
        )
        .with(tracing_subscriber::filter::Targets::new().with_targets([
            ("hyper", tracing_subscriber::filter::LevelFilter::OFF),
            ("sqlx", tracing_subscriber::filter::LevelFilter::WARN),
            ("tower_http", tracing_subscriber::filter::LevelFilter::DEBUG),
            ("dialer_rs", tracing_subscriber::filter::LevelFilter::DEBUG),
        ]));
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to install tracing subscriber")?;

    let config = AppConfig::from_env().context("invalid configuration")?;
    info!(env=%config.app_env, base_url=%config.public_base_url, "starting dialer");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.database_url)
        .await
        .context("failed to connect to database")?;
    sqlx::migrate!()
        .run(&pool)
        .await
        .context("failed to run migrations")?;

    let rate_limiter = RateLimiter::in_memory();
    let _cleanup = rate_limiter.spawn_cleanup(RATE_LIMIT_CLEANUP_EVERY);

    let bind_addr = config.bind_addr;
    let app_state = Arc::new(AppState::new(
        config,
        Arc::new(PgCallStore::new(pool)),
        rate_limiter,
    ));
    if !app_state.vault.is_configured() {
        error!("ENCRYPTION_KEY is missing or invalid; provider credentials cannot be decrypted");
    }

    let app = dialer_rs::router(app_state);
    info!(addr=%bind_addr, "listening");
    axum::Server::bind(&bind_addr)
        .serve(app.into_make_service())
        .await
        .context("server error")?;
    Ok(())
}
