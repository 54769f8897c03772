//! Stepauth attempt counter cleanup worker.
//!
//! Sweeps idle lockout counters out of Postgres on an interval. Redis
//! deployments do not need this; their counters expire through key TTLs.

#![forbid(unsafe_code)]

use std::env;
use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use stepauth_application::{AttemptGuard, AttemptGuardConfig};
use stepauth_core::{AppError, AppResult};
use stepauth_infrastructure::PostgresAttemptStore;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
struct WorkerConfig {
    database_url: String,
    cleanup_interval_seconds: u64,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = WorkerConfig::load()?;
    let pool = connect_pool(config.database_url.as_str()).await?;

    let attempt_guard = AttemptGuard::new(
        Arc::new(PostgresAttemptStore::new(pool)),
        AttemptGuardConfig::default(),
    );

    info!(
        cleanup_interval_seconds = config.cleanup_interval_seconds,
        "stepauth-worker started"
    );

    loop {
        match attempt_guard.cleanup().await {
            Ok(evicted) => {
                if evicted > 0 {
                    info!(evicted, "evicted idle attempt counters");
                }
            }
            Err(error) => {
                warn!(error = %error, "attempt counter cleanup failed");
            }
        }

        tokio::time::sleep(Duration::from_secs(config.cleanup_interval_seconds)).await;
    }
}

impl WorkerConfig {
    fn load() -> AppResult<Self> {
        let database_url = required_env("DATABASE_URL")?;
        let cleanup_interval_seconds = parse_env_u64("CLEANUP_INTERVAL_SECONDS", 3600)?;

        if cleanup_interval_seconds == 0 {
            return Err(AppError::Validation(
                "CLEANUP_INTERVAL_SECONDS must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            database_url,
            cleanup_interval_seconds,
        })
    }
}

async fn connect_pool(database_url: &str) -> AppResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .map_err(|error| AppError::Internal(format!("failed to connect to database: {error}")))
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn required_env(name: &str) -> AppResult<String> {
    env::var(name).map_err(|_| AppError::Validation(format!("{name} is required")))
}

fn parse_env_u64(name: &str, default: u64) -> AppResult<u64> {
    match env::var(name) {
        Ok(value) => value.parse::<u64>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}
