//! Stepauth API composition root.

#![forbid(unsafe_code)]

mod error;
mod mfa;
mod state;

use std::env;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;

use axum::Router;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::routing::{delete, get, post};
use sqlx::postgres::PgPoolOptions;
use stepauth_application::{
    AttemptCounterStore, AttemptGuard, AttemptGuardConfig, BackupCodeManager, MfaService,
    SecretStore,
};
use stepauth_core::AppError;
use stepauth_infrastructure::{
    AesSecretEncryptor, PostgresAttemptStore, PostgresSecretStore, RedisAttemptStore,
    TotpRsProvider,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let migrate_only = env::args().nth(1).as_deref() == Some("migrate");

    let database_url = required_env("DATABASE_URL")?;
    let frontend_url =
        env::var("FRONTEND_URL").unwrap_or_else(|_| "http://localhost:3000".to_owned());

    let api_host = env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".to_owned());
    let api_port = env::var("API_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(3001);

    let issuer = env::var("MFA_ISSUER").unwrap_or_else(|_| "Stepauth".to_owned());
    let encryption_key = required_env("MFA_ENCRYPTION_KEY")?;
    let max_failures = parse_env_i32("MFA_MAX_FAILURES", 5)?;
    let lockout_seconds = parse_env_i64("MFA_LOCKOUT_SECONDS", 300)?;
    let backup_code_count = parse_env_usize("MFA_BACKUP_CODE_COUNT", 10)?;
    let attempt_store_kind = env::var("ATTEMPT_STORE").unwrap_or_else(|_| "postgres".to_owned());

    if max_failures <= 0 {
        return Err(AppError::Validation(
            "MFA_MAX_FAILURES must be greater than zero".to_owned(),
        ));
    }

    if lockout_seconds <= 0 {
        return Err(AppError::Validation(
            "MFA_LOCKOUT_SECONDS must be greater than zero".to_owned(),
        ));
    }

    if backup_code_count == 0 {
        return Err(AppError::Validation(
            "MFA_BACKUP_CODE_COUNT must be greater than zero".to_owned(),
        ));
    }

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .map_err(|error| AppError::Internal(format!("failed to connect to database: {error}")))?;

    sqlx::migrate!("../../crates/infrastructure/migrations")
        .run(&pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to run migrations: {error}")))?;

    if migrate_only {
        info!("database migrations applied successfully");
        return Ok(());
    }

    let attempt_store: Arc<dyn AttemptCounterStore> = match attempt_store_kind.as_str() {
        "postgres" => Arc::new(PostgresAttemptStore::new(pool.clone())),
        "redis" => {
            let redis_url = required_env("REDIS_URL")?;
            let client = redis::Client::open(redis_url).map_err(|error| {
                AppError::Validation(format!("invalid REDIS_URL: {error}"))
            })?;
            Arc::new(RedisAttemptStore::new(client, "stepauth:mfa:attempts"))
        }
        _ => {
            return Err(AppError::Validation(format!(
                "ATTEMPT_STORE must be either 'postgres' or 'redis', got '{attempt_store_kind}'"
            )));
        }
    };

    let secret_store: Arc<dyn SecretStore> = Arc::new(PostgresSecretStore::new(pool));
    let totp_provider = Arc::new(TotpRsProvider::new(issuer));
    let secret_encryptor = Arc::new(AesSecretEncryptor::from_hex(&encryption_key)?);
    let backup_codes = BackupCodeManager::new(secret_store.clone(), backup_code_count);
    let attempt_guard = AttemptGuard::new(
        attempt_store,
        AttemptGuardConfig::new(max_failures, lockout_seconds),
    );

    let app_state = AppState {
        mfa_service: MfaService::new(
            secret_store,
            totp_provider,
            secret_encryptor,
            backup_codes,
            attempt_guard,
        ),
    };

    let cors_layer = CorsLayer::new()
        .allow_origin(
            HeaderValue::from_str(&frontend_url)
                .map_err(|error| AppError::Internal(format!("invalid FRONTEND_URL: {error}")))?,
        )
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE]);

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/auth/mfa/setup", post(mfa::setup_handler))
        .route("/auth/mfa/setup/verify", post(mfa::setup_verify_handler))
        .route("/auth/mfa/verify", post(mfa::verify_handler))
        .route("/auth/mfa/recover", post(mfa::recover_handler))
        .route(
            "/auth/mfa/backup-codes/regenerate",
            post(mfa::regenerate_backup_codes_handler),
        )
        .route("/auth/mfa", delete(mfa::disable_handler))
        .route("/auth/mfa/status/{user_id}", get(mfa::status_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(app_state);

    let host = IpAddr::from_str(&api_host)
        .map_err(|error| AppError::Internal(format!("invalid API_HOST '{api_host}': {error}")))?;
    let address = SocketAddr::from((host, api_port));

    let listener = tokio::net::TcpListener::bind(address)
        .await
        .map_err(|error| AppError::Internal(format!("failed to bind listener: {error}")))?;

    info!(%address, "stepauth-api listening");

    axum::serve(listener, app)
        .await
        .map_err(|error| AppError::Internal(format!("api server error: {error}")))
}

async fn health_handler() -> StatusCode {
    StatusCode::OK
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn required_env(name: &str) -> Result<String, AppError> {
    env::var(name).map_err(|_| AppError::Validation(format!("{name} is required")))
}

fn parse_env_i32(name: &str, default: i32) -> Result<i32, AppError> {
    match env::var(name) {
        Ok(value) => value.parse::<i32>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_i64(name: &str, default: i64) -> Result<i64, AppError> {
    match env::var(name) {
        Ok(value) => value.parse::<i64>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_usize(name: &str, default: usize) -> Result<usize, AppError> {
    match env::var(name) {
        Ok(value) => value.parse::<usize>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}
