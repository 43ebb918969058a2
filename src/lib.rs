use crate::auth::hash_password;
use crate::model::entity::UserEntity;
use crate::model::{DatabaseError, DbConnection, ModelManager};
use crate::utils::signal::shutdown_signal;
use crate::{error::AppResult, web::AppState};
use axum::Router;
use sqlx::migrate::Migrator;
use tokio::net::TcpListener;

pub mod config;
pub use config::{Config, ConfigError, ConfigResult};

pub mod auth;
pub mod booking;
pub mod error;
pub mod model;
pub mod payments;
pub mod utils;
pub mod web;

pub(crate) static APPLICATION_NAME: &str = "mued";

static MIGRATOR: Migrator = sqlx::migrate!();

/// Applies pending migrations and makes sure the configured admin exists.
async fn prepare_database(mm: &ModelManager, config: &Config) -> AppResult<()> {
    tracing::debug!("applying migrations...");
    MIGRATOR
        .run(mm.executor())
        .await
        .map_err(DatabaseError::from)?;

    let hash = hash_password(config.app().admin_password())?;
    if UserEntity::ensure_admin(mm, config.app().admin_username(), &hash).await? {
        tracing::info!(username = config.app().admin_username(), "admin account created");
    }
    Ok(())
}

fn build_state(mm: ModelManager, config: &'static Config) -> AppResult<AppState> {
    let gateway = payments::gateway_from_config(config.stripe())?;
    Ok(AppState::new(mm, gateway, config))
}

pub async fn build_server() -> AppResult<(AppState, Router)> {
    let use_local = cfg!(debug_assertions);
    let config = Config::get_or_init(use_local).await;
    let db = DbConnection::connect(config.app().database_uri())?;

    let mm = ModelManager::new(db);
    prepare_database(&mm, config).await?;

    let state = build_state(mm, config)?;
    let app = web::routes::build_app(state.clone());
    Ok((state, app))
}

/// Same server on an already migrated pool, used by the integration tests.
pub async fn build_server_with_pool(db: DbConnection) -> AppResult<(AppState, Router)> {
    let config = Config::get_or_init(true).await;

    let mm = ModelManager::new(db);
    let hash = hash_password(config.app().admin_password())?;
    UserEntity::ensure_admin(&mm, config.app().admin_username(), &hash).await?;

    let state = build_state(mm, config)?;
    let app = web::routes::build_app(state.clone());
    Ok((state, app))
}

#[tracing::instrument]
pub async fn setup_workers() -> AppResult<()> {
    let (state, app) = build_server().await?;
    let config = state.config();

    let payments = config.payments();
    let scheduler = payments
        .scheduler_enabled()
        .then(|| payments::scheduler::spawn(state.executor(), payments.scheduler_interval()));

    let listener = TcpListener::bind(config.host().bindto()).await?;
    tracing::info!("{APPLICATION_NAME} is starting at: {}", config.host().bindto());
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = scheduler {
        handle.abort();
    }
    Ok(())
}

fn setup_trace() {
    use tracing_error::ErrorLayer;
    use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

    // load .env file for RUST_LOG etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .with(ErrorLayer::default())
        .init();

    tracing::debug!("tracing initialized.");
}

#[tracing::instrument]
pub async fn run() -> AppResult<()> {
    setup_trace();
    setup_workers().await?;
    Ok(())
}
