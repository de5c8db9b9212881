use std::{
    error::Error,
    future::Future,
    sync::{Arc, OnceLock},
    time::Duration,
};

use axum::{
    Extension, Router,
    http::{HeaderValue, Method, StatusCode, header},
    middleware,
    response::IntoResponse,
    routing::get,
    serve,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use shared::config::server::{Config, DatabaseConfig, LogFormat, StoreBackend};
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{EnvFilter, fmt};

use crate::{
    app_state::AppState,
    db::bootstrap,
    handlers,
    middleware::{
        auth::require_bearer,
        request_context::{self, RequestIdState},
    },
    routes::{self, openapi::openapi_routes},
    store::{MemoryStore, PgStore, Store},
    tracer,
};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Process-wide Prometheus handle. The recorder is installed on first use.
pub fn metrics_handle() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .unwrap_or_else(|err| {
                    warn!(error = %err, "global metrics recorder already set; exporting a detached registry");
                    PrometheusBuilder::new().build_recorder().handle()
                })
        })
        .clone()
}

async fn metrics_endpoint(Extension(handle): Extension<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        )],
        handle.render(),
    )
}

/// Installs the global tracing subscriber and returns the configured level.
///
/// A second call is a no-op; the first subscriber stays in place.
pub fn initialize_tracing(config: &Config) -> String {
    let env_filter = build_env_filter(config);

    let fmt_builder = fmt::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false);

    let installed = if matches!(config.logging.format, LogFormat::Json) {
        fmt_builder.json().with_ansi(false).try_init()
    } else {
        fmt_builder.with_ansi(true).try_init()
    };
    if installed.is_err() {
        warn!("tracing subscriber already installed");
    }

    config.logging.level.clone()
}

fn build_env_filter(config: &Config) -> EnvFilter {
    let default_level = config
        .logging
        .level
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::INFO);

    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy()
    })
}

/// # Errors
/// Returns an error if the database connection pool cannot be created.
pub async fn create_database_pool(db: &DatabaseConfig) -> Result<sqlx::PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(db.max_connections)
        .connect(&db.url)
        .await?;
    metrics::gauge!("db_pool_max_connections").set(f64::from(db.max_connections));
    Ok(pool)
}

/// Builds the store selected by `store.backend`. Postgres is probed and
/// bootstrapped before it is handed out.
///
/// # Errors
/// Returns an error if the database is unreachable or a bootstrap script fails.
pub async fn create_store(config: &Config) -> Result<Arc<dyn Store>, Box<dyn Error>> {
    match config.store.backend {
        StoreBackend::Memory => {
            warn!("using the in-memory store; data is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Postgres => {
            let pool = create_database_pool(&config.db).await?;
            bootstrap::ensure_liveness(&pool).await?;
            bootstrap::run(&pool, &config.db).await?;
            Ok(Arc::new(PgStore::new(pool)))
        }
    }
}

#[must_use]
pub fn create_app_state(store: Arc<dyn Store>, config: Arc<Config>) -> Arc<AppState> {
    Arc::new(AppState::new(store, config))
}

/// An empty origin list allows any origin.
#[must_use]
pub fn create_cors_layer(config: &Config) -> CorsLayer {
    let methods = vec![Method::GET, Method::POST, Method::OPTIONS];

    let mut cors = CorsLayer::new()
        .allow_methods(AllowMethods::list(methods))
        .allow_headers(AllowHeaders::any())
        .allow_credentials(config.server.cors.allow_credentials)
        .max_age(Duration::from_secs(config.server.cors.max_age_seconds));

    if config.server.cors.allowed_origins.is_empty() {
        cors = cors.allow_origin(AllowOrigin::any());
    } else {
        let origins = config
            .server
            .cors
            .allowed_origins
            .iter()
            .filter_map(|origin| HeaderValue::from_str(origin).ok())
            .collect::<Vec<_>>();
        cors = cors.allow_origin(AllowOrigin::list(origins));
    }

    cors
}

/// REST routes behind bearer auth, plus the WebSocket endpoint, which
/// authenticates during the handshake itself.
pub fn create_api_router(state: &Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .merge(handlers::messages::routes())
        .merge(handlers::users::routes())
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(state),
            require_bearer,
        ))
        .route("/ws", get(handlers::ws::connect))
}

pub fn create_app_router(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let cors = create_cors_layer(&state.config);
    let request_id_state = RequestIdState::from_config(&state.config);

    Router::new()
        .nest("/api", create_api_router(&state))
        .merge(routes::health::create_health_router())
        .route("/metrics", get(metrics_endpoint))
        .merge(openapi_routes())
        .layer(Extension(metrics_handle))
        .layer(cors)
        .layer(tracer::create_trace_layer())
        .layer(axum::middleware::from_fn_with_state(
            request_id_state,
            request_context::assign_request_id,
        ))
        .with_state(state)
}

pub async fn create_shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for CTRL+C; shutting down");
    }
    info!("Shutting down...");
}

/// Serves `app` on an already-bound listener until `shutdown` resolves.
///
/// # Errors
/// Returns an error if accepting connections fails.
pub async fn serve_until<F>(listener: TcpListener, app: Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    serve(listener, app).with_graceful_shutdown(shutdown).await
}

/// Starts the delivery server on `server.host:server.port`.
///
/// # Errors
/// Returns an error if the store cannot be prepared or the listener fails.
pub async fn run(config: Config) -> Result<(), Box<dyn Error>> {
    initialize_tracing(&config);
    info!(profile = ?config.profile, backend = ?config.store.backend, "Starting server...");

    let metrics_handle = metrics_handle();
    let config = Arc::new(config);
    let store = create_store(&config).await?;
    let state = create_app_state(store, Arc::clone(&config));
    let app = create_app_router(state, metrics_handle);

    let listener = TcpListener::bind((config.server.host.as_str(), config.server.port)).await?;
    info!("Listening on {}", listener.local_addr()?);

    serve_until(listener, app, create_shutdown_signal()).await?;
    Ok(())
}
