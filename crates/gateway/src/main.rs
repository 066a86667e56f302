//! Ginchy API Gateway
//!
//! The main entry point for all client API requests.
//! Handles:
//! - Authentication
//! - Rate limiting on generation routes
//! - Request routing
//! - Observability (logging, metrics)

mod handlers;
mod middleware;


use axum::{
    extract::FromRef,
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post},
    Router,
};
use ginchy_common::{
    auth::JwtManager,
    characters::{CharacterService, ReplicateTrainer, Trainer},
    config::{AppConfig, ObservabilityConfig},
    db::{DbPool, Repository, Store},
    errors::AppError,
    generation::GenerationService,
    metrics,
    providers::ProviderSet,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn Store>,
    pub generation: Arc<GenerationService>,
    pub characters: Arc<CharacterService>,
    pub jwt: Arc<JwtManager>,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        store: Arc<dyn Store>,
        providers: Arc<ProviderSet>,
        trainer: Option<Arc<dyn Trainer>>,
    ) -> Result<Self, AppError> {
        let secret = config
            .auth
            .jwt_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::Configuration {
                message: "SUPABASE_JWT_SECRET is not set".to_string(),
            })?;
        let jwt = JwtManager::new(secret, &config.auth.jwt_audience);

        let generation = GenerationService::new(store.clone(), providers, config.generation.clone());
        let characters = CharacterService::new(store.clone(), trainer, config.training.clone());

        Ok(Self {
            config,
            store,
            generation: Arc::new(generation),
            characters: Arc::new(characters),
            jwt: Arc::new(jwt),
        })
    }
}

impl FromRef<AppState> for Arc<JwtManager> {
    fn from_ref(state: &AppState) -> Self {
        state.jwt.clone()
    }
}

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn install_prometheus(port: u16) -> anyhow::Result<()> {
    if port == 0 {
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
        .set_buckets_for_metric(
            Matcher::Suffix("request_duration_seconds".to_string()),
            metrics::LATENCY_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Suffix("generation_duration_seconds".to_string()),
            metrics::GENERATION_BUCKETS,
        )?
        .install()?;

    info!(port, "Prometheus exporter listening");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Arc::new(AppConfig::load()?);

    // Initialize tracing
    init_tracing(&config.observability);

    info!(
        service = %config.observability.service_name,
        "Starting Ginchy API Gateway v{}",
        ginchy_common::VERSION
    );

    // Initialize metrics
    install_prometheus(config.observability.metrics_port)?;
    metrics::register_metrics();

    // Initialize database connection
    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;
    if config.database.run_migrations {
        db.run_migrations(&config.database.migrations_path).await?;
    }

    // Provider adapters
    let providers = Arc::new(ProviderSet::from_config(&config.providers)?);
    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()?;
    let trainer: Option<Arc<dyn Trainer>> = Some(Arc::new(ReplicateTrainer::new(
        http,
        &config.providers,
        &config.training,
    )));

    // Create app state
    let store: Arc<dyn Store> = Arc::new(Repository::new(db));
    let state = AppState::new(config.clone(), store, providers, trainer)?;

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                shutdown_rx.await.ok();
            })
            .await
    });

    tokio::select! {
        joined = &mut server => {
            joined??;
            return Ok(());
        }
        _ = shutdown_signal() => {}
    }

    shutdown_tx.send(()).ok();
    if drain(server, config.shutdown_timeout()).await? {
        info!("Server shutdown complete");
    } else {
        warn!(
            timeout_secs = config.server.shutdown_timeout_secs,
            "Shutdown timeout elapsed, dropping in-flight requests"
        );
    }
    Ok(())
}

/// Wait up to `timeout` for the server to finish in-flight requests.
/// Returns `false` when the deadline cut the drain short.
async fn drain(mut server: JoinHandle<std::io::Result<()>>, timeout: Duration) -> anyhow::Result<bool> {
    match tokio::time::timeout(timeout, &mut server).await {
        Ok(joined) => {
            joined??;
            Ok(true)
        }
        Err(_) => {
            server.abort();
            Ok(false)
        }
    }
}

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    // Generation endpoints (rate limited)
    let mut generation_routes = Router::new()
        .route("/generate", post(handlers::generate::generate))
        .route("/generate/async", post(handlers::generate::generate_async))
        .route("/clothing/apply", post(handlers::generate::apply_clothing));

    let limits = &state.config.rate_limit;
    if limits.enabled {
        let limiter = middleware::rate_limit::create_rate_limiter(limits.requests_per_second, limits.burst);
        generation_routes = generation_routes
            .route_layer(from_fn_with_state(limiter, middleware::rate_limit::rate_limit_middleware));
    }

    // API routes
    let api_routes = Router::new()
        // Health endpoints (no auth)
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))

        // Package table (no auth)
        .route("/packages", get(handlers::packages::list_packages))
        .route("/packages/{tier}", get(handlers::packages::get_package))

        // Account
        .route("/account", get(handlers::account::get_account))

        // Job endpoints
        .route("/jobs/{id}", get(handlers::jobs::get_job))

        // Creations
        .route("/creations", get(handlers::creations::list_creations))
        .route("/creations/{id}", delete(handlers::creations::delete_creation))

        // Assets
        .route("/assets", get(handlers::assets::list_assets))
        .route("/assets/{id}", delete(handlers::assets::delete_asset))

        // Characters
        .route("/characters", post(handlers::characters::create_character))
        .route("/characters/{id}", get(handlers::characters::get_character))
        .route("/characters/{id}/training", post(handlers::characters::training_callback))

        .merge(generation_routes)
        .route_layer(from_fn(middleware::track_metrics));

    // Compose the app
    Router::new()
        .nest("/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(propagate_id)
        .layer(request_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
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
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
