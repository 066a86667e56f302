//! Ginchy Generation Worker
//!
//! Processes async generation jobs from the `generation_jobs` table:
//! 1. Claims the oldest pending job (skipping rows other workers hold)
//! 2. Runs it through the generation orchestrator
//! 3. Records the image URL or the user-facing failure
//! 4. Periodically requeues jobs abandoned mid-flight

mod processor;

use crate::processor::{JobProcessor, ProcessorConfig};
use ginchy_common::{
    config::{AppConfig, ObservabilityConfig},
    db::{DbPool, Repository, Store},
    generation::GenerationService,
    metrics,
    providers::ProviderSet,
    VERSION,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

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

    info!("Starting Ginchy Generation Worker v{}", VERSION);

    install_prometheus(config.observability.metrics_port)?;
    metrics::register_metrics();

    // Initialize database connection
    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;
    let store: Arc<dyn Store> = Arc::new(Repository::new(db));

    // Initialize orchestrator
    let providers = Arc::new(ProviderSet::from_config(&config.providers)?);
    let generation = Arc::new(GenerationService::new(
        store.clone(),
        providers,
        config.generation.clone(),
    ));

    let processor = Arc::new(JobProcessor::new(
        store,
        generation,
        ProcessorConfig {
            lease: Duration::from_secs(config.worker.lease_secs),
            max_attempts: config.worker.max_attempts,
        },
    ));

    // Stale job sweeper
    let sweeper = processor.clone();
    let sweep_every = Duration::from_secs((config.worker.lease_secs / 4).max(15));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_every);
        loop {
            ticker.tick().await;
            if let Err(e) = sweeper.sweep_stale().await {
                error!(error = %e, "Failed to sweep stale jobs");
            }
        }
    });

    info!("Generation worker ready, polling for jobs...");

    let idle = Duration::from_millis(config.worker.idle_poll_ms);

    // Circuit breaker state
    let mut consecutive_failures = 0;
    const MAX_FAILURES: u32 = 5;
    const CIRCUIT_BREAK_DURATION: Duration = Duration::from_secs(30);

    loop {
        // Circuit breaker check
        if consecutive_failures >= MAX_FAILURES {
            warn!(
                failures = consecutive_failures,
                "Circuit breaker open, pausing..."
            );
            tokio::time::sleep(CIRCUIT_BREAK_DURATION).await;
            consecutive_failures = 0;
            info!("Circuit breaker reset, resuming...");
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            result = processor.run_once() => {
                match result {
                    Ok(Some(_)) => {
                        consecutive_failures = 0;
                    }
                    Ok(None) => {
                        consecutive_failures = 0;
                        tokio::time::sleep(idle).await;
                    }
                    Err(e) => {
                        consecutive_failures += 1;
                        error!(
                            error = %e,
                            failures = consecutive_failures,
                            "Failed to process generation job"
                        );
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }
    }

    info!("Generation worker shutting down");
    Ok(())
}
