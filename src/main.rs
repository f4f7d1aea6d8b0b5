use dotenv::dotenv;
use std::env;
use std::process;
use std::time::Duration;
use tokio::time;
use tracing::{debug, error, info};

use approval_guard::logging;
use approval_guard::{AppConfig, ResilienceLayer};

#[tokio::main]
async fn main() {
    dotenv().ok();
    if env::var("LOG_FORMAT").map(|f| f == "json").unwrap_or(false) {
        logging::init_json();
    } else {
        logging::init();
    }
    info!("Approval guard starting up");

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            process::exit(1);
        }
    };
    // URLs may carry credentials, so only their presence is logged
    debug!(
        redis = config.redis.is_some(),
        database = config.database.is_some(),
        "Configuration loaded"
    );

    let layer = match ResilienceLayer::build(&config).await {
        Ok(layer) => layer,
        Err(e) => {
            error!(severity = "critical", "Refusing to start: {}", e);
            process::exit(1);
        }
    };

    info!(
        mode = ResilienceLayer::mode_label(config.mode),
        fast_backend = layer.health.has_backend(),
        fast_backend_healthy = layer.health.is_healthy(),
        "Resilience layer initialized"
    );

    let tasks = layer.start();
    let mut report = time::interval(config.health_check.check_interval.max(Duration::from_secs(1)));

    loop {
        tokio::select! {
            _ = report.tick() => {
                match serde_json::to_string(&layer.health.metrics()) {
                    Ok(status) => info!(status = %status, stats = ?layer.rate_limiter.stats(), "Health report"),
                    Err(e) => error!("Failed to encode health status: {}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    tasks.shutdown().await;
}
