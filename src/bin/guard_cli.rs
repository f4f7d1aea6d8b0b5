// src/bin/guard_cli.rs

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use structopt::StructOpt;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use approval_guard::config::AppConfig;
use approval_guard::error::{GuardError, Result as GuardResult};
use approval_guard::storage::{
    FastBackend, MemoryStorage, MemoryUserRepository, WindowRequest,
};
use approval_guard::{Clock, ManualClock, ResilienceLayer, RuntimeMode};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "guard_cli",
    about = "Simulate admission control and credential storage across backend outages"
)]
struct Opt {
    /// Simulation to run
    #[structopt(long, possible_values = &["burst", "steady", "outage"], default_value = "burst")]
    simulation: String,

    /// Identity to rate limit
    #[structopt(short, long, default_value = "198.51.100.23")]
    key: String,

    /// Requests allowed per window
    #[structopt(short, long, default_value = "10")]
    capacity: u64,

    /// Window duration in seconds
    #[structopt(short, long, default_value = "60")]
    window_seconds: u64,

    /// Number of requests to simulate
    #[structopt(short = "n", long, default_value = "20")]
    num_requests: usize,

    /// Simulated time between requests in milliseconds (steady and outage modes)
    #[structopt(short = "t", long, default_value = "1000")]
    request_interval_ms: u64,

    /// Request number at which the fast backend goes down (outage mode)
    #[structopt(long, default_value = "5")]
    outage_at: usize,

    /// Run without a fast backend at all
    #[structopt(long)]
    no_fast_backend: bool,

    /// Use strict mode
    #[structopt(long)]
    strict: bool,

    /// Verbosity level
    #[structopt(short, long, parse(from_occurrences))]
    verbose: usize,

    /// Disable logs
    #[structopt(long)]
    disable_logs: bool,
}

/// In-memory fast backend with an outage switch
#[derive(Debug)]
struct SwitchableBackend {
    inner: MemoryStorage,
    down: AtomicBool,
}

impl SwitchableBackend {
    fn check(&self) -> GuardResult<()> {
        if self.down.load(Ordering::SeqCst) {
            Err(GuardError::BackendUnavailable(
                "simulated outage".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl FastBackend for SwitchableBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> GuardResult<()> {
        self.check()
    }

    async fn get(&self, key: &str) -> GuardResult<Option<String>> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> GuardResult<()> {
        self.check()?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> GuardResult<bool> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> GuardResult<bool> {
        self.check()?;
        self.inner.exists(key).await
    }

    async fn admit(&self, key: &str, request: &WindowRequest) -> GuardResult<bool> {
        self.check()?;
        self.inner.admit(key, request).await
    }
}

struct Simulation {
    layer: ResilienceLayer,
    backend: Option<Arc<SwitchableBackend>>,
    clock: Arc<ManualClock>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opt = Opt::from_args();

    let log_level = if opt.disable_logs {
        "error"
    } else {
        match opt.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(format!(
            "guard_cli={},approval_guard={}",
            log_level, log_level
        )))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mode = if opt.strict {
        RuntimeMode::Strict
    } else {
        RuntimeMode::Permissive
    };
    let config = AppConfig {
        mode,
        ..AppConfig::default()
    };

    let clock = Arc::new(ManualClock::starting_now());
    let backend = if opt.no_fast_backend {
        None
    } else {
        Some(Arc::new(SwitchableBackend {
            inner: MemoryStorage::new(clock.clone()),
            down: AtomicBool::new(false),
        }))
    };

    let users = MemoryUserRepository::new();
    users.insert_user(1);

    let fast: Option<Arc<dyn FastBackend>> = backend
        .clone()
        .map(|b| -> Arc<dyn FastBackend> { b });
    let layer = ResilienceLayer::from_parts(&config, fast, Arc::new(users), clock.clone());

    info!(
        mode = ResilienceLayer::mode_label(mode),
        fast_backend = !opt.no_fast_backend,
        "Starting guard CLI with {} simulation",
        opt.simulation
    );

    let sim = Simulation {
        layer,
        backend,
        clock,
    };

    match opt.simulation.as_str() {
        "burst" => simulate_burst(&opt, &sim).await,
        "steady" => simulate_steady(&opt, &sim).await,
        "outage" => simulate_outage(&opt, &sim).await,
        other => {
            error!("Unknown simulation mode: {}", other);
            Err("Unknown simulation mode".into())
        }
    }
}

// Simulate a burst of requests all at the same instant
async fn simulate_burst(opt: &Opt, sim: &Simulation) -> Result<(), Box<dyn std::error::Error>> {
    let limiter = &sim.layer.rate_limiter;
    let mut allowed_count = 0;
    let mut denied_count = 0;

    for i in 0..opt.num_requests {
        if limiter
            .try_consume(&opt.key, opt.capacity, opt.window_seconds)
            .await
        {
            allowed_count += 1;
            info!("Request {}: ALLOWED", i + 1);
        } else {
            denied_count += 1;
            warn!("Request {}: DENIED (limit: {})", i + 1, opt.capacity);
        }
    }

    print_summary("Burst", opt.num_requests, allowed_count, denied_count, sim);
    Ok(())
}

// Simulate a steady stream of requests on the simulated clock
async fn simulate_steady(opt: &Opt, sim: &Simulation) -> Result<(), Box<dyn std::error::Error>> {
    let limiter = &sim.layer.rate_limiter;
    let interval = Duration::from_millis(opt.request_interval_ms);
    let mut allowed_count = 0;
    let mut denied_count = 0;

    for i in 0..opt.num_requests {
        if limiter
            .try_consume(&opt.key, opt.capacity, opt.window_seconds)
            .await
        {
            allowed_count += 1;
            info!("Request {} at +{}ms: ALLOWED", i + 1, i as u64 * opt.request_interval_ms);
        } else {
            denied_count += 1;
            warn!("Request {} at +{}ms: DENIED", i + 1, i as u64 * opt.request_interval_ms);
        }
        sim.clock.advance(interval);
    }

    print_summary("Steady", opt.num_requests, allowed_count, denied_count, sim);
    Ok(())
}

// Take the fast backend down part way through, then bring it back
async fn simulate_outage(opt: &Opt, sim: &Simulation) -> Result<(), Box<dyn std::error::Error>> {
    let limiter = &sim.layer.rate_limiter;
    let tokens = &sim.layer.token_store;
    let interval = Duration::from_millis(opt.request_interval_ms);
    let recover_at = opt.outage_at + opt.num_requests / 2;
    let mut allowed_count = 0;
    let mut denied_count = 0;

    tokens.save(1, "cli-refresh-token", 3600).await?;

    for i in 0..opt.num_requests {
        if let Some(backend) = &sim.backend {
            if i == opt.outage_at {
                backend.down.store(true, Ordering::SeqCst);
                sim.layer.health.probe().await;
                warn!("Fast backend taken down at request {}", i + 1);
            } else if i == recover_at {
                backend.down.store(false, Ordering::SeqCst);
                sim.layer.health.probe().await;
                info!("Fast backend restored at request {}", i + 1);
            }
        }

        let admitted = limiter
            .try_consume(&opt.key, opt.capacity, opt.window_seconds)
            .await;
        let token_ok = tokens.validate(1, "cli-refresh-token").await;
        if admitted {
            allowed_count += 1;
        } else {
            denied_count += 1;
        }
        info!(
            request = i + 1,
            admitted,
            healthy = sim.layer.health.is_healthy(),
            token_valid = token_ok,
            "Outage step"
        );
        sim.clock.advance(interval);
    }

    print_summary("Outage", opt.num_requests, allowed_count, denied_count, sim);
    Ok(())
}

fn print_summary(name: &str, total: usize, allowed: usize, denied: usize, sim: &Simulation) {
    let stats = sim.layer.rate_limiter.stats();
    let health = sim.layer.health.metrics();

    println!("\n{} Simulation Results:", name);
    println!("{}", "-".repeat(name.len() + 20));
    println!("Total requests:      {}", total);
    println!("Allowed:             {}", allowed);
    println!("Denied:              {}", denied);
    println!("Fast path decisions: {}", stats.fast_path_decisions);
    println!("Fallback decisions:  {}", stats.fallback_decisions);
    println!("Fail-open errors:    {}", stats.fail_open_errors);
    println!("Backend healthy:     {}", health.healthy);
    println!("Simulated time:      {}", sim.clock.now().to_rfc3339());
}
