// src/bin/guard_bench.rs

use indicatif::{ProgressBar, ProgressStyle};
use prettytable::{row, Table};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use structopt::StructOpt;
use tokio::sync::{Barrier, Semaphore};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use approval_guard::config::{AppConfig, RedisConfig};
use approval_guard::storage::{FastBackend, MemoryStorage, MemoryUserRepository, RedisStorage};
use approval_guard::{RateLimiter, ResilienceLayer, SystemClock};

#[derive(Debug, Clone, StructOpt)]
#[structopt(
    name = "guard_bench",
    about = "Benchmark admission decisions on the fast path and the local fallback"
)]
struct Opt {
    /// Decision path to benchmark
    #[structopt(short, long, possible_values = &["fast", "fallback", "all"], default_value = "all")]
    path: String,

    /// Fast backend to use for the fast path
    #[structopt(short, long, possible_values = &["memory", "redis"], default_value = "memory")]
    storage: String,

    /// Redis URL (when using Redis storage)
    #[structopt(long, default_value = "redis://localhost:6379")]
    redis_url: String,

    /// Requests allowed per identity per window
    #[structopt(short, long, default_value = "100")]
    capacity: u64,

    /// Window duration in seconds
    #[structopt(short, long, default_value = "60")]
    window_seconds: u64,

    /// Number of distinct identities requests are spread over
    #[structopt(short = "u", long, default_value = "50")]
    num_users: usize,

    /// Number of concurrent workers
    #[structopt(short = "k", long, default_value = "16")]
    workers: usize,

    /// Requests per worker per iteration
    #[structopt(short = "r", long, default_value = "1000")]
    requests_per_worker: usize,

    /// Number of iterations to run
    #[structopt(short, long, default_value = "3")]
    iterations: usize,

    /// Maximum in-flight requests
    #[structopt(long, default_value = "64")]
    concurrency: usize,

    /// Disable logs
    #[structopt(long)]
    disable_logs: bool,
}

struct BenchResult {
    name: String,
    total: usize,
    allowed: usize,
    denied: usize,
    elapsed: Duration,
    fail_open: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opt = Opt::from_args();

    let level = if opt.disable_logs { "error" } else { "info" };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(format!(
            "guard_bench={},approval_guard={}",
            level, level
        )))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Ctrl-C stops the run after the current batch
    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::SeqCst);
        })?;
    }

    let paths = if opt.path == "all" {
        vec!["fast", "fallback"]
    } else {
        vec![opt.path.as_str()]
    };

    let mut results = Vec::new();
    for path in paths {
        if stop.load(Ordering::SeqCst) {
            break;
        }

        let fast = match path {
            "fast" => Some(fast_backend(&opt).await?),
            _ => None,
        };
        let name = match &fast {
            Some(backend) => format!("fast ({})", backend.name()),
            None => "fallback (local buckets)".to_string(),
        };

        let layer = ResilienceLayer::from_parts(
            &AppConfig::default(),
            fast,
            Arc::new(MemoryUserRepository::new()),
            Arc::new(SystemClock),
        );
        results.push(run_benchmark(Arc::clone(&layer.rate_limiter), name, &opt, &stop).await);
    }

    print_results(&results);
    Ok(())
}

async fn fast_backend(opt: &Opt) -> Result<Arc<dyn FastBackend>, Box<dyn std::error::Error>> {
    match opt.storage.as_str() {
        "memory" => Ok(Arc::new(MemoryStorage::default())),
        "redis" => {
            let config = RedisConfig {
                url: opt.redis_url.clone(),
                connection_timeout: Duration::from_secs(5),
                operation_timeout: Duration::from_millis(500),
            };
            match RedisStorage::connect(config).await {
                Ok(storage) => Ok(Arc::new(storage)),
                Err(e) => {
                    error!("Failed to connect to Redis: {}", e);
                    Err(format!("Failed to connect to Redis: {}", e).into())
                }
            }
        }
        other => Err(format!("Unknown storage backend: {}", other).into()),
    }
}

async fn run_benchmark(
    limiter: Arc<RateLimiter>,
    name: String,
    opt: &Opt,
    stop: &Arc<AtomicBool>,
) -> BenchResult {
    let total_requests = (opt.iterations * opt.workers * opt.requests_per_worker) as u64;
    let progress = ProgressBar::new(total_requests);
    if let Ok(style) =
        ProgressStyle::with_template("{msg:28} [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
    {
        progress.set_style(style.progress_chars("##-"));
    }
    progress.set_message(name.clone());

    let allowed = Arc::new(AtomicUsize::new(0));
    let denied = Arc::new(AtomicUsize::new(0));
    let mut elapsed = Duration::ZERO;

    for iteration in 0..opt.iterations {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        info!("Starting iteration {} of {}", iteration + 1, opt.iterations);

        for user in 0..opt.num_users {
            limiter.reset(&format!("user_{}", user)).await;
        }

        let barrier = Arc::new(Barrier::new(opt.workers));
        let semaphore = Arc::new(Semaphore::new(opt.concurrency));
        let started = Instant::now();

        let handles: Vec<_> = (0..opt.workers)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                let barrier = Arc::clone(&barrier);
                let semaphore = Arc::clone(&semaphore);
                let allowed = Arc::clone(&allowed);
                let denied = Arc::clone(&denied);
                let stop = Arc::clone(stop);
                let progress = progress.clone();
                let (requests, users, capacity, window) = (
                    opt.requests_per_worker,
                    opt.num_users.max(1),
                    opt.capacity,
                    opt.window_seconds,
                );

                tokio::spawn(async move {
                    barrier.wait().await;
                    for _ in 0..requests {
                        if stop.load(Ordering::Relaxed) {
                            break;
                        }
                        let Ok(_permit) = semaphore.acquire().await else {
                            break;
                        };
                        let identity = format!("user_{}", rand::random_range(0..users));
                        if limiter.try_consume(&identity, capacity, window).await {
                            allowed.fetch_add(1, Ordering::Relaxed);
                        } else {
                            denied.fetch_add(1, Ordering::Relaxed);
                        }
                        progress.inc(1);
                    }
                })
            })
            .collect();

        futures::future::join_all(handles).await;
        elapsed += started.elapsed();
    }

    progress.finish();

    let allowed = allowed.load(Ordering::SeqCst);
    let denied = denied.load(Ordering::SeqCst);
    BenchResult {
        name,
        total: allowed + denied,
        allowed,
        denied,
        elapsed,
        fail_open: limiter.error_count(),
    }
}

fn print_results(results: &[BenchResult]) {
    let mut table = Table::new();
    table.set_titles(row![
        "Path", "Requests", "Allowed", "Denied", "Fail-open", "Elapsed", "Req/sec"
    ]);

    for result in results {
        let per_second = if result.elapsed.is_zero() {
            0.0
        } else {
            result.total as f64 / result.elapsed.as_secs_f64()
        };
        table.add_row(row![
            result.name,
            result.total,
            result.allowed,
            result.denied,
            result.fail_open,
            format!("{:.2?}", result.elapsed),
            format!("{:.0}", per_second)
        ]);
    }

    println!();
    table.printstd();
}
