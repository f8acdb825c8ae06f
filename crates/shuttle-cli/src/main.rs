use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use rand::Rng;
use serde::Serialize;
use tokio::sync::mpsc;

use shuttle_core::{
    BoxError, Dispatcher, DrainPolicy, Handler, PoolBuilder, PoolStats, QueueCapacity,
    ShuttleConfig, Source, WorkItem, WorkerError,
};

/// Drive a Shuttle pool or dispatcher with synthetic work.
///
/// Defaults come from `SHUTTLE_*` environment variables (a `.env` file is
/// honoured); flags override them.
#[derive(Parser, Debug)]
#[command(name = "shuttle", version, about = "Worker pool and race dispatcher playground")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run synthetic items through a worker pool and print its stats.
    Pool(PoolArgs),
    /// Race one query against simulated replicas.
    Race(RaceArgs),
}

#[derive(Args, Debug)]
struct PoolArgs {
    /// Number of items to submit.
    #[arg(long, default_value_t = 100)]
    items: usize,

    /// Overrides `SHUTTLE_WORKERS`.
    #[arg(long)]
    workers: Option<usize>,

    /// Overrides `SHUTTLE_QUEUE_CAPACITY` (a number or `unbounded`).
    #[arg(long)]
    queue_capacity: Option<QueueCapacity>,

    /// Overrides `SHUTTLE_DRAIN_POLICY` (`drain` or `stop`).
    #[arg(long)]
    drain_policy: Option<DrainPolicy>,

    /// Every K-th item returns an error.
    #[arg(long)]
    fail_every: Option<usize>,

    /// Every K-th item panics.
    #[arg(long)]
    panic_every: Option<usize>,

    /// Upper bound for the simulated work time of one item.
    #[arg(long, default_value_t = 20)]
    max_latency_ms: u64,
}

#[derive(Args, Debug)]
struct RaceArgs {
    /// Number of simulated replicas.
    #[arg(long, default_value_t = 3)]
    replicas: usize,

    /// Overrides `SHUTTLE_DISPATCH_TIMEOUT_MS`.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Probability that a replica answers with an error.
    #[arg(long, default_value_t = 0.2)]
    fail_rate: f64,

    /// Upper bound for a replica's simulated latency.
    #[arg(long, default_value_t = 200)]
    max_latency_ms: u64,

    /// Query sent to every replica.
    #[arg(long, default_value = "ping")]
    query: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let config = ShuttleConfig::from_env().context("reading SHUTTLE_* environment")?;

    match cli.command {
        Command::Pool(args) => run_pool(config, args).await,
        Command::Race(args) => run_race(config, args).await,
    }
}

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .init();
}

/// Synthetic job: sleeps for a random time, fails or panics on schedule.
struct SyntheticJob {
    fail_every: Option<usize>,
    panic_every: Option<usize>,
    max_latency: Duration,
}

fn nth(every: Option<usize>, n: usize) -> bool {
    matches!(every, Some(k) if k > 0 && n % k == 0)
}

#[async_trait]
impl Handler<usize> for SyntheticJob {
    async fn handle(&self, n: usize) -> Result<(), BoxError> {
        let latency = random_latency(self.max_latency);
        tokio::time::sleep(latency).await;

        if nth(self.panic_every, n) {
            panic!("job {n} hit a scheduled panic");
        }
        if nth(self.fail_every, n) {
            return Err(format!("job {n} hit a scheduled failure").into());
        }
        tracing::debug!(job = n, ?latency, "job done");
        Ok(())
    }
}

#[derive(Serialize)]
struct PoolReport {
    stats: PoolStats,
    errors_reported: usize,
}

async fn run_pool(config: ShuttleConfig, args: PoolArgs) -> anyhow::Result<()> {
    let mut pool_config = config.pool;
    if let Some(workers) = args.workers {
        pool_config.workers = workers;
    }
    if let Some(capacity) = args.queue_capacity {
        pool_config.queue_capacity = capacity;
    }
    if let Some(policy) = args.drain_policy {
        pool_config.drain_policy = policy;
    }

    let (tx, mut errors) = mpsc::unbounded_channel::<WorkerError>();
    let pool = PoolBuilder::from_config(&pool_config)
        .report_to(tx)
        .build()
        .context("starting pool")?;
    tracing::info!(
        workers = pool_config.workers,
        items = args.items,
        policy = ?pool_config.drain_policy,
        "pool demo starting"
    );

    let job = Arc::new(SyntheticJob {
        fail_every: args.fail_every,
        panic_every: args.panic_every,
        max_latency: Duration::from_millis(args.max_latency_ms),
    });
    for n in 1..=args.items {
        let item = WorkItem::handled(Arc::clone(&job), n).with_label(format!("job-{n}"));
        pool.submit(item).await?;
    }

    pool.shutdown();
    pool.wait().await;

    let mut errors_reported = 0;
    while errors.try_recv().is_ok() {
        errors_reported += 1;
    }
    let report = PoolReport {
        stats: pool.stats(),
        errors_reported,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// A replica that answers after a random delay, sometimes with an error.
struct Replica {
    name: String,
    fail_rate: f64,
    max_latency: Duration,
}

#[async_trait]
impl Source<String, String> for Replica {
    async fn call(&self, query: String) -> Result<String, BoxError> {
        let latency = random_latency(self.max_latency);
        let fails = rand::thread_rng().gen_bool(self.fail_rate.clamp(0.0, 1.0));
        tokio::time::sleep(latency).await;

        if fails {
            return Err(format!("{} is unavailable", self.name).into());
        }
        Ok(format!("{} answered {query:?} after {latency:?}", self.name))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

async fn run_race(config: ShuttleConfig, args: RaceArgs) -> anyhow::Result<()> {
    let mut dispatch_config = config.dispatch;
    if let Some(ms) = args.timeout_ms {
        dispatch_config.default_timeout = Duration::from_millis(ms);
    }
    let dispatcher = Dispatcher::from_config(dispatch_config);

    let sources: Vec<Arc<dyn Source<String, String>>> = (1..=args.replicas)
        .map(|i| {
            Arc::new(Replica {
                name: format!("replica-{i}"),
                fail_rate: args.fail_rate,
                max_latency: Duration::from_millis(args.max_latency_ms),
            }) as Arc<dyn Source<String, String>>
        })
        .collect();

    match dispatcher.dispatch_default(&sources, args.query).await {
        Ok(won) => {
            println!("{}", serde_json::to_string_pretty(&won)?);
            Ok(())
        }
        Err(e) => anyhow::bail!(e),
    }
}

fn random_latency(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}
