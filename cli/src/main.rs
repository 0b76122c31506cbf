//! breakerkit CLI — inspect breaker configs and simulate breakers from the terminal.
//!
//! Usage:
//! ```bash
//! # Print the default breaker config as JSON
//! breakerkit defaults
//!
//! # Validate a registry config file
//! breakerkit check --config breakers.json
//!
//! # Drive a breaker against a dependency that fails 60% of the time
//! breakerkit simulate --failure-rate 0.6 --calls 200 --interval-ms 5
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use breakerkit_core::{
    BreakerConfig, CallContext, CircuitBreaker, MetricsRegistry, Stats, UnstableService,
};
use breakerkit_observability::{init_tracing, BreakerMetrics, LogConfig};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(
    name = "breakerkit",
    about = "Circuit breaker toolkit — inspect configs and simulate breakers",
    version
)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the default breaker configuration as JSON
    Defaults,

    /// Parse and validate a registry config file
    Check {
        /// Path to the JSON config file
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Run an unstable dependency through a circuit breaker
    Simulate {
        /// Probability in [0, 1] that a call fails
        #[arg(long, default_value_t = 0.5)]
        failure_rate: f64,
        /// Total number of calls to issue
        #[arg(long, default_value_t = 100)]
        calls: u32,
        /// Artificial latency of the dependency, in milliseconds
        #[arg(long, default_value_t = 0)]
        delay_ms: u64,
        /// Pause between calls of one worker, in milliseconds
        #[arg(long, default_value_t = 10)]
        interval_ms: u64,
        /// Number of concurrent workers
        #[arg(long, default_value_t = 4)]
        concurrency: u32,
        /// Seed for a reproducible failure sequence
        #[arg(long)]
        seed: Option<u64>,
        /// Registry config file to take the breaker config from
        #[arg(long)]
        config: Option<PathBuf>,
        /// Breaker name inside the config file (default: first entry)
        #[arg(long)]
        breaker: Option<String>,
        /// Print final stats as JSON
        #[arg(long)]
        json: bool,
    },
}

/// On-disk registry description: logging plus one breaker config per dependency.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryConfig {
    #[serde(default)]
    log: LogConfig,
    #[serde(default)]
    breakers: BTreeMap<String, BreakerConfig>,
}

impl RegistryConfig {
    fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parsing {}", path.display()))?;
        for (name, breaker) in &config.breakers {
            breaker
                .validate()
                .with_context(|| format!("breaker '{name}'"))?;
        }
        Ok(config)
    }

    fn build_registry(&self) -> Result<MetricsRegistry> {
        let registry = MetricsRegistry::new();
        for (name, config) in &self.breakers {
            registry.get_or_register(name, config.clone())?;
        }
        Ok(registry)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let file_config = match &cli.command {
        Commands::Check { config } => Some(RegistryConfig::load(config)?),
        Commands::Simulate {
            config: Some(path), ..
        } => Some(RegistryConfig::load(path)?),
        _ => None,
    };

    let mut log = file_config
        .as_ref()
        .map(|c| c.log.clone())
        .unwrap_or_default();
    if cli.verbose {
        log = log.with_level("debug");
    }
    init_tracing(&log).map_err(|e| anyhow!("initialising logging: {e}"))?;

    match cli.command {
        Commands::Defaults => cmd_defaults(),
        Commands::Check { .. } => cmd_check(file_config.unwrap_or_default()),
        Commands::Simulate {
            failure_rate,
            calls,
            delay_ms,
            interval_ms,
            concurrency,
            seed,
            breaker,
            json,
            ..
        } => {
            let config = pick_breaker_config(file_config.as_ref(), breaker.as_deref())?;
            let service =
                UnstableService::new(failure_rate).with_delay(Duration::from_millis(delay_ms));
            let service = match seed {
                Some(seed) => service.with_seed(seed),
                None => service,
            };
            let run = Simulation {
                config,
                service: Arc::new(service),
                calls,
                concurrency: concurrency.max(1),
                interval: Duration::from_millis(interval_ms),
            };
            cmd_simulate(run, json).await
        }
    }
}

fn cmd_defaults() -> Result<()> {
    let json = serde_json::to_string_pretty(&BreakerConfig::default())?;
    println!("{json}");
    Ok(())
}

fn cmd_check(config: RegistryConfig) -> Result<()> {
    let registry = config.build_registry()?;
    if registry.is_empty() {
        println!("No breakers configured.");
        return Ok(());
    }
    println!("{} breaker(s) OK:\n", registry.len());
    for name in registry.names() {
        let Some(breaker) = registry.get(&name) else {
            continue;
        };
        let c = breaker.config();
        println!("  {name}");
        println!(
            "    failures to trip: {}   successes to close: {}   max probes: {}",
            c.failure_threshold, c.success_threshold, c.max_requests
        );
        println!(
            "    timeout: {}ms   recovery: {}ms   window: {}ms",
            c.timeout.as_millis(),
            c.recovery_timeout.as_millis(),
            c.sliding_window.as_millis()
        );
    }
    Ok(())
}

fn pick_breaker_config(file: Option<&RegistryConfig>, name: Option<&str>) -> Result<BreakerConfig> {
    let Some(file) = file else {
        if let Some(name) = name {
            bail!("--breaker {name} given without --config");
        }
        return Ok(BreakerConfig::default().with_recovery_timeout(Duration::from_millis(500)));
    };
    match name {
        Some(name) => file
            .breakers
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("breaker '{name}' not found in config")),
        None => file
            .breakers
            .values()
            .next()
            .cloned()
            .ok_or_else(|| anyhow!("config file defines no breakers")),
    }
}

struct Simulation {
    config: BreakerConfig,
    service: Arc<UnstableService>,
    calls: u32,
    concurrency: u32,
    interval: Duration,
}

async fn cmd_simulate(run: Simulation, json: bool) -> Result<()> {
    let breaker = CircuitBreaker::named("simulated", run.config)?;
    let registry = MetricsRegistry::new();
    registry.register("simulated", breaker.clone());

    let metrics = BreakerMetrics::new(&opentelemetry::global::meter("breakerkit"));
    metrics.attach("simulated", &breaker);

    let started = Instant::now();
    if !json {
        breaker.on_state_change(move |from, to| {
            println!("  [{:>6}ms] {from} → {to}", started.elapsed().as_millis());
        });
        println!(
            "Simulating {} calls ({} workers, failure rate {:.2})...",
            run.calls,
            run.concurrency,
            run.service.failure_rate()
        );
    }

    let mut workers = tokio::task::JoinSet::new();
    for worker in 0..run.concurrency {
        let share = run.calls / run.concurrency + u32::from(worker < run.calls % run.concurrency);
        let breaker = breaker.clone();
        let service = run.service.clone();
        let interval = run.interval;
        workers.spawn(async move {
            let ctx = CallContext::background();
            for _ in 0..share {
                let res = breaker
                    .execute_with_context(&ctx, || service.call_async())
                    .await;
                if let Err(e) = res {
                    tracing::debug!(worker, error = %e, "call failed");
                }
                if !interval.is_zero() {
                    tokio::time::sleep(interval).await;
                }
            }
        });
    }
    while let Some(joined) = workers.join_next().await {
        joined.context("simulation worker panicked")?;
    }

    metrics.record_registry(&registry);
    let stats = breaker.stats();
    if json {
        println!("{}", serde_json::to_string_pretty(&registry.all_stats())?);
    } else {
        print_stats(&stats, started.elapsed());
    }
    Ok(())
}

fn print_stats(stats: &Stats, elapsed: Duration) {
    println!();
    println!("  Final state:  {}", stats.state);
    println!("  Total:        {}", stats.total_requests);
    println!("  Succeeded:    {}", stats.success_requests);
    println!("  Failed:       {}", stats.failure_requests);
    println!("  Rejected:     {}", stats.rejected_requests);
    println!("  Failure rate: {:.1}%", stats.failure_rate() * 100.0);
    println!("  Elapsed:      {}ms", elapsed.as_millis());
}
