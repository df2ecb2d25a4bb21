//! Simulate command - Drive the engine with synthetic device readings
//!
//! Starts an engine from the config, feeds it readings from a set of fake
//! devices through a processor that fails on demand, then shuts down and
//! prints where every message ended up.
//!
//! # Usage
//!
//! ```bash
//! # 10 devices, 10k readings, defaults for everything else
//! sluice simulate
//!
//! # Exercise the failure path: every 7th batch fails
//! sluice simulate --config configs/sluice.toml --fail-every 7
//!
//! # Slow processor, to watch the dispatcher scale out
//! sluice simulate --messages 200000 --latency-ms 20
//! ```

use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Args;
use serde::{Deserialize, Serialize};
use tokio::signal;
use tracing::{info, warn};

use sluice_config::Config;
use sluice_engine::{
    BatchEngine, BatchProcessor, BoxError, CancellationToken, EnqueueOutcome, FallbackStore,
    JsonlFallbackStore, MemoryFallbackStore, Message, PartitionKey,
};

/// Simulate command arguments
#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Path to configuration file (defaults apply when omitted)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Number of simulated devices
    #[arg(long, default_value_t = 10)]
    pub devices: u32,

    /// Total readings to enqueue
    #[arg(long, default_value_t = 10_000)]
    pub messages: u64,

    /// Fail every N-th batch (0 = never)
    #[arg(long, default_value_t = 0)]
    pub fail_every: u64,

    /// Simulated processing time per batch
    #[arg(long, default_value_t = 0)]
    pub latency_ms: u64,

    /// Readings per second across all devices (0 = as fast as possible)
    #[arg(long, default_value_t = 0)]
    pub rate: u64,

    /// Upper bound on waiting for the engine to settle before shutdown
    #[arg(long, default_value_t = 30)]
    pub drain_timeout_secs: u64,
}

/// One telemetry sample from a device
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Reading {
    device_id: String,
    seq: u64,
    temperature: f64,
}

impl Message for Reading {
    fn message_id(&self) -> Option<Cow<'_, str>> {
        Some(Cow::Owned(format!("{}:{}", self.device_id, self.seq)))
    }

    fn routing_key(&self) -> Option<Cow<'_, str>> {
        Some(Cow::Borrowed(&self.device_id))
    }
}

/// Processor that sleeps and fails on a fixed schedule
struct FlakyProcessor {
    fail_every: u64,
    latency: Duration,
    calls: AtomicU64,
}

#[async_trait]
impl BatchProcessor<Reading> for FlakyProcessor {
    async fn process_batch(
        &self,
        batch: &[Reading],
        partition: &PartitionKey,
        trace_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), BoxError> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;

        if !self.latency.is_zero() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err("cancelled during processing".into()),
                _ = tokio::time::sleep(self.latency) => {}
            }
        }

        if self.fail_every > 0 && call % self.fail_every == 0 {
            return Err(format!(
                "simulated sink failure (call {call}, partition {partition}, trace {trace_id})"
            )
            .into());
        }

        let mean = batch.iter().map(|r| r.temperature).sum::<f64>() / batch.len().max(1) as f64;
        tracing::trace!(partition = %partition, messages = batch.len(), mean, "batch stored");
        Ok(())
    }
}

pub async fn run(args: SimulateArgs, config: Config) -> Result<()> {
    let store: Arc<dyn FallbackStore<Reading>> = match &config.fallback.path {
        Some(path) => Arc::new(
            JsonlFallbackStore::open(path, config.fallback.sync)
                .await
                .with_context(|| format!("failed to open fallback file {}", path.display()))?,
        ),
        None => Arc::new(MemoryFallbackStore::<Reading>::new()),
    };

    let processor = Arc::new(FlakyProcessor {
        fail_every: args.fail_every,
        latency: Duration::from_millis(args.latency_ms),
        calls: AtomicU64::new(0),
    });

    let engine = BatchEngine::<Reading>::builder(config.engine.clone(), processor)
        .fallback_store(store)
        .metrics_config(config.metrics.clone())
        .build()
        .context("failed to build engine")?;
    engine.start();

    info!(
        devices = args.devices,
        messages = args.messages,
        fail_every = args.fail_every,
        "simulation started"
    );

    let started = Instant::now();
    let (queued, rejected) = tokio::select! {
        counts = produce(&engine, &args) => counts,
        _ = wait_for_shutdown() => {
            warn!("interrupted, shutting down early");
            (0, 0)
        }
    };

    settle(&engine, queued, Duration::from_secs(args.drain_timeout_secs)).await;
    let mut health = engine.health_snapshot();
    health.sort_by_key(|h| h.partition);
    let report = engine.shutdown().await;
    let elapsed = started.elapsed();

    let metrics = engine.metrics();
    let pool = engine.pool_metrics();
    println!("\nSimulation finished in {:.2}s", elapsed.as_secs_f64());
    println!("  enqueued        {:>10}", metrics.messages_enqueued);
    println!("  queued          {:>10}", queued);
    println!("  rejected        {:>10}", rejected);
    println!("  deduplicated    {:>10}", metrics.messages_deduplicated);
    println!("  processed       {:>10}", metrics.messages_processed);
    println!(
        "  batches         {:>10} ok, {} failed",
        metrics.batches_succeeded, metrics.batches_failed
    );
    println!("  retries         {:>10}", metrics.retries);
    println!("  fallback        {:>10}", metrics.fallback_total());
    for reason in sluice_engine::FailureReason::ALL {
        let count = metrics.fallback(reason);
        if count > 0 {
            println!("    {:<24} {:>8}", reason.as_str(), count);
        }
    }
    println!(
        "  partitions      {:>10} (created {}, retired {}, adjustments {})",
        engine.current_partition_count(),
        metrics.partitions_created,
        metrics.partitions_retired,
        metrics.partition_adjustments
    );
    println!("  pool hit rate   {:>9.1}%", pool.hit_rate() * 100.0);

    if !health.is_empty() {
        println!(
            "\n  {:<10} {:<9} {:>8} {:>10} {:>9} {:>11}",
            "partition", "mode", "queued", "messages", "failures", "latency_ms"
        );
        for h in &health {
            println!(
                "  {:<10} {:<9} {:>8} {:>10} {:>9} {:>11}",
                h.partition.to_string(),
                h.execution_mode.as_str(),
                h.queue_length,
                h.messages_processed,
                h.failure_count,
                h.last_batch_latency_ms
            );
        }
        println!();
    }
    println!(
        "  shutdown        drained {}, forced {}",
        report.drained, report.forced
    );
    if metrics.fallback_write_errors > 0 {
        println!("  fallback write errors: {}", metrics.fallback_write_errors);
    }

    Ok(())
}

/// Enqueue readings round-robin across devices
///
/// Returns (queued, rejected) counts.
async fn produce(engine: &BatchEngine<Reading>, args: &SimulateArgs) -> (u64, u64) {
    let devices = args.devices.max(1);
    let pause = (args.rate > 0).then(|| Duration::from_secs_f64(1.0 / args.rate as f64));
    let mut queued = 0;
    let mut rejected = 0;

    for n in 0..args.messages {
        let device = (n % devices as u64) as u32;
        let reading = Reading {
            device_id: format!("device-{device:04}"),
            seq: n / devices as u64,
            temperature: 20.0 + (n % 97) as f64 / 10.0,
        };

        match engine.enqueue(reading).await {
            EnqueueOutcome::Queued { .. } => queued += 1,
            EnqueueOutcome::Duplicate => {}
            EnqueueOutcome::Fallback(_) => rejected += 1,
        }

        match pause {
            Some(pause) => tokio::time::sleep(pause).await,
            // Let consumer loops run between bursts
            None if n % 1024 == 0 => tokio::task::yield_now().await,
            None => {}
        }
    }

    (queued, rejected)
}

/// Wait until every queued message reached a terminal outcome
async fn settle(engine: &BatchEngine<Reading>, queued: u64, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    loop {
        let metrics = engine.metrics();
        let terminal = metrics.messages_processed
            + metrics.fallback(sluice_engine::FailureReason::ProcessFailure);
        if terminal >= queued {
            return;
        }
        if Instant::now() >= deadline {
            warn!(
                remaining = queued - terminal,
                "engine did not settle before the drain timeout"
            );
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Wait for SIGINT or SIGTERM
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
