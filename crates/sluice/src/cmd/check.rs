//! Check command - Validate a configuration file
//!
//! Parses and validates the file, then prints every resolved setting so
//! defaults are visible next to what the file overrides.
//!
//! # Usage
//!
//! ```bash
//! sluice check --config configs/sluice.toml
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use sluice_config::Config;

/// Check command arguments
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Path to configuration file
    #[arg(short, long)]
    pub config: PathBuf,
}

pub fn run(args: CheckArgs) -> Result<()> {
    let config = super::load_config(Some(&args.config))?;
    println!("{} is valid\n", args.config.display());
    print!("{}", render(&config));
    Ok(())
}

/// Resolved settings, one `key = value` line each
fn render(config: &Config) -> String {
    let engine = &config.engine;
    let mut lines = vec![
        "[engine]".to_string(),
        format!("batch_size = {}", engine.batch_size),
        format!("batch_interval = {:?}", engine.batch_interval),
        format!(
            "partitions = {} (min {}, max {})",
            engine.partition_count, engine.min_partition_count, engine.max_partition_count
        ),
        format!(
            "partition_thresholds = expand > {}, shrink < {}",
            engine.partition_expand_threshold, engine.partition_shrink_threshold
        ),
        format!("partition_adjust_interval = {:?}", engine.partition_adjust_interval),
        format!(
            "isolate_max_concurrency_per_partition = {}",
            engine.isolate_max_concurrency_per_partition
        ),
        format!(
            "retry = {} retries, {:?} {:?}",
            engine.retry_max_count, engine.retry_interval, engine.retry_backoff
        ),
        format!(
            "circuit_breaker = {} failures, {:?} break",
            engine.circuit_breaker_failure_threshold, engine.circuit_breaker_break_duration
        ),
        format!("default_execution_mode = {}", engine.default_execution_mode),
        format!("parallel_max_concurrency = {}", engine.parallel_max_concurrency),
        format!(
            "execution_mode_switch_timeout = {:?}",
            engine.execution_mode_switch_timeout
        ),
        format!("degrade_timeout = {:?}", engine.degrade_timeout),
        format!("failure_backoff = {:?}", engine.failure_backoff),
        format!("shutdown_timeout = {:?}", engine.shutdown_timeout),
        format!("envelope_pool_size = {}", engine.envelope_pool_size),
        format!("idempotency_ttl = {:?}", engine.idempotency_ttl),
    ];
    for (partition, mode) in engine.mode_overrides() {
        lines.push(format!("override partition {partition} = {mode}"));
    }

    lines.push(String::new());
    lines.push("[fallback]".to_string());
    match &config.fallback.path {
        Some(path) => lines.push(format!(
            "path = {} (sync {})",
            path.display(),
            config.fallback.sync
        )),
        None => lines.push("path = <memory, not durable>".to_string()),
    }

    lines.push(String::new());
    lines.push("[metrics]".to_string());
    lines.push(format!(
        "enabled = {}, interval = {:?}, include_partitions = {}",
        config.metrics.enabled, config.metrics.interval, config.metrics.include_partitions
    ));

    lines.push(String::new());
    lines.push("[log]".to_string());
    lines.push(format!("filter = {}", config.log.filter_directive()));
    lines.push(format!("format = {:?}, output = {:?}", config.log.format, config.log.output));

    let mut out = lines.join("\n");
    out.push('\n');
    out
}
