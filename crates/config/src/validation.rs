//! Configuration validation
//!
//! Checks the engine section for:
//! - Strictly positive sizes and durations where zero would stall the engine
//! - Ordered partition bounds (`min <= initial <= max`)
//! - Expand threshold above shrink threshold
//! - Mode overrides naming a reachable partition index

use std::time::Duration;

use crate::Config;
use crate::engine::EngineConfig;
use crate::error::{ConfigError, Result};

/// Validate the entire configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_engine(&config.engine)?;
    config.metrics.validate()?;
    config.fallback.validate()?;
    Ok(())
}

/// Validate the engine section
pub fn validate_engine(engine: &EngineConfig) -> Result<()> {
    positive("batch_size", engine.batch_size)?;
    positive_duration("batch_interval", engine.batch_interval)?;

    positive("min_partition_count", engine.min_partition_count)?;
    if engine.min_partition_count > engine.max_partition_count {
        return Err(ConfigError::invalid_value(
            "engine",
            "min_partition_count",
            format!(
                "{} exceeds max_partition_count {}",
                engine.min_partition_count, engine.max_partition_count
            ),
        ));
    }
    if engine.partition_count < engine.min_partition_count
        || engine.partition_count > engine.max_partition_count
    {
        return Err(ConfigError::invalid_value(
            "engine",
            "partition_count",
            format!(
                "{} is outside [{}, {}]",
                engine.partition_count, engine.min_partition_count, engine.max_partition_count
            ),
        ));
    }
    if u32::try_from(engine.max_partition_count).is_err() {
        return Err(ConfigError::invalid_value(
            "engine",
            "max_partition_count",
            "must fit in a 32-bit partition index",
        ));
    }

    positive(
        "isolate_max_concurrency_per_partition",
        engine.isolate_max_concurrency_per_partition,
    )?;
    positive_duration(
        "execution_mode_switch_timeout",
        engine.execution_mode_switch_timeout,
    )?;

    if engine.partition_expand_threshold <= engine.partition_shrink_threshold {
        return Err(ConfigError::invalid_value(
            "engine",
            "partition_expand_threshold",
            format!(
                "{} must be greater than partition_shrink_threshold {}",
                engine.partition_expand_threshold, engine.partition_shrink_threshold
            ),
        ));
    }
    positive_duration("partition_adjust_interval", engine.partition_adjust_interval)?;

    positive("parallel_max_concurrency", engine.parallel_max_concurrency)?;
    positive(
        "circuit_breaker_failure_threshold",
        engine.circuit_breaker_failure_threshold as usize,
    )?;
    positive_duration(
        "circuit_breaker_break_duration",
        engine.circuit_breaker_break_duration,
    )?;
    positive_duration("degrade_timeout", engine.degrade_timeout)?;
    positive_duration("shutdown_timeout", engine.shutdown_timeout)?;
    positive("envelope_pool_size", engine.envelope_pool_size)?;

    validate_overrides(engine)?;
    Ok(())
}

fn validate_overrides(engine: &EngineConfig) -> Result<()> {
    for key in engine.execution_mode_overrides.keys() {
        let index: u32 = key
            .trim()
            .parse()
            .map_err(|_| ConfigError::invalid_override(key, "not a partition index"))?;

        if index as usize >= engine.max_partition_count {
            return Err(ConfigError::invalid_override(
                key,
                format!(
                    "index {} is unreachable with max_partition_count {}",
                    index, engine.max_partition_count
                ),
            ));
        }
    }
    Ok(())
}

fn positive(field: &'static str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(ConfigError::invalid_value(
            "engine",
            field,
            "must be greater than 0",
        ));
    }
    Ok(())
}

fn positive_duration(field: &'static str, value: Duration) -> Result<()> {
    if value.is_zero() {
        return Err(ConfigError::invalid_value(
            "engine",
            field,
            "must be greater than 0",
        ));
    }
    Ok(())
}
