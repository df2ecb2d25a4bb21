//! Tracing subscriber setup

use std::fs::OpenOptions;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use sluice_config::{LogConfig, LogFormat, LogOutput};

/// Install the global subscriber
///
/// Level resolution: CLI flag > `[log]` section > "info". Per-target
/// overrides from the config are kept when the CLI only changes the base
/// level.
pub fn init(config: &LogConfig, cli_level: Option<&str>) -> Result<()> {
    let directive = match cli_level {
        Some(level) => {
            let mut directive = config.filter_directive();
            match directive.split_once(',') {
                Some((_, targets)) => format!("{level},{targets}"),
                None => {
                    directive.clear();
                    directive.push_str(level);
                    directive
                }
            }
        }
        None => config.filter_directive(),
    };

    let filter = EnvFilter::try_new(&directive)
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("invalid log level: {}", e))?;

    let (writer, ansi) = match &config.output {
        LogOutput::Stdout => (BoxMakeWriter::new(std::io::stdout), true),
        LogOutput::Stderr => (BoxMakeWriter::new(std::io::stderr), true),
        LogOutput::File(path) => {
            if let Some(parent) = std::path::Path::new(path).parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create log directory for {path}"))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {path}"))?;
            (BoxMakeWriter::new(Mutex::new(file)), false)
        }
    };

    let registry = tracing_subscriber::registry().with(filter);
    match config.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(writer))
            .init(),
        LogFormat::Console => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_ansi(ansi)
                    .with_writer(writer),
            )
            .init(),
    }

    Ok(())
}
