use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufRead, BufReader};
use tokio_util::sync::CancellationToken;

use licensecheck_core::config::LicensecheckConfig;
use licensecheck_core::error::LicensecheckError;
use licensecheck_core::event::Event;
use licensecheck_daemon::cli::DaemonCli;
use licensecheck_daemon::consumer::{Consumer, EventSource, wait_for_shutdown_signal};
use licensecheck_daemon::logging::init_tracing;
use licensecheck_daemon::metrics_server::install_metrics_recorder;
use licensecheck_pipeline::{DefaultDriver, Outcome, PipelineConfig};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            // the subscriber may not be installed yet
            eprintln!("licensecheck-daemon: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<ExitCode> {
    let cli = DaemonCli::parse();
    let config = load_config(&cli).await?;

    if cli.validate {
        println!("configuration OK");
        return Ok(ExitCode::SUCCESS);
    }

    init_tracing(&config.general)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "licensecheck-daemon starting");

    if config.metrics.enabled {
        install_metrics_recorder(&config.metrics)?;
    }

    let driver = DefaultDriver::from_config(PipelineConfig::from_core(&config))
        .map_err(LicensecheckError::from)?;
    let swept = driver.preflight().map_err(LicensecheckError::from)?;
    if swept > 0 {
        tracing::warn!(swept, "removed staging directories left by an interrupted run");
    }

    if let Some(path) = cli.once.as_deref() {
        return process_once(&driver, path).await;
    }

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        match wait_for_shutdown_signal().await {
            Ok(signal) => tracing::info!(signal, "shutdown signal received"),
            Err(e) => tracing::error!(error = %e, "signal handling unavailable"),
        }
        signal_cancel.cancel();
    });

    let consumer = Consumer::new(
        Arc::new(driver),
        config.consumer.max_concurrent,
        cancel,
    );

    let report = if cli.reads_stdin() {
        consumer.run(EventSource::new(BufReader::new(tokio::io::stdin()))).await?
    } else {
        consumer.run(open_input(Path::new(&cli.input)).await?).await?
    };

    if report.fatal {
        tracing::error!("consumer stopped by an environment failure");
        return Ok(ExitCode::FAILURE);
    }

    tracing::info!("licensecheck-daemon shut down");
    Ok(ExitCode::SUCCESS)
}

/// Config file (or built-in defaults), then environment, then CLI flags.
async fn load_config(cli: &DaemonCli) -> Result<LicensecheckConfig> {
    let mut config = match cli.config.as_deref() {
        Some(path) => LicensecheckConfig::load(path).await?,
        None => {
            let mut config = LicensecheckConfig::default();
            config.apply_env_overrides();
            config
        }
    };

    if let Some(level) = &cli.log_level {
        config.general.log_level.clone_from(level);
    }
    if let Some(format) = &cli.log_format {
        config.general.log_format.clone_from(format);
    }

    config.validate()?;
    Ok(config)
}

async fn open_input(path: &Path) -> Result<EventSource<impl AsyncBufRead + Unpin>> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| anyhow::anyhow!("failed to open input {}: {}", path.display(), e))?;
    Ok(EventSource::new(BufReader::new(file)))
}

async fn process_once(driver: &DefaultDriver, path: &Path) -> Result<ExitCode> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| anyhow::anyhow!("failed to read message {}: {}", path.display(), e))?;
    let event: Event = serde_json::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("invalid message {}: {}", path.display(), e))?;

    let outcome = driver.process(&event).await;
    match &outcome {
        Outcome::Written(bundle) => println!("{}", bundle.display()),
        Outcome::Ignored => tracing::info!(event_id = %event.id, "message ignored by filter"),
        Outcome::Failed { .. } => {}
    }

    Ok(match outcome {
        Outcome::Failed { .. } => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    })
}
