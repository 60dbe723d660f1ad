//! The `start` command.

use crate::StartArgs;
use anyhow::{bail, Context, Result};
use config::{load_env_files, parse_port, Concurrency, Procfile, Settings, SettingsLoader};
use start::shipper::{DEFAULT_BATCH_INTERVAL, DEFAULT_BATCH_SIZE, DEFAULT_TIMEOUT};
use start::{base_port, LogShipper, LokiClient, OutputMux, Supervisor, SupervisorConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Readiness polls made before shipping starts.
const LOKI_READY_RETRIES: u32 = 10;

/// Apply command line flags over dotfile settings.
pub fn apply_flags(mut settings: Settings, args: &StartArgs) -> Result<Settings> {
    if let Some(procfile) = &args.procfile {
        settings.procfile = procfile.clone();
    }
    if let Some(port) = &args.port {
        settings.port = Some(parse_port(port)?);
    }
    if let Some(concurrency) = &args.concurrency {
        settings.concurrency = concurrency.clone();
    }
    if let Some(grace) = args.shutdown_grace_time {
        settings.shutdown_grace_time = grace;
    }
    if let Some(url) = &args.loki_url {
        settings.loki_url = Some(url.clone());
    }
    if let Some(job) = &args.loki_job {
        settings.loki_job = job.clone();
    }
    Ok(settings)
}

/// Directory processes run in: the one holding the Procfile.
pub fn workdir_for(procfile: &Path) -> PathBuf {
    match procfile.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Validate everything, then run the Procfile until teardown completes.
pub async fn start(args: StartArgs) -> Result<()> {
    let settings = SettingsLoader::current_dir()
        .load()
        .context("failed to load .mango")?;
    let settings = apply_flags(settings, &args)?;
    debug!(settings = ?settings, "Resolved settings");

    let procfile = Procfile::read(&settings.procfile)
        .with_context(|| format!("failed to read {}", settings.procfile.display()))?;
    let concurrency = Concurrency::parse(&settings.concurrency)?;
    let env = load_env_files(&args.env)?;
    if let Some(name) = &args.name {
        if !procfile.has_process(name) {
            bail!("no such process: {}", name);
        }
    }
    // Surface a malformed PORT before anything starts
    base_port(settings.port, &env)?;

    let output = Arc::new(
        OutputMux::stdout().with_padding(procfile.longest_process_name(&concurrency)),
    );

    let loki = match &settings.loki_url {
        Some(url) => {
            let client = Arc::new(LokiClient::new(
                url,
                DEFAULT_TIMEOUT,
                DEFAULT_BATCH_INTERVAL,
                DEFAULT_BATCH_SIZE,
            )?);
            if let Err(e) = client
                .wait_ready(LOKI_READY_RETRIES, Duration::from_secs(1))
                .await
            {
                output.error(&e.to_string());
            }
            Some(client)
        }
        None => None,
    };
    let shipper = loki.clone().map(|client| client as Arc<dyn LogShipper>);

    let config = SupervisorConfig {
        workdir: workdir_for(&settings.procfile),
        base_port: settings.port,
        restart: args.restart,
        grace_period: settings.grace_period(),
        log_job: settings.loki_job.clone(),
    };
    let supervisor = Supervisor::new(config, Arc::clone(&output), shipper);
    let signals = supervisor.monitor_signals()?;

    supervisor
        .run_all(&procfile, &concurrency, &env, args.name.as_deref())
        .await;

    signals.abort();
    if let Some(loki) = loki {
        loki.close().await;
    }
    Ok(())
}
