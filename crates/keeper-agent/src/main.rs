// SPDX-License-Identifier: Apache-2.0
use anyhow::{bail, Context, Result};
use clap::Parser;
use key_keeper::config::{Args, LogFormat};
use key_keeper::controller::{Controller, ControllerOptions, OpenBaoConnector};
use key_keeper::http::{serve_http, HealthState};
use key_keeper::source::DirectorySource;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args)?;
    args.validate()?;

    if !args.config_dir.is_dir() {
        bail!("config dir {:?} does not exist", args.config_dir);
    }
    let source = DirectorySource::new(&args.config_dir, args.config_pattern()?);
    let health = HealthState::new();
    let options = ControllerOptions {
        discovery_interval: args.discovery_interval(),
        reconcile_interval: args.reconcile_interval(),
        max_concurrency: args.max_concurrency,
        hostname: None,
    };
    let controller = Arc::new(
        Controller::new(Box::new(source), Arc::new(OpenBaoConnector), options)
            .with_health(health.clone()),
    );
    let cancel = controller.cancel_token();

    {
        let cancel = cancel.clone();
        let health = health.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("shutdown requested, finishing in-flight passes");
            health.set_stopping();
            cancel.cancel();
        });
    }

    if let Some(addr) = args.listen_http {
        let health = health.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = serve_http(addr, health, cancel).await {
                error!(error = %err, "HTTP listener stopped");
            }
        });
    }

    info!(
        config_dir = ?args.config_dir,
        discovery_secs = args.discovery_interval_secs,
        reconcile_secs = args.reconcile_interval_secs,
        "key-keeper starting"
    );
    controller
        .start()
        .await
        .context("initial configuration discovery failed")
}

fn init_tracing(args: &Args) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&args.log_level)
            .with_context(|| format!("invalid --log-level {:?}", args.log_level))?,
    };
    match args.log_format {
        LogFormat::Text => {
            let subscriber = tracing_subscriber::fmt()
                .with_timer(UtcTime::rfc_3339())
                .with_env_filter(filter)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogFormat::Json => {
            let subscriber = tracing_subscriber::fmt()
                .json()
                .with_timer(UtcTime::rfc_3339())
                .with_env_filter(filter)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {}
        _ = terminate => {}
    }
}
