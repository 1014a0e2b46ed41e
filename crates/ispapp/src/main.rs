mod agent;
mod cli;
mod error;

use std::sync::Arc;

use clap::Parser;
use figment::providers::Serialized;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ispapp_config::{AgentOptions, ConfigStore};

use crate::cli::Cli;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(&cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8, default_level: &str) {
    let filter = match verbosity {
        0 => default_level,
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();
}

/// Options file, then `ISPAPP_*` environment, then command-line flags.
fn load_options(cli: &Cli) -> Result<AgentOptions, CliError> {
    let mut figment = AgentOptions::figment(&cli.options);
    if let Some(dir) = &cli.config_dir {
        figment = figment.merge(Serialized::default("config_dir", dir));
    }
    if cli.insecure {
        figment = figment.merge(Serialized::default("insecure_tls", true));
    }
    AgentOptions::from_figment(&figment).map_err(|source| CliError::Options {
        path: cli.options.display().to_string(),
        source,
    })
}

async fn run(cli: &Cli) -> Result<(), CliError> {
    let options = load_options(cli)?;
    init_tracing(cli.verbose, &options.log_level);
    info!(version = env!("CARGO_PKG_VERSION"), config_dir = %options.config_dir.display(), "starting ispapp-agent");

    let store = Arc::new(ConfigStore::open(&options.config_dir));
    let store_error = |source| CliError::Store {
        dir: options.config_dir.display().to_string(),
        source,
    };
    if ispapp_config::ensure_defaults(&store).map_err(store_error)? {
        info!("device settings initialised");
    }

    let supervisor = agent::build(&options, store).await?;
    supervisor.start().await?;
    for status in supervisor.status().await {
        info!(module = %status.name, state = %status.state, "module status");
    }

    shutdown_signal().await;
    info!("shutdown requested");

    if let Err(e) = supervisor.stop(options.shutdown_timeout()).await {
        warn!(error = %e, "shutdown incomplete, exiting anyway");
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
