use anyhow::{Context, Result};
use clap::Parser;
use spotheat::config::Config;
use spotheat::controller::RelayController;
use spotheat::scheduler::Scheduler;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

/// Spot-price driven hot water heater controller
#[derive(Parser)]
#[command(name = "spotheat", version = spotheat::VERSION)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load(Cli::parse().config).context("Failed to load configuration")?;
    spotheat::logging::init_logging(&config.logging)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    info!("Spotheat {} starting up", spotheat::VERSION);

    let controller = RelayController::from_config(&config)
        .map_err(|e| anyhow::anyhow!("Failed to create controller: {}", e))?;
    let clock = controller.clock();
    #[cfg(feature = "web")]
    let feed = controller.status_feed();
    let controller = Arc::new(Mutex::new(controller));

    #[cfg(feature = "web")]
    let web_task = if config.web.enabled {
        let state = spotheat::web::AppState::new(controller.clone(), feed, &config)
            .map_err(|e| anyhow::anyhow!("Invalid web configuration: {}", e))?;
        let host = config.web.host.clone();
        let port = config.web.port;
        Some(tokio::spawn(async move {
            if let Err(e) = spotheat::web::serve(state, &host, port).await {
                error!("Web server error: {}", e);
            }
        }))
    } else {
        None
    };

    let scheduler = Scheduler::new(controller.clone(), config.schedule.clone(), clock)
        .map_err(|e| anyhow::anyhow!("Invalid schedule: {}", e))?;
    scheduler
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    #[cfg(feature = "web")]
    if let Some(task) = web_task {
        task.abort();
    }
    info!("Spotheat shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn config_flag_short_and_long() {
        let cli = Cli::try_parse_from(["spotheat", "-c", "/data/spotheat.yaml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/data/spotheat.yaml")));

        let cli = Cli::try_parse_from(["spotheat", "--config", "heater.yaml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("heater.yaml")));

        assert_eq!(Cli::try_parse_from(["spotheat"]).unwrap().config, None);
    }

    #[test]
    fn unknown_arguments_and_version_flag() {
        assert!(Cli::try_parse_from(["spotheat", "--bogus"]).is_err());
        let err = Cli::try_parse_from(["spotheat", "-V"]).err().unwrap();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }
}
