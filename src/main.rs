use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use simbridge::app::App;
use simbridge::cli::{Cli, Command, run_config_command};
use simbridge::sim::DisconnectedConnector;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = cli.to_config()?;
    match cli.command.clone().unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Tools => {
            let app = App::build(config, Arc::new(DisconnectedConnector)).await?;
            let schemas = app.dispatcher.registry().schemas().await;
            println!("{}", serde_json::to_string_pretty(&schemas)?);
            Ok(())
        }
        Command::Config(cmd) => run_config_command(&config, cmd),
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("simbridge=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn serve(config: simbridge::config::Config) -> anyhow::Result<()> {
    // No simulation client is linked into this binary; tools that need one
    // report it as unavailable.
    let app = Arc::new(App::build(config, Arc::new(DisconnectedConnector)).await?);
    let mut server = app.server()?;
    let addr = server.start().await?;
    tracing::info!("simbridge ready on http://{}", addr);

    shutdown_signal().await;

    server.shutdown().await;
    let stopping = Arc::clone(&app);
    tokio::task::spawn_blocking(move || stopping.shutdown()).await?;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
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
    tracing::info!("Shutdown signal received");
}
