//! chat-relay HTTP server

use chat_relay::{
    cli::{Cli, Command, generate_config_template},
    config::Config,
    handlers::{self, AppState},
    telemetry,
};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Some(Command::Config { output }) = cli.command {
        let template = generate_config_template();
        match output {
            Some(path) => {
                std::fs::write(&path, template)?;
                eprintln!("Wrote configuration template to {}", path);
            }
            None => print!("{}", template),
        }
        return Ok(());
    }

    let config = Config::from_file(&cli.config)?;
    telemetry::init(&config.observability.log_level);

    let addr = SocketAddr::new(
        config.server.host.parse::<std::net::IpAddr>().map_err(|e| {
            format!("server.host '{}' is not an IP address: {}", config.server.host, e)
        })?,
        config.server.port,
    );

    tracing::info!(
        backend = %config.backend.kind(),
        token_limit = config.budget.token_limit,
        policy = ?config.budget.policy,
        tokenizer = ?config.budget.tokenizer,
        "Starting chat-relay"
    );
    if config.backend.base_url().is_none() {
        tracing::warn!("backend.base_url is not set; chat requests will fail until it is configured");
    }

    let state = AppState::new(Arc::new(config))?;
    let app = handlers::router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received");
}
