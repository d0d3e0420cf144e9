use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod config;
mod detect;
mod error;
mod intake;
mod routes;
mod state;

use config::ServeArgs;
use detect::DetectArgs;

#[derive(Debug, Parser)]
#[command(name = "lookbook", version, about = "Outfit photo analysis service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the HTTP API.
    Serve(ServeArgs),
    /// Detect items in a local photo and write crops to a directory.
    Detect(DetectArgs),
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("lookbook error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing();
    match cli.command {
        Command::Serve(args) => {
            serve(args)?;
            Ok(0)
        }
        Command::Detect(args) => detect::run_detect(args),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn serve(args: ServeArgs) -> Result<()> {
    // Built before the runtime: the Gemini gateway owns a blocking client.
    let state = args.build_state()?;
    // Keeps the last gateway handle alive until the runtime is gone.
    let gateway = Arc::clone(&state.gateway);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let result = runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(args.bind)
            .await
            .with_context(|| format!("failed to bind {}", args.bind))?;
        tracing::info!(
            addr = %listener.local_addr()?,
            gateway = state.gateway.name(),
            box_units = %state.box_units,
            events = ?state.events.as_ref().map(|log| log.path().display().to_string()),
            "lookbook listening"
        );
        axum::serve(listener, routes::router(state))
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("server stopped with an error")
    });
    drop(runtime);
    drop(gateway);
    result
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "ctrl-c handler unavailable");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
