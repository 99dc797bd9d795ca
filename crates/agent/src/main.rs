//! Playtest agent binary
//!
//! Runs the SUT-side HTTP service.

use clap::Parser;
use playtest_agent::{router, AppState, GameSession, SessionTiming};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "playtest-agent")]
#[command(about = "Playtest SUT agent - screenshot, input, and game process control")]
#[command(version)]
struct Cli {
    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to run the service on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!("Playtest agent v{}", playtest_common::VERSION);

    let desktop: Arc<dyn playtest_agent::Desktop> = build_desktop()?;
    let state = AppState {
        session: Arc::new(GameSession::new(SessionTiming::default())),
        desktop,
    };

    let addr = format!("{}:{}", cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Agent listening on {}", addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[cfg(feature = "native")]
fn build_desktop() -> anyhow::Result<Arc<dyn playtest_agent::Desktop>> {
    Ok(Arc::new(playtest_agent::desktop::NativeDesktop::new()?))
}

#[cfg(not(feature = "native"))]
fn build_desktop() -> anyhow::Result<Arc<dyn playtest_agent::Desktop>> {
    info!("Native desktop backend disabled; using headless backend");
    Ok(Arc::new(playtest_agent::HeadlessDesktop::default()))
}
