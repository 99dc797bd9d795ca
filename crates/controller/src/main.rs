//! Playtest controller binary
//!
//! Loads an automation plan, connects to the SUT agent and perception
//! service, optionally launches the game, and runs the step engine.

use clap::Parser;
use playtest_common::AutomationPlan;
use playtest_controller::{
    ArtifactStore, Engine, GameLauncher, PerceptionClient, RunOutcome, SutClient,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "playtest")]
#[command(about = "Playtest controller - perception-guided game UI automation")]
#[command(version)]
struct Cli {
    /// Automation config file (YAML)
    #[arg(short, long)]
    config: PathBuf,

    /// SUT agent base URL
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    sut: String,

    /// Perception service base URL
    #[arg(long, default_value = "http://127.0.0.1:8000")]
    perception: String,

    /// Run artifact directory (defaults to a timestamped directory
    /// under logs/<game name>)
    #[arg(long)]
    run_dir: Option<PathBuf>,

    /// Launch the game from the config metadata before running
    #[arg(long)]
    launch: bool,

    /// Terminate the game after the run
    #[arg(long)]
    terminate_after: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
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

    info!("Playtest controller v{}", playtest_common::VERSION);

    match run(cli).await {
        Ok(RunOutcome::Completed) => {
            info!("Automation completed");
            ExitCode::SUCCESS
        }
        Ok(outcome) => {
            error!("Automation {}", outcome);
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("Automation error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<RunOutcome> {
    let plan = AutomationPlan::load(&cli.config)?;
    info!(
        "Loaded plan for '{}' ({} steps)",
        plan.game_name,
        plan.step_count()
    );

    let run_dir = cli.run_dir.unwrap_or_else(|| {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S").to_string();
        PathBuf::from("logs").join(&plan.game_name).join(stamp)
    });
    let artifacts = ArtifactStore::create(&run_dir).await?;
    info!("Run artifacts under {}", artifacts.root().display());

    let sut = SutClient::connect(&cli.sut).await?;
    let perception = PerceptionClient::connect(&cli.perception).await;

    if cli.launch {
        let path = plan.game_path.clone().ok_or_else(|| {
            anyhow::anyhow!("--launch requires metadata.path in the config")
        })?;
        GameLauncher::new(&sut)
            .launch(&path, plan.expected_process.as_deref())
            .await?;
    }

    let cancel = CancellationToken::new();
    let ctrlc_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, stopping after the current operation");
            ctrlc_cancel.cancel();
        }
    });

    let terminate_after = cli.terminate_after;
    let engine = Engine::new(plan, sut, perception, artifacts, cancel);
    let outcome = engine.run().await;

    if terminate_after {
        let sut = SutClient::connect(&cli.sut).await?;
        if let Err(e) = GameLauncher::new(&sut).terminate().await {
            warn!("Post-run terminate failed: {}", e);
        }
    }

    Ok(outcome?)
}
