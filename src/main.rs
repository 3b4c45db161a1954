use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};

use council_core::{AdvisorId, Message, MessageStatus};
use council_engine::{DualStreamOrchestrator, EngineError, OrchestratorConfig, TurnInput};
use council_settings::CouncilSettings;
use council_stream::{AgentStreamClient, HttpBackend};
use council_telemetry::TelemetryConfig;

#[derive(Parser)]
#[command(name = "council", about = "Ask two advisors at once")]
struct Cli {
    /// Settings file (defaults to ~/.council/settings.json).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API.
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Interactive conversation on stdin.
    Chat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.settings {
        Some(path) => council_settings::load_settings_from_path(path),
        None => council_settings::load_settings(),
    }
    .context("failed to load settings")?;

    let telemetry = TelemetryConfig::from_level_name(&settings.logging.level, settings.logging.json)
        .with_module_level("hyper", tracing::Level::WARN);
    council_telemetry::init_telemetry(&telemetry)?;

    let orchestrator = Arc::new(build_orchestrator(&settings)?);

    match cli.command {
        Command::Serve { host, port } => serve(&settings, orchestrator, host, port).await,
        Command::Chat => chat(&settings, orchestrator).await,
    }
}

fn build_orchestrator(settings: &CouncilSettings) -> anyhow::Result<DualStreamOrchestrator> {
    let client = |advisor: AdvisorId| -> anyhow::Result<Arc<AgentStreamClient>> {
        let backend = HttpBackend::from_settings(advisor, settings.advisors.get(advisor), &settings.stream)
            .with_context(|| format!("failed to build backend for {advisor}"))?;
        tracing::info!(%advisor, endpoint = backend.endpoint(), "advisor configured");
        Ok(Arc::new(
            AgentStreamClient::new(Arc::new(backend)).with_idle_timeout(settings.stream.idle_timeout()),
        ))
    };

    let orchestrator = DualStreamOrchestrator::new(
        client(AdvisorId::A)?,
        client(AdvisorId::B)?,
        OrchestratorConfig::from_settings(settings),
    );
    if let Some(welcome) = &settings.turn.welcome_message {
        orchestrator
            .conversation()
            .append(Message::system(welcome.clone()))?;
    }
    Ok(orchestrator)
}

async fn serve(
    settings: &CouncilSettings,
    orchestrator: Arc<DualStreamOrchestrator>,
    host: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let mut config = council_server::ServerConfig::from(&settings.server);
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }

    let handle = council_server::start(config, Arc::clone(&orchestrator))
        .await
        .context("failed to start server")?;
    tracing::info!(port = handle.port, "council server ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    let cancelled = orchestrator.cancel_all();
    if cancelled > 0 {
        tracing::info!(cancelled, "cancelled running turns");
    }
    handle.shutdown().await;
    Ok(())
}

/// Next input line. `None` at end of input or once `interrupt` resolves.
async fn next_prompt<R, F>(lines: &mut Lines<R>, interrupt: F) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
    F: Future,
{
    tokio::select! {
        line = lines.next_line() => line,
        _ = interrupt => Ok(None),
    }
}

async fn chat(settings: &CouncilSettings, orchestrator: Arc<DualStreamOrchestrator>) -> anyhow::Result<()> {
    let label = |advisor: AdvisorId| settings.advisors.get(advisor).label.clone();

    for message in orchestrator.conversation().snapshot() {
        println!("{}", message.content);
    }

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = next_prompt(&mut lines, tokio::signal::ctrl_c()).await? else {
            println!();
            break;
        };

        let turn_id = match orchestrator.submit(TurnInput::new(line)) {
            Ok(id) => id,
            Err(EngineError::EmptyMessage) => continue,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };
        let Some(mut updates) = orchestrator.subscribe(&turn_id) else {
            continue;
        };

        let mut printed = [0usize; 2];
        let mut speaking: Option<AdvisorId> = None;
        let mut cancelled = false;
        loop {
            let update = tokio::select! {
                update = updates.next() => update,
                _ = tokio::signal::ctrl_c(), if !cancelled => {
                    cancelled = orchestrator.cancel(&turn_id);
                    continue;
                }
            };
            let Some(update) = update else {
                break;
            };

            let slot = &mut printed[update.advisor.index()];
            let shrank = update.text.len() < *slot || !update.text.is_char_boundary(*slot);
            if speaking != Some(update.advisor) || shrank {
                print!("\n[{}] ", label(update.advisor));
                speaking = Some(update.advisor);
                if shrank {
                    *slot = 0;
                }
            }
            print!("{}", &update.text[*slot..]);
            *slot = update.text.len();

            if update.status == MessageStatus::Failed {
                let kind = update.failure.as_ref().map_or("unknown", |f| f.kind.as_str());
                print!(" ({kind})");
                speaking = None;
            }
            std::io::stdout().flush()?;
        }
        println!();

        if let Some(outcome) = orchestrator.wait(&turn_id).await {
            if outcome.any_failed() && settings.turn.announce_failures {
                println!("{}", settings.turn.failure_announcement);
            }
        }
    }
    Ok(())
}
