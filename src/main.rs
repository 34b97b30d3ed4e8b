//! Gembot CLI entry point.

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use gembot::config::Config;
use gembot::delivery::queue::HttpTaskQueue;
use gembot::delivery::{processor, receiver};
use gembot::gemini::GeminiClient;
use gembot::handler::MentionHandler;
use gembot::slack::ThreadPlatform as _;
use gembot::slack::client::SlackThreadClient;
use gembot::slack::socket;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gembot")]
#[command(about = "Slack mention bot that answers with Gemini, thread context included")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Long-running Socket Mode deployment
    Socket,
    /// Fast-ack Events API receiver (serverless pair, part one)
    Receiver,
    /// Queue-consuming processor (serverless pair, part two)
    Processor,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::load().context("failed to load configuration from environment")?;

    match cli.command {
        Command::Socket => run_socket(config).await,
        Command::Receiver => run_receiver(config).await,
        Command::Processor => run_processor(config).await,
    }
}

async fn run_socket(config: Config) -> anyhow::Result<()> {
    let app_token = config.slack.require_app_token()?.to_string();

    let platform = Arc::new(SlackThreadClient::new(&config.slack.bot_token)?);
    platform
        .initialize()
        .await
        .context("failed to resolve bot identity")?;
    let bot_user_id = platform.bot_user_id()?.to_string();

    let generator = Arc::new(GeminiClient::new(config.gemini.clone()));
    let handler = Arc::new(MentionHandler::new(platform, generator));

    let (mut mentions, socket) = socket::start(&app_token, &bot_user_id).await?;
    tracing::info!("gembot listening for mentions over socket mode");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            event = mentions.recv() => {
                let Some(event) = event else { break };
                let handler = handler.clone();
                tokio::spawn(async move {
                    // Failures already posted a notice; the error here is for the log.
                    if let Err(error) = handler.handle(&event).await {
                        tracing::error!(%error, "mention processing failed");
                    }
                });
            }
            _ = &mut shutdown => {
                tracing::info!("shutdown signal received");
                socket.shutdown().await;
                break;
            }
        }
    }

    tracing::info!("gembot stopped");
    Ok(())
}

async fn run_receiver(config: Config) -> anyhow::Result<()> {
    let target_url = config.server.require_task_target_url()?.to_string();
    let state = Arc::new(receiver::ReceiverState {
        signing_secret: config.slack.signing_secret.clone(),
        queue: HttpTaskQueue::new(target_url),
    });
    serve(receiver::router(state), config.server.port, "receiver").await
}

async fn run_processor(config: Config) -> anyhow::Result<()> {
    let platform = Arc::new(SlackThreadClient::new(&config.slack.bot_token)?);
    // The processor is not ready to consume tasks until the bot identity
    // resolves; a failure here exits non-zero so the container restarts.
    platform
        .initialize()
        .await
        .context("failed to resolve bot identity")?;

    let generator = Arc::new(GeminiClient::new(config.gemini.clone()));
    let handler = Arc::new(MentionHandler::new(platform, generator));
    serve(processor::router(handler), config.server.port, "processor").await
}

async fn serve(app: axum::Router, port: u16, service: &str) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, service, "http service listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server exited with error")?;
    tracing::info!(service, "http service stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::error!(%error, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
