//! SydneyBot CLI entry point.

use anyhow::Context as _;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

#[derive(Parser)]
#[command(name = "sydneybot")]
#[command(about = "A probabilistic Discord conversational agent")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = sydneybot::config::Config::load()
        .with_context(|| "failed to load configuration from environment")?;

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    let file_appender = tracing_appender::rolling::daily(config.log_dir(), "sydneybot.log");
    let (file_writer, _log_guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_writer(file_writer).with_ansi(false))
        .init();

    tracing::info!(data_dir = %config.data_dir.display(), "starting SydneyBot");

    let store = sydneybot::store::PreferenceStore::open(&config.sqlite_path())
        .await
        .with_context(|| "failed to open preference store")?;

    let transport = Arc::new(sydneybot::completion::OpenPipeTransport::new(
        config.completion.clone(),
    ));
    let completion = sydneybot::completion::CompletionClient::new(transport);

    let engine = Arc::new(sydneybot::engine::PolicyEngine::new(
        config.triggers.clone(),
        completion,
        store.clone(),
    ));

    let handler = sydneybot::discord::Handler::new(Arc::clone(&engine), store);
    let mut client =
        serenity::Client::builder(&config.discord_token, sydneybot::discord::Handler::intents())
            .event_handler(handler)
            .await
            .with_context(|| "failed to build Discord client")?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            shard_manager.shutdown_all().await;
        }
    });

    client
        .start()
        .await
        .with_context(|| "Discord client error")?;

    tracing::info!("SydneyBot stopped");
    Ok(())
}
