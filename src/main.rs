use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

mod config;
mod db;
mod dispatch;
mod error;
mod matcher;
mod models;
mod registry;
mod retry;
mod scheduler;
mod stackexchange;
mod telegram;

use config::Config;
use db::Repository;
use dispatch::Dispatcher;
use error::Result;
use registry::SiteRegistry;
use scheduler::Scheduler;
use stackexchange::StackExchangeClient;
use telegram::{CommandHandler, TelegramClient};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();
    let mut config_path: Option<PathBuf> = None;
    let mut delay_secs: Option<u64> = None;
    let mut i = 1;
    while i + 1 < args.len() {
        match args[i].as_str() {
            "--config" => {
                config_path = Some(PathBuf::from(&args[i + 1]));
                i += 2;
            }
            "--delay" => {
                delay_secs = args[i + 1].parse().ok();
                i += 2;
            }
            _ => i += 1,
        }
    }

    // Optional startup delay, useful when waiting for other services to come up
    if let Some(secs) = delay_secs {
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }

    // Load configuration
    let config = match config_path {
        Some(path) => Config::load_from(&path)?,
        None => Config::load()?,
    };

    // Shared context, built once and passed by reference
    let repo = Repository::new(&config.db_path).await?;
    let registry = Arc::new(SiteRegistry::new());
    let stack = StackExchangeClient::new();
    let telegram = TelegramClient::new(config.telegram_token.clone());

    // Shutdown is observed between cycles; the command loop stops first
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
            let _ = shutdown_tx.send(true);
        }
    });

    let handler = CommandHandler::new(repo.clone(), Arc::clone(&registry), telegram.clone());
    let command_task = tokio::spawn({
        let shutdown = shutdown_rx.clone();
        async move { handler.run(shutdown).await }
    });

    let dispatcher = Dispatcher::new(telegram);
    let scheduler = Scheduler::new(repo, registry, stack, dispatcher, config);
    let result = scheduler.run(shutdown_rx).await;

    command_task.abort();
    let _ = command_task.await;

    tracing::info!("Job finished");
    result
}
