mod bot;
mod config;
mod conversation;
mod error;
mod handlers;
mod markup;
mod platform;
mod profile;
mod reply;
mod router;
mod search;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::bot::BotContext;
use crate::config::Config;
use crate::platform::telegram::{self, TelegramTransport};
use crate::profile::SqliteProfileStore;
use crate::router::MessageRouter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,solvebot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Search API: {}", config.search.base_url);
    info!("  Profiles: {}", config.profiles.database_path.display());
    info!("  Allowed users: {:?}", config.telegram.allowed_user_ids);

    let profiles = SqliteProfileStore::open(&config.profiles.database_path)?;

    let mut router = MessageRouter::new();
    handlers::register_all(&mut router).context("Failed to register message rules")?;
    info!("Registered {} message rules", router.len());
    let router = Arc::new(router);

    let transport = TelegramTransport::connect(&config.telegram.bot_token).await?;
    let bot = transport.bot();

    let ctx = Arc::new(BotContext::new(
        &config,
        Arc::new(transport),
        Arc::new(profiles),
    ));

    info!("Bot is starting...");
    tokio::select! {
        result = telegram::run(
            Arc::clone(&ctx),
            router,
            config.telegram.allowed_user_ids.clone(),
            bot,
        ) => result?,
        _ = ctx.shutdown_requested() => info!("Shutting down"),
    }

    Ok(())
}
