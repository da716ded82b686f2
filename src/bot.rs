use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::conversation::ConversationEngine;
use crate::platform::{ChatTransport, IncomingMessage};
use crate::profile::ProfileStore;
use crate::reply::ChatReply;
use crate::router::{MatchResult, MessageRouter};
use crate::search::client::SearchClient;

/// Shared state handed to every handler
pub struct BotContext {
    pub transport: Arc<dyn ChatTransport>,
    pub profiles: Arc<dyn ProfileStore>,
    pub conversations: ConversationEngine,
    pub search: SearchClient,
    pub started_at: Instant,
    pub shutdown_delay: Duration,
    shutdown: Arc<Notify>,
}

impl BotContext {
    pub fn new(
        config: &Config,
        transport: Arc<dyn ChatTransport>,
        profiles: Arc<dyn ProfileStore>,
    ) -> Self {
        Self {
            transport,
            profiles,
            conversations: ConversationEngine::new(),
            search: SearchClient::new(config.search.clone()),
            started_at: Instant::now(),
            shutdown_delay: Duration::from_secs(config.bot.shutdown_delay_secs),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Send a reply, logging instead of failing if the transport errors
    pub async fn reply(&self, message: &IncomingMessage, reply: impl Into<ChatReply>) {
        if let Err(e) = self.transport.reply(message, &reply.into()).await {
            warn!("Failed to send reply to {}: {:#}", message.channel_id, e);
        }
    }

    /// Ask the process to shut down once the configured delay has passed
    pub fn request_shutdown(&self) {
        let shutdown = Arc::clone(&self.shutdown);
        let delay = self.shutdown_delay;
        info!("Shutdown requested, exiting in {:?}", delay);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            shutdown.notify_one();
        });
    }

    /// Resolves when a shutdown has been requested
    pub async fn shutdown_requested(&self) {
        self.shutdown.notified().await;
    }

    #[cfg(test)]
    pub fn for_tests(transport: Arc<dyn ChatTransport>) -> Self {
        let profiles = crate::profile::SqliteProfileStore::open_in_memory()
            .expect("in-memory profile store");
        let mut config = Config::default();
        config.search.base_url = "http://127.0.0.1:9/search".to_string();
        config.search.timeout_ms = 1_000;
        config.bot.shutdown_delay_secs = 0;
        Self::new(&config, transport, Arc::new(profiles))
    }
}

/// What happened to an inbound message
#[derive(Debug, PartialEq)]
pub enum Handled {
    /// Answered a waiting conversation
    Conversation,
    /// Matched a rule
    Rule(MatchResult),
    /// Nothing applied
    Ignored,
}

/// Entry point for every inbound message, whatever the platform. A message
/// from someone with a conversation waiting in that channel goes to the
/// conversation; everything else goes through the router.
pub async fn handle_incoming(
    ctx: &Arc<BotContext>,
    router: &MessageRouter,
    message: IncomingMessage,
) -> Result<Handled> {
    debug!(
        "Handling message {} from {} sent at {}",
        message.message_id, message.sender_id, message.timestamp
    );

    if let Some(outbound) = ctx.conversations.resume(&message).await {
        for text in outbound {
            ctx.reply(&message, text).await;
        }
        return Ok(Handled::Conversation);
    }

    Ok(match router.dispatch(Arc::clone(ctx), message) {
        Some(matched) => Handled::Rule(matched),
        None => Handled::Ignored,
    })
}
