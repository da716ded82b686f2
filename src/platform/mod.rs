pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::reply::ChatReply;

/// How a message reached the bot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageContext {
    /// One-to-one chat with the bot
    DirectMessage,
    /// Group message that starts by addressing the bot
    DirectMention,
    /// Group message that mentions the bot somewhere else
    Mention,
    /// Group message that does not mention the bot
    Ambient,
}

/// A message received from any platform
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// Platform-specific message ID, used to react to the message
    pub message_id: String,
    /// Platform-specific user ID as string
    pub sender_id: String,
    /// Platform-specific chat/channel ID as string
    pub channel_id: String,
    /// The message text, with any mention of the bot removed
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub context: MessageContext,
}

/// Outbound side of a chat platform
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send a reply to the channel the message came from
    async fn reply(&self, message: &IncomingMessage, reply: &ChatReply) -> Result<()>;

    /// React to a message with an emoji, by name (e.g. `robot_face`)
    async fn add_reaction(&self, message: &IncomingMessage, emoji_name: &str) -> Result<()>;

    /// The bot's own user name on this platform
    fn bot_name(&self) -> &str;
}
