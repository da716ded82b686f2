use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use teloxide::prelude::*;
use teloxide::types::{MessageId, ParseMode, ReactionType};
use tracing::{error, info, warn};

use crate::bot::{handle_incoming, BotContext};
use crate::platform::{ChatTransport, IncomingMessage, MessageContext};
use crate::reply::{Attachment, ChatReply};
use crate::router::MessageRouter;

/// Telegram's limit is 4096; leave headroom
const MAX_MESSAGE_LEN: usize = 4000;

const ELLIPSIS: &str = "\u{2026}";

/// Split long messages for Telegram's 4096 char limit
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + max_len).min(text.len());
        // Walk back to a valid UTF-8 char boundary so slicing doesn't panic
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        let actual_end = if end < text.len() {
            text[start..end]
                .rfind('\n')
                .or_else(|| text[start..end].rfind(' '))
                .map(|pos| start + pos + 1)
                .unwrap_or(end)
        } else {
            end
        };

        chunks.push(text[start..actual_end].to_string());
        start = actual_end;
    }

    chunks
}

/// Emoji names used by handlers, mapped to reactions Telegram accepts
fn reaction_emoji(name: &str) -> Option<&'static str> {
    match name {
        "robot_face" => Some("👾"),
        "thumbsup" | "+1" => Some("👍"),
        "eyes" => Some("👀"),
        "tada" => Some("🎉"),
        _ => None,
    }
}

fn color_marker(color: &str) -> &'static str {
    match color {
        "good" => "🟢",
        "warning" => "🟡",
        "danger" => "🔴",
        _ => "🔵",
    }
}

/// Minimal escaping for Telegram's HTML parse mode
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Cut escaped text to at most `max_len` bytes, on a char boundary and
/// never inside an `&...;` entity
fn truncate_escaped(text: &str, max_len: usize) -> &str {
    if text.len() <= max_len {
        return text;
    }
    let mut end = max_len;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    let cut = &text[..end];
    match cut.rfind('&') {
        Some(amp) if !cut[amp..].contains(';') => &cut[..amp],
        _ => cut,
    }
}

/// Render an attachment as one HTML-formatted Telegram message.
/// The body is already escaped for `&`, `<` and `>`, so it is used as is,
/// shortened so the whole message fits in `MAX_MESSAGE_LEN`.
fn render_attachment(attachment: &Attachment) -> String {
    let mut head = String::new();
    let title = html_escape(&attachment.title);
    head.push_str(color_marker(&attachment.color_tag));
    head.push(' ');
    match &attachment.title_link {
        Some(link) => head.push_str(&format!(
            "<b><a href=\"{}\">{}</a></b>",
            html_escape(link),
            title
        )),
        None => head.push_str(&format!("<b>{}</b>", title)),
    }
    head.push('\n');
    if let Some(author) = &attachment.author_name {
        head.push_str(&format!("<i>{}</i>\n", html_escape(author)));
    }

    let mut tail = String::new();
    if let Some(image) = attachment
        .image_url
        .as_ref()
        .or(attachment.thumbnail_url.as_ref())
    {
        tail.push_str(&html_escape(image));
        tail.push('\n');
    }
    let when = attachment
        .timestamp
        .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
        .map(|dt| dt.format("%Y-%m-%d %H:%M UTC").to_string());
    let footer = match (&attachment.footer, when) {
        (Some(footer), Some(when)) => Some(format!("{} | {}", html_escape(footer), when)),
        (Some(footer), None) => Some(html_escape(footer)),
        (None, Some(when)) => Some(when),
        (None, None) => None,
    };
    if let Some(footer) = footer {
        tail.push_str(&format!("<i>{}</i>", footer));
    }

    let mut out = head;
    let body = attachment.body.trim();
    if !body.is_empty() {
        let budget = MAX_MESSAGE_LEN
            .saturating_sub(out.len() + tail.len() + ELLIPSIS.len() + 1);
        let shown = truncate_escaped(body, budget);
        out.push_str(shown);
        if shown.len() < body.len() {
            out.push_str(ELLIPSIS);
        }
        out.push('\n');
    }
    out.push_str(&tail);
    out
}

/// Work out how a message addresses the bot, and strip the mention
fn classify(text: &str, is_private: bool, bot_name: &str) -> (MessageContext, String) {
    if is_private {
        return (MessageContext::DirectMessage, text.to_string());
    }

    let mention = format!("@{}", bot_name);
    let trimmed = text.trim_start();
    if let Some(rest) = trimmed.strip_prefix(&mention) {
        let rest = rest.trim_start_matches([':', ',']).trim();
        return (MessageContext::DirectMention, rest.to_string());
    }
    if text.contains(&mention) {
        let cleaned = text.replace(&mention, "");
        return (MessageContext::Mention, cleaned.trim().to_string());
    }
    (MessageContext::Ambient, text.to_string())
}

fn parse_ids(message: &IncomingMessage) -> Result<(ChatId, MessageId)> {
    let chat_id: i64 = message
        .channel_id
        .parse()
        .with_context(|| format!("Invalid chat id: {}", message.channel_id))?;
    let message_id: i32 = message
        .message_id
        .parse()
        .with_context(|| format!("Invalid message id: {}", message.message_id))?;
    Ok((ChatId(chat_id), MessageId(message_id)))
}

pub struct TelegramTransport {
    bot: Bot,
    bot_name: String,
}

impl TelegramTransport {
    /// Connect and look up the bot's own user name
    pub async fn connect(token: &str) -> Result<Self> {
        let bot = Bot::new(token);
        let me = bot
            .get_me()
            .await
            .context("Failed to authenticate with Telegram")?;
        let bot_name = me.username().to_string();
        info!("Connected to Telegram as @{}", bot_name);
        Ok(Self { bot, bot_name })
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn reply(&self, message: &IncomingMessage, reply: &ChatReply) -> Result<()> {
        let (chat_id, _) = parse_ids(message)?;

        if !reply.text.trim().is_empty() {
            for chunk in split_message(&reply.text, MAX_MESSAGE_LEN) {
                self.bot
                    .send_message(chat_id, chunk)
                    .await
                    .context("Failed to send message")?;
            }
        }

        for attachment in &reply.attachments {
            if let Err(e) = self
                .bot
                .send_message(chat_id, render_attachment(attachment))
                .parse_mode(ParseMode::Html)
                .await
            {
                warn!("Failed to send attachment '{}': {}", attachment.fallback_text, e);
            }
        }

        Ok(())
    }

    async fn add_reaction(&self, message: &IncomingMessage, emoji_name: &str) -> Result<()> {
        let emoji = reaction_emoji(emoji_name)
            .with_context(|| format!("No Telegram reaction for '{}'", emoji_name))?;
        let (chat_id, message_id) = parse_ids(message)?;
        self.bot
            .set_message_reaction(chat_id, message_id)
            .reaction(vec![ReactionType::Emoji {
                emoji: emoji.to_string(),
            }])
            .await
            .context("Failed to set reaction")?;
        Ok(())
    }

    fn bot_name(&self) -> &str {
        &self.bot_name
    }
}

/// Run the Telegram bot platform
pub async fn run(
    ctx: Arc<BotContext>,
    router: Arc<MessageRouter>,
    allowed_user_ids: Vec<u64>,
    bot: Bot,
) -> Result<()> {
    info!("Starting Telegram platform...");

    let handler = Update::filter_message()
        .filter_map(move |msg: Message| {
            let user = msg.from.as_ref()?;
            if allowed_user_ids.is_empty() || allowed_user_ids.contains(&user.id.0) {
                Some(msg)
            } else {
                None
            }
        })
        .endpoint(handle_message);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![ctx, router])
        .default_handler(|upd| async move {
            warn!("Unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_message(
    msg: Message,
    ctx: Arc<BotContext>,
    router: Arc<MessageRouter>,
) -> ResponseResult<()> {
    let user = match msg.from.as_ref() {
        Some(user) => user,
        None => return Ok(()),
    };

    let text = match msg.text() {
        Some(t) => t,
        None => return Ok(()),
    };

    let (context, text) = classify(text, msg.chat.is_private(), ctx.transport.bot_name());

    info!(
        "Telegram message from {} ({}) as {:?}: {}",
        user.first_name, user.id.0, context, text
    );

    let incoming = IncomingMessage {
        message_id: msg.id.0.to_string(),
        sender_id: user.id.0.to_string(),
        channel_id: msg.chat.id.0.to_string(),
        text,
        timestamp: msg.date,
        context,
    };

    if let Err(e) = handle_incoming(&ctx, &router, incoming).await {
        error!("Error processing message: {:#}", e);
    }

    Ok(())
}
