use std::sync::LazyLock;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, error, info, warn};

use crate::bot::BotContext;
use crate::conversation::{Action, Branch, ConversationSession, Dialog, SessionState, Step};
use crate::error::{ConversationError, SearchError};
use crate::markup::{chat_escape, static_regex};
use crate::platform::IncomingMessage;
use crate::profile::Profile;
use crate::router::{Handler, MessageRouter, Scope};
use crate::search::translate::translate;

const YES_PATTERN: &str = r"(?i)^(yes|yea|yup|yep|ya|sure|ok|y|yeah|yah)";
const NO_PATTERN: &str = r"(?i)^(no|nah|nope|n)";

static YES: LazyLock<Regex> = LazyLock::new(|| static_regex(YES_PATTERN));
static NO: LazyLock<Regex> = LazyLock::new(|| static_regex(NO_PATTERN));

const NICKNAME_KEY: &str = "nickname";
const CONFIRM_KEY: &str = "confirm";

const CONVERSATION_FAILED_TEXT: &str = "Sorry, something went wrong on my end. Please try again.";
const SEARCH_UPSTREAM_TEXT: &str =
    "I am having trouble getting a response from the search service. Please contact my master.";
const SEARCH_INTERNAL_TEXT: &str = "Doh! An internal error occurred. Please contact my master.";
const FALLBACK_TEXT: &str =
    "Sorry, I don't understand that command. Try prefixing your search query with *s*.";

/// Register the bot's rules. Order matters: the first match wins, and the
/// catch-all comes last so every addressed message gets an answer.
pub fn register_all(router: &mut MessageRouter) -> Result<(), regex::Error> {
    router
        .register("greeting", &[r"(?i)^(?:hello|hi)\b"], Scope::ADDRESSED, Greeting)?
        .register(
            "set_name",
            &[r"(?i)^call me (.*)", r"(?i)^my name is (.*)"],
            Scope::ADDRESSED,
            SetName,
        )?
        .register(
            "what_is_my_name",
            &[r"(?i)what is my name", r"(?i)who am i"],
            Scope::ADDRESSED,
            WhatIsMyName,
        )?
        .register("shutdown", &[r"(?i)^shutdown\b"], Scope::ADDRESSED, Shutdown)?
        .register(
            "identify",
            &[
                r"(?i)\buptime\b",
                r"(?i)identify yourself",
                r"(?i)who are you",
                r"(?i)what is your name",
            ],
            Scope::ADDRESSED,
            Identify,
        )?
        .register(
            "search",
            &[
                r#"^\s*(?i:s(?:earch|olve)?)\s+(?i:for\s+)?['"]*(.*?)['"]*$"#,
                r"^\s*([?/>].*)",
            ],
            Scope::ADDRESSED,
            Search,
        )?
        .register("fallback", &[".+"], Scope::ADDRESSED, Fallback)?;
    Ok(())
}

/// Profile lookups that fail are treated as "unknown user"
async fn load_profile(ctx: &BotContext, user_id: &str) -> Option<Profile> {
    match ctx.profiles.get(user_id).await {
        Ok(profile) => profile,
        Err(e) => {
            warn!("Failed to load profile for {}: {:#}", user_id, e);
            None
        }
    }
}

async fn save_name(ctx: &BotContext, user_id: &str, name: &str) -> Result<Profile> {
    let mut profile = load_profile(ctx, user_id)
        .await
        .unwrap_or_else(|| Profile::new(user_id));
    profile.name = Some(name.to_string());
    ctx.profiles
        .save(&profile)
        .await
        .context("Failed to save profile")?;
    info!("Saved name for {}", user_id);
    Ok(profile)
}

struct Greeting;

#[async_trait]
impl Handler for Greeting {
    async fn handle(&self, ctx: &BotContext, message: &IncomingMessage, _: &[String]) -> Result<()> {
        if let Err(e) = ctx.transport.add_reaction(message, "robot_face").await {
            warn!("Failed to add emoji reaction: {:#}", e);
        }

        let reply = match load_profile(ctx, &message.sender_id).await {
            Some(Profile {
                name: Some(name), ..
            }) => format!("Hello {}!!", name),
            _ => "Hello.".to_string(),
        };
        ctx.reply(message, reply).await;
        Ok(())
    }
}

struct SetName;

#[async_trait]
impl Handler for SetName {
    async fn handle(
        &self,
        ctx: &BotContext,
        message: &IncomingMessage,
        captures: &[String],
    ) -> Result<()> {
        let name = captures.first().map(String::as_str).unwrap_or_default();
        let profile = save_name(ctx, &message.sender_id, name).await?;
        ctx.reply(
            message,
            format!(
                "Got it. I will call you {} from now on.",
                profile.name.unwrap_or_default()
            ),
        )
        .await;
        Ok(())
    }
}

struct WhatIsMyName;

impl WhatIsMyName {
    fn dialog() -> Dialog {
        Dialog::new().say("I do not know your name yet!").ask(
            Step::new("What should I call you?")
                .store_as(NICKNAME_KEY)
                .branch(Branch::fallback(Action::Continue).on_match(|turn| {
                    let name = turn.response().to_string();
                    turn.ask(Self::confirm_step(&name));
                })),
        )
    }

    fn confirm_step(name: &str) -> Step {
        Step::new(format!("You want me to call you `{}`?", name))
            .branch(Branch::matching(YES.clone(), Action::Continue))
            .branch(Branch::matching(NO.clone(), Action::Stop))
            .branch(Branch::fallback(Action::Repeat))
    }

    async fn on_end(ctx: &BotContext, message: &IncomingMessage, session: ConversationSession) -> Result<()> {
        if session.state() != SessionState::Completed {
            ctx.reply(message, "OK, nevermind!").await;
            return Ok(());
        }

        ctx.reply(message, "OK! I will update my dossier...").await;
        let nickname = session.extract_response(NICKNAME_KEY).unwrap_or_default();
        let profile = save_name(ctx, &message.sender_id, nickname).await?;
        ctx.reply(
            message,
            format!(
                "Got it. I will call you {} from now on.",
                profile.name.unwrap_or_default()
            ),
        )
        .await;
        Ok(())
    }
}

#[async_trait]
impl Handler for WhatIsMyName {
    async fn handle(&self, ctx: &BotContext, message: &IncomingMessage, _: &[String]) -> Result<()> {
        if let Some(Profile {
            name: Some(name), ..
        }) = load_profile(ctx, &message.sender_id).await
        {
            ctx.reply(message, format!("Your name is {}", name)).await;
            return Ok(());
        }

        let started = match ctx.conversations.start(message, Self::dialog()).await {
            Ok(started) => started,
            Err(e) => return conversation_failed(ctx, message, e).await,
        };
        for text in started.outbound {
            ctx.reply(message, text).await;
        }

        match started.ended.await {
            Ok(session) => Self::on_end(ctx, message, session).await,
            Err(_) => {
                debug!("Conversation {} dropped without ending", started.session_id);
                Ok(())
            }
        }
    }
}

struct Shutdown;

impl Shutdown {
    fn dialog() -> Result<Dialog, ConversationError> {
        Ok(Dialog::new().ask(
            Step::new("Are you sure you want me to shutdown?")
                .store_as(CONFIRM_KEY)
                .branch(
                    Branch::pattern(YES_PATTERN, Action::Continue)?
                        .on_match(|turn| turn.say("Bye!")),
                )
                .branch(Branch::fallback(Action::Continue).on_match(|turn| turn.say("*Phew!*"))),
        ))
    }
}

#[async_trait]
impl Handler for Shutdown {
    async fn handle(&self, ctx: &BotContext, message: &IncomingMessage, _: &[String]) -> Result<()> {
        let dialog = match Self::dialog() {
            Ok(dialog) => dialog,
            Err(e) => return conversation_failed(ctx, message, e).await,
        };
        let started = match ctx.conversations.start(message, dialog).await {
            Ok(started) => started,
            Err(e) => return conversation_failed(ctx, message, e).await,
        };
        for text in started.outbound {
            ctx.reply(message, text).await;
        }

        if let Ok(session) = started.ended.await {
            let confirmed = session.state() == SessionState::Completed
                && session
                    .extract_response(CONFIRM_KEY)
                    .is_some_and(|answer| YES.is_match(answer));
            if confirmed {
                info!("Shutdown confirmed by {}", message.sender_id);
                ctx.request_shutdown();
            }
        }
        Ok(())
    }
}

/// A dialog that could not be started is reported, not silently dropped
async fn conversation_failed(
    ctx: &BotContext,
    message: &IncomingMessage,
    err: ConversationError,
) -> Result<()> {
    error!("Failed to start conversation with {}: {}", message.sender_id, err);
    ctx.reply(message, CONVERSATION_FAILED_TEXT).await;
    Ok(())
}

struct Identify;

#[async_trait]
impl Handler for Identify {
    async fn handle(&self, ctx: &BotContext, message: &IncomingMessage, _: &[String]) -> Result<()> {
        let uptime = format_uptime(ctx.started_at.elapsed().as_secs_f64());
        ctx.reply(
            message,
            format!(
                ":robot_face: I am a bot named @{}. I have been running for {} on {}.",
                ctx.transport.bot_name(),
                uptime,
                hostname()
            ),
        )
        .await;
        Ok(())
    }
}

/// Seconds, minutes once past a minute, hours once past an hour
pub fn format_uptime(seconds: f64) -> String {
    let mut value = seconds;
    let mut unit = "second";
    if value > 60.0 {
        value /= 60.0;
        unit = "minute";
    }
    if value > 60.0 {
        value /= 60.0;
        unit = "hour";
    }

    let number = format!("{:.2}", value);
    let number = number.trim_end_matches('0').trim_end_matches('.');
    let plural = if number == "1" { "" } else { "s" };
    format!("{} {}{}", number, unit, plural)
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| "localhost".to_string())
}

struct Search;

#[async_trait]
impl Handler for Search {
    async fn handle(
        &self,
        ctx: &BotContext,
        message: &IncomingMessage,
        captures: &[String],
    ) -> Result<()> {
        let query = captures.first().map(|q| q.trim()).unwrap_or_default();
        if query.is_empty() {
            ctx.reply(message, FALLBACK_TEXT).await;
            return Ok(());
        }

        ctx.reply(message, format!("Searching for '{}' ...", chat_escape(query)))
            .await;

        let reply = match ctx.search.search(query).await {
            Ok(response) => {
                debug!("Search for '{}' returned {} results", query, response.results.len());
                translate(&response, query)
            }
            Err(SearchError::Status {
                status,
                headers,
                body,
            }) => {
                error!("Got bad response from search API: {}", status);
                error!("Response body: {}", body);
                error!("Response headers: {}", headers);
                SEARCH_UPSTREAM_TEXT.into()
            }
            Err(SearchError::Request(e)) => {
                error!("Search request failed: {:?}", e);
                SEARCH_INTERNAL_TEXT.into()
            }
        };

        ctx.reply(message, reply).await;
        Ok(())
    }
}

struct Fallback;

#[async_trait]
impl Handler for Fallback {
    async fn handle(&self, ctx: &BotContext, message: &IncomingMessage, _: &[String]) -> Result<()> {
        ctx.reply(message, FALLBACK_TEXT).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use crate::bot::{handle_incoming, BotContext};
    use crate::config::Config;
    use crate::platform::testing::{message, RecordingTransport};
    use crate::platform::MessageContext;
    use crate::profile::SqliteProfileStore;
    use crate::reply::ChatReply;
    use crate::search::translate::NO_RESULTS_TEXT;

    fn setup() -> (Arc<RecordingTransport>, Arc<BotContext>) {
        let transport = Arc::new(RecordingTransport::default());
        let ctx = Arc::new(BotContext::for_tests(transport.clone()));
        (transport, ctx)
    }

    fn router() -> MessageRouter {
        let mut router = MessageRouter::new();
        register_all(&mut router).unwrap();
        router
    }

    fn dm(text: &str) -> IncomingMessage {
        message(text, MessageContext::DirectMessage)
    }

    fn rule_for(text: &str) -> &'static str {
        router().find_match(&dm(text)).unwrap().rule_name
    }

    /// Wait until the handler task has sent its opening messages
    async fn wait_for_replies(transport: &RecordingTransport, count: usize) {
        for _ in 0..200 {
            if transport.replies.lock().await.len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("handler never sent {} replies", count);
    }

    #[test]
    fn test_rule_selection() {
        assert_eq!(rule_for("hello"), "greeting");
        assert_eq!(rule_for("Hi there"), "greeting");
        assert_eq!(rule_for("history of rome"), "fallback");
        assert_eq!(rule_for("call me Ada"), "set_name");
        assert_eq!(rule_for("my name is Ada"), "set_name");
        assert_eq!(rule_for("what is my name"), "what_is_my_name");
        assert_eq!(rule_for("who am i"), "what_is_my_name");
        assert_eq!(rule_for("shutdown"), "shutdown");
        assert_eq!(rule_for("uptime"), "identify");
        assert_eq!(rule_for("who are you?"), "identify");
        assert_eq!(rule_for("s rust lang"), "search");
        assert_eq!(rule_for("search for \"rust\""), "search");
        assert_eq!(rule_for("? 2+2"), "search");
        assert_eq!(rule_for("blah"), "fallback");
    }

    #[test]
    fn test_command_keywords_only_match_at_the_start() {
        assert_eq!(rule_for("please call me Ada"), "fallback");
        assert_eq!(rule_for("ok shutdown"), "fallback");
        assert_eq!(rule_for("s how to shutdown linux"), "search");
        assert_eq!(rule_for("s hello world"), "search");
        assert_eq!(rule_for("Shutdown now"), "shutdown");
    }

    #[test]
    fn test_search_captures_strip_prefix_and_quotes() {
        let r = router();
        let m = r.find_match(&dm("search for \"rust lang\"")).unwrap();
        assert_eq!(m.captures, vec!["rust lang".to_string()]);

        let m = r.find_match(&dm("solve 2+2")).unwrap();
        assert_eq!(m.captures, vec!["2+2".to_string()]);

        let m = r.find_match(&dm("/weather tokyo")).unwrap();
        assert_eq!(m.captures, vec!["/weather tokyo".to_string()]);
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(1.0), "1 second");
        assert_eq!(format_uptime(30.0), "30 seconds");
        assert_eq!(format_uptime(60.0), "60 seconds");
        assert_eq!(format_uptime(61.0), "1.02 minutes");
        assert_eq!(format_uptime(90.0), "1.5 minutes");
        assert_eq!(format_uptime(3600.0), "60 minutes");
        assert_eq!(format_uptime(3660.0), "1.02 hours");
        assert_eq!(format_uptime(7200.0), "2 hours");
    }

    #[tokio::test]
    async fn test_greeting_unknown_user() {
        let (transport, ctx) = setup();
        Greeting.handle(&ctx, &dm("hello"), &[]).await.unwrap();

        assert_eq!(transport.texts().await, ["Hello."]);
        assert_eq!(*transport.reactions.lock().await, ["robot_face"]);
    }

    #[tokio::test]
    async fn test_set_name_then_greeting_uses_it() {
        let (transport, ctx) = setup();
        SetName
            .handle(&ctx, &dm("call me Ada"), &["Ada".to_string()])
            .await
            .unwrap();
        Greeting.handle(&ctx, &dm("hi"), &[]).await.unwrap();

        assert_eq!(
            transport.texts().await,
            ["Got it. I will call you Ada from now on.", "Hello Ada!!"]
        );
    }

    #[tokio::test]
    async fn test_known_name_is_reported_without_conversation() {
        let (transport, ctx) = setup();
        let mut profile = Profile::new("user-1");
        profile.name = Some("Grace".to_string());
        ctx.profiles.save(&profile).await.unwrap();

        WhatIsMyName.handle(&ctx, &dm("who am i"), &[]).await.unwrap();
        assert_eq!(transport.texts().await, ["Your name is Grace"]);
        assert_eq!(ctx.conversations.active_sessions().await, 0);
    }

    #[tokio::test]
    async fn test_name_onboarding_conversation() {
        let (transport, ctx) = setup();
        let router = router();

        let handler_ctx = Arc::clone(&ctx);
        let task = tokio::spawn(async move {
            WhatIsMyName
                .handle(&handler_ctx, &dm("what is my name"), &[])
                .await
        });
        wait_for_replies(&transport, 2).await;

        handle_incoming(&ctx, &router, dm("Ada")).await.unwrap();
        handle_incoming(&ctx, &router, dm("perhaps")).await.unwrap();
        assert!(ctx.conversations.is_active("user-1", "chan-1").await);
        handle_incoming(&ctx, &router, dm("yes")).await.unwrap();

        task.await.unwrap().unwrap();

        assert_eq!(
            transport.texts().await,
            [
                "I do not know your name yet!",
                "What should I call you?",
                "You want me to call you `Ada`?",
                "You want me to call you `Ada`?",
                "OK! I will update my dossier...",
                "Got it. I will call you Ada from now on.",
            ]
        );
        let saved = ctx.profiles.get("user-1").await.unwrap().unwrap();
        assert_eq!(saved.name.as_deref(), Some("Ada"));
    }

    #[tokio::test]
    async fn test_name_onboarding_declined() {
        let (transport, ctx) = setup();
        let router = router();

        let handler_ctx = Arc::clone(&ctx);
        let task = tokio::spawn(async move {
            WhatIsMyName.handle(&handler_ctx, &dm("who am i"), &[]).await
        });
        wait_for_replies(&transport, 2).await;

        handle_incoming(&ctx, &router, dm("Ada")).await.unwrap();
        handle_incoming(&ctx, &router, dm("nope")).await.unwrap();
        task.await.unwrap().unwrap();

        assert_eq!(transport.texts().await.last().unwrap(), "OK, nevermind!");
        assert!(ctx.profiles.get("user-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_conversation_already_active_gets_fallback_reply() {
        let (transport, ctx) = setup();
        ctx.conversations
            .start(&dm("x"), Dialog::new().ask(Step::new("Busy?")))
            .await
            .unwrap();

        Shutdown.handle(&ctx, &dm("shutdown"), &[]).await.unwrap();
        assert_eq!(transport.texts().await, [CONVERSATION_FAILED_TEXT]);
    }

    #[tokio::test]
    async fn test_shutdown_declined() {
        let (transport, ctx) = setup();
        let router = router();

        let handler_ctx = Arc::clone(&ctx);
        let task = tokio::spawn(async move {
            Shutdown.handle(&handler_ctx, &dm("shutdown"), &[]).await
        });
        wait_for_replies(&transport, 1).await;
        handle_incoming(&ctx, &router, dm("no way")).await.unwrap();
        task.await.unwrap().unwrap();

        assert_eq!(
            transport.texts().await,
            ["Are you sure you want me to shutdown?", "*Phew!*"]
        );
        let waited =
            tokio::time::timeout(Duration::from_millis(100), ctx.shutdown_requested()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_confirmed() {
        let (transport, ctx) = setup();
        let router = router();

        let handler_ctx = Arc::clone(&ctx);
        let task = tokio::spawn(async move {
            Shutdown.handle(&handler_ctx, &dm("shutdown"), &[]).await
        });
        wait_for_replies(&transport, 1).await;
        handle_incoming(&ctx, &router, dm("yes")).await.unwrap();
        task.await.unwrap().unwrap();

        assert_eq!(transport.texts().await.last().unwrap(), "Bye!");
        tokio::time::timeout(Duration::from_secs(2), ctx.shutdown_requested())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_identify() {
        let (transport, ctx) = setup();
        Identify.handle(&ctx, &dm("uptime"), &[]).await.unwrap();
        let texts = transport.texts().await;
        assert!(texts[0].starts_with(":robot_face: I am a bot named @solvebot. I have been running for "));
    }

    #[tokio::test]
    async fn test_fallback() {
        let (transport, ctx) = setup();
        Fallback.handle(&ctx, &dm("blah"), &[]).await.unwrap();
        assert_eq!(transport.texts().await, [FALLBACK_TEXT]);
    }

    async fn search_ctx(
        status_line: &'static str,
        body: &'static str,
    ) -> (Arc<RecordingTransport>, BotContext) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = socket.read(&mut buf).await.unwrap();
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });

        let mut config = Config::default();
        config.search.base_url = format!("http://{}/search", addr);
        config.search.timeout_ms = 5_000;
        let transport = Arc::new(RecordingTransport::default());
        let profiles = Arc::new(SqliteProfileStore::open_in_memory().unwrap());
        let ctx = BotContext::new(&config, transport.clone(), profiles);
        (transport, ctx)
    }

    #[tokio::test]
    async fn test_search_replies_with_translated_results() {
        let body = r#"{"results":[{"result":{"label":"Rust","uri":"https://rust-lang.org"}}]}"#;
        let (transport, ctx) = search_ctx("200 OK", body).await;

        Search
            .handle(&ctx, &dm("s <rust>"), &["<rust>".to_string()])
            .await
            .unwrap();

        let replies = transport.replies.lock().await.clone();
        assert_eq!(replies[0], ChatReply::text("Searching for '&lt;rust&gt;' ..."));
        assert_eq!(
            replies[1].text,
            "I found 1 result:\n\nQuick Link:\nRust https://rust-lang.org\n"
        );
    }

    #[tokio::test]
    async fn test_search_with_no_results() {
        let (transport, ctx) = search_ctx("200 OK", r#"{"results":[]}"#).await;
        Search
            .handle(&ctx, &dm("s nothing"), &["nothing".to_string()])
            .await
            .unwrap();
        assert_eq!(transport.texts().await[1], NO_RESULTS_TEXT);
    }

    #[tokio::test]
    async fn test_search_upstream_error_reply() {
        let (transport, ctx) = search_ctx("500 Internal Server Error", "oops").await;
        Search
            .handle(&ctx, &dm("s rust"), &["rust".to_string()])
            .await
            .unwrap();
        assert_eq!(transport.texts().await[1], SEARCH_UPSTREAM_TEXT);
    }

    #[tokio::test]
    async fn test_search_undecodable_body_reply() {
        let (transport, ctx) = search_ctx("200 OK", "<html>").await;
        Search
            .handle(&ctx, &dm("s rust"), &["rust".to_string()])
            .await
            .unwrap();
        assert_eq!(transport.texts().await[1], SEARCH_INTERNAL_TEXT);
    }

    #[tokio::test]
    async fn test_empty_search_query_gets_hint() {
        let (transport, ctx) = setup();
        Search
            .handle(&ctx, &dm("s "), &[String::new()])
            .await
            .unwrap();
        assert_eq!(transport.texts().await, [FALLBACK_TEXT]);
    }
}
