use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, error};

use crate::bot::BotContext;
use crate::platform::{IncomingMessage, MessageContext};

/// The message contexts a rule listens in
#[derive(Debug, Clone, Copy)]
pub struct Scope(pub &'static [MessageContext]);

impl Scope {
    /// Anything addressed to the bot: direct messages and mentions
    pub const ADDRESSED: Scope = Scope(&[
        MessageContext::DirectMessage,
        MessageContext::DirectMention,
        MessageContext::Mention,
    ]);

    pub fn contains(&self, context: MessageContext) -> bool {
        self.0.contains(&context)
    }
}

/// Runs when a rule matches
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(
        &self,
        ctx: &BotContext,
        message: &IncomingMessage,
        captures: &[String],
    ) -> Result<()>;
}

pub struct Rule {
    pub name: &'static str,
    patterns: Vec<Regex>,
    scope: Scope,
    handler: Arc<dyn Handler>,
}

impl Rule {
    /// Capture groups of the first pattern that matches, trimmed.
    /// Groups that did not participate come back empty.
    fn captures(&self, text: &str) -> Option<Vec<String>> {
        self.patterns.iter().find_map(|re| {
            re.captures(text).map(|caps| {
                caps.iter()
                    .skip(1)
                    .map(|m| m.map_or("", |m| m.as_str().trim()).to_string())
                    .collect()
            })
        })
    }
}

/// Result of matching one message against the rule list
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub rule_index: usize,
    pub rule_name: &'static str,
    pub captures: Vec<String>,
}

/// Ordered pattern rules. Built once at startup, read-only afterwards.
#[derive(Default)]
pub struct MessageRouter {
    rules: Vec<Rule>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule. Patterns are case-sensitive and unanchored unless they
    /// say otherwise.
    pub fn register(
        &mut self,
        name: &'static str,
        patterns: &[&str],
        scope: Scope,
        handler: impl Handler + 'static,
    ) -> Result<&mut Self, regex::Error> {
        let patterns = patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;

        debug!("Registered rule '{}' ({} patterns)", name, patterns.len());
        self.rules.push(Rule {
            name,
            patterns,
            scope,
            handler: Arc::new(handler),
        });
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// First rule, in registration order, whose scope includes the message
    /// context and one of whose patterns matches the text.
    pub fn find_match(&self, message: &IncomingMessage) -> Option<MatchResult> {
        self.rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| rule.scope.contains(message.context))
            .find_map(|(rule_index, rule)| {
                rule.captures(&message.text).map(|captures| MatchResult {
                    rule_index,
                    rule_name: rule.name,
                    captures,
                })
            })
    }

    /// Match the message and run the winning handler in the background.
    /// Returns without waiting for the handler; its errors are logged.
    pub fn dispatch(&self, ctx: Arc<BotContext>, message: IncomingMessage) -> Option<MatchResult> {
        let matched = match self.find_match(&message) {
            Some(m) => m,
            None => {
                debug!("No rule matched {:?} message", message.context);
                return None;
            }
        };

        debug!(
            "Message matched rule '{}' with captures {:?}",
            matched.rule_name, matched.captures
        );

        let handler = Arc::clone(&self.rules[matched.rule_index].handler);
        let rule_name = matched.rule_name;
        let captures = matched.captures.clone();
        tokio::spawn(async move {
            if let Err(e) = handler.handle(&ctx, &message, &captures).await {
                error!("Handler '{}' failed: {:#}", rule_name, e);
            }
        });

        Some(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::testing::{message, RecordingTransport};
    use tokio::sync::mpsc;

    struct Noop;

    #[async_trait]
    impl Handler for Noop {
        async fn handle(&self, _: &BotContext, _: &IncomingMessage, _: &[String]) -> Result<()> {
            Ok(())
        }
    }

    /// Forwards the captures it was called with
    struct Forward(mpsc::UnboundedSender<Vec<String>>);

    #[async_trait]
    impl Handler for Forward {
        async fn handle(
            &self,
            _: &BotContext,
            _: &IncomingMessage,
            captures: &[String],
        ) -> Result<()> {
            self.0.send(captures.to_vec())?;
            Ok(())
        }
    }

    const DM_ONLY: Scope = Scope(&[MessageContext::DirectMessage]);

    fn router() -> MessageRouter {
        let mut router = MessageRouter::new();
        router
            .register("greet", &["^hello", "^hi"], Scope::ADDRESSED, Noop)
            .unwrap()
            .register("dm-secret", &["secret"], DM_ONLY, Noop)
            .unwrap()
            .register("name", &["call me (.*)", "my name is (.*)"], Scope::ADDRESSED, Noop)
            .unwrap()
            .register("hello-again", &["hello"], Scope::ADDRESSED, Noop)
            .unwrap()
            .register("fallback", &[".+"], Scope::ADDRESSED, Noop)
            .unwrap();
        router
    }

    #[test]
    fn test_first_registered_rule_wins() {
        let m = router()
            .find_match(&message("hello there", MessageContext::DirectMessage))
            .unwrap();
        assert_eq!(m.rule_name, "greet");
        assert_eq!(m.rule_index, 0);
    }

    #[test]
    fn test_captures_from_first_matching_pattern_are_trimmed() {
        let m = router()
            .find_match(&message("my name is   Ada  ", MessageContext::Mention))
            .unwrap();
        assert_eq!(m.rule_name, "name");
        assert_eq!(m.captures, vec!["Ada".to_string()]);
    }

    #[test]
    fn test_scope_is_respected() {
        let r = router();
        let dm = r
            .find_match(&message("a secret", MessageContext::DirectMessage))
            .unwrap();
        assert_eq!(dm.rule_name, "dm-secret");

        let mention = r
            .find_match(&message("a secret", MessageContext::DirectMention))
            .unwrap();
        assert_eq!(mention.rule_name, "fallback");
    }

    #[test]
    fn test_ambient_messages_match_nothing() {
        assert!(router()
            .find_match(&message("hello", MessageContext::Ambient))
            .is_none());
    }

    #[test]
    fn test_match_is_case_sensitive() {
        let m = router()
            .find_match(&message("HELLO", MessageContext::DirectMessage))
            .unwrap();
        assert_eq!(m.rule_name, "fallback");
    }

    #[test]
    fn test_no_match_without_catch_all() {
        let mut r = MessageRouter::new();
        r.register("only", &["^ping$"], Scope::ADDRESSED, Noop).unwrap();
        assert!(r
            .find_match(&message("pong", MessageContext::DirectMessage))
            .is_none());
    }

    #[test]
    fn test_unmatched_optional_group_is_empty() {
        let mut r = MessageRouter::new();
        r.register("opt", &["^go(?: (\\w+))?"], Scope::ADDRESSED, Noop)
            .unwrap();
        let m = r
            .find_match(&message("go", MessageContext::DirectMessage))
            .unwrap();
        assert_eq!(m.captures, vec![String::new()]);
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let mut r = MessageRouter::new();
        assert!(r.register("bad", &["("], Scope::ADDRESSED, Noop).is_err());
        assert_eq!(r.len(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_runs_only_the_winning_handler() {
        let (first_tx, mut first_rx) = mpsc::unbounded_channel();
        let (second_tx, mut second_rx) = mpsc::unbounded_channel();

        let mut r = MessageRouter::new();
        r.register("first", &["^s (.*)"], Scope::ADDRESSED, Forward(first_tx))
            .unwrap()
            .register("second", &[".+"], Scope::ADDRESSED, Forward(second_tx))
            .unwrap();

        let ctx = Arc::new(BotContext::for_tests(Arc::new(RecordingTransport::default())));
        let matched = r
            .dispatch(ctx, message("s rust ", MessageContext::DirectMessage))
            .unwrap();
        assert_eq!(matched.rule_name, "first");

        assert_eq!(first_rx.recv().await.unwrap(), vec!["rust".to_string()]);
        // The losing handler's sender is still alive inside the router
        assert!(second_rx.try_recv().is_err());
    }
}
