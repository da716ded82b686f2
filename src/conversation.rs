use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use regex::Regex;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ConversationError;
use crate::platform::IncomingMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Completed,
    Stopped,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionState::Active)
    }
}

/// What happens after a branch matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Move on to the next queued item
    Continue,
    /// Ask the current question again
    Repeat,
    /// End the conversation as stopped
    Stop,
}

pub type Callback = Arc<dyn Fn(&mut Turn<'_>) + Send + Sync>;

/// One possible answer to a step. Pattern branches are tried in order;
/// a default branch only runs when none of them matched.
#[derive(Clone)]
pub enum Branch {
    Pattern {
        pattern: Regex,
        action: Action,
        on_match: Option<Callback>,
    },
    Default {
        action: Action,
        on_match: Option<Callback>,
    },
}

impl Branch {
    pub fn pattern(pattern: &str, action: Action) -> Result<Self, ConversationError> {
        Ok(Self::matching(Regex::new(pattern)?, action))
    }

    pub fn matching(pattern: Regex, action: Action) -> Self {
        Branch::Pattern {
            pattern,
            action,
            on_match: None,
        }
    }

    pub fn fallback(action: Action) -> Self {
        Branch::Default {
            action,
            on_match: None,
        }
    }

    /// Run `f` when this branch is chosen, before its action applies.
    pub fn on_match<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Turn<'_>) + Send + Sync + 'static,
    {
        match &mut self {
            Branch::Pattern { on_match, .. } | Branch::Default { on_match, .. } => {
                *on_match = Some(Arc::new(f));
            }
        }
        self
    }

    pub fn action(&self) -> Action {
        match self {
            Branch::Pattern { action, .. } | Branch::Default { action, .. } => *action,
        }
    }

    fn callback(&self) -> Option<&Callback> {
        match self {
            Branch::Pattern { on_match, .. } | Branch::Default { on_match, .. } => {
                on_match.as_ref()
            }
        }
    }
}

impl fmt::Debug for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Branch::Pattern {
                pattern, action, ..
            } => write!(f, "Pattern({}, {:?})", pattern.as_str(), action),
            Branch::Default { action, .. } => write!(f, "Default({:?})", action),
        }
    }
}

/// A question and the ways it can be answered
#[derive(Debug, Clone)]
pub struct Step {
    prompt: String,
    branches: Vec<Branch>,
    storage_key: Option<String>,
}

impl Step {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            branches: Vec::new(),
            storage_key: None,
        }
    }

    pub fn branch(mut self, branch: Branch) -> Self {
        self.branches.push(branch);
        self
    }

    /// Record the raw answer under `key`
    pub fn store_as(mut self, key: impl Into<String>) -> Self {
        self.storage_key = Some(key.into());
        self
    }

    fn select(&self, response: &str) -> Option<&Branch> {
        self.branches
            .iter()
            .find(|b| matches!(b, Branch::Pattern { pattern, .. } if pattern.is_match(response)))
            .or_else(|| {
                self.branches
                    .iter()
                    .find(|b| matches!(b, Branch::Default { .. }))
            })
    }
}

#[derive(Debug, Clone)]
enum Item {
    Say(String),
    Ask(Step),
}

/// The script of a guided conversation: messages and questions, in order
#[derive(Debug, Default)]
pub struct Dialog {
    items: VecDeque<Item>,
}

impl Dialog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn say(mut self, text: impl Into<String>) -> Self {
        self.items.push_back(Item::Say(text.into()));
        self
    }

    pub fn ask(mut self, step: Step) -> Self {
        self.items.push_back(Item::Ask(step));
        self
    }
}

/// Handed to branch callbacks: the answer, plus a way to queue follow-ups.
/// Follow-ups run before anything that was already queued.
pub struct Turn<'a> {
    response: &'a str,
    follow_ups: Vec<Item>,
}

impl Turn<'_> {
    pub fn response(&self) -> &str {
        self.response
    }

    pub fn say(&mut self, text: impl Into<String>) {
        self.follow_ups.push(Item::Say(text.into()));
    }

    pub fn ask(&mut self, step: Step) {
        self.follow_ups.push(Item::Ask(step));
    }
}

/// One guided dialog with one participant in one channel
#[derive(Debug)]
pub struct ConversationSession {
    pub id: Uuid,
    pub participant_id: String,
    pub channel_id: String,
    state: SessionState,
    answers: HashMap<String, String>,
    pending: Option<Step>,
    queue: VecDeque<Item>,
}

impl ConversationSession {
    fn new(participant_id: &str, channel_id: &str, dialog: Dialog) -> Self {
        Self {
            id: Uuid::new_v4(),
            participant_id: participant_id.to_string(),
            channel_id: channel_id.to_string(),
            state: SessionState::Active,
            answers: HashMap::new(),
            pending: None,
            queue: dialog.items,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The answer stored under `key`, if that step was answered
    pub fn extract_response(&self, key: &str) -> Option<&str> {
        self.answers.get(key).map(String::as_str)
    }

    /// Drain the queue up to the next question. Running out of items
    /// completes the session.
    fn run(&mut self, out: &mut Vec<String>) {
        while let Some(item) = self.queue.pop_front() {
            match item {
                Item::Say(text) => out.push(text),
                Item::Ask(step) => {
                    out.push(step.prompt.clone());
                    self.pending = Some(step);
                    return;
                }
            }
        }
        self.state = SessionState::Completed;
    }

    /// Feed the participant's answer to the pending step.
    fn respond(&mut self, response: &str) -> Vec<String> {
        let mut out = Vec::new();
        let step = match self.pending.take() {
            Some(step) => step,
            None => {
                self.run(&mut out);
                return out;
            }
        };

        if let Some(key) = &step.storage_key {
            self.answers.insert(key.clone(), response.to_string());
        }

        let (action, follow_ups) = if step.branches.is_empty() {
            (Action::Continue, Vec::new())
        } else {
            match step.select(response) {
                Some(branch) => {
                    debug!("Session {}: answer matched {:?}", self.id, branch);
                    let mut turn = Turn {
                        response,
                        follow_ups: Vec::new(),
                    };
                    if let Some(callback) = branch.callback() {
                        callback(&mut turn);
                    }
                    (branch.action(), turn.follow_ups)
                }
                None => {
                    debug!("Session {}: no branch matched, asking again", self.id);
                    (Action::Repeat, Vec::new())
                }
            }
        };

        match action {
            Action::Continue => {
                self.push_front(follow_ups);
                self.run(&mut out);
            }
            Action::Repeat => {
                self.queue.push_front(Item::Ask(step));
                self.push_front(follow_ups);
                self.run(&mut out);
            }
            Action::Stop => {
                out.extend(follow_ups.into_iter().filter_map(|item| match item {
                    Item::Say(text) => Some(text),
                    Item::Ask(_) => None,
                }));
                self.queue.clear();
                self.state = SessionState::Stopped;
            }
        }

        out
    }

    fn push_front(&mut self, items: Vec<Item>) {
        for item in items.into_iter().rev() {
            self.queue.push_front(item);
        }
    }
}

struct ActiveConversation {
    session: ConversationSession,
    ended: oneshot::Sender<ConversationSession>,
}

/// A freshly started conversation
#[derive(Debug)]
pub struct Started {
    pub session_id: Uuid,
    /// Messages to send right away, ending with the first question
    pub outbound: Vec<String>,
    /// Resolves once, with the final session, when the conversation ends
    pub ended: oneshot::Receiver<ConversationSession>,
}

type SessionKey = (String, String);

/// Owns every in-progress conversation, keyed by participant and channel.
#[derive(Default)]
pub struct ConversationEngine {
    sessions: Mutex<HashMap<SessionKey, ActiveConversation>>,
}

impl ConversationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a dialog with the sender of `message`, in its channel.
    pub async fn start(
        &self,
        message: &IncomingMessage,
        dialog: Dialog,
    ) -> Result<Started, ConversationError> {
        if dialog.items.is_empty() {
            return Err(ConversationError::EmptyDialog);
        }

        let key = (message.sender_id.clone(), message.channel_id.clone());
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(&key) {
            return Err(ConversationError::AlreadyActive {
                participant_id: key.0,
                channel_id: key.1,
            });
        }

        let mut session = ConversationSession::new(&message.sender_id, &message.channel_id, dialog);
        let session_id = session.id;
        let mut outbound = Vec::new();
        session.run(&mut outbound);

        info!(
            "Started conversation {} with {} in {}",
            session_id, message.sender_id, message.channel_id
        );

        let (tx, rx) = oneshot::channel();
        if session.state.is_terminal() {
            finish(session, tx);
        } else {
            sessions.insert(
                key,
                ActiveConversation {
                    session,
                    ended: tx,
                },
            );
        }

        Ok(Started {
            session_id,
            outbound,
            ended: rx,
        })
    }

    /// Route a message to the conversation waiting on its sender in its
    /// channel. Returns `None` when there is no such conversation.
    pub async fn resume(&self, message: &IncomingMessage) -> Option<Vec<String>> {
        let key = (message.sender_id.clone(), message.channel_id.clone());
        let mut sessions = self.sessions.lock().await;
        let mut active = sessions.remove(&key)?;

        let outbound = active.session.respond(&message.text);

        if active.session.state.is_terminal() {
            finish(active.session, active.ended);
        } else {
            sessions.insert(key, active);
        }

        Some(outbound)
    }

    #[allow(dead_code)]
    pub async fn is_active(&self, participant_id: &str, channel_id: &str) -> bool {
        let key = (participant_id.to_string(), channel_id.to_string());
        self.sessions.lock().await.contains_key(&key)
    }

    #[allow(dead_code)]
    pub async fn active_sessions(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

fn finish(session: ConversationSession, ended: oneshot::Sender<ConversationSession>) {
    info!(
        "Conversation {} with {} in {} ended as {:?}",
        session.id, session.participant_id, session.channel_id, session.state
    );
    if ended.send(session).is_err() {
        debug!("Nobody was waiting for the end of the conversation");
    }
}
