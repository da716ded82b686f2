use thiserror::Error;

/// Startup configuration failures. All of these are fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing credential: set {name} in the environment or config file")]
    MissingCredential { name: &'static str },

    #[error("failed to read config file {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// Failures talking to the search API.
#[derive(Debug, Error)]
pub enum SearchError {
    /// The server answered, but with a non-2xx status.
    #[error("search API responded with status {status}")]
    Status {
        status: reqwest::StatusCode,
        headers: String,
        body: String,
    },

    /// The request never produced a usable response (connect, timeout, decode).
    #[error("search request failed")]
    Request(#[from] reqwest::Error),
}

/// Raised while building or starting a guided dialog.
#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("dialog has no steps")]
    EmptyDialog,

    #[error("a conversation is already active for {participant_id} in {channel_id}")]
    AlreadyActive {
        participant_id: String,
        channel_id: String,
    },

    #[error("invalid branch pattern")]
    InvalidPattern(#[from] regex::Error),
}
