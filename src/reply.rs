/// A reply sent back to the channel a message came from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatReply {
    pub text: String,
    pub attachments: Vec<Attachment>,
}

impl ChatReply {
    /// A plain text reply with no attachments
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachments: Vec::new(),
        }
    }
}

impl From<&str> for ChatReply {
    fn from(text: &str) -> Self {
        Self::text(text)
    }
}

impl From<String> for ChatReply {
    fn from(text: String) -> Self {
        Self::text(text)
    }
}

/// A rich message card
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attachment {
    /// Plain text shown where cards cannot be rendered
    pub fallback_text: String,
    pub title: String,
    pub title_link: Option<String>,
    pub body: String,
    pub image_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub author_name: Option<String>,
    pub author_icon: Option<String>,
    pub footer: Option<String>,
    pub color_tag: String,
    /// Whole seconds since the Unix epoch. Sub-second precision from the
    /// source is dropped.
    pub timestamp: Option<i64>,
}
