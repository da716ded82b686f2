use tracing::debug;
use url::Url;

use super::{MediaItem, ResultContent, SearchResponse, SearchResult};
use crate::markup::{chat_escape, to_chat_markup, unescape_html};
use crate::reply::{Attachment, ChatReply};

/// Upper bound on rich attachments in a single reply
pub const MAX_ATTACHMENTS_PER_REPLY: usize = 20;

/// Attachment colours, cycled in result order
pub const ATTACHMENT_COLORS: [&str; 4] = ["good", "warning", "danger", "#439FE0"];

pub const NO_RESULTS_TEXT: &str =
    "Sorry, I couldn't find anything for you. Please try another query.";

/// How a single result ends up in the reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// No rich content: listed as a label + URL line
    QuickLink,
    /// Rendered as an attachment
    Attachment,
    /// Rich, but past the attachment cap: not shown at all
    Overflow,
}

/// Translate a search response into a chat reply.
///
/// Results past [`MAX_ATTACHMENTS_PER_REPLY`] are dropped rather than listed.
pub fn translate(response: &SearchResponse, query: &str) -> ChatReply {
    let results = &response.results;
    if results.is_empty() {
        debug!("No results for '{}'", query);
        return ChatReply::text(NO_RESULTS_TEXT);
    }

    let mut text = format!(
        "I found {} result{}:\n",
        results.len(),
        if results.len() > 1 { "s" } else { "" }
    );

    let mut attachments = Vec::new();
    let mut quick_links = Vec::new();

    for (r, class) in results.iter().zip(classify(results)) {
        match class {
            Classification::QuickLink => quick_links.push(r),
            Classification::Attachment => {
                attachments.push(build_attachment(r, attachments.len()));
            }
            Classification::Overflow => {}
        }
    }

    debug!(
        "Translated {} results for '{}': {} attachments, {} quick links",
        results.len(),
        query,
        attachments.len(),
        quick_links.len()
    );

    text.push('\n');
    text.push_str(&quick_links_text(&quick_links));

    ChatReply { text, attachments }
}

/// Classify every result, in order. The attachment counter only advances
/// on non-quick-link results.
pub fn classify(results: &[SearchResult]) -> Vec<Classification> {
    let mut attachment_count = 0;
    results
        .iter()
        .map(|r| {
            if is_quick_link(&r.result) {
                return Classification::QuickLink;
            }
            let class = if attachment_count < MAX_ATTACHMENTS_PER_REPLY {
                Classification::Attachment
            } else {
                Classification::Overflow
            };
            attachment_count += 1;
            class
        })
        .collect()
}

fn is_quick_link(result: &ResultContent) -> bool {
    first_media_uri(&result.thumbnails).is_none()
        && first_media_uri(&result.media).is_none()
        && non_empty(&result.summary_html).is_none()
        && non_empty(&result.content).is_none()
}

/// `index` is the attachment's position among non-quick-link results.
fn build_attachment(r: &SearchResult, index: usize) -> Attachment {
    let result = &r.result;

    let mut attachment = Attachment {
        fallback_text: result.label.clone(),
        title: result.label.clone(),
        body: chat_escape(&body_text(result)),
        image_url: first_media_uri(&result.media),
        thumbnail_url: first_media_uri(&result.thumbnails),
        footer: non_empty(&r.context.feed_title).or_else(|| non_empty(&r.context.generator_name)),
        color_tag: ATTACHMENT_COLORS[index % ATTACHMENT_COLORS.len()].to_string(),
        ..Default::default()
    };

    if let Some(uri) = non_empty(&result.uri) {
        attachment.author_icon = result.icon_url.clone();
        attachment.author_name = hostname(&uri);
        attachment.title_link = Some(uri);
    }

    if let Some(ms) = result.last_updated_timestamp.filter(|ms| *ms != 0) {
        // Cards show whole seconds
        attachment.timestamp = Some(ms / 1000);
    }

    attachment
}

/// Content wins over the summary. Plain-text content is used verbatim.
fn body_text(result: &ResultContent) -> String {
    match non_empty(&result.content) {
        Some(content) if result.content_type.as_deref() == Some("text/html") => {
            unescape_html(&to_chat_markup(Some(&content)))
        }
        Some(content) => content,
        None => unescape_html(&to_chat_markup(result.summary_html.as_deref())),
    }
}

fn quick_links_text(quick_links: &[&SearchResult]) -> String {
    if quick_links.is_empty() {
        return String::new();
    }

    let mut s = format!(
        "Quick Link{}:\n",
        if quick_links.len() > 1 { "s" } else { "" }
    );
    for r in quick_links {
        s.push_str(&chat_escape(&r.result.label));
        s.push(' ');
        s.push_str(r.result.uri.as_deref().unwrap_or_default());
        s.push('\n');
    }
    s
}

fn first_media_uri(items: &[MediaItem]) -> Option<String> {
    items.first().and_then(|m| non_empty(&m.media_uri))
}

fn hostname(uri: &str) -> Option<String> {
    Url::parse(uri)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|s| !s.is_empty()).cloned()
}
