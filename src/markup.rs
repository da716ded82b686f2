use std::sync::LazyLock;

use regex::{Captures, Regex};

static STRONG: LazyLock<Regex> = LazyLock::new(|| static_regex(r"</?(?:strong|b)>"));
static EMPHASIS: LazyLock<Regex> = LazyLock::new(|| static_regex(r"</?(?:em|i)>"));
static LINE_BREAK: LazyLock<Regex> = LazyLock::new(|| static_regex(r"</?(?:br|p)\s*/?>"));
static ANCHOR: LazyLock<Regex> = LazyLock::new(|| {
    static_regex(r#"<a\s+[^>]*href\s*=\s*["']([^"']+)["'].*?</a\s*>"#)
});
static COMMENT: LazyLock<Regex> = LazyLock::new(|| static_regex(r"(?s)<!--.*?-->"));
static NON_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    static_regex(
        r"(?is)<(?:script|style|textarea|option|noscript)\b[^>]*>.*?</(?:script|style|textarea|option|noscript)\s*>",
    )
});
static TAG: LazyLock<Regex> = LazyLock::new(|| static_regex(r"</?([A-Za-z][A-Za-z0-9]*)\b[^>]*>"));

/// Tags that survive sanitizing.
const ALLOWED_TAGS: &[&str] = &["img"];

/// Compile a pattern that is a string literal in this crate.
pub(crate) fn static_regex(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(re) => re,
        Err(e) => panic!("static pattern {pattern:?} failed to compile: {e}"),
    }
}

/// Convert a sanitized HTML fragment into chat markup.
///
/// The rewrites run in a fixed order, each on the previous output:
/// bold/italic tags become `*`/`_`, `&nbsp;` becomes a space, `<br>`/`<p>`
/// become newlines, anchors collapse to their bare URL, and finally every
/// tag outside the allow-list is stripped.
pub fn to_chat_markup(html: Option<&str>) -> String {
    let html = match html {
        Some(h) if !h.is_empty() => h,
        _ => return String::new(),
    };

    let out = STRONG.replace_all(html, "*");
    let out = EMPHASIS.replace_all(&out, "_");
    let out = out.replace("&nbsp;", " ");
    let out = LINE_BREAK.replace_all(&out, "\n");
    let out = ANCHOR.replace_all(&out, "${1}");
    sanitize(&out)
}

/// Strip all tags except the allow-list, dropping comments and the
/// contents of non-text elements such as `<script>`.
fn sanitize(html: &str) -> String {
    let out = COMMENT.replace_all(html, "");
    let out = NON_TEXT.replace_all(&out, "");
    TAG.replace_all(&out, |caps: &Captures| {
        let name = &caps[1];
        if ALLOWED_TAGS.iter().any(|t| t.eq_ignore_ascii_case(name)) {
            caps[0].to_string()
        } else {
            String::new()
        }
    })
    .into_owned()
}

/// Escape the three characters the chat markup treats as control characters.
pub fn chat_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// Decode every HTML entity: named, decimal and hex.
pub fn unescape_html(s: &str) -> String {
    html_escape::decode_html_entities(s).into_owned()
}
