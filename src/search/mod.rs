pub mod client;
pub mod translate;

use serde::{Deserialize, Deserializer};

/// Treat an explicit `null` the same as a missing field
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Body returned by the search API
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub results: Vec<SearchResult>,
}

/// One search hit: where it came from plus the result itself
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchResult {
    #[serde(default, deserialize_with = "null_as_default")]
    pub context: ResultContext,
    #[serde(default, deserialize_with = "null_as_default")]
    pub result: ResultContent,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultContext {
    pub feed_title: Option<String>,
    pub generator_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultContent {
    #[serde(default, deserialize_with = "null_as_default")]
    pub label: String,
    pub uri: Option<String>,
    pub icon_url: Option<String>,
    pub content: Option<String>,
    pub content_type: Option<String>,
    pub summary_html: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub thumbnails: Vec<MediaItem>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub media: Vec<MediaItem>,
    /// Milliseconds since the Unix epoch
    pub last_updated_timestamp: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem {
    pub media_uri: Option<String>,
}
