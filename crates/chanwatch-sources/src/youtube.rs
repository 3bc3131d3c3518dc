//! `YouTube` Data API v3 collector.
//!
//! Resolves a channel handle to its uploads playlist, pages through the
//! latest videos with batched statistics lookups, and fetches comment
//! threads plus their replies. Quota exhaustion surfaces as
//! [`CollectError::QuotaExceeded`]; videos with comments disabled yield an
//! empty comment list rather than an error.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::Deserialize;

use chanwatch_core::{Author, Comment, Post, Source};

use crate::error::CollectError;
use crate::SourceCollector;

/// `videos.list` accepts at most this many ids per call.
const STATS_BATCH: usize = 50;
const PAGE_SIZE: usize = 50;
const COMMENT_PAGE_SIZE: usize = 100;

pub struct YoutubeCollector {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    snippet: SearchSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchSnippet {
    channel_id: String,
    title: String,
    #[serde(default)]
    custom_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChannelsResponse {
    #[serde(default)]
    items: Vec<ChannelItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelItem {
    content_details: ChannelContentDetails,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelContentDetails {
    related_playlists: RelatedPlaylists,
}

#[derive(Debug, Deserialize)]
struct RelatedPlaylists {
    uploads: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemsResponse {
    #[serde(default)]
    items: Vec<PlaylistItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItem {
    snippet: PlaylistItemSnippet,
    content_details: PlaylistItemContentDetails,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemSnippet {
    title: String,
    published_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemContentDetails {
    video_id: String,
}

#[derive(Debug, Deserialize)]
struct VideosResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
struct VideoItem {
    id: String,
    statistics: VideoStatistics,
}

/// Statistics values arrive as decimal strings.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoStatistics {
    #[serde(default)]
    view_count: Option<String>,
    #[serde(default)]
    comment_count: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentThreadsResponse {
    #[serde(default)]
    items: Vec<CommentThread>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommentThread {
    snippet: CommentThreadSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentThreadSnippet {
    top_level_comment: CommentResource,
    #[serde(default)]
    total_reply_count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentsResponse {
    #[serde(default)]
    items: Vec<CommentResource>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommentResource {
    id: String,
    snippet: CommentSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentSnippet {
    #[serde(default)]
    author_display_name: Option<String>,
    #[serde(default)]
    author_channel_id: Option<AuthorChannelId>,
    text_display: String,
    #[serde(default)]
    like_count: u64,
    published_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct AuthorChannelId {
    value: String,
}

/// Error envelope returned by the Data API.
#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    reason: String,
}

impl YoutubeCollector {
    /// # Errors
    ///
    /// Returns [`CollectError::Http`] if the HTTP client cannot be built.
    pub fn new(api_url: &str, api_key: &str, timeout_secs: u64) -> Result<Self, CollectError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("chanwatch/0.1 (comment-collection)")
            .build()?;
        Ok(Self {
            client,
            base_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn url(&self, resource: &str, params: &[(&str, &str)]) -> String {
        let mut url = format!("{}/{resource}?key={}", self.base_url, self.api_key);
        for (name, value) in params {
            let encoded = utf8_percent_encode(value, NON_ALPHANUMERIC);
            url.push_str(&format!("&{name}={encoded}"));
        }
        url
    }

    /// GET + decode, mapping the Data API error envelope onto the collector
    /// taxonomy. `disabled_ok` turns a 403 `commentsDisabled` into `None`.
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        context: &str,
        disabled_ok: bool,
    ) -> Result<Option<T>, CollectError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        let raw = response.bytes().await?;

        if !status.is_success() {
            let reason = api_reason(&raw);
            if disabled_ok && reason.as_deref() == Some("commentsDisabled") {
                return Ok(None);
            }
            return Err(classify_failure(status, reason, &raw, context));
        }

        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|e| CollectError::Deserialize {
                context: context.to_string(),
                source: e,
            })
    }

    /// Resolve an `@handle` or custom name to a channel id, preferring an
    /// exact custom-url or title match over search ranking.
    async fn resolve_channel_id(&self, channel: &str) -> Result<String, CollectError> {
        if channel.starts_with("UC") && !channel.contains('@') {
            return Ok(channel.to_string());
        }
        let handle = channel.trim_start_matches('@');
        let url = self.url(
            "search",
            &[
                ("part", "snippet"),
                ("q", handle),
                ("type", "channel"),
                ("maxResults", "5"),
            ],
        );
        let response: SearchResponse = self
            .get_json(&url, "youtube channel search", false)
            .await?
            .unwrap_or(SearchResponse { items: Vec::new() });

        let exact = response.items.iter().find(|item| {
            let custom = item
                .snippet
                .custom_url
                .as_deref()
                .unwrap_or("")
                .trim_start_matches('@');
            custom.eq_ignore_ascii_case(handle)
                || item.snippet.title.eq_ignore_ascii_case(handle)
        });
        exact
            .or_else(|| response.items.first())
            .map(|item| item.snippet.channel_id.clone())
            .ok_or_else(|| CollectError::Api(format!("channel not found: {channel}")))
    }

    async fn uploads_playlist(&self, channel_id: &str) -> Result<String, CollectError> {
        let url = self.url(
            "channels",
            &[("part", "contentDetails,snippet"), ("id", channel_id)],
        );
        let response: ChannelsResponse = self
            .get_json(&url, "youtube channel lookup", false)
            .await?
            .unwrap_or(ChannelsResponse { items: Vec::new() });
        response
            .items
            .into_iter()
            .next()
            .map(|item| item.content_details.related_playlists.uploads)
            .ok_or_else(|| CollectError::Api(format!("channel not found: {channel_id}")))
    }

    /// Batched `videos.list` statistics lookup (50 ids per call).
    async fn fetch_statistics(
        &self,
        video_ids: &[String],
    ) -> Result<HashMap<String, VideoStatistics>, CollectError> {
        let mut stats = HashMap::new();
        for chunk in video_ids.chunks(STATS_BATCH) {
            let ids = chunk.join(",");
            let url = self.url("videos", &[("part", "statistics"), ("id", &ids)]);
            let response: VideosResponse = self
                .get_json(&url, "youtube video statistics", false)
                .await?
                .unwrap_or(VideosResponse { items: Vec::new() });
            for item in response.items {
                stats.insert(item.id, item.statistics);
            }
        }
        Ok(stats)
    }

    async fn fetch_replies(
        &self,
        parent_id: &str,
        post_id: &str,
        known_ids: &HashSet<String>,
    ) -> Result<Vec<Comment>, CollectError> {
        let mut replies = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let max = COMMENT_PAGE_SIZE.to_string();
            let mut params = vec![
                ("part", "snippet"),
                ("parentId", parent_id),
                ("maxResults", max.as_str()),
                ("textFormat", "plainText"),
            ];
            if let Some(token) = page_token.as_deref() {
                params.push(("pageToken", token));
            }
            let url = self.url("comments", &params);
            let response = match self
                .get_json::<CommentsResponse>(&url, "youtube replies", true)
                .await?
            {
                Some(response) => response,
                None => break,
            };
            for item in response.items {
                if known_ids.contains(&item.id) {
                    continue;
                }
                replies.push(into_comment(item, post_id, true));
            }
            page_token = response.next_page_token;
            if page_token.is_none() {
                break;
            }
        }
        Ok(replies)
    }
}

#[async_trait]
impl SourceCollector for YoutubeCollector {
    fn source(&self) -> Source {
        Source::Youtube
    }

    async fn fetch_new_items(
        &self,
        channel: &str,
        limit: usize,
    ) -> Result<Vec<Post>, CollectError> {
        let channel_id = self.resolve_channel_id(channel).await?;
        let playlist_id = self.uploads_playlist(&channel_id).await?;

        let mut videos: Vec<(String, String, DateTime<Utc>)> = Vec::new();
        let mut page_token: Option<String> = None;
        while videos.len() < limit {
            let max = PAGE_SIZE.min(limit - videos.len()).to_string();
            let mut params = vec![
                ("part", "snippet,contentDetails"),
                ("playlistId", playlist_id.as_str()),
                ("maxResults", max.as_str()),
            ];
            if let Some(token) = page_token.as_deref() {
                params.push(("pageToken", token));
            }
            let url = self.url("playlistItems", &params);
            let response = match self
                .get_json::<PlaylistItemsResponse>(&url, "youtube playlist items", false)
                .await?
            {
                Some(response) => response,
                None => break,
            };
            for item in response.items {
                videos.push((
                    item.content_details.video_id,
                    item.snippet.title,
                    item.snippet.published_at,
                ));
            }
            page_token = response.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        let ids: Vec<String> = videos.iter().map(|(id, _, _)| id.clone()).collect();
        let stats = self.fetch_statistics(&ids).await?;

        let posts = videos
            .into_iter()
            .map(|(id, title, published_at)| {
                let s = stats.get(&id);
                Post {
                    source: Source::Youtube,
                    channel: channel.to_string(),
                    published_at,
                    title,
                    comment_count: s.and_then(|s| parse_count(s.comment_count.as_deref())),
                    views: s.and_then(|s| parse_count(s.view_count.as_deref())),
                    id,
                }
            })
            .collect();
        Ok(posts)
    }

    async fn fetch_new_comments(
        &self,
        post: &Post,
        known_ids: &HashSet<String>,
    ) -> Result<Vec<Comment>, CollectError> {
        let mut comments = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let max = COMMENT_PAGE_SIZE.to_string();
            let mut params = vec![
                ("part", "snippet"),
                ("videoId", post.id.as_str()),
                ("maxResults", max.as_str()),
                ("order", "time"),
                ("textFormat", "plainText"),
            ];
            if let Some(token) = page_token.as_deref() {
                params.push(("pageToken", token));
            }
            let url = self.url("commentThreads", &params);
            let response = match self
                .get_json::<CommentThreadsResponse>(&url, "youtube comment threads", true)
                .await?
            {
                Some(response) => response,
                None => {
                    tracing::debug!(video = %post.id, "comments disabled");
                    return Ok(Vec::new());
                }
            };

            for thread in response.items {
                let top = thread.snippet.top_level_comment;
                let top_id = top.id.clone();
                if !known_ids.contains(&top_id) {
                    comments.push(into_comment(top, &post.id, false));
                }
                if thread.snippet.total_reply_count > 0 {
                    let replies = self.fetch_replies(&top_id, &post.id, known_ids).await?;
                    comments.extend(replies);
                }
            }

            page_token = response.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        if !comments.is_empty() {
            tracing::debug!(
                video = %post.id,
                count = comments.len(),
                "fetched new youtube comments"
            );
        }
        Ok(comments)
    }
}

fn into_comment(resource: CommentResource, post_id: &str, is_reply: bool) -> Comment {
    let snippet = resource.snippet;
    let display_name = snippet.author_display_name;
    let author_id = snippet
        .author_channel_id
        .map(|c| c.value)
        .or_else(|| display_name.clone())
        .unwrap_or_else(|| "unknown".to_string());
    Comment {
        id: resource.id,
        post_id: post_id.to_string(),
        author: Author {
            id: author_id,
            username: display_name.clone(),
            display_name,
        },
        text: snippet.text_display,
        published_at: snippet.published_at,
        likes: snippet.like_count,
        is_reply,
    }
}

fn parse_count(raw: Option<&str>) -> Option<u64> {
    raw.and_then(|s| s.parse().ok())
}

fn api_reason(body: &[u8]) -> Option<String> {
    let envelope: ApiErrorEnvelope = serde_json::from_slice(body).ok()?;
    envelope
        .error
        .errors
        .into_iter()
        .next()
        .map(|detail| detail.reason)
}

fn classify_failure(
    status: reqwest::StatusCode,
    reason: Option<String>,
    body: &[u8],
    context: &str,
) -> CollectError {
    let message = serde_json::from_slice::<ApiErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(body).into_owned());
    match reason.as_deref() {
        Some("quotaExceeded" | "dailyLimitExceeded") => CollectError::QuotaExceeded(message),
        Some("rateLimitExceeded") => CollectError::RateLimited(message),
        _ if status == reqwest::StatusCode::TOO_MANY_REQUESTS => {
            CollectError::RateLimited(message)
        }
        _ => CollectError::Api(format!("{context}: status {status}: {message}")),
    }
}
