//! Telegram collector, speaking to an MTProto gateway sidecar over HTTP.
//!
//! The gateway owns sessions, 2FA and flood-wait handling; this client only
//! consumes its REST surface: channel posts and per-post comment lists.
//! Telegram discussion threads have no nested replies, so every comment is
//! top-level and carries no like count.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::Deserialize;

use chanwatch_core::{Author, Comment, Post, Source};

use crate::error::CollectError;
use crate::SourceCollector;

const MAX_TITLE_CHARS: usize = 200;

pub struct TelegramCollector {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct PostsResponse {
    posts: Vec<GatewayPost>,
}

#[derive(Debug, Deserialize)]
struct GatewayPost {
    id: i64,
    date: DateTime<Utc>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    views: Option<u64>,
    /// Reply count reported by the channel's discussion thread, if any.
    #[serde(default)]
    replies: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct CommentsResponse {
    comments: Vec<GatewayComment>,
}

#[derive(Debug, Deserialize)]
struct GatewayComment {
    id: i64,
    date: DateTime<Utc>,
    #[serde(default)]
    text: String,
    sender: GatewaySender,
}

#[derive(Debug, Deserialize)]
struct GatewaySender {
    id: i64,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
}

impl TelegramCollector {
    /// # Errors
    ///
    /// Returns [`CollectError::Http`] if the HTTP client cannot be built.
    pub fn new(gateway_url: &str, timeout_secs: u64) -> Result<Self, CollectError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("chanwatch/0.1 (comment-collection)")
            .build()?;
        Ok(Self {
            client,
            base_url: gateway_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        context: &str,
    ) -> Result<T, CollectError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            return Err(CollectError::RateLimited(format!(
                "gateway flood-wait: {body}"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CollectError::Api(format!("{context}: status {status}: {body}")));
        }
        let raw = response.bytes().await?;
        serde_json::from_slice(&raw).map_err(|e| CollectError::Deserialize {
            context: context.to_string(),
            source: e,
        })
    }

    fn channel_segment(channel: &str) -> String {
        let bare = channel.trim_start_matches('@');
        utf8_percent_encode(bare, NON_ALPHANUMERIC).to_string()
    }
}

#[async_trait]
impl SourceCollector for TelegramCollector {
    fn source(&self) -> Source {
        Source::Telegram
    }

    async fn fetch_new_items(
        &self,
        channel: &str,
        limit: usize,
    ) -> Result<Vec<Post>, CollectError> {
        let url = format!(
            "{}/channels/{}/posts?limit={limit}",
            self.base_url,
            Self::channel_segment(channel)
        );
        let response: PostsResponse = self.get_json(&url, "telegram posts").await?;

        let posts = response
            .posts
            .into_iter()
            .map(|p| {
                let title = if p.text.is_empty() {
                    "[Media without text]".to_string()
                } else {
                    truncate_chars(&p.text, MAX_TITLE_CHARS)
                };
                Post {
                    id: p.id.to_string(),
                    source: Source::Telegram,
                    channel: channel.to_string(),
                    published_at: p.date,
                    title,
                    comment_count: p.replies,
                    views: p.views,
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
        let url = format!(
            "{}/channels/{}/posts/{}/comments",
            self.base_url,
            Self::channel_segment(&post.channel),
            post.id
        );
        let response: CommentsResponse = self.get_json(&url, "telegram comments").await?;

        let comments: Vec<Comment> = response
            .comments
            .into_iter()
            .filter(|c| !c.text.is_empty())
            .filter(|c| !known_ids.contains(&c.id.to_string()))
            .map(|c| Comment {
                id: c.id.to_string(),
                post_id: post.id.clone(),
                author: Author {
                    id: c.sender.id.to_string(),
                    username: c.sender.username,
                    display_name: c.sender.first_name,
                },
                text: c.text,
                published_at: c.date,
                likes: 0,
                is_reply: false,
            })
            .collect();

        if !comments.is_empty() {
            tracing::debug!(
                post = %post.id,
                count = comments.len(),
                "fetched new telegram comments"
            );
        }
        Ok(comments)
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}
