//! Source collectors: the external "fetch new items since checkpoint X"
//! capability consumed by the analysis orchestrator.
//!
//! Two implementations share one seam: a Telegram MTProto gateway client and
//! a YouTube Data API v3 client. Both may block and both may fail with
//! rate/quota errors; the core treats partial results as "fetch what you
//! got, checkpoint it, stop".

use std::collections::HashSet;

use async_trait::async_trait;

use chanwatch_core::{Comment, Post, Source};

pub mod error;
pub mod telegram;
pub mod youtube;

pub use error::CollectError;
pub use telegram::TelegramCollector;
pub use youtube::YoutubeCollector;

/// A comment source. Implementations perform their own pagination and skip
/// comments whose ids the caller already knows.
#[async_trait]
pub trait SourceCollector: Send + Sync {
    fn source(&self) -> Source;

    /// The latest parent items of a channel, newest first, at most `limit`.
    async fn fetch_new_items(
        &self,
        channel: &str,
        limit: usize,
    ) -> Result<Vec<Post>, CollectError>;

    /// Comments on `post` that are not in `known_ids`, in fetch order.
    /// Partial results are valid results: an error after some pages have
    /// been returned still loses only the unfetched remainder.
    async fn fetch_new_comments(
        &self,
        post: &Post,
        known_ids: &HashSet<String>,
    ) -> Result<Vec<Comment>, CollectError>;
}
