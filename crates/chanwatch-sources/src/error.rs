use thiserror::Error;

/// Errors surfaced by the source collectors.
///
/// Rate and quota errors are hard stops for the fetch phase: the core never
/// retries them within a run, it keeps whatever was already persisted and
/// tells the operator to back off. Everything else is a per-call failure.
#[derive(Debug, Error)]
pub enum CollectError {
    /// The source throttled us (HTTP 429 / flood-wait).
    #[error("rate limited by source: {0}")]
    RateLimited(String),

    /// The source's daily quota is exhausted.
    #[error("source quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Network or TLS failure from the underlying HTTP client.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The source API returned an application-level error.
    #[error("source API error: {0}")]
    Api(String),

    /// The response body could not be deserialized into the expected type.
    #[error("response parse error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl CollectError {
    /// True for errors that should stop the fetch phase for the whole run
    /// rather than just the current call.
    #[must_use]
    pub fn is_throughput_limit(&self) -> bool {
        matches!(
            self,
            CollectError::RateLimited(_) | CollectError::QuotaExceeded(_)
        )
    }
}
