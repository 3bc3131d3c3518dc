use thiserror::Error;

use chanwatch_store::StoreError;

#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The classification endpoint is unreachable or misbehaving in a way
    /// the per-batch retry/fallback does not cover (startup preflight).
    #[error("classification endpoint error: {0}")]
    Endpoint(String),

    /// Network failure from the underlying HTTP client.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Persistence failure; always fatal for the run (state stays consistent,
    /// nothing past the last durable unit is checkpointed).
    #[error(transparent)]
    Store(#[from] StoreError),
}
