//! Shared domain model and configuration for chanwatch.
//!
//! Everything persisted or passed between crates lives here: the source and
//! analyzer enums, post/comment records, analysis verdicts, the per-channel
//! checkpoint, and the env-based `AppConfig`.

pub mod config;
pub mod types;

pub use config::{load_app_config, load_app_config_from_env, AppConfig, ConfigError};
pub use types::{
    AnalysisRecord, Analyzer, Author, Category, Checkpoint, Comment, Post, Source, StanceLabel,
    ToxicityLabel, Verdict,
};
