//! Analysis engines and run orchestration for chanwatch.
//!
//! Holds the deterministic keyword detection engine, the batched LLM-backed
//! classifier with its retry/fallback policy, aggregate statistics, the
//! flagged-comment export, and the orchestrator that drives a full
//! collect-and-analyze run against the channel store.

pub mod classifier;
pub mod error;
pub mod export;
pub mod keyword;
pub mod orchestrator;
pub mod stats;

pub use classifier::{BatchClassifier, ClassifyTask, LmClient, MODEL_ENGINE_VERSION};
pub use error::AnalysisError;
pub use export::{export_flagged, ExportSummary};
pub use keyword::{KeywordEngine, RULESET_VERSION};
pub use orchestrator::{CommentFilter, Orchestrator, RunMode, RunOptions, RunReport};
pub use stats::ChannelStats;
