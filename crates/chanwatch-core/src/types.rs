use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Comment source platform. Determines the update window and request delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Telegram,
    Youtube,
}

impl Source {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Source::Telegram => "telegram",
            Source::Youtube => "youtube",
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A post (Telegram) or video (YouTube) that owns a set of comments.
///
/// Immutable once fetched; never deleted, only marked settled in the
/// channel checkpoint once older than the source's update window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub source: Source,
    pub channel: String,
    pub published_at: DateTime<Utc>,
    /// Post text or video title, truncated by the collector.
    pub title: String,
    /// Reported comment/reply count, when the platform exposes one.
    /// `Some(0)` lets the fetch loop skip comment-disabled items.
    pub comment_count: Option<u64>,
    pub views: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Author {
    pub id: String,
    pub username: Option<String>,
    pub display_name: Option<String>,
}

impl Author {
    /// Best display label: username, then display name, then a stand-in.
    #[must_use]
    pub fn label(&self) -> String {
        self.username
            .clone()
            .or_else(|| self.display_name.clone())
            .unwrap_or_else(|| format!("User_{}", self.id))
    }
}

/// A fetched comment snapshot, authoritative for its lifetime even if the
/// platform later edits or deletes the original.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub post_id: String,
    pub author: Author,
    pub text: String,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub likes: u64,
    #[serde(default)]
    pub is_reply: bool,
}

/// Analyzer identity, used as the persisted key for analysis records and
/// checkpoint entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Analyzer {
    Keyword,
    Toxicity,
    Stance,
}

impl Analyzer {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Analyzer::Keyword => "keyword",
            Analyzer::Toxicity => "toxicity",
            Analyzer::Stance => "stance",
        }
    }
}

impl std::fmt::Display for Analyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keyword-engine category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    DeathWishes,
    EthnicSlurs,
    Dehumanization,
    ViolenceCalls,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::DeathWishes,
        Category::EthnicSlurs,
        Category::Dehumanization,
        Category::ViolenceCalls,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Category::DeathWishes => "death_wishes",
            Category::EthnicSlurs => "ethnic_slurs",
            Category::Dehumanization => "dehumanization",
            Category::ViolenceCalls => "violence_calls",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToxicityLabel {
    Toxic,
    Neutral,
    Friendly,
}

impl std::fmt::Display for ToxicityLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ToxicityLabel::Toxic => "toxic",
            ToxicityLabel::Neutral => "neutral",
            ToxicityLabel::Friendly => "friendly",
        };
        f.write_str(s)
    }
}

/// Political-alignment label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StanceLabel {
    ProUkraine,
    ProRussia,
    Neutral,
}

impl std::fmt::Display for StanceLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StanceLabel::ProUkraine => "pro_ukraine",
            StanceLabel::ProRussia => "pro_russia",
            StanceLabel::Neutral => "neutral",
        };
        f.write_str(s)
    }
}

/// Analyzer-specific result payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Verdict {
    Keyword {
        categories: BTreeSet<Category>,
        /// Stems that matched, for export and top-match statistics.
        matches: Vec<String>,
    },
    Toxicity {
        label: ToxicityLabel,
    },
    Stance {
        label: StanceLabel,
    },
}

impl Verdict {
    /// True for keyword verdicts with at least one matched category.
    #[must_use]
    pub fn is_flagged(&self) -> bool {
        matches!(self, Verdict::Keyword { categories, .. } if !categories.is_empty())
    }
}

/// One analysis result for one (comment, analyzer) pair.
///
/// A later record written under force-reanalysis supersedes an earlier one
/// for the same pair; no other mutation of persisted analysis state exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub comment_id: String,
    pub analyzer: Analyzer,
    pub verdict: Verdict,
    /// Keyword ruleset version or model endpoint identity.
    pub engine_version: String,
    pub produced_at: DateTime<Utc>,
}

/// Per-channel resume cursor.
///
/// `analyzed` always trails or matches the persisted record set (records are
/// written first, the checkpoint second), never the reverse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub source: Source,
    pub channel: String,
    /// Items outside the update window; never re-polled for comments.
    #[serde(default)]
    pub settled: BTreeSet<String>,
    /// Items still eligible for new-comment fetches.
    #[serde(default)]
    pub open: BTreeSet<String>,
    /// analyzer name -> comment ids carrying that analyzer's verdict.
    #[serde(default)]
    pub analyzed: BTreeMap<String, BTreeSet<String>>,
}

impl Checkpoint {
    #[must_use]
    pub fn new(source: Source, channel: &str) -> Self {
        Self {
            source,
            channel: channel.to_string(),
            settled: BTreeSet::new(),
            open: BTreeSet::new(),
            analyzed: BTreeMap::new(),
        }
    }
}
