//! Export of keyword-flagged comments.
//!
//! Writes a JSON report (flagged comments sorted by likes, each tagged with
//! its full category set) plus a sibling `.txt` with one normalized comment
//! text per line, ready to feed into downstream model analysis.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use chanwatch_core::{AnalysisRecord, Category, Comment, Verdict};
use chanwatch_store::{write_json, StoreError};

#[derive(Debug, Serialize)]
struct ExportMetadata {
    exported_at: DateTime<Utc>,
    total_comments: usize,
    flagged_comments: usize,
    flagged_percentage: f64,
    unique_users_flagged: usize,
}

#[derive(Debug, Serialize)]
struct ExportedComment<'a> {
    comment_id: &'a str,
    post_id: &'a str,
    author_id: &'a str,
    author: String,
    text: &'a str,
    published_at: DateTime<Utc>,
    likes: u64,
    is_reply: bool,
    categories: Vec<Category>,
    matches: &'a [String],
}

#[derive(Debug, Serialize)]
struct ExportFile<'a> {
    metadata: ExportMetadata,
    categories_stats: BTreeMap<Category, usize>,
    all_matches: BTreeMap<&'a str, usize>,
    comments: Vec<ExportedComment<'a>>,
}

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub flagged_comments: usize,
    pub json_path: PathBuf,
    pub txt_path: PathBuf,
}

/// Write all keyword-flagged comments to `path` (and a `.txt` sibling).
///
/// Returns `None` when nothing is flagged — no empty report files.
///
/// # Errors
///
/// Returns [`StoreError`] on IO or serialization failure.
pub fn export_flagged(
    comments: &[Comment],
    keyword_records: &BTreeMap<String, AnalysisRecord>,
    path: &Path,
) -> Result<Option<ExportSummary>, StoreError> {
    let mut flagged: Vec<(&Comment, &Vec<String>, Vec<Category>)> = Vec::new();
    let mut categories_stats: BTreeMap<Category, usize> = BTreeMap::new();
    let mut all_matches: BTreeMap<&str, usize> = BTreeMap::new();
    let mut users: std::collections::HashSet<&str> = std::collections::HashSet::new();

    for comment in comments {
        let Some(record) = keyword_records.get(&comment.id) else {
            continue;
        };
        let Verdict::Keyword {
            categories,
            matches,
        } = &record.verdict
        else {
            continue;
        };
        if categories.is_empty() {
            continue;
        }
        for category in categories {
            *categories_stats.entry(*category).or_default() += 1;
        }
        for stem in matches {
            *all_matches.entry(stem.as_str()).or_default() += 1;
        }
        users.insert(&comment.author.id);
        flagged.push((comment, matches, categories.iter().copied().collect()));
    }

    if flagged.is_empty() {
        return Ok(None);
    }

    flagged.sort_by(|a, b| b.0.likes.cmp(&a.0.likes).then_with(|| a.0.id.cmp(&b.0.id)));

    let file = ExportFile {
        metadata: ExportMetadata {
            exported_at: Utc::now(),
            total_comments: comments.len(),
            flagged_comments: flagged.len(),
            flagged_percentage: percentage(flagged.len(), comments.len()),
            unique_users_flagged: users.len(),
        },
        categories_stats,
        all_matches,
        comments: flagged
            .iter()
            .map(|(comment, matches, categories)| ExportedComment {
                comment_id: &comment.id,
                post_id: &comment.post_id,
                author_id: &comment.author.id,
                author: comment.author.label(),
                text: &comment.text,
                published_at: comment.published_at,
                likes: comment.likes,
                is_reply: comment.is_reply,
                categories: categories.clone(),
                matches: matches.as_slice(),
            })
            .collect(),
    };

    write_json(path, &file)?;

    // One comment per line, newlines collapsed, for LLM-side consumption.
    let txt_path = path.with_extension("txt");
    let mut lines = String::new();
    for (comment, _, _) in &flagged {
        let normalized: String = comment.text.split_whitespace().collect::<Vec<_>>().join(" ");
        lines.push_str(&normalized);
        lines.push('\n');
    }
    fs::write(&txt_path, lines).map_err(|e| StoreError::Io {
        path: txt_path.display().to_string(),
        source: e,
    })?;

    Ok(Some(ExportSummary {
        flagged_comments: file.comments.len(),
        json_path: path.to_path_buf(),
        txt_path,
    }))
}

#[allow(clippy::cast_precision_loss)]
fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        (part as f64 / whole as f64 * 10_000.0).round() / 100.0
    }
}
