//! Aggregate statistics over cached comments and their analysis records.
//!
//! Pure computation; the CLI decides how to render it. Covers the basic
//! activity numbers, the keyword-engine breakdown, and the per-label
//! distribution of the model-backed analyzers.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use chanwatch_core::{
    AnalysisRecord, Category, Comment, StanceLabel, ToxicityLabel, Verdict,
};

/// How many active users / matched stems / liked comments to surface.
const TOP_N: usize = 10;
const TOP_MATCHES: usize = 20;

#[derive(Debug, Clone, Serialize)]
pub struct UserActivity {
    pub user_id: String,
    pub label: String,
    pub comments: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LikedComment {
    pub comment_id: String,
    pub author: String,
    pub likes: u64,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct KeywordStats {
    pub flagged_comments: usize,
    pub flagged_percentage: f64,
    pub unique_users_flagged: usize,
    pub category_counts: BTreeMap<Category, usize>,
    /// Matched stems by frequency, capped at the top twenty.
    pub top_matches: Vec<(String, usize)>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ToxicityStats {
    pub comment_counts: BTreeMap<ToxicityLabel, usize>,
    /// Users by their most frequent label.
    pub user_counts: BTreeMap<ToxicityLabel, usize>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StanceStats {
    pub comment_counts: BTreeMap<StanceLabel, usize>,
    /// Users by dominant stance; a stance dominates only with a ≥20% share
    /// that beats the opposite stance.
    pub user_counts: BTreeMap<StanceLabel, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelStats {
    pub total_comments: usize,
    pub unique_users: usize,
    pub avg_comments_per_user: f64,
    pub top_level_comments: usize,
    pub reply_comments: usize,
    pub top_users: Vec<UserActivity>,
    /// (bucket label, user count), e.g. ("2 comments", 14).
    pub activity_distribution: Vec<(String, usize)>,
    /// (percentile, users needed to cover it).
    pub concentration: Vec<(u32, usize)>,
    pub top_liked: Vec<LikedComment>,
    pub keyword: Option<KeywordStats>,
    pub toxicity: Option<ToxicityStats>,
    pub stance: Option<StanceStats>,
}

impl ChannelStats {
    #[must_use]
    pub fn compute(
        comments: &[Comment],
        keyword_records: &BTreeMap<String, AnalysisRecord>,
        toxicity_records: &BTreeMap<String, AnalysisRecord>,
        stance_records: &BTreeMap<String, AnalysisRecord>,
    ) -> Self {
        let total = comments.len();
        let mut per_user: HashMap<&str, Vec<&Comment>> = HashMap::new();
        for comment in comments {
            per_user.entry(&comment.author.id).or_default().push(comment);
        }
        let unique_users = per_user.len();

        let mut user_counts: Vec<(&str, usize, String)> = per_user
            .iter()
            .map(|(id, cs)| (*id, cs.len(), cs[0].author.label()))
            .collect();
        user_counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        let top_users = user_counts
            .iter()
            .take(TOP_N)
            .map(|(id, count, label)| UserActivity {
                user_id: (*id).to_string(),
                label: label.clone(),
                comments: *count,
            })
            .collect();

        let reply_comments = comments.iter().filter(|c| c.is_reply).count();

        let mut top_liked: Vec<&Comment> = comments.iter().filter(|c| c.likes > 0).collect();
        top_liked.sort_by(|a, b| b.likes.cmp(&a.likes).then_with(|| a.id.cmp(&b.id)));
        let top_liked = top_liked
            .into_iter()
            .take(TOP_N)
            .map(|c| LikedComment {
                comment_id: c.id.clone(),
                author: c.author.label(),
                likes: c.likes,
                text: truncate(&c.text, 80),
            })
            .collect();

        Self {
            total_comments: total,
            unique_users,
            avg_comments_per_user: if unique_users == 0 {
                0.0
            } else {
                to_f64(total) / to_f64(unique_users)
            },
            top_level_comments: total - reply_comments,
            reply_comments,
            top_users,
            activity_distribution: activity_distribution(&user_counts),
            concentration: concentration(&user_counts, total),
            top_liked,
            keyword: keyword_stats(comments, keyword_records),
            toxicity: toxicity_stats(comments, toxicity_records),
            stance: stance_stats(comments, stance_records),
        }
    }
}

fn activity_distribution(user_counts: &[(&str, usize, String)]) -> Vec<(String, usize)> {
    const GROUPS: &[(usize, usize, &str)] = &[
        (1, 1, "1 comment"),
        (2, 2, "2 comments"),
        (3, 3, "3 comments"),
        (4, 4, "4 comments"),
        (5, 5, "5 comments"),
        (6, 10, "6-10 comments"),
        (11, 20, "11-20 comments"),
        (21, 50, "21-50 comments"),
        (51, 100, "51-100 comments"),
        (101, usize::MAX, "101+ comments"),
    ];
    GROUPS
        .iter()
        .map(|(lo, hi, label)| {
            let users = user_counts
                .iter()
                .filter(|(_, count, _)| count >= lo && count <= hi)
                .count();
            ((*label).to_string(), users)
        })
        .filter(|(_, users)| *users > 0)
        .collect()
}

/// For each percentile of total comments, how many of the most active users
/// it takes to cover it. `user_counts` must be sorted descending.
fn concentration(user_counts: &[(&str, usize, String)], total: usize) -> Vec<(u32, usize)> {
    const PERCENTILES: [u32; 5] = [20, 40, 60, 80, 100];
    if total == 0 {
        return Vec::new();
    }
    PERCENTILES
        .iter()
        .map(|&p| {
            let target = to_f64(total) * f64::from(p) / 100.0;
            let mut covered = 0usize;
            let mut users = 0usize;
            for (_, count, _) in user_counts {
                if to_f64(covered) >= target {
                    break;
                }
                covered += count;
                users += 1;
            }
            (p, users)
        })
        .collect()
}

fn keyword_stats(
    comments: &[Comment],
    records: &BTreeMap<String, AnalysisRecord>,
) -> Option<KeywordStats> {
    if records.is_empty() {
        return None;
    }
    let mut flagged = 0usize;
    let mut flagged_users: HashMap<&str, ()> = HashMap::new();
    let mut category_counts: BTreeMap<Category, usize> = BTreeMap::new();
    let mut match_counts: HashMap<&str, usize> = HashMap::new();

    for comment in comments {
        let Some(record) = records.get(&comment.id) else {
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
        flagged += 1;
        flagged_users.insert(&comment.author.id, ());
        for category in categories {
            *category_counts.entry(*category).or_default() += 1;
        }
        for stem in matches {
            *match_counts.entry(stem.as_str()).or_default() += 1;
        }
    }

    let mut top_matches: Vec<(String, usize)> = match_counts
        .into_iter()
        .map(|(stem, count)| (stem.to_string(), count))
        .collect();
    top_matches.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    top_matches.truncate(TOP_MATCHES);

    let total = comments.len();
    Some(KeywordStats {
        flagged_comments: flagged,
        flagged_percentage: if total == 0 {
            0.0
        } else {
            to_f64(flagged) / to_f64(total) * 100.0
        },
        unique_users_flagged: flagged_users.len(),
        category_counts,
        top_matches,
    })
}

fn toxicity_stats(
    comments: &[Comment],
    records: &BTreeMap<String, AnalysisRecord>,
) -> Option<ToxicityStats> {
    if records.is_empty() {
        return None;
    }
    let mut stats = ToxicityStats::default();
    let mut per_user: HashMap<&str, BTreeMap<ToxicityLabel, usize>> = HashMap::new();

    for comment in comments {
        let Some(record) = records.get(&comment.id) else {
            continue;
        };
        let Verdict::Toxicity { label } = &record.verdict else {
            continue;
        };
        *stats.comment_counts.entry(*label).or_default() += 1;
        *per_user
            .entry(&comment.author.id)
            .or_default()
            .entry(*label)
            .or_default() += 1;
    }

    for labels in per_user.values() {
        // Most frequent label wins; ties resolve in label order.
        if let Some((label, _)) = labels.iter().max_by_key(|(_, count)| *count) {
            *stats.user_counts.entry(*label).or_default() += 1;
        }
    }
    Some(stats)
}

fn stance_stats(
    comments: &[Comment],
    records: &BTreeMap<String, AnalysisRecord>,
) -> Option<StanceStats> {
    if records.is_empty() {
        return None;
    }
    let mut stats = StanceStats::default();
    let mut per_user: HashMap<&str, BTreeMap<StanceLabel, usize>> = HashMap::new();

    for comment in comments {
        let Some(record) = records.get(&comment.id) else {
            continue;
        };
        let Verdict::Stance { label } = &record.verdict else {
            continue;
        };
        *stats.comment_counts.entry(*label).or_default() += 1;
        *per_user
            .entry(&comment.author.id)
            .or_default()
            .entry(*label)
            .or_default() += 1;
    }

    for labels in per_user.values() {
        let total: usize = labels.values().sum();
        let ukraine = labels.get(&StanceLabel::ProUkraine).copied().unwrap_or(0);
        let russia = labels.get(&StanceLabel::ProRussia).copied().unwrap_or(0);
        let ukraine_share = to_f64(ukraine) / to_f64(total);
        let russia_share = to_f64(russia) / to_f64(total);
        let dominant = if ukraine_share >= 0.2 && ukraine > russia {
            StanceLabel::ProUkraine
        } else if russia_share >= 0.2 && russia > ukraine {
            StanceLabel::ProRussia
        } else {
            StanceLabel::Neutral
        };
        *stats.user_counts.entry(dominant).or_default() += 1;
    }
    Some(stats)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{cut}...")
    }
}

#[allow(clippy::cast_precision_loss)]
fn to_f64(n: usize) -> f64 {
    n as f64
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chanwatch_core::{Analyzer, Author};
    use chrono::Utc;

    use super::*;

    fn comment(id: &str, user: &str, likes: u64, is_reply: bool) -> Comment {
        Comment {
            id: id.to_string(),
            post_id: "p1".to_string(),
            author: Author {
                id: user.to_string(),
                username: Some(user.to_string()),
                display_name: None,
            },
            text: format!("text of {id}"),
            published_at: Utc::now(),
            likes,
            is_reply,
        }
    }

    fn keyword_record(comment_id: &str, categories: &[Category]) -> (String, AnalysisRecord) {
        (
            comment_id.to_string(),
            AnalysisRecord {
                comment_id: comment_id.to_string(),
                analyzer: Analyzer::Keyword,
                verdict: Verdict::Keyword {
                    categories: categories.iter().copied().collect::<BTreeSet<_>>(),
                    matches: categories.iter().map(|c| c.as_str().to_string()).collect(),
                },
                engine_version: "kw-test".to_string(),
                produced_at: Utc::now(),
            },
        )
    }

    fn stance_record(comment_id: &str, label: StanceLabel) -> (String, AnalysisRecord) {
        (
            comment_id.to_string(),
            AnalysisRecord {
                comment_id: comment_id.to_string(),
                analyzer: Analyzer::Stance,
                verdict: Verdict::Stance { label },
                engine_version: "lm-test".to_string(),
                produced_at: Utc::now(),
            },
        )
    }

    #[test]
    fn empty_input_produces_zeroed_stats() {
        let empty = BTreeMap::new();
        let stats = ChannelStats::compute(&[], &empty, &empty, &empty);
        assert_eq!(stats.total_comments, 0);
        assert_eq!(stats.unique_users, 0);
        assert!(stats.keyword.is_none());
        assert!(stats.concentration.is_empty());
    }

    #[test]
    fn basic_counts_and_type_split() {
        let comments = vec![
            comment("c1", "alice", 5, false),
            comment("c2", "alice", 0, true),
            comment("c3", "bob", 2, false),
        ];
        let empty = BTreeMap::new();
        let stats = ChannelStats::compute(&comments, &empty, &empty, &empty);
        assert_eq!(stats.total_comments, 3);
        assert_eq!(stats.unique_users, 2);
        assert_eq!(stats.reply_comments, 1);
        assert_eq!(stats.top_level_comments, 2);
        assert_eq!(stats.top_users[0].user_id, "alice");
        assert_eq!(stats.top_liked[0].likes, 5);
    }

    #[test]
    fn keyword_stats_count_categories_once_per_comment() {
        let comments = vec![
            comment("c1", "alice", 0, false),
            comment("c2", "bob", 0, false),
        ];
        let keyword: BTreeMap<_, _> = [
            keyword_record("c1", &[Category::EthnicSlurs, Category::Dehumanization]),
            keyword_record("c2", &[]),
        ]
        .into_iter()
        .collect();
        let empty = BTreeMap::new();
        let stats = ChannelStats::compute(&comments, &keyword, &empty, &empty);
        let kw = stats.keyword.unwrap();
        assert_eq!(kw.flagged_comments, 1);
        assert_eq!(kw.unique_users_flagged, 1);
        assert_eq!(kw.category_counts[&Category::EthnicSlurs], 1);
        assert_eq!(kw.category_counts[&Category::Dehumanization], 1);
    }

    #[test]
    fn stance_dominance_requires_twenty_percent() {
        // 1 pro-Ukraine comment out of 6 (≈17%) must not dominate.
        let comments: Vec<Comment> = (0..6)
            .map(|i| comment(&format!("c{i}"), "alice", 0, false))
            .collect();
        let mut records = BTreeMap::new();
        records.extend([stance_record("c0", StanceLabel::ProUkraine)]);
        for i in 1..6 {
            records.extend([stance_record(&format!("c{i}"), StanceLabel::Neutral)]);
        }
        let empty = BTreeMap::new();
        let stats = ChannelStats::compute(&comments, &empty, &empty, &records);
        let stance = stats.stance.unwrap();
        assert_eq!(stance.user_counts.get(&StanceLabel::Neutral), Some(&1));
        assert_eq!(stance.user_counts.get(&StanceLabel::ProUkraine), None);
    }

    #[test]
    fn stance_dominance_with_clear_majority() {
        let comments: Vec<Comment> = (0..4)
            .map(|i| comment(&format!("c{i}"), "bob", 0, false))
            .collect();
        let mut records = BTreeMap::new();
        for i in 0..3 {
            records.extend([stance_record(&format!("c{i}"), StanceLabel::ProRussia)]);
        }
        records.extend([stance_record("c3", StanceLabel::Neutral)]);
        let empty = BTreeMap::new();
        let stats = ChannelStats::compute(&comments, &empty, &empty, &records);
        let stance = stats.stance.unwrap();
        assert_eq!(stance.user_counts.get(&StanceLabel::ProRussia), Some(&1));
    }

    #[test]
    fn concentration_covers_all_percentiles() {
        let mut comments = Vec::new();
        for i in 0..8 {
            comments.push(comment(&format!("a{i}"), "alice", 0, false));
        }
        comments.push(comment("b1", "bob", 0, false));
        comments.push(comment("c1", "carol", 0, false));
        let empty = BTreeMap::new();
        let stats = ChannelStats::compute(&comments, &empty, &empty, &empty);
        // alice alone covers 80% of 10 comments.
        let by_percentile: BTreeMap<u32, usize> = stats.concentration.into_iter().collect();
        assert_eq!(by_percentile[&20], 1);
        assert_eq!(by_percentile[&80], 1);
        assert_eq!(by_percentile[&100], 3);
    }
}
