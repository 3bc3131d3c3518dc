//! End-to-end orchestrator tests: idempotence, resume, batch fallback, and
//! force-reanalysis against a scripted collector and a mocked endpoint.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chanwatch_analysis::{
    LmClient, Orchestrator, RunMode, RunOptions,
};
use chanwatch_core::{
    AnalysisRecord, Analyzer, AppConfig, Author, Comment, Post, Source, StanceLabel,
    ToxicityLabel, Verdict,
};
use chanwatch_sources::{CollectError, SourceCollector};
use chanwatch_store::{ChannelStore, CheckpointTracker};

fn test_config(data_dir: &Path, lm_url: &str) -> AppConfig {
    AppConfig {
        data_dir: data_dir.to_path_buf(),
        log_level: "info".to_string(),
        telegram_gateway_url: None,
        telegram_request_delay_ms: 0,
        telegram_window_days: 7,
        telegram_posts_limit: 100,
        youtube_api_key: None,
        youtube_api_url: String::new(),
        youtube_request_delay_ms: 0,
        youtube_window_days: 30,
        youtube_videos_limit: 50,
        lm_api_url: lm_url.to_string(),
        batch_size: 5,
        stance_fallback: StanceLabel::Neutral,
        request_timeout_secs: 5,
    }
}

fn post(id: &str, days_ago: i64) -> Post {
    Post {
        id: id.to_string(),
        source: Source::Telegram,
        channel: "testchan".to_string(),
        published_at: Utc::now() - Duration::days(days_ago),
        title: format!("post {id}"),
        comment_count: None,
        views: None,
    }
}

fn comment(id: &str, post_id: &str, text: &str) -> Comment {
    Comment {
        id: id.to_string(),
        post_id: post_id.to_string(),
        author: Author {
            id: format!("author-of-{id}"),
            username: None,
            display_name: None,
        },
        text: text.to_string(),
        published_at: Utc::now() - Duration::hours(1),
        likes: 0,
        is_reply: false,
    }
}

/// Scripted collector: fixed items and comments, optional failure injected
/// before a given item's comment fetch.
struct ScriptedCollector {
    items: Vec<Post>,
    comments: HashMap<String, Vec<Comment>>,
    fail_comments_for: Option<(String, fn() -> CollectError)>,
    comment_calls: Mutex<Vec<String>>,
}

impl ScriptedCollector {
    fn new(items: Vec<Post>, comments: HashMap<String, Vec<Comment>>) -> Self {
        Self {
            items,
            comments,
            fail_comments_for: None,
            comment_calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl SourceCollector for ScriptedCollector {
    fn source(&self) -> Source {
        Source::Telegram
    }

    async fn fetch_new_items(
        &self,
        _channel: &str,
        limit: usize,
    ) -> Result<Vec<Post>, CollectError> {
        Ok(self.items.iter().take(limit).cloned().collect())
    }

    async fn fetch_new_comments(
        &self,
        post: &Post,
        known_ids: &HashSet<String>,
    ) -> Result<Vec<Comment>, CollectError> {
        self.comment_calls.lock().unwrap().push(post.id.clone());
        if let Some((fail_id, make_error)) = &self.fail_comments_for {
            if *fail_id == post.id {
                return Err(make_error());
            }
        }
        Ok(self
            .comments
            .get(&post.id)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|c| !known_ids.contains(&c.id))
            .collect())
    }
}

fn keyword_count(report: &chanwatch_analysis::RunReport) -> usize {
    report
        .records_written
        .get(&Analyzer::Keyword)
        .copied()
        .unwrap_or(0)
}

#[tokio::test]
async fn basic_stats_run_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), "http://unused.invalid");
    let store = ChannelStore::open(&config.data_dir, Source::Telegram, "testchan").unwrap();
    store
        .save_post(
            &post("1", 1),
            &[
                comment("c1", "1", "смерть оркам"),
                comment("c2", "1", "nice post"),
                comment("c3", "1", "дякую"),
            ],
        )
        .unwrap();

    let orchestrator = Orchestrator::new(&config, &store, None, None);
    let options = RunOptions::new(RunMode::BasicStats);

    let first = orchestrator.run(&options).await.unwrap();
    assert_eq!(keyword_count(&first), 3);

    let checkpoint_after_first =
        std::fs::read_to_string(store.base_dir().join("checkpoint.json")).unwrap();
    let records_after_first = store.load_records(Analyzer::Keyword).unwrap();

    let second = orchestrator.run(&options).await.unwrap();
    assert_eq!(keyword_count(&second), 0, "second run must write nothing");

    let checkpoint_after_second =
        std::fs::read_to_string(store.base_dir().join("checkpoint.json")).unwrap();
    assert_eq!(checkpoint_after_first, checkpoint_after_second);
    let records_after_second = store.load_records(Analyzer::Keyword).unwrap();
    assert_eq!(
        serde_json::to_string(&records_after_first).unwrap(),
        serde_json::to_string(&records_after_second).unwrap()
    );
}

#[tokio::test]
async fn interrupted_analysis_resumes_with_exactly_the_remainder() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), "http://unused.invalid");
    let store = ChannelStore::open(&config.data_dir, Source::Telegram, "testchan").unwrap();

    let comments: Vec<Comment> = (1..=5)
        .map(|i| comment(&format!("c{i}"), "1", "text"))
        .collect();
    store.save_post(&post("1", 1), &comments).unwrap();

    // Simulate a run interrupted after 2 of 5 comments: their records and
    // checkpoint entries are durable, the rest are not.
    let mut tracker = CheckpointTracker::new(store.load_checkpoint().unwrap());
    let mut records = std::collections::BTreeMap::new();
    for id in ["c1", "c2"] {
        records.insert(
            id.to_string(),
            AnalysisRecord {
                comment_id: id.to_string(),
                analyzer: Analyzer::Keyword,
                verdict: Verdict::Keyword {
                    categories: BTreeSet::new(),
                    matches: Vec::new(),
                },
                engine_version: "keyword-rules/1".to_string(),
                produced_at: Utc::now(),
            },
        );
        tracker.record_analysis(id, Analyzer::Keyword);
    }
    store.save_records(Analyzer::Keyword, &records).unwrap();
    store.save_checkpoint(tracker.checkpoint()).unwrap();

    let orchestrator = Orchestrator::new(&config, &store, None, None);
    let report = orchestrator
        .run(&RunOptions::new(RunMode::BasicStats))
        .await
        .unwrap();

    assert_eq!(keyword_count(&report), 3, "exactly the remaining 3 comments");
    let checkpoint = store.load_checkpoint().unwrap();
    assert_eq!(checkpoint.analyzed["keyword"].len(), 5);
}

#[tokio::test]
async fn failing_endpoint_degrades_every_batch_to_fallback() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), &server.uri());
    let store = ChannelStore::open(&config.data_dir, Source::Telegram, "testchan").unwrap();
    store
        .save_post(
            &post("1", 1),
            &[
                comment("c1", "1", "anything"),
                comment("c2", "1", "at all"),
            ],
        )
        .unwrap();

    let lm = LmClient::new(&server.uri(), 5).unwrap();
    let orchestrator = Orchestrator::new(&config, &store, None, Some(&lm));
    let report = orchestrator
        .run(&RunOptions::new(RunMode::StatsOnly))
        .await
        .expect("a bad batch must never abort the run");

    assert!(report.fallback_batches >= 2, "toxicity + stance batches");
    let toxicity = store.load_records(Analyzer::Toxicity).unwrap();
    assert_eq!(toxicity.len(), 2);
    for record in toxicity.values() {
        assert!(
            matches!(
                record.verdict,
                Verdict::Toxicity {
                    label: ToxicityLabel::Neutral
                }
            ),
            "fallback label expected, got {:?}",
            record.verdict
        );
    }
    let stance = store.load_records(Analyzer::Stance).unwrap();
    for record in stance.values() {
        assert!(matches!(
            record.verdict,
            Verdict::Stance {
                label: StanceLabel::Neutral
            }
        ));
    }
}

#[tokio::test]
async fn model_labels_map_positionally_onto_fetch_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [
                { "message": { "content": "1:toxic\n2:friendly" } }
            ]
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), &server.uri());
    let store = ChannelStore::open(&config.data_dir, Source::Telegram, "testchan").unwrap();

    let items = vec![post("1", 1)];
    let comments: HashMap<String, Vec<Comment>> = HashMap::from([(
        "1".to_string(),
        vec![
            comment("c1", "1", "ужасный пост"),
            comment("c2", "1", "дякую за відео"),
        ],
    )]);
    let collector = ScriptedCollector::new(items, comments);

    let lm = LmClient::new(&server.uri(), 5).unwrap();
    let orchestrator = Orchestrator::new(&config, &store, Some(&collector), Some(&lm));
    let report = orchestrator
        .run(&RunOptions::new(RunMode::Full))
        .await
        .unwrap();

    assert_eq!(report.new_comments, 2);
    let toxicity = store.load_records(Analyzer::Toxicity).unwrap();
    assert!(matches!(
        toxicity["c1"].verdict,
        Verdict::Toxicity {
            label: ToxicityLabel::Toxic
        }
    ));
    assert!(matches!(
        toxicity["c2"].verdict,
        Verdict::Toxicity {
            label: ToxicityLabel::Friendly
        }
    ));
}

#[tokio::test]
async fn rate_limit_mid_fetch_keeps_progress_and_resumes() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), "http://unused.invalid");
    let store = ChannelStore::open(&config.data_dir, Source::Telegram, "testchan").unwrap();

    // Oldest-first processing: post "1" (older) is handled before post "2".
    let items = vec![post("1", 3), post("2", 1)];
    let comments: HashMap<String, Vec<Comment>> = HashMap::from([
        ("1".to_string(), vec![comment("c1", "1", "first")]),
        ("2".to_string(), vec![comment("c2", "2", "second")]),
    ]);

    let mut failing = ScriptedCollector::new(items.clone(), comments.clone());
    failing.fail_comments_for = Some(("2".to_string(), || {
        CollectError::RateLimited("flood wait".to_string())
    }));

    let orchestrator = Orchestrator::new(&config, &store, Some(&failing), None);
    let report = orchestrator
        .run(&RunOptions::new(RunMode::CollectOnly))
        .await
        .unwrap();

    assert!(report.fetch_stopped.is_some());
    assert_eq!(report.new_comments, 1, "first item's fetch is kept");
    assert_eq!(store.load_comments("1").unwrap().len(), 1);
    assert!(store.load_comments("2").unwrap().is_empty());
    let checkpoint = store.load_checkpoint().unwrap();
    assert!(checkpoint.open.contains("1"));
    assert!(!checkpoint.open.contains("2"), "unfetched item not checkpointed");

    // Identical re-invocation with a healthy source completes the remainder
    // without duplicating the first item's comments.
    let healthy = ScriptedCollector::new(items, comments);
    let orchestrator = Orchestrator::new(&config, &store, Some(&healthy), None);
    let report = orchestrator
        .run(&RunOptions::new(RunMode::CollectOnly))
        .await
        .unwrap();

    assert!(report.fetch_stopped.is_none());
    assert_eq!(report.new_comments, 1, "only the second item's comment is new");
    assert_eq!(store.load_all_comments().unwrap().len(), 2);
}

#[tokio::test]
async fn force_reanalysis_covers_settled_items_without_reopening_them() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), "http://unused.invalid");
    let store = ChannelStore::open(&config.data_dir, Source::Telegram, "testchan").unwrap();

    // Item A: 3 comments, within the window (open). Item B: 1 comment,
    // settled. All four already analyzed once.
    store
        .save_post(
            &post("A", 2),
            &[
                comment("a1", "A", "смерть оркам"),
                comment("a2", "A", "ok"),
                comment("a3", "A", "ще одне"),
            ],
        )
        .unwrap();
    store
        .save_post(&post("B", 40), &[comment("b1", "B", "старий коммент")])
        .unwrap();

    let mut tracker = CheckpointTracker::new(store.load_checkpoint().unwrap());
    tracker.mark_open("A");
    tracker.mark_settled("B");
    for id in ["a1", "a2", "a3", "b1"] {
        tracker.record_analysis(id, Analyzer::Keyword);
    }
    store.save_checkpoint(tracker.checkpoint()).unwrap();

    let orchestrator = Orchestrator::new(&config, &store, None, None);
    let mut options = RunOptions::new(RunMode::BasicStats);
    options.force_reanalysis = true;

    let report = orchestrator.run(&options).await.unwrap();

    assert_eq!(
        keyword_count(&report),
        4,
        "every comment re-analyzed, settled item included"
    );
    let checkpoint = store.load_checkpoint().unwrap();
    assert_eq!(checkpoint.analyzed["keyword"].len(), 4);
    assert_eq!(
        checkpoint.open,
        BTreeSet::from(["A".to_string()]),
        "open set unchanged"
    );
    assert_eq!(checkpoint.settled, BTreeSet::from(["B".to_string()]));
    assert_eq!(store.load_all_comments().unwrap().len(), 4, "data untouched");
}

#[tokio::test]
async fn items_reporting_zero_comments_skip_the_comment_call() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), "http://unused.invalid");
    let store = ChannelStore::open(&config.data_dir, Source::Telegram, "testchan").unwrap();

    let mut item = post("1", 1);
    item.comment_count = Some(0);
    let collector = ScriptedCollector::new(vec![item], HashMap::new());

    let orchestrator = Orchestrator::new(&config, &store, Some(&collector), None);
    let report = orchestrator
        .run(&RunOptions::new(RunMode::CollectOnly))
        .await
        .unwrap();

    assert_eq!(report.new_items, 1);
    assert!(collector.comment_calls.lock().unwrap().is_empty());
    assert!(store.post_exists("1"), "the item itself is persisted");
}

#[tokio::test]
async fn settled_items_are_not_requeried() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), "http://unused.invalid");
    let store = ChannelStore::open(&config.data_dir, Source::Telegram, "testchan").unwrap();

    store
        .save_post(&post("old", 40), &[comment("c1", "old", "text")])
        .unwrap();
    let mut tracker = CheckpointTracker::new(store.load_checkpoint().unwrap());
    tracker.mark_settled("old");
    store.save_checkpoint(tracker.checkpoint()).unwrap();

    let collector = ScriptedCollector::new(
        vec![post("old", 40)],
        HashMap::from([("old".to_string(), vec![comment("c9", "old", "late")])]),
    );

    let orchestrator = Orchestrator::new(&config, &store, Some(&collector), None);
    let report = orchestrator
        .run(&RunOptions::new(RunMode::CollectOnly))
        .await
        .unwrap();

    assert!(collector.comment_calls.lock().unwrap().is_empty());
    assert_eq!(report.skipped_items, 1);
    assert_eq!(store.load_comments("old").unwrap().len(), 1);
}
