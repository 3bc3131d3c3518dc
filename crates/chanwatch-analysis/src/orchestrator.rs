//! Run orchestration: fetch → merge → analyze → report.
//!
//! One run covers one (source, channel) pair, sequentially. Crash safety
//! hangs on two orderings: comments are persisted before their item is
//! settled, and analysis records are persisted before the checkpoint's
//! analyzed-set is advanced. Re-running the identical command resumes from
//! the last durable unit with no duplicate work.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;

use chanwatch_core::{AnalysisRecord, Analyzer, AppConfig, Comment, Source};
use chanwatch_sources::SourceCollector;
use chanwatch_store::{partition_by_age, ChannelInfo, ChannelStore, CheckpointTracker};

use crate::classifier::{BatchClassifier, ClassifyTask, LmClient, MODEL_ENGINE_VERSION};
use crate::error::AnalysisError;
use crate::export::{export_flagged, ExportSummary};
use crate::keyword::{KeywordEngine, RULESET_VERSION};
use crate::stats::ChannelStats;

/// Default sink for keyword-flagged comments, inside the channel's
/// analysis directory.
const FLAGGED_EXPORT_FILE: &str = "flagged_comments.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Fetch new data, then run all requested analyzers.
    Full,
    /// Fetch only; no analyzer dispatch.
    CollectOnly,
    /// No fetching; analyzers over cached data only.
    StatsOnly,
    /// Stats-only restricted to the keyword engine. No network call of any
    /// kind.
    BasicStats,
}

impl RunMode {
    #[must_use]
    pub fn fetches(self) -> bool {
        matches!(self, RunMode::Full | RunMode::CollectOnly)
    }

    #[must_use]
    pub fn analyzes(self) -> bool {
        !matches!(self, RunMode::CollectOnly)
    }

    #[must_use]
    pub fn uses_endpoint(self) -> bool {
        matches!(self, RunMode::Full | RunMode::StatsOnly)
    }
}

/// Work-set filters, composable with any mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommentFilter {
    pub replies_only: bool,
    pub top_level_only: bool,
    pub min_likes: Option<u64>,
}

impl CommentFilter {
    #[must_use]
    pub fn matches(&self, comment: &Comment) -> bool {
        if self.replies_only && !comment.is_reply {
            return false;
        }
        if self.top_level_only && comment.is_reply {
            return false;
        }
        if let Some(min) = self.min_likes {
            if comment.likes < min {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub mode: RunMode,
    /// Parent items to check per run; defaults to the source's configured
    /// limit.
    pub limit: Option<usize>,
    /// Clear the channel's analyzed-set before computing the work set,
    /// overwriting every record. Does not re-fetch.
    pub force_reanalysis: bool,
    pub filter: CommentFilter,
    /// Extra export sink for keyword-flagged comments, besides the default
    /// file in the analysis directory.
    pub export_path: Option<PathBuf>,
}

impl RunOptions {
    #[must_use]
    pub fn new(mode: RunMode) -> Self {
        Self {
            mode,
            limit: None,
            force_reanalysis: false,
            filter: CommentFilter::default(),
            export_path: None,
        }
    }
}

/// What a run accomplished. A stopped run still reports everything that
/// completed, and is safely resumable by re-invocation.
#[derive(Debug)]
pub struct RunReport {
    pub source: Source,
    pub channel: String,
    pub items_checked: usize,
    pub new_items: usize,
    pub updated_items: usize,
    pub skipped_items: usize,
    pub new_comments: usize,
    pub total_comments: usize,
    pub filtered_comments: usize,
    pub records_written: BTreeMap<Analyzer, usize>,
    pub fallback_batches: usize,
    /// Why the fetch phase stopped early, if it did (rate limit, quota, ...).
    pub fetch_stopped: Option<String>,
    pub stats: Option<ChannelStats>,
    pub exports: Vec<ExportSummary>,
}

impl RunReport {
    fn new(source: Source, channel: &str) -> Self {
        Self {
            source,
            channel: channel.to_string(),
            items_checked: 0,
            new_items: 0,
            updated_items: 0,
            skipped_items: 0,
            new_comments: 0,
            total_comments: 0,
            filtered_comments: 0,
            records_written: BTreeMap::new(),
            fallback_batches: 0,
            fetch_stopped: None,
            stats: None,
            exports: Vec::new(),
        }
    }
}

pub struct Orchestrator<'a> {
    config: &'a AppConfig,
    store: &'a ChannelStore,
    collector: Option<&'a dyn SourceCollector>,
    lm: Option<&'a LmClient>,
}

impl<'a> Orchestrator<'a> {
    #[must_use]
    pub fn new(
        config: &'a AppConfig,
        store: &'a ChannelStore,
        collector: Option<&'a dyn SourceCollector>,
        lm: Option<&'a LmClient>,
    ) -> Self {
        Self {
            config,
            store,
            collector,
            lm,
        }
    }

    /// Execute one run.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError`] on persistence failure, or
    /// [`AnalysisError::Endpoint`] when a mode needs the classification
    /// endpoint but none was supplied. Collector errors do not bubble: they
    /// stop the fetch phase and are reported in the returned
    /// [`RunReport::fetch_stopped`].
    pub async fn run(&self, options: &RunOptions) -> Result<RunReport, AnalysisError> {
        let source = self.store.source();
        let mut report = RunReport::new(source, self.store.channel());
        let mut tracker = CheckpointTracker::new(self.store.load_checkpoint()?);

        if options.mode.fetches() {
            if let Some(collector) = self.collector {
                self.fetch_phase(collector, &mut tracker, options, &mut report)
                    .await?;
            } else {
                tracing::warn!("fetch requested but no collector configured — skipping fetch");
            }
        }

        if options.force_reanalysis {
            tracing::info!(channel = %self.store.channel(), "force reanalysis — clearing analyzed-set");
            tracker.reset_all_analysis();
            self.flush(&mut tracker)?;
        }

        if options.mode.analyzes() {
            self.analysis_phase(&mut tracker, options, &mut report).await?;
        } else {
            report.total_comments = self.store.load_all_comments()?.len();
        }

        Ok(report)
    }

    fn flush(&self, tracker: &mut CheckpointTracker) -> Result<(), AnalysisError> {
        if tracker.is_dirty() {
            self.store.save_checkpoint(tracker.checkpoint())?;
            tracker.mark_flushed();
        }
        Ok(())
    }

    async fn fetch_phase(
        &self,
        collector: &dyn SourceCollector,
        tracker: &mut CheckpointTracker,
        options: &RunOptions,
        report: &mut RunReport,
    ) -> Result<(), AnalysisError> {
        let source = self.store.source();
        let limit = options.limit.unwrap_or_else(|| self.config.default_limit(source));
        let delay = Duration::from_millis(self.config.request_delay_ms(source));
        let window = self.config.window_days(source);
        let now = Utc::now();

        // Settle cached items that aged out of the update window since the
        // last run; their stored comments are already durable.
        let cached = self.store.load_all_posts()?;
        let partition = partition_by_age(&cached, now, window);
        for post_id in &partition.settled {
            tracker.mark_settled(post_id);
        }
        self.flush(tracker)?;

        tokio::time::sleep(delay).await;
        let mut items = match collector
            .fetch_new_items(self.store.channel(), limit)
            .await
        {
            Ok(items) => items,
            Err(e) => {
                report_fetch_stop(&e.to_string(), e.is_throughput_limit(), report);
                return Ok(());
            }
        };

        // Oldest first: resume favors items closest to settling.
        items.sort_by(|a, b| a.published_at.cmp(&b.published_at));
        report.items_checked = items.len();

        let cutoff = now - chrono::Duration::days(window);

        for post in &items {
            if tracker.is_settled(&post.id) {
                report.skipped_items += 1;
                continue;
            }

            let existing = self.store.load_comments(&post.id)?;
            let was_known = self.store.post_exists(&post.id);

            // Item reports zero comments and nothing is cached: persist the
            // item itself and move on without a comment call.
            if post.comment_count == Some(0) && existing.is_empty() {
                self.store.save_post(post, &[])?;
                if was_known {
                    report.skipped_items += 1;
                } else {
                    report.new_items += 1;
                }
                settle_or_open(tracker, &post.id, post.published_at < cutoff);
                self.flush(tracker)?;
                continue;
            }

            let known: HashSet<String> = existing.iter().map(|c| c.id.clone()).collect();

            tokio::time::sleep(delay).await;
            let new_comments = match collector.fetch_new_comments(post, &known).await {
                Ok(comments) => comments,
                Err(e) => {
                    // Keep everything persisted so far; this item is redone
                    // on the next invocation.
                    report_fetch_stop(&e.to_string(), e.is_throughput_limit(), report);
                    break;
                }
            };

            // Comments reach the store before the item is allowed to settle.
            let appended = self.store.append_comments(post, new_comments)?;
            report.new_comments += appended;
            if was_known {
                if appended > 0 {
                    report.updated_items += 1;
                } else {
                    report.skipped_items += 1;
                }
            } else {
                report.new_items += 1;
            }

            settle_or_open(tracker, &post.id, post.published_at < cutoff);
            self.flush(tracker)?;
        }

        report.total_comments = self.store.load_all_comments()?.len();
        self.store.save_channel_info(&ChannelInfo {
            channel: self.store.channel().to_string(),
            last_sync: now,
            items_checked: report.items_checked,
            new_items: report.new_items,
            updated_items: report.updated_items,
            skipped_items: report.skipped_items,
            total_comments: report.total_comments,
            new_comments: report.new_comments,
        })?;

        tracing::info!(
            channel = %self.store.channel(),
            items = report.items_checked,
            new_items = report.new_items,
            new_comments = report.new_comments,
            "fetch phase finished"
        );
        Ok(())
    }

    async fn analysis_phase(
        &self,
        tracker: &mut CheckpointTracker,
        options: &RunOptions,
        report: &mut RunReport,
    ) -> Result<(), AnalysisError> {
        let all = self.store.load_all_comments()?;
        report.total_comments = all.len();

        let base: Vec<Comment> = all
            .into_iter()
            .filter(|c| options.filter.matches(c))
            .collect();
        report.filtered_comments = base.len();

        let keyword_records = self.keyword_pass(tracker, &base, report)?;

        let (toxicity_records, stance_records) = if options.mode.uses_endpoint() {
            let lm = self.lm.ok_or_else(|| {
                AnalysisError::Endpoint("classification endpoint not configured".to_string())
            })?;
            let toxicity = self
                .llm_pass(lm, ClassifyTask::Toxicity, tracker, &base, report)
                .await?;
            let stance = self
                .llm_pass(
                    lm,
                    ClassifyTask::Stance {
                        fallback: self.config.stance_fallback,
                    },
                    tracker,
                    &base,
                    report,
                )
                .await?;
            (toxicity, stance)
        } else {
            // Offline modes still surface any cached model verdicts.
            (
                self.store.load_records(Analyzer::Toxicity)?,
                self.store.load_records(Analyzer::Stance)?,
            )
        };

        report.stats = Some(ChannelStats::compute(
            &base,
            &keyword_records,
            &toxicity_records,
            &stance_records,
        ));

        let default_path = self.store.analysis_dir().join(FLAGGED_EXPORT_FILE);
        if let Some(summary) = export_flagged(&base, &keyword_records, &default_path)? {
            report.exports.push(summary);
        }
        if let Some(extra) = &options.export_path {
            let resolved = self.resolve_export_path(extra);
            if resolved != default_path {
                if let Some(summary) = export_flagged(&base, &keyword_records, &resolved)? {
                    report.exports.push(summary);
                }
            }
        }

        Ok(())
    }

    fn resolve_export_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.store.analysis_dir().join(path)
        }
    }

    /// Keyword pass. The unit of work is one comment: its record is
    /// persisted, then the checkpoint advances.
    fn keyword_pass(
        &self,
        tracker: &mut CheckpointTracker,
        base: &[Comment],
        report: &mut RunReport,
    ) -> Result<BTreeMap<String, AnalysisRecord>, AnalysisError> {
        let engine = KeywordEngine::new();
        let mut records = self.store.load_records(Analyzer::Keyword)?;
        let mut written = 0usize;

        for comment in base {
            if tracker.is_analyzed(&comment.id, Analyzer::Keyword) {
                continue;
            }
            let verdict = engine.classify(&comment.text);
            records.insert(
                comment.id.clone(),
                AnalysisRecord {
                    comment_id: comment.id.clone(),
                    analyzer: Analyzer::Keyword,
                    verdict,
                    engine_version: RULESET_VERSION.to_string(),
                    produced_at: Utc::now(),
                },
            );
            self.store.save_records(Analyzer::Keyword, &records)?;
            tracker.record_analysis(&comment.id, Analyzer::Keyword);
            self.flush(tracker)?;
            written += 1;
        }

        if written > 0 {
            report.records_written.insert(Analyzer::Keyword, written);
            tracing::info!(written, "keyword pass finished");
        }
        Ok(records)
    }

    /// Model-backed pass. The unit of work is one batch: its records are
    /// persisted, then the checkpoint advances. Batch failures are
    /// contained by the classifier's retry/fallback and never bubble.
    async fn llm_pass(
        &self,
        lm: &LmClient,
        task: ClassifyTask,
        tracker: &mut CheckpointTracker,
        base: &[Comment],
        report: &mut RunReport,
    ) -> Result<BTreeMap<String, AnalysisRecord>, AnalysisError> {
        let analyzer = task.analyzer();
        let work: Vec<(String, String)> = base
            .iter()
            .filter(|c| !tracker.is_analyzed(&c.id, analyzer))
            .map(|c| (c.id.clone(), c.text.clone()))
            .collect();

        let mut records = self.store.load_records(analyzer)?;
        if work.is_empty() {
            return Ok(records);
        }

        tracing::info!(
            analyzer = %analyzer,
            comments = work.len(),
            batch_size = self.config.batch_size,
            "starting model-backed pass"
        );

        let classifier = BatchClassifier::new(lm, task, self.config.batch_size);
        let mut written = 0usize;

        for batch in classifier.batches(&work) {
            let outcome = classifier.classify_with_retry(batch).await;
            for (comment_id, verdict) in &outcome.verdicts {
                records.insert(
                    comment_id.clone(),
                    AnalysisRecord {
                        comment_id: comment_id.clone(),
                        analyzer,
                        verdict: verdict.clone(),
                        engine_version: MODEL_ENGINE_VERSION.to_string(),
                        produced_at: Utc::now(),
                    },
                );
            }
            self.store.save_records(analyzer, &records)?;
            for (comment_id, _) in &outcome.verdicts {
                tracker.record_analysis(comment_id, analyzer);
            }
            self.flush(tracker)?;
            written += outcome.verdicts.len();
            if outcome.fallback_applied {
                report.fallback_batches += 1;
            }
        }

        report.records_written.insert(analyzer, written);
        Ok(records)
    }
}

fn settle_or_open(tracker: &mut CheckpointTracker, post_id: &str, is_old: bool) {
    if is_old {
        tracker.mark_settled(post_id);
    } else {
        tracker.mark_open(post_id);
    }
}

fn report_fetch_stop(message: &str, throughput: bool, report: &mut RunReport) {
    if throughput {
        tracing::warn!(
            error = message,
            "source throughput limit hit — stopping fetch; reduce the limit or wait, then re-run the same command to resume"
        );
    } else {
        tracing::error!(error = message, "collector failed — stopping fetch phase");
    }
    report.fetch_stopped = Some(message.to_string());
}
