use std::path::PathBuf;

use clap::{ArgGroup, Parser};

use chanwatch_analysis::{
    CommentFilter, LmClient, Orchestrator, RunMode, RunOptions, RunReport,
};
use chanwatch_core::{load_app_config, AppConfig, Source};
use chanwatch_sources::{SourceCollector, TelegramCollector, YoutubeCollector};
use chanwatch_store::ChannelStore;

#[derive(Debug, Parser)]
#[command(name = "chanwatch")]
#[command(about = "Comment collection and analysis for Telegram and YouTube channels")]
#[command(group = ArgGroup::new("source").required(true))]
#[command(group = ArgGroup::new("mode"))]
#[command(group = ArgGroup::new("comment_type"))]
struct Cli {
    /// Use Telegram as the source
    #[arg(long = "tg", alias = "telegram", group = "source")]
    tg: bool,

    /// Use YouTube as the source
    #[arg(long = "yt", alias = "youtube", group = "source")]
    yt: bool,

    /// Channel username (@channelname) or channel ID
    channel: String,

    /// Number of posts/videos to check (defaults per source)
    limit: Option<usize>,

    /// Fetch new data only, skip all analyzers
    #[arg(long, group = "mode")]
    collect_only: bool,

    /// Analyze already-cached data only, no fetching
    #[arg(long, group = "mode")]
    stats_only: bool,

    /// Keyword statistics over cached data only — no network call of any kind
    #[arg(long, group = "mode")]
    basic_stats: bool,

    /// Clear recorded verdicts for the channel and re-analyze everything
    #[arg(long)]
    force_reanalysis: bool,

    /// Analyze reply comments only
    #[arg(long, group = "comment_type")]
    only_replies: bool,

    /// Analyze top-level comments only
    #[arg(long, group = "comment_type")]
    only_top: bool,

    /// Only comments with at least N likes
    #[arg(long, value_name = "N")]
    min_likes: Option<u64>,

    /// Extra export path for keyword-flagged comments (relative paths land
    /// in the channel's analysis directory)
    #[arg(long, value_name = "FILE")]
    export_flagged: Option<PathBuf>,
}

impl Cli {
    fn mode(&self) -> RunMode {
        if self.basic_stats {
            RunMode::BasicStats
        } else if self.stats_only {
            RunMode::StatsOnly
        } else if self.collect_only {
            RunMode::CollectOnly
        } else {
            RunMode::Full
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_app_config()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.clone())),
        )
        .init();

    tracing::debug!(?config, "configuration loaded");

    let source = if cli.tg {
        Source::Telegram
    } else {
        Source::Youtube
    };
    let channel = if source == Source::Telegram && !cli.channel.starts_with('@') {
        format!("@{}", cli.channel)
    } else {
        cli.channel.clone()
    };

    let mode = cli.mode();
    let options = RunOptions {
        mode,
        limit: cli.limit,
        force_reanalysis: cli.force_reanalysis,
        filter: CommentFilter {
            replies_only: cli.only_replies,
            top_level_only: cli.only_top,
            min_likes: cli.min_likes,
        },
        export_path: cli.export_flagged.clone(),
    };

    // Startup preflight: credentials and endpoint availability are checked
    // before any work unit begins, never mid-run.
    let collector = if mode.fetches() {
        Some(build_collector(&config, source)?)
    } else {
        None
    };
    let lm = if mode.uses_endpoint() {
        let client = LmClient::new(&config.lm_api_url, config.request_timeout_secs)?;
        client.check_connection().await.map_err(|e| {
            anyhow::anyhow!("{e}\nStart the local model server (or use --basic-stats) and retry")
        })?;
        Some(client)
    } else {
        None
    };

    let store = ChannelStore::open(&config.data_dir, source, &channel)?;
    println!("Channel: {channel} ({source})");
    println!("Data directory: {}", store.base_dir().display());

    let orchestrator = Orchestrator::new(&config, &store, collector.as_deref(), lm.as_ref());
    let report = orchestrator.run(&options).await?;

    print_report(&report, mode);
    Ok(())
}

fn build_collector(
    config: &AppConfig,
    source: Source,
) -> anyhow::Result<Box<dyn SourceCollector>> {
    match source {
        Source::Telegram => {
            let gateway = config.telegram_gateway_url.as_deref().ok_or_else(|| {
                anyhow::anyhow!(
                    "TELEGRAM_GATEWAY_URL is not set.\n\
                     Point it at your MTProto gateway, e.g. TELEGRAM_GATEWAY_URL=http://localhost:8010"
                )
            })?;
            Ok(Box::new(TelegramCollector::new(
                gateway,
                config.request_timeout_secs,
            )?))
        }
        Source::Youtube => {
            let api_key = config.youtube_api_key.as_deref().ok_or_else(|| {
                anyhow::anyhow!(
                    "YOUTUBE_API_KEY is not set.\n\
                     Create an API key with YouTube Data API v3 enabled and put it in .env"
                )
            })?;
            Ok(Box::new(YoutubeCollector::new(
                &config.youtube_api_url,
                api_key,
                config.request_timeout_secs,
            )?))
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn pct(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

fn print_report(report: &RunReport, mode: RunMode) {
    if mode.fetches() {
        println!();
        println!("Sync:");
        println!("  items checked:   {}", report.items_checked);
        println!("  new items:       {}", report.new_items);
        println!("  updated items:   {}", report.updated_items);
        println!("  skipped items:   {}", report.skipped_items);
        println!("  new comments:    {}", report.new_comments);
    }

    if let Some(reason) = &report.fetch_stopped {
        println!();
        println!("! Fetch stopped early: {reason}");
        println!("  Completed work is saved; re-run the same command to resume.");
    }

    if !report.records_written.is_empty() {
        println!();
        println!("Analysis:");
        for (analyzer, count) in &report.records_written {
            println!("  {analyzer}: {count} new verdicts");
        }
        if report.fallback_batches > 0 {
            println!(
                "  ({} batch(es) degraded to the fallback label)",
                report.fallback_batches
            );
        }
    }

    let Some(stats) = &report.stats else {
        return;
    };

    println!();
    println!("Comments: {} total, {} after filters", report.total_comments, report.filtered_comments);
    println!(
        "Users: {} unique, {:.1} comments/user",
        stats.unique_users, stats.avg_comments_per_user
    );
    if stats.reply_comments > 0 {
        println!(
            "Types: {} top-level ({:.1}%), {} replies ({:.1}%)",
            stats.top_level_comments,
            pct(stats.top_level_comments, stats.total_comments),
            stats.reply_comments,
            pct(stats.reply_comments, stats.total_comments),
        );
    }

    if !stats.top_users.is_empty() {
        println!();
        println!("Most active users:");
        for (i, user) in stats.top_users.iter().enumerate() {
            println!(
                "  {:2}. {} — {} comments ({:.1}%)",
                i + 1,
                user.label,
                user.comments,
                pct(user.comments, stats.total_comments),
            );
        }
    }

    if let Some(keyword) = &stats.keyword {
        println!();
        println!("Keyword detection:");
        println!(
            "  flagged: {} ({:.1}%), {} unique users",
            keyword.flagged_comments, keyword.flagged_percentage, keyword.unique_users_flagged
        );
        for (category, count) in &keyword.category_counts {
            println!("  {category}: {count}");
        }
        if !keyword.top_matches.is_empty() {
            println!("  top matches:");
            for (stem, count) in keyword.top_matches.iter().take(10) {
                println!("    {stem}: {count}");
            }
        }
    }

    if let Some(toxicity) = &stats.toxicity {
        println!();
        println!("Toxicity (comments / users by dominant label):");
        for (label, count) in &toxicity.comment_counts {
            let users = toxicity.user_counts.get(label).copied().unwrap_or(0);
            println!("  {label}: {count} comments, {users} users");
        }
    }

    if let Some(stance) = &stats.stance {
        println!();
        println!("Political stance (comments / users by dominant label):");
        for (label, count) in &stance.comment_counts {
            let users = stance.user_counts.get(label).copied().unwrap_or(0);
            println!("  {label}: {count} comments, {users} users");
        }
    }

    for export in &report.exports {
        println!();
        println!(
            "Exported {} flagged comments: {}",
            export.flagged_comments,
            export.json_path.display()
        );
        println!("  plain-text copy: {}", export.txt_path.display());
    }
}
