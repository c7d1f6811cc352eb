use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use colored::Colorize;
use console::Emoji;
use indicatif::{HumanBytes, MultiProgress, ProgressBar, ProgressStyle};
use tracing::warn;

use castmirror::logging::{init_logging, level_for_verbosity};
use castmirror::{
    CancelToken, Collaborators, DEFAULT_MAX_EPISODES, FeedPublisher, GithubReleaseStore,
    GithubStoreConfig, MirrorSet, NoopReporter, ProgressEvent, ProgressReporter, ResilientFetcher,
    RunReport, SharedProgressReporter, SyncOptions, YtDlp, load_channel_list, sync_channels,
};

// Emoji with fallback for terminals without Unicode support
static SATELLITE: Emoji<'_, '_> = Emoji("📡 ", "");
static SEARCH: Emoji<'_, '_> = Emoji("🔍 ", "[~] ");
static HEADPHONES: Emoji<'_, '_> = Emoji("🎧 ", "[i] ");
static DOWNLOAD: Emoji<'_, '_> = Emoji("📥 ", "[v] ");
static UPLOAD: Emoji<'_, '_> = Emoji("📤 ", "[^] ");
static TRASH: Emoji<'_, '_> = Emoji("🗑️  ", "[-] ");
static FEED: Emoji<'_, '_> = Emoji("📰 ", "[f] ");
static SUCCESS: Emoji<'_, '_> = Emoji("✅ ", "[+] ");
static FAILURE: Emoji<'_, '_> = Emoji("❌ ", "[!] ");
static PARTY: Emoji<'_, '_> = Emoji("🎉 ", "[*] ");
static FOLDER: Emoji<'_, '_> = Emoji("📁 ", "");
static CROSS: Emoji<'_, '_> = Emoji("✗ ", "x ");

/// Mirror the latest episodes of video channels as podcast feeds
#[derive(Parser, Debug)]
#[command(name = "castmirror")]
#[command(about = "Mirror the latest episodes of video channels as podcast feeds")]
#[command(version)]
struct Args {
    /// File listing channel references, one per line (optional slug after the reference)
    channels: PathBuf,

    /// Episodes kept per channel
    #[arg(short = 'n', long, default_value_t = DEFAULT_MAX_EPISODES, value_parser = parse_positive)]
    max_episodes: usize,

    /// Directory receiving one feed per channel
    #[arg(long, default_value = "feeds")]
    feeds_dir: PathBuf,

    /// Scratch directory for fetched audio
    #[arg(long, default_value = "downloads")]
    download_dir: PathBuf,

    /// GitHub repository (owner/name) holding the asset release
    #[arg(long, env = "GITHUB_REPOSITORY")]
    repo: String,

    /// Tag of the release whose assets hold every mirrored episode
    #[arg(long, default_value = "downloads")]
    release_tag: String,

    /// GitHub token with write access to the repository
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    github_token: Option<String>,

    /// Netscape cookie file passed to yt-dlp
    #[arg(long, env = "YTDLP_COOKIES")]
    cookies: Option<PathBuf>,

    /// yt-dlp executable
    #[arg(long, default_value = "yt-dlp")]
    yt_dlp: PathBuf,

    /// Mirror URL template tried before the original source; `{id}` is the episode id
    #[arg(long = "mirror", value_name = "TEMPLATE")]
    mirrors: Vec<String>,

    /// Only fetch from the original source
    #[arg(long, conflicts_with = "mirrors")]
    no_mirrors: bool,

    /// Channels processed at the same time
    #[arg(short = 'c', long, default_value = "2", value_parser = parse_positive)]
    concurrent_channels: usize,

    /// Episodes fetched at the same time per channel
    #[arg(short = 'd', long, default_value = "2", value_parser = parse_positive)]
    concurrent_downloads: usize,

    /// Seconds allowed for one fetch attempt or channel listing
    #[arg(long, default_value = "600")]
    attempt_timeout: u64,

    /// Seconds allowed for one store request
    #[arg(long, default_value = "300")]
    store_timeout: u64,

    /// Seconds allowed for one channel's whole reconciliation
    #[arg(long, default_value = "3600")]
    channel_timeout: u64,

    /// Keep fetched audio files after upload
    #[arg(long)]
    keep_downloads: bool,

    /// Show what would change without touching the store or the feeds
    #[arg(long)]
    dry_run: bool,

    /// Quiet mode - suppress progress output
    #[arg(short, long)]
    quiet: bool,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn parse_positive(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

/// Progress reporter using indicatif for terminal output
struct IndicatifReporter {
    multi: MultiProgress,
    bars: Mutex<HashMap<(String, usize), ProgressBar>>,
    main_bar: ProgressBar,
}

impl IndicatifReporter {
    fn new() -> Self {
        let multi = MultiProgress::new();

        let main_style = ProgressStyle::default_spinner()
            .template("{spinner:.green} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());

        let main_bar = multi.add(ProgressBar::new_spinner());
        main_bar.set_style(main_style);
        main_bar.enable_steady_tick(Duration::from_millis(100));

        Self {
            multi,
            bars: Mutex::new(HashMap::new()),
            main_bar,
        }
    }

    /// Bars are per worker slot; slots are numbered per channel
    fn get_or_create_bar(&self, channel_slug: &str, slot: usize) -> ProgressBar {
        let mut bars = self.bars.lock().unwrap_or_else(PoisonError::into_inner);
        let id = (channel_slug.to_string(), slot);

        if let Some(bar) = bars.get(&id) {
            return bar.clone();
        }

        let style = ProgressStyle::default_spinner()
            .template(&format!("  {DOWNLOAD}{{spinner:.cyan}} {{wide_msg}}"))
            .unwrap_or_else(|_| ProgressStyle::default_spinner());

        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(120));
        bars.insert(id, bar.clone());
        bar
    }

    fn finish_bar(&self, channel_slug: &str, slot: usize) {
        let mut bars = self.bars.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(bar) = bars.remove(&(channel_slug.to_string(), slot)) {
            bar.finish_and_clear();
        }
    }

    fn line(&self, message: String) {
        let _ = self.multi.println(message);
    }
}

impl ProgressReporter for IndicatifReporter {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::ListingChannel { reference } => {
                self.main_bar
                    .set_message(format!("{SEARCH}Listing channel: {}", reference.cyan()));
            }

            ProgressEvent::ChannelListed {
                title,
                episode_count,
                ..
            } => {
                self.main_bar.set_message(format!(
                    "{HEADPHONES}{} • {} episodes listed",
                    title.bold().green(),
                    episode_count.to_string().cyan()
                ));
            }

            ProgressEvent::ChannelFailed { reference, error } => {
                self.line(format!("{FAILURE}{} - {}", reference.red(), error.red()));
            }

            ProgressEvent::PlanReady {
                title,
                reuse_count,
                fetch_count,
                delete_count,
                ..
            } => {
                self.line(format!(
                    "{HEADPHONES}{} • {} kept, {} to fetch, {} to delete",
                    title.bold().green(),
                    reuse_count.to_string().cyan(),
                    fetch_count.to_string().yellow(),
                    delete_count.to_string().yellow()
                ));
            }

            ProgressEvent::FetchStarting {
                slot,
                channel_slug,
                episode_title,
                episode_index,
                total_to_fetch,
            } => {
                let bar = self.get_or_create_bar(&channel_slug, slot);
                bar.set_message(format!(
                    "[{}/{}] {}",
                    (episode_index + 1).to_string().cyan(),
                    total_to_fetch.to_string().cyan(),
                    truncate_title(&episode_title, 40)
                ));
            }

            ProgressEvent::CandidateAttempt {
                slot,
                channel_slug,
                episode_id,
                candidate_index,
                candidate_count,
                ..
            } => {
                let bar = self.get_or_create_bar(&channel_slug, slot);
                bar.set_message(format!(
                    "{} source {}/{}",
                    episode_id,
                    (candidate_index + 1).to_string().cyan(),
                    candidate_count.to_string().cyan()
                ));
            }

            ProgressEvent::CandidateFailed {
                episode_id,
                candidate,
                error,
                ..
            } => {
                self.line(format!(
                    "  {CROSS}{} {} - {}",
                    episode_id.yellow(),
                    candidate.dimmed(),
                    truncate_title(&error, 80).dimmed()
                ));
            }

            ProgressEvent::Uploading {
                slot,
                channel_slug,
                key,
            } => {
                let bar = self.get_or_create_bar(&channel_slug, slot);
                bar.set_message(format!("{UPLOAD}{}", key.cyan()));
            }

            ProgressEvent::EpisodeMirrored {
                slot,
                channel_slug,
                key,
                size_bytes,
            } => {
                self.finish_bar(&channel_slug, slot);
                self.line(format!(
                    "  {SUCCESS}{} ({})",
                    key.green(),
                    HumanBytes(size_bytes)
                ));
            }

            ProgressEvent::EpisodeFailed {
                slot,
                channel_slug,
                episode_title,
                error,
            } => {
                self.finish_bar(&channel_slug, slot);
                self.line(format!(
                    "  {FAILURE}{} - {}",
                    truncate_title(&episode_title, 30).red(),
                    truncate_title(&error, 80).red()
                ));
            }

            ProgressEvent::AssetDeleted { key } => {
                self.line(format!("  {TRASH}{}", key.dimmed()));
            }

            ProgressEvent::FeedPublished {
                path, entry_count, ..
            } => {
                self.line(format!(
                    "  {FEED}{} ({} episodes)",
                    path.display().to_string().cyan(),
                    entry_count
                ));
            }

            ProgressEvent::FeedFailed {
                channel_slug,
                error,
            } => {
                self.line(format!("  {FAILURE}{} feed - {}", channel_slug.red(), error.red()));
            }

            ProgressEvent::RunCompleted {
                synced_channels,
                failed_channels,
                fetched_count,
                reused_count,
                deleted_count,
                failed_episodes,
            } => {
                self.main_bar.finish_and_clear();
                println!(
                    "\n{PARTY}{} {} channels synced, {} failed • {} fetched, {} kept, {} deleted, {} episode failures",
                    "Run complete:".bold().green(),
                    synced_channels.to_string().green().bold(),
                    colored_count(failed_channels),
                    fetched_count.to_string().green(),
                    reused_count.to_string().cyan(),
                    deleted_count.to_string().yellow(),
                    colored_count(failed_episodes)
                );
            }
        }
    }
}

fn colored_count(count: usize) -> colored::ColoredString {
    if count > 0 {
        count.to_string().red().bold()
    } else {
        count.to_string().green()
    }
}

fn truncate_title(title: &str, max_len: usize) -> String {
    if title.chars().count() <= max_len {
        title.to_string()
    } else {
        let kept: String = title.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

fn print_failures(report: &RunReport) {
    let mut lines = Vec::new();

    for channel in &report.channels {
        let name = channel
            .title
            .clone()
            .unwrap_or_else(|| channel.reference.clone());

        match &channel.result {
            Err(e) => lines.push(format!("{}{} - {}", CROSS, name.yellow(), e.to_string().dimmed())),
            Ok(summary) => {
                for failure in &summary.episode_failures {
                    lines.push(format!(
                        "{}{} / {} - {}",
                        CROSS,
                        name.yellow(),
                        failure.title.yellow(),
                        failure.error.dimmed()
                    ));
                }
                for failure in &summary.delete_failures {
                    lines.push(format!(
                        "{}{} - {}",
                        CROSS,
                        failure.key.to_string().yellow(),
                        failure.error.dimmed()
                    ));
                }
                if let Some(error) = &summary.feed_error {
                    lines.push(format!("{}{} feed - {}", CROSS, name.yellow(), error.dimmed()));
                }
            }
        }
    }

    if !lines.is_empty() {
        println!("\n{}", "Failures:".red().bold());
        for line in lines {
            println!("  {line}");
        }
    }
}

fn print_dry_run(report: &RunReport) {
    println!("\n{}", "Dry run - nothing was changed:".yellow().bold());
    for channel in &report.channels {
        let Ok(summary) = &channel.result else {
            continue;
        };
        let slug = channel.channel_slug.as_deref().unwrap_or_default();
        println!("  {}", slug.bold());
        for key in &summary.to_fetch {
            println!("    {} {}", "+".green(), key);
        }
        for key in &summary.to_delete {
            println!("    {} {}", "-".red(), key);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(level_for_verbosity(args.verbose));

    if !args.quiet {
        println!(
            "\n{}{} {}\n",
            SATELLITE,
            "castmirror".bold().magenta(),
            "- Channel to Podcast Mirror".dimmed()
        );
    }

    let channels = load_channel_list(&args.channels)
        .with_context(|| format!("Failed to load channel list {}", args.channels.display()))?;

    let mirrors = if args.no_mirrors {
        MirrorSet::none()
    } else if args.mirrors.is_empty() {
        MirrorSet::defaults()
    } else {
        MirrorSet::new(args.mirrors.iter().cloned()).context("Invalid mirror template")?
    };

    let mut store_config =
        GithubStoreConfig::new(&args.repo, &args.release_tag, args.github_token.clone())
            .context("Invalid asset store configuration")?;
    store_config.request_timeout = Duration::from_secs(args.store_timeout);
    let store = GithubReleaseStore::new(store_config).context("Failed to set up the asset store")?;

    let ytdlp = Arc::new(YtDlp::new(args.yt_dlp.clone()).with_cookies(args.cookies.clone()));
    let attempt_timeout = Duration::from_secs(args.attempt_timeout);

    let collaborators = Collaborators {
        lister: ytdlp.clone(),
        store: Arc::new(store),
        fetcher: Arc::new(ResilientFetcher::new(ytdlp, mirrors, attempt_timeout)),
        publisher: Arc::new(FeedPublisher::new(args.feeds_dir.clone())),
    };

    let options = SyncOptions {
        max_episodes: args.max_episodes,
        max_concurrent_channels: args.concurrent_channels,
        max_concurrent_downloads: args.concurrent_downloads,
        list_timeout: attempt_timeout,
        store_timeout: Duration::from_secs(args.store_timeout),
        channel_timeout: Duration::from_secs(args.channel_timeout),
        download_dir: args.download_dir.clone(),
        keep_downloads: args.keep_downloads,
        dry_run: args.dry_run,
    };

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, stopping after the work in flight");
                cancel.cancel();
            }
        });
    }

    let reporter: SharedProgressReporter = if args.quiet {
        NoopReporter::shared()
    } else {
        Arc::new(IndicatifReporter::new())
    };

    let report = sync_channels(&collaborators, &channels, &options, reporter, &cancel).await;

    if !args.quiet {
        print_failures(&report);

        if args.dry_run {
            print_dry_run(&report);
        } else {
            println!(
                "\n{FOLDER}Feeds: {}\n",
                args.feeds_dir.display().to_string().cyan()
            );
        }
    }

    if report.all_failed() {
        std::process::exit(1);
    }

    Ok(())
}
