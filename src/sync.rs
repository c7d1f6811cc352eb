// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::channel::{ChannelLister, ChannelListing};
use crate::config::{ChannelEntry, DEFAULT_MAX_EPISODES, find_slug_conflicts};
use crate::episode::{AssetKey, FetchContext, ResilientFetcher, channel_slug, validate_slug};
use crate::error::{ChannelError, ConfigError, FetchError, ListerError, StoreError};
use crate::feed::FeedPublisher;
use crate::progress::{ProgressEvent, SharedProgressReporter};
use crate::reconcile::{EpisodeFeedEntry, PlannedEpisode, ReconcilePlan, desired_set, reconcile};
use crate::store::{AssetStore, StoredAsset};

/// Options for a mirror run
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Episodes retained per channel
    pub max_episodes: usize,
    /// Channels listed and reconciled at the same time
    pub max_concurrent_channels: usize,
    /// Episodes fetched and uploaded at the same time, per channel
    pub max_concurrent_downloads: usize,
    pub list_timeout: Duration,
    /// Bound on every single store call
    pub store_timeout: Duration,
    /// Bound on one channel's whole reconciliation
    pub channel_timeout: Duration,
    /// Fetched files land in `download_dir/{slug}/`
    pub download_dir: PathBuf,
    /// Keep fetched files after a successful upload
    pub keep_downloads: bool,
    /// Plan only; nothing is fetched, uploaded, deleted or published
    pub dry_run: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_episodes: DEFAULT_MAX_EPISODES,
            max_concurrent_channels: 2,
            max_concurrent_downloads: 2,
            list_timeout: Duration::from_secs(600),
            store_timeout: Duration::from_secs(300),
            channel_timeout: Duration::from_secs(3600),
            download_dir: PathBuf::from("downloads"),
            keep_downloads: false,
            dry_run: false,
        }
    }
}

/// The external collaborators a run drives
#[derive(Clone)]
pub struct Collaborators {
    pub lister: Arc<dyn ChannelLister>,
    pub store: Arc<dyn AssetStore>,
    pub fetcher: Arc<ResilientFetcher>,
    pub publisher: Arc<FeedPublisher>,
}

/// Cooperative cancellation, checked between channels and between episodes
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// An episode that could not be mirrored this run
#[derive(Debug, Clone)]
pub struct EpisodeFailure {
    pub episode_id: String,
    pub title: String,
    pub error: String,
}

/// A stale asset that could not be deleted this run
#[derive(Debug, Clone)]
pub struct DeleteFailure {
    pub key: AssetKey,
    pub error: String,
}

/// What happened to one reconciled channel
#[derive(Debug, Clone, Default)]
pub struct ChannelSummary {
    /// Keys reused from the store without fetching
    pub reused: Vec<AssetKey>,
    /// Keys the plan scheduled for fetching
    pub to_fetch: Vec<AssetKey>,
    /// Keys the plan scheduled for deletion
    pub to_delete: Vec<AssetKey>,
    /// Keys fetched and uploaded this run
    pub fetched: Vec<AssetKey>,
    /// Keys confirmed absent after deletion
    pub deleted: Vec<AssetKey>,
    pub episode_failures: Vec<EpisodeFailure>,
    pub delete_failures: Vec<DeleteFailure>,
    /// Entries handed to the feed, in desired order
    pub final_list: Vec<EpisodeFeedEntry>,
    pub feed_path: Option<PathBuf>,
    pub feed_error: Option<String>,
    pub dry_run: bool,
}

/// Per-channel result of a run
#[derive(Debug)]
pub struct ChannelOutcome {
    pub reference: String,
    /// Known once the channel was listed
    pub channel_slug: Option<String>,
    pub title: Option<String>,
    pub result: Result<ChannelSummary, ChannelError>,
}

/// Result of a whole run, one outcome per configured channel
#[derive(Debug, Default)]
pub struct RunReport {
    pub channels: Vec<ChannelOutcome>,
}

impl RunReport {
    fn summaries(&self) -> impl Iterator<Item = &ChannelSummary> {
        self.channels.iter().filter_map(|c| c.result.as_ref().ok())
    }

    /// Channels reconciled, possibly with episode-level failures
    pub fn synced_count(&self) -> usize {
        self.summaries().count()
    }

    /// Channels skipped outright
    pub fn failed_count(&self) -> usize {
        self.channels.len() - self.synced_count()
    }

    pub fn fetched_count(&self) -> usize {
        self.summaries().map(|s| s.fetched.len()).sum()
    }

    pub fn reused_count(&self) -> usize {
        self.summaries().map(|s| s.reused.len()).sum()
    }

    pub fn deleted_count(&self) -> usize {
        self.summaries().map(|s| s.deleted.len()).sum()
    }

    pub fn failed_episode_count(&self) -> usize {
        self.summaries().map(|s| s.episode_failures.len()).sum()
    }

    /// True when no channel could be reconciled
    pub fn all_failed(&self) -> bool {
        self.synced_count() == 0
    }
}

/// A listed channel with its resolved slug
struct ListedChannel {
    entry: ChannelEntry,
    result: Result<(String, ChannelListing), ChannelError>,
}

/// Mirror every configured channel
///
/// Channels are listed, their slugs validated as a set, then each channel is
/// reconciled independently: a failure in one never stops the others.
pub async fn sync_channels(
    collaborators: &Collaborators,
    channels: &[ChannelEntry],
    options: &SyncOptions,
    reporter: SharedProgressReporter,
    cancel: &CancelToken,
) -> RunReport {
    let concurrency = options.max_concurrent_channels.max(1);

    let listed: Vec<ListedChannel> = stream::iter(channels.iter().cloned())
        .map(|entry| {
            let reporter = reporter.clone();
            async move {
                let result = list_channel(collaborators, &entry, options, &reporter, cancel).await;
                ListedChannel { entry, result }
            }
        })
        .buffered(concurrency)
        .collect()
        .await;

    let listed = reject_slug_conflicts(listed);

    let outcomes: Vec<ChannelOutcome> = stream::iter(listed)
        .map(|channel| {
            let reporter = reporter.clone();
            async move { process_channel(collaborators, channel, options, &reporter, cancel).await }
        })
        .buffered(concurrency)
        .collect()
        .await;

    let report = RunReport { channels: outcomes };

    reporter.report(ProgressEvent::RunCompleted {
        synced_channels: report.synced_count(),
        failed_channels: report.failed_count(),
        fetched_count: report.fetched_count(),
        reused_count: report.reused_count(),
        deleted_count: report.deleted_count(),
        failed_episodes: report.failed_episode_count(),
    });

    report
}

async fn list_channel(
    collaborators: &Collaborators,
    entry: &ChannelEntry,
    options: &SyncOptions,
    reporter: &SharedProgressReporter,
    cancel: &CancelToken,
) -> Result<(String, ChannelListing), ChannelError> {
    if cancel.is_cancelled() {
        return Err(ChannelError::Cancelled);
    }

    reporter.report(ProgressEvent::ListingChannel {
        reference: entry.reference.clone(),
    });

    let listing = tokio::time::timeout(
        options.list_timeout,
        collaborators.lister.list(&entry.reference, options.max_episodes),
    )
    .await
    .map_err(|_| ListerError::TimedOut {
        reference: entry.reference.clone(),
        timeout: options.list_timeout,
    })??;

    let slug = match &entry.slug_override {
        Some(slug) => slug.clone(),
        None => channel_slug(listing.channel_id.as_deref(), &entry.reference),
    };
    validate_slug(&slug)?;

    info!(
        reference = %entry.reference,
        channel = %slug,
        episodes = listing.episodes.len(),
        "listed channel"
    );
    reporter.report(ProgressEvent::ChannelListed {
        reference: entry.reference.clone(),
        channel_slug: slug.clone(),
        title: listing.title.clone(),
        episode_count: listing.episodes.len(),
    });

    Ok((slug, listing))
}

/// Fail every channel whose slug is claimed by another listed channel
///
/// Runs before any store mutation, so colliding channels cannot delete each
/// other's assets.
fn reject_slug_conflicts(listed: Vec<ListedChannel>) -> Vec<ListedChannel> {
    let conflicts = find_slug_conflicts(listed.iter().filter_map(|channel| {
        channel
            .result
            .as_ref()
            .ok()
            .map(|(slug, _)| (channel.entry.reference.as_str(), slug.as_str()))
    }));

    if conflicts.is_empty() {
        return listed;
    }

    listed
        .into_iter()
        .map(|mut channel| {
            let claimants = match &channel.result {
                Ok((slug, _)) => conflicts.get(slug).map(|refs| (slug.clone(), refs)),
                Err(_) => None,
            };

            if let Some((slug, references)) = claimants {
                let other = references
                    .iter()
                    .find(|r| **r != channel.entry.reference)
                    .cloned()
                    .unwrap_or_default();
                channel.result = Err(ChannelError::Config(ConfigError::SlugConflict {
                    slug,
                    first: channel.entry.reference.clone(),
                    second: other,
                }));
            }
            channel
        })
        .collect()
}

async fn process_channel(
    collaborators: &Collaborators,
    channel: ListedChannel,
    options: &SyncOptions,
    reporter: &SharedProgressReporter,
    cancel: &CancelToken,
) -> ChannelOutcome {
    let reference = channel.entry.reference;

    let (slug, title, result) = match channel.result {
        Err(e) => (None, None, Err(e)),
        Ok((slug, listing)) => {
            let result = if cancel.is_cancelled() {
                Err(ChannelError::Cancelled)
            } else {
                let run = reconcile_channel(
                    collaborators,
                    &reference,
                    &slug,
                    &listing,
                    options,
                    reporter,
                    cancel,
                );
                match tokio::time::timeout(options.channel_timeout, run).await {
                    Ok(result) => result,
                    Err(_) => Err(ChannelError::TimedOut {
                        timeout: options.channel_timeout,
                    }),
                }
            };
            (Some(slug), Some(listing.title), result)
        }
    };

    if let Err(e) = &result {
        warn!(%reference, error = %e, "channel skipped");
        reporter.report(ProgressEvent::ChannelFailed {
            reference: reference.clone(),
            error: e.to_string(),
        });
    }

    ChannelOutcome {
        reference,
        channel_slug: slug,
        title,
        result,
    }
}

/// Reconcile one channel against the store and realize the plan
async fn reconcile_channel(
    collaborators: &Collaborators,
    reference: &str,
    slug: &str,
    listing: &ChannelListing,
    options: &SyncOptions,
    reporter: &SharedProgressReporter,
    cancel: &CancelToken,
) -> Result<ChannelSummary, ChannelError> {
    let desired = desired_set(listing.episodes.clone(), options.max_episodes);
    let observed = with_timeout("List assets", options.store_timeout, collaborators.store.list()).await?;
    let plan = reconcile(slug, &desired, &observed);

    let mut summary = ChannelSummary {
        reused: plan.to_reuse().iter().map(|p| p.key.clone()).collect(),
        to_fetch: plan.to_fetch().iter().map(|p| p.key.clone()).collect(),
        to_delete: plan.to_delete.iter().map(|a| a.key.clone()).collect(),
        dry_run: options.dry_run,
        ..Default::default()
    };

    info!(
        channel = %slug,
        reuse = summary.reused.len(),
        fetch = summary.to_fetch.len(),
        delete = summary.to_delete.len(),
        "planned channel"
    );
    reporter.report(ProgressEvent::PlanReady {
        channel_slug: slug.to_string(),
        title: listing.title.clone(),
        reuse_count: summary.reused.len(),
        fetch_count: summary.to_fetch.len(),
        delete_count: summary.to_delete.len(),
    });

    if options.dry_run {
        summary.final_list = plan.final_list(&HashMap::new());
        return Ok(summary);
    }

    let uploaded = mirror_episodes(collaborators, &plan, options, reporter, cancel, &mut summary).await;
    summary.final_list = plan.final_list(&uploaded);

    match collaborators
        .publisher
        .publish(slug, listing, reference, &summary.final_list, Utc::now())
        .await
    {
        Ok(path) => {
            reporter.report(ProgressEvent::FeedPublished {
                channel_slug: slug.to_string(),
                path: path.clone(),
                entry_count: summary.final_list.len(),
            });
            summary.feed_path = Some(path);
        }
        Err(e) => {
            warn!(channel = %slug, error = %e, "feed not published");
            reporter.report(ProgressEvent::FeedFailed {
                channel_slug: slug.to_string(),
                error: e.to_string(),
            });
            summary.feed_error = Some(e.to_string());
        }
    }

    // The previous feed may still reference stale assets until it is replaced
    if summary.feed_error.is_none() {
        delete_stale(collaborators, &plan, options, reporter, cancel, &mut summary).await;
    }

    Ok(summary)
}

/// Fetch and upload every planned episode through a pool of worker slots
///
/// Returns the uploaded assets by key; failures are recorded in `summary`.
async fn mirror_episodes(
    collaborators: &Collaborators,
    plan: &ReconcilePlan,
    options: &SyncOptions,
    reporter: &SharedProgressReporter,
    cancel: &CancelToken,
    summary: &mut ChannelSummary,
) -> HashMap<AssetKey, StoredAsset> {
    let to_fetch: Vec<PlannedEpisode> = plan.to_fetch().into_iter().cloned().collect();
    let mut uploaded = HashMap::new();
    if to_fetch.is_empty() {
        return uploaded;
    }

    let total_to_fetch = to_fetch.len();
    let output_dir = options.download_dir.join(&plan.channel_slug);

    // The slot pool limits concurrency and gives each worker a stable id
    let slots = options.max_concurrent_downloads.max(1);
    let (slot_tx, mut slot_rx) = tokio::sync::mpsc::channel(slots);
    for slot in 0..slots {
        let _ = slot_tx.send(slot).await;
    }

    let mut tasks = JoinSet::new();
    let mut outstanding: HashMap<AssetKey, (PlannedEpisode, usize)> = HashMap::new();
    let mut pending = to_fetch.into_iter().enumerate();

    while let Some((episode_index, planned)) = pending.next() {
        // Acquire before spawning so episodes start in order
        let Some(slot) = slot_rx.recv().await else {
            break;
        };

        if cancel.is_cancelled() {
            for planned in std::iter::once(planned).chain(pending.by_ref().map(|(_, p)| p)) {
                summary.episode_failures.push(EpisodeFailure {
                    episode_id: planned.episode.episode_id.clone(),
                    title: planned.episode.title.clone(),
                    error: "run cancelled".to_string(),
                });
            }
            break;
        }

        reporter.report(ProgressEvent::FetchStarting {
            slot,
            channel_slug: plan.channel_slug.clone(),
            episode_title: planned.episode.title.clone(),
            episode_index,
            total_to_fetch,
        });

        let job = EpisodeJob {
            collaborators: collaborators.clone(),
            output_dir: output_dir.clone(),
            context: FetchContext {
                slot,
                channel_slug: plan.channel_slug.clone(),
            },
            store_timeout: options.store_timeout,
            keep_downloads: options.keep_downloads,
            reporter: reporter.clone(),
        };
        let guard = SlotGuard {
            tx: slot_tx.clone(),
            slot,
        };
        outstanding.insert(planned.key.clone(), (planned.clone(), slot));

        tasks.spawn(async move {
            let _guard = guard;
            let result = job.run(&planned).await;
            (planned, slot, result)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((planned, slot, Ok(asset))) => {
                outstanding.remove(&planned.key);
                reporter.report(ProgressEvent::EpisodeMirrored {
                    slot,
                    channel_slug: plan.channel_slug.clone(),
                    key: planned.key.to_string(),
                    size_bytes: asset.size_bytes,
                });
                summary.fetched.push(planned.key.clone());
                uploaded.insert(planned.key, asset);
            }
            Ok((planned, slot, Err(error))) => {
                outstanding.remove(&planned.key);
                warn!(
                    channel = %plan.channel_slug,
                    episode = %planned.episode.episode_id,
                    %error,
                    "episode not mirrored this run"
                );
                reporter.report(ProgressEvent::EpisodeFailed {
                    slot,
                    channel_slug: plan.channel_slug.clone(),
                    episode_title: planned.episode.title.clone(),
                    error: error.clone(),
                });
                summary.episode_failures.push(EpisodeFailure {
                    episode_id: planned.episode.episode_id,
                    title: planned.episode.title,
                    error,
                });
            }
            Err(e) => warn!(channel = %plan.channel_slug, error = %e, "episode task failed"),
        }
    }

    // A task that panicked never handed its episode back
    for key in plan.episodes.iter().map(|p| &p.key) {
        let Some((planned, slot)) = outstanding.remove(key) else {
            continue;
        };
        let error = "episode task ended unexpectedly".to_string();
        reporter.report(ProgressEvent::EpisodeFailed {
            slot,
            channel_slug: plan.channel_slug.clone(),
            episode_title: planned.episode.title.clone(),
            error: error.clone(),
        });
        summary.episode_failures.push(EpisodeFailure {
            episode_id: planned.episode.episode_id,
            title: planned.episode.title,
            error,
        });
    }

    // Keep the report in desired order rather than completion order
    let order: HashMap<&AssetKey, usize> = plan
        .episodes
        .iter()
        .enumerate()
        .map(|(i, p)| (&p.key, i))
        .collect();
    summary.fetched.sort_by_key(|key| order.get(key).copied());

    uploaded
}

/// Hands a worker slot back to the pool when the task ends, even by panic
struct SlotGuard {
    tx: tokio::sync::mpsc::Sender<usize>,
    slot: usize,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        // The pool holds one buffer place per slot, so this never sees a full channel
        let _ = self.tx.try_send(self.slot);
    }
}

/// Everything one spawned episode task owns
struct EpisodeJob {
    collaborators: Collaborators,
    output_dir: PathBuf,
    context: FetchContext,
    store_timeout: Duration,
    keep_downloads: bool,
    reporter: SharedProgressReporter,
}

impl EpisodeJob {
    /// Fetch then upload one episode; the error is a display string
    async fn run(&self, planned: &PlannedEpisode) -> Result<StoredAsset, String> {
        let fetched = self
            .collaborators
            .fetcher
            .fetch(&planned.episode, &self.output_dir, &self.context, &self.reporter)
            .await
            .map_err(|e| describe_fetch_error(&e))?;

        debug!(
            key = %planned.key,
            candidate = %fetched.candidate,
            attempts = fetched.attempts(),
            "uploading episode"
        );
        self.reporter.report(ProgressEvent::Uploading {
            slot: self.context.slot,
            channel_slug: self.context.channel_slug.clone(),
            key: planned.key.to_string(),
        });

        let asset = with_timeout(
            "Upload asset",
            self.store_timeout,
            self.collaborators.store.upload(&planned.key, &fetched.path),
        )
        .await
        .map_err(|e| e.to_string())?;

        if !self.keep_downloads {
            remove_local(&fetched.path).await;
        }

        Ok(asset)
    }
}

/// Delete the channel's stale assets one at a time
async fn delete_stale(
    collaborators: &Collaborators,
    plan: &ReconcilePlan,
    options: &SyncOptions,
    reporter: &SharedProgressReporter,
    cancel: &CancelToken,
    summary: &mut ChannelSummary,
) {
    for asset in &plan.to_delete {
        if cancel.is_cancelled() {
            debug!(channel = %plan.channel_slug, "cancelled before deleting stale assets");
            break;
        }

        match with_timeout(
            "Delete asset",
            options.store_timeout,
            collaborators.store.delete(&asset.key),
        )
        .await
        {
            Ok(existed) => {
                if !existed {
                    debug!(key = %asset.key, "stale asset was already gone");
                }
                info!(channel = %plan.channel_slug, key = %asset.key, "deleted stale asset");
                reporter.report(ProgressEvent::AssetDeleted {
                    key: asset.key.to_string(),
                });
                summary.deleted.push(asset.key.clone());
            }
            Err(e) => {
                warn!(key = %asset.key, error = %e, "stale asset not deleted");
                summary.delete_failures.push(DeleteFailure {
                    key: asset.key.clone(),
                    error: e.to_string(),
                });
            }
        }
    }
}

async fn with_timeout<T, F>(operation: &'static str, timeout: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| StoreError::TimedOut { operation, timeout })?
}

fn describe_fetch_error(error: &FetchError) -> String {
    match error {
        FetchError::Exhausted { attempts, .. } if !attempts.is_empty() => {
            let reasons: Vec<String> = attempts
                .iter()
                .map(|a| format!("{} ({})", a.candidate, a.failure))
                .collect();
            format!("{error}: {}", reasons.join("; "))
        }
        _ => error.to_string(),
    }
}

async fn remove_local(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        debug!(path = %path.display(), error = %e, "could not remove local download");
    }
}
