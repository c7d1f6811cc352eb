use std::path::PathBuf;
use std::sync::Arc;

/// Events emitted during a mirror run for progress reporting
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A channel is being listed
    ListingChannel { reference: String },

    /// A channel listing was received
    ChannelListed {
        reference: String,
        channel_slug: String,
        title: String,
        episode_count: usize,
    },

    /// A channel was skipped for this run
    ChannelFailed { reference: String, error: String },

    /// Reconciliation decided what to do with a channel
    PlanReady {
        channel_slug: String,
        title: String,
        reuse_count: usize,
        fetch_count: usize,
        delete_count: usize,
    },

    /// An episode fetch is starting
    FetchStarting {
        /// Worker slot (0 to max_concurrent-1)
        slot: usize,
        channel_slug: String,
        episode_title: String,
        /// Index of this episode in the channel's fetch queue
        episode_index: usize,
        total_to_fetch: usize,
    },

    /// One fetch candidate is being tried
    CandidateAttempt {
        slot: usize,
        channel_slug: String,
        episode_id: String,
        candidate_index: usize,
        candidate_count: usize,
        candidate: String,
    },

    /// One fetch candidate failed; the next one will be tried
    CandidateFailed {
        slot: usize,
        channel_slug: String,
        episode_id: String,
        candidate: String,
        error: String,
    },

    /// A fetched episode is being uploaded
    Uploading {
        slot: usize,
        channel_slug: String,
        key: String,
    },

    /// An episode was fetched and uploaded
    EpisodeMirrored {
        slot: usize,
        channel_slug: String,
        key: String,
        size_bytes: u64,
    },

    /// An episode could not be mirrored this run
    EpisodeFailed {
        slot: usize,
        channel_slug: String,
        episode_title: String,
        error: String,
    },

    /// A stale asset was deleted from the store
    AssetDeleted { key: String },

    /// A channel feed was written
    FeedPublished {
        channel_slug: String,
        path: PathBuf,
        entry_count: usize,
    },

    /// A channel feed could not be written
    FeedFailed { channel_slug: String, error: String },

    /// The run finished
    RunCompleted {
        synced_channels: usize,
        failed_channels: usize,
        fetched_count: usize,
        reused_count: usize,
        deleted_count: usize,
        failed_episodes: usize,
    },
}

/// Trait for reporting progress events during a run.
///
/// Implementations can use this to display progress bars, log messages,
/// or collect statistics.
pub trait ProgressReporter: Send + Sync {
    /// Report a progress event
    fn report(&self, event: ProgressEvent);
}

/// A shared reference to a progress reporter
pub type SharedProgressReporter = Arc<dyn ProgressReporter>;

/// A no-op progress reporter that silently ignores all events.
/// Useful for tests or quiet mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _event: ProgressEvent) {
        // Intentionally empty
    }
}

impl NoopReporter {
    /// Create a new NoopReporter wrapped in an Arc
    pub fn shared() -> SharedProgressReporter {
        Arc::new(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_reporter_handles_all_events() {
        let reporter = NoopReporter;

        reporter.report(ProgressEvent::ListingChannel {
            reference: "https://www.youtube.com/@example".to_string(),
        });

        reporter.report(ProgressEvent::PlanReady {
            channel_slug: "chan".to_string(),
            title: "Example".to_string(),
            reuse_count: 3,
            fetch_count: 2,
            delete_count: 1,
        });

        reporter.report(ProgressEvent::CandidateFailed {
            slot: 0,
            channel_slug: "chan".to_string(),
            episode_id: "v1".to_string(),
            candidate: "https://m1.example/watch?v=v1".to_string(),
            error: "blocked".to_string(),
        });

        reporter.report(ProgressEvent::RunCompleted {
            synced_channels: 1,
            failed_channels: 0,
            fetched_count: 2,
            reused_count: 3,
            deleted_count: 1,
            failed_episodes: 0,
        });
    }
}
