pub mod channel;
pub mod config;
pub mod episode;
pub mod error;
pub mod feed;
pub mod http;
pub mod logging;
pub mod progress;
pub mod reconcile;
pub mod store;
pub mod sync;
pub mod ytdlp;

// Re-export main types for convenience
pub use channel::{ChannelLister, ChannelListing, EpisodeDescriptor};
pub use config::{ChannelEntry, DEFAULT_MAX_EPISODES, load_channel_list, parse_channel_list};
pub use episode::{AssetKey, AudioExtractor, MirrorSet, ResilientFetcher, channel_slug};
pub use error::{
    ChannelError, ConfigError, ExtractError, FeedError, FetchError, ListerError, StoreError,
};
pub use feed::FeedPublisher;
pub use http::{HttpClient, ReqwestClient};
pub use progress::{NoopReporter, ProgressEvent, ProgressReporter, SharedProgressReporter};
pub use reconcile::{EpisodeFeedEntry, ReconcilePlan, reconcile};
pub use store::{AssetStore, GithubReleaseStore, GithubStoreConfig, StoredAsset};
pub use sync::{CancelToken, ChannelOutcome, Collaborators, RunReport, SyncOptions, sync_channels};
pub use ytdlp::YtDlp;
