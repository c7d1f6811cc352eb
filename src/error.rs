use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read channel list {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Line {line}: {reason}")]
    InvalidLine { line: usize, reason: String },

    #[error("Channel {reference} is listed more than once")]
    DuplicateChannel { reference: String },

    #[error("Invalid channel slug '{slug}': {reason}")]
    InvalidSlug { slug: String, reason: String },

    #[error("Channel slug '{slug}' is used by both {first} and {second}")]
    SlugConflict {
        slug: String,
        first: String,
        second: String,
    },

    #[error("Invalid mirror template '{template}': {reason}")]
    InvalidMirror { template: String, reason: String },
}

/// Errors from the channel lister. Any of these means "no data" for the channel.
#[derive(Error, Debug)]
pub enum ListerError {
    #[error("Failed to run {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Lister exited with {status} for {reference}: {stderr}")]
    ExitFailure {
        reference: String,
        status: String,
        stderr: String,
    },

    #[error("Failed to parse listing for {reference}: {source}")]
    ParseFailed {
        reference: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("No channel data returned for {reference}")]
    NoData { reference: String },

    #[error("Listing {reference} timed out after {}s", .timeout.as_secs())]
    TimedOut {
        reference: String,
        timeout: Duration,
    },
}

/// Errors from a single audio extraction attempt
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Failed to run {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Extractor exited with {status}: {stderr}")]
    ExitFailure { status: String, stderr: String },

    #[error("Failed to prepare output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Why one fetch candidate was rejected
#[derive(Debug)]
pub enum AttemptFailure {
    /// The extraction step itself failed (origin blocked, mirror down, ...)
    Extractor(ExtractError),
    /// The extraction step finished without producing a result
    NoResult,
    /// The step reported success but the expected file is missing or empty
    MissingOutput { expected: PathBuf },
    /// The attempt did not finish within the per-attempt timeout
    TimedOut(Duration),
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Extractor(e) => write!(f, "{e}"),
            Self::NoResult => write!(f, "extractor returned no result"),
            Self::MissingOutput { expected } => write!(
                f,
                "extractor reported success but {} is missing or empty",
                expected.display()
            ),
            Self::TimedOut(timeout) => write!(f, "timed out after {}s", timeout.as_secs()),
        }
    }
}

/// A rejected fetch candidate and the reason
#[derive(Debug)]
pub struct FailedAttempt {
    pub candidate: String,
    pub failure: AttemptFailure,
}

/// Errors that can occur while materializing an episode
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("All {} candidates failed for episode {episode_id}", .attempts.len())]
    Exhausted {
        episode_id: String,
        attempts: Vec<FailedAttempt>,
    },

    #[error("Failed to prepare {path}: {source}")]
    PrepareFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the asset store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{operation} request failed: {source}")]
    HttpFailed {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{operation} returned HTTP {status}: {body}")]
    HttpStatus {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("Failed to decode {operation} response: {source}")]
    DecodeFailed {
        operation: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to read {path} for upload: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid store URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Store reported {key} as existing but it is not listed")]
    MissingAfterConflict { key: String },

    #[error("{operation} timed out after {}s", .timeout.as_secs())]
    TimedOut {
        operation: &'static str,
        timeout: Duration,
    },
}

/// Errors that can occur when publishing a feed document
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Failed to serialize feed: {0}")]
    Serialize(#[from] rss::Error),

    #[error("Failed to create feed directory {path}: {source}")]
    CreateDirectoryFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write feed file {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Reasons a whole channel is skipped for this run
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Listing failed: {0}")]
    Lister(#[from] ListerError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store listing failed: {0}")]
    Store(#[from] StoreError),

    #[error("Channel reconciliation timed out after {}s", .timeout.as_secs())]
    TimedOut { timeout: Duration },

    #[error("Run cancelled before the channel was processed")]
    Cancelled,
}
