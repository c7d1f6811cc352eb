use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};
use url::Url;

use super::naming::{local_filename, local_stem};
use crate::channel::EpisodeDescriptor;
use crate::error::{AttemptFailure, ConfigError, ExtractError, FailedAttempt, FetchError};
use crate::progress::{ProgressEvent, SharedProgressReporter};

/// Placeholder replaced by the episode id in mirror templates
pub const MIRROR_ID_PLACEHOLDER: &str = "{id}";

/// Mirrors tried before the original source when none are configured
pub const DEFAULT_MIRRORS: &[&str] = &[
    "https://inv.tux.pizza/watch?v={id}",
    "https://yewtu.be/watch?v={id}",
];

/// Extracts and transcodes one remote stream into a local audio file
#[async_trait]
pub trait AudioExtractor: Send + Sync {
    /// Extract `url` into `output_dir`, naming the result `{stem}.mp3`.
    ///
    /// `Ok(None)` means the step finished without producing anything.
    async fn extract(
        &self,
        url: &str,
        output_dir: &Path,
        stem: &str,
    ) -> Result<Option<PathBuf>, ExtractError>;
}

/// Ordered alternative endpoints derived from an episode id
#[derive(Debug, Clone, Default)]
pub struct MirrorSet {
    templates: Vec<String>,
}

impl MirrorSet {
    /// Validate and keep the templates in order
    pub fn new<I, S>(templates: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut validated: Vec<String> = Vec::new();

        for template in templates {
            let template = template.into();
            let invalid = |reason: &str| ConfigError::InvalidMirror {
                template: template.clone(),
                reason: reason.to_string(),
            };

            if !template.contains(MIRROR_ID_PLACEHOLDER) {
                return Err(invalid("missing {id} placeholder"));
            }
            let sample = template.replace(MIRROR_ID_PLACEHOLDER, "sample");
            let url = Url::parse(&sample).map_err(|e| invalid(&e.to_string()))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(invalid("only http and https mirrors are supported"));
            }

            if !validated.contains(&template) {
                validated.push(template);
            }
        }

        Ok(Self {
            templates: validated,
        })
    }

    /// The built-in mirror list
    pub fn defaults() -> Self {
        Self {
            templates: DEFAULT_MIRRORS.iter().map(|t| t.to_string()).collect(),
        }
    }

    /// No mirrors: only the original source is tried
    pub fn none() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Candidate URLs for an episode, always ending with its source URL
    pub fn candidates(&self, episode: &EpisodeDescriptor) -> Vec<String> {
        let encoded_id: String =
            url::form_urlencoded::byte_serialize(episode.episode_id.as_bytes()).collect();

        let mut candidates: Vec<String> = Vec::with_capacity(self.templates.len() + 1);
        for template in &self.templates {
            let candidate = template.replace(MIRROR_ID_PLACEHOLDER, &encoded_id);
            if candidate != episode.source_url && !candidates.contains(&candidate) {
                candidates.push(candidate);
            }
        }
        candidates.push(episode.source_url.clone());
        candidates
    }
}

/// A verified local audio file
#[derive(Debug)]
pub struct FetchedAudio {
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Candidate URL that produced the file
    pub candidate: String,
    /// Candidates that failed before the successful one, in order
    pub failed_attempts: Vec<FailedAttempt>,
}

impl FetchedAudio {
    /// Number of candidates tried, including the successful one
    pub fn attempts(&self) -> usize {
        self.failed_attempts.len() + 1
    }
}

/// Identifies a fetch for progress reporting
#[derive(Debug, Clone)]
pub struct FetchContext {
    /// Worker slot (0 to max_concurrent-1)
    pub slot: usize,
    pub channel_slug: String,
}

/// Materializes episodes by trying mirrors in order, then the source URL
pub struct ResilientFetcher {
    extractor: Arc<dyn AudioExtractor>,
    mirrors: MirrorSet,
    attempt_timeout: Duration,
}

impl ResilientFetcher {
    pub fn new(extractor: Arc<dyn AudioExtractor>, mirrors: MirrorSet, attempt_timeout: Duration) -> Self {
        Self {
            extractor,
            mirrors,
            attempt_timeout,
        }
    }

    pub fn mirrors(&self) -> &MirrorSet {
        &self.mirrors
    }

    /// Fetch an episode into `output_dir`
    ///
    /// Candidates are tried strictly in order, each at most once. A candidate
    /// only succeeds when the expected file exists on disk and is non-empty.
    pub async fn fetch(
        &self,
        episode: &EpisodeDescriptor,
        output_dir: &Path,
        context: &FetchContext,
        reporter: &SharedProgressReporter,
    ) -> Result<FetchedAudio, FetchError> {
        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|e| FetchError::PrepareFailed {
                path: output_dir.to_path_buf(),
                source: e,
            })?;

        let stem = local_stem(&episode.episode_id);
        let expected = output_dir.join(local_filename(&episode.episode_id));
        let candidates = self.mirrors.candidates(episode);
        let candidate_count = candidates.len();
        let mut failed_attempts = Vec::new();

        for (candidate_index, candidate) in candidates.into_iter().enumerate() {
            reporter.report(ProgressEvent::CandidateAttempt {
                slot: context.slot,
                channel_slug: context.channel_slug.clone(),
                episode_id: episode.episode_id.clone(),
                candidate_index,
                candidate_count,
                candidate: candidate.clone(),
            });

            // A leftover from an earlier run must not pass as this attempt's output
            remove_if_present(&expected).await?;

            let failure = match self.attempt(&candidate, output_dir, &stem, &expected).await {
                Ok(size_bytes) => {
                    debug!(
                        channel = %context.channel_slug,
                        episode = %episode.episode_id,
                        %candidate,
                        size_bytes,
                        "fetched episode"
                    );
                    return Ok(FetchedAudio {
                        path: expected,
                        size_bytes,
                        candidate,
                        failed_attempts,
                    });
                }
                Err(failure) => failure,
            };

            warn!(
                channel = %context.channel_slug,
                episode = %episode.episode_id,
                %candidate,
                error = %failure,
                "fetch candidate failed"
            );
            reporter.report(ProgressEvent::CandidateFailed {
                slot: context.slot,
                channel_slug: context.channel_slug.clone(),
                episode_id: episode.episode_id.clone(),
                candidate: candidate.clone(),
                error: failure.to_string(),
            });
            failed_attempts.push(FailedAttempt { candidate, failure });
        }

        Err(FetchError::Exhausted {
            episode_id: episode.episode_id.clone(),
            attempts: failed_attempts,
        })
    }

    async fn attempt(
        &self,
        candidate: &str,
        output_dir: &Path,
        stem: &str,
        expected: &Path,
    ) -> Result<u64, AttemptFailure> {
        let outcome = tokio::time::timeout(
            self.attempt_timeout,
            self.extractor.extract(candidate, output_dir, stem),
        )
        .await;

        match outcome {
            Err(_) => Err(AttemptFailure::TimedOut(self.attempt_timeout)),
            Ok(Err(e)) => Err(AttemptFailure::Extractor(e)),
            Ok(Ok(None)) => Err(AttemptFailure::NoResult),
            Ok(Ok(Some(reported))) => {
                if reported != expected {
                    debug!(
                        reported = %reported.display(),
                        expected = %expected.display(),
                        "extractor reported a different path"
                    );
                }
                verified_size(expected)
                    .await
                    .ok_or_else(|| AttemptFailure::MissingOutput {
                        expected: expected.to_path_buf(),
                    })
            }
        }
    }
}

/// Size of a non-empty regular file, if there is one
async fn verified_size(path: &Path) -> Option<u64> {
    tokio::fs::metadata(path)
        .await
        .ok()
        .filter(|meta| meta.is_file() && meta.len() > 0)
        .map(|meta| meta.len())
}

async fn remove_if_present(path: &Path) -> Result<(), FetchError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(FetchError::PrepareFailed {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}
