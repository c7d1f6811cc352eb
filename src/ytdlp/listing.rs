// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashSet;
use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use serde::Deserialize;
use tracing::{debug, warn};

use super::{YtDlp, stderr_tail};
use crate::channel::{ChannelLister, ChannelListing, EpisodeDescriptor};
use crate::error::ListerError;

const WATCH_URL: &str = "https://www.youtube.com/watch?v=";

/// A node of yt-dlp's flat-playlist JSON: a channel, a tab, or a video
#[derive(Debug, Default, Deserialize)]
struct RawEntry {
    id: Option<String>,
    channel_id: Option<String>,
    channel: Option<String>,
    uploader: Option<String>,
    title: Option<String>,
    description: Option<String>,
    url: Option<String>,
    webpage_url: Option<String>,
    duration: Option<f64>,
    upload_date: Option<String>,
    timestamp: Option<i64>,
    entries: Option<Vec<Option<RawEntry>>>,
}

#[async_trait]
impl ChannelLister for YtDlp {
    async fn list(&self, reference: &str, limit: usize) -> Result<ChannelListing, ListerError> {
        let output = self
            .command()
            .args([
                "--flat-playlist",
                "--dump-single-json",
                "--ignore-errors",
                "--no-warnings",
                "--playlist-end",
            ])
            .arg(limit.to_string())
            .arg(reference)
            .output()
            .await
            .map_err(|e| ListerError::SpawnFailed {
                program: self.program_name(),
                source: e,
            })?;

        if output.status.success() {
            if output.stdout.iter().all(u8::is_ascii_whitespace) {
                return Err(ListerError::NoData {
                    reference: reference.to_string(),
                });
            }
            return parse_listing(reference, &output.stdout, limit);
        }

        // --ignore-errors can exit non-zero while still printing a usable listing,
        // but a failed run without episodes is no data, never an empty channel
        match parse_listing(reference, &output.stdout, limit) {
            Ok(listing) if !listing.episodes.is_empty() => {
                warn!(
                    %reference,
                    episodes = listing.episodes.len(),
                    stderr = %stderr_tail(&output.stderr),
                    "lister reported errors, keeping partial listing"
                );
                Ok(listing)
            }
            _ => Err(failed_run(reference, &output)),
        }
    }
}

fn failed_run(reference: &str, output: &Output) -> ListerError {
    let stderr = stderr_tail(&output.stderr);
    if stderr.is_empty() {
        return ListerError::NoData {
            reference: reference.to_string(),
        };
    }
    ListerError::ExitFailure {
        reference: reference.to_string(),
        status: output.status.to_string(),
        stderr,
    }
}

/// Turn yt-dlp's channel JSON into a flat, de-duplicated listing of at most `limit` episodes
pub fn parse_listing(reference: &str, json: &[u8], limit: usize) -> Result<ChannelListing, ListerError> {
    let root: Option<RawEntry> =
        serde_json::from_slice(json).map_err(|e| ListerError::ParseFailed {
            reference: reference.to_string(),
            source: e,
        })?;
    let mut root = root.ok_or_else(|| ListerError::NoData {
        reference: reference.to_string(),
    })?;

    let mut videos = Vec::new();
    flatten(root.entries.take().unwrap_or_default(), &mut videos);

    let mut episodes: Vec<EpisodeDescriptor> = videos.into_iter().filter_map(to_descriptor).collect();

    // Tabs are concatenated; when every entry is dated, restore newest-first order
    if episodes.iter().all(|e| e.published_at.is_some()) {
        episodes.sort_by(|a, b| b.published_at.cmp(&a.published_at));
    }

    let mut seen = HashSet::new();
    episodes.retain(|e| seen.insert(e.episode_id.clone()));
    episodes.truncate(limit);

    debug!(%reference, episodes = episodes.len(), "parsed channel listing");

    let channel_id = non_empty(root.channel_id.take()).or_else(|| non_empty(root.id.take()));
    let title = non_empty(root.channel.take())
        .or_else(|| non_empty(root.uploader.take()))
        .or_else(|| non_empty(root.title.take()))
        .unwrap_or_default();

    Ok(ChannelListing {
        channel_id,
        title,
        description: root.description.unwrap_or_default(),
        webpage_url: non_empty(root.webpage_url),
        episodes,
    })
}

/// Depth-first flattening of nested playlists (channel tabs) into videos
fn flatten(entries: Vec<Option<RawEntry>>, out: &mut Vec<RawEntry>) {
    for mut entry in entries.into_iter().flatten() {
        match entry.entries.take() {
            Some(children) => flatten(children, out),
            None => out.push(entry),
        }
    }
}

fn to_descriptor(entry: RawEntry) -> Option<EpisodeDescriptor> {
    let episode_id = non_empty(entry.id)?;

    let source_url = non_empty(entry.url)
        .filter(|u| u.starts_with("http://") || u.starts_with("https://"))
        .unwrap_or_else(|| format!("{WATCH_URL}{episode_id}"));

    let published_at = entry
        .upload_date
        .as_deref()
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y%m%d").ok())
        .or_else(|| {
            entry
                .timestamp
                .and_then(|ts| DateTime::from_timestamp(ts, 0))
                .map(|dt| dt.date_naive())
        });

    let duration = entry
        .duration
        .filter(|d| d.is_finite() && *d >= 0.0)
        .map(Duration::from_secs_f64);

    Some(EpisodeDescriptor {
        title: non_empty(entry.title).unwrap_or_else(|| episode_id.clone()),
        description: entry.description.unwrap_or_default(),
        episode_id,
        source_url,
        published_at,
        duration,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const NESTED_CHANNEL: &str = r#"{
        "_type": "playlist",
        "id": "UCexample",
        "channel_id": "UCexample",
        "channel": "Example Channel",
        "title": "Example Channel - Videos",
        "description": "All about examples",
        "webpage_url": "https://www.youtube.com/@example",
        "entries": [
            {
                "_type": "playlist",
                "title": "Example Channel - Videos",
                "entries": [
                    {"_type": "url", "ie_key": "Youtube", "id": "v3", "title": "Third",
                     "url": "https://www.youtube.com/watch?v=v3", "duration": 61.5},
                    {"_type": "url", "ie_key": "Youtube", "id": "v2", "title": "Second"},
                    null
                ]
            },
            {
                "_type": "playlist",
                "title": "Example Channel - Shorts",
                "entries": [
                    {"_type": "url", "ie_key": "Youtube", "id": "s1", "title": "Short",
                     "url": "https://www.youtube.com/shorts/s1"},
                    {"_type": "url", "ie_key": "Youtube", "id": "v3", "title": "Third again"}
                ]
            }
        ]
    }"#;

    #[test]
    fn flattens_nested_tabs_in_order() {
        let listing = parse_listing("ref", NESTED_CHANNEL.as_bytes(), 10).unwrap();

        let ids: Vec<_> = listing.episodes.iter().map(|e| e.episode_id.as_str()).collect();
        assert_eq!(ids, vec!["v3", "v2", "s1"]);
    }

    #[test]
    fn extracts_channel_metadata() {
        let listing = parse_listing("ref", NESTED_CHANNEL.as_bytes(), 10).unwrap();

        assert_eq!(listing.channel_id.as_deref(), Some("UCexample"));
        assert_eq!(listing.title, "Example Channel");
        assert_eq!(listing.description, "All about examples");
        assert_eq!(listing.webpage_url.as_deref(), Some("https://www.youtube.com/@example"));
    }

    #[test]
    fn fills_in_missing_urls_and_durations() {
        let listing = parse_listing("ref", NESTED_CHANNEL.as_bytes(), 10).unwrap();

        let v3 = &listing.episodes[0];
        assert_eq!(v3.duration, Some(Duration::from_millis(61_500)));

        let v2 = &listing.episodes[1];
        assert_eq!(v2.source_url, "https://www.youtube.com/watch?v=v2");
        assert!(v2.duration.is_none());
    }

    #[test]
    fn caps_at_limit() {
        let listing = parse_listing("ref", NESTED_CHANNEL.as_bytes(), 2).unwrap();
        assert_eq!(listing.episodes.len(), 2);
    }

    #[test]
    fn flat_channel_without_tabs() {
        let json = r#"{"id": "UCflat", "title": "Flat", "entries": [
            {"id": "a", "title": "A", "upload_date": "20240102"},
            {"id": "b", "title": "B", "upload_date": "20240105"},
            {"title": "no id"}
        ]}"#;

        let listing = parse_listing("ref", json.as_bytes(), 5).unwrap();

        let ids: Vec<_> = listing.episodes.iter().map(|e| e.episode_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(
            listing.episodes[0].published_at,
            NaiveDate::from_ymd_opt(2024, 1, 5)
        );
        assert_eq!(listing.title, "Flat");
    }

    #[test]
    fn uses_timestamp_when_upload_date_missing() {
        let json = r#"{"id": "UC1", "entries": [{"id": "a", "timestamp": 1704067200}]}"#;
        let listing = parse_listing("ref", json.as_bytes(), 5).unwrap();

        assert_eq!(
            listing.episodes[0].published_at,
            NaiveDate::from_ymd_opt(2024, 1, 1)
        );
        assert_eq!(listing.episodes[0].title, "a");
    }

    #[test]
    fn empty_channel_is_valid() {
        let json = r#"{"id": "UCempty", "title": "Empty", "entries": []}"#;
        let listing = parse_listing("ref", json.as_bytes(), 5).unwrap();

        assert!(listing.episodes.is_empty());
    }

    #[test]
    fn null_listing_is_no_data() {
        let result = parse_listing("ref", b"null", 5);
        assert!(matches!(result, Err(ListerError::NoData { .. })));
    }

    #[test]
    fn garbage_is_parse_error() {
        let result = parse_listing("ref", b"ERROR: blocked", 5);
        assert!(matches!(result, Err(ListerError::ParseFailed { .. })));
    }

    #[tokio::test]
    async fn missing_program_is_spawn_failure() {
        let lister = YtDlp::new("/nonexistent/castmirror-yt-dlp");
        let result = lister.list("https://www.youtube.com/@x", 5).await;
        assert!(matches!(result, Err(ListerError::SpawnFailed { .. })));
    }

    /// Write an executable stand-in for yt-dlp
    #[cfg(unix)]
    fn fake_ytdlp(dir: &std::path::Path, stdout: &str, stderr: &str, code: i32) -> std::path::PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("yt-dlp");
        let script = format!(
            "#!/bin/sh\ncat <<'JSON'\n{stdout}\nJSON\necho '{stderr}' >&2\nexit {code}\n"
        );
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn blocked_run_without_episodes_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_ytdlp(
            dir.path(),
            r#"{"id":"UC1","channel_id":"UC1","entries":[null,null]}"#,
            "ERROR: Sign in to confirm you are not a bot",
            1,
        );

        let result = YtDlp::new(program).list("https://www.youtube.com/@x", 5).await;

        match result {
            Err(ListerError::ExitFailure { stderr, .. }) => assert!(stderr.contains("not a bot")),
            other => panic!("Expected ExitFailure error, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_run_with_episodes_keeps_partial_listing() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_ytdlp(
            dir.path(),
            r#"{"id":"UC1","entries":[{"id":"v1","title":"One"},null]}"#,
            "ERROR: one tab unavailable",
            1,
        );

        let listing = YtDlp::new(program)
            .list("https://www.youtube.com/@x", 5)
            .await
            .unwrap();

        assert_eq!(listing.episodes.len(), 1);
        assert_eq!(listing.episodes[0].episode_id, "v1");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn silent_failed_run_is_no_data() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_ytdlp(dir.path(), "null", "", 1);

        let result = YtDlp::new(program).list("https://www.youtube.com/@x", 5).await;

        assert!(matches!(result, Err(ListerError::NoData { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn successful_empty_channel_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_ytdlp(dir.path(), r#"{"id":"UC1","entries":[]}"#, "", 0);

        let listing = YtDlp::new(program)
            .list("https://www.youtube.com/@x", 5)
            .await
            .unwrap();

        assert!(listing.episodes.is_empty());
    }
}
