// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::info;

use super::render::{feed_to_xml, render_feed};
use crate::channel::ChannelListing;
use crate::error::FeedError;
use crate::reconcile::EpisodeFeedEntry;

/// Writes one feed document per channel into a directory
#[derive(Debug, Clone)]
pub struct FeedPublisher {
    output_dir: PathBuf,
}

impl FeedPublisher {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Path of the feed document for a channel slug
    pub fn feed_path(&self, channel_slug: &str) -> PathBuf {
        self.output_dir.join(format!("{channel_slug}.xml"))
    }

    /// Render and write the feed for a channel
    ///
    /// The document is written next to its final path and renamed into
    /// place, so readers never observe a half-written feed.
    pub async fn publish(
        &self,
        channel_slug: &str,
        listing: &ChannelListing,
        reference: &str,
        entries: &[EpisodeFeedEntry],
        now: DateTime<Utc>,
    ) -> Result<PathBuf, FeedError> {
        let xml = feed_to_xml(&render_feed(listing, reference, entries, now))?;

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| FeedError::CreateDirectoryFailed {
                path: self.output_dir.clone(),
                source: e,
            })?;

        let path = self.feed_path(channel_slug);
        let partial = self.output_dir.join(format!("{channel_slug}.xml.partial"));

        tokio::fs::write(&partial, &xml)
            .await
            .map_err(|e| FeedError::WriteFailed {
                path: partial.clone(),
                source: e,
            })?;

        tokio::fs::rename(&partial, &path)
            .await
            .map_err(|e| FeedError::WriteFailed {
                path: path.clone(),
                source: e,
            })?;

        info!(channel = %channel_slug, entries = entries.len(), path = %path.display(), "published feed");
        Ok(path)
    }
}
