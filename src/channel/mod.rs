// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::ListerError;

/// One upstream episode as reported by the lister
///
/// Two descriptors with the same `episode_id` are the same episode, whatever
/// the other fields say.
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeDescriptor {
    pub episode_id: String,
    pub title: String,
    pub description: String,
    pub source_url: String,
    pub published_at: Option<NaiveDate>,
    pub duration: Option<Duration>,
}

/// Channel metadata plus its current episodes
#[derive(Debug, Clone)]
pub struct ChannelListing {
    /// Platform channel id, if the platform reported one
    pub channel_id: Option<String>,
    pub title: String,
    pub description: String,
    pub webpage_url: Option<String>,
    /// Flat, de-duplicated, newest first, capped at the requested limit
    pub episodes: Vec<EpisodeDescriptor>,
}

/// Resolves a channel reference into its latest episodes
///
/// An `Err` means "no data" for this run; an empty `episodes` list is a
/// valid, empty channel.
#[async_trait]
pub trait ChannelLister: Send + Sync {
    async fn list(&self, reference: &str, limit: usize) -> Result<ChannelListing, ListerError>;
}
