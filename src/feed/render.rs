// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use rss::extension::itunes::{
    ITunesCategoryBuilder, ITunesChannelExtensionBuilder, ITunesItemExtensionBuilder,
};
use rss::{Channel, ChannelBuilder, EnclosureBuilder, GuidBuilder, Item, ItemBuilder};

use crate::channel::ChannelListing;
use crate::episode::AUDIO_MIME_TYPE;
use crate::error::FeedError;
use crate::reconcile::EpisodeFeedEntry;

const FEED_LANGUAGE: &str = "en";
const FEED_CATEGORY: &str = "Technology";
const DEFAULT_TITLE: &str = "Mirrored Channel";
const GENERATOR: &str = concat!("castmirror ", env!("CARGO_PKG_VERSION"));

/// Build the RSS document for a channel
///
/// `now` is only used for episodes without a usable publish date. The
/// document carries no build timestamp, so identical inputs render identical bytes.
pub fn render_feed(
    listing: &ChannelListing,
    reference: &str,
    entries: &[EpisodeFeedEntry],
    now: DateTime<Utc>,
) -> Channel {
    let title = Some(listing.title.trim())
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_TITLE)
        .to_string();

    let description = Some(listing.description.trim())
        .filter(|d| !d.is_empty())
        .map(String::from)
        .unwrap_or_else(|| format!("Audio feed mirrored from {title}"));

    let link = listing
        .webpage_url
        .clone()
        .unwrap_or_else(|| reference.to_string());

    let itunes = ITunesChannelExtensionBuilder::default()
        .explicit(Some("no".to_string()))
        .categories(vec![
            ITunesCategoryBuilder::default()
                .text(FEED_CATEGORY.to_string())
                .build(),
        ])
        .build();

    ChannelBuilder::default()
        .title(title)
        .link(link)
        .description(description)
        .language(Some(FEED_LANGUAGE.to_string()))
        .generator(Some(GENERATOR.to_string()))
        .itunes_ext(Some(itunes))
        .items(entries.iter().map(|e| render_item(e, now)).collect::<Vec<_>>())
        .build()
}

/// Serialize a rendered feed
pub fn feed_to_xml(channel: &Channel) -> Result<Vec<u8>, FeedError> {
    Ok(channel.write_to(Vec::new())?)
}

fn render_item(entry: &EpisodeFeedEntry, now: DateTime<Utc>) -> Item {
    let episode = &entry.episode;

    let enclosure = EnclosureBuilder::default()
        .url(entry.download_url.clone())
        .length(entry.size_bytes.to_string())
        .mime_type(AUDIO_MIME_TYPE.to_string())
        .build();

    let guid = GuidBuilder::default()
        .value(episode.episode_id.clone())
        .permalink(false)
        .build();

    let itunes = ITunesItemExtensionBuilder::default()
        .duration(episode.duration.map(format_duration))
        .build();

    ItemBuilder::default()
        .title(Some(episode.title.clone()))
        .description(Some(episode.description.clone()).filter(|d| !d.is_empty()))
        .link(Some(episode.source_url.clone()))
        .guid(Some(guid))
        .enclosure(Some(enclosure))
        .pub_date(Some(publish_timestamp(episode.published_at, now).to_rfc2822()))
        .itunes_ext(Some(itunes))
        .build()
}

/// Midnight UTC of the upstream upload date, or `now` when unknown
pub fn publish_timestamp(published_at: Option<NaiveDate>, now: DateTime<Utc>) -> DateTime<Utc> {
    published_at
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .unwrap_or(now)
}

/// Format a duration as `HH:MM:SS`
fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::EpisodeDescriptor;
    use crate::episode::AssetKey;
    use chrono::TimeZone;

    fn make_listing() -> ChannelListing {
        ChannelListing {
            channel_id: Some("UCchan".to_string()),
            title: "Example Channel".to_string(),
            description: "Videos about examples".to_string(),
            webpage_url: Some("https://www.youtube.com/@example".to_string()),
            episodes: vec![],
        }
    }

    fn make_entry(id: &str, date: Option<&str>) -> EpisodeFeedEntry {
        EpisodeFeedEntry {
            episode: EpisodeDescriptor {
                episode_id: id.to_string(),
                title: format!("Episode {id}"),
                description: String::new(),
                source_url: format!("https://www.youtube.com/watch?v={id}"),
                published_at: date.and_then(|d| NaiveDate::parse_from_str(d, "%Y%m%d").ok()),
                duration: Some(Duration::from_secs(3725)),
            },
            key: AssetKey::new("UCchan", id),
            download_url: format!("https://store.example/UCchan_{id}.mp3"),
            size_bytes: 4096,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn renders_channel_metadata() {
        let channel = render_feed(&make_listing(), "ref", &[], now());

        assert_eq!(channel.title(), "Example Channel");
        assert_eq!(channel.description(), "Videos about examples");
        assert_eq!(channel.link(), "https://www.youtube.com/@example");
        assert_eq!(channel.language(), Some("en"));
        assert!(channel.last_build_date().is_none());
    }

    #[test]
    fn falls_back_for_missing_channel_metadata() {
        let listing = ChannelListing {
            channel_id: None,
            title: "  ".to_string(),
            description: String::new(),
            webpage_url: None,
            episodes: vec![],
        };

        let channel = render_feed(&listing, "https://www.youtube.com/@x", &[], now());

        assert_eq!(channel.title(), DEFAULT_TITLE);
        assert_eq!(channel.link(), "https://www.youtube.com/@x");
        assert!(!channel.description().is_empty());
    }

    #[test]
    fn renders_enclosure_and_guid() {
        let channel = render_feed(&make_listing(), "ref", &[make_entry("v1", Some("20240115"))], now());
        let item = &channel.items()[0];

        let enclosure = item.enclosure().unwrap();
        assert_eq!(enclosure.url(), "https://store.example/UCchan_v1.mp3");
        assert_eq!(enclosure.length(), "4096");
        assert_eq!(enclosure.mime_type(), "audio/mpeg");
        assert_eq!(item.guid().unwrap().value(), "v1");
        assert!(!item.guid().unwrap().is_permalink());
        assert_eq!(item.pub_date(), Some("Mon, 15 Jan 2024 00:00:00 +0000"));
        assert_eq!(item.itunes_ext().unwrap().duration(), Some("01:02:05"));
    }

    #[test]
    fn unparseable_date_falls_back_to_now() {
        let channel = render_feed(&make_listing(), "ref", &[make_entry("v1", Some("soon"))], now());
        assert_eq!(
            channel.items()[0].pub_date(),
            Some(now().to_rfc2822().as_str())
        );
    }

    #[test]
    fn keeps_entry_order() {
        let entries = vec![make_entry("v3", None), make_entry("v1", None)];
        let channel = render_feed(&make_listing(), "ref", &entries, now());

        let titles: Vec<_> = channel.items().iter().filter_map(|i| i.title()).collect();
        assert_eq!(titles, vec!["Episode v3", "Episode v1"]);
    }

    #[test]
    fn xml_is_byte_stable_and_parseable() {
        let entries = vec![make_entry("v2", Some("20240102")), make_entry("v1", Some("20240101"))];

        let first = feed_to_xml(&render_feed(&make_listing(), "ref", &entries, now())).unwrap();
        let later = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let second = feed_to_xml(&render_feed(&make_listing(), "ref", &entries, later)).unwrap();

        assert_eq!(first, second);

        let parsed = Channel::read_from(&first[..]).unwrap();
        assert_eq!(parsed.items().len(), 2);
        assert_eq!(parsed.title(), "Example Channel");
    }

    #[test]
    fn formats_durations() {
        assert_eq!(format_duration(Duration::from_secs(59)), "00:00:59");
        assert_eq!(format_duration(Duration::from_secs(3600)), "01:00:00");
    }
}
