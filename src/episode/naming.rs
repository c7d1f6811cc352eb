use std::fmt;
use std::fmt::Write as _;

use sha2::{Digest, Sha256};

use crate::error::ConfigError;

/// Separates the channel slug from the episode id inside an asset key.
/// Never produced by `channel_slug`, so key prefixes of distinct slugs are disjoint.
pub const KEY_SEPARATOR: char = '_';

/// Extension of every mirrored audio asset
pub const AUDIO_EXTENSION: &str = "mp3";

/// MIME type advertised for mirrored audio
pub const AUDIO_MIME_TYPE: &str = "audio/mpeg";

/// Number of hex characters kept from the reference digest for fallback slugs
const REFERENCE_DIGEST_LEN: usize = 16;

/// Deterministic name of one episode's mirrored copy in the asset namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetKey(String);

impl AssetKey {
    /// Derive the key for an episode of a channel: `{slug}_{encoded_id}.mp3`
    pub fn new(channel_slug: &str, episode_id: &str) -> Self {
        Self(format!(
            "{}{}{}.{}",
            channel_slug,
            KEY_SEPARATOR,
            encode_episode_id(episode_id),
            AUDIO_EXTENSION
        ))
    }

    /// Wrap a key observed in the store
    pub fn from_observed(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this key lives in the partition owned by `channel_slug`
    pub fn belongs_to(&self, channel_slug: &str) -> bool {
        let prefix = key_prefix(channel_slug);
        self.0.len() > prefix.len()
            && self.0.starts_with(&prefix)
            && self.0.ends_with(&format!(".{AUDIO_EXTENSION}"))
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for AssetKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Prefix shared by every key of a channel
pub fn key_prefix(channel_slug: &str) -> String {
    format!("{channel_slug}{KEY_SEPARATOR}")
}

/// Derive a channel slug from the platform's channel id
///
/// Falls back to a digest of the channel reference when the platform reports no id.
pub fn channel_slug(channel_id: Option<&str>, reference: &str) -> String {
    match channel_id.map(str::trim).filter(|id| !id.is_empty()) {
        Some(id) => escape(id, is_slug_char),
        None => reference_slug(reference),
    }
}

/// Stable slug derived from the channel reference itself
fn reference_slug(reference: &str) -> String {
    let digest = Sha256::digest(reference.trim().as_bytes());
    let mut hex = String::with_capacity(REFERENCE_DIGEST_LEN);
    for byte in digest.iter() {
        let _ = write!(hex, "{byte:02x}");
    }
    hex.truncate(REFERENCE_DIGEST_LEN);
    format!("ref-{hex}")
}

/// Check that a slug can be used as a key prefix
pub fn validate_slug(slug: &str) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidSlug {
        slug: slug.to_string(),
        reason: reason.to_string(),
    };

    if slug.is_empty() {
        return Err(invalid("slug is empty"));
    }
    if slug.contains(KEY_SEPARATOR) {
        return Err(invalid("slug must not contain '_'"));
    }
    if slug.starts_with('.') && !starts_with_escape(slug) {
        return Err(invalid("slug may only start with '.' as part of a '.hh' escape"));
    }
    if let Some(c) = slug.chars().find(|&c| !(is_slug_char(c) || c == '.')) {
        return Err(invalid(&format!("unsupported character {c:?}")));
    }

    Ok(())
}

/// Whether the slug opens with an escaped byte such as `.c3`
fn starts_with_escape(slug: &str) -> bool {
    let bytes = slug.as_bytes();
    bytes.len() >= 3
        && bytes[0] == b'.'
        && bytes[1..3]
            .iter()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(b))
}

/// Local file stem for a fetched episode, derived only from the upstream id
pub fn local_stem(episode_id: &str) -> String {
    encode_episode_id(episode_id)
}

/// Local file name for a fetched episode
pub fn local_filename(episode_id: &str) -> String {
    format!("{}.{}", local_stem(episode_id), AUDIO_EXTENSION)
}

/// Characters kept verbatim in slugs
fn is_slug_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-'
}

/// Characters kept verbatim in episode ids
fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_')
}

fn encode_episode_id(episode_id: &str) -> String {
    escape(episode_id, is_id_char)
}

/// Replace every character outside the whitelist with `.hh` per UTF-8 byte.
/// '.' is never whitelisted, so the encoding is injective.
fn escape(value: &str, keep: fn(char) -> bool) -> String {
    let mut result = String::with_capacity(value.len());
    let mut buf = [0u8; 4];

    for c in value.chars() {
        if keep(c) {
            result.push(c);
        } else {
            for byte in c.encode_utf8(&mut buf).bytes() {
                let _ = write!(result, ".{byte:02x}");
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    // === Asset key tests ===

    #[test]
    fn asset_key_joins_slug_and_id() {
        assert_eq!(AssetKey::new("chan", "v1").as_str(), "chan_v1.mp3");
    }

    #[test]
    fn asset_key_keeps_platform_id_characters() {
        assert_eq!(
            AssetKey::new("UCabc", "dQw4w9W-_Xc").as_str(),
            "UCabc_dQw4w9W-_Xc.mp3"
        );
    }

    #[test]
    fn asset_key_escapes_unsafe_id_characters() {
        assert_eq!(AssetKey::new("chan", "a/b").as_str(), "chan_a.2fb.mp3");
        assert_eq!(AssetKey::new("chan", "a.b").as_str(), "chan_a.2eb.mp3");
    }

    #[test]
    fn asset_key_escaping_is_injective() {
        assert_ne!(AssetKey::new("chan", "a.b"), AssetKey::new("chan", "a-b"));
        assert_ne!(AssetKey::new("chan", "a/b"), AssetKey::new("chan", "a.2fb"));
    }

    #[test]
    fn asset_key_is_stable_across_calls() {
        assert_eq!(AssetKey::new("chan", "v9"), AssetKey::new("chan", "v9"));
    }

    // === Ownership tests ===

    #[test]
    fn key_belongs_to_its_channel() {
        let key = AssetKey::new("chan", "v1");
        assert!(key.belongs_to("chan"));
    }

    #[test]
    fn key_does_not_belong_to_prefix_lookalike() {
        let key = AssetKey::from_observed("chan2_v1.mp3");
        assert!(!key.belongs_to("chan"));

        let key = AssetKey::from_observed("chan-extra_v1.mp3");
        assert!(!key.belongs_to("chan"));
    }

    #[test]
    fn key_with_other_extension_is_not_owned() {
        assert!(!AssetKey::from_observed("chan_feed.xml").belongs_to("chan"));
    }

    #[test]
    fn bare_prefix_is_not_owned() {
        assert!(!AssetKey::from_observed("chan_").belongs_to("chan"));
    }

    // === Slug tests ===

    #[test]
    fn slug_uses_channel_id() {
        assert_eq!(channel_slug(Some("UCxyz-123"), "https://x"), "UCxyz-123");
    }

    #[test]
    fn slug_escapes_separator() {
        let slug = channel_slug(Some("UC_x5XG1"), "https://x");
        assert_eq!(slug, "UC.5fx5XG1");
        assert!(validate_slug(&slug).is_ok());
    }

    #[test]
    fn slug_falls_back_to_reference_digest() {
        let slug = channel_slug(None, "https://www.youtube.com/@someone");
        assert!(slug.starts_with("ref-"));
        assert_eq!(slug.len(), "ref-".len() + REFERENCE_DIGEST_LEN);
        assert_eq!(slug, channel_slug(Some("  "), "https://www.youtube.com/@someone"));
        assert_ne!(slug, channel_slug(None, "https://www.youtube.com/@other"));
    }

    #[test]
    fn validate_accepts_plain_slug() {
        assert!(validate_slug("chan").is_ok());
        assert!(validate_slug("UC.5fabc-1").is_ok());
    }

    #[test]
    fn validate_rejects_bad_slugs() {
        assert!(validate_slug("").is_err());
        assert!(validate_slug("a_b").is_err());
        assert!(validate_slug("a/b").is_err());
        assert!(validate_slug("a b").is_err());
        assert!(validate_slug(".hidden").is_err());
        assert!(validate_slug(".").is_err());
        assert!(validate_slug("..").is_err());
        assert!(validate_slug(".2").is_err());
        assert!(validate_slug(".C3x").is_err());
    }

    #[test]
    fn derived_slug_with_leading_escape_is_valid() {
        let slug = channel_slug(Some("ñx"), "https://x");
        assert_eq!(slug, ".c3.b1x");
        assert!(validate_slug(&slug).is_ok());

        let slug = channel_slug(Some("@handle"), "https://x");
        assert_eq!(slug, ".40handle");
        assert!(validate_slug(&slug).is_ok());
    }

    // === Local file name tests ===

    #[test]
    fn local_filename_uses_episode_id() {
        assert_eq!(local_filename("v1"), "v1.mp3");
        assert_eq!(local_filename("../x"), ".2e.2e.2fx.mp3");
    }
}
