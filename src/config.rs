// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Channel list loading and slug-set validation.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::episode::validate_slug;
use crate::error::ConfigError;

/// Default number of episodes retained per channel
pub const DEFAULT_MAX_EPISODES: usize = 5;

/// One configured channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEntry {
    /// Channel URL or other reference understood by the lister
    pub reference: String,
    /// Slug to use instead of the one derived from the platform channel id
    pub slug_override: Option<String>,
}

impl ChannelEntry {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            slug_override: None,
        }
    }
}

/// Read and parse a channel list file
pub fn load_channel_list(path: &Path) -> Result<Vec<ChannelEntry>, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_channel_list(&content)
}

/// Parse a channel list
///
/// One channel per line: a reference, optionally followed by a slug.
/// `#` starts a comment at the beginning of a line or after whitespace.
pub fn parse_channel_list(content: &str) -> Result<Vec<ChannelEntry>, ConfigError> {
    let mut entries: Vec<ChannelEntry> = Vec::new();
    let mut references = HashSet::new();
    let mut overrides: HashMap<String, String> = HashMap::new();

    for (index, raw_line) in content.lines().enumerate() {
        let line_number = index + 1;
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let mut tokens = line.split_whitespace();
        let reference = tokens.next().unwrap_or_default().to_string();
        let slug_override = tokens.next().map(String::from);

        if tokens.next().is_some() {
            return Err(ConfigError::InvalidLine {
                line: line_number,
                reason: "expected a channel reference and an optional slug".to_string(),
            });
        }

        if !references.insert(reference.clone()) {
            return Err(ConfigError::DuplicateChannel { reference });
        }

        if let Some(slug) = &slug_override {
            validate_slug(slug).map_err(|e| ConfigError::InvalidLine {
                line: line_number,
                reason: e.to_string(),
            })?;

            if let Some(first) = overrides.insert(slug.clone(), reference.clone()) {
                return Err(ConfigError::SlugConflict {
                    slug: slug.clone(),
                    first,
                    second: reference,
                });
            }
        }

        entries.push(ChannelEntry {
            reference,
            slug_override,
        });
    }

    Ok(entries)
}

/// Find slugs claimed by more than one channel
///
/// Takes `(reference, slug)` pairs and returns, for every slug with several
/// claimants, the claiming references in input order.
pub fn find_slug_conflicts<'a, I>(assignments: I) -> HashMap<String, Vec<String>>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut claimants: HashMap<String, Vec<String>> = HashMap::new();
    for (reference, slug) in assignments {
        claimants
            .entry(slug.to_string())
            .or_default()
            .push(reference.to_string());
    }

    claimants.retain(|_, references| references.len() > 1);
    claimants
}

fn strip_comment(line: &str) -> &str {
    let mut previous_is_space = true;
    for (pos, c) in line.char_indices() {
        if c == '#' && previous_is_space {
            return &line[..pos];
        }
        previous_is_space = c.is_whitespace();
    }
    line
}
