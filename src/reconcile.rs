use std::collections::{HashMap, HashSet};

use crate::channel::EpisodeDescriptor;
use crate::episode::AssetKey;
use crate::store::StoredAsset;

/// An episode with its resolved asset, ready to be rendered into a feed
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeFeedEntry {
    pub episode: EpisodeDescriptor,
    pub key: AssetKey,
    pub download_url: String,
    pub size_bytes: u64,
}

/// What to do with one desired episode
#[derive(Debug, Clone, PartialEq)]
pub enum EpisodeAction {
    /// Already mirrored; use the stored asset as-is
    Reuse(StoredAsset),
    /// Not in the store; fetch and upload it
    Fetch,
}

/// A desired episode together with its key and decided action
#[derive(Debug, Clone)]
pub struct PlannedEpisode {
    pub episode: EpisodeDescriptor,
    pub key: AssetKey,
    pub action: EpisodeAction,
}

/// Reconciliation result for one channel
#[derive(Debug, Clone)]
pub struct ReconcilePlan {
    pub channel_slug: String,
    /// Desired episodes in desired order
    pub episodes: Vec<PlannedEpisode>,
    /// Owned assets whose episode is no longer desired
    pub to_delete: Vec<StoredAsset>,
}

impl ReconcilePlan {
    /// Episodes that must be fetched and uploaded
    pub fn to_fetch(&self) -> Vec<&PlannedEpisode> {
        self.episodes
            .iter()
            .filter(|p| p.action == EpisodeAction::Fetch)
            .collect()
    }

    /// Episodes whose stored asset is reused
    pub fn to_reuse(&self) -> Vec<&PlannedEpisode> {
        self.episodes
            .iter()
            .filter(|p| matches!(p.action, EpisodeAction::Reuse(_)))
            .collect()
    }

    /// True when the store already matches the desired set
    pub fn is_noop(&self) -> bool {
        self.to_delete.is_empty() && self.to_fetch().is_empty()
    }

    /// Authoritative feed entries, in desired order
    ///
    /// Fetched episodes only appear when `uploaded` holds their asset; the
    /// rest are left out for this run and retried on the next one.
    pub fn final_list(&self, uploaded: &HashMap<AssetKey, StoredAsset>) -> Vec<EpisodeFeedEntry> {
        self.episodes
            .iter()
            .filter_map(|planned| {
                let asset = match &planned.action {
                    EpisodeAction::Reuse(asset) => asset,
                    EpisodeAction::Fetch => uploaded.get(&planned.key)?,
                };
                Some(EpisodeFeedEntry {
                    episode: planned.episode.clone(),
                    key: planned.key.clone(),
                    download_url: asset.download_url.clone(),
                    size_bytes: asset.size_bytes,
                })
            })
            .collect()
    }
}

/// Normalize a lister result into the desired set: first occurrence of each
/// episode id wins, capped at `limit`
pub fn desired_set(episodes: Vec<EpisodeDescriptor>, limit: usize) -> Vec<EpisodeDescriptor> {
    let mut seen = HashSet::new();
    episodes
        .into_iter()
        .filter(|episode| seen.insert(episode.episode_id.clone()))
        .take(limit)
        .collect()
}

/// Diff the desired episodes of a channel against the observed store
///
/// Only assets inside the channel's key partition are considered; assets of
/// other channels are never scheduled for deletion.
pub fn reconcile(
    channel_slug: &str,
    desired: &[EpisodeDescriptor],
    observed: &[StoredAsset],
) -> ReconcilePlan {
    let owned: HashMap<&AssetKey, &StoredAsset> = observed
        .iter()
        .filter(|asset| asset.key.belongs_to(channel_slug))
        .map(|asset| (&asset.key, asset))
        .collect();

    let mut desired_keys = HashSet::new();
    let mut episodes = Vec::with_capacity(desired.len());

    for episode in desired {
        let key = AssetKey::new(channel_slug, &episode.episode_id);
        if !desired_keys.insert(key.clone()) {
            continue;
        }

        let action = match owned.get(&key) {
            Some(asset) => EpisodeAction::Reuse((*asset).clone()),
            None => EpisodeAction::Fetch,
        };

        episodes.push(PlannedEpisode {
            episode: episode.clone(),
            key,
            action,
        });
    }

    let mut scheduled = HashSet::new();
    let to_delete = observed
        .iter()
        .filter(|asset| asset.key.belongs_to(channel_slug))
        .filter(|asset| !desired_keys.contains(&asset.key))
        .filter(|asset| scheduled.insert(asset.key.clone()))
        .cloned()
        .collect();

    ReconcilePlan {
        channel_slug: channel_slug.to_string(),
        episodes,
        to_delete,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_episode(id: &str) -> EpisodeDescriptor {
        EpisodeDescriptor {
            episode_id: id.to_string(),
            title: format!("Episode {id}"),
            description: String::new(),
            source_url: format!("https://www.youtube.com/watch?v={id}"),
            published_at: None,
            duration: None,
        }
    }

    fn stored(key: &str) -> StoredAsset {
        StoredAsset {
            key: AssetKey::from_observed(key),
            download_url: format!("https://store.example/{key}"),
            size_bytes: 1000,
        }
    }

    fn ids(planned: &[&PlannedEpisode]) -> Vec<String> {
        planned.iter().map(|p| p.episode.episode_id.clone()).collect()
    }

    fn keys(assets: &[StoredAsset]) -> Vec<String> {
        assets.iter().map(|a| a.key.to_string()).collect()
    }

    /// Simulate a run where every fetch succeeds; returns the next observed state
    fn apply(plan: &ReconcilePlan, observed: &[StoredAsset]) -> (Vec<StoredAsset>, Vec<EpisodeFeedEntry>) {
        let uploaded: HashMap<AssetKey, StoredAsset> = plan
            .to_fetch()
            .iter()
            .map(|p| (p.key.clone(), stored(p.key.as_str())))
            .collect();

        let mut next: Vec<StoredAsset> = observed
            .iter()
            .filter(|a| !plan.to_delete.contains(a))
            .cloned()
            .collect();
        next.extend(uploaded.values().cloned());

        (next, plan.final_list(&uploaded))
    }

    #[test]
    fn scenario_partial_store_fetches_missing() {
        let desired = vec![make_episode("v1"), make_episode("v2"), make_episode("v3")];
        let observed = vec![stored("chan_v1.mp3")];

        let plan = reconcile("chan", &desired, &observed);

        assert_eq!(ids(&plan.to_reuse()), vec!["v1"]);
        assert_eq!(ids(&plan.to_fetch()), vec!["v2", "v3"]);
        assert!(plan.to_delete.is_empty());
    }

    #[test]
    fn scenario_aged_out_episode_is_deleted() {
        let desired = vec![make_episode("v2"), make_episode("v3")];
        let observed = vec![stored("chan_v1.mp3"), stored("chan_v2.mp3")];

        let plan = reconcile("chan", &desired, &observed);

        assert_eq!(ids(&plan.to_reuse()), vec!["v2"]);
        assert_eq!(ids(&plan.to_fetch()), vec!["v3"]);
        assert_eq!(keys(&plan.to_delete), vec!["chan_v1.mp3"]);
    }

    #[test]
    fn scenario_full_store_is_a_fixed_point() {
        let desired: Vec<_> = (1..=5).map(|i| make_episode(&format!("v{i}"))).collect();
        let observed: Vec<_> = (1..=5).map(|i| stored(&format!("chan_v{i}.mp3"))).collect();

        let plan = reconcile("chan", &desired, &observed);

        assert!(plan.is_noop());
        assert_eq!(plan.to_reuse().len(), 5);
        let final_list = plan.final_list(&HashMap::new());
        assert_eq!(final_list.len(), 5);
        assert_eq!(final_list[0].download_url, "https://store.example/chan_v1.mp3");
    }

    #[test]
    fn second_run_without_upstream_change_is_noop() {
        let desired = vec![make_episode("v2"), make_episode("v3"), make_episode("v4")];
        let observed = vec![stored("chan_v1.mp3"), stored("chan_v2.mp3"), stored("other_v9.mp3")];

        let first = reconcile("chan", &desired, &observed);
        assert!(!first.is_noop());

        let (observed, first_list) = apply(&first, &observed);
        let second = reconcile("chan", &desired, &observed);

        assert!(second.is_noop());
        assert_eq!(second.final_list(&HashMap::new()), first_list);
    }

    #[test]
    fn stored_episodes_are_never_fetched() {
        let desired = vec![make_episode("a"), make_episode("b")];
        let observed = vec![stored("chan_a.mp3"), stored("chan_b.mp3")];

        let plan = reconcile("chan", &desired, &observed);

        assert!(plan.to_fetch().is_empty());
    }

    #[test]
    fn other_channels_are_never_deleted() {
        let desired = vec![make_episode("v1")];
        let observed = vec![
            stored("chan_v1.mp3"),
            stored("chan_v0.mp3"),
            stored("chan2_v0.mp3"),
            stored("chan-b_v0.mp3"),
            stored("other_v0.mp3"),
            stored("chan_notes.txt"),
        ];

        let plan = reconcile("chan", &desired, &observed);

        assert_eq!(keys(&plan.to_delete), vec!["chan_v0.mp3"]);
    }

    #[test]
    fn failed_fetch_is_dropped_but_not_deleted() {
        let desired = vec![make_episode("v1"), make_episode("v2")];
        let observed = vec![stored("chan_v1.mp3")];

        let plan = reconcile("chan", &desired, &observed);
        let final_list = plan.final_list(&HashMap::new());

        assert_eq!(final_list.len(), 1);
        assert_eq!(final_list[0].episode.episode_id, "v1");
        assert!(plan.to_delete.is_empty());
    }

    #[test]
    fn final_list_keeps_desired_order() {
        let desired = vec![make_episode("v3"), make_episode("v2"), make_episode("v1")];
        let observed = vec![stored("chan_v1.mp3")];

        let plan = reconcile("chan", &desired, &observed);
        let (_, final_list) = apply(&plan, &observed);

        let order: Vec<_> = final_list.iter().map(|e| e.episode.episode_id.as_str()).collect();
        assert_eq!(order, vec!["v3", "v2", "v1"]);
    }

    #[test]
    fn edited_titles_still_reuse_the_asset() {
        let mut edited = make_episode("v1");
        edited.title = "A brand new title".to_string();
        let observed = vec![stored("chan_v1.mp3")];

        let plan = reconcile("chan", &[edited], &observed);
        let final_list = plan.final_list(&HashMap::new());

        assert!(plan.is_noop());
        assert_eq!(final_list[0].episode.title, "A brand new title");
    }

    #[test]
    fn duplicate_desired_ids_are_planned_once() {
        let desired = vec![make_episode("v1"), make_episode("v1"), make_episode("v2")];

        let plan = reconcile("chan", &desired, &[]);

        assert_eq!(ids(&plan.to_fetch()), vec!["v1", "v2"]);
    }

    #[test]
    fn empty_channel_deletes_everything_it_owns() {
        let observed = vec![stored("chan_v1.mp3"), stored("other_v1.mp3")];

        let plan = reconcile("chan", &[], &observed);

        assert_eq!(keys(&plan.to_delete), vec!["chan_v1.mp3"]);
        assert!(plan.final_list(&HashMap::new()).is_empty());
    }

    #[test]
    fn desired_set_dedupes_and_truncates() {
        let episodes = vec![
            make_episode("v1"),
            make_episode("v1"),
            make_episode("v2"),
            make_episode("v3"),
        ];

        let desired = desired_set(episodes, 2);

        let ids: Vec<_> = desired.iter().map(|e| e.episode_id.as_str()).collect();
        assert_eq!(ids, vec!["v1", "v2"]);
    }
}
