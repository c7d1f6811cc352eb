// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod github;

use std::path::Path;

use async_trait::async_trait;

use crate::episode::AssetKey;
use crate::error::StoreError;

pub use github::{GithubReleaseStore, GithubStoreConfig};

/// An asset currently present in the shared namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAsset {
    pub key: AssetKey,
    pub download_url: String,
    pub size_bytes: u64,
}

/// The shared asset namespace (one release, one bucket, ...)
///
/// A store instance is bound to a single namespace; every channel shares it.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Every asset currently committed to the namespace
    async fn list(&self) -> Result<Vec<StoredAsset>, StoreError>;

    /// Upload `local_file` under `key`. An existing `key` is a successful
    /// no-op that returns the asset already stored.
    async fn upload(&self, key: &AssetKey, local_file: &Path) -> Result<StoredAsset, StoreError>;

    /// Delete `key`. Returns `false` when there was nothing to delete.
    async fn delete(&self, key: &AssetKey) -> Result<bool, StoreError>;
}
