// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Method;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::sync::OnceCell;
use tracing::{debug, info};
use url::Url;

use super::{AssetStore, StoredAsset};
use crate::episode::{AUDIO_MIME_TYPE, AssetKey};
use crate::error::StoreError;
use crate::http::{HttpClient, HttpRequest, ReqwestClient};

const DEFAULT_API_BASE: &str = "https://api.github.com/";
const DEFAULT_UPLOADS_BASE: &str = "https://uploads.github.com/";
const API_VERSION: &str = "2022-11-28";
const PAGE_SIZE: usize = 100;
const MAX_ERROR_BODY: usize = 500;

/// Where the shared namespace lives
#[derive(Debug, Clone)]
pub struct GithubStoreConfig {
    /// `owner/name`
    pub repository: String,
    /// Tag of the release holding every asset
    pub release_tag: String,
    pub token: Option<String>,
    /// Per-request timeout of the underlying HTTP client
    pub request_timeout: Duration,
    pub api_base: Url,
    pub uploads_base: Url,
}

impl GithubStoreConfig {
    /// Configuration against github.com
    pub fn new(repository: &str, release_tag: &str, token: Option<String>) -> Result<Self, StoreError> {
        Ok(Self {
            repository: repository.to_string(),
            release_tag: release_tag.to_string(),
            token,
            request_timeout: Duration::from_secs(300),
            api_base: Url::parse(DEFAULT_API_BASE)?,
            uploads_base: Url::parse(DEFAULT_UPLOADS_BASE)?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ApiRelease {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct ApiAsset {
    id: u64,
    name: String,
    size: u64,
    browser_download_url: String,
}

impl ApiAsset {
    fn to_stored(&self) -> StoredAsset {
        StoredAsset {
            key: AssetKey::from_observed(self.name.clone()),
            download_url: self.browser_download_url.clone(),
            size_bytes: self.size,
        }
    }
}

/// Asset store backed by the assets of a single GitHub release
pub struct GithubReleaseStore<C = ReqwestClient> {
    client: C,
    config: GithubStoreConfig,
    release_id: OnceCell<u64>,
    asset_ids: Mutex<HashMap<String, u64>>,
}

impl GithubReleaseStore<ReqwestClient> {
    /// Create a store; the release is resolved (or created) on first use
    pub fn new(config: GithubStoreConfig) -> Result<Self, StoreError> {
        let client = ReqwestClient::new(config.request_timeout).map_err(|e| StoreError::HttpFailed {
            operation: "client setup",
            source: e,
        })?;

        Ok(Self::with_client(client, config))
    }
}

impl<C: HttpClient> GithubReleaseStore<C> {
    /// Create a store that talks through a custom HTTP client
    pub fn with_client(client: C, config: GithubStoreConfig) -> Self {
        Self {
            client,
            config,
            release_id: OnceCell::new(),
            asset_ids: Mutex::new(HashMap::new()),
        }
    }

    fn request(&self, method: Method, url: Url) -> HttpRequest {
        let request = HttpRequest::new(method, url)
            .header("accept", "application/vnd.github+json")
            .header("x-github-api-version", API_VERSION);

        match &self.config.token {
            Some(token) => request.header("authorization", format!("Bearer {token}")),
            None => request,
        }
    }

    async fn send(&self, operation: &'static str, request: HttpRequest) -> Result<(u16, Bytes), StoreError> {
        let response = self
            .client
            .send(request)
            .await
            .map_err(|e| StoreError::HttpFailed {
                operation,
                source: e,
            })?;
        Ok((response.status, response.body))
    }

    async fn release_id(&self) -> Result<u64, StoreError> {
        self.release_id
            .get_or_try_init(|| self.resolve_release())
            .await
            .copied()
    }

    async fn resolve_release(&self) -> Result<u64, StoreError> {
        let url = release_by_tag_url(&self.config)?;
        let (status, body) = self
            .send("get release", self.request(Method::GET, url))
            .await?;

        if status != 404 {
            let release: ApiRelease = decode("get release", &check_status("get release", status, body)?)?;
            return Ok(release.id);
        }

        info!(tag = %self.config.release_tag, "release not found, creating it");
        let payload = serde_json::json!({
            "tag_name": self.config.release_tag,
            "name": "Audio Downloads",
            "body": "Automated audio mirror",
            "draft": false,
            "prerelease": false,
        });
        let payload = serde_json::to_vec(&payload).map_err(|e| StoreError::DecodeFailed {
            operation: "create release",
            source: e,
        })?;

        let url = releases_url(&self.config)?;
        let (status, body) = self
            .send(
                "create release",
                self.request(Method::POST, url)
                    .header("content-type", "application/json")
                    .body(payload),
            )
            .await?;
        let release: ApiRelease = decode("create release", &check_status("create release", status, body)?)?;
        Ok(release.id)
    }

    async fn list_api_assets(&self) -> Result<Vec<ApiAsset>, StoreError> {
        let release_id = self.release_id().await?;
        let mut assets = Vec::new();
        let mut page = 1;

        loop {
            let url = assets_page_url(&self.config, release_id, page)?;
            let (status, body) = self
                .send("list assets", self.request(Method::GET, url))
                .await?;
            let batch: Vec<ApiAsset> = decode("list assets", &check_status("list assets", status, body)?)?;
            let count = batch.len();
            assets.extend(batch);

            if count < PAGE_SIZE {
                break;
            }
            page += 1;
        }

        if let Ok(mut ids) = self.asset_ids.lock() {
            ids.clear();
            ids.extend(assets.iter().map(|a| (a.name.clone(), a.id)));
        }

        debug!(count = assets.len(), "listed release assets");
        Ok(assets)
    }

    fn cached_id(&self, key: &AssetKey) -> Option<u64> {
        self.asset_ids
            .lock()
            .ok()
            .and_then(|ids| ids.get(key.as_str()).copied())
    }

    fn remember(&self, asset: &ApiAsset) {
        if let Ok(mut ids) = self.asset_ids.lock() {
            ids.insert(asset.name.clone(), asset.id);
        }
    }

    fn forget(&self, key: &AssetKey) {
        if let Ok(mut ids) = self.asset_ids.lock() {
            ids.remove(key.as_str());
        }
    }
}

#[async_trait]
impl<C: HttpClient> AssetStore for GithubReleaseStore<C> {
    async fn list(&self) -> Result<Vec<StoredAsset>, StoreError> {
        let assets = self.list_api_assets().await?;
        Ok(assets.iter().map(ApiAsset::to_stored).collect())
    }

    async fn upload(&self, key: &AssetKey, local_file: &Path) -> Result<StoredAsset, StoreError> {
        let release_id = self.release_id().await?;
        let data = tokio::fs::read(local_file)
            .await
            .map_err(|e| StoreError::ReadFailed {
                path: local_file.to_path_buf(),
                source: e,
            })?;

        let url = upload_url(&self.config, release_id, key)?;
        let (status, body) = self
            .send(
                "upload asset",
                self.request(Method::POST, url)
                    .header("content-type", AUDIO_MIME_TYPE)
                    .body(data),
            )
            .await?;

        if is_already_exists(status, &body) {
            info!(%key, "asset already uploaded, reusing it");
            return self
                .list_api_assets()
                .await?
                .iter()
                .find(|a| a.name == key.as_str())
                .map(ApiAsset::to_stored)
                .ok_or_else(|| StoreError::MissingAfterConflict {
                    key: key.to_string(),
                });
        }

        let asset: ApiAsset = decode("upload asset", &check_status("upload asset", status, body)?)?;
        self.remember(&asset);
        Ok(asset.to_stored())
    }

    async fn delete(&self, key: &AssetKey) -> Result<bool, StoreError> {
        let asset_id = match self.cached_id(key) {
            Some(id) => id,
            None => {
                self.list_api_assets().await?;
                match self.cached_id(key) {
                    Some(id) => id,
                    None => return Ok(false),
                }
            }
        };

        let url = asset_url(&self.config, asset_id)?;
        let (status, body) = self
            .send("delete asset", self.request(Method::DELETE, url))
            .await?;
        self.forget(key);

        if status == 404 {
            return Ok(false);
        }
        check_status("delete asset", status, body)?;
        Ok(true)
    }
}

fn releases_url(config: &GithubStoreConfig) -> Result<Url, StoreError> {
    Ok(config
        .api_base
        .join(&format!("repos/{}/releases", config.repository))?)
}

fn release_by_tag_url(config: &GithubStoreConfig) -> Result<Url, StoreError> {
    Ok(config.api_base.join(&format!(
        "repos/{}/releases/tags/{}",
        config.repository, config.release_tag
    ))?)
}

fn assets_page_url(config: &GithubStoreConfig, release_id: u64, page: usize) -> Result<Url, StoreError> {
    let mut url = config.api_base.join(&format!(
        "repos/{}/releases/{}/assets",
        config.repository, release_id
    ))?;
    url.query_pairs_mut()
        .append_pair("per_page", &PAGE_SIZE.to_string())
        .append_pair("page", &page.to_string());
    Ok(url)
}

fn upload_url(config: &GithubStoreConfig, release_id: u64, key: &AssetKey) -> Result<Url, StoreError> {
    let mut url = config.uploads_base.join(&format!(
        "repos/{}/releases/{}/assets",
        config.repository, release_id
    ))?;
    url.query_pairs_mut().append_pair("name", key.as_str());
    Ok(url)
}

fn asset_url(config: &GithubStoreConfig, asset_id: u64) -> Result<Url, StoreError> {
    Ok(config.api_base.join(&format!(
        "repos/{}/releases/assets/{}",
        config.repository, asset_id
    ))?)
}

fn check_status(operation: &'static str, status: u16, body: Bytes) -> Result<Bytes, StoreError> {
    if (200..300).contains(&status) {
        return Ok(body);
    }

    Err(StoreError::HttpStatus {
        operation,
        status,
        body: String::from_utf8_lossy(&body).chars().take(MAX_ERROR_BODY).collect(),
    })
}

fn decode<T: DeserializeOwned>(operation: &'static str, body: &[u8]) -> Result<T, StoreError> {
    serde_json::from_slice(body).map_err(|e| StoreError::DecodeFailed {
        operation,
        source: e,
    })
}

fn is_already_exists(status: u16, body: &[u8]) -> bool {
    status == 422 && String::from_utf8_lossy(body).contains("already_exists")
}
