//! HuggingFace Hub listing
//!
//! Lists models with their download counts and caches the listing on disk so
//! repeated runs within a few days do not hit the API again.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::{get_data_dir, read_json, write_json_atomic, StorageError};
use crate::types::config::StatsConfig;
use crate::types::download::HubModel;

pub const HUB_URL: &str = "https://huggingface.co";

/// Hub errors
#[derive(Debug, Error)]
pub enum HubError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Hub API returned status {0}")]
    Status(reqwest::StatusCode),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Build the HTTP client shared by hub requests
pub fn build_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(120))
        .user_agent(concat!("hf-hub-stats/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// One entry of an `/api/models` page
///
/// Pages carry both `id` and the legacy `modelId`; older responses only the latter.
#[derive(Debug, Deserialize)]
struct ApiModel {
    #[serde(default)]
    id: Option<String>,
    #[serde(default, rename = "modelId")]
    legacy_id: Option<String>,
    #[serde(default)]
    downloads: Option<i64>,
}

impl ApiModel {
    fn into_hub_model(self) -> Option<HubModel> {
        let model_id = self.id.or(self.legacy_id)?;
        Some(HubModel::new(model_id, self.downloads))
    }
}

/// Client for the model listing endpoint
pub struct HubClient {
    client: reqwest::Client,
    base_url: String,
}

impl HubClient {
    pub fn new() -> Result<Self, HubError> {
        Ok(Self {
            client: build_client()?,
            base_url: HUB_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Fetch the listing page by page, up to `config.max_models` models
    pub async fn list_models(&self, config: &StatsConfig) -> Result<Vec<HubModel>, HubError> {
        let mut url = format!(
            "{}/api/models?library={}&sort=downloads&direction=-1&limit={}",
            self.base_url, config.library, config.page_size
        );
        let mut models = Vec::new();

        loop {
            tracing::debug!("Fetching {}", url);
            let response = self.client.get(&url).send().await?;
            if !response.status().is_success() {
                return Err(HubError::Status(response.status()));
            }

            let next = response
                .headers()
                .get(reqwest::header::LINK)
                .and_then(|value| value.to_str().ok())
                .and_then(next_page);

            let page: Vec<ApiModel> = response.json().await?;
            let fetched = page.len();
            models.extend(page.into_iter().filter_map(ApiModel::into_hub_model));
            tracing::info!("Fetched {} models ({} total)", fetched, models.len());

            match next {
                Some(next) if fetched > 0 && models.len() < config.max_models => url = next,
                _ => break,
            }
        }

        models.truncate(config.max_models);
        Ok(models)
    }
}

/// Extract the `rel="next"` target from a `Link` header
fn next_page(link: &str) -> Option<String> {
    link.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        let is_next = params
            .split(';')
            .any(|param| param.trim().replace(' ', "") == "rel=\"next\"");
        if !is_next {
            return None;
        }
        let target = target.trim().strip_prefix('<')?.strip_suffix('>')?;
        Some(target.to_string())
    })
}

/// Drop models without downloads and duplicates, then sort by downloads
pub fn prepare_listing(models: Vec<HubModel>) -> Vec<HubModel> {
    let mut seen = HashSet::new();
    let mut models: Vec<HubModel> = models
        .into_iter()
        .filter(|model| model.downloads.is_some())
        .filter(|model| seen.insert(model.model_id.clone()))
        .collect();
    models.sort_by(|a, b| b.downloads.cmp(&a.downloads));
    models
}

pub fn model_ids(models: &[HubModel]) -> Vec<String> {
    models.iter().map(|model| model.model_id.clone()).collect()
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedListing {
    fetched_at: DateTime<Utc>,
    models: Vec<HubModel>,
}

fn cache_path() -> Result<PathBuf, StorageError> {
    Ok(get_data_dir()?.join("hub_cache").join("all_models.json"))
}

/// Read a cached listing if it is at most `expire_days` old
fn load_cached(
    path: &Path,
    expire_days: i64,
    now: DateTime<Utc>,
) -> Result<Option<Vec<HubModel>>, StorageError> {
    let Some(cached) = read_json::<CachedListing>(path)? else {
        tracing::info!("Querying model list");
        return Ok(None);
    };

    let age = (now - cached.fetched_at).num_days();
    if age <= expire_days {
        tracing::info!("Using cached model list (queried {} days ago)", age);
        Ok(Some(cached.models))
    } else {
        tracing::info!("Updating cached model list (queried {} days ago)", age);
        Ok(None)
    }
}

fn store_cached(path: &Path, models: &[HubModel], now: DateTime<Utc>) -> Result<(), StorageError> {
    let listing = CachedListing {
        fetched_at: now,
        models: models.to_vec(),
    };
    write_json_atomic(path, &listing)
}

/// List hub models sorted by downloads, using the on-disk cache when fresh
pub async fn query_hub(config: &StatsConfig) -> Result<Vec<HubModel>, HubError> {
    let path = cache_path()?;
    let now = Utc::now();

    match load_cached(&path, config.cache_expire_days, now) {
        Ok(Some(models)) => return Ok(models),
        Ok(None) => {}
        Err(e) => tracing::warn!("Ignoring unreadable hub cache {}: {}", path.display(), e),
    }

    let models = prepare_listing(HubClient::new()?.list_models(config).await?);
    if let Err(e) = store_cached(&path, &models, now) {
        tracing::warn!("Failed to cache the model list: {}", e);
    }
    Ok(models)
}
