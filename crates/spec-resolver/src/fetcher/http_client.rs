//! Async HTTP fetcher wrapping reqwest.
//!
//! Follows HTTP redirects and applies the refresh policy against a per-run
//! memo and, when a cache folder is configured, the persistent response store.
//! Does not retry: a failed request is reported to the caller as is.

use super::store::ResponseStore;
use super::{FetchOptions, FetchResult, Fetcher, Refresh};
use crate::config::Config;
use crate::error::{ResolveError, Result};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;

const DEFAULT_USER_AGENT: &str = concat!("spec-resolver/", env!("CARGO_PKG_VERSION"));

/// HTTP fetcher for specifications and their subresources.
pub struct HttpFetcher {
    client: reqwest::Client,
    defaults: FetchOptions,
    /// Responses fetched during this run, keyed by requested URL.
    memo: DashMap<String, FetchResult>,
    stores: DashMap<PathBuf, ResponseStore>,
    /// Cache folders already reset during this run.
    reset_done: DashSet<PathBuf>,
}

impl HttpFetcher {
    /// Create a fetcher with the given request timeout and no defaults.
    pub fn new(timeout_ms: u64) -> Self {
        Self::with_user_agent(timeout_ms, DEFAULT_USER_AGENT)
    }

    fn with_user_agent(timeout_ms: u64, user_agent: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .redirect(reqwest::redirect::Policy::limited(10))
            .user_agent(user_agent)
            .build()
            .unwrap_or_default();

        Self {
            client,
            defaults: FetchOptions::default(),
            memo: DashMap::new(),
            stores: DashMap::new(),
            reset_done: DashSet::new(),
        }
    }

    /// Create a fetcher whose defaults come from `config`.
    pub fn from_config(config: &Config) -> Self {
        let ua = config.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT);
        Self::with_user_agent(DEFAULT_TIMEOUT_MS, ua).with_defaults(FetchOptions::from_config(config))
    }

    /// Options used for any field a call leaves unset.
    pub fn with_defaults(mut self, defaults: FetchOptions) -> Self {
        self.defaults = defaults;
        self
    }

    fn store_for(&self, options: &FetchOptions) -> Result<Option<ResponseStore>> {
        let Some(dir) = options.cache_folder.as_ref() else {
            return Ok(None);
        };

        let store = match self.stores.get(dir) {
            Some(store) => store.clone(),
            None => {
                let store = ResponseStore::open(dir).map_err(|e| {
                    ResolveError::network(dir.display().to_string(), format!("cache folder: {e}"))
                })?;
                self.stores.insert(dir.clone(), store.clone());
                store
            }
        };

        if options.reset_cache.unwrap_or(false) && self.reset_done.insert(dir.clone()) {
            if let Err(e) = store.clear() {
                warn!("failed to reset cache folder {}: {e}", dir.display());
            }
        }

        Ok(Some(store))
    }

    fn lookup(&self, url: &str, refresh: Refresh, store: Option<&ResponseStore>) -> Option<FetchResult> {
        let memo = || self.memo.get(url).map(|entry| entry.value().clone());
        let stored = || store.and_then(|s| s.get(url));
        match refresh {
            Refresh::Force => None,
            Refresh::Once => memo(),
            Refresh::Never => memo().or_else(|| stored().map(|s| s.result)),
            Refresh::MaxAge(secs) => stored()
                .filter(|s| s.age_secs() < secs)
                .map(|s| s.result)
                .or_else(memo),
        }
    }

    async fn get(&self, url: &str) -> Result<FetchResult> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ResolveError::network(url, e))?;

        let status = resp.status();
        let final_url = resp.url().to_string();
        if !status.is_success() {
            return Err(ResolveError::network(url, format!("HTTP {}", status.as_u16())));
        }

        let body = resp.text().await.map_err(|e| ResolveError::network(url, e))?;

        Ok(FetchResult {
            final_url,
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<FetchResult> {
        let options = options.merged_over(&self.defaults);
        let verbose = options.log_to_console.unwrap_or(false);
        let refresh = options.refresh_policy();
        let store = self.store_for(&options)?;

        if let Some(hit) = self.lookup(url, refresh, store.as_ref()) {
            if verbose {
                info!("fetch {url} (cached, refresh={refresh})");
            } else {
                debug!("fetch {url} (cached, refresh={refresh})");
            }
            return Ok(hit);
        }

        if verbose {
            info!("fetch {url}");
        } else {
            debug!("fetch {url}");
        }

        let result = self.get(url).await?;
        self.memo.insert(url.to_string(), result.clone());
        if let Some(store) = store {
            if let Err(e) = store.put(url, &result) {
                warn!("failed to store response for {url}: {e}");
            }
        }
        Ok(result)
    }
}
