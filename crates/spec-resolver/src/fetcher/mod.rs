//! Fetcher abstraction.
//!
//! Defines the `Fetcher` trait the pipeline and the renderer use for every
//! network access, the per-call `FetchOptions` and the refresh policy. The
//! default implementation is [`http_client::HttpFetcher`].

pub mod http_client;
pub mod store;

use crate::config::Config;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

pub use http_client::HttpFetcher;

/// Outcome of retrieving a URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchResult {
    /// URL after HTTP-level redirects.
    pub final_url: String,
    /// HTTP status code.
    pub status: u16,
    /// Response body as text.
    pub body: String,
}

/// When a stored response may be served instead of hitting the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "RawRefresh", into = "RawRefresh")]
pub enum Refresh {
    /// Hit the network at most once per URL per run.
    #[default]
    Once,
    /// Always hit the network.
    Force,
    /// Serve any stored response, however old.
    Never,
    /// Serve stored responses younger than this many seconds.
    MaxAge(u64),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawRefresh {
    Seconds(u64),
    Name(String),
}

impl TryFrom<RawRefresh> for Refresh {
    type Error = String;

    fn try_from(raw: RawRefresh) -> std::result::Result<Self, Self::Error> {
        match raw {
            RawRefresh::Seconds(secs) => Ok(Refresh::MaxAge(secs)),
            RawRefresh::Name(name) => name.parse(),
        }
    }
}

impl From<Refresh> for RawRefresh {
    fn from(refresh: Refresh) -> Self {
        match refresh {
            Refresh::MaxAge(secs) => RawRefresh::Seconds(secs),
            other => RawRefresh::Name(other.to_string()),
        }
    }
}

impl FromStr for Refresh {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "once" | "default" => Ok(Refresh::Once),
            "force" => Ok(Refresh::Force),
            "never" => Ok(Refresh::Never),
            other => other
                .parse::<u64>()
                .map(Refresh::MaxAge)
                .map_err(|_| format!("unknown refresh policy: {s}")),
        }
    }
}

impl fmt::Display for Refresh {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Refresh::Once => f.write_str("once"),
            Refresh::Force => f.write_str("force"),
            Refresh::Never => f.write_str("never"),
            Refresh::MaxAge(secs) => write!(f, "{secs}"),
        }
    }
}

/// Per-call fetch options. Unset fields fall back to the configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOptions {
    pub cache_folder: Option<PathBuf>,
    pub reset_cache: Option<bool>,
    pub refresh: Option<Refresh>,
    pub log_to_console: Option<bool>,
}

impl FetchOptions {
    /// Options carrying every value of `config`.
    pub fn from_config(config: &Config) -> Self {
        Self {
            cache_folder: config.cache_folder.clone(),
            reset_cache: Some(config.reset_cache),
            refresh: Some(config.cache_refresh),
            log_to_console: Some(config.log_to_console),
        }
    }

    /// Overlay `self` on `base`: fields set here win.
    pub fn merged_over(&self, base: &FetchOptions) -> FetchOptions {
        FetchOptions {
            cache_folder: self.cache_folder.clone().or_else(|| base.cache_folder.clone()),
            reset_cache: self.reset_cache.or(base.reset_cache),
            refresh: self.refresh.or(base.refresh),
            log_to_console: self.log_to_console.or(base.log_to_console),
        }
    }

    pub fn with_refresh(mut self, refresh: Refresh) -> Self {
        self.refresh = Some(refresh);
        self
    }

    pub(crate) fn refresh_policy(&self) -> Refresh {
        self.refresh.unwrap_or_default()
    }
}

/// The network/cache collaborator.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Retrieve `url`. Fails with [`crate::ResolveError::Network`] on transport
    /// errors and non-success statuses; never retries.
    async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<FetchResult>;
}
