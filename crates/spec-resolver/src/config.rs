//! Process-wide configuration loading and resolution.
//!
//! The configuration file is optional. Lookup order:
//! 1. an explicit path (e.g. from the command line)
//! 2. the `SPEC_RESOLVER_CONFIG` environment variable
//! 3. `config.json` in the current working directory
//!
//! A missing file yields [`Config::default`], except an explicit path, which
//! must exist. A file that exists but does not parse is a
//! [`ResolveError::Config`].

use crate::error::{ResolveError, Result};
use crate::fetcher::Refresh;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::warn;

/// Environment variable naming an alternate configuration file.
pub const CONFIG_ENV: &str = "SPEC_RESOLVER_CONFIG";

/// Default configuration file name, relative to the working directory.
pub const CONFIG_FILE: &str = "config.json";

/// Default bound on how long a templating engine may take to finish.
pub const DEFAULT_RENDER_TIMEOUT_SECS: u64 = 30;

/// Default bound on meta-refresh / single-page re-entries.
pub const DEFAULT_MAX_HOPS: u32 = 5;

static GLOBAL: OnceLock<Config> = OnceLock::new();

/// Resolver configuration, read once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Directory of the persistent response store. `None` keeps responses in
    /// memory for the current run only.
    pub cache_folder: Option<PathBuf>,
    /// Wipe the response store before the first fetch of the run.
    pub reset_cache: bool,
    /// Refresh policy applied when a call does not override it.
    pub cache_refresh: Refresh,
    /// Log fetches at `info` rather than `debug`.
    pub log_to_console: bool,
    /// Seconds to wait for a templating engine to signal completion.
    pub render_timeout_secs: u64,
    /// Maximum number of redirect / single-page hops.
    pub max_hops: u32,
    /// Pinned ReSpec build served in place of any requested version.
    pub respec_url: Option<String>,
    /// Extra helper scripts that may always be loaded.
    pub allowed_scripts: Vec<String>,
    /// Explicit Chromium executable.
    pub chromium_path: Option<PathBuf>,
    /// User-Agent sent by the fetcher.
    pub user_agent: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_folder: None,
            reset_cache: false,
            cache_refresh: Refresh::default(),
            log_to_console: false,
            render_timeout_secs: DEFAULT_RENDER_TIMEOUT_SECS,
            max_hops: DEFAULT_MAX_HOPS,
            respec_url: None,
            allowed_scripts: Vec::new(),
            chromium_path: None,
            user_agent: None,
        }
    }
}

impl Config {
    /// Load the configuration, tolerating a missing file.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match resolve_config_path(explicit) {
            Some(path) => Self::from_file(&path),
            None => Ok(Self::default()),
        }
    }

    /// Parse a configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| ResolveError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&raw).map_err(|e| ResolveError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// The process-wide configuration, loaded from disk on first use.
    pub fn global() -> Result<&'static Config> {
        if let Some(config) = GLOBAL.get() {
            return Ok(config);
        }
        let loaded = Self::load(None)?;
        Ok(GLOBAL.get_or_init(|| loaded))
    }
}

/// Find the configuration file to read, if any.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        let path = PathBuf::from(&env_path);
        if path.exists() {
            return Some(path);
        }
        if !env_path.is_empty() {
            warn!("{CONFIG_ENV} names missing file {env_path}; ignoring it");
        }
    }

    let cwd_config = PathBuf::from(CONFIG_FILE);
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.render_timeout_secs, 30);
        assert_eq!(config.max_hops, 5);
        assert_eq!(config.cache_refresh, Refresh::Once);
        assert!(!config.reset_cache);
    }

    #[test]
    fn test_parse_camel_case_keys() {
        let config: Config = serde_json::from_str(
            r#"{
                "cacheFolder": ".cache",
                "resetCache": true,
                "cacheRefresh": "force",
                "logToConsole": true,
                "maxHops": 3
            }"#,
        )
        .unwrap();
        assert_eq!(config.cache_folder, Some(PathBuf::from(".cache")));
        assert!(config.reset_cache);
        assert_eq!(config.cache_refresh, Refresh::Force);
        assert!(config.log_to_console);
        assert_eq!(config.max_hops, 3);
        // Unspecified keys keep their defaults
        assert_eq!(config.render_timeout_secs, 30);
    }

    #[test]
    fn test_numeric_refresh_is_max_age() {
        let config: Config = serde_json::from_str(r#"{"cacheRefresh": 3600}"#).unwrap();
        assert_eq!(config.cache_refresh, Refresh::MaxAge(3600));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let err = Config::load(Some(Path::new("/nonexistent/spec-resolver.json"))).unwrap_err();
        assert!(matches!(err, ResolveError::Config { .. }));
    }

    #[test]
    fn test_missing_env_config_is_tolerated() {
        let missing = "/nonexistent/spec-resolver-env.json";
        std::env::set_var(CONFIG_ENV, missing);
        let resolved = resolve_config_path(None);
        std::env::remove_var(CONFIG_ENV);
        assert_ne!(resolved, Some(PathBuf::from(missing)));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, ResolveError::Config { .. }));
    }
}
