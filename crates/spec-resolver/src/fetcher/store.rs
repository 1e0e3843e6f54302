//! Persistent response store under the configured cache folder.
//!
//! Each entry is a pair of files named after the URL: `<stem>.body` with the
//! response text and `<stem>.json` with its metadata. Entries are written to a
//! uniquely named temporary file and renamed into place, so concurrent writers
//! for the same URL never leave a torn entry behind.

use super::FetchResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::PathBuf;
use url::Url;

/// Metadata stored next to each response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntryMeta {
    url: String,
    final_url: String,
    status: u16,
    fetched_at: DateTime<Utc>,
}

/// A response read back from the store.
#[derive(Debug, Clone)]
pub struct StoredResponse {
    pub result: FetchResult,
    pub fetched_at: DateTime<Utc>,
}

impl StoredResponse {
    /// Age of the entry in whole seconds.
    pub fn age_secs(&self) -> u64 {
        let age = Utc::now().signed_duration_since(self.fetched_at);
        u64::try_from(age.num_seconds()).unwrap_or(0)
    }
}

/// File-backed response store.
#[derive(Debug, Clone)]
pub struct ResponseStore {
    dir: PathBuf,
}

impl ResponseStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Look up the stored response for `url`.
    ///
    /// A stem collision between two URLs reads as a miss.
    pub fn get(&self, url: &str) -> Option<StoredResponse> {
        let stem = entry_stem(url);
        let meta_raw = fs::read_to_string(self.dir.join(format!("{stem}.json"))).ok()?;
        let meta: EntryMeta = serde_json::from_str(&meta_raw).ok()?;
        if meta.url != url {
            return None;
        }
        let body = fs::read_to_string(self.dir.join(format!("{stem}.body"))).ok()?;
        Some(StoredResponse {
            result: FetchResult {
                final_url: meta.final_url,
                status: meta.status,
                body,
            },
            fetched_at: meta.fetched_at,
        })
    }

    /// Store `result` as the response for `url`.
    pub fn put(&self, url: &str, result: &FetchResult) -> io::Result<()> {
        let stem = entry_stem(url);
        let meta = EntryMeta {
            url: url.to_string(),
            final_url: result.final_url.clone(),
            status: result.status,
            fetched_at: Utc::now(),
        };
        let meta_json = serde_json::to_string(&meta).map_err(io::Error::other)?;

        // Body first: a reader only trusts the body once the metadata exists.
        self.write_atomic(&format!("{stem}.body"), result.body.as_bytes())?;
        self.write_atomic(&format!("{stem}.json"), meta_json.as_bytes())
    }

    /// Remove every entry.
    pub fn clear(&self) -> io::Result<()> {
        for entry in fs::read_dir(&self.dir)?.flatten() {
            let path = entry.path();
            if path.is_file() {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    fn write_atomic(&self, name: &str, contents: &[u8]) -> io::Result<()> {
        let tmp = self
            .dir
            .join(format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple()));
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, self.dir.join(name)).inspect_err(|_| {
            let _ = fs::remove_file(&tmp);
        })
    }
}

/// Filename-safe stem for a URL: host, path and query with separators folded.
pub fn entry_stem(url: &str) -> String {
    let raw = match Url::parse(url) {
        Ok(parsed) => {
            let mut stem = String::new();
            if let Some(host) = parsed.host_str() {
                stem.push_str(&host.to_ascii_lowercase());
            }
            stem.push_str(&parsed[url::Position::BeforePath..url::Position::AfterQuery]);
            stem
        }
        Err(_) => url.to_string(),
    };

    let mut sanitized: String = raw
        .trim_end_matches('/')
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    while sanitized.ends_with('_') {
        sanitized.pop();
    }
    if sanitized.is_empty() {
        sanitized.push_str("index");
    }
    sanitized
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(body: &str) -> FetchResult {
        FetchResult {
            final_url: "https://www.w3.org/TR/dom/".into(),
            status: 200,
            body: body.into(),
        }
    }

    #[test]
    fn test_entry_stem() {
        assert_eq!(
            entry_stem("https://WWW.W3.org/TR/css-grid-1/"),
            "www.w3.org_TR_css-grid-1"
        );
        assert_eq!(
            entry_stem("https://example.org/spec?v=2#intro"),
            "example.org_spec_v_2"
        );
    }

    #[test]
    fn test_put_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResponseStore::open(dir.path()).unwrap();
        store.put("https://www.w3.org/TR/dom", &sample("<p>dom</p>")).unwrap();

        let stored = store.get("https://www.w3.org/TR/dom").unwrap();
        assert_eq!(stored.result.body, "<p>dom</p>");
        assert_eq!(stored.result.final_url, "https://www.w3.org/TR/dom/");
        assert!(stored.age_secs() < 5);
    }

    #[test]
    fn test_stem_collision_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResponseStore::open(dir.path()).unwrap();
        store.put("https://example.org/a/b", &sample("one")).unwrap();
        assert!(store.get("https://example.org/a_b").is_none());
    }

    #[test]
    fn test_clear_removes_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResponseStore::open(dir.path()).unwrap();
        store.put("https://example.org/", &sample("x")).unwrap();
        store.clear().unwrap();
        assert!(store.get("https://example.org/").is_none());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
