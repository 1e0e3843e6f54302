//! Error types for specification resolution.

use std::path::PathBuf;
use std::time::Duration;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, ResolveError>;

/// All fatal errors a resolution attempt can surface.
#[derive(thiserror::Error, Debug)]
pub enum ResolveError {
    #[error("failed to fetch {url}: {reason}")]
    Network { url: String, reason: String },

    #[error("{url} declares ReSpec but rendering did not complete within {}s", timeout.as_secs())]
    RenderTimeout { url: String, timeout: Duration },

    #[error("redirect loop detected after {hops} hops: {}", chain.join(" -> "))]
    RedirectLoop { hops: u32, chain: Vec<String> },

    #[error("render failed: {0}")]
    Render(String),

    #[error("invalid URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid selector {0:?}")]
    Selector(String),

    #[error("failed to load config {}: {reason}", path.display())]
    Config { path: PathBuf, reason: String },
}

impl ResolveError {
    pub(crate) fn network(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Network {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn invalid_url(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error came from the network layer.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redirect_loop_message_lists_chain() {
        let err = ResolveError::RedirectLoop {
            hops: 2,
            chain: vec!["https://a.test/".into(), "https://b.test/".into()],
        };
        assert_eq!(
            err.to_string(),
            "redirect loop detected after 2 hops: https://a.test/ -> https://b.test/"
        );
    }

    #[test]
    fn test_render_timeout_message() {
        let err = ResolveError::RenderTimeout {
            url: "https://w3c.github.io/spec/".into(),
            timeout: Duration::from_secs(30),
        };
        assert!(err.to_string().contains("within 30s"));
    }
}
