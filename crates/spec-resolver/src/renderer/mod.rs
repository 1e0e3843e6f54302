//! Renderer abstraction for spec rendering sessions.
//!
//! Defines the `Renderer` and `RenderSession` traits that abstract over the
//! sandboxed document environment. Two engines are provided:
//! - [`chromium::ChromiumRenderer`]: headless Chromium with every request
//!   routed through the resource gate and the fetcher
//! - [`static_html::StaticRenderer`]: reduced-fidelity mode, no scripts run

pub mod chromium;
pub mod scripts;
pub mod static_html;

use crate::error::{ResolveError, Result};
use async_trait::async_trait;
use std::time::Duration;
use url::Url;

pub use static_html::StaticRenderer;

/// Byte-order mark some spec sources are saved with.
pub const BOM: char = '\u{feff}';

/// Default bound on the templating engine's completion wait.
pub const DEFAULT_RENDER_TIMEOUT: Duration = Duration::from_secs(30);

/// A document environment that can open rendering sessions.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Load `markup` as the document at `base_url` and return once the
    /// environment's `load` event has fired.
    async fn open(&self, markup: &str, base_url: &Url) -> Result<Box<dyn RenderSession>>;
    /// Shut down the engine.
    async fn shutdown(&self) -> Result<()>;
    /// Number of sessions currently open.
    fn active_sessions(&self) -> usize;
}

/// One sandboxed document, owned by a single resolution attempt.
#[async_trait]
pub trait RenderSession: Send + Sync {
    /// Location the document was loaded at. Fixed for the session lifetime.
    fn base_url(&self) -> &Url;
    /// Serialized markup of the current document.
    async fn html(&self) -> Result<String>;
    /// Whether the document has defined a ReSpec configuration, wherever the
    /// script that defines it came from. Defaults to a scan of the markup.
    async fn declares_engine_config(&self) -> Result<bool> {
        Ok(self.html().await?.contains("respecConfig"))
    }
    /// Resolve once the templating engine has finished processing.
    ///
    /// Not bounded here; use [`wait_for_engine`].
    async fn engine_ready(&self) -> Result<()>;
    /// Tear the session down.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Strip a leading byte-order mark.
pub fn strip_bom(markup: &str) -> &str {
    markup.strip_prefix(BOM).unwrap_or(markup)
}

/// Open a session on `markup`, stripping any byte-order mark first.
pub async fn render(
    renderer: &dyn Renderer,
    markup: &str,
    base_url: &Url,
) -> Result<Box<dyn RenderSession>> {
    renderer.open(strip_bom(markup), base_url).await
}

/// Wait for the engine completion signal, failing after `timeout`.
pub async fn wait_for_engine(session: &dyn RenderSession, timeout: Duration) -> Result<()> {
    match tokio::time::timeout(timeout, session.engine_ready()).await {
        Ok(result) => result,
        Err(_) => Err(ResolveError::RenderTimeout {
            url: session.base_url().to_string(),
            timeout,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_bom() {
        assert_eq!(strip_bom("\u{feff}<!doctype html>"), "<!doctype html>");
        assert_eq!(strip_bom("<!doctype html>"), "<!doctype html>");
        // Only one leading mark is removed
        assert_eq!(strip_bom("\u{feff}\u{feff}x"), "\u{feff}x");
    }
}
