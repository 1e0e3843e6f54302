//! Structural-only renderer.
//!
//! Runs no scripts and loads no subresources: the session document is the
//! markup as given. Documents that depend on ReSpec come back unrendered, so
//! this mode is only used when Chromium is unavailable or for static specs.

use super::{RenderSession, Renderer};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::warn;
use url::Url;

/// Renderer that keeps documents as static markup.
#[derive(Debug, Default)]
pub struct StaticRenderer {
    active_count: Arc<AtomicUsize>,
}

impl StaticRenderer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Renderer for StaticRenderer {
    async fn open(&self, markup: &str, base_url: &Url) -> Result<Box<dyn RenderSession>> {
        self.active_count.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(StaticSession {
            markup: markup.to_string(),
            base_url: base_url.clone(),
            active_count: Arc::clone(&self.active_count),
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    fn active_sessions(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }
}

/// Session over a fixed markup string.
pub struct StaticSession {
    markup: String,
    base_url: Url,
    active_count: Arc<AtomicUsize>,
}

#[async_trait]
impl RenderSession for StaticSession {
    fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn html(&self) -> Result<String> {
        Ok(self.markup.clone())
    }

    async fn engine_ready(&self) -> Result<()> {
        warn!(
            "{} needs ReSpec but scripts are disabled; using unrendered markup",
            self.base_url
        );
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.active_count.fetch_sub(1, Ordering::Relaxed);
        Ok(())
    }
}
