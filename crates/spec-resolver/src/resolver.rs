//! The resolution pipeline.
//!
//! URL or markup → fetch → render → detect generator → follow meta-refresh /
//! single-page redirects (bounded) → [`ResolvedDocument`].
//!
//! Redirects are followed by looping with a hop counter rather than
//! recursing; every iteration opens a fresh render session and closes it
//! before the next one starts.

use crate::config::Config;
use crate::detect::{self, Generator};
use crate::document::SpecDocument;
use crate::error::{ResolveError, Result};
use crate::fetcher::{FetchOptions, Fetcher, HttpFetcher};
use crate::redirect::{self, NextHop};
use crate::renderer::chromium::ChromiumRenderer;
use crate::renderer::{self, Renderer, StaticRenderer};
use scraper::Html;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use url::Url;

/// Input to a resolution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecRequest {
    /// Fetch the document at this URL.
    Url(String),
    /// Use this markup. `url` is where it was declared to live and
    /// `response_url` where it was actually served from.
    Html {
        html: String,
        url: Option<String>,
        response_url: Option<String>,
    },
}

impl SpecRequest {
    /// In-memory markup with no location.
    pub fn html(html: impl Into<String>) -> Self {
        SpecRequest::Html {
            html: html.into(),
            url: None,
            response_url: None,
        }
    }

    /// In-memory markup located at `url`.
    pub fn html_at(html: impl Into<String>, url: impl Into<String>) -> Self {
        SpecRequest::Html {
            html: html.into(),
            url: Some(url.into()),
            response_url: None,
        }
    }
}

impl From<&str> for SpecRequest {
    fn from(url: &str) -> Self {
        SpecRequest::Url(url.to_string())
    }
}

impl From<String> for SpecRequest {
    fn from(url: String) -> Self {
        SpecRequest::Url(url)
    }
}

impl From<&Url> for SpecRequest {
    fn from(url: &Url) -> Self {
        SpecRequest::Url(url.to_string())
    }
}

/// The terminal artifact of the pipeline.
#[derive(Debug, Clone)]
pub struct ResolvedDocument {
    pub document: SpecDocument,
    pub generator: Generator,
    /// Number of redirect / single-page hops taken.
    pub hops: u32,
    /// Where the final document was served from, if it has a location.
    pub url: Option<Url>,
}

/// Markup plus where it came from, ready to render.
struct Source {
    markup: String,
    requested: Option<Url>,
    response_url: Url,
}

/// Composes fetcher, renderer, detector and redirect resolver.
pub struct Resolver {
    fetcher: Arc<dyn Fetcher>,
    renderer: Arc<dyn Renderer>,
    options: FetchOptions,
    render_timeout: Duration,
    max_hops: u32,
}

/// Builder for [`Resolver`].
pub struct ResolverBuilder {
    fetcher: Option<Arc<dyn Fetcher>>,
    renderer: Option<Arc<dyn Renderer>>,
    options: FetchOptions,
    render_timeout: Duration,
    max_hops: u32,
}

impl ResolverBuilder {
    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Options passed to every top-level fetch.
    pub fn fetch_options(mut self, options: FetchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn render_timeout(mut self, timeout: Duration) -> Self {
        self.render_timeout = timeout;
        self
    }

    pub fn max_hops(mut self, max_hops: u32) -> Self {
        self.max_hops = max_hops;
        self
    }

    /// Build, defaulting to an [`HttpFetcher`] and a [`StaticRenderer`].
    pub fn build(self) -> Resolver {
        Resolver {
            fetcher: self
                .fetcher
                .unwrap_or_else(|| Arc::new(HttpFetcher::new(crate::fetcher::http_client::DEFAULT_TIMEOUT_MS))),
            renderer: self.renderer.unwrap_or_else(|| Arc::new(StaticRenderer::new())),
            options: self.options,
            render_timeout: self.render_timeout,
            max_hops: self.max_hops,
        }
    }
}

impl Resolver {
    pub fn builder() -> ResolverBuilder {
        ResolverBuilder {
            fetcher: None,
            renderer: None,
            options: FetchOptions::default(),
            render_timeout: renderer::DEFAULT_RENDER_TIMEOUT,
            max_hops: crate::config::DEFAULT_MAX_HOPS,
        }
    }

    /// Resolver wired from `config`: an [`HttpFetcher`] and headless
    /// Chromium, or the static renderer when Chromium cannot be launched.
    pub async fn from_config(config: &Config) -> Resolver {
        let options = FetchOptions::from_config(config);
        let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::from_config(config));

        let renderer: Arc<dyn Renderer> =
            match ChromiumRenderer::launch(config, Arc::clone(&fetcher), options.clone()).await {
                Ok(chromium) => {
                    info!("Chromium renderer initialized");
                    Arc::new(chromium)
                }
                Err(e) => {
                    warn!("Failed to initialize Chromium: {e:#}");
                    warn!("Running in static mode (ReSpec documents will not be rendered)");
                    Arc::new(StaticRenderer::new())
                }
            };

        Resolver::builder()
            .fetcher(fetcher)
            .renderer(renderer)
            .fetch_options(options)
            .render_timeout(Duration::from_secs(config.render_timeout_secs))
            .max_hops(config.max_hops)
            .build()
    }

    pub fn renderer(&self) -> &Arc<dyn Renderer> {
        &self.renderer
    }

    /// Resolve `request` into its final rendered document.
    pub async fn resolve(&self, request: impl Into<SpecRequest>) -> Result<ResolvedDocument> {
        let mut request = request.into();
        let mut hop = 0u32;
        let mut chain: Vec<String> = Vec::new();

        loop {
            if hop >= self.max_hops {
                return Err(ResolveError::RedirectLoop { hops: hop, chain });
            }

            let source = self.load(request).await?;
            chain.push(source.response_url.to_string());

            let (markup, generator) = self.render(&source).await?;

            let next = redirect::next_hop(
                &Html::parse_document(&markup),
                source.requested.as_ref(),
                &source.response_url,
            );

            match next {
                NextHop::Follow { target, reason } => {
                    info!(
                        "{} -> {target} ({reason:?}, hop {})",
                        source.response_url,
                        hop + 1
                    );
                    hop += 1;
                    request = SpecRequest::Url(target.into());
                }
                NextHop::Stay => {
                    info!("resolved {} as {generator} after {hop} hop(s)", source.response_url);
                    let url = (!is_placeholder(&source.response_url)).then_some(source.response_url);
                    return Ok(ResolvedDocument {
                        document: SpecDocument::parse(renderer::strip_bom(&markup), url.clone()),
                        generator,
                        hops: hop,
                        url,
                    });
                }
            }
        }
    }

    async fn load(&self, request: SpecRequest) -> Result<Source> {
        match request {
            SpecRequest::Url(raw) => {
                let requested = parse_url(&raw)?;
                let fetched = self.fetcher.fetch(requested.as_str(), &self.options).await?;
                let response_url = parse_url(&fetched.final_url)?;
                Ok(Source {
                    markup: fetched.body,
                    requested: Some(requested),
                    response_url,
                })
            }
            SpecRequest::Html {
                html,
                url,
                response_url,
            } => {
                let requested = url.as_deref().map(parse_url).transpose()?;
                let response_url = match response_url.as_deref() {
                    Some(raw) => parse_url(raw)?,
                    None => requested.clone().unwrap_or_else(placeholder_url),
                };
                Ok(Source {
                    markup: html,
                    requested,
                    response_url,
                })
            }
        }
    }

    /// One render attempt: open a session, classify it, snapshot its markup
    /// and close it, whatever the outcome.
    async fn render(&self, source: &Source) -> Result<(String, Generator)> {
        let session =
            renderer::render(self.renderer.as_ref(), &source.markup, &source.response_url).await?;
        debug!("session opened for {}", source.response_url);

        let outcome = match detect::detect(session.as_ref(), self.render_timeout).await {
            Ok(generator) => session.html().await.map(|markup| (markup, generator)),
            Err(e) => Err(e),
        };

        match session.close().await {
            Ok(()) => debug!("session closed for {}", source.response_url),
            Err(e) => warn!("failed to close session for {}: {e}", source.response_url),
        }
        outcome
    }
}

fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| ResolveError::invalid_url(raw, e))
}

fn placeholder_url() -> Url {
    Url::parse("about:blank").expect("about:blank is a valid URL")
}

fn is_placeholder(url: &Url) -> bool {
    url.scheme() == "about"
}

static DEFAULT_RESOLVER: OnceCell<Resolver> = OnceCell::const_new();

/// Resolve a specification with the process-wide configuration.
///
/// The first call loads the configuration and launches the renderer; later
/// calls reuse them. Embedders that run several tokio runtimes, or need
/// their own fetcher, should build a [`Resolver`] instead.
pub async fn resolve_specification(request: impl Into<SpecRequest>) -> Result<ResolvedDocument> {
    let config = Config::global()?;
    let resolver = DEFAULT_RESOLVER
        .get_or_init(|| Resolver::from_config(config))
        .await;
    resolver.resolve(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_conversions() {
        assert_eq!(
            SpecRequest::from("https://example.org/"),
            SpecRequest::Url("https://example.org/".into())
        );
        assert_eq!(
            SpecRequest::html_at("<p>", "https://example.org/"),
            SpecRequest::Html {
                html: "<p>".into(),
                url: Some("https://example.org/".into()),
                response_url: None
            }
        );
    }

    #[tokio::test]
    async fn test_html_without_location_uses_placeholder() {
        let resolver = Resolver::builder().build();
        let resolved = resolver
            .resolve(SpecRequest::html("<html><body><p>static</p></body></html>"))
            .await
            .unwrap();
        assert_eq!(resolved.generator, Generator::Unknown);
        assert_eq!(resolved.hops, 0);
        assert!(resolved.document.url().is_none());
        assert!(resolved.url.is_none());
    }

    #[tokio::test]
    async fn test_invalid_url_is_reported() {
        let resolver = Resolver::builder().build();
        let err = resolver.resolve("not a url").await.unwrap_err();
        assert!(matches!(err, ResolveError::InvalidUrl { .. }));
    }
}
