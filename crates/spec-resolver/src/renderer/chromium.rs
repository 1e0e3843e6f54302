//! Chromium-based renderer using chromiumoxide.
//!
//! Every request a session makes is paused over CDP. The main document is
//! answered with the markup handed to [`Renderer::open`], page-level
//! `fetch()`/XHR traffic goes straight through the [`Fetcher`], and every
//! other subresource is first put to the [`ResourceGate`].

use super::{scripts, RenderSession, Renderer};
use crate::config::Config;
use crate::error::{ResolveError, Result};
use crate::fetcher::{FetchOptions, Fetcher};
use crate::gate::{GateContext, ResourceGate, ResourcePolicyDecision, Transform};
use anyhow::Context;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::fetch;
use chromiumoxide::cdp::browser_protocol::network;
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::page::Page;
use futures::{Stream, StreamExt};
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

/// Bound on the initial navigation (main document plus `load`).
pub const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Placeholder host for documents that have no network location.
const LOCAL_HOST: &str = "document.spec-resolver.invalid";

/// Find the Chromium binary path.
pub fn find_chromium(config: &Config) -> Option<PathBuf> {
    // 1. Explicit config
    if let Some(path) = config.chromium_path.as_ref() {
        if path.exists() {
            return Some(path.clone());
        }
    }

    // 2. SPEC_RESOLVER_CHROMIUM_PATH env
    if let Ok(p) = std::env::var("SPEC_RESOLVER_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    // 3. ~/.spec-resolver/chromium/
    if let Some(home) = dirs::home_dir() {
        let candidates = [
            home.join(".spec-resolver/chromium/chrome-linux64/chrome"),
            home.join(".spec-resolver/chromium/chrome"),
        ];
        if let Some(found) = candidates.into_iter().find(|c| c.exists()) {
            return Some(found);
        }
    }

    // 4. System PATH
    for name in ["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    // 5. Common macOS location
    if cfg!(target_os = "macos") {
        let common = PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// Chromium-based renderer.
pub struct ChromiumRenderer {
    browser: Browser,
    loader: Arc<Loader>,
    active_count: Arc<AtomicUsize>,
}

/// Shared by every session: how subresources get loaded.
struct Loader {
    fetcher: Arc<dyn Fetcher>,
    gate: ResourceGate,
    options: FetchOptions,
}

impl ChromiumRenderer {
    /// Launch a headless Chromium whose sessions load through `fetcher`.
    pub async fn launch(
        config: &Config,
        fetcher: Arc<dyn Fetcher>,
        options: FetchOptions,
    ) -> anyhow::Result<Self> {
        let chrome_path = find_chromium(config)
            .context("Chromium not found; set chromiumPath or SPEC_RESOLVER_CHROMIUM_PATH")?;

        let browser_config = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-background-networking")
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .context("failed to launch Chromium")?;

        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        Ok(Self {
            browser,
            loader: Arc::new(Loader {
                fetcher,
                gate: ResourceGate::from_config(config),
                options,
            }),
            active_count: Arc::new(AtomicUsize::new(0)),
        })
    }
}

fn render_err(what: &str) -> impl FnOnce(chromiumoxide::error::CdpError) -> ResolveError + '_ {
    move |e| ResolveError::Render(format!("{what}: {e}"))
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn open(&self, markup: &str, base_url: &Url) -> Result<Box<dyn RenderSession>> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(render_err("failed to create page"))?;

        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(scripts::SESSION_INIT))
            .await
            .map_err(render_err("failed to install session shims"))?;

        self.active_count.fetch_add(1, Ordering::Relaxed);
        let mut session = ChromiumSession {
            page: page.clone(),
            base_url: base_url.clone(),
            interceptor: None,
            active_count: Arc::clone(&self.active_count),
        };

        let document_url = document_url_for(base_url);
        let responder = Responder {
            loader: Arc::clone(&self.loader),
            document_url: document_url.clone(),
            markup: Arc::from(markup),
            main_served: AtomicBool::new(false),
        };
        let loaded = match spawn_interceptor(&page, responder).await {
            Ok(handle) => {
                session.interceptor = Some(handle);
                navigate(&page, &document_url).await
            }
            Err(e) => Err(e),
        };

        match loaded {
            Ok(()) => Ok(Box::new(session)),
            Err(e) => {
                let _ = Box::new(session).close().await;
                Err(e)
            }
        }
    }

    async fn shutdown(&self) -> Result<()> {
        // Browser is dropped when ChromiumRenderer is dropped
        Ok(())
    }

    fn active_sessions(&self) -> usize {
        self.active_count.load(Ordering::Relaxed)
    }
}

/// Where the session document is served from.
///
/// Documents without a network location (raw markup, local files) are served
/// at a placeholder origin so that their requests are still intercepted.
fn document_url_for(base_url: &Url) -> Url {
    if matches!(base_url.scheme(), "http" | "https") {
        return base_url.clone();
    }
    let name = base_url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .unwrap_or("index.html");
    Url::parse(&format!("http://{LOCAL_HOST}/"))
        .and_then(|origin| origin.join(name))
        .unwrap_or_else(|_| Url::parse(&format!("http://{LOCAL_HOST}/index.html")).expect("placeholder URL is valid"))
}

async fn navigate(page: &Page, document_url: &Url) -> Result<()> {
    match tokio::time::timeout(NAVIGATION_TIMEOUT, page.goto(document_url.as_str())).await {
        Ok(Ok(_)) => {
            let _ = page.wait_for_navigation().await;
            Ok(())
        }
        Ok(Err(e)) => Err(ResolveError::Render(format!("navigation to {document_url} failed: {e}"))),
        Err(_) => Err(ResolveError::Render(format!(
            "navigation to {document_url} timed out after {}s",
            NAVIGATION_TIMEOUT.as_secs()
        ))),
    }
}

async fn spawn_interceptor(page: &Page, responder: Responder) -> Result<JoinHandle<()>> {
    page.execute(fetch::EnableParams {
        patterns: Some(vec![fetch::RequestPattern {
            url_pattern: Some("*".to_string()),
            resource_type: None,
            request_stage: Some(fetch::RequestStage::Request),
        }]),
        handle_auth_requests: Some(false),
    })
    .await
    .map_err(render_err("failed to enable request interception"))?;

    let paused = page
        .event_listener::<fetch::EventRequestPaused>()
        .await
        .map_err(render_err("failed to subscribe to paused requests"))?;

    let requests = paused.map(|event| PausedRequest {
        id: event.request_id.clone(),
        url: event.request.url.clone(),
        resource_type: event.resource_type.clone(),
    });
    let page = page.clone();
    let send = move |id: fetch::RequestId, answer: Answer| {
        let page = page.clone();
        async move { reply(&page, id, answer).await }
    };

    Ok(tokio::spawn(answer_all(requests, Arc::new(responder), send)))
}

/// A paused request, reduced to what answering it needs.
struct PausedRequest {
    id: fetch::RequestId,
    url: String,
    resource_type: network::ResourceType,
}

/// Answer every request as it arrives; a slow one does not hold up the rest.
async fn answer_all<S, R, Fut>(requests: S, responder: Arc<Responder>, send: R)
where
    S: Stream<Item = PausedRequest>,
    R: Fn(fetch::RequestId, Answer) -> Fut + Clone,
    Fut: Future<Output = ()>,
{
    requests
        .for_each_concurrent(None, |request| {
            let responder = Arc::clone(&responder);
            let send = send.clone();
            async move {
                let answer = responder.answer(&request.url, &request.resource_type).await;
                send(request.id, answer).await;
            }
        })
        .await;
}

/// How a paused request is completed.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Answer {
    /// Let the browser handle it (non-network schemes).
    Continue,
    Fulfill {
        status: u16,
        content_type: &'static str,
        body: String,
    },
    /// Refuse the request.
    Block,
}

/// Decides the answer to every request a session makes.
struct Responder {
    loader: Arc<Loader>,
    document_url: Url,
    markup: Arc<str>,
    main_served: AtomicBool,
}

impl Responder {
    async fn answer(&self, raw_url: &str, resource_type: &network::ResourceType) -> Answer {
        let requested = match Url::parse(raw_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => url,
            // data:, blob: and friends never touch the network
            _ => return Answer::Continue,
        };

        if matches!(resource_type, network::ResourceType::Document) {
            return self.answer_document(&requested);
        }

        if requested.host_str() == Some(LOCAL_HOST) {
            debug!("no network location for {requested}");
            return Answer::Block;
        }

        match resource_type {
            network::ResourceType::Fetch | network::ResourceType::Xhr => {
                let (url, transform) = self.loader.gate.rewrite_for_fetch(&requested);
                self.load(&url, transform).await
            }
            _ => {
                let decision = self.loader.gate.decide(
                    &requested,
                    GateContext {
                        referrer_url: &self.document_url,
                    },
                );
                debug!("gate {requested}: {decision:?}");
                match decision {
                    ResourcePolicyDecision::Skip => Answer::Fulfill {
                        status: 200,
                        content_type: content_type_for(&requested),
                        body: String::new(),
                    },
                    ResourcePolicyDecision::Fetch { url, transform } => self.load(&url, transform).await,
                }
            }
        }
    }

    fn answer_document(&self, requested: &Url) -> Answer {
        let is_main = same_document(requested, &self.document_url)
            && !self.main_served.swap(true, Ordering::SeqCst);
        if is_main {
            Answer::Fulfill {
                status: 200,
                content_type: "text/html; charset=utf-8",
                body: self.markup.to_string(),
            }
        } else {
            // Frames and in-page navigations are not followed; redirects are
            // resolved by the pipeline after the render.
            debug!("blocking navigation to {requested}");
            Answer::Block
        }
    }

    async fn load(&self, url: &Url, transform: Option<Transform>) -> Answer {
        match self.loader.fetcher.fetch(url.as_str(), &self.loader.options).await {
            Ok(result) => Answer::Fulfill {
                status: result.status,
                content_type: content_type_for(url),
                body: match transform {
                    Some(t) => t.apply(&result.body),
                    None => result.body,
                },
            },
            Err(e) => {
                warn!("subresource {url} for {} failed: {e}", self.document_url);
                Answer::Block
            }
        }
    }
}

async fn reply(page: &Page, request_id: fetch::RequestId, answer: Answer) {
    let sent = match answer {
        Answer::Continue => page
            .execute(fetch::ContinueRequestParams::new(request_id))
            .await
            .map(|_| ()),
        Answer::Fulfill {
            status,
            content_type,
            body,
        } => {
            let response_headers = vec![
                fetch::HeaderEntry {
                    name: "Content-Type".to_string(),
                    value: content_type.to_string(),
                },
                fetch::HeaderEntry {
                    name: "Content-Length".to_string(),
                    value: body.len().to_string(),
                },
            ];
            page.execute(fetch::FulfillRequestParams {
                request_id,
                response_code: i64::from(status),
                response_headers: Some(response_headers),
                binary_response_headers: None,
                body: Some(STANDARD.encode(body.as_bytes()).into()),
                response_phrase: None,
            })
            .await
            .map(|_| ())
        }
        Answer::Block => page
            .execute(fetch::FailRequestParams {
                request_id,
                error_reason: network::ErrorReason::BlockedByClient,
            })
            .await
            .map(|_| ()),
    };
    if let Err(e) = sent {
        debug!("paused request already gone: {e}");
    }
}

/// Whether two URLs name the same document, ignoring fragments.
fn same_document(a: &Url, b: &Url) -> bool {
    let mut a = a.clone();
    let mut b = b.clone();
    a.set_fragment(None);
    b.set_fragment(None);
    a == b
}

fn content_type_for(url: &Url) -> &'static str {
    let path = url.path().to_ascii_lowercase();
    if path.ends_with(".json") {
        "application/json; charset=utf-8"
    } else if path.ends_with(".html") || path.ends_with(".htm") {
        "text/html; charset=utf-8"
    } else if path.ends_with(".css") {
        "text/css; charset=utf-8"
    } else {
        "application/javascript; charset=utf-8"
    }
}

/// A single Chromium page holding one spec document.
pub struct ChromiumSession {
    page: Page,
    base_url: Url,
    interceptor: Option<JoinHandle<()>>,
    active_count: Arc<AtomicUsize>,
}

#[async_trait]
impl RenderSession for ChromiumSession {
    fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn html(&self) -> Result<String> {
        let result = self
            .page
            .evaluate(scripts::OUTER_HTML)
            .await
            .map_err(render_err("failed to get HTML"))?;

        result
            .into_value::<String>()
            .map_err(|e| ResolveError::Render(format!("failed to convert HTML result: {e:?}")))
    }

    async fn declares_engine_config(&self) -> Result<bool> {
        self.page
            .evaluate(scripts::DECLARES_ENGINE_CONFIG)
            .await
            .map_err(render_err("failed to inspect ReSpec configuration"))?
            .into_value::<bool>()
            .map_err(|e| ResolveError::Render(format!("failed to convert configuration check: {e:?}")))
    }

    async fn engine_ready(&self) -> Result<()> {
        let params = EvaluateParams::builder()
            .expression(scripts::ENGINE_READY)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(|e| ResolveError::Render(format!("invalid readiness check: {e}")))?;

        self.page
            .evaluate_expression(params)
            .await
            .map_err(render_err("ReSpec readiness check failed"))?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.active_count.fetch_sub(1, Ordering::Relaxed);
        if let Some(handle) = self.interceptor {
            handle.abort();
        }
        let _ = self.page.close().await;
        Ok(())
    }
}
