//! Resource gate: decides which secondary resources a rendering session loads.
//!
//! Rendering only needs the ReSpec engine and the spec's own supporting
//! scripts. Everything else (stylesheets, images, trackers, widgets known to
//! crash headless rendering) is skipped without touching the network.
//!
//! Rules, first match wins:
//! 1. a ReSpec bootstrap script is replaced by the pinned build, patched
//! 2. a path with an extension other than `.js` / `.json` is skipped
//! 3. allow-listed helpers, and scripts at or below the referring document's
//!    directory that match no deny-listed fragment, are fetched unchanged
//! 4. anything else is skipped

use crate::config::Config;
use regex::Regex;
use std::sync::OnceLock;
use url::Url;

/// ReSpec build served in place of whatever version a spec asks for.
pub const PINNED_RESPEC_URL: &str = "https://cdn.jsdelivr.net/npm/respec@35.1.1/builds/respec-w3c.js";

/// Helper scripts that are loaded wherever they are hosted.
pub const DEFAULT_ALLOWED_SCRIPTS: &[&str] = &[
    "https://www.w3.org/Tools/respec/respec-highlight",
    "https://www.w3.org/scripts/TR/2021/fixup.js",
];

/// Path fragments of same-directory scripts that must not run.
const DENIED_FRAGMENTS: &[&str] = &[
    "/annotate.js",
    "/expanders.js",
    "/bug-assist.js",
    "/dfn.js",
    "/section-links.js",
    "/termdefs/",
];

fn respec_bootstrap_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)/respec-w3c(?:-common)?(?:\.js)?$").expect("respec bootstrap regex is valid")
    })
}

/// Content transform applied to a fetched resource before the renderer sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    /// Compensate for headless-rendering gaps in the ReSpec bundle.
    PatchRespec,
}

impl Transform {
    pub fn apply(self, source: &str) -> String {
        match self {
            Transform::PatchRespec => patch_respec(source),
        }
    }
}

/// What to do with a requested secondary resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourcePolicyDecision {
    /// Do not touch the network; hand the renderer an empty body.
    Skip,
    /// Fetch `url` (possibly rewritten) and apply `transform` to the text.
    Fetch {
        url: Url,
        transform: Option<Transform>,
    },
}

impl ResourcePolicyDecision {
    fn fetch(url: Url) -> Self {
        Self::Fetch {
            url,
            transform: None,
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Skip)
    }
}

/// Context of a resource request.
#[derive(Debug, Clone, Copy)]
pub struct GateContext<'a> {
    /// URL of the document that triggered the request.
    pub referrer_url: &'a Url,
}

/// Allow-list policy over secondary resource loads.
#[derive(Debug, Clone)]
pub struct ResourceGate {
    respec_url: Url,
    allowed_scripts: Vec<String>,
}

impl Default for ResourceGate {
    fn default() -> Self {
        Self {
            respec_url: Url::parse(PINNED_RESPEC_URL).expect("pinned ReSpec URL is valid"),
            allowed_scripts: DEFAULT_ALLOWED_SCRIPTS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ResourceGate {
    /// Gate with the pinned engine URL and allow-list extended from `config`.
    pub fn from_config(config: &Config) -> Self {
        let mut gate = Self::default();
        if let Some(url) = config.respec_url.as_deref() {
            match Url::parse(url) {
                Ok(parsed) => gate.respec_url = parsed,
                Err(e) => tracing::warn!("ignoring invalid respecUrl {url:?}: {e}"),
            }
        }
        gate.allowed_scripts.extend(config.allowed_scripts.iter().cloned());
        gate
    }

    pub fn respec_url(&self) -> &Url {
        &self.respec_url
    }

    /// Decide what to do with a request for `requested`.
    pub fn decide(&self, requested: &Url, ctx: GateContext<'_>) -> ResourcePolicyDecision {
        let path = requested.path();

        if respec_bootstrap_re().is_match(path) {
            return ResourcePolicyDecision::Fetch {
                url: self.respec_url.clone(),
                transform: Some(Transform::PatchRespec),
            };
        }

        if let Some(ext) = extension(path) {
            if !ext.eq_ignore_ascii_case("js") && !ext.eq_ignore_ascii_case("json") {
                return ResourcePolicyDecision::Skip;
            }
        }

        if self.is_allowed_helper(requested) {
            return ResourcePolicyDecision::fetch(requested.clone());
        }

        if is_below(requested, ctx.referrer_url) && !is_denied(path) {
            return ResourcePolicyDecision::fetch(requested.clone());
        }

        ResourcePolicyDecision::Skip
    }

    /// URL to use for page-level `fetch()`/XHR traffic: only the engine
    /// rewrite applies, everything else is fetched as requested.
    pub fn rewrite_for_fetch(&self, requested: &Url) -> (Url, Option<Transform>) {
        if respec_bootstrap_re().is_match(requested.path()) {
            (self.respec_url.clone(), Some(Transform::PatchRespec))
        } else {
            (requested.clone(), None)
        }
    }

    fn is_allowed_helper(&self, requested: &Url) -> bool {
        let mut bare = requested.clone();
        bare.set_fragment(None);
        self.allowed_scripts.iter().any(|allowed| allowed == bare.as_str())
    }
}

/// Extension of the last path segment, if any.
fn extension(path: &str) -> Option<&str> {
    let segment = path.rsplit('/').next().unwrap_or("");
    let (stem, ext) = segment.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext)
}

/// Whether `requested` sits at or below the directory of `referrer`.
fn is_below(requested: &Url, referrer: &Url) -> bool {
    if requested.origin() != referrer.origin() {
        return false;
    }
    let referrer_path = referrer.path();
    let dir = match referrer_path.rfind('/') {
        Some(idx) => &referrer_path[..=idx],
        None => "/",
    };
    requested.path().starts_with(dir)
}

fn is_denied(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    DENIED_FRAGMENTS.iter().any(|fragment| lower.contains(fragment))
}

fn patch_respec(source: &str) -> String {
    static HIGHLIGHT: OnceLock<Regex> = OnceLock::new();
    static SUPPORTS_GRID: OnceLock<Regex> = OnceLock::new();
    static SUPPORTS_STICKY: OnceLock<Regex> = OnceLock::new();

    // core/highlight spins up a Web Worker
    let highlight = HIGHLIGHT.get_or_init(|| {
        Regex::new(r#",\s*"core/highlight"|"core/highlight"\s*,?"#).expect("highlight regex is valid")
    });
    let grid = SUPPORTS_GRID.get_or_init(|| {
        Regex::new(r"@supports\s*\(\s*display\s*:\s*grid\s*\)").expect("grid regex is valid")
    });
    let sticky = SUPPORTS_STICKY.get_or_init(|| {
        Regex::new(r"@supports\s*\(\s*position\s*:\s*sticky\s*\)").expect("sticky regex is valid")
    });

    let patched = highlight.replace_all(source, "");
    let patched = grid.replace_all(&patched, "@media all");
    let patched = sticky.replace_all(&patched, "@media all");
    patched
        .replace(".innerText", ".textContent")
        .replace("document.scrollingElement", "document.documentElement")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn decide(requested: &str, referrer: &str) -> ResourcePolicyDecision {
        let referrer = url(referrer);
        ResourceGate::default().decide(
            &url(requested),
            GateContext {
                referrer_url: &referrer,
            },
        )
    }

    #[test]
    fn test_same_directory_script_is_fetched_unchanged() {
        let d = decide(
            "https://w3c.github.io/webrtc-pc/js/fixup.js",
            "https://w3c.github.io/webrtc-pc/",
        );
        assert_eq!(
            d,
            ResourcePolicyDecision::Fetch {
                url: url("https://w3c.github.io/webrtc-pc/js/fixup.js"),
                transform: None
            }
        );
    }

    #[test]
    fn test_extensionless_script_below_referrer_is_fetched() {
        let d = decide("https://example.org/spec/script", "https://example.org/spec/index.html");
        assert!(!d.is_skip());
    }

    #[test]
    fn test_stylesheet_is_skipped() {
        let d = decide(
            "https://w3c.github.io/webrtc-pc/style.css",
            "https://w3c.github.io/webrtc-pc/",
        );
        assert_eq!(d, ResourcePolicyDecision::Skip);
    }

    #[test]
    fn test_respec_bootstrap_is_pinned_for_any_version() {
        for requested in [
            "https://www.w3.org/Tools/respec/respec-w3c-common",
            "https://www.w3.org/Tools/respec/respec-w3c",
            "https://cdn.jsdelivr.net/npm/respec@20.0.0/builds/respec-w3c.js",
            "https://w3c.github.io/respec/builds/respec-w3c-common.js",
        ] {
            let d = decide(requested, "https://w3c.github.io/payment-request/");
            assert_eq!(
                d,
                ResourcePolicyDecision::Fetch {
                    url: url(PINNED_RESPEC_URL),
                    transform: Some(Transform::PatchRespec)
                },
                "{requested}"
            );
        }
    }

    #[test]
    fn test_denied_helpers_are_skipped() {
        for script in ["annotate.js", "expanders.js", "bug-assist.js", "dfn.js", "section-links.js"] {
            let d = decide(
                &format!("https://example.org/spec/{script}"),
                "https://example.org/spec/",
            );
            assert!(d.is_skip(), "{script}");
        }
        let d = decide(
            "https://example.org/spec/termdefs/terms.js",
            "https://example.org/spec/",
        );
        assert!(d.is_skip());
    }

    #[test]
    fn test_cross_origin_script_is_skipped() {
        let d = decide(
            "https://www.googletagmanager.com/gtag/js",
            "https://example.org/spec/",
        );
        assert!(d.is_skip());
    }

    #[test]
    fn test_script_above_referrer_directory_is_skipped() {
        let d = decide("https://example.org/shared/util.js", "https://example.org/spec/index.html");
        assert!(d.is_skip());
    }

    #[test]
    fn test_allow_listed_helper_is_fetched_anywhere() {
        let d = decide(
            "https://www.w3.org/Tools/respec/respec-highlight",
            "https://example.org/spec/",
        );
        assert!(!d.is_skip());
    }

    #[test]
    fn test_config_overrides_engine_url_and_allow_list() {
        let config = Config {
            respec_url: Some("https://example.org/respec-pinned.js".into()),
            allowed_scripts: vec!["https://cdn.example.net/mathjax.js".into()],
            ..Config::default()
        };
        let gate = ResourceGate::from_config(&config);
        let referrer = url("https://w3c.github.io/spec/");
        let ctx = GateContext {
            referrer_url: &referrer,
        };
        assert_eq!(gate.respec_url().as_str(), "https://example.org/respec-pinned.js");
        assert!(!gate.decide(&url("https://cdn.example.net/mathjax.js"), ctx).is_skip());
    }

    #[test]
    fn test_patch_respec() {
        let source = r#"define(["core/base-runner","core/highlight","ui/dfn-list"]);
.x{} @supports (display: grid) { .toc {} } @supports (position:sticky) { .h {} }
el.innerText = "a"; document.scrollingElement.scrollTop = 0;"#;
        let patched = Transform::PatchRespec.apply(source);
        assert!(!patched.contains("core/highlight"));
        assert!(patched.contains(r#"["core/base-runner","ui/dfn-list"]"#));
        assert!(!patched.contains("@supports"));
        assert_eq!(patched.matches("@media all").count(), 2);
        assert!(patched.contains("el.textContent"));
        assert!(patched.contains("document.documentElement.scrollTop"));
        // Applying twice changes nothing further
        assert_eq!(Transform::PatchRespec.apply(&patched), patched);
    }

    #[test]
    fn test_fetch_rewrite_only_touches_engine() {
        let gate = ResourceGate::default();
        let (u, t) = gate.rewrite_for_fetch(&url("https://example.org/data/refs.json"));
        assert_eq!(u.as_str(), "https://example.org/data/refs.json");
        assert!(t.is_none());
        let (u, t) = gate.rewrite_for_fetch(&url("https://www.w3.org/Tools/respec/respec-w3c"));
        assert_eq!(u.as_str(), PINNED_RESPEC_URL);
        assert_eq!(t, Some(Transform::PatchRespec));
    }
}
