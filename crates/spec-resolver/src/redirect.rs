//! Meta-refresh and single-page redirection.
//!
//! Runs on the rendered document, since ReSpec may generate either kind of
//! redirect at render time.
//!
//! The single-page heuristic matches link text and can misfire on a `.head`
//! link that merely mentions "single page"; it is kept as a best-effort
//! signal.

use scraper::{Html, Selector};
use std::sync::OnceLock;
use url::Url;

/// Link texts that announce the single-page edition of a multi-page spec.
const SINGLE_PAGE_PHRASES: &[&str] = &["single page", "single file", "single-page", "one-page"];

/// Why the pipeline is re-entering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HopReason {
    MetaRefresh,
    SinglePage,
}

/// What to do after a document has rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextHop {
    /// The document is final.
    Stay,
    /// Resolve `target` instead.
    Follow { target: Url, reason: HopReason },
}

struct Selectors {
    meta_refresh: Selector,
    base: Selector,
    head_links: Selector,
}

fn selectors() -> &'static Selectors {
    static SELECTORS: OnceLock<Selectors> = OnceLock::new();
    SELECTORS.get_or_init(|| Selectors {
        meta_refresh: Selector::parse("meta[http-equiv][content]").expect("valid selector"),
        base: Selector::parse("base[href]").expect("valid selector"),
        head_links: Selector::parse(".head a[href]").expect("valid selector"),
    })
}

/// Decide whether the rendered `doc` redirects elsewhere.
///
/// `requested` is the URL the attempt asked for (if any), `response` the URL
/// the document was actually served from.
pub fn next_hop(doc: &Html, requested: Option<&Url>, response: &Url) -> NextHop {
    let base = document_base(doc, response);
    let is_current =
        |target: &Url| same_location(target, response) || requested.is_some_and(|r| same_location(target, r));

    if let Some(target) = meta_refresh_target(doc, &base) {
        if !is_current(&target) {
            return NextHop::Follow {
                target,
                reason: HopReason::MetaRefresh,
            };
        }
    }

    if let Some(target) = single_page_target(doc, &base) {
        if !is_current(&target) {
            return NextHop::Follow {
                target,
                reason: HopReason::SinglePage,
            };
        }
    }

    NextHop::Stay
}

/// Target of the first `<meta http-equiv="refresh">` carrying a URL.
pub fn meta_refresh_target(doc: &Html, base: &Url) -> Option<Url> {
    doc.select(&selectors().meta_refresh)
        .filter(|meta| {
            meta.value()
                .attr("http-equiv")
                .is_some_and(|v| v.trim().eq_ignore_ascii_case("refresh"))
        })
        .filter_map(|meta| meta.value().attr("content").and_then(parse_refresh_content))
        .find_map(|raw| base.join(&raw).ok())
}

/// Target of the first metadata-block link announcing the single-page edition.
pub fn single_page_target(doc: &Html, base: &Url) -> Option<Url> {
    doc.select(&selectors().head_links)
        .find(|link| {
            let text = link.text().collect::<String>().to_lowercase();
            SINGLE_PAGE_PHRASES.iter().any(|phrase| text.contains(phrase))
        })
        .and_then(|link| link.value().attr("href"))
        .and_then(|href| base.join(href.trim()).ok())
}

/// The URL part of a refresh `content` value: the second `;`-separated field,
/// without its `url=` prefix or surrounding quotes.
pub fn parse_refresh_content(content: &str) -> Option<String> {
    let (_, rest) = content.split_once(';')?;
    let field = rest.split(';').next().unwrap_or(rest).trim();

    let value = match field.get(..3) {
        Some(prefix) if prefix.eq_ignore_ascii_case("url") => {
            let after = field[3..].trim_start();
            after.strip_prefix('=').map(str::trim_start).unwrap_or(field)
        }
        _ => field,
    };

    let value = value.trim_matches(|c| c == '"' || c == '\'').trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Base for relative references: `<base href>` if present, else `response`.
fn document_base(doc: &Html, response: &Url) -> Url {
    doc.select(&selectors().base)
        .next()
        .and_then(|base| base.value().attr("href"))
        .and_then(|href| response.join(href.trim()).ok())
        .unwrap_or_else(|| response.clone())
}

/// Compare two URLs ignoring fragments.
pub fn same_location(a: &Url, b: &Url) -> bool {
    a[..url::Position::AfterQuery] == b[..url::Position::AfterQuery]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn hop(markup: &str, requested: Option<&str>, response: &str) -> NextHop {
        let requested = requested.map(url);
        next_hop(&Html::parse_document(markup), requested.as_ref(), &url(response))
    }

    #[test]
    fn test_parse_refresh_content() {
        assert_eq!(parse_refresh_content("0; url=next.html").as_deref(), Some("next.html"));
        assert_eq!(
            parse_refresh_content("5;URL='https://example.org/b'").as_deref(),
            Some("https://example.org/b")
        );
        assert_eq!(parse_refresh_content("0;  Url = \"c/\" ").as_deref(), Some("c/"));
        assert_eq!(parse_refresh_content("0; /plain").as_deref(), Some("/plain"));
        assert_eq!(parse_refresh_content("30"), None);
        assert_eq!(parse_refresh_content("0; url="), None);
    }

    #[test]
    fn test_meta_refresh_is_followed() {
        let next = hop(
            r#"<html><head><meta http-equiv="Refresh" content="0; url=../TR/dom/"></head></html>"#,
            Some("https://www.w3.org/old/dom"),
            "https://www.w3.org/old/dom",
        );
        assert_eq!(
            next,
            NextHop::Follow {
                target: url("https://www.w3.org/TR/dom/"),
                reason: HopReason::MetaRefresh
            }
        );
    }

    #[test]
    fn test_meta_refresh_to_self_is_ignored() {
        let next = hop(
            r#"<meta http-equiv="refresh" content="300; url=https://example.org/spec/#top">"#,
            Some("https://example.org/old"),
            "https://example.org/spec/",
        );
        assert_eq!(next, NextHop::Stay);
    }

    #[test]
    fn test_meta_refresh_without_url_is_ignored() {
        let next = hop(
            r#"<meta http-equiv="refresh" content="60">"#,
            None,
            "https://example.org/spec/",
        );
        assert_eq!(next, NextHop::Stay);
    }

    #[test]
    fn test_single_page_link_is_followed() {
        let markup = r#"<html><body><div class="head">
            <p>This version is split into chapters. A <a href="single-page.html">Single Page</a> edition exists.</p>
            </div><a href="other.html">single page elsewhere</a></body></html>"#;
        let next = hop(markup, None, "https://html.spec.whatwg.org/multipage/");
        assert_eq!(
            next,
            NextHop::Follow {
                target: url("https://html.spec.whatwg.org/multipage/single-page.html"),
                reason: HopReason::SinglePage
            }
        );
    }

    #[test]
    fn test_single_page_link_phrases() {
        for text in ["single file version", "One-Page version", "Single-page"] {
            let markup = format!(r#"<div class="head"><a href="/full">{text}</a></div>"#);
            let next = hop(&markup, None, "https://example.org/spec/");
            assert!(matches!(next, NextHop::Follow { .. }), "{text}");
        }
    }

    #[test]
    fn test_single_page_link_to_current_document() {
        let markup = r#"<div class="head"><a href="https://example.org/spec/">single page version</a></div>"#;
        let next = hop(markup, Some("https://example.org/spec/"), "https://example.org/spec/");
        assert_eq!(next, NextHop::Stay);
    }

    #[test]
    fn test_links_outside_head_block_are_ignored() {
        let markup = r#"<body><nav><a href="/all">single page</a></nav></body>"#;
        assert_eq!(hop(markup, None, "https://example.org/spec/"), NextHop::Stay);
    }

    #[test]
    fn test_base_href_applies_to_targets() {
        let markup = r#"<head><base href="https://mirror.example.net/specs/">
            <meta http-equiv="refresh" content="0; url=dom.html"></head>"#;
        let next = hop(markup, None, "https://example.org/spec/");
        assert_eq!(
            next,
            NextHop::Follow {
                target: url("https://mirror.example.net/specs/dom.html"),
                reason: HopReason::MetaRefresh
            }
        );
    }
}
