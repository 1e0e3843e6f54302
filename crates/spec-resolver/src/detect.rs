//! Generator detection.
//!
//! Classifies which authoring tool produced a rendered spec. Definitive
//! markers are checked first; a document that merely declares ReSpec is only
//! classified after the engine has finished, so static documents never enter
//! the completion wait.

use crate::error::Result;
use crate::renderer::{self, RenderSession};
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

/// The tool that produced a spec's final HTML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Generator {
    Respec,
    Bikeshed,
    Anolis,
    Unknown,
}

impl Generator {
    pub fn as_str(self) -> &'static str {
        match self {
            Generator::Respec => "respec",
            Generator::Bikeshed => "bikeshed",
            Generator::Anolis => "anolis",
            Generator::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Generator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of inspecting a document snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    /// A definitive answer.
    Detected(Generator),
    /// The document declares ReSpec and loads it but has not been processed
    /// yet; the answer is `Respec` once the engine completes.
    AwaitEngine,
}

struct Selectors {
    generator_meta: Selector,
    respec_body: Selector,
    inline_scripts: Selector,
    scripts_with_src: Selector,
    anolis_marker: Selector,
}

fn selectors() -> &'static Selectors {
    static SELECTORS: OnceLock<Selectors> = OnceLock::new();
    SELECTORS.get_or_init(|| Selectors {
        generator_meta: Selector::parse("meta[name][content]").expect("valid selector"),
        respec_body: Selector::parse("body#respecDocument").expect("valid selector"),
        inline_scripts: Selector::parse("script:not([src])").expect("valid selector"),
        scripts_with_src: Selector::parse("script[src]").expect("valid selector"),
        anolis_marker: Selector::parse("#anolis-references").expect("valid selector"),
    })
}

/// Inspect a document snapshot, first match wins.
///
/// Only inline scripts count as declaring the ReSpec configuration here; see
/// [`inspect_with`] when the configuration is known from elsewhere.
pub fn inspect(doc: &Html) -> Detection {
    inspect_with(doc, declares_respec_config(doc))
}

/// Like [`inspect`], with the configuration check already answered.
pub fn inspect_with(doc: &Html, config_declared: bool) -> Detection {
    let s = selectors();

    let is_bikeshed = doc.select(&s.generator_meta).any(|meta| {
        let el = meta.value();
        el.attr("name").is_some_and(|name| name.eq_ignore_ascii_case("generator"))
            && el
                .attr("content")
                .is_some_and(|content| content.to_ascii_lowercase().contains("bikeshed"))
    });
    if is_bikeshed {
        return Detection::Detected(Generator::Bikeshed);
    }

    if doc.select(&s.respec_body).next().is_some() {
        return Detection::Detected(Generator::Respec);
    }

    if config_declared && loads_respec(doc) {
        return Detection::AwaitEngine;
    }

    if doc.select(&s.anolis_marker).next().is_some() {
        return Detection::Detected(Generator::Anolis);
    }

    Detection::Detected(Generator::Unknown)
}

/// Classify the session's document, waiting (at most `timeout`) for ReSpec
/// to finish when the document needs it.
///
/// The configuration is often defined by an external script, so when the
/// engine is loaded but no inline declaration is found the live session is
/// asked as well.
pub async fn detect(session: &dyn RenderSession, timeout: Duration) -> Result<Generator> {
    let snapshot = session.html().await?;
    let (mut detection, ask_session) = {
        let doc = Html::parse_document(&snapshot);
        let inline = declares_respec_config(&doc);
        (inspect_with(&doc, inline), !inline && loads_respec(&doc))
    };

    if ask_session && !is_definitive(detection) && session.declares_engine_config().await? {
        detection = Detection::AwaitEngine;
    }
    debug!("{}: {detection:?}", session.base_url());

    match detection {
        Detection::Detected(generator) => Ok(generator),
        Detection::AwaitEngine => {
            renderer::wait_for_engine(session, timeout).await?;
            Ok(Generator::Respec)
        }
    }
}

/// Markers that outrank the ReSpec configuration check.
fn is_definitive(detection: Detection) -> bool {
    matches!(
        detection,
        Detection::Detected(Generator::Bikeshed) | Detection::Detected(Generator::Respec)
    )
}

fn loads_respec(doc: &Html) -> bool {
    doc.select(&selectors().scripts_with_src).any(|script| {
        script
            .value()
            .attr("src")
            .is_some_and(|src| src.to_ascii_lowercase().contains("respec"))
    })
}

fn declares_respec_config(doc: &Html) -> bool {
    doc.select(&selectors().inline_scripts)
        .any(|script| script.text().any(|chunk| chunk.contains("respecConfig")))
}
