//! The resolved specification document handed to extractors.

use crate::error::{ResolveError, Result};
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// A parsed, fully rendered specification document.
///
/// Read-only: no further rendering or script execution happens once a
/// document is handed out.
#[derive(Debug, Clone)]
pub struct SpecDocument {
    source: String,
    tree: Html,
    url: Option<Url>,
}

impl SpecDocument {
    /// Parse `markup` as the document located at `url`.
    pub fn parse(markup: &str, url: Option<Url>) -> Self {
        Self {
            source: markup.to_string(),
            tree: Html::parse_document(markup),
            url,
        }
    }

    /// Serialized markup the tree was parsed from.
    pub fn html(&self) -> &str {
        &self.source
    }

    /// Underlying parse tree.
    pub fn tree(&self) -> &Html {
        &self.tree
    }

    /// Location of the document, if it has one.
    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    /// All elements matching a CSS selector, in document order.
    pub fn select(&self, selector: &str) -> Result<Vec<ElementRef<'_>>> {
        let parsed = Selector::parse(selector).map_err(|_| ResolveError::Selector(selector.to_string()))?;
        Ok(self.tree.select(&parsed).collect())
    }

    /// First element matching a CSS selector.
    pub fn select_first(&self, selector: &str) -> Result<Option<ElementRef<'_>>> {
        let parsed = Selector::parse(selector).map_err(|_| ResolveError::Selector(selector.to_string()))?;
        Ok(self.tree.select(&parsed).next())
    }

    /// All elements with the given tag name (ASCII case-insensitive).
    pub fn elements_by_tag(&self, tag: &str) -> Vec<ElementRef<'_>> {
        self.elements()
            .filter(|el| el.value().name().eq_ignore_ascii_case(tag))
            .collect()
    }

    /// The first element whose `id` is `id`.
    pub fn element_by_id(&self, id: &str) -> Option<ElementRef<'_>> {
        self.elements().find(|el| el.value().id() == Some(id))
    }

    /// Concatenated text of the whole document.
    pub fn text_content(&self) -> String {
        self.tree.root_element().text().collect()
    }

    /// Trimmed `<title>` text.
    pub fn title(&self) -> Option<String> {
        self.elements_by_tag("title")
            .first()
            .map(|el| el.text().collect::<String>().trim().to_string())
    }

    fn elements(&self) -> impl Iterator<Item = ElementRef<'_>> {
        self.tree.root_element().descendants().filter_map(ElementRef::wrap)
    }
}
