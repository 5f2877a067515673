//! PDF link harvesting from bid detail pages.

use scraper::{Html, Selector};
use url::Url;

/// Every distinct PDF link on the page, resolved against `base_url`, in
/// document order. A link counts as a PDF when its path ends in `.pdf`.
pub fn harvest_pdf_links(html: &str, base_url: &Url) -> Vec<String> {
    let doc = Html::parse_document(html);
    let Ok(link_sel) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let mut links: Vec<String> = Vec::new();

    for el in doc.select(&link_sel) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        // Skip anchors, javascript:, mailto:
        if href.starts_with('#') || href.starts_with("javascript:") || href.starts_with("mailto:") {
            continue;
        }
        let Ok(mut resolved) = base_url.join(href.trim()) else {
            continue;
        };
        resolved.set_fragment(None);
        if !resolved.path().to_ascii_lowercase().ends_with(".pdf") {
            continue;
        }
        let link = resolved.to_string();
        if !links.contains(&link) {
            links.push(link);
        }
    }

    links
}
