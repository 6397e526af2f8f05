use crate::fetch::FetchResponse;
use crate::parse::{ParseError, ParsedPage, Parser, Record};
use crate::url::UrlKey;
use scraper::{Html, Selector};
use serde_json::json;
use url::Url;

/// Extracts a page record and outbound links from HTML responses
///
/// # Link Extraction Rules
///
/// **Include:** `<a href>` anywhere in the document and
/// `<link rel="canonical">`. `rel="nofollow"` links are followed.
///
/// **Exclude:** `<a download>`, `javascript:`, `mailto:`, `tel:` and `data:`
/// hrefs, fragment-only links, and anything that does not resolve to
/// http(s).
///
/// Relative links resolve against `<base href>` when present, otherwise
/// against the final URL after redirects.
#[derive(Debug, Clone, Default)]
pub struct HtmlParser;

impl HtmlParser {
    pub fn new() -> Self {
        Self
    }
}

impl Parser for HtmlParser {
    fn parse(&self, response: &FetchResponse, key: &UrlKey) -> Result<ParsedPage, ParseError> {
        check_content_type(response)?;

        let document = Html::parse_document(&response.body);
        let base_url = document_base(&document, &response.final_url);

        let title = select_text(&document, "title");
        let description = select_attr(&document, "meta[name='description']", "content");
        let canonical = select_attr(&document, "link[rel='canonical']", "href")
            .and_then(|href| resolve_link(&href, &base_url));
        let links = extract_links(&document, &base_url);

        let record = Record::new(
            key,
            "page",
            json!({
                "url": key.as_str(),
                "final_url": response.final_url.as_str(),
                "status": response.status,
                "title": title,
                "description": description,
                "canonical": canonical,
                "link_count": links.len(),
            }),
        );

        Ok(ParsedPage {
            records: vec![record],
            links,
        })
    }
}

fn check_content_type(response: &FetchResponse) -> Result<(), ParseError> {
    match response.content_type() {
        Some(ct) => {
            let ct = ct.to_ascii_lowercase();
            if ct.contains("text/html") || ct.contains("application/xhtml+xml") {
                Ok(())
            } else {
                Err(ParseError::UnsupportedContent(ct))
            }
        }
        // No header: accept bodies that look like markup
        None if response.body.trim_start().starts_with('<') => Ok(()),
        None => Err(ParseError::UnsupportedContent("unknown".to_string())),
    }
}

fn document_base(document: &Html, final_url: &Url) -> Url {
    select_attr(document, "base[href]", "href")
        .and_then(|href| final_url.join(href.trim()).ok())
        .unwrap_or_else(|| final_url.clone())
}

fn select_text(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn select_attr(document: &Html, selector: &str, attr: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .find_map(|element| element.value().attr(attr))
        .map(|value| value.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn extract_links(document: &Html, base_url: &Url) -> Vec<String> {
    let mut links = Vec::new();

    if let Ok(anchors) = Selector::parse("a[href]") {
        for element in document.select(&anchors) {
            if element.value().attr("download").is_some() {
                continue;
            }
            if let Some(link) = element
                .value()
                .attr("href")
                .and_then(|href| resolve_link(href, base_url))
            {
                links.push(link);
            }
        }
    }

    if let Some(link) = select_attr(document, "link[rel='canonical']", "href")
        .and_then(|href| resolve_link(&href, base_url))
    {
        links.push(link);
    }

    links
}

/// Resolves an href to an absolute http(s) URL, or `None` if it is not followable
fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }

    let absolute = base_url.join(href).ok()?;
    matches!(absolute.scheme(), "http" | "https").then(|| absolute.to_string())
}
