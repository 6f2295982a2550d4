//! Pure helpers over parsed HTML/strings shared by the content extractor
//! and the source adapters. No network, no persistence.

use scraper::{Html, Selector};
use url::Url;

const TRACKING_PIXEL_MAX_DIM: u32 = 2;
const AD_NETWORK_DOMAINS: &[&str] = &["doubleclick.net", "googlesyndication.com", "adservice.google.com"];

/// Normalize a URL for use as a hashing/dedup key: lowercase host, strip
/// fragment, sort query keys. Returns the original string if it doesn't
/// parse as a URL.
pub fn canonicalize_url(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw) else {
        return raw.to_string();
    };
    url.set_fragment(None);
    if let Some(host) = url.host_str() {
        let lower = host.to_lowercase();
        let _ = url.set_host(Some(&lower));
    }
    let mut pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    pairs.sort();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        let query = pairs
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        url.set_query(Some(&query));
    }
    url.to_string()
}

/// Resolve a possibly-relative URL against a base.
pub fn resolve_url(base: &str, href: &str) -> Option<String> {
    let base = Url::parse(base).ok()?;
    base.join(href).ok().map(|u| u.to_string())
}

/// Extract visible text from an HTML fragment, dropping non-content tags
/// but preserving the text of semantic emphasis elements.
pub fn visible_text(html: &str) -> String {
    let document = Html::parse_fragment(html);
    let skip: Selector = Selector::parse("script, style, nav, aside, figure, noscript").unwrap();
    let skip_nodes: std::collections::HashSet<_> = document.select(&skip).map(|e| e.id()).collect();

    let mut out = String::new();
    for node in document.root_element().descendants() {
        let under_skipped = node.ancestors().any(|a| skip_nodes.contains(&a.id()));
        if under_skipped {
            continue;
        }
        if let Some(text) = node.value().as_text() {
            out.push_str(text);
        }
    }
    collapse_whitespace(&out)
}

/// Strip HTML to plain text; pass through unchanged if it doesn't look like
/// HTML at all (the source codebase's RSS bodies are frequently plain text).
pub fn strip_html(text: &str) -> String {
    if !text.contains('<') {
        return text.to_string();
    }
    html2text::from_read(text.as_bytes(), 200).unwrap_or_else(|_| text.to_string())
}

fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_was_space = false;
    for c in s.chars() {
        if c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    out.trim().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarvestedMediaKind {
    Image,
    Video,
    Document,
}

#[derive(Debug, Clone)]
pub struct HarvestedMedia {
    pub url: String,
    pub kind: HarvestedMediaKind,
}

/// Collect an ordered, deduplicated list of media URLs from a parsed page,
/// skipping tracking pixels and known ad-network hosts.
pub fn harvest_media(html: &str, base_url: &str) -> Vec<HarvestedMedia> {
    let document = Html::parse_document(html);
    let img_sel = Selector::parse("img").unwrap();
    let video_sel = Selector::parse("video source, video").unwrap();

    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();

    for img in document.select(&img_sel) {
        let Some(src) = img.value().attr("src") else { continue };
        if is_tracking_pixel(&img) {
            continue;
        }
        let Some(resolved) = resolve_url(base_url, src) else { continue };
        if is_ad_network(&resolved) || !seen.insert(resolved.clone()) {
            continue;
        }
        out.push(HarvestedMedia {
            url: resolved,
            kind: HarvestedMediaKind::Image,
        });
    }

    for video in document.select(&video_sel) {
        let Some(src) = video.value().attr("src") else { continue };
        let Some(resolved) = resolve_url(base_url, src) else { continue };
        if is_ad_network(&resolved) || !seen.insert(resolved.clone()) {
            continue;
        }
        out.push(HarvestedMedia {
            url: resolved,
            kind: HarvestedMediaKind::Video,
        });
    }

    out
}

fn is_tracking_pixel(img: &scraper::ElementRef) -> bool {
    let dim = |attr: &str| img.value().attr(attr).and_then(|v| v.parse::<u32>().ok());
    matches!((dim("width"), dim("height")), (Some(w), Some(h)) if w <= TRACKING_PIXEL_MAX_DIM && h <= TRACKING_PIXEL_MAX_DIM)
}

fn is_ad_network(url: &str) -> bool {
    AD_NETWORK_DOMAINS.iter().any(|d| url.contains(d))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalizes_query_order_and_strips_fragment() {
        let a = canonicalize_url("https://Example.com/a?b=2&a=1#frag");
        let b = canonicalize_url("https://example.com/a?a=1&b=2");
        assert_eq!(a, b);
    }

    #[test]
    fn strip_html_passes_through_plain_text() {
        assert_eq!(strip_html("just text"), "just text");
    }

    #[test]
    fn harvest_media_skips_tracking_pixels() {
        let html = r#"<img src="/pixel.gif" width="1" height="1"><img src="/photo.jpg" width="800" height="600">"#;
        let media = harvest_media(html, "https://news.test/article");
        assert_eq!(media.len(), 1);
        assert!(media[0].url.ends_with("photo.jpg"));
    }

    #[test]
    fn harvest_media_skips_known_ad_networks() {
        let html = r#"<img src="https://doubleclick.net/ad.png" width="300" height="250">"#;
        let media = harvest_media(html, "https://news.test/article");
        assert!(media.is_empty());
    }
}
