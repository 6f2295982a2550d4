//! Individual extraction strategies. Each is a pure function over HTML,
//! grounded on the scored-block/prioritized-selector approach of
//! `extrablatt`'s `Newspaper<Extractor>` design, adapted from `select` to
//! `scraper`.

use chrono::{DateTime, Utc};
use scraper::{Html, Selector};
use serde_json::Value;

use crate::html_util;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    LearnedSelector,
    Readability,
    StructuredData,
    CssList,
    HeadlessRender,
    AiSelectorDiscovery,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::LearnedSelector => "learned_selector",
            Strategy::Readability => "readability",
            Strategy::StructuredData => "structured_data",
            Strategy::CssList => "css_list",
            Strategy::HeadlessRender => "headless_render",
            Strategy::AiSelectorDiscovery => "ai_selector_discovery",
        }
    }
}

/// Ranked: schema.org microdata > semantic HTML5 > CMS class patterns >
/// generic containers.
pub const CANDIDATE_SELECTORS: &[&str] = &[
    "[itemprop=articleBody]",
    "main article",
    "article",
    ".prose",
    ".entry-content",
    ".post-content",
    ".article__text",
    ".article-content",
    ".content__text",
    "#content article",
    "main",
];

pub fn domain_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
        .unwrap_or_else(|| url.to_string())
}

pub fn by_selector(html: &str, selector: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let sel = Selector::parse(selector).ok()?;
    let element = document.select(&sel).next()?;
    let text = html_util::visible_text(&element.html());
    if text.trim().is_empty() { None } else { Some(text) }
}

/// Score every block-level element by text density and link density, pick
/// the highest scoring subtree. A lightweight readability approximation.
pub fn readability(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let block_sel = Selector::parse("div, article, section, main").ok()?;

    let mut best: Option<(f64, String)> = None;
    for el in document.select(&block_sel) {
        let text = html_util::visible_text(&el.html());
        let text_len = text.len();
        if text_len < 140 {
            continue;
        }
        let link_text_len: usize = el
            .select(&Selector::parse("a").unwrap())
            .map(|a| a.text().collect::<String>().len())
            .sum();
        let link_density = link_text_len as f64 / text_len.max(1) as f64;
        if link_density > 0.5 {
            continue;
        }
        let score = text_len as f64 * (1.0 - link_density);
        if best.as_ref().map(|(s, _)| score > *s).unwrap_or(true) {
            best = Some((score, text));
        }
    }
    best.map(|(_, text)| text)
}

/// JSON-LD `NewsArticle|Article|BlogPosting`, `[itemprop=articleBody]`, or
/// Open Graph description as a last resort.
pub fn structured_data(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let ld_sel = Selector::parse(r#"script[type="application/ld+json"]"#).ok()?;
    for script in document.select(&ld_sel) {
        let raw = script.text().collect::<String>();
        let Ok(value) = serde_json::from_str::<Value>(&raw) else { continue };
        if let Some(body) = article_body_from_json_ld(&value) {
            return Some(body);
        }
    }

    let og_sel = Selector::parse(r#"meta[property="og:description"]"#).ok()?;
    document
        .select(&og_sel)
        .next()
        .and_then(|m| m.value().attr("content"))
        .map(str::to_string)
        .filter(|s| !s.is_empty())
}

fn article_body_from_json_ld(value: &Value) -> Option<String> {
    let entries: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    for entry in entries {
        let ty = entry.get("@type").and_then(Value::as_str).unwrap_or("");
        if matches!(ty, "NewsArticle" | "Article" | "BlogPosting")
            && let Some(body) = entry.get("articleBody").and_then(Value::as_str)
            && !body.trim().is_empty()
        {
            return Some(body.to_string());
        }
    }
    None
}

/// Publication date: JSON-LD `datePublished` -> `article:published_time` ->
/// adjacent `<time datetime>` -> none.
pub fn published_date(html: &str) -> Option<DateTime<Utc>> {
    let document = Html::parse_document(html);

    if let Ok(ld_sel) = Selector::parse(r#"script[type="application/ld+json"]"#) {
        for script in document.select(&ld_sel) {
            let raw = script.text().collect::<String>();
            if let Ok(value) = serde_json::from_str::<Value>(&raw)
                && let Some(date) = date_from_json_ld(&value)
            {
                return Some(date);
            }
        }
    }

    if let Ok(meta_sel) = Selector::parse(r#"meta[property="article:published_time"]"#)
        && let Some(el) = document.select(&meta_sel).next()
        && let Some(content) = el.value().attr("content")
        && let Ok(parsed) = DateTime::parse_from_rfc3339(content)
    {
        return Some(parsed.with_timezone(&Utc));
    }

    if let Ok(time_sel) = Selector::parse("time[datetime]")
        && let Some(el) = document.select(&time_sel).next()
        && let Some(dt) = el.value().attr("datetime")
        && let Ok(parsed) = DateTime::parse_from_rfc3339(dt)
    {
        return Some(parsed.with_timezone(&Utc));
    }

    None
}

fn date_from_json_ld(value: &Value) -> Option<DateTime<Utc>> {
    let entries: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    for entry in entries {
        if let Some(date) = entry.get("datePublished").and_then(Value::as_str)
            && let Ok(parsed) = DateTime::parse_from_rfc3339(date)
        {
            return Some(parsed.with_timezone(&Utc));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn css_list_finds_entry_content() {
        let html = r#"<html><body><div class="entry-content"><p>First sentence here. Second sentence follows. Third one too.</p></div></body></html>"#;
        let body = by_selector(html, ".entry-content").unwrap();
        assert!(body.contains("First sentence"));
    }

    #[test]
    fn structured_data_reads_json_ld_article_body() {
        let html = r#"<html><head><script type="application/ld+json">
            {"@type":"NewsArticle","articleBody":"Body text. More text. Even more."}
        </script></head></html>"#;
        assert_eq!(
            structured_data(html),
            Some("Body text. More text. Even more.".to_string())
        );
    }

    #[test]
    fn published_date_reads_meta_tag() {
        let html = r#"<html><head><meta property="article:published_time" content="2025-01-15T10:00:00Z"></head></html>"#;
        let date = published_date(html).unwrap();
        assert_eq!(date.to_rfc3339(), "2025-01-15T10:00:00+00:00");
    }
}
