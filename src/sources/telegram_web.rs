//! Telegram public-channel preview adapter (`t.me/s/<channel>`). No bot API
//! or MTProto client: scrapes the same server-rendered widget page a
//! logged-out browser sees, selecting message wraps/text/date the way a
//! scraper-based news reader would.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use scraper::{Html, Selector};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::SourceError;
use crate::html_util;
use crate::http::{FetchOptions, Fetcher};
use crate::models::{CandidateArticle, MediaFile};
use crate::models::Source;
use crate::sources::{FetchOutcome, SourceAdapter};

const MESSAGE_WRAP: &str = ".tgme_widget_message_wrap";
const MESSAGE_TEXT: &str = ".tgme_widget_message_text";
const MESSAGE_DATE: &str = ".tgme_widget_message_date";
const MESSAGE_DATE_TIME: &str = ".tgme_widget_message_date time";
const MESSAGE_PHOTO: &str = ".tgme_widget_message_photo_wrap";

pub struct TelegramWebAdapter;

#[async_trait]
impl SourceAdapter for TelegramWebAdapter {
    async fn fetch(&self, fetcher: &Fetcher, source: &Source) -> Result<FetchOutcome, SourceError> {
        let preview_url = preview_url(&source.url);
        debug!(url = %preview_url, source = %source.name, "fetching telegram preview page");

        let response = fetcher.fetch(&preview_url, HeaderMap::new(), &FetchOptions::default()).await?;
        let html = String::from_utf8_lossy(&response.body).into_owned();

        let candidates = parse_messages(&html, &source.url).map_err(|message| SourceError::TelegramParse {
            url: preview_url.clone(),
            message,
        })?;

        Ok(FetchOutcome {
            candidates,
            etag: response.etag,
            last_modified: response.last_modified,
        })
    }
}

fn preview_url(channel_url: &str) -> String {
    let trimmed = channel_url.trim_end_matches('/');
    if let Some(channel) = trimmed.strip_prefix("https://t.me/") {
        format!("https://t.me/s/{channel}")
    } else if let Some(channel) = trimmed.strip_prefix("http://t.me/") {
        format!("https://t.me/s/{channel}")
    } else {
        trimmed.to_string()
    }
}

fn parse_messages(html: &str, channel_url: &str) -> Result<Vec<CandidateArticle>, String> {
    let document = Html::parse_document(html);
    let wrap_sel = Selector::parse(MESSAGE_WRAP).map_err(|e| e.to_string())?;
    let text_sel = Selector::parse(MESSAGE_TEXT).map_err(|e| e.to_string())?;
    let date_sel = Selector::parse(MESSAGE_DATE).map_err(|e| e.to_string())?;
    let datetime_sel = Selector::parse(MESSAGE_DATE_TIME).map_err(|e| e.to_string())?;
    let photo_sel = Selector::parse(MESSAGE_PHOTO).map_err(|e| e.to_string())?;

    let mut candidates = Vec::new();
    for wrap in document.select(&wrap_sel) {
        let Some(text_el) = wrap.select(&text_sel).next() else { continue };
        let text = html_util::visible_text(&text_el.html());
        if text.trim().is_empty() {
            continue;
        }

        let link = wrap.select(&date_sel).next().and_then(|el| el.value().attr("href")).map(str::to_string);
        let Some(link) = link else { continue };

        let published_at: Option<DateTime<Utc>> = wrap
            .select(&datetime_sel)
            .next()
            .and_then(|el| el.value().attr("datetime"))
            .and_then(|dt| DateTime::parse_from_rfc3339(dt).ok())
            .map(|dt| dt.with_timezone(&Utc));

        let media_files: Vec<MediaFile> = wrap
            .select(&photo_sel)
            .filter_map(|el| {
                el.value()
                    .attr("style")
                    .and_then(background_image_url)
                    .map(|url| MediaFile { url, kind: crate::models::MediaKind::Image, thumbnail: None })
            })
            .collect();

        let title = text.lines().next().unwrap_or_default().chars().take(120).collect::<String>();

        let mut hasher = Sha256::new();
        hasher.update(&link);
        hasher.update("|");
        hasher.update(channel_url);
        let dedup_key = format!("sha256:{:x}", hasher.finalize());

        candidates.push(CandidateArticle {
            dedup_key,
            url: link,
            title,
            content: text,
            published_at,
            media_files,
        });
    }

    Ok(candidates)
}

/// Telegram's preview widget inlines photo backgrounds as
/// `background-image:url('...')` instead of an `<img src>`.
fn background_image_url(style: &str) -> Option<String> {
    let start = style.find("url('")? + 5;
    let rest = &style[start..];
    let end = rest.find('\'')?;
    Some(rest[..end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_url_rewrites_channel_link() {
        assert_eq!(preview_url("https://t.me/examplechannel"), "https://t.me/s/examplechannel");
    }

    #[test]
    fn parses_a_single_message() {
        let html = r#"
            <div class="tgme_widget_message_wrap">
              <div class="tgme_widget_message_text">First line of the post.<br>More text follows here.</div>
              <a class="tgme_widget_message_date" href="https://t.me/examplechannel/42">
                <time datetime="2025-01-15T10:00:00+00:00"></time>
              </a>
            </div>
        "#;
        let items = parse_messages(html, "https://t.me/examplechannel").unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].url, "https://t.me/examplechannel/42");
        assert!(items[0].content.contains("First line"));
    }

    #[test]
    fn extracts_background_image_style() {
        assert_eq!(
            background_image_url("background-image:url('https://cdn.example.com/a.jpg')"),
            Some("https://cdn.example.com/a.jpg".to_string())
        );
    }
}
