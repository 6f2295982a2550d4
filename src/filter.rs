//! Smart Filter (C5): the cheap rejection pass between source adapters and
//! extraction. Runs entirely against a `CandidateArticle` and prior
//! `hash_content` history — no network, no AI.

use sha2::{Digest, Sha256};

use crate::models::CandidateArticle;

const MIN_TITLE_LEN: usize = 8;
const MIN_LANGUAGE_SAMPLE: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    DuplicateHash,
    TitleTooShort,
    BoilerplateOnly,
    UnsupportedLanguage,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::DuplicateHash => "duplicate_hash",
            Rejection::TitleTooShort => "title_too_short",
            Rejection::BoilerplateOnly => "boilerplate_only",
            Rejection::UnsupportedLanguage => "unsupported_language",
        }
    }
}

/// `sha256(title|content)`, truncated to the body the source adapter already
/// fetched — cheap dedup signal distinct from the per-item `dedup_key`
/// (GUID or URL+title), which only catches re-delivery of the *same* item,
/// not two different items with identical bodies (syndication, mirrors).
pub fn hash_content(candidate: &CandidateArticle) -> String {
    let mut hasher = Sha256::new();
    hasher.update(candidate.title.trim().to_lowercase());
    hasher.update("|");
    hasher.update(candidate.content.trim().to_lowercase());
    format!("{:x}", hasher.finalize())
}

const BOILERPLATE_MARKERS: &[&str] = &[
    "subscribe to continue reading",
    "enable javascript",
    "please enable cookies",
    "404 not found",
    "page not found",
    "access denied",
];

const ALLOWED_LANGUAGES: &[&str] = &["en", "ru", "uk"];

/// Pre-extraction rejection: title length, boilerplate phrases, and a crude
/// Latin/Cyrillic script heuristic since a real language detector is out of
/// scope. Checks that apply only once a body exists (boilerplate, language)
/// are skipped for RSS-summary-only candidates — they run again post-extraction.
pub fn reject(candidate: &CandidateArticle) -> Option<Rejection> {
    if candidate.title.trim().chars().count() < MIN_TITLE_LEN {
        return Some(Rejection::TitleTooShort);
    }

    let body = candidate.content.to_lowercase();
    if body.len() >= MIN_LANGUAGE_SAMPLE {
        if BOILERPLATE_MARKERS.iter().any(|m| body.contains(m)) {
            return Some(Rejection::BoilerplateOnly);
        }
        if !script_is_supported(&body) {
            return Some(Rejection::UnsupportedLanguage);
        }
    }

    None
}

/// True if the visible text is dominated by scripts we claim to support.
/// Not a real language detector — a ratio of Latin/Cyrillic letters to all
/// letters above 0.5 is treated as "probably fine", matching
/// `ALLOWED_LANGUAGES`'s scope (en/ru/uk all use those two scripts).
fn script_is_supported(text: &str) -> bool {
    let mut letters = 0usize;
    let mut matched = 0usize;
    for c in text.chars() {
        if !c.is_alphabetic() {
            continue;
        }
        letters += 1;
        let cp = c as u32;
        let is_latin = c.is_ascii_alphabetic();
        let is_cyrillic = (0x0400..=0x04FF).contains(&cp);
        if is_latin || is_cyrillic {
            matched += 1;
        }
    }
    if letters == 0 {
        return true;
    }
    matched as f64 / letters as f64 > 0.5
}

pub fn supported_languages() -> &'static [&'static str] {
    ALLOWED_LANGUAGES
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MediaFile;

    fn candidate(title: &str, content: &str) -> CandidateArticle {
        CandidateArticle {
            dedup_key: "k".to_string(),
            url: "https://example.com/a".to_string(),
            title: title.to_string(),
            content: content.to_string(),
            published_at: None,
            media_files: Vec::<MediaFile>::new(),
        }
    }

    #[test]
    fn hash_content_is_stable_across_case_and_whitespace() {
        let a = candidate("Title Here", "Some body text.");
        let b = candidate("  title here  ", "  SOME BODY TEXT.  ");
        assert_eq!(hash_content(&a), hash_content(&b));
    }

    #[test]
    fn rejects_short_titles() {
        let c = candidate("Hi", "this body is plenty long enough to pass the sample threshold check here");
        assert_eq!(reject(&c), Some(Rejection::TitleTooShort));
    }

    #[test]
    fn rejects_boilerplate_bodies() {
        let c = candidate("A reasonably long title", "Please enable JavaScript and cookies to continue reading this site.");
        assert_eq!(reject(&c), Some(Rejection::BoilerplateOnly));
    }

    #[test]
    fn accepts_short_rss_summary_without_language_check() {
        let c = candidate("A reasonably long title", "short");
        assert_eq!(reject(&c), None);
    }

    #[test]
    fn accepts_cyrillic_body() {
        let c = candidate(
            "Достаточно длинный заголовок",
            "Это достаточно длинный текст на русском языке для проверки эвристики определения письменности.",
        );
        assert_eq!(reject(&c), None);
    }
}
