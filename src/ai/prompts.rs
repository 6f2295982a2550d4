//! Prompt templates. One function per model role in `AiConfig`: analysis
//! (summarization + ad-detection + categorization, a single combined call
//! to save a round trip) and digest (daily per-category roll-up).

use crate::category::MAX_CATEGORIES_PER_ARTICLE;
use crate::config::CategoryConfig;

fn analysis_schema_prompt(title: &str, content: &str, categories: &[CategoryConfig], prefix: &str) -> String {
    let category_names: Vec<&str> = categories.iter().map(|c| c.name.as_str()).collect();
    let category_list = if category_names.is_empty() {
        "general".to_string()
    } else {
        category_names.join(", ")
    };

    let truncated: String = content.chars().take(6_000).collect();

    format!(
        "{prefix}You are analyzing a news article for an aggregation pipeline. Respond with a single JSON \
         object and nothing else, matching this exact shape:\n\
         {{\n\
         \x20 \"optimized_title\": string,\n\
         \x20 \"summary\": string (2-4 sentences),\n\
         \x20 \"is_advertisement\": boolean,\n\
         \x20 \"ad_confidence\": number between 0 and 1,\n\
         \x20 \"ad_type\": one of \"product_promotion\", \"service_promotion\", \"sponsorship\", \"affiliate\", \"other\", or null,\n\
         \x20 \"ad_reasoning\": string or null,\n\
         \x20 \"ad_markers\": array of short strings (phrases that indicate advertising), may be empty,\n\
         \x20 \"categories\": array of up to {MAX_CATEGORIES_PER_ARTICLE} {{ \"name\": one of [{category_list}], \"confidence\": number between 0 and 1 }}, ordered most confident first, must not be empty\n\
         }}\n\n\
         Title: {title}\n\n\
         Content:\n{truncated}"
    )
}

pub fn analysis_prompt(title: &str, content: &str, categories: &[CategoryConfig]) -> String {
    analysis_schema_prompt(title, content, categories, "")
}

/// Used on retry after a first response came back missing a required
/// field — repeats the ask with no room for omission.
pub fn analysis_prompt_strict(title: &str, content: &str, categories: &[CategoryConfig]) -> String {
    analysis_schema_prompt(
        title,
        content,
        categories,
        "Your previous response was invalid or missing required fields. Follow the schema exactly, with \
         \"summary\" and \"categories\" both populated, and no additional commentary.\n\n",
    )
}

pub fn digest_prompt(category: &str, article_titles_and_summaries: &[(String, String)]) -> String {
    let mut items = String::new();
    for (title, summary) in article_titles_and_summaries {
        items.push_str(&format!("- {title}: {summary}\n"));
    }

    format!(
        "Write a short daily digest (one paragraph, plain text, no markdown headers) summarizing \
         the following {} articles in the \"{category}\" category for readers who want a quick \
         overview of today's news:\n\n{items}",
        article_titles_and_summaries.len()
    )
}

pub fn selector_discovery_prompt(domain: &str, html_excerpt: &str) -> String {
    let truncated: String = html_excerpt.chars().take(4_000).collect();
    format!(
        "You are helping build a CSS selector for extracting the main article body on pages from \
         the domain \"{domain}\". Respond with a single JSON object: {{ \"selector\": string or null, \
         \"confidence\": number between 0 and 1 }}. Pick the most specific selector that would match \
         only the article body, not navigation or ads, based on this HTML excerpt:\n\n{truncated}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analysis_prompt_lists_configured_categories() {
        let categories = vec![CategoryConfig {
            name: "tech".to_string(),
            display_name: "Technology".to_string(),
            color: "#000".to_string(),
            description: String::new(),
        }];
        let prompt = analysis_prompt("Title", "Body", &categories);
        assert!(prompt.contains("tech"));
        assert!(prompt.contains("is_advertisement"));
    }

    #[test]
    fn digest_prompt_includes_every_article() {
        let items = vec![("A".to_string(), "summary a".to_string()), ("B".to_string(), "summary b".to_string())];
        let prompt = digest_prompt("tech", &items);
        assert!(prompt.contains("A: summary a"));
        assert!(prompt.contains("B: summary b"));
    }
}
