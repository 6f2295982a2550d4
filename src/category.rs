//! Category Engine (C8): maps an AI's free-form category label to the
//! fixed taxonomy, recording unmapped labels for later admin review rather
//! than guessing.

use tracing::warn;

use crate::error::CategoryError;
use crate::persistence::PersistenceQueue;

pub const MAX_CATEGORIES_PER_ARTICLE: usize = 3;

/// One resolved (category_id, confidence) pair ready to persist as an
/// `ArticleCategory` link.
pub struct Resolved {
    pub category_id: i64,
    pub confidence: f64,
}

/// Resolves a single AI-produced label to a fixed category id, falling
/// back to `default_category` when nothing matches. Bumps the mapping's
/// usage stats on a hit.
pub async fn resolve_label(
    queue: &PersistenceQueue,
    ai_label: &str,
    confidence: f64,
    default_category: &str,
) -> Result<Resolved, CategoryError> {
    let normalized = normalize(ai_label);

    if let Some(mapping) = queue.lookup_category_mapping(&normalized).await? {
        if mapping.is_active {
            queue.record_mapping_usage(&normalized, &mapping.fixed_category).await?;
            if let Some(category) = find_category(queue, &mapping.fixed_category).await? {
                return Ok(Resolved { category_id: category, confidence });
            }
            warn!(
                ai_category = %normalized,
                fixed_category = %mapping.fixed_category,
                "category mapping points at a category that no longer exists, falling back to default"
            );
        }
    }

    if let Err(e) = queue.record_unmapped_label(&normalized, default_category).await {
        warn!(ai_category = %normalized, error = %e, "failed to record unmapped category label");
    }

    match find_category(queue, default_category).await? {
        Some(category) => Ok(Resolved { category_id: category, confidence: confidence.min(0.3) }),
        None => Err(CategoryError::DefaultCategoryMissing(default_category.to_string())),
    }
}

/// Resolves every AI-produced (label, confidence) pair for an article,
/// deduplicating categories and capping at `MAX_CATEGORIES_PER_ARTICLE`,
/// ordered confidence-descending.
pub async fn resolve_all(
    queue: &PersistenceQueue,
    labels: &[(String, f64)],
    default_category: &str,
) -> Result<Vec<Resolved>, CategoryError> {
    let mut resolved = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for (label, confidence) in labels {
        let r = resolve_label(queue, label, *confidence, default_category).await?;
        if seen.insert(r.category_id) {
            resolved.push(r);
        }
    }

    resolved.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
    resolved.truncate(MAX_CATEGORIES_PER_ARTICLE);
    Ok(resolved)
}

async fn find_category(queue: &PersistenceQueue, name: &str) -> Result<Option<i64>, CategoryError> {
    let categories = queue.list_categories().await?;
    Ok(categories.into_iter().find(|c| c.name == name).map(|c| c.id))
}

/// Case-insensitive, punctuation-stripped normalization used both for the
/// initial lookup and before recording an unmapped label.
fn normalize(label: &str) -> String {
    label
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '-')
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_punctuation_and_case() {
        assert_eq!(normalize("  Tech & Science!  "), "tech science");
    }

    #[test]
    fn resolve_all_caps_and_orders_by_confidence() {
        // Exercise the pure ordering/capping logic without touching the DB:
        // sort+truncate behavior mirrors what `resolve_all` does internally.
        let mut resolved = vec![
            Resolved { category_id: 1, confidence: 0.2 },
            Resolved { category_id: 2, confidence: 0.9 },
            Resolved { category_id: 3, confidence: 0.5 },
            Resolved { category_id: 4, confidence: 0.7 },
        ];
        resolved.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap());
        resolved.truncate(MAX_CATEGORIES_PER_ARTICLE);
        let ids: Vec<i64> = resolved.iter().map(|r| r.category_id).collect();
        assert_eq!(ids, vec![2, 4, 3]);
    }
}
