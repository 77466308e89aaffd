use std::collections::HashSet;

use crate::models::TagFilter;

/// Decide whether a question with `tags` satisfies a subscriber's filter.
///
/// Clauses short-circuit cheapest-first: an excluded tag rejects outright,
/// then at least one `any` tag is required (vacuous when the list is empty),
/// then every `all` tag must be present.
pub fn matches(tags: &HashSet<&str>, filter: &TagFilter) -> bool {
    if filter.exclude.iter().any(|t| tags.contains(t.as_str())) {
        return false;
    }
    if !filter.any.is_empty() && !filter.any.iter().any(|t| tags.contains(t.as_str())) {
        return false;
    }
    filter.all.iter().all(|t| tags.contains(t.as_str()))
}
