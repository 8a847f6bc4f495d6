//! Permalink resolution for content items.
//!
//! Resolved paths are lower-case so they line up with canonical page paths
//! produced by request normalization.

use crate::domain::entities::ContentItem;

const DEFAULT_PATTERN: &str = "/{slug}/";

/// Resolves the public path of a content item from a pattern such as
/// `/{year}/{month}/{slug}/`.
///
/// Supported tokens: `{slug}`, `{id}`, `{year}`, `{month}`, `{day}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permalinks {
    pattern: String,
}

impl Default for Permalinks {
    fn default() -> Self {
        Self::new(DEFAULT_PATTERN)
    }
}

impl Permalinks {
    pub fn new(pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        let pattern = if pattern.trim().is_empty() {
            DEFAULT_PATTERN.to_string()
        } else if pattern.starts_with('/') {
            pattern
        } else {
            format!("/{pattern}")
        };
        Self { pattern }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Path under which the item is currently reachable.
    ///
    /// Items outside the published set have no pretty permalink yet; they get a
    /// deterministic placeholder that can never collide with a canonical page path.
    pub fn resolve(&self, item: &ContentItem) -> String {
        if item.status.is_published() {
            self.public_path(item)
        } else {
            placeholder(item)
        }
    }

    /// Path the item has (or had) while published, regardless of its current status.
    ///
    /// Falls back to the placeholder when the pattern needs a publication date the
    /// item does not carry.
    pub fn public_path(&self, item: &ContentItem) -> String {
        let needs_date = ["{year}", "{month}", "{day}"]
            .iter()
            .any(|token| self.pattern.contains(token));

        let mut path = self
            .pattern
            .replace("{slug}", &item.slug)
            .replace("{id}", &item.id.to_string());

        if needs_date {
            let Some(published_at) = item.published_at else {
                return placeholder(item);
            };
            path = path
                .replace("{year}", &format!("{:04}", published_at.year()))
                .replace("{month}", &format!("{:02}", u8::from(published_at.month())))
                .replace("{day}", &format!("{:02}", published_at.day()));
        }

        path.to_lowercase()
    }
}

fn placeholder(item: &ContentItem) -> String {
    format!("/?p={}", item.id)
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::domain::types::{ItemKind, ItemStatus};

    fn item(status: ItemStatus) -> ContentItem {
        ContentItem {
            id: 42,
            kind: ItemKind::Post,
            slug: "Hello-World".to_string(),
            status,
            published_at: Some(datetime!(2024-03-09 10:00 UTC)),
            categories: Vec::new(),
        }
    }

    #[test]
    fn published_item_uses_pattern() {
        let permalinks = Permalinks::default();
        assert_eq!(
            permalinks.resolve(&item(ItemStatus::Published)),
            "/hello-world/"
        );
    }

    #[test]
    fn unpublished_item_gets_placeholder() {
        let permalinks = Permalinks::default();
        assert_eq!(permalinks.resolve(&item(ItemStatus::Draft)), "/?p=42");
        assert_eq!(
            permalinks.public_path(&item(ItemStatus::Draft)),
            "/hello-world/"
        );
    }

    #[test]
    fn date_tokens_are_zero_padded() {
        let permalinks = Permalinks::new("{year}/{month}/{day}/{slug}-{id}/");
        assert_eq!(
            permalinks.resolve(&item(ItemStatus::Published)),
            "/2024/03/09/hello-world-42/"
        );
    }

    #[test]
    fn date_pattern_without_date_falls_back_to_placeholder() {
        let permalinks = Permalinks::new("/{year}/{slug}/");
        let mut undated = item(ItemStatus::Published);
        undated.published_at = None;
        assert_eq!(permalinks.resolve(&undated), "/?p=42");
    }
}
