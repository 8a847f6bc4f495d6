//! Content lifecycle enumerations shared by events, queries and cascades.

use serde::{Deserialize, Serialize};

/// Publication status of a content item as reported by the content platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[serde(rename = "publish", alias = "published")]
    Published,
    Draft,
    Pending,
    Private,
    #[serde(rename = "future", alias = "scheduled")]
    Scheduled,
    Trash,
    #[serde(other)]
    Other,
}

impl ItemStatus {
    pub fn is_published(self) -> bool {
        matches!(self, ItemStatus::Published)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ItemStatus::Published => "publish",
            ItemStatus::Draft => "draft",
            ItemStatus::Pending => "pending",
            ItemStatus::Private => "private",
            ItemStatus::Scheduled => "future",
            ItemStatus::Trash => "trash",
            ItemStatus::Other => "other",
        }
    }
}

impl From<&str> for ItemStatus {
    fn from(value: &str) -> Self {
        match value {
            "publish" | "published" => ItemStatus::Published,
            "draft" | "auto-draft" => ItemStatus::Draft,
            "pending" => ItemStatus::Pending,
            "private" => ItemStatus::Private,
            "future" | "scheduled" => ItemStatus::Scheduled,
            "trash" => ItemStatus::Trash,
            _ => ItemStatus::Other,
        }
    }
}

/// Kind of content item. Revisions are snapshots of another item and never
/// affect public pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    #[default]
    Post,
    Page,
    Revision,
    #[serde(other)]
    Other,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::Post => "post",
            ItemKind::Page => "page",
            ItemKind::Revision => "revision",
            ItemKind::Other => "other",
        }
    }
}

impl From<&str> for ItemKind {
    fn from(value: &str) -> Self {
        match value {
            "post" => ItemKind::Post,
            "page" => ItemKind::Page,
            "revision" => ItemKind::Revision,
            _ => ItemKind::Other,
        }
    }
}

/// How an item moved relative to the published set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Entered the published set.
    Added,
    /// Left the published set.
    Removed,
    /// Stayed published; content or metadata changed.
    Updated,
    /// Neither state is published.
    Unpublished,
}

impl Transition {
    pub fn between(old: ItemStatus, new: ItemStatus) -> Self {
        match (old.is_published(), new.is_published()) {
            (false, true) => Transition::Added,
            (true, false) => Transition::Removed,
            (true, true) => Transition::Updated,
            (false, false) => Transition::Unpublished,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_deserializes_platform_spellings() {
        let publish: ItemStatus = serde_json::from_str("\"publish\"").expect("publish");
        let published: ItemStatus = serde_json::from_str("\"published\"").expect("published");
        let future: ItemStatus = serde_json::from_str("\"future\"").expect("future");
        let odd: ItemStatus = serde_json::from_str("\"inherit\"").expect("inherit");

        assert_eq!(publish, ItemStatus::Published);
        assert_eq!(published, ItemStatus::Published);
        assert_eq!(future, ItemStatus::Scheduled);
        assert_eq!(odd, ItemStatus::Other);
    }

    #[test]
    fn status_from_database_text() {
        assert_eq!(ItemStatus::from("publish"), ItemStatus::Published);
        assert_eq!(ItemStatus::from("auto-draft"), ItemStatus::Draft);
        assert_eq!(ItemStatus::from("whatever"), ItemStatus::Other);
    }

    #[test]
    fn transition_covers_all_status_pairs() {
        use ItemStatus::*;
        assert_eq!(Transition::between(Draft, Published), Transition::Added);
        assert_eq!(Transition::between(Published, Trash), Transition::Removed);
        assert_eq!(Transition::between(Published, Published), Transition::Updated);
        assert_eq!(Transition::between(Draft, Pending), Transition::Unpublished);
    }
}
