//! Canonical page paths and page classification.
//!
//! A raw request target is reduced to a [`PagePath`] by [`normalize`]; the path is then
//! classified exactly once into a [`Classification`]. Both are pure.

use std::fmt;

use crate::cache::config::ControlParams;

const COMMENTS_ANCHOR: &str = "#comments";
const LISTING_MARKER: &str = "/page/";
const FEED_MARKER: &str = "/feed/";
const COMMENT_PAGE_MARKER: &str = "/comment-page-";
const ROOT: &str = "/";

/// Canonical, lower-case page path without query string or comment anchor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PagePath(String);

impl PagePath {
    /// Wrap an already canonical path.
    ///
    /// Paths produced elsewhere (permalinks, listing pages) go through here; the caller
    /// guarantees they are lower-case and query-free.
    pub fn from_canonical(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn root() -> Self {
        Self(ROOT.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PagePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PagePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Reduce a raw request path and query to a canonical page path.
///
/// Steps, in order: drop the page/domain delete directives, lower-case, cut the query
/// string, drop the `#comments` anchor. The result is a fixed point of this function.
pub fn normalize(raw_path: &str, raw_query: Option<&str>, params: &ControlParams) -> PagePath {
    let mut target = raw_path.to_string();
    if let Some(query) = raw_query.filter(|query| !query.is_empty()) {
        target.push('?');
        target.push_str(query);
    }

    let target = strip_directives(&target, params);
    let target = target.to_lowercase();
    let target = match target.find('?') {
        Some(index) => &target[..index],
        None => target.as_str(),
    };
    let target = remove_all(target, COMMENTS_ANCHOR);

    if target.is_empty() {
        PagePath::root()
    } else {
        PagePath(target)
    }
}

fn strip_directives(target: &str, params: &ControlParams) -> String {
    let Some((path, query)) = target.split_once('?') else {
        return target.to_string();
    };

    let kept: Vec<&str> = query
        .split('&')
        .filter(|pair| {
            let name = pair.split_once('=').map_or(*pair, |(name, _)| name);
            !name.is_empty() && name != params.delete_page && name != params.delete_domain
        })
        .collect();

    if kept.is_empty() {
        path.to_string()
    } else {
        format!("{path}?{}", kept.join("&"))
    }
}

/// Remove every occurrence of `needle`, including ones formed by earlier removals.
fn remove_all(haystack: &str, needle: &str) -> String {
    let mut current = haystack.to_string();
    while current.contains(needle) {
        current = current.replace(needle, "");
    }
    current
}

/// Page-type tag selecting the hash a page lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageType {
    Single,
    Index,
    Feed,
}

impl PageType {
    pub fn as_str(self) -> &'static str {
        match self {
            PageType::Single => "single",
            PageType::Index => "index",
            PageType::Feed => "feed",
        }
    }
}

impl fmt::Display for PageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub page_type: PageType,
    /// The path is a comment-pagination variant of `primary`.
    pub comment_page: bool,
    /// Path with any comment-pagination suffix removed.
    pub primary: PagePath,
}

impl Classification {
    /// Classify a canonical path. The listing test runs before the feed test.
    pub fn of(path: &PagePath) -> Self {
        let raw = path.as_str();

        let page_type = if raw == ROOT || raw.contains(LISTING_MARKER) {
            PageType::Index
        } else if raw.contains(FEED_MARKER) {
            PageType::Feed
        } else {
            PageType::Single
        };

        let (comment_page, primary) = match raw.find(COMMENT_PAGE_MARKER) {
            Some(index) => (true, PagePath(raw[..=index].to_string())),
            None => (false, path.clone()),
        };

        Self {
            page_type,
            comment_page,
            primary,
        }
    }
}

/// Path of listing page `page` (1-based): the site root for the first page.
pub fn listing_page_path(page: u64) -> PagePath {
    if page <= 1 {
        PagePath::root()
    } else {
        PagePath(format!("{LISTING_MARKER}{page}/"))
    }
}
