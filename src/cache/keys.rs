//! Cache key definitions.
//!
//! Every key is `<domain>:<namespace>`; comment-pagination sets append the primary
//! path: `<domain>:comment:<primary path>`. Domains are escaped so the separator and
//! glob metacharacters never appear in them.

use std::fmt;

use crate::cache::path::{PagePath, PageType};

const SEPARATOR: char = ':';

/// Partition of a domain's key space.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Hash of single-item pages, field = page path.
    Single,
    /// Hash of listing pages, field = page path.
    Index,
    /// Hash of feed pages, field = page path.
    Feed,
    /// Set of comment-pagination variants of one primary path.
    Comment(PagePath),
    /// Hash of item id → chronological rank.
    PostPosition,
}

impl Namespace {
    /// Hash holding pages of the given type.
    pub fn for_page(page_type: PageType) -> Self {
        match page_type {
            PageType::Single => Namespace::Single,
            PageType::Index => Namespace::Index,
            PageType::Feed => Namespace::Feed,
        }
    }

    fn write_suffix(&self, out: &mut String) {
        match self {
            Namespace::Single => out.push_str("single"),
            Namespace::Index => out.push_str("index"),
            Namespace::Feed => out.push_str("feed"),
            Namespace::Comment(primary) => {
                out.push_str("comment");
                out.push(SEPARATOR);
                out.push_str(primary.as_str());
            }
            Namespace::PostPosition => out.push_str("post-position"),
        }
    }
}

/// A fully-qualified store key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Builds keys for one domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBuilder {
    domain: String,
    escaped: String,
}

impl KeyBuilder {
    pub fn new(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            escaped: escape_component(domain),
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn build(&self, namespace: &Namespace) -> CacheKey {
        let mut key = String::with_capacity(self.escaped.len() + 24);
        key.push_str(&self.escaped);
        key.push(SEPARATOR);
        namespace.write_suffix(&mut key);
        CacheKey(key)
    }

    /// Comment-pagination set of `primary`. Callers must pass a primary path.
    pub fn comment_set(&self, primary: &PagePath) -> CacheKey {
        self.build(&Namespace::Comment(primary.clone()))
    }

    /// Glob matching every key of this domain and nothing else.
    pub fn domain_pattern(&self) -> String {
        format!("{}{SEPARATOR}*", self.escaped)
    }
}

/// Percent-escape characters that would break key parsing or glob matching.
fn escape_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '%' | ':' | '*' | '?' | '[' | ']' | '\\' => {
                out.push_str(&format!("%{:02X}", ch as u32));
            }
            _ => out.push(ch),
        }
    }
    out
}
