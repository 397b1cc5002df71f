use serde::{Deserialize, Serialize};

use crate::error::ExtractError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingKind {
    Story,
    Job,
}

/// One front-page entry, assembled from a single `tr.athing` row and the
/// subtext row that follows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: u64,
    pub title: String,
    pub url: Option<String>,
    /// Absent for jobs.
    pub score: Option<u32>,
    /// Empty for jobs; an empty author is what reclassifies a row as a job.
    pub author: String,
    /// Opaque display string ("3 hours ago"), never parsed to a timestamp.
    pub age_label: String,
    /// Absent for jobs.
    pub comment_count: Option<u32>,
    pub kind: ListingKind,
}

/// Moderation-derived fade level of a comment body, mirroring the closed set
/// of `commtext` classes the site ships.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Normal,
    Low,
    Lower,
    Lowest,
    Dead,
}

impl Quality {
    /// Map a `class` attribute value ("commtext c5a") onto the closed set.
    pub fn from_class_attr(attr: &str) -> Option<Quality> {
        attr.split_ascii_whitespace().find_map(|c| match c {
            "c00" => Some(Quality::Normal),
            "c5a" | "c73" => Some(Quality::Low),
            "c82" | "c88" => Some(Quality::Lower),
            "c9c" | "cae" | "cbe" | "cce" => Some(Quality::Lowest),
            "cdd" => Some(Quality::Dead),
            _ => None,
        })
    }
}

/// The focused post of a thread page, emitted exactly once and before any
/// comment. Listing-shaped, plus the fields a comment-focused page adds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadHeader {
    pub id: u64,
    pub title: String,
    pub url: Option<String>,
    pub score: Option<u32>,
    pub author: String,
    pub age_label: String,
    pub comment_count: Option<u32>,
    pub kind: ListingKind,
    pub parent_id: Option<u64>,
    pub root_story_id: Option<u64>,
    /// Normalized inline markup: story self-text or the focused comment body.
    pub body: Option<String>,
    pub body_quality: Option<Quality>,
}

/// A single comment in document order. `depth` encodes the hierarchy; the
/// pipeline never materializes a tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: u64,
    pub author: String,
    pub age_label: String,
    /// Reconstructed inline markup, normalized. The fixed `[deleted]`
    /// placeholder when `deleted` is set.
    pub body: String,
    pub depth: u32,
    pub parent_id: Option<u64>,
    pub root_story_id: Option<u64>,
    pub quality: Option<Quality>,
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    /// Unix seconds, derived from the creation-date anchor of the user page.
    pub created_at: i64,
    pub karma: i64,
    /// Normalized inline markup.
    pub about: Option<String>,
}

/// Anchor configuration for one extraction pass. Listing passes need a page
/// number or a continuation token; thread passes need an item id (or a
/// continuation token for deep comment pages).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageParams {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    /// Opaque next-page reference captured from a previous pass. Takes
    /// precedence over `page` when present.
    pub continuation: Option<String>,
    pub item_id: Option<u64>,
}

impl PageParams {
    pub fn page(page: u32) -> Self {
        PageParams {
            page: Some(page),
            ..Default::default()
        }
    }

    pub fn continuation(token: impl Into<String>) -> Self {
        PageParams {
            continuation: Some(token.into()),
            ..Default::default()
        }
    }

    pub fn item(id: u64) -> Self {
        PageParams {
            item_id: Some(id),
            ..Default::default()
        }
    }

    pub(crate) fn listing_path(&self) -> Result<String, ExtractError> {
        if let Some(tok) = &self.continuation {
            if tok.is_empty() {
                return Err(ExtractError::InvalidParams("continuation token is empty"));
            }
            return Ok(tok.clone());
        }
        let page = self.page.ok_or(ExtractError::InvalidParams(
            "listing request needs a page number or continuation token",
        ))?;
        if page == 0 {
            return Err(ExtractError::InvalidParams("page numbers start at 1"));
        }
        let mut path = format!("news?p={page}");
        if let Some(n) = self.page_size {
            if n == 0 {
                return Err(ExtractError::InvalidParams("page size must be positive"));
            }
            path.push_str(&format!("&n={n}"));
        }
        Ok(path)
    }

    pub(crate) fn thread_path(&self, id: u64) -> Result<String, ExtractError> {
        if let Some(tok) = &self.continuation {
            if tok.is_empty() {
                return Err(ExtractError::InvalidParams("continuation token is empty"));
            }
            return Ok(tok.clone());
        }
        let id = self.item_id.unwrap_or(id);
        let mut path = format!("item?id={id}");
        match self.page {
            Some(0) => return Err(ExtractError::InvalidParams("page numbers start at 1")),
            Some(p) if p > 1 => path.push_str(&format!("&p={p}")),
            _ => {}
        }
        Ok(path)
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_path_from_page() {
        assert_eq!(PageParams::page(2).listing_path().unwrap(), "news?p=2");
    }

    #[test]
    fn listing_path_prefers_continuation() {
        let mut p = PageParams::page(2);
        p.continuation = Some("news?p=5".into());
        assert_eq!(p.listing_path().unwrap(), "news?p=5");
    }

    #[test]
    fn listing_path_requires_anchor() {
        let err = PageParams::default().listing_path().unwrap_err();
        assert!(matches!(err, ExtractError::InvalidParams(_)));
    }

    #[test]
    fn listing_path_rejects_page_zero() {
        assert!(PageParams::page(0).listing_path().is_err());
    }

    #[test]
    fn thread_path_with_deep_page() {
        let mut p = PageParams::item(42);
        p.page = Some(3);
        assert_eq!(p.thread_path(42).unwrap(), "item?id=42&p=3");
        assert_eq!(PageParams::default().thread_path(42).unwrap(), "item?id=42");
    }

    #[test]
    fn quality_from_class_attr() {
        assert_eq!(Quality::from_class_attr("commtext c00"), Some(Quality::Normal));
        assert_eq!(Quality::from_class_attr("commtext c9c"), Some(Quality::Lowest));
        assert_eq!(Quality::from_class_attr("commtext cdd"), Some(Quality::Dead));
        assert_eq!(Quality::from_class_attr("commtext"), None);
    }
}
