//! Classification and repair rules applied at emission time. All pure.

use crate::models::{Listing, ListingKind};

/// Fixed body for comments whose reconstructed content is empty.
pub const DELETED_BODY: &str = "[deleted]";

/// Pixel width of one indentation step in the site's comment layout.
pub(crate) const INDENT_UNIT: u32 = 40;

/// Nesting level from the indentation-width attribute. Integer division,
/// no rounding.
pub(crate) fn depth_from_width(width: u32) -> u32 {
    width / INDENT_UNIT
}

/// A listing without an author is a job posting; jobs carry no score or
/// comment-link semantics.
pub(crate) fn classify_listing(mut listing: Listing) -> Listing {
    if listing.author.is_empty() {
        listing.kind = ListingKind::Job;
        listing.score = None;
        listing.comment_count = None;
    }
    listing
}

/// Turn a reconstructed body into its emitted form: `(body, deleted)`.
/// Empty or whitespace-only bodies become the fixed placeholder.
pub(crate) fn repair_body(raw: &str) -> (String, bool) {
    if raw.trim().is_empty() {
        (DELETED_BODY.to_string(), true)
    } else {
        (normalize_body(raw), false)
    }
}

/// Normalize an inline-markup body: every run of text becomes a block-level
/// paragraph, and quoted-reply markers (`&gt;` / `>` at the start of a
/// paragraph) become blockquotes. The site emits `<p>` as a separator and
/// rarely closes it, so paragraphs are re-segmented here.
pub(crate) fn normalize_body(raw: &str) -> String {
    let mut out = String::new();
    for seg in raw.split("<p>") {
        let seg = seg.strip_suffix("</p>").unwrap_or(seg).trim();
        if seg.is_empty() {
            continue;
        }
        if let Some(quoted) = seg.strip_prefix("&gt;").or_else(|| seg.strip_prefix('>')) {
            out.push_str("<blockquote>");
            out.push_str(quoted.trim_start());
            out.push_str("</blockquote>");
        } else {
            out.push_str("<p>");
            out.push_str(seg);
            out.push_str("</p>");
        }
    }
    out
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Quality;

    #[test]
    fn depth_maps_back_exactly() {
        for depth in 0..12 {
            assert_eq!(depth_from_width(depth * INDENT_UNIT), depth);
        }
        // Off-grid widths truncate, never round up.
        assert_eq!(depth_from_width(79), 1);
    }

    #[test]
    fn authorless_listing_becomes_job() {
        let listing = Listing {
            id: 3,
            title: "Acme (YC W24) is hiring".into(),
            url: Some("https://example.com/jobs".into()),
            score: Some(2),
            author: String::new(),
            age_label: "2 hours ago".into(),
            comment_count: Some(2),
            kind: ListingKind::Story,
        };
        let job = classify_listing(listing);
        assert_eq!(job.kind, ListingKind::Job);
        assert_eq!(job.score, None);
        assert_eq!(job.comment_count, None);
    }

    #[test]
    fn whitespace_body_is_deleted() {
        assert_eq!(repair_body("  \n\t "), (DELETED_BODY.to_string(), true));
        assert_eq!(repair_body(""), (DELETED_BODY.to_string(), true));
    }

    #[test]
    fn nonempty_body_is_wrapped() {
        let (body, deleted) = repair_body("plain answer");
        assert!(!deleted);
        assert_eq!(body, "<p>plain answer</p>");
    }

    #[test]
    fn quoted_reply_becomes_blockquote() {
        let body = normalize_body("&gt; the original claim<p>which is wrong because...");
        assert_eq!(
            body,
            "<blockquote>the original claim</blockquote><p>which is wrong because...</p>"
        );
    }

    #[test]
    fn inline_markup_survives_normalization() {
        let body = normalize_body("see <i>the manual</i><p>or <a href=\"x\">this</a></p>");
        assert_eq!(
            body,
            "<p>see <i>the manual</i></p><p>or <a href=\"x\">this</a></p>"
        );
    }

    #[test]
    fn quality_set_is_closed() {
        assert_eq!(Quality::from_class_attr("commtext c73"), Some(Quality::Low));
        assert_eq!(Quality::from_class_attr("reply"), None);
    }
}
