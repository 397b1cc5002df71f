//! Field accumulation for a single record region.
//!
//! The markup event source splits text into chunks at arbitrary points, so a
//! field value is always built by appending, never by assignment: the final
//! value is the concatenation of every chunk delivered for the region,
//! whatever the chunking. Markup-preserving fields additionally interleave
//! serialized open/close tags with the text, reconstructing the inline markup
//! of comment and about bodies.

use std::sync::LazyLock;

use regex::Regex;

static COUNT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d[\d,]*)").unwrap());
static INT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(-?\d[\d,]*)").unwrap());

/// Elements that never produce an end-tag notification.
const VOID_TAGS: &[&str] = &["br", "hr", "img", "wbr"];

#[derive(Debug, Default)]
pub(crate) struct FieldAccumulator {
    buf: String,
}

impl FieldAccumulator {
    /// Append one text chunk verbatim.
    pub(crate) fn push_text(&mut self, chunk: &str) {
        self.buf.push_str(chunk);
    }

    /// Serialize an element-open notification back into opening-tag text,
    /// attributes in the order given. No well-formedness checks.
    pub(crate) fn open_tag<'a>(
        &mut self,
        name: &str,
        attrs: impl Iterator<Item = (String, String)> + 'a,
    ) {
        self.buf.push('<');
        self.buf.push_str(name);
        for (k, v) in attrs {
            self.buf.push(' ');
            self.buf.push_str(&k);
            self.buf.push_str("=\"");
            self.buf.push_str(&v.replace('"', "&quot;"));
            self.buf.push('"');
        }
        self.buf.push('>');
    }

    /// Append the matching closing tag when the end-tag notification fires.
    pub(crate) fn close_tag(&mut self, name: &str) {
        self.buf.push_str("</");
        self.buf.push_str(name);
        self.buf.push('>');
    }

    pub(crate) fn reset(&mut self) {
        self.buf.clear();
    }

    /// The accumulated value, untrimmed.
    pub(crate) fn take(&mut self) -> String {
        std::mem::take(&mut self.buf)
    }

    /// The accumulated value with surrounding whitespace dropped.
    pub(crate) fn take_text(&mut self) -> String {
        std::mem::take(&mut self.buf).trim().to_string()
    }
}

pub(crate) fn is_void_tag(name: &str) -> bool {
    VOID_TAGS.contains(&name)
}

/// First run of digits in a display string: "1,204 points" → 1204,
/// "discuss" → None.
pub(crate) fn leading_count(text: &str) -> Option<u32> {
    COUNT_RE
        .captures(text)
        .and_then(|c| c[1].replace(',', "").parse().ok())
}

/// Signed variant for fields that can go negative (karma).
pub(crate) fn leading_int(text: &str) -> Option<i64> {
    INT_RE
        .captures(text)
        .and_then(|c| c[1].replace(',', "").parse().ok())
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunking_does_not_change_value() {
        let mut whole = FieldAccumulator::default();
        whole.push_text("A deep dive into borrow checking");

        let mut split = FieldAccumulator::default();
        for chunk in ["A deep d", "ive into borrow", " checking"] {
            split.push_text(chunk);
        }
        assert_eq!(whole.take(), split.take());
    }

    #[test]
    fn reconstructs_inline_markup() {
        let mut acc = FieldAccumulator::default();
        acc.push_text("see ");
        acc.open_tag(
            "a",
            vec![("href".to_string(), "https://example.com".to_string())].into_iter(),
        );
        acc.push_text("here");
        acc.close_tag("a");
        acc.push_text(" for ");
        acc.open_tag("i", std::iter::empty());
        acc.push_text("details");
        acc.close_tag("i");
        assert_eq!(
            acc.take(),
            "see <a href=\"https://example.com\">here</a> for <i>details</i>"
        );
    }

    #[test]
    fn attribute_quotes_are_escaped() {
        let mut acc = FieldAccumulator::default();
        acc.open_tag(
            "a",
            vec![("title".to_string(), "say \"hi\"".to_string())].into_iter(),
        );
        assert_eq!(acc.take(), "<a title=\"say &quot;hi&quot;\">");
    }

    #[test]
    fn counts_from_display_strings() {
        assert_eq!(leading_count("1,204 points"), Some(1204));
        assert_eq!(leading_count("99&nbsp;comments"), Some(99));
        assert_eq!(leading_count("discuss"), None);
        assert_eq!(leading_int("karma: 1,204"), Some(1204));
        assert_eq!(leading_int("karma: -4"), Some(-4));
    }
}
