//! Range-based text editing.
//!
//! Edits are recorded against byte offsets of the *original* text and applied
//! in one pass, so offsets found by a scanner stay valid no matter how many
//! edits precede them. Ranges must fall on char boundaries.

use std::ops::Range;

#[derive(Debug)]
struct Edit {
    range: Range<usize>,
    text: String,
    /// Insertion order, for ties at the same offset
    seq: usize,
}

/// Pending edits over a source string.
#[derive(Debug)]
pub struct TextEdits<'a> {
    source: &'a str,
    edits: Vec<Edit>,
}

impl<'a> TextEdits<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            edits: Vec::new(),
        }
    }

    /// Replace `range` with `text`.
    pub fn overwrite(&mut self, range: Range<usize>, text: impl Into<String>) {
        let seq = self.edits.len();
        self.edits.push(Edit {
            range,
            text: text.into(),
            seq,
        });
    }

    /// Insert `text` at `offset`.
    pub fn insert(&mut self, offset: usize, text: impl Into<String>) {
        self.overwrite(offset..offset, text);
    }

    pub fn remove(&mut self, range: Range<usize>) {
        self.overwrite(range, "");
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// Produce the edited text.
    ///
    /// Insertions at an offset land before a replacement starting there.
    /// An edit overlapping one already applied is dropped.
    pub fn apply(mut self) -> String {
        if self.edits.is_empty() {
            return self.source.to_string();
        }

        self.edits
            .sort_by_key(|e| (e.range.start, e.range.end, e.seq));

        let mut out = String::with_capacity(self.source.len());
        let mut cursor = 0;
        for edit in &self.edits {
            let Range { start, end } = edit.range;
            if start < cursor || end > self.source.len() || start > end {
                crate::debug!("edits"; "dropping overlapping edit at {}..{}", start, end);
                continue;
            }
            out.push_str(&self.source[cursor..start]);
            out.push_str(&edit.text);
            cursor = end;
        }
        out.push_str(&self.source[cursor..]);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offsets_refer_to_original() {
        let source = "<link href=\"a.css\"><img src=\"b.png\">";
        let mut edits = TextEdits::new(source);
        edits.overwrite(12..17, "/out/a.css");
        edits.overwrite(29..34, "/out/b.png");
        assert_eq!(
            edits.apply(),
            "<link href=\"/out/a.css\"><img src=\"/out/b.png\">"
        );
    }

    #[test]
    fn test_insert_and_remove() {
        let mut edits = TextEdits::new("<style>x</style>");
        edits.insert(6, " data-tape-id=\"1\"");
        assert_eq!(edits.apply(), "<style data-tape-id=\"1\">x</style>");

        let mut edits = TextEdits::new("<style data-tape-id=\"1\">x</style>");
        edits.remove(6..23);
        edits.overwrite(24..25, "body{}");
        assert_eq!(edits.apply(), "<style>body{}</style>");
    }

    #[test]
    fn test_insert_before_replacement_at_same_offset() {
        let mut edits = TextEdits::new("abc");
        edits.overwrite(1..2, "B");
        edits.insert(1, "+");
        assert_eq!(edits.apply(), "a+Bc");
    }

    #[test]
    fn test_overlapping_edit_is_dropped() {
        let mut edits = TextEdits::new("abcdef");
        edits.overwrite(1..4, "X");
        edits.overwrite(2..5, "Y");
        assert_eq!(edits.apply(), "aXef");
    }

    #[test]
    fn test_no_edits() {
        let edits = TextEdits::new("same");
        assert!(edits.is_empty());
        assert_eq!(edits.apply(), "same");
    }
}
