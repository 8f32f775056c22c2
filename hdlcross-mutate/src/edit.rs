// SPDX-License-Identifier: Apache-2.0

//! Byte-range edits against the original source text.

use std::fmt;

use crate::verilog::Span;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

impl Edit {
    pub fn replace(span: Span, text: impl Into<String>) -> Self {
        Edit {
            start: span.start,
            end: span.end,
            text: text.into(),
        }
    }

    pub fn insert(at: usize, text: impl Into<String>) -> Self {
        Edit {
            start: at,
            end: at,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditError {
    Overlap { first: (usize, usize), second: (usize, usize) },
    OutOfBounds { end: usize, len: usize },
    NotCharBoundary(usize),
}

impl fmt::Display for EditError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EditError::Overlap { first, second } => write!(
                f,
                "edits {}..{} and {}..{} overlap",
                first.0, first.1, second.0, second.1
            ),
            EditError::OutOfBounds { end, len } => {
                write!(f, "edit ends at {} past the end of a {}-byte source", end, len)
            }
            EditError::NotCharBoundary(offset) => {
                write!(f, "edit offset {} is not on a character boundary", offset)
            }
        }
    }
}

impl std::error::Error for EditError {}

/// Applies non-overlapping `edits` to `source`.
///
/// Insertions at the same offset are emitted in the order given.
pub fn apply_edits(source: &str, edits: &[Edit]) -> Result<String, EditError> {
    let mut sorted: Vec<&Edit> = edits.iter().collect();
    sorted.sort_by_key(|e| (e.start, e.end));
    for e in &sorted {
        if e.end > source.len() || e.start > e.end {
            return Err(EditError::OutOfBounds {
                end: e.end,
                len: source.len(),
            });
        }
        for offset in [e.start, e.end] {
            if !source.is_char_boundary(offset) {
                return Err(EditError::NotCharBoundary(offset));
            }
        }
    }
    for pair in sorted.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if b.start < a.end {
            return Err(EditError::Overlap {
                first: (a.start, a.end),
                second: (b.start, b.end),
            });
        }
    }

    let mut out = String::with_capacity(source.len());
    let mut cursor = 0;
    for e in sorted {
        out.push_str(&source[cursor..e.start]);
        out.push_str(&e.text);
        cursor = e.end;
    }
    out.push_str(&source[cursor..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_edits_apply_out_of_order() {
        let src = "assign y = a + b;";
        let edits = vec![
            Edit::replace(Span::new(15, 16), "a"),
            Edit::replace(Span::new(11, 12), "b"),
            Edit::insert(0, "/*x*/ "),
        ];
        assert_eq!(apply_edits(src, &edits).unwrap(), "/*x*/ assign y = b + a;");
    }

    #[test]
    fn test_inserts_at_same_offset_keep_order() {
        let edits = vec![Edit::insert(1, "1"), Edit::insert(1, "2")];
        assert_eq!(apply_edits("ab", &edits).unwrap(), "a12b");
    }

    #[test]
    fn test_overlap_and_bounds_are_rejected() {
        let edits = vec![
            Edit::replace(Span::new(0, 3), ""),
            Edit::replace(Span::new(2, 4), ""),
        ];
        assert!(matches!(
            apply_edits("abcdef", &edits),
            Err(EditError::Overlap { .. })
        ));
        assert!(matches!(
            apply_edits("ab", &[Edit::insert(5, "x")]),
            Err(EditError::OutOfBounds { .. })
        ));
    }
}
