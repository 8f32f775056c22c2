// SPDX-License-Identifier: Apache-2.0

//! Token scanner for Verilog/SystemVerilog source text.
//!
//! Comments, whitespace, attribute instances and compiler directive lines
//! are trivia; every token records its byte span so that rewrites can be
//! expressed as edits of the original text.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Half-open byte range `[start, end)` into the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn to(self, other: Span) -> Span {
        Span::new(self.start, other.end)
    }

    pub fn contains(&self, other: Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn slice<'a>(&self, text: &'a str) -> &'a str {
        &text[self.start..self.end]
    }
}

/// One-based line and column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pos {
    pub lineno: u32,
    pub colno: u32,
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.lineno, self.colno)
    }
}

/// Maps byte offsets to line/column positions.
#[derive(Debug, Clone)]
pub struct LineIndex {
    line_starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        let mut line_starts = vec![0];
        for (i, b) in text.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i + 1);
            }
        }
        LineIndex { line_starts }
    }

    pub fn pos(&self, offset: usize) -> Pos {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        Pos {
            lineno: line as u32 + 1,
            colno: (offset - self.line_starts[line]) as u32 + 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Simple or escaped identifier, including keywords.
    Ident,
    /// `$display`, `$signed`, ...
    SystemIdent,
    /// Use of a text macro, e.g. `` `WIDTH ``.
    Macro,
    Number,
    Str,
    Punct,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    pub text: String,
}

impl Token {
    pub fn is(&self, text: &str) -> bool {
        self.text == text && self.kind != TokenKind::Str
    }

    pub fn is_ident(&self) -> bool {
        self.kind == TokenKind::Ident
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanError {
    pub message: String,
    pub offset: usize,
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at byte {}", self.message, self.offset)
    }
}

impl std::error::Error for ScanError {}

const PUNCT: &[&str] = &[
    "<<<", ">>>", "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "<<", ">>", "~&", "~|",
    "~^", "^~", "**", "+:", "-:", "->", "::", "++", "--", "+=", "-=", "'{", "(", ")", "[",
    "]", "{", "}", ";", ",", ".", ":", "=", "+", "-", "*", "/", "%", "&", "|", "^", "~", "!",
    "<", ">", "?", "@", "#", "$", "'",
];

/// Directives whose whole line is dropped.
const LINE_DIRECTIVES: &[&str] = &[
    "define",
    "undef",
    "undefineall",
    "timescale",
    "include",
    "ifdef",
    "ifndef",
    "elsif",
    "else",
    "endif",
    "default_nettype",
    "resetall",
    "celldefine",
    "endcelldefine",
    "line",
    "pragma",
    "begin_keywords",
    "end_keywords",
    "unconnected_drive",
    "nounconnected_drive",
];

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

fn is_base_char(b: u8) -> bool {
    matches!(b, b'b' | b'B' | b'o' | b'O' | b'd' | b'D' | b'h' | b'H')
}

fn is_based_digit(b: u8) -> bool {
    b.is_ascii_hexdigit() || matches!(b, b'x' | b'X' | b'z' | b'Z' | b'?' | b'_')
}

struct Scanner<'a> {
    text: &'a str,
    bytes: &'a [u8],
    i: usize,
}

impl<'a> Scanner<'a> {
    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.i + offset).copied()
    }

    fn rest(&self) -> &'a [u8] {
        &self.bytes[self.i..]
    }

    fn error(&self, message: &str) -> ScanError {
        ScanError {
            message: message.to_string(),
            offset: self.i,
        }
    }

    /// Skips whitespace, comments, attributes and directive lines.
    fn skip_trivia(&mut self) -> Result<(), ScanError> {
        loop {
            let rest = self.rest();
            if rest.is_empty() {
                return Ok(());
            }
            if rest[0].is_ascii_whitespace() {
                self.i += 1;
            } else if rest.starts_with(b"//") {
                while self.i < self.bytes.len() && self.bytes[self.i] != b'\n' {
                    self.i += 1;
                }
            } else if rest.starts_with(b"/*") {
                let start = self.i;
                self.i += 2;
                while self.i < self.bytes.len() && !self.rest().starts_with(b"*/") {
                    self.i += 1;
                }
                if self.i >= self.bytes.len() {
                    return Err(ScanError {
                        message: "unterminated block comment".to_string(),
                        offset: start,
                    });
                }
                self.i += 2;
            } else if self.at_attribute() {
                let start = self.i;
                self.i += 2;
                while self.i < self.bytes.len() && !self.rest().starts_with(b"*)") {
                    self.i += 1;
                }
                if self.i >= self.bytes.len() {
                    return Err(ScanError {
                        message: "unterminated attribute".to_string(),
                        offset: start,
                    });
                }
                self.i += 2;
            } else if rest[0] == b'`' && self.at_line_directive() {
                // Continuation lines of a macro body end in a backslash.
                while self.i < self.bytes.len() {
                    if self.bytes[self.i] == b'\n' && self.bytes[self.i - 1] != b'\\' {
                        break;
                    }
                    self.i += 1;
                }
            } else {
                return Ok(());
            }
        }
    }

    /// `(*` followed by an identifier opens an attribute instance; `@(*)`
    /// and `( * )` do not.
    fn at_attribute(&self) -> bool {
        if !self.rest().starts_with(b"(*") {
            return false;
        }
        let mut j = self.i + 2;
        while j < self.bytes.len() && self.bytes[j].is_ascii_whitespace() {
            j += 1;
        }
        j < self.bytes.len() && is_ident_start(self.bytes[j])
    }

    fn at_line_directive(&self) -> bool {
        let mut j = self.i + 1;
        while j < self.bytes.len() && is_ident_char(self.bytes[j]) {
            j += 1;
        }
        LINE_DIRECTIVES.contains(&&self.text[self.i + 1..j])
    }

    fn take_while(&mut self, pred: impl Fn(u8) -> bool) {
        while self.i < self.bytes.len() && pred(self.bytes[self.i]) {
            self.i += 1;
        }
    }

    /// Consumes `'[sS]<base><digits>` starting at the apostrophe.
    fn based_suffix(&mut self) {
        self.i += 1;
        if matches!(self.peek_at(0), Some(b's') | Some(b'S')) {
            self.i += 1;
        }
        self.i += 1;
        self.take_while(|b| b == b' ' || b == b'\t');
        self.take_while(is_based_digit);
    }

    fn at_based_suffix(&self) -> bool {
        if self.peek_at(0) != Some(b'\'') {
            return false;
        }
        match self.peek_at(1) {
            Some(b's') | Some(b'S') => self.peek_at(2).map_or(false, is_base_char),
            Some(b) => is_base_char(b),
            None => false,
        }
    }

    fn number(&mut self) {
        self.take_while(|b| b.is_ascii_digit() || b == b'_');
        // Allow whitespace between a size and its base: `4 'b1010`.
        let save = self.i;
        self.take_while(|b| b == b' ' || b == b'\t');
        if self.at_based_suffix() {
            self.based_suffix();
            return;
        }
        self.i = save;
        if self.peek_at(0) == Some(b'.') && self.peek_at(1).map_or(false, |b| b.is_ascii_digit()) {
            self.i += 1;
            self.take_while(|b| b.is_ascii_digit() || b == b'_');
        }
        if matches!(self.peek_at(0), Some(b'e') | Some(b'E'))
            && self
                .peek_at(1)
                .map_or(false, |b| b.is_ascii_digit() || b == b'+' || b == b'-')
        {
            self.i += 2;
            self.take_while(|b| b.is_ascii_digit());
        }
        // Time literal units: `10ns`.
        for unit in ["fs", "ps", "ns", "us", "ms", "s"] {
            let rest = self.rest();
            if rest.starts_with(unit.as_bytes())
                && !rest
                    .get(unit.len())
                    .map_or(false, |&b| is_ident_char(b))
            {
                self.i += unit.len();
                break;
            }
        }
    }

    fn next_token(&mut self) -> Result<Option<Token>, ScanError> {
        self.skip_trivia()?;
        if self.i >= self.bytes.len() {
            return Ok(None);
        }
        let start = self.i;
        let b = self.bytes[self.i];
        let kind = if is_ident_start(b) {
            self.take_while(is_ident_char);
            TokenKind::Ident
        } else if b == b'\\' {
            self.take_while(|b| !b.is_ascii_whitespace());
            TokenKind::Ident
        } else if b == b'$' && self.peek_at(1).map_or(false, is_ident_start) {
            self.i += 1;
            self.take_while(is_ident_char);
            TokenKind::SystemIdent
        } else if b == b'`' {
            self.i += 1;
            self.take_while(is_ident_char);
            if self.i == start + 1 {
                return Err(self.error("stray backtick"));
            }
            TokenKind::Macro
        } else if b.is_ascii_digit() {
            self.number();
            TokenKind::Number
        } else if self.at_based_suffix() {
            self.based_suffix();
            TokenKind::Number
        } else if b == b'\''
            && matches!(
                self.peek_at(1),
                Some(b'0') | Some(b'1') | Some(b'x') | Some(b'X') | Some(b'z') | Some(b'Z')
            )
            && !self.peek_at(2).map_or(false, is_ident_char)
        {
            self.i += 2;
            TokenKind::Number
        } else if b == b'"' {
            self.i += 1;
            loop {
                match self.peek_at(0) {
                    None | Some(b'\n') => {
                        return Err(ScanError {
                            message: "unterminated string literal".to_string(),
                            offset: start,
                        })
                    }
                    Some(b'\\') => self.i += 2,
                    Some(b'"') => {
                        self.i += 1;
                        break;
                    }
                    Some(_) => self.i += 1,
                }
            }
            TokenKind::Str
        } else {
            let rest = self.rest();
            match PUNCT.iter().find(|p| rest.starts_with(p.as_bytes())) {
                Some(p) => {
                    self.i += p.len();
                    TokenKind::Punct
                }
                None => return Err(self.error("unexpected character")),
            }
        };
        Ok(Some(Token {
            kind,
            span: Span::new(start, self.i),
            text: self.text[start..self.i].to_string(),
        }))
    }
}

pub fn scan(text: &str) -> Result<Vec<Token>, ScanError> {
    let mut scanner = Scanner {
        text,
        bytes: text.as_bytes(),
        i: 0,
    };
    let mut tokens = Vec::new();
    while let Some(token) = scanner.next_token()? {
        tokens.push(token);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn texts(src: &str) -> Vec<String> {
        scan(src).unwrap().into_iter().map(|t| t.text).collect()
    }

    #[test]
    fn test_numbers_and_operators() {
        assert_eq!(
            texts("a <= 4'b10_10 + 'hF - 8 'sd3 >>> 2;"),
            vec!["a", "<=", "4'b10_10", "+", "'hF", "-", "8 'sd3", ">>>", "2", ";"]
        );
    }

    #[test]
    fn test_trivia_is_skipped() {
        let src = "`timescale 1ns/1ps\n// c\n(* keep *) wire /* x */ w;\n";
        assert_eq!(texts(src), vec!["wire", "w", ";"]);
    }

    #[test]
    fn test_star_sensitivity_is_not_an_attribute() {
        assert_eq!(texts("always @(*)"), vec!["always", "@", "(", "*", ")"]);
        assert_eq!(texts("always @( * )"), vec!["always", "@", "(", "*", ")"]);
    }

    #[test]
    fn test_spans_and_positions() {
        let src = "module m;\n  wire w;\nendmodule\n";
        let tokens = scan(src).unwrap();
        let w = &tokens[4];
        assert_eq!(w.span.slice(src), "w");
        let index = LineIndex::new(src);
        assert_eq!(index.pos(w.span.start), Pos { lineno: 2, colno: 8 });
    }

    #[test]
    fn test_macros_system_names_and_strings() {
        let tokens = scan("x = `W + $signed(y); $display(\"a;b\");").unwrap();
        assert_eq!(tokens[2].kind, TokenKind::Macro);
        assert_eq!(tokens[4].kind, TokenKind::SystemIdent);
        assert!(tokens.iter().any(|t| t.kind == TokenKind::Str && t.text == "\"a;b\""));
    }

    #[test]
    fn test_unterminated_comment_is_an_error() {
        assert!(scan("wire a; /* oops").is_err());
    }
}
