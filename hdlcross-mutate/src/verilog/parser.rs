// SPDX-License-Identifier: Apache-2.0

//! Recursive-descent parser producing the concrete syntax tree.
//!
//! Module items and statements outside the supported subset are skipped as
//! balanced token groups and kept as opaque spans, so the parser accepts far
//! more than it models.

use std::fmt;

use crate::verilog::cst::*;
use crate::verilog::lexer::{scan, LineIndex, Pos, Span, Token, TokenKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub offset: usize,
    pub pos: Pos,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.pos, self.message)
    }
}

impl std::error::Error for ParseError {}

type PResult<T> = Result<T, ParseError>;

const KEYWORDS: &[&str] = &[
    "always", "always_comb", "always_ff", "always_latch", "and", "assign", "automatic", "begin",
    "buf", "case", "casex", "casez", "deassign", "default", "defparam", "disable", "do", "else",
    "end", "endcase", "endfunction", "endgenerate", "endmodule", "endtask", "final", "for",
    "force", "forever", "fork", "function", "generate", "genvar", "if", "initial", "inout",
    "input", "integer", "join", "localparam", "logic", "macromodule", "module", "nand",
    "negedge", "nor", "not", "or", "output", "parameter", "posedge", "reg", "release", "repeat",
    "signed", "supply0", "supply1", "task", "tri", "unsigned", "wait", "while", "wire", "xnor",
    "xor",
];

const NET_TYPES: &[&str] = &[
    "wire", "reg", "logic", "integer", "tri", "tri0", "tri1", "triand", "trior", "trireg",
    "wand", "wor", "supply0", "supply1", "uwire", "bit", "byte", "shortint", "int", "longint",
    "real", "realtime", "shortreal", "time", "genvar", "var",
];

const PARAM_TYPES: &[&str] = &[
    "integer", "int", "logic", "bit", "reg", "real", "realtime", "time", "longint",
    "shortint", "byte",
];

const UNARY_OPS: &[&str] = &["+", "-", "!", "~", "&", "~&", "|", "~|", "^", "~^", "^~"];

fn binary_precedence(op: &str) -> Option<u8> {
    Some(match op {
        "||" => 1,
        "&&" => 2,
        "|" => 3,
        "^" | "~^" | "^~" => 4,
        "&" => 5,
        "==" | "!=" | "===" | "!==" => 6,
        "<" | "<=" | ">" | ">=" => 7,
        "<<" | ">>" | "<<<" | ">>>" => 8,
        "+" | "-" => 9,
        "*" | "/" | "%" => 10,
        "**" => 11,
        _ => return None,
    })
}

fn direction_of(text: &str) -> Option<Direction> {
    match text {
        "input" => Some(Direction::Input),
        "output" => Some(Direction::Output),
        "inout" => Some(Direction::Inout),
        _ => None,
    }
}

struct Parser<'a> {
    text: &'a str,
    tokens: &'a [Token],
    lines: &'a LineIndex,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, n: usize) -> Option<&'a Token> {
        self.tokens.get(self.pos + n)
    }

    fn at(&self, text: &str) -> bool {
        self.peek().map_or(false, |t| t.is(text))
    }

    fn at_any(&self, texts: &[&str]) -> bool {
        self.peek()
            .map_or(false, |t| t.kind != TokenKind::Str && texts.contains(&t.text.as_str()))
    }

    fn start(&self) -> usize {
        self.peek().map_or(self.text.len(), |t| t.span.start)
    }

    fn last_end(&self) -> usize {
        if self.pos == 0 {
            0
        } else {
            self.tokens[self.pos - 1].span.end
        }
    }

    fn span_from(&self, start: usize) -> Span {
        Span::new(start, self.last_end())
    }

    fn error(&self, message: &str) -> ParseError {
        let offset = self.start();
        let found = match self.peek() {
            Some(t) => format!("{}; found `{}`", message, t.text),
            None => format!("{}; found end of file", message),
        };
        ParseError {
            message: found,
            offset,
            pos: self.lines.pos(offset),
        }
    }

    fn bump(&mut self) -> PResult<&'a Token> {
        match self.peek() {
            Some(t) => {
                self.pos += 1;
                Ok(t)
            }
            None => Err(self.error("unexpected end of file")),
        }
    }

    fn eat(&mut self, text: &str) -> bool {
        if self.at(text) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, text: &str) -> PResult<&'a Token> {
        if self.at(text) {
            self.bump()
        } else {
            Err(self.error(&format!("expected `{}`", text)))
        }
    }

    fn at_ident(&self) -> bool {
        self.peek()
            .map_or(false, |t| t.is_ident() && !KEYWORDS.contains(&t.text.as_str()))
    }

    fn expect_ident(&mut self) -> PResult<Ident> {
        if !self.at_ident() {
            return Err(self.error("expected identifier"));
        }
        let t = self.bump()?;
        Ok(Ident {
            name: t.text.clone(),
            span: t.span,
        })
    }

    /// Runs `f`, rewinding on failure.
    fn attempt<T>(&mut self, f: impl FnOnce(&mut Self) -> PResult<T>) -> Option<T> {
        let save = self.pos;
        match f(self) {
            Ok(v) => Some(v),
            Err(_) => {
                self.pos = save;
                None
            }
        }
    }

    // -- Skipping ----------------------------------------------------------

    /// Consumes a bracketed group starting at the current `(`, `[`, `{` or
    /// `'{`.
    fn skip_balanced(&mut self) -> PResult<()> {
        let mut depth = 0usize;
        loop {
            let t = self.bump()?;
            if t.kind != TokenKind::Punct {
                continue;
            }
            match t.text.as_str() {
                "(" | "[" | "{" | "'{" => depth += 1,
                ")" | "]" | "}" => {
                    depth = depth
                        .checked_sub(1)
                        .ok_or_else(|| self.error("unbalanced brackets"))?;
                }
                _ => {}
            }
            if depth == 0 {
                return Ok(());
            }
        }
    }

    /// Consumes tokens through the next `;` outside brackets.
    fn skip_to_semi(&mut self) -> PResult<()> {
        loop {
            match self.peek() {
                None => return Err(self.error("expected `;`")),
                Some(t) if t.is("endmodule") => return Err(self.error("expected `;`")),
                Some(t) if t.kind == TokenKind::Punct => match t.text.as_str() {
                    "(" | "[" | "{" | "'{" => self.skip_balanced()?,
                    ";" => {
                        self.pos += 1;
                        return Ok(());
                    }
                    _ => self.pos += 1,
                },
                Some(_) => self.pos += 1,
            }
        }
    }

    /// Consumes a keyword-delimited block such as `begin ... end`, counting
    /// nested openers.
    fn skip_keyword_block(&mut self, opens: &[&str], closes: &[&str]) -> PResult<()> {
        let mut depth = 0usize;
        loop {
            let t = self.bump()?;
            if t.kind != TokenKind::Ident {
                continue;
            }
            if opens.contains(&t.text.as_str()) {
                depth += 1;
            } else if closes.contains(&t.text.as_str()) {
                depth -= 1;
                if depth == 0 {
                    return Ok(());
                }
            } else if t.is("endmodule") {
                return Err(self.error("unterminated block"));
            }
        }
    }

    fn skip_delay(&mut self) -> PResult<()> {
        self.expect("#")?;
        if self.at("(") {
            self.skip_balanced()
        } else {
            self.bump().map(|_| ())
        }
    }

    fn skip_generate_construct(&mut self) -> PResult<()> {
        if self.at("case") {
            return self.skip_keyword_block(&["case", "casez", "casex"], &["endcase"]);
        }
        let is_if = self.at("if");
        self.bump()?;
        self.skip_balanced()?;
        self.skip_generate_body()?;
        if is_if && self.eat("else") {
            self.skip_generate_body()?;
        }
        Ok(())
    }

    fn skip_generate_body(&mut self) -> PResult<()> {
        if self.at("begin") {
            self.skip_keyword_block(&["begin"], &["end"])?;
            if self.eat(":") {
                self.expect_ident()?;
            }
            Ok(())
        } else if self.at_any(&["for", "if", "case"]) {
            self.skip_generate_construct()
        } else {
            self.parse_item().map(|_| ())
        }
    }

    // -- Expressions -------------------------------------------------------

    fn parse_expr(&mut self) -> PResult<Expr> {
        let start = self.start();
        let cond = self.parse_binary(1)?;
        if !self.eat("?") {
            return Ok(cond);
        }
        let then_expr = self.parse_expr()?;
        self.expect(":")?;
        let else_expr = self.parse_expr()?;
        Ok(Expr {
            kind: ExprKind::Ternary {
                cond: Box::new(cond),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
            },
            span: self.span_from(start),
        })
    }

    fn parse_binary(&mut self, min_prec: u8) -> PResult<Expr> {
        let start = self.start();
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(t) if t.kind == TokenKind::Punct => t.text.clone(),
                _ => break,
            };
            let prec = match binary_precedence(&op) {
                Some(p) if p >= min_prec => p,
                _ => break,
            };
            self.bump()?;
            let rhs = self.parse_binary(prec + 1)?;
            lhs = Expr {
                kind: ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span: self.span_from(start),
            };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        let is_unary = self
            .peek()
            .map_or(false, |t| t.kind == TokenKind::Punct && UNARY_OPS.contains(&t.text.as_str()));
        if !is_unary {
            return self.parse_primary();
        }
        let start = self.start();
        let op = self.bump()?.text.clone();
        let operand = self.parse_unary()?;
        Ok(Expr {
            kind: ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            span: self.span_from(start),
        })
    }

    fn parse_args(&mut self) -> PResult<Vec<Expr>> {
        self.expect("(")?;
        let mut args = Vec::new();
        if self.eat(")") {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            if !self.eat(",") {
                break;
            }
        }
        self.expect(")")?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let start = self.start();
        let t = self.bump()?;
        let kind = match t.kind {
            TokenKind::Number => ExprKind::Number(t.text.clone()),
            TokenKind::Str => ExprKind::Str,
            TokenKind::Macro => {
                if self.at("(") {
                    self.skip_balanced()?;
                }
                ExprKind::Macro(t.text.clone())
            }
            TokenKind::SystemIdent => {
                let args = if self.at("(") {
                    self.parse_args()?
                } else {
                    Vec::new()
                };
                ExprKind::Call {
                    name: t.text.clone(),
                    system: true,
                    args,
                }
            }
            TokenKind::Ident => {
                if KEYWORDS.contains(&t.text.as_str()) {
                    self.pos -= 1;
                    return Err(self.error("expected expression"));
                }
                if (self.at(".") || self.at("::"))
                    && self.peek_at(1).map_or(false, |n| n.is_ident())
                {
                    while (self.at(".") || self.at("::"))
                        && self.peek_at(1).map_or(false, |n| n.is_ident())
                    {
                        self.pos += 2;
                    }
                    ExprKind::Hierarchical(self.span_from(start).slice(self.text).to_string())
                } else if self.at("(") {
                    ExprKind::Call {
                        name: t.text.clone(),
                        system: false,
                        args: self.parse_args()?,
                    }
                } else {
                    ExprKind::Ident(t.text.clone())
                }
            }
            TokenKind::Punct => match t.text.as_str() {
                "(" => {
                    let inner = self.parse_expr()?;
                    self.expect(")")?;
                    ExprKind::Paren(Box::new(inner))
                }
                "{" => self.parse_concat_rest()?,
                "'{" => {
                    self.pos -= 1;
                    self.skip_balanced()?;
                    ExprKind::Opaque
                }
                _ => {
                    self.pos -= 1;
                    return Err(self.error("expected expression"));
                }
            },
        };
        let mut expr = Expr {
            kind,
            span: self.span_from(start),
        };
        while self.at("[")
            && matches!(
                expr.kind,
                ExprKind::Ident(_)
                    | ExprKind::Hierarchical(_)
                    | ExprKind::Index { .. }
                    | ExprKind::Select { .. }
            )
        {
            self.bump()?;
            let left = self.parse_expr()?;
            let select = if self.eat(":") {
                Some(SelectKind::Range)
            } else if self.eat("+:") {
                Some(SelectKind::IndexedUp)
            } else if self.eat("-:") {
                Some(SelectKind::IndexedDown)
            } else {
                None
            };
            let kind = match select {
                Some(kind) => {
                    let right = self.parse_expr()?;
                    ExprKind::Select {
                        base: Box::new(expr),
                        kind,
                        left: Box::new(left),
                        right: Box::new(right),
                    }
                }
                None => ExprKind::Index {
                    base: Box::new(expr),
                    index: Box::new(left),
                },
            };
            self.expect("]")?;
            expr = Expr {
                kind,
                span: self.span_from(start),
            };
        }
        Ok(expr)
    }

    /// Parses the remainder of `{...}` after the opening brace.
    fn parse_concat_rest(&mut self) -> PResult<ExprKind> {
        let first = self.parse_expr()?;
        if self.eat("{") {
            let mut items = vec![self.parse_expr()?];
            while self.eat(",") {
                items.push(self.parse_expr()?);
            }
            self.expect("}")?;
            self.expect("}")?;
            return Ok(ExprKind::Replicate {
                count: Box::new(first),
                items,
            });
        }
        let mut items = vec![first];
        while self.eat(",") {
            items.push(self.parse_expr()?);
        }
        self.expect("}")?;
        Ok(ExprKind::Concat(items))
    }

    fn parse_range(&mut self) -> PResult<Range> {
        let start = self.start();
        self.expect("[")?;
        let msb = self.parse_expr()?;
        self.expect(":")?;
        let lsb = self.parse_expr()?;
        self.expect("]")?;
        Ok(Range {
            msb,
            lsb,
            span: self.span_from(start),
        })
    }

    /// Returns the first packed dimension and whether there were more.
    fn parse_packed_dims(&mut self) -> PResult<(Option<Range>, bool)> {
        let mut first = None;
        let mut count = 0;
        while self.at("[") {
            let r = self.parse_range()?;
            if first.is_none() {
                first = Some(r);
            }
            count += 1;
        }
        Ok((first, count > 1))
    }

    // -- Statements --------------------------------------------------------

    fn stmt(&self, kind: StmtKind, start: usize) -> Stmt {
        Stmt {
            kind,
            span: self.span_from(start),
        }
    }

    fn parse_stmt(&mut self) -> PResult<Stmt> {
        let start = self.start();
        while self.at_any(&["unique", "unique0", "priority"]) {
            self.bump()?;
        }
        let Some(t) = self.peek() else {
            return Err(self.error("expected statement"));
        };
        if t.kind == TokenKind::SystemIdent {
            self.skip_to_semi()?;
            return Ok(self.stmt(StmtKind::Other, start));
        }
        match t.text.as_str() {
            "begin" => self.parse_block(start),
            "fork" => {
                self.skip_keyword_block(&["fork"], &["join", "join_any", "join_none"])?;
                if self.eat(":") {
                    self.expect_ident()?;
                }
                Ok(self.stmt(StmtKind::Other, start))
            }
            "if" => {
                self.bump()?;
                self.expect("(")?;
                let cond = self.parse_expr()?;
                self.expect(")")?;
                let then_stmt = Box::new(self.parse_stmt()?);
                let else_stmt = if self.eat("else") {
                    Some(Box::new(self.parse_stmt()?))
                } else {
                    None
                };
                Ok(self.stmt(
                    StmtKind::If {
                        cond,
                        then_stmt,
                        else_stmt,
                    },
                    start,
                ))
            }
            "case" | "casez" | "casex" => self.parse_case(start),
            "for" | "while" | "repeat" => {
                let keyword = self.bump()?.text.clone();
                self.skip_balanced()?;
                let body = Box::new(self.parse_stmt()?);
                Ok(self.stmt(StmtKind::Loop { keyword, body }, start))
            }
            "forever" => {
                self.bump()?;
                let body = Box::new(self.parse_stmt()?);
                Ok(self.stmt(
                    StmtKind::Loop {
                        keyword: "forever".to_string(),
                        body,
                    },
                    start,
                ))
            }
            "do" => {
                self.bump()?;
                let body = Box::new(self.parse_stmt()?);
                self.expect("while")?;
                self.skip_balanced()?;
                self.expect(";")?;
                Ok(self.stmt(
                    StmtKind::Loop {
                        keyword: "do".to_string(),
                        body,
                    },
                    start,
                ))
            }
            "@" | "#" | "wait" => {
                self.skip_timing_control()?;
                let control = self.span_from(start);
                let body = Box::new(self.parse_stmt()?);
                Ok(self.stmt(StmtKind::Timing { control, body }, start))
            }
            ";" => {
                self.bump()?;
                Ok(self.stmt(StmtKind::Null, start))
            }
            "assign" | "deassign" | "force" | "release" | "disable" | "->" | "return"
            | "break" | "continue" => {
                self.skip_to_semi()?;
                Ok(self.stmt(StmtKind::Other, start))
            }
            _ => match self.attempt(|p| p.parse_assignment()) {
                Some(a) => Ok(self.stmt(StmtKind::Assign(a), start)),
                None => {
                    self.skip_to_semi()?;
                    Ok(self.stmt(StmtKind::Other, start))
                }
            },
        }
    }

    fn skip_timing_control(&mut self) -> PResult<()> {
        if self.at("#") {
            return self.skip_delay();
        }
        let is_wait = self.at("wait");
        self.bump()?;
        if self.at("(") {
            self.skip_balanced()
        } else if is_wait {
            Err(self.error("expected `(`"))
        } else if self.eat("*") {
            Ok(())
        } else {
            self.expect_ident()?;
            while self.eat(".") {
                self.expect_ident()?;
            }
            Ok(())
        }
    }

    fn parse_block(&mut self, start: usize) -> PResult<Stmt> {
        self.expect("begin")?;
        let label = if self.eat(":") {
            Some(self.expect_ident()?)
        } else {
            None
        };
        let mut decls = Vec::new();
        let mut stmts = Vec::new();
        while !self.at("end") {
            if self.peek().is_none() {
                return Err(self.error("expected `end`"));
            }
            if self.at_any(NET_TYPES) || self.at_any(&["localparam", "parameter"]) {
                let decl_start = self.start();
                self.skip_to_semi()?;
                decls.push(self.span_from(decl_start));
            } else {
                stmts.push(self.parse_stmt()?);
            }
        }
        self.bump()?;
        if self.eat(":") {
            self.expect_ident()?;
        }
        Ok(self.stmt(
            StmtKind::Block {
                label,
                decls,
                stmts,
            },
            start,
        ))
    }

    fn parse_case(&mut self, start: usize) -> PResult<Stmt> {
        let keyword = self.bump()?.text.clone();
        self.expect("(")?;
        let subject = self.parse_expr()?;
        self.expect(")")?;
        let mut items = Vec::new();
        while !self.eat("endcase") {
            if self.eat("default") {
                self.eat(":");
                items.push(CaseItem {
                    labels: None,
                    body: self.parse_stmt()?,
                });
                continue;
            }
            let mut labels = vec![self.parse_expr()?];
            while self.eat(",") {
                labels.push(self.parse_expr()?);
            }
            self.expect(":")?;
            items.push(CaseItem {
                labels: Some(labels),
                body: self.parse_stmt()?,
            });
        }
        Ok(self.stmt(
            StmtKind::Case {
                keyword,
                subject,
                items,
            },
            start,
        ))
    }

    fn parse_assignment(&mut self) -> PResult<Assignment> {
        let lhs = self.parse_primary()?;
        if !matches!(
            lhs.kind,
            ExprKind::Ident(_)
                | ExprKind::Hierarchical(_)
                | ExprKind::Index { .. }
                | ExprKind::Select { .. }
                | ExprKind::Concat(_)
        ) {
            return Err(self.error("expected assignment target"));
        }
        let op = if self.eat("=") {
            AssignOp::Blocking
        } else if self.eat("<=") {
            AssignOp::NonBlocking
        } else {
            return Err(self.error("expected `=` or `<=`"));
        };
        let delay = if self.at_any(&["#", "@"]) {
            let start = self.start();
            self.skip_timing_control()?;
            Some(self.span_from(start))
        } else {
            None
        };
        let rhs = self.parse_expr()?;
        self.expect(";")?;
        Ok(Assignment {
            lhs,
            op,
            delay,
            rhs,
        })
    }

    // -- Module items ------------------------------------------------------

    fn parse_decl(&mut self) -> PResult<Declaration> {
        let start = self.start();
        let direction = self.peek().and_then(|t| direction_of(&t.text));
        if direction.is_some() {
            self.bump()?;
        }
        let mut net_type = None;
        while self.at_any(NET_TYPES) {
            let t = self.bump()?;
            if !(t.is("var") && net_type.is_some()) {
                net_type = Some(t.text.clone());
            }
        }
        if self.at("(") {
            // Drive or charge strength.
            self.skip_balanced()?;
        }
        let mut signed = false;
        if self.at_any(&["signed", "unsigned"]) {
            signed = self.bump()?.is("signed");
        }
        let (range, multi_packed) = self.parse_packed_dims()?;
        if self.at("#") {
            self.skip_delay()?;
        }
        let mut vars = Vec::new();
        loop {
            let name = self.expect_ident()?;
            let mut unpacked = Vec::new();
            while self.at("[") {
                let s = self.start();
                self.skip_balanced()?;
                unpacked.push(self.span_from(s));
            }
            let init = if self.eat("=") {
                Some(self.parse_expr()?)
            } else {
                None
            };
            vars.push(DeclVar {
                name,
                unpacked,
                init,
            });
            if !self.eat(",") {
                break;
            }
        }
        self.expect(";")?;
        Ok(Declaration {
            span: self.span_from(start),
            direction,
            net_type,
            signed,
            range,
            multi_packed,
            vars,
            ansi: false,
        })
    }

    /// Parses `[parameter|localparam] [type] [signed] [range] name = expr`,
    /// with further `, name = expr` assignments when `multiple` is set.
    fn parse_param(&mut self, multiple: bool, inherit: Option<&ParamDecl>) -> PResult<ParamDecl> {
        let start = self.start();
        let keyword = if self.at_any(&["parameter", "localparam"]) {
            Some(self.bump()?.text.clone())
        } else {
            None
        };
        let mut explicit_type = keyword.is_some();
        while self.at_any(PARAM_TYPES) {
            self.bump()?;
            explicit_type = true;
        }
        let mut signed = false;
        if self.at_any(&["signed", "unsigned"]) {
            signed = self.bump()?.is("signed");
            explicit_type = true;
        }
        let (mut range, multi) = self.parse_packed_dims()?;
        if multi {
            return Err(self.error("multi-dimensional parameters are not supported"));
        }
        let mut local = keyword.as_deref() == Some("localparam");
        if !explicit_type && range.is_none() {
            if let Some(prev) = inherit {
                range = prev.range.clone();
                signed = prev.signed;
                local = prev.local;
            }
        }
        let mut assigns = Vec::new();
        loop {
            let name = self.expect_ident()?;
            self.expect("=")?;
            let value = self.parse_expr()?;
            assigns.push((name, value));
            if !multiple || !self.eat(",") {
                break;
            }
        }
        Ok(ParamDecl {
            span: self.span_from(start),
            local,
            signed,
            range,
            assigns,
        })
    }

    fn parse_continuous_assign(&mut self) -> PResult<ContinuousAssign> {
        let start = self.start();
        self.expect("assign")?;
        let mut has_timing = false;
        if self.at("(") {
            self.skip_balanced()?;
            has_timing = true;
        }
        if self.at("#") {
            self.skip_delay()?;
            has_timing = true;
        }
        let mut assigns = Vec::new();
        loop {
            let lhs = self.parse_primary()?;
            self.expect("=")?;
            let rhs = self.parse_expr()?;
            assigns.push((lhs, rhs));
            if !self.eat(",") {
                break;
            }
        }
        self.expect(";")?;
        Ok(ContinuousAssign {
            span: self.span_from(start),
            assigns,
            has_timing,
        })
    }

    fn parse_instance(&mut self) -> PResult<Instance> {
        let start = self.start();
        let module_name = self.expect_ident()?;
        let mut has_param_override = false;
        if self.at("#") {
            has_param_override = true;
            self.bump()?;
            if self.at("(") {
                self.skip_balanced()?;
            } else {
                self.bump()?;
            }
        }
        let mut names = Vec::new();
        loop {
            let name = self.expect_ident()?;
            while self.at("[") {
                self.skip_balanced()?;
            }
            if !self.at("(") {
                return Err(self.error("expected port connections"));
            }
            self.skip_balanced()?;
            names.push(name);
            if !self.eat(",") {
                break;
            }
        }
        self.expect(";")?;
        Ok(Instance {
            span: self.span_from(start),
            module_name,
            names,
            has_param_override,
        })
    }

    fn opaque(&self, keyword: &str, start: usize) -> Item {
        Item::Opaque {
            keyword: keyword.to_string(),
            span: self.span_from(start),
        }
    }

    fn parse_item(&mut self) -> PResult<Item> {
        let start = self.start();
        let Some(t) = self.peek() else {
            return Err(self.error("expected `endmodule`"));
        };
        let keyword = t.text.as_str();
        let process_kind = match keyword {
            "always" => Some(ProcessKind::Always),
            "always_ff" => Some(ProcessKind::AlwaysFf),
            "always_comb" => Some(ProcessKind::AlwaysComb),
            "always_latch" => Some(ProcessKind::AlwaysLatch),
            "initial" => Some(ProcessKind::Initial),
            "final" => Some(ProcessKind::Final),
            _ => None,
        };
        if let Some(kind) = process_kind {
            self.bump()?;
            let body = self.parse_stmt()?;
            return Ok(Item::Process(Process {
                kind,
                span: self.span_from(start),
                body,
            }));
        }
        if direction_of(keyword).is_some() || NET_TYPES.contains(&keyword) {
            if let Some(d) = self.attempt(|p| p.parse_decl()) {
                return Ok(Item::Decl(d));
            }
            self.skip_to_semi()?;
            return Ok(self.opaque(keyword, start));
        }
        let block_end = match keyword {
            "function" => Some("endfunction"),
            "task" => Some("endtask"),
            "generate" => Some("endgenerate"),
            "specify" => Some("endspecify"),
            "covergroup" => Some("endgroup"),
            "property" => Some("endproperty"),
            "sequence" => Some("endsequence"),
            "clocking" => Some("endclocking"),
            "class" => Some("endclass"),
            _ => None,
        };
        if let Some(close) = block_end {
            self.skip_keyword_block(&[keyword], &[close])?;
            if self.eat(":") {
                self.expect_ident()?;
            }
            return Ok(self.opaque(keyword, start));
        }
        match keyword {
            "parameter" | "localparam" => {
                if let Some(p) = self.attempt(|p| {
                    let decl = p.parse_param(true, None)?;
                    p.expect(";")?;
                    Ok(ParamDecl {
                        span: p.span_from(start),
                        ..decl
                    })
                }) {
                    return Ok(Item::Param(p));
                }
                self.skip_to_semi()?;
                Ok(self.opaque(keyword, start))
            }
            "assign" => {
                if let Some(a) = self.attempt(|p| p.parse_continuous_assign()) {
                    return Ok(Item::Assign(a));
                }
                self.skip_to_semi()?;
                Ok(self.opaque(keyword, start))
            }
            "for" | "if" | "case" => {
                self.skip_generate_construct()?;
                Ok(self.opaque(keyword, start))
            }
            "begin" => {
                self.skip_generate_body()?;
                Ok(self.opaque(keyword, start))
            }
            ";" => {
                self.bump()?;
                Ok(self.opaque(";", start))
            }
            "module" | "macromodule" => Err(self.error("nested module declaration")),
            _ => {
                if self.at_ident() {
                    if let Some(inst) = self.attempt(|p| p.parse_instance()) {
                        return Ok(Item::Instance(inst));
                    }
                }
                let keyword = keyword.to_string();
                self.skip_to_semi()?;
                Ok(self.opaque(&keyword, start))
            }
        }
    }

    fn at_ansi_port_start(&self) -> bool {
        match self.peek() {
            Some(t) => {
                direction_of(&t.text).is_some()
                    || NET_TYPES.contains(&t.text.as_str())
                    || t.is("ref")
                    || (t.is_ident() && self.peek_at(1).map_or(false, |n| n.is_ident() || n.is(".")))
            }
            None => false,
        }
    }

    fn parse_ansi_ports(&mut self, ports: &mut Vec<Declaration>, names: &mut Vec<String>) -> PResult<()> {
        let mut direction = None;
        let mut net_type: Option<String> = None;
        let mut signed = false;
        let mut range: Option<Range> = None;
        let mut multi_packed = false;
        loop {
            let start = self.start();
            if let Some(d) = self.peek().and_then(|t| direction_of(&t.text)) {
                self.bump()?;
                direction = Some(d);
                net_type = None;
                signed = false;
                range = None;
                multi_packed = false;
            }
            let mut typed = false;
            while self.at_any(NET_TYPES) {
                let t = self.bump()?;
                if !(t.is("var") && typed) {
                    net_type = Some(t.text.clone());
                }
                typed = true;
            }
            if self.at_any(&["signed", "unsigned"]) {
                signed = self.bump()?.is("signed");
                typed = true;
            }
            if self.at("[") {
                let (r, multi) = self.parse_packed_dims()?;
                range = r;
                multi_packed = multi;
            } else if typed {
                range = None;
                multi_packed = false;
            }

            let user_type = self.at_ident()
                && self
                    .peek_at(1)
                    .map_or(false, |n| n.is_ident() || n.is(".") || n.is("::"));
            if user_type || self.at("ref") {
                // Interface or user-defined port type: record the name only.
                let mut last = None;
                while !self.at(",") && !self.at(")") {
                    if self.at_any(&["(", "[", "{"]) {
                        self.skip_balanced()?;
                        continue;
                    }
                    let t = self.bump()?;
                    if t.is_ident() {
                        last = Some(t.text.clone());
                    }
                }
                if let Some(name) = last {
                    names.push(name);
                }
            } else {
                let name = self.expect_ident()?;
                let mut unpacked = Vec::new();
                while self.at("[") {
                    let s = self.start();
                    self.skip_balanced()?;
                    unpacked.push(self.span_from(s));
                }
                let init = if self.eat("=") {
                    Some(self.parse_expr()?)
                } else {
                    None
                };
                names.push(name.name.clone());
                ports.push(Declaration {
                    span: self.span_from(start),
                    direction,
                    net_type: net_type.clone(),
                    signed,
                    range: range.clone(),
                    multi_packed,
                    vars: vec![DeclVar {
                        name,
                        unpacked,
                        init,
                    }],
                    ansi: true,
                });
            }
            if !self.eat(",") {
                return Ok(());
            }
        }
    }

    fn parse_module(&mut self) -> PResult<Module> {
        let first_token = self.pos;
        let start = self.start();
        self.bump()?;
        if self.at_any(&["static", "automatic"]) {
            self.bump()?;
        }
        let name = self.expect_ident()?;
        while self.at("import") {
            self.skip_to_semi()?;
        }

        let mut params: Vec<ParamDecl> = Vec::new();
        if self.eat("#") {
            self.expect("(")?;
            if !self.at(")") {
                loop {
                    let p = self.parse_param(false, params.last())?;
                    params.push(p);
                    if !self.eat(",") {
                        break;
                    }
                }
            }
            self.expect(")")?;
        }

        let mut ports = Vec::new();
        let mut port_names = Vec::new();
        if self.eat("(") {
            if !self.at(")") {
                if self.at_ansi_port_start() {
                    self.parse_ansi_ports(&mut ports, &mut port_names)?;
                } else {
                    loop {
                        if self.eat(".") {
                            port_names.push(self.expect_ident()?.name);
                            self.skip_balanced()?;
                        } else if self.at("{") {
                            self.skip_balanced()?;
                        } else {
                            port_names.push(self.expect_ident()?.name);
                            if self.at("[") {
                                self.skip_balanced()?;
                            }
                        }
                        if !self.eat(",") {
                            break;
                        }
                    }
                }
            }
            self.expect(")")?;
        }
        self.expect(";")?;
        let header_end = self.last_end();

        let mut items = Vec::new();
        while !self.at("endmodule") {
            items.push(self.parse_item()?);
        }
        let end_span = self.bump()?.span;
        if self.eat(":") {
            self.expect_ident()?;
        }
        Ok(Module {
            name,
            span: self.span_from(start),
            header_end,
            end_span,
            params,
            port_names,
            ports,
            items,
            tokens: first_token..self.pos,
        })
    }
}

/// Parses `text` into a [`SourceFile`].
pub fn parse_source(text: &str) -> Result<SourceFile, ParseError> {
    let lines = LineIndex::new(text);
    let tokens = scan(text).map_err(|e| ParseError {
        pos: lines.pos(e.offset),
        message: e.message,
        offset: e.offset,
    })?;
    let mut modules = Vec::new();
    {
        let mut p = Parser {
            text,
            tokens: &tokens,
            lines: &lines,
            pos: 0,
        };
        while let Some(t) = p.peek() {
            let close = match t.text.as_str() {
                "module" | "macromodule" => {
                    modules.push(p.parse_module()?);
                    continue;
                }
                "package" => Some("endpackage"),
                "interface" => Some("endinterface"),
                "program" => Some("endprogram"),
                "class" => Some("endclass"),
                "primitive" => Some("endprimitive"),
                "config" => Some("endconfig"),
                "function" => Some("endfunction"),
                "task" => Some("endtask"),
                _ => None,
            };
            match close {
                Some(close) => {
                    let open = t.text.clone();
                    p.skip_keyword_block(&[open.as_str()], &[close])?;
                }
                None => p.pos += 1,
            }
        }
    }
    Ok(SourceFile {
        text: text.to_string(),
        tokens,
        modules,
        lines,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const COUNTER: &str = r#"
module counter #(parameter W = 4) (
  input wire clk,
  input wire rst,
  input wire en,
  output reg [W-1:0] count
);
  wire [W-1:0] next = count + 1'b1;
  always @(posedge clk) begin
    if (rst)
      count <= {W{1'b0}};
    else if (en)
      count <= next;
  end
endmodule
"#;

    #[test]
    fn test_parse_counter() {
        let file = parse_source(COUNTER).unwrap();
        assert_eq!(file.modules.len(), 1);
        let m = &file.modules[0];
        assert_eq!(m.name.name, "counter");
        assert_eq!(m.port_names, vec!["clk", "rst", "en", "count"]);
        assert_eq!(m.params.len(), 1);
        assert_eq!(m.ports[3].net_type.as_deref(), Some("reg"));
        assert_eq!(file.slice(m.ports[3].range.as_ref().unwrap().span), "[W-1:0]");
        assert_eq!(m.items.len(), 2);
        let Item::Process(p) = &m.items[1] else {
            panic!("expected process, got {:?}", m.items[1]);
        };
        let StmtKind::Timing { body, .. } = &p.body.kind else {
            panic!("expected event control");
        };
        let StmtKind::Block { stmts, .. } = &body.kind else {
            panic!("expected block");
        };
        let StmtKind::If { else_stmt, .. } = &stmts[0].kind else {
            panic!("expected if");
        };
        assert!(matches!(
            else_stmt.as_ref().unwrap().kind,
            StmtKind::If { .. }
        ));
        assert!(file.slice(m.span).ends_with("endmodule"));
    }

    #[test]
    fn test_binary_precedence() {
        let file = parse_source("module m; assign y = a + b * c == d & e; endmodule").unwrap();
        let Item::Assign(a) = &file.modules[0].items[0] else {
            panic!();
        };
        let rhs = &a.assigns[0].1;
        let ExprKind::Binary { op, lhs, .. } = &rhs.kind else {
            panic!();
        };
        assert_eq!(op, "&");
        assert_eq!(file.slice(lhs.span), "a + b * c == d");
    }

    #[test]
    fn test_non_ansi_ports_and_instances() {
        let src = r#"
module top(a, b, y);
  input [3:0] a, b;
  output [3:0] y;
  sub #(.W(4)) u0 (.x(a), .y(y));
  sub u1 (b, y), u2 (a, y);
  and g0 (y[0], a[0], b[0]);
endmodule
module sub(x, y); input [3:0] x; output [3:0] y; assign y = x; endmodule
"#;
        let file = parse_source(src).unwrap();
        let m = &file.modules[0];
        assert_eq!(m.port_names, vec!["a", "b", "y"]);
        let instances: Vec<&Instance> = m
            .items
            .iter()
            .filter_map(|i| match i {
                Item::Instance(x) => Some(x),
                _ => None,
            })
            .collect();
        assert_eq!(instances.len(), 2);
        assert!(instances[0].has_param_override);
        assert_eq!(instances[1].names.len(), 2);
        assert!(matches!(m.items.last().unwrap(), Item::Opaque { .. }));
    }

    #[test]
    fn test_unsupported_items_are_opaque() {
        let src = r#"
module m(input [7:0] a, output [7:0] y);
  function [7:0] inc; input [7:0] v; inc = v + 1; endfunction
  genvar i;
  generate for (i = 0; i < 8; i = i + 1) begin : g
    assign y[i] = a[i];
  end endgenerate
  for (i = 0; i < 2; i = i + 1) begin : h end
endmodule
"#;
        let file = parse_source(src).unwrap();
        let keywords: Vec<String> = file.modules[0]
            .items
            .iter()
            .map(|i| match i {
                Item::Opaque { keyword, .. } => keyword.clone(),
                Item::Decl(_) => "decl".to_string(),
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(keywords, vec!["function", "decl", "generate", "for"]);
    }

    #[test]
    fn test_case_and_statement_forms() {
        let src = r#"
module m(input clk, input [1:0] s, output reg [3:0] q);
  integer k;
  always @(posedge clk) begin : blk
    reg t;
    case (s)
      2'd0, 2'd1: q <= 4'd1;
      default: begin q <= #1 4'd2; $display("x"); end
    endcase
    for (k = 0; k < 2; k = k + 1) q[k] <= 1'b0;
    repeat (2) @(posedge clk);
  end
endmodule
"#;
        let file = parse_source(src).unwrap();
        let p = file.modules[0].processes().next().unwrap();
        let mut kinds = Vec::new();
        p.body.walk(&mut |s| {
            kinds.push(match &s.kind {
                StmtKind::Block { .. } => "block",
                StmtKind::If { .. } => "if",
                StmtKind::Case { .. } => "case",
                StmtKind::Loop { .. } => "loop",
                StmtKind::Assign(_) => "assign",
                StmtKind::Timing { .. } => "timing",
                StmtKind::Null => "null",
                StmtKind::Other => "other",
            })
        });
        assert_eq!(
            kinds,
            vec![
                "timing", "block", "case", "assign", "block", "assign", "other", "loop",
                "assign", "loop", "timing", "null"
            ]
        );
    }

    #[test]
    fn test_error_position() {
        let err = parse_source("module m;\n  always begin\n    q <= 1;\nendmodule\n").unwrap_err();
        assert_eq!(err.pos.lineno, 4);
        let err = parse_source("module m;\n  wire w\nendmodule\n").unwrap_err();
        assert_eq!(err.pos.lineno, 3);
    }
}
