// SPDX-License-Identifier: Apache-2.0

//! Concrete syntax tree for the subset of Verilog/SystemVerilog the mutation
//! operators understand. Every node keeps the byte span it was parsed from;
//! constructs outside the subset are kept as opaque spans.

use crate::verilog::lexer::{LineIndex, Span, Token};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectKind {
    /// `[msb:lsb]`
    Range,
    /// `[base +: width]`
    IndexedUp,
    /// `[base -: width]`
    IndexedDown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprKind {
    Ident(String),
    /// Dotted hierarchical reference such as `u0.state`.
    Hierarchical(String),
    Macro(String),
    Number(String),
    Str,
    Unary {
        op: String,
        operand: Box<Expr>,
    },
    Binary {
        op: String,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Ternary {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    Select {
        base: Box<Expr>,
        kind: SelectKind,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Concat(Vec<Expr>),
    Replicate {
        count: Box<Expr>,
        items: Vec<Expr>,
    },
    Call {
        name: String,
        system: bool,
        args: Vec<Expr>,
    },
    Paren(Box<Expr>),
    /// Anything else that parsed as a balanced token group.
    Opaque,
}

impl Expr {
    /// Pre-order traversal of this expression and all subexpressions.
    pub fn walk<'a>(&'a self, f: &mut dyn FnMut(&'a Expr)) {
        f(self);
        match &self.kind {
            ExprKind::Unary { operand, .. } => operand.walk(f),
            ExprKind::Binary { lhs, rhs, .. } => {
                lhs.walk(f);
                rhs.walk(f);
            }
            ExprKind::Ternary {
                cond,
                then_expr,
                else_expr,
            } => {
                cond.walk(f);
                then_expr.walk(f);
                else_expr.walk(f);
            }
            ExprKind::Index { base, index } => {
                base.walk(f);
                index.walk(f);
            }
            ExprKind::Select {
                base, left, right, ..
            } => {
                base.walk(f);
                left.walk(f);
                right.walk(f);
            }
            ExprKind::Concat(items) => items.iter().for_each(|e| e.walk(f)),
            ExprKind::Replicate { count, items } => {
                count.walk(f);
                items.iter().for_each(|e| e.walk(f));
            }
            ExprKind::Call { args, .. } => args.iter().for_each(|e| e.walk(f)),
            ExprKind::Paren(inner) => inner.walk(f),
            ExprKind::Ident(_)
            | ExprKind::Hierarchical(_)
            | ExprKind::Macro(_)
            | ExprKind::Number(_)
            | ExprKind::Str
            | ExprKind::Opaque => {}
        }
    }

    /// Names of all simple identifiers referenced, in first-use order.
    pub fn referenced_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        self.walk(&mut |e| {
            if let ExprKind::Ident(name) = &e.kind {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        });
        names
    }

    /// True if evaluating the expression may have effects or may observe
    /// anything besides signal values: calls, hierarchical references,
    /// macros and unparsed fragments.
    pub fn is_impure(&self) -> bool {
        let mut impure = false;
        self.walk(&mut |e| {
            if matches!(
                e.kind,
                ExprKind::Call { .. }
                    | ExprKind::Hierarchical(_)
                    | ExprKind::Macro(_)
                    | ExprKind::Opaque
                    | ExprKind::Str
            ) {
                impure = true;
            }
        });
        impure
    }

    /// True if any literal in the expression is a real number.
    pub fn has_real_literal(&self) -> bool {
        let mut real = false;
        self.walk(&mut |e| {
            if let ExprKind::Number(text) = &e.kind {
                if !text.contains('\'') && (text.contains('.') || text.contains(['e', 'E'])) {
                    real = true;
                }
            }
        });
        real
    }

    pub fn as_ident(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Ident(name) => Some(name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Blocking,
    NonBlocking,
}

impl AssignOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignOp::Blocking => "=",
            AssignOp::NonBlocking => "<=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub lhs: Expr,
    pub op: AssignOp,
    /// Intra-assignment timing control, e.g. `#1` in `q <= #1 d;`.
    pub delay: Option<Span>,
    pub rhs: Expr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseItem {
    /// `None` for the `default` item.
    pub labels: Option<Vec<Expr>>,
    pub body: Stmt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StmtKind {
    Block {
        label: Option<Ident>,
        /// Spans of block-local declarations.
        decls: Vec<Span>,
        stmts: Vec<Stmt>,
    },
    If {
        cond: Expr,
        then_stmt: Box<Stmt>,
        else_stmt: Option<Box<Stmt>>,
    },
    Case {
        keyword: String,
        subject: Expr,
        items: Vec<CaseItem>,
    },
    /// `for`, `while`, `repeat`, `forever` and `do`.
    Loop {
        keyword: String,
        body: Box<Stmt>,
    },
    Assign(Assignment),
    /// `@(...) stmt`, `#d stmt` or `wait (...) stmt`.
    Timing {
        control: Span,
        body: Box<Stmt>,
    },
    Null,
    /// Task calls, `disable`, event triggers and anything else kept opaque.
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

impl Stmt {
    /// Pre-order traversal of this statement and all nested statements.
    pub fn walk<'a>(&'a self, f: &mut dyn FnMut(&'a Stmt)) {
        f(self);
        match &self.kind {
            StmtKind::Block { stmts, .. } => stmts.iter().for_each(|s| s.walk(f)),
            StmtKind::If {
                then_stmt,
                else_stmt,
                ..
            } => {
                then_stmt.walk(f);
                if let Some(e) = else_stmt {
                    e.walk(f);
                }
            }
            StmtKind::Case { items, .. } => items.iter().for_each(|i| i.body.walk(f)),
            StmtKind::Loop { body, .. } | StmtKind::Timing { body, .. } => body.walk(f),
            StmtKind::Assign(_) | StmtKind::Null | StmtKind::Other => {}
        }
    }

    /// Every expression directly owned by this statement (not by nested
    /// statements).
    pub fn own_exprs(&self) -> Vec<&Expr> {
        match &self.kind {
            StmtKind::If { cond, .. } => vec![cond],
            StmtKind::Case {
                subject, items, ..
            } => {
                let mut v = vec![subject];
                for item in items {
                    if let Some(labels) = &item.labels {
                        v.extend(labels.iter());
                    }
                }
                v
            }
            StmtKind::Assign(a) => vec![&a.lhs, &a.rhs],
            _ => vec![],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
    Inout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Range {
    pub msb: Expr,
    pub lsb: Expr,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclVar {
    pub name: Ident,
    /// Unpacked dimensions, verbatim.
    pub unpacked: Vec<Span>,
    pub init: Option<Expr>,
}

/// A net, variable or port declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub span: Span,
    pub direction: Option<Direction>,
    /// `wire`, `reg`, `logic`, `integer`, ...
    pub net_type: Option<String>,
    pub signed: bool,
    pub range: Option<Range>,
    /// More than one packed dimension; the width is not tracked.
    pub multi_packed: bool,
    pub vars: Vec<DeclVar>,
    /// Declared in an ANSI-style module header.
    pub ansi: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamDecl {
    pub span: Span,
    pub local: bool,
    pub signed: bool,
    pub range: Option<Range>,
    pub assigns: Vec<(Ident, Expr)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuousAssign {
    pub span: Span,
    pub assigns: Vec<(Expr, Expr)>,
    /// A drive strength or delay precedes the assignments.
    pub has_timing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessKind {
    Always,
    AlwaysFf,
    AlwaysComb,
    AlwaysLatch,
    Initial,
    Final,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Process {
    pub kind: ProcessKind,
    pub span: Span,
    pub body: Stmt,
}

/// One instantiation statement, possibly declaring several instances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub span: Span,
    pub module_name: Ident,
    pub names: Vec<Ident>,
    pub has_param_override: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    Decl(Declaration),
    Param(ParamDecl),
    Assign(ContinuousAssign),
    Process(Process),
    Instance(Instance),
    /// Functions, tasks, generate regions and other unparsed items.
    Opaque { keyword: String, span: Span },
}

impl Item {
    pub fn span(&self) -> Span {
        match self {
            Item::Decl(d) => d.span,
            Item::Param(p) => p.span,
            Item::Assign(a) => a.span,
            Item::Process(p) => p.span,
            Item::Instance(i) => i.span,
            Item::Opaque { span, .. } => *span,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    pub name: Ident,
    /// From `module` through `endmodule` (and its optional label).
    pub span: Span,
    /// Offset just past the `;` that ends the header.
    pub header_end: usize,
    /// Span of the `endmodule` keyword.
    pub end_span: Span,
    /// Header parameter ports, `#(parameter ...)`.
    pub params: Vec<ParamDecl>,
    /// Port names in header order.
    pub port_names: Vec<String>,
    /// ANSI port declarations.
    pub ports: Vec<Declaration>,
    pub items: Vec<Item>,
    /// Index range of this module's tokens in `SourceFile::tokens`.
    pub tokens: std::ops::Range<usize>,
}

impl Module {
    /// All declarations, header and body.
    pub fn declarations(&self) -> impl Iterator<Item = &Declaration> {
        self.ports.iter().chain(self.items.iter().filter_map(|i| match i {
            Item::Decl(d) => Some(d),
            _ => None,
        }))
    }

    pub fn processes(&self) -> impl Iterator<Item = &Process> {
        self.items.iter().filter_map(|i| match i {
            Item::Process(p) => Some(p),
            _ => None,
        })
    }

    pub fn opaque_spans(&self) -> impl Iterator<Item = Span> + '_ {
        self.items.iter().filter_map(|i| match i {
            Item::Opaque { span, .. } => Some(*span),
            _ => None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SourceFile {
    pub text: String,
    pub tokens: Vec<Token>,
    pub modules: Vec<Module>,
    pub lines: LineIndex,
}

impl SourceFile {
    pub fn slice(&self, span: Span) -> &str {
        span.slice(&self.text)
    }

    pub fn module_by_name(&self, name: &str) -> Option<(usize, &Module)> {
        self.modules
            .iter()
            .enumerate()
            .find(|(_, m)| m.name.name == name)
    }

    /// Tokens of module `idx`.
    pub fn module_tokens(&self, idx: usize) -> &[Token] {
        &self.tokens[self.modules[idx].tokens.clone()]
    }
}
