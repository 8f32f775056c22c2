// SPDX-License-Identifier: Apache-2.0

//! Per-module symbol tables and self-determined expression widths.
//!
//! Widths are only reported when they can be established from constant
//! declarations; operators that need a width refuse to fire otherwise.

use std::collections::{BTreeMap, BTreeSet};

use rand::Rng;

use crate::verilog::cst::*;
use crate::verilog::lexer::TokenKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    pub name: String,
    pub direction: Option<Direction>,
    pub net_type: Option<String>,
    pub signed: bool,
    /// Constant packed range `(msb, lsb)`.
    pub range: Option<(i64, i64)>,
    /// The packed range as written, e.g. `[W-1:0]`.
    pub range_text: Option<String>,
    /// The packed dimensions could not be evaluated.
    pub packed_unknown: bool,
    /// Has unpacked dimensions.
    pub array: bool,
    pub has_init: bool,
    /// Listed in the module header.
    pub port: bool,
    /// Number of declarations naming the signal.
    pub decl_count: usize,
}

impl Signal {
    pub fn width(&self) -> Option<u64> {
        if self.packed_unknown {
            return None;
        }
        if let Some((msb, lsb)) = self.range {
            return Some(msb.abs_diff(lsb) + 1);
        }
        match self.net_type.as_deref() {
            Some("integer") | Some("int") => Some(32),
            Some("byte") => Some(8),
            Some("shortint") => Some(16),
            Some("longint") | Some("time") => Some(64),
            Some("real") | Some("realtime") | Some("shortreal") | Some("genvar") => None,
            _ => Some(1),
        }
    }

    pub fn is_variable(&self) -> bool {
        matches!(self.net_type.as_deref(), Some("reg") | Some("logic"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamInfo {
    /// `None` when the value may be overridden or is not constant.
    pub value: Option<i64>,
    pub width: Option<u64>,
    pub signed: bool,
    pub local: bool,
}

/// Parsed numeric literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Literal {
    width: Option<u64>,
    signed: bool,
    value: Option<i64>,
}

fn parse_literal(text: &str) -> Literal {
    let clean: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '_')
        .collect();
    let Some(tick) = clean.find('\'') else {
        if clean.chars().all(|c| c.is_ascii_digit()) {
            return Literal {
                width: Some(32),
                signed: true,
                value: clean.parse().ok(),
            };
        }
        // Real numbers and time literals.
        return Literal {
            width: None,
            signed: false,
            value: None,
        };
    };
    let size = &clean[..tick];
    let mut rest = &clean[tick + 1..];
    if matches!(rest, "0" | "1" | "x" | "X" | "z" | "Z") {
        return Literal {
            width: Some(1),
            signed: false,
            value: rest.parse().ok(),
        };
    }
    let mut signed = false;
    if rest.starts_with(['s', 'S']) {
        signed = true;
        rest = &rest[1..];
    }
    let radix = match rest.chars().next() {
        Some('b') | Some('B') => 2,
        Some('o') | Some('O') => 8,
        Some('d') | Some('D') => 10,
        Some('h') | Some('H') => 16,
        _ => {
            return Literal {
                width: None,
                signed,
                value: None,
            }
        }
    };
    let digits = &rest[1..];
    let width = if size.is_empty() {
        Some(32)
    } else {
        size.parse().ok()
    };
    Literal {
        width,
        signed,
        value: i64::from_str_radix(digits, radix).ok(),
    }
}

#[derive(Debug, Clone, Default)]
pub struct ModuleScope {
    pub name: String,
    pub signals: BTreeMap<String, Signal>,
    pub params: BTreeMap<String, ParamInfo>,
    pub port_names: Vec<String>,
}

impl ModuleScope {
    fn new(file: &SourceFile, module: &Module, params_overridable: bool) -> Self {
        let mut scope = ModuleScope {
            name: module.name.name.clone(),
            port_names: module.port_names.clone(),
            ..Default::default()
        };
        let body_params = module.items.iter().filter_map(|i| match i {
            Item::Param(p) => Some(p),
            _ => None,
        });
        for decl in module.params.iter().chain(body_params) {
            for (name, value) in &decl.assigns {
                let declared_width = decl
                    .range
                    .as_ref()
                    .and_then(|r| Some(scope.const_eval(&r.msb)?.abs_diff(scope.const_eval(&r.lsb)?) + 1));
                let info = ParamInfo {
                    value: if decl.local || !params_overridable {
                        scope.const_eval(value)
                    } else {
                        None
                    },
                    width: match &decl.range {
                        Some(_) => declared_width,
                        None => scope.width(value).or(Some(32)),
                    },
                    signed: decl.signed || (decl.range.is_none() && scope.signed(value)),
                    local: decl.local,
                };
                scope.params.insert(name.name.clone(), info);
            }
        }

        for decl in module.declarations() {
            let range = decl.range.as_ref().and_then(|r| {
                Some((scope.const_eval(&r.msb)?, scope.const_eval(&r.lsb)?))
            });
            let packed_unknown = decl.multi_packed || (decl.range.is_some() && range.is_none());
            let range_text = decl.range.as_ref().map(|r| file.slice(r.span).to_string());
            let signed = decl.signed
                || matches!(
                    decl.net_type.as_deref(),
                    Some("integer") | Some("int") | Some("byte") | Some("shortint") | Some("longint")
                );
            for var in &decl.vars {
                let name = var.name.name.clone();
                let port = scope.port_names.contains(&name);
                let entry = scope.signals.entry(name.clone()).or_insert_with(|| Signal {
                    name,
                    direction: None,
                    net_type: None,
                    signed: false,
                    range: None,
                    range_text: None,
                    packed_unknown: false,
                    array: false,
                    has_init: false,
                    port,
                    decl_count: 0,
                });
                entry.decl_count += 1;
                entry.direction = entry.direction.or(decl.direction);
                if decl.net_type.is_some() {
                    entry.net_type = decl.net_type.clone();
                }
                entry.signed |= signed;
                if decl.range.is_some() {
                    entry.range = range;
                    entry.range_text = range_text.clone();
                    entry.packed_unknown = packed_unknown;
                }
                entry.array |= !var.unpacked.is_empty();
                entry.has_init |= var.init.is_some();
            }
        }
        scope
    }

    pub fn signal(&self, name: &str) -> Option<&Signal> {
        self.signals.get(name)
    }

    pub fn is_param(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }

    /// Evaluates a constant integer expression over known parameters.
    pub fn const_eval(&self, expr: &Expr) -> Option<i64> {
        match &expr.kind {
            ExprKind::Number(text) => parse_literal(text).value,
            ExprKind::Ident(name) => self.params.get(name)?.value,
            ExprKind::Paren(inner) => self.const_eval(inner),
            ExprKind::Unary { op, operand } => {
                let v = self.const_eval(operand)?;
                match op.as_str() {
                    "+" => Some(v),
                    "-" => v.checked_neg(),
                    "!" => Some((v == 0) as i64),
                    _ => None,
                }
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let a = self.const_eval(lhs)?;
                let b = self.const_eval(rhs)?;
                match op.as_str() {
                    "+" => a.checked_add(b),
                    "-" => a.checked_sub(b),
                    "*" => a.checked_mul(b),
                    "/" => a.checked_div(b),
                    "%" => a.checked_rem(b),
                    "<<" | "<<<" => a.checked_shl(u32::try_from(b).ok()?),
                    ">>" | ">>>" => a.checked_shr(u32::try_from(b).ok()?),
                    "**" => a.checked_pow(u32::try_from(b).ok()?),
                    "==" => Some((a == b) as i64),
                    "!=" => Some((a != b) as i64),
                    "<" => Some((a < b) as i64),
                    "<=" => Some((a <= b) as i64),
                    ">" => Some((a > b) as i64),
                    ">=" => Some((a >= b) as i64),
                    "&&" => Some((a != 0 && b != 0) as i64),
                    "||" => Some((a != 0 || b != 0) as i64),
                    _ => None,
                }
            }
            ExprKind::Ternary {
                cond,
                then_expr,
                else_expr,
            } => {
                if self.const_eval(cond)? != 0 {
                    self.const_eval(then_expr)
                } else {
                    self.const_eval(else_expr)
                }
            }
            _ => None,
        }
    }

    /// Self-determined width of `expr`, if it can be established.
    pub fn width(&self, expr: &Expr) -> Option<u64> {
        match &expr.kind {
            ExprKind::Number(text) => parse_literal(text).width,
            ExprKind::Ident(name) => {
                if let Some(signal) = self.signals.get(name) {
                    if signal.array {
                        None
                    } else {
                        signal.width()
                    }
                } else {
                    self.params.get(name)?.width
                }
            }
            ExprKind::Paren(inner) => self.width(inner),
            ExprKind::Unary { op, operand } => match op.as_str() {
                "+" | "-" | "~" => self.width(operand),
                _ => Some(1),
            },
            ExprKind::Binary { op, lhs, rhs } => match op.as_str() {
                "&&" | "||" | "==" | "!=" | "===" | "!==" | "<" | "<=" | ">" | ">=" => Some(1),
                "<<" | ">>" | "<<<" | ">>>" | "**" => self.width(lhs),
                _ => Some(self.width(lhs)?.max(self.width(rhs)?)),
            },
            ExprKind::Ternary {
                then_expr,
                else_expr,
                ..
            } => Some(self.width(then_expr)?.max(self.width(else_expr)?)),
            ExprKind::Index { base, .. } => match &base.kind {
                ExprKind::Ident(name) => {
                    let signal = self.signals.get(name)?;
                    if signal.array {
                        signal.width()
                    } else {
                        Some(1)
                    }
                }
                _ => Some(1),
            },
            ExprKind::Select {
                kind, left, right, ..
            } => match kind {
                SelectKind::Range => Some(
                    self.const_eval(left)?
                        .abs_diff(self.const_eval(right)?)
                        + 1,
                ),
                SelectKind::IndexedUp | SelectKind::IndexedDown => {
                    u64::try_from(self.const_eval(right)?).ok()
                }
            },
            ExprKind::Concat(items) => items.iter().map(|e| self.width(e)).sum(),
            ExprKind::Replicate { count, items } => {
                let count = u64::try_from(self.const_eval(count)?).ok()?;
                let inner: Option<u64> = items.iter().map(|e| self.width(e)).sum();
                count.checked_mul(inner?)
            }
            ExprKind::Call {
                name,
                system: true,
                args,
            } if (name == "$signed" || name == "$unsigned") && args.len() == 1 => {
                self.width(&args[0])
            }
            _ => None,
        }
    }

    /// Whether `expr` is signed when self-determined.
    pub fn signed(&self, expr: &Expr) -> bool {
        match &expr.kind {
            ExprKind::Number(text) => parse_literal(text).signed,
            ExprKind::Ident(name) => match self.signals.get(name) {
                Some(s) => s.signed,
                None => self.params.get(name).map_or(false, |p| p.signed),
            },
            ExprKind::Paren(inner) => self.signed(inner),
            ExprKind::Unary { op, operand } => {
                matches!(op.as_str(), "+" | "-" | "~") && self.signed(operand)
            }
            ExprKind::Binary { op, lhs, rhs } => match op.as_str() {
                "+" | "-" | "*" | "/" | "%" | "&" | "|" | "^" | "~^" | "^~" => {
                    self.signed(lhs) && self.signed(rhs)
                }
                "<<" | ">>" | "<<<" | ">>>" | "**" => self.signed(lhs),
                _ => false,
            },
            ExprKind::Ternary {
                then_expr,
                else_expr,
                ..
            } => self.signed(then_expr) && self.signed(else_expr),
            ExprKind::Index { base, .. } => match &base.kind {
                ExprKind::Ident(name) => self.signals.get(name).map_or(false, |s| s.array && s.signed),
                _ => false,
            },
            ExprKind::Call { name, system, .. } => *system && name == "$signed",
            _ => false,
        }
    }
}

/// Symbol tables for every module of a source file.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub modules: Vec<ModuleScope>,
    identifiers: BTreeSet<String>,
}

impl Analysis {
    pub fn new(file: &SourceFile) -> Self {
        let mut overridden: BTreeSet<&str> = BTreeSet::new();
        let mut has_defparam = false;
        for module in &file.modules {
            for item in &module.items {
                match item {
                    Item::Instance(inst) if inst.has_param_override => {
                        overridden.insert(&inst.module_name.name);
                    }
                    Item::Opaque { keyword, .. } if keyword == "defparam" => has_defparam = true,
                    _ => {}
                }
            }
        }
        let modules = file
            .modules
            .iter()
            .map(|m| {
                ModuleScope::new(
                    file,
                    m,
                    has_defparam || overridden.contains(m.name.name.as_str()),
                )
            })
            .collect();
        let identifiers = file
            .tokens
            .iter()
            .filter(|t| matches!(t.kind, TokenKind::Ident | TokenKind::Macro))
            .map(|t| t.text.clone())
            .collect();
        Analysis {
            modules,
            identifiers,
        }
    }

    pub fn fresh_names(&self) -> FreshNames {
        FreshNames {
            taken: self.identifiers.clone(),
        }
    }
}

/// Generates identifiers that collide with nothing in the file.
#[derive(Debug, Clone)]
pub struct FreshNames {
    taken: BTreeSet<String>,
}

impl FreshNames {
    pub fn fresh<R: Rng + ?Sized>(&mut self, prefix: &str, rng: &mut R) -> String {
        loop {
            let candidate = format!("{}_{:04x}", prefix, rng.gen::<u16>());
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
        }
    }
}
