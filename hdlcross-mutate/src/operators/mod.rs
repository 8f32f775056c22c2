// SPDX-License-Identifier: Apache-2.0

//! Semantics-preserving rewrites of Verilog/SystemVerilog modules.
//!
//! Each operator finds candidate sites whose preconditions hold and turns a
//! chosen site into byte edits of the original text. Equivalence is under
//! two-valued stimulus.

pub mod change_binary_op;
pub mod change_unary_op;
pub mod duplicate_cond;
pub mod duplicate_expr;
pub mod duplicate_module;
pub mod if_to_case;
pub mod loop_assignment;
pub mod make_array;
pub mod make_function;
pub mod make_loop_generate;
pub mod make_repeat;
pub mod redundant_assignment;
pub mod remove_cond;
pub mod split_assignment;

use std::fmt::{self, Debug};
use std::str::FromStr;

use anyhow::Result;
use rand_pcg::Pcg64Mcg;
use serde::{Deserialize, Serialize};

use crate::edit::Edit;
use crate::verilog::cst::*;
use crate::verilog::width::{ModuleScope, Signal};
use crate::verilog::{Analysis, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OperatorKind {
    MakeRepeat,
    MakeLoopGenerate,
    LoopAssignment,
    RemoveCond,
    DuplicateCond,
    IfToCase,
    SplitAssignment,
    RedundantAssignment,
    MakeArray,
    ChangeBinaryOp,
    ChangeUnaryOp,
    DuplicateExpr,
    MakeFunction,
    DuplicateModule,
}

impl OperatorKind {
    pub const ALL: [OperatorKind; 14] = [
        OperatorKind::MakeRepeat,
        OperatorKind::MakeLoopGenerate,
        OperatorKind::LoopAssignment,
        OperatorKind::RemoveCond,
        OperatorKind::DuplicateCond,
        OperatorKind::IfToCase,
        OperatorKind::SplitAssignment,
        OperatorKind::RedundantAssignment,
        OperatorKind::MakeArray,
        OperatorKind::ChangeBinaryOp,
        OperatorKind::ChangeUnaryOp,
        OperatorKind::DuplicateExpr,
        OperatorKind::MakeFunction,
        OperatorKind::DuplicateModule,
    ];
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl FromStr for OperatorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperatorKind::ALL
            .iter()
            .copied()
            .find(|k| k.to_string() == s)
            .ok_or_else(|| format!("unknown mutation operator: {}", s))
    }
}

/// The syntax a candidate was found on, captured at search time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Stmt(Stmt),
    Item(Item),
    Expr(Expr),
    /// Right-hand side of an assignment to the whole signal `target`.
    Rhs { target: String, rhs: Expr },
    Signal(String),
    /// A module and the name spans of the statements instantiating it.
    Module { name: String, instance_sites: Vec<Span> },
}

/// A site where an operator's preconditions hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Index into `SourceFile::modules`.
    pub module: usize,
    /// Identifies the site; unique per operator within one file.
    pub span: Span,
    pub target: Target,
}

pub trait MutationOperator: Debug + Send + Sync {
    fn kind(&self) -> OperatorKind;

    /// Finds every site in `file` where this operator's preconditions hold.
    fn find_candidates(&self, file: &SourceFile, analysis: &Analysis) -> Vec<Candidate>;

    /// Produces the edits realizing this operator at `candidate`. Fresh
    /// names and other choices are drawn from `rng`.
    fn rewrite(
        &self,
        file: &SourceFile,
        analysis: &Analysis,
        candidate: &Candidate,
        rng: &mut Pcg64Mcg,
    ) -> Result<Vec<Edit>>;
}

pub fn all_operators() -> Vec<Box<dyn MutationOperator>> {
    vec![
        Box::new(make_repeat::MakeRepeat),
        Box::new(make_loop_generate::MakeLoopGenerate),
        Box::new(loop_assignment::LoopAssignment),
        Box::new(remove_cond::RemoveCond),
        Box::new(duplicate_cond::DuplicateCond),
        Box::new(if_to_case::IfToCase),
        Box::new(split_assignment::SplitAssignment),
        Box::new(redundant_assignment::RedundantAssignment),
        Box::new(make_array::MakeArray),
        Box::new(change_binary_op::ChangeBinaryOp),
        Box::new(change_unary_op::ChangeUnaryOp),
        Box::new(duplicate_expr::DuplicateExpr),
        Box::new(make_function::MakeFunction),
        Box::new(duplicate_module::DuplicateModule),
    ]
}

// -- Shared helpers ---------------------------------------------------------

/// Every statement of every process in `module`, pre-order.
pub(crate) fn procedural_stmts(module: &Module) -> Vec<&Stmt> {
    let mut out = Vec::new();
    for p in module.processes() {
        p.body.walk(&mut |s| out.push(s));
    }
    out
}

/// An assignment with its kind; `None` for continuous assignments.
pub(crate) struct AssignSite<'a> {
    pub lhs: &'a Expr,
    pub rhs: &'a Expr,
    pub procedural: Option<AssignOp>,
}

pub(crate) fn assign_sites(module: &Module) -> Vec<AssignSite<'_>> {
    let mut out = Vec::new();
    for item in &module.items {
        if let Item::Assign(a) = item {
            for (lhs, rhs) in &a.assigns {
                out.push(AssignSite {
                    lhs,
                    rhs,
                    procedural: None,
                });
            }
        }
    }
    for s in procedural_stmts(module) {
        if let StmtKind::Assign(a) = &s.kind {
            out.push(AssignSite {
                lhs: &a.lhs,
                rhs: &a.rhs,
                procedural: Some(a.op),
            });
        }
    }
    out
}

/// The signal `lhs` names as a whole, if it is a declared non-array.
pub(crate) fn whole_signal<'a>(scope: &'a ModuleScope, lhs: &Expr) -> Option<&'a Signal> {
    let signal = scope.signal(lhs.as_ident()?)?;
    (!signal.array).then_some(signal)
}

pub(crate) fn is_net(signal: &Signal) -> bool {
    matches!(
        signal.net_type.as_deref(),
        None | Some("wire") | Some("tri") | Some("uwire")
    )
}

/// True if `expr` may evaluate to a real number.
pub(crate) fn touches_real(scope: &ModuleScope, expr: &Expr) -> bool {
    expr.has_real_literal()
        || expr.referenced_names().iter().any(|n| {
            scope.signal(n).map_or(false, |s| {
                matches!(
                    s.net_type.as_deref(),
                    Some("real") | Some("realtime") | Some("shortreal")
                )
            })
        })
}

/// Bit-by-bit preconditions shared by the loop and split rewrites: a whole
/// vector target of known width at least 2 and a pure right-hand side at
/// least as wide. Returns the target's `(msb, lsb)`.
pub(crate) fn bitwise_target(scope: &ModuleScope, lhs: &Expr, rhs: &Expr) -> Option<(i64, i64)> {
    let signal = whole_signal(scope, lhs)?;
    let width = signal.width()?;
    let range = signal.range?;
    if width < 2 || rhs.is_impure() || touches_real(scope, rhs) {
        return None;
    }
    (scope.width(rhs)? >= width).then_some(range)
}

/// Index expression selecting bit `offset` (counted from the LSB) of a
/// vector declared `[msb:lsb]`.
pub(crate) fn bit_index(range: (i64, i64), offset: &str) -> String {
    let (msb, lsb) = range;
    if msb < lsb {
        format!("{} - {}", lsb, offset)
    } else if lsb == 0 {
        offset.to_string()
    } else {
        format!("{} + {}", lsb, offset)
    }
}

/// Leading whitespace of the line containing `offset`.
pub(crate) fn indent_at(text: &str, offset: usize) -> &str {
    let line_start = text[..offset].rfind('\n').map_or(0, |i| i + 1);
    let rest = &text[line_start..];
    let len = rest.len() - rest.trim_start_matches([' ', '\t']).len();
    &rest[..len]
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;
    use crate::edit::apply_edits;
    use crate::verilog::parse_source;
    use rand::SeedableRng;

    /// Candidates `op` finds in `src`.
    pub fn candidates(op: &dyn MutationOperator, src: &str) -> Vec<Candidate> {
        let file = parse_source(src).unwrap();
        let analysis = Analysis::new(&file);
        op.find_candidates(&file, &analysis)
    }

    /// Applies `op` at its `index`th candidate and returns the re-parsed
    /// mutant text.
    pub fn apply_at(op: &dyn MutationOperator, src: &str, index: usize, seed: u64) -> String {
        let file = parse_source(src).unwrap();
        let analysis = Analysis::new(&file);
        let candidates = op.find_candidates(&file, &analysis);
        let mut rng = Pcg64Mcg::seed_from_u64(seed);
        let edits = op
            .rewrite(&file, &analysis, &candidates[index], &mut rng)
            .unwrap();
        let text = apply_edits(src, &edits).unwrap();
        if let Err(e) = parse_source(&text) {
            panic!("mutant does not parse: {}\n{}", e, text);
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_operator_names_round_trip() {
        for kind in OperatorKind::ALL {
            assert_eq!(kind.to_string().parse::<OperatorKind>(), Ok(kind));
        }
        assert!("Nope".parse::<OperatorKind>().is_err());
    }

    #[test]
    fn test_all_operators_cover_every_kind() {
        let kinds: Vec<OperatorKind> = all_operators().iter().map(|o| o.kind()).collect();
        assert_eq!(kinds, OperatorKind::ALL.to_vec());
    }

    #[test]
    fn test_bit_index() {
        assert_eq!(bit_index((7, 0), "g"), "g");
        assert_eq!(bit_index((8, 1), "g"), "1 + g");
        assert_eq!(bit_index((0, 7), "g"), "7 - g");
    }
}
