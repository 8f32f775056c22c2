// SPDX-License-Identifier: Apache-2.0

use anyhow::{bail, Result};
use rand::Rng;
use rand_pcg::Pcg64Mcg;

use crate::edit::Edit;
use crate::operators::{
    assign_sites, touches_real, Candidate, MutationOperator, OperatorKind, Target,
};
use crate::verilog::cst::*;
use crate::verilog::Analysis;

/// Replaces a right-hand-side subexpression `e` by `((e) & (e))` or
/// `((e) | (e))`.
#[derive(Debug)]
pub struct DuplicateExpr;

/// Subexpressions that may be rewritten. Operands of selects, replication
/// counts and call arguments must stay as written.
fn rewritable<'a>(e: &'a Expr, out: &mut Vec<&'a Expr>) {
    out.push(e);
    match &e.kind {
        ExprKind::Unary { operand, .. } => rewritable(operand, out),
        ExprKind::Binary { lhs, rhs, .. } => {
            rewritable(lhs, out);
            rewritable(rhs, out);
        }
        ExprKind::Ternary {
            cond,
            then_expr,
            else_expr,
        } => {
            rewritable(cond, out);
            rewritable(then_expr, out);
            rewritable(else_expr, out);
        }
        ExprKind::Concat(items) | ExprKind::Replicate { items, .. } => {
            items.iter().for_each(|i| rewritable(i, out));
        }
        ExprKind::Paren(inner) => rewritable(inner, out),
        _ => {}
    }
}

impl MutationOperator for DuplicateExpr {
    fn kind(&self) -> OperatorKind {
        OperatorKind::DuplicateExpr
    }

    fn find_candidates(&self, file: &SourceFile, analysis: &Analysis) -> Vec<Candidate> {
        let mut out = Vec::new();
        for (idx, module) in file.modules.iter().enumerate() {
            let scope = &analysis.modules[idx];
            for site in assign_sites(module) {
                let mut exprs = Vec::new();
                rewritable(site.rhs, &mut exprs);
                for e in exprs {
                    if !e.is_impure() && !touches_real(scope, e) {
                        out.push(Candidate {
                            module: idx,
                            span: e.span,
                            target: Target::Expr(e.clone()),
                        });
                    }
                }
            }
        }
        out
    }

    fn rewrite(
        &self,
        file: &SourceFile,
        _analysis: &Analysis,
        candidate: &Candidate,
        rng: &mut Pcg64Mcg,
    ) -> Result<Vec<Edit>> {
        let Target::Expr(e) = &candidate.target else {
            bail!("DuplicateExpr: candidate is not an expression");
        };
        let op = if rng.gen_bool(0.5) { "&" } else { "|" };
        let text = file.slice(e.span);
        Ok(vec![Edit::replace(
            e.span,
            format!("(({}) {} ({}))", text, op, text),
        )])
    }
}
