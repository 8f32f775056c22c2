// SPDX-License-Identifier: Apache-2.0

use anyhow::{bail, Result};
use rand_pcg::Pcg64Mcg;

use crate::edit::Edit;
use crate::operators::{assign_sites, Candidate, MutationOperator, OperatorKind, Target};
use crate::verilog::cst::*;
use crate::verilog::Analysis;

/// Swaps the operands of a commutative binary operator, or of a relational
/// operator while mirroring it (`a < b` becomes `b > a`).
#[derive(Debug)]
pub struct ChangeBinaryOp;

fn swapped_op(op: &str) -> Option<&'static str> {
    Some(match op {
        "+" => "+",
        "*" => "*",
        "&" => "&",
        "|" => "|",
        "^" => "^",
        "~^" => "~^",
        "^~" => "^~",
        "==" => "==",
        "!=" => "!=",
        "===" => "===",
        "!==" => "!==",
        "&&" => "&&",
        "||" => "||",
        "<" => ">",
        "<=" => ">=",
        ">" => "<",
        ">=" => "<=",
        _ => return None,
    })
}

impl MutationOperator for ChangeBinaryOp {
    fn kind(&self) -> OperatorKind {
        OperatorKind::ChangeBinaryOp
    }

    fn find_candidates(&self, file: &SourceFile, _analysis: &Analysis) -> Vec<Candidate> {
        let mut out = Vec::new();
        for (idx, module) in file.modules.iter().enumerate() {
            for site in assign_sites(module) {
                site.rhs.walk(&mut |e| {
                    if let ExprKind::Binary { op, lhs, rhs } = &e.kind {
                        if swapped_op(op).is_some() && !lhs.is_impure() && !rhs.is_impure() {
                            out.push(Candidate {
                                module: idx,
                                span: e.span,
                                target: Target::Expr(e.clone()),
                            });
                        }
                    }
                });
            }
        }
        out
    }

    fn rewrite(
        &self,
        file: &SourceFile,
        _analysis: &Analysis,
        candidate: &Candidate,
        _rng: &mut Pcg64Mcg,
    ) -> Result<Vec<Edit>> {
        let Target::Expr(Expr {
            kind: ExprKind::Binary { op, lhs, rhs },
            span,
        }) = &candidate.target
        else {
            bail!("ChangeBinaryOp: candidate is not a binary expression");
        };
        let Some(swapped) = swapped_op(op) else {
            bail!("ChangeBinaryOp: `{}` cannot be swapped", op);
        };
        let text = format!(
            "(({}) {} ({}))",
            file.slice(rhs.span),
            swapped,
            file.slice(lhs.span)
        );
        Ok(vec![Edit::replace(*span, text)])
    }
}
