// SPDX-License-Identifier: Apache-2.0

use anyhow::{bail, Result};
use rand_pcg::Pcg64Mcg;

use crate::edit::Edit;
use crate::operators::{
    assign_sites, touches_real, Candidate, MutationOperator, OperatorKind, Target,
};
use crate::verilog::cst::*;
use crate::verilog::Analysis;

/// Rewrites a unary operator into an equivalent form: De Morgan for the
/// reductions, triple inversion for `~`, and a comparison for `!`.
#[derive(Debug)]
pub struct ChangeUnaryOp;

fn equivalent_form(op: &str, operand: &str) -> Option<String> {
    Some(match op {
        "&" => format!("(~|(~({})))", operand),
        "|" => format!("(~&(~({})))", operand),
        "~&" => format!("(|(~({})))", operand),
        "~|" => format!("(&(~({})))", operand),
        "^" => format!("((~^({})) == 1'b0)", operand),
        "~" => format!("(~(~(~({}))))", operand),
        "!" => format!("(({}) == 1'b0)", operand),
        _ => return None,
    })
}

impl MutationOperator for ChangeUnaryOp {
    fn kind(&self) -> OperatorKind {
        OperatorKind::ChangeUnaryOp
    }

    fn find_candidates(&self, file: &SourceFile, analysis: &Analysis) -> Vec<Candidate> {
        let mut out = Vec::new();
        for (idx, module) in file.modules.iter().enumerate() {
            let scope = &analysis.modules[idx];
            for site in assign_sites(module) {
                site.rhs.walk(&mut |e| {
                    if let ExprKind::Unary { op, operand } = &e.kind {
                        if equivalent_form(op, "").is_some() && !touches_real(scope, operand) {
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
            kind: ExprKind::Unary { op, operand },
            span,
        }) = &candidate.target
        else {
            bail!("ChangeUnaryOp: candidate is not a unary expression");
        };
        let Some(text) = equivalent_form(op, file.slice(operand.span)) else {
            bail!("ChangeUnaryOp: no equivalent form for `{}`", op);
        };
        Ok(vec![Edit::replace(*span, text)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::test_utils::{apply_at, candidates};
    use test_case::test_case;

    #[test_case("&a", "(~|(~(a)))"; "and reduction")]
    #[test_case("~|a", "(&(~(a)))"; "nor reduction")]
    #[test_case("^a", "((~^(a)) == 1'b0)"; "xor reduction")]
    #[test_case("~a", "(~(~(~(a))))"; "inversion")]
    #[test_case("!a", "((a) == 1'b0)"; "logical not")]
    fn test_equivalent_forms(expr: &str, expected: &str) {
        let src = format!(
            "module m(input [3:0] a, output [3:0] y);\n  assign y = {};\nendmodule\n",
            expr
        );
        let out = apply_at(&ChangeUnaryOp, &src, 0, 0);
        assert!(out.contains(&format!("assign y = {};", expected)), "{}", out);
    }

    #[test]
    fn test_negation_is_not_a_candidate() {
        let src = "module m(input [3:0] a, output [3:0] y);\n  assign y = -a;\nendmodule\n";
        assert!(candidates(&ChangeUnaryOp, src).is_empty());
    }
}
