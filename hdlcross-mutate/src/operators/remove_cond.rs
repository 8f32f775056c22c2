// SPDX-License-Identifier: Apache-2.0

use anyhow::{bail, Result};
use rand_pcg::Pcg64Mcg;

use crate::edit::Edit;
use crate::operators::{
    procedural_stmts, whole_signal, Candidate, MutationOperator, OperatorKind, Target,
};
use crate::verilog::cst::*;
use crate::verilog::width::ModuleScope;
use crate::verilog::Analysis;

/// Folds `if (c) x <= a; else x <= b;` into `x <= (c) ? (a) : (b);`.
#[derive(Debug)]
pub struct RemoveCond;

/// The single assignment a branch consists of, looking through a plain
/// one-statement block.
fn branch_assignment(stmt: &Stmt) -> Option<&Assignment> {
    match &stmt.kind {
        StmtKind::Assign(a) => Some(a),
        StmtKind::Block {
            label: None,
            decls,
            stmts,
        } if decls.is_empty() && stmts.len() == 1 => branch_assignment(&stmts[0]),
        _ => None,
    }
}

fn foldable<'a>(scope: &ModuleScope, stmt: &'a Stmt) -> Option<(&'a Expr, &'a Assignment, &'a Assignment)> {
    let StmtKind::If {
        cond,
        then_stmt,
        else_stmt: Some(else_stmt),
    } = &stmt.kind
    else {
        return None;
    };
    let a = branch_assignment(then_stmt)?;
    let b = branch_assignment(else_stmt)?;
    if a.op != b.op || a.delay.is_some() || b.delay.is_some() {
        return None;
    }
    let target = a.lhs.as_ident()?;
    if b.lhs.as_ident() != Some(target) {
        return None;
    }
    let width = whole_signal(scope, &a.lhs)?.width()?;
    let fits = |e: &Expr| scope.width(e).map_or(false, |w| w <= width);
    if !fits(&a.rhs) || !fits(&b.rhs) || scope.signed(&a.rhs) != scope.signed(&b.rhs) {
        return None;
    }
    Some((cond, a, b))
}

impl MutationOperator for RemoveCond {
    fn kind(&self) -> OperatorKind {
        OperatorKind::RemoveCond
    }

    fn find_candidates(&self, file: &SourceFile, analysis: &Analysis) -> Vec<Candidate> {
        let mut out = Vec::new();
        for (idx, module) in file.modules.iter().enumerate() {
            let scope = &analysis.modules[idx];
            for stmt in procedural_stmts(module) {
                if foldable(scope, stmt).is_some() {
                    out.push(Candidate {
                        module: idx,
                        span: stmt.span,
                        target: Target::Stmt(stmt.clone()),
                    });
                }
            }
        }
        out
    }

    fn rewrite(
        &self,
        file: &SourceFile,
        analysis: &Analysis,
        candidate: &Candidate,
        _rng: &mut Pcg64Mcg,
    ) -> Result<Vec<Edit>> {
        let Target::Stmt(stmt) = &candidate.target else {
            bail!("RemoveCond: candidate is not a statement");
        };
        let Some((cond, a, b)) = foldable(&analysis.modules[candidate.module], stmt) else {
            bail!("RemoveCond: statement is not a foldable if/else");
        };
        let text = format!(
            "{} {} ({}) ? ({}) : ({});",
            file.slice(a.lhs.span),
            a.op.as_str(),
            file.slice(cond.span),
            file.slice(a.rhs.span),
            file.slice(b.rhs.span),
        );
        Ok(vec![Edit::replace(stmt.span, text)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::test_utils::{apply_at, candidates};

    #[test]
    fn test_folds_if_else_into_ternary() {
        let src = r#"
module m(input clk, input c, input [3:0] a, input [3:0] b, output reg [3:0] q);
  always @(posedge clk)
    if (c) q <= a; else begin q <= b; end
endmodule
"#;
        let out = apply_at(&RemoveCond, src, 0, 1);
        assert!(out.contains("    q <= (c) ? (a) : (b);\n"), "{}", out);
    }

    #[test]
    fn test_mismatched_branches_are_rejected() {
        let src = r#"
module m(input clk, input c, input [7:0] a, input signed [3:0] s, input [3:0] b,
         output reg [3:0] q, output reg [3:0] r);
  always @(posedge clk) begin
    if (c) q <= a; else q <= b;
    if (c) q <= s; else q <= b;
    if (c) q <= b; else r <= b;
    if (c) q = b; else q <= b;
    if (c) q <= b;
  end
endmodule
"#;
        assert!(candidates(&RemoveCond, src).is_empty());
    }
}
