// SPDX-License-Identifier: Apache-2.0

use anyhow::{bail, Result};
use rand_pcg::Pcg64Mcg;

use crate::edit::Edit;
use crate::operators::{procedural_stmts, Candidate, MutationOperator, OperatorKind, Target};
use crate::verilog::cst::*;
use crate::verilog::Analysis;

/// Repeats a non-blocking assignment: `S` becomes `begin S S end`.
#[derive(Debug)]
pub struct RedundantAssignment;

impl MutationOperator for RedundantAssignment {
    fn kind(&self) -> OperatorKind {
        OperatorKind::RedundantAssignment
    }

    fn find_candidates(&self, file: &SourceFile, _analysis: &Analysis) -> Vec<Candidate> {
        let mut out = Vec::new();
        for (idx, module) in file.modules.iter().enumerate() {
            for stmt in procedural_stmts(module) {
                let StmtKind::Assign(a) = &stmt.kind else {
                    continue;
                };
                if a.op == AssignOp::NonBlocking
                    && a.delay.is_none()
                    && !a.rhs.is_impure()
                    && !a.lhs.is_impure()
                {
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
        _analysis: &Analysis,
        candidate: &Candidate,
        _rng: &mut Pcg64Mcg,
    ) -> Result<Vec<Edit>> {
        let Target::Stmt(stmt) = &candidate.target else {
            bail!("RedundantAssignment: candidate is not a statement");
        };
        let s = file.slice(stmt.span);
        Ok(vec![Edit::replace(stmt.span, format!("begin {} {} end", s, s))])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::test_utils::{apply_at, candidates};

    #[test]
    fn test_duplicates_nonblocking_assignment() {
        let src = r#"
module m(input clk, input d, output reg q, output reg p);
  always @(posedge clk) begin
    q <= d;
    p <= $random;
    q = d;
  end
endmodule
"#;
        assert_eq!(candidates(&RedundantAssignment, src).len(), 1);
        let out = apply_at(&RedundantAssignment, src, 0, 0);
        assert!(out.contains("begin q <= d; q <= d; end"), "{}", out);
    }
}
