// SPDX-License-Identifier: Apache-2.0

use anyhow::{bail, Result};
use rand_pcg::Pcg64Mcg;

use crate::edit::Edit;
use crate::operators::{procedural_stmts, Candidate, MutationOperator, OperatorKind, Target};
use crate::verilog::cst::*;
use crate::verilog::Analysis;

/// Distributes `if (c) begin s1 ... sn end` over its statements, giving one
/// `if (c) si` per statement. Every `si` must be a non-blocking assignment
/// so that none of them can change `c`.
#[derive(Debug)]
pub struct DuplicateCond;

fn guarded_nbas(stmt: &Stmt) -> Option<(&Expr, &[Stmt])> {
    let StmtKind::If {
        cond,
        then_stmt,
        else_stmt: None,
    } = &stmt.kind
    else {
        return None;
    };
    let StmtKind::Block {
        label: None,
        decls,
        stmts,
    } = &then_stmt.kind
    else {
        return None;
    };
    let all_nba = stmts.iter().all(|s| {
        matches!(&s.kind, StmtKind::Assign(a) if a.op == AssignOp::NonBlocking)
    });
    if !decls.is_empty() || stmts.len() < 2 || !all_nba || cond.is_impure() {
        return None;
    }
    Some((cond, stmts))
}

impl MutationOperator for DuplicateCond {
    fn kind(&self) -> OperatorKind {
        OperatorKind::DuplicateCond
    }

    fn find_candidates(&self, file: &SourceFile, _analysis: &Analysis) -> Vec<Candidate> {
        let mut out = Vec::new();
        for (idx, module) in file.modules.iter().enumerate() {
            for stmt in procedural_stmts(module) {
                if guarded_nbas(stmt).is_some() {
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
            bail!("DuplicateCond: candidate is not a statement");
        };
        let Some((cond, stmts)) = guarded_nbas(stmt) else {
            bail!("DuplicateCond: statement is not a guarded block");
        };
        let cond = file.slice(cond.span);
        let mut text = String::from("begin");
        for s in stmts {
            text.push_str(&format!(" if ({}) {}", cond, file.slice(s.span)));
        }
        text.push_str(" end");
        Ok(vec![Edit::replace(stmt.span, text)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::test_utils::{apply_at, candidates};

    const SRC: &str = r#"
module m(input clk, input en, input [1:0] d, output reg a, output reg b);
  always @(posedge clk) begin
    if (en) begin
      a <= d[0];
      b <= d[1];
    end
    if (en) begin
      a = d[0];
      b <= d[1];
    end
  end
endmodule
"#;

    #[test]
    fn test_only_nonblocking_blocks_qualify() {
        assert_eq!(candidates(&DuplicateCond, SRC).len(), 1);
    }

    #[test]
    fn test_guards_each_statement() {
        let out = apply_at(&DuplicateCond, SRC, 0, 0);
        assert!(
            out.contains("begin if (en) a <= d[0]; if (en) b <= d[1]; end"),
            "{}",
            out
        );
    }
}
