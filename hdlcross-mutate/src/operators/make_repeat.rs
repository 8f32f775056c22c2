// SPDX-License-Identifier: Apache-2.0

use anyhow::{bail, Result};
use rand_pcg::Pcg64Mcg;

use crate::edit::Edit;
use crate::operators::{procedural_stmts, Candidate, MutationOperator, OperatorKind, Target};
use crate::verilog::cst::*;
use crate::verilog::{Analysis, Span};

/// Wraps a procedural statement `S` as `repeat (P) begin S end` with a new
/// `localparam P = 1`.
#[derive(Debug)]
pub struct MakeRepeat;

impl MutationOperator for MakeRepeat {
    fn kind(&self) -> OperatorKind {
        OperatorKind::MakeRepeat
    }

    fn find_candidates(&self, file: &SourceFile, _analysis: &Analysis) -> Vec<Candidate> {
        let mut out = Vec::new();
        for (idx, module) in file.modules.iter().enumerate() {
            let bodies: Vec<Span> = module.processes().map(|p| p.body.span).collect();
            for stmt in procedural_stmts(module) {
                if bodies.contains(&stmt.span) {
                    continue;
                }
                if matches!(
                    stmt.kind,
                    StmtKind::Assign(_)
                        | StmtKind::If { .. }
                        | StmtKind::Case { .. }
                        | StmtKind::Block { .. }
                ) {
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
        rng: &mut Pcg64Mcg,
    ) -> Result<Vec<Edit>> {
        let Target::Stmt(stmt) = &candidate.target else {
            bail!("MakeRepeat: candidate is not a statement");
        };
        let module = &file.modules[candidate.module];
        let count = analysis.fresh_names().fresh("rep", rng);
        Ok(vec![
            Edit::insert(module.header_end, format!("\n  localparam {} = 1;", count)),
            Edit::replace(
                stmt.span,
                format!("repeat ({}) begin {} end", count, file.slice(stmt.span)),
            ),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::test_utils::{apply_at, candidates};

    const SRC: &str = r#"
module m(input clk, input d, output reg q);
  always @(posedge clk) begin
    q <= d;
  end
endmodule
"#;

    #[test]
    fn test_process_body_is_not_a_candidate() {
        let found = candidates(&MakeRepeat, SRC);
        // The block under the event control and the assignment inside it.
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn test_wraps_statement_in_repeat() {
        let found = candidates(&MakeRepeat, SRC);
        let idx = found
            .iter()
            .position(|c| matches!(&c.target, Target::Stmt(s) if matches!(s.kind, StmtKind::Assign(_))))
            .unwrap();
        let out = apply_at(&MakeRepeat, SRC, idx, 3);
        let line = out
            .lines()
            .find(|l| l.contains("localparam"))
            .unwrap()
            .trim()
            .to_string();
        let name = line
            .trim_start_matches("localparam ")
            .trim_end_matches(" = 1;")
            .to_string();
        assert!(out.contains(&format!("repeat ({}) begin q <= d; end", name)), "{}", out);
    }
}
