// SPDX-License-Identifier: Apache-2.0

use anyhow::{bail, Result};
use rand_pcg::Pcg64Mcg;

use crate::edit::Edit;
use crate::operators::{
    bitwise_target, indent_at, is_net, procedural_stmts, whole_signal, Candidate,
    MutationOperator, OperatorKind, Target,
};
use crate::verilog::cst::*;
use crate::verilog::Analysis;

/// Widest target that is split into individual bit assignments.
const MAX_SPLIT_WIDTH: u64 = 64;

/// Splits `assign x = e;` or `x <= e;` into one assignment per bit of `x`.
#[derive(Debug)]
pub struct SplitAssignment;

fn split_range(
    analysis: &Analysis,
    module: usize,
    lhs: &Expr,
    rhs: &Expr,
) -> Option<(i64, i64)> {
    let range = bitwise_target(&analysis.modules[module], lhs, rhs)?;
    (range.0.abs_diff(range.1) < MAX_SPLIT_WIDTH).then_some(range)
}

/// Indices of `[msb:lsb]` from the LSB upward.
fn bit_indices((msb, lsb): (i64, i64)) -> Vec<i64> {
    let width = msb.abs_diff(lsb) as i64 + 1;
    (0..width)
        .map(|k| if msb >= lsb { lsb + k } else { lsb - k })
        .collect()
}

impl MutationOperator for SplitAssignment {
    fn kind(&self) -> OperatorKind {
        OperatorKind::SplitAssignment
    }

    fn find_candidates(&self, file: &SourceFile, analysis: &Analysis) -> Vec<Candidate> {
        let mut out = Vec::new();
        for (idx, module) in file.modules.iter().enumerate() {
            let scope = &analysis.modules[idx];
            for item in &module.items {
                let Item::Assign(a) = item else { continue };
                if a.has_timing || a.assigns.len() != 1 {
                    continue;
                }
                let (lhs, rhs) = &a.assigns[0];
                let net = whole_signal(scope, lhs).map_or(false, is_net);
                if net && split_range(analysis, idx, lhs, rhs).is_some() {
                    out.push(Candidate {
                        module: idx,
                        span: a.span,
                        target: Target::Item(item.clone()),
                    });
                }
            }
            for stmt in procedural_stmts(module) {
                let StmtKind::Assign(a) = &stmt.kind else {
                    continue;
                };
                if a.op == AssignOp::NonBlocking
                    && a.delay.is_none()
                    && split_range(analysis, idx, &a.lhs, &a.rhs).is_some()
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
        analysis: &Analysis,
        candidate: &Candidate,
        _rng: &mut Pcg64Mcg,
    ) -> Result<Vec<Edit>> {
        let (lhs, rhs, continuous) = match &candidate.target {
            Target::Item(Item::Assign(a)) => (&a.assigns[0].0, &a.assigns[0].1, true),
            Target::Stmt(Stmt {
                kind: StmtKind::Assign(a),
                ..
            }) => (&a.lhs, &a.rhs, false),
            _ => bail!("SplitAssignment: candidate is not an assignment"),
        };
        let Some(range) = split_range(analysis, candidate.module, lhs, rhs) else {
            bail!("SplitAssignment: target width is no longer known");
        };
        let x = file.slice(lhs.span);
        let e = file.slice(rhs.span);
        let text = if continuous {
            let indent = indent_at(&file.text, candidate.span.start);
            bit_indices(range)
                .iter()
                .enumerate()
                .map(|(k, i)| format!("assign {}[{}] = ({}) >> {};", x, i, e, k))
                .collect::<Vec<_>>()
                .join(&format!("\n{}", indent))
        } else {
            let mut text = String::from("begin");
            for (k, i) in bit_indices(range).iter().enumerate() {
                text.push_str(&format!(" {}[{}] <= ({}) >> {};", x, i, e, k));
            }
            text.push_str(" end");
            text
        };
        Ok(vec![Edit::replace(candidate.span, text)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::test_utils::{apply_at, candidates};
    use pretty_assertions::assert_eq;

    const SRC: &str = r#"
module m(input clk, input [2:0] a, output [2:0] y, output reg [1:0] q, output reg [1:0] r);
  assign y = a ^ 3'b101;
  always @(posedge clk) begin
    q <= a;
    r = a;
  end
endmodule
"#;

    #[test]
    fn test_candidates() {
        // The blocking assignment does not qualify.
        assert_eq!(candidates(&SplitAssignment, SRC).len(), 2);
    }

    #[test]
    fn test_split_continuous() {
        let out = apply_at(&SplitAssignment, SRC, 0, 0);
        assert!(
            out.contains(
                "  assign y[0] = (a ^ 3'b101) >> 0;\n  assign y[1] = (a ^ 3'b101) >> 1;\n  assign y[2] = (a ^ 3'b101) >> 2;\n"
            ),
            "{}",
            out
        );
    }

    #[test]
    fn test_split_nonblocking() {
        let out = apply_at(&SplitAssignment, SRC, 1, 0);
        assert!(
            out.contains("begin q[0] <= (a) >> 0; q[1] <= (a) >> 1; end"),
            "{}",
            out
        );
    }

    #[test]
    fn test_descending_indices() {
        assert_eq!(bit_indices((0, 3)), vec![3, 2, 1, 0]);
        assert_eq!(bit_indices((4, 2)), vec![2, 3, 4]);
    }
}
