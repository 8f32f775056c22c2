// SPDX-License-Identifier: Apache-2.0

use anyhow::{bail, Result};
use rand_pcg::Pcg64Mcg;

use crate::edit::Edit;
use crate::operators::{
    procedural_stmts, touches_real, Candidate, MutationOperator, OperatorKind, Target,
};
use crate::verilog::cst::*;
use crate::verilog::Analysis;

/// Rewrites `if (c) A else B` as `case (|(c)) 1'b1: A default: B endcase`.
#[derive(Debug)]
pub struct IfToCase;

impl MutationOperator for IfToCase {
    fn kind(&self) -> OperatorKind {
        OperatorKind::IfToCase
    }

    fn find_candidates(&self, file: &SourceFile, analysis: &Analysis) -> Vec<Candidate> {
        let mut out = Vec::new();
        for (idx, module) in file.modules.iter().enumerate() {
            let scope = &analysis.modules[idx];
            for stmt in procedural_stmts(module) {
                let StmtKind::If { cond, .. } = &stmt.kind else {
                    continue;
                };
                if !touches_real(scope, cond) {
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
        let Target::Stmt(Stmt {
            kind:
                StmtKind::If {
                    cond,
                    then_stmt,
                    else_stmt,
                },
            span,
        }) = &candidate.target
        else {
            bail!("IfToCase: candidate is not an if statement");
        };
        let mut text = format!(
            "case (|({})) 1'b1: {}",
            file.slice(cond.span),
            file.slice(then_stmt.span)
        );
        if let Some(e) = else_stmt {
            text.push_str(&format!(" default: {}", file.slice(e.span)));
        }
        text.push_str(" endcase");
        Ok(vec![Edit::replace(*span, text)])
    }
}
