// SPDX-License-Identifier: Apache-2.0

use anyhow::{bail, Result};
use rand_pcg::Pcg64Mcg;

use crate::edit::Edit;
use crate::operators::{
    bit_index, bitwise_target, indent_at, is_net, whole_signal, Candidate, MutationOperator,
    OperatorKind, Target,
};
use crate::verilog::cst::*;
use crate::verilog::Analysis;

/// Replaces `assign x = e;` by a generate loop assigning `x` bit by bit.
#[derive(Debug)]
pub struct LoopAssignment;

impl MutationOperator for LoopAssignment {
    fn kind(&self) -> OperatorKind {
        OperatorKind::LoopAssignment
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
                if net && bitwise_target(scope, lhs, rhs).is_some() {
                    out.push(Candidate {
                        module: idx,
                        span: a.span,
                        target: Target::Item(item.clone()),
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
        let Target::Item(Item::Assign(assign)) = &candidate.target else {
            bail!("LoopAssignment: candidate is not a continuous assignment");
        };
        let scope = &analysis.modules[candidate.module];
        let (lhs, rhs) = &assign.assigns[0];
        let Some(range) = bitwise_target(scope, lhs, rhs) else {
            bail!("LoopAssignment: target width is no longer known");
        };
        let width = range.0.abs_diff(range.1) + 1;
        let mut names = analysis.fresh_names();
        let genvar = names.fresh("gv", rng);
        let label = names.fresh("bits", rng);
        let indent = indent_at(&file.text, assign.span.start);
        let text = format!(
            "genvar {g};\n{i}generate for ({g} = 0; {g} < {w}; {g} = {g} + 1) begin : {l}\n{i}  assign {x}[{idx}] = ({e}) >> {g};\n{i}end endgenerate",
            g = genvar,
            i = indent,
            w = width,
            l = label,
            x = file.slice(lhs.span),
            idx = bit_index(range, &genvar),
            e = file.slice(rhs.span),
        );
        Ok(vec![Edit::replace(assign.span, text)])
    }
}
