// SPDX-License-Identifier: Apache-2.0

use anyhow::{bail, Result};
use rand_pcg::Pcg64Mcg;

use crate::edit::Edit;
use crate::operators::{indent_at, Candidate, MutationOperator, OperatorKind, Target};
use crate::verilog::cst::*;
use crate::verilog::Analysis;

/// Moves a continuous assignment or an always/initial block into a
/// one-iteration named `generate for` loop.
#[derive(Debug)]
pub struct MakeLoopGenerate;

impl MutationOperator for MakeLoopGenerate {
    fn kind(&self) -> OperatorKind {
        OperatorKind::MakeLoopGenerate
    }

    fn find_candidates(&self, file: &SourceFile, analysis: &Analysis) -> Vec<Candidate> {
        let mut out = Vec::new();
        for (idx, module) in file.modules.iter().enumerate() {
            let scope = &analysis.modules[idx];
            for item in &module.items {
                let eligible = match item {
                    // Targets must be declared, otherwise the assignment
                    // would declare an implicit net local to the loop.
                    Item::Assign(a) => a.assigns.iter().all(|(lhs, _)| {
                        lhs.referenced_names()
                            .iter()
                            .all(|n| scope.signal(n).is_some())
                    }),
                    Item::Process(p) => p.kind != ProcessKind::Final,
                    _ => false,
                };
                if eligible {
                    out.push(Candidate {
                        module: idx,
                        span: item.span(),
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
        let Target::Item(item) = &candidate.target else {
            bail!("MakeLoopGenerate: candidate is not a module item");
        };
        let mut names = analysis.fresh_names();
        let genvar = names.fresh("gv", rng);
        let label = names.fresh("gen", rng);
        let span = item.span();
        let indent = indent_at(&file.text, span.start);
        let text = format!(
            "genvar {g};\n{i}generate for ({g} = 0; {g} < 1; {g} = {g} + 1) begin : {l}\n{i}{item}\n{i}end endgenerate",
            g = genvar,
            l = label,
            i = indent,
            item = file.slice(span),
        );
        Ok(vec![Edit::replace(span, text)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::test_utils::{apply_at, candidates};

    const SRC: &str = r#"
module m(input a, input b, output y, output reg z);
  assign y = a & b;
  assign w = a;
  always @* z = a | b;
endmodule
"#;

    #[test]
    fn test_implicit_net_targets_are_skipped() {
        let found = candidates(&MakeLoopGenerate, SRC);
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn test_wraps_item_in_generate_loop() {
        let out = apply_at(&MakeLoopGenerate, SRC, 0, 11);
        assert!(out.contains("generate for ("), "{}", out);
        assert!(out.contains("< 1;"), "{}", out);
        assert!(out.contains("  assign y = a & b;\n  end endgenerate"), "{}", out);
        assert!(out.contains("  genvar gv_"), "{}", out);
    }
}
