// SPDX-License-Identifier: Apache-2.0

use anyhow::{bail, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use rand_pcg::Pcg64Mcg;

use crate::edit::Edit;
use crate::operators::{Candidate, MutationOperator, OperatorKind, Target};
use crate::verilog::cst::*;
use crate::verilog::{Analysis, Span};

/// Appends a renamed copy of an instantiated module and points some of its
/// instantiations at the copy. With more than one instantiation statement
/// at least one keeps the original module.
#[derive(Debug)]
pub struct DuplicateModule;

/// Spans of the module names of every statement instantiating `name`.
fn instance_sites(file: &SourceFile, name: &str) -> Vec<Span> {
    file.modules
        .iter()
        .flat_map(|m| m.items.iter())
        .filter_map(|item| match item {
            Item::Instance(inst) if inst.module_name.name == name => Some(inst.module_name.span),
            _ => None,
        })
        .collect()
}

impl MutationOperator for DuplicateModule {
    fn kind(&self) -> OperatorKind {
        OperatorKind::DuplicateModule
    }

    fn find_candidates(&self, file: &SourceFile, _analysis: &Analysis) -> Vec<Candidate> {
        file.modules
            .iter()
            .enumerate()
            .filter_map(|(idx, m)| {
                let sites = instance_sites(file, &m.name.name);
                (!sites.is_empty()).then(|| Candidate {
                    module: idx,
                    span: m.span,
                    target: Target::Module {
                        name: m.name.name.clone(),
                        instance_sites: sites,
                    },
                })
            })
            .collect()
    }

    fn rewrite(
        &self,
        file: &SourceFile,
        analysis: &Analysis,
        candidate: &Candidate,
        rng: &mut Pcg64Mcg,
    ) -> Result<Vec<Edit>> {
        let Target::Module {
            name,
            instance_sites,
        } = &candidate.target
        else {
            bail!("DuplicateModule: candidate is not a module");
        };
        if instance_sites.is_empty() {
            bail!("DuplicateModule: `{}` is never instantiated", name);
        }
        let module = &file.modules[candidate.module];
        let copy_name = analysis.fresh_names().fresh(name, rng);

        let text = &file.text;
        let mut copy = String::new();
        copy.push_str(&text[module.span.start..module.name.span.start]);
        copy.push_str(&copy_name);
        copy.push_str(&text[module.name.span.end..module.end_span.end]);
        let tail = &text[module.end_span.end..module.span.end];
        if tail.trim_start().starts_with(':') {
            copy.push_str(&format!(" : {}", copy_name));
        }

        let n = instance_sites.len();
        let count = if n == 1 { 1 } else { rng.gen_range(1..n) };
        let mut chosen: Vec<Span> = instance_sites
            .choose_multiple(rng, count)
            .copied()
            .collect();
        chosen.sort();

        let mut edits: Vec<Edit> = chosen
            .into_iter()
            .map(|site| Edit::replace(site, copy_name.clone()))
            .collect();
        let separator = if text.ends_with('\n') { "\n" } else { "\n\n" };
        edits.push(Edit::insert(text.len(), format!("{}{}\n", separator, copy)));
        Ok(edits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::test_utils::{apply_at, candidates};
    use crate::verilog::parse_source;
    use pretty_assertions::assert_eq;

    const SRC: &str = r#"
module inv(input a, output y);
  assign y = ~a;
endmodule : inv
module top(input [2:0] a, output [2:0] y);
  inv u0 (.a(a[0]), .y(y[0]));
  inv u1 (.a(a[1]), .y(y[1]));
  inv u2 (.a(a[2]), .y(y[2]));
endmodule
"#;

    #[test]
    fn test_only_instantiated_modules_are_candidates() {
        let found = candidates(&DuplicateModule, SRC);
        assert_eq!(found.len(), 1);
        assert!(matches!(&found[0].target, Target::Module { name, instance_sites } if name == "inv" && instance_sites.len() == 3));
    }

    #[test]
    fn test_retargets_a_strict_subset() {
        for seed in 0..8 {
            let out = apply_at(&DuplicateModule, SRC, 0, seed);
            let file = parse_source(&out).unwrap();
            assert_eq!(file.modules.len(), 3);
            let copy = &file.modules[2];
            assert!(copy.name.name.starts_with("inv_"));
            assert!(out.trim_end().ends_with(&format!("endmodule : {}", copy.name.name)));
            let top = &file.modules[1];
            let retargeted = top
                .items
                .iter()
                .filter(|i| matches!(i, Item::Instance(inst) if inst.module_name.name == copy.name.name))
                .count();
            assert!((1..3).contains(&retargeted), "seed {}: {}", seed, out);
        }
    }

    #[test]
    fn test_single_instance_is_retargeted() {
        let src = "module a(output y); assign y = 1'b0; endmodule\nmodule t(output y); a u (.y(y)); endmodule\n";
        let out = apply_at(&DuplicateModule, src, 0, 0);
        let file = parse_source(&out).unwrap();
        let copy_name = &file.modules[2].name.name;
        assert!(out.contains(&format!("{} u (.y(y));", copy_name)), "{}", out);
    }
}
