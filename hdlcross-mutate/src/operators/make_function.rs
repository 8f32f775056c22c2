// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeSet;

use anyhow::{bail, Result};
use rand_pcg::Pcg64Mcg;

use crate::edit::Edit;
use crate::operators::{
    assign_sites, procedural_stmts, touches_real, whole_signal, Candidate, MutationOperator,
    OperatorKind, Target,
};
use crate::verilog::cst::*;
use crate::verilog::width::{ModuleScope, Signal};
use crate::verilog::Analysis;

/// Moves the right-hand side of an assignment into a new function whose
/// inputs mirror the declarations of the signals it reads.
#[derive(Debug)]
pub struct MakeFunction;

const PLAIN_TYPES: &[&str] = &["wire", "reg", "logic", "tri", "uwire"];
const ATOM_TYPES: &[&str] = &["integer", "int", "byte", "shortint", "longint"];

/// Names declared inside procedural blocks, which may shadow module-level
/// signals.
fn block_local_names(file: &SourceFile, module: &Module, idx: usize) -> BTreeSet<String> {
    let mut spans = Vec::new();
    for stmt in procedural_stmts(module) {
        if let StmtKind::Block { decls, .. } = &stmt.kind {
            spans.extend(decls.iter().copied());
        }
    }
    file.module_tokens(idx)
        .iter()
        .filter(|t| t.is_ident() && spans.iter().any(|s| s.contains(t.span)))
        .map(|t| t.text.clone())
        .collect()
}

fn input_decl(signal: &Signal) -> Option<String> {
    signal.width()?;
    match signal.net_type.as_deref() {
        Some(t) if ATOM_TYPES.contains(&t) => Some(format!("input {} {};", t, signal.name)),
        None => Some(plain_input(signal)),
        Some(t) if PLAIN_TYPES.contains(&t) => Some(plain_input(signal)),
        _ => None,
    }
}

fn plain_input(signal: &Signal) -> String {
    let mut text = String::from("input ");
    if signal.signed {
        text.push_str("signed ");
    }
    if let Some(range) = &signal.range_text {
        text.push_str(range);
        text.push(' ');
    }
    text.push_str(&signal.name);
    text.push(';');
    text
}

/// Input declarations for every signal `rhs` reads, in first-use order.
fn inputs(scope: &ModuleScope, locals: &BTreeSet<String>, rhs: &Expr) -> Option<Vec<(String, String)>> {
    let mut out = Vec::new();
    for name in rhs.referenced_names() {
        if locals.contains(&name) {
            return None;
        }
        if scope.is_param(&name) && scope.signal(&name).is_none() {
            continue;
        }
        let signal = scope.signal(&name)?;
        if signal.array {
            return None;
        }
        out.push((name, input_decl(signal)?));
    }
    (!out.is_empty()).then_some(out)
}

fn function_target<'a>(scope: &'a ModuleScope, lhs: &Expr) -> Option<&'a Signal> {
    let signal = whole_signal(scope, lhs)?;
    signal.width()?;
    match signal.net_type.as_deref() {
        None => Some(signal),
        Some(t) if PLAIN_TYPES.contains(&t) => Some(signal),
        _ => None,
    }
}

impl MutationOperator for MakeFunction {
    fn kind(&self) -> OperatorKind {
        OperatorKind::MakeFunction
    }

    fn find_candidates(&self, file: &SourceFile, analysis: &Analysis) -> Vec<Candidate> {
        let mut out = Vec::new();
        for (idx, module) in file.modules.iter().enumerate() {
            let scope = &analysis.modules[idx];
            let locals = block_local_names(file, module, idx);
            for site in assign_sites(module) {
                let Some(target) = function_target(scope, site.lhs) else {
                    continue;
                };
                if site.rhs.is_impure()
                    || touches_real(scope, site.rhs)
                    || inputs(scope, &locals, site.rhs).is_none()
                {
                    continue;
                }
                out.push(Candidate {
                    module: idx,
                    span: site.rhs.span,
                    target: Target::Rhs {
                        target: target.name.clone(),
                        rhs: site.rhs.clone(),
                    },
                });
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
        let Target::Rhs { target, rhs } = &candidate.target else {
            bail!("MakeFunction: candidate is not an assignment right-hand side");
        };
        let module = &file.modules[candidate.module];
        let scope = &analysis.modules[candidate.module];
        let locals = block_local_names(file, module, candidate.module);
        let Some(inputs) = inputs(scope, &locals, rhs) else {
            bail!("MakeFunction: right-hand side reads unsupported signals");
        };
        let Some(signal) = scope.signal(target) else {
            bail!("MakeFunction: unknown target `{}`", target);
        };
        let name = analysis.fresh_names().fresh("fn", rng);

        let mut function = String::from("  function ");
        if let Some(range) = &signal.range_text {
            function.push_str(range);
            function.push(' ');
        }
        function.push_str(&name);
        function.push_str(";\n");
        for (_, decl) in &inputs {
            function.push_str(&format!("    {}\n", decl));
        }
        function.push_str(&format!(
            "    begin\n      {} = {};\n    end\n  endfunction\n",
            name,
            file.slice(rhs.span)
        ));

        let args: Vec<&str> = inputs.iter().map(|(n, _)| n.as_str()).collect();
        Ok(vec![
            Edit::replace(rhs.span, format!("{}({})", name, args.join(", "))),
            Edit::insert(module.end_span.start, function),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::test_utils::{apply_at, candidates};
    use pretty_assertions::assert_eq;

    const SRC: &str = r#"
module m #(parameter K = 2) (input [3:0] a, input signed [1:0] b, input [7:0] mem_idx, output [3:0] y, output [3:0] z);
  reg [3:0] mem [0:1];
  assign y = a + b + K;
  assign z = mem[0];
endmodule
"#;

    #[test]
    fn test_arrays_are_not_mirrored() {
        assert_eq!(candidates(&MakeFunction, SRC).len(), 1);
    }

    #[test]
    fn test_function_mirrors_declarations() {
        let out = apply_at(&MakeFunction, SRC, 0, 4);
        let call = out
            .lines()
            .find(|l| l.contains("assign y = "))
            .unwrap()
            .trim()
            .to_string();
        let name = call
            .trim_start_matches("assign y = ")
            .split('(')
            .next()
            .unwrap()
            .to_string();
        assert_eq!(call, format!("assign y = {}(a, b);", name));
        let expected = format!(
            "  function [3:0] {n};\n    input [3:0] a;\n    input signed [1:0] b;\n    begin\n      {n} = a + b + K;\n    end\n  endfunction\nendmodule",
            n = name
        );
        assert!(out.contains(&expected), "{}", out);
    }
}
