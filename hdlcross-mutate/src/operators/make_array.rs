// SPDX-License-Identifier: Apache-2.0

use anyhow::{bail, Result};
use rand_pcg::Pcg64Mcg;

use crate::edit::Edit;
use crate::operators::{procedural_stmts, Candidate, MutationOperator, OperatorKind, Target};
use crate::verilog::cst::*;
use crate::verilog::lexer::TokenKind;
use crate::verilog::{Analysis, Span};

/// Turns a module-local variable `v` into a one-element unpacked array
/// `v [0:0]` and every reference into `v[0]`.
#[derive(Debug)]
pub struct MakeArray;

/// Spans in which a module-level name may be shadowed or otherwise not
/// visible to the parser.
fn hidden_spans(module: &Module) -> Vec<Span> {
    let mut spans: Vec<Span> = module.opaque_spans().collect();
    for stmt in procedural_stmts(module) {
        if let StmtKind::Block { decls, .. } = &stmt.kind {
            spans.extend(decls.iter().copied());
        }
    }
    spans
}

impl MutationOperator for MakeArray {
    fn kind(&self) -> OperatorKind {
        OperatorKind::MakeArray
    }

    fn find_candidates(&self, file: &SourceFile, analysis: &Analysis) -> Vec<Candidate> {
        let mut out = Vec::new();
        for (idx, module) in file.modules.iter().enumerate() {
            let scope = &analysis.modules[idx];
            let hidden = hidden_spans(module);
            let tokens = file.module_tokens(idx);
            for item in &module.items {
                let Item::Decl(decl) = item else { continue };
                if decl.direction.is_some()
                    || !matches!(decl.net_type.as_deref(), Some("reg") | Some("logic"))
                {
                    continue;
                }
                for var in &decl.vars {
                    let name = &var.name.name;
                    let Some(signal) = scope.signal(name) else {
                        continue;
                    };
                    if signal.port
                        || signal.array
                        || signal.has_init
                        || signal.decl_count != 1
                        || !var.unpacked.is_empty()
                    {
                        continue;
                    }
                    let shadowed = tokens.iter().any(|t| {
                        t.is_ident() && &t.text == name && hidden.iter().any(|h| h.contains(t.span))
                    });
                    if !shadowed {
                        out.push(Candidate {
                            module: idx,
                            span: var.name.span,
                            target: Target::Signal(name.clone()),
                        });
                    }
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
        let Target::Signal(name) = &candidate.target else {
            bail!("MakeArray: candidate is not a signal");
        };
        let mut edits = vec![Edit::insert(candidate.span.end, " [0:0]")];
        let tokens = file.module_tokens(candidate.module);
        for (i, t) in tokens.iter().enumerate() {
            if t.kind != TokenKind::Ident || &t.text != name || t.span == candidate.span {
                continue;
            }
            let after_dot = i > 0 && tokens[i - 1].is(".");
            if !after_dot {
                edits.push(Edit::replace(t.span, format!("{}[0]", name)));
            }
        }
        Ok(edits)
    }
}
