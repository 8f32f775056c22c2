// SPDX-License-Identifier: Apache-2.0

//! Structural canonicalization of artifacts of the same kind.
//!
//! Two artifacts with equal canonical forms are equivalent without consulting
//! a decision procedure. Canonical forms are deliberately conservative:
//! different forms say nothing about inequivalence.

use std::collections::HashMap;

use crate::oracle::aiger::{parse_aag, Aig, AndGate, Latch, Lit, VarDef, FALSE_LIT, TRUE_LIT};
use crate::repr::Language;

/// Returns the canonical form of `text`, or `None` when the language has no
/// canonicalizer or the text cannot be parsed.
pub fn canonicalize(language: &Language, text: &str) -> Option<String> {
    match language {
        Language::Aiger => parse_aag(text).ok().map(|aig| canonicalize_aig(&aig).to_aag()),
        Language::Verilog | Language::SystemVerilog | Language::Netlist => {
            Some(normalize_c_like(text, true))
        }
        Language::CppModel => Some(normalize_c_like(text, false)),
        Language::Smt2 | Language::Btor2 => Some(normalize_semicolon_comments(text)),
        Language::Json => serde_json::from_str::<serde_json::Value>(text)
            .ok()
            .and_then(|v| serde_json::to_string(&v).ok()),
        Language::Other(_) => Some(normalize_whitespace(text)),
    }
}

fn normalize_whitespace(text: &str) -> String {
    let mut out = String::new();
    for line in text.lines() {
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            continue;
        }
        out.push_str(&words.join(" "));
        out.push('\n');
    }
    out
}

/// Strips `//` and `/* */` comments (and, for HDL text, `(* *)` attribute
/// instances, which carry tool-specific source locations), then normalizes
/// whitespace. String literals are preserved.
fn normalize_c_like(text: &str, strip_attributes: bool) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < bytes.len() {
        let rest = &bytes[i..];
        if rest.starts_with(b"//") {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
        } else if rest.starts_with(b"/*") {
            i += 2;
            while i < bytes.len() && !bytes[i..].starts_with(b"*/") {
                i += 1;
            }
            i = (i + 2).min(bytes.len());
            out.push(' ');
        } else if strip_attributes && rest.starts_with(b"(*") && !rest.starts_with(b"(*)") {
            i += 2;
            while i < bytes.len() && !bytes[i..].starts_with(b"*)") {
                i += 1;
            }
            i = (i + 2).min(bytes.len());
            out.push(' ');
        } else if bytes[i] == b'"' {
            let start = i;
            i += 1;
            while i < bytes.len() && bytes[i] != b'"' {
                if bytes[i] == b'\\' {
                    i += 1;
                }
                i += 1;
            }
            i = (i + 1).min(bytes.len());
            out.push_str(&text[start..i]);
        } else {
            let ch_len = text[i..].chars().next().map_or(1, |c| c.len_utf8());
            out.push_str(&text[i..i + ch_len]);
            i += ch_len;
        }
    }
    normalize_whitespace(&out)
}

fn normalize_semicolon_comments(text: &str) -> String {
    let stripped: Vec<&str> = text
        .lines()
        .map(|line| match line.find(';') {
            Some(pos) => &line[..pos],
            None => line,
        })
        .collect();
    normalize_whitespace(&stripped.join("\n"))
}

fn negate_if(lit: Lit, negate: bool) -> Lit {
    if negate {
        lit ^ 1
    } else {
        lit
    }
}

/// Builds a constant-folded, structurally hashed copy of an AIG with a
/// stable variable order: inputs then latches sorted by name, then AND gates
/// in depth-first order from the outputs and latch next-state functions
/// (also sorted by name). Gates not reachable from those roots are dropped.
pub fn canonicalize_aig(aig: &Aig) -> Aig {
    let defs = aig.definitions();

    let mut inputs: Vec<(u32, String)> = aig.inputs.clone();
    inputs.sort_by(|a, b| a.1.cmp(&b.1));
    let mut latches: Vec<Latch> = aig.latches.clone();
    latches.sort_by(|a, b| a.name.cmp(&b.name));
    let mut outputs: Vec<(Lit, String)> = aig.outputs.clone();
    outputs.sort_by(|a, b| a.1.cmp(&b.1));

    let mut next_var: u32 = 1;
    let mut mapped: HashMap<u32, Lit> = HashMap::new();
    mapped.insert(0, FALSE_LIT);
    let mut new_inputs = Vec::with_capacity(inputs.len());
    for (var, name) in &inputs {
        mapped.insert(*var, next_var * 2);
        new_inputs.push((next_var, name.clone()));
        next_var += 1;
    }
    let mut latch_vars = Vec::with_capacity(latches.len());
    for l in &latches {
        mapped.insert(l.var, next_var * 2);
        latch_vars.push(next_var);
        next_var += 1;
    }

    let mut strash: HashMap<(Lit, Lit), Lit> = HashMap::new();
    let mut ands: Vec<AndGate> = Vec::new();

    let mut rebuild = |root: Lit, mapped: &mut HashMap<u32, Lit>, next_var: &mut u32| -> Lit {
        let mut stack = vec![(root >> 1, false)];
        while let Some((var, expanded)) = stack.pop() {
            if mapped.contains_key(&var) {
                continue;
            }
            let (rhs0, rhs1) = match defs.get(&var) {
                Some(VarDef::And(a, b)) => (*a, *b),
                // Undefined variables cannot occur in a parsed AIG.
                _ => {
                    mapped.insert(var, FALSE_LIT);
                    continue;
                }
            };
            if !expanded {
                stack.push((var, true));
                stack.push((rhs1 >> 1, false));
                stack.push((rhs0 >> 1, false));
                continue;
            }
            let a = negate_if(mapped[&(rhs0 >> 1)], rhs0 & 1 == 1);
            let b = negate_if(mapped[&(rhs1 >> 1)], rhs1 & 1 == 1);
            let folded = if a == FALSE_LIT || b == FALSE_LIT || a == b ^ 1 {
                FALSE_LIT
            } else if a == TRUE_LIT {
                b
            } else if b == TRUE_LIT || a == b {
                a
            } else {
                let key = (a.min(b), a.max(b));
                match strash.get(&key) {
                    Some(&lit) => lit,
                    None => {
                        let lit = *next_var * 2;
                        *next_var += 1;
                        ands.push(AndGate {
                            lhs: lit >> 1,
                            rhs0: key.1,
                            rhs1: key.0,
                        });
                        strash.insert(key, lit);
                        lit
                    }
                }
            };
            mapped.insert(var, folded);
        }
        negate_if(mapped[&(root >> 1)], root & 1 == 1)
    };

    let new_outputs: Vec<(Lit, String)> = outputs
        .iter()
        .map(|(lit, name)| (rebuild(*lit, &mut mapped, &mut next_var), name.clone()))
        .collect();
    let new_latches: Vec<Latch> = latches
        .iter()
        .zip(latch_vars)
        .map(|(l, var)| Latch {
            var,
            next: rebuild(l.next, &mut mapped, &mut next_var),
            init: l.init,
            name: l.name.clone(),
        })
        .collect();
    drop(rebuild);

    Aig {
        max_var: next_var - 1,
        inputs: new_inputs,
        latches: new_latches,
        outputs: new_outputs,
        ands,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_hdl_comments_and_attributes_are_ignored() {
        let a = "// generated by tool A\nmodule m(input a, output y);\n  (* src = \"/tmp/x/a.v:3\" *)\n  assign y = a; /* note */\nendmodule\n";
        let b = "module m(input a, output y);\n\n   assign   y = a;\nendmodule";
        assert_eq!(
            canonicalize(&Language::Netlist, a),
            canonicalize(&Language::Netlist, b)
        );
    }

    #[test]
    fn test_string_literals_keep_comment_markers() {
        let text = "initial $display(\"a // b\");";
        assert_eq!(
            canonicalize(&Language::Verilog, text).unwrap(),
            "initial $display(\"a // b\");\n"
        );
    }

    #[test]
    fn test_smt2_comments_are_ignored() {
        assert_eq!(
            canonicalize(&Language::Smt2, "; header\n(assert  true) ; trailing\n"),
            Some("(assert true)\n".to_string())
        );
    }

    #[test]
    fn test_aig_input_order_and_gate_order_do_not_matter() {
        // y = a & b, with inputs declared in different orders and an extra
        // dead gate in the second form.
        let lhs = "aag 3 2 0 1 1\n2\n4\n6\n6 2 4\ni0 a\ni1 b\no0 y\n";
        let rhs = "aag 4 2 0 1 2\n2\n4\n6\n8 2 2\n6 4 2\ni0 b\ni1 a\no0 y\n";
        assert_eq!(
            canonicalize(&Language::Aiger, lhs),
            canonicalize(&Language::Aiger, rhs)
        );
    }

    #[test]
    fn test_aig_constant_folding() {
        // y = a & !a folds to constant false; z = a & 1 folds to a.
        let aig = parse_aag("aag 3 1 0 2 2\n2\n4\n6\n4 2 3\n6 2 1\ni0 a\no0 y\no1 z\n").unwrap();
        let canonical = canonicalize_aig(&aig);
        assert!(canonical.ands.is_empty());
        assert_eq!(
            canonical.outputs,
            vec![(FALSE_LIT, "y".to_string()), (2, "z".to_string())]
        );
    }

    #[test]
    fn test_aig_structural_hashing_merges_duplicates() {
        // Two copies of a & b feeding an AND collapse to one gate.
        let aig = parse_aag("aag 5 2 0 1 3\n2\n4\n10\n6 2 4\n8 4 2\n10 6 8\ni0 a\ni1 b\no0 y\n")
            .unwrap();
        let canonical = canonicalize_aig(&aig);
        assert_eq!(canonical.ands.len(), 1);
    }

    #[test]
    fn test_aig_latch_ordering_is_by_name() {
        let lhs = "aag 2 0 2 0 0\n2 4\n4 2\nl0 q0\nl1 q1\n";
        let rhs = "aag 2 0 2 0 0\n4 2\n2 4\nl0 q1\nl1 q0\n";
        assert_eq!(
            canonicalize(&Language::Aiger, lhs),
            canonicalize(&Language::Aiger, rhs)
        );
    }
}
