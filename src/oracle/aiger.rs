// SPDX-License-Identifier: Apache-2.0

//! ASCII AIGER ("aag") logical forms.
//!
//! Latches are supported, including their reset values; see
//! `oracle::sat` for how sequential AIGs are compared.

use std::collections::{BTreeMap, HashMap};

pub type Lit = u32;

pub const FALSE_LIT: Lit = 0;
pub const TRUE_LIT: Lit = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchInit {
    Zero,
    One,
    Nondet,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Latch {
    pub var: u32,
    pub next: Lit,
    pub init: LatchInit,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AndGate {
    pub lhs: u32,
    pub rhs0: Lit,
    pub rhs1: Lit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aig {
    pub max_var: u32,
    pub inputs: Vec<(u32, String)>,
    pub latches: Vec<Latch>,
    pub outputs: Vec<(Lit, String)>,
    pub ands: Vec<AndGate>,
}

/// Node defining a variable.
#[derive(Debug, Clone, Copy)]
pub(crate) enum VarDef {
    Input,
    Latch,
    And(Lit, Lit),
}

fn next_non_empty_line<'a>(iter: &mut std::str::Lines<'a>) -> Option<&'a str> {
    iter.by_ref().find(|line| !line.trim().is_empty())
}

pub fn parse_aag(src: &str) -> Result<Aig, String> {
    let mut lines = src.lines();
    let header_line = next_non_empty_line(&mut lines).ok_or_else(|| "empty AIGER input".to_string())?;
    let header: Vec<&str> = header_line.split_whitespace().collect();
    if header.first() != Some(&"aag") {
        return Err(format!("expected ASCII AIGER header, got \"{}\"", header_line));
    }
    if header.len() < 6 {
        return Err(format!(
            "expected at least 6 tokens in AIGER header, got {} (\"{}\")",
            header.len(),
            header_line
        ));
    }
    let parse_u32 = |s: &str, field: &str| -> Result<u32, String> {
        s.parse::<u32>()
            .map_err(|e| format!("invalid {} value '{}': {}", field, s, e))
    };
    let max_var = parse_u32(header[1], "M")?;
    let num_inputs = parse_u32(header[2], "I")?;
    let num_latches = parse_u32(header[3], "L")?;
    let num_outputs = parse_u32(header[4], "O")?;
    let num_ands = parse_u32(header[5], "A")?;
    // AIGER 1.9 header extension: bad states, constraints, justice, fairness.
    for (field, token) in ["B", "C", "J", "F"].iter().zip(header.iter().skip(6)) {
        if parse_u32(token, field)? != 0 {
            return Err(format!("AIGER {} section is not supported", field));
        }
    }

    let mut defined: HashMap<u32, VarDef> = HashMap::new();
    let mut define = |var: u32, def: VarDef| -> Result<(), String> {
        if var == 0 {
            return Err("variable 0 is reserved for the constant".to_string());
        }
        if var > max_var {
            return Err(format!("variable {} exceeds maximum index {}", var, max_var));
        }
        if defined.insert(var, def).is_some() {
            return Err(format!("variable {} is defined twice", var));
        }
        Ok(())
    };

    let mut inputs = Vec::with_capacity(num_inputs as usize);
    for idx in 0..num_inputs {
        let line = next_non_empty_line(&mut lines)
            .ok_or_else(|| format!("expected {} input lines but found fewer", num_inputs))?;
        let lit = parse_u32(line.trim(), "input literal")?;
        if lit & 1 != 0 {
            return Err(format!("input literal must be positive, got {}", lit));
        }
        define(lit >> 1, VarDef::Input)?;
        inputs.push((lit >> 1, format!("i{}", idx)));
    }

    let mut latches = Vec::with_capacity(num_latches as usize);
    for idx in 0..num_latches {
        let line = next_non_empty_line(&mut lines)
            .ok_or_else(|| format!("expected {} latch lines but found fewer", num_latches))?;
        let toks: Vec<&str> = line.split_whitespace().collect();
        if toks.len() != 2 && toks.len() != 3 {
            return Err(format!("latch line should have 2 or 3 fields, got '{}'", line));
        }
        let lit = parse_u32(toks[0], "latch literal")?;
        if lit & 1 != 0 {
            return Err(format!("latch literal must be positive, got {}", lit));
        }
        let next = parse_u32(toks[1], "latch next")?;
        let init = match toks.get(2) {
            None => LatchInit::Zero,
            Some(t) => {
                let v = parse_u32(t, "latch init")?;
                if v == 0 {
                    LatchInit::Zero
                } else if v == 1 {
                    LatchInit::One
                } else if v == lit {
                    LatchInit::Nondet
                } else {
                    return Err(format!("invalid latch init {} for latch {}", v, lit));
                }
            }
        };
        define(lit >> 1, VarDef::Latch)?;
        latches.push(Latch {
            var: lit >> 1,
            next,
            init,
            name: format!("l{}", idx),
        });
    }

    let mut outputs = Vec::with_capacity(num_outputs as usize);
    for idx in 0..num_outputs {
        let line = next_non_empty_line(&mut lines)
            .ok_or_else(|| format!("expected {} output lines but found fewer", num_outputs))?;
        outputs.push((parse_u32(line.trim(), "output literal")?, format!("o{}", idx)));
    }

    let mut ands = Vec::with_capacity(num_ands as usize);
    for _ in 0..num_ands {
        let line = next_non_empty_line(&mut lines)
            .ok_or_else(|| format!("expected {} AND lines but found fewer", num_ands))?;
        let toks: Vec<&str> = line.split_whitespace().collect();
        if toks.len() != 3 {
            return Err(format!("AND line should have 3 fields, got '{}'", line));
        }
        let lhs = parse_u32(toks[0], "AND lhs")?;
        if lhs & 1 != 0 {
            return Err(format!("AND lhs literal {} must be positive (even)", lhs));
        }
        let rhs0 = parse_u32(toks[1], "AND rhs")?;
        let rhs1 = parse_u32(toks[2], "AND rhs")?;
        define(lhs >> 1, VarDef::And(rhs0, rhs1))?;
        ands.push(AndGate {
            lhs: lhs >> 1,
            rhs0,
            rhs1,
        });
    }

    // Symbol table, terminated by an optional comment section.
    for line in lines {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        if line == "c" || line.starts_with("c ") {
            break;
        }
        let (tag, name) = line
            .split_once(' ')
            .ok_or_else(|| format!("malformed symbol line '{}'", line))?;
        let (kind, index) = tag.split_at(1);
        let index: usize = index
            .parse()
            .map_err(|e| format!("malformed symbol index in '{}': {}", line, e))?;
        let slot = match kind {
            "i" => inputs.get_mut(index).map(|(_, n)| n),
            "l" => latches.get_mut(index).map(|l| &mut l.name),
            "o" => outputs.get_mut(index).map(|(_, n)| n),
            _ => return Err(format!("unknown symbol kind in '{}'", line)),
        };
        match slot {
            Some(n) => *n = name.to_string(),
            None => return Err(format!("symbol index out of range in '{}'", line)),
        }
    }

    let aig = Aig {
        max_var,
        inputs,
        latches,
        outputs,
        ands,
    };
    let defs = aig.definitions();
    let check = |lit: Lit| -> Result<(), String> {
        if lit >> 1 != 0 && !defs.contains_key(&(lit >> 1)) {
            return Err(format!("literal {} refers to an undefined variable", lit));
        }
        Ok(())
    };
    for l in &aig.latches {
        check(l.next)?;
    }
    for (lit, _) in &aig.outputs {
        check(*lit)?;
    }
    for g in &aig.ands {
        check(g.rhs0)?;
        check(g.rhs1)?;
    }
    aig.topological_ands()?;
    Ok(aig)
}

impl Aig {
    pub(crate) fn definitions(&self) -> HashMap<u32, VarDef> {
        let mut defs = HashMap::new();
        for (var, _) in &self.inputs {
            defs.insert(*var, VarDef::Input);
        }
        for l in &self.latches {
            defs.insert(l.var, VarDef::Latch);
        }
        for g in &self.ands {
            defs.insert(g.lhs, VarDef::And(g.rhs0, g.rhs1));
        }
        defs
    }

    /// AND gates ordered so that every gate follows its operands. Fails on
    /// combinational cycles.
    pub fn topological_ands(&self) -> Result<Vec<AndGate>, String> {
        let defs = self.definitions();
        let mut state: HashMap<u32, bool> = HashMap::new(); // false = in progress
        let mut order = Vec::with_capacity(self.ands.len());
        for root in &self.ands {
            if state.contains_key(&root.lhs) {
                continue;
            }
            let mut stack: Vec<(u32, bool)> = vec![(root.lhs, false)];
            while let Some((var, expanded)) = stack.pop() {
                let (rhs0, rhs1) = match defs.get(&var) {
                    Some(VarDef::And(a, b)) => (*a, *b),
                    _ => continue,
                };
                if expanded {
                    state.insert(var, true);
                    order.push(AndGate { lhs: var, rhs0, rhs1 });
                    continue;
                }
                match state.get(&var) {
                    Some(true) => continue,
                    Some(false) => return Err(format!("combinational cycle through variable {}", var)),
                    None => {}
                }
                state.insert(var, false);
                stack.push((var, true));
                for operand in [rhs1 >> 1, rhs0 >> 1] {
                    if let Some(VarDef::And(..)) = defs.get(&operand) {
                        match state.get(&operand) {
                            Some(true) => {}
                            Some(false) => {
                                return Err(format!("combinational cycle through variable {}", operand))
                            }
                            None => stack.push((operand, false)),
                        }
                    }
                }
            }
        }
        Ok(order)
    }

    /// Evaluates outputs and latch next states for one assignment of inputs
    /// and current latch states, both keyed by symbol name. Missing names
    /// default to false.
    pub fn evaluate(
        &self,
        inputs: &BTreeMap<String, bool>,
        state: &BTreeMap<String, bool>,
    ) -> Result<Evaluation, String> {
        let mut values: HashMap<u32, bool> = HashMap::new();
        values.insert(0, false);
        for (var, name) in &self.inputs {
            values.insert(*var, inputs.get(name).copied().unwrap_or(false));
        }
        for l in &self.latches {
            values.insert(l.var, state.get(&l.name).copied().unwrap_or(false));
        }
        let lit_value = |values: &HashMap<u32, bool>, lit: Lit| -> bool {
            values.get(&(lit >> 1)).copied().unwrap_or(false) ^ (lit & 1 == 1)
        };
        for g in self.topological_ands()? {
            let v = lit_value(&values, g.rhs0) && lit_value(&values, g.rhs1);
            values.insert(g.lhs, v);
        }
        Ok(Evaluation {
            outputs: self
                .outputs
                .iter()
                .map(|(lit, name)| (name.clone(), lit_value(&values, *lit)))
                .collect(),
            next_state: self
                .latches
                .iter()
                .map(|l| (l.name.clone(), lit_value(&values, l.next)))
                .collect(),
        })
    }

    pub fn to_aag(&self) -> String {
        let mut s = format!(
            "aag {} {} {} {} {}\n",
            self.max_var,
            self.inputs.len(),
            self.latches.len(),
            self.outputs.len(),
            self.ands.len()
        );
        for (var, _) in &self.inputs {
            s.push_str(&format!("{}\n", var * 2));
        }
        for l in &self.latches {
            match l.init {
                LatchInit::Zero => s.push_str(&format!("{} {}\n", l.var * 2, l.next)),
                LatchInit::One => s.push_str(&format!("{} {} 1\n", l.var * 2, l.next)),
                LatchInit::Nondet => {
                    s.push_str(&format!("{} {} {}\n", l.var * 2, l.next, l.var * 2))
                }
            }
        }
        for (lit, _) in &self.outputs {
            s.push_str(&format!("{}\n", lit));
        }
        for g in &self.ands {
            s.push_str(&format!("{} {} {}\n", g.lhs * 2, g.rhs0, g.rhs1));
        }
        for (i, (_, name)) in self.inputs.iter().enumerate() {
            s.push_str(&format!("i{} {}\n", i, name));
        }
        for (i, l) in self.latches.iter().enumerate() {
            s.push_str(&format!("l{} {}\n", i, l.name));
        }
        for (i, (_, name)) in self.outputs.iter().enumerate() {
            s.push_str(&format!("o{} {}\n", i, name));
        }
        s
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub outputs: BTreeMap<String, bool>,
    pub next_state: BTreeMap<String, bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const AND2: &str = "aag 3 2 0 1 1\n2\n4\n6\n6 2 4\ni0 a\ni1 b\no0 y\n";

    #[test]
    fn test_parse_combinational() {
        let aig = parse_aag(AND2).unwrap();
        assert_eq!(aig.inputs, vec![(1, "a".to_string()), (2, "b".to_string())]);
        assert_eq!(aig.outputs, vec![(6, "y".to_string())]);
        assert_eq!(aig.ands.len(), 1);
    }

    #[test]
    fn test_parse_latch_with_init() {
        // Toggle flop: q' = !q.
        let aig = parse_aag("aag 1 0 1 1 0\n2 3 1\n2\nl0 q\no0 out\n").unwrap();
        assert_eq!(aig.latches[0].init, LatchInit::One);
        assert_eq!(aig.latches[0].name, "q");
        let mut state = BTreeMap::new();
        state.insert("q".to_string(), true);
        let eval = aig.evaluate(&BTreeMap::new(), &state).unwrap();
        assert_eq!(eval.next_state["q"], false);
        assert_eq!(eval.outputs["out"], true);
    }

    #[test]
    fn test_unsorted_and_gates_evaluate() {
        // y = (a & b) & a, with the outer gate listed first.
        let src = "aag 4 2 0 1 2\n2\n4\n8\n8 6 2\n6 2 4\ni0 a\ni1 b\no0 y\n";
        let aig = parse_aag(src).unwrap();
        let mut inputs = BTreeMap::new();
        inputs.insert("a".to_string(), true);
        inputs.insert("b".to_string(), true);
        assert!(aig.evaluate(&inputs, &BTreeMap::new()).unwrap().outputs["y"]);
        inputs.insert("b".to_string(), false);
        assert!(!aig.evaluate(&inputs, &BTreeMap::new()).unwrap().outputs["y"]);
    }

    #[test]
    fn test_rejects_malformed_inputs() {
        assert!(parse_aag("").is_err());
        assert!(parse_aag("aig 1 1 0 1 0\n2\n2\n").is_err());
        assert!(parse_aag("aag 1 1 0 1 0\n3\n2\n").is_err());
        // Undefined variable 3.
        assert!(parse_aag("aag 3 1 0 1 0\n2\n6\n").is_err());
        // Cycle between two gates.
        assert!(parse_aag("aag 3 1 0 1 2\n2\n6\n4 6 2\n6 4 2\n").is_err());
    }

    #[test]
    fn test_to_aag_reparses() {
        let aig = parse_aag(AND2).unwrap();
        assert_eq!(parse_aag(&aig.to_aag()).unwrap(), aig);
    }
}
