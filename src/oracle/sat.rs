// SPDX-License-Identifier: Apache-2.0

//! In-process equivalence of AIGER logical forms via SAT miters.
//!
//! Combinational circuits are compared with a single miter. Sequential
//! circuits are first unrolled from their reset state for a bounded number
//! of cycles, comparing outputs in every cycle; a difference found there is
//! a real divergence with a replayable input sequence. When none is found
//! and both sides reset every latch the same way, one induction step over a
//! free shared state (outputs and next-state functions agree everywhere)
//! proves equivalence. Anything else is inconclusive.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use varisat::{ExtendFormula, Lit, Solver};

use crate::artifact::CircuitArtifact;
use crate::config::{DEFAULT_BMC_DEPTH, DEFAULT_MAX_AND_GATES};
use crate::oracle::aiger::{parse_aag, Aig, LatchInit};
use crate::oracle::{Decision, DecisionProcedure, OracleContext, Witness};
use crate::repr::{Language, RepresentationKind};

const RESULT_POLL: Duration = Duration::from_millis(20);

fn add_tseitsin_and(solver: &mut impl ExtendFormula, a: Lit, b: Lit, out: Lit) {
    solver.add_clause(&[!a, !b, out]);
    solver.add_clause(&[a, !out]);
    solver.add_clause(&[b, !out]);
}

fn add_tseitsin_xor(solver: &mut impl ExtendFormula, a: Lit, b: Lit, out: Lit) {
    solver.add_clause(&[!a, !b, !out]);
    solver.add_clause(&[a, b, !out]);
    solver.add_clause(&[a, !b, out]);
    solver.add_clause(&[!a, b, out]);
}

fn unique_names<'a>(names: impl Iterator<Item = &'a str>) -> Option<BTreeSet<&'a str>> {
    let mut set = BTreeSet::new();
    for n in names {
        if !set.insert(n) {
            return None;
        }
    }
    Some(set)
}

/// Input names of both sides, or why the two AIGs cannot be compared.
fn matched_inputs(lhs: &Aig, rhs: &Aig) -> Result<Vec<String>, Decision> {
    type Names<'a> = (
        Option<BTreeSet<&'a str>>,
        Option<BTreeSet<&'a str>>,
        Option<BTreeSet<&'a str>>,
    );
    fn names(aig: &Aig) -> Names<'_> {
        (
            unique_names(aig.inputs.iter().map(|(_, n)| n.as_str())),
            unique_names(aig.latches.iter().map(|l| l.name.as_str())),
            unique_names(aig.outputs.iter().map(|(_, n)| n.as_str())),
        )
    }
    let (lhs_in, lhs_latch, lhs_out) = names(lhs);
    let (rhs_in, rhs_latch, rhs_out) = names(rhs);
    let (Some(lhs_in), Some(lhs_latch), Some(lhs_out), Some(rhs_in), Some(rhs_latch), Some(rhs_out)) =
        (lhs_in, lhs_latch, lhs_out, rhs_in, rhs_latch, rhs_out)
    else {
        return Err(Decision::Incomparable("duplicate symbol names".to_string()));
    };
    if lhs_out != rhs_out {
        return Err(Decision::Incomparable(format!(
            "output names differ: {:?} vs {:?}",
            lhs_out, rhs_out
        )));
    }
    if lhs_latch != rhs_latch {
        return Err(Decision::Incomparable(format!(
            "latch names differ: {:?} vs {:?}",
            lhs_latch, rhs_latch
        )));
    }
    Ok(lhs_in.union(&rhs_in).map(|n| n.to_string()).collect())
}

/// Encodes one time frame of `aig` into `solver`, using the given literals
/// for inputs and latch current states. Returns literals for each output
/// and each latch next-state function, keyed by name.
fn encode(
    solver: &mut Solver,
    aig: &Aig,
    false_lit: Lit,
    inputs: &HashMap<String, Lit>,
    state: &HashMap<String, Lit>,
) -> Result<(BTreeMap<String, Lit>, BTreeMap<String, Lit>), String> {
    let mut var_lits: HashMap<u32, Lit> = HashMap::new();
    var_lits.insert(0, false_lit);
    for (var, name) in &aig.inputs {
        var_lits.insert(*var, inputs[name]);
    }
    for l in &aig.latches {
        var_lits.insert(l.var, state[&l.name]);
    }
    let lit_of = |var_lits: &HashMap<u32, Lit>, lit: u32| -> Lit {
        let base = var_lits[&(lit >> 1)];
        if lit & 1 == 1 {
            !base
        } else {
            base
        }
    };
    for g in aig.topological_ands()? {
        let a = lit_of(&var_lits, g.rhs0);
        let b = lit_of(&var_lits, g.rhs1);
        let out = solver.new_lit();
        add_tseitsin_and(solver, a, b, out);
        var_lits.insert(g.lhs, out);
    }
    let outputs = aig
        .outputs
        .iter()
        .map(|(lit, name)| (name.clone(), lit_of(&var_lits, *lit)))
        .collect();
    let next_state = aig
        .latches
        .iter()
        .map(|l| (l.name.clone(), lit_of(&var_lits, l.next)))
        .collect();
    Ok((outputs, next_state))
}

/// Adds `diff -> (a1 != b1 | a2 != b2 | ...)` and returns `diff`, or `None`
/// when there is nothing to compare.
fn miter(solver: &mut Solver, pairs: impl Iterator<Item = (Lit, Lit)>) -> Option<Lit> {
    let mut clause = Vec::new();
    for (a, b) in pairs {
        let m = solver.new_lit();
        add_tseitsin_xor(solver, a, b, m);
        clause.push(m);
    }
    if clause.is_empty() {
        return None;
    }
    let diff = solver.new_lit();
    clause.push(!diff);
    solver.add_clause(&clause);
    Some(diff)
}

/// Latch literals at reset. Latches without a reset value get a free
/// variable, shared by name between the two sides.
fn reset_state(
    solver: &mut Solver,
    aig: &Aig,
    false_lit: Lit,
    nondet: &mut HashMap<String, Lit>,
) -> HashMap<String, Lit> {
    aig.latches
        .iter()
        .map(|l| {
            let lit = match l.init {
                LatchInit::Zero => false_lit,
                LatchInit::One => !false_lit,
                LatchInit::Nondet => *nondet
                    .entry(l.name.clone())
                    .or_insert_with(|| solver.new_lit()),
            };
            (l.name.clone(), lit)
        })
        .collect()
}

/// Runs `aig` from `init` over one input assignment per cycle and returns
/// the outputs of every cycle.
fn simulate(
    aig: &Aig,
    init: &BTreeMap<String, bool>,
    frames: &[BTreeMap<String, bool>],
) -> Result<Vec<BTreeMap<String, bool>>, String> {
    let mut state = init.clone();
    let mut outputs = Vec::with_capacity(frames.len());
    for inputs in frames {
        let eval = aig.evaluate(inputs, &state)?;
        outputs.push(eval.outputs);
        state = eval.next_state;
    }
    Ok(outputs)
}

fn bit(v: bool) -> String {
    String::from(if v { "1" } else { "0" })
}

fn bits(values: &BTreeMap<String, bool>) -> BTreeMap<String, String> {
    values.iter().map(|(k, v)| (k.clone(), bit(*v))).collect()
}

/// Per-cycle values keyed `name@cycle`.
fn cycle_bits(frames: &[BTreeMap<String, bool>]) -> BTreeMap<String, String> {
    frames
        .iter()
        .enumerate()
        .flat_map(|(cycle, values)| {
            values
                .iter()
                .map(move |(k, v)| (format!("{}@{}", k, cycle), bit(*v)))
        })
        .collect()
}

/// SAT-based comparison of two AIGs.
#[derive(Debug, Clone, Copy)]
pub struct AigerSatProcedure {
    max_and_gates: usize,
    bmc_depth: usize,
}

impl Default for AigerSatProcedure {
    fn default() -> Self {
        AigerSatProcedure::new(DEFAULT_MAX_AND_GATES)
    }
}

impl AigerSatProcedure {
    pub fn new(max_and_gates: usize) -> Self {
        AigerSatProcedure {
            max_and_gates,
            bmc_depth: DEFAULT_BMC_DEPTH,
        }
    }

    /// Number of cycles after reset searched for a divergence.
    pub fn with_bmc_depth(self, bmc_depth: usize) -> Self {
        AigerSatProcedure { bmc_depth, ..self }
    }

    pub fn decide_aigs(&self, lhs: &Aig, rhs: &Aig) -> Decision {
        self.decide_until(lhs, rhs, &AtomicBool::new(false))
    }

    /// Like `decide_aigs`, but gives up with `Unknown` at the next time
    /// frame once `stop` is raised.
    pub fn decide_until(&self, lhs: &Aig, rhs: &Aig, stop: &AtomicBool) -> Decision {
        let total_ands = lhs.ands.len() + rhs.ands.len();
        if total_ands > self.max_and_gates {
            return Decision::Unknown(format!(
                "miter has {} AND gates, budget is {}",
                total_ands, self.max_and_gates
            ));
        }
        let inputs = match matched_inputs(lhs, rhs) {
            Ok(inputs) => inputs,
            Err(decision) => return decision,
        };
        if let Some(decision) = self.bounded_from_reset(lhs, rhs, &inputs, stop) {
            return decision;
        }
        if lhs.latches.is_empty() {
            return Decision::Unsat;
        }
        let resets: HashMap<&str, LatchInit> =
            rhs.latches.iter().map(|l| (l.name.as_str(), l.init)).collect();
        if let Some(l) = lhs
            .latches
            .iter()
            .find(|l| resets.get(l.name.as_str()) != Some(&l.init))
        {
            return Decision::Unknown(format!(
                "no divergence within {} cycles of reset, but latch {} resets differently",
                self.bmc_depth, l.name
            ));
        }
        self.induction_step(lhs, rhs, &inputs, stop)
    }

    /// Searches the first `bmc_depth` cycles after reset (only cycle 0 for
    /// combinational circuits) for differing outputs. `None` means no
    /// difference was found.
    fn bounded_from_reset(
        &self,
        lhs: &Aig,
        rhs: &Aig,
        input_names: &[String],
        stop: &AtomicBool,
    ) -> Option<Decision> {
        let depth = if lhs.latches.is_empty() { 0 } else { self.bmc_depth };
        let mut solver = Solver::new();
        let false_lit = solver.new_lit();
        solver.add_clause(&[!false_lit]);
        let mut nondet = HashMap::new();
        let mut lhs_state = reset_state(&mut solver, lhs, false_lit, &mut nondet);
        let mut rhs_state = reset_state(&mut solver, rhs, false_lit, &mut nondet);
        let initial = (lhs_state.clone(), rhs_state.clone());
        let mut frames: Vec<HashMap<String, Lit>> = Vec::new();

        for cycle in 0..=depth {
            if stop.load(Ordering::SeqCst) {
                return Some(Decision::Unknown(format!("stopped at cycle {}", cycle)));
            }
            let inputs: HashMap<String, Lit> = input_names
                .iter()
                .map(|n| (n.clone(), solver.new_lit()))
                .collect();
            let (lhs_out, lhs_next) = match encode(&mut solver, lhs, false_lit, &inputs, &lhs_state) {
                Ok(v) => v,
                Err(e) => return Some(Decision::Incomparable(e)),
            };
            let (rhs_out, rhs_next) = match encode(&mut solver, rhs, false_lit, &inputs, &rhs_state) {
                Ok(v) => v,
                Err(e) => return Some(Decision::Incomparable(e)),
            };
            frames.push(inputs);
            let pairs = lhs_out.iter().map(|(n, l)| (*l, rhs_out[n]));
            if let Some(diff) = miter(&mut solver, pairs) {
                solver.assume(&[diff]);
                match solver.solve() {
                    Ok(true) => return Some(self.trace_witness(&solver, lhs, rhs, &initial, &frames)),
                    Ok(false) => solver.add_clause(&[!diff]),
                    Err(e) => return Some(Decision::Unknown(format!("solver error: {}", e))),
                }
            }
            log::debug!("aiger-sat: no divergence at cycle {}", cycle);
            lhs_state = lhs_next.into_iter().collect();
            rhs_state = rhs_next.into_iter().collect();
        }
        None
    }

    /// Reads the input sequence and reset values off the model and replays
    /// them on both circuits.
    fn trace_witness(
        &self,
        solver: &Solver,
        lhs: &Aig,
        rhs: &Aig,
        initial: &(HashMap<String, Lit>, HashMap<String, Lit>),
        frames: &[HashMap<String, Lit>],
    ) -> Decision {
        let model: HashSet<Lit> = match solver.model() {
            Some(model) => model.into_iter().collect(),
            None => return Decision::Unknown("solver returned no model".to_string()),
        };
        let value = |lit: &Lit| model.contains(lit);
        let assign = |lits: &HashMap<String, Lit>| -> BTreeMap<String, bool> {
            lits.iter().map(|(n, l)| (n.clone(), value(l))).collect()
        };
        let inputs: Vec<BTreeMap<String, bool>> = frames.iter().map(assign).collect();
        let (lhs_init, rhs_init) = (assign(&initial.0), assign(&initial.1));
        let (lhs_seen, rhs_seen) = match (
            simulate(lhs, &lhs_init, &inputs),
            simulate(rhs, &rhs_init, &inputs),
        ) {
            (Ok(a), Ok(b)) => (a, b),
            (Err(e), _) | (_, Err(e)) => return Decision::Unknown(e),
        };
        if lhs_seen.last() == rhs_seen.last() {
            return Decision::Unknown("solver model does not replay as a divergence".to_string());
        }
        if lhs.latches.is_empty() {
            return Decision::Sat(Witness {
                inputs: bits(&inputs[0]),
                state: BTreeMap::new(),
                lhs_outputs: bits(&lhs_seen[0]),
                rhs_outputs: bits(&rhs_seen[0]),
                raw: None,
            });
        }
        let mut state: BTreeMap<String, String> = BTreeMap::new();
        for (side, init) in [("lhs", &lhs_init), ("rhs", &rhs_init)] {
            state.extend(init.iter().map(|(n, v)| (format!("{}.{}", side, n), bit(*v))));
        }
        Decision::Sat(Witness {
            inputs: cycle_bits(&inputs),
            state,
            lhs_outputs: cycle_bits(&lhs_seen),
            rhs_outputs: cycle_bits(&rhs_seen),
            raw: None,
        })
    }

    /// Outputs and next-state functions agree for every input and every
    /// shared current state.
    fn induction_step(&self, lhs: &Aig, rhs: &Aig, input_names: &[String], stop: &AtomicBool) -> Decision {
        if stop.load(Ordering::SeqCst) {
            return Decision::Unknown("stopped before the induction step".to_string());
        }
        let mut solver = Solver::new();
        let false_lit = solver.new_lit();
        solver.add_clause(&[!false_lit]);
        let inputs: HashMap<String, Lit> = input_names
            .iter()
            .map(|n| (n.clone(), solver.new_lit()))
            .collect();
        let state: HashMap<String, Lit> = lhs
            .latches
            .iter()
            .map(|l| (l.name.clone(), solver.new_lit()))
            .collect();
        let (lhs_out, lhs_next) = match encode(&mut solver, lhs, false_lit, &inputs, &state) {
            Ok(v) => v,
            Err(e) => return Decision::Incomparable(e),
        };
        let (rhs_out, rhs_next) = match encode(&mut solver, rhs, false_lit, &inputs, &state) {
            Ok(v) => v,
            Err(e) => return Decision::Incomparable(e),
        };
        let pairs = lhs_out
            .iter()
            .map(|(n, l)| (*l, rhs_out[n]))
            .chain(lhs_next.iter().map(|(n, l)| (*l, rhs_next[n])));
        let Some(diff) = miter(&mut solver, pairs) else {
            return Decision::Unsat;
        };
        solver.assume(&[diff]);
        match solver.solve() {
            Ok(false) => Decision::Unsat,
            Ok(true) => Decision::Unknown(format!(
                "no divergence within {} cycles of reset; the circuits differ only from states not shown reachable",
                self.bmc_depth
            )),
            Err(e) => Decision::Unknown(format!("solver error: {}", e)),
        }
    }
}

impl DecisionProcedure for AigerSatProcedure {
    fn name(&self) -> &str {
        "aiger-sat"
    }

    fn accepts(&self, lhs: &RepresentationKind, rhs: &RepresentationKind) -> bool {
        *lhs.language() == Language::Aiger && *rhs.language() == Language::Aiger
    }

    /// The solver runs on its own thread. This call returns `Unknown` once
    /// `ctx.timeout` elapses or `ctx.cancel` is raised; the abandoned solver
    /// stops at its next time frame.
    fn decide(&self, lhs: &CircuitArtifact, rhs: &CircuitArtifact, ctx: &OracleContext) -> Decision {
        let parse = |a: &CircuitArtifact| -> Result<Aig, String> {
            let text = a.text().map_err(|e| e.to_string())?;
            parse_aag(&text)
        };
        let (lhs, rhs) = match (parse(lhs), parse(rhs)) {
            (Ok(l), Ok(r)) => (l, r),
            (Err(e), _) | (_, Err(e)) => return Decision::Incomparable(e),
        };

        let procedure = *self;
        let stop = Arc::new(AtomicBool::new(false));
        let solver_stop = Arc::clone(&stop);
        let (tx, rx) = mpsc::channel();
        let spawned = std::thread::Builder::new()
            .name("aiger-sat".to_string())
            .spawn(move || {
                let _ = tx.send(procedure.decide_until(&lhs, &rhs, &solver_stop));
            });
        if let Err(e) = spawned {
            return Decision::Unknown(format!("could not start solver thread: {}", e));
        }

        let deadline = Instant::now() + ctx.timeout;
        loop {
            if ctx.cancel.load(Ordering::SeqCst) {
                stop.store(true, Ordering::SeqCst);
                return Decision::Unknown("cancelled".to_string());
            }
            let now = Instant::now();
            if now >= deadline {
                stop.store(true, Ordering::SeqCst);
                log::warn!("aiger-sat exceeded {:?}; abandoning the miter", ctx.timeout);
                return Decision::Unknown(format!("timed out after {:?}", ctx.timeout));
            }
            match rx.recv_timeout(RESULT_POLL.min(deadline - now)) {
                Ok(decision) => return decision,
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    return Decision::Unknown("solver thread exited without a result".to_string())
                }
            }
        }
    }
}
