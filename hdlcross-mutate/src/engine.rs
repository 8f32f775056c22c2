// SPDX-License-Identifier: Apache-2.0

//! Drives the operators over a pool of candidate sites.
//!
//! Every candidate is scored by its operator's priority and by how many bytes
//! it would touch that no earlier mutation touched. Each step takes either the
//! best candidate or a uniformly random one, rewrites, then re-parses and
//! lints the result. The candidates of an accepted mutant join the pool, so a
//! chain can branch from any text produced so far.

use std::collections::BTreeMap;
use std::fmt;
use std::process::Command;
use std::rc::Rc;

use anyhow::{bail, Context};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;
use serde::{Deserialize, Serialize};

use crate::edit::{apply_edits, Edit, EditError};
use crate::operators::{all_operators, Candidate, MutationOperator, OperatorKind};
use crate::verilog::{parse_source, Analysis, ParseError, SourceFile, Span};

/// Score added per priority level.
pub const PRIORITY_COEFFICIENT: u64 = 100;
/// Chance of taking the best-scoring candidate instead of a random one.
pub const RANDOM_SELECTION_RATE: f64 = 0.5;
/// The candidate pool holds at most this many candidates per requested
/// mutant.
const POOL_FACTOR: usize = 3;

/// How an operator competes for selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatorPolicy {
    /// Added to the score of every candidate of the operator.
    pub priority: u32,
    /// Relative share of the candidate pool; zero disables the operator.
    pub weight: u32,
}

impl OperatorPolicy {
    pub fn default_for(kind: OperatorKind) -> Self {
        let (priority, weight) = match kind {
            OperatorKind::ChangeUnaryOp
            | OperatorKind::ChangeBinaryOp
            | OperatorKind::MakeLoopGenerate
            | OperatorKind::MakeRepeat
            | OperatorKind::IfToCase => (0, 1),
            OperatorKind::RedundantAssignment => (0, 2),
            OperatorKind::RemoveCond | OperatorKind::DuplicateModule | OperatorKind::DuplicateExpr => {
                (1, 2)
            }
            OperatorKind::DuplicateCond => (1, 3),
            OperatorKind::MakeFunction => (2, 3),
            OperatorKind::SplitAssignment => (0, 3),
            OperatorKind::MakeArray => (1, 5),
            OperatorKind::LoopAssignment => (2, 5),
        };
        OperatorPolicy { priority, weight }
    }
}

/// Which bytes of a text were produced or replaced by earlier mutations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteCoverage {
    covered: Vec<bool>,
}

impl ByteCoverage {
    pub fn new(len: usize) -> Self {
        ByteCoverage {
            covered: vec![false; len],
        }
    }

    pub fn covered(&self) -> usize {
        self.covered.iter().filter(|c| **c).count()
    }

    /// Untouched bytes in `span`, times the bytes already touched.
    pub fn score(&self, span: Span) -> u64 {
        let end = span.end.min(self.covered.len());
        let start = span.start.min(end);
        let fresh = self.covered[start..end].iter().filter(|c| !**c).count();
        (fresh * self.covered()) as u64
    }

    /// Coverage of the text produced by applying `edits`: inserted text is
    /// covered, everything else keeps its flag.
    pub fn apply(&self, edits: &[Edit]) -> ByteCoverage {
        let mut sorted: Vec<&Edit> = edits.iter().collect();
        sorted.sort_by_key(|e| (e.start, e.end));
        let mut covered = Vec::with_capacity(self.covered.len());
        let mut pos = 0;
        for edit in sorted {
            let start = edit.start.clamp(pos, self.covered.len());
            covered.extend_from_slice(&self.covered[pos..start]);
            covered.extend(std::iter::repeat(true).take(edit.text.len()));
            pos = edit.end.clamp(start, self.covered.len());
        }
        covered.extend_from_slice(&self.covered[pos..]);
        ByteCoverage { covered }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Byte range of the rewritten site in the pre-mutation text.
    pub start: usize,
    pub end: usize,
    pub line: u32,
    pub column: u32,
    pub module: String,
}

/// Enough information to reproduce one mutation from its input text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationRecord {
    pub operator: OperatorKind,
    pub location: Location,
    /// Seed of the RNG handed to the operator's rewrite.
    pub seed: u64,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct Mutant {
    pub text: String,
    pub record: MutationRecord,
    /// The text `record` applies to: 0 is the input of the chain, `k` the
    /// `k`-th mutant.
    pub parent: usize,
}

/// Where a drawn candidate failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionStage {
    Rewrite,
    Parse,
    Lint,
}

/// A candidate that did not yield a valid mutant.
#[derive(Debug, Clone)]
pub struct RejectedMutation {
    pub record: MutationRecord,
    pub stage: RejectionStage,
    pub reason: String,
    /// The text the mutation was applied to.
    pub base: String,
    /// The rewritten text, when the rewrite itself succeeded.
    pub mutant: Option<String>,
}

#[derive(Debug)]
pub enum MutationError {
    Parse(ParseError),
    /// No operator produced a valid mutant.
    Inapplicable {
        tried: Vec<OperatorKind>,
    },
    UnknownOperator(String),
    Replay(String),
    Edit(EditError),
}

impl fmt::Display for MutationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationError::Parse(e) => write!(f, "cannot parse input: {}", e),
            MutationError::Inapplicable { tried } => write!(
                f,
                "no applicable mutation (tried {} operator(s))",
                tried.len()
            ),
            MutationError::UnknownOperator(name) => {
                write!(f, "unknown mutation operator: {}", name)
            }
            MutationError::Replay(msg) => write!(f, "cannot replay mutation: {}", msg),
            MutationError::Edit(e) => write!(f, "invalid rewrite: {}", e),
        }
    }
}

impl std::error::Error for MutationError {}

impl From<ParseError> for MutationError {
    fn from(e: ParseError) -> Self {
        MutationError::Parse(e)
    }
}

impl From<EditError> for MutationError {
    fn from(e: EditError) -> Self {
        MutationError::Edit(e)
    }
}

/// External checker every mutant must pass, such as `iverilog -t null`.
#[derive(Debug, Clone)]
pub struct Linter {
    command: Vec<String>,
    extension: String,
}

impl Linter {
    /// `{input}` in `command` is replaced by the mutant's path; without
    /// the placeholder the path is appended.
    pub fn new(command: Vec<String>) -> Self {
        Linter {
            command,
            extension: "v".to_string(),
        }
    }

    pub fn with_extension(mut self, extension: &str) -> Self {
        self.extension = extension.to_string();
        self
    }

    pub fn check(&self, text: &str) -> anyhow::Result<()> {
        let Some((program, args)) = self.command.split_first() else {
            bail!("empty lint command");
        };
        let file = tempfile::Builder::new()
            .prefix("hdlcross-lint-")
            .suffix(&format!(".{}", self.extension))
            .tempfile()?;
        std::fs::write(file.path(), text)?;
        let path = file.path().display().to_string();
        let mut substituted = false;
        let mut args: Vec<String> = args
            .iter()
            .map(|a| {
                if a.contains("{input}") {
                    substituted = true;
                    a.replace("{input}", &path)
                } else {
                    a.clone()
                }
            })
            .collect();
        if !substituted {
            args.push(path);
        }
        log::debug!("Running lint: {} {}", program, args.join(" "));
        let output = Command::new(program)
            .args(&args)
            .output()
            .with_context(|| format!("failed to run lint command `{}`", program))?;
        if !output.status.success() {
            bail!(
                "lint rejected mutant: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}


/// A text candidates are drawn from.
struct Base {
    index: usize,
    file: SourceFile,
    analysis: Analysis,
    coverage: ByteCoverage,
}

impl Base {
    fn new(index: usize, file: SourceFile, coverage: ByteCoverage) -> Rc<Self> {
        let analysis = Analysis::new(&file);
        Rc::new(Base {
            index,
            file,
            analysis,
            coverage,
        })
    }
}

struct Pending {
    base: Rc<Base>,
    /// Index into `MutationEngine::operators`.
    op: usize,
    candidate: Candidate,
    score: u64,
}

struct Realized {
    file: SourceFile,
    edits: Vec<Edit>,
}

struct Rejection {
    stage: RejectionStage,
    mutant: Option<String>,
    reason: String,
}

#[derive(Debug)]
pub struct MutationEngine {
    operators: Vec<Box<dyn MutationOperator>>,
    weights: BTreeMap<OperatorKind, u32>,
    linter: Option<Linter>,
}

impl Default for MutationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MutationEngine {
    pub fn new() -> Self {
        MutationEngine {
            operators: all_operators(),
            weights: BTreeMap::new(),
            linter: None,
        }
    }

    /// Overrides pool shares by operator name. A weight of zero disables the
    /// operator.
    pub fn with_weights(mut self, weights: &BTreeMap<String, u32>) -> Result<Self, MutationError> {
        for (name, weight) in weights {
            let kind: OperatorKind = name
                .parse()
                .map_err(|_| MutationError::UnknownOperator(name.clone()))?;
            self.weights.insert(kind, *weight);
        }
        Ok(self)
    }

    pub fn with_linter(mut self, linter: Linter) -> Self {
        self.linter = Some(linter);
        self
    }

    pub fn policy(&self, kind: OperatorKind) -> OperatorPolicy {
        let mut policy = OperatorPolicy::default_for(kind);
        if let Some(weight) = self.weights.get(&kind) {
            policy.weight = *weight;
        }
        policy
    }

    fn enabled(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.operators.len()).filter(|&i| self.policy(self.operators[i].kind()).weight > 0)
    }

    fn candidates_of(&self, base: &Rc<Base>) -> Vec<Pending> {
        let mut out = Vec::new();
        for op in self.enabled() {
            let operator = self.operators[op].as_ref();
            let priority = u64::from(self.policy(operator.kind()).priority);
            let found = operator.find_candidates(&base.file, &base.analysis);
            log::trace!("{} candidate(s) for {}", found.len(), operator.kind());
            out.extend(found.into_iter().map(|candidate| Pending {
                score: priority * PRIORITY_COEFFICIENT + base.coverage.score(candidate.span),
                base: Rc::clone(base),
                op,
                candidate,
            }));
        }
        out
    }

    /// Removes the best candidate, or a uniformly random one.
    fn select(pool: &mut Vec<Pending>, rng: &mut Pcg64Mcg) -> Option<Pending> {
        if pool.is_empty() {
            return None;
        }
        pool.sort_by(|a, b| b.score.cmp(&a.score));
        let chosen = if rng.gen_bool(RANDOM_SELECTION_RATE) {
            0
        } else {
            rng.gen_range(0..pool.len())
        };
        Some(pool.remove(chosen))
    }

    /// Keeps each operator's best candidates within its share of `limit`.
    /// Shares are split among the operators present in the pool, and every
    /// operator keeps at least one candidate.
    fn trim(&self, pool: &mut Vec<Pending>, limit: usize) {
        let budget = limit.min(pool.len()) as u64;
        let mut by_op: BTreeMap<usize, Vec<Pending>> = BTreeMap::new();
        for pending in pool.drain(..) {
            by_op.entry(pending.op).or_default().push(pending);
        }
        let weight = |op: usize| u64::from(self.policy(self.operators[op].kind()).weight);
        let total: u64 = by_op.keys().map(|&op| weight(op)).sum::<u64>().max(1);
        for (op, mut group) in by_op {
            let share = ((budget * weight(op) / total) as usize).max(1);
            if share < group.len() {
                group.sort_by(|a, b| b.score.cmp(&a.score));
                group.truncate(share);
            }
            pool.extend(group);
        }
    }

    /// Applies `op` at `candidate` and validates the result.
    fn realize(
        &self,
        file: &SourceFile,
        analysis: &Analysis,
        op: &dyn MutationOperator,
        candidate: &Candidate,
        seed: u64,
        lint: bool,
    ) -> Result<Realized, Rejection> {
        let rejected = |stage, mutant: Option<&str>, e: anyhow::Error| Rejection {
            stage,
            mutant: mutant.map(str::to_string),
            reason: format!("{:#}", e),
        };
        let mut rng = Pcg64Mcg::seed_from_u64(seed);
        let edits = op
            .rewrite(file, analysis, candidate, &mut rng)
            .map_err(|e| rejected(RejectionStage::Rewrite, None, e))?;
        let text = apply_edits(&file.text, &edits)
            .map_err(|e| rejected(RejectionStage::Rewrite, None, e.into()))?;
        let mutant = parse_source(&text).map_err(|e| {
            rejected(
                RejectionStage::Parse,
                Some(&text),
                anyhow::Error::new(e).context("mutant does not parse"),
            )
        })?;
        if lint {
            if let Some(linter) = &self.linter {
                linter
                    .check(&text)
                    .map_err(|e| rejected(RejectionStage::Lint, Some(&text), e))?;
            }
        }
        Ok(Realized { file: mutant, edits })
    }

    fn record(
        file: &SourceFile,
        kind: OperatorKind,
        candidate: &Candidate,
        seed: u64,
    ) -> MutationRecord {
        let pos = file.lines.pos(candidate.span.start);
        let module = file.modules[candidate.module].name.name.clone();
        let snippet: String = file
            .slice(candidate.span)
            .lines()
            .next()
            .unwrap_or("")
            .trim()
            .chars()
            .take(60)
            .collect();
        MutationRecord {
            operator: kind,
            description: format!("{} in module {} at {}: {}", kind, module, pos, snippet),
            location: Location {
                start: candidate.span.start,
                end: candidate.span.end,
                line: pos.lineno,
                column: pos.colno,
                module,
            },
            seed,
        }
    }

    /// Produces one mutant of `source`.
    pub fn mutate(&self, source: &str, seed: u64) -> Result<Mutant, MutationError> {
        let mut mutants = self.mutate_chain(source, seed, 1)?;
        mutants.pop().ok_or_else(|| MutationError::Inapplicable {
            tried: self.enabled().map(|i| self.operators[i].kind()).collect(),
        })
    }

    /// Produces up to `count` mutants; each derives from the input or from
    /// an earlier mutant of the chain.
    ///
    /// Fails only if not even the first mutation applies.
    pub fn mutate_chain(
        &self,
        source: &str,
        seed: u64,
        count: usize,
    ) -> Result<Vec<Mutant>, MutationError> {
        self.mutate_chain_with(source, seed, count, &mut |_| {})
    }

    /// Like [`MutationEngine::mutate_chain`], handing every candidate that
    /// failed to rewrite, parse or lint to `on_reject`.
    pub fn mutate_chain_with(
        &self,
        source: &str,
        seed: u64,
        count: usize,
        on_reject: &mut dyn FnMut(&RejectedMutation),
    ) -> Result<Vec<Mutant>, MutationError> {
        let root = Base::new(0, parse_source(source)?, ByteCoverage::new(source.len()));
        let mut rng = Pcg64Mcg::seed_from_u64(seed);
        let mut pool = self.candidates_of(&root);
        let limit = count.max(1) * POOL_FACTOR;
        let mut out: Vec<Mutant> = Vec::with_capacity(count);

        while out.len() < count {
            let Some(next) = Self::select(&mut pool, &mut rng) else {
                break;
            };
            let op = self.operators[next.op].as_ref();
            let rewrite_seed: u64 = rng.gen();
            let base = &next.base;
            let record = Self::record(&base.file, op.kind(), &next.candidate, rewrite_seed);
            match self.realize(&base.file, &base.analysis, op, &next.candidate, rewrite_seed, true) {
                Ok(realized) => {
                    log::debug!("Applied {} to text {}", record.description, base.index);
                    let coverage = base.coverage.apply(&realized.edits);
                    out.push(Mutant {
                        text: realized.file.text.clone(),
                        record,
                        parent: base.index,
                    });
                    let child = Base::new(out.len(), realized.file, coverage);
                    pool.extend(self.candidates_of(&child));
                    self.trim(&mut pool, limit);
                }
                Err(rejection) => {
                    log::debug!("{} rejected: {}", record.description, rejection.reason);
                    on_reject(&RejectedMutation {
                        record,
                        stage: rejection.stage,
                        reason: rejection.reason,
                        base: base.file.text.clone(),
                        mutant: rejection.mutant,
                    });
                }
            }
        }

        if out.is_empty() && count > 0 {
            return Err(MutationError::Inapplicable {
                tried: self.enabled().map(|i| self.operators[i].kind()).collect(),
            });
        }
        if out.len() < count {
            log::warn!("Mutation chain stopped after {} of {}: no candidates left", out.len(), count);
        }
        Ok(out)
    }

    /// Re-applies `record` to the text it was originally applied to.
    pub fn replay(&self, source: &str, record: &MutationRecord) -> Result<String, MutationError> {
        let file = parse_source(source)?;
        let analysis = Analysis::new(&file);
        let op = self
            .operators
            .iter()
            .find(|o| o.kind() == record.operator)
            .ok_or_else(|| MutationError::UnknownOperator(record.operator.to_string()))?;
        let candidate = op
            .find_candidates(&file, &analysis)
            .into_iter()
            .find(|c| c.span.start == record.location.start && c.span.end == record.location.end)
            .ok_or_else(|| {
                MutationError::Replay(format!(
                    "no {} candidate at {}:{}",
                    record.operator, record.location.line, record.location.column
                ))
            })?;
        self.realize(&file, &analysis, op.as_ref(), &candidate, record.seed, false)
            .map(|r| r.file.text)
            .map_err(|r| MutationError::Replay(r.reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::Target;
    use pretty_assertions::assert_eq;

    const SRC: &str = r#"
module counter(input clk, input rst, input en, output reg [3:0] count);
  wire [3:0] next;
  assign next = count + 4'd1;
  always @(posedge clk) begin
    if (rst)
      count <= 4'd0;
    else if (en)
      count <= next;
  end
endmodule
"#;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn pending(engine: &MutationEngine, base: &Rc<Base>, kind: OperatorKind, score: u64) -> Pending {
        Pending {
            base: Rc::clone(base),
            op: engine.operators.iter().position(|o| o.kind() == kind).unwrap(),
            candidate: Candidate {
                module: 0,
                span: Span::new(0, 1),
                target: Target::Signal("x".to_string()),
            },
            score,
        }
    }

    #[test]
    fn test_mutation_is_deterministic() {
        init_logger();
        let engine = MutationEngine::new();
        let a = engine.mutate(SRC, 42).unwrap();
        let b = engine.mutate(SRC, 42).unwrap();
        assert_eq!(a.text, b.text);
        assert_eq!(a.record, b.record);
        assert_eq!(a.parent, 0);
        assert_ne!(a.text, SRC);
    }

    #[test]
    fn test_replay_reproduces_mutant() {
        init_logger();
        let engine = MutationEngine::new();
        for seed in 0..10 {
            let m = engine.mutate(SRC, seed).unwrap();
            assert_eq!(engine.replay(SRC, &m.record).unwrap(), m.text, "seed {}", seed);
        }
    }

    #[test]
    fn test_empty_module_is_inapplicable() {
        init_logger();
        let err = MutationEngine::new()
            .mutate("module m; endmodule\n", 1)
            .unwrap_err();
        match err {
            MutationError::Inapplicable { tried } => assert_eq!(tried.len(), 14),
            other => panic!("unexpected {}", other),
        }
    }

    #[test]
    fn test_chain_mutants_replay_from_their_parent() {
        init_logger();
        let engine = MutationEngine::new();
        let chain = engine.mutate_chain(SRC, 7, 3).unwrap();
        assert_eq!(chain.len(), 3);
        let texts: Vec<&str> = std::iter::once(SRC)
            .chain(chain.iter().map(|m| m.text.as_str()))
            .collect();
        for (i, m) in chain.iter().enumerate() {
            assert!(m.parent <= i, "mutant {} derives from later text {}", i + 1, m.parent);
            assert_eq!(engine.replay(texts[m.parent], &m.record).unwrap(), m.text);
            parse_source(&m.text).unwrap();
        }
    }

    #[test]
    fn test_chain_draws_from_descendant_candidates() {
        init_logger();
        let engine = MutationEngine::new();
        let derived = (0..10)
            .flat_map(|seed| engine.mutate_chain(SRC, seed, 4).unwrap())
            .filter(|m| m.parent > 0)
            .count();
        assert!(derived > 0, "no mutant was derived from an earlier mutant");
    }

    #[test]
    fn test_default_policy_favours_structural_operators() {
        let engine = MutationEngine::new();
        assert_eq!(
            engine.policy(OperatorKind::MakeArray),
            OperatorPolicy { priority: 1, weight: 5 }
        );
        assert_eq!(
            engine.policy(OperatorKind::LoopAssignment),
            OperatorPolicy { priority: 2, weight: 5 }
        );
        assert_eq!(
            engine.policy(OperatorKind::RedundantAssignment),
            OperatorPolicy { priority: 0, weight: 2 }
        );
        assert_eq!(engine.policy(OperatorKind::ChangeUnaryOp).weight, 1);

        let mut weights = BTreeMap::new();
        weights.insert("MakeArray".to_string(), 0);
        let engine = engine.with_weights(&weights).unwrap();
        assert_eq!(
            engine.policy(OperatorKind::MakeArray),
            OperatorPolicy { priority: 1, weight: 0 }
        );
    }

    #[test]
    fn test_byte_coverage_tracks_rewritten_bytes() {
        let fresh = ByteCoverage::new(10);
        assert_eq!(fresh.score(Span::new(2, 6)), 0);

        let once = fresh.apply(&[Edit::replace(Span::new(2, 4), "abc")]);
        assert_eq!(once.covered(), 3);
        assert_eq!(once.score(Span::new(0, 11)), 8 * 3);
        assert_eq!(once.score(Span::new(2, 5)), 0);

        let twice = once.apply(&[Edit::insert(0, "//"), Edit::replace(Span::new(9, 11), "")]);
        assert_eq!(twice.covered(), 5);
        assert_eq!(twice.score(Span::new(0, 11)), 6 * 5);
    }

    #[test]
    fn test_selection_mixes_best_and_random_candidates() {
        let engine = MutationEngine::new();
        let base = Base::new(
            0,
            parse_source("module m; endmodule\n").unwrap(),
            ByteCoverage::new(20),
        );
        let mut best = 0;
        for seed in 0..200 {
            let mut rng = Pcg64Mcg::seed_from_u64(seed);
            let mut pool: Vec<Pending> = [1, 300, 5]
                .into_iter()
                .map(|score| pending(&engine, &base, OperatorKind::IfToCase, score))
                .collect();
            let chosen = MutationEngine::select(&mut pool, &mut rng).unwrap();
            assert_eq!(pool.len(), 2);
            if chosen.score == 300 {
                best += 1;
            }
        }
        // Best half the time, plus a third of the random picks.
        assert!((100..180).contains(&best), "best chosen {} of 200 times", best);
        assert!(MutationEngine::select(&mut Vec::new(), &mut Pcg64Mcg::seed_from_u64(0)).is_none());
    }

    #[test]
    fn test_trim_keeps_best_candidates_per_share() {
        let engine = MutationEngine::new();
        let base = Base::new(
            0,
            parse_source("module m; endmodule\n").unwrap(),
            ByteCoverage::new(20),
        );
        let mut pool: Vec<Pending> = (0..10)
            .map(|s| pending(&engine, &base, OperatorKind::MakeArray, s))
            .chain((0..10).map(|s| pending(&engine, &base, OperatorKind::IfToCase, s)))
            .collect();
        engine.trim(&mut pool, 6);
        let mut kept: Vec<(OperatorKind, u64)> = pool
            .iter()
            .map(|p| (engine.operators[p.op].kind(), p.score))
            .collect();
        kept.sort();
        let mut expected: Vec<(OperatorKind, u64)> = (5..10)
            .map(|s| (OperatorKind::MakeArray, s))
            .chain(std::iter::once((OperatorKind::IfToCase, 9)))
            .collect();
        expected.sort();
        assert_eq!(kept, expected);
    }

    #[test]
    fn test_weights_restrict_operators() {
        init_logger();
        let mut weights: BTreeMap<String, u32> = OperatorKind::ALL
            .iter()
            .map(|k| (k.to_string(), 0))
            .collect();
        weights.insert("IfToCase".to_string(), 1);
        let engine = MutationEngine::new().with_weights(&weights).unwrap();
        let m = engine.mutate(SRC, 3).unwrap();
        assert_eq!(m.record.operator, OperatorKind::IfToCase);
        assert!(m.text.contains("case (|("));

        let mut bad = BTreeMap::new();
        bad.insert("Bogus".to_string(), 1);
        assert!(matches!(
            MutationEngine::new().with_weights(&bad),
            Err(MutationError::UnknownOperator(_))
        ));
    }

    #[test]
    fn test_linter_rejection_discards_mutants() {
        init_logger();
        let rejecting = MutationEngine::new()
            .with_linter(Linter::new(vec!["sh".into(), "-c".into(), "exit 1".into()]));
        let mut rejected = Vec::new();
        let result = rejecting.mutate_chain_with(SRC, 5, 1, &mut |r| rejected.push(r.clone()));
        assert!(matches!(result, Err(MutationError::Inapplicable { .. })));
        let linted: Vec<&RejectedMutation> = rejected
            .iter()
            .filter(|r| r.stage == RejectionStage::Lint)
            .collect();
        assert!(!linted.is_empty());
        for r in linted {
            assert_eq!(r.base, SRC);
            assert!(r.mutant.as_deref().is_some_and(|m| m != SRC));
            assert!(r.reason.contains("lint rejected mutant"), "{}", r.reason);
        }

        let accepting = MutationEngine::new().with_linter(Linter::new(vec![
            "sh".into(),
            "-c".into(),
            "test -s \"$0\"".into(),
        ]));
        assert!(accepting.mutate(SRC, 5).is_ok());
    }
}
