// SPDX-License-Identifier: Apache-2.0

//! The cross-check driver: mutates inputs, samples compilation paths,
//! executes them on a worker pool and compares the resulting artifacts.
//!
//! Every sampled path of every variant is executed as an independent unit
//! on a worker pool. A unit's outcome is persisted as soon as it finishes.
//! Once the last path of an (input, variant, sink) group finishes, the
//! worker that ran it partitions the group's sink artifacts into
//! equivalence classes: each artifact is compared with one representative
//! of every class found so far and joins the first class it is equivalent
//! to. Runs are dropped, and their scratch directories deleted, as soon as
//! no comparison needs them.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

use hdlcross_mutate::{Linter, MutationEngine, MutationError, RejectedMutation};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;
use serde::{Deserialize, Serialize};

use crate::artifact::CircuitArtifact;
use crate::config::{CrossCheckConfig, RunConfig};
use crate::error::{ConfigError, RunError};
use crate::graph::{CompilationPath, Edge, TranslationGraph};
use crate::limitations::{CompatibilityPredicate, KnownLimitations};
use crate::oracle::{EquivalenceOracle, OracleContext};
use crate::repr::{KindSelector, Language, RepresentationKind};
use crate::translator::{
    translate, Compatibility, OptionProfile, ToolError, TranslateContext, Translator,
};
use crate::verdict::{Verdict, CROSS_CHECKING_LABEL, MUTATION_LABEL};
use crate::workspace::{unit_scratch, FailureBundle, ResultStore};

/// Name of the per-unit summary file in a failure directory.
pub const OUTCOME_FILE: &str = "outcome.json";
pub const STRATEGY_FILE: &str = "strategy.json";
/// Strategy of the second path of a diverging comparison.
pub const RHS_STRATEGY_FILE: &str = "strategy-rhs.json";
pub const MUTATIONS_FILE: &str = "mutations.json";

const WATCHDOG_POLL: Duration = Duration::from_millis(50);

/// One source program handed to the driver.
#[derive(Debug, Clone)]
pub struct InputProgram {
    /// Short name used in unit ids and failure directory names.
    pub name: String,
    pub kind: RepresentationKind,
    pub text: String,
    pub top: Option<String>,
}

impl InputProgram {
    pub fn new(name: &str, kind: RepresentationKind, text: &str, top: Option<String>) -> Self {
        InputProgram {
            name: name.to_string(),
            kind,
            text: text.to_string(),
            top,
        }
    }

    /// Reads `path`. Without an explicit `kind`, `.sv` files are
    /// SystemVerilog and everything else is Verilog.
    pub fn from_path(
        path: &Path,
        kind: Option<RepresentationKind>,
        top: Option<String>,
    ) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let kind = kind.unwrap_or_else(|| {
            match path.extension().and_then(|e| e.to_str()) {
                Some("sv") | Some("svh") => RepresentationKind::source(Language::SystemVerilog),
                _ => RepresentationKind::source(Language::Verilog),
            }
        });
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "input".to_string());
        Ok(InputProgram {
            name,
            kind,
            text,
            top,
        })
    }
}

/// Work requested for one input program.
#[derive(Debug, Clone)]
pub struct CrossCheckJob {
    pub input: InputProgram,
    pub sinks: Vec<KindSelector>,
    /// Number of mutated variants in addition to the original.
    pub validations: usize,
    /// Paths sampled per variant and sink.
    pub paths_per_sink: usize,
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitId {
    pub input: String,
    /// 0 is the unmutated original.
    pub variant: usize,
    pub sink: String,
    pub path: usize,
}

impl UnitId {
    /// Directory-safe rendering.
    pub fn dir_name(&self) -> String {
        let sink: String = self
            .sink
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        format!("{}-v{}-{}-p{}", self.input, self.variant, sink, self.path)
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[v{}] -> {} #{}",
            self.input, self.variant, self.sink, self.path
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PathResult {
    Completed { sink_kind: RepresentationKind },
    Failed { verdict: Verdict },
}

/// What happened when one compilation path was executed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitOutcome {
    pub unit: UnitId,
    pub path: String,
    pub result: PathResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_dir: Option<PathBuf>,
}

impl UnitOutcome {
    pub fn verdict(&self) -> Option<&Verdict> {
        match &self.result {
            PathResult::Completed { .. } => None,
            PathResult::Failed { verdict } => Some(verdict),
        }
    }
}

/// The oracle's verdict on the sink artifacts of two units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonOutcome {
    pub lhs: UnitId,
    pub rhs: UnitId,
    pub verdict: Verdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_dir: Option<PathBuf>,
}

/// One line of the result log.
#[derive(Debug, Serialize)]
#[serde(tag = "record", rename_all = "snake_case")]
enum LogRecord<'a> {
    Unit(&'a UnitOutcome),
    Comparison(&'a ComparisonOutcome),
}

/// Contents of `outcome.json` in a failure directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub unit: UnitId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rhs: Option<UnitId>,
    pub verdict: Verdict,
    pub top: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    /// Sorted by unit id.
    pub units: Vec<UnitOutcome>,
    /// Sorted by (lhs, rhs).
    pub comparisons: Vec<ComparisonOutcome>,
    /// The run was cut short; units that never started are absent.
    pub cancelled: bool,
}

impl RunSummary {
    pub fn divergences(&self) -> usize {
        self.comparisons
            .iter()
            .filter(|c| matches!(c.verdict, Verdict::Diverging { .. }))
            .count()
    }

    /// Units whose translators crashed or timed out.
    pub fn tool_failures(&self) -> usize {
        self.units
            .iter()
            .filter(|u| u.verdict().map_or(false, |v| v.is_failure()))
            .count()
    }

    /// Number of units and comparisons that ended with verdict `name`.
    pub fn count(&self, name: &str) -> usize {
        let units = self
            .units
            .iter()
            .filter(|u| u.verdict().map_or(false, |v| v.name() == name))
            .count();
        let comparisons = self
            .comparisons
            .iter()
            .filter(|c| c.verdict.name() == name)
            .count();
        units + comparisons
    }

    pub fn completed_paths(&self) -> usize {
        self.units
            .iter()
            .filter(|u| matches!(u.result, PathResult::Completed { .. }))
            .count()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "units: {} ({} completed, {} tool failures, {} unsupported, {} inconclusive)",
            self.units.len(),
            self.completed_paths(),
            self.tool_failures(),
            self.units
                .iter()
                .filter(|u| matches!(u.verdict(), Some(Verdict::Unsupported { .. })))
                .count(),
            self.units
                .iter()
                .filter(|u| matches!(u.verdict(), Some(Verdict::Inconclusive { .. })))
                .count(),
        )?;
        write!(
            f,
            "comparisons: {} ({} equivalent, {} diverging, {} unsupported, {} inconclusive)",
            self.comparisons.len(),
            self.comparisons
                .iter()
                .filter(|c| c.verdict == Verdict::Equivalent)
                .count(),
            self.divergences(),
            self.comparisons
                .iter()
                .filter(|c| matches!(c.verdict, Verdict::Unsupported { .. }))
                .count(),
            self.comparisons
                .iter()
                .filter(|c| matches!(c.verdict, Verdict::Inconclusive { .. }))
                .count(),
        )?;
        if self.cancelled {
            write!(f, "\nrun was cancelled before all units finished")?;
        }
        Ok(())
    }
}

/// Run-wide knobs, resolved from `[run]`.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub result_dir: PathBuf,
    pub jobs: usize,
    pub tool_timeout: Duration,
    pub oracle_timeout: Duration,
    pub max_hops: usize,
    pub global_budget: Option<Duration>,
    pub cross_variant: bool,
    pub keep_scratch: bool,
}

impl From<&RunConfig> for RunSettings {
    fn from(run: &RunConfig) -> Self {
        RunSettings {
            result_dir: run.result_dir(),
            jobs: run.jobs(),
            tool_timeout: run.tool_timeout(),
            oracle_timeout: run.oracle_timeout(),
            max_hops: run.max_hops(),
            global_budget: run.global_budget(),
            cross_variant: run.cross_variant.unwrap_or(false),
            keep_scratch: run.keep_scratch.unwrap_or(false),
        }
    }
}

/// A source program or one of its mutants: the root of an artifact tree.
#[derive(Debug)]
pub struct Variant {
    pub input: String,
    pub index: usize,
    pub artifact: CircuitArtifact,
    pub text: Arc<str>,
    /// The unmutated input, shared by all variants of one program.
    pub original: Arc<str>,
}

#[derive(Debug)]
enum Scratch {
    Temp(tempfile::TempDir),
    Kept(PathBuf),
}

impl Scratch {
    fn create(prefix: &str, keep: bool) -> std::io::Result<Scratch> {
        let dir = unit_scratch(prefix)?;
        Ok(if keep {
            Scratch::Kept(dir.keep())
        } else {
            Scratch::Temp(dir)
        })
    }

    fn path(&self) -> &Path {
        match self {
            Scratch::Temp(dir) => dir.path(),
            Scratch::Kept(path) => path,
        }
    }
}

/// Why a path stopped before reaching its sink.
#[derive(Debug, Clone)]
pub struct HopFailure {
    pub verdict: Verdict,
    pub message: String,
    pub stdout: String,
    pub stderr: String,
}

/// A path executed in its own scratch directory. The directory lives as
/// long as the run, so payload files stay readable for comparisons.
/// Dropping the run deletes it unless scratch directories are kept.
#[derive(Debug)]
pub struct PathRun {
    pub unit: UnitId,
    pub path: CompilationPath,
    pub variant: Arc<Variant>,
    /// Outputs of the hops that completed, in order.
    pub artifacts: Vec<CircuitArtifact>,
    pub failure: Option<HopFailure>,
    scratch: Option<Scratch>,
}

impl PathRun {
    /// The artifact at the end of the path, if every hop succeeded.
    pub fn sink(&self) -> Option<&CircuitArtifact> {
        match self.failure {
            Some(_) => None,
            None => self.artifacts.last(),
        }
    }

    pub fn workdir(&self) -> Option<&Path> {
        self.scratch.as_ref().map(|s| s.path())
    }
}

/// Runs `work` over `items` on at most `jobs` threads. Workers stop taking
/// items once `cancel` is raised, so the result may be shorter than the
/// input. Results arrive in completion order.
fn run_pool<T, R, F>(items: Vec<T>, jobs: usize, cancel: &AtomicBool, work: F) -> Vec<R>
where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Sync,
{
    let count = items.len();
    if count == 0 {
        return Vec::new();
    }
    let worker_count = std::cmp::max(1, std::cmp::min(jobs, count));
    let queue: Mutex<VecDeque<T>> = Mutex::new(items.into_iter().collect());
    let (tx, rx) = mpsc::channel::<R>();
    std::thread::scope(|s| {
        for _ in 0..worker_count {
            let tx = tx.clone();
            let queue = &queue;
            let work = &work;
            s.spawn(move || loop {
                if cancel.load(Ordering::SeqCst) {
                    break;
                }
                let next = {
                    let mut queue = queue.lock().unwrap_or_else(|e| e.into_inner());
                    queue.pop_front()
                };
                let Some(item) = next else {
                    break;
                };
                if tx.send(work(item)).is_err() {
                    break;
                }
            });
        }
        drop(tx);
        rx.iter().collect()
    })
}

/// Raises `cancel` once `budget` has elapsed, unless `done` is set first.
fn watchdog(budget: Duration, done: &AtomicBool, cancel: &AtomicBool) {
    let start = Instant::now();
    while !done.load(Ordering::SeqCst) {
        let elapsed = start.elapsed();
        if elapsed >= budget {
            log::warn!("Global budget of {:?} exhausted; cancelling the run", budget);
            cancel.store(true, Ordering::SeqCst);
            return;
        }
        std::thread::sleep(WATCHDOG_POLL.min(budget - elapsed));
    }
}

/// Work item of the execution phase.
struct PathUnit {
    variant: Arc<Variant>,
    unit: UnitId,
    path: CompilationPath,
}

/// (input, variant, sink)
type GroupKey = (String, usize, String);

fn group_key(unit: &UnitId) -> GroupKey {
    (unit.input.clone(), unit.variant, unit.sink.clone())
}

/// Sink-reaching runs of one group, held until every sampled path of the
/// group has finished.
#[derive(Debug, Default)]
struct PendingGroup {
    expected: usize,
    finished: usize,
    completed: Vec<Arc<PathRun>>,
}

/// Decides, as units finish in any order, which comparisons have become
/// possible, and holds on to runs only while a comparison still needs them.
#[derive(Debug, Default)]
struct GroupTracker {
    groups: BTreeMap<GroupKey, PendingGroup>,
    cross_variant: bool,
    /// First run of each finished original group, by (input, sink), while
    /// mutant groups of the same input and sink are outstanding.
    originals: BTreeMap<(String, String), Option<Arc<PathRun>>>,
    /// First runs of finished mutant groups whose original is still running.
    waiting: BTreeMap<(String, String), Vec<Arc<PathRun>>>,
    outstanding_mutants: BTreeMap<(String, String), usize>,
}

impl GroupTracker {
    fn new(units: &[PathUnit], cross_variant: bool) -> Self {
        let mut tracker = GroupTracker {
            cross_variant,
            ..GroupTracker::default()
        };
        for u in units {
            tracker.groups.entry(group_key(&u.unit)).or_default().expected += 1;
        }
        if cross_variant {
            for (input, variant, sink) in tracker.groups.keys() {
                if *variant > 0 {
                    *tracker
                        .outstanding_mutants
                        .entry((input.clone(), sink.clone()))
                        .or_default() += 1;
                }
            }
        }
        tracker
    }

    /// Groups whose last path has not finished.
    fn unfinished(&self) -> usize {
        self.groups.len()
    }

    /// Records a finished run and returns the sets of runs to classify now.
    fn finish(&mut self, run: PathRun) -> Vec<Vec<Arc<PathRun>>> {
        let key = group_key(&run.unit);
        let Some(group) = self.groups.get_mut(&key) else {
            return Vec::new();
        };
        group.finished += 1;
        if run.sink().is_some() {
            group.completed.push(Arc::new(run));
        }
        if group.finished < group.expected {
            return Vec::new();
        }
        let Some(mut group) = self.groups.remove(&key) else {
            return Vec::new();
        };
        group.completed.sort_by(|a, b| a.unit.cmp(&b.unit));
        let mut ready = Vec::new();
        if self.cross_variant {
            self.pair_with_original(&key, group.completed.first().cloned(), &mut ready);
        }
        if group.completed.len() >= 2 {
            ready.push(group.completed);
        }
        ready
    }

    fn pair_with_original(
        &mut self,
        (input, variant, sink): &GroupKey,
        first: Option<Arc<PathRun>>,
        ready: &mut Vec<Vec<Arc<PathRun>>>,
    ) {
        let slot = (input.clone(), sink.clone());
        if *variant == 0 {
            let waiting = self.waiting.remove(&slot).unwrap_or_default();
            if let Some(original) = &first {
                for mutant in waiting {
                    ready.push(vec![Arc::clone(original), mutant]);
                }
            }
            if self.outstanding_mutants.get(&slot).copied().unwrap_or(0) > 0 {
                self.originals.insert(slot, first);
            }
            return;
        }
        let remaining = match self.outstanding_mutants.get_mut(&slot) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => 0,
        };
        match self.originals.get(&slot) {
            Some(original) => {
                if let (Some(original), Some(mutant)) = (original, first) {
                    ready.push(vec![Arc::clone(original), mutant]);
                }
                if remaining == 0 {
                    self.originals.remove(&slot);
                }
            }
            None => {
                if let Some(mutant) = first {
                    self.waiting.entry(slot).or_default().push(mutant);
                }
            }
        }
    }
}

pub struct CrossChecker {
    graph: TranslationGraph,
    oracle: EquivalenceOracle,
    engine: MutationEngine,
    predicate: CompatibilityPredicate,
    settings: RunSettings,
    cancel: Arc<AtomicBool>,
}

impl CrossChecker {
    pub fn new(
        graph: TranslationGraph,
        oracle: EquivalenceOracle,
        engine: MutationEngine,
        predicate: CompatibilityPredicate,
        settings: RunSettings,
    ) -> Self {
        CrossChecker {
            graph,
            oracle,
            engine,
            predicate,
            settings,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Builds the graph, oracle, mutation engine and compatibility
    /// predicate described by `config`. `sources` are the kinds inputs
    /// will be given as.
    pub fn from_config(
        config: &CrossCheckConfig,
        sources: &[RepresentationKind],
    ) -> Result<Self, RunError> {
        let graph = TranslationGraph::new(config.build_translators()?, sources)?;
        let oracle = EquivalenceOracle::from_config(config)?;
        let mut engine = MutationEngine::new();
        if let Some(weights) = &config.mutation.weights {
            engine = engine
                .with_weights(weights)
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        if let Some(command) = &config.mutation.lint_command {
            engine = engine.with_linter(Linter::new(command.clone()));
        }
        let predicate =
            CompatibilityPredicate::new(KnownLimitations::from_config(&config.known_limitations)?);
        Ok(CrossChecker::new(
            graph,
            oracle,
            engine,
            predicate,
            RunSettings::from(&config.run),
        ))
    }

    pub fn graph(&self) -> &TranslationGraph {
        &self.graph
    }

    pub fn oracle(&self) -> &EquivalenceOracle {
        &self.oracle
    }

    pub fn engine(&self) -> &MutationEngine {
        &self.engine
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut RunSettings {
        &mut self.settings
    }

    /// The flag that stops the run; raised by the watchdog and meant to be
    /// raised by a Ctrl-C handler.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Reason the predicate rules out `translator`/`profile` for `variant`.
    fn incompatibility(
        &self,
        translator: &dyn Translator,
        profile: &OptionProfile,
        variant: &Variant,
    ) -> Option<String> {
        match self.predicate.check(
            translator,
            profile,
            variant.artifact.root_digest(),
            &variant.text,
        ) {
            Compatibility::Compatible => None,
            Compatibility::Incompatible(reason) => Some(reason),
        }
    }

    /// Samples up to `n` paths for `variant`, skipping edges the
    /// compatibility predicate rules out for it.
    pub fn sample_for(
        &self,
        variant: &Variant,
        sink: &KindSelector,
        n: usize,
        seed: u64,
    ) -> Result<Vec<CompilationPath>, crate::graph::GraphError> {
        let filter = |e: &Edge| {
            self.incompatibility(e.translator.as_ref(), &e.profile, variant)
                .is_none()
        };
        self.graph.sample_paths(
            variant.artifact.kind(),
            sink,
            n,
            seed,
            self.settings.max_hops,
            &filter,
        )
    }

    /// Produces the original plus up to `validations` chained mutants.
    /// Rejected mutation attempts are persisted to `store`.
    fn variants(
        &self,
        job: &CrossCheckJob,
        seed: u64,
        store: &ResultStore,
    ) -> Result<Vec<Arc<Variant>>, MutationError> {
        let original: Arc<str> = Arc::from(job.input.text.as_str());
        let root = CircuitArtifact::root(
            job.input.kind.clone(),
            &job.input.text,
            job.input.top.clone(),
        );
        let mut out = vec![Arc::new(Variant {
            input: job.input.name.clone(),
            index: 0,
            artifact: root,
            text: Arc::clone(&original),
            original: Arc::clone(&original),
        })];
        if job.validations == 0 {
            return Ok(out);
        }
        let ext = job.input.kind.extension().to_string();
        let mut rejected = 0;
        let mutants = self.engine.mutate_chain_with(
            &job.input.text,
            seed,
            job.validations,
            &mut |r: &RejectedMutation| {
                let name = format!("{}-m{}", job.input.name, rejected);
                rejected += 1;
                if let Err(e) = persist_rejected_mutation(store, &name, &ext, r) {
                    log::warn!("could not persist rejected mutation of {}: {}", job.input.name, e);
                }
            },
        )?;
        for (i, mutant) in mutants.into_iter().enumerate() {
            let parent = &out[mutant.parent].artifact;
            let artifact = CircuitArtifact::mutant(parent, &mutant.text, mutant.record);
            out.push(Arc::new(Variant {
                input: job.input.name.clone(),
                index: i + 1,
                artifact,
                text: Arc::from(mutant.text.as_str()),
                original: Arc::clone(&original),
            }));
        }
        Ok(out)
    }

    /// Executes every hop of `path` on `variant`, stopping at the first
    /// failure.
    pub fn execute_path(&self, variant: Arc<Variant>, unit: UnitId, path: CompilationPath) -> PathRun {
        let mut run = PathRun {
            unit,
            path,
            variant,
            artifacts: Vec::new(),
            failure: None,
            scratch: None,
        };
        let scratch = match Scratch::create(&run.unit.dir_name(), self.settings.keep_scratch) {
            Ok(s) => s,
            Err(e) => {
                run.failure = Some(HopFailure {
                    verdict: Verdict::Inconclusive {
                        reason: format!("could not create scratch directory: {}", e),
                    },
                    message: e.to_string(),
                    stdout: String::new(),
                    stderr: String::new(),
                });
                return run;
            }
        };

        for (position, hop) in run.path.hops.iter().enumerate() {
            let translator = hop.translator.as_ref();
            if let Some(reason) = self.incompatibility(translator, &hop.profile, &run.variant) {
                log::warn!("{}: skipping {}: {}", run.unit, translator.name(), reason);
                run.failure = Some(HopFailure {
                    verdict: Verdict::Unsupported { reason: reason.clone() },
                    message: reason,
                    stdout: String::new(),
                    stderr: String::new(),
                });
                break;
            }
            let input = run.artifacts.last().unwrap_or(&run.variant.artifact);
            let stem = format!("hop{}-{}", position, translator.name());
            let ctx = TranslateContext {
                workdir: scratch.path(),
                output_stem: &stem,
                timeout: self.settings.tool_timeout,
                cancel: &self.cancel,
            };
            match translate(translator, input, &hop.profile, &ctx) {
                Ok(artifact) => run.artifacts.push(artifact),
                Err(error) => {
                    if let ToolError::Unsupported { .. } = error {
                        self.predicate.cache.exclude(
                            run.variant.artifact.root_digest(),
                            translator.name(),
                            &hop.profile.name,
                        );
                    }
                    let (stdout, stderr) = error
                        .captured_output()
                        .map(|(o, e)| (o.to_string(), e.to_string()))
                        .unwrap_or_default();
                    run.failure = Some(HopFailure {
                        verdict: Verdict::from_tool_error(&error, position),
                        message: error.to_string(),
                        stdout,
                        stderr,
                    });
                    break;
                }
            }
        }
        run.scratch = Some(scratch);
        run
    }

    /// Asks the oracle about the sink artifacts of two completed paths.
    pub fn compare(&self, lhs: &PathRun, rhs: &PathRun, workdir: &Path) -> Verdict {
        let (Some(a), Some(b)) = (lhs.sink(), rhs.sink()) else {
            return Verdict::Unsupported {
                reason: "a path did not complete".to_string(),
            };
        };
        let ctx = OracleContext {
            workdir,
            timeout: self.settings.oracle_timeout,
            cancel: &self.cancel,
        };
        self.oracle.is_equivalent(a, b, &ctx)
    }

    fn unit_outcome(&self, run: &PathRun, store: &ResultStore) -> UnitOutcome {
        let result = match &run.failure {
            None => PathResult::Completed {
                sink_kind: run.path.sink().clone(),
            },
            Some(f) => PathResult::Failed {
                verdict: f.verdict.clone(),
            },
        };
        let mut outcome = UnitOutcome {
            unit: run.unit.clone(),
            path: run.path.describe(),
            result,
            failure_dir: None,
        };
        if let Some(failure) = &run.failure {
            if let Some(label) = failure.verdict.failure_label() {
                match persist_compilation_failure(store, label, run, failure) {
                    Ok(dir) => outcome.failure_dir = Some(dir),
                    Err(e) => log::warn!("could not persist {}: {}", run.unit, e),
                }
            }
            log::info!("{}: {}", run.unit, failure.verdict);
        } else {
            log::info!("{}: completed {}", run.unit, outcome.path);
        }
        outcome
    }

    fn comparison_outcome(
        &self,
        lhs: &PathRun,
        rhs: &PathRun,
        store: &ResultStore,
    ) -> ComparisonOutcome {
        let verdict = match unit_scratch("compare") {
            Ok(dir) => self.compare(lhs, rhs, dir.path()),
            Err(e) => Verdict::Inconclusive {
                reason: format!("could not create scratch directory: {}", e),
            },
        };
        let mut outcome = ComparisonOutcome {
            lhs: lhs.unit.clone(),
            rhs: rhs.unit.clone(),
            verdict,
            failure_dir: None,
        };
        log::info!("{} vs {}: {}", outcome.lhs, outcome.rhs, outcome.verdict);
        if outcome.verdict.failure_label() == Some(CROSS_CHECKING_LABEL) {
            match persist_divergence(store, lhs, rhs, &outcome.verdict) {
                Ok(dir) => outcome.failure_dir = Some(dir),
                Err(e) => log::warn!("could not persist {} vs {}: {}", lhs.unit, rhs.unit, e),
            }
        }
        append_record(store, &LogRecord::Comparison(&outcome));
        outcome
    }

    /// Partitions the completed runs of one group into equivalence
    /// classes, returning every comparison made.
    fn classify(&self, runs: &[Arc<PathRun>], store: &ResultStore) -> Vec<ComparisonOutcome> {
        let mut representatives: Vec<&PathRun> = Vec::new();
        let mut out = Vec::new();
        for run in runs.iter().map(|r| r.as_ref()) {
            let mut joined = false;
            for rep in &representatives {
                if self.cancel.load(Ordering::SeqCst) {
                    return out;
                }
                let outcome = self.comparison_outcome(rep, run, store);
                let equivalent = outcome.verdict == Verdict::Equivalent;
                out.push(outcome);
                if equivalent {
                    joined = true;
                    break;
                }
            }
            if !joined {
                representatives.push(run);
            }
        }
        out
    }

    /// Runs every job to completion, or until the run is cancelled.
    ///
    /// Fails without executing anything when a requested sink is not
    /// reachable from an input, or when mutations were requested and no
    /// input admits any.
    pub fn run(&self, jobs: &[CrossCheckJob]) -> Result<RunSummary, RunError> {
        for job in jobs {
            for sink in &job.sinks {
                if !self.graph.has_path(&job.input.kind, sink, self.settings.max_hops, &|_: &Edge| true) {
                    let error = crate::graph::GraphError::NoPath {
                        source: job.input.kind.clone(),
                        sink: sink.to_string(),
                    };
                    log::error!("{}", error);
                    return Err(error.into());
                }
            }
        }

        let store = ResultStore::open(&self.settings.result_dir)?;
        let mut variants_per_job = Vec::with_capacity(jobs.len());
        let mut inapplicable = 0;
        let mut wanted_mutations = 0;
        for job in jobs {
            let mut seeds = Pcg64Mcg::seed_from_u64(job.seed);
            let mutation_seed: u64 = seeds.gen();
            if job.validations > 0 {
                wanted_mutations += 1;
            }
            let variants = match self.variants(job, mutation_seed, &store) {
                Ok(v) => v,
                Err(e) => {
                    log::warn!("{}: no mutants: {}", job.input.name, e);
                    inapplicable += 1;
                    let unmutated = CrossCheckJob {
                        validations: 0,
                        ..job.clone()
                    };
                    self.variants(&unmutated, 0, &store).unwrap_or_default()
                }
            };
            variants_per_job.push((variants, seeds));
        }
        if wanted_mutations > 0 && inapplicable == wanted_mutations {
            let error = RunError::MutationInapplicable {
                inputs: wanted_mutations,
            };
            log::error!("{}", error);
            return Err(error);
        }

        let mut units = Vec::new();
        for (job, (variants, mut seeds)) in jobs.iter().zip(variants_per_job) {
            for variant in &variants {
                for sink in &job.sinks {
                    let seed: u64 = seeds.gen();
                    match self.sample_for(variant, sink, job.paths_per_sink, seed) {
                        Ok(paths) => {
                            for (index, path) in paths.into_iter().enumerate() {
                                units.push(PathUnit {
                                    variant: Arc::clone(variant),
                                    unit: UnitId {
                                        input: variant.input.clone(),
                                        variant: variant.index,
                                        sink: sink.to_string(),
                                        path: index,
                                    },
                                    path,
                                });
                            }
                        }
                        Err(e) => log::warn!(
                            "{}[v{}]: no compatible path to {}: {}",
                            variant.input,
                            variant.index,
                            sink,
                            e
                        ),
                    }
                }
            }
        }

        log::info!(
            "Cross-checking {} unit(s) on {} worker(s)",
            units.len(),
            self.settings.jobs
        );
        let done = AtomicBool::new(false);
        let summary = std::thread::scope(|s| {
            if let Some(budget) = self.settings.global_budget {
                let done = &done;
                let cancel = &*self.cancel;
                s.spawn(move || watchdog(budget, done, cancel));
            }
            let summary = self.execute(units, &store);
            done.store(true, Ordering::SeqCst);
            summary
        });
        log::info!("{}", summary);
        Ok(summary)
    }

    fn execute(&self, units: Vec<PathUnit>, store: &ResultStore) -> RunSummary {
        let total = units.len();
        let tracker = Mutex::new(GroupTracker::new(&units, self.settings.cross_variant));
        let finished = run_pool(units, self.settings.jobs, &self.cancel, |u| {
            let run = self.execute_path(u.variant, u.unit, u.path);
            let outcome = self.unit_outcome(&run, store);
            append_record(store, &LogRecord::Unit(&outcome));
            let ready = tracker
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .finish(run);
            let comparisons: Vec<ComparisonOutcome> = ready
                .iter()
                .flat_map(|runs| self.classify(runs, store))
                .collect();
            (outcome, comparisons)
        });

        let mut summary = RunSummary::default();
        for (outcome, comparisons) in finished {
            summary.units.push(outcome);
            summary.comparisons.extend(comparisons);
        }
        summary.units.sort_by(|a, b| a.unit.cmp(&b.unit));
        summary
            .comparisons
            .sort_by(|a, b| (&a.lhs, &a.rhs).cmp(&(&b.lhs, &b.rhs)));
        summary.cancelled = summary.units.len() < total || self.cancel.load(Ordering::SeqCst);
        if summary.cancelled {
            let unfinished = tracker.lock().unwrap_or_else(|e| e.into_inner()).unfinished();
            log::warn!(
                "Run cancelled; {} of {} unit(s) finished, {} group(s) were not compared",
                summary.units.len(),
                total,
                unfinished
            );
        }
        summary
    }
}

fn append_record(store: &ResultStore, record: &LogRecord) {
    if let Err(e) = store.append(record) {
        log::warn!("could not append to result log: {}", e);
    }
}

/// Adds the variant sources, mutation records, strategy and intermediate
/// artifacts of `run` to `bundle`, prefixing artifact names with `prefix`.
fn add_run_files(bundle: &mut FailureBundle, run: &PathRun, prefix: &str, strategy_file: &str) -> serde_json::Result<()> {
    let ext = run.variant.artifact.kind().extension().to_string();
    bundle.add_text(&format!("{}input.{}", prefix, ext), &run.variant.text);
    if run.variant.index > 0 && prefix.is_empty() {
        bundle.add_text(&format!("original.{}", ext), &run.variant.original);
    }
    if prefix.is_empty() {
        bundle.add_json(MUTATIONS_FILE, &run.variant.artifact.provenance().mutations)?;
    }
    bundle.add_json(strategy_file, &run.path.to_strategy())?;
    for (position, artifact) in run.artifacts.iter().enumerate() {
        let name = format!(
            "{}hop{}-{}.{}",
            prefix,
            position,
            artifact.provenance().translator.as_deref().unwrap_or("unknown"),
            artifact.kind().extension()
        );
        match artifact.payload().bytes() {
            Ok(bytes) => bundle.add_bytes(&name, bytes),
            Err(e) => log::warn!("could not read {}: {}", name, e),
        }
    }
    Ok(())
}

fn persist_compilation_failure(
    store: &ResultStore,
    label: &str,
    run: &PathRun,
    failure: &HopFailure,
) -> std::io::Result<PathBuf> {
    let mut bundle = FailureBundle::new();
    add_run_files(&mut bundle, run, "", STRATEGY_FILE)?;
    bundle.add_text("stdout.txt", &failure.stdout);
    bundle.add_text("stderr.txt", &failure.stderr);
    bundle.add_json(
        OUTCOME_FILE,
        &FailureRecord {
            unit: run.unit.clone(),
            rhs: None,
            verdict: failure.verdict.clone(),
            top: run.variant.artifact.top().map(|s| s.to_string()),
            message: Some(failure.message.clone()),
        },
    )?;
    store.persist_failure(label, &run.unit.dir_name(), &bundle)
}

fn persist_rejected_mutation(
    store: &ResultStore,
    name: &str,
    ext: &str,
    rejected: &RejectedMutation,
) -> std::io::Result<PathBuf> {
    let mut bundle = FailureBundle::new();
    bundle.add_text(&format!("input.{}", ext), &rejected.base);
    if let Some(mutant) = &rejected.mutant {
        bundle.add_text(&format!("mutant.{}", ext), mutant);
    }
    bundle.add_text("error.log", &rejected.reason);
    bundle.add_json(
        OUTCOME_FILE,
        &serde_json::json!({
            "stage": rejected.stage,
            "mutation": rejected.record,
        }),
    )?;
    store.persist_failure(MUTATION_LABEL, name, &bundle)
}

fn persist_divergence(
    store: &ResultStore,
    lhs: &PathRun,
    rhs: &PathRun,
    verdict: &Verdict,
) -> std::io::Result<PathBuf> {
    let mut bundle = FailureBundle::new();
    add_run_files(&mut bundle, lhs, "", STRATEGY_FILE)?;
    add_run_files(&mut bundle, rhs, "rhs-", RHS_STRATEGY_FILE)?;
    if let Verdict::Diverging { counter_trace } = verdict {
        bundle.add_json(crate::oracle::COUNTER_TRACE_FILE, counter_trace)?;
    }
    bundle.add_json(
        OUTCOME_FILE,
        &FailureRecord {
            unit: lhs.unit.clone(),
            rhs: Some(rhs.unit.clone()),
            verdict: verdict.clone(),
            top: lhs.variant.artifact.top().map(|s| s.to_string()),
            message: None,
        },
    )?;
    let name = format!("{}--{}", lhs.unit.dir_name(), rhs.unit.dir_name());
    store.persist_failure(CROSS_CHECKING_LABEL, &name, &bundle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verdict::COMPILATION_LABEL;
    use pretty_assertions::assert_eq;

    const COUNTER: &str = r#"module counter(input clk, input rst, input en, output reg [3:0] count);
  always @(posedge clk)
    if (rst) count <= 4'd0;
    else if (en) count <= count + 4'd1;
endmodule
"#;

    const AND_AAG: &str = "aag 3 2 0 1 1\\n2\\n4\\n6\\n6 2 4\\ni0 a\\ni1 b\\no0 y\\n";
    const OR_AAG: &str = "aag 3 2 0 1 1\\n2\\n4\\n7\\n6 3 5\\ni0 a\\ni1 b\\no0 y\\n";

    fn sh_translator(name: &str, inputs: &str, output: &str, script: &str, profiles: &[&str]) -> String {
        let mut s = format!(
            "[[translator]]\nname = \"{}\"\ninputs = [\"{}\"]\noutput = \"{}\"\nprogram = \"sh\"\nargs = [\"-c\", '{}', \"sh\", \"{{input}}\", \"{{output}}\"]\n",
            name, inputs, output, script
        );
        for (i, p) in profiles.iter().enumerate() {
            s.push_str(&format!(
                "[[translator.profile]]\nname = \"{}\"\nargs = [\"-{}\"]\n",
                p, i
            ));
        }
        s
    }

    fn checker(result_dir: &Path, extra_run: &str, translators: &str) -> CrossChecker {
        let _ = env_logger::builder().is_test(true).try_init();
        let text = format!(
            "[run]\nresult_dir = \"{}\"\n{}\n{}",
            result_dir.display(),
            extra_run,
            translators
        );
        let config = CrossCheckConfig::from_toml_str(&text).unwrap();
        CrossChecker::from_config(&config, &[RepresentationKind::source(Language::Verilog)]).unwrap()
    }

    fn job(sinks: &[&str], validations: usize, paths: usize) -> CrossCheckJob {
        CrossCheckJob {
            input: InputProgram::new(
                "counter",
                RepresentationKind::source(Language::Verilog),
                COUNTER,
                Some("counter".to_string()),
            ),
            sinks: sinks.iter().map(|s| s.parse().unwrap()).collect(),
            validations,
            paths_per_sink: paths,
            seed: 7,
        }
    }

    fn two_sink_translators(aig: &str) -> String {
        format!(
            "{}{}",
            sh_translator("synth", "verilog", "netlist", "cp \"$1\" \"$2\"", &["p0", "p1"]),
            sh_translator(
                "aig",
                "netlist@synth",
                "aiger",
                &format!("printf \"{}\" > \"$2\"", aig),
                &[]
            )
        )
    }

    #[test]
    fn test_counter_is_equivalent_on_both_sinks() {
        let results = tempfile::tempdir().unwrap();
        let checker = checker(results.path(), "", &two_sink_translators(AND_AAG));
        let summary = checker
            .run(&[job(&["netlist@synth", "aiger@aig"], 1, 2)])
            .unwrap();
        // Two variants, two sinks, two paths each.
        assert_eq!(summary.units.len(), 8);
        assert_eq!(summary.completed_paths(), 8);
        assert_eq!(summary.comparisons.len(), 4);
        for c in &summary.comparisons {
            assert_eq!(c.verdict, Verdict::Equivalent, "{} vs {}", c.lhs, c.rhs);
        }
        assert_eq!(summary.divergences(), 0);
        assert!(!summary.cancelled);
        let log = std::fs::read_to_string(results.path().join(crate::workspace::RESULT_LOG)).unwrap();
        assert_eq!(log.lines().count(), 12);
    }

    #[test]
    fn test_units_are_reported_sorted() {
        let results = tempfile::tempdir().unwrap();
        let checker = checker(results.path(), "", &two_sink_translators(AND_AAG));
        let summary = checker.run(&[job(&["aiger@aig"], 0, 2)]).unwrap();
        let ids: Vec<&UnitId> = summary.units.iter().map(|u| &u.unit).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_crashing_translator_is_one_crash_per_unit() {
        let results = tempfile::tempdir().unwrap();
        let translators = format!(
            "{}{}",
            sh_translator("good", "verilog", "netlist", "cp \"$1\" \"$2\"", &[]),
            sh_translator("bad", "verilog", "netlist", "echo broken 1>&2; exit 1", &[])
        );
        let checker = checker(results.path(), "", &translators);
        let start = Instant::now();
        let summary = checker.run(&[job(&["netlist"], 0, 4)]).unwrap();
        assert!(start.elapsed() < Duration::from_secs(20));
        let crashes: Vec<&UnitOutcome> = summary
            .units
            .iter()
            .filter(|u| matches!(u.verdict(), Some(Verdict::ToolCrash { .. })))
            .collect();
        assert_eq!(crashes.len(), 1);
        assert!(crashes[0].path.contains("[bad/default]"));
        assert_eq!(summary.divergences(), 0);

        let dir = crashes[0].failure_dir.as_ref().unwrap();
        assert!(dir.starts_with(results.path().join(COMPILATION_LABEL)));
        for file in ["input.v", "strategy.json", "mutations.json", "stdout.txt", "stderr.txt", "outcome.json"] {
            assert!(dir.join(file).exists(), "missing {}", file);
        }
        assert_eq!(std::fs::read_to_string(dir.join("stderr.txt")).unwrap(), "broken\n");
        let record: FailureRecord =
            serde_json::from_str(&std::fs::read_to_string(dir.join("outcome.json")).unwrap()).unwrap();
        assert_eq!(record.verdict.name(), "tool_crash");
    }

    #[test]
    fn test_slow_translator_times_out() {
        let results = tempfile::tempdir().unwrap();
        let translators = sh_translator("slow", "verilog", "netlist", "sleep 30", &[]);
        let checker = checker(results.path(), "tool_timeout_secs = 1", &translators);
        let start = Instant::now();
        let summary = checker.run(&[job(&["netlist"], 0, 1)]).unwrap();
        assert!(start.elapsed() < Duration::from_secs(15));
        assert_eq!(summary.units.len(), 1);
        assert!(matches!(
            summary.units[0].verdict(),
            Some(Verdict::ToolTimeout { position: 0, .. })
        ));
    }

    #[test]
    fn test_divergence_is_persisted_with_counter_trace() {
        let results = tempfile::tempdir().unwrap();
        let translators = format!(
            "{}{}",
            sh_translator("and", "verilog", "aiger@logic", &format!("printf \"{}\" > \"$2\"", AND_AAG), &[]),
            sh_translator("or", "verilog", "aiger@logic", &format!("printf \"{}\" > \"$2\"", OR_AAG), &[])
        );
        let checker = checker(results.path(), "", &translators);
        let summary = checker.run(&[job(&["aiger@logic"], 0, 2)]).unwrap();
        assert_eq!(summary.divergences(), 1);
        let dir = summary.comparisons[0].failure_dir.as_ref().unwrap();
        assert!(dir.starts_with(results.path().join(CROSS_CHECKING_LABEL)));
        for file in ["input.v", "strategy.json", "strategy-rhs.json", "counter_trace.json", "outcome.json"] {
            assert!(dir.join(file).exists(), "missing {}", file);
        }
    }

    #[test]
    fn test_missing_path_is_fatal_before_any_unit() {
        let results = tempfile::tempdir().unwrap();
        let checker = checker(results.path(), "", &two_sink_translators(AND_AAG));
        match checker.run(&[job(&["btor2"], 0, 1)]) {
            Err(RunError::Graph(crate::graph::GraphError::NoPath { .. })) => {}
            other => panic!("expected NoPath, got {:?}", other.map(|s| s.units.len())),
        }
        assert!(!results.path().join(crate::workspace::RESULT_LOG).exists());
    }

    #[test]
    fn test_inapplicable_mutation_is_fatal() {
        let results = tempfile::tempdir().unwrap();
        let checker = checker(results.path(), "", &two_sink_translators(AND_AAG));
        let mut empty = job(&["netlist"], 1, 1);
        empty.input.text = "module m;\nendmodule\n".to_string();
        assert!(matches!(
            checker.run(&[empty]),
            Err(RunError::MutationInapplicable { inputs: 1 })
        ));
    }

    #[test]
    fn test_rejected_mutations_are_persisted() {
        let results = tempfile::tempdir().unwrap();
        let translators = format!(
            "[mutation]\nlint_command = [\"sh\", \"-c\", \"echo refused >&2; exit 3\"]\n{}",
            two_sink_translators(AND_AAG)
        );
        let checker = checker(results.path(), "", &translators);
        assert!(matches!(
            checker.run(&[job(&["netlist"], 1, 1)]),
            Err(RunError::MutationInapplicable { inputs: 1 })
        ));

        let dirs: Vec<PathBuf> = std::fs::read_dir(results.path().join(MUTATION_LABEL))
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        let linted: Vec<&PathBuf> = dirs
            .iter()
            .filter(|d| {
                let outcome: serde_json::Value =
                    serde_json::from_str(&std::fs::read_to_string(d.join(OUTCOME_FILE)).unwrap())
                        .unwrap();
                outcome["stage"] == "lint"
            })
            .collect();
        assert!(!linted.is_empty(), "{:?}", dirs);
        for dir in linted {
            assert_eq!(std::fs::read_to_string(dir.join("input.v")).unwrap(), COUNTER);
            assert_ne!(std::fs::read_to_string(dir.join("mutant.v")).unwrap(), COUNTER);
            let log = std::fs::read_to_string(dir.join("error.log")).unwrap();
            assert!(log.contains("refused"), "{}", log);
        }
        // Rejected mutations are not replayable failures.
        assert!(crate::replay::find_failure_dirs(results.path()).unwrap().is_empty());
    }

    #[test]
    fn test_cross_variant_compares_mutants_with_original() {
        let results = tempfile::tempdir().unwrap();
        let checker = checker(results.path(), "cross_variant = true", &two_sink_translators(AND_AAG));
        let summary = checker.run(&[job(&["aiger@aig"], 2, 1)]).unwrap();
        let cross: Vec<&ComparisonOutcome> = summary
            .comparisons
            .iter()
            .filter(|c| c.lhs.variant != c.rhs.variant)
            .collect();
        assert_eq!(cross.len(), 2);
        assert!(cross.iter().all(|c| c.lhs.variant == 0 && c.verdict == Verdict::Equivalent));
    }

    #[test]
    fn test_unsupported_translator_is_cached() {
        let results = tempfile::tempdir().unwrap();
        let translators = format!(
            "{}unsupported_exit_codes = [3]\n",
            sh_translator("picky", "verilog", "netlist", "exit 3", &[])
        );
        let checker = checker(results.path(), "", &translators);
        let summary = checker.run(&[job(&["netlist"], 0, 1)]).unwrap();
        assert!(matches!(summary.units[0].verdict(), Some(Verdict::Unsupported { .. })));
        assert!(summary.units[0].failure_dir.is_none());
        assert_eq!(checker.predicate.cache.len(), 1);
        // The edge is now filtered out for this input.
        let store = ResultStore::open(results.path()).unwrap();
        let variant = &checker.variants(&job(&["netlist"], 0, 1), 0, &store).unwrap()[0];
        assert!(checker.sample_for(variant, &"netlist".parse().unwrap(), 1, 0).is_err());
    }

    #[test]
    fn test_global_budget_cancels_run() {
        let results = tempfile::tempdir().unwrap();
        let translators = sh_translator("slow", "verilog", "netlist", "sleep 30", &["a", "b", "c"]);
        let checker = checker(
            results.path(),
            "tool_timeout_secs = 60\nglobal_budget_secs = 1\njobs = 1",
            &translators,
        );
        let start = Instant::now();
        let summary = checker.run(&[job(&["netlist"], 0, 3)]).unwrap();
        assert!(start.elapsed() < Duration::from_secs(20));
        assert!(summary.cancelled);
        assert!(summary.units.len() < 3);
        assert!(summary
            .units
            .iter()
            .all(|u| matches!(u.verdict(), Some(Verdict::Inconclusive { .. }))));
    }

    /// Runs `checker` on a background thread and calls `observe` while it
    /// is still in flight.
    fn run_while_observing(
        checker: &CrossChecker,
        job: CrossCheckJob,
        observe: impl FnOnce(&AtomicBool),
    ) -> RunSummary {
        let finished = AtomicBool::new(false);
        std::thread::scope(|s| {
            let handle = s.spawn(|| {
                let summary = checker.run(&[job]).unwrap();
                finished.store(true, Ordering::SeqCst);
                summary
            });
            observe(&finished);
            handle.join().unwrap()
        })
    }

    fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
        let start = Instant::now();
        while !condition() {
            assert!(start.elapsed() < Duration::from_secs(10), "timed out waiting for {}", what);
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    #[test]
    fn test_finished_units_are_persisted_while_siblings_run() {
        let results = tempfile::tempdir().unwrap();
        let marker = results.path().join("good-workdir.txt");
        let translators = format!(
            "[[translator]]\nname = \"good\"\ninputs = [\"verilog\"]\noutput = \"netlist@good\"\nprogram = \"sh\"\nargs = [\"-c\", 'echo \"$3\" > \"$4\"; cp \"$1\" \"$2\"', \"sh\", \"{{input}}\", \"{{output}}\", \"{{workdir}}\", \"{}\"]\n{}{}",
            marker.display(),
            sh_translator("bad", "verilog", "netlist@bad", "exit 1", &[]),
            sh_translator("slow", "verilog", "aiger@slow", "sleep 30", &[])
        );
        let checker = checker(
            results.path(),
            "tool_timeout_secs = 60\njobs = 3",
            &translators,
        );
        let cancel = checker.cancel_flag();
        let log_path = results.path().join(crate::workspace::RESULT_LOG);
        let summary = run_while_observing(&checker, job(&["netlist", "aiger"], 0, 2), |finished| {
            // Both netlist units are on record before the slow unit ends.
            wait_for("two unit records", || {
                std::fs::read_to_string(&log_path)
                    .map(|log| log.lines().count() >= 2)
                    .unwrap_or(false)
            });
            let crash_dirs = std::fs::read_dir(results.path().join(COMPILATION_LABEL))
                .unwrap()
                .count();
            assert_eq!(crash_dirs, 1);
            // The completed netlist run was released with its group.
            wait_for("workdir marker", || marker.exists());
            let workdir = std::fs::read_to_string(&marker).unwrap();
            wait_for("scratch release", || !Path::new(workdir.trim()).exists());
            assert!(!finished.load(Ordering::SeqCst));
            cancel.store(true, Ordering::SeqCst);
        });
        assert!(summary.cancelled);
        assert_eq!(summary.units.len(), 3);
        let log = std::fs::read_to_string(&log_path).unwrap();
        assert_eq!(log.lines().count(), 3);
        assert!(log.contains("tool_crash"), "{}", log);
    }

    #[test]
    fn test_group_finished_before_cancel_is_compared() {
        let results = tempfile::tempdir().unwrap();
        let translators = format!(
            "{}{}{}",
            sh_translator("and", "verilog", "aiger@logic", &format!("printf \"{}\" > \"$2\"", AND_AAG), &[]),
            sh_translator("and2", "verilog", "aiger@logic", &format!("printf \"{}\" > \"$2\"", AND_AAG), &[]),
            sh_translator("slow", "verilog", "netlist", "sleep 30", &[])
        );
        let checker = checker(
            results.path(),
            "tool_timeout_secs = 60\njobs = 3",
            &translators,
        );
        let cancel = checker.cancel_flag();
        let log_path = results.path().join(crate::workspace::RESULT_LOG);
        let summary = run_while_observing(&checker, job(&["aiger@logic", "netlist"], 0, 2), |finished| {
            wait_for("comparison record", || {
                std::fs::read_to_string(&log_path)
                    .map(|log| log.contains("\"record\":\"comparison\""))
                    .unwrap_or(false)
            });
            assert!(!finished.load(Ordering::SeqCst));
            cancel.store(true, Ordering::SeqCst);
        });
        assert!(summary.cancelled);
        assert_eq!(summary.comparisons.len(), 1);
        assert_eq!(summary.comparisons[0].verdict, Verdict::Equivalent);
        let slow = summary.units.iter().find(|u| u.unit.sink == "netlist").unwrap();
        assert!(matches!(slow.verdict(), Some(Verdict::Inconclusive { .. })));
    }

    #[test]
    fn test_pool_returns_every_result() {
        let cancel = AtomicBool::new(false);
        let mut out = run_pool((0..50).collect(), 4, &cancel, |x: u32| x * 2);
        out.sort();
        assert_eq!(out, (0..50).map(|x| x * 2).collect::<Vec<_>>());
    }
}
