// SPDX-License-Identifier: Apache-2.0

//! Re-execution of persisted failure directories.
//!
//! A compilation failure is replayed by running its strategy on its input
//! again; a divergence by running both strategies and asking the oracle
//! once more. A failure reproduces when the new verdict has the same name
//! as the recorded one.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::artifact::CircuitArtifact;
use crate::crosscheck::{
    CrossChecker, FailureRecord, PathRun, UnitId, Variant, OUTCOME_FILE, RHS_STRATEGY_FILE,
    STRATEGY_FILE,
};
use crate::graph::{GraphError, PathStrategy};
use crate::verdict::Verdict;
use crate::workspace::unit_scratch;

#[derive(Debug)]
pub enum ReplayError {
    Io { path: PathBuf, error: std::io::Error },
    Json { path: PathBuf, error: serde_json::Error },
    Graph(GraphError),
    Missing(PathBuf),
}

impl fmt::Display for ReplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplayError::Io { path, error } => write!(f, "{}: {}", path.display(), error),
            ReplayError::Json { path, error } => write!(f, "{}: {}", path.display(), error),
            ReplayError::Graph(e) => write!(f, "{}", e),
            ReplayError::Missing(path) => write!(f, "missing {}", path.display()),
        }
    }
}

impl std::error::Error for ReplayError {}

impl From<GraphError> for ReplayError {
    fn from(e: GraphError) -> Self {
        ReplayError::Graph(e)
    }
}

#[derive(Debug, Clone)]
pub struct ReplayReport {
    pub dir: PathBuf,
    pub recorded: Verdict,
    pub observed: Verdict,
}

impl ReplayReport {
    pub fn reproduced(&self) -> bool {
        self.recorded.name() == self.observed.name()
    }
}

fn read_text(path: &Path) -> Result<String, ReplayError> {
    if !path.exists() {
        return Err(ReplayError::Missing(path.to_path_buf()));
    }
    std::fs::read_to_string(path).map_err(|error| ReplayError::Io {
        path: path.to_path_buf(),
        error,
    })
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ReplayError> {
    let text = read_text(path)?;
    serde_json::from_str(&text).map_err(|error| ReplayError::Json {
        path: path.to_path_buf(),
        error,
    })
}

/// Rebuilds the variant recorded under `dir` with file prefix `prefix`.
fn load_variant(
    dir: &Path,
    prefix: &str,
    strategy: &PathStrategy,
    unit: &UnitId,
    top: Option<String>,
) -> Result<Arc<Variant>, ReplayError> {
    let ext = strategy.source.extension();
    let text = read_text(&dir.join(format!("{}input.{}", prefix, ext)))?;
    let original = match read_text(&dir.join(format!("original.{}", ext))) {
        Ok(original) => original,
        Err(ReplayError::Missing(_)) => text.clone(),
        Err(e) => return Err(e),
    };
    let artifact = CircuitArtifact::root(strategy.source.clone(), &text, top);
    Ok(Arc::new(Variant {
        input: unit.input.clone(),
        index: unit.variant,
        artifact,
        text: Arc::from(text.as_str()),
        original: Arc::from(original.as_str()),
    }))
}

fn run_strategy(
    checker: &CrossChecker,
    dir: &Path,
    prefix: &str,
    strategy_file: &str,
    unit: &UnitId,
    top: Option<String>,
) -> Result<PathRun, ReplayError> {
    let strategy: PathStrategy = read_json(&dir.join(strategy_file))?;
    let path = checker.graph().resolve_strategy(&strategy)?;
    let variant = load_variant(dir, prefix, &strategy, unit, top)?;
    log::info!("Replaying {}: {}", unit, path.describe());
    Ok(checker.execute_path(variant, unit.clone(), path))
}

/// A path that now completes counts as equivalent to itself.
fn path_verdict(run: &PathRun) -> Verdict {
    match &run.failure {
        Some(failure) => failure.verdict.clone(),
        None => Verdict::Equivalent,
    }
}

/// Re-executes the failure persisted in `dir`.
pub fn replay_failure(checker: &CrossChecker, dir: &Path) -> Result<ReplayReport, ReplayError> {
    let record: FailureRecord = read_json(&dir.join(OUTCOME_FILE))?;
    let lhs = run_strategy(checker, dir, "", STRATEGY_FILE, &record.unit, record.top.clone())?;
    let observed = match &record.rhs {
        None => path_verdict(&lhs),
        Some(rhs_unit) => {
            let rhs = run_strategy(
                checker,
                dir,
                "rhs-",
                RHS_STRATEGY_FILE,
                rhs_unit,
                record.top.clone(),
            )?;
            match (&lhs.failure, &rhs.failure) {
                (Some(f), _) | (_, Some(f)) => f.verdict.clone(),
                (None, None) => {
                    let scratch = unit_scratch("replay").map_err(|error| ReplayError::Io {
                        path: dir.to_path_buf(),
                        error,
                    })?;
                    checker.compare(&lhs, &rhs, scratch.path())
                }
            }
        }
    };
    let report = ReplayReport {
        dir: dir.to_path_buf(),
        recorded: record.verdict,
        observed,
    };
    log::info!(
        "{}: recorded {}, observed {}",
        dir.display(),
        report.recorded.name(),
        report.observed.name()
    );
    Ok(report)
}

/// Every directory under `root` holding a persisted failure, sorted.
pub fn find_failure_dirs(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        if dir.join(OUTCOME_FILE).is_file() && dir.join(STRATEGY_FILE).is_file() {
            out.push(dir);
            continue;
        }
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            if entry.file_type()?.is_dir() && !hidden {
                pending.push(entry.path());
            }
        }
    }
    out.sort();
    Ok(out)
}

/// Replays every failure directory under `root`.
pub fn regression(
    checker: &CrossChecker,
    root: &Path,
) -> std::io::Result<Vec<(PathBuf, Result<ReplayReport, ReplayError>)>> {
    let dirs = find_failure_dirs(root)?;
    log::info!("Replaying {} failure directories under {}", dirs.len(), root.display());
    Ok(dirs
        .into_iter()
        .map(|dir| {
            let result = replay_failure(checker, &dir);
            (dir, result)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CrossCheckConfig;
    use crate::crosscheck::{CrossCheckJob, InputProgram};
    use crate::repr::{Language, RepresentationKind};

    const SRC: &str = "module m(input a, output y);\n  assign y = a;\nendmodule\n";
    const AND_AAG: &str = "aag 3 2 0 1 1\\n2\\n4\\n6\\n6 2 4\\ni0 a\\ni1 b\\no0 y\\n";
    const OR_AAG: &str = "aag 3 2 0 1 1\\n2\\n4\\n7\\n6 3 5\\ni0 a\\ni1 b\\no0 y\\n";

    fn checker(results: &Path, translators: &str) -> CrossChecker {
        let _ = env_logger::builder().is_test(true).try_init();
        let text = format!(
            "[run]\nresult_dir = \"{}\"\njobs = 2\n{}",
            results.display(),
            translators
        );
        let config = CrossCheckConfig::from_toml_str(&text).unwrap();
        CrossChecker::from_config(&config, &[RepresentationKind::source(Language::Verilog)]).unwrap()
    }

    fn translator(name: &str, output: &str, script: &str) -> String {
        format!(
            "[[translator]]\nname = \"{}\"\ninputs = [\"verilog\"]\noutput = \"{}\"\nprogram = \"sh\"\nargs = [\"-c\", '{}', \"sh\", \"{{input}}\", \"{{output}}\"]\n",
            name, output, script
        )
    }

    fn job(sink: &str, paths: usize) -> CrossCheckJob {
        CrossCheckJob {
            input: InputProgram::new(
                "m",
                RepresentationKind::source(Language::Verilog),
                SRC,
                Some("m".to_string()),
            ),
            sinks: vec![sink.parse().unwrap()],
            validations: 0,
            paths_per_sink: paths,
            seed: 1,
        }
    }

    #[test]
    fn test_crash_reproduces() {
        let results = tempfile::tempdir().unwrap();
        let checker = checker(results.path(), &translator("bad", "netlist", "exit 1"));
        let summary = checker.run(&[job("netlist", 1)]).unwrap();
        let dir = summary.units[0].failure_dir.clone().unwrap();
        let report = replay_failure(&checker, &dir).unwrap();
        assert!(report.reproduced(), "{:?}", report);
        assert_eq!(report.observed.name(), "tool_crash");
    }

    #[test]
    fn test_fixed_tool_no_longer_reproduces() {
        let results = tempfile::tempdir().unwrap();
        let broken = checker(results.path(), &translator("t", "netlist", "exit 1"));
        let summary = broken.run(&[job("netlist", 1)]).unwrap();
        let dir = summary.units[0].failure_dir.clone().unwrap();

        let fixed = checker(results.path(), &translator("t", "netlist", "cp \"$1\" \"$2\""));
        let report = replay_failure(&fixed, &dir).unwrap();
        assert!(!report.reproduced());
        assert_eq!(report.observed, Verdict::Equivalent);
    }

    #[test]
    fn test_regression_replays_divergences() {
        let results = tempfile::tempdir().unwrap();
        let translators = format!(
            "{}{}",
            translator("and", "aiger@logic", &format!("printf \"{}\" > \"$2\"", AND_AAG)),
            translator("or", "aiger@logic", &format!("printf \"{}\" > \"$2\"", OR_AAG))
        );
        let checker = checker(results.path(), &translators);
        let summary = checker.run(&[job("aiger@logic", 2)]).unwrap();
        assert_eq!(summary.divergences(), 1);

        let replays = regression(&checker, results.path()).unwrap();
        assert_eq!(replays.len(), 1);
        let report = replays[0].1.as_ref().unwrap();
        assert!(report.reproduced());
        assert_eq!(report.observed.name(), "diverging");
    }

    #[test]
    fn test_missing_outcome_is_an_error() {
        let results = tempfile::tempdir().unwrap();
        let checker = checker(results.path(), &translator("t", "netlist", "exit 1"));
        assert!(matches!(
            replay_failure(&checker, results.path()),
            Err(ReplayError::Missing(_))
        ));
    }
}
