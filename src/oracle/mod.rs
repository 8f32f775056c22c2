// SPDX-License-Identifier: Apache-2.0

//! Equivalence oracle: canonicalization first, then a decision procedure.

pub mod aiger;
pub mod canonical;
pub mod external;
pub mod sat;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::artifact::{ArtifactId, CircuitArtifact};
use crate::config::CrossCheckConfig;
use crate::error::ConfigError;
use crate::repr::RepresentationKind;
use crate::verdict::Verdict;

pub use external::ExternalDecisionProcedure;
pub use sat::AigerSatProcedure;

pub const COUNTER_TRACE_FILE: &str = "counter_trace.json";

/// A distinguishing assignment and what each side produced under it.
///
/// Values are rendered as bit strings so that witnesses from external
/// procedures and from the in-process solver share one shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Witness {
    pub inputs: BTreeMap<String, String>,
    pub state: BTreeMap<String, String>,
    pub lhs_outputs: BTreeMap<String, String>,
    pub rhs_outputs: BTreeMap<String, String>,
    /// Unparsed tool output, for external procedures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// No distinguishing assignment exists.
    Unsat,
    Sat(Witness),
    /// The procedure ran out of budget or could not reach a result.
    Unknown(String),
    /// The two artifacts cannot be compared by this procedure.
    Incomparable(String),
}

/// Per-call environment for a decision procedure.
pub struct OracleContext<'a> {
    /// Directory for temporary files and the counter-trace.
    pub workdir: &'a Path,
    pub timeout: Duration,
    pub cancel: &'a AtomicBool,
}

pub trait DecisionProcedure: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    fn accepts(&self, lhs: &RepresentationKind, rhs: &RepresentationKind) -> bool;

    fn decide(&self, lhs: &CircuitArtifact, rhs: &CircuitArtifact, ctx: &OracleContext) -> Decision;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceSide {
    pub artifact: ArtifactId,
    pub kind: RepresentationKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterTrace {
    pub procedure: String,
    pub lhs: TraceSide,
    pub rhs: TraceSide,
    pub witness: Witness,
}

#[derive(Debug)]
pub enum OracleError {
    Io(std::io::Error),
    Serialize(serde_json::Error),
}

impl fmt::Display for OracleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OracleError::Io(e) => write!(f, "could not write counter-trace: {}", e),
            OracleError::Serialize(e) => write!(f, "could not serialize counter-trace: {}", e),
        }
    }
}

impl std::error::Error for OracleError {}

impl From<std::io::Error> for OracleError {
    fn from(e: std::io::Error) -> Self {
        OracleError::Io(e)
    }
}

impl From<serde_json::Error> for OracleError {
    fn from(e: serde_json::Error) -> Self {
        OracleError::Serialize(e)
    }
}

/// Writes `trace` to `dir/counter_trace.json` via a temporary file and a
/// rename, so readers never observe a partial trace.
pub fn write_counter_trace(dir: &Path, trace: &CounterTrace) -> Result<PathBuf, OracleError> {
    let json = serde_json::to_string_pretty(trace)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    std::io::Write::write_all(&mut tmp, json.as_bytes())?;
    let path = dir.join(COUNTER_TRACE_FILE);
    tmp.persist(&path).map_err(|e| OracleError::Io(e.error))?;
    Ok(path)
}

#[derive(Debug, Default)]
pub struct EquivalenceOracle {
    procedures: Vec<Box<dyn DecisionProcedure>>,
}

impl EquivalenceOracle {
    /// Procedures are consulted in order; the first one that accepts both
    /// kinds decides.
    pub fn new(procedures: Vec<Box<dyn DecisionProcedure>>) -> Self {
        EquivalenceOracle { procedures }
    }

    /// Configured external procedures, followed by the in-process AIGER
    /// checker.
    pub fn from_config(config: &CrossCheckConfig) -> Result<Self, ConfigError> {
        let mut procedures: Vec<Box<dyn DecisionProcedure>> = Vec::new();
        for c in &config.decision_procedures {
            procedures.push(Box::new(ExternalDecisionProcedure::from_config(c)?));
        }
        procedures.push(Box::new(
            AigerSatProcedure::new(config.aiger.max_and_gates())
                .with_bmc_depth(config.aiger.bmc_depth()),
        ));
        Ok(EquivalenceOracle { procedures })
    }

    pub fn procedures(&self) -> impl Iterator<Item = &dyn DecisionProcedure> {
        self.procedures.iter().map(|p| p.as_ref())
    }

    pub fn is_equivalent(&self, a: &CircuitArtifact, b: &CircuitArtifact, ctx: &OracleContext) -> Verdict {
        if a.kind() == b.kind() {
            match (a.text(), b.text()) {
                (Ok(lhs), Ok(rhs)) => {
                    let language = a.kind().language();
                    if let (Some(l), Some(r)) = (
                        canonical::canonicalize(language, &lhs),
                        canonical::canonicalize(language, &rhs),
                    ) {
                        if l == r {
                            log::debug!("{} and {} have equal canonical forms", a.id(), b.id());
                            return Verdict::Equivalent;
                        }
                    }
                }
                (Err(e), _) | (_, Err(e)) => {
                    return Verdict::Inconclusive {
                        reason: format!("could not read artifact: {}", e),
                    }
                }
            }
        }

        let Some(procedure) = self
            .procedures
            .iter()
            .find(|p| p.accepts(a.kind(), b.kind()))
        else {
            return Verdict::Unsupported {
                reason: format!("no decision procedure accepts {} and {}", a.kind(), b.kind()),
            };
        };
        log::debug!(
            "Deciding {} ({}) vs {} ({}) with {}",
            a.id(),
            a.kind(),
            b.id(),
            b.kind(),
            procedure.name()
        );
        match procedure.decide(a, b, ctx) {
            Decision::Unsat => Verdict::Equivalent,
            Decision::Sat(witness) => {
                let trace = CounterTrace {
                    procedure: procedure.name().to_string(),
                    lhs: TraceSide {
                        artifact: a.id(),
                        kind: a.kind().clone(),
                    },
                    rhs: TraceSide {
                        artifact: b.id(),
                        kind: b.kind().clone(),
                    },
                    witness,
                };
                if let Err(e) = write_counter_trace(ctx.workdir, &trace) {
                    log::warn!("{}", e);
                }
                Verdict::Diverging {
                    counter_trace: trace,
                }
            }
            Decision::Unknown(reason) => Verdict::Inconclusive {
                reason: format!("{}: {}", procedure.name(), reason),
            },
            Decision::Incomparable(reason) => Verdict::Unsupported {
                reason: format!("{}: {}", procedure.name(), reason),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::Payload;
    use crate::repr::Language;
    use std::sync::Arc;

    const AND: &str = "aag 3 2 0 1 1\n2\n4\n6\n6 2 4\ni0 a\ni1 b\no0 y\n";
    const AND_SWAPPED: &str = "aag 3 2 0 1 1\n2\n4\n6\n6 4 2\ni0 a\ni1 b\no0 y\n";
    const AND_ABSORB: &str = "aag 4 2 0 1 2\n2\n4\n8\n6 2 4\n8 2 6\ni0 a\ni1 b\no0 y\n";
    const OR: &str = "aag 3 2 0 1 1\n2\n4\n7\n6 3 5\ni0 a\ni1 b\no0 y\n";

    fn artifact(kind: RepresentationKind, text: &str) -> CircuitArtifact {
        let root = CircuitArtifact::root(RepresentationKind::source(Language::Verilog), "", None);
        CircuitArtifact::derived(&root, kind, Payload::Text(Arc::from(text)), "t", "default")
    }

    fn aig(text: &str) -> CircuitArtifact {
        artifact(RepresentationKind::produced(Language::Aiger, "yosys"), text)
    }

    fn check(oracle: &EquivalenceOracle, a: &CircuitArtifact, b: &CircuitArtifact, dir: &Path) -> Verdict {
        check_within(oracle, a, b, dir, Duration::from_secs(10), false)
    }

    fn check_within(
        oracle: &EquivalenceOracle,
        a: &CircuitArtifact,
        b: &CircuitArtifact,
        dir: &Path,
        timeout: Duration,
        cancelled: bool,
    ) -> Verdict {
        let _ = env_logger::builder().is_test(true).try_init();
        let cancel = AtomicBool::new(cancelled);
        let ctx = OracleContext {
            workdir: dir,
            timeout,
            cancel: &cancel,
        };
        oracle.is_equivalent(a, b, &ctx)
    }

    #[test]
    fn test_reflexive_without_procedures() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = EquivalenceOracle::default();
        let a = aig(AND);
        assert_eq!(check(&oracle, &a, &a, dir.path()), Verdict::Equivalent);
        let n = artifact(
            RepresentationKind::produced(Language::Netlist, "yosys"),
            "module m(input a, output y);\n  assign y = a;\nendmodule\n",
        );
        assert_eq!(check(&oracle, &n, &n, dir.path()), Verdict::Equivalent);
        // Operand order differs only in ways canonicalization removes.
        assert_eq!(check(&oracle, &a, &aig(AND_SWAPPED), dir.path()), Verdict::Equivalent);
    }

    #[test]
    fn test_solver_decides_structurally_different_aigs() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = EquivalenceOracle::new(vec![Box::new(AigerSatProcedure::default())]);
        assert_eq!(
            check(&oracle, &aig(AND), &aig(AND_ABSORB), dir.path()),
            Verdict::Equivalent
        );
        assert!(!dir.path().join(COUNTER_TRACE_FILE).exists());
    }

    #[test]
    fn test_divergence_writes_counter_trace() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = EquivalenceOracle::new(vec![Box::new(AigerSatProcedure::default())]);
        let lhs = aig(AND);
        let rhs = aig(OR);
        match check(&oracle, &lhs, &rhs, dir.path()) {
            Verdict::Diverging { counter_trace } => {
                assert_eq!(counter_trace.procedure, "aiger-sat");
                assert_eq!(counter_trace.lhs.artifact, lhs.id());
                let written: CounterTrace = serde_json::from_str(
                    &std::fs::read_to_string(dir.path().join(COUNTER_TRACE_FILE)).unwrap(),
                )
                .unwrap();
                assert_eq!(written, counter_trace);
            }
            other => panic!("expected divergence, got {:?}", other),
        }
    }

    #[test]
    fn test_budget_exhaustion_is_inconclusive() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = EquivalenceOracle::new(vec![Box::new(AigerSatProcedure::new(1))]);
        assert!(matches!(
            check(&oracle, &aig(AND), &aig(AND_ABSORB), dir.path()),
            Verdict::Inconclusive { .. }
        ));
    }

    #[test]
    fn test_solver_call_is_bounded_by_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = EquivalenceOracle::new(vec![Box::new(AigerSatProcedure::default())]);
        match check_within(&oracle, &aig(AND), &aig(AND_ABSORB), dir.path(), Duration::ZERO, false) {
            Verdict::Inconclusive { reason } => assert!(reason.contains("timed out"), "{}", reason),
            other => panic!("expected inconclusive, got {:?}", other),
        }
    }

    #[test]
    fn test_cancelled_solver_call_is_inconclusive() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = EquivalenceOracle::new(vec![Box::new(AigerSatProcedure::default())]);
        match check_within(&oracle, &aig(AND), &aig(OR), dir.path(), Duration::from_secs(10), true) {
            Verdict::Inconclusive { reason } => assert!(reason.contains("cancelled"), "{}", reason),
            other => panic!("expected inconclusive, got {:?}", other),
        }
        assert!(!dir.path().join(COUNTER_TRACE_FILE).exists());
    }

    #[test]
    fn test_reset_values_are_compared() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = EquivalenceOracle::from_config(&CrossCheckConfig::default()).unwrap();
        let toggle = "aag 1 0 1 1 0\n2 3\n2\nl0 q\no0 out\n";
        let toggle_set = "aag 1 0 1 1 0\n2 3 1\n2\nl0 q\no0 out\n";
        // Different reset values show up in the first cycle.
        match check(&oracle, &aig(toggle), &aig(toggle_set), dir.path()) {
            Verdict::Diverging { counter_trace } => {
                assert_eq!(counter_trace.witness.lhs_outputs["out@0"], "0");
                assert_eq!(counter_trace.witness.rhs_outputs["out@0"], "1");
            }
            other => panic!("expected divergence, got {:?}", other),
        }
    }

    #[test]
    fn test_no_procedure_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = EquivalenceOracle::from_config(&CrossCheckConfig::default()).unwrap();
        let a = artifact(
            RepresentationKind::produced(Language::Netlist, "yosys"),
            "module m(input a, output y); assign y = a; endmodule\n",
        );
        let b = artifact(
            RepresentationKind::produced(Language::Netlist, "yosys"),
            "module m(input a, output y); assign y = ~~a; endmodule\n",
        );
        assert!(matches!(
            check(&oracle, &a, &b, dir.path()),
            Verdict::Unsupported { .. }
        ));
    }
}
