// SPDX-License-Identifier: Apache-2.0

//! Differential testing of hardware-design toolchains.
//!
//! Toolchains translate one circuit description into many equivalent
//! representations. `hdlcross` samples chains of such translations from a
//! configured translation graph, runs them, and asks an equivalence oracle
//! whether the results still agree. Source-level mutants from
//! [`hdlcross_mutate`] diversify the inputs.

pub mod artifact;
pub mod config;
pub mod crosscheck;
pub mod error;
pub mod graph;
pub mod limitations;
pub mod oracle;
pub mod replay;
pub mod repr;
pub mod subprocess;
pub mod translator;
pub mod verdict;
pub mod workspace;

pub use artifact::{ArtifactId, CircuitArtifact, Payload, Provenance};
pub use config::CrossCheckConfig;
pub use crosscheck::{
    ComparisonOutcome, CrossCheckJob, CrossChecker, InputProgram, PathResult, RunSummary, UnitId,
    UnitOutcome,
};
pub use error::{ConfigError, RunError};
pub use graph::{CompilationPath, GraphError, Hop, PathStrategy, TranslationGraph};
pub use oracle::{Decision, DecisionProcedure, EquivalenceOracle, OracleContext};
pub use replay::{regression, replay_failure, ReplayError, ReplayReport};
pub use repr::{KindSelector, Language, RepresentationKind, RepresentationRegistry};
pub use translator::{translate, CommandTranslator, OptionProfile, ToolError, Translator};
pub use verdict::Verdict;
