// SPDX-License-Identifier: Apache-2.0

//! Semantics-preserving mutation of Verilog/SystemVerilog sources.
//!
//! Mutants are produced by rewriting a concrete syntax tree with byte spans,
//! so text outside the rewritten site (comments, formatting, constructs the
//! parser does not model) is preserved verbatim.

pub mod edit;
pub mod engine;
pub mod operators;
pub mod verilog;

pub use engine::{
    ByteCoverage, Linter, Location, Mutant, MutationEngine, MutationError, MutationRecord,
    OperatorPolicy, RejectedMutation, RejectionStage,
};
pub use operators::{all_operators, MutationOperator, OperatorKind};
pub use verilog::{parse_source, ParseError, SourceFile};
