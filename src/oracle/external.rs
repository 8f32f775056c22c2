// SPDX-License-Identifier: Apache-2.0

//! Decision procedures run as subprocesses (SMT solvers, model checkers,
//! miter-style equivalence checkers).

use std::process::Command;
use std::time::Duration;

use regex::Regex;

use crate::artifact::CircuitArtifact;
use crate::config::DecisionProcedureConfig;
use crate::error::ConfigError;
use crate::oracle::{Decision, DecisionProcedure, OracleContext, Witness};
use crate::repr::{Language, RepresentationKind};
use crate::subprocess::{run_with_timeout, RunOutcome};

const DEFAULT_UNSAT_PATTERN: &str = "^unsat";
const DEFAULT_SAT_PATTERN: &str = "^sat";

#[derive(Debug)]
pub struct ExternalDecisionProcedure {
    name: String,
    languages: Vec<Language>,
    program: String,
    args: Vec<String>,
    unsat_pattern: Regex,
    sat_pattern: Regex,
    unsat_on_success: bool,
    timeout: Option<Duration>,
}

impl ExternalDecisionProcedure {
    pub fn from_config(config: &DecisionProcedureConfig) -> Result<Self, ConfigError> {
        if config.languages.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "decision procedure {} declares no languages",
                config.name
            )));
        }
        let languages = config
            .languages
            .iter()
            .map(|l| l.parse::<Language>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(ConfigError::Invalid)?;
        Ok(ExternalDecisionProcedure {
            name: config.name.clone(),
            languages,
            program: config.program.clone(),
            args: config.args.clone(),
            unsat_pattern: Regex::new(
                config
                    .unsat_pattern
                    .as_deref()
                    .unwrap_or(DEFAULT_UNSAT_PATTERN),
            )?,
            sat_pattern: Regex::new(config.sat_pattern.as_deref().unwrap_or(DEFAULT_SAT_PATTERN))?,
            unsat_on_success: config.unsat_on_success.unwrap_or(false),
            timeout: config.timeout_secs.map(Duration::from_secs),
        })
    }
}

impl DecisionProcedure for ExternalDecisionProcedure {
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts(&self, lhs: &RepresentationKind, rhs: &RepresentationKind) -> bool {
        self.languages.contains(lhs.language()) && self.languages.contains(rhs.language())
    }

    fn decide(&self, lhs: &CircuitArtifact, rhs: &CircuitArtifact, ctx: &OracleContext) -> Decision {
        let materialize = |a: &CircuitArtifact, side: &str| {
            a.payload().materialize(
                ctx.workdir,
                &format!("{}-{}-{}.{}", self.name, side, a.id(), a.kind().extension()),
            )
        };
        let (lhs_path, rhs_path) = match (materialize(lhs, "lhs"), materialize(rhs, "rhs")) {
            (Ok(l), Ok(r)) => (l, r),
            (Err(e), _) | (_, Err(e)) => return Decision::Unknown(format!("I/O error: {}", e)),
        };
        let top = lhs.top().or(rhs.top()).unwrap_or("");
        let args: Vec<String> = self
            .args
            .iter()
            .map(|a| {
                a.replace("{lhs}", &lhs_path.display().to_string())
                    .replace("{rhs}", &rhs_path.display().to_string())
                    .replace("{top}", top)
            })
            .collect();

        let mut command = Command::new(&self.program);
        command.args(&args).current_dir(ctx.workdir);
        log::info!("Running {}: {:?}", self.name, command);
        let timeout = match self.timeout {
            Some(own) => own.min(ctx.timeout),
            None => ctx.timeout,
        };
        let output = match run_with_timeout(&mut command, timeout, ctx.cancel) {
            Ok(RunOutcome::Exited(output)) => output,
            Ok(RunOutcome::TimedOut(_)) => {
                return Decision::Unknown(format!("timed out after {:?}", timeout))
            }
            Ok(RunOutcome::Cancelled(_)) => return Decision::Unknown("cancelled".to_string()),
            Err(e) => return Decision::Unknown(format!("could not run {}: {}", self.program, e)),
        };

        for line in output.stdout.lines() {
            if self.unsat_pattern.is_match(line) {
                return Decision::Unsat;
            }
            if self.sat_pattern.is_match(line) {
                return Decision::Sat(Witness {
                    raw: Some(output.stdout.clone()),
                    ..Witness::default()
                });
            }
        }
        if self.unsat_on_success && output.success() {
            return Decision::Unsat;
        }
        Decision::Unknown(match output.status {
            Some(code) => format!("no verdict in output (exit code {})", code),
            None => "no verdict in output (terminated by a signal)".to_string(),
        })
    }
}
