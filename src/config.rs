// SPDX-License-Identifier: Apache-2.0

//! Run configuration, read once at startup from a TOML file.
//!
//! ```toml
//! [run]
//! result_dir = "results"
//! jobs = 8
//!
//! [[translator]]
//! name = "yosys"
//! inputs = ["verilog"]
//! output = "netlist@yosys"
//! program = "yosys"
//! args = ["-q", "-p", "read_verilog {input}; synth -top {top}; write_verilog {output}"]
//!
//! [[translator.profile]]
//! name = "default"
//!
//! [[translator.profile]]
//! name = "flatten"
//! args = ["-p", "flatten"]
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::translator::{CommandTranslator, Translator};

pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 100;
pub const DEFAULT_ORACLE_TIMEOUT_SECS: u64 = 1000;
pub const DEFAULT_MAX_HOPS: usize = 6;
pub const DEFAULT_MAX_AND_GATES: usize = 200_000;
pub const DEFAULT_BMC_DEPTH: usize = 8;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CrossCheckConfig {
    #[serde(default)]
    pub run: RunConfig,

    #[serde(default)]
    pub mutation: MutationConfig,

    #[serde(default)]
    pub aiger: AigerConfig,

    #[serde(default, rename = "translator")]
    pub translators: Vec<TranslatorConfig>,

    #[serde(default, rename = "decision_procedure")]
    pub decision_procedures: Vec<DecisionProcedureConfig>,

    #[serde(default, rename = "known_limitation")]
    pub known_limitations: Vec<KnownLimitationConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunConfig {
    /// Directory that receives failure directories and the result log.
    pub result_dir: Option<String>,

    /// Number of worker threads; defaults to the number of CPUs.
    pub jobs: Option<usize>,

    /// Wall-clock budget for a single translator invocation.
    pub tool_timeout_secs: Option<u64>,

    /// Wall-clock budget for a single decision-procedure call.
    pub oracle_timeout_secs: Option<u64>,

    /// Upper bound on the number of hops in a sampled path.
    pub max_hops: Option<usize>,

    /// Wall-clock budget for the whole run. When it expires in-flight
    /// processes are killed and no further units are started.
    pub global_budget_secs: Option<u64>,

    /// Also compare each mutant against the unmutated original.
    pub cross_variant: Option<bool>,

    /// Keep per-unit scratch directories of passing units for inspection.
    pub keep_scratch: Option<bool>,
}

impl RunConfig {
    pub fn result_dir(&self) -> PathBuf {
        PathBuf::from(self.result_dir.as_deref().unwrap_or("hdlcross-results"))
    }

    pub fn jobs(&self) -> usize {
        self.jobs.unwrap_or_else(num_cpus::get).max(1)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs.unwrap_or(DEFAULT_TOOL_TIMEOUT_SECS))
    }

    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_secs(
            self.oracle_timeout_secs
                .unwrap_or(DEFAULT_ORACLE_TIMEOUT_SECS),
        )
    }

    pub fn max_hops(&self) -> usize {
        self.max_hops.unwrap_or(DEFAULT_MAX_HOPS)
    }

    pub fn global_budget(&self) -> Option<Duration> {
        self.global_budget_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MutationConfig {
    /// Command run on every mutant, e.g. `["iverilog", "-t", "null", "{input}"]`.
    /// A non-zero exit discards the mutant.
    pub lint_command: Option<Vec<String>>,

    /// Candidate pool share per operator name; unlisted operators keep
    /// their default share and a weight of zero disables an operator.
    pub weights: Option<BTreeMap<String, u32>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AigerConfig {
    /// Miters with more AND gates per time frame than this are reported as
    /// inconclusive.
    pub max_and_gates: Option<usize>,

    /// Number of clock cycles after reset searched for a divergence of
    /// sequential circuits.
    pub bmc_depth: Option<usize>,
}

impl AigerConfig {
    pub fn max_and_gates(&self) -> usize {
        self.max_and_gates.unwrap_or(DEFAULT_MAX_AND_GATES)
    }

    pub fn bmc_depth(&self) -> usize {
        self.bmc_depth.unwrap_or(DEFAULT_BMC_DEPTH)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileConfig {
    pub name: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// One external tool wrapped as a translator.
#[derive(Debug, Clone, Deserialize)]
pub struct TranslatorConfig {
    pub name: String,

    /// Accepted input kinds, e.g. `["verilog", "systemverilog"]`.
    pub inputs: Vec<String>,

    /// Produced kind. A bare language is qualified with the translator name.
    pub output: String,

    pub program: String,

    /// Argument template. `{input}`, `{output}`, `{top}` and `{workdir}` are
    /// substituted; an argument that is exactly `{profile}` expands to the
    /// chosen profile's arguments. When no argument mentions `{profile}` the
    /// profile arguments are appended.
    #[serde(default)]
    pub args: Vec<String>,

    /// Take the artifact from stdout instead of the `{output}` file.
    #[serde(default)]
    pub output_from_stdout: bool,

    /// Exit codes meaning "this input is not supported".
    #[serde(default)]
    pub unsupported_exit_codes: Vec<i32>,

    /// Patterns over stderr/stdout of a failed run meaning "this input is
    /// not supported".
    #[serde(default)]
    pub unsupported_patterns: Vec<String>,

    /// Overrides the run-wide tool timeout for this translator.
    pub timeout_secs: Option<u64>,

    #[serde(default, rename = "profile")]
    pub profiles: Vec<ProfileConfig>,
}

/// External equivalence backend.
#[derive(Debug, Clone, Deserialize)]
pub struct DecisionProcedureConfig {
    pub name: String,

    /// Languages the procedure accepts on both sides.
    pub languages: Vec<String>,

    pub program: String,

    /// Argument template with `{lhs}`, `{rhs}` and `{top}` placeholders.
    #[serde(default)]
    pub args: Vec<String>,

    /// Stdout line pattern meaning "equivalent"; defaults to `^unsat`.
    pub unsat_pattern: Option<String>,

    /// Stdout line pattern meaning "diverging"; defaults to `^sat`.
    pub sat_pattern: Option<String>,

    /// Treat a zero exit status as "equivalent" when no pattern matched,
    /// as with miter-style checkers that fail on a counterexample.
    pub unsat_on_success: Option<bool>,

    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KnownLimitationConfig {
    pub translator: String,
    pub profile: Option<String>,
    /// Regex over the source program identifying the unsupported construct.
    pub pattern: String,
    pub reason: String,
}

impl CrossCheckConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: CrossCheckConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
            path: path.to_path_buf(),
            error,
        })?;
        Self::from_toml_str(&text)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for t in &self.translators {
            if !seen.insert(t.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate translator name: {}",
                    t.name
                )));
            }
            if t.inputs.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "translator {} declares no input kinds",
                    t.name
                )));
            }
            let mut profile_names = std::collections::HashSet::new();
            for p in &t.profiles {
                if !profile_names.insert(p.name.as_str()) {
                    return Err(ConfigError::Invalid(format!(
                        "translator {} has duplicate profile {}",
                        t.name, p.name
                    )));
                }
            }
        }
        if let Some(jobs) = self.run.jobs {
            if jobs == 0 {
                return Err(ConfigError::Invalid("jobs must be at least 1".to_string()));
            }
        }
        if self.run.max_hops == Some(0) {
            return Err(ConfigError::Invalid(
                "max_hops must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Instantiates every configured translator.
    pub fn build_translators(&self) -> Result<Vec<Arc<dyn Translator>>, ConfigError> {
        let mut translators: Vec<Arc<dyn Translator>> = Vec::new();
        for t in &self.translators {
            translators.push(Arc::new(CommandTranslator::from_config(t)?));
        }
        Ok(translators)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[run]
jobs = 2
tool_timeout_secs = 5

[[translator]]
name = "yosys"
inputs = ["verilog"]
output = "netlist"
program = "yosys"
args = ["{profile}", "-p", "read_verilog {input}; write_verilog {output}"]

[[translator.profile]]
name = "default"

[[translator.profile]]
name = "flatten"
args = ["-f"]

[[known_limitation]]
translator = "yosys"
pattern = "\\$random"
reason = "nondeterministic system function"
"#;

    #[test]
    fn test_parse_sample_config() {
        let config = CrossCheckConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.run.jobs(), 2);
        assert_eq!(config.run.tool_timeout(), Duration::from_secs(5));
        assert_eq!(
            config.run.oracle_timeout(),
            Duration::from_secs(DEFAULT_ORACLE_TIMEOUT_SECS)
        );
        assert_eq!(config.translators.len(), 1);
        assert_eq!(config.translators[0].profiles.len(), 2);
        assert_eq!(config.known_limitations.len(), 1);
        let translators = config.build_translators().unwrap();
        assert_eq!(translators[0].output_kind().to_string(), "netlist@yosys");
    }

    #[test]
    fn test_duplicate_translator_is_rejected() {
        let text = r#"
[[translator]]
name = "a"
inputs = ["verilog"]
output = "netlist"
program = "true"

[[translator]]
name = "a"
inputs = ["verilog"]
output = "netlist"
program = "true"
"#;
        let err = CrossCheckConfig::from_toml_str(text).unwrap_err();
        assert!(err.to_string().contains("duplicate translator"), "{}", err);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = CrossCheckConfig::from_toml_str("").unwrap();
        assert_eq!(config.run.max_hops(), DEFAULT_MAX_HOPS);
        assert_eq!(config.aiger.max_and_gates(), DEFAULT_MAX_AND_GATES);
        assert_eq!(config.aiger.bmc_depth(), DEFAULT_BMC_DEPTH);
        assert!(config.run.jobs() >= 1);
        assert!(config.translators.is_empty());
    }
}
