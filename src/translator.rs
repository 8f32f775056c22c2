// SPDX-License-Identifier: Apache-2.0

//! Translators: external tools viewed as edges of the translation graph.

use std::fmt;
use std::path::Path;
use std::process::Command;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::artifact::{CircuitArtifact, Payload};
use crate::config::TranslatorConfig;
use crate::error::ConfigError;
use crate::repr::RepresentationKind;
use crate::subprocess::{run_with_timeout, ProcessOutput, RunOutcome};

/// One way of invoking a translator. Parallel profiles of the same
/// translator are parallel edges in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OptionProfile {
    pub name: String,
    pub args: Vec<String>,
}

impl OptionProfile {
    pub fn new(name: &str, args: &[&str]) -> Self {
        OptionProfile {
            name: name.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn default_profile() -> Self {
        OptionProfile::new("default", &[])
    }
}

/// Per-invocation environment supplied by the driver.
pub struct TranslateContext<'a> {
    /// Scratch directory owned by the current unit.
    pub workdir: &'a Path,
    /// File stem for the produced artifact, unique within `workdir`.
    pub output_stem: &'a str,
    pub timeout: Duration,
    pub cancel: &'a AtomicBool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compatibility {
    Compatible,
    Incompatible(String),
}

#[derive(Debug)]
pub enum ToolError {
    /// The tool exited non-zero, or exited zero without producing output.
    Crash {
        tool: String,
        status: Option<i32>,
        stdout: String,
        stderr: String,
    },
    Timeout {
        tool: String,
        limit: Duration,
        stdout: String,
        stderr: String,
    },
    /// The tool deterministically declines this input.
    Unsupported { tool: String, reason: String },
    Cancelled { tool: String },
    /// The tool could not be started or its files could not be handled.
    Io { tool: String, error: std::io::Error },
}

impl ToolError {
    pub fn tool(&self) -> &str {
        match self {
            ToolError::Crash { tool, .. }
            | ToolError::Timeout { tool, .. }
            | ToolError::Unsupported { tool, .. }
            | ToolError::Cancelled { tool }
            | ToolError::Io { tool, .. } => tool,
        }
    }

    /// Captured (stdout, stderr), if the process ran.
    pub fn captured_output(&self) -> Option<(&str, &str)> {
        match self {
            ToolError::Crash { stdout, stderr, .. } | ToolError::Timeout { stdout, stderr, .. } => {
                Some((stdout, stderr))
            }
            _ => None,
        }
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::Crash { tool, status, .. } => match status {
                Some(code) => write!(f, "{} crashed with exit code {}", tool, code),
                None => write!(f, "{} was terminated by a signal", tool),
            },
            ToolError::Timeout { tool, limit, .. } => {
                write!(f, "{} timed out after {:?}", tool, limit)
            }
            ToolError::Unsupported { tool, reason } => {
                write!(f, "{} does not support this input: {}", tool, reason)
            }
            ToolError::Cancelled { tool } => write!(f, "{} was cancelled", tool),
            ToolError::Io { tool, error } => write!(f, "{}: I/O error: {}", tool, error),
        }
    }
}

impl std::error::Error for ToolError {}

/// A wrapped external tool.
pub trait Translator: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    fn input_kinds(&self) -> &[RepresentationKind];

    fn output_kind(&self) -> &RepresentationKind;

    /// Non-empty list of alternative invocations.
    fn option_profiles(&self) -> &[OptionProfile];

    fn accepts(&self, kind: &RepresentationKind) -> bool {
        self.input_kinds().contains(kind)
    }

    /// Cheap pre-invocation check of the root source program.
    fn compatibility(&self, _source: &str) -> Compatibility {
        Compatibility::Compatible
    }

    /// Produces the output payload. Callers go through [`translate`], which
    /// checks the input kind and tags the result.
    fn run(
        &self,
        input: &CircuitArtifact,
        profile: &OptionProfile,
        ctx: &TranslateContext,
    ) -> Result<Payload, ToolError>;
}

/// Runs `translator` on `input` with `profile`.
///
/// On success the artifact always carries the translator's declared output
/// kind; `input` is left untouched.
pub fn translate(
    translator: &dyn Translator,
    input: &CircuitArtifact,
    profile: &OptionProfile,
    ctx: &TranslateContext,
) -> Result<CircuitArtifact, ToolError> {
    if !translator.accepts(input.kind()) {
        return Err(ToolError::Unsupported {
            tool: translator.name().to_string(),
            reason: format!("input kind {} is not accepted", input.kind()),
        });
    }
    if !translator.option_profiles().contains(profile) {
        return Err(ToolError::Unsupported {
            tool: translator.name().to_string(),
            reason: format!("unknown option profile {}", profile.name),
        });
    }
    let payload = translator.run(input, profile, ctx)?;
    Ok(CircuitArtifact::derived(
        input,
        translator.output_kind().clone(),
        payload,
        translator.name(),
        &profile.name,
    ))
}

/// Translator backed by a configured command line.
#[derive(Debug)]
pub struct CommandTranslator {
    name: String,
    input_kinds: Vec<RepresentationKind>,
    output_kind: RepresentationKind,
    profiles: Vec<OptionProfile>,
    program: String,
    args: Vec<String>,
    output_from_stdout: bool,
    unsupported_exit_codes: Vec<i32>,
    unsupported_patterns: Vec<Regex>,
    timeout: Option<Duration>,
}

impl CommandTranslator {
    pub fn from_config(config: &TranslatorConfig) -> Result<Self, ConfigError> {
        let input_kinds = config
            .inputs
            .iter()
            .map(|s| s.parse::<RepresentationKind>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(ConfigError::Invalid)?;
        let output_kind = if config.output.contains('@') {
            config
                .output
                .parse::<RepresentationKind>()
                .map_err(ConfigError::Invalid)?
        } else {
            RepresentationKind::produced(
                config.output.parse().map_err(ConfigError::Invalid)?,
                &config.name,
            )
        };
        let profiles = if config.profiles.is_empty() {
            vec![OptionProfile::default_profile()]
        } else {
            config
                .profiles
                .iter()
                .map(|p| OptionProfile {
                    name: p.name.clone(),
                    args: p.args.clone(),
                })
                .collect()
        };
        let unsupported_patterns = config
            .unsupported_patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(CommandTranslator {
            name: config.name.clone(),
            input_kinds,
            output_kind,
            profiles,
            program: config.program.clone(),
            args: config.args.clone(),
            output_from_stdout: config.output_from_stdout,
            unsupported_exit_codes: config.unsupported_exit_codes.clone(),
            unsupported_patterns,
            timeout: config.timeout_secs.map(Duration::from_secs),
        })
    }

    fn expand_args(
        &self,
        profile: &OptionProfile,
        input: &Path,
        output: &Path,
        top: Option<&str>,
        workdir: &Path,
    ) -> Result<Vec<String>, ToolError> {
        let mut expanded = Vec::new();
        let mut saw_profile = false;
        for arg in &self.args {
            if arg == "{profile}" {
                expanded.extend(profile.args.iter().cloned());
                saw_profile = true;
                continue;
            }
            if arg.contains("{top}") && top.is_none() {
                return Err(ToolError::Unsupported {
                    tool: self.name.clone(),
                    reason: "top module is unknown".to_string(),
                });
            }
            expanded.push(
                arg.replace("{input}", &input.display().to_string())
                    .replace("{output}", &output.display().to_string())
                    .replace("{top}", top.unwrap_or(""))
                    .replace("{workdir}", &workdir.display().to_string()),
            );
        }
        if !saw_profile {
            expanded.extend(profile.args.iter().cloned());
        }
        Ok(expanded)
    }

    fn unsupported_reason(&self, output: &ProcessOutput) -> Option<String> {
        if let Some(code) = output.status {
            if self.unsupported_exit_codes.contains(&code) {
                return Some(format!("exit code {}", code));
            }
        }
        for pattern in &self.unsupported_patterns {
            for line in output.stderr.lines().chain(output.stdout.lines()) {
                if pattern.is_match(line) {
                    return Some(line.trim().to_string());
                }
            }
        }
        None
    }
}

impl Translator for CommandTranslator {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_kinds(&self) -> &[RepresentationKind] {
        &self.input_kinds
    }

    fn output_kind(&self) -> &RepresentationKind {
        &self.output_kind
    }

    fn option_profiles(&self) -> &[OptionProfile] {
        &self.profiles
    }

    fn run(
        &self,
        input: &CircuitArtifact,
        profile: &OptionProfile,
        ctx: &TranslateContext,
    ) -> Result<Payload, ToolError> {
        let io_error = |error| ToolError::Io {
            tool: self.name.clone(),
            error,
        };
        let input_path = input
            .payload()
            .materialize(
                ctx.workdir,
                &format!("{}-input.{}", ctx.output_stem, input.kind().extension()),
            )
            .map_err(io_error)?;
        let output_path = ctx
            .workdir
            .join(format!("{}.{}", ctx.output_stem, self.output_kind.extension()));
        let args = self.expand_args(profile, &input_path, &output_path, input.top(), ctx.workdir)?;

        let mut command = Command::new(&self.program);
        command.args(&args).current_dir(ctx.workdir);
        log::info!("Running {}: {:?}", self.name, command);

        let timeout = match self.timeout {
            Some(own) => own.min(ctx.timeout),
            None => ctx.timeout,
        };
        let outcome = run_with_timeout(&mut command, timeout, ctx.cancel).map_err(io_error)?;
        let output = match outcome {
            RunOutcome::Exited(output) => output,
            RunOutcome::TimedOut(output) => {
                return Err(ToolError::Timeout {
                    tool: self.name.clone(),
                    limit: timeout,
                    stdout: output.stdout,
                    stderr: output.stderr,
                })
            }
            RunOutcome::Cancelled(_) => {
                return Err(ToolError::Cancelled {
                    tool: self.name.clone(),
                })
            }
        };

        if !output.success() {
            if let Some(reason) = self.unsupported_reason(&output) {
                return Err(ToolError::Unsupported {
                    tool: self.name.clone(),
                    reason,
                });
            }
            return Err(ToolError::Crash {
                tool: self.name.clone(),
                status: output.status,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }

        if self.output_from_stdout {
            std::fs::write(&output_path, output.stdout.as_bytes()).map_err(io_error)?;
        } else if !output_path.exists() {
            return Err(ToolError::Crash {
                tool: self.name.clone(),
                status: output.status,
                stdout: output.stdout,
                stderr: format!(
                    "{}\n[hdlcross] exited successfully without writing {}",
                    output.stderr,
                    output_path.display()
                ),
            });
        }
        Ok(Payload::File(output_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repr::Language;
    use std::sync::atomic::AtomicBool;

    fn sh_translator(name: &str, script: &str) -> CommandTranslator {
        let config = TranslatorConfig {
            name: name.to_string(),
            inputs: vec!["verilog".to_string()],
            output: "netlist".to_string(),
            program: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                script.to_string(),
                "sh".to_string(),
                "{input}".to_string(),
                "{output}".to_string(),
            ],
            output_from_stdout: false,
            unsupported_exit_codes: vec![42],
            unsupported_patterns: vec!["not supported".to_string()],
            timeout_secs: None,
            profiles: vec![],
        };
        CommandTranslator::from_config(&config).unwrap()
    }

    fn source() -> CircuitArtifact {
        CircuitArtifact::root(
            RepresentationKind::source(Language::Verilog),
            "module top(input a, output b); assign b = a; endmodule\n",
            Some("top".to_string()),
        )
    }

    fn run(translator: &CommandTranslator, timeout: Duration) -> Result<CircuitArtifact, ToolError> {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = tempfile::tempdir().unwrap();
        let cancel = AtomicBool::new(false);
        let ctx = TranslateContext {
            workdir: dir.path(),
            output_stem: "hop0",
            timeout,
            cancel: &cancel,
        };
        let profile = translator.option_profiles()[0].clone();
        let result = translate(translator, &source(), &profile, &ctx);
        // Read the payload before the scratch dir goes away.
        if let Ok(artifact) = &result {
            let text = artifact.text().unwrap().into_owned();
            return Ok(CircuitArtifact::derived(
                &source(),
                artifact.kind().clone(),
                Payload::Text(std::sync::Arc::from(text.as_str())),
                translator.name(),
                &profile.name,
            ));
        }
        result
    }

    #[test]
    fn test_success_produces_declared_kind() {
        let t = sh_translator("copy", "cp \"$1\" \"$2\"");
        let artifact = run(&t, Duration::from_secs(10)).unwrap();
        assert_eq!(artifact.kind().to_string(), "netlist@copy");
        assert!(artifact.text().unwrap().contains("assign b = a"));
    }

    #[test]
    fn test_nonzero_exit_is_crash_with_captured_output() {
        let t = sh_translator("broken", "echo boom 1>&2; exit 1");
        match run(&t, Duration::from_secs(10)) {
            Err(ToolError::Crash { status, stderr, .. }) => {
                assert_eq!(status, Some(1));
                assert_eq!(stderr, "boom\n");
            }
            other => panic!("expected crash, got {:?}", other),
        }
    }

    #[test]
    fn test_success_without_output_is_crash() {
        let t = sh_translator("silent", "true");
        assert!(matches!(
            run(&t, Duration::from_secs(10)),
            Err(ToolError::Crash { status: Some(0), .. })
        ));
    }

    #[test]
    fn test_slow_tool_times_out() {
        let t = sh_translator("slow", "sleep 30");
        let start = std::time::Instant::now();
        assert!(matches!(
            run(&t, Duration::from_millis(300)),
            Err(ToolError::Timeout { .. })
        ));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_declined_input_is_unsupported() {
        let by_code = sh_translator("picky", "exit 42");
        assert!(matches!(
            run(&by_code, Duration::from_secs(10)),
            Err(ToolError::Unsupported { .. })
        ));
        let by_pattern = sh_translator("picky2", "echo 'construct not supported' 1>&2; exit 2");
        match run(&by_pattern, Duration::from_secs(10)) {
            Err(ToolError::Unsupported { reason, .. }) => {
                assert_eq!(reason, "construct not supported")
            }
            other => panic!("expected unsupported, got {:?}", other),
        }
    }

    #[test]
    fn test_wrong_input_kind_is_rejected_before_running() {
        let t = sh_translator("copy", "cp \"$1\" \"$2\"");
        let dir = tempfile::tempdir().unwrap();
        let cancel = AtomicBool::new(false);
        let ctx = TranslateContext {
            workdir: dir.path(),
            output_stem: "hop0",
            timeout: Duration::from_secs(10),
            cancel: &cancel,
        };
        let cpp = CircuitArtifact::root(
            RepresentationKind::produced(Language::CppModel, "verilator"),
            "int main() {}",
            None,
        );
        let result = translate(&t, &cpp, &OptionProfile::default_profile(), &ctx);
        assert!(matches!(result, Err(ToolError::Unsupported { .. })));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_profile_args_are_expanded() {
        let t = CommandTranslator::from_config(&TranslatorConfig {
            name: "echoer".to_string(),
            inputs: vec!["verilog".to_string()],
            output: "netlist".to_string(),
            program: "echo".to_string(),
            args: vec!["--top={top}".to_string(), "{profile}".to_string()],
            output_from_stdout: true,
            unsupported_exit_codes: vec![],
            unsupported_patterns: vec![],
            timeout_secs: None,
            profiles: vec![crate::config::ProfileConfig {
                name: "fast".to_string(),
                args: vec!["-O3".to_string(), "-x".to_string()],
            }],
        })
        .unwrap();
        let artifact = run(&t, Duration::from_secs(10)).unwrap();
        assert_eq!(artifact.text().unwrap(), "--top=top -O3 -x\n");
        assert_eq!(artifact.provenance().profile.as_deref(), Some("fast"));
    }
}
