// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::time::Duration;

use clap::ArgMatches;
use hdlcross::crosscheck::RunSettings;
use hdlcross::{CrossCheckConfig, CrossChecker, Language, RepresentationKind};

use crate::report_cli_error::{report_cli_error_and_exit, report_run_error_and_exit};

/// Environment variable naming the config file when `--config` is absent.
pub const CONFIG_ENV_VAR: &str = "HDLCROSS_CONFIG";

/// Config file picked up from the working directory as a last resort.
pub const CWD_CONFIG_FILE: &str = "hdlcross.toml";

/// `--config`, then `$HDLCROSS_CONFIG`, then `./hdlcross.toml`.
fn config_path(matches: &ArgMatches) -> Option<PathBuf> {
    if let Some(path) = matches.get_one::<String>("config") {
        return Some(PathBuf::from(path));
    }
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            log::info!("Using config from ${}: {}", CONFIG_ENV_VAR, path);
            return Some(PathBuf::from(path));
        }
    }
    let cwd = std::env::current_dir().ok()?.join(CWD_CONFIG_FILE);
    if cwd.exists() {
        log::info!("Using {} in current directory", CWD_CONFIG_FILE);
        Some(cwd)
    } else {
        None
    }
}

/// Loads the run configuration; without any config file the defaults are
/// used, which declare no translators.
pub fn load_config(matches: &ArgMatches) -> CrossCheckConfig {
    let Some(path) = config_path(matches) else {
        log::info!("No config file given; using defaults");
        return CrossCheckConfig::default();
    };
    if !path.exists() {
        let working_dir = std::env::current_dir()
            .map(|d| d.display().to_string())
            .unwrap_or_default();
        report_cli_error_and_exit(
            "config file does not exist",
            None,
            vec![
                ("path", &path.display().to_string()),
                ("working directory", &working_dir),
            ],
        );
    }
    match CrossCheckConfig::from_path(&path) {
        Ok(config) => config,
        Err(e) => report_cli_error_and_exit(
            &e.to_string(),
            None,
            vec![("path", &path.display().to_string())],
        ),
    }
}

/// Applies `--jobs`, `--timeout` and `--result-dir` on top of `[run]`.
pub fn apply_overrides(matches: &ArgMatches, settings: &mut RunSettings) {
    if let Some(jobs) = matches.get_one::<usize>("jobs") {
        settings.jobs = (*jobs).max(1);
    }
    if let Some(secs) = matches.get_one::<u64>("timeout") {
        settings.tool_timeout = Duration::from_secs(*secs);
    }
    if let Some(dir) = matches.get_one::<String>("result_dir") {
        settings.result_dir = PathBuf::from(dir);
    }
}

/// Source kinds declared when the command line names none.
pub fn default_sources() -> Vec<RepresentationKind> {
    vec![
        RepresentationKind::source(Language::Verilog),
        RepresentationKind::source(Language::SystemVerilog),
    ]
}

pub fn build_checker(
    matches: &ArgMatches,
    config: &CrossCheckConfig,
    sources: &[RepresentationKind],
    subcommand: &str,
) -> CrossChecker {
    let mut checker = match CrossChecker::from_config(config, sources) {
        Ok(checker) => checker,
        Err(e) => report_run_error_and_exit(&e.to_string(), Some(subcommand)),
    };
    apply_overrides(matches, checker.settings_mut());
    checker
}
