// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use clap::ArgMatches;
use hdlcross::{CrossCheckConfig, CrossCheckJob, InputProgram, KindSelector, RepresentationKind};

use crate::report_cli_error::{report_cli_error_and_exit, report_run_error_and_exit};
use crate::toolchain_config::{build_checker, default_sources};

const SUBCOMMAND: &str = "crosscheck";

/// Exit status when at least one divergence was found.
pub const DIVERGENCE_EXIT_CODE: i32 = 1;

fn is_hdl_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("v") | Some("sv")
    )
}

/// Expands directories to the `.v`/`.sv` files directly inside them.
pub fn expand_inputs(args: &[String]) -> anyhow::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for arg in args {
        let path = PathBuf::from(arg);
        if path.is_dir() {
            let mut files: Vec<PathBuf> = std::fs::read_dir(&path)?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && is_hdl_file(p))
                .collect();
            files.sort();
            log::info!("{}: {} input file(s)", path.display(), files.len());
            out.extend(files);
        } else if path.is_file() {
            out.push(path);
        } else {
            anyhow::bail!("input does not exist: {}", path.display());
        }
    }
    Ok(out)
}

fn parse_sinks(matches: &ArgMatches) -> anyhow::Result<Vec<KindSelector>> {
    matches
        .get_many::<String>("sink")
        .into_iter()
        .flatten()
        .map(|s| s.parse::<KindSelector>().map_err(anyhow::Error::msg))
        .collect()
}

fn build_jobs(matches: &ArgMatches) -> anyhow::Result<Vec<CrossCheckJob>> {
    let kind = matches
        .get_one::<String>("source")
        .map(|s| s.parse::<RepresentationKind>().map_err(anyhow::Error::msg))
        .transpose()?;
    let top = matches.get_one::<String>("top").cloned();
    let sinks = parse_sinks(matches)?;
    let validations = *matches.get_one::<usize>("validations").unwrap_or(&0);
    let paths_per_sink = *matches.get_one::<usize>("paths").unwrap_or(&1);
    let seed = *matches.get_one::<u64>("seed").unwrap_or(&0);

    let inputs: Vec<String> = matches
        .get_many::<String>("inputs")
        .into_iter()
        .flatten()
        .cloned()
        .collect();
    let files = expand_inputs(&inputs)?;
    if files.is_empty() {
        anyhow::bail!("no input files");
    }
    files
        .iter()
        .map(|path| {
            let input = InputProgram::from_path(path, kind.clone(), top.clone())
                .map_err(|e| anyhow::anyhow!("{}: {}", path.display(), e))?;
            Ok(CrossCheckJob {
                input,
                sinks: sinks.clone(),
                validations,
                paths_per_sink,
                seed,
            })
        })
        .collect()
}

pub fn handle_crosscheck(matches: &ArgMatches, config: &CrossCheckConfig) {
    log::info!("crosscheck");
    let jobs = match build_jobs(matches) {
        Ok(jobs) => jobs,
        Err(e) => report_cli_error_and_exit(&e.to_string(), Some(SUBCOMMAND), vec![]),
    };
    let mut sources = default_sources();
    for job in &jobs {
        if !sources.contains(&job.input.kind) {
            sources.push(job.input.kind.clone());
        }
    }
    let checker = build_checker(matches, config, &sources, SUBCOMMAND);

    let cancel = checker.cancel_flag();
    if let Err(e) = ctrlc::set_handler(move || {
        log::warn!("Interrupted; cancelling outstanding work");
        cancel.store(true, Ordering::SeqCst);
    }) {
        log::warn!("Could not install Ctrl-C handler: {}", e);
    }

    let summary = match checker.run(&jobs) {
        Ok(summary) => summary,
        Err(e) => report_run_error_and_exit(&e.to_string(), Some(SUBCOMMAND)),
    };
    println!("{}", summary);
    println!(
        "results: {}",
        checker.settings().result_dir.display()
    );
    if summary.divergences() > 0 {
        std::process::exit(DIVERGENCE_EXIT_CODE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directories_expand_to_hdl_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.sv", "a.v", "notes.txt"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        let files = expand_inputs(&[dir.path().display().to_string()]).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.v", "b.sv"]);
    }

    #[test]
    fn test_missing_input_is_an_error() {
        assert!(expand_inputs(&["/nonexistent/hdlcross/input.v".to_string()]).is_err());
    }
}
