// SPDX-License-Identifier: Apache-2.0

use std::path::Path;
use std::sync::atomic::AtomicBool;

use clap::ArgMatches;
use hdlcross::workspace::unit_scratch;
use hdlcross::{
    CircuitArtifact, CrossCheckConfig, EquivalenceOracle, OracleContext, RepresentationKind,
    Verdict,
};

use crate::report_cli_error::report_cli_error_and_exit;
use crate::toolchain_config::{build_checker, default_sources};

const SUBCOMMAND: &str = "equiv";

fn load(path: &Path, kind: &RepresentationKind, top: Option<String>) -> anyhow::Result<CircuitArtifact> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("{}: {}", path.display(), e))?;
    Ok(CircuitArtifact::root(kind.clone(), &text, top))
}

/// Runs the oracle once on the two files.
pub fn check_files(
    oracle: &EquivalenceOracle,
    lhs: (&Path, &RepresentationKind),
    rhs: (&Path, &RepresentationKind),
    top: Option<String>,
    timeout: std::time::Duration,
) -> anyhow::Result<Verdict> {
    let a = load(lhs.0, lhs.1, top.clone())?;
    let b = load(rhs.0, rhs.1, top)?;
    let workdir = unit_scratch(SUBCOMMAND)?;
    let cancel = AtomicBool::new(false);
    let ctx = OracleContext {
        workdir: workdir.path(),
        timeout,
        cancel: &cancel,
    };
    Ok(oracle.is_equivalent(&a, &b, &ctx))
}

pub fn handle_equiv(matches: &ArgMatches, config: &CrossCheckConfig) {
    log::info!("equiv");
    let lhs = Path::new(matches.get_one::<String>("lhs").unwrap());
    let rhs = Path::new(matches.get_one::<String>("rhs").unwrap());
    let parse = |name: &str| -> Option<RepresentationKind> {
        matches.get_one::<String>(name).map(|s| match s.parse::<RepresentationKind>() {
            Ok(kind) => kind,
            Err(e) => report_cli_error_and_exit(&e, Some(SUBCOMMAND), vec![]),
        })
    };
    let Some(lhs_kind) = parse("kind") else {
        report_cli_error_and_exit("--kind is required", Some(SUBCOMMAND), vec![]);
    };
    let rhs_kind = parse("rhs_kind").unwrap_or_else(|| lhs_kind.clone());
    let top = matches.get_one::<String>("top").cloned();

    let checker = build_checker(matches, config, &default_sources(), SUBCOMMAND);
    let verdict = match check_files(
        checker.oracle(),
        (lhs, &lhs_kind),
        (rhs, &rhs_kind),
        top,
        checker.settings().oracle_timeout,
    ) {
        Ok(verdict) => verdict,
        Err(e) => report_cli_error_and_exit(&e.to_string(), Some(SUBCOMMAND), vec![]),
    };
    match &verdict {
        Verdict::Equivalent => println!("success: {} and {} are equivalent", lhs.display(), rhs.display()),
        Verdict::Diverging { counter_trace } => {
            let trace = serde_json::to_string_pretty(counter_trace).unwrap_or_default();
            report_cli_error_and_exit(
                "artifacts are not equivalent",
                Some(SUBCOMMAND),
                vec![("counter-trace", &trace)],
            );
        }
        other => report_cli_error_and_exit(
            &format!("no decision: {}", other.name()),
            Some(SUBCOMMAND),
            vec![("verdict", &format!("{:?}", other))],
        ),
    }
}
