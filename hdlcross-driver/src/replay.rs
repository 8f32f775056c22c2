// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use clap::ArgMatches;
use hdlcross::{regression, replay_failure, CrossCheckConfig};

use crate::report_cli_error::report_cli_error_and_exit;
use crate::toolchain_config::{build_checker, default_sources};

pub fn handle_replay(matches: &ArgMatches, config: &CrossCheckConfig) {
    log::info!("replay");
    let dir = PathBuf::from(matches.get_one::<String>("failure_dir").unwrap());
    let checker = build_checker(matches, config, &default_sources(), "replay");
    match replay_failure(&checker, &dir) {
        Ok(report) => {
            println!("recorded: {}", report.recorded.name());
            println!("observed: {}", report.observed.name());
            println!("reproduced: {}", report.reproduced());
        }
        Err(e) => report_cli_error_and_exit(
            &e.to_string(),
            Some("replay"),
            vec![("failure directory", &dir.display().to_string())],
        ),
    }
}

pub fn handle_regression(matches: &ArgMatches, config: &CrossCheckConfig) {
    log::info!("regression");
    let root = PathBuf::from(matches.get_one::<String>("dir").unwrap());
    let checker = build_checker(matches, config, &default_sources(), "regression");
    let replays = match regression(&checker, &root) {
        Ok(replays) => replays,
        Err(e) => report_cli_error_and_exit(
            &e.to_string(),
            Some("regression"),
            vec![("directory", &root.display().to_string())],
        ),
    };
    let mut reproduced = 0;
    for (dir, result) in &replays {
        match result {
            Ok(report) if report.reproduced() => {
                reproduced += 1;
                println!("reproduces: {} ({})", dir.display(), report.observed.name());
            }
            Ok(report) => println!(
                "fixed: {} (was {}, now {})",
                dir.display(),
                report.recorded.name(),
                report.observed.name()
            ),
            Err(e) => println!("error: {}: {}", dir.display(), e),
        }
    }
    println!("{} of {} failure(s) still reproduce", reproduced, replays.len());
}
