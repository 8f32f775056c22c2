// SPDX-License-Identifier: Apache-2.0

use clap::ArgMatches;
use hdlcross::graph::Edge;
use hdlcross::{CrossCheckConfig, KindSelector, RepresentationKind};

use crate::report_cli_error::report_cli_error_and_exit;
use crate::toolchain_config::{build_checker, default_sources};

pub fn handle_graph(matches: &ArgMatches, config: &CrossCheckConfig) {
    let checker = build_checker(matches, config, &default_sources(), "graph");
    print!("{}", checker.graph().dump());
}

pub fn handle_paths(matches: &ArgMatches, config: &CrossCheckConfig) {
    const SUBCOMMAND: &str = "paths";
    let source: RepresentationKind = match matches.get_one::<String>("source").unwrap().parse() {
        Ok(kind) => kind,
        Err(e) => report_cli_error_and_exit(&e, Some(SUBCOMMAND), vec![]),
    };
    let sink: KindSelector = match matches.get_one::<String>("sink").unwrap().parse() {
        Ok(sink) => sink,
        Err(e) => report_cli_error_and_exit(&e, Some(SUBCOMMAND), vec![]),
    };
    let n = *matches.get_one::<usize>("count").unwrap_or(&1);
    let seed = *matches.get_one::<u64>("seed").unwrap_or(&0);

    let mut sources = default_sources();
    if !sources.contains(&source) {
        sources.push(source.clone());
    }
    let checker = build_checker(matches, config, &sources, SUBCOMMAND);
    let paths = checker.graph().sample_paths(
        &source,
        &sink,
        n,
        seed,
        checker.settings().max_hops,
        &|_: &Edge| true,
    );
    match paths {
        Ok(paths) => {
            for path in paths {
                println!("{}", path.describe());
            }
        }
        Err(e) => report_cli_error_and_exit(&e.to_string(), Some(SUBCOMMAND), vec![]),
    }
}
