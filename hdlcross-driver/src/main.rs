// SPDX-License-Identifier: Apache-2.0

//! Command line driver for cross-checking HDL toolchains.
//!
//! Commands are given like:
//!
//! ```text
//! hdlcross-driver <global-options> <command> <command-args-and-options>
//! ```
//!
//! Commands are:
//!
//! - crosscheck: Samples translation paths for each input and compares
//!   the artifacts they produce.
//! - mutate: Writes semantics-preserving mutants of a source file.
//! - replay: Re-executes one persisted failure directory.
//! - regression: Replays every failure directory under a result tree.
//! - graph: Lists the edges of the configured translation graph.
//! - paths: Prints sampled paths between two representation kinds.
//! - equiv: Runs the equivalence oracle on two files.
//!
//! Sample usage:
//!
//! ```shell
//! $ cargo run -- --config=hdlcross.toml graph
//! $ cargo run -- --config=hdlcross.toml --jobs=8 \
//!     crosscheck designs/ --sink netlist --sink aiger \
//!     --validations 4 --paths 3 --seed 7
//! $ cargo run -- regression hdlcross-results
//! ```

mod crosscheck;
mod equiv;
mod graph;
mod mutate;
mod replay;
mod report_cli_error;
mod toolchain_config;

use clap::{value_parser, Arg, ArgAction};
use report_cli_error::report_cli_error_and_exit;

trait AppExt {
    fn add_seed_arg(self) -> Self;
    fn add_top_arg(self) -> Self;
}

impl AppExt for clap::Command {
    fn add_seed_arg(self) -> Self {
        (self as clap::Command).arg(
            Arg::new("seed")
                .long("seed")
                .value_name("SEED")
                .help("Seed for all random choices")
                .value_parser(value_parser!(u64))
                .default_value("0"),
        )
    }

    fn add_top_arg(self) -> Self {
        (self as clap::Command).arg(
            Arg::new("top")
                .long("top")
                .value_name("TOP")
                .help("Name of the top-level module")
                .action(ArgAction::Set),
        )
    }
}

fn main() {
    let _ = env_logger::try_init();

    log::info!(
        "hdlcross-driver starting; version: {}",
        env!("CARGO_PKG_VERSION")
    );

    let matches = clap::Command::new("hdlcross-driver")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Differential testing of HDL toolchains")
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("CONFIG")
                .help("Path to an hdlcross TOML config (falls back to $HDLCROSS_CONFIG)")
                .global(true)
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("jobs")
                .long("jobs")
                .value_name("N")
                .help("Number of worker threads")
                .global(true)
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .value_name("SECS")
                .help("Per-translator timeout in seconds")
                .global(true)
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("result_dir")
                .long("result-dir")
                .value_name("DIR")
                .help("Directory receiving failure directories and the result log")
                .global(true)
                .action(ArgAction::Set),
        )
        .subcommand(clap::Command::new("version").about("Prints the version of the driver"))
        .subcommand(
            clap::Command::new("crosscheck")
                .about("Cross-checks inputs along sampled translation paths")
                .arg(
                    Arg::new("inputs")
                        .help("Input files or directories of .v/.sv files")
                        .required(true)
                        .num_args(1..)
                        .index(1),
                )
                .arg(
                    Arg::new("source")
                        .long("source")
                        .value_name("KIND")
                        .help("Representation kind of the inputs (default: from the file extension)"),
                )
                .arg(
                    Arg::new("sink")
                        .long("sink")
                        .value_name("KIND")
                        .help("Target kind; may be repeated")
                        .required(true)
                        .action(ArgAction::Append),
                )
                .arg(
                    Arg::new("validations")
                        .long("validations")
                        .value_name("V")
                        .help("Mutated variants per input in addition to the original")
                        .value_parser(value_parser!(usize))
                        .default_value("0"),
                )
                .arg(
                    Arg::new("paths")
                        .long("paths")
                        .value_name("N")
                        .help("Paths sampled per variant and sink")
                        .value_parser(value_parser!(usize))
                        .default_value("1"),
                )
                .add_seed_arg()
                .add_top_arg(),
        )
        .subcommand(
            clap::Command::new("mutate")
                .about("Writes semantics-preserving mutants of a source file")
                .arg(
                    Arg::new("input")
                        .help("The input Verilog/SystemVerilog file")
                        .required(true)
                        .index(1),
                )
                .arg(
                    Arg::new("output_dir")
                        .help("Directory receiving the mutants")
                        .required(true)
                        .index(2),
                )
                .arg(
                    Arg::new("count")
                        .long("count")
                        .value_name("N")
                        .help("Number of mutants to write")
                        .value_parser(value_parser!(usize))
                        .default_value("1"),
                )
                .add_seed_arg(),
        )
        .subcommand(
            clap::Command::new("replay")
                .about("Re-executes a persisted failure and prints the new verdict")
                .arg(
                    Arg::new("failure_dir")
                        .help("Failure directory holding outcome.json and strategy.json")
                        .required(true)
                        .index(1),
                ),
        )
        .subcommand(
            clap::Command::new("regression")
                .about("Replays every failure directory under DIR")
                .arg(
                    Arg::new("dir")
                        .help("Root of a result tree")
                        .required(true)
                        .index(1),
                ),
        )
        .subcommand(
            clap::Command::new("graph").about("Lists every edge of the translation graph"),
        )
        .subcommand(
            clap::Command::new("paths")
                .about("Prints sampled paths from a source kind to a sink")
                .arg(
                    Arg::new("source")
                        .long("source")
                        .value_name("KIND")
                        .required(true),
                )
                .arg(
                    Arg::new("sink")
                        .long("sink")
                        .value_name("KIND")
                        .required(true),
                )
                .arg(
                    Arg::new("count")
                        .short('n')
                        .value_name("N")
                        .help("Number of paths to sample")
                        .value_parser(value_parser!(usize))
                        .default_value("1"),
                )
                .add_seed_arg(),
        )
        .subcommand(
            clap::Command::new("equiv")
                .about("Checks whether two artifacts are equivalent")
                .arg(
                    Arg::new("lhs")
                        .help("The left-hand side file")
                        .required(true)
                        .index(1),
                )
                .arg(
                    Arg::new("rhs")
                        .help("The right-hand side file")
                        .required(true)
                        .index(2),
                )
                .arg(
                    Arg::new("kind")
                        .long("kind")
                        .value_name("KIND")
                        .help("Representation kind of the left-hand side")
                        .required(true),
                )
                .arg(
                    Arg::new("rhs_kind")
                        .long("rhs-kind")
                        .value_name("KIND")
                        .help("Representation kind of the right-hand side (default: --kind)"),
                )
                .add_top_arg(),
        )
        .get_matches();

    if matches.subcommand_matches("version").is_some() {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return;
    }

    let Some((name, sub)) = matches.subcommand() else {
        report_cli_error_and_exit("No valid subcommand provided.", None, vec![]);
    };
    let config = toolchain_config::load_config(sub);

    match name {
        "crosscheck" => crosscheck::handle_crosscheck(sub, &config),
        "mutate" => mutate::handle_mutate(sub, &config),
        "replay" => replay::handle_replay(sub, &config),
        "regression" => replay::handle_regression(sub, &config),
        "graph" => graph::handle_graph(sub, &config),
        "paths" => graph::handle_paths(sub, &config),
        "equiv" => equiv::handle_equiv(sub, &config),
        _ => report_cli_error_and_exit("No valid subcommand provided.", None, vec![]),
    }
}
