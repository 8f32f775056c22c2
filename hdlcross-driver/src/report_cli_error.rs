// SPDX-License-Identifier: Apache-2.0

use colored::Colorize;

/// Exit status for conditions that abort a whole cross-check run.
pub const RUN_ERROR_EXIT_CODE: i32 = 2;

pub fn report_cli_error_and_exit(
    message: &str,
    subcommand: Option<&str>,
    details: Vec<(&str, &str)>,
) -> ! {
    report_and_exit(1, message, subcommand, details)
}

pub fn report_run_error_and_exit(message: &str, subcommand: Option<&str>) -> ! {
    report_and_exit(RUN_ERROR_EXIT_CODE, message, subcommand, vec![])
}

fn report_and_exit(
    code: i32,
    message: &str,
    subcommand: Option<&str>,
    details: Vec<(&str, &str)>,
) -> ! {
    let subcommand_str = if let Some(subcommand) = subcommand {
        format!("{}: ", subcommand)
    } else {
        String::new()
    };
    eprintln!("hdlcross-driver: {}{}", subcommand_str, message.red().bold());
    for (key, value) in details {
        eprintln!("  {}: {}", key, value);
    }
    std::process::exit(code);
}
