// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};

use clap::ArgMatches;
use hdlcross::CrossCheckConfig;
use hdlcross_mutate::{MutationEngine, MutationRecord};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;
use serde::Serialize;

use crate::report_cli_error::report_cli_error_and_exit;
use crate::toolchain_config::{build_checker, default_sources};

const SUBCOMMAND: &str = "mutate";

#[derive(Serialize)]
struct MutantFile<'a> {
    input: String,
    output: String,
    record: &'a MutationRecord,
}

/// Writes up to `count` independent single-mutation variants of `input`
/// into `output_dir`, each next to a JSON file holding its record.
///
/// Returns the paths of the mutated sources.
pub fn write_mutants(
    engine: &MutationEngine,
    input: &Path,
    output_dir: &Path,
    count: usize,
    seed: u64,
) -> anyhow::Result<Vec<PathBuf>> {
    let text = std::fs::read_to_string(input)
        .map_err(|e| anyhow::anyhow!("{}: {}", input.display(), e))?;
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input".to_string());
    let ext = input
        .extension()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "v".to_string());
    std::fs::create_dir_all(output_dir)?;

    let mut seeds = Pcg64Mcg::seed_from_u64(seed);
    let mut written = Vec::new();
    for i in 0..count {
        let mutant = match engine.mutate(&text, seeds.gen()) {
            Ok(mutant) => mutant,
            Err(e) if written.is_empty() => return Err(e.into()),
            Err(e) => {
                log::warn!("mutant {} of {}: {}", i, input.display(), e);
                continue;
            }
        };
        let path = output_dir.join(format!("{}-mutated-{}.{}", stem, i, ext));
        std::fs::write(&path, &mutant.text)?;
        let record = MutantFile {
            input: input.display().to_string(),
            output: path.display().to_string(),
            record: &mutant.record,
        };
        std::fs::write(
            path.with_extension("json"),
            serde_json::to_string_pretty(&record)?,
        )?;
        log::info!("{}: {}", path.display(), mutant.record.description);
        written.push(path);
    }
    Ok(written)
}

pub fn handle_mutate(matches: &ArgMatches, config: &CrossCheckConfig) {
    log::info!("mutate");
    let input = PathBuf::from(matches.get_one::<String>("input").unwrap());
    let output_dir = PathBuf::from(matches.get_one::<String>("output_dir").unwrap());
    let count = *matches.get_one::<usize>("count").unwrap_or(&1);
    let seed = *matches.get_one::<u64>("seed").unwrap_or(&0);

    let checker = build_checker(matches, config, &default_sources(), SUBCOMMAND);
    match write_mutants(checker.engine(), &input, &output_dir, count, seed) {
        Ok(paths) => {
            for path in paths {
                println!("{}", path.display());
            }
        }
        Err(e) => report_cli_error_and_exit(
            &e.to_string(),
            Some(SUBCOMMAND),
            vec![("input", &input.display().to_string())],
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC: &str = "module m(input [3:0] a, input [3:0] b, output [3:0] y);\n  assign y = a & b;\nendmodule\n";

    #[test]
    fn test_writes_sources_and_records() {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("m.v");
        std::fs::write(&input, SRC).unwrap();
        let out = dir.path().join("out");
        let written = write_mutants(&MutationEngine::new(), &input, &out, 3, 5).unwrap();
        assert!(!written.is_empty());
        for path in &written {
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            assert!(name.starts_with("m-mutated-") && name.ends_with(".v"), "{}", name);
            let json = std::fs::read_to_string(path.with_extension("json")).unwrap();
            let value: serde_json::Value = serde_json::from_str(&json).unwrap();
            assert!(value["record"]["operator"].is_string());
        }
    }
}
