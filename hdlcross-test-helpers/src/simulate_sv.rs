// SPDX-License-Identifier: Apache-2.0

//! Compiles and runs designs with Icarus Verilog (`iverilog` + `vvp`) when
//! it is installed.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::assert_valid_sv::FlistEntry;

#[derive(Debug)]
pub enum SimulateSvError {
    /// `iverilog` is not on `PATH`.
    IverilogUnavailable,
    CompileFailed {
        status: Option<i32>,
        stdout: String,
        stderr: String,
    },
    SimulationFailed {
        status: Option<i32>,
        stdout: String,
        stderr: String,
    },
    Io(std::io::Error),
}

impl std::fmt::Display for SimulateSvError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimulateSvError::IverilogUnavailable => {
                write!(f, "Icarus Verilog (iverilog) not found in PATH")
            }
            SimulateSvError::CompileFailed { status, stderr, .. } => {
                write!(f, "iverilog failed with status {:?}: {}", status, stderr)
            }
            SimulateSvError::SimulationFailed { status, stderr, .. } => {
                write!(f, "vvp failed with status {:?}: {}", status, stderr)
            }
            SimulateSvError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for SimulateSvError {}

impl From<std::io::Error> for SimulateSvError {
    fn from(e: std::io::Error) -> Self {
        SimulateSvError::Io(e)
    }
}

fn find_iverilog() -> Option<PathBuf> {
    which::which("iverilog").ok()
}

pub fn iverilog_available() -> bool {
    find_iverilog().is_some()
}

fn run(cmd: &mut Command) -> Result<std::process::Output, SimulateSvError> {
    log::info!("Running: {:?}", cmd);
    Ok(cmd.output()?)
}

fn compile(work_dir: &Path, sources: &[PathBuf], top: &str) -> Result<PathBuf, SimulateSvError> {
    let iverilog = find_iverilog().ok_or(SimulateSvError::IverilogUnavailable)?;
    let out_path = work_dir.join("sim.vvp");
    let mut cmd = Command::new(iverilog);
    cmd.current_dir(work_dir)
        .arg("-g2012")
        .arg("-o")
        .arg(&out_path)
        .arg("-s")
        .arg(top)
        .args(sources);
    let output = run(&mut cmd)?;
    if !output.status.success() {
        return Err(SimulateSvError::CompileFailed {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into(),
            stderr: String::from_utf8_lossy(&output.stderr).into(),
        });
    }
    Ok(out_path)
}

/// Compiles `files` with `top` as the simulation root, runs the result and
/// returns what it printed.
pub fn simulate_sv_flist(files: &[FlistEntry], top: &str) -> Result<String, SimulateSvError> {
    let dir = tempfile::tempdir()?;
    let mut sources = Vec::new();
    for entry in files {
        let path = dir.path().join(&entry.filename);
        std::fs::write(&path, &entry.contents)?;
        sources.push(path);
    }
    let vvp_path = compile(dir.path(), &sources, top)?;
    let mut cmd = Command::new("vvp");
    cmd.current_dir(dir.path()).arg("-n").arg(&vvp_path);
    let output = run(&mut cmd)?;
    if !output.status.success() {
        return Err(SimulateSvError::SimulationFailed {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into(),
            stderr: String::from_utf8_lossy(&output.stderr).into(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulate_display() {
        let _ = env_logger::builder().is_test(true).try_init();
        if !iverilog_available() {
            log::warn!("Skipping simulation because iverilog is not available.");
            return;
        }
        let tb = "module tb; initial begin $display(\"v=%0d\", 3 + 4); $finish; end endmodule\n";
        let out = simulate_sv_flist(&[FlistEntry::new("tb.v", tb)], "tb").unwrap();
        assert!(out.contains("v=7"), "{}", out);
    }

    #[test]
    fn test_compile_error_is_reported() {
        let _ = env_logger::builder().is_test(true).try_init();
        if !iverilog_available() {
            log::warn!("Skipping simulation because iverilog is not available.");
            return;
        }
        let err = simulate_sv_flist(&[FlistEntry::new("bad.v", "module tb; garbage endmodule\n")], "tb")
            .unwrap_err();
        assert!(matches!(err, SimulateSvError::CompileFailed { .. }), "{}", err);
    }
}
