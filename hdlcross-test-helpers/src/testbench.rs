// SPDX-License-Identifier: Apache-2.0

//! Random-stimulus testbenches for checking a mutant against its original
//! in simulation.

use std::fmt::Write;

use hdlcross_mutate::verilog::cst::Direction;
use hdlcross_mutate::verilog::width::ModuleScope;
use hdlcross_mutate::verilog::{parse_source, Analysis};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;

use crate::assert_valid_sv::FlistEntry;
use crate::simulate_sv::{iverilog_available, simulate_sv_flist};

pub const TESTBENCH_TOP: &str = "hdlcross_tb";

#[derive(Debug, Clone, PartialEq, Eq)]
enum PortRole {
    Clock,
    Reset { active_low: bool },
    Data,
}

#[derive(Debug, Clone)]
struct TbPort {
    name: String,
    width: u64,
    signed: bool,
    input: bool,
    role: PortRole,
}

fn role_of(name: &str) -> PortRole {
    let lower = name.to_ascii_lowercase();
    match lower.as_str() {
        "clk" | "clock" => PortRole::Clock,
        "rst" | "reset" => PortRole::Reset { active_low: false },
        "rst_n" | "reset_n" | "rstn" | "resetn" => PortRole::Reset { active_low: true },
        _ => PortRole::Data,
    }
}

fn ports(scope: &ModuleScope) -> Result<Vec<TbPort>, String> {
    let mut out = Vec::new();
    for name in &scope.port_names {
        let signal = scope
            .signal(name)
            .ok_or_else(|| format!("port `{}` has no declaration", name))?;
        let width = signal
            .width()
            .ok_or_else(|| format!("port `{}` has no constant width", name))?;
        if signal.array {
            return Err(format!("port `{}` is an unpacked array", name));
        }
        let input = match signal.direction {
            Some(Direction::Input) => true,
            Some(Direction::Output) => false,
            Some(Direction::Inout) | None => {
                return Err(format!("port `{}` is not a plain input or output", name))
            }
        };
        out.push(TbPort {
            name: name.clone(),
            width,
            signed: signal.signed,
            input,
            role: if input { role_of(name) } else { PortRole::Data },
        });
    }
    Ok(out)
}

fn decl(kind: &str, port: &TbPort) -> String {
    let signed = if port.signed { " signed" } else { "" };
    if port.width == 1 {
        format!("  {}{} {};\n", kind, signed, port.name)
    } else {
        format!("  {}{} [{}:0] {};\n", kind, signed, port.width - 1, port.name)
    }
}

fn random_literal(width: u64, rng: &mut Pcg64Mcg) -> String {
    let digits = width.div_ceil(4) as usize;
    let mut hex: String = (0..digits)
        .map(|_| char::from_digit(rng.gen_range(0..16), 16).unwrap_or('0'))
        .collect();
    // Keep the leading digit within the declared width.
    let spare = (digits as u64) * 4 - width;
    if spare > 0 {
        let mask = (1u32 << (4 - spare)) - 1;
        let lead = hex.remove(0).to_digit(16).unwrap_or(0) & mask;
        hex.insert(0, char::from_digit(lead, 16).unwrap_or('0'));
    }
    format!("{}'h{}", width, hex)
}

/// Builds a testbench module `hdlcross_tb` that drives `top` with seeded
/// random stimulus for `cycles` steps and prints every output after each
/// step. Ports named like clocks are toggled and ports named like resets
/// are asserted for the first two steps.
pub fn random_testbench(src: &str, top: &str, cycles: usize, seed: u64) -> Result<String, String> {
    let file = parse_source(src).map_err(|e| e.to_string())?;
    let analysis = Analysis::new(&file);
    let scope = analysis
        .modules
        .iter()
        .find(|m| m.name == top)
        .ok_or_else(|| format!("module `{}` not found", top))?;
    let ports = ports(scope)?;
    let mut rng = Pcg64Mcg::seed_from_u64(seed);

    let mut tb = String::new();
    let _ = writeln!(tb, "module {};", TESTBENCH_TOP);
    for port in &ports {
        tb.push_str(&decl(if port.input { "reg" } else { "wire" }, port));
    }
    let connections: Vec<String> = ports
        .iter()
        .map(|p| format!(".{}({})", p.name, p.name))
        .collect();
    let _ = writeln!(tb, "  {} dut ({});", top, connections.join(", "));
    tb.push_str("  initial begin\n");
    for port in ports.iter().filter(|p| p.role == PortRole::Clock) {
        let _ = writeln!(tb, "    {} = 1'b0;", port.name);
    }
    let outputs: Vec<&TbPort> = ports.iter().filter(|p| !p.input).collect();
    let format: Vec<&str> = outputs.iter().map(|_| "%h").collect();
    let args: String = outputs.iter().map(|p| format!(", {}", p.name)).collect();
    for step in 0..cycles {
        for port in ports.iter().filter(|p| p.input) {
            let value = match port.role {
                PortRole::Clock => continue,
                PortRole::Reset { active_low } => {
                    let asserted = step < 2;
                    if asserted != active_low { "1'b1".to_string() } else { "1'b0".to_string() }
                }
                PortRole::Data => random_literal(port.width, &mut rng),
            };
            let _ = writeln!(tb, "    {} = {};", port.name, value);
        }
        tb.push_str("    #1;\n");
        for port in ports.iter().filter(|p| p.role == PortRole::Clock) {
            let _ = writeln!(tb, "    {} = 1'b1;", port.name);
        }
        tb.push_str("    #1;\n");
        let _ = writeln!(
            tb,
            "    $display(\"{}: {}\"{});",
            step,
            format.join(" "),
            args
        );
        for port in ports.iter().filter(|p| p.role == PortRole::Clock) {
            let _ = writeln!(tb, "    {} = 1'b0;", port.name);
        }
    }
    tb.push_str("    $finish;\n  end\nendmodule\n");
    Ok(tb)
}

/// Simulates `original` and `mutant` under the same random testbench and
/// asserts that they print the same trace. Skips when iverilog is missing.
pub fn assert_equivalent_simulation(original: &str, mutant: &str, top: &str, cycles: usize, seed: u64) {
    if !iverilog_available() {
        log::warn!("Skipping simulation because iverilog is not available.");
        return;
    }
    let tb = random_testbench(original, top, cycles, seed)
        .unwrap_or_else(|e| panic!("cannot build a testbench for `{}`: {}", top, e));
    let run = |design: &str| {
        let files = [
            FlistEntry::new("design.sv", design),
            FlistEntry::new("tb.sv", &tb),
        ];
        simulate_sv_flist(&files, TESTBENCH_TOP)
            .unwrap_or_else(|e| panic!("simulation failed: {}\n{}", e, design))
    };
    let expected = run(original);
    let got = run(mutant);
    assert_eq!(
        expected, got,
        "simulation traces differ\n--- original\n{}\n--- mutant\n{}",
        original, mutant
    );
}
