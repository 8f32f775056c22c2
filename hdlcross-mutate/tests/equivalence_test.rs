// SPDX-License-Identifier: Apache-2.0

//! Every operator applied to a small corpus must produce a mutant that
//! parses and, when iverilog is installed, simulates identically to the
//! original under random stimulus.

use std::collections::BTreeMap;

use hdlcross_mutate::{parse_source, MutationEngine, OperatorKind};
use hdlcross_test_helpers::{assert_equivalent_simulation, assert_valid_sv, FlistEntry};

const DATAPATH: &str = r#"
module datapath(input clk, input rst, input en, input [1:0] sel,
                input [7:0] a, input [7:0] b,
                output [7:0] sum, output [7:0] mix, output par,
                output reg [7:0] acc, output reg flag, output [7:0] held);
  wire [7:0] t;
  reg [7:0] last;
  assign sum = a + b;
  assign t = a ^ b;
  assign mix = ~t & (a | b);
  assign par = ^a;
  assign held = last;
  always @(posedge clk) begin
    if (rst) acc <= 8'd0;
    else if (en) acc <= acc + a;
    else acc <= b;
    if (sel == 2'd1) flag <= &a[3:0];
    else flag <= |b;
    if (en) begin
      last <= a;
      flag <= !rst;
    end
  end
endmodule
"#;

const MUX: &str = r#"
module mux4(input [1:0] s, input [3:0] d0, input [3:0] d1, input [3:0] d2,
            input [3:0] d3, output reg [3:0] y, output lt);
  assign lt = d0 < d1;
  always @* begin
    if (s == 2'd0) y = d0;
    else if (s == 2'd1) y = d1;
    else if (s == 2'd2) y = d2;
    else y = d3;
  end
endmodule
"#;

const HIERARCHY: &str = r#"
module inv(input a, output y);
  assign y = ~a;
endmodule
module top(input [2:0] a, output [2:0] y);
  inv u0 (.a(a[0]), .y(y[0]));
  inv u1 (.a(a[1]), .y(y[1]));
  inv u2 (.a(a[2]), .y(y[2]));
endmodule
"#;

const CORPUS: &[(&str, &str)] = &[("datapath", DATAPATH), ("mux4", MUX), ("top", HIERARCHY)];

fn engine_for(kind: OperatorKind) -> MutationEngine {
    let weights: BTreeMap<String, u32> = OperatorKind::ALL
        .iter()
        .map(|k| (k.to_string(), if *k == kind { 1 } else { 0 }))
        .collect();
    MutationEngine::new().with_weights(&weights).unwrap()
}

#[test]
fn test_corpus_parses() {
    for (top, src) in CORPUS {
        let file = parse_source(src).unwrap();
        assert!(file.module_by_name(top).is_some(), "{}", top);
        assert_valid_sv(src);
    }
}

#[test]
fn test_every_operator_preserves_behaviour() {
    let _ = env_logger::builder().is_test(true).try_init();
    for kind in OperatorKind::ALL {
        let engine = engine_for(kind);
        let mut applied = 0;
        for (top, src) in CORPUS {
            for seed in 0..3 {
                let Ok(mutant) = engine.mutate(src, seed) else {
                    continue;
                };
                assert_eq!(mutant.record.operator, kind);
                assert_ne!(mutant.text.as_str(), *src);
                parse_source(&mutant.text).unwrap();
                assert_valid_sv(&mutant.text);
                assert_equivalent_simulation(src, &mutant.text, top, 12, seed);
                applied += 1;
            }
        }
        assert!(applied > 0, "{} never applied to the corpus", kind);
    }
}

#[test]
fn test_mutation_chains_preserve_behaviour() {
    let _ = env_logger::builder().is_test(true).try_init();
    let engine = MutationEngine::new();
    for (top, src) in CORPUS {
        let chain = engine.mutate_chain(src, 42, 5).unwrap();
        assert!(!chain.is_empty());
        let last = &chain.last().unwrap().text;
        assert_equivalent_simulation(src, last, top, 12, 7);
    }
}

#[test]
fn test_duplicated_module_elaborates_with_its_original() {
    let _ = env_logger::builder().is_test(true).try_init();
    let engine = engine_for(OperatorKind::DuplicateModule);
    for seed in 0..4 {
        let mutant = engine.mutate(HIERARCHY, seed).unwrap();
        let file = parse_source(&mutant.text).unwrap();
        assert_eq!(file.modules.len(), 3);
        let copy = &file.modules[2].name.name;
        let retargeted = mutant.text.matches(&format!("{} u", copy)).count();
        assert!((1..3).contains(&retargeted), "{}", mutant.text);
        hdlcross_test_helpers::assert_valid_sv_flist(&[FlistEntry::new("top.sv", &mutant.text)]);
        assert_equivalent_simulation(HIERARCHY, &mutant.text, "top", 8, seed);
    }
}
