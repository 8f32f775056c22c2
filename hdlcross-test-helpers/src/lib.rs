// SPDX-License-Identifier: Apache-2.0

mod assert_valid_sv;
mod simulate_sv;
mod testbench;

pub use assert_valid_sv::{assert_valid_sv, assert_valid_sv_flist, can_use_slang, FlistEntry};
pub use simulate_sv::{iverilog_available, simulate_sv_flist, SimulateSvError};
pub use testbench::{assert_equivalent_simulation, random_testbench, TESTBENCH_TOP};
