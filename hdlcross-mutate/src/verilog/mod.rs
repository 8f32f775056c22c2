// SPDX-License-Identifier: Apache-2.0

pub mod cst;
pub mod lexer;
pub mod parser;
pub mod width;

pub use cst::SourceFile;
pub use lexer::{Pos, Span};
pub use parser::{parse_source, ParseError};
pub use width::Analysis;
