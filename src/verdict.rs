// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::oracle::CounterTrace;
use crate::translator::ToolError;

/// Failure directories of units whose translators crashed or timed out.
pub const COMPILATION_LABEL: &str = "compilation";
/// Failure directories of units whose artifacts diverged.
pub const CROSS_CHECKING_LABEL: &str = "cross-checking";
/// Failure directories of mutations the engine could not realize or the
/// linter rejected.
pub const MUTATION_LABEL: &str = "mutation";

/// Outcome of executing or comparing one unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Equivalent,
    Diverging {
        counter_trace: CounterTrace,
    },
    /// `position` is the zero-based hop index of the failing translator.
    ToolCrash {
        tool: String,
        position: usize,
        status: Option<i32>,
    },
    ToolTimeout {
        tool: String,
        position: usize,
    },
    Unsupported {
        reason: String,
    },
    Inconclusive {
        reason: String,
    },
}

impl Verdict {
    /// Maps a translator failure at hop `position`.
    pub fn from_tool_error(error: &ToolError, position: usize) -> Verdict {
        match error {
            ToolError::Crash { tool, status, .. } => Verdict::ToolCrash {
                tool: tool.clone(),
                position,
                status: *status,
            },
            ToolError::Timeout { tool, .. } => Verdict::ToolTimeout {
                tool: tool.clone(),
                position,
            },
            ToolError::Unsupported { .. } => Verdict::Unsupported {
                reason: error.to_string(),
            },
            ToolError::Cancelled { .. } => Verdict::Inconclusive {
                reason: error.to_string(),
            },
            ToolError::Io { tool, .. } => Verdict::ToolCrash {
                tool: tool.clone(),
                position,
                status: None,
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Verdict::Equivalent => "equivalent",
            Verdict::Diverging { .. } => "diverging",
            Verdict::ToolCrash { .. } => "tool_crash",
            Verdict::ToolTimeout { .. } => "tool_timeout",
            Verdict::Unsupported { .. } => "unsupported",
            Verdict::Inconclusive { .. } => "inconclusive",
        }
    }

    /// Label of the failure directory this verdict is persisted under, or
    /// `None` when it is not persisted.
    pub fn failure_label(&self) -> Option<&'static str> {
        match self {
            Verdict::Diverging { .. } => Some(CROSS_CHECKING_LABEL),
            Verdict::ToolCrash { .. } | Verdict::ToolTimeout { .. } => Some(COMPILATION_LABEL),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.failure_label().is_some()
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Equivalent => write!(f, "equivalent"),
            Verdict::Diverging { counter_trace } => write!(
                f,
                "diverging ({} vs {}, by {})",
                counter_trace.lhs.kind, counter_trace.rhs.kind, counter_trace.procedure
            ),
            Verdict::ToolCrash {
                tool,
                position,
                status,
            } => match status {
                Some(code) => write!(f, "{} crashed at hop {} (exit code {})", tool, position, code),
                None => write!(f, "{} crashed at hop {}", tool, position),
            },
            Verdict::ToolTimeout { tool, position } => {
                write!(f, "{} timed out at hop {}", tool, position)
            }
            Verdict::Unsupported { reason } => write!(f, "unsupported: {}", reason),
            Verdict::Inconclusive { reason } => write!(f, "inconclusive: {}", reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_tool_errors_map_to_verdicts() {
        let crash = ToolError::Crash {
            tool: "yosys".to_string(),
            status: Some(1),
            stdout: String::new(),
            stderr: String::new(),
        };
        assert_eq!(
            Verdict::from_tool_error(&crash, 2),
            Verdict::ToolCrash {
                tool: "yosys".to_string(),
                position: 2,
                status: Some(1)
            }
        );
        let timeout = ToolError::Timeout {
            tool: "abc".to_string(),
            limit: Duration::from_secs(1),
            stdout: String::new(),
            stderr: String::new(),
        };
        assert_eq!(
            Verdict::from_tool_error(&timeout, 0).failure_label(),
            Some(COMPILATION_LABEL)
        );
        let unsupported = ToolError::Unsupported {
            tool: "abc".to_string(),
            reason: "x".to_string(),
        };
        assert!(!Verdict::from_tool_error(&unsupported, 0).is_failure());
    }

    #[test]
    fn test_serialized_form_is_tagged() {
        let json = serde_json::to_string(&Verdict::ToolTimeout {
            tool: "t".to_string(),
            position: 1,
        })
        .unwrap();
        assert_eq!(json, r#"{"verdict":"tool_timeout","tool":"t","position":1}"#);
        let back: Verdict = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name(), "tool_timeout");
    }
}
