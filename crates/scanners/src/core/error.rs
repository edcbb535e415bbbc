//! Error taxonomy
//!
//! Three failure classes with different blast radius. A [`ParseError`] aborts the
//! whole run and no partial results are produced. A [`RuleExecutionError`] is
//! contained to the rule that raised it and surfaces inline as a low-severity
//! finding. A [`RenderError`] only affects pretty output; the structured findings
//! are still available to the caller.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("syntax error at line {line}, column {column}: unexpected `{snippet}`")]
    Syntax {
        line: usize,
        column: usize,
        snippet: String,
    },

    #[error("syntax error at line {line}, column {column}: missing `{expected}`")]
    Missing {
        line: usize,
        column: usize,
        expected: String,
    },

    #[error("unsupported construct `{construct}` at line {line}, column {column}")]
    Unsupported {
        construct: String,
        line: usize,
        column: usize,
    },

    #[error("state variable `{name}` declared twice in contract `{contract}` (line {line})")]
    DuplicateStateVariable {
        contract: String,
        name: String,
        line: usize,
    },

    #[error("no contract, library or interface declaration found")]
    NoContract,

    #[error("failed to initialise the Solidity grammar: {0}")]
    Grammar(String),
}

impl ParseError {
    pub fn line(&self) -> Option<usize> {
        match self {
            Self::Syntax { line, .. }
            | Self::Missing { line, .. }
            | Self::Unsupported { line, .. }
            | Self::DuplicateStateVariable { line, .. } => Some(*line),
            Self::NoContract | Self::Grammar(_) => None,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("rule `{rule_id}` failed: {reason}")]
pub struct RuleExecutionError {
    pub rule_id: String,
    pub reason: String,
    pub function: Option<String>,
    pub line: Option<usize>,
}

impl RuleExecutionError {
    pub fn new(rule_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            rule_id: rule_id.into(),
            reason: reason.into(),
            function: None,
            line: None,
        }
    }

    pub fn at(mut self, function: &str, line: usize) -> Self {
        self.function = Some(function.to_string());
        self.line = Some(line);
        self
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to render markdown report: {0}")]
    Markdown(#[from] std::fmt::Error),

    #[error("failed to serialize findings: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display_names_location() {
        let err = ParseError::Syntax {
            line: 12,
            column: 5,
            snippet: "}}".to_string(),
        };
        assert_eq!(err.to_string(), "syntax error at line 12, column 5: unexpected `}}`");
        assert_eq!(err.line(), Some(12));
        assert_eq!(ParseError::NoContract.line(), None);
    }

    #[test]
    fn test_rule_error_display() {
        let err = RuleExecutionError::new("classic-reentrancy", "opaque assembly").at("f", 3);
        assert_eq!(err.to_string(), "rule `classic-reentrancy` failed: opaque assembly");
        assert_eq!(err.line, Some(3));
    }
}
