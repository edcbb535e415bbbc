use crate::core::Severity;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Rule id of the finding that stands in for a failed rule.
pub const RULE_ERROR_ID: &str = "rule-execution-error";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Location {
    pub file: String,
    pub line: usize,
    pub column: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub function: Option<String>,

    /// Declaration line of `function`; tells overloads apart.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub function_line: Option<usize>,

    /// Control-flow index of the statement inside `function`.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub statement_index: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub snippet: Option<String>,
}

impl Location {
    pub fn new(file: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            file: file.into(),
            line,
            column,
            function: None,
            function_line: None,
            statement_index: None,
            snippet: None,
        }
    }

    pub fn in_function(mut self, function: impl Into<String>, statement_index: usize) -> Self {
        self.function = Some(function.into());
        self.statement_index = Some(statement_index);
        self
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        let snippet = snippet.into();
        let first_line = snippet.lines().next().unwrap_or("").trim().to_string();
        self.snippet = Some(first_line);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Finding {
    pub rule_id: String,

    pub severity: Severity,

    pub title: String,

    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract: Option<String>,

    pub location: Location,

    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub affected_variables: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub impact: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,

    /// Rule whose failure this entry reports (`rule-execution-error` only).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub failed_rule: Option<String>,

    /// Number of raw hits merged into this entry by the aggregator.
    pub occurrences: usize,
}

/// Identity used by the aggregator to collapse duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DedupKey {
    pub file: String,
    pub contract: Option<String>,
    pub rule_id: String,
    pub function: Option<String>,
    pub function_line: Option<usize>,
    pub position: usize,
    pub failed_rule: Option<String>,
}

impl Finding {
    pub fn new(
        rule_id: impl Into<String>,
        severity: Severity,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            rule_id: rule_id.into(),
            severity,
            title: title.into(),
            message: message.into(),
            contract: None,
            location: Location::new("unknown.sol", 0, 0),
            affected_variables: Vec::new(),
            impact: None,
            recommendation: None,
            failed_rule: None,
            occurrences: 1,
        }
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = location;
        self
    }

    pub fn with_contract(mut self, contract: &str) -> Self {
        self.contract = Some(contract.to_string());
        self
    }

    pub fn with_variable(mut self, variable: &str) -> Self {
        if !self.affected_variables.iter().any(|v| v == variable) {
            self.affected_variables.push(variable.to_string());
        }
        self
    }

    pub fn with_impact(mut self, impact: impl Into<String>) -> Self {
        self.impact = Some(impact.into());
        self
    }

    pub fn with_recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendation = Some(recommendation.into());
        self
    }

    pub fn with_failed_rule(mut self, rule: &str) -> Self {
        self.failed_rule = Some(rule.to_string());
        self
    }

    /// State-level findings have no statement index; their declaration line
    /// stands in so distinct declarations never collapse.
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            file: self.location.file.clone(),
            contract: self.contract.clone(),
            rule_id: self.rule_id.clone(),
            function: self.location.function.clone(),
            function_line: self.location.function_line,
            position: self.location.statement_index.unwrap_or(self.location.line),
            failed_rule: self.failed_rule.clone(),
        }
    }

    /// Report order: severity descending, then source position, then rule id.
    pub fn report_order(&self, other: &Self) -> Ordering {
        other
            .severity
            .cmp(&self.severity)
            .then_with(|| self.location.file.cmp(&other.location.file))
            .then_with(|| self.location.line.cmp(&other.location.line))
            .then_with(|| self.location.column.cmp(&other.location.column))
            .then_with(|| self.rule_id.cmp(&other.rule_id))
            .then_with(|| self.location.function.cmp(&other.location.function))
            .then_with(|| self.contract.cmp(&other.contract))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(rule: &str, severity: Severity, line: usize) -> Finding {
        Finding::new(rule, severity, "t", "m").with_location(Location::new("a.sol", line, 1))
    }

    #[test]
    fn test_report_order_prefers_severity_then_line() {
        let mut findings = vec![
            finding("b", Severity::Low, 1),
            finding("a", Severity::Critical, 30),
            finding("c", Severity::Critical, 10),
            finding("d", Severity::Medium, 2),
        ];
        findings.sort_by(|a, b| a.report_order(b));

        let order: Vec<_> = findings.iter().map(|f| f.rule_id.as_str()).collect();
        assert_eq!(order, vec!["c", "a", "d", "b"]);
    }

    #[test]
    fn test_dedup_key_falls_back_to_line() {
        let state_level = finding("hardcoded-authority-address", Severity::Critical, 7);
        assert_eq!(state_level.dedup_key().position, 7);

        let in_function = finding("x", Severity::High, 40)
            .with_location(Location::new("a.sol", 40, 3).in_function("withdraw", 2));
        assert_eq!(in_function.dedup_key().position, 2);
        assert_eq!(in_function.dedup_key().function.as_deref(), Some("withdraw"));

        let mut overload = in_function.clone();
        overload.location.function_line = Some(12);
        assert_ne!(overload.dedup_key(), in_function.dedup_key());
    }

    #[test]
    fn test_snippet_keeps_first_line() {
        let loc = Location::new("a.sol", 1, 1).with_snippet("  foo();\n  bar();");
        assert_eq!(loc.snippet.as_deref(), Some("foo();"));
    }
}
