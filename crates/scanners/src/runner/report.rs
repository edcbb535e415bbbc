//! Aggregated scan results and their renderings
//!
//! The JSON form is the machine contract: stable field order, no timestamp, so
//! two runs over the same input are byte-identical. The Markdown form is for
//! people and may carry a generation time.

use crate::core::{Finding, RenderError, Severity};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeverityCount {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl SeverityCount {
    pub fn total(&self) -> usize {
        self.critical + self.high + self.medium + self.low
    }

    pub fn get(&self, severity: Severity) -> usize {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MarkdownOptions {
    pub title: String,
    pub generated_at: Option<DateTime<Utc>>,
}

impl Default for MarkdownOptions {
    fn default() -> Self {
        Self {
            title: "Smart Contract Security Audit".to_string(),
            generated_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanReport {
    findings: Vec<Finding>,
    files: Vec<String>,
    contracts_scanned: usize,
}

#[derive(Serialize)]
struct JsonSummary<'a> {
    files: &'a [String],
    contracts_scanned: usize,
    total: usize,
    by_severity: SeverityCount,
}

#[derive(Serialize)]
struct JsonReport<'a> {
    version: &'static str,
    summary: JsonSummary<'a>,
    findings: &'a [Finding],
}

impl ScanReport {
    pub fn new(findings: Vec<Finding>, files: Vec<String>, contracts_scanned: usize) -> Self {
        Self {
            findings,
            files,
            contracts_scanned,
        }
    }

    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }

    pub fn contracts_scanned(&self) -> usize {
        self.contracts_scanned
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }

    /// Folds another file's report into this one, keeping report order.
    pub fn merge(&mut self, other: ScanReport) {
        self.findings.extend(other.findings);
        self.findings
            .sort_by(|a, b| a.report_order(b).then_with(|| a.message.cmp(&b.message)));
        self.files.extend(other.files);
        self.files.sort();
        self.files.dedup();
        self.contracts_scanned += other.contracts_scanned;
    }

    pub fn count_by_severity(&self) -> SeverityCount {
        let mut count = SeverityCount::default();
        for finding in &self.findings {
            match finding.severity {
                Severity::Critical => count.critical += 1,
                Severity::High => count.high += 1,
                Severity::Medium => count.medium += 1,
                Severity::Low => count.low += 1,
            }
        }
        count
    }

    /// Any critical or high finding; drives the CLI exit code.
    pub fn has_blocking_findings(&self) -> bool {
        self.findings.iter().any(|f| f.severity.is_blocking())
    }

    pub fn to_json(&self) -> Result<String, RenderError> {
        let report = JsonReport {
            version: crate::VERSION,
            summary: JsonSummary {
                files: &self.files,
                contracts_scanned: self.contracts_scanned,
                total: self.findings.len(),
                by_severity: self.count_by_severity(),
            },
            findings: &self.findings,
        };
        Ok(serde_json::to_string_pretty(&report)?)
    }

    pub fn to_markdown(&self, options: &MarkdownOptions) -> Result<String, RenderError> {
        let mut md = String::new();
        let count = self.count_by_severity();

        writeln!(md, "# {}\n", options.title)?;
        if let Some(at) = options.generated_at {
            writeln!(md, "**Generated**: {}", at.format("%Y-%m-%d %H:%M:%S UTC"))?;
        }
        writeln!(md, "**Analyzer Version**: {}", crate::VERSION)?;
        writeln!(md, "**Files**: {}", self.files.iter().map(|f| format!("`{}`", f)).collect::<Vec<_>>().join(", "))?;
        writeln!(md, "**Contracts Scanned**: {}\n", self.contracts_scanned)?;

        writeln!(md, "## Executive Summary\n")?;
        writeln!(md, "| Severity | Count |")?;
        writeln!(md, "|----------|-------|")?;
        for severity in Severity::ALL {
            writeln!(md, "| {} {} | {} |", severity.emoji(), severity, count.get(severity))?;
        }
        writeln!(md, "| **Total** | **{}** |\n", count.total())?;

        if self.findings.is_empty() {
            writeln!(md, "No findings.")?;
            return Ok(md);
        }

        writeln!(md, "| # | Severity | Rule | Contract | Function | Line |")?;
        writeln!(md, "|---|----------|------|----------|----------|------|")?;
        for (idx, finding) in self.findings.iter().enumerate() {
            writeln!(
                md,
                "| {} | {} | `{}` | {} | {} | {} |",
                idx + 1,
                finding.severity,
                finding.rule_id,
                finding.contract.as_deref().unwrap_or("-"),
                finding.location.function.as_deref().unwrap_or("-"),
                finding.location.line
            )?;
        }
        writeln!(md)?;

        let mut number = 0;
        for severity in Severity::ALL {
            let group: Vec<&Finding> = self.findings.iter().filter(|f| f.severity == severity).collect();
            if group.is_empty() {
                continue;
            }
            writeln!(md, "## {} {} Findings\n", severity.emoji(), severity)?;
            for finding in group {
                number += 1;
                self.write_finding(&mut md, number, finding)?;
            }
        }

        Ok(md)
    }

    fn write_finding(&self, md: &mut String, number: usize, finding: &Finding) -> std::fmt::Result {
        writeln!(md, "### {}. {}\n", number, finding.title)?;
        writeln!(md, "**Rule**: `{}`", finding.rule_id)?;
        if finding.occurrences > 1 {
            writeln!(md, "**Occurrences**: {}", finding.occurrences)?;
        }
        writeln!(md)?;
        writeln!(md, "{}\n", finding.message)?;

        let loc = &finding.location;
        write!(md, "**Location**: `{}:{}:{}`", loc.file, loc.line, loc.column)?;
        if let Some(contract) = &finding.contract {
            write!(md, ", contract `{}`", contract)?;
        }
        if let Some(function) = &loc.function {
            write!(md, ", function `{}`", function)?;
        }
        if let Some(index) = loc.statement_index {
            write!(md, ", statement {}", index)?;
        }
        writeln!(md, "\n")?;

        if let Some(snippet) = &loc.snippet {
            writeln!(md, "**Evidence**:\n\n```solidity\n{}\n```\n", snippet)?;
        }
        if !finding.affected_variables.is_empty() {
            writeln!(md, "**Affected Variables**: {}\n", finding.affected_variables.join(", "))?;
        }
        if let Some(impact) = &finding.impact {
            writeln!(md, "**Impact**: {}\n", impact)?;
        }
        if let Some(recommendation) = &finding.recommendation {
            writeln!(md, "**Recommendation**: {}\n", recommendation)?;
        }
        writeln!(md, "---\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Location;

    fn report() -> ScanReport {
        let critical = Finding::new("stale-block-hash-reference", Severity::Critical, "Stale hash", "msg")
            .with_location(Location::new("game.sol", 12, 9).in_function("settle", 3).with_snippet("hash == guess"))
            .with_contract("Game")
            .with_impact("predictable")
            .with_recommendation("bound the height");
        let medium = Finding::new("unguarded-sentinel-equality", Severity::Medium, "Sentinel", "msg")
            .with_location(Location::new("game.sol", 12, 9).in_function("settle", 3))
            .with_contract("Game");
        ScanReport::new(vec![critical, medium], vec!["game.sol".to_string()], 1)
    }

    #[test]
    fn test_counts_and_blocking() {
        let report = report();
        let count = report.count_by_severity();
        assert_eq!(count.critical, 1);
        assert_eq!(count.medium, 1);
        assert_eq!(count.total(), 2);
        assert!(report.has_blocking_findings());
        assert!(!ScanReport::default().has_blocking_findings());
    }

    #[test]
    fn test_json_shape() {
        let json: serde_json::Value = serde_json::from_str(&report().to_json().unwrap()).unwrap();
        assert_eq!(json["summary"]["total"], 2);
        assert_eq!(json["summary"]["by_severity"]["critical"], 1);
        assert_eq!(json["findings"][0]["rule_id"], "stale-block-hash-reference");
        assert_eq!(json["findings"][0]["severity"], "critical");
        assert_eq!(json["findings"][0]["location"]["function"], "settle");
        assert!(json["findings"][1]["impact"].is_null());
    }

    #[test]
    fn test_markdown_sections() {
        let md = report().to_markdown(&MarkdownOptions::default()).unwrap();
        assert!(md.starts_with("# Smart Contract Security Audit"));
        assert!(md.contains("## Executive Summary"));
        assert!(md.contains("| **Total** | **2** |"));
        assert!(md.contains("## 🔴 Critical Findings"));
        assert!(md.contains("**Location**: `game.sol:12:9`, contract `Game`, function `settle`, statement 3"));
        assert!(md.contains("**Evidence**:\n\n```solidity\nhash == guess\n```"));
        assert!(md.contains("**Recommendation**: bound the height"));
        assert!(!md.contains("**Generated**"));

        let stamped = report()
            .to_markdown(&MarkdownOptions {
                generated_at: Some(Utc::now()),
                ..MarkdownOptions::default()
            })
            .unwrap();
        assert!(stamped.contains("**Generated**"));
    }

    #[test]
    fn test_merge_keeps_order() {
        let mut merged = ScanReport::new(
            vec![Finding::new("x", Severity::Low, "t", "m").with_location(Location::new("a.sol", 1, 1))],
            vec!["a.sol".to_string()],
            1,
        );
        merged.merge(report());
        assert_eq!(merged.findings()[0].severity, Severity::Critical);
        assert_eq!(merged.files(), &["a.sol".to_string(), "game.sol".to_string()]);
        assert_eq!(merged.contracts_scanned(), 2);
    }
}
