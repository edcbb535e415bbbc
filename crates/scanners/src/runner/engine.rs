use crate::analysis::version_parser::{parse_version, SolidityVersion};
use crate::core::{
    AnalysisContext, Finding, ParseError, RuleExecutionError, Scanner, ScannerConfig,
    RULE_ERROR_ID,
};
use crate::representations::{normalize, SoliditySource};
use crate::runner::registry::ScannerRegistry;
use crate::runner::report::ScanReport;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

pub struct ScanningEngine {
    scanners: Vec<Arc<dyn Scanner>>,
    config: Arc<ScannerConfig>,
}

impl ScanningEngine {
    pub fn new(config: ScannerConfig) -> Self {
        Self {
            scanners: Vec::new(),
            config: Arc::new(config),
        }
    }

    /// Engine with every built-in rule registered.
    pub fn with_defaults(config: ScannerConfig) -> Self {
        Self::new(config).with_scanners(ScannerRegistry::with_defaults().scanners())
    }

    pub fn add_scanner<S: Scanner + 'static>(mut self, scanner: S) -> Self {
        self.scanners.push(Arc::new(scanner));
        self
    }

    pub fn with_scanners(mut self, scanners: Vec<Arc<dyn Scanner>>) -> Self {
        self.scanners.extend(scanners);
        self
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Effective language version: the configured override, else the pragma.
    pub fn effective_version(&self, source: &SoliditySource) -> Option<SolidityVersion> {
        if let Some(requested) = &self.config.language_version {
            match parse_version(requested) {
                Some(version) => return Some(version),
                None => tracing::warn!(
                    "ignoring unparseable language_version '{}', using the pragma",
                    requested
                ),
            }
        }
        source.version.clone()
    }

    /// Rules that will run for `version`, in id order.
    pub fn active_scanners(&self, version: Option<&SolidityVersion>) -> Vec<Arc<dyn Scanner>> {
        let mut active: Vec<Arc<dyn Scanner>> = self
            .scanners
            .iter()
            .filter(|s| s.enabled_by_default() && self.config.is_rule_enabled(s.id()))
            .filter(|s| {
                let applies = s.is_active(version);
                if !applies {
                    tracing::debug!(rule = s.id(), "rule not applicable to language version");
                }
                applies
            })
            .cloned()
            .collect();
        active.sort_by_key(|s| s.id());
        active
    }

    /// Normalizes `source` and runs every active rule on each contract.
    ///
    /// A parse failure aborts with no partial results. A rule that errors or
    /// panics is replaced by a `rule-execution-error` finding and its siblings
    /// still run.
    pub fn run(&self, source: &SoliditySource) -> Result<ScanReport, ParseError> {
        let file = source.display_path().to_string();
        let contracts = normalize(&source.content)?;
        let version = self.effective_version(source);
        let scanners = self.active_scanners(version.as_ref());

        tracing::debug!(
            file = %file,
            contracts = contracts.len(),
            rules = scanners.len(),
            version = ?version.as_ref().map(ToString::to_string),
            "scanning source"
        );

        let mut findings = Vec::new();
        for contract in &contracts {
            let context = AnalysisContext::new(
                Arc::new(contract.clone()),
                file.clone(),
                version.clone(),
                self.config.clone(),
            );
            findings.extend(self.run_contract(&scanners, &context));
        }

        let findings: Vec<Finding> = findings
            .into_iter()
            .filter(|f| f.rule_id == RULE_ERROR_ID || self.config.is_rule_enabled(&f.rule_id))
            .collect();
        let findings = aggregate(findings, self.config.deduplication_enabled);

        tracing::info!(file = %file, findings = findings.len(), "scan complete");
        Ok(ScanReport::new(findings, vec![file], contracts.len()))
    }

    fn run_contract(&self, scanners: &[Arc<dyn Scanner>], context: &AnalysisContext) -> Vec<Finding> {
        if self.config.parallel_execution {
            scanners
                .par_iter()
                .flat_map_iter(|scanner| run_scanner(scanner.as_ref(), context))
                .collect()
        } else {
            scanners
                .iter()
                .flat_map(|scanner| run_scanner(scanner.as_ref(), context))
                .collect()
        }
    }
}

impl Default for ScanningEngine {
    fn default() -> Self {
        Self::with_defaults(ScannerConfig::default())
    }
}

fn run_scanner(scanner: &dyn Scanner, context: &AnalysisContext) -> Vec<Finding> {
    tracing::debug!(rule = scanner.id(), contract = %context.contract().name, "running rule");

    match panic::catch_unwind(AssertUnwindSafe(|| scanner.scan(context))) {
        Ok(Ok(findings)) => findings,
        Ok(Err(error)) => {
            tracing::warn!(rule = scanner.id(), contract = %context.contract().name, "rule failed: {:#}", error);
            match error.downcast_ref::<RuleExecutionError>() {
                Some(failure) => vec![context.rule_error(scanner.id(), failure)],
                None => vec![context.rule_error(
                    scanner.id(),
                    &RuleExecutionError::new(scanner.id(), format!("{:#}", error)),
                )],
            }
        }
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::warn!(rule = scanner.id(), contract = %context.contract().name, "rule panicked: {}", reason);
            vec![context.rule_error(
                scanner.id(),
                &RuleExecutionError::new(scanner.id(), format!("panicked: {}", reason)),
            )]
        }
    }
}

/// Collapses findings with the same identity into one entry carrying the hit
/// count, then orders the result for reporting. Deterministic for any input
/// order.
pub fn aggregate(findings: Vec<Finding>, deduplicate: bool) -> Vec<Finding> {
    let mut merged: Vec<Finding> = if deduplicate {
        let mut groups: BTreeMap<_, Finding> = BTreeMap::new();
        for finding in findings {
            let key = finding.dedup_key();
            match groups.get_mut(&key) {
                Some(existing) => {
                    existing.occurrences += finding.occurrences;
                    for variable in &finding.affected_variables {
                        if !existing.affected_variables.contains(variable) {
                            existing.affected_variables.push(variable.clone());
                        }
                    }
                    // Keep the earliest position as the representative.
                    if finding.report_order(existing).is_lt() {
                        let occurrences = existing.occurrences;
                        let variables = std::mem::take(&mut existing.affected_variables);
                        *existing = finding;
                        existing.occurrences = occurrences;
                        existing.affected_variables = variables;
                    }
                }
                None => {
                    groups.insert(key, finding);
                }
            }
        }
        groups.into_values().collect()
    } else {
        findings
    };

    merged.sort_by(|a, b| a.report_order(b).then_with(|| a.message.cmp(&b.message)));
    merged
}
