use crate::analysis::effect_order;
use crate::core::{AnalysisContext, Finding, Scanner, Severity};
use crate::impl_scanner;
use crate::representations::ir::CallTarget;
use anyhow::Result;

pub const RULE_ID: &str = "reentrant-state-update-after-external-call";

/// Checks-effects-interactions violations: an external call followed by a write
/// to state that an earlier guard checked. The guard is what makes the write
/// drain-relevant; a reentrant call sees the stale value and passes it again.
pub struct ClassicReentrancyScanner;

impl ClassicReentrancyScanner {
    pub fn new() -> Self {
        Self
    }

    fn scan_impl(&self, context: &AnalysisContext) -> Result<Vec<Finding>> {
        let contract = context.contract();
        let mut findings = Vec::new();

        for function in contract.functions.iter().filter(|f| f.has_body()) {
            let guards = context.guards(function)?;
            // A function the effect log cannot order only loses its own findings.
            let entries = match effect_order::track(function, contract) {
                Ok(entries) => entries,
                Err(failure) => {
                    tracing::warn!(rule = self.id(), function = %function.name, "{}", failure);
                    findings.push(context.rule_error(self.id(), &failure));
                    continue;
                }
            };

            for entry in &entries {
                let writes = entry.guarded_writes(&guards, function, contract);
                if writes.is_empty() {
                    continue;
                }

                let call = entry.call_site;
                let target = match &call.target {
                    CallTarget::External { receiver, member } => format!("{}.{}", receiver, member),
                    CallTarget::Internal { name } | CallTarget::Builtin { name } => name.clone(),
                };
                let updates: Vec<String> = writes
                    .iter()
                    .map(|w| format!("`{}` (line {})", w.text, w.span.line))
                    .collect();

                let mut finding = Finding::new(
                    RULE_ID,
                    Severity::Critical,
                    format!("State updated after external call in '{}'", function.name),
                    format!(
                        "Function '{}' calls {} at line {} and only afterwards updates checked state: {}. \
                         The callee can re-enter '{}' while the guard still sees the old value.",
                        function.name,
                        target,
                        call.span.line,
                        updates.join(", "),
                        function.name
                    ),
                )
                .with_location(
                    context
                        .statement_location(function, call.statement_index, call.span)
                        .with_snippet(call.text.clone()),
                )
                .with_contract(&contract.name)
                .with_impact("A reentrant caller can repeat the guarded action and drain funds before state catches up.")
                .with_recommendation(
                    "Apply the updates before the external call (checks-effects-interactions) \
                     or protect the function with a reentrancy lock.",
                );
                for write in &writes {
                    finding = finding.with_variable(&write.variable);
                }
                findings.push(finding);
            }
        }

        Ok(findings)
    }
}

impl Default for ClassicReentrancyScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl_scanner!(
    ClassicReentrancyScanner,
    id: "classic-reentrancy",
    name: "Classic Reentrancy Scanner",
    severity: Severity::Critical,
    rule_ids: &[RULE_ID],
    description: "Detects guarded state written after an external call (checks-effects-interactions violation)"
);
