//! Rule trait for pluggable vulnerability detection.
//!
//! Every rule is an independent [`Scanner`] over one contract's normalized IR.
//! Rules share no mutable state, so the engine may run them in any order or in
//! parallel, and a rule that fails only loses its own findings.
//!
//! A rule may emit several finding kinds (`rule_ids`); `id` names the rule
//! itself for registry lookup, `--disable` and failure reporting.

use crate::analysis::version_parser::SolidityVersion;
use crate::core::{AnalysisContext, Finding, Severity};
use anyhow::Result;

pub trait Scanner: Send + Sync {
    fn id(&self) -> &'static str;

    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str {
        "No description provided"
    }

    /// Highest severity this rule reports.
    fn severity(&self) -> Severity;

    /// Finding kinds this rule can emit.
    fn rule_ids(&self) -> &'static [&'static str];

    fn scan(&self, context: &AnalysisContext) -> Result<Vec<Finding>>;

    /// Whether the rule applies to sources targeting `version` (`None` when
    /// the version is unknown).
    fn is_active(&self, _version: Option<&SolidityVersion>) -> bool {
        true
    }

    fn enabled_by_default(&self) -> bool {
        true
    }
}

#[macro_export]
macro_rules! impl_scanner {
    (
        $scanner:ty,
        id: $id:expr,
        name: $name:expr,
        severity: $severity:expr,
        rule_ids: $rule_ids:expr
        $(, description: $description:expr)?
    ) => {
        impl $crate::core::Scanner for $scanner {
            fn id(&self) -> &'static str {
                $id
            }

            fn name(&self) -> &'static str {
                $name
            }

            fn severity(&self) -> $crate::core::Severity {
                $severity
            }

            fn rule_ids(&self) -> &'static [&'static str] {
                $rule_ids
            }

            $(
                fn description(&self) -> &'static str {
                    $description
                }
            )?

            fn scan(
                &self,
                context: &$crate::core::AnalysisContext,
            ) -> anyhow::Result<Vec<$crate::core::Finding>> {
                self.scan_impl(context)
            }
        }
    };
}
