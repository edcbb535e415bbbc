//! Storage-pointer aliasing
//!
//! Before solc 0.5 a struct, array or mapping local without a data location was
//! a storage pointer, and locals were visible in the whole function. A pointer
//! that is never assigned points at slot 0, so writes through it overwrite
//! whatever the contract keeps there (typically an array length or the owner).
//! Two shapes of the same defect are reported:
//!
//! * a branch that uses a storage-typed name declared only in a sibling branch,
//! * a storage-typed local declared without an initializer.

use crate::analysis::scope_resolver;
use crate::analysis::version_parser::SolidityVersion;
use crate::core::{AnalysisContext, Finding, Scanner, Severity};
use crate::representations::ir::{Contract, Function};
use anyhow::Result;

pub const CROSS_BRANCH_RULE: &str = "cross-branch-unbound-storage-reference";
pub const UNINITIALIZED_RULE: &str = "uninitialized-storage-pointer";

pub struct StoragePointerScanner;

impl StoragePointerScanner {
    pub fn new() -> Self {
        Self
    }

    fn cross_branch(&self, context: &AnalysisContext, contract: &Contract, function: &Function) -> Vec<Finding> {
        let resolution = scope_resolver::resolve(function, contract);

        resolution
            .cross_branch_uses(function)
            .into_iter()
            .map(|cross| {
                let binding = cross.binding;
                let reference = &cross.reference;
                let snippet = function
                    .statement(reference.statement_index)
                    .map(|s| s.text.clone())
                    .unwrap_or_default();

                Finding::new(
                    CROSS_BRANCH_RULE,
                    Severity::Critical,
                    format!("Storage pointer '{}' used outside its branch", binding.name),
                    format!(
                        "'{}' is declared as a storage reference of type {} at line {} in another branch of \
                         function '{}', but this branch never declares it. The reference is unbound here and \
                         resolves to an uninitialized storage pointer that aliases slot 0.",
                        binding.name, binding.type_name, binding.span.line, function.name
                    ),
                )
                .with_location(
                    context
                        .statement_location(function, reference.statement_index, reference.span)
                        .with_snippet(snippet),
                )
                .with_contract(&contract.name)
                .with_variable(&binding.name)
                .with_impact(
                    "Writes through the pointer overwrite the contract's first storage slots \
                     (array lengths, owner addresses), corrupting state or handing over control.",
                )
                .with_recommendation(format!(
                    "Declare and initialize '{}' in every branch that uses it, pointing at the intended \
                     storage location, or use `memory` for a temporary copy.",
                    binding.name
                ))
            })
            .collect()
    }

    fn uninitialized(&self, context: &AnalysisContext, contract: &Contract, function: &Function) -> Vec<Finding> {
        function
            .storage_bindings
            .iter()
            .filter(|b| !b.initialized)
            .map(|binding| {
                let snippet = function
                    .statement(binding.statement_index)
                    .map(|s| s.text.clone())
                    .unwrap_or_default();
                let declared = if binding.explicit {
                    "explicitly declared `storage`"
                } else {
                    "a reference type with no data location"
                };

                Finding::new(
                    UNINITIALIZED_RULE,
                    Severity::Critical,
                    format!("Uninitialized storage pointer '{}'", binding.name),
                    format!(
                        "Local '{}' in function '{}' is {} and is never assigned, so it points at storage slot 0.",
                        binding.name, function.name, declared
                    ),
                )
                .with_location(
                    context
                        .statement_location(function, binding.statement_index, binding.span)
                        .with_snippet(snippet),
                )
                .with_contract(&contract.name)
                .with_variable(&binding.name)
                .with_impact("Member writes through the pointer overwrite the first state variables.")
                .with_recommendation("Initialize the pointer from a storage variable or declare it `memory`.")
            })
            .collect()
    }
}

impl Default for StoragePointerScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl Scanner for StoragePointerScanner {
    fn id(&self) -> &'static str {
        "storage-pointer"
    }

    fn name(&self) -> &'static str {
        "Storage Pointer Aliasing Scanner"
    }

    fn description(&self) -> &'static str {
        "Detects storage-typed locals used outside their declaring branch or left uninitialized (solc < 0.5)"
    }

    fn severity(&self) -> Severity {
        Severity::Critical
    }

    fn rule_ids(&self) -> &'static [&'static str] {
        &[CROSS_BRANCH_RULE, UNINITIALIZED_RULE]
    }

    /// solc 0.5 rejects both shapes at compile time; an unknown version is
    /// treated as old.
    fn is_active(&self, version: Option<&SolidityVersion>) -> bool {
        version.map_or(true, SolidityVersion::has_implicit_storage_pointers)
    }

    fn scan(&self, context: &AnalysisContext) -> Result<Vec<Finding>> {
        let contract = context.contract();
        let mut findings = Vec::new();

        for function in contract.functions.iter().filter(|f| f.has_body()) {
            findings.extend(self.cross_branch(context, contract, function));
            findings.extend(self.uninitialized(context, contract, function));
        }

        Ok(findings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ScannerConfig;
    use crate::representations::normalize;
    use std::sync::Arc;

    fn scan(source: &str) -> Vec<Finding> {
        let contract = Arc::new(normalize(source).unwrap().remove(0));
        let context = AnalysisContext::new(contract, "store.sol", None, Arc::new(ScannerConfig::default()));
        StoragePointerScanner::new().scan(&context).unwrap()
    }

    #[test]
    fn test_uninitialized_implicit_pointer() {
        let findings = scan(
            r#"contract Registry {
    struct Rec { address owner; }
    address admin;
    function register() public {
        Rec r;
        r.owner = msg.sender;
    }
}
"#,
        );
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].rule_id, UNINITIALIZED_RULE);
        assert_eq!(findings[0].location.line, 5);
        assert_eq!(findings[0].location.statement_index, Some(0));
    }

    #[test]
    fn test_memory_local_is_not_a_pointer() {
        let findings = scan(
            r#"contract Registry {
    struct Rec { address owner; }
    function register() public {
        Rec memory r;
        r.owner = msg.sender;
    }
}
"#,
        );
        assert!(findings.is_empty());
    }

    #[test]
    fn test_version_gate() {
        let scanner = StoragePointerScanner::new();
        assert!(scanner.is_active(None));
        assert!(scanner.is_active(Some(&SolidityVersion::new(0, 4, 24))));
        assert!(!scanner.is_active(Some(&SolidityVersion::new(0, 5, 0))));
    }
}
