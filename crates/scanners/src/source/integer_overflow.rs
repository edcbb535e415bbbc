//! Unchecked arithmetic on state
//!
//! Before solc 0.8 integer arithmetic wraps silently; from 0.8 on it only wraps
//! inside `unchecked { }`. A state variable updated with `+=`, `-=`, `*=` or
//! `x = x op y` and never bounded by a guard can be pushed around the modulus,
//! which is how a time lock gets released early.

use crate::analysis::effect_order::{self, StateWrite};
use crate::core::{AnalysisContext, Finding, Severity};
use crate::impl_scanner;
use crate::representations::ir::{Contract, Expr, ExprKind, Function};
use anyhow::Result;

pub const RULE_ID: &str = "unchecked-arithmetic-overflow";

const COMPOUND: &[&str] = &["+=", "-=", "*="];
const WRAPPING: &[&str] = &["+", "-", "*"];

pub struct IntegerOverflowScanner;

impl IntegerOverflowScanner {
    pub fn new() -> Self {
        Self
    }

    /// `x = x + y` style writes: the assigned value is arithmetic over the
    /// written variable itself.
    fn is_self_arithmetic(function: &Function, write: &StateWrite) -> bool {
        let Some(statement) = function.statement(write.statement_index) else {
            return false;
        };
        statement.expressions().into_iter().any(|expr| {
            expr.any(&|e: &Expr| match &e.kind {
                ExprKind::Assign { target, operator, value } if operator == "=" && e.span == write.span => {
                    let root = target.root_identifier();
                    match &value.strip_casts().kind {
                        ExprKind::Binary { operator, .. } if WRAPPING.contains(&operator.as_str()) => {
                            value.identifiers().into_iter().any(|n| Some(n) == root || n == write.variable)
                        }
                        _ => false,
                    }
                }
                _ => false,
            })
        })
    }

    fn is_arithmetic(function: &Function, write: &StateWrite) -> bool {
        COMPOUND.contains(&write.operator.as_str())
            || (write.operator == "=" && Self::is_self_arithmetic(function, write))
    }

    fn finding(&self, context: &AnalysisContext, contract: &Contract, function: &Function, write: &StateWrite, unchecked: bool) -> Finding {
        let reason = if unchecked {
            "inside an `unchecked` block".to_string()
        } else {
            match context.version() {
                Some(version) => format!("compiled for solc {}, which does not check arithmetic", version),
                None => "without overflow checks".to_string(),
            }
        };

        Finding::new(
            RULE_ID,
            Severity::High,
            format!("Unchecked arithmetic on '{}'", write.variable),
            format!(
                "`{}` in '{}' updates state variable '{}' {} and no earlier guard bounds it.",
                write.text, function.name, write.variable, reason
            ),
        )
        .with_location(
            context
                .statement_location(function, write.statement_index, write.span)
                .with_snippet(write.text.clone()),
        )
        .with_contract(&contract.name)
        .with_variable(&write.variable)
        .with_impact("The value can wrap around, e.g. releasing a time lock early or minting a huge balance.")
        .with_recommendation(
            "Compile with solc >= 0.8 outside `unchecked`, use SafeMath, or require the bound before the update.",
        )
    }

    fn scan_impl(&self, context: &AnalysisContext) -> Result<Vec<Finding>> {
        let contract = context.contract();
        let wrapping_version = context
            .version()
            .is_some_and(|v| !v.has_builtin_overflow_protection());
        let mut findings = Vec::new();

        for function in contract.functions.iter().filter(|f| f.has_body()) {
            let guards = context.guards(function)?;
            for write in effect_order::state_writes(function, contract) {
                if !Self::is_arithmetic(function, &write) {
                    continue;
                }
                let unchecked = function
                    .statement(write.statement_index)
                    .is_some_and(|s| function.is_in_unchecked(s.block));
                if !wrapping_version && !unchecked {
                    continue;
                }
                if effect_order::is_guarded(&write.variable, write.statement_index, &guards, function, contract) {
                    continue;
                }
                findings.push(self.finding(context, contract, function, &write, unchecked));
            }
        }

        Ok(findings)
    }
}

impl Default for IntegerOverflowScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl_scanner!(
    IntegerOverflowScanner,
    id: "integer-overflow",
    name: "Unchecked Arithmetic Scanner",
    severity: Severity::High,
    rule_ids: &[RULE_ID],
    description: "Detects unguarded state arithmetic without overflow checks (solc < 0.8 or unchecked blocks)"
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::version_parser::SolidityVersion;
    use crate::core::{Scanner, ScannerConfig};
    use crate::representations::normalize;
    use std::sync::Arc;

    fn scan(source: &str, version: Option<SolidityVersion>) -> Vec<Finding> {
        let contract = Arc::new(normalize(source).unwrap().remove(0));
        let context = AnalysisContext::new(contract, "vault.sol", version, Arc::new(ScannerConfig::default()));
        IntegerOverflowScanner::new().scan(&context).unwrap()
    }

    const VAULT: &str = r#"contract TimeLock {
    mapping(address => uint) balances;
    mapping(address => uint) lockTime;
    function deposit() public payable {
        balances[msg.sender] = balances[msg.sender] + msg.value;
        lockTime[msg.sender] = now + 1 weeks;
    }
    function increaseLockTime(uint _secondsToIncrease) public {
        lockTime[msg.sender] += _secondsToIncrease;
    }
    function withdraw() public {
        require(balances[msg.sender] > 0);
        balances[msg.sender] -= 1;
    }
}
"#;

    #[test]
    fn test_pre_08_unguarded_writes() {
        let findings = scan(VAULT, Some(SolidityVersion::new(0, 4, 24)));
        let lines: Vec<_> = findings.iter().map(|f| f.location.line).collect();
        assert_eq!(lines, vec![5, 9]);
        assert_eq!(findings[1].affected_variables, vec!["lockTime"]);
        assert!(findings.iter().all(|f| f.severity == Severity::High));
    }

    #[test]
    fn test_checked_versions_and_unknown_version_are_clean() {
        assert!(scan(VAULT, Some(SolidityVersion::new(0, 8, 0))).is_empty());
        assert!(scan(VAULT, None).is_empty());
    }

    #[test]
    fn test_unchecked_block_on_08() {
        let findings = scan(
            r#"contract Counter {
    uint total;
    function bump(uint by) public {
        unchecked {
            total += by;
        }
        total += by;
    }
}
"#,
            Some(SolidityVersion::new(0, 8, 19)),
        );
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].location.line, 5);
        assert!(findings[0].message.contains("unchecked"));
    }
}
