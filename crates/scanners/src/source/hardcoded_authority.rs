use crate::analysis::provenance::{self, LiteralOrigin};
use crate::core::{AnalysisContext, Finding, Severity};
use crate::impl_scanner;
use anyhow::Result;

pub const RULE_ID: &str = "hardcoded-authority-address";

pub struct HardcodedAuthorityScanner;

impl HardcodedAuthorityScanner {
    pub fn new() -> Self {
        Self
    }

    fn scan_impl(&self, context: &AnalysisContext) -> Result<Vec<Finding>> {
        let contract = context.contract();
        let aliases = &context.config().sender_aliases;

        let findings = provenance::hardcoded_authorities(contract, aliases)
            .into_iter()
            .map(|authority| {
                let variable = authority.variable;
                let origin = match authority.origin {
                    LiteralOrigin::Initializer => "initialized with".to_string(),
                    LiteralOrigin::Constructor { line } => {
                        format!("assigned in the constructor (line {}) to", line)
                    }
                };
                let mut gates: Vec<String> = authority
                    .uses
                    .iter()
                    .map(|u| format!("'{}' (line {})", u.function, u.span.line))
                    .collect();
                gates.dedup();

                Finding::new(
                    RULE_ID,
                    Severity::Critical,
                    format!("Hardcoded authority address '{}'", variable.name),
                    format!(
                        "State variable '{}' is {} the literal address {} and gates caller authorization in {}.",
                        variable.name,
                        origin,
                        authority.literal,
                        gates.join(", ")
                    ),
                )
                .with_location(context.location(variable.span).with_snippet(variable.text.clone()))
                .with_contract(&contract.name)
                .with_variable(&variable.name)
                .with_impact(
                    "The privileged key is fixed in bytecode with no rotation path; anyone who \
                     controls or recovers that address owns the contract forever.",
                )
                .with_recommendation(
                    "Take the authority from a constructor parameter (or msg.sender at deployment) \
                     and provide an owner-only transfer function.",
                )
            })
            .collect();

        Ok(findings)
    }
}

impl Default for HardcodedAuthorityScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl_scanner!(
    HardcodedAuthorityScanner,
    id: "hardcoded-authority",
    name: "Hardcoded Authority Scanner",
    severity: Severity::Critical,
    rule_ids: &[RULE_ID],
    description: "Detects literal addresses used as the authority in msg.sender comparisons"
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Scanner, ScannerConfig};
    use crate::representations::normalize;
    use std::sync::Arc;

    fn scan_with(source: &str, config: ScannerConfig) -> Vec<Finding> {
        let contract = Arc::new(normalize(source).unwrap().remove(0));
        let context = AnalysisContext::new(contract, "auth.sol", None, Arc::new(config));
        HardcodedAuthorityScanner::new().scan(&context).unwrap()
    }

    const CHALLENGE: &str = r#"contract Challenge {
    address owner = 0x6B477781b0e68031109f21887e6B5afEAaEB002b;
    address public winner;
    function claim(address sender) public {
        require(sender == owner);
        winner = sender;
    }
}
"#;

    #[test]
    fn test_flags_declaration_once() {
        let findings = scan_with(CHALLENGE, ScannerConfig::default());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].location.line, 2);
        assert_eq!(findings[0].location.function, None);
        assert!(findings[0].message.contains("'claim' (line 5)"));
    }

    #[test]
    fn test_sender_aliases_are_configurable() {
        let config = ScannerConfig {
            sender_aliases: Vec::new(),
            ..ScannerConfig::default()
        };
        assert!(scan_with(CHALLENGE, config).is_empty());
    }

    #[test]
    fn test_parameter_initialized_owner_is_clean() {
        let findings = scan_with(
            r#"contract Owned {
    address owner;
    constructor(address initial) public { owner = initial; }
    function f() public { require(msg.sender == owner); }
}
"#,
            ScannerConfig::default(),
        );
        assert!(findings.is_empty());
    }
}
