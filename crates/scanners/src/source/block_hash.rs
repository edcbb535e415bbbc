//! Historical block hash misuse
//!
//! `blockhash(n)` only answers for the most recent blocks (the horizon, 256 on
//! mainnet); for anything older it returns zero. A game that settles a
//! commitment against `blockhash(committedBlock)` without bounding the distance
//! can be won by waiting out the window and guessing `0x0`.

use crate::analysis::provenance::{self, BlockHashUse};
use crate::core::{AnalysisContext, Finding, Severity};
use crate::impl_scanner;
use crate::representations::ir::{Contract, Function};
use anyhow::Result;

pub const STALE_RULE: &str = "stale-block-hash-reference";
pub const SENTINEL_RULE: &str = "unguarded-sentinel-equality";

pub struct BlockHashScanner;

impl BlockHashScanner {
    pub fn new() -> Self {
        Self
    }

    fn stale(&self, context: &AnalysisContext, contract: &Contract, function: &Function, usage: &BlockHashUse) -> Finding {
        let horizon = context.config().block_hash_horizon;
        Finding::new(
            STALE_RULE,
            Severity::Critical,
            format!("Block hash used without recency check in '{}'", function.name),
            format!(
                "blockhash({}) from line {} is consumed by `{}` but '{}' never requires the block \
                 height to be within the last {} blocks; older heights yield a zero hash.",
                usage.height.text, usage.call_span.line, usage.text, function.name, horizon
            ),
        )
        .with_location(
            context
                .statement_location(function, usage.statement_index, usage.span)
                .with_snippet(usage.text.clone()),
        )
        .with_contract(&contract.name)
        .with_impact("The outcome becomes predictable once the referenced block leaves the hash window.")
        .with_recommendation(format!(
            "Require `block.number - height <= {}` (and `height < block.number`) before reading the hash, \
             or use a commit-reveal or oracle source of randomness.",
            horizon
        ))
    }

    fn sentinel(&self, context: &AnalysisContext, contract: &Contract, function: &Function, usage: &BlockHashUse) -> Finding {
        Finding::new(
            SENTINEL_RULE,
            Severity::Medium,
            format!("Block hash compared without excluding zero in '{}'", function.name),
            format!(
                "`{}` compares the result of blockhash({}) for equality without first ruling out the \
                 all-zero value returned for unavailable blocks.",
                usage.text, usage.height.text
            ),
        )
        .with_location(
            context
                .statement_location(function, usage.statement_index, usage.span)
                .with_snippet(usage.text.clone()),
        )
        .with_contract(&contract.name)
        .with_impact("A guess of zero matches every expired block hash.")
        .with_recommendation("Reject a zero hash (`require(hash != 0)`) before comparing it.")
    }

    fn scan_impl(&self, context: &AnalysisContext) -> Result<Vec<Finding>> {
        let contract = context.contract();
        let horizon = context.config().block_hash_horizon;
        let mut findings = Vec::new();

        for function in contract.functions.iter().filter(|f| provenance::analysable(f)) {
            let guards = context.guards(function)?;
            for usage in provenance::block_hash_uses(function, contract, &guards, horizon) {
                if !usage.window_guarded {
                    findings.push(self.stale(context, contract, function, &usage));
                }
                if usage.equality && !usage.sentinel_excluded {
                    findings.push(self.sentinel(context, contract, function, &usage));
                }
            }
        }

        Ok(findings)
    }
}

impl Default for BlockHashScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl_scanner!(
    BlockHashScanner,
    id: "block-hash",
    name: "Block Hash Horizon Scanner",
    severity: Severity::Critical,
    rule_ids: &[STALE_RULE, SENTINEL_RULE],
    description: "Detects block hashes consumed without a recency window or zero-sentinel check"
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Scanner, ScannerConfig};
    use crate::representations::normalize;
    use std::sync::Arc;

    const GAME: &str = r#"pragma solidity ^0.4.24;
contract Prediction {
    struct Guess { uint height; bytes32 guess; }
    mapping(address => Guess) guesses;
    function lockInGuess(bytes32 hash) public payable {
        guesses[msg.sender].guess = hash;
        guesses[msg.sender].height = block.number + 1;
    }
    function settle() public {
        bytes32 answer = blockhash(guesses[msg.sender].height);
        if (guesses[msg.sender].guess == answer) {
            msg.sender.transfer(2 ether);
        }
    }
}
"#;

    fn scan_with(source: &str, config: ScannerConfig) -> Vec<Finding> {
        let contract = Arc::new(normalize(source).unwrap().remove(0));
        let context = AnalysisContext::new(contract, "game.sol", None, Arc::new(config));
        BlockHashScanner::new().scan(&context).unwrap()
    }

    #[test]
    fn test_stale_and_sentinel_findings() {
        let findings = scan_with(GAME, ScannerConfig::default());
        let rules: Vec<_> = findings.iter().map(|f| f.rule_id.as_str()).collect();
        assert_eq!(rules, vec![STALE_RULE, SENTINEL_RULE]);
        assert!(findings.iter().all(|f| f.location.line == 11));
        assert_eq!(findings[0].severity, Severity::Critical);
        assert_eq!(findings[1].severity, Severity::Medium);
    }

    #[test]
    fn test_guarded_settlement_is_clean() {
        let source = GAME.replace(
            "        bytes32 answer",
            "        require(block.number - guesses[msg.sender].height <= 256);\n        bytes32 answer",
        )
        .replace(
            "if (guesses[msg.sender].guess == answer)",
            "if (answer != 0 && guesses[msg.sender].guess == answer)",
        );
        assert!(scan_with(&source, ScannerConfig::default()).is_empty());
    }

    #[test]
    fn test_horizon_comes_from_config() {
        let source = GAME.replace(
            "        bytes32 answer",
            "        require(block.number - guesses[msg.sender].height <= 256);\n        bytes32 answer",
        );
        let strict = ScannerConfig {
            block_hash_horizon: 128,
            ..ScannerConfig::default()
        };
        let rules: Vec<_> = scan_with(&source, strict)
            .into_iter()
            .map(|f| f.rule_id)
            .collect();
        assert!(rules.contains(&STALE_RULE.to_string()));

        let rules: Vec<_> = scan_with(&source, ScannerConfig::default())
            .into_iter()
            .map(|f| f.rule_id)
            .collect();
        assert_eq!(rules, vec![SENTINEL_RULE.to_string()]);
    }
}
