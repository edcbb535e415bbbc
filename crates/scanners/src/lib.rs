//! solaudit scanners: rule-based detection of Solidity vulnerability classes
//!
//! Sources are normalized into a per-contract IR, analysed by independent rules
//! (storage-pointer aliasing, reentrancy after external calls, hardcoded
//! authority addresses, stale block hashes, unchecked arithmetic) and reported
//! as a deduplicated, severity-ordered list of findings.

pub mod analysis;
pub mod core;
pub mod representations;
pub mod runner;
pub mod source;

pub use core::{
    AnalysisContext, Finding, Location, ParseError, RenderError, RuleExecutionError, Scanner,
    ScannerConfig, Severity, RULE_ERROR_ID,
};

pub use representations::{normalize, Contract, SoliditySource};

pub use runner::{MarkdownOptions, ScanReport, ScannerRegistry, ScanningEngine};

pub use source::{
    BlockHashScanner, ClassicReentrancyScanner, HardcodedAuthorityScanner, IntegerOverflowScanner,
    StoragePointerScanner,
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Scans one source with every built-in rule.
pub fn scan_source(source: &SoliditySource, config: ScannerConfig) -> Result<ScanReport, ParseError> {
    ScanningEngine::with_defaults(config).run(source)
}
