use anyhow::Result;
use solaudit_scanners::{
    ParseError, ScannerConfig, ScanningEngine, Severity, SoliditySource, RULE_ERROR_ID,
};

const EVERYTHING: &str = r#"pragma solidity ^0.4.24;
contract Everything {
    struct Record { address owner; }
    address owner = 0x6B477781b0e68031109f21887e6B5afEAaEB002b;
    mapping(address => uint) bal;
    mapping(uint => Record) records;
    uint lockTime;
    function claim(address sender) public {
        require(sender == owner);
        lockTime += 1;
    }
    function withdraw(uint amt) public {
        require(bal[msg.sender] >= amt);
        msg.sender.transfer(amt);
        bal[msg.sender] -= amt;
    }
    function update(uint id, bool create) public {
        if (create) {
            Record storage r = records[id];
            r.owner = msg.sender;
        } else {
            r.owner = msg.sender;
        }
    }
    function settle(bytes32 guess) public {
        if (blockhash(lockTime) == guess) {
            msg.sender.transfer(1 ether);
        }
    }
    function raw() public {
        assembly { let x := 1 }
    }
}
"#;

fn source() -> SoliditySource {
    SoliditySource::new(EVERYTHING).with_file_path("everything.sol")
}

#[test]
fn test_failing_rule_is_isolated() -> Result<()> {
    let report = ScanningEngine::with_defaults(ScannerConfig::default()).run(&source())?;
    let rules: Vec<&str> = report.findings().iter().map(|f| f.rule_id.as_str()).collect();

    for expected in [
        "hardcoded-authority-address",
        "cross-branch-unbound-storage-reference",
        "stale-block-hash-reference",
        "unguarded-sentinel-equality",
        "unchecked-arithmetic-overflow",
        "reentrant-state-update-after-external-call",
        RULE_ERROR_ID,
    ] {
        assert!(rules.contains(&expected), "missing {} in {:?}", expected, rules);
    }

    let reentrancy = report
        .findings()
        .iter()
        .find(|f| f.rule_id == "reentrant-state-update-after-external-call")
        .expect("reentrancy finding outside the assembly function");
    assert_eq!(reentrancy.location.function.as_deref(), Some("withdraw"));
    assert_eq!(reentrancy.location.line, 14);

    let failure = report
        .findings()
        .iter()
        .find(|f| f.rule_id == RULE_ERROR_ID)
        .expect("rule failure finding");
    assert_eq!(failure.severity, Severity::Low);
    assert_eq!(failure.failed_rule.as_deref(), Some("classic-reentrancy"));
    assert_eq!(failure.location.function.as_deref(), Some("raw"));
    assert_eq!(failure.location.line, 31);
    Ok(())
}

#[test]
fn test_json_is_byte_identical_across_runs() -> Result<()> {
    let engine = ScanningEngine::with_defaults(ScannerConfig::default());
    let first = engine.run(&source())?.to_json()?;
    let second = engine.run(&source())?.to_json()?;
    assert_eq!(first, second);

    let sequential = ScanningEngine::with_defaults(ScannerConfig {
        parallel_execution: false,
        ..ScannerConfig::default()
    });
    assert_eq!(sequential.run(&source())?.to_json()?, first);
    Ok(())
}

#[test]
fn test_findings_are_severity_ordered() -> Result<()> {
    let report = ScanningEngine::with_defaults(ScannerConfig::default()).run(&source())?;
    let findings = report.findings();
    assert!(!findings.is_empty());
    for pair in findings.windows(2) {
        assert!(pair[0].severity >= pair[1].severity);
        if pair[0].severity == pair[1].severity {
            assert!(pair[0].location.line <= pair[1].location.line);
        }
    }
    assert_eq!(findings[0].severity, Severity::Critical);
    assert!(report.has_blocking_findings());
    Ok(())
}

#[test]
fn test_disabled_rules_and_version_override() -> Result<()> {
    let config = ScannerConfig {
        disabled_rules: vec!["block-hash".to_string(), "unchecked-arithmetic-overflow".to_string()],
        language_version: Some("0.5.0".to_string()),
        ..ScannerConfig::default()
    };
    let report = ScanningEngine::with_defaults(config).run(&source())?;
    let rules: Vec<&str> = report.findings().iter().map(|f| f.rule_id.as_str()).collect();

    assert!(!rules.contains(&"stale-block-hash-reference"));
    assert!(!rules.contains(&"unchecked-arithmetic-overflow"));
    assert!(!rules.contains(&"cross-branch-unbound-storage-reference"));
    assert!(rules.contains(&"hardcoded-authority-address"));
    Ok(())
}

#[test]
fn test_parse_error_yields_no_findings() {
    let broken = SoliditySource::new("pragma solidity ^0.4.24;\ncontract A {\n    function f() public {\n        uint x = ;\n    }\n}\n");
    let err = ScanningEngine::with_defaults(ScannerConfig::default())
        .run(&broken)
        .unwrap_err();
    assert_eq!(err.line(), Some(4));

    let free = SoliditySource::new("function f() pure returns (uint) { return 1; }\n");
    assert!(matches!(
        ScanningEngine::default().run(&free),
        Err(ParseError::Unsupported { .. })
    ));
}
