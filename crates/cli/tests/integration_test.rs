use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

const BANK: &str = r#"pragma solidity ^0.4.24;
contract Bank {
    mapping(address => uint) bal;
    function withdraw(address s, uint amt) public {
        require(bal[s] >= amt);
        s.transfer(amt);
        bal[s] -= amt;
    }
}
"#;

const SAFE_BANK: &str = r#"pragma solidity ^0.8.0;
contract SafeBank {
    mapping(address => uint) bal;
    function withdraw(uint amt) public {
        require(bal[msg.sender] >= amt);
        bal[msg.sender] -= amt;
        payable(msg.sender).transfer(amt);
    }
}
"#;

fn solaudit(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_solaudit"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute solaudit")
}

fn write(dir: &Path, name: &str, content: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path.to_str().unwrap().to_string()
}

#[test]
fn test_scan_reports_reentrancy_as_json() {
    let temp_dir = TempDir::new().unwrap();
    let input = write(temp_dir.path(), "bank.sol", BANK);

    let output = solaudit(&["scan", "--input", &input, "--format", "json"]);
    assert_eq!(output.status.code(), Some(1), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["summary"]["total"], 1);
    assert_eq!(json["findings"][0]["rule_id"], "reentrant-state-update-after-external-call");
    assert_eq!(json["findings"][0]["location"]["line"], 6);
}

#[test]
fn test_clean_contract_exits_zero() {
    let temp_dir = TempDir::new().unwrap();
    let input = write(temp_dir.path(), "safe.sol", SAFE_BANK);

    let output = solaudit(&["scan", "--input", &input]);
    assert_eq!(output.status.code(), Some(0), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert!(String::from_utf8_lossy(&output.stdout).contains("No findings"));
}

#[test]
fn test_parse_failure_exits_two() {
    let temp_dir = TempDir::new().unwrap();
    let input = write(temp_dir.path(), "broken.sol", "contract Broken {\n    function f( {\n}\n");

    let output = solaudit(&["scan", "--input", &input]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("broken.sol"));
    assert!(output.stdout.is_empty());
}

#[test]
fn test_directory_scan_with_markdown() {
    let temp_dir = TempDir::new().unwrap();
    write(temp_dir.path(), "bank.sol", BANK);
    write(temp_dir.path(), "safe.sol", SAFE_BANK);
    write(temp_dir.path(), "notes.txt", "not solidity");

    let dir = temp_dir.path().to_str().unwrap();
    let output = solaudit(&["scan", "--input", dir, "--format", "markdown"]);
    assert_eq!(output.status.code(), Some(1));

    let markdown = String::from_utf8_lossy(&output.stdout);
    assert!(markdown.contains("## Executive Summary"));
    assert!(markdown.contains("**Contracts Scanned**: 2"));
    assert!(markdown.contains("**Location**:"));
    assert!(markdown.contains("**Recommendation**:"));
}

#[test]
fn test_config_file_and_disable_flag() {
    let temp_dir = TempDir::new().unwrap();
    let input = write(temp_dir.path(), "bank.sol", BANK);

    let output = solaudit(&["scan", "--input", &input, "--disable", "classic-reentrancy"]);
    assert_eq!(output.status.code(), Some(0));

    write(temp_dir.path(), ".solaudit.toml", "disabled_rules = [\"classic-reentrancy\"]\n");
    let output = solaudit(&["scan", "--input", &input, "--sequential"]);
    assert_eq!(output.status.code(), Some(0));

    let output = solaudit(&["scan", "--input", &input, "--disable", "no-such-rule"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_solc_version_flag_gates_rules() {
    let temp_dir = TempDir::new().unwrap();
    let input = write(
        temp_dir.path(),
        "lock.sol",
        "contract TimeLock {\n    mapping(address => uint) lockTime;\n    function increase(uint s) public {\n        lockTime[msg.sender] += s;\n    }\n}\n",
    );

    let output = solaudit(&["scan", "--input", &input]);
    assert_eq!(output.status.code(), Some(0));

    let output = solaudit(&["scan", "--input", &input, "--solc-version", "0.4.24", "--format", "json"]);
    assert_eq!(output.status.code(), Some(1));
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["findings"][0]["rule_id"], "unchecked-arithmetic-overflow");

    let output = solaudit(&["scan", "--input", &input, "--solc-version", "newest"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_rules_listing() {
    let output = solaudit(&["rules", "--json"]);
    assert!(output.status.success());

    let rules: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let ids: Vec<&str> = rules
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap())
        .collect();
    assert_eq!(
        ids,
        vec!["block-hash", "classic-reentrancy", "hardcoded-authority", "integer-overflow", "storage-pointer"]
    );
}
