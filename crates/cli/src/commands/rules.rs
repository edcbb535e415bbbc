use crate::commands::Outcome;
use anyhow::Result;
use clap::Args;
use colored::*;
use serde_json::json;
use solaudit_scanners::ScannerRegistry;

#[derive(Args, Clone, Debug)]
pub struct RulesArgs {
    /// Print the rule list as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn execute(args: &RulesArgs) -> Result<Outcome> {
    let registry = ScannerRegistry::with_defaults();
    let scanners = registry.scanners();

    if args.json {
        let rules: Vec<_> = scanners
            .iter()
            .map(|s| {
                json!({
                    "id": s.id(),
                    "name": s.name(),
                    "severity": s.severity(),
                    "findings": s.rule_ids(),
                    "description": s.description(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rules)?);
        return Ok(Outcome::Clean);
    }

    println!("{}", "Available rules".bright_cyan().bold());
    println!("{}", "=".repeat(60).bright_cyan());
    for scanner in &scanners {
        println!(
            "\n{} {} ({})",
            scanner.severity().emoji(),
            scanner.id().bright_white().bold(),
            scanner.name()
        );
        println!("   {}", scanner.description());
        for rule_id in scanner.rule_ids() {
            println!("   - {}", rule_id);
        }
    }

    Ok(Outcome::Clean)
}
