//! Ordered effect log per function
//!
//! Records, in control-flow index order, every external call and every write to
//! contract state, so a rule can ask which state a function still mutates after
//! handing control to another contract. No dataflow: a write is attributed to
//! the state variable its lvalue is rooted in, directly or through a storage
//! pointer that aliases it.

use crate::analysis::guards::Guard;
use crate::core::RuleExecutionError;
use crate::representations::ir::{
    CallSite, Contract, Expr, ExprKind, Function, Span, StatementKind,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateWrite {
    pub variable: String,
    pub statement_index: usize,
    pub span: Span,
    pub operator: String,
    /// Storage pointer the write went through, if any.
    pub via: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct EffectEntry<'f> {
    pub call_site: &'f CallSite,
    pub mutated_after: Vec<StateWrite>,
}

impl EffectEntry<'_> {
    /// Writes after the call to variables an earlier guard checked.
    pub fn guarded_writes(&self, guards: &[Guard], function: &Function, contract: &Contract) -> Vec<&StateWrite> {
        self.mutated_after
            .iter()
            .filter(|w| is_guarded(&w.variable, self.call_site.statement_index, guards, function, contract))
            .collect()
    }
}

/// Whether a guard strictly before `before` reads `variable` or a storage
/// pointer aliasing it.
pub fn is_guarded(
    variable: &str,
    before: usize,
    guards: &[Guard],
    function: &Function,
    contract: &Contract,
) -> bool {
    guards
        .iter()
        .filter(|g| g.statement_index < before)
        .any(|g| {
            g.reads().into_iter().any(|name| {
                name == variable
                    || function
                        .binding(name)
                        .and_then(|b| b.aliased_state(contract))
                        == Some(variable)
            })
        })
}

/// Resolves an lvalue to the state variable it writes.
fn written_state(target: &Expr, function: &Function, contract: &Contract) -> Option<(String, Option<String>)> {
    if let ExprKind::Tuple(items) = &target.kind {
        return items
            .iter()
            .find_map(|item| written_state(item, function, contract));
    }
    let root = target.root_identifier()?;
    if let Some(binding) = function.binding(root) {
        return binding
            .aliased_state(contract)
            .map(|state| (state.to_string(), Some(root.to_string())));
    }
    if function.is_local(root) || !contract.is_state_variable(root) {
        return None;
    }
    Some((root.to_string(), None))
}

fn writes_in(expr: &Expr, function: &Function, contract: &Contract, index: usize, out: &mut Vec<StateWrite>) {
    expr.walk(&mut |e| {
        let (target, operator) = match &e.kind {
            ExprKind::Assign {
                target, operator, ..
            } => (target.as_ref(), operator.as_str()),
            ExprKind::Unary { operator, operand }
                if matches!(operator.as_str(), "++" | "--" | "delete") =>
            {
                (operand.as_ref(), operator.as_str())
            }
            ExprKind::Call { callee, .. } => match &callee.kind {
                ExprKind::Member { object, member } if member == "push" || member == "pop" => {
                    (object.as_ref(), member.as_str())
                }
                _ => return,
            },
            _ => return,
        };

        if let Some((variable, via)) = written_state(target, function, contract) {
            out.push(StateWrite {
                variable,
                statement_index: index,
                span: e.span,
                operator: operator.to_string(),
                via,
                text: e.text.clone(),
            });
        }
    });
}

/// Every state write in `function`, in control-flow order.
pub fn state_writes(function: &Function, contract: &Contract) -> Vec<StateWrite> {
    let mut writes = Vec::new();
    for statement in function.statements() {
        for expr in statement.expressions() {
            writes_in(expr, function, contract, statement.index, &mut writes);
        }
    }
    writes
}

/// Pairs each external call with the state writes that follow it.
///
/// Inline assembly can write any slot and call anything, so a function that
/// contains it cannot be ordered and the whole tracking fails.
pub fn track<'f>(
    function: &'f Function,
    contract: &Contract,
) -> Result<Vec<EffectEntry<'f>>, RuleExecutionError> {
    if let Some(assembly) = function
        .statements()
        .into_iter()
        .find(|s| matches!(s.kind, StatementKind::Assembly))
    {
        return Err(RuleExecutionError::new(
            "effect-order",
            "inline assembly has effects that cannot be ordered against external calls",
        )
        .at(&function.name, assembly.span.line));
    }

    let writes = state_writes(function, contract);
    let mut entries: Vec<EffectEntry<'f>> = function
        .call_sites
        .iter()
        .filter(|c| c.is_external())
        .map(|call_site| EffectEntry {
            call_site,
            mutated_after: writes
                .iter()
                .filter(|w| w.statement_index > call_site.statement_index)
                .cloned()
                .collect(),
        })
        .collect();
    entries.sort_by_key(|e| (e.call_site.statement_index, e.call_site.span));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::guards;
    use crate::representations::normalize;

    const BANK: &str = r#"pragma solidity ^0.4.24;
contract Bank {
    mapping(address => uint) bal;
    uint withdrawals;
    function withdraw(address s, uint amt) public {
        require(bal[s] >= amt);
        s.transfer(amt);
        bal[s] -= amt;
        withdrawals++;
    }
}
"#;

    #[test]
    fn test_writes_after_call_are_recorded() {
        let contracts = normalize(BANK).unwrap();
        let contract = &contracts[0];
        let function = contract.function("withdraw").unwrap();

        let entries = track(function, contract).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].call_site.statement_index, 1);

        let mutated: Vec<_> = entries[0]
            .mutated_after
            .iter()
            .map(|w| (w.variable.as_str(), w.operator.as_str()))
            .collect();
        assert_eq!(mutated, vec![("bal", "-="), ("withdrawals", "++")]);

        let guards = guards::extract(function);
        let guarded: Vec<_> = entries[0]
            .guarded_writes(&guards, function, contract)
            .iter()
            .map(|w| w.variable.as_str())
            .collect();
        assert_eq!(guarded, vec!["bal"]);
    }

    #[test]
    fn test_writes_through_storage_alias() {
        let contracts = normalize(
            r#"contract Vault {
    struct Lock { uint amount; }
    mapping(address => Lock) locks;
    function release() public {
        Lock storage l = locks[msg.sender];
        l.amount = 0;
        uint local = 1;
        local += 1;
    }
}
"#,
        )
        .unwrap();
        let contract = &contracts[0];
        let writes = state_writes(contract.function("release").unwrap(), contract);
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].variable, "locks");
        assert_eq!(writes[0].via.as_deref(), Some("l"));
    }

    #[test]
    fn test_assembly_fails_tracking() {
        let contracts = normalize(
            r#"contract A {
    uint x;
    function f() public {
        assembly { sstore(0, 1) }
        x = 1;
    }
}
"#,
        )
        .unwrap();
        let contract = &contracts[0];
        let err = track(contract.function("f").unwrap(), contract).unwrap_err();
        assert_eq!(err.line, Some(4));
        assert_eq!(err.function.as_deref(), Some("f"));
    }
}
