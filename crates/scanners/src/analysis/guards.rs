//! Precondition guards
//!
//! A guard is a statement that aborts the call unless a condition holds:
//! `require(c)`, `assert(c)`, or `if (c) { revert(); }` / `throw` / early
//! `return`. Guards are owned values so per-function guard lists can live in
//! the analysis cache.

use crate::representations::ir::{Expr, ExprKind, Function, Span, Statement, StatementKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardKind {
    Require,
    Assert,
    /// `if (c) revert();`: the asserted condition is `!c`.
    IfRevert,
}

#[derive(Debug, Clone)]
pub struct Guard {
    pub statement_index: usize,
    pub span: Span,
    pub kind: GuardKind,
    pub condition: Expr,
}

/// A comparison known to hold once the guard has passed.
#[derive(Debug, Clone, Copy)]
pub struct Comparison<'g> {
    pub left: &'g Expr,
    pub operator: &'static str,
    pub right: &'g Expr,
}

impl Guard {
    pub fn negated(&self) -> bool {
        self.kind == GuardKind::IfRevert
    }

    /// Names read by the guard condition.
    pub fn reads(&self) -> Vec<&str> {
        self.condition.identifiers()
    }

    pub fn asserted_comparisons(&self) -> Vec<Comparison<'_>> {
        let mut out = Vec::new();
        collect_comparisons(&self.condition, self.negated(), &mut out);
        out
    }
}

pub fn is_comparison(operator: &str) -> bool {
    matches!(operator, "==" | "!=" | "<" | "<=" | ">" | ">=")
}

fn canonical(operator: &str) -> Option<&'static str> {
    Some(match operator {
        "==" => "==",
        "!=" => "!=",
        "<" => "<",
        "<=" => "<=",
        ">" => ">",
        ">=" => ">=",
        _ => return None,
    })
}

fn negate(operator: &str) -> Option<&'static str> {
    Some(match operator {
        "==" => "!=",
        "!=" => "==",
        "<" => ">=",
        "<=" => ">",
        ">" => "<=",
        ">=" => "<",
        _ => return None,
    })
}

fn collect_comparisons<'g>(expr: &'g Expr, negated: bool, out: &mut Vec<Comparison<'g>>) {
    match &expr.kind {
        ExprKind::Unary { operator, operand } if operator == "!" => {
            collect_comparisons(operand, !negated, out)
        }
        ExprKind::Tuple(items) if items.len() == 1 => collect_comparisons(&items[0], negated, out),
        ExprKind::Binary {
            left,
            operator,
            right,
        } => match (operator.as_str(), negated) {
            ("&&", false) | ("||", true) => {
                collect_comparisons(left, negated, out);
                collect_comparisons(right, negated, out);
            }
            (op, _) => {
                let op = if negated { negate(op) } else { canonical(op) };
                if let Some(operator) = op {
                    out.push(Comparison {
                        left,
                        operator,
                        right,
                    });
                }
            }
        },
        _ => {}
    }
}

/// Comparisons that hold whenever `condition` evaluates to true.
pub fn conjuncts(condition: &Expr) -> Vec<Comparison<'_>> {
    let mut out = Vec::new();
    collect_comparisons(condition, false, &mut out);
    out
}

/// Guards of `function` in control-flow order.
pub fn extract(function: &Function) -> Vec<Guard> {
    function
        .statements()
        .into_iter()
        .filter_map(guard_of)
        .collect()
}

fn guard_of(statement: &Statement) -> Option<Guard> {
    let (kind, condition) = match &statement.kind {
        StatementKind::Expression(expr) => {
            let kind = match expr.callee_name()? {
                "require" => GuardKind::Require,
                "assert" => GuardKind::Assert,
                _ => return None,
            };
            (kind, expr.arguments().first()?.clone())
        }
        StatementKind::If {
            condition,
            then_branch,
            else_branch: None,
        } if !then_branch.statements.is_empty()
            && then_branch
                .statements
                .iter()
                .all(|s| s.is_abort() || matches!(s.kind, StatementKind::Return(_))) =>
        {
            (GuardKind::IfRevert, condition.clone())
        }
        _ => return None,
    };

    Some(Guard {
        statement_index: statement.index,
        span: statement.span,
        kind,
        condition,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::representations::normalize;

    fn guards_of(body: &str) -> Vec<Guard> {
        let source = format!(
            "contract A {{\n uint total;\n mapping(address => uint) bal;\n function f(uint amt, uint n) public {{\n{}\n }}\n}}\n",
            body
        );
        let contracts = normalize(&source).unwrap();
        extract(contracts[0].function("f").unwrap())
    }

    #[test]
    fn test_require_and_if_revert_guards() {
        let guards = guards_of(
            "require(bal[msg.sender] >= amt);\n if (n > 10) { revert(); }\n total = amt;\n if (n == 1) { total = 0; }",
        );
        assert_eq!(guards.len(), 2);
        assert_eq!(guards[0].kind, GuardKind::Require);
        assert!(guards[0].reads().contains(&"bal"));
        assert!(guards[0].reads().contains(&"amt"));
        assert_eq!(guards[1].kind, GuardKind::IfRevert);
        assert_eq!(guards[1].statement_index, 1);
    }

    #[test]
    fn test_asserted_comparisons_are_negated_for_if_revert() {
        let guards = guards_of("if (n > 10 || amt == 0) { revert(); }\n require(n != 0 && amt < 5);");

        let reverted: Vec<_> = guards[0]
            .asserted_comparisons()
            .iter()
            .map(|c| c.operator)
            .collect();
        assert_eq!(reverted, vec!["<=", "!="]);

        let required: Vec<_> = guards[1]
            .asserted_comparisons()
            .iter()
            .map(|c| (c.left.text.as_str(), c.operator))
            .collect();
        assert_eq!(required, vec![("n", "!="), ("amt", "<")]);
    }
}
