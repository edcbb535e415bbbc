//! Value provenance: where authority addresses and block hashes come from
//!
//! Two independent questions, both answered per contract without dataflow:
//!
//! * which state variables gate `msg.sender`-style authorization *and* got
//!   their value from a literal address,
//! * where a historical block hash is consumed by a condition or arithmetic,
//!   and whether the function bounds the block height to the hash horizon and
//!   rules out the all-zero sentinel first.

use crate::analysis::guards::{self, is_comparison, Comparison, Guard};
use crate::representations::ir::{
    Contract, Expr, ExprKind, Function, FunctionKind, Mutability, Span, Statement,
    StatementKind, StateVariable,
};
use std::collections::{BTreeMap, HashSet};

const ARITHMETIC: &[&str] = &["+", "-", "*", "/", "%", "**", "^", "&", "|", "<<", ">>"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralOrigin {
    Initializer,
    /// Assigned a literal in the constructor body.
    Constructor { line: usize },
}

#[derive(Debug, Clone)]
pub struct AuthorityUse {
    pub function: String,
    pub statement_index: usize,
    pub span: Span,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct HardcodedAuthority<'c> {
    pub variable: &'c StateVariable,
    pub origin: LiteralOrigin,
    pub literal: String,
    pub uses: Vec<AuthorityUse>,
}

/// Names that hold the caller's address inside one function.
struct SenderScope<'a> {
    aliases: &'a [String],
    copies: HashSet<&'a str>,
}

impl<'a> SenderScope<'a> {
    fn new(function: &'a Function, aliases: &'a [String]) -> Self {
        let mut scope = Self {
            aliases,
            copies: HashSet::new(),
        };
        // Locals copied from a sender expression, in statement order.
        for statement in function.statements() {
            match &statement.kind {
                StatementKind::Declaration { variables, value: Some(value) }
                    if variables.len() == 1 && scope.is_sender(value) =>
                {
                    scope.copies.insert(variables[0].name.as_str());
                }
                StatementKind::Expression(Expr {
                    kind: ExprKind::Assign { target, operator, value },
                    ..
                }) if operator == "=" && scope.is_sender(value) => {
                    if let Some(name) = target.identifier() {
                        if function.is_local(name) {
                            scope.copies.insert(name);
                        }
                    }
                }
                _ => {}
            }
        }
        scope
    }

    fn is_sender(&self, expr: &Expr) -> bool {
        let expr = expr.strip_casts();
        if expr.is_member("msg", "sender") || expr.is_member("tx", "origin") {
            return true;
        }
        if expr.callee_name() == Some("_msgSender") {
            return true;
        }
        match expr.identifier() {
            Some(name) => {
                self.copies.contains(name) || {
                    let lower = name.to_ascii_lowercase();
                    self.aliases.iter().any(|a| lower.contains(&a.to_ascii_lowercase()))
                }
            }
            None => false,
        }
    }
}

/// `==`/`!=` comparisons of a state variable against the caller, keyed by
/// the state variable's name.
pub fn authority_uses(contract: &Contract, aliases: &[String]) -> BTreeMap<String, Vec<AuthorityUse>> {
    let mut uses: BTreeMap<String, Vec<AuthorityUse>> = BTreeMap::new();

    for function in &contract.functions {
        let senders = SenderScope::new(function, aliases);
        for statement in function.statements() {
            for expr in statement.expressions() {
                expr.walk(&mut |e| {
                    let ExprKind::Binary { left, operator, right } = &e.kind else {
                        return;
                    };
                    if operator != "==" && operator != "!=" {
                        return;
                    }
                    let authority = if senders.is_sender(left) {
                        right.strip_casts()
                    } else if senders.is_sender(right) {
                        left.strip_casts()
                    } else {
                        return;
                    };
                    let Some(name) = authority.identifier() else {
                        return;
                    };
                    if function.is_local(name) || !contract.is_state_variable(name) {
                        return;
                    }
                    uses.entry(name.to_string()).or_default().push(AuthorityUse {
                        function: function.name.clone(),
                        statement_index: statement.index,
                        span: e.span,
                        text: e.text.clone(),
                    });
                });
            }
        }
    }
    uses
}

/// State variables holding a literal address, from their initializer or a
/// constructor assignment.
pub fn literal_addresses(contract: &Contract) -> Vec<(&StateVariable, LiteralOrigin, String)> {
    let mut found = Vec::new();
    for variable in &contract.state_variables {
        if let Some(init) = &variable.initializer {
            if init.is_address_literal() {
                found.push((variable, LiteralOrigin::Initializer, init.strip_casts().text.clone()));
                continue;
            }
        }
        let Some(constructor) = contract.constructor() else {
            continue;
        };
        for statement in constructor.statements() {
            let StatementKind::Expression(Expr {
                kind: ExprKind::Assign { target, operator, value },
                ..
            }) = &statement.kind
            else {
                continue;
            };
            if operator == "="
                && target.identifier() == Some(variable.name.as_str())
                && !constructor.is_local(&variable.name)
                && value.is_address_literal()
            {
                found.push((
                    variable,
                    LiteralOrigin::Constructor {
                        line: statement.span.line,
                    },
                    value.strip_casts().text.clone(),
                ));
                break;
            }
        }
    }
    found
}

pub fn hardcoded_authorities<'c>(contract: &'c Contract, aliases: &[String]) -> Vec<HardcodedAuthority<'c>> {
    let mut uses = authority_uses(contract, aliases);
    literal_addresses(contract)
        .into_iter()
        .filter_map(|(variable, origin, literal)| {
            let uses = uses.remove(&variable.name)?;
            Some(HardcodedAuthority {
                variable,
                origin,
                literal,
                uses,
            })
        })
        .collect()
}

/// One statement consuming a historical block hash.
#[derive(Debug, Clone)]
pub struct BlockHashUse {
    /// Statement holding the `blockhash(..)` call.
    pub call_index: usize,
    pub call_span: Span,
    pub height: Expr,
    /// Local or state variable the hash was stored in, if any.
    pub holder: Option<String>,
    pub statement_index: usize,
    pub span: Span,
    pub text: String,
    /// The consuming expression is an `==` on the hash.
    pub equality: bool,
    pub window_guarded: bool,
    pub sentinel_excluded: bool,
}

fn is_blockhash_call(expr: &Expr) -> bool {
    if !expr.is_call() {
        return false;
    }
    match expr.callee() {
        Some(callee) => {
            callee.identifier() == Some("blockhash") || callee.is_member("block", "blockhash")
        }
        None => false,
    }
}

/// The hash itself: the call or the variable holding it.
struct HashRef<'a> {
    call: &'a Expr,
    holder: Option<&'a str>,
}

impl HashRef<'_> {
    fn matches(&self, expr: &Expr) -> bool {
        let expr = expr.strip_casts();
        (is_blockhash_call(expr) && expr.span == self.call.span)
            || (self.holder.is_some() && expr.root_identifier() == self.holder)
    }

    fn mentioned_in(&self, expr: &Expr) -> bool {
        expr.any(&|e| self.matches(e))
    }
}

fn holder_of<'a>(statement: &'a Statement, call: &Expr) -> Option<&'a str> {
    let wraps_call = |value: &Expr| {
        let value = value.strip_casts();
        is_blockhash_call(value) && value.span == call.span
    };
    match &statement.kind {
        StatementKind::Declaration { variables, value: Some(value) }
            if variables.len() == 1 && wraps_call(value) =>
        {
            Some(variables[0].name.as_str())
        }
        StatementKind::Expression(Expr {
            kind: ExprKind::Assign { target, value, .. },
            ..
        }) if wraps_call(value) => target.root_identifier(),
        _ => None,
    }
}

/// Condition expression the statement branches on or asserts, if any.
fn condition_of(statement: &Statement) -> Option<&Expr> {
    match &statement.kind {
        StatementKind::If { condition, .. } => Some(condition),
        StatementKind::Loop { header, .. } => header.first(),
        StatementKind::Expression(expr)
            if matches!(expr.callee_name(), Some("require") | Some("assert")) =>
        {
            expr.arguments().first()
        }
        _ => None,
    }
}

/// Compile-time value of a literal, a constant or immutable state variable, or
/// arithmetic over those.
fn constant_value(expr: &Expr, contract: &Contract, depth: u8) -> Option<u128> {
    if depth == 0 {
        return None;
    }
    let expr = expr.strip_casts();
    if let Some(v) = expr.integer_value() {
        return Some(v);
    }
    match &expr.kind {
        ExprKind::Identifier(name) => {
            let var = contract.state_variable(name)?;
            if var.mutability == Mutability::Mutable {
                return None;
            }
            constant_value(var.initializer.as_ref()?, contract, depth - 1)
        }
        ExprKind::Binary { left, operator, right } => {
            let l = constant_value(left, contract, depth - 1)?;
            let r = constant_value(right, contract, depth - 1)?;
            match operator.as_str() {
                "+" => l.checked_add(r),
                "-" => l.checked_sub(r),
                "*" => l.checked_mul(r),
                "/" => l.checked_div(r),
                "**" => u32::try_from(r).ok().and_then(|r| l.checked_pow(r)),
                _ => None,
            }
        }
        _ => None,
    }
}

/// The block distance `expr` allows: a constant, or the constant term of
/// `h + K` / `h - K`.
fn window_offset(expr: &Expr, contract: &Contract) -> Option<u128> {
    const DEPTH: u8 = 8;
    if let Some(v) = constant_value(expr, contract, DEPTH) {
        return Some(v);
    }
    match &expr.strip_casts().kind {
        ExprKind::Binary { left, operator, right } if operator == "+" => {
            constant_value(right, contract, DEPTH).or_else(|| constant_value(left, contract, DEPTH))
        }
        ExprKind::Binary { right, operator, .. } if operator == "-" => {
            constant_value(right, contract, DEPTH)
        }
        _ => None,
    }
}

fn value_at_most(expr: &Expr, horizon: u64, contract: &Contract) -> bool {
    window_offset(expr, contract).is_some_and(|v| v > 0 && v <= u128::from(horizon))
}

fn mentions_block_number(expr: &Expr) -> bool {
    expr.any(&|e| e.is_member("block", "number"))
}

/// Identifiers naming the requested height, including the value a local
/// height was copied from.
fn height_names<'a>(height: &'a Expr, function: &'a Function) -> HashSet<&'a str> {
    let mut names: HashSet<&str> = height
        .identifiers()
        .into_iter()
        .filter(|n| *n != "block")
        .collect();
    for statement in function.statements() {
        if let StatementKind::Declaration { variables, value: Some(value) } = &statement.kind {
            if variables.len() == 1 && names.contains(variables[0].name.as_str()) {
                names.extend(value.identifiers().into_iter().filter(|n| *n != "block"));
            }
        }
    }
    names
}

/// `block.number - h <= K`, `block.number < h + K`, `h + K >= block.number`
/// and the other arrangements that cap the distance to `h` at `K <= horizon`.
fn bounds_window(
    comparison: &Comparison,
    names: &HashSet<&str>,
    horizon: u64,
    contract: &Contract,
) -> bool {
    let (small, big) = match comparison.operator {
        "<" | "<=" => (comparison.left, comparison.right),
        ">" | ">=" => (comparison.right, comparison.left),
        _ => return false,
    };
    let mentions_height = small
        .identifiers()
        .into_iter()
        .chain(big.identifiers())
        .any(|n| names.contains(n));
    mentions_height
        && mentions_block_number(small)
        && (value_at_most(big, horizon, contract) || value_at_most(small, horizon, contract))
}

/// `blockhash(block.number - K)` is always inside the window.
fn inherently_fresh(height: &Expr, horizon: u64, contract: &Contract) -> bool {
    match &height.strip_casts().kind {
        ExprKind::Binary { left, operator, right } if operator == "-" => {
            left.is_member("block", "number") && value_at_most(right, horizon, contract)
        }
        _ => false,
    }
}

fn excludes_zero(comparison: &Comparison, hash: &HashRef, other: Option<&Expr>) -> bool {
    let subject = |e: &Expr| {
        hash.matches(e) || other.is_some_and(|o| o.strip_casts().text == e.strip_casts().text)
    };
    match comparison.operator {
        "!=" => {
            (comparison.right.is_zero() && subject(comparison.left))
                || (comparison.left.is_zero() && subject(comparison.right))
        }
        ">" => comparison.right.is_zero() && subject(comparison.left),
        "<" => comparison.left.is_zero() && subject(comparison.right),
        _ => false,
    }
}

/// Every conditional or arithmetic consumption of a block hash in `function`.
pub fn block_hash_uses(
    function: &Function,
    contract: &Contract,
    guards: &[Guard],
    horizon: u64,
) -> Vec<BlockHashUse> {
    let statements = function.statements();
    let mut uses = Vec::new();

    for call_statement in &statements {
        let mut calls = Vec::new();
        for expr in call_statement.expressions() {
            expr.walk(&mut |e| {
                if is_blockhash_call(e) {
                    calls.push(e);
                }
            });
        }

        for call in calls {
            let Some(height) = call.arguments().first() else {
                continue;
            };
            let hash = HashRef {
                call,
                holder: holder_of(call_statement, call),
            };
            let names = height_names(height, function);
            let fresh = inherently_fresh(height, horizon, contract);

            for statement in statements.iter().filter(|s| s.index >= call_statement.index) {
                let local = condition_of(statement).map(guards::conjuncts).unwrap_or_default();
                let prior: Vec<Comparison> = guards
                    .iter()
                    .filter(|g| g.statement_index < statement.index)
                    .flat_map(|g| g.asserted_comparisons())
                    .collect();
                let facts = || prior.iter().chain(local.iter());

                let mut consumed: Vec<(&Expr, bool, &Expr)> = Vec::new();
                for expr in statement.expressions() {
                    expr.walk(&mut |e| {
                        let ExprKind::Binary { left, operator, right } = &e.kind else {
                            return;
                        };
                        let op = operator.as_str();
                        if !is_comparison(op) && !ARITHMETIC.contains(&op) {
                            return;
                        }
                        let on_left = hash.mentioned_in(left);
                        let on_right = hash.mentioned_in(right);
                        if !on_left && !on_right {
                            return;
                        }
                        let other = if on_left { right.as_ref() } else { left.as_ref() };
                        consumed.push((e, op == "==", other));
                    });
                }
                // Storing the hash is not consuming it.
                let Some(&(first, _, _)) = consumed.first() else {
                    continue;
                };

                let window_guarded =
                    fresh || facts().any(|c| bounds_window(c, &names, horizon, contract));
                let equalities: Vec<(&Expr, &Expr)> = consumed
                    .iter()
                    .filter(|(_, equality, _)| *equality)
                    .map(|(e, _, other)| (*e, *other))
                    .collect();
                let unguarded = equalities
                    .iter()
                    .find(|(_, other)| !facts().any(|c| excludes_zero(c, &hash, Some(*other))));
                let expr = unguarded
                    .or(equalities.first())
                    .map_or(first, |(e, _)| *e);
                let equality = !equalities.is_empty();
                let sentinel_excluded = unguarded.is_none();

                uses.push(BlockHashUse {
                    call_index: call_statement.index,
                    call_span: call.span,
                    height: height.clone(),
                    holder: hash.holder.map(str::to_string),
                    statement_index: statement.index,
                    span: expr.span,
                    text: expr.text.clone(),
                    equality,
                    window_guarded,
                    sentinel_excluded,
                });
            }
        }
    }

    uses
}

/// Functions that count as the contract's own code for provenance purposes.
pub fn analysable(function: &Function) -> bool {
    function.has_body() && function.kind != FunctionKind::Receive
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::representations::normalize;

    fn aliases() -> Vec<String> {
        vec!["sender".to_string(), "caller".to_string()]
    }

    #[test]
    fn test_literal_owner_compared_with_sender() {
        let contracts = normalize(
            r#"contract Challenge {
    address owner = 0x6B477781b0e68031109f21887e6B5afEAaEB002b;
    address admin;
    function unlock(address sender) public {
        require(sender == owner);
    }
    function other() public {
        require(msg.sender == admin);
    }
}
"#,
        )
        .unwrap();
        let found = hardcoded_authorities(&contracts[0], &aliases());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].variable.name, "owner");
        assert_eq!(found[0].origin, LiteralOrigin::Initializer);
        assert_eq!(found[0].uses[0].function, "unlock");
    }

    #[test]
    fn test_constructor_literal_and_sender_copy() {
        let contracts = normalize(
            r#"contract Vault {
    address keeper;
    constructor() public {
        keeper = address(0x6B477781b0e68031109f21887e6B5afEAaEB002b);
    }
    modifier onlyKeeper() {
        address who = msg.sender;
        require(keeper == who);
        _;
    }
}
"#,
        )
        .unwrap();
        let found = hardcoded_authorities(&contracts[0], &aliases());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].origin, LiteralOrigin::Constructor { line: 4 });
        assert_eq!(found[0].uses[0].function, "onlyKeeper");
    }

    fn hash_uses(body: &str) -> Vec<BlockHashUse> {
        let source = format!(
            "contract Game {{\n uint constant WINDOW = 256;\n bytes32 answer;\n function settle(uint h, bytes32 guess) public {{\n{}\n }}\n}}\n",
            body
        );
        let contracts = normalize(&source).unwrap();
        let function = contracts[0].function("settle").unwrap();
        let guards = guards::extract(function);
        block_hash_uses(function, &contracts[0], &guards, 256)
    }

    #[test]
    fn test_unguarded_equality_on_block_hash() {
        let uses = hash_uses("bytes32 hash = blockhash(h);\n if (hash == guess) { answer = hash; }");
        assert_eq!(uses.len(), 1);
        assert_eq!(uses[0].holder.as_deref(), Some("hash"));
        assert!(uses[0].equality);
        assert!(!uses[0].window_guarded);
        assert!(!uses[0].sentinel_excluded);
    }

    #[test]
    fn test_window_and_sentinel_guards_recognized() {
        let uses = hash_uses(
            "require(block.number - h <= WINDOW);\n bytes32 hash = blockhash(h);\n require(hash != 0);\n if (hash == guess) { answer = hash; }",
        );
        let equality: Vec<_> = uses.iter().filter(|u| u.equality).collect();
        assert_eq!(equality.len(), 1);
        assert!(equality[0].window_guarded);
        assert!(equality[0].sentinel_excluded);
    }

    #[test]
    fn test_reversed_window_form_and_recent_height() {
        let uses = hash_uses("if (h + 256 < block.number) { revert(); }\n require(blockhash(h) == guess);");
        assert_eq!(uses.len(), 1);
        assert!(uses[0].window_guarded);

        let fresh = hash_uses("require(blockhash(block.number - 1) == guess);");
        assert!(fresh[0].window_guarded);
        assert!(!fresh[0].sentinel_excluded);
    }

    #[test]
    fn test_window_bound_must_fit_the_horizon() {
        let wide = hash_uses("require(block.number - h < 2 ** 20);\n require(blockhash(h) == guess);");
        assert_eq!(wide.len(), 1);
        assert!(!wide[0].window_guarded);

        let tight = hash_uses("require(block.number - h < WINDOW - 1);\n require(blockhash(h) == guess);");
        assert!(tight[0].window_guarded);
    }

    #[test]
    fn test_every_equality_in_a_statement_is_judged() {
        let uses = hash_uses(
            "require(block.number - h <= 200);\n bytes32 hash = blockhash(h);\n if (uint(hash) > 100 || hash == guess) { answer = hash; }",
        );
        let flagged: Vec<_> = uses.iter().filter(|u| u.equality && !u.sentinel_excluded).collect();
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].text, "hash == guess");
        assert!(flagged[0].window_guarded);

        let guarded = hash_uses(
            "bytes32 hash = blockhash(h);\n if (hash != 0 && hash == guess) { answer = hash; }",
        );
        assert!(guarded.iter().all(|u| u.sentinel_excluded));
    }
}
