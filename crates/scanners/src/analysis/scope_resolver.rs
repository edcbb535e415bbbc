//! Lexical scope and storage-binding resolution
//!
//! Resolves every identifier reference in a function body against block
//! scoping: a local is visible in its declaring block and the blocks nested in
//! it, nowhere else. Solidity before 0.5 hoisted locals to function scope, so a
//! name that is unbound here but declared as a storage pointer in a sibling
//! branch silently resolves to that (uninitialized) pointer at runtime. Those
//! references are what [`ScopeResolution::cross_branch_uses`] reports.

use crate::representations::ir::{
    Block, BlockId, Contract, Expr, ExprKind, Function, Span, StatementKind, StorageBinding,
};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy)]
pub enum Resolution<'f> {
    /// A storage-typed local visible at the reference.
    Bound(&'f StorageBinding),
    /// A memory/value local visible at the reference.
    Local,
    Parameter,
    State,
    /// Declared in this function, but not in any enclosing block.
    Unbound,
    /// Builtins, functions, events, types.
    Global,
}

impl PartialEq for Resolution<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Bound(a), Self::Bound(b)) => std::ptr::eq(*a, *b),
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Reference<'f> {
    pub name: &'f str,
    pub statement_index: usize,
    pub block: BlockId,
    pub span: Span,
    pub resolution: Resolution<'f>,
}

#[derive(Debug)]
pub struct ScopeResolution<'f> {
    pub bindings: &'f [StorageBinding],
    pub references: Vec<Reference<'f>>,
}

/// An unbound reference that matches a storage declaration in another branch.
#[derive(Debug, Clone)]
pub struct CrossBranchUse<'f> {
    pub binding: &'f StorageBinding,
    pub reference: Reference<'f>,
    /// Block directly below the common ancestor that holds the reference.
    pub branch: BlockId,
}

#[derive(Clone, Copy)]
enum Declared<'f> {
    Storage(&'f StorageBinding),
    Local,
    Parameter,
}

struct Resolver<'f> {
    function: &'f Function,
    contract: &'f Contract,
    scopes: Vec<HashMap<&'f str, Declared<'f>>>,
    references: Vec<Reference<'f>>,
}

pub fn resolve<'f>(function: &'f Function, contract: &'f Contract) -> ScopeResolution<'f> {
    let mut params = HashMap::new();
    for parameter in &function.parameters {
        if !parameter.name.is_empty() {
            params.insert(parameter.name.as_str(), Declared::Parameter);
        }
    }

    let mut resolver = Resolver {
        function,
        contract,
        scopes: vec![params],
        references: Vec::new(),
    };
    if let Some(body) = &function.body {
        resolver.block(body);
    }

    ScopeResolution {
        bindings: &function.storage_bindings,
        references: resolver.references,
    }
}

impl<'f> Resolver<'f> {
    fn block(&mut self, block: &'f Block) {
        self.scopes.push(HashMap::new());
        for statement in &block.statements {
            match &statement.kind {
                StatementKind::Declaration { variables, value } => {
                    // The initializer is evaluated before the new names exist.
                    if let Some(value) = value {
                        self.expr(value, statement.index, block.id);
                    }
                    for variable in variables {
                        let declared = self
                            .function
                            .storage_bindings
                            .iter()
                            .find(|b| {
                                b.name == variable.name && b.statement_index == statement.index
                            })
                            .map(Declared::Storage)
                            .unwrap_or(Declared::Local);
                        if let Some(scope) = self.scopes.last_mut() {
                            scope.insert(variable.name.as_str(), declared);
                        }
                    }
                }
                _ => {
                    for expr in statement.expressions() {
                        self.expr(expr, statement.index, block.id);
                    }
                    for child in statement.child_blocks() {
                        self.block(child);
                    }
                }
            }
        }
        self.scopes.pop();
    }

    fn expr(&mut self, expr: &'f Expr, statement_index: usize, block: BlockId) {
        match &expr.kind {
            ExprKind::Identifier(name) => {
                let resolution = self.lookup(name);
                self.references.push(Reference {
                    name,
                    statement_index,
                    block,
                    span: expr.span,
                    resolution,
                });
            }
            _ => {
                for child in expr.children() {
                    self.expr(child, statement_index, block);
                }
            }
        }
    }

    fn lookup(&self, name: &str) -> Resolution<'f> {
        for scope in self.scopes.iter().rev() {
            if let Some(declared) = scope.get(name) {
                return match declared {
                    Declared::Storage(binding) => Resolution::Bound(binding),
                    Declared::Local => Resolution::Local,
                    Declared::Parameter => Resolution::Parameter,
                };
            }
        }
        if self.contract.is_state_variable(name) {
            Resolution::State
        } else if self.function.is_local(name) {
            Resolution::Unbound
        } else {
            Resolution::Global
        }
    }
}

impl<'f> ScopeResolution<'f> {
    pub fn unbound(&self) -> impl Iterator<Item = &Reference<'f>> {
        self.references
            .iter()
            .filter(|r| r.resolution == Resolution::Unbound)
    }

    /// First use per (storage declaration, branch) of a storage-typed name that
    /// the branch never declares itself.
    pub fn cross_branch_uses(&self, function: &Function) -> Vec<CrossBranchUse<'f>> {
        let mut seen = HashSet::new();
        let mut uses = Vec::new();

        for reference in self.unbound() {
            for binding in self.bindings.iter().filter(|b| b.name == reference.name) {
                let Some((lca, branch)) = split_point(function, binding.block, reference.block)
                else {
                    continue;
                };
                // A use after the branching statement, in the enclosing block
                // itself, is not a sibling-branch use.
                if lca == reference.block {
                    continue;
                }
                let key = (binding.statement_index, binding.name.as_str(), branch);
                if seen.insert(key) {
                    uses.push(CrossBranchUse {
                        binding,
                        reference: reference.clone(),
                        branch,
                    });
                }
            }
        }

        uses.sort_by_key(|u| (u.reference.statement_index, u.reference.span));
        uses
    }
}

/// Lowest common ancestor of two blocks and the child of it on `reference`'s
/// side. `None` when the declaring block encloses the reference.
fn split_point(function: &Function, declared: BlockId, reference: BlockId) -> Option<(BlockId, BlockId)> {
    let declared_chain = function.ancestors(declared);
    let reference_chain = function.ancestors(reference);
    if reference_chain.contains(&declared) {
        return None;
    }

    let position = reference_chain
        .iter()
        .position(|b| declared_chain.contains(b))?;
    let lca = reference_chain[position];
    let branch = if position == 0 {
        reference
    } else {
        reference_chain[position - 1]
    };
    Some((lca, branch))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::representations::normalize;

    const SIBLING: &str = r#"contract Registry {
    struct Rec { uint f; }
    Rec[] arr;
    function update(bool c, uint i, uint v, uint v2) public {
        if (c) {
            Rec storage x = arr[i];
            x.f = v;
        } else {
            x.f = v2;
            arr.push(x);
        }
    }
}
"#;

    #[test]
    fn test_sibling_branch_reference_is_unbound() {
        let contracts = normalize(SIBLING).unwrap();
        let contract = &contracts[0];
        let function = contract.function("update").unwrap();
        let resolution = resolve(function, contract);

        let bound: Vec<_> = resolution
            .references
            .iter()
            .filter(|r| matches!(r.resolution, Resolution::Bound(_)))
            .collect();
        assert_eq!(bound.len(), 1);
        assert_eq!(bound[0].span.line, 7);

        let unbound: Vec<_> = resolution.unbound().map(|r| r.span.line).collect();
        assert_eq!(unbound, vec![9, 10]);

        let uses = resolution.cross_branch_uses(function);
        assert_eq!(uses.len(), 1);
        assert_eq!(uses[0].reference.span.line, 9);
        assert_eq!(uses[0].binding.name, "x");
    }

    #[test]
    fn test_independent_declarations_in_both_branches() {
        let source = SIBLING.replace(
            "            x.f = v2;\n",
            "            Rec storage x = arr[0];\n            x.f = v2;\n",
        );
        let contracts = normalize(&source).unwrap();
        let contract = &contracts[0];
        let function = contract.function("update").unwrap();
        let resolution = resolve(function, contract);

        assert_eq!(resolution.unbound().count(), 0);
        assert!(resolution.cross_branch_uses(function).is_empty());
    }

    #[test]
    fn test_initializer_resolves_before_declaration() {
        let contracts = normalize(
            r#"contract A {
    uint[] data;
    function f(uint i) public {
        uint n = data[i];
        n = n + 1;
    }
}
"#,
        )
        .unwrap();
        let contract = &contracts[0];
        let function = contract.function("f").unwrap();
        let resolution = resolve(function, contract);

        let kinds: Vec<_> = resolution
            .references
            .iter()
            .map(|r| (r.name, r.resolution))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("data", Resolution::State),
                ("i", Resolution::Parameter),
                ("n", Resolution::Local),
                ("n", Resolution::Local),
            ]
        );
    }
}
