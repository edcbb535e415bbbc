//! Program representation consumed by the rules
//!
//! Source text is parsed once with tree-sitter and lowered into a small,
//! immutable IR of contracts, lexical blocks, statements, call sites and storage
//! bindings. Every rule pattern-matches on that IR; none of them touch the syntax
//! tree directly.

pub mod ir;
pub mod normalizer;
pub mod solidity_source;

pub use ir::{
    Block, BlockId, BlockKind, CallSite, CallTarget, Contract, Expr, ExprKind, Function,
    FunctionKind, Statement, StatementKind, StateVariable, StorageBinding,
};
pub use normalizer::normalize;
pub use solidity_source::SoliditySource;
