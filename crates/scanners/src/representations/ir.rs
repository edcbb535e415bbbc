//! Normalized contract representation
//!
//! A deliberately small view of a Solidity contract: declarations, lexical blocks,
//! statements in control-flow order, call sites and storage bindings. Rules
//! pattern-match on this instead of raw syntax trees, so the grammar only has to be
//! understood once, in the normalizer. Everything here is immutable after
//! construction and every node keeps the source line it came from.

use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
pub struct Span {
    pub line: usize,
    pub column: usize,
}

impl Span {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

pub type BlockId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractKind {
    Contract,
    Abstract,
    Library,
    Interface,
}

#[derive(Debug, Clone)]
pub struct Contract {
    pub name: String,
    pub kind: ContractKind,
    pub span: Span,
    pub structs: Vec<String>,
    pub enums: Vec<String>,
    /// Contract, interface and library names declared anywhere in the same file.
    pub known_contracts: Vec<String>,
    pub state_variables: Vec<StateVariable>,
    pub functions: Vec<Function>,
}

impl Contract {
    pub fn state_variable(&self, name: &str) -> Option<&StateVariable> {
        self.state_variables.iter().find(|v| v.name == name)
    }

    pub fn is_state_variable(&self, name: &str) -> bool {
        self.state_variable(name).is_some()
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn constructor(&self) -> Option<&Function> {
        self.functions
            .iter()
            .find(|f| f.kind == FunctionKind::Constructor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mutability {
    Mutable,
    Constant,
    Immutable,
}

#[derive(Debug, Clone)]
pub struct StateVariable {
    pub name: String,
    pub type_name: String,
    pub visibility: Option<String>,
    pub mutability: Mutability,
    pub initializer: Option<Expr>,
    pub span: Span,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionKind {
    Function,
    Constructor,
    Modifier,
    Fallback,
    Receive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    External,
    Internal,
    Private,
}

impl Visibility {
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword.trim() {
            "public" => Some(Self::Public),
            "external" => Some(Self::External),
            "internal" => Some(Self::Internal),
            "private" => Some(Self::Private),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataLocation {
    Storage,
    Memory,
    Calldata,
}

impl DataLocation {
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "storage" => Some(Self::Storage),
            "memory" => Some(Self::Memory),
            "calldata" => Some(Self::Calldata),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub type_name: String,
    pub location: Option<DataLocation>,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub kind: FunctionKind,
    pub visibility: Visibility,
    pub parameters: Vec<Parameter>,
    pub modifiers: Vec<String>,
    pub span: Span,
    pub body: Option<Block>,
    /// Flat index of every block in `body`, keyed by id.
    pub blocks: HashMap<BlockId, BlockInfo>,
    pub call_sites: Vec<CallSite>,
    pub storage_bindings: Vec<StorageBinding>,
    /// Declared type of every local (any block) and parameter.
    pub local_types: HashMap<String, String>,
}

impl Function {
    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    /// Declared anywhere in this function, as a parameter or a local.
    pub fn is_local(&self, name: &str) -> bool {
        self.local_types.contains_key(name)
    }

    /// Every statement, nested ones included, in control-flow index order.
    pub fn statements(&self) -> Vec<&Statement> {
        let mut out = Vec::new();
        if let Some(body) = &self.body {
            body.collect_statements(&mut out);
        }
        out
    }

    pub fn statement(&self, index: usize) -> Option<&Statement> {
        self.statements().into_iter().find(|s| s.index == index)
    }

    pub fn block(&self, id: BlockId) -> Option<&BlockInfo> {
        self.blocks.get(&id)
    }

    /// `id` followed by each enclosing block up to the function body.
    pub fn ancestors(&self, id: BlockId) -> Vec<BlockId> {
        let mut chain = vec![id];
        let mut current = id;
        while let Some(parent) = self.blocks.get(&current).and_then(|b| b.parent) {
            chain.push(parent);
            current = parent;
        }
        chain
    }

    pub fn is_in_unchecked(&self, id: BlockId) -> bool {
        self.ancestors(id)
            .iter()
            .any(|b| self.blocks.get(b).is_some_and(|info| info.kind == BlockKind::Unchecked))
    }

    pub fn binding(&self, name: &str) -> Option<&StorageBinding> {
        self.storage_bindings.iter().find(|b| b.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    Body,
    Then,
    Else,
    Loop,
    Nested,
    Unchecked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub id: BlockId,
    pub parent: Option<BlockId>,
    pub kind: BlockKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Block {
    pub id: BlockId,
    pub parent: Option<BlockId>,
    pub kind: BlockKind,
    pub span: Span,
    pub statements: Vec<Statement>,
}

impl Block {
    fn collect_statements<'a>(&'a self, out: &mut Vec<&'a Statement>) {
        for statement in &self.statements {
            out.push(statement);
            for child in statement.child_blocks() {
                child.collect_statements(out);
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocalVariable {
    pub name: String,
    pub type_name: String,
    pub location: Option<DataLocation>,
}

#[derive(Debug, Clone)]
pub struct Statement {
    /// Function-wide control-flow index; a compound statement precedes the
    /// statements nested inside it.
    pub index: usize,
    pub block: BlockId,
    pub span: Span,
    pub text: String,
    pub kind: StatementKind,
}

#[derive(Debug, Clone)]
pub enum StatementKind {
    Declaration {
        variables: Vec<LocalVariable>,
        value: Option<Expr>,
    },
    Expression(Expr),
    If {
        condition: Expr,
        then_branch: Block,
        else_branch: Option<Block>,
    },
    Loop {
        header: Vec<Expr>,
        body: Block,
    },
    Block(Block),
    Return(Option<Expr>),
    Emit(Vec<Expr>),
    Revert(Vec<Expr>),
    Assembly,
    Other(Vec<Expr>),
}

impl Statement {
    /// Expressions evaluated by this statement itself, excluding nested statements.
    pub fn expressions(&self) -> Vec<&Expr> {
        match &self.kind {
            StatementKind::Declaration { value, .. } => value.iter().collect(),
            StatementKind::Expression(expr) => vec![expr],
            StatementKind::If { condition, .. } => vec![condition],
            StatementKind::Loop { header, .. } => header.iter().collect(),
            StatementKind::Return(expr) => expr.iter().collect(),
            StatementKind::Emit(exprs)
            | StatementKind::Revert(exprs)
            | StatementKind::Other(exprs) => exprs.iter().collect(),
            StatementKind::Block(_) | StatementKind::Assembly => Vec::new(),
        }
    }

    pub fn child_blocks(&self) -> Vec<&Block> {
        match &self.kind {
            StatementKind::If {
                then_branch,
                else_branch,
                ..
            } => {
                let mut blocks = vec![then_branch];
                if let Some(else_branch) = else_branch {
                    blocks.push(else_branch);
                }
                blocks
            }
            StatementKind::Loop { body, .. } => vec![body],
            StatementKind::Block(block) => vec![block],
            _ => Vec::new(),
        }
    }

    /// Statements that abort the current call: `revert`, `revert(..)` and
    /// legacy `throw`.
    pub fn is_abort(&self) -> bool {
        match &self.kind {
            StatementKind::Revert(_) => true,
            StatementKind::Expression(expr) => match &expr.kind {
                ExprKind::Identifier(name) => name == "throw",
                ExprKind::Call { .. } => expr.callee_name() == Some("revert"),
                _ => false,
            },
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiteralKind {
    Number,
    String,
    Bool,
    HexString,
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
    pub text: String,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Identifier(String),
    Literal(LiteralKind),
    Member {
        object: Box<Expr>,
        member: String,
    },
    Index {
        base: Box<Expr>,
        index: Option<Box<Expr>>,
    },
    Call {
        callee: Box<Expr>,
        arguments: Vec<Expr>,
    },
    /// `target{value: v, gas: g}` ahead of a call.
    CallOptions {
        base: Box<Expr>,
        options: Vec<Expr>,
    },
    Assign {
        target: Box<Expr>,
        operator: String,
        value: Box<Expr>,
    },
    Binary {
        left: Box<Expr>,
        operator: String,
        right: Box<Expr>,
    },
    Unary {
        operator: String,
        operand: Box<Expr>,
    },
    Conditional {
        condition: Box<Expr>,
        then_value: Box<Expr>,
        else_value: Box<Expr>,
    },
    Tuple(Vec<Expr>),
    Other(Vec<Expr>),
}

const ELEMENTARY_CASTS: &[&str] = &["address", "payable", "bool", "string", "bytes", "byte"];

pub fn is_elementary_type(name: &str) -> bool {
    let name = name.trim();
    if ELEMENTARY_CASTS.contains(&name) || name == "address payable" {
        return true;
    }
    for prefix in ["uint", "int", "bytes", "fixed", "ufixed"] {
        if let Some(rest) = name.strip_prefix(prefix) {
            if rest.chars().all(|c| c.is_ascii_digit() || c == 'x') {
                return true;
            }
        }
    }
    false
}

impl Expr {
    pub fn identifier(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Identifier(name) => Some(name),
            _ => None,
        }
    }

    pub fn children(&self) -> Vec<&Expr> {
        match &self.kind {
            ExprKind::Identifier(_) | ExprKind::Literal(_) => Vec::new(),
            ExprKind::Member { object, .. } => vec![object],
            ExprKind::Index { base, index } => {
                let mut children = vec![base.as_ref()];
                if let Some(index) = index {
                    children.push(index);
                }
                children
            }
            ExprKind::Call { callee, arguments } => {
                let mut children = vec![callee.as_ref()];
                children.extend(arguments.iter());
                children
            }
            ExprKind::CallOptions { base, options } => {
                let mut children = vec![base.as_ref()];
                children.extend(options.iter());
                children
            }
            ExprKind::Assign { target, value, .. } => vec![target, value],
            ExprKind::Binary { left, right, .. } => vec![left, right],
            ExprKind::Unary { operand, .. } => vec![operand],
            ExprKind::Conditional {
                condition,
                then_value,
                else_value,
            } => vec![condition, then_value, else_value],
            ExprKind::Tuple(items) | ExprKind::Other(items) => items.iter().collect(),
        }
    }

    /// Pre-order traversal including `self`.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Expr)) {
        visit(self);
        for child in self.children() {
            child.walk(visit);
        }
    }

    pub fn any(&self, predicate: &dyn Fn(&Expr) -> bool) -> bool {
        predicate(self) || self.children().into_iter().any(|c| c.any(predicate))
    }

    /// Names of every identifier read in this expression. Member names are not
    /// identifiers: `x.f` yields only `x`.
    pub fn identifiers(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.walk(&mut |e| {
            if let ExprKind::Identifier(name) = &e.kind {
                names.push(name.as_str());
            }
        });
        names
    }

    /// Variable an lvalue ultimately refers to: `a[i].f` → `a`.
    pub fn root_identifier(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Identifier(name) => Some(name),
            ExprKind::Member { object, .. } => object.root_identifier(),
            ExprKind::Index { base, .. } => base.root_identifier(),
            ExprKind::Tuple(items) if items.len() == 1 => items[0].root_identifier(),
            _ => None,
        }
    }

    /// Peels casts such as `uint256(x)`, `address(x)` and single-element parentheses.
    pub fn strip_casts(&self) -> &Expr {
        match &self.kind {
            ExprKind::Call { callee, arguments } if arguments.len() == 1 => match &callee.kind {
                ExprKind::Identifier(name) if is_elementary_type(name) => {
                    arguments[0].strip_casts()
                }
                _ => self,
            },
            ExprKind::Tuple(items) if items.len() == 1 => items[0].strip_casts(),
            _ => self,
        }
    }

    /// Callee with call options removed.
    pub fn callee(&self) -> Option<&Expr> {
        match &self.kind {
            ExprKind::Call { callee, .. } => Some(strip_options(callee)),
            _ => None,
        }
    }

    /// `require(..)` → `require`, `block.blockhash(..)` → `blockhash`.
    pub fn callee_name(&self) -> Option<&str> {
        match &self.callee()?.kind {
            ExprKind::Identifier(name) => Some(name),
            ExprKind::Member { member, .. } => Some(member),
            _ => None,
        }
    }

    pub fn arguments(&self) -> &[Expr] {
        match &self.kind {
            ExprKind::Call { arguments, .. } => arguments,
            _ => &[],
        }
    }

    pub fn is_member(&self, object: &str, member: &str) -> bool {
        match &self.kind {
            ExprKind::Member {
                object: obj,
                member: m,
            } => m == member && obj.identifier() == Some(object),
            _ => false,
        }
    }

    /// Numeric value of an integer literal (decimal or hex, `_` separators allowed).
    pub fn integer_value(&self) -> Option<u128> {
        match &self.strip_casts().kind {
            ExprKind::Literal(LiteralKind::Number) => {
                let text = self.strip_casts().text.replace('_', "");
                let text = text.split_whitespace().next().unwrap_or("");
                if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
                    u128::from_str_radix(hex, 16).ok()
                } else {
                    text.parse::<u128>().ok()
                }
            }
            _ => None,
        }
    }

    pub fn is_zero(&self) -> bool {
        let inner = self.strip_casts();
        matches!(inner.kind, ExprKind::Literal(LiteralKind::Number))
            && inner
                .text
                .trim_start_matches("0x")
                .trim_start_matches("0X")
                .chars()
                .all(|c| c == '0')
    }

    /// 20-byte hex literal, optionally wrapped in `address(..)`.
    pub fn is_address_literal(&self) -> bool {
        let inner = self.strip_casts();
        if !matches!(inner.kind, ExprKind::Literal(LiteralKind::Number)) {
            return false;
        }
        match inner.text.strip_prefix("0x").or_else(|| inner.text.strip_prefix("0X")) {
            Some(digits) => digits.len() == 40 && digits.chars().all(|c| c.is_ascii_hexdigit()),
            None => false,
        }
    }

    pub fn is_call(&self) -> bool {
        matches!(self.kind, ExprKind::Call { .. })
    }
}

fn strip_options(expr: &Expr) -> &Expr {
    match &expr.kind {
        ExprKind::CallOptions { base, .. } => strip_options(base),
        _ => expr,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CallTarget {
    External { receiver: String, member: String },
    Internal { name: String },
    Builtin { name: String },
}

#[derive(Debug, Clone)]
pub struct CallSite {
    pub target: CallTarget,
    pub statement_index: usize,
    pub span: Span,
    pub text: String,
}

impl CallSite {
    pub fn is_external(&self) -> bool {
        matches!(self.target, CallTarget::External { .. })
    }
}

/// A storage-typed local: explicit `storage`, or a reference type with no
/// location (pre-0.5 default).
#[derive(Debug, Clone)]
pub struct StorageBinding {
    pub name: String,
    pub type_name: String,
    pub block: BlockId,
    /// Slot expression the binding points at; `None` when declared without
    /// an initializer.
    pub slot: Option<Expr>,
    /// The declaration assigns a value (possibly through a tuple).
    pub initialized: bool,
    pub explicit: bool,
    pub statement_index: usize,
    pub span: Span,
}

impl StorageBinding {
    /// State variable this binding aliases, when the slot expression is rooted
    /// in one.
    pub fn aliased_state<'a>(&'a self, contract: &Contract) -> Option<&'a str> {
        let root = self.slot.as_ref()?.root_identifier()?;
        contract.is_state_variable(root).then_some(root)
    }
}
