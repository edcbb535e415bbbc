//! Lowers a tree-sitter Solidity syntax tree into the [`ir`](super::ir) model.
//!
//! The grammar wraps most constructs in `statement` / `expression` nodes and its
//! field names have drifted between releases, so every accessor here tries the
//! field first and falls back to child position.

use super::ir::*;
use crate::core::ParseError;
use std::collections::HashMap;
use streaming_iterator::StreamingIterator;
use tree_sitter::{Language, Node, Parser, Query, QueryCursor};

const ERROR_QUERY: &str = "(ERROR) @error";

/// Members that always transfer control to the receiver, whatever its type.
const LOW_LEVEL_MEMBERS: &[&str] = &[
    "call",
    "send",
    "transfer",
    "delegatecall",
    "staticcall",
    "callcode",
];

const BUILTIN_FUNCTIONS: &[&str] = &[
    "require",
    "assert",
    "revert",
    "keccak256",
    "sha3",
    "sha256",
    "ripemd160",
    "ecrecover",
    "addmod",
    "mulmod",
    "blockhash",
    "gasleft",
    "selfdestruct",
    "suicide",
    "type",
];

const BUILTIN_OBJECTS: &[&str] = &["abi", "msg", "block", "tx", "string", "bytes"];

const BUILTIN_MEMBERS: &[&str] = &["push", "pop", "length", "concat", "encode", "decode"];

pub fn normalize(source: &str) -> Result<Vec<Contract>, ParseError> {
    let language: Language = tree_sitter_solidity::LANGUAGE.into();
    let mut parser = Parser::new();
    parser
        .set_language(&language)
        .map_err(|e| ParseError::Grammar(e.to_string()))?;

    let tree = parser
        .parse(source, None)
        .ok_or_else(|| ParseError::Grammar("parser produced no tree".to_string()))?;
    let root = tree.root_node();

    if root.has_error() {
        return Err(syntax_error(&language, root, source)?);
    }

    let normalizer = Normalizer { source };
    normalizer.source_unit(root)
}

fn syntax_error(language: &Language, root: Node, source: &str) -> Result<ParseError, ParseError> {
    let query = Query::new(language, ERROR_QUERY).map_err(|e| ParseError::Grammar(e.to_string()))?;
    let mut cursor = QueryCursor::new();
    let mut matches = cursor.matches(&query, root, source.as_bytes());

    let mut first: Option<Node> = None;
    matches.advance();
    while let Some(m) = matches.get() {
        for capture in m.captures {
            if first.map_or(true, |f| capture.node.start_byte() < f.start_byte()) {
                first = Some(capture.node);
            }
        }
        matches.advance();
    }

    let missing = first_missing(root);
    let pick_missing = match (first, missing) {
        (Some(err), Some(miss)) => miss.start_byte() < err.start_byte(),
        (None, Some(_)) => true,
        _ => false,
    };

    if pick_missing {
        if let Some(node) = missing {
            let span = span_of(node);
            return Ok(ParseError::Missing {
                line: span.line,
                column: span.column,
                expected: node.kind().to_string(),
            });
        }
    }

    let (span, snippet) = match first {
        Some(node) => (span_of(node), snippet_of(&source[node.byte_range()])),
        None => (span_of(root), String::new()),
    };
    Ok(ParseError::Syntax {
        line: span.line,
        column: span.column,
        snippet,
    })
}

fn first_missing(node: Node) -> Option<Node> {
    if node.is_missing() {
        return Some(node);
    }
    if !node.has_error() {
        return None;
    }
    let mut cursor = node.walk();
    let children: Vec<Node> = node.children(&mut cursor).collect();
    children.into_iter().find_map(first_missing)
}

fn snippet_of(text: &str) -> String {
    let line = text.lines().next().unwrap_or("").trim();
    line.chars().take(40).collect()
}

fn span_of(node: Node) -> Span {
    let pos = node.start_position();
    Span::new(pos.row + 1, pos.column + 1)
}

fn named<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .filter(|c| c.kind() != "comment")
        .collect()
}

fn all<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.children(&mut cursor).collect()
}

/// Keyword child, whether the grammar exposes it as a bare token or as a
/// named node (`unchecked`).
fn has_token(node: Node, token: &str) -> bool {
    all(node).iter().any(|c| c.kind() == token)
}

/// Strips the grammar's single-child wrapper nodes.
fn unwrap(mut node: Node) -> Node {
    while matches!(node.kind(), "statement" | "expression" | "_expression" | "literal") {
        match named(node).as_slice() {
            [only] => node = *only,
            _ => break,
        }
    }
    node
}

fn first_of_kind<'t>(node: Node<'t>, kinds: &[&str]) -> Option<Node<'t>> {
    named(node).into_iter().find(|c| kinds.contains(&c.kind()))
}

/// Named child following the first `token`.
fn named_after<'t>(node: Node<'t>, token: &str) -> Option<Node<'t>> {
    let mut seen = false;
    for child in all(node) {
        if child.kind() == token {
            seen = true;
        } else if seen && child.is_named() && child.kind() != "comment" {
            return Some(child);
        }
    }
    None
}

/// Base of a postfix node: the indexed, accessed or called expression.
fn postfix_base(node: Node) -> Option<Node> {
    let field = match node.kind() {
        "array_access" => "base",
        "member_expression" => "object",
        "call_expression" => "function",
        _ => return None,
    };
    node.child_by_field_name(field).map(unwrap)
}

/// `[]` and `.` carry no precedence in the grammar, so `a && b[i].c` parses as
/// `((a && b)[i]).c`. Returns the operator node closed too early together with
/// the postfix chain applied to it, outermost first.
fn leaked_operator(node: Node) -> Option<(Node, Vec<Node>)> {
    let mut chain = Vec::new();
    let mut current = unwrap(node);
    while let Some(base) = postfix_base(current) {
        chain.push(current);
        if matches!(base.kind(), "binary_expression" | "unary_expression") {
            return Some((base, chain));
        }
        current = base;
    }
    None
}

fn precedence(operator: &str) -> u8 {
    match operator {
        "||" => 1,
        "&&" => 2,
        "==" | "!=" => 3,
        "<" | ">" | "<=" | ">=" => 4,
        "|" => 5,
        "^" => 6,
        "&" => 7,
        "<<" | ">>" => 8,
        "+" | "-" => 9,
        "*" | "/" | "%" => 10,
        "**" => 11,
        _ => 12,
    }
}

fn location_token(node: Node) -> Option<DataLocation> {
    if let Some(loc) = node.child_by_field_name("location") {
        if let Some(location) = DataLocation::from_keyword(loc.kind()) {
            return Some(location);
        }
    }
    all(node)
        .into_iter()
        .find_map(|c| DataLocation::from_keyword(c.kind()))
}

/// Shape of a contract needed while lowering its functions.
struct ContractShape<'a> {
    name: &'a str,
    structs: &'a [String],
    enums: &'a [String],
    known_contracts: &'a [String],
    state_types: HashMap<&'a str, &'a str>,
}

impl ContractShape<'_> {
    fn is_reference_type(&self, type_name: &str) -> bool {
        let ty = type_name.trim();
        ty.ends_with(']')
            || ty.starts_with("mapping")
            || self
                .structs
                .iter()
                .any(|s| s == ty || ty.ends_with(&format!(".{}", s)))
    }

    fn is_contract_type(&self, type_name: &str) -> bool {
        let ty = type_name.trim();
        if self.known_contracts.iter().any(|c| c == ty) {
            return true;
        }
        if self.structs.iter().any(|s| s == ty) || self.enums.iter().any(|e| e == ty) {
            return false;
        }
        !is_elementary_type(ty)
            && ty.chars().next().is_some_and(|c| c.is_ascii_uppercase())
            && ty.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    }
}

struct Normalizer<'s> {
    source: &'s str,
}

impl<'s> Normalizer<'s> {
    fn text(&self, node: Node) -> &'s str {
        &self.source[node.byte_range()]
    }

    fn type_text(&self, node: Node) -> String {
        self.text(node).split_whitespace().collect::<Vec<_>>().join(" ")
    }

    fn source_unit(&self, root: Node) -> Result<Vec<Contract>, ParseError> {
        let declarations: Vec<Node> = named(root)
            .into_iter()
            .map(unwrap)
            .filter(|n| {
                matches!(
                    n.kind(),
                    "contract_declaration" | "library_declaration" | "interface_declaration"
                )
            })
            .collect();

        for node in named(root) {
            let node = unwrap(node);
            if node.kind() == "function_definition" {
                let span = span_of(node);
                let name = node
                    .child_by_field_name("name")
                    .map(|n| self.text(n))
                    .unwrap_or("<anonymous>");
                return Err(ParseError::Unsupported {
                    construct: format!("free function `{}`", name),
                    line: span.line,
                    column: span.column,
                });
            }
        }

        if declarations.is_empty() {
            return Err(ParseError::NoContract);
        }

        let known: Vec<String> = declarations
            .iter()
            .filter_map(|n| self.name_of(*n))
            .map(str::to_string)
            .collect();

        declarations
            .into_iter()
            .map(|node| self.contract(node, &known))
            .collect()
    }

    fn name_of(&self, node: Node) -> Option<&'s str> {
        node.child_by_field_name("name")
            .or_else(|| first_of_kind(node, &["identifier"]))
            .map(|n| self.text(n))
    }

    fn contract(&self, node: Node, known: &[String]) -> Result<Contract, ParseError> {
        let name = self.name_of(node).unwrap_or("<anonymous>").to_string();
        let kind = match node.kind() {
            "library_declaration" => ContractKind::Library,
            "interface_declaration" => ContractKind::Interface,
            _ if has_token(node, "abstract") => ContractKind::Abstract,
            _ => ContractKind::Contract,
        };

        let Some(body) = node
            .child_by_field_name("body")
            .or_else(|| first_of_kind(node, &["contract_body"]))
        else {
            return Ok(Contract {
                name,
                kind,
                span: span_of(node),
                structs: Vec::new(),
                enums: Vec::new(),
                known_contracts: known.to_vec(),
                state_variables: Vec::new(),
                functions: Vec::new(),
            });
        };

        let members: Vec<Node> = named(body).into_iter().map(unwrap).collect();

        let mut structs = Vec::new();
        let mut enums = Vec::new();
        for member in &members {
            match member.kind() {
                "struct_declaration" | "struct_definition" => {
                    if let Some(n) = self.name_of(*member) {
                        structs.push(n.to_string());
                    }
                }
                "enum_declaration" | "enum_definition" => {
                    if let Some(n) = self.name_of(*member) {
                        enums.push(n.to_string());
                    }
                }
                _ => {}
            }
        }

        let mut state_variables: Vec<StateVariable> = Vec::new();
        for member in members
            .iter()
            .filter(|m| m.kind() == "state_variable_declaration")
        {
            let variable = self.state_variable(*member);
            if state_variables.iter().any(|v| v.name == variable.name) {
                return Err(ParseError::DuplicateStateVariable {
                    contract: name,
                    name: variable.name,
                    line: variable.span.line,
                });
            }
            state_variables.push(variable);
        }

        let shape = ContractShape {
            name: &name,
            structs: &structs,
            enums: &enums,
            known_contracts: known,
            state_types: state_variables
                .iter()
                .map(|v| (v.name.as_str(), v.type_name.as_str()))
                .collect(),
        };

        let mut functions = Vec::new();
        for member in &members {
            let kind = match member.kind() {
                "function_definition" => FunctionKind::Function,
                "constructor_definition" => FunctionKind::Constructor,
                "modifier_definition" => FunctionKind::Modifier,
                "fallback_receive_definition" => FunctionKind::Fallback,
                _ => continue,
            };
            functions.push(self.function(*member, kind, &shape)?);
        }

        Ok(Contract {
            span: span_of(node),
            kind,
            structs,
            enums,
            known_contracts: known.to_vec(),
            state_variables,
            functions,
            name,
        })
    }

    fn state_variable(&self, node: Node) -> StateVariable {
        let type_node = node
            .child_by_field_name("type")
            .or_else(|| first_of_kind(node, &["type_name"]));
        let name = node
            .child_by_field_name("name")
            .or_else(|| first_of_kind(node, &["identifier"]))
            .map(|n| self.text(n).to_string())
            .unwrap_or_default();
        let initializer = node
            .child_by_field_name("value")
            .or_else(|| named_after(node, "="))
            .map(|n| self.expr(n));

        let children = all(node);
        let mutability = if children.iter().any(|c| c.kind() == "constant") {
            Mutability::Constant
        } else if children.iter().any(|c| c.kind() == "immutable") {
            Mutability::Immutable
        } else {
            Mutability::Mutable
        };
        let visibility = first_of_kind(node, &["visibility"]).map(|v| self.text(v).to_string());

        StateVariable {
            name,
            type_name: type_node.map(|t| self.type_text(t)).unwrap_or_default(),
            visibility,
            mutability,
            initializer,
            span: span_of(node),
            text: self.text(node).to_string(),
        }
    }

    fn function(
        &self,
        node: Node,
        mut kind: FunctionKind,
        shape: &ContractShape,
    ) -> Result<Function, ParseError> {
        let declared_name = node.child_by_field_name("name").map(|n| self.text(n));
        let name = match kind {
            FunctionKind::Constructor => "constructor".to_string(),
            FunctionKind::Fallback => {
                if has_token(node, "receive") {
                    kind = FunctionKind::Receive;
                    "receive".to_string()
                } else {
                    "fallback".to_string()
                }
            }
            _ => match declared_name {
                // Pre-0.4.22 constructors are functions named after the contract.
                Some(n) if kind == FunctionKind::Function && n == shape.name => {
                    kind = FunctionKind::Constructor;
                    "constructor".to_string()
                }
                Some(n) => n.to_string(),
                None => {
                    kind = FunctionKind::Fallback;
                    "fallback".to_string()
                }
            },
        };

        let visibility = first_of_kind(node, &["visibility"])
            .and_then(|v| Visibility::from_keyword(self.text(v)))
            .unwrap_or(match kind {
                FunctionKind::Modifier => Visibility::Internal,
                FunctionKind::Fallback | FunctionKind::Receive => Visibility::External,
                _ => Visibility::Public,
            });

        let parameters: Vec<Parameter> = named(node)
            .into_iter()
            .filter(|c| c.kind() == "parameter")
            .map(|p| self.parameter(p))
            .collect();

        let modifiers = named(node)
            .into_iter()
            .filter(|c| c.kind() == "modifier_invocation")
            .map(|m| {
                let text = self.text(m);
                text.split('(').next().unwrap_or(text).trim().to_string()
            })
            .collect();

        let mut builder = BodyBuilder {
            norm: self,
            shape,
            next_block: 0,
            next_statement: 0,
            blocks: HashMap::new(),
            bindings: Vec::new(),
            local_types: parameters
                .iter()
                .filter(|p| !p.name.is_empty())
                .map(|p| (p.name.clone(), p.type_name.clone()))
                .collect(),
        };

        let body = node
            .child_by_field_name("body")
            .or_else(|| first_of_kind(node, &["function_body"]))
            .map(|b| builder.block(b, BlockKind::Body, None))
            .transpose()?;

        let mut function = Function {
            name,
            kind,
            visibility,
            parameters,
            modifiers,
            span: span_of(node),
            body,
            blocks: builder.blocks,
            call_sites: Vec::new(),
            storage_bindings: builder.bindings,
            local_types: builder.local_types,
        };
        function.call_sites = collect_call_sites(&function, shape);
        Ok(function)
    }

    fn parameter(&self, node: Node) -> Parameter {
        let type_name = node
            .child_by_field_name("type")
            .or_else(|| first_of_kind(node, &["type_name"]))
            .map(|t| self.type_text(t))
            .unwrap_or_default();
        let name = node
            .child_by_field_name("name")
            .or_else(|| first_of_kind(node, &["identifier"]))
            .map(|n| self.text(n).to_string())
            .unwrap_or_default();
        Parameter {
            name,
            type_name,
            location: location_token(node),
        }
    }

    fn expr(&self, node: Node) -> Expr {
        let node = unwrap(node);
        if let Some((operator, chain)) = leaked_operator(node) {
            return self.graft(operator, &chain);
        }
        let span = span_of(node);
        let text = self.text(node).to_string();
        let children = named(node);
        let field = |name: &str, fallback: usize| {
            node.child_by_field_name(name)
                .or_else(|| children.get(fallback).copied())
                .map(|n| Box::new(self.expr(n)))
        };

        let kind = match node.kind() {
            "identifier" => ExprKind::Identifier(text.clone()),
            "number_literal" => ExprKind::Literal(LiteralKind::Number),
            "string_literal" | "string" | "unicode_string_literal" => {
                ExprKind::Literal(LiteralKind::String)
            }
            "boolean_literal" | "true" | "false" => ExprKind::Literal(LiteralKind::Bool),
            "hex_string_literal" => ExprKind::Literal(LiteralKind::HexString),
            "parenthesized_expression" if children.len() == 1 => return self.expr(children[0]),
            "member_expression" => {
                let object = field("object", 0);
                let member = node
                    .child_by_field_name("property")
                    .or_else(|| children.last().copied())
                    .map(|n| self.text(n).to_string())
                    .unwrap_or_default();
                match object {
                    Some(object) => ExprKind::Member { object, member },
                    None => ExprKind::Identifier(text.clone()),
                }
            }
            "array_access" => match field("base", 0) {
                Some(base) => ExprKind::Index {
                    base,
                    index: node
                        .child_by_field_name("index")
                        .or_else(|| children.get(1).copied())
                        .map(|n| Box::new(self.expr(n))),
                },
                None => ExprKind::Other(Vec::new()),
            },
            "call_expression" => {
                let callee_node = node
                    .child_by_field_name("function")
                    .or_else(|| children.first().copied());
                let arguments = children
                    .iter()
                    .filter(|c| Some(**c) != callee_node)
                    .map(|c| self.argument(*c))
                    .collect();
                match callee_node {
                    Some(callee) => ExprKind::Call {
                        callee: Box::new(self.expr(callee)),
                        arguments,
                    },
                    None => ExprKind::Other(arguments),
                }
            }
            "struct_expression" => {
                let base_node = node
                    .child_by_field_name("type")
                    .or_else(|| children.first().copied());
                let options = children
                    .iter()
                    .filter(|c| Some(**c) != base_node)
                    .map(|c| self.argument(*c))
                    .collect();
                match base_node {
                    Some(base) => ExprKind::CallOptions {
                        base: Box::new(self.expr(base)),
                        options,
                    },
                    None => ExprKind::Other(options),
                }
            }
            "assignment_expression" | "augmented_assignment_expression" => {
                let operator = if node.kind() == "assignment_expression" {
                    "=".to_string()
                } else {
                    self.operator(node, &children)
                };
                match (field("left", 0), field("right", children.len().saturating_sub(1))) {
                    (Some(target), Some(value)) => ExprKind::Assign {
                        target,
                        operator,
                        value,
                    },
                    _ => ExprKind::Other(self.exprs(&children)),
                }
            }
            "binary_expression" => {
                let operator = self.operator(node, &children);
                let operands = (
                    node.child_by_field_name("left").or_else(|| children.first().copied()),
                    node.child_by_field_name("right").or_else(|| children.last().copied()),
                );
                if let (Some(left), Some(right)) = operands {
                    if let Some((leaked, chain)) = leaked_operator(left) {
                        return self.nest(leaked, &chain, node, &operator, &self.expr(right));
                    }
                }
                match (field("left", 0), field("right", children.len().saturating_sub(1))) {
                    (Some(left), Some(right)) => ExprKind::Binary {
                        left,
                        operator,
                        right,
                    },
                    _ => ExprKind::Other(self.exprs(&children)),
                }
            }
            "unary_expression" | "update_expression" => {
                let operator = self.operator(node, &children);
                match field("argument", 0) {
                    Some(operand) => ExprKind::Unary { operator, operand },
                    None => ExprKind::Other(Vec::new()),
                }
            }
            "ternary_expression" if children.len() == 3 => ExprKind::Conditional {
                condition: Box::new(self.expr(children[0])),
                then_value: Box::new(self.expr(children[1])),
                else_value: Box::new(self.expr(children[2])),
            },
            "tuple_expression" | "inline_array_expression" | "parenthesized_expression" => {
                ExprKind::Tuple(self.exprs(&children))
            }
            // `address(x)`, `uint256(x)`, `payable(x)` become calls on the type
            // name so casts peel uniformly.
            "type_cast_expression" | "payable_conversion_expression" => {
                let callee = if node.kind() == "payable_conversion_expression" {
                    "payable".to_string()
                } else {
                    children
                        .first()
                        .map(|t| self.type_text(*t))
                        .unwrap_or_default()
                };
                let arguments = children
                    .last()
                    .filter(|_| children.len() > 1 || node.kind() == "payable_conversion_expression")
                    .map(|a| vec![self.argument(*a)])
                    .unwrap_or_default();
                ExprKind::Call {
                    callee: Box::new(Expr {
                        kind: ExprKind::Identifier(callee.clone()),
                        span,
                        text: callee,
                    }),
                    arguments,
                }
            }
            _ => ExprKind::Other(self.exprs(&children)),
        };

        Expr { kind, span, text }
    }

    /// Re-applies `chain` to the rightmost operand of `operator`.
    fn graft(&self, operator: Node, chain: &[Node]) -> Expr {
        let end = chain.first().map_or(operator.end_byte(), |n| n.end_byte());
        let children = named(operator);
        let symbol = self.operator(operator, &children);
        let kind = if operator.kind() == "unary_expression" {
            match operator
                .child_by_field_name("argument")
                .or_else(|| children.first().copied())
            {
                Some(argument) => ExprKind::Unary {
                    operator: symbol,
                    operand: Box::new(self.with_postfix(argument, chain)),
                },
                None => ExprKind::Other(Vec::new()),
            }
        } else {
            let left = operator
                .child_by_field_name("left")
                .or_else(|| children.first().copied());
            let right = operator
                .child_by_field_name("right")
                .or_else(|| children.last().copied());
            match (left, right) {
                (Some(left), Some(right)) => ExprKind::Binary {
                    left: Box::new(self.expr(left)),
                    operator: symbol,
                    right: Box::new(self.with_postfix(right, chain)),
                },
                _ => ExprKind::Other(Vec::new()),
            }
        };
        Expr {
            kind,
            span: span_of(operator),
            text: self.source[operator.start_byte()..end].to_string(),
        }
    }

    fn with_postfix(&self, operand: Node, chain: &[Node]) -> Expr {
        let operand = unwrap(operand);
        if matches!(operand.kind(), "binary_expression" | "unary_expression") {
            return self.graft(operand, chain);
        }
        let start = operand.start_byte();
        chain
            .iter()
            .rev()
            .fold(self.expr(operand), |inner, postfix| self.postfix(*postfix, inner, start))
    }

    fn postfix(&self, node: Node, inner: Expr, start: usize) -> Expr {
        let span = inner.span;
        let kind = match node.kind() {
            "array_access" => ExprKind::Index {
                base: Box::new(inner),
                index: node
                    .child_by_field_name("index")
                    .map(|n| Box::new(self.expr(n))),
            },
            "member_expression" => ExprKind::Member {
                object: Box::new(inner),
                member: node
                    .child_by_field_name("property")
                    .map(|n| self.text(n).to_string())
                    .unwrap_or_default(),
            },
            _ => {
                let callee = node.child_by_field_name("function");
                ExprKind::Call {
                    callee: Box::new(inner),
                    arguments: named(node)
                        .into_iter()
                        .filter(|c| Some(*c) != callee)
                        .map(|c| self.argument(c))
                        .collect(),
                }
            }
        };
        Expr {
            kind,
            span,
            text: self.source[start..node.end_byte()].to_string(),
        }
    }

    /// `leaked <op> right` from a binary node whose left operand was closed
    /// early: `<op> right` sinks below every looser operator on the right spine.
    fn nest(&self, leaked: Node, chain: &[Node], outer: Node, operator: &str, right: &Expr) -> Expr {
        let leaked = unwrap(leaked);
        let text = self.source[leaked.start_byte()..outer.end_byte()].to_string();
        if leaked.kind() == "binary_expression" {
            let children = named(leaked);
            let symbol = self.operator(leaked, &children);
            let operands = (
                leaked.child_by_field_name("left").or_else(|| children.first().copied()),
                leaked.child_by_field_name("right").or_else(|| children.last().copied()),
            );
            if let (Some(l), Some(r), true) = (operands.0, operands.1, precedence(&symbol) < precedence(operator)) {
                return Expr {
                    kind: ExprKind::Binary {
                        left: Box::new(self.expr(l)),
                        operator: symbol,
                        right: Box::new(self.nest(r, chain, outer, operator, right)),
                    },
                    span: span_of(leaked),
                    text,
                };
            }
        }
        let left = self.with_postfix(leaked, chain);
        Expr {
            span: left.span,
            kind: ExprKind::Binary {
                left: Box::new(left),
                operator: operator.to_string(),
                right: Box::new(right.clone()),
            },
            text,
        }
    }

    fn exprs(&self, nodes: &[Node]) -> Vec<Expr> {
        nodes.iter().map(|n| self.expr(*n)).collect()
    }

    /// A `call_argument` or `{name: value}` entry lowered to its value.
    fn argument(&self, node: Node) -> Expr {
        if matches!(node.kind(), "call_argument" | "struct_field_assignment") {
            if let Some(value) = node.child_by_field_name("value") {
                return self.expr(value);
            }
            let children = named(node);
            match children.as_slice() {
                [only] => return self.expr(*only),
                [.., last] if node.kind() == "struct_field_assignment" => return self.expr(*last),
                _ => {
                    return Expr {
                        kind: ExprKind::Other(self.exprs(&children)),
                        span: span_of(node),
                        text: self.text(node).to_string(),
                    }
                }
            }
        }
        self.expr(node)
    }

    fn operator(&self, node: Node, children: &[Node]) -> String {
        if let Some(op) = node.child_by_field_name("operator") {
            return self.text(op).to_string();
        }
        all(node)
            .into_iter()
            .find(|c| !c.is_named() && !children.contains(c) && !matches!(c.kind(), "(" | ")"))
            .map(|c| self.text(c).to_string())
            .unwrap_or_default()
    }
}

struct BodyBuilder<'n, 's, 'c> {
    norm: &'n Normalizer<'s>,
    shape: &'n ContractShape<'c>,
    next_block: BlockId,
    next_statement: usize,
    blocks: HashMap<BlockId, BlockInfo>,
    bindings: Vec<StorageBinding>,
    local_types: HashMap<String, String>,
}

impl BodyBuilder<'_, '_, '_> {
    fn open_block(&mut self, node: Node, kind: BlockKind, parent: Option<BlockId>) -> BlockId {
        let id = self.next_block;
        self.next_block += 1;
        self.blocks.insert(
            id,
            BlockInfo {
                id,
                parent,
                kind,
                span: span_of(node),
            },
        );
        id
    }

    fn take_index(&mut self) -> usize {
        let index = self.next_statement;
        self.next_statement += 1;
        index
    }

    /// A `{ ... }` node whose named children are statements.
    fn block(
        &mut self,
        node: Node,
        kind: BlockKind,
        parent: Option<BlockId>,
    ) -> Result<Block, ParseError> {
        let kind = if has_token(node, "unchecked") {
            BlockKind::Unchecked
        } else {
            kind
        };
        let id = self.open_block(node, kind, parent);
        let mut statements = Vec::new();
        for child in named(node).into_iter().filter(|c| c.kind() != "unchecked") {
            self.statement(child, id, &mut statements)?;
        }
        Ok(Block {
            id,
            parent,
            kind,
            span: span_of(node),
            statements,
        })
    }

    /// An if/else or loop body, which may be a bare statement instead of a block.
    fn branch(&mut self, node: Node, kind: BlockKind, parent: BlockId) -> Result<Block, ParseError> {
        let inner = unwrap(node);
        if inner.kind() == "block_statement" {
            return self.block(inner, kind, Some(parent));
        }
        let id = self.open_block(inner, kind, Some(parent));
        let mut statements = Vec::new();
        self.statement(inner, id, &mut statements)?;
        Ok(Block {
            id,
            parent: Some(parent),
            kind,
            span: span_of(inner),
            statements,
        })
    }

    fn statement(
        &mut self,
        node: Node,
        block: BlockId,
        out: &mut Vec<Statement>,
    ) -> Result<(), ParseError> {
        let node = unwrap(node);
        let norm = self.norm;
        let children = named(node);

        let (index, kind) = match node.kind() {
            "block_statement" => {
                let index = self.take_index();
                let inner = self.block(node, BlockKind::Nested, Some(block))?;
                (index, StatementKind::Block(inner))
            }
            "variable_declaration_statement" => {
                let index = self.take_index();
                (index, self.declaration(node, block, index))
            }
            "if_statement" => {
                let index = self.take_index();
                let condition_node = node
                    .child_by_field_name("condition")
                    .or_else(|| children.first().copied());
                let condition = condition_node
                    .map(|c| norm.expr(c))
                    .unwrap_or_else(|| empty_expr(node, norm));
                let branches: Vec<Node> = children
                    .iter()
                    .copied()
                    .filter(|c| Some(*c) != condition_node)
                    .collect();
                let then_node = branches.first().copied();
                let else_node = named_after(node, "else");

                let then_branch = match then_node {
                    Some(n) => self.branch(n, BlockKind::Then, block)?,
                    None => self.empty_block(node, BlockKind::Then, block),
                };
                let else_branch = else_node
                    .map(|n| self.branch(n, BlockKind::Else, block))
                    .transpose()?;
                (
                    index,
                    StatementKind::If {
                        condition,
                        then_branch,
                        else_branch,
                    },
                )
            }
            "for_statement" | "while_statement" | "do_while_statement" => {
                let split = if node.kind() == "do_while_statement" {
                    children.split_first()
                } else {
                    children.split_last()
                };
                let Some((body_node, header_nodes)) = split else {
                    return Ok(());
                };
                let mut header = Vec::new();
                for part in header_nodes {
                    let part = unwrap(*part);
                    match part.kind() {
                        // The loop variable's declaration runs once, ahead of the loop.
                        "variable_declaration_statement" => self.statement(part, block, out)?,
                        "expression_statement" => {
                            header.extend(named(part).into_iter().map(|e| norm.expr(e)))
                        }
                        _ => header.push(norm.expr(part)),
                    }
                }
                let index = self.take_index();
                let body = self.branch(*body_node, BlockKind::Loop, block)?;
                (index, StatementKind::Loop { header, body })
            }
            "expression_statement" => {
                let kind = match children.first() {
                    Some(e) => StatementKind::Expression(norm.expr(*e)),
                    None => StatementKind::Other(Vec::new()),
                };
                (self.take_index(), kind)
            }
            "return_statement" => (
                self.take_index(),
                StatementKind::Return(children.first().map(|e| norm.expr(*e))),
            ),
            "emit_statement" => (
                self.take_index(),
                StatementKind::Emit(children.iter().map(|c| norm.argument(*c)).collect()),
            ),
            "revert_statement" => (
                self.take_index(),
                StatementKind::Revert(children.iter().map(|c| norm.argument(*c)).collect()),
            ),
            "assembly_statement" => (self.take_index(), StatementKind::Assembly),
            _ => {
                // try/catch and friends: keep the evaluated expressions, then
                // lower any nested blocks as plain nested statements.
                let index = self.take_index();
                let mut exprs = Vec::new();
                let mut nested = Vec::new();
                for child in children {
                    let inner = unwrap(child);
                    match inner.kind() {
                        "block_statement" => nested.push(inner),
                        "catch_clause" => nested.extend(
                            named(inner)
                                .into_iter()
                                .map(unwrap)
                                .filter(|c| c.kind() == "block_statement"),
                        ),
                        "return_type_definition" => {}
                        _ => exprs.push(norm.expr(inner)),
                    }
                }
                out.push(self.make(node, index, block, StatementKind::Other(exprs)));
                for inner in nested {
                    self.statement(inner, block, out)?;
                }
                return Ok(());
            }
        };

        out.push(self.make(node, index, block, kind));
        Ok(())
    }

    fn empty_block(&mut self, node: Node, kind: BlockKind, parent: BlockId) -> Block {
        let id = self.open_block(node, kind, Some(parent));
        Block {
            id,
            parent: Some(parent),
            kind,
            span: span_of(node),
            statements: Vec::new(),
        }
    }

    fn make(&self, node: Node, index: usize, block: BlockId, kind: StatementKind) -> Statement {
        Statement {
            index,
            block,
            span: span_of(node),
            text: self.norm.text(node).to_string(),
            kind,
        }
    }

    fn declaration(&mut self, node: Node, block: BlockId, index: usize) -> StatementKind {
        let norm = self.norm;
        let mut declarators = Vec::new();
        for child in named(node) {
            match child.kind() {
                "variable_declaration" => declarators.push(child),
                "variable_declaration_tuple" => declarators.extend(
                    named(child)
                        .into_iter()
                        .filter(|c| c.kind() == "variable_declaration"),
                ),
                _ => {}
            }
        }

        let value_node = node.child_by_field_name("value").or_else(|| {
            named(node).into_iter().find(|c| {
                !matches!(
                    c.kind(),
                    "variable_declaration" | "variable_declaration_tuple"
                )
            })
        });
        let value = value_node.map(|v| norm.expr(v));

        let variables: Vec<LocalVariable> = declarators
            .into_iter()
            .map(|d| {
                let type_name = d
                    .child_by_field_name("type")
                    .or_else(|| first_of_kind(d, &["type_name"]))
                    .map(|t| norm.type_text(t))
                    .unwrap_or_default();
                let name = d
                    .child_by_field_name("name")
                    .or_else(|| named(d).into_iter().rev().find(|c| c.kind() == "identifier"))
                    .map(|n| norm.text(n).to_string())
                    .unwrap_or_default();
                LocalVariable {
                    name,
                    type_name,
                    location: location_token(d),
                }
            })
            .collect();

        for variable in &variables {
            if variable.name.is_empty() {
                continue;
            }
            self.local_types
                .insert(variable.name.clone(), variable.type_name.clone());

            let explicit = variable.location == Some(DataLocation::Storage);
            let implicit =
                variable.location.is_none() && self.shape.is_reference_type(&variable.type_name);
            if explicit || implicit {
                self.bindings.push(StorageBinding {
                    name: variable.name.clone(),
                    type_name: variable.type_name.clone(),
                    block,
                    slot: if variables.len() == 1 { value.clone() } else { None },
                    initialized: value.is_some(),
                    explicit,
                    statement_index: index,
                    span: span_of(node),
                });
            }
        }

        StatementKind::Declaration { variables, value }
    }
}

fn empty_expr(node: Node, norm: &Normalizer) -> Expr {
    Expr {
        kind: ExprKind::Other(Vec::new()),
        span: span_of(node),
        text: norm.text(node).to_string(),
    }
}

fn collect_call_sites(function: &Function, shape: &ContractShape) -> Vec<CallSite> {
    let mut sites = Vec::new();
    for statement in function.statements() {
        for expr in statement.expressions() {
            gather_calls(expr, false, &mut |call| {
                sites.push(CallSite {
                    target: classify(call, function, shape),
                    statement_index: statement.index,
                    span: call.span,
                    text: call.text.clone(),
                });
            });
        }
    }
    sites
}

/// Visits every call, skipping a call that is itself the callee of an outer
/// call (`a.call.value(1)()` is one call site).
fn gather_calls<'e>(expr: &'e Expr, is_callee: bool, visit: &mut dyn FnMut(&'e Expr)) {
    if let ExprKind::Call { callee, arguments } = &expr.kind {
        if !is_callee {
            visit(expr);
        }
        gather_calls(callee, true, visit);
        for argument in arguments {
            gather_calls(argument, false, visit);
        }
        return;
    }
    if let ExprKind::CallOptions { base, options } = &expr.kind {
        gather_calls(base, is_callee, visit);
        for option in options {
            gather_calls(option, false, visit);
        }
        return;
    }
    for child in expr.children() {
        gather_calls(child, false, visit);
    }
}

fn unwrap_callee(expr: &Expr) -> &Expr {
    match &expr.kind {
        ExprKind::CallOptions { base, .. } => unwrap_callee(base),
        ExprKind::Call { callee, .. } => unwrap_callee(callee),
        _ => expr,
    }
}

/// Any low-level member along a curried callee chain, e.g. `a.call.value(1).gas(2)`.
fn low_level_member(expr: &Expr) -> Option<(&Expr, &str)> {
    match &expr.kind {
        ExprKind::Member { object, member } => {
            if LOW_LEVEL_MEMBERS.contains(&member.as_str()) {
                Some((object, member))
            } else {
                low_level_member(object)
            }
        }
        ExprKind::CallOptions { base, .. } => low_level_member(base),
        ExprKind::Call { callee, .. } => low_level_member(callee),
        _ => None,
    }
}

fn element_type(type_name: &str) -> &str {
    let ty = type_name.trim();
    if let Some(pos) = ty.rfind("=>") {
        return ty[pos + 2..].trim_end_matches(')').trim();
    }
    match ty.find('[') {
        Some(pos) => ty[..pos].trim(),
        None => ty,
    }
}

fn receiver_type<'a>(receiver: &'a Expr, function: &'a Function, shape: &'a ContractShape) -> Option<&'a str> {
    match &receiver.kind {
        ExprKind::Identifier(name) => function
            .local_types
            .get(name)
            .map(String::as_str)
            .or_else(|| shape.state_types.get(name.as_str()).copied()),
        ExprKind::Index { base, .. } => {
            receiver_type(base, function, shape).map(element_type)
        }
        // `Token(addr).f()`
        ExprKind::Call { callee, arguments } if arguments.len() == 1 => callee.identifier(),
        _ => None,
    }
}

fn classify(call: &Expr, function: &Function, shape: &ContractShape) -> CallTarget {
    let ExprKind::Call { callee, .. } = &call.kind else {
        return CallTarget::Builtin {
            name: call.text.clone(),
        };
    };

    if let Some((receiver, member)) = low_level_member(callee) {
        return CallTarget::External {
            receiver: receiver.text.clone(),
            member: member.to_string(),
        };
    }

    match &unwrap_callee(callee).kind {
        ExprKind::Identifier(name) => {
            if BUILTIN_FUNCTIONS.contains(&name.as_str())
                || is_elementary_type(name)
                || shape.is_contract_type(name)
                || shape.structs.iter().any(|s| s == name)
            {
                CallTarget::Builtin { name: name.clone() }
            } else {
                CallTarget::Internal { name: name.clone() }
            }
        }
        ExprKind::Member { object, member } => {
            if let Some(root) = object.identifier() {
                if root == "this" || root == "super" {
                    return CallTarget::Internal {
                        name: member.clone(),
                    };
                }
                if BUILTIN_OBJECTS.contains(&root) {
                    return CallTarget::Builtin {
                        name: format!("{}.{}", root, member),
                    };
                }
                if shape.known_contracts.iter().any(|c| c == root) {
                    // Library or base-contract function called by type name.
                    return CallTarget::Internal {
                        name: member.clone(),
                    };
                }
            }
            if BUILTIN_MEMBERS.contains(&member.as_str()) {
                return CallTarget::Builtin {
                    name: member.clone(),
                };
            }
            match receiver_type(object, function, shape) {
                Some(ty) if shape.is_contract_type(ty) => CallTarget::External {
                    receiver: object.text.clone(),
                    member: member.clone(),
                },
                _ => CallTarget::Internal {
                    name: member.clone(),
                },
            }
        }
        _ => CallTarget::Builtin {
            name: callee.text.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn only_contract(source: &str) -> Contract {
        let mut contracts = normalize(source).expect("fixture parses");
        assert_eq!(contracts.len(), 1);
        contracts.remove(0)
    }

    #[test]
    fn test_state_variables_and_lines() {
        let contract = only_contract(
            r#"pragma solidity ^0.4.24;
contract Auth {
    address owner = 0x6B477781b0e68031109f21887e6B5afEAaEB002b;
    uint256 constant LIMIT = 10;
    mapping(address => uint) balances;
}
"#,
        );
        assert_eq!(contract.name, "Auth");
        assert_eq!(contract.state_variables.len(), 3);

        let owner = contract.state_variable("owner").unwrap();
        assert_eq!(owner.span.line, 3);
        assert!(owner.initializer.as_ref().unwrap().is_address_literal());
        assert_eq!(
            contract.state_variable("LIMIT").unwrap().mutability,
            Mutability::Constant
        );
    }

    #[test]
    fn test_duplicate_state_variable_rejected() {
        let err = normalize("contract A { uint x; uint x; }").unwrap_err();
        assert!(matches!(err, ParseError::DuplicateStateVariable { ref name, .. } if name == "x"));
    }

    #[test]
    fn test_syntax_error_reports_line() {
        let err = normalize("contract A {\n  function f() public {\n    uint x = ;\n  }\n}\n")
            .unwrap_err();
        assert_eq!(err.line(), Some(3));
    }

    #[test]
    fn test_no_contract_and_free_function() {
        assert_eq!(
            normalize("pragma solidity ^0.8.0;").unwrap_err(),
            ParseError::NoContract
        );
        let err = normalize("function helper() pure returns (uint) { return 1; }").unwrap_err();
        assert!(matches!(err, ParseError::Unsupported { .. }));
    }

    #[test]
    fn test_statement_indices_follow_control_flow() {
        let contract = only_contract(
            r#"contract A {
    uint total;
    function f(uint a) public {
        uint b = a;
        if (b > 1) {
            total = b;
        } else {
            total = 0;
        }
        total += 1;
    }
}
"#,
        );
        let f = contract.function("f").unwrap();
        let statements = f.statements();
        let indices: Vec<usize> = statements.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        assert!(matches!(statements[1].kind, StatementKind::If { .. }));
        assert_eq!(statements[4].span.line, 10);
        assert_eq!(f.blocks.len(), 3);
    }

    #[test]
    fn test_call_site_classification() {
        let contracts = normalize(
            r#"contract Token { function transfer(address to, uint v) public returns (bool); }
contract Bank {
    Token token;
    mapping(address => uint) bal;
    function f(uint amt) public {
        require(bal[msg.sender] >= amt);
        msg.sender.transfer(amt);
        token.transfer(msg.sender, amt);
        helper();
        msg.sender.call.value(amt)();
    }
    function helper() internal {}
}
"#,
        )
        .unwrap();
        let bank = contracts.iter().find(|c| c.name == "Bank").unwrap();
        let f = bank.function("f").unwrap();
        let targets: Vec<(usize, &CallTarget)> = f
            .call_sites
            .iter()
            .map(|c| (c.statement_index, &c.target))
            .collect();

        assert_eq!(
            targets,
            vec![
                (0, &CallTarget::Builtin { name: "require".into() }),
                (
                    1,
                    &CallTarget::External {
                        receiver: "msg.sender".into(),
                        member: "transfer".into()
                    }
                ),
                (
                    2,
                    &CallTarget::External {
                        receiver: "token".into(),
                        member: "transfer".into()
                    }
                ),
                (3, &CallTarget::Internal { name: "helper".into() }),
                (
                    4,
                    &CallTarget::External {
                        receiver: "msg.sender".into(),
                        member: "call".into()
                    }
                ),
            ]
        );
    }

    #[test]
    fn test_else_branch_keeps_its_statements() {
        let contract = only_contract(
            r#"pragma solidity ^0.4.24;
contract Store {
    struct Rec { uint f; }
    Rec[] arr;
    function f(bool c, uint i) public {
        if (c) {
            Rec storage x = arr[i];
            x.f = 1;
        } else {
            x.f = 2;
            arr.push(x);
        }
    }
}
"#,
        );
        let f = contract.function("f").unwrap();
        let StatementKind::If { else_branch: Some(else_branch), .. } = &f.statements()[0].kind else {
            panic!("expected if/else");
        };
        assert_eq!(else_branch.kind, BlockKind::Else);
        let texts: Vec<&str> = else_branch.statements.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["x.f = 2;", "arr.push(x);"]);
        assert_eq!(else_branch.statements[0].span.line, 10);
        assert!(f.statements().iter().all(|s| s.text != "else"));
    }

    #[test]
    fn test_unchecked_block_kind_and_indices() {
        let contract = only_contract(
            r#"pragma solidity ^0.8.19;
contract Counter {
    uint total;
    function bump(uint n) public {
        unchecked { total += n; }
        total = 0;
    }
}
"#,
        );
        let f = contract.function("bump").unwrap();
        let statements = f.statements();
        let texts: Vec<&str> = statements.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["unchecked { total += n; }", "total += n;", "total = 0;"]);
        assert!(f.is_in_unchecked(statements[1].block));
        assert!(!f.is_in_unchecked(statements[2].block));
    }

    #[test]
    fn test_casts_lower_to_their_argument() {
        let contract = only_contract(
            r#"contract Vault {
    address keeper;
    bytes32 seed;
    constructor() public {
        keeper = address(0x6B477781b0e68031109f21887e6B5afEAaEB002b);
        seed = bytes32(0);
    }
}
"#,
        );
        let ctor = contract.constructor().unwrap();
        let values: Vec<&Expr> = ctor
            .statements()
            .iter()
            .filter_map(|s| match &s.kind {
                StatementKind::Expression(Expr { kind: ExprKind::Assign { value, .. }, .. }) => Some(&**value),
                _ => None,
            })
            .collect();
        assert_eq!(values.len(), 2);
        assert!(values[0].is_address_literal());
        assert!(values[1].is_zero());
    }

    #[test]
    fn test_postfix_after_logical_operator_reassociates() {
        let contract = only_contract(
            r#"contract Game {
    struct G { bytes32 guess; }
    mapping(address => G) gs;
    function settle(bytes32 a) public {
        require(a != 0 && gs[msg.sender].guess == a);
    }
}
"#,
        );
        let f = contract.function("settle").unwrap();
        let StatementKind::Expression(call) = &f.statements()[0].kind else {
            panic!("expected expression statement");
        };
        let condition = &call.arguments()[0];
        let ExprKind::Binary { left, operator, right } = &condition.kind else {
            panic!("expected binary condition");
        };
        assert_eq!(operator, "&&");
        assert_eq!(left.text, "a != 0");
        assert_eq!(right.text, "gs[msg.sender].guess == a");
        assert!(matches!(&right.kind, ExprKind::Binary { operator, .. } if operator == "=="));
        assert_eq!(condition.text, "a != 0 && gs[msg.sender].guess == a");
    }

    #[test]
    fn test_storage_bindings_recorded_per_block() {
        let contracts = normalize(
            r#"contract Store {
    struct Rec { uint f; }
    Rec[] arr;
    function f(bool c, uint i) public {
        if (c) {
            Rec storage x = arr[i];
            x.f = 1;
        } else {
            Rec memory y;
            y.f = 2;
        }
    }
}
"#,
        )
        .unwrap();
        let f = contracts[0].function("f").unwrap();
        assert_eq!(f.storage_bindings.len(), 1);
        let binding = &f.storage_bindings[0];
        assert_eq!(binding.name, "x");
        assert!(binding.explicit);
        assert_eq!(f.block(binding.block).unwrap().kind, BlockKind::Then);
        assert_eq!(binding.aliased_state(&contracts[0]), Some("arr"));
    }
}
