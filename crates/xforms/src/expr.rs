//! A small XPath 1.0 subset evaluator.
//!
//! The full XForm expression language belongs to the form engine. Entity processing only needs
//! to evaluate `relevant`, `create` and `update` expressions against an answered
//! [`InstanceTree`], so this module supports:
//!
//! - location paths: absolute (`/data/q`), relative (`q`, `../q`, `.`), attribute steps (`@id`)
//! - string and number literals
//! - operators: `or`, `and`, `=`, `!=`, `<`, `<=`, `>`, `>=`, `+`, `-`, unary minus
//! - functions: `true()`, `false()`, `not()`, `boolean()`, `string()`, `number()`, `count()`,
//!   `selected()`, `string-length()`, `concat()`
//!
//! Comparison and conversion follow XPath 1.0 rules (node-set comparisons are existential,
//! booleans win over numbers, numbers over strings).

use crate::instance::{InstanceTree, NodeId};
use std::fmt;

/// Errors raised while parsing or evaluating an expression.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    #[error("unexpected character '{0}' at offset {1}")]
    UnexpectedCharacter(char, usize),

    #[error("unterminated string literal starting at offset {0}")]
    UnterminatedLiteral(usize),

    #[error("unexpected token '{0}'")]
    UnexpectedToken(String),

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("unknown function '{0}()'")]
    UnknownFunction(String),

    #[error("function '{name}()' expects {expected} argument(s), got {found}")]
    Arity {
        name: String,
        expected: &'static str,
        found: usize,
    },

    #[error("'{0}()' requires a node-set argument")]
    NotANodeSet(String),
}

// ============================================================================
// Tokens
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Slash,
    Dot,
    DotDot,
    At,
    LParen,
    RParen,
    Comma,
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Name(String),
    Literal(String),
    Number(f64),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Slash => f.write_str("/"),
            Token::Dot => f.write_str("."),
            Token::DotDot => f.write_str(".."),
            Token::At => f.write_str("@"),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
            Token::Comma => f.write_str(","),
            Token::Eq => f.write_str("="),
            Token::Neq => f.write_str("!="),
            Token::Lt => f.write_str("<"),
            Token::Le => f.write_str("<="),
            Token::Gt => f.write_str(">"),
            Token::Ge => f.write_str(">="),
            Token::Plus => f.write_str("+"),
            Token::Minus => f.write_str("-"),
            Token::Name(n) => f.write_str(n),
            Token::Literal(s) => write!(f, "'{s}'"),
            Token::Number(n) => write!(f, "{n}"),
        }
    }
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':')
}

fn tokenize(input: &str) -> Result<Vec<Token>, ExpressionError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '.' if chars.get(i + 1) == Some(&'.') => {
                tokens.push(Token::DotDot);
                i += 2;
            }
            '.' if chars.get(i + 1).is_some_and(|n| n.is_ascii_digit()) => {
                let start = i;
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse()
                    .map_err(|_| ExpressionError::UnexpectedCharacter(c, start))?;
                tokens.push(Token::Number(value));
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '@' => {
                tokens.push(Token::At);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Eq);
                i += 1;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Neq);
                i += 2;
            }
            '<' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Le);
                i += 2;
            }
            '<' => {
                tokens.push(Token::Lt);
                i += 1;
            }
            '>' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Ge);
                i += 2;
            }
            '>' => {
                tokens.push(Token::Gt);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '\'' | '"' => {
                let start = i;
                i += 1;
                while i < chars.len() && chars[i] != c {
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(ExpressionError::UnterminatedLiteral(start));
                }
                tokens.push(Token::Literal(chars[start + 1..i].iter().collect()));
                i += 1;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse()
                    .map_err(|_| ExpressionError::UnexpectedCharacter(c, start))?;
                tokens.push(Token::Number(value));
            }
            c if is_name_start(c) => {
                let start = i;
                while i < chars.len() && is_name_char(chars[i]) {
                    i += 1;
                }
                tokens.push(Token::Name(chars[start..i].iter().collect()));
            }
            other => return Err(ExpressionError::UnexpectedCharacter(other, i)),
        }
    }

    Ok(tokens)
}

// ============================================================================
// Syntax tree
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
enum Step {
    Child(String),
    Parent,
    SelfNode,
    Attribute(String),
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum BinaryOp {
    Or,
    And,
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
}

#[derive(Clone, Debug, PartialEq)]
enum Expr {
    Literal(String),
    Number(f64),
    Path { absolute: bool, steps: Vec<Step> },
    Binary(Box<Expr>, BinaryOp, Box<Expr>),
    Negate(Box<Expr>),
    Call(String, Vec<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: &Token) -> Result<(), ExpressionError> {
        match self.next() {
            Some(ref t) if t == expected => Ok(()),
            Some(t) => Err(ExpressionError::UnexpectedToken(t.to_string())),
            None => Err(ExpressionError::UnexpectedEnd),
        }
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Name(n)) if n == keyword)
    }

    fn parse_or(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_and()?;
        while self.peek_keyword("or") {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Expr::Binary(Box::new(left), BinaryOp::Or, Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_equality()?;
        while self.peek_keyword("and") {
            self.pos += 1;
            let right = self.parse_equality()?;
            left = Expr::Binary(Box::new(left), BinaryOp::And, Box::new(right));
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => BinaryOp::Eq,
                Some(Token::Neq) => BinaryOp::Neq,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_relational()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
    }

    fn parse_relational(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::Le) => BinaryOp::Le,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::Ge) => BinaryOp::Ge,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_additive()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ExpressionError> {
        if self.peek() == Some(&Token::Minus) {
            self.pos += 1;
            return Ok(Expr::Negate(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ExpressionError> {
        match self.peek().cloned() {
            None => Err(ExpressionError::UnexpectedEnd),
            Some(Token::Literal(s)) => {
                self.pos += 1;
                Ok(Expr::Literal(s))
            }
            Some(Token::Number(n)) => {
                self.pos += 1;
                Ok(Expr::Number(n))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.parse_or()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Name(name)) if self.tokens.get(self.pos + 1) == Some(&Token::LParen) => {
                self.pos += 2;
                let mut args = Vec::new();
                if self.peek() == Some(&Token::RParen) {
                    self.pos += 1;
                    return Ok(Expr::Call(name, args));
                }
                loop {
                    args.push(self.parse_or()?);
                    match self.next() {
                        Some(Token::Comma) => continue,
                        Some(Token::RParen) => break,
                        Some(t) => return Err(ExpressionError::UnexpectedToken(t.to_string())),
                        None => return Err(ExpressionError::UnexpectedEnd),
                    }
                }
                Ok(Expr::Call(name, args))
            }
            Some(_) => self.parse_path(),
        }
    }

    fn parse_path(&mut self) -> Result<Expr, ExpressionError> {
        let absolute = self.peek() == Some(&Token::Slash);
        if absolute {
            self.pos += 1;
            if !self.at_step_start() {
                return Ok(Expr::Path {
                    absolute,
                    steps: Vec::new(),
                });
            }
        }

        let mut steps = vec![self.parse_step()?];
        while self.peek() == Some(&Token::Slash) {
            self.pos += 1;
            steps.push(self.parse_step()?);
        }
        Ok(Expr::Path { absolute, steps })
    }

    fn at_step_start(&self) -> bool {
        matches!(
            self.peek(),
            Some(Token::Name(_) | Token::Dot | Token::DotDot | Token::At)
        )
    }

    fn parse_step(&mut self) -> Result<Step, ExpressionError> {
        match self.next() {
            Some(Token::Dot) => Ok(Step::SelfNode),
            Some(Token::DotDot) => Ok(Step::Parent),
            Some(Token::Name(n)) => Ok(Step::Child(n)),
            Some(Token::At) => match self.next() {
                Some(Token::Name(n)) => Ok(Step::Attribute(n)),
                Some(t) => Err(ExpressionError::UnexpectedToken(t.to_string())),
                None => Err(ExpressionError::UnexpectedEnd),
            },
            Some(t) => Err(ExpressionError::UnexpectedToken(t.to_string())),
            None => Err(ExpressionError::UnexpectedEnd),
        }
    }
}

// ============================================================================
// Values
// ============================================================================

/// A node selected by a path: an element or one of its attributes.
#[derive(Clone, Debug, PartialEq)]
pub enum NodeRef {
    Element(NodeId),
    Attribute(NodeId, String),
}

/// Result of evaluating an expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Boolean(bool),
    Number(f64),
    String(String),
    Nodes(Vec<NodeRef>),
}

fn node_string(tree: &InstanceTree, node: &NodeRef) -> String {
    match node {
        NodeRef::Element(id) => tree.node(*id).string_value(),
        NodeRef::Attribute(id, name) => tree
            .node(*id)
            .attribute(name)
            .unwrap_or_default()
            .to_string(),
    }
}

fn string_to_number(s: &str) -> f64 {
    s.trim().parse::<f64>().unwrap_or(f64::NAN)
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let sign = if n > 0.0 { "" } else { "-" };
        format!("{sign}Infinity")
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

impl Value {
    /// XPath `boolean()` conversion.
    pub fn as_bool(&self) -> bool {
        match self {
            Value::Boolean(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Nodes(nodes) => !nodes.is_empty(),
        }
    }

    /// XPath `string()` conversion; a node-set yields its first node's value.
    pub fn as_string(&self, tree: &InstanceTree) -> String {
        match self {
            Value::Boolean(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.clone(),
            Value::Nodes(nodes) => nodes
                .first()
                .map(|n| node_string(tree, n))
                .unwrap_or_default(),
        }
    }

    /// XPath `number()` conversion.
    pub fn as_number(&self, tree: &InstanceTree) -> f64 {
        match self {
            Value::Boolean(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::String(s) => string_to_number(s),
            Value::Nodes(_) => string_to_number(&self.as_string(tree)),
        }
    }
}

fn compare_atoms(op: BinaryOp, left: &Value, right: &Value, tree: &InstanceTree) -> bool {
    match op {
        BinaryOp::Eq | BinaryOp::Neq => {
            let equal = if matches!(left, Value::Boolean(_)) || matches!(right, Value::Boolean(_)) {
                left.as_bool() == right.as_bool()
            } else if matches!(left, Value::Number(_)) || matches!(right, Value::Number(_)) {
                left.as_number(tree) == right.as_number(tree)
            } else {
                left.as_string(tree) == right.as_string(tree)
            };
            if op == BinaryOp::Eq {
                equal
            } else {
                !equal
            }
        }
        _ => {
            let (l, r) = (left.as_number(tree), right.as_number(tree));
            match op {
                BinaryOp::Lt => l < r,
                BinaryOp::Le => l <= r,
                BinaryOp::Gt => l > r,
                BinaryOp::Ge => l >= r,
                _ => false,
            }
        }
    }
}

// Node-sets compare existentially: true if any member satisfies the comparison.
fn compare(op: BinaryOp, left: &Value, right: &Value, tree: &InstanceTree) -> bool {
    match (left, right) {
        (Value::Nodes(nodes), Value::Boolean(_)) | (Value::Boolean(_), Value::Nodes(nodes)) => {
            let as_bool = Value::Boolean(!nodes.is_empty());
            if matches!(left, Value::Nodes(_)) {
                compare_atoms(op, &as_bool, right, tree)
            } else {
                compare_atoms(op, left, &as_bool, tree)
            }
        }
        (Value::Nodes(ls), Value::Nodes(rs)) => ls.iter().any(|l| {
            let l = Value::String(node_string(tree, l));
            rs.iter()
                .any(|r| compare_atoms(op, &l, &Value::String(node_string(tree, r)), tree))
        }),
        (Value::Nodes(ls), other) => ls
            .iter()
            .any(|l| compare_atoms(op, &Value::String(node_string(tree, l)), other, tree)),
        (other, Value::Nodes(rs)) => rs
            .iter()
            .any(|r| compare_atoms(op, other, &Value::String(node_string(tree, r)), tree)),
        _ => compare_atoms(op, left, right, tree),
    }
}

// ============================================================================
// Expression
// ============================================================================

/// A parsed expression, ready to evaluate against any instance tree.
#[derive(Clone, Debug, PartialEq)]
pub struct Expression {
    source: String,
    root: Expr,
}

impl Expression {
    /// Parses an expression.
    ///
    /// # Errors
    ///
    /// Returns [`ExpressionError`] for characters or token sequences outside the supported
    /// subset.
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens, pos: 0 };
        let root = parser.parse_or()?;
        if let Some(extra) = parser.next() {
            return Err(ExpressionError::UnexpectedToken(extra.to_string()));
        }
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    /// The original expression text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluates the expression with `context` as the context node.
    ///
    /// # Errors
    ///
    /// Returns [`ExpressionError`] for unknown functions or bad arguments.
    pub fn evaluate(&self, tree: &InstanceTree, context: NodeId) -> Result<Value, ExpressionError> {
        eval(&self.root, tree, context)
    }

    /// Evaluates the expression and converts the result with XPath `boolean()`.
    ///
    /// # Errors
    ///
    /// Returns [`ExpressionError`] for unknown functions or bad arguments.
    pub fn evaluate_boolean(
        &self,
        tree: &InstanceTree,
        context: NodeId,
    ) -> Result<bool, ExpressionError> {
        Ok(self.evaluate(tree, context)?.as_bool())
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn eval(expr: &Expr, tree: &InstanceTree, context: NodeId) -> Result<Value, ExpressionError> {
    match expr {
        Expr::Literal(s) => Ok(Value::String(s.clone())),
        Expr::Number(n) => Ok(Value::Number(*n)),
        Expr::Path { absolute, steps } => Ok(Value::Nodes(eval_path(
            *absolute, steps, tree, context,
        ))),
        Expr::Negate(inner) => Ok(Value::Number(-eval(inner, tree, context)?.as_number(tree))),
        Expr::Binary(left, op, right) => {
            let l = eval(left, tree, context)?;
            match op {
                BinaryOp::Or => {
                    if l.as_bool() {
                        return Ok(Value::Boolean(true));
                    }
                    Ok(Value::Boolean(eval(right, tree, context)?.as_bool()))
                }
                BinaryOp::And => {
                    if !l.as_bool() {
                        return Ok(Value::Boolean(false));
                    }
                    Ok(Value::Boolean(eval(right, tree, context)?.as_bool()))
                }
                BinaryOp::Add | BinaryOp::Sub => {
                    let r = eval(right, tree, context)?;
                    let (a, b) = (l.as_number(tree), r.as_number(tree));
                    Ok(Value::Number(if *op == BinaryOp::Add { a + b } else { a - b }))
                }
                _ => {
                    let r = eval(right, tree, context)?;
                    Ok(Value::Boolean(compare(*op, &l, &r, tree)))
                }
            }
        }
        Expr::Call(name, args) => call(name, args, tree, context),
    }
}

fn eval_path(absolute: bool, steps: &[Step], tree: &InstanceTree, context: NodeId) -> Vec<NodeRef> {
    let root = tree.root();
    let mut remaining = steps;
    let mut current: Vec<NodeId> = if absolute {
        match remaining.split_first() {
            None => return vec![NodeRef::Element(root)],
            Some((Step::Child(name), rest)) => {
                remaining = rest;
                if tree.node(root).name == *name {
                    vec![root]
                } else {
                    return Vec::new();
                }
            }
            Some(_) => return Vec::new(),
        }
    } else {
        vec![context]
    };

    for (i, step) in remaining.iter().enumerate() {
        match step {
            Step::SelfNode => {}
            Step::Parent => {
                current = current.iter().filter_map(|id| tree.parent(*id)).collect();
                current.dedup();
            }
            Step::Child(name) => {
                current = current
                    .iter()
                    .flat_map(|id| tree.children(*id).iter().copied())
                    .filter(|c| tree.node(*c).name == *name)
                    .collect();
            }
            Step::Attribute(name) => {
                if i + 1 != remaining.len() {
                    return Vec::new();
                }
                return current
                    .into_iter()
                    .filter(|id| tree.node(*id).attribute(name).is_some())
                    .map(|id| NodeRef::Attribute(id, name.clone()))
                    .collect();
            }
        }
    }

    current.into_iter().map(NodeRef::Element).collect()
}

fn check_arity(
    name: &str,
    args: &[Expr],
    expected: &'static str,
    ok: bool,
) -> Result<(), ExpressionError> {
    if ok {
        Ok(())
    } else {
        Err(ExpressionError::Arity {
            name: name.to_string(),
            expected,
            found: args.len(),
        })
    }
}

fn call(
    name: &str,
    args: &[Expr],
    tree: &InstanceTree,
    context: NodeId,
) -> Result<Value, ExpressionError> {
    let context_value = || Value::Nodes(vec![NodeRef::Element(context)]);

    match name {
        "true" | "false" => {
            check_arity(name, args, "0", args.is_empty())?;
            Ok(Value::Boolean(name == "true"))
        }
        "not" | "boolean" => {
            check_arity(name, args, "1", args.len() == 1)?;
            let value = eval(&args[0], tree, context)?.as_bool();
            Ok(Value::Boolean(if name == "not" { !value } else { value }))
        }
        "string" | "number" | "string-length" => {
            check_arity(name, args, "0 or 1", args.len() <= 1)?;
            let value = match args.first() {
                Some(arg) => eval(arg, tree, context)?,
                None => context_value(),
            };
            Ok(match name {
                "string" => Value::String(value.as_string(tree)),
                "number" => Value::Number(value.as_number(tree)),
                _ => Value::Number(value.as_string(tree).chars().count() as f64),
            })
        }
        "count" => {
            check_arity(name, args, "1", args.len() == 1)?;
            match eval(&args[0], tree, context)? {
                Value::Nodes(nodes) => Ok(Value::Number(nodes.len() as f64)),
                _ => Err(ExpressionError::NotANodeSet(name.to_string())),
            }
        }
        "selected" => {
            check_arity(name, args, "2", args.len() == 2)?;
            let list = eval(&args[0], tree, context)?.as_string(tree);
            let choice = eval(&args[1], tree, context)?.as_string(tree);
            let choice = choice.trim();
            Ok(Value::Boolean(list.split_whitespace().any(|c| c == choice)))
        }
        "concat" => {
            let mut out = String::new();
            for arg in args {
                out.push_str(&eval(arg, tree, context)?.as_string(tree));
            }
            Ok(Value::String(out))
        }
        other => Err(ExpressionError::UnknownFunction(other.to_string())),
    }
}
