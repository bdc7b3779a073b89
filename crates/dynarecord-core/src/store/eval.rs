//! Parser and evaluator for the expression subset the record engine emits.
//!
//! Conditions: `attribute_exists(p)`, `attribute_not_exists(p)`, `a = b`,
//! `a IN (b, c, ...)`, parentheses, and `AND`. Updates: `SET p = v, ...` and
//! `REMOVE p, ...`. Placeholders are resolved while parsing, so the resulting
//! trees evaluate against an item without further lookups. Anything else is
//! rejected with [`EvalError::Unsupported`].

use std::cmp::Ordering;
use std::collections::HashMap;

use dynarecord_model::types::{ComparisonOperator, Condition};
use dynarecord_model::{AttributeValue, Item};

/// Errors raised while parsing an expression.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    /// The expression is not well formed.
    #[error("Invalid expression: {0}")]
    Syntax(String),

    /// The expression is valid DynamoDB but outside the supported subset.
    #[error("Unsupported expression: {0}")]
    Unsupported(String),

    /// A `#name` placeholder had no binding.
    #[error("An expression attribute name used in the document path is not defined; attribute name: {0}")]
    UnresolvedName(String),

    /// A `:value` placeholder had no binding.
    #[error("An expression attribute value used in expression is not defined; attribute value: {0}")]
    UnresolvedValue(String),
}

// ---------------------------------------------------------------------------
// Trees
// ---------------------------------------------------------------------------

/// A resolved operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Top-level attribute of the evaluated item.
    Path(String),
    /// Literal bound through a `:value` placeholder.
    Value(AttributeValue),
}

impl Operand {
    fn resolve<'a>(&'a self, item: &'a Item) -> Option<&'a AttributeValue> {
        match self {
            Self::Path(p) => item.get(p),
            Self::Value(v) => Some(v),
        }
    }
}

/// A parsed condition, key-condition or filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `attribute_exists(path)`.
    Exists(String),
    /// `attribute_not_exists(path)`.
    NotExists(String),
    /// `left = right`.
    Eq(Operand, Operand),
    /// `value IN (list...)`.
    In(Operand, Vec<Operand>),
    /// Conjunction.
    And(Vec<Predicate>),
}

impl Predicate {
    /// Evaluate against an item. A missing item is evaluated as empty.
    pub fn matches(&self, item: &Item) -> bool {
        match self {
            Self::Exists(p) => item.contains_key(p),
            Self::NotExists(p) => !item.contains_key(p),
            Self::Eq(l, r) => match (l.resolve(item), r.resolve(item)) {
                (Some(l), Some(r)) => values_equal(l, r),
                _ => false,
            },
            Self::In(v, list) => v.resolve(item).is_some_and(|v| {
                list.iter()
                    .filter_map(|o| o.resolve(item))
                    .any(|candidate| values_equal(v, candidate))
            }),
            Self::And(terms) => terms.iter().all(|t| t.matches(item)),
        }
    }

    /// `true` when the predicate pins `path` with a top-level equality.
    pub fn has_equality_on(&self, path: &str) -> bool {
        match self {
            Self::Eq(Operand::Path(p), Operand::Value(_))
            | Self::Eq(Operand::Value(_), Operand::Path(p)) => p == path,
            Self::And(terms) => terms.iter().any(|t| t.has_equality_on(path)),
            _ => false,
        }
    }
}

/// A parsed update expression.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdatePlan {
    /// `SET` assignments in expression order.
    pub set: Vec<(String, Operand)>,
    /// `REMOVE` targets.
    pub remove: Vec<String>,
}

impl UpdatePlan {
    /// `true` when the plan writes or removes `path`.
    pub fn touches(&self, path: &str) -> bool {
        self.set.iter().any(|(p, _)| p == path) || self.remove.iter().any(|p| p == path)
    }

    /// Apply the plan in place. Right-hand sides are resolved against the
    /// item as it was before the update.
    pub fn apply(&self, item: &mut Item) {
        let resolved: Vec<(String, Option<AttributeValue>)> = self
            .set
            .iter()
            .map(|(p, v)| (p.clone(), v.resolve(item).cloned()))
            .collect();
        for (path, value) in resolved {
            if let Some(value) = value {
                item.insert(path, value);
            }
        }
        for path in &self.remove {
            item.remove(path);
        }
    }
}

/// Evaluate a structured `ScanFilter`; every condition must hold.
pub fn matches_scan_filter(item: &Item, filter: &HashMap<String, Condition>) -> bool {
    filter.iter().all(|(attr, cond)| {
        let actual = item.get(attr);
        let mut expected = cond.attribute_value_list.iter();
        match cond.comparison_operator {
            ComparisonOperator::Eq => actual
                .zip(expected.next())
                .is_some_and(|(a, e)| values_equal(a, e)),
            ComparisonOperator::Ne => {
                !actual.zip(expected.next()).is_some_and(|(a, e)| values_equal(a, e))
            }
            ComparisonOperator::In => {
                actual.is_some_and(|a| expected.any(|e| values_equal(a, e)))
            }
            ComparisonOperator::NotNull => actual.is_some(),
            ComparisonOperator::Null => actual.is_none(),
        }
    })
}

/// Equality with numbers compared by value, so `1` equals `1.0`.
#[allow(clippy::float_cmp)]
pub fn values_equal(a: &AttributeValue, b: &AttributeValue) -> bool {
    match (a, b) {
        (AttributeValue::N(x), AttributeValue::N(y)) => {
            x == y
                || matches!((x.parse::<f64>(), y.parse::<f64>()), (Ok(x), Ok(y)) if x == y)
        }
        _ => a == b,
    }
}

/// Order two optional key values: absent first, numbers by value, strings
/// and binaries bytewise.
pub fn compare_key_values(a: Option<&AttributeValue>, b: Option<&AttributeValue>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(AttributeValue::N(x)), Some(AttributeValue::N(y))) => {
            let x = x.parse::<f64>().unwrap_or(f64::NAN);
            let y = y.parse::<f64>().unwrap_or(f64::NAN);
            x.total_cmp(&y)
        }
        (Some(AttributeValue::S(x)), Some(AttributeValue::S(y))) => x.cmp(y),
        (Some(AttributeValue::B(x)), Some(AttributeValue::B(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.type_descriptor().cmp(y.type_descriptor()),
    }
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Name(String),
    Value(String),
    Ident(String),
    LParen,
    RParen,
    Comma,
    Eq,
}

fn tokenize(input: &str) -> Result<Vec<Token>, EvalError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' | ')' | ',' | '=' => {
                chars.next();
                tokens.push(match c {
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    ',' => Token::Comma,
                    _ => Token::Eq,
                });
            }
            '#' | ':' => {
                chars.next();
                let word = read_word(&mut chars);
                if word.is_empty() {
                    return Err(EvalError::Syntax(format!("dangling '{c}'")));
                }
                tokens.push(if c == '#' {
                    Token::Name(format!("#{word}"))
                } else {
                    Token::Value(format!(":{word}"))
                });
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                tokens.push(Token::Ident(read_word(&mut chars)));
            }
            other => {
                return Err(EvalError::Unsupported(format!("token '{other}'")));
            }
        }
    }
    Ok(tokens)
}

fn read_word(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut word = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_alphanumeric() || c == '_' {
            word.push(c);
            chars.next();
        } else {
            break;
        }
    }
    word
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    names: &'a HashMap<String, String>,
    values: &'a HashMap<String, AttributeValue>,
}

impl<'a> Parser<'a> {
    fn new(
        input: &str,
        names: &'a HashMap<String, String>,
        values: &'a HashMap<String, AttributeValue>,
    ) -> Result<Self, EvalError> {
        Ok(Self {
            tokens: tokenize(input)?,
            pos: 0,
            names,
            values,
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: &Token) -> Result<(), EvalError> {
        match self.advance() {
            Some(ref t) if t == expected => Ok(()),
            other => Err(EvalError::Syntax(format!(
                "expected {expected:?}, found {other:?}"
            ))),
        }
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(w)) if w.eq_ignore_ascii_case(keyword))
    }

    fn finish(&self) -> Result<(), EvalError> {
        match self.peek() {
            None => Ok(()),
            Some(t) => Err(EvalError::Unsupported(format!("trailing {t:?}"))),
        }
    }

    fn parse_and(&mut self) -> Result<Predicate, EvalError> {
        let mut terms = vec![self.parse_term()?];
        while self.at_keyword("AND") {
            self.pos += 1;
            terms.push(self.parse_term()?);
        }
        Ok(if terms.len() == 1 {
            terms.swap_remove(0)
        } else {
            Predicate::And(terms)
        })
    }

    fn parse_term(&mut self) -> Result<Predicate, EvalError> {
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            let inner = self.parse_and()?;
            self.expect(&Token::RParen)?;
            return Ok(inner);
        }
        for (function, exists) in [("attribute_exists", true), ("attribute_not_exists", false)] {
            if self.at_keyword(function) {
                self.pos += 1;
                self.expect(&Token::LParen)?;
                let path = self.parse_path()?;
                self.expect(&Token::RParen)?;
                return Ok(if exists {
                    Predicate::Exists(path)
                } else {
                    Predicate::NotExists(path)
                });
            }
        }
        let left = self.parse_operand()?;
        if self.peek() == Some(&Token::Eq) {
            self.pos += 1;
            return Ok(Predicate::Eq(left, self.parse_operand()?));
        }
        if self.at_keyword("IN") {
            self.pos += 1;
            self.expect(&Token::LParen)?;
            let mut list = vec![self.parse_operand()?];
            while self.peek() == Some(&Token::Comma) {
                self.pos += 1;
                list.push(self.parse_operand()?);
            }
            self.expect(&Token::RParen)?;
            return Ok(Predicate::In(left, list));
        }
        Err(EvalError::Unsupported(format!(
            "operator after {left:?}: {:?}",
            self.peek()
        )))
    }

    fn parse_path(&mut self) -> Result<String, EvalError> {
        match self.advance() {
            Some(Token::Name(n)) => self
                .names
                .get(&n)
                .cloned()
                .ok_or(EvalError::UnresolvedName(n)),
            Some(Token::Ident(w)) => Ok(w),
            other => Err(EvalError::Syntax(format!(
                "expected attribute path, found {other:?}"
            ))),
        }
    }

    fn parse_operand(&mut self) -> Result<Operand, EvalError> {
        if let Some(Token::Value(v)) = self.peek() {
            let v = v.clone();
            self.pos += 1;
            return self
                .values
                .get(&v)
                .cloned()
                .map(Operand::Value)
                .ok_or(EvalError::UnresolvedValue(v));
        }
        self.parse_path().map(Operand::Path)
    }
}

/// Parse a condition, key-condition or filter expression.
pub fn parse_condition(
    input: &str,
    names: &HashMap<String, String>,
    values: &HashMap<String, AttributeValue>,
) -> Result<Predicate, EvalError> {
    let mut parser = Parser::new(input, names, values)?;
    let predicate = parser.parse_and()?;
    parser.finish()?;
    Ok(predicate)
}

/// Parse a `SET` / `REMOVE` update expression.
pub fn parse_update(
    input: &str,
    names: &HashMap<String, String>,
    values: &HashMap<String, AttributeValue>,
) -> Result<UpdatePlan, EvalError> {
    let mut parser = Parser::new(input, names, values)?;
    let mut plan = UpdatePlan::default();
    while parser.peek().is_some() {
        if parser.at_keyword("SET") {
            parser.pos += 1;
            loop {
                let path = parser.parse_path()?;
                parser.expect(&Token::Eq)?;
                plan.set.push((path, parser.parse_operand()?));
                if parser.peek() != Some(&Token::Comma) {
                    break;
                }
                parser.pos += 1;
            }
        } else if parser.at_keyword("REMOVE") {
            parser.pos += 1;
            plan.remove.push(parser.parse_path()?);
            while parser.peek() == Some(&Token::Comma) {
                parser.pos += 1;
                plan.remove.push(parser.parse_path()?);
            }
        } else {
            return Err(EvalError::Unsupported(format!(
                "update clause {:?}",
                parser.peek()
            )));
        }
    }
    if plan.set.is_empty() && plan.remove.is_empty() {
        return Err(EvalError::Syntax("empty update expression".to_owned()));
    }
    Ok(plan)
}
