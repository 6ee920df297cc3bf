//! Parameter Filter Predicates
//!
//! A small boolean expression language evaluated once per parameter
//! combination. Identifiers name parameters of the module.
//!
//! ```text
//! alpha > 1 and (method == "lasso" or not scaled)
//! n * 2 <= 1000 || seed % 2 == 0
//! ```
//!
//! Supported: numbers, quoted strings, `true`/`false`/`null`, arithmetic
//! (`+ - * / %`), comparisons (`== != < <= > >=`), `and`/`&&`, `or`/`||`,
//! `not`/`!`, parentheses.

use std::fmt;

use indexmap::IndexMap;
use pest::iterators::{Pair, Pairs};
use pest::pratt_parser::{Assoc, Op as PrattOp, PrattParser};
use pest::Parser as _;
use pest_derive::Parser;

use super::model::ParamValue;

/// Parsed filter expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    source: String,
    root: Expr,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Ident(String),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary(Box<Expr>, Op, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Op {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

/// Runtime value of a sub-expression.
#[derive(Debug, Clone, PartialEq)]
enum Value {
    Num(f64),
    Str(String),
    Bool(bool),
    Null,
}

impl Value {
    fn truthy(&self) -> bool {
        match self {
            Value::Num(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Bool(b) => *b,
            Value::Null => false,
        }
    }
}

impl From<&ParamValue> for Value {
    fn from(value: &ParamValue) -> Self {
        match value {
            ParamValue::Bool(b) => Value::Bool(*b),
            ParamValue::Int(i) => Value::Num(*i as f64),
            ParamValue::Float(f) => Value::Num(*f),
            ParamValue::Str(s) => Value::Str(s.clone()),
            ParamValue::Null => Value::Null,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Num(n) => write!(f, "{}", n),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Null => write!(f, "null"),
        }
    }
}

#[derive(Parser)]
#[grammar = "workflow/filter.pest"]
struct FilterParser;

/// Operator table, loosest binding first.
fn operators() -> PrattParser<Rule> {
    PrattParser::new()
        .op(PrattOp::infix(Rule::or, Assoc::Left))
        .op(PrattOp::infix(Rule::and, Assoc::Left))
        .op(PrattOp::prefix(Rule::not))
        .op(PrattOp::infix(Rule::eq, Assoc::Left)
            | PrattOp::infix(Rule::ne, Assoc::Left)
            | PrattOp::infix(Rule::lt, Assoc::Left)
            | PrattOp::infix(Rule::le, Assoc::Left)
            | PrattOp::infix(Rule::gt, Assoc::Left)
            | PrattOp::infix(Rule::ge, Assoc::Left))
        .op(PrattOp::infix(Rule::add, Assoc::Left) | PrattOp::infix(Rule::sub, Assoc::Left))
        .op(PrattOp::infix(Rule::mul, Assoc::Left)
            | PrattOp::infix(Rule::div, Assoc::Left)
            | PrattOp::infix(Rule::rem, Assoc::Left))
        .op(PrattOp::prefix(Rule::neg))
}

fn build(pairs: Pairs<'_, Rule>, pratt: &PrattParser<Rule>) -> Result<Expr, String> {
    pratt
        .map_primary(|primary| build_primary(primary, pratt))
        .map_prefix(|op, operand| {
            let operand = Box::new(operand?);
            match op.as_rule() {
                Rule::not => Ok(Expr::Not(operand)),
                Rule::neg => Ok(Expr::Neg(operand)),
                rule => Err(format!("unexpected prefix {:?}", rule)),
            }
        })
        .map_infix(|lhs, op, rhs| {
            let op = match op.as_rule() {
                Rule::or => Op::Or,
                Rule::and => Op::And,
                Rule::eq => Op::Eq,
                Rule::ne => Op::Ne,
                Rule::lt => Op::Lt,
                Rule::le => Op::Le,
                Rule::gt => Op::Gt,
                Rule::ge => Op::Ge,
                Rule::add => Op::Add,
                Rule::sub => Op::Sub,
                Rule::mul => Op::Mul,
                Rule::div => Op::Div,
                Rule::rem => Op::Rem,
                rule => return Err(format!("unexpected operator {:?}", rule)),
            };
            Ok(Expr::Binary(Box::new(lhs?), op, Box::new(rhs?)))
        })
        .parse(pairs)
}

fn build_primary(pair: Pair<'_, Rule>, pratt: &PrattParser<Rule>) -> Result<Expr, String> {
    match pair.as_rule() {
        Rule::expr => build(pair.into_inner(), pratt),
        Rule::number => pair
            .as_str()
            .parse::<f64>()
            .map(|n| Expr::Literal(Value::Num(n)))
            .map_err(|_| format!("invalid number '{}'", pair.as_str())),
        Rule::string => {
            let text = pair.into_inner().next().map(|p| p.as_str()).unwrap_or("");
            Ok(Expr::Literal(Value::Str(text.to_string())))
        }
        Rule::boolean => Ok(Expr::Literal(Value::Bool(
            pair.as_str().eq_ignore_ascii_case("true"),
        ))),
        Rule::null => Ok(Expr::Literal(Value::Null)),
        Rule::ident => Ok(Expr::Ident(pair.as_str().to_string())),
        rule => Err(format!("unexpected {:?}", rule)),
    }
}

impl Filter {
    /// Parses a filter expression.
    pub fn parse(source: &str) -> Result<Self, String> {
        let mut pairs = FilterParser::parse(Rule::filter, source)
            .map_err(|e| e.variant.message().into_owned())?;
        let expr = pairs
            .next()
            .and_then(|filter| filter.into_inner().next())
            .ok_or_else(|| "empty expression".to_string())?;

        let root = build(expr.into_inner(), &operators())?;
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    /// Original expression text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Identifiers referenced by the expression, in first-use order.
    pub fn identifiers(&self) -> Vec<&str> {
        fn walk<'a>(expr: &'a Expr, out: &mut Vec<&'a str>) {
            match expr {
                Expr::Ident(name) => {
                    if !out.contains(&name.as_str()) {
                        out.push(name);
                    }
                }
                Expr::Not(inner) | Expr::Neg(inner) => walk(inner, out),
                Expr::Binary(lhs, _, rhs) => {
                    walk(lhs, out);
                    walk(rhs, out);
                }
                Expr::Literal(_) => {}
            }
        }

        let mut out = Vec::new();
        walk(&self.root, &mut out);
        out
    }

    /// Evaluates the predicate against one parameter combination.
    pub fn evaluate(&self, bindings: &IndexMap<&str, &ParamValue>) -> Result<bool, String> {
        Ok(eval(&self.root, bindings)?.truthy())
    }
}

fn eval(expr: &Expr, bindings: &IndexMap<&str, &ParamValue>) -> Result<Value, String> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Ident(name) => bindings
            .get(name.as_str())
            .map(|v| Value::from(*v))
            .ok_or_else(|| format!("unknown parameter '{}'", name)),
        Expr::Not(inner) => Ok(Value::Bool(!eval(inner, bindings)?.truthy())),
        Expr::Neg(inner) => match eval(inner, bindings)? {
            Value::Num(n) => Ok(Value::Num(-n)),
            other => Err(format!("cannot negate {}", other)),
        },
        Expr::Binary(lhs, Op::And, rhs) => {
            Ok(Value::Bool(eval(lhs, bindings)?.truthy() && eval(rhs, bindings)?.truthy()))
        }
        Expr::Binary(lhs, Op::Or, rhs) => {
            Ok(Value::Bool(eval(lhs, bindings)?.truthy() || eval(rhs, bindings)?.truthy()))
        }
        Expr::Binary(lhs, op, rhs) => apply(*op, eval(lhs, bindings)?, eval(rhs, bindings)?),
    }
}

fn apply(op: Op, lhs: Value, rhs: Value) -> Result<Value, String> {
    use std::cmp::Ordering;

    let ordering = match (&lhs, &rhs) {
        (Value::Num(a), Value::Num(b)) => a.partial_cmp(b),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    };

    match op {
        Op::Eq => Ok(Value::Bool(ordering == Some(Ordering::Equal))),
        Op::Ne => Ok(Value::Bool(ordering != Some(Ordering::Equal))),
        Op::Lt | Op::Le | Op::Gt | Op::Ge => {
            let ord = ordering.ok_or_else(|| format!("cannot compare {} with {}", lhs, rhs))?;
            Ok(Value::Bool(match op {
                Op::Lt => ord == Ordering::Less,
                Op::Le => ord != Ordering::Greater,
                Op::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            }))
        }
        Op::Add => match (lhs, rhs) {
            (Value::Num(a), Value::Num(b)) => Ok(Value::Num(a + b)),
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(a + &b)),
            (a, b) => Err(format!("cannot add {} and {}", a, b)),
        },
        Op::Sub | Op::Mul | Op::Div | Op::Rem => match (lhs, rhs) {
            (Value::Num(a), Value::Num(b)) => Ok(Value::Num(match op {
                Op::Sub => a - b,
                Op::Mul => a * b,
                Op::Div => a / b,
                _ => a % b,
            })),
            (a, b) => Err(format!("arithmetic on non-numbers {} and {}", a, b)),
        },
        Op::And | Op::Or => unreachable!("logical operators short-circuit in eval"),
    }
}
