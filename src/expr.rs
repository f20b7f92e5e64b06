//! Expression syntax shared by the reference evaluator and attribute operations
//!
//! ## Table of Contents
//! - **Node / Expr**: Parsed expression tree with source spans
//! - **parse**: Recursive-descent parser
//! - **value_as_text / value_as_count**: Value coercions used by the engine
//!
//! Grammar:
//!
//! ```text
//! expr    := literal | call
//! literal := number | '"' chars '"' | '\'' chars '\''
//! call    := ident '(' [ expr (',' expr)* ] ')'
//! ```

use crate::error::{PopulationError, Result};
use serde_json::{Number, Value};
use std::ops::Range;

/// Expression variants
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Constant value
    Literal(Value),
    /// Function call
    Call {
        /// Function name
        name: String,
        /// Arguments in call order
        args: Vec<Node>,
        /// Pre-order position of this call within the whole expression
        ordinal: usize,
    },
}

/// Expression with the byte range it was parsed from
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Parsed expression
    pub expr: Expr,
    /// Source span
    pub span: Range<usize>,
}

impl Node {
    /// Source text of this node
    pub fn source<'a>(&self, source: &'a str) -> &'a str {
        &source[self.span.clone()]
    }

    /// Literal string value, if this node is a string literal
    pub fn as_str_literal(&self) -> Option<&str> {
        match &self.expr {
            Expr::Literal(Value::String(s)) => Some(s),
            _ => None,
        }
    }
}

/// Parse an expression
pub fn parse(source: &str) -> Result<Node> {
    let mut parser = Parser {
        src: source,
        pos: 0,
        calls: 0,
    };
    let node = parser.node()?;
    parser.skip_ws();
    if parser.pos < source.len() {
        return Err(parser.error("trailing input"));
    }
    Ok(node)
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    calls: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    fn error(&self, msg: &str) -> PopulationError {
        PopulationError::evaluation(self.src, format!("{} at offset {}", msg, self.pos))
    }

    fn node(&mut self) -> Result<Node> {
        self.skip_ws();
        let start = self.pos;
        let expr = match self.peek() {
            Some(q @ ('"' | '\'')) => self.string(q)?,
            Some(c) if c.is_ascii_digit() || c == '-' || c == '.' => self.number()?,
            Some(c) if c.is_alphabetic() || c == '_' => self.call()?,
            Some(c) => return Err(self.error(&format!("unexpected character '{}'", c))),
            None => return Err(self.error("unexpected end of input")),
        };
        Ok(Node {
            expr,
            span: start..self.pos,
        })
    }

    fn string(&mut self, quote: char) -> Result<Expr> {
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                Some(c) if c == quote => break,
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(c) => out.push(c),
                    None => return Err(self.error("unterminated string")),
                },
                Some(c) => out.push(c),
                None => return Err(self.error("unterminated string")),
            }
        }
        Ok(Expr::Literal(Value::String(out)))
    }

    fn number(&mut self) -> Result<Expr> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.bump();
        }
        while matches!(self.peek(), Some(c) if c.is_ascii_digit() || c == '.') {
            self.bump();
        }
        let text = &self.src[start..self.pos];
        if let Ok(n) = text.parse::<i64>() {
            return Ok(Expr::Literal(Value::from(n)));
        }
        text.parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(|n| Expr::Literal(Value::Number(n)))
            .ok_or_else(|| self.error(&format!("invalid number '{}'", text)))
    }

    fn call(&mut self) -> Result<Expr> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.bump();
        }
        let name = self.src[start..self.pos].to_string();

        self.skip_ws();
        if self.bump() != Some('(') {
            return Err(self.error(&format!("expected '(' after '{}'", name)));
        }

        let ordinal = self.calls;
        self.calls += 1;

        let mut args = Vec::new();
        self.skip_ws();
        if self.peek() == Some(')') {
            self.bump();
            return Ok(Expr::Call { name, args, ordinal });
        }

        loop {
            args.push(self.node()?);
            self.skip_ws();
            match self.bump() {
                Some(',') => continue,
                Some(')') => break,
                Some(c) => return Err(self.error(&format!("unexpected character '{}'", c))),
                None => return Err(self.error("unexpected end of input")),
            }
        }

        Ok(Expr::Call { name, args, ordinal })
    }
}

/// Render a value the way it is concatenated into attribute strings
pub fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Interpret a value as a non-negative count
pub fn value_as_count(value: &Value, expression: &str) -> Result<usize> {
    let count = match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.floor() as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    count
        .map(|c| c as usize)
        .ok_or_else(|| {
            PopulationError::evaluation(expression, format!("expected a non-negative count, got {}", value))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_literals() {
        assert_eq!(parse("42").unwrap().expr, Expr::Literal(json!(42)));
        assert_eq!(parse(" -3 ").unwrap().expr, Expr::Literal(json!(-3)));
        assert_eq!(parse("1.5").unwrap().expr, Expr::Literal(json!(1.5)));
        assert_eq!(parse("'eu-west'").unwrap().expr, Expr::Literal(json!("eu-west")));
        assert_eq!(parse(r#""a\"b""#).unwrap().expr, Expr::Literal(json!("a\"b")));
    }

    #[test]
    fn test_parse_nested_calls_assigns_ordinals() {
        let source = "concat('node-', counter(), roundRobin('a', 'b'))";
        let node = parse(source).unwrap();
        let Expr::Call { name, args, ordinal } = &node.expr else {
            panic!("expected call");
        };
        assert_eq!(name, "concat");
        assert_eq!(*ordinal, 0);
        assert_eq!(args.len(), 3);
        assert_eq!(args[1].source(source), "counter()");
        assert!(matches!(args[1].expr, Expr::Call { ordinal: 1, .. }));
        assert!(matches!(args[2].expr, Expr::Call { ordinal: 2, .. }));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse("").is_err());
        assert!(parse("counter(").is_err());
        assert!(parse("'open").is_err());
        assert!(parse("bare").is_err());
        assert!(parse("1 2").is_err());
    }

    #[test]
    fn test_value_coercions() {
        assert_eq!(value_as_text(&json!("x")), "x");
        assert_eq!(value_as_text(&json!(7)), "7");
        assert_eq!(value_as_text(&Value::Null), "");
        assert_eq!(value_as_count(&json!(3), "3").unwrap(), 3);
        assert_eq!(value_as_count(&json!("4"), "'4'").unwrap(), 4);
        assert!(value_as_count(&json!(-1), "-1").is_err());
        assert!(value_as_count(&json!("x"), "'x'").is_err());
    }
}
