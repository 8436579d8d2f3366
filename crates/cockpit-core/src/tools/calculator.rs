//! Stateless numeric evaluator behind the `calculate` tool.
//!
//! Expressions support `+ - * / ^ %`, parentheses, unary minus and decimal literals.
//! `^` is right-associative and binds tighter than unary minus (`-2^2 == -4`).
//! Input length and nesting depth are bounded; anything past either bound is an
//! evaluation error rather than unbounded recursion.

use crate::error::ToolError;

/// Longest accepted expression, in characters.
pub const MAX_EXPRESSION_LEN: usize = 1024;
/// Deepest accepted nesting of parentheses, signs and exponents combined.
pub const MAX_NESTING: usize = 64;

/// Pure numeric evaluation.
pub trait NumericEvaluator: Send + Sync {
    fn sum(&self, values: &[f64]) -> Result<f64, ToolError>;
    fn product(&self, values: &[f64]) -> Result<f64, ToolError>;
    fn expression(&self, expr: &str) -> Result<f64, ToolError>;
}

/// Default evaluator.
#[derive(Debug, Default, Clone, Copy)]
pub struct Calculator;

impl NumericEvaluator for Calculator {
    fn sum(&self, values: &[f64]) -> Result<f64, ToolError> {
        if values.is_empty() {
            return Err(ToolError::Evaluation("sum needs at least one value".into()));
        }
        finite(values.iter().sum())
    }

    fn product(&self, values: &[f64]) -> Result<f64, ToolError> {
        if values.is_empty() {
            return Err(ToolError::Evaluation("product needs at least one value".into()));
        }
        finite(values.iter().product())
    }

    fn expression(&self, expr: &str) -> Result<f64, ToolError> {
        let tokens = tokenize(expr)?;
        if tokens.is_empty() {
            return Err(ToolError::Evaluation("empty expression".into()));
        }
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let value = parser.expr()?;
        if parser.pos != parser.tokens.len() {
            return Err(ToolError::Evaluation(format!(
                "unexpected token at position {}",
                parser.pos
            )));
        }
        finite(value)
    }
}

fn finite(v: f64) -> Result<f64, ToolError> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(ToolError::Evaluation("result is not a finite number".into()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Num(f64),
    Op(char),
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ToolError> {
    let chars: Vec<char> = input.chars().collect();
    if chars.len() > MAX_EXPRESSION_LEN {
        return Err(ToolError::Evaluation(format!(
            "expression longer than {} characters",
            MAX_EXPRESSION_LEN
        )));
    }
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let lit: String = chars[start..i].iter().collect();
                let n = lit
                    .parse::<f64>()
                    .map_err(|_| ToolError::Evaluation(format!("bad number '{}'", lit)))?;
                tokens.push(Token::Num(n));
            }
            '+' | '-' | '*' | '/' | '^' | '%' => {
                tokens.push(Token::Op(c));
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
            other => {
                return Err(ToolError::Evaluation(format!(
                    "unsupported character '{}'",
                    other
                )))
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.peek();
        self.pos += 1;
        t
    }

    // expr := term (('+' | '-') term)*
    fn expr(&mut self) -> Result<f64, ToolError> {
        let mut acc = self.term()?;
        while let Some(Token::Op(op @ ('+' | '-'))) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            acc = if op == '+' { acc + rhs } else { acc - rhs };
        }
        Ok(acc)
    }

    // term := unary (('*' | '/' | '%') unary)*
    fn term(&mut self) -> Result<f64, ToolError> {
        let mut acc = self.unary()?;
        while let Some(Token::Op(op @ ('*' | '/' | '%'))) = self.peek() {
            self.pos += 1;
            let rhs = self.unary()?;
            if rhs == 0.0 && op != '*' {
                return Err(ToolError::Evaluation("division by zero".into()));
            }
            acc = match op {
                '*' => acc * rhs,
                '/' => acc / rhs,
                _ => acc % rhs,
            };
        }
        Ok(acc)
    }

    // Every recursive cycle (parens, signs, exponents) passes through here.
    fn unary(&mut self) -> Result<f64, ToolError> {
        if self.depth >= MAX_NESTING {
            return Err(ToolError::Evaluation(format!(
                "expression nested deeper than {} levels",
                MAX_NESTING
            )));
        }
        self.depth += 1;
        let value = self.signed();
        self.depth -= 1;
        value
    }

    // unary := '-' unary | '+' unary | power
    fn signed(&mut self) -> Result<f64, ToolError> {
        match self.peek() {
            Some(Token::Op('-')) => {
                self.pos += 1;
                Ok(-self.unary()?)
            }
            Some(Token::Op('+')) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    // power := atom ('^' unary)?
    fn power(&mut self) -> Result<f64, ToolError> {
        let base = self.atom()?;
        if let Some(Token::Op('^')) = self.peek() {
            self.pos += 1;
            let exp = self.unary()?;
            return Ok(base.powf(exp));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<f64, ToolError> {
        match self.next() {
            Some(Token::Num(n)) => Ok(n),
            Some(Token::LParen) => {
                let v = self.expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(v),
                    _ => Err(ToolError::Evaluation("missing closing parenthesis".into())),
                }
            }
            Some(t) => Err(ToolError::Evaluation(format!("unexpected token {:?}", t))),
            None => Err(ToolError::Evaluation("unexpected end of expression".into())),
        }
    }
}
