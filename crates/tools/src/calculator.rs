//! Arithmetic evaluator for the `calculator` tool.
//!
//! Recursive descent over a strict grammar; anything outside it is an
//! error, never silently dropped:
//!
//! ```text
//! expr   := term (('+' | '-') term)*
//! term   := factor (('*' | '/') factor)*
//! factor := ('+' | '-') factor | number | '(' expr ')'
//! number := digits ['.' digits]
//! ```

use thiserror::Error;

const MAX_INPUT_LEN: usize = 1024;
const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalcError {
    #[error("expression is empty")]
    Empty,
    #[error("expression is too long (max 1024 characters)")]
    TooLong,
    #[error("expression is nested too deeply")]
    TooDeep,
    #[error("unexpected character '{0}' at position {1}")]
    UnexpectedChar(char, usize),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("invalid number '{0}'")]
    InvalidNumber(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("result is not a finite number")]
    NonFinite,
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(src: &str) -> Self {
        Self {
            chars: src.chars().collect(),
            pos: 0,
            depth: 0,
        }
    }

    fn skip_ws(&mut self) {
        while self.chars.get(self.pos).is_some_and(|c| c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_ws();
        self.chars.get(self.pos).copied()
    }

    fn expr(&mut self) -> Result<f64, CalcError> {
        let mut value = self.term()?;
        while let Some(op @ ('+' | '-')) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            value = if op == '+' { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64, CalcError> {
        let mut value = self.factor()?;
        while let Some(op @ ('*' | '/')) = self.peek() {
            self.pos += 1;
            let rhs = self.factor()?;
            value = if op == '*' {
                value * rhs
            } else {
                if rhs == 0.0 {
                    return Err(CalcError::DivisionByZero);
                }
                value / rhs
            };
        }
        Ok(value)
    }

    fn factor(&mut self) -> Result<f64, CalcError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(CalcError::TooDeep);
        }
        let result = match self.peek() {
            Some('-') => {
                self.pos += 1;
                self.factor().map(|v| -v)
            }
            Some('+') => {
                self.pos += 1;
                self.factor()
            }
            Some('(') => {
                self.pos += 1;
                let inner = self.expr()?;
                match self.peek() {
                    Some(')') => {
                        self.pos += 1;
                        Ok(inner)
                    }
                    Some(c) => Err(CalcError::UnexpectedChar(c, self.pos)),
                    None => Err(CalcError::UnexpectedEnd),
                }
            }
            Some(c) if c.is_ascii_digit() || c == '.' => self.number(),
            Some(c) => Err(CalcError::UnexpectedChar(c, self.pos)),
            None => Err(CalcError::UnexpectedEnd),
        };
        self.depth -= 1;
        result
    }

    fn number(&mut self) -> Result<f64, CalcError> {
        let start = self.pos;
        while self
            .chars
            .get(self.pos)
            .is_some_and(|c| c.is_ascii_digit() || *c == '.')
        {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse::<f64>()
            .map_err(|_| CalcError::InvalidNumber(text))
    }
}

/// Evaluate an arithmetic expression.
pub fn evaluate(expression: &str) -> Result<f64, CalcError> {
    if expression.trim().is_empty() {
        return Err(CalcError::Empty);
    }
    if expression.len() > MAX_INPUT_LEN {
        return Err(CalcError::TooLong);
    }
    let mut parser = Parser::new(expression);
    let value = parser.expr()?;
    if let Some(c) = parser.peek() {
        return Err(CalcError::UnexpectedChar(c, parser.pos));
    }
    if !value.is_finite() {
        return Err(CalcError::NonFinite);
    }
    Ok(value)
}

/// Integral values print without a fractional part.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        let s = format!("{value:.10}");
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}
