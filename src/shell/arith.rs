//! Integer arithmetic for `$(( ))`, `(( ))` and `let`.
//!
//! The expression text is expanded before it gets here, so only bare
//! variable names remain to be resolved against the environment.

use thiserror::Error;

use super::env::Environment;

/// Nesting limit for variables whose values are themselves expressions.
const MAX_RECURSION: usize = 16;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ArithError {
    #[error("{expression}: syntax error in expression (error token is {token:?})")]
    Syntax { expression: String, token: String },
    #[error("{0}: division by 0")]
    DivisionByZero(String),
    #[error("{0}: exponent less than 0")]
    NegativeExponent(String),
    #[error("{0}: expression recursion level exceeded")]
    Recursion(String),
}

/// Evaluate `expression`, applying any assignments it performs to `env`.
pub fn evaluate(expression: &str, env: &mut Environment) -> Result<i64, ArithError> {
    evaluate_nested(expression, env, 0)
}

fn evaluate_nested(expression: &str, env: &mut Environment, depth: usize) -> Result<i64, ArithError> {
    if depth > MAX_RECURSION {
        return Err(ArithError::Recursion(expression.to_string()));
    }
    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        return Ok(0);
    }
    let mut parser = ExprParser {
        tokens,
        pos: 0,
        source: expression,
    };
    let expr = parser.parse_comma()?;
    if parser.pos < parser.tokens.len() {
        return Err(parser.error());
    }
    Evaluator {
        env,
        depth,
        source: expression,
    }
    .eval(&expr)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Num(i64),
    Ident(String),
    Op(&'static str),
}

const OPERATORS: &[&str] = &[
    "<<=", ">>=", "**", "++", "--", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "<=", ">=", "==",
    "!=", "&&", "||", "<<", ">>", "+", "-", "*", "/", "%", "<", ">", "=", "!", "~", "&", "|", "^",
    "(", ")", "?", ":", ",",
];

fn tokenize(text: &str) -> Result<Vec<Token>, ArithError> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    'outer: while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '#') {
                i += 1;
            }
            let literal: String = chars[start..i].iter().collect();
            let value = parse_number(&literal).ok_or_else(|| ArithError::Syntax {
                expression: text.to_string(),
                token: literal.clone(),
            })?;
            tokens.push(Token::Num(value));
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }
        for op in OPERATORS {
            let len = op.len();
            if i + len <= chars.len() && chars[i..i + len].iter().copied().eq(op.chars()) {
                tokens.push(Token::Op(op));
                i += len;
                continue 'outer;
            }
        }
        return Err(ArithError::Syntax {
            expression: text.to_string(),
            token: chars[i..].iter().collect(),
        });
    }
    Ok(tokens)
}

fn parse_number(literal: &str) -> Option<i64> {
    if let Some((base, digits)) = literal.split_once('#') {
        let base: u32 = base.parse().ok()?;
        if !(2..=36).contains(&base) {
            return None;
        }
        return i64::from_str_radix(digits, base).ok();
    }
    if let Some(hex) = literal.strip_prefix("0x").or_else(|| literal.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).ok();
    }
    if literal.len() > 1 && literal.starts_with('0') {
        return i64::from_str_radix(&literal[1..], 8).ok();
    }
    literal.parse().ok()
}

#[derive(Debug)]
enum Expr {
    Num(i64),
    Var(String),
    Unary(&'static str, Box<Expr>),
    Binary(&'static str, Box<Expr>, Box<Expr>),
    Assign(String, Option<&'static str>, Box<Expr>),
    /// `++x` / `--x` when the flag is true, `x++` / `x--` otherwise.
    Step(String, i64, bool),
    Cond(Box<Expr>, Box<Expr>, Box<Expr>),
    Comma(Box<Expr>, Box<Expr>),
}

fn binary_precedence(op: &str) -> Option<u8> {
    Some(match op {
        "||" => 1,
        "&&" => 2,
        "|" => 3,
        "^" => 4,
        "&" => 5,
        "==" | "!=" => 6,
        "<" | ">" | "<=" | ">=" => 7,
        "<<" | ">>" => 8,
        "+" | "-" => 9,
        "*" | "/" | "%" => 10,
        "**" => 11,
        _ => return None,
    })
}

struct ExprParser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    source: &'a str,
}

impl ExprParser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_op(&self) -> Option<&'static str> {
        match self.peek() {
            Some(Token::Op(op)) => Some(op),
            _ => None,
        }
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.peek_op() == Some(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error(&self) -> ArithError {
        let token = match self.peek() {
            Some(Token::Num(n)) => n.to_string(),
            Some(Token::Ident(name)) => name.clone(),
            Some(Token::Op(op)) => (*op).to_string(),
            None => String::new(),
        };
        ArithError::Syntax {
            expression: self.source.to_string(),
            token,
        }
    }

    fn parse_comma(&mut self) -> Result<Expr, ArithError> {
        let mut left = self.parse_assign()?;
        while self.eat_op(",") {
            let right = self.parse_assign()?;
            left = Expr::Comma(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_assign(&mut self) -> Result<Expr, ArithError> {
        if let Some(Token::Ident(name)) = self.peek().cloned()
            && let Some(Token::Op(op)) = self.tokens.get(self.pos + 1)
        {
            let compound = match *op {
                "=" => Some(None),
                "+=" => Some(Some("+")),
                "-=" => Some(Some("-")),
                "*=" => Some(Some("*")),
                "/=" => Some(Some("/")),
                "%=" => Some(Some("%")),
                "&=" => Some(Some("&")),
                "|=" => Some(Some("|")),
                "^=" => Some(Some("^")),
                "<<=" => Some(Some("<<")),
                ">>=" => Some(Some(">>")),
                _ => None,
            };
            if let Some(compound) = compound {
                self.pos += 2;
                let value = self.parse_assign()?;
                return Ok(Expr::Assign(name, compound, Box::new(value)));
            }
        }
        self.parse_conditional()
    }

    fn parse_conditional(&mut self) -> Result<Expr, ArithError> {
        let condition = self.parse_binary(1)?;
        if !self.eat_op("?") {
            return Ok(condition);
        }
        let then = self.parse_assign()?;
        if !self.eat_op(":") {
            return Err(self.error());
        }
        let otherwise = self.parse_assign()?;
        Ok(Expr::Cond(Box::new(condition), Box::new(then), Box::new(otherwise)))
    }

    fn parse_binary(&mut self, min_precedence: u8) -> Result<Expr, ArithError> {
        let mut left = self.parse_unary()?;
        while let Some(op) = self.peek_op() {
            let Some(precedence) = binary_precedence(op) else {
                break;
            };
            if precedence < min_precedence {
                break;
            }
            self.pos += 1;
            // `**` is right associative.
            let next = if op == "**" { precedence } else { precedence + 1 };
            let right = self.parse_binary(next)?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ArithError> {
        match self.peek_op() {
            Some(op @ ("!" | "~" | "-" | "+")) => {
                self.pos += 1;
                Ok(Expr::Unary(op, Box::new(self.parse_unary()?)))
            }
            Some(op @ ("++" | "--")) => {
                self.pos += 1;
                match self.peek().cloned() {
                    Some(Token::Ident(name)) => {
                        self.pos += 1;
                        Ok(Expr::Step(name, if op == "++" { 1 } else { -1 }, true))
                    }
                    _ => Err(self.error()),
                }
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, ArithError> {
        match self.peek().cloned() {
            Some(Token::Num(value)) => {
                self.pos += 1;
                Ok(Expr::Num(value))
            }
            Some(Token::Ident(name)) => {
                self.pos += 1;
                if self.eat_op("++") {
                    Ok(Expr::Step(name, 1, false))
                } else if self.eat_op("--") {
                    Ok(Expr::Step(name, -1, false))
                } else {
                    Ok(Expr::Var(name))
                }
            }
            Some(Token::Op("(")) => {
                self.pos += 1;
                let inner = self.parse_comma()?;
                if !self.eat_op(")") {
                    return Err(self.error());
                }
                Ok(inner)
            }
            _ => Err(self.error()),
        }
    }
}

struct Evaluator<'a> {
    env: &'a mut Environment,
    depth: usize,
    source: &'a str,
}

impl Evaluator<'_> {
    fn variable(&mut self, name: &str) -> Result<i64, ArithError> {
        let text = self.env.value(name).map(|value| value.as_scalar()).unwrap_or_default();
        let text = text.trim();
        if text.is_empty() {
            return Ok(0);
        }
        match parse_number(text) {
            Some(value) => Ok(value),
            None => evaluate_nested(text, self.env, self.depth + 1),
        }
    }

    fn eval(&mut self, expr: &Expr) -> Result<i64, ArithError> {
        match expr {
            Expr::Num(value) => Ok(*value),
            Expr::Var(name) => self.variable(name),
            Expr::Unary(op, inner) => {
                let value = self.eval(inner)?;
                Ok(match *op {
                    "!" => i64::from(value == 0),
                    "~" => !value,
                    "-" => value.wrapping_neg(),
                    _ => value,
                })
            }
            Expr::Binary("&&", left, right) => {
                Ok(i64::from(self.eval(left)? != 0 && self.eval(right)? != 0))
            }
            Expr::Binary("||", left, right) => {
                Ok(i64::from(self.eval(left)? != 0 || self.eval(right)? != 0))
            }
            Expr::Binary(op, left, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                self.apply(op, left, right)
            }
            Expr::Assign(name, compound, value) => {
                let value = self.eval(value)?;
                let value = match compound {
                    Some(op) => {
                        let current = self.variable(name)?;
                        self.apply(op, current, value)?
                    }
                    None => value,
                };
                self.env.set_scalar(name, value.to_string());
                Ok(value)
            }
            Expr::Step(name, delta, prefix) => {
                let current = self.variable(name)?;
                let updated = current.wrapping_add(*delta);
                self.env.set_scalar(name, updated.to_string());
                Ok(if *prefix { updated } else { current })
            }
            Expr::Cond(condition, then, otherwise) => {
                if self.eval(condition)? != 0 {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::Comma(first, second) => {
                self.eval(first)?;
                self.eval(second)
            }
        }
    }

    fn apply(&self, op: &str, left: i64, right: i64) -> Result<i64, ArithError> {
        let division_by_zero = || ArithError::DivisionByZero(self.source.to_string());
        Ok(match op {
            "+" => left.wrapping_add(right),
            "-" => left.wrapping_sub(right),
            "*" => left.wrapping_mul(right),
            "/" => left.checked_div(right).ok_or_else(division_by_zero)?,
            "%" => left.checked_rem(right).ok_or_else(division_by_zero)?,
            "**" => {
                let exponent = u32::try_from(right)
                    .map_err(|_| ArithError::NegativeExponent(self.source.to_string()))?;
                left.wrapping_pow(exponent)
            }
            "<<" => left.wrapping_shl(right as u32),
            ">>" => left.wrapping_shr(right as u32),
            "&" => left & right,
            "|" => left | right,
            "^" => left ^ right,
            "==" => i64::from(left == right),
            "!=" => i64::from(left != right),
            "<" => i64::from(left < right),
            ">" => i64::from(left > right),
            "<=" => i64::from(left <= right),
            ">=" => i64::from(left >= right),
            _ => {
                return Err(ArithError::Syntax {
                    expression: self.source.to_string(),
                    token: op.to_string(),
                });
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(text: &str) -> i64 {
        evaluate(text, &mut Environment::new()).unwrap()
    }

    #[test]
    fn test_precedence() {
        assert_eq!(eval("1 + 2 * 3"), 7);
        assert_eq!(eval("(1 + 2) * 3"), 9);
        assert_eq!(eval("2 ** 3 ** 2"), 512);
        assert_eq!(eval("-3 + 5"), 2);
        assert_eq!(eval("1 < 2 && 3 > 4"), 0);
        assert_eq!(eval("0 ? 1 : 2"), 2);
        assert_eq!(eval("0x10 + 010 + 2#101"), 16 + 8 + 5);
        assert_eq!(eval(""), 0);
    }

    #[test]
    fn test_variables_and_assignment() {
        let mut env = Environment::new();
        env.set_scalar("n", "4");
        assert_eq!(evaluate("n * 2", &mut env).unwrap(), 8);
        assert_eq!(evaluate("m = n + 1", &mut env).unwrap(), 5);
        assert_eq!(env.scalar("m"), Some("5"));
        assert_eq!(evaluate("n++", &mut env).unwrap(), 4);
        assert_eq!(env.scalar("n"), Some("5"));
        assert_eq!(evaluate("--n", &mut env).unwrap(), 4);
        assert_eq!(evaluate("n += 10", &mut env).unwrap(), 14);
        assert_eq!(evaluate("unset_var + 1", &mut env).unwrap(), 1);
    }

    #[test]
    fn test_short_circuit_skips_side_effects() {
        let mut env = Environment::new();
        evaluate("0 && (x = 1)", &mut env).unwrap();
        assert!(!env.is_set("x"));
    }

    #[test]
    fn test_errors() {
        let mut env = Environment::new();
        assert!(matches!(evaluate("1 / 0", &mut env), Err(ArithError::DivisionByZero(_))));
        assert!(matches!(evaluate("1 +", &mut env), Err(ArithError::Syntax { .. })));
        assert!(matches!(evaluate("2 ** -1", &mut env), Err(ArithError::NegativeExponent(_))));
        env.set_scalar("loop", "loop");
        assert!(matches!(evaluate("loop", &mut env), Err(ArithError::Recursion(_))));
    }
}
