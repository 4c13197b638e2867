//! Conditional expressions shared by `test`, `[` and `[[ ]]`.
//!
//! File tests never consult the filesystem: templates are evaluated without
//! access to the host tree, so every file predicate is false.

use thiserror::Error;

use super::env::Environment;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TestError {
    #[error("{0}: integer expression expected")]
    Integer(String),
    #[error("{0}: unary operator expected")]
    UnaryExpected(String),
    #[error("{0}: binary operator expected")]
    BinaryExpected(String),
    #[error("missing `{0}`")]
    Missing(&'static str),
}

const FILE_TESTS: &[&str] = &[
    "-a", "-b", "-c", "-d", "-e", "-f", "-g", "-h", "-k", "-p", "-r", "-s", "-u", "-w", "-x", "-G",
    "-L", "-N", "-O", "-S",
];

pub fn is_unary_op(op: &str) -> bool {
    FILE_TESTS.contains(&op) || matches!(op, "-n" | "-z" | "-v" | "-o" | "-t" | "-R")
}

pub fn is_binary_op(op: &str) -> bool {
    matches!(
        op,
        "=" | "==" | "!=" | "<" | ">" | "-eq" | "-ne" | "-lt" | "-le" | "-gt" | "-ge" | "-nt" | "-ot" | "-ef"
    )
}

/// Evaluate a unary predicate.
pub fn unary(op: &str, operand: &str, env: &Environment) -> Result<bool, TestError> {
    match op {
        "-n" => Ok(!operand.is_empty()),
        "-z" => Ok(operand.is_empty()),
        "-v" => Ok(env.is_set(operand)),
        // Shell options, terminals, namerefs and files do not exist here.
        "-o" | "-t" | "-R" => Ok(false),
        _ if FILE_TESTS.contains(&op) => {
            tracing::trace!("File test {op} {operand:?} evaluates false");
            Ok(false)
        }
        _ => Err(TestError::UnaryExpected(op.to_string())),
    }
}

/// Evaluate a binary predicate with plain string equality.
pub fn binary(left: &str, op: &str, right: &str) -> Result<bool, TestError> {
    let integers = || -> Result<(i64, i64), TestError> { Ok((integer(left)?, integer(right)?)) };
    Ok(match op {
        "=" | "==" => left == right,
        "!=" => left != right,
        "<" => left < right,
        ">" => left > right,
        "-eq" => {
            let (l, r) = integers()?;
            l == r
        }
        "-ne" => {
            let (l, r) = integers()?;
            l != r
        }
        "-lt" => {
            let (l, r) = integers()?;
            l < r
        }
        "-le" => {
            let (l, r) = integers()?;
            l <= r
        }
        "-gt" => {
            let (l, r) = integers()?;
            l > r
        }
        "-ge" => {
            let (l, r) = integers()?;
            l >= r
        }
        "-nt" | "-ot" | "-ef" => false,
        _ => return Err(TestError::BinaryExpected(op.to_string())),
    })
}

fn integer(text: &str) -> Result<i64, TestError> {
    text.trim().parse().map_err(|_| TestError::Integer(text.to_string()))
}

/// Evaluate the argument list of the `test` / `[` builtin.
pub fn evaluate_args(args: &[String], env: &Environment) -> Result<bool, TestError> {
    if args.is_empty() {
        return Ok(false);
    }
    let mut parser = ArgParser { args, pos: 0, env };
    let result = parser.or()?;
    match parser.args.get(parser.pos) {
        None => Ok(result),
        Some(extra) if extra == ")" => Err(TestError::Missing("(")),
        Some(extra) => Err(TestError::BinaryExpected(extra.clone())),
    }
}

struct ArgParser<'a> {
    args: &'a [String],
    pos: usize,
    env: &'a Environment,
}

impl ArgParser<'_> {
    fn remaining(&self) -> usize {
        self.args.len() - self.pos
    }

    fn peek(&self, offset: usize) -> Option<&str> {
        self.args.get(self.pos + offset).map(String::as_str)
    }

    fn or(&mut self) -> Result<bool, TestError> {
        let mut result = self.and()?;
        while self.peek(0) == Some("-o") && self.remaining() > 1 {
            self.pos += 1;
            let right = self.and()?;
            result = result || right;
        }
        Ok(result)
    }

    fn and(&mut self) -> Result<bool, TestError> {
        let mut result = self.not()?;
        while self.peek(0) == Some("-a") && self.remaining() > 1 {
            self.pos += 1;
            let right = self.not()?;
            result = result && right;
        }
        Ok(result)
    }

    fn not(&mut self) -> Result<bool, TestError> {
        if self.peek(0) == Some("!") && self.remaining() > 1 {
            self.pos += 1;
            return Ok(!self.not()?);
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<bool, TestError> {
        let Some(first) = self.peek(0) else {
            return Err(TestError::Missing("argument"));
        };
        if self.remaining() >= 3
            && let Some(op) = self.peek(1)
            && is_binary_op(op)
        {
            let (left, op, right) = (first.to_string(), op.to_string(), self.args[self.pos + 2].clone());
            self.pos += 3;
            return binary(&left, &op, &right);
        }
        if first == "(" && self.remaining() > 1 {
            self.pos += 1;
            let inner = self.or()?;
            if self.peek(0) != Some(")") {
                return Err(TestError::Missing(")"));
            }
            self.pos += 1;
            return Ok(inner);
        }
        if self.remaining() >= 2 && is_unary_op(first) {
            let (op, operand) = (first.to_string(), self.args[self.pos + 1].clone());
            self.pos += 2;
            return unary(&op, &operand, self.env);
        }
        let value = !first.is_empty();
        self.pos += 1;
        Ok(value)
    }
}
