//! Bash-subset parser and interpreter for package templates
//!
//! Package templates are shell scripts, but evaluating them must never touch
//! the host: every command that is not part of the shell language itself and
//! every file a script opens goes through a [`Hooks`] implementation chosen by
//! the caller. The interpreter itself has no process or filesystem access.
//!
//! # Modules
//!
//! - [`parser`] - Text to [`ast::Script`], with incomplete-input detection
//! - [`ast`] - Syntax tree
//! - [`env`] - Variable storage and the final [`Environment`]
//! - [`arith`] - `$(( ))` arithmetic
//! - [`pattern`] - Glob-style pattern matching for `case` and `${var%pat}`
//! - [`test_expr`] - `test`, `[` and `[[ ]]` predicates
//!
//! # Example
//!
//! ```rust,no_run
//! use xdeps_cli::shell::{self, Interpreter};
//! # fn example(hooks: &mut dyn shell::Hooks) -> anyhow::Result<()> {
//! let script = shell::parse("pkgname=foo\ndepends=\"libc\"\n")?;
//! let env = Interpreter::new(hooks).run(&script)?;
//! assert_eq!(env.scalar("depends"), Some("libc"));
//! # Ok(())
//! # }
//! ```

pub mod arith;
pub mod ast;
pub mod env;
mod expand;
mod interp;
pub mod parser;
pub mod pattern;
pub mod test_expr;

use std::io::{Read, Write};

use thiserror::Error;

pub use env::{Environment, Value, Variable};
pub use interp::Interpreter;
pub use parser::{ParseError, parse};

/// Runtime failures raised by the interpreter itself.
///
/// Failures returned by [`Hooks`] are passed through unchanged inside the
/// `anyhow::Error` chain.
#[derive(Debug, Error)]
pub enum ShellError {
    #[error("{0}: bad substitution")]
    BadSubstitution(String),

    #[error(transparent)]
    Arith(#[from] arith::ArithError),

    /// `${name:?message}` on an unset or empty parameter.
    #[error("{name}: {message}")]
    UnsetParameter { name: String, message: String },

    #[error("maximum nesting level exceeded ({0})")]
    RecursionLimit(usize),

    /// `exit` with a non-zero status.
    #[error("exit status {0}")]
    Exit(i32),
}

/// How a script wants to open a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write { append: bool },
    ReadWrite,
}

/// A file opened through [`Hooks::open`].
pub trait FileHandle: Read + Write + Send {}

impl<T: Read + Write + Send> FileHandle for T {}

/// One command the interpreter does not implement itself.
pub struct CommandCall<'a> {
    /// Command name followed by its expanded arguments.
    pub args: &'a [String],
    /// Remaining pipeline or redirection input. Commands that never read
    /// leave it for the next reader.
    pub stdin: &'a mut dyn Read,
    pub stdout: &'a mut Vec<u8>,
    pub stderr: &'a mut Vec<u8>,
    /// Variables visible to the command, including prefix assignments.
    pub env: &'a Environment,
}

/// Effect boundary between a running script and the outside world.
pub trait Hooks {
    /// Run a command and return its exit status. An `Err` aborts the script.
    fn exec(&mut self, call: CommandCall<'_>) -> anyhow::Result<i32>;

    /// Open a redirection target or sourced file.
    fn open(&mut self, path: &str, mode: OpenMode) -> anyhow::Result<Box<dyn FileHandle>>;

    /// Output written by top-level commands.
    fn stdout(&mut self, bytes: &[u8]) -> anyhow::Result<()>;

    /// Diagnostics written by top-level commands. `env` is the script's
    /// environment at the time of writing.
    fn stderr(&mut self, bytes: &[u8], env: &Environment) -> anyhow::Result<()>;
}
