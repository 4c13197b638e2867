//! Error handling for xdeps
//!
//! This module defines the strongly-typed failures a template evaluation can
//! produce. Every variant is fatal for the template that raised it, and the
//! batch driver treats the first one it observes as fatal for the whole run.
//!
//! # Error Categories
//!
//! - **Template source**: [`XdepsError::Syntax`], [`XdepsError::IncompleteTemplate`]
//! - **Sandbox policy**: [`XdepsError::ArgumentCount`], [`XdepsError::UnrecognizedCommand`],
//!   [`XdepsError::OptionConflict`], [`XdepsError::ExternalProcess`]
//! - **Setup**: [`XdepsError::InvalidConfig`], [`XdepsError::Io`]
//!
//! # Error Conversion and Context
//!
//! Library functions return [`anyhow::Result`] and attach the template path or
//! package name with [`anyhow::Context`]. The original kind stays reachable
//! through the chain:
//!
//! ```rust,no_run
//! use xdeps_cli::core::XdepsError;
//!
//! fn classify(err: &anyhow::Error) -> &'static str {
//!     match err.downcast_ref::<XdepsError>() {
//!         Some(XdepsError::OptionConflict { .. }) => "conflict",
//!         Some(_) => "other template failure",
//!         None => "unexpected",
//!     }
//! }
//! ```

use thiserror::Error;

/// The main error type for xdeps operations.
///
/// Messages are kept on a single line: the CLI prints the whole cause chain
/// as one diagnostic line prefixed with the failing file.
#[derive(Error, Debug)]
pub enum XdepsError {
    /// Template source could not be parsed.
    #[error("syntax error at line {line}, column {column}: {message}")]
    Syntax {
        /// 1-based line of the offending token
        line: usize,
        /// 1-based column of the offending token
        column: usize,
        /// Parser description of the problem
        message: String,
    },

    /// Template source ended inside an open construct.
    ///
    /// Raised for unterminated quotes, command substitutions, here-documents
    /// and compound commands even when the text before that point is valid.
    #[error("incomplete template: unterminated {construct} starting at line {line}")]
    IncompleteTemplate {
        /// The construct that was left open (e.g. "double quote", "if")
        construct: String,
        /// Line where the open construct started
        line: usize,
    },

    /// A builtin was called with too few or too many arguments.
    #[error("{command}: expected {} arguments, got {actual}", arity_range(.min, .max))]
    ArgumentCount {
        /// Name the template used to call the builtin
        command: String,
        /// Minimum accepted argument count
        min: usize,
        /// Maximum accepted argument count
        max: usize,
        /// Number of arguments actually passed
        actual: usize,
    },

    /// A command is neither a builtin nor a permitted external program.
    #[error("unrecognized function or permitted exec: {command:?}{}", did_you_mean(.suggestion))]
    UnrecognizedCommand {
        /// The command the template tried to run
        command: String,
        /// Closest builtin name, when one is near enough to be a likely typo
        suggestion: Option<String>,
    },

    /// Two mutually exclusive options are enabled at the same time.
    #[error("{package}: cannot set options {first} and {second} simultaneously")]
    OptionConflict {
        /// Package whose template declared the conflict
        package: String,
        /// First option named in the conflict declaration
        first: String,
        /// Second option named in the conflict declaration
        second: String,
    },

    /// A permitted external program could not be started or exited non-zero.
    #[error("{package}: {command} failed")]
    ExternalProcess {
        /// Package whose template ran the program
        package: String,
        /// Program name
        command: String,
        /// Spawn failure, or the non-zero exit status
        #[source]
        source: std::io::Error,
    },

    /// Invalid runtime configuration (flags or environment variables).
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration problem
        message: String,
    },

    /// Host I/O failure outside the template's own commands, such as
    /// starting the thread that parses or evaluates it.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn arity_range(min: &usize, max: &usize) -> String {
    if min == max {
        min.to_string()
    } else {
        format!("{min}..{max}")
    }
}

fn did_you_mean(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(name) => format!(" (did you mean {name:?}?)"),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argument_count_ranges() {
        let err = XdepsError::ArgumentCount {
            command: "vopt_with".to_string(),
            min: 1,
            max: 2,
            actual: 3,
        };
        assert_eq!(err.to_string(), "vopt_with: expected 1..2 arguments, got 3");

        let err = XdepsError::ArgumentCount {
            command: "vopt_bool".to_string(),
            min: 2,
            max: 2,
            actual: 1,
        };
        assert_eq!(err.to_string(), "vopt_bool: expected 2 arguments, got 1");
    }

    #[test]
    fn test_unrecognized_command_hint() {
        let err = XdepsError::UnrecognizedCommand {
            command: "curl".to_string(),
            suggestion: None,
        };
        assert_eq!(err.to_string(), "unrecognized function or permitted exec: \"curl\"");

        let err = XdepsError::UnrecognizedCommand {
            command: "vopt_iff".to_string(),
            suggestion: Some("vopt_if".to_string()),
        };
        assert!(err.to_string().ends_with("(did you mean \"vopt_if\"?)"));
    }

    #[test]
    fn test_io_errors_convert() {
        fn spawn() -> Result<(), XdepsError> {
            let started: std::io::Result<()> =
                Err(std::io::Error::new(std::io::ErrorKind::OutOfMemory, "no stack"));
            started?;
            Ok(())
        }
        let err = spawn().unwrap_err();
        assert!(matches!(err, XdepsError::Io(ref e) if e.kind() == std::io::ErrorKind::OutOfMemory));
        assert_eq!(err.to_string(), "IO error: no stack");
    }

    #[test]
    fn test_external_process_keeps_source() {
        let err = XdepsError::ExternalProcess {
            package: "foo".to_string(),
            command: "sed".to_string(),
            source: std::io::Error::other("exit status: 1"),
        };
        let chained = format!("{:#}", anyhow::Error::from(err));
        assert_eq!(chained, "foo: sed failed: exit status: 1");
    }
}
