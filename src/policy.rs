//! Capability policy for template evaluation
//!
//! A template may run exactly two kinds of commands besides the shell
//! language itself:
//!
//! - **Builtins**: the five `vopt_*` helpers that turn build options into
//!   configure flags or dependency fragments. They run in-process.
//! - **Permitted externals**: a fixed list of text and checksum utilities
//!   whose only effect is the text they print.
//!
//! Everything else is denied. Dispatch goes through [`Command::classify`],
//! which always checks builtins first, so a builtin name shadows any
//! same-named program on the host.
//!
//! # Examples
//!
//! ```rust
//! use xdeps_cli::policy::{Builtin, Command};
//!
//! assert_eq!(Command::classify("vopt_with"), Command::Builtin(Builtin::OptionWith));
//! assert_eq!(Command::classify("sed"), Command::External("sed".to_string()));
//! assert_eq!(Command::classify("curl"), Command::Denied("curl".to_string()));
//! ```

use std::fmt;
use std::str::FromStr;

use crate::core::XdepsError;

/// External programs a template is allowed to execute.
pub const PERMITTED_EXECS: &[&str] = &[
    "awk",
    "egrep",
    "fgrep",
    "find",
    "grep",
    "sed",
    "date",
    "sha256sum",
    "sha1sum",
    "md5sum",
    "shasum",
];

/// Maximum edit distance for a "did you mean" hint on denied commands.
const SUGGESTION_DISTANCE: usize = 2;

/// In-process option helpers available to every template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    /// `vopt_if opt [then] [else]`: print `then` when `opt` is enabled,
    /// `else` otherwise. An omitted branch prints nothing.
    OptionIf,
    /// `vopt_with opt [flag]`: print `--with-<flag>` or `--without-<flag>`.
    OptionWith,
    /// `vopt_enable opt [flag]`: print `--enable-<flag>` or `--disable-<flag>`.
    OptionEnable,
    /// `vopt_conflict a b`: fail when both options are enabled.
    OptionConflict,
    /// `vopt_bool opt prop`: print `-D<prop>=true` or `-D<prop>=false`.
    OptionBool,
}

impl Builtin {
    /// Every builtin, in documentation order.
    pub const ALL: [Builtin; 5] = [
        Builtin::OptionIf,
        Builtin::OptionWith,
        Builtin::OptionEnable,
        Builtin::OptionConflict,
        Builtin::OptionBool,
    ];

    /// Look up a builtin by the command name templates use.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "vopt_if" => Some(Builtin::OptionIf),
            "vopt_with" => Some(Builtin::OptionWith),
            "vopt_enable" => Some(Builtin::OptionEnable),
            "vopt_conflict" => Some(Builtin::OptionConflict),
            "vopt_bool" => Some(Builtin::OptionBool),
            _ => None,
        }
    }

    /// Command name of this builtin.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Builtin::OptionIf => "vopt_if",
            Builtin::OptionWith => "vopt_with",
            Builtin::OptionEnable => "vopt_enable",
            Builtin::OptionConflict => "vopt_conflict",
            Builtin::OptionBool => "vopt_bool",
        }
    }

    /// Inclusive `(min, max)` number of arguments after the command name.
    #[must_use]
    pub const fn arg_range(self) -> (usize, usize) {
        match self {
            Builtin::OptionIf => (1, 3),
            Builtin::OptionWith | Builtin::OptionEnable => (1, 2),
            Builtin::OptionConflict | Builtin::OptionBool => (2, 2),
        }
    }

    /// Reject argument lists outside [`arg_range`](Self::arg_range).
    pub fn check_arity(self, actual: usize) -> Result<(), XdepsError> {
        let (min, max) = self.arg_range();
        if (min..=max).contains(&actual) {
            return Ok(());
        }
        Err(XdepsError::ArgumentCount {
            command: self.name().to_string(),
            min,
            max,
            actual,
        })
    }
}

impl fmt::Display for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Builtin {
    type Err = XdepsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Builtin::from_name(s).ok_or_else(|| unrecognized(s))
    }
}

/// Whether `name` is on the external program whitelist.
#[must_use]
pub fn is_permitted_exec(name: &str) -> bool {
    PERMITTED_EXECS.contains(&name)
}

/// Result of looking a command name up in the policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Builtin(Builtin),
    External(String),
    Denied(String),
}

impl Command {
    /// Decide how a command name is handled. Builtins win over externals.
    #[must_use]
    pub fn classify(name: &str) -> Self {
        let command = if let Some(builtin) = Builtin::from_name(name) {
            Command::Builtin(builtin)
        } else if is_permitted_exec(name) {
            Command::External(name.to_string())
        } else {
            Command::Denied(name.to_string())
        };
        tracing::trace!("Classified {name:?} as {command:?}");
        command
    }
}

/// Error for a command the policy denies.
#[must_use]
pub fn unrecognized(name: &str) -> XdepsError {
    XdepsError::UnrecognizedCommand {
        command: name.to_string(),
        suggestion: suggest_builtin(name),
    }
}

/// Closest builtin name to a misspelled command.
#[must_use]
pub fn suggest_builtin(name: &str) -> Option<String> {
    if !name.starts_with("vopt") {
        return None;
    }
    Builtin::ALL
        .iter()
        .map(|b| (strsim::levenshtein(name, b.name()), b.name()))
        .filter(|(distance, _)| *distance <= SUGGESTION_DISTANCE)
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, candidate)| candidate.to_string())
}
