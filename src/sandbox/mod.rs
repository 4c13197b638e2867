//! Execution sandbox for template evaluation
//!
//! [`Sandbox`] is the effect boundary the shell interpreter runs against.
//! It intercepts two things:
//!
//! - **Command invocation**: classified by [`crate::policy`]. Builtins run
//!   in-process and print into the invocation's stdout, so `$(vopt_with x)`
//!   captures their text. Permitted externals are spawned on the host.
//!   Anything else aborts the evaluation with an unrecognized-command error.
//! - **File open**: delegated to a [`FileAccess`]. Evaluation contexts built
//!   by this crate use [`InertFileAccess`], so redirections and `source`
//!   never reach the filesystem.
//!
//! Diagnostics from a template reach the shared diagnostic stream through a
//! [`PrefixWriter`] tagging each line with the package name.

pub mod builtins;
pub mod external;
pub mod io;
pub mod prefix;

use std::io::Write;

use anyhow::{Context, Result};

use crate::config::OptionSet;
use crate::policy::{self, Command};
use crate::shell::{CommandCall, Environment, FileHandle, Hooks, OpenMode};
use crate::template::package_name;

pub use io::{FileAccess, FileAccessMode, HostFileAccess, InertFileAccess, InertHandle};
pub use prefix::{PrefixWriter, SharedWriter};

/// Hooks enforcing the capability policy for one evaluation.
pub struct Sandbox<'a> {
    options: &'a OptionSet,
    files: &'a dyn FileAccess,
    diagnostics: SharedWriter,
    output: SharedWriter,
}

impl<'a> Sandbox<'a> {
    /// Create a sandbox.
    ///
    /// `output` receives text printed by top-level commands. `diagnostics`
    /// receives prefixed stderr.
    pub fn new(
        options: &'a OptionSet,
        files: &'a dyn FileAccess,
        diagnostics: SharedWriter,
        output: SharedWriter,
    ) -> Self {
        Self {
            options,
            files,
            diagnostics,
            output,
        }
    }
}

impl Hooks for Sandbox<'_> {
    fn exec(&mut self, mut call: CommandCall<'_>) -> Result<i32> {
        let Some(name) = call.args.first() else {
            return Ok(0);
        };
        let package = package_name(call.env).to_string();
        match Command::classify(name) {
            Command::Builtin(builtin) => {
                if let Some(text) = builtins::run(builtin, &call.args[1..], self.options, &package)? {
                    call.stdout.extend_from_slice(text.as_bytes());
                }
                Ok(0)
            }
            Command::External(program) => Ok(external::run(&program, call, &package)?),
            Command::Denied(name) => {
                tracing::debug!("{package}: denied command {name:?}");
                Err(policy::unrecognized(&name).into())
            }
        }
    }

    fn open(&mut self, path: &str, mode: OpenMode) -> Result<Box<dyn FileHandle>> {
        self.files.open(path, mode).with_context(|| format!("cannot open {path}"))
    }

    fn stdout(&mut self, bytes: &[u8]) -> Result<()> {
        self.output.write_all(bytes).context("failed to write template output")
    }

    fn stderr(&mut self, bytes: &[u8], env: &Environment) -> Result<()> {
        let prefix = format!("{}: ", package_name(env));
        let mut relay = PrefixWriter::new(self.diagnostics.clone(), prefix);
        relay.write_all(bytes).context("failed to relay diagnostics")?;
        relay.finish().context("failed to relay diagnostics")?;
        Ok(())
    }
}
