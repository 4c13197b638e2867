//! xdeps - dependency extraction for xbps-src templates
//!
//! Package templates are shell scripts whose variables describe a package.
//! xdeps evaluates many templates concurrently and reports, for each one,
//! every variable ending in `depends` as a list of dependency tokens. The
//! evaluation is sandboxed: templates never touch the filesystem and can only
//! run the `vopt_*` option helpers and a short list of text utilities.
//!
//! # Architecture Overview
//!
//! Data flows one way through the crate:
//!
//! 1. [`config`] freezes the build option registry and runtime settings
//! 2. [`policy`] classifies each command a template runs
//! 3. [`sandbox`] enforces that policy and neutralizes file I/O
//! 4. [`template`] parses a template with [`shell`] and runs it in the sandbox
//! 5. [`extract`] turns the final variables into a dependency record
//! 6. [`batch`] fans the pipeline out over all inputs and back in, in order
//!
//! # Core Modules
//!
//! - [`batch`] - Bounded-concurrency batch driver
//! - [`cli`] - Command-line parsing and JSON-lines output
//! - [`config`] - Option registry and engine configuration
//! - [`core`] - Error types
//! - [`extract`] - Dependency variable extraction
//! - [`policy`] - Builtins and permitted external programs
//! - [`sandbox`] - Effect boundary for running templates
//! - [`shell`] - Bash-subset parser and interpreter
//! - [`template`] - Template inputs, parsing and evaluation
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use xdeps_cli::config::OptionSet;
//! use xdeps_cli::extract::extract_dependencies;
//! use xdeps_cli::template::{EvaluationContext, Template, TemplateInput};
//!
//! # fn example() -> anyhow::Result<()> {
//! let ctx = EvaluationContext::new(Arc::new(OptionSet::from_specs(["ssl"])));
//! let template = Template::load(TemplateInput::from_arg("srcpkgs/foo/template"))?;
//! let record = extract_dependencies(&template.evaluate(&ctx)?);
//! for (name, tokens) in record.iter() {
//!     println!("{name}: {tokens:?}");
//! }
//! # Ok(())
//! # }
//! ```

// Engine
pub mod batch;
pub mod extract;
pub mod policy;
pub mod sandbox;
pub mod template;

// Shell runtime
pub mod shell;

// Supporting modules
pub mod cli;
pub mod config;
pub mod constants;
pub mod core;

// test_utils module is available for both unit tests and integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
