//! Command-line interface for xdeps
//!
//! ```bash
//! # Dependencies of two templates with default options
//! xdeps srcpkgs/foo/template srcpkgs/bar/template
//!
//! # Enable gtk3, disable x11, read one template from stdin
//! xdeps -o gtk3,~x11 - < srcpkgs/foo/template
//!
//! # Cap concurrency
//! XDEPS_JOBS=4 xdeps srcpkgs/*/template
//! ```
//!
//! Results are printed only once every template has been evaluated. The
//! first failing template aborts the run; `main` reports it as a single
//! `ERR <path>: <cause>` line and exits with status 1.

pub mod output;

use std::io::Write;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tracing_subscriber::EnvFilter;

use crate::batch::{BatchDriver, SandboxedPipeline};
use crate::config::{EngineConfig, OptionSet};
use crate::constants::JOBS_ENV_VAR;
use crate::template::TemplateInput;

/// Extract dependency variables from package templates.
#[derive(Debug, Parser)]
#[command(
    name = "xdeps",
    about = "Extract dependency variables from xbps-src templates",
    version,
    long_about = "Evaluates xbps-src templates in a sandbox and prints every variable \
                  ending in `depends` as one JSON object per template."
)]
pub struct Cli {
    /// Build options: `name` enables, `~name` disables (comma separated, repeatable)
    #[arg(short = 'o', long = "options", value_name = "OPTS", action = ArgAction::Append)]
    options: Vec<String>,

    /// Maximum number of templates evaluated at once
    #[arg(short, long, value_name = "N", env = JOBS_ENV_VAR)]
    jobs: Option<usize>,

    /// Enable debug logging
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Disable all logging
    #[arg(short, long)]
    quiet: bool,

    /// Template files; `-` reads one template from stdin
    #[arg(value_name = "FILE")]
    inputs: Vec<String>,
}

impl Cli {
    /// Log filter implied by the verbosity flags. `None` means no logging.
    #[must_use]
    pub fn log_level(&self) -> Option<&'static str> {
        if self.verbose {
            Some("debug")
        } else if self.quiet {
            None
        } else {
            Some("warn")
        }
    }

    /// Install the stderr tracing subscriber. `RUST_LOG` overrides the flags.
    pub fn init_logging(&self) {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else if let Some(level) = self.log_level() {
            EnvFilter::new(level)
        } else {
            return;
        };
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    }

    /// Build the engine configuration from the parsed flags.
    pub fn build_config(&self) -> Result<EngineConfig> {
        let config = EngineConfig::new(OptionSet::from_specs(&self.options));
        match self.jobs {
            Some(jobs) => Ok(config.with_max_parallel(jobs)?),
            None => Ok(config),
        }
    }

    /// Normalized template inputs, in command-line order.
    #[must_use]
    pub fn inputs(&self) -> Vec<TemplateInput> {
        self.inputs.iter().map(|arg| TemplateInput::from_arg(arg)).collect()
    }

    /// Run the batch and print results to stdout.
    pub async fn execute(self) -> Result<()> {
        self.execute_with_output(std::io::stdout()).await
    }

    /// Run the batch and write results to `out`.
    pub async fn execute_with_output<W: Write>(self, out: W) -> Result<()> {
        let config = self.build_config()?;
        let inputs = self.inputs();
        if inputs.is_empty() {
            tracing::debug!("No templates given");
            return Ok(());
        }

        let driver = BatchDriver::new(
            SandboxedPipeline::new(config.evaluation_context()),
            config.max_parallel,
        );
        let reports = driver.run(inputs).await?;
        output::write_reports(out, &reports).context("failed to print results")
    }
}
