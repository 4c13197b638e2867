//! Runtime configuration for xdeps
//!
//! Configuration is assembled once before any template is evaluated and is
//! immutable afterwards. It has two sources:
//!
//! 1. **Command-line flags** - `-o` option specifications and `--jobs`
//! 2. **Environment** - `XDEPS_JOBS` when `--jobs` is absent
//!
//! # Modules
//!
//! - [`options`] - The build option registry consulted by `vopt_*` builtins
//!
//! # Examples
//!
//! ```rust
//! use xdeps_cli::config::{EngineConfig, OptionSet};
//!
//! # fn example() -> anyhow::Result<()> {
//! let config = EngineConfig::new(OptionSet::from_specs(["ssl,~x11"])).with_max_parallel(8)?;
//! assert_eq!(config.max_parallel, 8);
//! assert!(config.options.is_enabled("ssl"));
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

pub mod options;

pub use options::{OptionSet, OptionSetBuilder};

use std::sync::Arc;

use crate::constants::default_max_parallel;
use crate::core::XdepsError;
use crate::sandbox::FileAccessMode;
use crate::template::EvaluationContext;

/// Settings shared by every evaluation in a run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Enabled build options, shared read-only by all workers.
    pub options: Arc<OptionSet>,
    /// Upper bound on concurrently evaluated templates.
    pub max_parallel: usize,
    /// File access given to templates. Always inert from the CLI.
    pub file_access: FileAccessMode,
}

impl EngineConfig {
    /// Configuration with the default parallelism and inert file access.
    #[must_use]
    pub fn new(options: OptionSet) -> Self {
        Self {
            options: Arc::new(options),
            max_parallel: default_max_parallel(),
            file_access: FileAccessMode::Inert,
        }
    }

    /// Override the concurrency limit. Zero is rejected.
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Result<Self, XdepsError> {
        if max_parallel == 0 {
            return Err(XdepsError::InvalidConfig {
                message: "the number of parallel jobs must be at least 1".to_string(),
            });
        }
        self.max_parallel = max_parallel;
        Ok(self)
    }

    #[must_use]
    pub fn with_file_access(mut self, file_access: FileAccessMode) -> Self {
        self.file_access = file_access;
        self
    }

    /// Evaluation context sharing this configuration's option registry.
    #[must_use]
    pub fn evaluation_context(&self) -> EvaluationContext {
        EvaluationContext::new(Arc::clone(&self.options)).with_file_access(self.file_access)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(OptionSet::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::PARALLELISM_CORE_MULTIPLIER;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(config.options.is_empty());
        assert_eq!(config.file_access, FileAccessMode::Inert);
        assert!(config.max_parallel >= PARALLELISM_CORE_MULTIPLIER);
        assert_eq!(config.max_parallel % PARALLELISM_CORE_MULTIPLIER, 0);
    }

    #[test]
    fn test_zero_jobs_rejected() {
        let err = EngineConfig::default().with_max_parallel(0).unwrap_err();
        assert!(matches!(err, XdepsError::InvalidConfig { .. }));
        assert_eq!(EngineConfig::default().with_max_parallel(3).unwrap().max_parallel, 3);
    }

    #[test]
    fn test_context_shares_options() {
        let config = EngineConfig::new(OptionSet::from_specs(["a"]));
        let ctx = config.evaluation_context();
        assert!(Arc::ptr_eq(&config.options, &ctx.options));
    }
}
