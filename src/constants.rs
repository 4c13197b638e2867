//! Global constants used throughout the xdeps codebase.
//!
//! This module contains parallelism parameters, sentinel values and other
//! fixed strings that are shared across multiple modules. Defining them
//! centrally makes the magic values discoverable.

/// Multiplier applied to CPU core count for default parallelism.
///
/// Template evaluation is dominated by short-lived `sed`/`awk` subprocesses
/// and small file reads, so the pool is sized well above the core count.
pub const PARALLELISM_CORE_MULTIPLIER: usize = 16;

/// Default CPU core count when detection fails.
///
/// Used as a fallback when `std::thread::available_parallelism()` returns an error.
pub const FALLBACK_CORE_COUNT: usize = 4;

/// Stack reserved for the thread that parses or evaluates one template.
///
/// Parser and interpreter nesting limits are sized against this, not
/// against the stack of whichever thread requested the work.
pub const EVALUATION_STACK_SIZE: usize = 64 * 1024 * 1024;

/// Input path that means "read a single template from standard input".
pub const STDIN_SENTINEL: &str = "-";

/// Package name reported when a template never assigns `pkgname`.
pub const UNKNOWN_PACKAGE: &str = "<no-pkgname>";

/// Variable holding the package name inside a template.
pub const PKGNAME_VAR: &str = "pkgname";

/// Suffix that marks a variable as a dependency list.
pub const DEPENDS_SUFFIX: &str = "depends";

/// Environment variable overriding the number of concurrent evaluations.
pub const JOBS_ENV_VAR: &str = "XDEPS_JOBS";

/// Default concurrency limit: available cores times [`PARALLELISM_CORE_MULTIPLIER`].
pub fn default_max_parallel() -> usize {
    let cores = std::thread::available_parallelism()
        .map(std::num::NonZero::get)
        .unwrap_or(FALLBACK_CORE_COUNT);
    cores * PARALLELISM_CORE_MULTIPLIER
}
