//! The `vopt_*` option helpers.
//!
//! Each helper validates its argument count, then computes the text it
//! prints from the option registry. None of them touch anything outside
//! their arguments and the registry.

use crate::config::OptionSet;
use crate::core::XdepsError;
use crate::policy::Builtin;

/// Run one builtin and return the text it prints, if any.
///
/// `args` excludes the command name. `package` names the template in
/// conflict errors.
pub fn run(
    builtin: Builtin,
    args: &[String],
    options: &OptionSet,
    package: &str,
) -> Result<Option<String>, XdepsError> {
    builtin.check_arity(args.len())?;
    let enabled = options.is_enabled(&args[0]);
    let output = match builtin {
        Builtin::OptionIf => {
            let branch = if enabled { 1 } else { 2 };
            args.get(branch).cloned()
        }
        Builtin::OptionWith => {
            let flag = args.get(1).unwrap_or(&args[0]);
            let with = if enabled { "with" } else { "without" };
            Some(format!("--{with}-{flag}"))
        }
        Builtin::OptionEnable => {
            let flag = args.get(1).unwrap_or(&args[0]);
            let enable = if enabled { "enable" } else { "disable" };
            Some(format!("--{enable}-{flag}"))
        }
        Builtin::OptionConflict => {
            if enabled && options.is_enabled(&args[1]) {
                return Err(XdepsError::OptionConflict {
                    package: package.to_string(),
                    first: args[0].clone(),
                    second: args[1].clone(),
                });
            }
            None
        }
        Builtin::OptionBool => Some(format!("-D{}={enabled}", args[1])),
    };
    tracing::trace!("{builtin} {args:?} -> {output:?}");
    Ok(output)
}
