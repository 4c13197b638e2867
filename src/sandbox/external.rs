//! Execution of permitted external programs.
//!
//! The program is resolved on the host `PATH` and started with a cleared
//! environment rebuilt from `PATH` and the template's exported scalars.
//! Its stdout is captured for command substitution and its stderr is handed
//! back to the interpreter, which relays it with the package prefix.
//!
//! Several permitted programs can write files or start other programs when
//! asked to. Those capabilities are closed off before anything is spawned:
//!
//! - `awk` and `sed` must be the GNU implementations and always run with
//!   `--sandbox`, which disables `system()`, pipes and file redirection in
//!   awk and the `e`, `r` and `w` commands in sed. Other implementations
//!   have no such mode and are refused.
//! - Arguments that write files or run commands (`find -exec`, `sed -i`,
//!   `gawk --profile`, `date -s`, ...) are rejected.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;

use crate::core::XdepsError;
use crate::shell::CommandCall;

/// `find` primaries that delete files, write files or run commands.
const FIND_DENIED_PRIMARIES: &[&str] = &[
    "-delete", "-exec", "-execdir", "-ok", "-okdir", "-fls", "-fprint", "-fprint0", "-fprintf",
];

/// gawk options that write profiles or dumps, or load code.
const AWK_DENIED_OPTIONS: &[&str] = &[
    "-d",
    "-D",
    "-l",
    "-o",
    "-p",
    "--debug",
    "--dump-variables",
    "--load",
    "--pretty-print",
    "--profile",
];

/// gawk options whose value is the next argument.
const AWK_VALUE_OPTIONS: &[&str] = &["-e", "-E", "-f", "-F", "-i", "-v"];

const DATE_DENIED_OPTIONS: &[&str] = &["-s", "--set"];

static GNU_AWK: OnceLock<Option<PathBuf>> = OnceLock::new();
static GNU_SED: OnceLock<Option<PathBuf>> = OnceLock::new();

/// Run `program` with the arguments of `call`.
///
/// Fails with [`XdepsError::ExternalProcess`] when the program is missing,
/// is asked to do something outside its text-processing role, cannot be
/// started or exits with a non-zero status.
pub fn run(program: &str, mut call: CommandCall<'_>, package: &str) -> Result<i32, XdepsError> {
    let failed = |source: io::Error| XdepsError::ExternalProcess {
        package: package.to_string(),
        command: program.to_string(),
        source,
    };

    let args = &call.args[1..];
    if let Some(arg) = denied_argument(program, args) {
        tracing::debug!("{package}: refusing {program} {arg}");
        return Err(failed(io::Error::new(
            io::ErrorKind::PermissionDenied,
            format!("{arg} is not permitted"),
        )));
    }
    let (path, sandbox_flag) = resolve(program).map_err(failed)?;

    let mut input = Vec::new();
    call.stdin.read_to_end(&mut input).map_err(failed)?;

    let mut command = Command::new(&path);
    command.args(sandbox_flag);
    command
        .args(args)
        .env_clear()
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(host_path) = std::env::var_os("PATH") {
        command.env("PATH", host_path);
    }
    command.envs(call.env.exported_scalars());

    tracing::debug!("{package}: executing {} {args:?}", path.display());
    let mut child = command.spawn().map_err(failed)?;

    let feeder = child.stdin.take().map(|mut stdin| {
        std::thread::spawn(move || match stdin.write_all(&input) {
            Err(e) if e.kind() != io::ErrorKind::BrokenPipe => Err(e),
            _ => Ok(()),
        })
    });
    let output = child.wait_with_output().map_err(failed)?;
    if let Some(feeder) = feeder {
        feeder
            .join()
            .map_err(|_| failed(io::Error::other("stdin writer panicked")))?
            .map_err(failed)?;
    }

    call.stdout.extend_from_slice(&output.stdout);
    call.stderr.extend_from_slice(&output.stderr);

    if !output.status.success() {
        tracing::debug!("{package}: {program} exited with {}", output.status);
        return Err(failed(io::Error::other(output.status.to_string())));
    }
    Ok(0)
}

/// Host binary for `program` and the flag that confines it, if any.
fn resolve(program: &str) -> io::Result<(PathBuf, Option<&'static str>)> {
    match program {
        "awk" => Ok((gnu_awk()?, Some("--sandbox"))),
        "sed" => Ok((gnu_sed()?, Some("--sandbox"))),
        _ => which::which(program)
            .map(|path| (path, None))
            .map_err(|e| io::Error::new(io::ErrorKind::NotFound, e.to_string())),
    }
}

/// GNU awk on the host `PATH`, as `gawk` or `awk`.
pub fn gnu_awk() -> io::Result<PathBuf> {
    find_gnu(&GNU_AWK, &["gawk", "awk"], "GNU Awk")
}

/// GNU sed on the host `PATH`, as `sed` or `gsed`.
pub fn gnu_sed() -> io::Result<PathBuf> {
    find_gnu(&GNU_SED, &["sed", "gsed"], "(GNU sed)")
}

fn find_gnu(
    cache: &OnceLock<Option<PathBuf>>,
    candidates: &[&str],
    banner: &str,
) -> io::Result<PathBuf> {
    cache
        .get_or_init(|| {
            candidates
                .iter()
                .filter_map(|name| which::which(name).ok())
                .find(|path| reports_version(path, banner))
        })
        .clone()
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{banner} with --sandbox support not found"),
            )
        })
}

/// Whether the first line of `path --version` mentions `banner`.
fn reports_version(path: &Path, banner: &str) -> bool {
    Command::new(path)
        .arg("--version")
        .env_clear()
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .is_ok_and(|output| {
            output.status.success()
                && String::from_utf8_lossy(&output.stdout)
                    .lines()
                    .next()
                    .is_some_and(|line| line.contains(banner))
        })
}

/// First argument that would let `program` write files or run commands.
fn denied_argument<'a>(program: &str, args: &'a [String]) -> Option<&'a str> {
    match program {
        "find" => args.iter().map(String::as_str).find(|arg| FIND_DENIED_PRIMARIES.contains(arg)),
        "awk" => awk_denied_option(args),
        "sed" => args.iter().map(String::as_str).find(|arg| is_sed_in_place(arg)),
        "date" => args
            .iter()
            .map(String::as_str)
            .find(|arg| DATE_DENIED_OPTIONS.contains(&option_name(arg))),
        _ => None,
    }
}

/// Only leading options count; the program text or the first operand
/// ends them.
fn awk_denied_option(args: &[String]) -> Option<&str> {
    let mut args = args.iter().map(String::as_str);
    while let Some(arg) = args.next() {
        if arg == "--" || arg == "-" || !arg.starts_with('-') {
            return None;
        }
        if AWK_DENIED_OPTIONS.contains(&option_name(arg)) {
            return Some(arg);
        }
        if AWK_VALUE_OPTIONS.contains(&arg) {
            args.next();
        }
    }
    None
}

/// `--name` of a long option (without `=value`) or `-x` of a short one.
fn option_name(arg: &str) -> &str {
    if arg.starts_with("--") {
        arg.split('=').next().unwrap_or(arg)
    } else if arg.starts_with('-') {
        arg.char_indices().nth(2).map_or(arg, |(end, _)| &arg[..end])
    } else {
        ""
    }
}

fn is_sed_in_place(arg: &str) -> bool {
    if arg.starts_with("--") {
        return option_name(arg) == "--in-place";
    }
    let Some(flags) = arg.strip_prefix('-') else {
        return false;
    };
    for flag in flags.chars() {
        match flag {
            'i' => return true,
            // The rest of the argument is this option's value.
            'e' | 'f' | 'l' => return false,
            _ => {}
        }
    }
    false
}
