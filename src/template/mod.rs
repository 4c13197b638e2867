//! Template loading, parsing and sandboxed evaluation
//!
//! A template is identified by a [`TemplateInput`]: a lexically normalized
//! path or standard input. [`Template::load`] reads and parses it once;
//! [`Template::evaluate`] runs the parsed script against a fresh
//! [`Sandbox`] and returns the variables it left behind.
//!
//! # Examples
//!
//! ```rust
//! use xdeps_cli::template::{EvaluationContext, Template, TemplateInput};
//!
//! # fn example() -> anyhow::Result<()> {
//! let input = TemplateInput::from_arg("srcpkgs/foo/template");
//! let template = Template::parse(input, "pkgname=foo\ndepends=\"libc\"\n")?;
//! let env = template.evaluate(&EvaluationContext::default())?;
//! assert_eq!(env.scalar("depends"), Some("libc"));
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

use std::fmt;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::OptionSet;
use crate::constants::{EVALUATION_STACK_SIZE, PKGNAME_VAR, STDIN_SENTINEL, UNKNOWN_PACKAGE};
use crate::core::XdepsError;
use crate::sandbox::{FileAccess, FileAccessMode, Sandbox, SharedWriter};
use crate::shell::{self, Environment, Interpreter, ParseError, Value, ast::Script};

/// Where a template's source comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TemplateInput {
    Stdin,
    File(PathBuf),
}

impl TemplateInput {
    /// Interpret a command-line argument. `-` means standard input; any
    /// other value is a path, normalized lexically.
    #[must_use]
    pub fn from_arg(arg: &str) -> Self {
        if arg == STDIN_SENTINEL {
            TemplateInput::Stdin
        } else {
            TemplateInput::File(clean_path(Path::new(arg)))
        }
    }

    /// Read the whole source text.
    pub fn read(&self) -> Result<String> {
        match self {
            TemplateInput::Stdin => {
                let mut source = String::new();
                std::io::stdin()
                    .read_to_string(&mut source)
                    .context("failed to read template from stdin")?;
                Ok(source)
            }
            TemplateInput::File(path) => {
                std::fs::read_to_string(path).context("failed to read template")
            }
        }
    }
}

impl fmt::Display for TemplateInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateInput::Stdin => f.write_str(STDIN_SENTINEL),
            TemplateInput::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Lexical path normalization.
///
/// Removes `.` components, folds `name/..` pairs, drops `..` directly under
/// the root and returns `.` for an empty result. The filesystem is never
/// consulted, so symlinks are not resolved.
#[must_use]
pub fn clean_path(path: &Path) -> PathBuf {
    let mut components: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match components.last() {
                Some(Component::Normal(_)) => {
                    components.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => components.push(component),
            },
            c => components.push(c),
        }
    }
    if components.is_empty() {
        return PathBuf::from(".");
    }
    components.iter().collect()
}

/// Per-evaluation resources.
///
/// The option registry is shared read-only between all evaluations of a
/// run; everything else is owned by the evaluation that uses it.
#[derive(Clone)]
pub struct EvaluationContext {
    pub options: Arc<OptionSet>,
    pub files: Arc<dyn FileAccess>,
    /// Receives prefixed stderr from the template and its commands.
    pub diagnostics: SharedWriter,
    /// Receives stdout of top-level commands.
    pub output: SharedWriter,
}

impl EvaluationContext {
    /// Context with inert file access, diagnostics on stderr and top-level
    /// output discarded.
    #[must_use]
    pub fn new(options: Arc<OptionSet>) -> Self {
        Self {
            options,
            files: FileAccessMode::Inert.access(),
            diagnostics: SharedWriter::stderr(),
            output: SharedWriter::sink(),
        }
    }

    #[must_use]
    pub fn with_file_access(mut self, mode: FileAccessMode) -> Self {
        self.files = mode.access();
        self
    }

    #[must_use]
    pub fn with_diagnostics(mut self, diagnostics: SharedWriter) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    #[must_use]
    pub fn with_output(mut self, output: SharedWriter) -> Self {
        self.output = output;
        self
    }
}

impl Default for EvaluationContext {
    fn default() -> Self {
        Self::new(Arc::new(OptionSet::default()))
    }
}

impl fmt::Debug for EvaluationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluationContext")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// A parsed template.
#[derive(Debug)]
pub struct Template {
    input: TemplateInput,
    script: Script,
}

impl Template {
    /// Read and parse a template.
    pub fn load(input: TemplateInput) -> Result<Self> {
        let source = input.read()?;
        Ok(Self::parse(input, &source)?)
    }

    /// Parse template source text.
    pub fn parse(input: TemplateInput, source: &str) -> Result<Self, XdepsError> {
        let script = with_evaluation_stack(|| shell::parse(source))?.map_err(|err| match err {
            ParseError::Syntax {
                line,
                column,
                message,
            } => XdepsError::Syntax {
                line,
                column,
                message,
            },
            ParseError::Incomplete {
                line, construct, ..
            } => XdepsError::IncompleteTemplate { construct, line },
        })?;
        tracing::trace!("Parsed {input} ({} top-level commands)", script.body.len());
        Ok(Self { input, script })
    }

    #[must_use]
    pub fn input(&self) -> &TemplateInput {
        &self.input
    }

    /// Run the template in a fresh sandbox and return its final variables.
    pub fn evaluate(&self, ctx: &EvaluationContext) -> Result<Environment> {
        let env = with_evaluation_stack(|| {
            let mut sandbox = Sandbox::new(
                &ctx.options,
                ctx.files.as_ref(),
                ctx.diagnostics.clone(),
                ctx.output.clone(),
            );
            Interpreter::new(&mut sandbox).run(&self.script)
        })
        .map_err(XdepsError::from)??;
        tracing::debug!(
            "Evaluated {} ({}): {} variables",
            self.input,
            package_name(&env),
            env.len()
        );
        Ok(env)
    }
}

/// Run `f` on a dedicated thread with [`EVALUATION_STACK_SIZE`] bytes of
/// stack, so nesting limits hold whatever thread the caller is on.
fn with_evaluation_stack<T: Send>(f: impl FnOnce() -> T + Send) -> std::io::Result<T> {
    std::thread::scope(|scope| {
        let handle = std::thread::Builder::new()
            .name("xdeps-eval".to_string())
            .stack_size(EVALUATION_STACK_SIZE)
            .spawn_scoped(scope, f)?;
        match handle.join() {
            Ok(value) => Ok(value),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    })
}

/// Package name of a template for diagnostics.
///
/// Falls back to `<no-pkgname>` when `pkgname` is unset or not a scalar.
#[must_use]
pub fn package_name(env: &Environment) -> &str {
    match env.value(PKGNAME_VAR) {
        Some(Value::Scalar(name)) => name,
        _ => UNKNOWN_PACKAGE,
    }
}
