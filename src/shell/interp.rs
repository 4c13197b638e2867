//! Tree-walking interpreter.
//!
//! Output is buffered per command level and routed through redirections
//! once a command finishes; top-level buffers are handed to the hooks after
//! every list item.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::mem;
use std::sync::Arc;

use anyhow::{Context, Result};

use super::arith;
use super::ast::{
    AndOr, AssignValue, Assignment, CaseTerminator, Command, CommandList, CompoundCommand,
    Connector, Pipeline, Redirect, RedirectOp, RedirectTarget, Script, SimpleCommand, TestExpr,
    Word, WordPart,
};
use super::env::{Environment, Value, Variable};
use super::parser;
use super::pattern::ShellPattern;
use super::test_expr::{self, TestError};
use super::{CommandCall, FileHandle, Hooks, OpenMode, ShellError};

/// Deepest chain of function calls, `eval`/`source` and command
/// substitutions a script may build.
const MAX_NESTING_DEPTH: usize = 256;

const DECLARATION_BUILTINS: &[&str] = &["export", "local", "declare", "typeset", "readonly"];

/// Unread input of a command.
#[derive(Debug, Default)]
pub(super) struct Input {
    data: Vec<u8>,
    pos: usize,
}

impl Input {
    pub(super) fn new(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }

    /// Next line without its terminator, or `None` at end of input.
    fn read_until(&mut self, delimiter: u8) -> Option<String> {
        if self.pos >= self.data.len() {
            return None;
        }
        let rest = &self.data[self.pos..];
        let (line, consumed) = match rest.iter().position(|&b| b == delimiter) {
            Some(end) => (&rest[..end], end + 1),
            None => (rest, rest.len()),
        };
        let line = String::from_utf8_lossy(line).into_owned();
        self.pos += consumed;
        Some(line)
    }
}

impl Read for Input {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let rest = &self.data[self.pos.min(self.data.len())..];
        let n = rest.len().min(buf.len());
        buf[..n].copy_from_slice(&rest[..n]);
        self.pos += n;
        Ok(n)
    }
}

/// Streams of the command being executed.
#[derive(Debug, Default)]
pub(super) struct Io {
    pub(super) input: Input,
    pub(super) out: Vec<u8>,
    pub(super) err: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Break(usize),
    Continue(usize),
    Return,
    Exit(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sink {
    Out,
    Err,
    File(usize),
    Closed,
}

struct RedirectPlan {
    input: Option<Vec<u8>>,
    stdout: Sink,
    stderr: Sink,
    files: Vec<Box<dyn FileHandle>>,
}

struct Snapshot {
    env: Environment,
    functions: HashMap<String, Arc<Command>>,
    positional: Vec<String>,
    frames: Vec<Vec<(String, Option<Variable>)>>,
    call_depth: usize,
    loop_depth: usize,
}

/// Executes parsed scripts against a set of [`Hooks`].
pub struct Interpreter<'h> {
    hooks: &'h mut dyn Hooks,
    pub(super) env: Environment,
    functions: HashMap<String, Arc<Command>>,
    pub(super) positional: Vec<String>,
    pub(super) last_status: i32,
    /// Status of the last command substitution, for assignment-only commands.
    pub(super) subst_status: Option<i32>,
    flow: Option<Flow>,
    /// Saved outer bindings of `local` variables, one frame per call.
    frames: Vec<Vec<(String, Option<Variable>)>>,
    call_depth: usize,
    loop_depth: usize,
    nesting: usize,
}

impl<'h> Interpreter<'h> {
    pub fn new(hooks: &'h mut dyn Hooks) -> Self {
        Self {
            hooks,
            env: Environment::new(),
            functions: HashMap::new(),
            positional: Vec::new(),
            last_status: 0,
            subst_status: None,
            flow: None,
            frames: Vec::new(),
            call_depth: 0,
            loop_depth: 0,
            nesting: 0,
        }
    }

    /// Run `script` to completion and return every variable it left set.
    ///
    /// `exit` with a non-zero status fails with [`ShellError::Exit`]; a
    /// non-zero status from the last command does not.
    pub fn run(mut self, script: &Script) -> Result<Environment> {
        for item in &script.body {
            let mut io = Io::default();
            let result = self.execute_and_or(item, &mut io);
            self.flush(&mut io)?;
            result?;
            match self.flow.take() {
                Some(Flow::Exit(0)) => break,
                Some(Flow::Exit(code)) => return Err(ShellError::Exit(code).into()),
                _ => {}
            }
        }
        Ok(self.env)
    }

    fn flush(&mut self, io: &mut Io) -> Result<()> {
        if !io.out.is_empty() {
            self.hooks.stdout(&mem::take(&mut io.out))?;
        }
        if !io.err.is_empty() {
            self.hooks.stderr(&mem::take(&mut io.err), &self.env)?;
        }
        Ok(())
    }

    // ---- lists ----

    pub(super) fn execute_list(&mut self, list: &CommandList, io: &mut Io) -> Result<()> {
        for item in list {
            self.execute_and_or(item, io)?;
            if self.flow.is_some() {
                break;
            }
        }
        Ok(())
    }

    fn execute_and_or(&mut self, item: &AndOr, io: &mut Io) -> Result<()> {
        self.execute_pipeline(&item.first, io)?;
        for (connector, pipeline) in &item.rest {
            if self.flow.is_some() {
                break;
            }
            let run = match connector {
                Connector::And => self.last_status == 0,
                Connector::Or => self.last_status != 0,
            };
            if run {
                self.execute_pipeline(pipeline, io)?;
            }
        }
        Ok(())
    }

    fn execute_pipeline(&mut self, pipeline: &Pipeline, io: &mut Io) -> Result<()> {
        if let [command] = pipeline.commands.as_slice() {
            self.execute_command(command, io)?;
        } else {
            let last = pipeline.commands.len() - 1;
            let mut input = mem::take(&mut io.input);
            for (index, command) in pipeline.commands.iter().enumerate() {
                let mut stage = Io {
                    input,
                    ..Io::default()
                };
                let snapshot = self.snapshot();
                let result = self.execute_command(command, &mut stage);
                self.leave_subshell(snapshot);
                result?;
                io.err.append(&mut stage.err);
                if index == 0 {
                    io.input = mem::take(&mut stage.input);
                }
                if index == last {
                    io.out.append(&mut stage.out);
                    input = Input::default();
                } else {
                    input = Input::new(stage.out);
                }
            }
        }
        if pipeline.negated {
            self.last_status = i32::from(self.last_status == 0);
        }
        Ok(())
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            env: self.env.clone(),
            functions: self.functions.clone(),
            positional: self.positional.clone(),
            frames: self.frames.clone(),
            call_depth: self.call_depth,
            loop_depth: self.loop_depth,
        }
    }

    /// Restore state after a subshell; `exit` inside it only sets the status.
    fn leave_subshell(&mut self, snapshot: Snapshot) {
        if let Some(Flow::Exit(code)) = self.flow.take() {
            self.last_status = code;
        }
        self.env = snapshot.env;
        self.functions = snapshot.functions;
        self.positional = snapshot.positional;
        self.frames = snapshot.frames;
        self.call_depth = snapshot.call_depth;
        self.loop_depth = snapshot.loop_depth;
    }

    /// Run `list` in a subshell and return what it wrote to stdout.
    pub(super) fn command_substitution(&mut self, list: &CommandList) -> Result<String> {
        self.enter()?;
        let snapshot = self.snapshot();
        let mut io = Io::default();
        let result = self.execute_list(list, &mut io);
        self.leave_subshell(snapshot);
        self.nesting -= 1;
        result?;
        self.subst_status = Some(self.last_status);
        if !io.err.is_empty() {
            self.hooks.stderr(&io.err, &self.env)?;
        }
        let mut text = String::from_utf8_lossy(&io.out).into_owned();
        while text.ends_with('\n') {
            text.pop();
        }
        Ok(text)
    }

    // ---- commands ----

    fn execute_command(&mut self, command: &Command, io: &mut Io) -> Result<()> {
        match command {
            Command::Simple(simple) => self.execute_simple(simple, io),
            Command::Compound(compound, redirects) => {
                self.with_redirects(redirects, io, |this, io| this.execute_compound(compound, io))
            }
            Command::FunctionDef { name, body } => {
                tracing::trace!("Defining function {name}");
                self.functions.insert(name.clone(), Arc::clone(body));
                self.last_status = 0;
                Ok(())
            }
        }
    }

    fn execute_simple(&mut self, command: &SimpleCommand, io: &mut Io) -> Result<()> {
        self.subst_status = None;
        let args = self.expand_command_words(&command.words)?;
        if args.is_empty() {
            for assignment in &command.assignments {
                self.assign(assignment)?;
            }
            let status = self.subst_status.take().unwrap_or(0);
            self.with_redirects(&command.redirects, io, |_, _| Ok(()))?;
            self.last_status = status;
            return Ok(());
        }

        let mut saved = Vec::with_capacity(command.assignments.len());
        for assignment in &command.assignments {
            saved.push((assignment.name.clone(), self.env.get(&assignment.name).cloned()));
            self.assign(assignment)?;
            self.env.export(&assignment.name);
        }
        let result = self.with_redirects(&command.redirects, io, |this, io| {
            this.dispatch(&args, io, command.line)
        });
        for (name, var) in saved.into_iter().rev() {
            self.env.restore(&name, var);
        }
        result
    }

    /// Expand command words; `NAME=value` arguments of declaration builtins
    /// are expanded as single fields.
    fn expand_command_words(&mut self, words: &[Word]) -> Result<Vec<String>> {
        let is_declaration = words
            .first()
            .and_then(|word| word.as_literal())
            .is_some_and(|name| DECLARATION_BUILTINS.contains(&name));
        if !is_declaration {
            return self.expand_words(words);
        }
        let mut args = Vec::with_capacity(words.len());
        for word in words {
            let is_assignment = matches!(
                word.parts.first(),
                Some(WordPart::Literal(text)) if text.contains('=')
            );
            if is_assignment {
                args.push(self.expand_string(word)?);
            } else {
                args.extend(self.expand_words(std::slice::from_ref(word))?);
            }
        }
        Ok(args)
    }

    fn dispatch(&mut self, args: &[String], io: &mut Io, line: usize) -> Result<()> {
        let name = args[0].as_str();
        if let Some(body) = self.functions.get(name).cloned() {
            return self.call_function(&body, args, io);
        }
        if self.run_builtin(args, io)? {
            return Ok(());
        }
        tracing::trace!("Routing {name:?} to hooks");
        let Io { input, out, err } = io;
        let status = self
            .hooks
            .exec(CommandCall {
                args,
                stdin: input,
                stdout: out,
                stderr: err,
                env: &self.env,
            })
            .with_context(|| format!("line {line}"))?;
        self.last_status = status;
        Ok(())
    }

    fn enter(&mut self) -> Result<()> {
        if self.nesting >= MAX_NESTING_DEPTH {
            return Err(ShellError::RecursionLimit(self.nesting).into());
        }
        self.nesting += 1;
        Ok(())
    }

    fn call_function(&mut self, body: &Command, args: &[String], io: &mut Io) -> Result<()> {
        self.enter()?;
        self.call_depth += 1;
        self.frames.push(Vec::new());
        let positional = mem::replace(&mut self.positional, args[1..].to_vec());
        let loop_depth = mem::replace(&mut self.loop_depth, 0);

        let result = self.execute_command(body, io);

        self.loop_depth = loop_depth;
        self.positional = positional;
        if let Some(frame) = self.frames.pop() {
            for (name, var) in frame.into_iter().rev() {
                self.env.restore(&name, var);
            }
        }
        self.call_depth -= 1;
        self.nesting -= 1;
        if self.flow == Some(Flow::Return) {
            self.flow = None;
        }
        result
    }

    fn execute_compound(&mut self, compound: &CompoundCommand, io: &mut Io) -> Result<()> {
        match compound {
            CompoundCommand::Brace(list) => self.execute_list(list, io),
            CompoundCommand::Subshell(list) => {
                let snapshot = self.snapshot();
                let result = self.execute_list(list, io);
                self.leave_subshell(snapshot);
                result
            }
            CompoundCommand::If {
                branches,
                else_body,
            } => {
                for (condition, body) in branches {
                    self.execute_list(condition, io)?;
                    if self.flow.is_some() {
                        return Ok(());
                    }
                    if self.last_status == 0 {
                        return self.execute_list(body, io);
                    }
                }
                match else_body {
                    Some(body) => self.execute_list(body, io),
                    None => {
                        self.last_status = 0;
                        Ok(())
                    }
                }
            }
            CompoundCommand::For { var, items, body } => {
                let values = match items {
                    Some(words) => self.expand_words(words)?,
                    None => self.positional.clone(),
                };
                self.last_status = 0;
                self.loop_depth += 1;
                let result = (|| -> Result<()> {
                    for value in values {
                        self.env.set_scalar(var, value);
                        self.execute_list(body, io)?;
                        if self.loop_should_stop() {
                            break;
                        }
                    }
                    Ok(())
                })();
                self.loop_depth -= 1;
                result
            }
            CompoundCommand::While {
                until,
                condition,
                body,
            } => {
                let mut status = 0;
                self.loop_depth += 1;
                let result = (|| -> Result<()> {
                    loop {
                        self.execute_list(condition, io)?;
                        if self.flow.is_some() {
                            if self.loop_should_stop() {
                                break;
                            }
                            continue;
                        }
                        if (self.last_status == 0) == *until {
                            break;
                        }
                        self.execute_list(body, io)?;
                        status = self.last_status;
                        if self.loop_should_stop() {
                            break;
                        }
                    }
                    Ok(())
                })();
                self.loop_depth -= 1;
                self.last_status = status;
                result
            }
            CompoundCommand::Case { word, arms } => {
                let subject = self.expand_string(word)?;
                self.last_status = 0;
                let mut fall_through = false;
                for arm in arms {
                    let mut hit = fall_through;
                    if !hit {
                        for pattern in &arm.patterns {
                            let pattern = self.expand_pattern(pattern)?;
                            if ShellPattern::new(&pattern).matches(&subject) {
                                hit = true;
                                break;
                            }
                        }
                    }
                    if !hit {
                        continue;
                    }
                    self.execute_list(&arm.body, io)?;
                    if self.flow.is_some() {
                        break;
                    }
                    match arm.terminator {
                        CaseTerminator::Break => break,
                        CaseTerminator::FallThrough => fall_through = true,
                        CaseTerminator::Continue => fall_through = false,
                    }
                }
                Ok(())
            }
            CompoundCommand::Test(expr) => {
                self.last_status = match self.evaluate_test(expr)? {
                    Ok(true) => 0,
                    Ok(false) => 1,
                    Err(err) => {
                        writeln!(io.err, "[[: {err}")?;
                        2
                    }
                };
                Ok(())
            }
            CompoundCommand::Arith(word) => {
                let text = self.expand_string(word)?;
                self.last_status = match arith::evaluate(&text, &mut self.env) {
                    Ok(value) => i32::from(value == 0),
                    Err(err) => {
                        writeln!(io.err, "((: {err}")?;
                        1
                    }
                };
                Ok(())
            }
        }
    }

    /// Consume a pending `break`/`continue` for the innermost loop and
    /// report whether the loop must stop iterating.
    fn loop_should_stop(&mut self) -> bool {
        match self.flow {
            None => false,
            Some(Flow::Break(levels)) => {
                self.flow = (levels > 1).then(|| Flow::Break(levels - 1));
                true
            }
            Some(Flow::Continue(levels)) => {
                if levels > 1 {
                    self.flow = Some(Flow::Continue(levels - 1));
                    true
                } else {
                    self.flow = None;
                    false
                }
            }
            Some(Flow::Return | Flow::Exit(_)) => true,
        }
    }

    fn evaluate_test(&mut self, expr: &TestExpr) -> Result<Result<bool, TestError>> {
        Ok(match expr {
            TestExpr::Not(inner) => self.evaluate_test(inner)?.map(|value| !value),
            TestExpr::And(left, right) => match self.evaluate_test(left)? {
                Ok(true) => self.evaluate_test(right)?,
                other => other,
            },
            TestExpr::Or(left, right) => match self.evaluate_test(left)? {
                Ok(false) => self.evaluate_test(right)?,
                other => other,
            },
            TestExpr::Unary(op, word) => {
                let operand = self.expand_string(word)?;
                test_expr::unary(op, &operand, &self.env)
            }
            TestExpr::Word(word) => Ok(!self.expand_string(word)?.is_empty()),
            TestExpr::Binary(left, op, right) => {
                let lhs = self.expand_string(left)?;
                match op.as_str() {
                    "==" | "=" | "!=" => {
                        let pattern = self.expand_pattern(right)?;
                        let matched = ShellPattern::new(&pattern).matches(&lhs);
                        Ok(matched == (op != "!="))
                    }
                    "=~" => {
                        let source = self.expand_regex(right)?;
                        self.match_regex(&lhs, &source)
                    }
                    "-eq" | "-ne" | "-lt" | "-le" | "-gt" | "-ge" => {
                        let rhs = self.expand_string(right)?;
                        let l = arith::evaluate(&lhs, &mut self.env)?;
                        let r = arith::evaluate(&rhs, &mut self.env)?;
                        test_expr::binary(&l.to_string(), op, &r.to_string())
                    }
                    _ => {
                        let rhs = self.expand_string(right)?;
                        test_expr::binary(&lhs, op, &rhs)
                    }
                }
            }
        })
    }

    fn match_regex(&mut self, text: &str, source: &str) -> Result<bool, TestError> {
        let Ok(regex) = regex::Regex::new(source) else {
            tracing::debug!("Invalid regular expression {source:?}");
            return Err(TestError::BinaryExpected("=~".to_string()));
        };
        match regex.captures(text) {
            Some(captures) => {
                let groups = captures
                    .iter()
                    .map(|group| group.map(|m| m.as_str().to_string()).unwrap_or_default())
                    .collect();
                self.env.set("BASH_REMATCH", Value::Indexed(groups));
                Ok(true)
            }
            None => {
                self.env.set("BASH_REMATCH", Value::Indexed(Vec::new()));
                Ok(false)
            }
        }
    }

    // ---- assignments ----

    pub(super) fn assign(&mut self, assignment: &Assignment) -> Result<()> {
        let name = assignment.name.as_str();
        match (&assignment.subscript, &assignment.value) {
            (None, AssignValue::Scalar(word)) => {
                let value = self.expand_string(word)?;
                if !assignment.append {
                    self.env.set_scalar(name, value);
                    return Ok(());
                }
                match self.env.value(name).cloned() {
                    Some(Value::Indexed(items)) => {
                        let first = items.first().cloned().unwrap_or_default();
                        self.env.set_element(name, "0", first + &value);
                    }
                    Some(Value::Associative(map)) => {
                        let first = map.get("0").cloned().unwrap_or_default();
                        self.env.set_element(name, "0", first + &value);
                    }
                    Some(Value::Scalar(current)) => self.env.set_scalar(name, current + &value),
                    None => self.env.set_scalar(name, value),
                }
            }
            (Some(subscript), AssignValue::Scalar(word)) => {
                let key = self.element_key(name, subscript)?;
                let mut value = self.expand_string(word)?;
                if assignment.append {
                    let current = match self.env.value(name) {
                        Some(Value::Indexed(items)) => key
                            .parse::<usize>()
                            .ok()
                            .and_then(|i| items.get(i).cloned()),
                        Some(Value::Associative(map)) => map.get(&key).cloned(),
                        Some(Value::Scalar(text)) if key == "0" => Some(text.clone()),
                        _ => None,
                    };
                    value = current.unwrap_or_default() + &value;
                }
                self.env.set_element(name, &key, value);
            }
            (None, AssignValue::Array(elements)) => {
                let associative = matches!(self.env.value(name), Some(Value::Associative(_)));
                if associative {
                    let mut map = match (assignment.append, self.env.value(name)) {
                        (true, Some(Value::Associative(map))) => map.clone(),
                        _ => Default::default(),
                    };
                    for element in elements {
                        let value = self.expand_string(&element.value)?;
                        let key = match &element.key {
                            Some(key) => self.expand_string(key)?,
                            None => value.clone(),
                        };
                        map.insert(key, value);
                    }
                    self.env.set(name, Value::Associative(map));
                } else {
                    let mut items = if assignment.append {
                        self.env.value(name).map(Value::elements).unwrap_or_default()
                    } else {
                        Vec::new()
                    };
                    for element in elements {
                        match &element.key {
                            Some(key) => {
                                let key = self.expand_string(key)?;
                                let index = usize::try_from(arith::evaluate(&key, &mut self.env)?)
                                    .map_err(|_| ShellError::BadSubstitution(format!("{name}[{key}]")))?;
                                let value = self.expand_string(&element.value)?;
                                if index >= items.len() {
                                    items.resize(index + 1, String::new());
                                }
                                items[index] = value;
                            }
                            None => {
                                let fields = self.expand_words(std::slice::from_ref(&element.value))?;
                                items.extend(fields);
                            }
                        }
                    }
                    self.env.set(name, Value::Indexed(items));
                }
            }
            (Some(_), AssignValue::Array(_)) => {
                return Err(ShellError::BadSubstitution(name.to_string()).into());
            }
        }
        Ok(())
    }

    /// Key for `name[subscript]`: arithmetic for indexed arrays, literal
    /// text for associative ones.
    fn element_key(&mut self, name: &str, subscript: &Word) -> Result<String> {
        let text = self.expand_string(subscript)?;
        if matches!(self.env.value(name), Some(Value::Associative(_))) {
            return Ok(text);
        }
        let index = arith::evaluate(&text, &mut self.env)?;
        if index < 0 {
            let len = self.env.value(name).map_or(0, |value| value.elements().len());
            let resolved = i64::try_from(len).unwrap_or(i64::MAX) + index;
            if resolved < 0 {
                return Err(ShellError::BadSubstitution(format!("{name}[{text}]")).into());
            }
            return Ok(resolved.to_string());
        }
        Ok(index.to_string())
    }

    // ---- redirections ----

    fn with_redirects(
        &mut self,
        redirects: &[Redirect],
        io: &mut Io,
        body: impl FnOnce(&mut Self, &mut Io) -> Result<()>,
    ) -> Result<()> {
        if redirects.is_empty() {
            return body(self, io);
        }
        let mut plan = self.plan_redirects(redirects)?;
        let inherit_input = plan.input.is_none();
        let mut child = Io {
            input: match plan.input.take() {
                Some(data) => Input::new(data),
                None => mem::take(&mut io.input),
            },
            ..Io::default()
        };
        let result = body(self, &mut child);
        if inherit_input {
            io.input = mem::take(&mut child.input);
        }
        deliver(child.out, plan.stdout, io, &mut plan.files)?;
        deliver(child.err, plan.stderr, io, &mut plan.files)?;
        for file in &mut plan.files {
            file.flush()?;
        }
        result
    }

    fn plan_redirects(&mut self, redirects: &[Redirect]) -> Result<RedirectPlan> {
        let mut plan = RedirectPlan {
            input: None,
            stdout: Sink::Out,
            stderr: Sink::Err,
            files: Vec::new(),
        };
        for redirect in redirects {
            let fd = redirect.fd.unwrap_or(match redirect.op {
                RedirectOp::Read
                | RedirectOp::ReadWrite
                | RedirectOp::DupInput
                | RedirectOp::HereDoc
                | RedirectOp::HereString => 0,
                _ => 1,
            });
            let target = match &redirect.target {
                RedirectTarget::Word(word) => self.expand_string(word)?,
                RedirectTarget::HereDoc(doc) => match doc.body.get() {
                    Some(body) => self.expand_string(body)?,
                    None => String::new(),
                },
            };
            match redirect.op {
                RedirectOp::HereDoc => plan.input = Some(target.into_bytes()),
                RedirectOp::HereString => plan.input = Some(format!("{target}\n").into_bytes()),
                RedirectOp::Read | RedirectOp::ReadWrite => {
                    let mode = if redirect.op == RedirectOp::Read {
                        OpenMode::Read
                    } else {
                        OpenMode::ReadWrite
                    };
                    let mut file = self.hooks.open(&target, mode)?;
                    let mut data = Vec::new();
                    file.read_to_end(&mut data)
                        .with_context(|| format!("{target}: read failed"))?;
                    if fd == 0 {
                        plan.input = Some(data);
                    }
                }
                RedirectOp::DupInput => {}
                RedirectOp::Write | RedirectOp::Append => {
                    let file = self.hooks.open(
                        &target,
                        OpenMode::Write {
                            append: redirect.op == RedirectOp::Append,
                        },
                    )?;
                    plan.files.push(file);
                    let index = plan.files.len() - 1;
                    set_sink(&mut plan, fd, Sink::File(index));
                }
                RedirectOp::WriteBoth | RedirectOp::AppendBoth => {
                    let file = self.hooks.open(
                        &target,
                        OpenMode::Write {
                            append: redirect.op == RedirectOp::AppendBoth,
                        },
                    )?;
                    plan.files.push(file);
                    let sink = Sink::File(plan.files.len() - 1);
                    plan.stdout = sink;
                    plan.stderr = sink;
                }
                RedirectOp::DupOutput => {
                    let sink = match target.as_str() {
                        "1" => Some(plan.stdout),
                        "2" => Some(plan.stderr),
                        "-" => Some(Sink::Closed),
                        _ if target.chars().all(|c| c.is_ascii_digit()) => {
                            tracing::trace!("Ignoring duplication of descriptor {target}");
                            None
                        }
                        _ => {
                            // `>&file` writes both streams to the file.
                            let file = self.hooks.open(&target, OpenMode::Write { append: false })?;
                            plan.files.push(file);
                            let sink = Sink::File(plan.files.len() - 1);
                            plan.stderr = sink;
                            Some(sink)
                        }
                    };
                    if let Some(sink) = sink {
                        set_sink(&mut plan, fd, sink);
                    }
                }
            }
        }
        Ok(plan)
    }

    // ---- builtins ----

    /// Run a shell-internal builtin. Returns `false` when `args[0]` is not one.
    fn run_builtin(&mut self, args: &[String], io: &mut Io) -> Result<bool> {
        let rest = &args[1..];
        let status = match args[0].as_str() {
            ":" | "true" | "cd" | "shopt" | "trap" | "wait" | "umask" => 0,
            "false" => 1,
            "echo" => builtin_echo(rest, io),
            "printf" => self.builtin_printf(rest, io)?,
            "test" => self.builtin_test(rest, io)?,
            "[" => match rest.split_last() {
                Some((last, inner)) if last == "]" => self.builtin_test(inner, io)?,
                _ => {
                    writeln!(io.err, "[: missing `]'")?;
                    2
                }
            },
            "pwd" => {
                let dir = self.env.scalar("PWD").unwrap_or("/").to_string();
                writeln!(io.out, "{dir}")?;
                0
            }
            "export" => self.builtin_declare(rest, io, DeclareKind::Export)?,
            "local" => self.builtin_declare(rest, io, DeclareKind::Local)?,
            "declare" | "typeset" | "readonly" => {
                self.builtin_declare(rest, io, DeclareKind::Declare)?
            }
            "unset" => {
                let functions = rest.first().is_some_and(|flag| flag == "-f");
                for name in rest.iter().filter(|arg| !arg.starts_with('-')) {
                    if functions {
                        self.functions.remove(name);
                    } else {
                        self.env.unset(name);
                    }
                }
                0
            }
            "set" => {
                if let Some(index) = rest.iter().position(|arg| arg == "--") {
                    self.positional = rest[index + 1..].to_vec();
                } else if let Some(first) = rest.first()
                    && !first.starts_with(['-', '+'])
                {
                    self.positional = rest.to_vec();
                }
                0
            }
            "shift" => {
                let count = match rest.first() {
                    Some(arg) => arg.parse::<usize>().unwrap_or(usize::MAX),
                    None => 1,
                };
                if count > self.positional.len() {
                    1
                } else {
                    self.positional.drain(..count);
                    0
                }
            }
            "let" => {
                let mut status = 1;
                for expression in rest {
                    status = i32::from(arith::evaluate(expression, &mut self.env)? == 0);
                }
                status
            }
            "return" => {
                if self.call_depth == 0 {
                    writeln!(io.err, "return: can only `return' from a function")?;
                    1
                } else {
                    let status = self.status_arg(rest, io)?;
                    self.flow = Some(Flow::Return);
                    status
                }
            }
            name @ ("break" | "continue") => {
                let levels = match rest.first() {
                    Some(arg) => arg.parse::<usize>().unwrap_or(1).max(1),
                    None => 1,
                };
                if self.loop_depth > 0 {
                    let levels = levels.min(self.loop_depth);
                    self.flow = Some(if name == "break" {
                        Flow::Break(levels)
                    } else {
                        Flow::Continue(levels)
                    });
                }
                0
            }
            "exit" => {
                let status = self.status_arg(rest, io)?;
                self.flow = Some(Flow::Exit(status));
                status
            }
            "eval" => {
                let source = rest.join(" ");
                self.run_source("eval", &source, io)?
            }
            "source" | "." => {
                let Some(path) = rest.first() else {
                    writeln!(io.err, "{}: filename argument required", args[0])?;
                    self.last_status = 2;
                    return Ok(true);
                };
                let mut file = self.hooks.open(path, OpenMode::Read)?;
                let mut source = String::new();
                file.read_to_string(&mut source)
                    .with_context(|| format!("{path}: read failed"))?;
                self.run_source(path, &source, io)?
            }
            "read" => self.builtin_read(rest, io),
            _ => return Ok(false),
        };
        self.last_status = status;
        Ok(true)
    }

    fn status_arg(&mut self, rest: &[String], io: &mut Io) -> Result<i32> {
        match rest.first() {
            None => Ok(self.last_status),
            Some(arg) => match arg.parse::<i64>() {
                Ok(value) => Ok(i32::try_from(value.rem_euclid(256)).unwrap_or(255)),
                Err(_) => {
                    writeln!(io.err, "{arg}: numeric argument required")?;
                    Ok(2)
                }
            },
        }
    }

    fn run_source(&mut self, origin: &str, source: &str, io: &mut Io) -> Result<i32> {
        let script = match parser::parse(source) {
            Ok(script) => script,
            Err(err) => {
                writeln!(io.err, "{origin}: {err}")?;
                return Ok(2);
            }
        };
        self.enter()?;
        self.last_status = 0;
        let result = self.execute_list(&script.body, io);
        self.nesting -= 1;
        result?;
        Ok(self.last_status)
    }

    fn builtin_test(&mut self, args: &[String], io: &mut Io) -> Result<i32> {
        Ok(match test_expr::evaluate_args(args, &self.env) {
            Ok(true) => 0,
            Ok(false) => 1,
            Err(err) => {
                writeln!(io.err, "test: {err}")?;
                2
            }
        })
    }

    fn builtin_printf(&mut self, args: &[String], io: &mut Io) -> Result<i32> {
        let (target, args) = match args {
            [flag, name, rest @ ..] if flag == "-v" => (Some(name.clone()), rest),
            _ => (None, args),
        };
        let Some((format, values)) = args.split_first() else {
            writeln!(io.err, "printf: usage: printf [-v var] format [arguments]")?;
            return Ok(2);
        };
        let (text, errors) = format_printf(format, values);
        for error in &errors {
            writeln!(io.err, "printf: {error}")?;
        }
        match target {
            Some(name) => self.env.set_scalar(&name, text),
            None => io.out.extend_from_slice(text.as_bytes()),
        }
        Ok(i32::from(!errors.is_empty()))
    }

    fn builtin_declare(&mut self, args: &[String], io: &mut Io, kind: DeclareKind) -> Result<i32> {
        let mut export = kind == DeclareKind::Export;
        let mut local = kind == DeclareKind::Local;
        let mut array = None;
        let mut names = Vec::new();
        for arg in args {
            match arg.strip_prefix('-') {
                Some(flags) if !flags.is_empty() && !arg.contains('=') => {
                    for flag in flags.chars() {
                        match flag {
                            'x' => export = true,
                            'a' => array = Some(false),
                            'A' => array = Some(true),
                            'g' => local = false,
                            _ => {}
                        }
                    }
                }
                _ => names.push(arg),
            }
        }
        if kind == DeclareKind::Local && self.call_depth == 0 {
            writeln!(io.err, "local: can only be used in a function")?;
            return Ok(1);
        }
        // `declare` inside a function creates locals unless -g is given.
        if kind == DeclareKind::Declare && self.call_depth > 0 && !args.iter().any(|a| a == "-g") {
            local = true;
        }
        for arg in names {
            let (name, value) = match arg.split_once('=') {
                Some((name, value)) => (name, Some(value)),
                None => (arg.as_str(), None),
            };
            if local && let Some(frame) = self.frames.last_mut()
                && !frame.iter().any(|(saved, _)| saved == name)
            {
                frame.push((name.to_string(), self.env.get(name).cloned()));
                self.env.unset(name);
            }
            match (array, value) {
                (Some(true), _) if !matches!(self.env.value(name), Some(Value::Associative(_))) => {
                    self.env.set(name, Value::Associative(Default::default()));
                }
                (Some(false), _) if !matches!(self.env.value(name), Some(Value::Indexed(_))) => {
                    let initial = match value {
                        Some(value) if !value.is_empty() => vec![value.to_string()],
                        _ => Vec::new(),
                    };
                    self.env.set(name, Value::Indexed(initial));
                }
                _ => {}
            }
            if let Some(value) = value
                && array.is_none()
            {
                self.env.set_scalar(name, value);
            }
            if export {
                self.env.export(name);
            }
        }
        Ok(0)
    }

    fn builtin_read(&mut self, args: &[String], io: &mut Io) -> i32 {
        let mut raw = false;
        let mut array = None;
        let mut delimiter = b'\n';
        let mut names = Vec::new();
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "-r" => raw = true,
                "-a" => array = iter.next().cloned(),
                "-d" => delimiter = iter.next().and_then(|d| d.bytes().next()).unwrap_or(0),
                "-p" | "-t" | "-n" | "-N" | "-u" => {
                    iter.next();
                }
                "-s" | "-e" => {}
                _ => names.push(arg.clone()),
            }
        }
        let line = io.input.read_until(delimiter);
        let status = i32::from(line.is_none());
        let mut line = line.unwrap_or_default();
        if !raw {
            line = remove_backslashes(&line);
        }
        if let Some(name) = array {
            let fields = line.split_whitespace().map(str::to_string).collect();
            self.env.set(&name, Value::Indexed(fields));
            return status;
        }
        if names.is_empty() {
            self.env.set_scalar("REPLY", line);
            return status;
        }
        let mut rest = line.trim_start_matches([' ', '\t', '\n']);
        for (index, name) in names.iter().enumerate() {
            if index + 1 == names.len() {
                self.env.set_scalar(name, rest.trim_end_matches([' ', '\t', '\n']));
                break;
            }
            let end = rest.find([' ', '\t', '\n']).unwrap_or(rest.len());
            self.env.set_scalar(name, &rest[..end]);
            rest = rest[end..].trim_start_matches([' ', '\t', '\n']);
        }
        status
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeclareKind {
    Export,
    Local,
    Declare,
}

fn set_sink(plan: &mut RedirectPlan, fd: u32, sink: Sink) {
    match fd {
        1 => plan.stdout = sink,
        2 => plan.stderr = sink,
        _ => tracing::trace!("Ignoring redirection of descriptor {fd}"),
    }
}

fn deliver(bytes: Vec<u8>, sink: Sink, io: &mut Io, files: &mut [Box<dyn FileHandle>]) -> Result<()> {
    if bytes.is_empty() {
        return Ok(());
    }
    match sink {
        Sink::Out => io.out.extend(bytes),
        Sink::Err => io.err.extend(bytes),
        Sink::File(index) => files[index].write_all(&bytes)?,
        Sink::Closed => {}
    }
    Ok(())
}

fn remove_backslashes(line: &str) -> String {
    let mut result = String::with_capacity(line.len());
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                result.push(next);
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn builtin_echo(args: &[String], io: &mut Io) -> i32 {
    let mut newline = true;
    let mut escapes = false;
    let mut index = 0;
    while let Some(arg) = args.get(index) {
        let Some(flags) = arg.strip_prefix('-') else {
            break;
        };
        if flags.is_empty() || !flags.chars().all(|c| matches!(c, 'n' | 'e' | 'E')) {
            break;
        }
        for flag in flags.chars() {
            match flag {
                'n' => newline = false,
                'e' => escapes = true,
                _ => escapes = false,
            }
        }
        index += 1;
    }
    let text = args[index..].join(" ");
    if escapes {
        let (expanded, stop) = expand_escapes(&text, false);
        io.out.extend_from_slice(expanded.as_bytes());
        if stop {
            return 0;
        }
    } else {
        io.out.extend_from_slice(text.as_bytes());
    }
    if newline {
        io.out.push(b'\n');
    }
    0
}

/// Interpret backslash escapes. The flag reports a `\c` that ends output.
fn expand_escapes(text: &str, printf_format: bool) -> (String, bool) {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => result.push('\n'),
            Some('t') => result.push('\t'),
            Some('r') => result.push('\r'),
            Some('a') => result.push('\u{07}'),
            Some('b') => result.push('\u{08}'),
            Some('f') => result.push('\u{0c}'),
            Some('v') => result.push('\u{0b}'),
            Some('e' | 'E') => result.push('\u{1b}'),
            Some('\\') => result.push('\\'),
            Some('"') if printf_format => result.push('"'),
            Some('c') => return (result, true),
            Some(first @ '0'..='7') => {
                let mut value = first.to_digit(8).unwrap_or(0);
                // `echo -e` takes `\0nnn`, printf takes `\nnn`.
                let max_digits = if first == '0' && !printf_format { 3 } else { 2 };
                let mut digits = 0;
                while digits < max_digits {
                    match chars.peek() {
                        Some(d @ '0'..='7') => {
                            value = value * 8 + d.to_digit(8).unwrap_or(0);
                            chars.next();
                            digits += 1;
                        }
                        _ => break,
                    }
                }
                result.push(char::from_u32(value).unwrap_or('\0'));
            }
            Some(other) => {
                result.push('\\');
                result.push(other);
            }
            None => result.push('\\'),
        }
    }
    (result, false)
}

/// Render a `printf` format, reusing it while arguments remain.
fn format_printf(format: &str, args: &[String]) -> (String, Vec<String>) {
    let mut output = String::new();
    let mut errors = Vec::new();
    let mut args = args.iter().map(String::as_str);
    let mut remaining = args.len();
    loop {
        let (consumed, stop) = format_once(format, &mut args, &mut output, &mut errors);
        remaining = remaining.saturating_sub(consumed);
        if stop || consumed == 0 || remaining == 0 {
            break;
        }
    }
    (output, errors)
}

fn format_once<'a>(
    format: &str,
    args: &mut impl Iterator<Item = &'a str>,
    output: &mut String,
    errors: &mut Vec<String>,
) -> (usize, bool) {
    let chars: Vec<char> = format.chars().collect();
    let mut consumed = 0;
    let mut next_arg = |consumed: &mut usize| {
        let arg = args.next();
        if arg.is_some() {
            *consumed += 1;
        }
        arg.unwrap_or("")
    };
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '\\' {
            let end = (i + 2).min(chars.len());
            let mut escape: String = chars[i..end].iter().collect();
            // Octal escapes carry up to three digits.
            if chars.get(i + 1).is_some_and(|d| d.is_digit(8)) {
                let mut j = i + 2;
                while j < chars.len() && j < i + 5 && chars[j].is_digit(8) {
                    j += 1;
                }
                escape = chars[i..j].iter().collect();
            }
            let (text, stop) = expand_escapes(&escape, true);
            output.push_str(&text);
            if stop {
                return (consumed, true);
            }
            i += escape.chars().count();
            continue;
        }
        if c != '%' {
            output.push(c);
            i += 1;
            continue;
        }
        if chars.get(i + 1) == Some(&'%') {
            output.push('%');
            i += 2;
            continue;
        }
        let mut j = i + 1;
        let mut left = false;
        let mut zero = false;
        let mut plus = false;
        while let Some(&flag) = chars.get(j) {
            match flag {
                '-' => left = true,
                '0' => zero = true,
                '+' => plus = true,
                ' ' | '#' => {}
                _ => break,
            }
            j += 1;
        }
        let mut width = String::new();
        if chars.get(j) == Some(&'*') {
            width = next_arg(&mut consumed).to_string();
            j += 1;
        } else {
            while let Some(d) = chars.get(j).filter(|d| d.is_ascii_digit()) {
                width.push(*d);
                j += 1;
            }
        }
        let mut precision = None;
        if chars.get(j) == Some(&'.') {
            j += 1;
            let mut digits = String::new();
            if chars.get(j) == Some(&'*') {
                digits = next_arg(&mut consumed).to_string();
                j += 1;
            } else {
                while let Some(d) = chars.get(j).filter(|d| d.is_ascii_digit()) {
                    digits.push(*d);
                    j += 1;
                }
            }
            precision = Some(digits.parse::<usize>().unwrap_or(0));
        }
        let Some(&conversion) = chars.get(j) else {
            errors.push(format!("`{}': missing format character", chars[i..].iter().collect::<String>()));
            return (consumed, true);
        };
        i = j + 1;
        let width: usize = width.trim_start_matches('-').parse().unwrap_or(0);
        let body = match conversion {
            's' => {
                let arg = next_arg(&mut consumed);
                match precision {
                    Some(p) => arg.chars().take(p).collect(),
                    None => arg.to_string(),
                }
            }
            'b' => {
                let (text, stop) = expand_escapes(next_arg(&mut consumed), false);
                if stop {
                    output.push_str(&text);
                    return (consumed, true);
                }
                text
            }
            'q' => shell_quote(next_arg(&mut consumed)),
            'c' => next_arg(&mut consumed).chars().next().map(String::from).unwrap_or_default(),
            'd' | 'i' | 'u' | 'x' | 'X' | 'o' => {
                let arg = next_arg(&mut consumed);
                let value = parse_printf_number(arg).unwrap_or_else(|| {
                    errors.push(format!("{arg}: invalid number"));
                    0
                });
                let digits = match conversion {
                    'x' => format!("{value:x}"),
                    'X' => format!("{value:X}"),
                    'o' => format!("{value:o}"),
                    _ if plus && value >= 0 => format!("+{value}"),
                    _ => value.to_string(),
                };
                match precision {
                    Some(p) if digits.len() < p => format!("{}{digits}", "0".repeat(p - digits.len())),
                    _ => digits,
                }
            }
            'f' | 'F' | 'e' | 'E' | 'g' | 'G' => {
                let arg = next_arg(&mut consumed);
                let value = arg.trim().parse::<f64>().unwrap_or_else(|_| {
                    if !arg.is_empty() {
                        errors.push(format!("{arg}: invalid number"));
                    }
                    0.0
                });
                let p = precision.unwrap_or(6);
                match conversion {
                    'e' => format!("{value:.p$e}"),
                    'E' => format!("{value:.p$E}"),
                    'g' | 'G' => value.to_string(),
                    _ => format!("{value:.p$}"),
                }
            }
            other => {
                errors.push(format!("%{other}: invalid format character"));
                return (consumed, true);
            }
        };
        let len = body.chars().count();
        if len >= width {
            output.push_str(&body);
        } else if left {
            output.push_str(&body);
            output.push_str(&" ".repeat(width - len));
        } else if zero && !matches!(conversion, 's' | 'b' | 'q' | 'c') {
            let (sign, digits) = match body.strip_prefix(['-', '+']) {
                Some(rest) => (&body[..1], rest),
                None => ("", body.as_str()),
            };
            output.push_str(sign);
            output.push_str(&"0".repeat(width - len));
            output.push_str(digits);
        } else {
            output.push_str(&" ".repeat(width - len));
            output.push_str(&body);
        }
    }
    (consumed, false)
}

fn parse_printf_number(arg: &str) -> Option<i64> {
    let arg = arg.trim();
    if arg.is_empty() {
        return Some(0);
    }
    if let Some(quoted) = arg.strip_prefix(['\'', '"']) {
        return Some(quoted.chars().next().map_or(0, |c| i64::from(u32::from(c))));
    }
    let (negative, digits) = match arg.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, arg.strip_prefix('+').unwrap_or(arg)),
    };
    let value = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()?
    } else if digits.len() > 1 && digits.starts_with('0') {
        i64::from_str_radix(&digits[1..], 8).ok()?
    } else {
        digits.parse().ok()?
    };
    Some(if negative { -value } else { value })
}

fn shell_quote(text: &str) -> String {
    if text.is_empty() {
        return "''".to_string();
    }
    if text
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | ',' | ':' | '=' | '+' | '@'))
    {
        return text.to_string();
    }
    format!("'{}'", text.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::super::parse;
    use super::*;

    /// Hooks that record calls and answer `upper` by upper-casing stdin.
    #[derive(Default)]
    struct Recorder {
        calls: Vec<Vec<String>>,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    }

    impl Hooks for Recorder {
        fn exec(&mut self, call: CommandCall<'_>) -> Result<i32> {
            self.calls.push(call.args.to_vec());
            match call.args[0].as_str() {
                "upper" => {
                    let mut input = String::new();
                    call.stdin.read_to_string(&mut input)?;
                    call.stdout.extend(input.to_uppercase().bytes());
                    Ok(0)
                }
                "fail" => Ok(3),
                "boom" => anyhow::bail!("boom exploded"),
                _ => Ok(0),
            }
        }

        fn open(&mut self, _path: &str, _mode: OpenMode) -> Result<Box<dyn FileHandle>> {
            Ok(Box::new(std::io::empty()))
        }

        fn stdout(&mut self, bytes: &[u8]) -> Result<()> {
            self.stdout.extend_from_slice(bytes);
            Ok(())
        }

        fn stderr(&mut self, bytes: &[u8], _env: &Environment) -> Result<()> {
            self.stderr.extend_from_slice(bytes);
            Ok(())
        }
    }

    fn run(source: &str) -> (Result<Environment>, Recorder) {
        let mut hooks = Recorder::default();
        let script = parse(source).unwrap();
        let result = Interpreter::new(&mut hooks).run(&script);
        (result, hooks)
    }

    fn run_ok(source: &str) -> (Environment, Recorder) {
        let (result, hooks) = run(source);
        (result.unwrap(), hooks)
    }

    #[test]
    fn test_assignments_and_expansions() {
        let (env, _) = run_ok(
            r#"
pkgname=foo
version=1.2.3
short=${version%.*}
depends="libfoo>=${version} ${pkgname}-data"
empty=${missing:-fallback}
"#,
        );
        assert_eq!(env.scalar("short"), Some("1.2"));
        assert_eq!(env.scalar("depends"), Some("libfoo>=1.2.3 foo-data"));
        assert_eq!(env.scalar("empty"), Some("fallback"));
    }

    #[test]
    fn test_append_and_arrays() {
        let (env, _) = run_ok("d=a\nd+=\" b\"\narr=(x y)\narr+=(z)\nm[2]=c\n");
        assert_eq!(env.scalar("d"), Some("a b"));
        assert_eq!(
            env.value("arr"),
            Some(&Value::Indexed(vec!["x".into(), "y".into(), "z".into()]))
        );
        assert_eq!(
            env.value("m"),
            Some(&Value::Indexed(vec![String::new(), String::new(), "c".into()]))
        );
    }

    #[test]
    fn test_command_substitution_captures_hook_output() {
        let (env, hooks) = run_ok("x=$(echo hi | upper)\ny=`echo lo`\n");
        assert_eq!(env.scalar("x"), Some("HI"));
        assert_eq!(env.scalar("y"), Some("lo"));
        assert_eq!(hooks.calls, vec![vec!["upper".to_string()]]);
    }

    #[test]
    fn test_control_flow() {
        let (env, _) = run_ok(
            r#"
out=
for i in 1 2 3 4; do
    [ "$i" = 2 ] && continue
    [ "$i" = 4 ] && break
    out+=$i
done
case "x86_64-musl" in
    arm*) arch=arm ;;
    x86_64*) arch=x86 ;;
esac
if false; then r=a; elif true; then r=b; else r=c; fi
n=0
while [ $n -lt 3 ]; do n=$((n + 1)); done
"#,
        );
        assert_eq!(env.scalar("out"), Some("13"));
        assert_eq!(env.scalar("arch"), Some("x86"));
        assert_eq!(env.scalar("r"), Some("b"));
        assert_eq!(env.scalar("n"), Some("3"));
    }

    #[test]
    fn test_functions_and_locals() {
        let (env, _) = run_ok(
            r#"
x=outer
f() { local x=inner; y=$x; return 4; }
f a b
status=$?
g() { echo "$#:$2"; }
z=$(g one two)
"#,
        );
        assert_eq!(env.scalar("x"), Some("outer"));
        assert_eq!(env.scalar("y"), Some("inner"));
        assert_eq!(env.scalar("status"), Some("4"));
        assert_eq!(env.scalar("z"), Some("2:two"));
        assert!(!env.is_set("f"));
    }

    #[test]
    fn test_subshell_does_not_leak() {
        let (env, _) = run_ok("a=1\n(a=2; b=3)\n");
        assert_eq!(env.scalar("a"), Some("1"));
        assert!(!env.is_set("b"));
    }

    #[test]
    fn test_exit_status_semantics() {
        let (result, _) = run("a=1\nexit 0\nb=2\n");
        let env = result.unwrap();
        assert!(env.is_set("a"));
        assert!(!env.is_set("b"));

        let (result, _) = run("exit 3\n");
        let err = result.unwrap_err();
        assert!(matches!(err.downcast_ref::<ShellError>(), Some(ShellError::Exit(3))));

        let (result, _) = run("fail\n");
        assert!(result.is_ok());
    }

    #[test]
    fn test_hook_error_is_fatal_with_line() {
        let (result, hooks) = run("a=1\n\nboom\nafter=1\n");
        let err = result.unwrap_err();
        assert_eq!(format!("{err:#}"), "line 3: boom exploded");
        assert_eq!(hooks.calls.len(), 1);
    }

    #[test]
    fn test_redirections_route_streams() {
        let (_, hooks) =
            run_ok("echo out\necho err >&2\necho gone >/dev/null\necho swap 2>&1 >&2\n");
        assert_eq!(String::from_utf8_lossy(&hooks.stdout), "out\nswap\n");
        assert_eq!(String::from_utf8_lossy(&hooks.stderr), "err\n");
    }

    #[test]
    fn test_heredoc_and_read() {
        let (env, _) = run_ok("while read -r a b; do last=$b; done <<EOF\none two\nthree four five\nEOF\n");
        assert_eq!(env.scalar("last"), Some("four five"));
        let (env, _) = run_ok("x=$(upper <<<\"abc\")\n");
        assert_eq!(env.scalar("x"), Some("ABC"));
    }

    #[test]
    fn test_prefix_assignment_is_temporary_and_exported() {
        struct EnvProbe(Option<String>);
        impl Hooks for EnvProbe {
            fn exec(&mut self, call: CommandCall<'_>) -> Result<i32> {
                self.0 = call
                    .env
                    .exported_scalars()
                    .find(|(name, _)| *name == "LC_ALL")
                    .map(|(_, value)| value.to_string());
                Ok(0)
            }
            fn open(&mut self, _: &str, _: OpenMode) -> Result<Box<dyn FileHandle>> {
                Ok(Box::new(std::io::empty()))
            }
            fn stdout(&mut self, _: &[u8]) -> Result<()> {
                Ok(())
            }
            fn stderr(&mut self, _: &[u8], _: &Environment) -> Result<()> {
                Ok(())
            }
        }
        let mut hooks = EnvProbe(None);
        let script = parse("LC_ALL=C sort\n").unwrap();
        let env = Interpreter::new(&mut hooks).run(&script).unwrap();
        assert_eq!(hooks.0.as_deref(), Some("C"));
        assert!(!env.is_set("LC_ALL"));
    }

    #[test]
    fn test_printf_formats() {
        let (text, errors) = format_printf("%s-%03d|%-4s|%x\\n", &["a".into(), "7".into(), "b".into(), "255".into()]);
        assert_eq!(text, "a-007|b   |ff\n");
        assert!(errors.is_empty());
        let (text, _) = format_printf("%s,", &["1".into(), "2".into(), "3".into()]);
        assert_eq!(text, "1,2,3,");
        let (_, errors) = format_printf("%d", &["x".into()]);
        assert_eq!(errors, vec!["x: invalid number".to_string()]);
    }

    #[test]
    fn test_test_builtins() {
        let (env, _) = run_ok(
            r#"
[ -f /etc/passwd ] && f=yes || f=no
[[ $HOME == "" && abc == a* ]] && g=yes
[[ 1.2.3 =~ ^([0-9]+)\.([0-9]+) ]] && major=${BASH_REMATCH[1]}
(( 2 > 1 )) && h=yes
"#,
        );
        assert_eq!(env.scalar("f"), Some("no"));
        assert_eq!(env.scalar("g"), Some("yes"));
        assert_eq!(env.scalar("major"), Some("1"));
        assert_eq!(env.scalar("h"), Some("yes"));
    }
}
