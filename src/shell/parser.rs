//! Recursive-descent parser for the template shell subset.
//!
//! Shell tokenization depends on context (reserved words only count in
//! command position, `}` ends a parameter expansion but not a word, and so
//! on), so the parser works directly on characters instead of a separate
//! token stream.
//!
//! Input that stops inside an open construct (a quote, `$(`, a
//! here-document, an `if` without `fi`, ...) is reported as
//! [`ParseError::Incomplete`] rather than as a syntax error, so callers can
//! tell truncated templates apart from malformed ones.

use std::mem;
use std::sync::{Arc, OnceLock};

use thiserror::Error;

use super::ast::{
    Anchor, AndOr, ArrayElement, AssignValue, Assignment, CaseArm, CaseTerminator, Command,
    CommandList, CompoundCommand, Connector, HereDoc, ParamExpansion, ParamOp, Pipeline, Redirect,
    RedirectOp, RedirectTarget, Script, SimpleCommand, Subscript, TestExpr, Word, WordPart,
};

/// Failure to turn template text into a [`Script`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("{line}:{column}: {message}")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },
    #[error("{line}:{column}: unterminated {construct}")]
    Incomplete {
        line: usize,
        column: usize,
        construct: String,
    },
}

type PResult<T> = Result<T, ParseError>;

/// Deepest nesting of lists, words, quotes and test expressions accepted.
const MAX_NESTING: usize = 256;

const RESERVED_TERMINATORS: &[&str] = &["then", "else", "elif", "fi", "do", "done", "esac", "}"];

const TEST_UNARY_OPS: &[&str] = &[
    "-a", "-b", "-c", "-d", "-e", "-f", "-g", "-h", "-k", "-n", "-o", "-p", "-r", "-s", "-t", "-u",
    "-v", "-w", "-x", "-z", "-G", "-L", "-N", "-O", "-R", "-S",
];

const TEST_BINARY_OPS: &[&str] = &[
    "==", "=", "!=", "=~", "-eq", "-ne", "-lt", "-le", "-gt", "-ge", "-nt", "-ot", "-ef",
];

/// Parse a complete script.
pub fn parse(source: &str) -> Result<Script, ParseError> {
    Parser::new(source, 0).parse_script()
}

struct PendingHereDoc {
    delimiter: String,
    strip_tabs: bool,
    doc: Arc<HereDoc>,
    start: usize,
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    line_offset: usize,
    pending: Vec<PendingHereDoc>,
    depth: usize,
}

fn is_blank(c: char) -> bool {
    c == ' ' || c == '\t'
}

fn is_meta(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | ';' | '&' | '|' | '<' | '>' | '(' | ')')
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_special_param(c: char) -> bool {
    matches!(c, '@' | '*' | '#' | '?' | '$' | '!' | '-')
}

impl Parser {
    fn new(source: &str, line_offset: usize) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line_offset,
            pending: Vec::new(),
            depth: 0,
        }
    }

    /// Parser for text embedded in the current input (backquotes,
    /// here-document bodies, arithmetic), continuing the current depth.
    fn embedded(&self, source: &str, line_offset: usize) -> Self {
        Self {
            depth: self.depth,
            ..Self::new(source, line_offset)
        }
    }

    fn enter(&mut self) -> PResult<()> {
        if self.depth >= MAX_NESTING {
            return Err(self.syntax(format!("nesting exceeds {MAX_NESTING} levels")));
        }
        self.depth += 1;
        Ok(())
    }

    // ---- low level cursor helpers ----

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn at_eof(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn starts_with(&self, text: &str) -> bool {
        let mut i = self.pos;
        for c in text.chars() {
            if self.chars.get(i) != Some(&c) {
                return false;
            }
            i += 1;
        }
        true
    }

    fn eat(&mut self, text: &str) -> bool {
        if self.starts_with(text) {
            self.pos += text.chars().count();
            true
        } else {
            false
        }
    }

    fn location(&self, pos: usize) -> (usize, usize) {
        let mut line = 1;
        let mut column = 1;
        for &c in &self.chars[..pos.min(self.chars.len())] {
            if c == '\n' {
                line += 1;
                column = 1;
            } else {
                column += 1;
            }
        }
        (line + self.line_offset, column)
    }

    fn syntax(&self, message: impl Into<String>) -> ParseError {
        let (line, column) = self.location(self.pos);
        ParseError::Syntax {
            line,
            column,
            message: message.into(),
        }
    }

    fn incomplete(&self, construct: &str, start: usize) -> ParseError {
        let (line, column) = self.location(start);
        ParseError::Incomplete {
            line,
            column,
            construct: construct.to_string(),
        }
    }

    fn unexpected(&self) -> ParseError {
        match self.peek() {
            None => self.syntax("unexpected end of file"),
            Some('\n') => self.syntax("unexpected newline"),
            Some(_) => {
                let token: String = self.chars[self.pos..]
                    .iter()
                    .take_while(|c| !c.is_whitespace())
                    .take(8)
                    .collect();
                self.syntax(format!("unexpected token `{token}`"))
            }
        }
    }

    /// The unquoted word starting at the cursor, without consuming it.
    fn peek_word(&self) -> String {
        self.chars[self.pos..].iter().take_while(|&&c| !is_meta(c)).collect()
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_word() == keyword {
            self.pos += keyword.len();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str, construct: &str, start: usize) -> PResult<()> {
        self.skip_linebreaks()?;
        if self.eat_keyword(keyword) {
            Ok(())
        } else if self.at_eof() {
            Err(self.incomplete(construct, start))
        } else {
            Err(self.syntax(format!("expected `{keyword}`, found `{}`", self.peek_word())))
        }
    }

    fn read_name(&mut self) -> String {
        let mut name = String::new();
        if let Some(c) = self.peek()
            && is_name_start(c)
        {
            while let Some(c) = self.peek() {
                if !is_name_char(c) {
                    break;
                }
                name.push(c);
                self.pos += 1;
            }
        }
        name
    }

    // ---- whitespace, comments, newlines ----

    fn skip_blanks(&mut self) {
        loop {
            match self.peek() {
                Some(c) if is_blank(c) => self.pos += 1,
                Some('\\') if self.peek_at(1) == Some('\n') => self.pos += 2,
                _ => break,
            }
        }
    }

    fn skip_space(&mut self) {
        self.skip_blanks();
        if self.peek() == Some('#') {
            while let Some(c) = self.peek() {
                if c == '\n' {
                    break;
                }
                self.pos += 1;
            }
        }
    }

    /// Consume one newline and any here-document bodies queued on its line.
    fn newline(&mut self) -> PResult<bool> {
        if self.peek() != Some('\n') {
            return Ok(false);
        }
        self.pos += 1;
        self.read_heredoc_bodies()?;
        Ok(true)
    }

    fn skip_linebreaks(&mut self) -> PResult<()> {
        loop {
            self.skip_space();
            if !self.newline()? {
                return Ok(());
            }
        }
    }

    fn read_heredoc_bodies(&mut self) -> PResult<()> {
        for pending in mem::take(&mut self.pending) {
            let mut body = String::new();
            loop {
                if self.at_eof() {
                    return Err(self.incomplete("here-document", pending.start));
                }
                let mut line = String::new();
                while let Some(c) = self.bump() {
                    if c == '\n' {
                        break;
                    }
                    line.push(c);
                }
                let line = if pending.strip_tabs {
                    line.trim_start_matches('\t').to_string()
                } else {
                    line
                };
                if line == pending.delimiter {
                    break;
                }
                body.push_str(&line);
                body.push('\n');
            }
            let (line, _) = self.location(pending.start);
            let word = if pending.doc.quoted {
                Word {
                    parts: vec![WordPart::SingleQuoted(body)],
                }
            } else {
                self.embedded(&body, line).parse_expansion_text()?
            };
            // Each pending entry owns a fresh cell, so the set cannot collide.
            let _ = pending.doc.body.set(word);
        }
        Ok(())
    }

    // ---- lists and pipelines ----

    fn parse_script(mut self) -> PResult<Script> {
        let body = self.parse_list()?;
        self.skip_linebreaks()?;
        if !self.at_eof() {
            return Err(self.unexpected());
        }
        if let Some(pending) = self.pending.first() {
            return Err(self.incomplete("here-document", pending.start));
        }
        Ok(Script { body })
    }

    fn at_list_end(&self) -> bool {
        match self.peek() {
            None | Some(')') => true,
            Some(';') => self.starts_with(";;") || self.starts_with(";&"),
            Some(_) => RESERVED_TERMINATORS.contains(&self.peek_word().as_str()),
        }
    }

    fn parse_list(&mut self) -> PResult<CommandList> {
        self.enter()?;
        let list = self.parse_list_items();
        self.depth -= 1;
        list
    }

    fn parse_list_items(&mut self) -> PResult<CommandList> {
        let mut list = Vec::new();
        loop {
            self.skip_linebreaks()?;
            if self.at_list_end() {
                break;
            }
            list.push(self.parse_and_or()?);
            self.skip_space();
            if self.starts_with(";;") || self.starts_with(";&") {
                break;
            }
            if self.eat(";") {
                continue;
            }
            if self.peek() == Some('&') && !self.starts_with("&&") {
                // Background jobs run in the foreground.
                self.pos += 1;
                continue;
            }
            if self.peek() == Some('\n') {
                continue;
            }
            break;
        }
        Ok(list)
    }

    fn parse_and_or(&mut self) -> PResult<AndOr> {
        let first = self.parse_pipeline()?;
        let mut rest = Vec::new();
        loop {
            self.skip_space();
            let start = self.pos;
            let connector = if self.eat("&&") {
                Connector::And
            } else if self.eat("||") {
                Connector::Or
            } else {
                break;
            };
            self.skip_linebreaks()?;
            if self.at_eof() {
                let construct = match connector {
                    Connector::And => "`&&` list",
                    Connector::Or => "`||` list",
                };
                return Err(self.incomplete(construct, start));
            }
            rest.push((connector, self.parse_pipeline()?));
        }
        Ok(AndOr { first, rest })
    }

    fn parse_pipeline(&mut self) -> PResult<Pipeline> {
        self.skip_space();
        let mut negated = false;
        if self.peek() == Some('!') && self.peek_at(1).is_none_or(|c| is_blank(c) || c == '\n') {
            self.pos += 1;
            negated = true;
            self.skip_space();
        }
        let mut commands = vec![self.parse_command()?];
        loop {
            self.skip_space();
            if self.peek() != Some('|') || self.starts_with("||") {
                break;
            }
            let start = self.pos;
            self.pos += 1;
            // `|&` also pipes stderr; output streams are merged later anyway.
            self.eat("&");
            self.skip_linebreaks()?;
            if self.at_eof() {
                return Err(self.incomplete("pipeline", start));
            }
            commands.push(self.parse_command()?);
        }
        Ok(Pipeline { negated, commands })
    }

    // ---- commands ----

    fn parse_command(&mut self) -> PResult<Command> {
        self.skip_space();
        let start = self.pos;
        let compound = match self.peek_word().as_str() {
            "if" => Some(self.parse_if(start)?),
            "for" => Some(self.parse_for(start)?),
            "while" => Some(self.parse_while(start, false)?),
            "until" => Some(self.parse_while(start, true)?),
            "case" => Some(self.parse_case(start)?),
            "{" => {
                self.pos += 1;
                let body = self.parse_list()?;
                self.expect_keyword("}", "brace group", start)?;
                Some(CompoundCommand::Brace(body))
            }
            "[[" => Some(self.parse_test_command(start)?),
            "function" => return self.parse_function_keyword(start),
            _ => None,
        };
        let compound = match compound {
            Some(compound) => compound,
            None if self.starts_with("((") => self.parse_arith_command(start)?,
            None if self.peek() == Some('(') => {
                self.pos += 1;
                let body = self.parse_list()?;
                self.skip_linebreaks()?;
                if !self.eat(")") {
                    return Err(if self.at_eof() {
                        self.incomplete("subshell", start)
                    } else {
                        self.unexpected()
                    });
                }
                CompoundCommand::Subshell(body)
            }
            None => return self.parse_simple_or_function(),
        };
        let redirects = self.parse_redirects()?;
        Ok(Command::Compound(compound, redirects))
    }

    fn parse_redirects(&mut self) -> PResult<Vec<Redirect>> {
        let mut redirects = Vec::new();
        loop {
            self.skip_blanks();
            match self.try_parse_redirect()? {
                Some(redirect) => redirects.push(redirect),
                None => return Ok(redirects),
            }
        }
    }

    fn parse_if(&mut self, start: usize) -> PResult<CompoundCommand> {
        self.eat_keyword("if");
        let mut branches = Vec::new();
        let condition = self.parse_list()?;
        self.expect_keyword("then", "if", start)?;
        let body = self.parse_list()?;
        branches.push((condition, body));
        let mut else_body = None;
        loop {
            self.skip_linebreaks()?;
            if self.eat_keyword("elif") {
                let condition = self.parse_list()?;
                self.expect_keyword("then", "if", start)?;
                let body = self.parse_list()?;
                branches.push((condition, body));
            } else if self.eat_keyword("else") {
                else_body = Some(self.parse_list()?);
                self.expect_keyword("fi", "if", start)?;
                break;
            } else {
                self.expect_keyword("fi", "if", start)?;
                break;
            }
        }
        Ok(CompoundCommand::If {
            branches,
            else_body,
        })
    }

    fn parse_for(&mut self, start: usize) -> PResult<CompoundCommand> {
        self.eat_keyword("for");
        self.skip_blanks();
        if self.starts_with("((") {
            return Err(self.syntax("arithmetic for loops are not supported"));
        }
        let var = self.read_name();
        if var.is_empty() {
            return Err(if self.at_eof() {
                self.incomplete("for", start)
            } else {
                self.syntax("expected loop variable name")
            });
        }
        self.skip_linebreaks()?;
        let items = if self.eat_keyword("in") {
            let mut items = Vec::new();
            loop {
                self.skip_space();
                match self.peek() {
                    Some(';') => {
                        self.pos += 1;
                        break;
                    }
                    None | Some('\n') => break,
                    _ => {}
                }
                let word = self.parse_word()?;
                if word.parts.is_empty() {
                    return Err(self.unexpected());
                }
                items.push(word);
            }
            Some(items)
        } else {
            self.eat(";");
            None
        };
        self.expect_keyword("do", "for", start)?;
        let body = self.parse_list()?;
        self.expect_keyword("done", "for", start)?;
        Ok(CompoundCommand::For { var, items, body })
    }

    fn parse_while(&mut self, start: usize, until: bool) -> PResult<CompoundCommand> {
        let keyword = if until { "until" } else { "while" };
        self.eat_keyword(keyword);
        let condition = self.parse_list()?;
        self.expect_keyword("do", keyword, start)?;
        let body = self.parse_list()?;
        self.expect_keyword("done", keyword, start)?;
        Ok(CompoundCommand::While {
            until,
            condition,
            body,
        })
    }

    fn parse_case(&mut self, start: usize) -> PResult<CompoundCommand> {
        self.eat_keyword("case");
        self.skip_blanks();
        let word = self.parse_word()?;
        if word.parts.is_empty() {
            return Err(if self.at_eof() {
                self.incomplete("case", start)
            } else {
                self.unexpected()
            });
        }
        self.expect_keyword("in", "case", start)?;
        let mut arms = Vec::new();
        loop {
            self.skip_linebreaks()?;
            if self.eat_keyword("esac") {
                break;
            }
            if self.at_eof() {
                return Err(self.incomplete("case", start));
            }
            self.eat("(");
            let mut patterns = Vec::new();
            loop {
                self.skip_blanks();
                let pattern = self.parse_word()?;
                if pattern.parts.is_empty() {
                    return Err(if self.at_eof() {
                        self.incomplete("case", start)
                    } else {
                        self.unexpected()
                    });
                }
                patterns.push(pattern);
                self.skip_blanks();
                if self.eat("|") {
                    continue;
                }
                if self.eat(")") {
                    break;
                }
                return Err(if self.at_eof() {
                    self.incomplete("case", start)
                } else {
                    self.unexpected()
                });
            }
            let body = self.parse_list()?;
            self.skip_space();
            let terminator = if self.eat(";;&") {
                CaseTerminator::Continue
            } else if self.eat(";;") {
                CaseTerminator::Break
            } else if self.eat(";&") {
                CaseTerminator::FallThrough
            } else {
                // The last arm may omit its terminator.
                arms.push(CaseArm {
                    patterns,
                    body,
                    terminator: CaseTerminator::Break,
                });
                self.expect_keyword("esac", "case", start)?;
                break;
            };
            arms.push(CaseArm {
                patterns,
                body,
                terminator,
            });
        }
        Ok(CompoundCommand::Case { word, arms })
    }

    fn parse_arith_command(&mut self, start: usize) -> PResult<CompoundCommand> {
        self.pos += 2;
        let text = self.read_arith_text(start, "arithmetic command")?;
        let word = self.embedded(&text, self.location(start).0 - 1).parse_expansion_text()?;
        Ok(CompoundCommand::Arith(word))
    }

    /// Raw text up to the `))` that closes an arithmetic context.
    fn read_arith_text(&mut self, start: usize, construct: &str) -> PResult<String> {
        let mut depth = 0usize;
        let mut text = String::new();
        loop {
            if self.at_eof() {
                return Err(self.incomplete(construct, start));
            }
            if depth == 0 && self.eat("))") {
                return Ok(text);
            }
            let c = self.bump().unwrap_or_default();
            match c {
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                _ => {}
            }
            text.push(c);
        }
    }

    fn parse_function_keyword(&mut self, start: usize) -> PResult<Command> {
        self.eat_keyword("function");
        self.skip_blanks();
        let name: String = self.peek_word();
        if name.is_empty() {
            return Err(if self.at_eof() {
                self.incomplete("function", start)
            } else {
                self.unexpected()
            });
        }
        self.pos += name.chars().count();
        self.skip_blanks();
        if self.eat("(") {
            self.skip_blanks();
            if !self.eat(")") {
                return Err(self.unexpected());
            }
        }
        self.parse_function_body(name, start)
    }

    fn parse_function_body(&mut self, name: String, start: usize) -> PResult<Command> {
        self.skip_linebreaks()?;
        if self.at_eof() {
            return Err(self.incomplete("function", start));
        }
        let body = self.parse_command()?;
        if !matches!(body, Command::Compound(..)) {
            return Err(self.syntax(format!("function `{name}` needs a compound command body")));
        }
        Ok(Command::FunctionDef {
            name,
            body: Arc::new(body),
        })
    }

    fn parse_simple_or_function(&mut self) -> PResult<Command> {
        let start = self.pos;
        let mut command = SimpleCommand {
            line: self.location(start).0,
            ..SimpleCommand::default()
        };
        loop {
            self.skip_blanks();
            match self.peek() {
                None | Some('\n' | ';' | '&' | '|' | ')') => break,
                Some('#') => {
                    self.skip_space();
                    break;
                }
                Some('(') => {
                    let name = match command.words.as_slice() {
                        [word] if command.assignments.is_empty() && command.redirects.is_empty() => {
                            word.as_literal().map(str::to_string)
                        }
                        _ => None,
                    };
                    let Some(name) = name else {
                        return Err(self.unexpected());
                    };
                    self.pos += 1;
                    self.skip_blanks();
                    if !self.eat(")") {
                        return Err(self.unexpected());
                    }
                    return self.parse_function_body(name, start);
                }
                _ => {}
            }
            if let Some(redirect) = self.try_parse_redirect()? {
                command.redirects.push(redirect);
                continue;
            }
            if command.words.is_empty()
                && let Some(assignment) = self.try_parse_assignment()?
            {
                command.assignments.push(assignment);
                continue;
            }
            let word = self.parse_word()?;
            if word.parts.is_empty() {
                return Err(self.unexpected());
            }
            command.words.push(word);
        }
        if command.is_empty() {
            return Err(self.unexpected());
        }
        Ok(Command::Simple(command))
    }

    fn try_parse_assignment(&mut self) -> PResult<Option<Assignment>> {
        let save = self.pos;
        let name = self.read_name();
        if name.is_empty() {
            return Ok(None);
        }
        let mut subscript = None;
        if self.peek() == Some('[') {
            self.pos += 1;
            let index = self.parse_word_with(|p| p.peek() == Some(']'))?;
            if !self.eat("]") {
                self.pos = save;
                return Ok(None);
            }
            subscript = Some(index);
        }
        let append = if self.eat("+=") {
            true
        } else if self.eat("=") {
            false
        } else {
            self.pos = save;
            return Ok(None);
        };
        let value = if subscript.is_none() && self.peek() == Some('(') {
            AssignValue::Array(self.parse_array_literal()?)
        } else {
            AssignValue::Scalar(self.parse_word()?)
        };
        Ok(Some(Assignment {
            name,
            subscript,
            append,
            value,
        }))
    }

    fn parse_array_literal(&mut self) -> PResult<Vec<ArrayElement>> {
        let start = self.pos;
        self.pos += 1;
        let mut elements = Vec::new();
        loop {
            self.skip_linebreaks()?;
            if self.eat(")") {
                return Ok(elements);
            }
            if self.at_eof() {
                return Err(self.incomplete("array", start));
            }
            let save = self.pos;
            if self.eat("[") {
                let key = self.parse_word_with(|p| p.peek() == Some(']'))?;
                if self.eat("]=") {
                    let value = self.parse_word()?;
                    elements.push(ArrayElement {
                        key: Some(key),
                        value,
                    });
                    continue;
                }
                self.pos = save;
            }
            let value = self.parse_word()?;
            if value.parts.is_empty() {
                return Err(self.unexpected());
            }
            elements.push(ArrayElement { key: None, value });
        }
    }

    fn try_parse_redirect(&mut self) -> PResult<Option<Redirect>> {
        let save = self.pos;
        let mut fd = None;
        let digits: String = self.chars[self.pos..].iter().take_while(|c| c.is_ascii_digit()).collect();
        if !digits.is_empty() {
            let next = self.peek_at(digits.len());
            if matches!(next, Some('<' | '>')) {
                fd = digits.parse::<u32>().ok();
                self.pos += digits.len();
            } else {
                return Ok(None);
            }
        }
        let (op, strip_tabs) = if fd.is_none() && self.eat("&>>") {
            (RedirectOp::AppendBoth, false)
        } else if fd.is_none() && self.eat("&>") {
            (RedirectOp::WriteBoth, false)
        } else if self.eat("<<<") {
            (RedirectOp::HereString, false)
        } else if self.eat("<<-") {
            (RedirectOp::HereDoc, true)
        } else if self.eat("<<") {
            (RedirectOp::HereDoc, false)
        } else if self.eat("<>") {
            (RedirectOp::ReadWrite, false)
        } else if self.eat("<&") {
            (RedirectOp::DupInput, false)
        } else if self.eat("<") {
            (RedirectOp::Read, false)
        } else if self.eat(">>") {
            (RedirectOp::Append, false)
        } else if self.eat(">&") {
            (RedirectOp::DupOutput, false)
        } else if self.eat(">|") || self.eat(">") {
            (RedirectOp::Write, false)
        } else {
            self.pos = save;
            return Ok(None);
        };
        self.skip_blanks();
        let word_start = self.pos;
        let word = self.parse_word()?;
        if word.parts.is_empty() {
            return Err(if self.at_eof() {
                self.incomplete("redirection", save)
            } else {
                self.syntax("expected redirection target")
            });
        }
        let target = if op == RedirectOp::HereDoc {
            let raw: String = self.chars[word_start..self.pos].iter().collect();
            let quoted = raw.contains(['\'', '"', '\\']);
            let delimiter: String = raw.chars().filter(|c| !matches!(c, '\'' | '"' | '\\')).collect();
            let doc = Arc::new(HereDoc {
                quoted,
                body: OnceLock::new(),
            });
            self.pending.push(PendingHereDoc {
                delimiter,
                strip_tabs,
                doc: Arc::clone(&doc),
                start: save,
            });
            RedirectTarget::HereDoc(doc)
        } else {
            RedirectTarget::Word(word)
        };
        Ok(Some(Redirect { fd, op, target }))
    }

    // ---- [[ ... ]] ----

    fn parse_test_command(&mut self, start: usize) -> PResult<CompoundCommand> {
        self.pos += 2;
        let expr = self.parse_test_or(start)?;
        self.skip_test_space(start)?;
        if !self.eat_keyword("]]") {
            return Err(self.syntax(format!("expected `]]`, found `{}`", self.peek_word())));
        }
        Ok(CompoundCommand::Test(expr))
    }

    fn skip_test_space(&mut self, start: usize) -> PResult<()> {
        self.skip_linebreaks()?;
        if self.at_eof() {
            return Err(self.incomplete("`[[` test", start));
        }
        Ok(())
    }

    fn parse_test_or(&mut self, start: usize) -> PResult<TestExpr> {
        let mut left = self.parse_test_and(start)?;
        loop {
            self.skip_test_space(start)?;
            if !self.eat("||") {
                return Ok(left);
            }
            let right = self.parse_test_and(start)?;
            left = TestExpr::Or(Box::new(left), Box::new(right));
        }
    }

    fn parse_test_and(&mut self, start: usize) -> PResult<TestExpr> {
        let mut left = self.parse_test_not(start)?;
        loop {
            self.skip_test_space(start)?;
            if !self.eat("&&") {
                return Ok(left);
            }
            let right = self.parse_test_not(start)?;
            left = TestExpr::And(Box::new(left), Box::new(right));
        }
    }

    fn parse_test_not(&mut self, start: usize) -> PResult<TestExpr> {
        self.enter()?;
        let expr = self.parse_test_negation(start);
        self.depth -= 1;
        expr
    }

    fn parse_test_negation(&mut self, start: usize) -> PResult<TestExpr> {
        self.skip_test_space(start)?;
        if self.eat_keyword("!") {
            return Ok(TestExpr::Not(Box::new(self.parse_test_not(start)?)));
        }
        self.parse_test_primary(start)
    }

    fn parse_test_primary(&mut self, start: usize) -> PResult<TestExpr> {
        self.skip_test_space(start)?;
        if self.eat("(") {
            let inner = self.parse_test_or(start)?;
            self.skip_test_space(start)?;
            if !self.eat(")") {
                return Err(self.unexpected());
            }
            return Ok(inner);
        }
        if self.peek_word() == "]]" {
            return Err(self.syntax("expected test expression"));
        }
        let first = self.parse_test_operand()?;
        if let Some(op) = first.as_literal()
            && TEST_UNARY_OPS.contains(&op)
        {
            let save = self.pos;
            self.skip_blanks();
            let next = self.peek_word();
            let is_end = next == "]]" || self.starts_with("&&") || self.starts_with("||");
            if !is_end && !TEST_BINARY_OPS.contains(&next.as_str()) {
                let operand = self.parse_test_operand()?;
                return Ok(TestExpr::Unary(op.to_string(), operand));
            }
            self.pos = save;
        }
        self.skip_blanks();
        let op = if self.eat("<") {
            Some("<".to_string())
        } else if self.eat(">") {
            Some(">".to_string())
        } else {
            let next = self.peek_word();
            if TEST_BINARY_OPS.contains(&next.as_str()) {
                self.pos += next.len();
                Some(next)
            } else {
                None
            }
        };
        let Some(op) = op else {
            return Ok(TestExpr::Word(first));
        };
        self.skip_test_space(start)?;
        let second = if op == "=~" {
            self.parse_regex_operand()?
        } else {
            self.parse_test_operand()?
        };
        Ok(TestExpr::Binary(first, op, second))
    }

    fn parse_test_operand(&mut self) -> PResult<Word> {
        self.skip_blanks();
        let word = self.parse_word()?;
        if word.parts.is_empty() {
            return Err(self.unexpected());
        }
        Ok(word)
    }

    /// Right-hand side of `=~`: parentheses and `|` belong to the regex.
    fn parse_regex_operand(&mut self) -> PResult<Word> {
        let mut parts = Vec::new();
        let mut depth = 0usize;
        loop {
            let Some(c) = self.peek() else { break };
            match c {
                '\n' => break,
                ' ' | '\t' | ';' | '&' if depth == 0 => break,
                '(' | ')' | '|' | '<' | '>' | ' ' | '\t' | ';' | '&' => {
                    match c {
                        '(' => depth += 1,
                        ')' => depth = depth.saturating_sub(1),
                        _ => {}
                    }
                    self.pos += 1;
                    parts.push(WordPart::Literal(c.to_string()));
                }
                _ => parts.extend(self.parse_word()?.parts),
            }
        }
        if parts.is_empty() {
            return Err(self.unexpected());
        }
        Ok(Word { parts })
    }

    // ---- words ----

    fn parse_word(&mut self) -> PResult<Word> {
        self.parse_word_with(|p| p.peek().is_none_or(is_meta))
    }

    fn parse_word_with(&mut self, stop: impl Fn(&Self) -> bool) -> PResult<Word> {
        self.enter()?;
        let word = self.parse_word_parts(stop);
        self.depth -= 1;
        word
    }

    fn parse_word_parts(&mut self, stop: impl Fn(&Self) -> bool) -> PResult<Word> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        while let Some(c) = self.peek() {
            if stop(self) {
                break;
            }
            match c {
                '\'' => {
                    flush_literal(&mut parts, &mut literal);
                    parts.push(WordPart::SingleQuoted(self.parse_single_quoted()?));
                }
                '"' => {
                    flush_literal(&mut parts, &mut literal);
                    parts.push(WordPart::DoubleQuoted(self.parse_double_quoted()?));
                }
                '\\' => {
                    self.pos += 1;
                    match self.bump() {
                        Some('\n') => {}
                        Some(escaped) => {
                            flush_literal(&mut parts, &mut literal);
                            parts.push(WordPart::SingleQuoted(escaped.to_string()));
                        }
                        None => literal.push('\\'),
                    }
                }
                '$' => match self.parse_dollar()? {
                    Some(part) => {
                        flush_literal(&mut parts, &mut literal);
                        parts.push(part);
                    }
                    None => literal.push('$'),
                },
                '`' => {
                    flush_literal(&mut parts, &mut literal);
                    parts.push(self.parse_backtick()?);
                }
                _ => {
                    literal.push(c);
                    self.pos += 1;
                }
            }
        }
        flush_literal(&mut parts, &mut literal);
        Ok(Word { parts })
    }

    /// Parse text where only `$`, backquotes and a few backslash escapes
    /// are special: here-document bodies and arithmetic expressions.
    fn parse_expansion_text(mut self) -> PResult<Word> {
        self.enter()?;
        let mut parts = Vec::new();
        let mut literal = String::new();
        while let Some(c) = self.peek() {
            match c {
                '\\' if matches!(self.peek_at(1), Some('$' | '`' | '\\')) => {
                    self.pos += 1;
                    literal.push(self.bump().unwrap_or_default());
                }
                '\\' if self.peek_at(1) == Some('\n') => self.pos += 2,
                '$' => match self.parse_dollar()? {
                    Some(part) => {
                        flush_literal(&mut parts, &mut literal);
                        parts.push(part);
                    }
                    None => literal.push('$'),
                },
                '`' => {
                    flush_literal(&mut parts, &mut literal);
                    parts.push(self.parse_backtick()?);
                }
                _ => {
                    literal.push(c);
                    self.pos += 1;
                }
            }
        }
        flush_literal(&mut parts, &mut literal);
        Ok(Word { parts })
    }

    fn parse_single_quoted(&mut self) -> PResult<String> {
        let start = self.pos;
        self.pos += 1;
        let mut text = String::new();
        loop {
            match self.bump() {
                Some('\'') => return Ok(text),
                Some(c) => text.push(c),
                None => return Err(self.incomplete("single quote", start)),
            }
        }
    }

    fn parse_ansi_c_quoted(&mut self) -> PResult<String> {
        let start = self.pos;
        self.pos += 1;
        let mut text = String::new();
        loop {
            match self.bump() {
                Some('\'') => return Ok(text),
                Some('\\') => match self.bump() {
                    Some('n') => text.push('\n'),
                    Some('t') => text.push('\t'),
                    Some('r') => text.push('\r'),
                    Some('e' | 'E') => text.push('\u{1b}'),
                    Some('a') => text.push('\u{07}'),
                    Some('0') => text.push('\0'),
                    Some(c @ ('\\' | '\'' | '"' | '?')) => text.push(c),
                    Some(c) => {
                        text.push('\\');
                        text.push(c);
                    }
                    None => return Err(self.incomplete("$'' quote", start)),
                },
                Some(c) => text.push(c),
                None => return Err(self.incomplete("$'' quote", start)),
            }
        }
    }

    fn parse_double_quoted(&mut self) -> PResult<Vec<WordPart>> {
        self.enter()?;
        let parts = self.parse_double_quoted_parts();
        self.depth -= 1;
        parts
    }

    fn parse_double_quoted_parts(&mut self) -> PResult<Vec<WordPart>> {
        let start = self.pos;
        self.pos += 1;
        let mut parts = Vec::new();
        let mut literal = String::new();
        loop {
            match self.peek() {
                None => return Err(self.incomplete("double quote", start)),
                Some('"') => {
                    self.pos += 1;
                    break;
                }
                Some('\\') => {
                    self.pos += 1;
                    match self.bump() {
                        Some(c @ ('$' | '`' | '"' | '\\')) => literal.push(c),
                        Some('\n') => {}
                        Some(c) => {
                            literal.push('\\');
                            literal.push(c);
                        }
                        None => return Err(self.incomplete("double quote", start)),
                    }
                }
                Some('$') => match self.parse_dollar()? {
                    Some(part) => {
                        flush_literal(&mut parts, &mut literal);
                        parts.push(part);
                    }
                    None => literal.push('$'),
                },
                Some('`') => {
                    flush_literal(&mut parts, &mut literal);
                    parts.push(self.parse_backtick()?);
                }
                Some(c) => {
                    literal.push(c);
                    self.pos += 1;
                }
            }
        }
        flush_literal(&mut parts, &mut literal);
        Ok(parts)
    }

    fn parse_backtick(&mut self) -> PResult<WordPart> {
        let start = self.pos;
        self.pos += 1;
        let mut text = String::new();
        loop {
            match self.bump() {
                None => return Err(self.incomplete("backquote", start)),
                Some('`') => break,
                Some('\\') => match self.bump() {
                    Some(c @ ('`' | '\\' | '$')) => text.push(c),
                    Some(c) => {
                        text.push('\\');
                        text.push(c);
                    }
                    None => return Err(self.incomplete("backquote", start)),
                },
                Some(c) => text.push(c),
            }
        }
        let line = self.location(start).0 - 1;
        let script = self.embedded(&text, line).parse_script()?;
        Ok(WordPart::CommandSubst(script.body))
    }

    /// Parse an expansion introduced by `$`. Returns `None` when the `$`
    /// is literal; the `$` itself is always consumed.
    fn parse_dollar(&mut self) -> PResult<Option<WordPart>> {
        let start = self.pos;
        self.pos += 1;
        match self.peek() {
            Some('(') if self.peek_at(1) == Some('(') => {
                self.pos += 2;
                let text = self.read_arith_text(start, "arithmetic expansion")?;
                let word = self.embedded(&text, self.location(start).0 - 1).parse_expansion_text()?;
                Ok(Some(WordPart::Arith(word)))
            }
            Some('(') => {
                self.pos += 1;
                let body = self.parse_list()?;
                self.skip_linebreaks()?;
                if self.eat(")") {
                    Ok(Some(WordPart::CommandSubst(body)))
                } else if self.at_eof() {
                    Err(self.incomplete("command substitution", start))
                } else {
                    Err(self.unexpected())
                }
            }
            Some('{') => self.parse_braced_param(start).map(Some),
            Some('\'') => Ok(Some(WordPart::SingleQuoted(self.parse_ansi_c_quoted()?))),
            Some('"') => Ok(Some(WordPart::DoubleQuoted(self.parse_double_quoted()?))),
            Some(c) if is_name_start(c) => {
                let name = self.read_name();
                Ok(Some(plain_param(name)))
            }
            Some(c) if c.is_ascii_digit() || is_special_param(c) => {
                self.pos += 1;
                Ok(Some(plain_param(c.to_string())))
            }
            _ => Ok(None),
        }
    }

    fn parse_braced_param(&mut self, start: usize) -> PResult<WordPart> {
        self.pos += 1;
        let mut length = false;
        if self.peek() == Some('#')
            && self
                .peek_at(1)
                .is_some_and(|c| is_name_start(c) || c.is_ascii_digit() || matches!(c, '@' | '*'))
        {
            self.pos += 1;
            length = true;
        }
        let name = match self.peek() {
            Some(c) if is_name_start(c) => self.read_name(),
            Some(c) if c.is_ascii_digit() => {
                let digits: String =
                    self.chars[self.pos..].iter().take_while(|c| c.is_ascii_digit()).collect();
                self.pos += digits.len();
                digits
            }
            Some(c) if is_special_param(c) => {
                self.pos += 1;
                c.to_string()
            }
            None => return Err(self.incomplete("parameter expansion", start)),
            Some(_) => return Err(self.syntax("bad substitution")),
        };
        let subscript = if self.peek() == Some('[') {
            self.pos += 1;
            let subscript = if self.eat("@]") {
                Subscript::All { star: false }
            } else if self.eat("*]") {
                Subscript::All { star: true }
            } else {
                let index = self.parse_word_with(|p| p.peek() == Some(']'))?;
                if !self.eat("]") {
                    return Err(self.incomplete("parameter expansion", start));
                }
                Subscript::Index(index)
            };
            Some(subscript)
        } else {
            None
        };
        let op = if length {
            ParamOp::Length
        } else {
            self.parse_param_op(start)?
        };
        if !self.eat("}") {
            return Err(if self.at_eof() {
                self.incomplete("parameter expansion", start)
            } else {
                self.syntax("bad substitution")
            });
        }
        Ok(WordPart::Param(Box::new(ParamExpansion {
            name,
            subscript,
            op,
        })))
    }

    fn parse_param_op(&mut self, start: usize) -> PResult<ParamOp> {
        let until_brace = |p: &Self| p.peek() == Some('}');
        let op = match self.peek() {
            Some('}') => return Ok(ParamOp::Plain),
            None => return Err(self.incomplete("parameter expansion", start)),
            Some(':') if matches!(self.peek_at(1), Some('-' | '=' | '+' | '?')) => {
                self.pos += 1;
                self.parse_param_conditional(true)?
            }
            Some('-' | '=' | '+' | '?') => self.parse_param_conditional(false)?,
            Some(':') => {
                self.pos += 1;
                let offset = self.parse_word_with(|p| matches!(p.peek(), Some(':' | '}')))?;
                let length = if self.eat(":") {
                    Some(self.parse_word_with(until_brace)?)
                } else {
                    None
                };
                ParamOp::Substring { offset, length }
            }
            Some('#') => {
                self.pos += 1;
                let longest = self.eat("#");
                ParamOp::RemovePrefix {
                    longest,
                    pattern: self.parse_word_with(until_brace)?,
                }
            }
            Some('%') => {
                self.pos += 1;
                let longest = self.eat("%");
                ParamOp::RemoveSuffix {
                    longest,
                    pattern: self.parse_word_with(until_brace)?,
                }
            }
            Some('/') => {
                self.pos += 1;
                let all = self.eat("/");
                let anchor = if self.eat("#") {
                    Some(Anchor::Start)
                } else if self.eat("%") {
                    Some(Anchor::End)
                } else {
                    None
                };
                let pattern = self.parse_word_with(|p| matches!(p.peek(), Some('/' | '}')))?;
                let replacement = if self.eat("/") {
                    self.parse_word_with(until_brace)?
                } else {
                    Word::default()
                };
                ParamOp::Replace {
                    all,
                    anchor,
                    pattern,
                    replacement,
                }
            }
            Some(c @ ('^' | ',')) => {
                self.pos += 1;
                let all = self.eat(&c.to_string());
                // Case-modification patterns are accepted and ignored.
                self.parse_word_with(until_brace)?;
                ParamOp::Case {
                    upper: c == '^',
                    all,
                }
            }
            Some(_) => return Err(self.syntax("bad substitution")),
        };
        Ok(op)
    }

    fn parse_param_conditional(&mut self, colon: bool) -> PResult<ParamOp> {
        let op = self.bump().unwrap_or_default();
        let word = self.parse_word_with(|p| p.peek() == Some('}'))?;
        Ok(match op {
            '-' => ParamOp::Default { colon, word },
            '=' => ParamOp::Assign { colon, word },
            '+' => ParamOp::Alternate { colon, word },
            _ => ParamOp::Error { colon, word },
        })
    }
}

fn plain_param(name: String) -> WordPart {
    WordPart::Param(Box::new(ParamExpansion {
        name,
        subscript: None,
        op: ParamOp::Plain,
    }))
}

fn flush_literal(parts: &mut Vec<WordPart>, literal: &mut String) {
    if !literal.is_empty() {
        parts.push(WordPart::Literal(mem::take(literal)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple(script: &Script, index: usize) -> &SimpleCommand {
        match &script.body[index].first.commands[0] {
            Command::Simple(command) => command,
            other => panic!("expected simple command, got {other:?}"),
        }
    }

    #[test]
    fn test_assignments_and_words() {
        let script = parse("pkgname=foo\nversion=1.2 depends=\"libc ${pkgname}-data\"\n").unwrap();
        assert_eq!(script.body.len(), 2);
        let first = simple(&script, 0);
        assert_eq!(first.assignments[0].name, "pkgname");
        let second = simple(&script, 1);
        assert_eq!(second.assignments.len(), 2);
        assert!(second.words.is_empty());
    }

    #[test]
    fn test_function_definition() {
        let script = parse("do_install() {\n\tvinstall foo 644 usr/share\n}\n").unwrap();
        match &script.body[0].first.commands[0] {
            Command::FunctionDef { name, body } => {
                assert_eq!(name, "do_install");
                assert!(matches!(body.as_ref(), Command::Compound(CompoundCommand::Brace(_), _)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_if_case_for() {
        let text = r#"
if [ "$CROSS_BUILD" ]; then
	hostmakedepends+=" qemu"
elif true; then :
else
	:
fi
case "$XBPS_TARGET_MACHINE" in
	x86_64*|i686*) makedepends+=" nasm";;
	*) ;;
esac
for f in a b c; do echo $f; done
"#;
        let script = parse(text).unwrap();
        assert_eq!(script.body.len(), 3);
    }

    #[test]
    fn test_heredoc_body_is_attached() {
        let script = parse("cat <<EOF >/dev/null\nhello $name\nEOF\necho done\n").unwrap();
        assert_eq!(script.body.len(), 2);
        let command = simple(&script, 0);
        match &command.redirects[0].target {
            RedirectTarget::HereDoc(doc) => assert!(doc.body.get().is_some()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_syntax_error_location() {
        let err = parse("echo ok\nfi\n").unwrap_err();
        match err {
            ParseError::Syntax { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_nesting_limit() {
        let text = format!("[[ {}x ]]\n", "! ".repeat(MAX_NESTING + 10));
        match parse(&text).unwrap_err() {
            ParseError::Syntax { message, .. } => {
                assert_eq!(message, format!("nesting exceeds {MAX_NESTING} levels"));
            }
            other => panic!("unexpected {other:?}"),
        }

        let text = format!("[[ {}x ]]\n", "! ".repeat(10));
        assert!(parse(&text).is_ok());
    }

    #[test]
    fn test_incomplete_constructs() {
        for (text, construct) in [
            ("depends=\"libc", "double quote"),
            ("x='abc", "single quote"),
            ("if true; then\n echo", "if"),
            ("x=$(echo", "command substitution"),
            ("x=${foo", "parameter expansion"),
            ("cat <<EOF\nbody\n", "here-document"),
            ("for x in a b; do", "for"),
            ("echo a &&", "`&&` list"),
        ] {
            match parse(text) {
                Err(ParseError::Incomplete { construct: found, .. }) => {
                    assert_eq!(found, construct, "for {text:?}")
                }
                other => panic!("expected incomplete {construct} for {text:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_test_command() {
        let script = parse("[[ -n $x && ( $y == a* || $z =~ ^(b|c)$ ) ]] && echo y\n").unwrap();
        match &script.body[0].first.commands[0] {
            Command::Compound(CompoundCommand::Test(TestExpr::And(..)), _) => {}
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_array_assignment() {
        let script = parse("arr=(one \"two three\" [5]=five)\n").unwrap();
        match &simple(&script, 0).assignments[0].value {
            AssignValue::Array(elements) => {
                assert_eq!(elements.len(), 3);
                assert!(elements[2].key.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
