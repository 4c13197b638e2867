//! Syntax tree for the shell subset understood by package templates.

use std::sync::{Arc, OnceLock};

/// A parsed template: a list of commands run in order.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub body: CommandList,
}

/// Commands separated by `;`, `&` or newlines.
pub type CommandList = Vec<AndOr>;

/// Pipelines chained with `&&` / `||`.
#[derive(Debug, Clone)]
pub struct AndOr {
    pub first: Pipeline,
    pub rest: Vec<(Connector, Pipeline)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connector {
    And,
    Or,
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    pub negated: bool,
    pub commands: Vec<Command>,
}

#[derive(Debug, Clone)]
pub enum Command {
    Simple(SimpleCommand),
    Compound(CompoundCommand, Vec<Redirect>),
    FunctionDef {
        name: String,
        body: Arc<Command>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct SimpleCommand {
    pub assignments: Vec<Assignment>,
    pub words: Vec<Word>,
    pub redirects: Vec<Redirect>,
    /// 1-based line of the first token, used in error context.
    pub line: usize,
}

impl SimpleCommand {
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty() && self.words.is_empty() && self.redirects.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Assignment {
    pub name: String,
    pub subscript: Option<Word>,
    pub append: bool,
    pub value: AssignValue,
}

#[derive(Debug, Clone)]
pub enum AssignValue {
    Scalar(Word),
    Array(Vec<ArrayElement>),
}

#[derive(Debug, Clone)]
pub struct ArrayElement {
    pub key: Option<Word>,
    pub value: Word,
}

#[derive(Debug, Clone)]
pub enum CompoundCommand {
    Brace(CommandList),
    Subshell(CommandList),
    If {
        branches: Vec<(CommandList, CommandList)>,
        else_body: Option<CommandList>,
    },
    For {
        var: String,
        items: Option<Vec<Word>>,
        body: CommandList,
    },
    While {
        until: bool,
        condition: CommandList,
        body: CommandList,
    },
    Case {
        word: Word,
        arms: Vec<CaseArm>,
    },
    /// `[[ ... ]]`
    Test(TestExpr),
    /// `(( ... ))`
    Arith(Word),
}

#[derive(Debug, Clone)]
pub struct CaseArm {
    pub patterns: Vec<Word>,
    pub body: CommandList,
    pub terminator: CaseTerminator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseTerminator {
    /// `;;`
    Break,
    /// `;&`
    FallThrough,
    /// `;;&`
    Continue,
}

/// Expression inside `[[ ... ]]`.
#[derive(Debug, Clone)]
pub enum TestExpr {
    Not(Box<TestExpr>),
    And(Box<TestExpr>, Box<TestExpr>),
    Or(Box<TestExpr>, Box<TestExpr>),
    Unary(String, Word),
    Binary(Word, String, Word),
    Word(Word),
}

#[derive(Debug, Clone, Default)]
pub struct Word {
    pub parts: Vec<WordPart>,
}

impl Word {
    pub fn literal(text: impl Into<String>) -> Self {
        Self {
            parts: vec![WordPart::Literal(text.into())],
        }
    }

    /// The word's text when it contains no quoting or expansions.
    pub fn as_literal(&self) -> Option<&str> {
        match self.parts.as_slice() {
            [WordPart::Literal(text)] => Some(text),
            _ => None,
        }
    }

    pub fn is_quoted(&self) -> bool {
        self.parts
            .iter()
            .any(|part| matches!(part, WordPart::SingleQuoted(_) | WordPart::DoubleQuoted(_)))
    }
}

#[derive(Debug, Clone)]
pub enum WordPart {
    Literal(String),
    /// Single quotes, `$'...'` and backslash-escaped characters.
    SingleQuoted(String),
    DoubleQuoted(Vec<WordPart>),
    Param(Box<ParamExpansion>),
    CommandSubst(CommandList),
    /// `$(( ... ))`, expanded first and then evaluated.
    Arith(Word),
}

#[derive(Debug, Clone)]
pub struct ParamExpansion {
    pub name: String,
    pub subscript: Option<Subscript>,
    pub op: ParamOp,
}

#[derive(Debug, Clone)]
pub enum Subscript {
    /// `[@]` or `[*]`
    All { star: bool },
    Index(Word),
}

#[derive(Debug, Clone)]
pub enum ParamOp {
    Plain,
    Length,
    /// `:-` / `-`
    Default { colon: bool, word: Word },
    /// `:=` / `=`
    Assign { colon: bool, word: Word },
    /// `:+` / `+`
    Alternate { colon: bool, word: Word },
    /// `:?` / `?`
    Error { colon: bool, word: Word },
    /// `#` / `##`
    RemovePrefix { longest: bool, pattern: Word },
    /// `%` / `%%`
    RemoveSuffix { longest: bool, pattern: Word },
    Replace {
        all: bool,
        anchor: Option<Anchor>,
        pattern: Word,
        replacement: Word,
    },
    Substring {
        offset: Word,
        length: Option<Word>,
    },
    Case { upper: bool, all: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    Start,
    End,
}

#[derive(Debug, Clone)]
pub struct Redirect {
    pub fd: Option<u32>,
    pub op: RedirectOp,
    pub target: RedirectTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectOp {
    /// `<`
    Read,
    /// `>` and `>|`
    Write,
    /// `>>`
    Append,
    /// `<>`
    ReadWrite,
    /// `>&`
    DupOutput,
    /// `<&`
    DupInput,
    /// `&>`
    WriteBoth,
    /// `&>>`
    AppendBoth,
    /// `<<` and `<<-`
    HereDoc,
    /// `<<<`
    HereString,
}

#[derive(Debug, Clone)]
pub enum RedirectTarget {
    Word(Word),
    HereDoc(Arc<HereDoc>),
}

/// A here-document whose body is filled in once the parser reaches the
/// line after the redirection.
#[derive(Debug, Default)]
pub struct HereDoc {
    pub quoted: bool,
    pub body: OnceLock<Word>,
}
