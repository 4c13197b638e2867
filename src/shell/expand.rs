//! Word expansion: parameters, command substitution, arithmetic, field
//! splitting and quote removal.
//!
//! Pathname expansion is not performed; a template sees its own words, not
//! the host's directory listing.

use std::mem;

use anyhow::Result;

use super::ShellError;
use super::arith;
use super::ast::{Anchor, ParamExpansion, ParamOp, Subscript, Word, WordPart};
use super::env::Value;
use super::interp::Interpreter;
use super::pattern::{self, ReplaceMode, ShellPattern};

/// Name reported for `$0`.
const SHELL_NAME: &str = "xdeps";

const IFS_WHITESPACE: [char; 3] = [' ', '\t', '\n'];

/// Intermediate result of expanding one word.
#[derive(Debug)]
enum Piece {
    Text { text: String, quoted: bool, split: bool },
    /// Boundary between elements of `"$@"` and `${array[@]}`.
    FieldBreak,
}

#[derive(Debug, Clone)]
enum ParamValue {
    Single(String),
    Multiple { items: Vec<String>, star: bool },
}

impl ParamValue {
    fn is_null(&self) -> bool {
        match self {
            Self::Single(text) => text.is_empty(),
            Self::Multiple { items, .. } => items.iter().all(String::is_empty),
        }
    }

    fn map(self, f: impl Fn(&str) -> String) -> Self {
        match self {
            Self::Single(text) => Self::Single(f(&text)),
            Self::Multiple { items, star } => Self::Multiple {
                items: items.iter().map(|item| f(item)).collect(),
                star,
            },
        }
    }
}

#[derive(Debug, Default)]
struct Fields {
    fields: Vec<String>,
    current: String,
    active: bool,
}

impl Fields {
    fn push_text(&mut self, text: &str) {
        self.current.push_str(text);
        self.active = true;
    }

    fn push_split(&mut self, text: &str) {
        for c in text.chars() {
            if IFS_WHITESPACE.contains(&c) {
                self.break_field();
            } else {
                self.current.push(c);
                self.active = true;
            }
        }
    }

    fn break_field(&mut self) {
        if self.active {
            self.fields.push(mem::take(&mut self.current));
            self.active = false;
        }
    }

    fn finish(mut self) -> Vec<String> {
        self.break_field();
        self.fields
    }
}

fn join_pieces(pieces: Vec<Piece>, quote: impl Fn(&str) -> String) -> String {
    let mut result = String::new();
    for piece in pieces {
        match piece {
            Piece::Text { text, quoted: true, .. } => result.push_str(&quote(&text)),
            Piece::Text { text, .. } => result.push_str(&text),
            Piece::FieldBreak => result.push(' '),
        }
    }
    result
}

fn is_assignable(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// `(start, end)` of `${x:offset:length}` within `len` items.
fn slice_range(len: usize, offset: i64, length: Option<i64>) -> Option<(usize, usize)> {
    let len = i64::try_from(len).ok()?;
    let start = if offset < 0 { len + offset } else { offset };
    if !(0..=len).contains(&start) {
        return None;
    }
    let end = match length {
        None => len,
        Some(length) if length < 0 => len + length,
        Some(length) => start.saturating_add(length).min(len),
    };
    if end < start {
        return None;
    }
    Some((usize::try_from(start).ok()?, usize::try_from(end).ok()?))
}

fn change_case(text: &str, upper: bool, all: bool) -> String {
    let convert = |c: char| -> String {
        if upper {
            c.to_uppercase().collect()
        } else {
            c.to_lowercase().collect()
        }
    };
    if all {
        return text.chars().map(convert).collect();
    }
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => convert(first) + chars.as_str(),
        None => String::new(),
    }
}

impl Interpreter<'_> {
    /// Expand words into fields, splitting unquoted expansion results.
    pub(super) fn expand_words(&mut self, words: &[Word]) -> Result<Vec<String>> {
        let mut result = Vec::new();
        for word in words {
            let mut fields = Fields::default();
            for piece in self.word_pieces(word)? {
                match piece {
                    Piece::Text {
                        text, split: true, ..
                    } => fields.push_split(&text),
                    Piece::Text { text, .. } => fields.push_text(&text),
                    Piece::FieldBreak => fields.break_field(),
                }
            }
            result.extend(fields.finish());
        }
        Ok(result)
    }

    /// Expand a word to a single string without field splitting.
    pub(super) fn expand_string(&mut self, word: &Word) -> Result<String> {
        let pieces = self.word_pieces(word)?;
        Ok(join_pieces(pieces, str::to_string))
    }

    /// Expand a word into a glob pattern in which only unquoted text is
    /// special.
    pub(super) fn expand_pattern(&mut self, word: &Word) -> Result<String> {
        let pieces = self.word_pieces(word)?;
        Ok(join_pieces(pieces, pattern::escape))
    }

    /// Expand the right-hand side of `=~`; quoted text matches literally.
    pub(super) fn expand_regex(&mut self, word: &Word) -> Result<String> {
        let pieces = self.word_pieces(word)?;
        Ok(join_pieces(pieces, regex::escape))
    }

    fn word_pieces(&mut self, word: &Word) -> Result<Vec<Piece>> {
        let mut pieces = Vec::new();
        for part in &word.parts {
            self.part_pieces(part, false, &mut pieces)?;
        }
        Ok(pieces)
    }

    fn part_pieces(&mut self, part: &WordPart, quoted: bool, pieces: &mut Vec<Piece>) -> Result<()> {
        let text = match part {
            WordPart::Literal(text) => {
                pieces.push(Piece::Text {
                    text: text.clone(),
                    quoted,
                    split: false,
                });
                return Ok(());
            }
            WordPart::SingleQuoted(text) => {
                pieces.push(Piece::Text {
                    text: text.clone(),
                    quoted: true,
                    split: false,
                });
                return Ok(());
            }
            WordPart::DoubleQuoted(parts) => {
                if parts.is_empty() {
                    pieces.push(Piece::Text {
                        text: String::new(),
                        quoted: true,
                        split: false,
                    });
                }
                for inner in parts {
                    self.part_pieces(inner, true, pieces)?;
                }
                return Ok(());
            }
            WordPart::Param(expansion) => match self.expand_param(expansion)? {
                ParamValue::Single(text) => text,
                ParamValue::Multiple { items, star } if quoted && star => items.join(" "),
                ParamValue::Multiple { items, .. } => {
                    for (index, item) in items.into_iter().enumerate() {
                        if index > 0 {
                            pieces.push(Piece::FieldBreak);
                        }
                        pieces.push(Piece::Text {
                            text: item,
                            quoted,
                            split: !quoted,
                        });
                    }
                    return Ok(());
                }
            },
            WordPart::CommandSubst(list) => self.command_substitution(list)?,
            WordPart::Arith(word) => {
                let expression = self.expand_string(word)?;
                arith::evaluate(&expression, &mut self.env)?.to_string()
            }
        };
        pieces.push(Piece::Text {
            text,
            quoted,
            split: !quoted,
        });
        Ok(())
    }

    fn lookup(&mut self, name: &str, subscript: Option<&Subscript>) -> Result<Option<ParamValue>> {
        match subscript {
            None => Ok(self.special_or_variable(name)),
            Some(Subscript::All { star }) => Ok(self.env.value(name).map(|value| ParamValue::Multiple {
                items: value.elements(),
                star: *star,
            })),
            Some(Subscript::Index(word)) => {
                let key = self.expand_string(word)?;
                if let Some(Value::Associative(map)) = self.env.value(name) {
                    return Ok(map.get(&key).cloned().map(ParamValue::Single));
                }
                let index = arith::evaluate(&key, &mut self.env)?;
                let Some(items) = self.env.value(name).map(Value::elements) else {
                    return Ok(None);
                };
                let len = i64::try_from(items.len()).unwrap_or(i64::MAX);
                let resolved = if index < 0 { len + index } else { index };
                Ok(usize::try_from(resolved)
                    .ok()
                    .and_then(|i| items.get(i).cloned())
                    .map(ParamValue::Single))
            }
        }
    }

    fn special_or_variable(&self, name: &str) -> Option<ParamValue> {
        let single = |text: String| Some(ParamValue::Single(text));
        match name {
            "@" | "*" => Some(ParamValue::Multiple {
                items: self.positional.clone(),
                star: name == "*",
            }),
            "#" => single(self.positional.len().to_string()),
            "?" => single(self.last_status.to_string()),
            "$" => single(std::process::id().to_string()),
            "-" => single(String::new()),
            "!" => None,
            "0" => single(SHELL_NAME.to_string()),
            _ if name.chars().all(|c| c.is_ascii_digit()) => name
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|i| self.positional.get(i).cloned())
                .map(ParamValue::Single),
            _ => self.env.value(name).map(|value| ParamValue::Single(value.as_scalar())),
        }
    }

    fn expand_param(&mut self, expansion: &ParamExpansion) -> Result<ParamValue> {
        let name = expansion.name.as_str();
        let current = self.lookup(name, expansion.subscript.as_ref())?;
        let empty = || ParamValue::Single(String::new());
        let value = match &expansion.op {
            ParamOp::Plain => current.unwrap_or_else(empty),
            ParamOp::Length => {
                let length = match current {
                    None => 0,
                    Some(ParamValue::Single(text)) => text.chars().count(),
                    Some(ParamValue::Multiple { items, .. }) => items.len(),
                };
                ParamValue::Single(length.to_string())
            }
            ParamOp::Default { colon, word } => match current {
                Some(value) if !(*colon && value.is_null()) => value,
                _ => ParamValue::Single(self.expand_string(word)?),
            },
            ParamOp::Assign { colon, word } => match current {
                Some(value) if !(*colon && value.is_null()) => value,
                _ => {
                    if !is_assignable(name) || expansion.subscript.is_some() {
                        return Err(ShellError::BadSubstitution(name.to_string()).into());
                    }
                    let text = self.expand_string(word)?;
                    self.env.set_scalar(name, text.clone());
                    ParamValue::Single(text)
                }
            },
            ParamOp::Alternate { colon, word } => match current {
                Some(value) if !(*colon && value.is_null()) => {
                    ParamValue::Single(self.expand_string(word)?)
                }
                _ => empty(),
            },
            ParamOp::Error { colon, word } => match current {
                Some(value) if !(*colon && value.is_null()) => value,
                _ => {
                    let mut message = self.expand_string(word)?;
                    if message.is_empty() {
                        message = "parameter null or not set".to_string();
                    }
                    return Err(ShellError::UnsetParameter {
                        name: name.to_string(),
                        message,
                    }
                    .into());
                }
            },
            ParamOp::RemovePrefix { longest, pattern } => {
                let pattern = ShellPattern::new(&self.expand_pattern(pattern)?);
                current
                    .unwrap_or_else(empty)
                    .map(|text| pattern::remove_prefix(text, &pattern, *longest))
            }
            ParamOp::RemoveSuffix { longest, pattern } => {
                let pattern = ShellPattern::new(&self.expand_pattern(pattern)?);
                current
                    .unwrap_or_else(empty)
                    .map(|text| pattern::remove_suffix(text, &pattern, *longest))
            }
            ParamOp::Replace {
                all,
                anchor,
                pattern,
                replacement,
            } => {
                let pattern = ShellPattern::new(&self.expand_pattern(pattern)?);
                let replacement = self.expand_string(replacement)?;
                let mode = match anchor {
                    Some(Anchor::Start) => ReplaceMode::Prefix,
                    Some(Anchor::End) => ReplaceMode::Suffix,
                    None if *all => ReplaceMode::All,
                    None => ReplaceMode::First,
                };
                current
                    .unwrap_or_else(empty)
                    .map(|text| pattern::replace(text, &pattern, &replacement, mode))
            }
            ParamOp::Substring { offset, length } => {
                let offset_text = self.expand_string(offset)?;
                let offset = arith::evaluate(&offset_text, &mut self.env)?;
                let length = match length {
                    Some(word) => {
                        let text = self.expand_string(word)?;
                        Some(arith::evaluate(&text, &mut self.env)?)
                    }
                    None => None,
                };
                match current.unwrap_or_else(empty) {
                    ParamValue::Single(text) => {
                        let chars: Vec<char> = text.chars().collect();
                        let sliced = slice_range(chars.len(), offset, length)
                            .map(|(start, end)| chars[start..end].iter().collect())
                            .unwrap_or_default();
                        ParamValue::Single(sliced)
                    }
                    ParamValue::Multiple { items, star } => {
                        let items = slice_range(items.len(), offset, length)
                            .map(|(start, end)| items[start..end].to_vec())
                            .unwrap_or_default();
                        ParamValue::Multiple { items, star }
                    }
                }
            }
            ParamOp::Case { upper, all } => current
                .unwrap_or_else(empty)
                .map(|text| change_case(text, *upper, *all)),
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::super::{
        CommandCall, Environment, FileHandle, Hooks, Interpreter, OpenMode, parse,
    };
    use super::*;

    /// Hooks that record argument vectors of external calls.
    #[derive(Default)]
    struct ArgRecorder(Vec<Vec<String>>);

    impl Hooks for ArgRecorder {
        fn exec(&mut self, call: CommandCall<'_>) -> Result<i32> {
            self.0.push(call.args.to_vec());
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

    fn evaluate(source: &str) -> (Environment, Vec<Vec<String>>) {
        let mut hooks = ArgRecorder::default();
        let script = parse(source).unwrap();
        let env = Interpreter::new(&mut hooks).run(&script).unwrap();
        (env, hooks.0)
    }

    #[test]
    fn test_field_splitting() {
        let (_, calls) = evaluate(
            r#"
list="a  b
c"
empty=
cmd $list "$list" $empty "" x${list}y
"#,
        );
        assert_eq!(
            calls[0],
            vec!["cmd", "a", "b", "c", "a  b\nc", "", "xa", "b", "cy"]
        );
    }

    #[test]
    fn test_positional_and_arrays() {
        let (_, calls) = evaluate(
            r#"
set -- one "two three"
arr=(x "y z")
cmd "$@" $# "${arr[@]}" ${#arr[@]} "${arr[*]}"
none=()
cmd2 "${none[@]}"
"#,
        );
        assert_eq!(
            calls[0],
            vec!["cmd", "one", "two three", "2", "x", "y z", "2", "x y z"]
        );
        assert_eq!(calls[1], vec!["cmd2"]);
    }

    #[test]
    fn test_parameter_operators() {
        let (env, _) = evaluate(
            r#"
v=foo-1.2.3_4
a=${v#*-}
b=${v##*.}
c=${v%%-*}
d=${v/./:}
e=${v//./:}
f=${v:4:3}
g=${v: -3}
h=${#v}
i=${unset_var:=assigned}
j=${v:+set}
k=${v^^}
l=${v^}
"#,
        );
        let get = |name: &str| env.scalar(name).unwrap_or_default().to_string();
        assert_eq!(get("a"), "1.2.3_4");
        assert_eq!(get("b"), "3_4");
        assert_eq!(get("c"), "foo");
        assert_eq!(get("d"), "foo-1:2.3_4");
        assert_eq!(get("e"), "foo-1:2:3_4");
        assert_eq!(get("f"), "1.2");
        assert_eq!(get("g"), "3_4");
        assert_eq!(get("h"), "11");
        assert_eq!(get("i"), "assigned");
        assert_eq!(get("unset_var"), "assigned");
        assert_eq!(get("j"), "set");
        assert_eq!(get("k"), "FOO-1.2.3_4");
        assert_eq!(get("l"), "Foo-1.2.3_4");
    }

    #[test]
    fn test_quoted_pattern_is_literal() {
        let (env, _) = evaluate("v='a*b'\nx=${v%\"*b\"}\ny=${v%%*b}\nz=${v%*b}\n");
        assert_eq!(env.scalar("x"), Some("a"));
        assert_eq!(env.scalar("y"), Some(""));
        assert_eq!(env.scalar("z"), Some("a*"));
    }

    #[test]
    fn test_unset_parameter_error() {
        let mut hooks = ArgRecorder::default();
        let script = parse("x=${missing:?needs a value}\n").unwrap();
        let err = Interpreter::new(&mut hooks).run(&script).unwrap_err();
        assert_eq!(err.to_string(), "missing: needs a value");
    }

    #[test]
    fn test_arithmetic_expansion() {
        let (env, _) = evaluate("n=3\nm=$(( n * 2 + ${n} ))\n");
        assert_eq!(env.scalar("m"), Some("9"));
    }
}
