//! Shell pattern matching for `case`, `[[ == ]]` and the `${var#pat}`
//! family of expansions.
//!
//! Patterns arrive with their quoted portions already escaped by
//! [`escape`], so only unquoted `*`, `?` and `[...]` are special.

use glob::{MatchOptions, Pattern};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Escape text so it matches itself literally.
pub fn escape(text: &str) -> String {
    Pattern::escape(text)
}

/// A compiled shell pattern.
#[derive(Debug, Clone)]
pub struct ShellPattern {
    compiled: Option<Pattern>,
    source: String,
}

impl ShellPattern {
    pub fn new(source: &str) -> Self {
        // bash accepts `[^...]` as a synonym for `[!...]`.
        let normalized = source.replace("[^", "[!");
        let compiled = Pattern::new(&normalized).ok();
        if compiled.is_none() {
            tracing::trace!("Treating malformed pattern {source:?} literally");
        }
        Self {
            compiled,
            source: source.to_string(),
        }
    }

    pub fn matches(&self, text: &str) -> bool {
        match &self.compiled {
            Some(pattern) => pattern.matches_with(text, MATCH_OPTIONS),
            None => self.source == text,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }
}

fn boundaries(text: &str) -> Vec<usize> {
    text.char_indices().map(|(i, _)| i).chain(std::iter::once(text.len())).collect()
}

/// `${var#pat}` and `${var##pat}`.
pub fn remove_prefix(text: &str, pattern: &ShellPattern, longest: bool) -> String {
    let mut cuts = boundaries(text);
    if longest {
        cuts.reverse();
    }
    cuts.into_iter()
        .find(|&i| pattern.matches(&text[..i]))
        .map_or_else(|| text.to_string(), |i| text[i..].to_string())
}

/// `${var%pat}` and `${var%%pat}`.
pub fn remove_suffix(text: &str, pattern: &ShellPattern, longest: bool) -> String {
    let mut cuts = boundaries(text);
    if !longest {
        cuts.reverse();
    }
    cuts.into_iter()
        .find(|&i| pattern.matches(&text[i..]))
        .map_or_else(|| text.to_string(), |i| text[..i].to_string())
}

/// Where a replacement pattern must match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceMode {
    First,
    All,
    Prefix,
    Suffix,
}

/// `${var/pat/rep}` and its variants. Matches are longest-first and never
/// empty.
pub fn replace(text: &str, pattern: &ShellPattern, replacement: &str, mode: ReplaceMode) -> String {
    if pattern.is_empty() {
        return text.to_string();
    }
    let cuts = boundaries(text);
    match mode {
        ReplaceMode::Prefix => {
            for &end in cuts.iter().rev().filter(|&&end| end > 0) {
                if pattern.matches(&text[..end]) {
                    return format!("{replacement}{}", &text[end..]);
                }
            }
            text.to_string()
        }
        ReplaceMode::Suffix => {
            for &start in cuts.iter().filter(|&&start| start < text.len()) {
                if pattern.matches(&text[start..]) {
                    return format!("{}{replacement}", &text[..start]);
                }
            }
            text.to_string()
        }
        ReplaceMode::First | ReplaceMode::All => {
            let mut result = String::new();
            let mut index = 0;
            while index < cuts.len() {
                let start = cuts[index];
                let found = cuts[index + 1..]
                    .iter()
                    .rposition(|&end| pattern.matches(&text[start..end]))
                    .map(|offset| index + 1 + offset);
                match found {
                    Some(end_index) => {
                        result.push_str(replacement);
                        index = end_index;
                        if mode == ReplaceMode::First {
                            result.push_str(&text[cuts[index]..]);
                            return result;
                        }
                    }
                    None => {
                        if start < text.len() {
                            let next = cuts[index + 1];
                            result.push_str(&text[start..next]);
                        }
                        index += 1;
                    }
                }
            }
            result
        }
    }
}
