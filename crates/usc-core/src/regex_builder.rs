//! Regex source builder
//!
//! Patterns are assembled from parts: raw regex source is copied verbatim,
//! literals are escaped, and alternations are rendered as non-capturing groups.

use std::borrow::Cow;
use std::collections::HashSet;

/// One piece of a regex source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part<'a> {
    /// Regex source inserted as is.
    Raw(Cow<'a, str>),
    /// Text matched literally.
    Literal(Cow<'a, str>),
    /// Alternatives tried longest first, so a short branch never shadows a longer one.
    Alternation(Vec<Part<'a>>),
    /// Alternatives tried shortest first.
    LazyAlternation(Vec<Part<'a>>),
}

impl<'a> Part<'a> {
    pub fn raw(source: impl Into<Cow<'a, str>>) -> Self {
        Self::Raw(source.into())
    }

    pub fn literal(text: impl Into<Cow<'a, str>>) -> Self {
        Self::Literal(text.into())
    }

    fn render_into(&self, out: &mut String) {
        match self {
            Self::Raw(source) => out.push_str(source),
            Self::Literal(text) => out.push_str(&regex::escape(text)),
            Self::Alternation(items) => render_alternation(items, false, out),
            Self::LazyAlternation(items) => render_alternation(items, true, out),
        }
    }
}

/// Concatenate parts into a regex source.
pub fn build_pattern(parts: &[Part<'_>]) -> String {
    let mut source = String::new();
    for part in parts {
        part.render_into(&mut source);
    }
    source
}

fn render_alternation(items: &[Part<'_>], lazy: bool, out: &mut String) {
    let mut seen = HashSet::new();
    let mut branches: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        let mut branch = String::new();
        item.render_into(&mut branch);
        if seen.insert(branch.clone()) {
            branches.push(branch);
        }
    }

    // Stable sort keeps the caller's order among equal lengths.
    if lazy {
        branches.sort_by_key(|b| regex_length(b));
    } else {
        branches.sort_by(|a, b| regex_length(b).cmp(&regex_length(a)));
    }

    out.push_str("(?:");
    out.push_str(&branches.join("|"));
    out.push(')');
}

/// Length of a regex source where every escape sequence counts as one character.
pub fn regex_length(source: &str) -> usize {
    let chars: Vec<char> = source.chars().collect();
    let mut len = 0;
    let mut i = 0;

    while i < chars.len() {
        if chars[i] != '\\' || i + 1 >= chars.len() {
            len += 1;
            i += 1;
            continue;
        }
        i += 1 + escape_width(&chars[i + 1..]);
        len += 1;
    }

    len
}

/// Number of characters after the backslash that belong to one escape.
fn escape_width(rest: &[char]) -> usize {
    let is_hex = |c: &char| c.is_ascii_hexdigit();

    // \p{...}, \x{...}, \u{...}
    if rest.len() >= 3 && (rest[0].is_alphanumeric() || rest[0] == '_') && rest[1] == '{' {
        if let Some(close) = rest[2..].iter().position(|&c| c == '}') {
            if close > 0 {
                return close + 3;
            }
        }
    }
    if rest.len() >= 5 && rest[0].eq_ignore_ascii_case(&'u') && rest[1..5].iter().all(is_hex) {
        return 5;
    }
    if rest.len() >= 3 && rest[0].eq_ignore_ascii_case(&'x') && rest[1..3].iter().all(is_hex) {
        return 3;
    }
    if rest.len() >= 3 && rest[..3].iter().all(|c| ('0'..='8').contains(c)) {
        return 3;
    }
    if rest.len() >= 2 && rest[0].eq_ignore_ascii_case(&'c') && rest[1].is_ascii_alphabetic() {
        return 2;
    }
    1
}
