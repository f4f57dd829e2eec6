//! CSS selector subset.
//!
//! Supported: type and `*` selectors, `#id`, `.class`, `[attr]`,
//! `[attr=value]` (bare or quoted), descendant and `>` combinators, and
//! comma-separated groups.

use std::iter::Peekable;
use std::str::Chars;

use super::{Document, DomError, NodeId, Tree};

#[derive(Debug, Clone, PartialEq, Eq)]
enum AttrCondition {
    Exists(String),
    Equals(String, String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<AttrCondition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Part {
    compound: Compound,
    // Relation to the part on the left.
    combinator: Combinator,
}

/// A parsed selector list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    groups: Vec<Vec<Part>>,
}

impl Selector {
    pub fn parse(source: &str) -> Result<Self, DomError> {
        let invalid = || DomError::InvalidSelector(source.to_string());

        let groups = split_groups(source)
            .ok_or_else(invalid)?
            .into_iter()
            .map(|group| parse_chain(group).ok_or_else(invalid))
            .collect::<Result<Vec<_>, _>>()?;

        if groups.is_empty() {
            return Err(invalid());
        }
        Ok(Self { groups })
    }

    fn matches(&self, tree: &Tree, node: NodeId) -> bool {
        tree.element(node).is_some() && self.groups.iter().any(|parts| matches_chain(tree, node, parts))
    }
}

fn split_groups(source: &str) -> Option<Vec<&str>> {
    let mut groups = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (i, c) in source.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => depth = depth.checked_sub(1)?,
            (None, ',') if depth == 0 => {
                groups.push(&source[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if quote.is_some() || depth != 0 {
        return None;
    }
    groups.push(&source[start..]);
    Some(groups)
}

fn parse_chain(group: &str) -> Option<Vec<Part>> {
    let mut chars = group.trim().chars().peekable();
    let mut parts = Vec::new();
    let mut combinator = Combinator::Descendant;
    let mut dangling = false;

    loop {
        skip_whitespace(&mut chars);
        match chars.peek() {
            None => break,
            Some('>') => {
                if parts.is_empty() || dangling {
                    return None;
                }
                chars.next();
                combinator = Combinator::Child;
                dangling = true;
                continue;
            }
            Some(_) => {}
        }

        let compound = parse_compound(&mut chars)?;
        parts.push(Part { compound, combinator });
        combinator = Combinator::Descendant;
        dangling = false;
    }

    (!parts.is_empty() && !dangling).then_some(parts)
}

fn parse_compound(chars: &mut Peekable<Chars<'_>>) -> Option<Compound> {
    let mut compound = Compound::default();
    let mut any = false;

    match chars.peek() {
        Some('*') => {
            chars.next();
            any = true;
        }
        Some(c) if is_ident_char(*c) => {
            compound.tag = Some(parse_ident(chars)?.to_ascii_lowercase());
            any = true;
        }
        _ => {}
    }

    loop {
        match chars.peek() {
            Some('#') => {
                chars.next();
                compound.id = Some(parse_ident(chars)?);
            }
            Some('.') => {
                chars.next();
                compound.classes.push(parse_ident(chars)?);
            }
            Some('[') => {
                chars.next();
                compound.attrs.push(parse_attr(chars)?);
            }
            Some(c) if c.is_whitespace() || *c == '>' => break,
            Some(_) => return None,
            None => break,
        }
        any = true;
    }

    any.then_some(compound)
}

fn parse_attr(chars: &mut Peekable<Chars<'_>>) -> Option<AttrCondition> {
    skip_whitespace(chars);
    let name = parse_ident(chars)?.to_ascii_lowercase();
    skip_whitespace(chars);

    match chars.next()? {
        ']' => Some(AttrCondition::Exists(name)),
        '=' => {
            skip_whitespace(chars);
            let value = match chars.peek()? {
                '"' | '\'' => {
                    let quote = chars.next()?;
                    let mut value = String::new();
                    loop {
                        match chars.next()? {
                            c if c == quote => break,
                            c => value.push(c),
                        }
                    }
                    value
                }
                _ => parse_ident(chars)?,
            };
            skip_whitespace(chars);
            (chars.next()? == ']').then_some(AttrCondition::Equals(name, value))
        }
        _ => None,
    }
}

fn parse_ident(chars: &mut Peekable<Chars<'_>>) -> Option<String> {
    let mut ident = String::new();
    while let Some(c) = chars.peek() {
        if !is_ident_char(*c) {
            break;
        }
        ident.push(*c);
        chars.next();
    }
    (!ident.is_empty()).then_some(ident)
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_' || (!c.is_ascii() && !c.is_whitespace())
}

fn skip_whitespace(chars: &mut Peekable<Chars<'_>>) {
    while chars.peek().is_some_and(|c| c.is_whitespace()) {
        chars.next();
    }
}

fn matches_chain(tree: &Tree, node: NodeId, parts: &[Part]) -> bool {
    let Some((last, rest)) = parts.split_last() else {
        return true;
    };
    if !matches_compound(tree, node, &last.compound) {
        return false;
    }
    if rest.is_empty() {
        return true;
    }

    match last.combinator {
        Combinator::Child => tree
            .parent_element(node)
            .is_some_and(|parent| matches_chain(tree, parent, rest)),
        Combinator::Descendant => {
            let mut cursor = tree.parent_element(node);
            while let Some(ancestor) = cursor {
                if matches_chain(tree, ancestor, rest) {
                    return true;
                }
                cursor = tree.parent_element(ancestor);
            }
            false
        }
    }
}

fn matches_compound(tree: &Tree, node: NodeId, compound: &Compound) -> bool {
    let Some(element) = tree.element(node) else {
        return false;
    };
    let attr = |name: &str| element.attrs.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str());

    if compound.tag.as_ref().is_some_and(|tag| *tag != element.tag_name) {
        return false;
    }
    if compound.id.as_ref().is_some_and(|id| attr("id") != Some(id.as_str())) {
        return false;
    }
    if !compound.classes.is_empty() {
        let classes: Vec<&str> = attr("class").unwrap_or("").split_whitespace().collect();
        if !compound.classes.iter().all(|c| classes.contains(&c.as_str())) {
            return false;
        }
    }
    compound.attrs.iter().all(|condition| match condition {
        AttrCondition::Exists(name) => attr(name).is_some() || (name == "style" && !element.style.is_empty()),
        AttrCondition::Equals(name, value) => attr(name) == Some(value.as_str()),
    })
}

impl Document {
    /// First element below `scope` matching `selector`, in tree order.
    pub fn query_selector(&self, scope: NodeId, selector: &str) -> Result<Option<NodeId>, DomError> {
        let selector = Selector::parse(selector)?;
        let tree = self.inner.tree.borrow();
        let found = tree
            .descendant_elements(scope)
            .into_iter()
            .find(|node| selector.matches(&tree, *node));
        Ok(found)
    }

    pub fn query_selector_all(&self, scope: NodeId, selector: &str) -> Result<Vec<NodeId>, DomError> {
        let selector = Selector::parse(selector)?;
        let tree = self.inner.tree.borrow();
        let found = tree
            .descendant_elements(scope)
            .into_iter()
            .filter(|node| selector.matches(&tree, *node))
            .collect();
        Ok(found)
    }

    /// Whether `node` is an element matching `selector`.
    pub fn matches(&self, node: NodeId, selector: &str) -> Result<bool, DomError> {
        let selector = Selector::parse(selector)?;
        Ok(self.matches_selector(node, &selector))
    }

    /// [`Document::matches`] with an already parsed selector.
    pub fn matches_selector(&self, node: NodeId, selector: &Selector) -> bool {
        selector.matches(&self.inner.tree.borrow(), node)
    }
}
