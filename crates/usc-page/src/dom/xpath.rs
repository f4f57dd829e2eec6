//! Absolute XPath location paths, enough for anchor lookup.
//!
//! ```text
//! /html/body/div[2]
//! //div[@class='view-right']/span
//! //*[@id="player"]
//! ```

use std::collections::HashMap;

use super::{Document, DomError, NodeId, Tree, ROOT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Predicate {
    Position(usize),
    AttrExists(String),
    AttrEquals(String, String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    axis: Axis,
    // `None` is `*`.
    name: Option<String>,
    predicates: Vec<Predicate>,
}

fn parse(expr: &str) -> Option<Vec<Step>> {
    let mut rest = expr.trim();
    let mut steps = Vec::new();

    while !rest.is_empty() {
        let axis = if let Some(r) = rest.strip_prefix("//") {
            rest = r;
            Axis::Descendant
        } else if let Some(r) = rest.strip_prefix('/') {
            rest = r;
            Axis::Child
        } else {
            return None;
        };

        let name_end = rest.find(['/', '[']).unwrap_or(rest.len());
        let name = rest[..name_end].trim();
        rest = &rest[name_end..];
        let name = match name {
            "*" => None,
            n if !n.is_empty() && n.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_') => {
                Some(n.to_ascii_lowercase())
            }
            _ => return None,
        };

        let mut predicates = Vec::new();
        while let Some(r) = rest.strip_prefix('[') {
            let close = r.find(']')?;
            predicates.push(parse_predicate(r[..close].trim())?);
            rest = &r[close + 1..];
        }

        steps.push(Step { axis, name, predicates });
    }

    (!steps.is_empty()).then_some(steps)
}

fn parse_predicate(source: &str) -> Option<Predicate> {
    if let Ok(position) = source.parse::<usize>() {
        return (position > 0).then_some(Predicate::Position(position));
    }

    let attr = source.strip_prefix('@')?;
    match attr.split_once('=') {
        None => Some(Predicate::AttrExists(attr.trim().to_ascii_lowercase())),
        Some((name, value)) => {
            let value = value.trim();
            let unquoted = value
                .strip_prefix('\'')
                .and_then(|v| v.strip_suffix('\''))
                .or_else(|| value.strip_prefix('"').and_then(|v| v.strip_suffix('"')))?;
            Some(Predicate::AttrEquals(name.trim().to_ascii_lowercase(), unquoted.to_string()))
        }
    }
}

fn step_candidates(tree: &Tree, parent: NodeId, step: &Step) -> Vec<NodeId> {
    let mut candidates: Vec<NodeId> = tree
        .element_children(parent)
        .filter(|c| {
            step.name
                .as_ref()
                .map_or(true, |name| tree.element(*c).is_some_and(|e| e.tag_name == *name))
        })
        .collect();

    for predicate in &step.predicates {
        candidates = match predicate {
            Predicate::Position(position) => candidates.get(position - 1).copied().into_iter().collect(),
            Predicate::AttrExists(name) => candidates
                .into_iter()
                .filter(|c| tree.element(*c).is_some_and(|e| e.attrs.iter().any(|(k, _)| k == name)))
                .collect(),
            Predicate::AttrEquals(name, value) => candidates
                .into_iter()
                .filter(|c| {
                    tree.element(*c)
                        .is_some_and(|e| e.attrs.iter().any(|(k, v)| k == name && v == value))
                })
                .collect(),
        };
    }
    candidates
}

fn evaluate(tree: &Tree, steps: &[Step]) -> Vec<NodeId> {
    let mut contexts = vec![ROOT];

    for step in steps {
        let mut next = Vec::new();
        for context in &contexts {
            let parents = match step.axis {
                Axis::Child => vec![*context],
                Axis::Descendant => {
                    let mut parents = vec![*context];
                    parents.extend(tree.descendant_elements(*context));
                    parents
                }
            };
            for parent in parents {
                for candidate in step_candidates(tree, parent, step) {
                    if !next.contains(&candidate) {
                        next.push(candidate);
                    }
                }
            }
        }
        contexts = next;
    }

    contexts
}

impl Document {
    /// First node in document order selected by an absolute location path.
    pub fn evaluate_xpath(&self, expr: &str) -> Result<Option<NodeId>, DomError> {
        let steps = parse(expr).ok_or_else(|| DomError::InvalidXPath(expr.to_string()))?;
        let tree = self.inner.tree.borrow();
        let selected = evaluate(&tree, &steps);
        if selected.len() <= 1 {
            return Ok(selected.first().copied());
        }

        let order: HashMap<NodeId, usize> = tree
            .descendant_elements(ROOT)
            .into_iter()
            .enumerate()
            .map(|(i, node)| (node, i))
            .collect();
        let first = selected.into_iter().min_by_key(|node| order.get(node).copied().unwrap_or(usize::MAX));
        Ok(first)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (Document, Vec<NodeId>) {
        let doc = Document::new();
        let body = doc.body().unwrap();
        let mut divs = Vec::new();
        for i in 0..3 {
            let div = doc.create_element("div");
            doc.set_attribute(div, "data-i", &i.to_string()).unwrap();
            doc.append_child(body, div).unwrap();
            divs.push(div);
        }
        let span = doc.create_element("span");
        doc.set_attribute(span, "class", "title").unwrap();
        doc.append_child(divs[1], span).unwrap();
        divs.push(span);
        (doc, divs)
    }

    #[test]
    fn test_absolute_paths() {
        let (doc, nodes) = fixture();
        assert_eq!(doc.evaluate_xpath("/html/body/div[2]").unwrap(), Some(nodes[1]));
        assert_eq!(doc.evaluate_xpath("/html/body/div").unwrap(), Some(nodes[0]));
        assert_eq!(doc.evaluate_xpath("/html/body/div[9]").unwrap(), None);
        assert_eq!(doc.evaluate_xpath("/html/body/*[3]").unwrap(), Some(nodes[2]));
    }

    #[test]
    fn test_descendant_and_attributes() {
        let (doc, nodes) = fixture();
        assert_eq!(doc.evaluate_xpath("//span").unwrap(), Some(nodes[3]));
        assert_eq!(doc.evaluate_xpath("//div[@data-i='2']").unwrap(), Some(nodes[2]));
        assert_eq!(doc.evaluate_xpath("//*[@class=\"title\"]").unwrap(), Some(nodes[3]));
        assert_eq!(doc.evaluate_xpath("//div[@data-i]/span").unwrap(), Some(nodes[3]));
        assert_eq!(doc.evaluate_xpath("//body/div[@data-i='1'][1]").unwrap(), Some(nodes[1]));
    }

    #[test]
    fn test_invalid_expressions() {
        let (doc, _) = fixture();
        for expr in ["div", "/html/", "//div[", "/html/body[@x=y]", "/a b"] {
            assert!(matches!(doc.evaluate_xpath(expr), Err(DomError::InvalidXPath(_))), "{expr}");
        }
    }
}
