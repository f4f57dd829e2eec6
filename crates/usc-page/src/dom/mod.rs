//! In-memory page model.
//!
//! A [`Document`] is a cloneable handle onto an arena of nodes addressed by
//! [`NodeId`]. Detached nodes stay in the arena and can be re-inserted.
//! Tree mutations are recorded for [`MutationObserver`]s and delivered at
//! [`Document::flush_mutations`], the model's microtask checkpoint.

mod events;
mod mutation;
mod selector;
mod xpath;

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

pub use events::{Event, ListenerId};
pub use mutation::{MutationKind, MutationObserver, MutationRecord, ObserveOptions};
pub use selector::Selector;

/// Error type for page model operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomError {
    #[error("Node {0:?} does not exist in this document")]
    UnknownNode(NodeId),
    #[error("Node {0:?} is not an element")]
    NotAnElement(NodeId),
    #[error("Node {node:?} cannot be inserted into {parent:?}")]
    HierarchyRequest { parent: NodeId, node: NodeId },
    #[error("Node {child:?} is not a child of {parent:?}")]
    NotAChild { parent: NodeId, child: NodeId },
    #[error("Element {0:?} already hosts a shadow root")]
    ShadowAlreadyAttached(NodeId),
    #[error("Invalid selector \"{0}\"")]
    InvalidSelector(String),
    #[error("Invalid XPath expression \"{0}\"")]
    InvalidXPath(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ShadowRootMode {
    Open,
    #[default]
    Closed,
}

impl ShadowRootMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShadowRootMode::Open => "open",
            ShadowRootMode::Closed => "closed",
        }
    }
}

// =============================================================================
// Arena
// =============================================================================

#[derive(Debug, Clone)]
enum NodeKind {
    Document,
    Element(ElementData),
    Text(String),
    ShadowRoot { host: NodeId, mode: ShadowRootMode },
}

#[derive(Debug, Clone, Default)]
struct ElementData {
    tag_name: String,
    attrs: Vec<(String, String)>,
    style: Vec<(String, String)>,
    shadow_root: Option<NodeId>,
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    kind: NodeKind,
}

#[derive(Debug)]
struct Tree {
    nodes: Vec<Node>,
}

const ROOT: NodeId = NodeId(0);

impl Tree {
    fn push(&mut self, parent: Option<NodeId>, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            parent,
            children: Vec::new(),
            kind,
        });
        if let Some(parent) = parent {
            self.nodes[parent.0].children.push(id);
        }
        id
    }

    fn node(&self, id: NodeId) -> Result<&Node, DomError> {
        self.nodes.get(id.0).ok_or(DomError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, DomError> {
        self.nodes.get_mut(id.0).ok_or(DomError::UnknownNode(id))
    }

    fn element(&self, id: NodeId) -> Option<&ElementData> {
        match &self.nodes.get(id.0)?.kind {
            NodeKind::Element(element) => Some(element),
            _ => None,
        }
    }

    fn element_mut(&mut self, id: NodeId) -> Result<&mut ElementData, DomError> {
        match &mut self.node_mut(id)?.kind {
            NodeKind::Element(element) => Ok(element),
            _ => Err(DomError::NotAnElement(id)),
        }
    }

    fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.0)?.parent
    }

    fn parent_element(&self, id: NodeId) -> Option<NodeId> {
        self.parent(id).filter(|parent| self.element(*parent).is_some())
    }

    fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes.get(id.0).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    fn element_children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.children(id).iter().copied().filter(|c| self.element(*c).is_some())
    }

    /// Parent, or the host when `id` is a shadow root.
    fn composed_parent(&self, id: NodeId) -> Option<NodeId> {
        let node = self.nodes.get(id.0)?;
        match node.kind {
            NodeKind::ShadowRoot { host, .. } => Some(host),
            _ => node.parent,
        }
    }

    /// Whether `ancestor` is `node` or above it, without crossing shadow boundaries.
    fn is_inclusive_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut cursor = Some(node);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.parent(current);
        }
        false
    }

    fn is_connected(&self, id: NodeId) -> bool {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if current == ROOT {
                return true;
            }
            cursor = self.composed_parent(current);
        }
        false
    }

    /// Elements below `scope` in tree order, not entering shadow trees.
    fn descendant_elements(&self, scope: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(scope).iter().rev().copied().collect();
        while let Some(node) = stack.pop() {
            if self.element(node).is_some() {
                out.push(node);
            }
            stack.extend(self.children(node).iter().rev().copied());
        }
        out
    }

    fn check_insert(&self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        let parent_node = self.node(parent)?;
        let child_node = self.node(child)?;
        let parent_ok = !matches!(parent_node.kind, NodeKind::Text(_));
        let child_ok = matches!(child_node.kind, NodeKind::Element(_) | NodeKind::Text(_));

        let mut cursor = Some(parent);
        while let Some(current) = cursor {
            if current == child {
                return Err(DomError::HierarchyRequest { parent, node: child });
            }
            cursor = self.composed_parent(current);
        }

        if parent_ok && child_ok {
            Ok(())
        } else {
            Err(DomError::HierarchyRequest { parent, node: child })
        }
    }

    fn detach(&mut self, child: NodeId) -> Option<NodeId> {
        let parent = self.nodes.get(child.0)?.parent?;
        self.nodes[parent.0].children.retain(|c| *c != child);
        self.nodes[child.0].parent = None;
        Some(parent)
    }

    fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let siblings = self.children(parent);
        let index = siblings.iter().position(|c| *c == id)?;
        siblings.get(index + 1).copied()
    }

    fn text_content(&self, id: NodeId, out: &mut String) {
        match self.nodes.get(id.0).map(|n| &n.kind) {
            Some(NodeKind::Text(text)) => out.push_str(text),
            Some(_) => {
                for child in self.children(id) {
                    self.text_content(*child, out);
                }
            }
            None => {}
        }
    }
}

// =============================================================================
// Document
// =============================================================================

struct Inner {
    id: usize,
    tree: RefCell<Tree>,
    mutations: RefCell<mutation::Registry>,
    listeners: RefCell<events::Registry>,
    flushing: Cell<bool>,
}

thread_local! {
    static NEXT_DOCUMENT_ID: Cell<usize> = const { Cell::new(1) };
}

/// Shared handle to an in-memory document.
#[derive(Clone)]
pub struct Document {
    inner: Rc<Inner>,
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("id", &self.inner.id)
            .field("nodes", &self.inner.tree.borrow().nodes.len())
            .finish()
    }
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Document {}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// A document holding `<html><head></head><body></body></html>`.
    pub fn new() -> Self {
        let mut tree = Tree { nodes: Vec::new() };
        let root = tree.push(None, NodeKind::Document);
        let html = tree.push(Some(root), element_kind("html"));
        tree.push(Some(html), element_kind("head"));
        tree.push(Some(html), element_kind("body"));

        let id = NEXT_DOCUMENT_ID.with(|next| next.replace(next.get() + 1));
        Self {
            inner: Rc::new(Inner {
                id,
                tree: RefCell::new(tree),
                mutations: RefCell::new(mutation::Registry::default()),
                listeners: RefCell::new(events::Registry::default()),
                flushing: Cell::new(false),
            }),
        }
    }

    /// Process-unique document identity.
    pub fn id(&self) -> usize {
        self.inner.id
    }

    /// The document node itself.
    pub fn root(&self) -> NodeId {
        ROOT
    }

    pub fn document_element(&self) -> Option<NodeId> {
        self.inner.tree.borrow().element_children(ROOT).next()
    }

    pub fn head(&self) -> Option<NodeId> {
        self.html_child("head")
    }

    pub fn body(&self) -> Option<NodeId> {
        self.html_child("body")
    }

    fn html_child(&self, tag: &str) -> Option<NodeId> {
        let html = self.document_element()?;
        let tree = self.inner.tree.borrow();
        let found = tree
            .element_children(html)
            .find(|c| tree.element(*c).is_some_and(|e| e.tag_name == tag));
        found
    }

    pub fn create_element(&self, tag_name: &str) -> NodeId {
        self.inner.tree.borrow_mut().push(None, element_kind(tag_name))
    }

    pub fn create_text_node(&self, text: &str) -> NodeId {
        self.inner.tree.borrow_mut().push(None, NodeKind::Text(text.to_string()))
    }

    /// Lowercase tag name, `None` for non-elements.
    pub fn tag_name(&self, node: NodeId) -> Option<String> {
        self.inner.tree.borrow().element(node).map(|e| e.tag_name.clone())
    }

    pub fn is_element(&self, node: NodeId) -> bool {
        self.inner.tree.borrow().element(node).is_some()
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.inner.tree.borrow().parent(node)
    }

    pub fn parent_element(&self, node: NodeId) -> Option<NodeId> {
        self.inner.tree.borrow().parent_element(node)
    }

    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.inner.tree.borrow().children(node).to_vec()
    }

    pub fn first_child(&self, node: NodeId) -> Option<NodeId> {
        self.inner.tree.borrow().children(node).first().copied()
    }

    pub fn last_child(&self, node: NodeId) -> Option<NodeId> {
        self.inner.tree.borrow().children(node).last().copied()
    }

    pub fn next_element_sibling(&self, node: NodeId) -> Option<NodeId> {
        let tree = self.inner.tree.borrow();
        let mut cursor = tree.next_sibling(node);
        while let Some(sibling) = cursor {
            if tree.element(sibling).is_some() {
                return Some(sibling);
            }
            cursor = tree.next_sibling(sibling);
        }
        None
    }

    /// Attached to the document, looking through shadow hosts.
    pub fn is_connected(&self, node: NodeId) -> bool {
        self.inner.tree.borrow().is_connected(node)
    }

    /// Inclusive containment within one tree.
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        self.inner.tree.borrow().is_inclusive_ancestor(ancestor, node)
    }

    pub fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.inner.tree.borrow().text_content(node, &mut out);
        out
    }

    /// Replace all children of `node` with a single text node.
    pub fn set_text_content(&self, node: NodeId, text: &str) -> Result<(), DomError> {
        let record = {
            let mut tree = self.inner.tree.borrow_mut();
            if let NodeKind::Text(content) = &mut tree.node_mut(node)?.kind {
                *content = text.to_string();
                return Ok(());
            }

            let removed = std::mem::take(&mut tree.node_mut(node)?.children);
            for child in &removed {
                tree.nodes[child.0].parent = None;
            }
            let added = if text.is_empty() {
                Vec::new()
            } else {
                vec![tree.push(Some(node), NodeKind::Text(text.to_string()))]
            };
            (!removed.is_empty() || !added.is_empty()).then(|| MutationRecord::child_list(node, added, removed))
        };

        if let Some(record) = record {
            self.queue(vec![record]);
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Tree mutation
    // -------------------------------------------------------------------------

    pub fn append_child(&self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        self.insert_before(parent, child, None)
    }

    pub fn prepend(&self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        let first = self.first_child(parent);
        self.insert_before(parent, child, first)
    }

    /// Insert `child` before `reference`, or last when `reference` is `None`.
    ///
    /// A child already in a tree is moved, producing a removal record on its
    /// old parent.
    pub fn insert_before(&self, parent: NodeId, child: NodeId, reference: Option<NodeId>) -> Result<(), DomError> {
        let mut records = Vec::new();
        {
            let mut tree = self.inner.tree.borrow_mut();
            tree.check_insert(parent, child)?;

            let mut reference = reference;
            if let Some(r) = reference {
                if tree.node(r)?.parent != Some(parent) {
                    return Err(DomError::NotAChild { parent, child: r });
                }
                if r == child {
                    reference = tree.next_sibling(child);
                }
            }

            if let Some(old_parent) = tree.detach(child) {
                records.push(MutationRecord::child_list(old_parent, Vec::new(), vec![child]));
            }

            let siblings = &tree.nodes[parent.0].children;
            let index = reference
                .and_then(|r| siblings.iter().position(|c| *c == r))
                .unwrap_or(siblings.len());
            tree.nodes[parent.0].children.insert(index, child);
            tree.nodes[child.0].parent = Some(parent);
            records.push(MutationRecord::child_list(parent, vec![child], Vec::new()));
        }
        self.queue(records);
        Ok(())
    }

    /// Put `replacement` where `node` is. No-op for parentless nodes.
    pub fn replace_with(&self, node: NodeId, replacement: NodeId) -> Result<(), DomError> {
        if node == replacement {
            return Ok(());
        }

        let mut records = Vec::new();
        {
            let mut tree = self.inner.tree.borrow_mut();
            let Some(parent) = tree.node(node)?.parent else {
                return Ok(());
            };
            tree.check_insert(parent, replacement)?;

            if let Some(old_parent) = tree.detach(replacement) {
                records.push(MutationRecord::child_list(old_parent, Vec::new(), vec![replacement]));
            }

            let siblings = &mut tree.nodes[parent.0].children;
            if let Some(index) = siblings.iter().position(|c| *c == node) {
                siblings[index] = replacement;
            }
            tree.nodes[node.0].parent = None;
            tree.nodes[replacement.0].parent = Some(parent);
            records.push(MutationRecord::child_list(parent, vec![replacement], vec![node]));
        }
        self.queue(records);
        Ok(())
    }

    /// Detach `node` from its parent. No-op for parentless nodes.
    pub fn remove(&self, node: NodeId) -> Result<(), DomError> {
        let parent = {
            let mut tree = self.inner.tree.borrow_mut();
            tree.node(node)?;
            tree.detach(node)
        };
        if let Some(parent) = parent {
            self.queue(vec![MutationRecord::child_list(parent, Vec::new(), vec![node])]);
        }
        Ok(())
    }

    pub fn remove_child(&self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        if self.inner.tree.borrow().node(child)?.parent != Some(parent) {
            return Err(DomError::NotAChild { parent, child });
        }
        self.remove(child)
    }

    // -------------------------------------------------------------------------
    // Attributes and style
    // -------------------------------------------------------------------------

    pub fn get_attribute(&self, node: NodeId, name: &str) -> Option<String> {
        let tree = self.inner.tree.borrow();
        let element = tree.element(node)?;
        if name == "style" {
            return (!element.style.is_empty()).then(|| serialize_style(&element.style));
        }
        element.attrs.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone())
    }

    pub fn has_attribute(&self, node: NodeId, name: &str) -> bool {
        self.get_attribute(node, name).is_some()
    }

    pub fn set_attribute(&self, node: NodeId, name: &str, value: &str) -> Result<(), DomError> {
        let name = name.to_ascii_lowercase();
        {
            let mut tree = self.inner.tree.borrow_mut();
            let element = tree.element_mut(node)?;
            match element.attrs.iter_mut().find(|(k, _)| *k == name) {
                Some((_, existing)) => *existing = value.to_string(),
                None => element.attrs.push((name.clone(), value.to_string())),
            }
        }
        self.queue(vec![MutationRecord::attribute(node, &name)]);
        Ok(())
    }

    pub fn remove_attribute(&self, node: NodeId, name: &str) -> Result<(), DomError> {
        let removed = {
            let mut tree = self.inner.tree.borrow_mut();
            let element = tree.element_mut(node)?;
            let before = element.attrs.len();
            element.attrs.retain(|(k, _)| k != name);
            before != element.attrs.len()
        };
        if removed {
            self.queue(vec![MutationRecord::attribute(node, name)]);
        }
        Ok(())
    }

    pub fn style_property(&self, node: NodeId, property: &str) -> Option<String> {
        let tree = self.inner.tree.borrow();
        let element = tree.element(node)?;
        element.style.iter().find(|(k, _)| k == property).map(|(_, v)| v.clone())
    }

    /// Set one inline style declaration, recorded as a `style` attribute change.
    pub fn set_style_property(&self, node: NodeId, property: &str, value: &str) -> Result<(), DomError> {
        {
            let mut tree = self.inner.tree.borrow_mut();
            let style = &mut tree.element_mut(node)?.style;
            match style.iter_mut().find(|(k, _)| k == property) {
                Some((_, existing)) => *existing = value.to_string(),
                None => style.push((property.to_string(), value.to_string())),
            }
        }
        self.queue(vec![MutationRecord::attribute(node, "style")]);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Shadow roots
    // -------------------------------------------------------------------------

    pub fn attach_shadow(&self, host: NodeId, mode: ShadowRootMode) -> Result<NodeId, DomError> {
        let mut tree = self.inner.tree.borrow_mut();
        if tree.element_mut(host)?.shadow_root.is_some() {
            return Err(DomError::ShadowAlreadyAttached(host));
        }
        let shadow = tree.push(None, NodeKind::ShadowRoot { host, mode });
        tree.element_mut(host)?.shadow_root = Some(shadow);
        Ok(shadow)
    }

    /// The open shadow root of `host`. Closed roots are only reachable
    /// through the handle returned by [`Document::attach_shadow`].
    pub fn shadow_root(&self, host: NodeId) -> Option<NodeId> {
        let tree = self.inner.tree.borrow();
        let shadow = tree.element(host)?.shadow_root?;
        let open = matches!(
            tree.node(shadow).ok()?.kind,
            NodeKind::ShadowRoot {
                mode: ShadowRootMode::Open,
                ..
            }
        );
        open.then_some(shadow)
    }

    /// The host of a shadow root.
    pub fn host(&self, shadow: NodeId) -> Option<NodeId> {
        match self.inner.tree.borrow().node(shadow).ok()?.kind {
            NodeKind::ShadowRoot { host, .. } => Some(host),
            _ => None,
        }
    }

    pub fn shadow_mode(&self, shadow: NodeId) -> Option<ShadowRootMode> {
        match self.inner.tree.borrow().node(shadow).ok()?.kind {
            NodeKind::ShadowRoot { mode, .. } => Some(mode),
            _ => None,
        }
    }

    // -------------------------------------------------------------------------
    // Mutation delivery
    // -------------------------------------------------------------------------

    fn queue(&self, records: Vec<MutationRecord>) {
        let tree = self.inner.tree.borrow();
        let mut registry = self.inner.mutations.borrow_mut();
        for record in records {
            registry.queue(&tree, record);
        }
    }

    pub fn has_pending_mutations(&self) -> bool {
        self.inner.mutations.borrow().has_pending()
    }

    /// Number of observers currently observing at least one node.
    pub fn active_observers(&self) -> usize {
        self.inner.mutations.borrow().len()
    }

    /// Deliver queued records to their observers, until none are left.
    ///
    /// Callbacks may mutate the document; their records are delivered in the
    /// same flush. Re-entrant calls from inside a callback return immediately.
    pub fn flush_mutations(&self) {
        if self.inner.flushing.replace(true) {
            return;
        }
        let _flushing = FlushGuard(&self.inner.flushing);

        loop {
            let batch = self.inner.mutations.borrow_mut().take_pending();
            if batch.is_empty() {
                break;
            }
            for (id, callback, records) in batch {
                if !self.inner.mutations.borrow().is_registered(id) {
                    continue;
                }
                let observer = MutationObserver::from_parts(id, callback.clone(), Rc::downgrade(&self.inner));
                let mut callback = callback.borrow_mut();
                (&mut *callback)(self, &records, &observer);
            }
        }
    }
}

/// Clears the flushing flag even when a callback unwinds.
struct FlushGuard<'a>(&'a Cell<bool>);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

fn element_kind(tag_name: &str) -> NodeKind {
    NodeKind::Element(ElementData {
        tag_name: tag_name.to_ascii_lowercase(),
        ..ElementData::default()
    })
}

fn serialize_style(style: &[(String, String)]) -> String {
    style
        .iter()
        .map(|(k, v)| format!("{}: {};", k, v))
        .collect::<Vec<_>>()
        .join(" ")
}
