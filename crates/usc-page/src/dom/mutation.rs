use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use bitflags::bitflags;

use super::{Document, Inner, NodeId, Tree};

bitflags! {
    /// Which changes an observer is notified about.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ObserveOptions: u8 {
        const CHILD_LIST = 1 << 0;
        const ATTRIBUTES = 1 << 1;
        const SUBTREE = 1 << 2;
    }
}

impl Default for ObserveOptions {
    fn default() -> Self {
        Self::all()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    ChildList,
    Attributes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub kind: MutationKind,
    pub target: NodeId,
    pub added_nodes: Vec<NodeId>,
    pub removed_nodes: Vec<NodeId>,
    pub attribute_name: Option<String>,
}

impl MutationRecord {
    pub(super) fn child_list(target: NodeId, added_nodes: Vec<NodeId>, removed_nodes: Vec<NodeId>) -> Self {
        Self {
            kind: MutationKind::ChildList,
            target,
            added_nodes,
            removed_nodes,
            attribute_name: None,
        }
    }

    pub(super) fn attribute(target: NodeId, name: &str) -> Self {
        Self {
            kind: MutationKind::Attributes,
            target,
            added_nodes: Vec::new(),
            removed_nodes: Vec::new(),
            attribute_name: Some(name.to_string()),
        }
    }
}

pub(super) type Callback = Rc<RefCell<dyn FnMut(&Document, &[MutationRecord], &MutationObserver)>>;

struct Registration {
    callback: Callback,
    targets: Vec<(NodeId, ObserveOptions)>,
    queue: Vec<MutationRecord>,
}

impl Registration {
    fn is_interested(&self, tree: &Tree, record: &MutationRecord) -> bool {
        let wanted = match record.kind {
            MutationKind::ChildList => ObserveOptions::CHILD_LIST,
            MutationKind::Attributes => ObserveOptions::ATTRIBUTES,
        };
        self.targets.iter().any(|(target, options)| {
            options.contains(wanted)
                && (*target == record.target
                    || (options.contains(ObserveOptions::SUBTREE) && tree.is_inclusive_ancestor(*target, record.target)))
        })
    }
}

/// Observers keyed by creation order, so delivery order is stable.
#[derive(Default)]
pub(super) struct Registry {
    next_id: u64,
    entries: BTreeMap<u64, Registration>,
}

impl Registry {
    pub(super) fn queue(&mut self, tree: &Tree, record: MutationRecord) {
        for entry in self.entries.values_mut() {
            if entry.is_interested(tree, &record) {
                entry.queue.push(record.clone());
            }
        }
    }

    pub(super) fn has_pending(&self) -> bool {
        self.entries.values().any(|e| !e.queue.is_empty())
    }

    pub(super) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(super) fn is_registered(&self, id: u64) -> bool {
        self.entries.contains_key(&id)
    }

    pub(super) fn take_pending(&mut self) -> Vec<(u64, Callback, Vec<MutationRecord>)> {
        self.entries
            .iter_mut()
            .filter(|(_, e)| !e.queue.is_empty())
            .map(|(id, e)| (*id, e.callback.clone(), std::mem::take(&mut e.queue)))
            .collect()
    }

    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Handle to a callback notified of document changes.
///
/// Observation is explicit: an observer is inert until [`observe`] and stays
/// registered until [`disconnect`], independent of how many handles exist.
///
/// [`observe`]: MutationObserver::observe
/// [`disconnect`]: MutationObserver::disconnect
#[derive(Clone)]
pub struct MutationObserver {
    id: u64,
    callback: Callback,
    document: Weak<Inner>,
}

impl std::fmt::Debug for MutationObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationObserver").field("id", &self.id).finish()
    }
}

impl MutationObserver {
    pub fn new<F>(doc: &Document, callback: F) -> Self
    where
        F: FnMut(&Document, &[MutationRecord], &MutationObserver) + 'static,
    {
        let id = doc.inner.mutations.borrow_mut().allocate();
        Self {
            id,
            callback: Rc::new(RefCell::new(callback)),
            document: Rc::downgrade(&doc.inner),
        }
    }

    pub(super) fn from_parts(id: u64, callback: Callback, document: Weak<Inner>) -> Self {
        Self { id, callback, document }
    }

    /// Start observing `target`. Observing the same target again replaces its options.
    pub fn observe(&self, target: NodeId, options: ObserveOptions) {
        let Some(inner) = self.document.upgrade() else {
            return;
        };
        let mut registry = inner.mutations.borrow_mut();
        let entry = registry.entries.entry(self.id).or_insert_with(|| Registration {
            callback: self.callback.clone(),
            targets: Vec::new(),
            queue: Vec::new(),
        });
        match entry.targets.iter_mut().find(|(t, _)| *t == target) {
            Some((_, existing)) => *existing = options,
            None => entry.targets.push((target, options)),
        }
    }

    /// Stop observing and drop undelivered records.
    pub fn disconnect(&self) {
        if let Some(inner) = self.document.upgrade() {
            inner.mutations.borrow_mut().entries.remove(&self.id);
        }
    }

    pub fn is_observing(&self) -> bool {
        self.document
            .upgrade()
            .is_some_and(|inner| inner.mutations.borrow().is_registered(self.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(doc: &Document) -> (MutationObserver, Rc<RefCell<Vec<MutationRecord>>>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let observer = MutationObserver::new(doc, move |_, records, _| {
            sink.borrow_mut().extend_from_slice(records);
        });
        (observer, seen)
    }

    #[test]
    fn test_records_delivered_on_flush() {
        let doc = Document::new();
        let body = doc.body().unwrap();
        let (observer, seen) = recorder(&doc);
        observer.observe(body, ObserveOptions::CHILD_LIST);

        let el = doc.create_element("div");
        doc.append_child(body, el).unwrap();
        assert!(seen.borrow().is_empty());
        assert!(doc.has_pending_mutations());

        doc.flush_mutations();
        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].added_nodes, vec![el]);
        assert!(!doc.has_pending_mutations());
    }

    #[test]
    fn test_subtree_and_kind_filtering() {
        let doc = Document::new();
        let html = doc.document_element().unwrap();
        let body = doc.body().unwrap();
        let (direct, direct_seen) = recorder(&doc);
        direct.observe(html, ObserveOptions::CHILD_LIST);
        let (deep, deep_seen) = recorder(&doc);
        deep.observe(html, ObserveOptions::CHILD_LIST | ObserveOptions::SUBTREE);

        let el = doc.create_element("div");
        doc.append_child(body, el).unwrap();
        doc.set_attribute(el, "class", "x").unwrap();
        doc.flush_mutations();

        assert!(direct_seen.borrow().is_empty());
        assert_eq!(deep_seen.borrow().len(), 1);
        assert_eq!(deep_seen.borrow()[0].kind, MutationKind::ChildList);
    }

    #[test]
    fn test_disconnect_drops_pending() {
        let doc = Document::new();
        let (observer, seen) = recorder(&doc);
        observer.observe(doc.root(), ObserveOptions::all());
        doc.append_child(doc.body().unwrap(), doc.create_element("p")).unwrap();
        observer.disconnect();
        doc.flush_mutations();
        assert!(seen.borrow().is_empty());
        assert!(!observer.is_observing());
        assert_eq!(doc.active_observers(), 0);
    }

    #[test]
    fn test_callback_mutations_delivered_in_same_flush() {
        let doc = Document::new();
        let body = doc.body().unwrap();
        let count = Rc::new(RefCell::new(0));
        let counter = count.clone();
        let observer = MutationObserver::new(&doc, move |doc, records, _| {
            *counter.borrow_mut() += records.len();
            if *counter.borrow() == 1 {
                let child = doc.create_element("span");
                let _ = doc.append_child(doc.body().unwrap_or(doc.root()), child);
            }
        });
        observer.observe(body, ObserveOptions::CHILD_LIST);
        doc.append_child(body, doc.create_element("div")).unwrap();
        doc.flush_mutations();
        assert_eq!(*count.borrow(), 2);
    }

    #[test]
    fn test_observer_disconnects_itself() {
        let doc = Document::new();
        let body = doc.body().unwrap();
        let calls = Rc::new(RefCell::new(0));
        let counter = calls.clone();
        let observer = MutationObserver::new(&doc, move |_, _, this| {
            *counter.borrow_mut() += 1;
            this.disconnect();
        });
        observer.observe(body, ObserveOptions::CHILD_LIST);
        doc.append_child(body, doc.create_element("div")).unwrap();
        doc.flush_mutations();
        doc.append_child(body, doc.create_element("div")).unwrap();
        doc.flush_mutations();
        assert_eq!(*calls.borrow(), 1);
    }

    #[test]
    fn test_flush_recovers_after_callback_panic() {
        let doc = Document::new();
        let body = doc.body().unwrap();
        let calls = Rc::new(RefCell::new(0));
        let counter = calls.clone();
        let observer = MutationObserver::new(&doc, move |_, _, _| {
            *counter.borrow_mut() += 1;
            if *counter.borrow() == 1 {
                panic!("callback failed");
            }
        });
        observer.observe(body, ObserveOptions::CHILD_LIST);

        doc.append_child(body, doc.create_element("div")).unwrap();
        let flushed = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| doc.flush_mutations()));
        assert!(flushed.is_err());

        doc.append_child(body, doc.create_element("div")).unwrap();
        doc.flush_mutations();
        assert_eq!(*calls.borrow(), 2);
        assert!(!doc.has_pending_mutations());
    }
}
