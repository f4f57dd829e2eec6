//! Per-element lifecycle callbacks for every element matching a selector.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::rc::Rc;

use crate::anchor::MountError;
use crate::dom::{Document, DomError, MutationKind, MutationObserver, MutationRecord, NodeId, ObserveOptions, Selector};
use crate::shadow::ShadowError;

/// Error returned by user callbacks. Logged, never propagated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct CallbackError {
    message: String,
}

impl CallbackError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for CallbackError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for CallbackError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<DomError> for CallbackError {
    fn from(e: DomError) -> Self {
        Self::new(e.to_string())
    }
}

impl From<MountError> for CallbackError {
    fn from(e: MountError) -> Self {
        Self::new(e.to_string())
    }
}

impl From<ShadowError> for CallbackError {
    fn from(e: ShadowError) -> Self {
        Self::new(e.to_string())
    }
}

/// Returned by `on_mount`; runs when the element goes away or the observer stops.
pub type Disposer = Box<dyn FnOnce() -> Result<(), CallbackError>>;
pub type OnElementMount = dyn Fn(&Document, NodeId) -> Result<Option<Disposer>, CallbackError>;
pub type OnElement = dyn Fn(&Document, NodeId) -> Result<(), CallbackError>;

#[derive(Clone)]
pub struct ElementsObserverOptions {
    /// Subtree to watch; the document element when `None`.
    pub root: Option<NodeId>,
    pub observe: ObserveOptions,
    pub on_mount: Option<Rc<OnElementMount>>,
    pub on_unmount: Option<Rc<OnElement>>,
    /// Called on every mutation batch under a tracked element.
    pub on_update: Option<Rc<OnElement>>,
}

impl Default for ElementsObserverOptions {
    fn default() -> Self {
        Self {
            root: None,
            observe: ObserveOptions::default(),
            on_mount: None,
            on_unmount: None,
            on_update: None,
        }
    }
}

impl fmt::Debug for ElementsObserverOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElementsObserverOptions")
            .field("root", &self.root)
            .field("observe", &self.observe)
            .field("on_mount", &self.on_mount.is_some())
            .field("on_unmount", &self.on_unmount.is_some())
            .field("on_update", &self.on_update.is_some())
            .finish()
    }
}

impl ElementsObserverOptions {
    pub fn with_root(mut self, root: NodeId) -> Self {
        self.root = Some(root);
        self
    }

    pub fn with_observe(mut self, observe: ObserveOptions) -> Self {
        self.observe = observe;
        self
    }

    pub fn with_on_mount<F>(mut self, on_mount: F) -> Self
    where
        F: Fn(&Document, NodeId) -> Result<Option<Disposer>, CallbackError> + 'static,
    {
        self.on_mount = Some(Rc::new(on_mount));
        self
    }

    pub fn with_on_unmount<F>(mut self, on_unmount: F) -> Self
    where
        F: Fn(&Document, NodeId) -> Result<(), CallbackError> + 'static,
    {
        self.on_unmount = Some(Rc::new(on_unmount));
        self
    }

    pub fn with_on_update<F>(mut self, on_update: F) -> Self
    where
        F: Fn(&Document, NodeId) -> Result<(), CallbackError> + 'static,
    {
        self.on_update = Some(Rc::new(on_update));
        self
    }
}

struct ObserverState {
    doc: Document,
    selector: Selector,
    options: ElementsObserverOptions,
    tracked: RefCell<BTreeSet<NodeId>>,
    unmount_marked: RefCell<BTreeSet<NodeId>>,
    disposers: RefCell<HashMap<NodeId, Disposer>>,
    update_observers: RefCell<HashMap<NodeId, MutationObserver>>,
    root_observer: RefCell<Option<MutationObserver>>,
}

impl ObserverState {
    fn matching_in(&self, node: NodeId) -> Vec<NodeId> {
        let doc = &self.doc;
        let mut out = Vec::new();
        if doc.is_element(node) && self.selector_matches(node) {
            out.push(node);
        }
        out.extend(
            self.descendants(node)
                .into_iter()
                .filter(|el| self.selector_matches(*el)),
        );
        out
    }

    fn selector_matches(&self, node: NodeId) -> bool {
        self.doc.matches_selector(node, &self.selector)
    }

    fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        self.doc.query_selector_all(node, "*").unwrap_or_default()
    }

    fn process_element(&self, element: NodeId) {
        if !self.tracked.borrow_mut().insert(element) {
            return;
        }

        if let Some(on_mount) = &self.options.on_mount {
            match on_mount(&self.doc, element) {
                Ok(Some(disposer)) => {
                    self.disposers.borrow_mut().insert(element, disposer);
                }
                Ok(None) => {}
                Err(e) => {
                    log::error!("Error processing element {:?}: {}", element, e);
                    self.tracked.borrow_mut().remove(&element);
                    return;
                }
            }
        }
        if self.options.on_unmount.is_some() {
            self.unmount_marked.borrow_mut().insert(element);
        }

        if let Some(on_update) = self.options.on_update.clone() {
            let observer = MutationObserver::new(&self.doc, move |doc, _, _| {
                if let Err(e) = on_update(doc, element) {
                    log::error!("Error updating element {:?}: {}", element, e);
                }
            });
            observer.observe(element, self.options.observe);
            self.update_observers.borrow_mut().insert(element, observer);
        }
    }

    fn process_unmount(&self, element: NodeId) {
        if !self.tracked.borrow_mut().remove(&element) {
            return;
        }

        let disposer = self.disposers.borrow_mut().remove(&element);
        if let Some(disposer) = disposer {
            if let Err(e) = disposer() {
                log::error!("Error calling mount disposer for element {:?}: {}", element, e);
            }
        }

        let marked = self.unmount_marked.borrow_mut().remove(&element);
        if let (true, Some(on_unmount)) = (marked, &self.options.on_unmount) {
            if let Err(e) = on_unmount(&self.doc, element) {
                log::error!("Error processing unmount element {:?}: {}", element, e);
            }
        }

        let observer = self.update_observers.borrow_mut().remove(&element);
        if let Some(observer) = observer {
            observer.disconnect();
        }
    }

    fn process_removed(&self, node: NodeId) {
        let mut candidates = vec![node];
        candidates.extend(self.descendants(node));
        for element in candidates {
            // Moved, not removed.
            if self.doc.is_connected(element) {
                continue;
            }
            self.process_unmount(element);
        }
    }

    fn on_records(&self, records: &[MutationRecord]) {
        let child_lists = || records.iter().filter(|r| r.kind == MutationKind::ChildList);

        for record in child_lists() {
            for added in &record.added_nodes {
                for element in self.matching_in(*added) {
                    self.process_element(element);
                }
            }
        }
        for record in child_lists() {
            for removed in &record.removed_nodes {
                if self.doc.is_element(*removed) {
                    self.process_removed(*removed);
                }
            }
        }
    }
}

/// Runs callbacks as elements matching a selector appear under a root and
/// leave it.
///
/// Elements already present are processed by [`ElementsObserver::start`].
/// An element is processed at most once while it stays in the page.
pub struct ElementsObserver {
    state: Rc<ObserverState>,
}

impl fmt::Debug for ElementsObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElementsObserver")
            .field("tracked", &self.state.tracked.borrow())
            .finish()
    }
}

impl ElementsObserver {
    pub fn start(doc: &Document, selectors: &str, options: ElementsObserverOptions) -> Result<Self, DomError> {
        let selector = Selector::parse(selectors)?;
        let root = options
            .root
            .or_else(|| doc.document_element())
            .unwrap_or_else(|| doc.root());

        let state = Rc::new(ObserverState {
            doc: doc.clone(),
            selector,
            options,
            tracked: RefCell::new(BTreeSet::new()),
            unmount_marked: RefCell::new(BTreeSet::new()),
            disposers: RefCell::new(HashMap::new()),
            update_observers: RefCell::new(HashMap::new()),
            root_observer: RefCell::new(None),
        });

        let observer = {
            let state = state.clone();
            MutationObserver::new(doc, move |_, records, _| state.on_records(records))
        };
        observer.observe(root, state.options.observe);
        *state.root_observer.borrow_mut() = Some(observer);

        for element in state.descendants(root) {
            if state.selector_matches(element) {
                state.process_element(element);
            }
        }

        Ok(Self { state })
    }

    /// Disconnect every observer and run the remaining disposers.
    pub fn stop(&self) {
        let state = &self.state;
        if let Some(observer) = state.root_observer.borrow_mut().take() {
            observer.disconnect();
        }
        let observers: Vec<_> = state.update_observers.borrow_mut().drain().map(|(_, o)| o).collect();
        for observer in observers {
            observer.disconnect();
        }

        let disposers: Vec<_> = state.disposers.borrow_mut().drain().collect();
        for (element, disposer) in disposers {
            if let Err(e) = disposer() {
                log::error!("Error calling mount disposer for element {:?} during cleanup: {}", element, e);
            }
        }
        state.unmount_marked.borrow_mut().clear();
        state.tracked.borrow_mut().clear();
    }

    pub fn is_running(&self) -> bool {
        self.state.root_observer.borrow().is_some()
    }

    pub fn is_tracking(&self, element: NodeId) -> bool {
        self.state.tracked.borrow().contains(&element)
    }

    pub fn tracked_elements(&self) -> Vec<NodeId> {
        self.state.tracked.borrow().iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    type Log = Rc<RefCell<Vec<String>>>;

    fn logging_options(log: &Log) -> ElementsObserverOptions {
        let mounts = log.clone();
        let unmounts = log.clone();
        ElementsObserverOptions::default()
            .with_on_mount(move |doc, el| {
                let id = doc.get_attribute(el, "id").unwrap_or_default();
                mounts.borrow_mut().push(format!("mount {id}"));
                let disposed = mounts.clone();
                Ok(Some(Box::new(move || {
                    disposed.borrow_mut().push(format!("dispose {id}"));
                    Ok(())
                }) as Disposer))
            })
            .with_on_unmount(move |doc, el| {
                let id = doc.get_attribute(el, "id").unwrap_or_default();
                unmounts.borrow_mut().push(format!("unmount {id}"));
                Ok(())
            })
    }

    fn item(doc: &Document, id: &str) -> NodeId {
        let el = doc.create_element("div");
        doc.set_attribute(el, "class", "item").unwrap();
        doc.set_attribute(el, "id", id).unwrap();
        el
    }

    #[test]
    fn test_existing_and_added_elements() {
        let doc = Document::new();
        let body = doc.body().unwrap();
        let a = item(&doc, "a");
        doc.append_child(body, a).unwrap();

        let log: Log = Rc::default();
        let observer = ElementsObserver::start(&doc, ".item", logging_options(&log)).unwrap();
        assert_eq!(*log.borrow(), vec!["mount a"]);

        let wrapper = doc.create_element("section");
        let b = item(&doc, "b");
        doc.append_child(wrapper, b).unwrap();
        doc.append_child(body, wrapper).unwrap();
        doc.flush_mutations();
        assert_eq!(*log.borrow(), vec!["mount a", "mount b"]);
        assert!(observer.is_tracking(b));
    }

    #[test]
    fn test_removal_runs_disposer_then_unmount() {
        let doc = Document::new();
        let body = doc.body().unwrap();
        let wrapper = doc.create_element("section");
        let a = item(&doc, "a");
        let b = item(&doc, "b");
        doc.append_child(wrapper, a).unwrap();
        doc.append_child(body, wrapper).unwrap();
        doc.append_child(body, b).unwrap();

        let log: Log = Rc::default();
        let observer = ElementsObserver::start(&doc, ".item", logging_options(&log)).unwrap();
        log.borrow_mut().clear();

        doc.remove(wrapper).unwrap();
        doc.flush_mutations();
        assert_eq!(*log.borrow(), vec!["dispose a", "unmount a"]);
        assert!(!observer.is_tracking(a));
        assert!(observer.is_tracking(b));
    }

    #[test]
    fn test_moved_element_is_not_remounted() {
        let doc = Document::new();
        let body = doc.body().unwrap();
        let target = doc.create_element("main");
        doc.append_child(body, target).unwrap();
        let a = item(&doc, "a");
        doc.append_child(body, a).unwrap();

        let log: Log = Rc::default();
        let _observer = ElementsObserver::start(&doc, ".item", logging_options(&log)).unwrap();
        doc.append_child(target, a).unwrap();
        doc.flush_mutations();
        assert_eq!(*log.borrow(), vec!["mount a"]);
    }

    #[test]
    fn test_readded_element_mounts_again() {
        let doc = Document::new();
        let body = doc.body().unwrap();
        let a = item(&doc, "a");
        doc.append_child(body, a).unwrap();

        let log: Log = Rc::default();
        let _observer = ElementsObserver::start(&doc, ".item", logging_options(&log)).unwrap();
        doc.remove(a).unwrap();
        doc.flush_mutations();
        doc.append_child(body, a).unwrap();
        doc.flush_mutations();
        assert_eq!(*log.borrow(), vec!["mount a", "dispose a", "unmount a", "mount a"]);
    }

    #[test]
    fn test_callback_errors_are_isolated() {
        let doc = Document::new();
        let body = doc.body().unwrap();
        let mounted = Rc::new(RefCell::new(Vec::new()));
        let sink = mounted.clone();
        let options = ElementsObserverOptions::default().with_on_mount(move |doc, el| {
            if doc.get_attribute(el, "id").as_deref() == Some("bad") {
                return Err("boom".into());
            }
            sink.borrow_mut().push(el);
            Ok(None)
        });
        let bad = item(&doc, "bad");
        let good = item(&doc, "good");
        doc.append_child(body, bad).unwrap();
        doc.append_child(body, good).unwrap();

        let observer = ElementsObserver::start(&doc, ".item", options).unwrap();
        assert_eq!(*mounted.borrow(), vec![good]);
        assert!(!observer.is_tracking(bad));
    }

    #[test]
    fn test_on_update_observes_element_subtree() {
        let doc = Document::new();
        let body = doc.body().unwrap();
        let a = item(&doc, "a");
        let outside = doc.create_element("p");
        doc.append_child(body, a).unwrap();
        doc.append_child(body, outside).unwrap();

        let updates = Rc::new(Cell::new(0));
        let counter = updates.clone();
        let observer = ElementsObserver::start(
            &doc,
            ".item",
            ElementsObserverOptions::default().with_on_update(move |_, _| {
                counter.set(counter.get() + 1);
                Ok(())
            }),
        )
        .unwrap();

        doc.append_child(a, doc.create_element("span")).unwrap();
        doc.flush_mutations();
        doc.set_attribute(outside, "title", "x").unwrap();
        doc.flush_mutations();
        assert_eq!(updates.get(), 1);

        observer.stop();
        doc.set_attribute(a, "title", "y").unwrap();
        doc.flush_mutations();
        assert_eq!(updates.get(), 1);
    }

    #[test]
    fn test_stop_runs_remaining_disposers() {
        let doc = Document::new();
        let body = doc.body().unwrap();
        doc.append_child(body, item(&doc, "a")).unwrap();

        let log: Log = Rc::default();
        let observer = ElementsObserver::start(&doc, ".item", logging_options(&log)).unwrap();
        observer.stop();
        assert!(!observer.is_running());
        assert_eq!(*log.borrow(), vec!["mount a", "dispose a"]);
        assert_eq!(doc.active_observers(), 0);

        doc.append_child(body, item(&doc, "b")).unwrap();
        doc.flush_mutations();
        assert_eq!(log.borrow().len(), 2);
    }

    #[test]
    fn test_scoped_root() {
        let doc = Document::new();
        let body = doc.body().unwrap();
        let scope = doc.create_element("main");
        doc.append_child(body, scope).unwrap();
        doc.append_child(body, item(&doc, "outside")).unwrap();
        let inside = item(&doc, "inside");
        doc.append_child(scope, inside).unwrap();

        let log: Log = Rc::default();
        let observer =
            ElementsObserver::start(&doc, ".item", logging_options(&log).with_root(scope)).unwrap();
        assert_eq!(observer.tracked_elements(), vec![inside]);
    }

    #[test]
    fn test_invalid_selector() {
        let doc = Document::new();
        let result = ElementsObserver::start(&doc, "div[", ElementsObserverOptions::default());
        assert!(matches!(result, Err(DomError::InvalidSelector(_))));
    }
}
