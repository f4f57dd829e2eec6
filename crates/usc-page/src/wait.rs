//! Waiting for elements to appear or disappear.
//!
//! Identical concurrent waits share one observation: the process-wide cache
//! maps a structural [`WaitKey`] to the in-flight future and drops the entry
//! the moment the wait settles, whatever the outcome.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use futures::channel::oneshot;
use futures::future::{FutureExt, LocalBoxFuture, Shared};

use crate::abort::{AbortListenerId, AbortReason, AbortSignal};
use crate::dom::{Document, DomError, MutationObserver, NodeId, ObserveOptions};

/// Error type for element waits.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
    #[error("Wait aborted: {0}")]
    Aborted(AbortReason),
    #[error(transparent)]
    Dom(#[from] DomError),
    #[error("Wait was dropped before it settled")]
    Dropped,
}

/// A shared closure compared and hashed by address.
pub struct ByAddress<F: ?Sized>(pub Rc<F>);

impl<F: ?Sized> ByAddress<F> {
    fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl<F: ?Sized> Clone for ByAddress<F> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<F: ?Sized> PartialEq for ByAddress<F> {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl<F: ?Sized> Eq for ByAddress<F> {}

impl<F: ?Sized> Hash for ByAddress<F> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl<F: ?Sized> fmt::Debug for ByAddress<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ByAddress({:#x})", self.addr())
    }
}

/// Looks up the element a wait is about, in place of `query_selector`.
pub type MatcherFn = dyn Fn(&Document, &str) -> Option<NodeId>;
pub type DetectorFn = dyn Fn(Option<NodeId>) -> Detection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    /// Settle with this value.
    Detected(Option<NodeId>),
    Pending,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum Detector {
    #[default]
    Exists,
    NotExists,
    Custom(ByAddress<DetectorFn>),
}

impl Detector {
    pub fn custom<F>(detector: F) -> Self
    where
        F: Fn(Option<NodeId>) -> Detection + 'static,
    {
        Detector::Custom(ByAddress(Rc::new(detector)))
    }

    pub fn detect(&self, element: Option<NodeId>) -> Detection {
        match self {
            Detector::Exists if element.is_some() => Detection::Detected(element),
            Detector::NotExists if element.is_none() => Detection::Detected(None),
            Detector::Exists | Detector::NotExists => Detection::Pending,
            Detector::Custom(detector) => (detector.0)(element),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WaitOptions {
    /// Node to query and observe; the document node when `None`.
    pub target: Option<NodeId>,
    /// Share one in-flight wait between identical calls.
    pub unify_process: bool,
    pub detector: Detector,
    pub observe: ObserveOptions,
    pub signal: Option<AbortSignal>,
    pub custom_matcher: Option<ByAddress<MatcherFn>>,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            target: None,
            unify_process: true,
            detector: Detector::Exists,
            observe: ObserveOptions::CHILD_LIST | ObserveOptions::SUBTREE | ObserveOptions::ATTRIBUTES,
            signal: None,
            custom_matcher: None,
        }
    }
}

impl WaitOptions {
    pub fn with_target(mut self, target: NodeId) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_unify_process(mut self, unify_process: bool) -> Self {
        self.unify_process = unify_process;
        self
    }

    pub fn with_detector(mut self, detector: Detector) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_observe(mut self, observe: ObserveOptions) -> Self {
        self.observe = observe;
        self
    }

    pub fn with_signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn with_custom_matcher<F>(mut self, matcher: F) -> Self
    where
        F: Fn(&Document, &str) -> Option<NodeId> + 'static,
    {
        self.custom_matcher = Some(ByAddress(Rc::new(matcher)));
        self
    }
}

/// Resolves to the detected element (`None` for "gone" detections).
pub type WaitElement = Shared<LocalBoxFuture<'static, Result<Option<NodeId>, WaitError>>>;

/// Structural identity of a wait.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WaitKey {
    document: usize,
    selector: String,
    target: NodeId,
    observe: ObserveOptions,
    detector: Detector,
    signal: Option<u64>,
    matcher: Option<ByAddress<MatcherFn>>,
}

thread_local! {
    static WAIT_CACHE: RefCell<HashMap<WaitKey, WaitElement>> = RefCell::new(HashMap::new());
}

/// Number of shared waits currently in flight.
pub fn in_flight_waits() -> usize {
    WAIT_CACHE.with(|cache| cache.borrow().len())
}

type Settlement = Result<Option<NodeId>, WaitError>;

struct WaitState {
    sender: RefCell<Option<oneshot::Sender<Settlement>>>,
    key: Option<WaitKey>,
    observer: RefCell<Option<MutationObserver>>,
    signal: Option<AbortSignal>,
    abort_listener: Cell<Option<AbortListenerId>>,
}

impl WaitState {
    fn is_settled(&self) -> bool {
        self.sender.borrow().is_none()
    }

    /// First call wins; tears down the observer, listener and cache entry.
    fn settle(&self, result: Settlement) {
        let Some(sender) = self.sender.borrow_mut().take() else {
            return;
        };
        if let Some(observer) = self.observer.borrow_mut().take() {
            observer.disconnect();
        }
        if let (Some(signal), Some(id)) = (&self.signal, self.abort_listener.take()) {
            signal.remove_abort_listener(id);
        }
        if let Some(key) = &self.key {
            WAIT_CACHE.with(|cache| cache.borrow_mut().remove(key));
        }
        let _ = sender.send(result);
    }
}

fn detect(
    doc: &Document,
    selector: &str,
    target: NodeId,
    detector: &Detector,
    matcher: Option<&ByAddress<MatcherFn>>,
) -> Result<Detection, DomError> {
    let element = match matcher {
        Some(matcher) => (matcher.0)(doc, selector),
        None => doc.query_selector(target, selector)?,
    };
    Ok(detector.detect(element))
}

/// Wait until `selector` under the target satisfies the detector.
///
/// The detector is checked once before anything is observed; an already
/// satisfied wait settles without creating an observer. Otherwise each
/// delivered mutation batch re-runs detection. Aborting the signal rejects
/// the wait with the abort reason and disconnects its observer.
pub fn wait_for_element(doc: &Document, selector: &str, options: WaitOptions) -> WaitElement {
    let target = options.target.unwrap_or_else(|| doc.root());
    let key = options.unify_process.then(|| WaitKey {
        document: doc.id(),
        selector: selector.to_string(),
        target,
        observe: options.observe,
        detector: options.detector.clone(),
        signal: options.signal.as_ref().map(AbortSignal::id),
        matcher: options.custom_matcher.clone(),
    });

    if let Some(key) = &key {
        if let Some(cached) = WAIT_CACHE.with(|cache| cache.borrow().get(key).cloned()) {
            return cached;
        }
    }

    let (sender, receiver) = oneshot::channel();
    let state = Rc::new(WaitState {
        sender: RefCell::new(Some(sender)),
        key: key.clone(),
        observer: RefCell::new(None),
        signal: options.signal.clone(),
        abort_listener: Cell::new(None),
    });
    let future = async move { receiver.await.unwrap_or(Err(WaitError::Dropped)) }
        .boxed_local()
        .shared();

    start(doc, selector, target, &options, &state);

    if let Some(key) = key {
        if !state.is_settled() {
            WAIT_CACHE.with(|cache| cache.borrow_mut().insert(key, future.clone()));
        }
    }
    future
}

fn start(doc: &Document, selector: &str, target: NodeId, options: &WaitOptions, state: &Rc<WaitState>) {
    if let Some(reason) = options.signal.as_ref().and_then(AbortSignal::reason) {
        state.settle(Err(WaitError::Aborted(reason)));
        return;
    }

    let observer = {
        let state = state.clone();
        let selector = selector.to_string();
        let detector = options.detector.clone();
        let matcher = options.custom_matcher.clone();
        MutationObserver::new(doc, move |doc, _, _| {
            match detect(doc, &selector, target, &detector, matcher.as_ref()) {
                Ok(Detection::Detected(element)) => state.settle(Ok(element)),
                Ok(Detection::Pending) => {}
                Err(e) => state.settle(Err(e.into())),
            }
        })
    };

    if let Some(signal) = &options.signal {
        let weak = Rc::downgrade(state);
        let id = signal.add_abort_listener(move |reason| {
            if let Some(state) = weak.upgrade() {
                state.settle(Err(WaitError::Aborted(reason.clone())));
            }
        });
        state.abort_listener.set(Some(id));
    }

    match detect(doc, selector, target, &options.detector, options.custom_matcher.as_ref()) {
        Ok(Detection::Detected(element)) => state.settle(Ok(element)),
        Ok(Detection::Pending) => {
            observer.observe(target, options.observe);
            *state.observer.borrow_mut() = Some(observer);
        }
        Err(e) => state.settle(Err(e.into())),
    }
}
