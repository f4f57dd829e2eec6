//! Cooperative cancellation.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// Why a signal was aborted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AbortReason(String);

impl AbortReason {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for AbortReason {
    fn default() -> Self {
        Self::new("AbortError: signal is aborted without reason")
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AbortListenerId(u64);

type AbortListener = Box<dyn FnOnce(&AbortReason)>;

struct SignalState {
    id: u64,
    reason: RefCell<Option<AbortReason>>,
    next_listener: Cell<u64>,
    listeners: RefCell<Vec<(AbortListenerId, AbortListener)>>,
}

thread_local! {
    static NEXT_SIGNAL_ID: Cell<u64> = const { Cell::new(1) };
}

/// Read side of an [`AbortController`].
#[derive(Clone)]
pub struct AbortSignal {
    state: Rc<SignalState>,
}

impl fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortSignal")
            .field("id", &self.state.id)
            .field("reason", &self.state.reason.borrow())
            .finish()
    }
}

impl AbortSignal {
    fn new() -> Self {
        let id = NEXT_SIGNAL_ID.with(|next| next.replace(next.get() + 1));
        Self {
            state: Rc::new(SignalState {
                id,
                reason: RefCell::new(None),
                next_listener: Cell::new(0),
                listeners: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Identity shared by all clones of this signal.
    pub fn id(&self) -> u64 {
        self.state.id
    }

    pub fn is_aborted(&self) -> bool {
        self.state.reason.borrow().is_some()
    }

    pub fn reason(&self) -> Option<AbortReason> {
        self.state.reason.borrow().clone()
    }

    /// Run `listener` once, on abort. Never runs if the signal is already aborted.
    pub fn add_abort_listener<F>(&self, listener: F) -> AbortListenerId
    where
        F: FnOnce(&AbortReason) + 'static,
    {
        let id = AbortListenerId(self.state.next_listener.get() + 1);
        self.state.next_listener.set(id.0);
        if !self.is_aborted() {
            self.state.listeners.borrow_mut().push((id, Box::new(listener)));
        }
        id
    }

    pub fn remove_abort_listener(&self, id: AbortListenerId) {
        self.state.listeners.borrow_mut().retain(|(entry, _)| *entry != id);
    }

    pub fn listener_count(&self) -> usize {
        self.state.listeners.borrow().len()
    }
}

/// Owner of an [`AbortSignal`].
#[derive(Debug, Clone)]
pub struct AbortController {
    signal: AbortSignal,
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortController {
    pub fn new() -> Self {
        Self {
            signal: AbortSignal::new(),
        }
    }

    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    /// Abort with `reason`. Only the first call has any effect.
    pub fn abort(&self, reason: AbortReason) {
        let state = &self.signal.state;
        if state.reason.borrow().is_some() {
            return;
        }
        *state.reason.borrow_mut() = Some(reason.clone());

        let listeners = std::mem::take(&mut *state.listeners.borrow_mut());
        for (_, listener) in listeners {
            listener(&reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_runs_listeners_once() {
        let controller = AbortController::new();
        let signal = controller.signal();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        signal.add_abort_listener(move |reason| sink.borrow_mut().push(reason.clone()));

        controller.abort(AbortReason::new("stop"));
        controller.abort(AbortReason::new("again"));

        assert!(signal.is_aborted());
        assert_eq!(signal.reason(), Some(AbortReason::new("stop")));
        assert_eq!(*seen.borrow(), vec![AbortReason::new("stop")]);
        assert_eq!(signal.listener_count(), 0);
    }

    #[test]
    fn test_removed_listener_not_called() {
        let controller = AbortController::new();
        let signal = controller.signal();
        let called = Rc::new(Cell::new(false));
        let flag = called.clone();
        let id = signal.add_abort_listener(move |_| flag.set(true));
        signal.remove_abort_listener(id);
        controller.abort(AbortReason::default());
        assert!(!called.get());
    }

    #[test]
    fn test_signal_identity() {
        let a = AbortController::new();
        let b = AbortController::new();
        assert_eq!(a.signal().id(), a.signal().id());
        assert_ne!(a.signal().id(), b.signal().id());
    }
}
