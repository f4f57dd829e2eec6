use std::rc::Rc;

use super::{Document, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A dispatched event, bubbling from its target to the document.
///
/// Bubbling continues from a shadow root to its host.
#[derive(Debug, Clone)]
pub struct Event {
    event_type: String,
    target: NodeId,
    current_target: NodeId,
    propagation_stopped: bool,
    path: Vec<NodeId>,
}

impl Event {
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn target(&self) -> NodeId {
        self.target
    }

    pub fn current_target(&self) -> NodeId {
        self.current_target
    }

    pub fn stop_propagation(&mut self) {
        self.propagation_stopped = true;
    }

    pub fn is_propagation_stopped(&self) -> bool {
        self.propagation_stopped
    }

    /// Nodes whose listeners ran, in order.
    pub fn path(&self) -> &[NodeId] {
        &self.path
    }
}

type Listener = Rc<dyn Fn(&mut Event)>;

#[derive(Default)]
pub(super) struct Registry {
    next_id: u64,
    entries: Vec<(ListenerId, NodeId, String, Listener)>,
}

impl Document {
    pub fn add_event_listener<F>(&self, node: NodeId, event_type: &str, listener: F) -> ListenerId
    where
        F: Fn(&mut Event) + 'static,
    {
        let mut registry = self.inner.listeners.borrow_mut();
        registry.next_id += 1;
        let id = ListenerId(registry.next_id);
        registry.entries.push((id, node, event_type.to_string(), Rc::new(listener)));
        id
    }

    pub fn remove_event_listener(&self, id: ListenerId) {
        self.inner.listeners.borrow_mut().entries.retain(|(entry, ..)| *entry != id);
    }

    /// Dispatch a bubbling event at `target` and return it after propagation.
    pub fn dispatch_event(&self, target: NodeId, event_type: &str) -> Event {
        let mut event = Event {
            event_type: event_type.to_string(),
            target,
            current_target: target,
            propagation_stopped: false,
            path: Vec::new(),
        };

        let mut cursor = Some(target);
        while let Some(node) = cursor {
            let listeners: Vec<Listener> = self
                .inner
                .listeners
                .borrow()
                .entries
                .iter()
                .filter(|(_, n, t, _)| *n == node && t == event_type)
                .map(|(.., l)| l.clone())
                .collect();

            event.current_target = node;
            event.path.push(node);
            for listener in listeners {
                listener(&mut event);
            }
            if event.propagation_stopped {
                break;
            }
            cursor = self.inner.tree.borrow().composed_parent(node);
        }

        event
    }
}
