//! One asynchronously created UI per matching element.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use futures::task::{LocalSpawn, LocalSpawnExt};

use crate::anchor::MountError;
use crate::dom::{Document, DomError, NodeId};
use crate::observer::{CallbackError, Disposer, ElementsObserver, ElementsObserverOptions};
use crate::ui::ShadowRootUi;

/// A UI [`create_uis`] can mount and tear down.
pub trait ManagedUi {
    fn mount(&self) -> Result<(), MountError>;
    fn remove(&self) -> Result<(), MountError>;
    /// Identity, so re-creating the same UI does not remove it.
    fn is_same(&self, other: &Self) -> bool;
}

impl<T: 'static> ManagedUi for ShadowRootUi<T> {
    fn mount(&self) -> Result<(), MountError> {
        ShadowRootUi::mount(self)
    }

    fn remove(&self) -> Result<(), MountError> {
        ShadowRootUi::remove(self)
    }

    fn is_same(&self, other: &Self) -> bool {
        self.shadow_host() == other.shadow_host()
    }
}

pub type CreateUiFuture<U> = LocalBoxFuture<'static, Result<U, CallbackError>>;

struct UisState<U> {
    next_version: Cell<u64>,
    versions: RefCell<HashMap<NodeId, u64>>,
    uis: RefCell<HashMap<NodeId, U>>,
    stopped: Cell<bool>,
}

fn remove_safe<U: ManagedUi>(ui: &U) {
    if let Err(e) = ui.remove() {
        log::debug!("Failed to remove UI: {}", e);
    }
}

fn mount_safe<U: ManagedUi>(ui: &U) {
    if let Err(e) = ui.mount() {
        log::error!("Failed to mount UI: {}", e);
    }
}

impl<U: ManagedUi + Clone> UisState<U> {
    fn bump_version(&self, element: NodeId) -> u64 {
        let version = self.next_version.get() + 1;
        self.next_version.set(version);
        self.versions.borrow_mut().insert(element, version);
        version
    }

    fn settle(&self, element: NodeId, version: u64, created: U) {
        let latest = self.versions.borrow().get(&element).copied().unwrap_or(0);
        if self.stopped.get() || latest != version {
            log::debug!("Discarding stale UI for element {:?} (version {} of {})", element, version, latest);
            remove_safe(&created);
            return;
        }

        let previous = self.uis.borrow_mut().insert(element, created.clone());
        if let Some(previous) = previous.filter(|p| !p.is_same(&created)) {
            remove_safe(&previous);
        }
        mount_safe(&created);
    }

    fn forget(&self, element: NodeId) {
        self.versions.borrow_mut().remove(&element);
        let ui = self.uis.borrow_mut().remove(&element);
        if let Some(ui) = ui {
            remove_safe(&ui);
        }
    }
}

/// Keeps one UI per element matching `selectors`.
///
/// Every time an element starts matching, `create_fn` runs for it. Only the
/// newest creation for an element is kept; a result that finishes after a
/// newer one started, or after the element left the page, is removed
/// straight away.
pub struct CreateUis<U> {
    state: Rc<UisState<U>>,
    observer: ElementsObserver,
}

impl<U: ManagedUi + Clone + 'static> CreateUis<U> {
    pub fn ui_for_element(&self, element: NodeId) -> Option<U> {
        self.state.uis.borrow().get(&element).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.uis.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop watching and remove every UI.
    pub fn stop(&self) {
        self.state.stopped.set(true);
        self.observer.stop();
        self.state.versions.borrow_mut().clear();
        let uis: Vec<U> = self.state.uis.borrow_mut().drain().map(|(_, ui)| ui).collect();
        for ui in uis {
            remove_safe(&ui);
        }
    }
}

pub fn create_uis<U, F>(
    doc: &Document,
    selectors: &str,
    create_fn: F,
    spawner: Rc<dyn LocalSpawn>,
) -> Result<CreateUis<U>, DomError>
where
    U: ManagedUi + Clone + 'static,
    F: Fn(&Document, NodeId) -> CreateUiFuture<U> + 'static,
{
    let state = Rc::new(UisState {
        next_version: Cell::new(0),
        versions: RefCell::new(HashMap::new()),
        uis: RefCell::new(HashMap::new()),
        stopped: Cell::new(false),
    });

    let on_mount = {
        let state = state.clone();
        move |doc: &Document, element: NodeId| -> Result<Option<Disposer>, CallbackError> {
            let version = state.bump_version(element);
            let creating = create_fn(doc, element);
            let state = state.clone();
            spawner
                .spawn_local(async move {
                    match creating.await {
                        Ok(created) => state.settle(element, version, created),
                        Err(e) => log::error!("Failed to create UI for element {:?}: {}", element, e),
                    }
                })
                .map_err(|e| CallbackError::new(e.to_string()))?;
            Ok(None)
        }
    };
    let on_unmount = {
        let state = state.clone();
        move |_: &Document, element: NodeId| -> Result<(), CallbackError> {
            state.forget(element);
            Ok(())
        }
    };

    let options = ElementsObserverOptions::default()
        .with_on_mount(on_mount)
        .with_on_unmount(on_unmount);
    let observer = ElementsObserver::start(doc, selectors, options)?;

    Ok(CreateUis { state, observer })
}
