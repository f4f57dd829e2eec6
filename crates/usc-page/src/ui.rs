//! Shadow-root UI handles.
//!
//! A [`ShadowRootUi`] owns a detached shadow host built by
//! [`create_isolated_element`] and moves it in and out of the page:
//!
//! ```text
//! Unmounted --mount()--> Mounted --remove()--> Unmounted
//! ```
//!
//! `@property` and `@font-face` rules have no effect inside a shadow tree,
//! so they are injected into the document once per mount.

use std::cell::{Cell, Ref, RefCell};
use std::fmt;
use std::rc::Rc;

use futures::task::LocalSpawn;

use crate::anchor::{apply_position, mount_ui, MountError, MountOptions};
use crate::auto_mount::{auto_mount_ui, AutoMountHandle, AutoMountOptions, AutoMountTarget};
use crate::dom::{Document, NodeId, ShadowRootMode};
use crate::shadow::{
    create_isolated_element, resolve_css, split_shadow_root_css, IsolateEvents, IsolatedElementOptions, ShadowError,
    StyleSource, StylesheetLoader,
};

/// Attribute set on every shadow host.
pub const SHADOW_ROOT_ATTRIBUTE: &str = "data-monkey-shadow-root";
/// Attribute identifying an instance's document-level `<style>`.
pub const DOCUMENT_STYLES_ATTRIBUTE: &str = "data-monkey-shadow-root-document-styles";

thread_local! {
    static NEXT_INSTANCE: Cell<u64> = const { Cell::new(1) };
}

pub type OnMount<T> = dyn Fn(&Document, NodeId, NodeId, NodeId) -> T;
pub type OnRemove<T> = dyn Fn(Option<T>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountState {
    Unmounted,
    Mounted,
}

pub struct ShadowRootUiOptions<T> {
    /// Host tag name.
    pub name: String,
    pub mode: ShadowRootMode,
    pub css: Option<StyleSource>,
    pub isolate_events: IsolateEvents,
    pub mount: MountOptions,
    /// Called with `(container, shadow, host)`; the value is kept until removal.
    pub on_mount: Rc<OnMount<T>>,
    pub on_remove: Option<Rc<OnRemove<T>>>,
}

impl<T> ShadowRootUiOptions<T> {
    pub fn new<F>(name: impl Into<String>, on_mount: F) -> Self
    where
        F: Fn(&Document, NodeId, NodeId, NodeId) -> T + 'static,
    {
        Self {
            name: name.into(),
            mode: ShadowRootMode::Open,
            css: None,
            isolate_events: IsolateEvents::None,
            mount: MountOptions::default(),
            on_mount: Rc::new(on_mount),
            on_remove: None,
        }
    }

    pub fn with_mode(mut self, mode: ShadowRootMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_css(mut self, css: StyleSource) -> Self {
        self.css = Some(css);
        self
    }

    pub fn with_isolate_events(mut self, isolate_events: IsolateEvents) -> Self {
        self.isolate_events = isolate_events;
        self
    }

    pub fn with_mount(mut self, mount: MountOptions) -> Self {
        self.mount = mount;
        self
    }

    pub fn with_on_remove<F>(mut self, on_remove: F) -> Self
    where
        F: Fn(Option<T>) + 'static,
    {
        self.on_remove = Some(Rc::new(on_remove));
        self
    }
}

struct UiInner<T> {
    doc: Document,
    spawner: Rc<dyn LocalSpawn>,
    mount_options: MountOptions,
    on_mount: Rc<OnMount<T>>,
    on_remove: Option<Rc<OnRemove<T>>>,
    host: NodeId,
    shadow: NodeId,
    container: NodeId,
    instance_id: String,
    document_css: String,
    mounted: RefCell<Option<T>>,
    state: Cell<MountState>,
    auto_mount: RefCell<Option<AutoMountHandle>>,
}

impl<T> UiInner<T> {
    fn document_style_selector(&self) -> String {
        format!("style[{}=\"{}\"]", DOCUMENT_STYLES_ATTRIBUTE, self.instance_id)
    }

    fn inject_document_css(&self) -> Result<(), MountError> {
        let doc = &self.doc;
        if self.document_css.is_empty() || doc.query_selector(doc.root(), &self.document_style_selector())?.is_some() {
            return Ok(());
        }
        let Some(parent) = doc.head().or_else(|| doc.body()) else {
            return Ok(());
        };
        let style = doc.create_element("style");
        doc.set_text_content(style, &self.document_css)?;
        doc.set_attribute(style, DOCUMENT_STYLES_ATTRIBUTE, &self.instance_id)?;
        doc.append_child(parent, style)?;
        Ok(())
    }
}

impl<T> AutoMountTarget for UiInner<T> {
    fn mount(&self) -> Result<(), MountError> {
        if self.state.get() == MountState::Mounted {
            log::debug!("UI {} is already mounted", self.instance_id);
            return Ok(());
        }

        let doc = &self.doc;
        mount_ui(doc, self.host, &self.mount_options)?;
        let positioned = doc.query_selector(self.shadow, "html")?;
        apply_position(doc, self.host, positioned, &self.mount_options)?;
        self.inject_document_css()?;

        let value = (self.on_mount)(doc, self.container, self.shadow, self.host);
        *self.mounted.borrow_mut() = Some(value);
        self.state.set(MountState::Mounted);
        Ok(())
    }

    fn unmount(&self) -> Result<(), MountError> {
        let mounted = self.mounted.borrow_mut().take();
        if let Some(on_remove) = &self.on_remove {
            on_remove(mounted);
        }

        let doc = &self.doc;
        doc.remove(self.host)?;
        if let Some(style) = doc.query_selector(doc.root(), &self.document_style_selector())? {
            doc.remove(style)?;
        }
        while let Some(child) = doc.last_child(self.container) {
            doc.remove_child(self.container, child)?;
        }
        self.state.set(MountState::Unmounted);
        Ok(())
    }

    fn stop_auto_mount(&self) {
        let handle = self.auto_mount.borrow_mut().take();
        if let Some(handle) = handle {
            handle.stop();
        }
    }
}

/// Handle to a UI rendered inside a shadow root.
pub struct ShadowRootUi<T: 'static> {
    inner: Rc<UiInner<T>>,
}

impl<T: 'static> Clone for ShadowRootUi<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: 'static> fmt::Debug for ShadowRootUi<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShadowRootUi")
            .field("instance_id", &self.inner.instance_id)
            .field("host", &self.inner.host)
            .field("state", &self.inner.state.get())
            .finish()
    }
}

/// Build the shadow host and container for a UI. Nothing is inserted into
/// the page until [`ShadowRootUi::mount`].
///
/// `loader` is only needed when `options.css` is a URL. `spawner` runs the
/// auto-mount watcher.
pub async fn create_shadow_root_ui<T: 'static>(
    doc: &Document,
    options: ShadowRootUiOptions<T>,
    loader: Option<&dyn StylesheetLoader>,
    spawner: Rc<dyn LocalSpawn>,
) -> Result<ShadowRootUi<T>, ShadowError> {
    let css = match &options.css {
        Some(source) => resolve_css(source, loader).await?,
        None => String::new(),
    };
    let split = split_shadow_root_css(css.trim());

    let isolated_options = IsolatedElementOptions::new(options.name.clone())
        .with_mode(options.mode)
        .with_css(StyleSource::Text(split.shadow_css))
        .with_isolate_events(options.isolate_events.clone());
    let isolated = create_isolated_element(doc, &isolated_options, None).await?;

    doc.set_attribute(isolated.parent_element, SHADOW_ROOT_ATTRIBUTE, "")?;
    if doc.query_selector(isolated.shadow, "head")?.is_none() {
        let head = doc.create_element("head");
        doc.insert_before(isolated.shadow, head, doc.first_child(isolated.shadow))?;
    }

    let instance = NEXT_INSTANCE.with(|next| next.replace(next.get() + 1));
    Ok(ShadowRootUi {
        inner: Rc::new(UiInner {
            doc: doc.clone(),
            spawner,
            mount_options: options.mount,
            on_mount: options.on_mount,
            on_remove: options.on_remove,
            host: isolated.parent_element,
            shadow: isolated.shadow,
            container: isolated.isolated_element,
            instance_id: format!("ui-{}", instance),
            document_css: split.document_css,
            mounted: RefCell::new(None),
            state: Cell::new(MountState::Unmounted),
            auto_mount: RefCell::new(None),
        }),
    })
}

impl<T: 'static> ShadowRootUi<T> {
    /// Insert and position the host, then run `on_mount`. No-op when mounted.
    pub fn mount(&self) -> Result<(), MountError> {
        self.inner.mount()
    }

    /// Stop auto-mount, run `on_remove` and detach the host.
    pub fn remove(&self) -> Result<(), MountError> {
        self.inner.stop_auto_mount();
        self.inner.unmount()
    }

    /// Mount whenever the anchor exists and unmount when it goes away.
    ///
    /// Calling this again replaces the stored handle; the previous watcher
    /// keeps running until it stops on its own.
    pub fn auto_mount(&self, options: AutoMountOptions) -> Result<(), MountError> {
        if self.inner.auto_mount.borrow().is_some() {
            log::warn!("autoMount is already set.");
        }
        let handle = auto_mount_ui(
            &self.inner.doc,
            Rc::downgrade(&self.inner),
            self.inner.mount_options.clone(),
            options,
            &*self.inner.spawner,
        )?;
        *self.inner.auto_mount.borrow_mut() = Some(handle);
        Ok(())
    }

    pub fn stop_auto_mount(&self) {
        self.inner.stop_auto_mount();
    }

    pub fn is_auto_mounting(&self) -> bool {
        self.inner.auto_mount.borrow().as_ref().is_some_and(|handle| !handle.is_stopped())
    }

    /// Value returned by the last `on_mount`, while mounted.
    pub fn mounted(&self) -> Ref<'_, Option<T>> {
        self.inner.mounted.borrow()
    }

    pub fn is_mounted(&self) -> bool {
        self.inner.state.get() == MountState::Mounted
    }

    pub fn state(&self) -> MountState {
        self.inner.state.get()
    }

    pub fn shadow(&self) -> NodeId {
        self.inner.shadow
    }

    pub fn shadow_host(&self) -> NodeId {
        self.inner.host
    }

    pub fn ui_container(&self) -> NodeId {
        self.inner.container
    }
}
