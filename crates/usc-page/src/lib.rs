//! Userscript Collection Page Engine
//!
//! Everything a userscript does once it has been selected for a page: wait
//! for anchor elements, mount UI roots next to them inside isolated shadow
//! trees, and keep those UIs in step with the page as the anchor comes and
//! goes.
//!
//! # Architecture
//!
//! The page is modelled by [`Document`], a single-threaded node arena with
//! CSS selector and XPath lookup, bubbling events and mutation observers.
//! Mutation records are delivered at [`Document::flush_mutations`], the
//! point where waits settle and observers react. Asynchronous work runs on a
//! caller-provided `futures` local spawner.
//!
//! # Modules
//!
//! - `dom`: Page model
//! - `abort`: Abort controllers and signals
//! - `wait`: `wait_for_element` with shared in-flight observations
//! - `anchor`: Anchor resolution, insertion and positioning
//! - `shadow`: Isolated shadow-root containers
//! - `ui`: Shadow-root UI handles
//! - `auto_mount`: Mount/unmount loop following an anchor
//! - `observer`: Per-element lifecycle callbacks
//! - `create_uis`: One UI per matching element

pub mod abort;
pub mod anchor;
pub mod auto_mount;
pub mod create_uis;
pub mod dom;
pub mod observer;
pub mod shadow;
pub mod ui;
pub mod wait;

// Re-export commonly used types
pub use abort::{AbortController, AbortReason, AbortSignal};
pub use anchor::{get_anchor, Alignment, Anchor, AnchorTarget, Append, MountError, MountOptions, Position};
pub use auto_mount::{AutoMountHandle, AutoMountOptions, EXPLICIT_STOP_REASON};
pub use create_uis::{create_uis, CreateUis, ManagedUi};
pub use dom::{Document, DomError, MutationObserver, MutationRecord, NodeId, ObserveOptions, ShadowRootMode};
pub use observer::{CallbackError, Disposer, ElementsObserver, ElementsObserverOptions};
pub use shadow::{
    create_isolated_element, split_shadow_root_css, IsolateEvents, IsolatedElement, IsolatedElementOptions,
    ShadowError, StyleSource, StylesheetLoader,
};
pub use ui::{create_shadow_root_ui, MountState, ShadowRootUi, ShadowRootUiOptions};
pub use wait::{wait_for_element, Detection, Detector, WaitError, WaitOptions};
