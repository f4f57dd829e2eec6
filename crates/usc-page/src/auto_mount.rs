//! Keeping a UI mounted while its anchor comes and goes.

use std::fmt;
use std::rc::{Rc, Weak};

use futures::task::{LocalSpawn, LocalSpawnExt};

use crate::abort::{AbortController, AbortReason};
use crate::anchor::{get_anchor, AnchorTarget, MountError, MountOptions};
use crate::dom::Document;
use crate::wait::{wait_for_element, Detector, WaitError, WaitOptions};

/// Abort reason used by [`AutoMountHandle::stop`]; the loop exits cleanly on it.
pub const EXPLICIT_STOP_REASON: &str = "explicit_stop_auto_mount";

#[derive(Clone, Default)]
pub struct AutoMountOptions {
    /// Stop watching after the first unmount.
    pub once: bool,
    pub on_stop: Option<Rc<dyn Fn()>>,
}

impl fmt::Debug for AutoMountOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutoMountOptions")
            .field("once", &self.once)
            .field("on_stop", &self.on_stop.as_ref().map(|_| ".."))
            .finish()
    }
}

impl AutoMountOptions {
    pub fn with_once(mut self, once: bool) -> Self {
        self.once = once;
        self
    }

    pub fn with_on_stop<F>(mut self, on_stop: F) -> Self
    where
        F: Fn() + 'static,
    {
        self.on_stop = Some(Rc::new(on_stop));
        self
    }
}

/// What the auto-mount loop drives.
pub trait AutoMountTarget {
    fn mount(&self) -> Result<(), MountError>;
    /// Remove without stopping auto-mount.
    fn unmount(&self) -> Result<(), MountError>;
    fn stop_auto_mount(&self);
}

/// Stops a running auto-mount loop.
pub struct AutoMountHandle {
    controller: AbortController,
    on_stop: Option<Rc<dyn Fn()>>,
}

impl fmt::Debug for AutoMountHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutoMountHandle")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl AutoMountHandle {
    pub fn stop(&self) {
        self.controller.abort(AbortReason::new(EXPLICIT_STOP_REASON));
        if let Some(on_stop) = &self.on_stop {
            on_stop();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.controller.signal().is_aborted()
    }
}

/// Mount `ui` now if its anchor exists, then spawn a loop that waits for the
/// anchor to disappear or reappear and unmounts or mounts to match.
///
/// Anchors that are, or resolve to, a concrete element cannot be watched
/// and are rejected. The initial mount happens before this returns and its
/// error is returned; later failures end the loop and are logged.
pub fn auto_mount_ui<U>(
    doc: &Document,
    ui: Weak<U>,
    mount_options: MountOptions,
    options: AutoMountOptions,
    spawner: &dyn LocalSpawn,
) -> Result<AutoMountHandle, MountError>
where
    U: AutoMountTarget + 'static,
{
    let resolved = mount_options.anchor.as_ref().and_then(|anchor| anchor.target(doc));
    let selector = match resolved {
        Some(AnchorTarget::Element(_)) => return Err(MountError::ElementAnchorWithAutoMount),
        Some(AnchorTarget::Selector(selector)) => selector,
        None => "body".to_string(),
    };

    let controller = AbortController::new();
    let handle = AutoMountHandle {
        controller: controller.clone(),
        on_stop: options.on_stop.clone(),
    };

    let mut anchor_exists = get_anchor(doc, mount_options.anchor.as_ref())?.is_some();
    if anchor_exists {
        if let Some(ui) = ui.upgrade() {
            ui.mount()?;
        }
    }

    let doc = doc.clone();
    let signal = controller.signal();
    let once = options.once;
    let watch = async move {
        while !signal.is_aborted() {
            let anchor = mount_options.anchor.clone();
            let detector = if anchor_exists { Detector::NotExists } else { Detector::Exists };
            let wait_options = WaitOptions::default()
                .with_detector(detector)
                .with_signal(signal.clone())
                .with_custom_matcher(move |doc, _| get_anchor(doc, anchor.as_ref()).ok().flatten());

            let changed = match wait_for_element(&doc, &selector, wait_options).await {
                Ok(changed) => changed,
                Err(WaitError::Aborted(reason)) if reason.as_str() == EXPLICIT_STOP_REASON => break,
                Err(e) => return Err(MountError::from(e)),
            };
            let Some(ui) = ui.upgrade() else {
                break;
            };

            anchor_exists = changed.is_some();
            if anchor_exists {
                ui.mount()?;
            } else {
                ui.unmount()?;
                if once {
                    ui.stop_auto_mount();
                }
            }
        }
        Ok(())
    };

    spawner.spawn_local(async move {
        if let Err(e) = watch.await {
            log::error!("Auto-mount stopped: {}", e);
        }
    })?;

    Ok(handle)
}
