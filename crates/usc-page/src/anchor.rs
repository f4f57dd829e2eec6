//! Anchor resolution, insertion and positioning of UI roots.

use std::fmt;
use std::rc::Rc;

use futures::task::SpawnError;

use crate::dom::{Document, DomError, NodeId};
use crate::wait::WaitError;

/// Error type for mounting.
#[derive(Debug, thiserror::Error)]
pub enum MountError {
    #[error("Failed to mount content script UI: could not find anchor element")]
    AnchorNotFound,
    #[error("autoMount and an element anchor cannot be combined. Avoid passing an element, or a resolver returning one, as the anchor")]
    ElementAnchorWithAutoMount,
    #[error(transparent)]
    Dom(#[from] DomError),
    #[error(transparent)]
    Wait(#[from] WaitError),
    #[error("Failed to spawn auto-mount task: {0}")]
    Spawn(#[from] SpawnError),
}

/// What an anchor resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnchorTarget {
    /// CSS selector, or an XPath expression when it starts with `/`.
    Selector(String),
    Element(NodeId),
}

pub type AnchorResolver = dyn Fn(&Document) -> Option<AnchorTarget>;

#[derive(Clone)]
pub enum Anchor {
    Target(AnchorTarget),
    Resolver(Rc<AnchorResolver>),
}

impl fmt::Debug for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anchor::Target(target) => f.debug_tuple("Target").field(target).finish(),
            Anchor::Resolver(_) => f.write_str("Resolver(..)"),
        }
    }
}

impl Anchor {
    pub fn selector(selector: impl Into<String>) -> Self {
        Anchor::Target(AnchorTarget::Selector(selector.into()))
    }

    pub fn element(element: NodeId) -> Self {
        Anchor::Target(AnchorTarget::Element(element))
    }

    pub fn resolver<F>(resolver: F) -> Self
    where
        F: Fn(&Document) -> Option<AnchorTarget> + 'static,
    {
        Anchor::Resolver(Rc::new(resolver))
    }

    /// Run the resolver, if any.
    pub fn target(&self, doc: &Document) -> Option<AnchorTarget> {
        match self {
            Anchor::Target(target) => Some(target.clone()),
            Anchor::Resolver(resolver) => resolver(doc),
        }
    }
}

pub type Inserter = dyn Fn(&Document, NodeId, NodeId) -> Result<(), DomError>;

/// Where the UI root goes relative to the anchor.
#[derive(Clone, Default)]
pub enum Append {
    #[default]
    Last,
    First,
    Replace,
    After,
    Before,
    /// Called with `(anchor, root)`.
    Custom(Rc<Inserter>),
}

impl fmt::Debug for Append {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Append::Last => f.write_str("Last"),
            Append::First => f.write_str("First"),
            Append::Replace => f.write_str("Replace"),
            Append::After => f.write_str("After"),
            Append::Before => f.write_str("Before"),
            Append::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Alignment {
    #[default]
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Position {
    #[default]
    Inline,
    Overlay(Alignment),
    /// Viewport-fixed, full-bleed.
    Modal,
}

#[derive(Debug, Clone, Default)]
pub struct MountOptions {
    /// `None` mounts into `<body>`.
    pub anchor: Option<Anchor>,
    pub append: Append,
    pub position: Position,
    pub z_index: Option<i32>,
}

impl MountOptions {
    pub fn with_anchor(mut self, anchor: Anchor) -> Self {
        self.anchor = Some(anchor);
        self
    }

    pub fn with_append(mut self, append: Append) -> Self {
        self.append = append;
        self
    }

    pub fn with_position(mut self, position: Position) -> Self {
        self.position = position;
        self
    }

    pub fn with_z_index(mut self, z_index: i32) -> Self {
        self.z_index = Some(z_index);
        self
    }
}

/// Resolve the anchor element, `Ok(None)` when it is not in the page.
pub fn get_anchor(doc: &Document, anchor: Option<&Anchor>) -> Result<Option<NodeId>, DomError> {
    let Some(anchor) = anchor else {
        return Ok(doc.body());
    };
    match anchor.target(doc) {
        None => Ok(None),
        Some(AnchorTarget::Element(element)) => Ok(Some(element)),
        Some(AnchorTarget::Selector(selector)) if selector.starts_with('/') => doc.evaluate_xpath(&selector),
        Some(AnchorTarget::Selector(selector)) => doc.query_selector(doc.root(), &selector),
    }
}

/// Insert `root` next to the resolved anchor.
pub fn mount_ui(doc: &Document, root: NodeId, options: &MountOptions) -> Result<(), MountError> {
    let anchor = get_anchor(doc, options.anchor.as_ref())?.ok_or(MountError::AnchorNotFound)?;

    match &options.append {
        Append::Last => doc.append_child(anchor, root)?,
        Append::First => doc.prepend(anchor, root)?,
        Append::Replace => doc.replace_with(anchor, root)?,
        Append::After => {
            if let Some(parent) = doc.parent_element(anchor) {
                doc.insert_before(parent, root, doc.next_element_sibling(anchor))?;
            }
        }
        Append::Before => {
            if let Some(parent) = doc.parent_element(anchor) {
                doc.insert_before(parent, root, Some(anchor))?;
            }
        }
        Append::Custom(inserter) => inserter(doc, anchor, root)?,
    }
    Ok(())
}

/// Style the root, and the positioned element when given, for the position.
pub fn apply_position(
    doc: &Document,
    root: NodeId,
    positioned: Option<NodeId>,
    options: &MountOptions,
) -> Result<(), DomError> {
    if options.position == Position::Inline {
        return Ok(());
    }

    if let Some(z_index) = options.z_index {
        doc.set_style_property(root, "z-index", &z_index.to_string())?;
    }
    for (property, value) in [
        ("overflow", "visible"),
        ("position", "relative"),
        ("width", "0"),
        ("height", "0"),
        ("display", "block"),
    ] {
        doc.set_style_property(root, property, value)?;
    }

    let Some(positioned) = positioned else {
        return Ok(());
    };
    match options.position {
        Position::Overlay(alignment) => {
            doc.set_style_property(positioned, "position", "absolute")?;
            let vertical = match alignment {
                Alignment::BottomLeft | Alignment::BottomRight => "bottom",
                Alignment::TopLeft | Alignment::TopRight => "top",
            };
            let horizontal = match alignment {
                Alignment::TopRight | Alignment::BottomRight => "right",
                Alignment::TopLeft | Alignment::BottomLeft => "left",
            };
            doc.set_style_property(positioned, vertical, "0")?;
            doc.set_style_property(positioned, horizontal, "0")?;
        }
        Position::Modal => {
            doc.set_style_property(positioned, "position", "fixed")?;
            for side in ["top", "bottom", "left", "right"] {
                doc.set_style_property(positioned, side, "0")?;
            }
        }
        Position::Inline => {}
    }
    Ok(())
}
