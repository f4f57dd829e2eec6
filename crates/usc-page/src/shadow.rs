//! Isolated shadow-root containers.

use std::sync::OnceLock;

use futures::future::LocalBoxFuture;
use regex::Regex;

use crate::dom::{Document, DomError, NodeId, ShadowRootMode};

/// Built-in elements that accept a shadow root.
pub const ALLOWED_SHADOW_ELEMENTS: &[&str] = &[
    "article",
    "aside",
    "blockquote",
    "body",
    "div",
    "footer",
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "header",
    "main",
    "nav",
    "p",
    "section",
    "span",
];

/// Event types stopped at the shadow boundary by [`IsolateEvents::Default`].
pub const DEFAULT_ISOLATED_EVENTS: &[&str] = &["keydown", "keyup", "keypress"];

const PCEN_CHARS: &str = r"\x{B7}\x{C0}-\x{D6}\x{D8}-\x{F6}\x{F8}-\x{37D}\x{37F}-\x{1FFF}\x{200C}\x{200D}\x{203F}\x{2040}\x{2070}-\x{218F}\x{2C00}-\x{2FEF}\x{3001}-\x{D7FF}\x{F900}-\x{FDCF}\x{FDF0}-\x{FFFD}\x{10000}-\x{EFFFF}";

static CUSTOM_ELEMENT_NAME: OnceLock<Option<Regex>> = OnceLock::new();

/// Error type for isolated container creation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShadowError {
    #[error("\"{0}\" cannot have a shadow root attached to it. It must be two words and kebab-case, with a few exceptions. See https://developer.mozilla.org/en-US/docs/Web/API/Element/attachShadow#elements_you_can_attach_a_shadow_to")]
    InvalidHostName(String),
    #[error("No stylesheet loader available to fetch {0}")]
    NoLoader(String),
    #[error("Failed to load stylesheet {url}: {reason}")]
    Stylesheet { url: String, reason: String },
    #[error(transparent)]
    Dom(#[from] DomError),
}

/// Whether `name` is a valid custom element name.
pub fn is_potential_custom_element_name(name: &str) -> bool {
    let regex = CUSTOM_ELEMENT_NAME.get_or_init(|| {
        let source = format!(r"^[a-z][.0-9_a-z{PCEN_CHARS}]*-[\-.0-9_a-z{PCEN_CHARS}]*$");
        Regex::new(&source).ok()
    });
    regex.as_ref().is_some_and(|re| re.is_match(name))
}

fn is_allowed_host(name: &str) -> bool {
    ALLOWED_SHADOW_ELEMENTS.contains(&name) || is_potential_custom_element_name(name)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StyleSource {
    Text(String),
    /// Fetched through a [`StylesheetLoader`].
    Url(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum IsolateEvents {
    #[default]
    None,
    Default,
    Custom(Vec<String>),
}

impl IsolateEvents {
    fn event_types(&self) -> Vec<String> {
        match self {
            IsolateEvents::None => Vec::new(),
            IsolateEvents::Default => DEFAULT_ISOLATED_EVENTS.iter().map(|t| t.to_string()).collect(),
            IsolateEvents::Custom(types) => types.clone(),
        }
    }
}

/// Fetches stylesheet text for [`StyleSource::Url`].
pub trait StylesheetLoader {
    fn load(&self, url: &str) -> LocalBoxFuture<'static, Result<String, String>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolatedElementOptions {
    pub name: String,
    pub mode: ShadowRootMode,
    pub css: Option<StyleSource>,
    pub isolate_events: IsolateEvents,
}

impl IsolatedElementOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: ShadowRootMode::Closed,
            css: None,
            isolate_events: IsolateEvents::None,
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
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IsolatedElement {
    /// The shadow host, detached.
    pub parent_element: NodeId,
    pub shadow: NodeId,
    /// The `div` to render into.
    pub isolated_element: NodeId,
}

pub(crate) async fn resolve_css(
    source: &StyleSource,
    loader: Option<&dyn StylesheetLoader>,
) -> Result<String, ShadowError> {
    match source {
        StyleSource::Text(text) => Ok(text.clone()),
        StyleSource::Url(url) => {
            let loader = loader.ok_or_else(|| ShadowError::NoLoader(url.clone()))?;
            loader.load(url).await.map_err(|reason| ShadowError::Stylesheet {
                url: url.clone(),
                reason,
            })
        }
    }
}

/// Create a detached host with a shadow root containing an optional
/// `<style>` followed by an empty `div`.
pub async fn create_isolated_element(
    doc: &Document,
    options: &IsolatedElementOptions,
    loader: Option<&dyn StylesheetLoader>,
) -> Result<IsolatedElement, ShadowError> {
    if !is_allowed_host(&options.name) {
        return Err(ShadowError::InvalidHostName(options.name.clone()));
    }

    // Loaded before touching the document so a failed fetch leaves nothing behind.
    let css = match &options.css {
        Some(source) => Some(resolve_css(source, loader).await?),
        None => None,
    };

    let host = doc.create_element(&options.name);
    let shadow = doc.attach_shadow(host, options.mode)?;
    let container = doc.create_element("div");

    if let Some(css) = css {
        let style = doc.create_element("style");
        doc.set_text_content(style, &css)?;
        doc.append_child(shadow, style)?;
    }
    doc.append_child(shadow, container)?;

    for event_type in options.isolate_events.event_types() {
        doc.add_event_listener(shadow, &event_type, |event| event.stop_propagation());
    }

    Ok(IsolatedElement {
        parent_element: host,
        shadow,
        isolated_element: container,
    })
}

/// CSS split into what stays inside the shadow root and what must be
/// declared on the document (`@property` and `@font-face`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitCss {
    pub shadow_css: String,
    pub document_css: String,
}

static DOCUMENT_LEVEL_RULES: OnceLock<Option<Regex>> = OnceLock::new();

pub fn split_shadow_root_css(css: &str) -> SplitCss {
    let rules = DOCUMENT_LEVEL_RULES
        .get_or_init(|| Regex::new(r"(\s*@(property|font-face)[\s\S]*?\{[\s\S]*?\})").ok())
        .as_ref();
    let Some(rules) = rules else {
        return SplitCss {
            shadow_css: css.trim().to_string(),
            document_css: String::new(),
        };
    };

    let mut shadow_css = css.to_string();
    let mut document_css = String::new();
    for rule in rules.find_iter(css) {
        document_css.push_str(rule.as_str());
        shadow_css = shadow_css.replacen(rule.as_str(), "", 1);
    }

    SplitCss {
        shadow_css: shadow_css.trim().to_string(),
        document_css: document_css.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use futures::FutureExt;

    struct FixedLoader(Result<String, String>);

    impl StylesheetLoader for FixedLoader {
        fn load(&self, _url: &str) -> LocalBoxFuture<'static, Result<String, String>> {
            let result = self.0.clone();
            async move { result }.boxed_local()
        }
    }

    #[test]
    fn test_host_names() {
        for name in ["div", "span", "h3", "ml-vid-shortcut", "x-y", "my-élément", "a.b-c"] {
            assert!(is_allowed_host(name), "{name}");
        }
        for name in ["button", "input", "Bad-Name", "nodash", "-x", "1-a", "my element-x"] {
            assert!(!is_allowed_host(name), "{name}");
        }
    }

    #[test]
    fn test_invalid_name_touches_nothing() {
        let doc = Document::new();
        let err = block_on(create_isolated_element(&doc, &IsolatedElementOptions::new("button"), None)).unwrap_err();
        assert_eq!(err, ShadowError::InvalidHostName("button".into()));
        assert!(err.to_string().starts_with("\"button\" cannot have a shadow root attached to it."));
        assert!(!doc.has_pending_mutations());
    }

    #[test]
    fn test_structure() {
        let doc = Document::new();
        let options = IsolatedElementOptions::new("ui-panel").with_css(StyleSource::Text(".a { color: red }".into()));
        let isolated = block_on(create_isolated_element(&doc, &options, None)).unwrap();

        assert_eq!(doc.tag_name(isolated.parent_element).as_deref(), Some("ui-panel"));
        assert_eq!(doc.parent(isolated.parent_element), None);
        assert_eq!(doc.host(isolated.shadow), Some(isolated.parent_element));
        assert_eq!(doc.shadow_mode(isolated.shadow), Some(ShadowRootMode::Closed));
        // Closed roots are not reachable from the host.
        assert_eq!(doc.shadow_root(isolated.parent_element), None);

        let children = doc.children(isolated.shadow);
        assert_eq!(children.len(), 2);
        assert_eq!(doc.tag_name(children[0]).as_deref(), Some("style"));
        assert_eq!(doc.text_content(children[0]), ".a { color: red }");
        assert_eq!(children[1], isolated.isolated_element);
        assert_eq!(doc.tag_name(isolated.isolated_element).as_deref(), Some("div"));
    }

    #[test]
    fn test_stylesheet_from_loader() {
        let doc = Document::new();
        let options = IsolatedElementOptions::new("div")
            .with_mode(ShadowRootMode::Open)
            .with_css(StyleSource::Url("https://cdn.example/ui.css".into()));

        let loader = FixedLoader(Ok("p { margin: 0 }".into()));
        let isolated = block_on(create_isolated_element(&doc, &options, Some(&loader))).unwrap();
        assert_eq!(doc.shadow_root(isolated.parent_element), Some(isolated.shadow));
        let style = doc.first_child(isolated.shadow).unwrap();
        assert_eq!(doc.text_content(style), "p { margin: 0 }");

        let failing = FixedLoader(Err("404".into()));
        let err = block_on(create_isolated_element(&doc, &options, Some(&failing))).unwrap_err();
        assert!(matches!(err, ShadowError::Stylesheet { ref reason, .. } if reason == "404"));

        let err = block_on(create_isolated_element(&doc, &options, None)).unwrap_err();
        assert_eq!(err, ShadowError::NoLoader("https://cdn.example/ui.css".into()));
    }

    #[test]
    fn test_isolated_events_stop_at_shadow_root() {
        let doc = Document::new();
        let options = IsolatedElementOptions::new("ui-panel").with_isolate_events(IsolateEvents::Default);
        let isolated = block_on(create_isolated_element(&doc, &options, None)).unwrap();
        let body = doc.body().unwrap();
        doc.append_child(body, isolated.parent_element).unwrap();

        let keydown = doc.dispatch_event(isolated.isolated_element, "keydown");
        assert!(keydown.is_propagation_stopped());
        assert!(!keydown.path().contains(&isolated.parent_element));

        let click = doc.dispatch_event(isolated.isolated_element, "click");
        assert!(!click.is_propagation_stopped());
        assert!(click.path().contains(&body));
    }

    #[test]
    fn test_custom_isolated_events() {
        let doc = Document::new();
        let options = IsolatedElementOptions::new("ui-panel")
            .with_isolate_events(IsolateEvents::Custom(vec!["click".into()]));
        let isolated = block_on(create_isolated_element(&doc, &options, None)).unwrap();
        assert!(doc.dispatch_event(isolated.isolated_element, "click").is_propagation_stopped());
        assert!(!doc.dispatch_event(isolated.isolated_element, "keydown").is_propagation_stopped());
    }

    #[test]
    fn test_split_shadow_root_css() {
        let css = "@property --x { syntax: '<length>'; inherits: false; }\n.a { color: red; }\n@font-face { font-family: Foo; src: url(foo.woff); }";
        let split = split_shadow_root_css(css);
        assert_eq!(split.shadow_css, ".a { color: red; }");
        assert_eq!(
            split.document_css,
            "@property --x { syntax: '<length>'; inherits: false; }\n@font-face { font-family: Foo; src: url(foo.woff); }"
        );

        let plain = split_shadow_root_css("  .b { margin: 0 }  ");
        assert_eq!(plain.shadow_css, ".b { margin: 0 }");
        assert_eq!(plain.document_css, "");
    }
}
