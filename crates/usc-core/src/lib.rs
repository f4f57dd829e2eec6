//! Userscript Collection Core Library
//!
//! This crate decides which userscripts run on which pages. Scripts declare
//! browser-extension style match patterns (`https://*.example.com/*`) and the
//! engine compiles them into validated matchers that are consulted once per
//! page against `location.href`.
//!
//! # Architecture
//!
//! Compilation never fails loudly: an invalid pattern produces an invalid
//! [`CompiledMatcher`] carrying a [`PatternError`]. Matching is total, a URL
//! that cannot be parsed or normalized simply does not match.
//!
//! # Modules
//!
//! - `config`: Matcher options and browser presets
//! - `regex_builder`: Small expression builder for escaped regex sources
//! - `normalize`: `decodeURI`/`encodeURI` compatible fragment normalization
//! - `pattern`: Pattern parsing, validation, matching and example URLs
//! - `manifest`: Userscript manifest and per-page script selection

use std::sync::OnceLock;

use regex::Regex;

pub mod config;
pub mod manifest;
pub mod normalize;
pub mod pattern;
pub mod regex_builder;

// Re-export commonly used types
pub use config::{MatchOptions, Preset};
pub use manifest::{Manifest, ManifestError, ScriptTarget, Selection, Userscript};
pub use pattern::{match_pattern, match_patterns, CompiledMatcher, PatternError, ALL_URLS};

/// Lazily compile a fixed regex source, `None` if the source is rejected.
pub(crate) fn static_regex(cell: &'static OnceLock<Option<Regex>>, source: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(source).ok()).as_ref()
}
